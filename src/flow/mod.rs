//! Flow value/table/aggregated-map types (C3, §3).

pub mod aggmap;
pub mod counters;
pub mod table;

pub use aggmap::AggFlowMap;
pub use counters::Counters;
pub use table::FlowTable;
