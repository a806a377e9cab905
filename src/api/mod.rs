//! HTTP API surface: the `QueryAPI` endpoint, capture status, metrics, and
//! the OpenAPI document that backs `--openapi.spec-outfile`.

pub mod openapi;
pub mod server;

pub use server::{router, ApiState};
