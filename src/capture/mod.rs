//! Packet capture: engines (C5), the interface manager (C6), the local ring
//! buffer and pool (C4), and the packet source contract.

pub mod engine;
pub mod lock;
pub mod manager;
pub mod ringbuffer;
pub mod source;

pub use engine::{EngineHandle, EngineStatsSnapshot, RotationOutput};
pub use manager::{CaptureManager, IfaceChange, IfaceChanges, InterfaceStatus};
pub use ringbuffer::{Record, RingBuffer, RingBufferPool};
pub use source::{PacketSource, SourceError, SourcePacket, SourceStats, SyntheticSource};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("lock rendezvous with capture engine on {0} timed out")]
    LockTimeout(String),

    #[error("ring buffer pool exhausted for interface {0}")]
    PoolExhausted(String),

    #[error("interface {0} is not known to this capture manager")]
    UnknownInterface(String),

    #[error("interface name {0} did not match any device (spec.md autodetect)")]
    NoMatchingDevice(String),

    #[error(transparent)]
    Source(#[from] std::io::Error),
}
