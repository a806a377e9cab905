//! `PacketSource` — the external collaborator for packet sourcing
//! (spec.md §1 "out of scope", §6). Kernel ring-buffer interaction, BPF, and
//! link-level framing live behind this trait; this crate only consumes it.

use crate::packet::PacketType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceError {
    /// `unblock()` was called while a read was pending; the reader must
    /// retry, never treat this as a partial packet (spec.md §9).
    Unblocked,
    /// `close()` was called; the hot loop must exit cleanly.
    Stopped,
    Other,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SourceStats {
    pub received_total: u64,
    pub dropped_total: u64,
}

/// One packet as handed back by [`PacketSource::next_packet`].
pub struct SourcePacket<'a> {
    pub ip_layer: &'a [u8],
    pub pkt_type: PacketType,
    pub total_len: u32,
}

pub trait PacketSource: Send {
    /// Blocks until a packet is available, or returns an error. Must return
    /// [`SourceError::Unblocked`] — never a partial packet — after
    /// `unblock()` interrupts an in-flight wait.
    fn next_packet<'a>(&mut self, scratch: &'a mut Vec<u8>) -> Result<SourcePacket<'a>, SourceError>;

    fn stats(&self) -> SourceStats;

    /// Idempotent. Causes the in-flight (or next) `next_packet` call to
    /// return `Unblocked`.
    fn unblock(&self);

    /// Idempotent, terminal. Causes `next_packet` to return `Stopped`.
    fn close(&self);

    fn link_name(&self) -> &str;
}

/// In-memory [`PacketSource`] used by tests and the example binaries. Not
/// part of the spec's contract surface — it exists purely to exercise the
/// capture engine without a real kernel ring buffer.
///
/// The queue lives behind an `Arc<Mutex<..>>` so that [`handle`](Self::handle)
/// can hand out a cloneable injector: the engine owns one `SyntheticSource`
/// by value on its capture thread, while a test keeps a clone to push
/// packets in from the outside while the engine is running — the same
/// shape a real `PacketSource` has (packets arrive from somewhere the
/// engine doesn't control).
#[derive(Clone)]
pub struct SyntheticSource {
    name: String,
    queue: std::sync::Arc<std::sync::Mutex<std::collections::VecDeque<Vec<u8>>>>,
    stopped: std::sync::Arc<std::sync::atomic::AtomicBool>,
    unblock_requested: std::sync::Arc<std::sync::atomic::AtomicBool>,
    received: std::sync::Arc<std::sync::atomic::AtomicU64>,
}

impl SyntheticSource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            queue: Default::default(),
            stopped: Default::default(),
            unblock_requested: Default::default(),
            received: Default::default(),
        }
    }

    /// A cloneable handle sharing this source's queue — used to inject
    /// packets from outside the thread that owns the source.
    pub fn handle(&self) -> Self {
        self.clone()
    }

    pub fn push(&self, ip_layer: Vec<u8>) {
        self.queue.lock().unwrap().push_back(ip_layer);
    }

    pub fn pending(&self) -> usize {
        self.queue.lock().unwrap().len()
    }
}

impl PacketSource for SyntheticSource {
    fn next_packet<'a>(&mut self, scratch: &'a mut Vec<u8>) -> Result<SourcePacket<'a>, SourceError> {
        use std::sync::atomic::Ordering;
        if self.stopped.load(Ordering::Acquire) {
            return Err(SourceError::Stopped);
        }
        if self
            .unblock_requested
            .swap(false, Ordering::AcqRel)
        {
            return Err(SourceError::Unblocked);
        }
        match self.queue.lock().unwrap().pop_front() {
            Some(bytes) => {
                self.received.fetch_add(1, Ordering::Relaxed);
                scratch.clear();
                scratch.extend_from_slice(&bytes);
                let len = scratch.len() as u32;
                Ok(SourcePacket {
                    ip_layer: scratch.as_slice(),
                    pkt_type: PacketType::Outgoing,
                    total_len: len,
                })
            }
            None => Err(SourceError::Unblocked),
        }
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            received_total: self.received.load(std::sync::atomic::Ordering::Relaxed),
            dropped_total: 0,
        }
    }

    fn unblock(&self) {
        self.unblock_requested
            .store(true, std::sync::atomic::Ordering::Release);
    }

    fn close(&self) {
        self.stopped.store(true, std::sync::atomic::Ordering::Release);
    }

    fn link_name(&self) -> &str {
        &self.name
    }
}
