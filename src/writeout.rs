//! `WriteoutSink` — the external collaborator that persists rotated flow
//! data (spec.md §6). The on-disk block codec is out of scope; this crate
//! only defines the contract plus in-memory doubles for tests.

use async_trait::async_trait;

use crate::flow::{AggFlowMap, Counters};

#[derive(Debug, Clone)]
pub struct TaggedMap {
    pub iface: String,
    pub map: AggFlowMap,
    pub stats: Counters,
}

#[async_trait]
pub trait WriteoutSink: Send + Sync {
    /// Consumes one rotation's worth of tagged maps. `rotation_ts` is the
    /// wall-clock time the manager began the rotation.
    async fn handle_writeout(&self, rotation_ts: chrono::DateTime<chrono::Utc>, maps: Vec<TaggedMap>);
}

/// Discards everything. Used where a concrete sink is required but
/// unexercised (benchmarks, smoke tests).
pub struct NullWriteoutSink;

#[async_trait]
impl WriteoutSink for NullWriteoutSink {
    async fn handle_writeout(&self, _rotation_ts: chrono::DateTime<chrono::Utc>, _maps: Vec<TaggedMap>) {}
}

/// Retains every rotation it receives, in arrival order. Used by tests that
/// need to assert on what was written out (spec.md §8 scenarios).
#[derive(Default)]
pub struct InMemoryWriteoutSink {
    inner: parking_lot::Mutex<Vec<(chrono::DateTime<chrono::Utc>, Vec<TaggedMap>)>>,
}

impl InMemoryWriteoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn drain(&self) -> Vec<(chrono::DateTime<chrono::Utc>, Vec<TaggedMap>)> {
        std::mem::take(&mut self.inner.lock())
    }
}

#[async_trait]
impl WriteoutSink for InMemoryWriteoutSink {
    async fn handle_writeout(&self, rotation_ts: chrono::DateTime<chrono::Utc>, maps: Vec<TaggedMap>) {
        self.inner.lock().push((rotation_ts, maps));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_sink_retains_rotations_in_order() {
        let sink = InMemoryWriteoutSink::new();
        let ts = chrono::Utc::now();
        sink.handle_writeout(
            ts,
            vec![TaggedMap {
                iface: "eth0".to_string(),
                map: AggFlowMap::new(),
                stats: Counters::default(),
            }],
        )
        .await;
        let drained = sink.drain();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].1[0].iface, "eth0");
        assert!(sink.drain().is_empty());
    }
}
