//! C5 — the capture engine. One instance per interface, running its packet
//! loop on a dedicated OS thread (spec.md §4.5, §5: the hot loop must never
//! cross an `.await` point).

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace, warn};

use super::lock::{three_point_lock, LockHandle, LockParticipant, DEFAULT_LOCK_TIMEOUT};
use super::ringbuffer::{RingBuffer, RingBufferPool};
use super::source::{PacketSource, SourceError};
use crate::flow::{AggFlowMap, Counters, FlowTable};
use crate::packet::{self, parser::ParseErrno};

/// Snapshot counters published by the engine, read by the manager and the
/// `/status` endpoint without taking the flow table lock (spec.md §4.5,
/// "stats contract").
#[derive(Debug, Default)]
pub struct EngineStats {
    pub packets_processed: AtomicU64,
    pub packets_dropped: AtomicU64,
    pub packets_parse_failed: AtomicU64,
    pub rotations: AtomicU64,
}

impl EngineStats {
    pub fn snapshot(&self) -> EngineStatsSnapshot {
        EngineStatsSnapshot {
            packets_processed: self.packets_processed.load(Ordering::Relaxed),
            packets_dropped: self.packets_dropped.load(Ordering::Relaxed),
            packets_parse_failed: self.packets_parse_failed.load(Ordering::Relaxed),
            rotations: self.rotations.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EngineStatsSnapshot {
    pub packets_processed: u64,
    pub packets_dropped: u64,
    pub packets_parse_failed: u64,
    pub rotations: u64,
}

/// Result of one completed rotation, handed back to whoever called
/// [`EngineHandle::rotate`] (spec.md §4.3 `rotate()`, §4.6).
pub struct RotationOutput {
    pub map: AggFlowMap,
    pub stats: Counters,
}

/// Manager-facing control surface for one running engine.
pub struct EngineHandle {
    pub iface: String,
    lock: LockHandle,
    buf_in: crossbeam_channel::Sender<RingBuffer>,
    buf_out: crossbeam_channel::Receiver<RingBuffer>,
    result_rx: crossbeam_channel::Receiver<RotationOutput>,
    stats: Arc<EngineStats>,
    stop: Arc<AtomicBool>,
    join: Option<std::thread::JoinHandle<()>>,
}

impl EngineHandle {
    pub fn stats(&self) -> EngineStatsSnapshot {
        self.stats.snapshot()
    }

    /// Drives the full three-point lock against the running engine and
    /// returns the flow table it had accumulated since the last rotation
    /// (spec.md §4.5 "three-point lock", §4.3 `rotate()`).
    ///
    /// 1. Acquire a parking buffer from `pool` (the rotator's own
    ///    responsibility, spec.md §5 "resource discipline").
    /// 2. Request the lock; the engine confirms once it has seen the
    ///    request at the top of its loop.
    /// 3. Hand the buffer over. The engine rotates its own flow table (kept
    ///    single-owned rather than shared across threads, see DESIGN.md)
    ///    and reports the result immediately, then starts parking packets
    ///    into the buffer instead of the table.
    /// 4. Release the lock; the engine drains the buffer back into the
    ///    (now empty) flow table and resumes normal operation.
    /// 5. Return the parked buffer to `pool`.
    pub fn rotate(&self, pool: &RingBufferPool) -> Result<RotationOutput, super::CaptureError> {
        let fresh = pool
            .acquire()
            .ok_or_else(|| super::CaptureError::PoolExhausted(self.iface.clone()))?;
        self.lock
            .acquire()
            .map_err(|_| super::CaptureError::LockTimeout(self.iface.clone()))?;
        if self.buf_in.send_timeout(fresh, DEFAULT_LOCK_TIMEOUT).is_err() {
            return Err(super::CaptureError::LockTimeout(self.iface.clone()));
        }
        let output = self
            .result_rx
            .recv_timeout(DEFAULT_LOCK_TIMEOUT)
            .map_err(|_| super::CaptureError::LockTimeout(self.iface.clone()))?;
        self.lock
            .release()
            .map_err(|_| super::CaptureError::LockTimeout(self.iface.clone()))?;
        let drained = self
            .buf_out
            .recv_timeout(DEFAULT_LOCK_TIMEOUT)
            .map_err(|_| super::CaptureError::LockTimeout(self.iface.clone()))?;
        pool.release(drained);
        self.stats.rotations.fetch_add(1, Ordering::Relaxed);
        Ok(output)
    }

    pub fn stop(mut self, source_unblock: impl Fn()) {
        self.stop.store(true, Ordering::Release);
        source_unblock();
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }
}

/// Spawns the dedicated capture thread for `source` and returns a handle the
/// manager uses to drive rotations and read stats. The engine owns no ring
/// buffer until its first rotation — the pool slot is the rotator's, only
/// for the duration of the lock (spec.md §5 "resource discipline").
pub fn spawn<S>(iface: impl Into<String>, mut source: S) -> EngineHandle
where
    S: PacketSource + 'static,
{
    let iface = iface.into();
    let stats = Arc::new(EngineStats::default());
    let stop = Arc::new(AtomicBool::new(false));
    let (lock_handle, participant) = three_point_lock(DEFAULT_LOCK_TIMEOUT);
    let (buf_in_tx, buf_in_rx) = crossbeam_channel::bounded(0);
    let (buf_out_tx, buf_out_rx) = crossbeam_channel::bounded(0);
    let (result_tx, result_rx) = crossbeam_channel::bounded(0);

    let stats_thread = Arc::clone(&stats);
    let stop_thread = Arc::clone(&stop);
    let iface_thread = iface.clone();

    let join = std::thread::Builder::new()
        .name(format!("goprobe-capture-{iface}"))
        .spawn(move || {
            run_loop(
                &iface_thread,
                &mut source,
                &participant,
                &buf_in_rx,
                &buf_out_tx,
                &result_tx,
                &stats_thread,
                &stop_thread,
            );
        })
        .expect("failed to spawn capture thread");

    EngineHandle {
        iface,
        lock: lock_handle,
        buf_in: buf_in_tx,
        buf_out: buf_out_rx,
        result_rx,
        stats,
        stop,
        join: Some(join),
    }
}

fn run_loop<S: PacketSource>(
    iface: &str,
    source: &mut S,
    lock: &LockParticipant,
    buf_in: &crossbeam_channel::Receiver<RingBuffer>,
    buf_out: &crossbeam_channel::Sender<RingBuffer>,
    result_tx: &crossbeam_channel::Sender<RotationOutput>,
    stats: &EngineStats,
    stop: &AtomicBool,
) {
    let mut scratch = Vec::with_capacity(2048);
    let mut local_table = FlowTable::new();

    while !stop.load(Ordering::Acquire) {
        if lock.poll_lock_request() {
            lock.confirm_locked();
            // Point 2: poke the source so an in-flight blocking read
            // returns promptly instead of holding up the handshake.
            source.unblock();
            let mut parking = match buf_in.recv_timeout(DEFAULT_LOCK_TIMEOUT) {
                Ok(b) => b,
                Err(_) => return,
            };
            // Point 3: the table is quiesced for the manager; rotate it
            // here (see EngineHandle::rotate doc) and report the result.
            let (map, table_stats) = local_table.rotate();
            if result_tx
                .send_timeout(RotationOutput { map, stats: table_stats }, DEFAULT_LOCK_TIMEOUT)
                .is_err()
            {
                return;
            }
            if !buffer_while_locked(iface, source, &mut scratch, &mut parking, lock, stats) {
                return;
            }
            // Point 5: drain parked records into the (already pruned)
            // table, then hand the buffer back for release to the pool.
            while let Some(record) = parking.next() {
                local_table.upsert(record.hash, record.aux, record.pkt_type, record.size as u64);
            }
            if buf_out.send_timeout(parking, DEFAULT_LOCK_TIMEOUT).is_err() {
                return;
            }
            continue;
        }

        match source.next_packet(&mut scratch) {
            Ok(pkt) => {
                stats.packets_processed.fetch_add(1, Ordering::Relaxed);
                upsert_one(pkt.ip_layer, pkt.pkt_type, pkt.total_len, &mut local_table, stats);
            }
            Err(SourceError::Unblocked) => continue,
            Err(SourceError::Stopped) => {
                debug!(iface, "source stopped, exiting capture loop");
                break;
            }
            Err(SourceError::Other) => {
                stats.packets_dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// Buffering mode (spec.md §4.5 main loop, the inner `loop:` under
/// `lock_request_pending`): keep reading packets and parking them in
/// `parking` instead of the flow table, polling for the unlock request at
/// the top of every iteration so arrivals during the lock window are never
/// dropped. Returns `false` if the engine must exit entirely.
fn buffer_while_locked<S: PacketSource>(
    iface: &str,
    source: &mut S,
    scratch: &mut Vec<u8>,
    parking: &mut RingBuffer,
    lock: &LockParticipant,
    stats: &EngineStats,
) -> bool {
    loop {
        if lock.poll_unlock_request() {
            lock.confirm_unlocked();
            return true;
        }
        match source.next_packet(scratch) {
            Ok(pkt) => {
                stats.packets_processed.fetch_add(1, Ordering::Relaxed);
                park_one(pkt.ip_layer, pkt.pkt_type, pkt.total_len, parking, stats);
            }
            Err(SourceError::Unblocked) => continue,
            Err(SourceError::Stopped) => {
                debug!(iface, "source stopped during lock, exiting capture loop");
                return false;
            }
            Err(SourceError::Other) => {
                stats.packets_dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// Normal-mode path: every packet goes straight into the flow table. No
/// ring-buffer writes happen here — the buffer stays empty outside the lock
/// window (spec.md §4.4 "why it exists", §1 bounded memory at line rate).
fn upsert_one(
    ip_layer: &[u8],
    pkt_type: packet::PacketType,
    total_len: u32,
    table: &mut FlowTable,
    stats: &EngineStats,
) {
    match packet::parse(ip_layer, pkt_type, total_len) {
        Ok(parsed) => {
            table.upsert(parsed.hash, parsed.aux, pkt_type, total_len as u64);
        }
        Err(errno) => {
            stats.packets_parse_failed.fetch_add(1, Ordering::Relaxed);
            record_parse_failure(errno, total_len);
        }
    }
}

/// Lock-window path: parks a serialized record instead of touching the
/// table, which the rotator already owns for the duration of the lock.
fn park_one(
    ip_layer: &[u8],
    pkt_type: packet::PacketType,
    total_len: u32,
    buf: &mut RingBuffer,
    stats: &EngineStats,
) {
    match packet::parse(ip_layer, pkt_type, total_len) {
        Ok(parsed) => {
            let is_v4 = parsed.hash.is_v4();
            if !buf.add(is_v4, &parsed.hash, pkt_type, parsed.aux, 0, total_len) {
                warn!("ring buffer overflow, dropping parked record");
                stats.packets_dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
        Err(errno) => {
            stats.packets_parse_failed.fetch_add(1, Ordering::Relaxed);
            record_parse_failure(errno, total_len);
        }
    }
}

fn record_parse_failure(errno: ParseErrno, total_len: u32) {
    trace!(?errno, total_len, "dropping unparseable packet");
}

/// How long the manager waits between polling for a lock acquisition retry
/// when the first attempt returns `Timeout` — not part of the spec's
/// contract, purely a manager-side backoff knob.
pub const ROTATION_RETRY_BACKOFF: Duration = Duration::from_millis(250);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::ringbuffer::RingBufferPool;
    use crate::capture::source::SyntheticSource;

    fn sample_ip_packet() -> Vec<u8> {
        // minimal IPv4 + TCP SYN, enough for the parser to succeed.
        let mut buf = vec![0u8; 40];
        buf[0] = 0x45;
        buf[9] = 6; // TCP
        buf[12..16].copy_from_slice(&[10, 0, 0, 1]);
        buf[16..20].copy_from_slice(&[10, 0, 0, 2]);
        buf[20..22].copy_from_slice(&37485u16.to_be_bytes());
        buf[22..24].copy_from_slice(&17500u16.to_be_bytes());
        buf[33] = 0x02; // SYN
        buf
    }

    #[test]
    fn engine_processes_synthetic_packets_and_reports_stats() {
        let src = SyntheticSource::new("synthetic0");
        src.push(sample_ip_packet());
        src.push(sample_ip_packet());

        let handle = spawn("synthetic0", src);
        // give the thread a moment to drain the synthetic queue.
        std::thread::sleep(Duration::from_millis(100));
        let snap = handle.stats();
        assert!(snap.packets_processed >= 2);
        handle.stop(|| {});
    }

    #[test]
    fn rotate_drains_live_table_into_agg_map() {
        let src = SyntheticSource::new("synthetic0");
        let injector = src.handle();
        for _ in 0..5 {
            injector.push(sample_ip_packet());
        }
        let handle = spawn("synthetic0", src);
        std::thread::sleep(Duration::from_millis(100));

        let rotate_pool = RingBufferPool::new(1, 4096);
        let output = handle.rotate(&rotate_pool).expect("rotation");
        assert_eq!(output.map.len(), 1);
        assert_eq!(output.stats.packets_sent, 5);
        assert_eq!(handle.stats().rotations, 1);

        handle.stop(|| {});
    }

    #[test]
    fn packets_arriving_during_lock_are_parked_not_dropped() {
        let src = SyntheticSource::new("synthetic0");
        let injector = src.handle();
        for _ in 0..3 {
            injector.push(sample_ip_packet());
        }
        let handle = spawn("synthetic0", src);
        std::thread::sleep(Duration::from_millis(50));

        let rotate_pool = RingBufferPool::new(1, 4096);
        // Feed more packets right as the rotation is in flight; the engine
        // must keep capturing them (into the ring buffer) instead of
        // blocking or dropping them.
        for _ in 0..2 {
            injector.push(sample_ip_packet());
        }
        let first = handle.rotate(&rotate_pool).expect("first rotation");
        std::thread::sleep(Duration::from_millis(50));
        let second = handle.rotate(&rotate_pool).expect("second rotation");

        let total_sent = first.stats.packets_sent + second.stats.packets_sent;
        assert_eq!(total_sent, 5);
        assert_eq!(handle.stats().packets_dropped, 0);

        handle.stop(|| {});
    }
}
