//! C4 — the local ring buffer: a contiguous byte arena that parks packet
//! records while a rotation is in progress, plus the bounded pool that makes
//! buffers reusable across rotations (spec.md §4.4, §9 "Memory pool").

use crate::packet::{EPHash, PacketType};

const INITIAL_CAPACITY: usize = 4096; // one page
const DEFAULT_CAP_BYTES: usize = 64 * 1024 * 1024;

/// One parked packet observation, as it is serialized into the ring buffer.
#[derive(Debug, Clone)]
pub struct Record {
    pub is_v4: bool,
    pub hash: EPHash,
    pub pkt_type: PacketType,
    pub aux: u8,
    pub errno: u8,
    pub size: u32,
}

/// A single contiguous byte arena. Grows by doubling until `cap`.
pub struct RingBuffer {
    buf: Vec<u8>,
    cap: usize,
    write_pos: usize,
    read_pos: usize,
}

impl RingBuffer {
    pub fn new(cap: usize) -> Self {
        Self {
            buf: Vec::new(),
            cap,
            write_pos: 0,
            read_pos: 0,
        }
    }

    pub fn with_default_cap() -> Self {
        Self::new(DEFAULT_CAP_BYTES)
    }

    pub fn usage(&self) -> f64 {
        if self.cap == 0 {
            0.0
        } else {
            self.write_pos as f64 / self.cap as f64
        }
    }

    fn ensure_capacity(&mut self, additional: usize) -> bool {
        let required = self.write_pos + additional;
        if required > self.cap {
            return false;
        }
        if required > self.buf.len() {
            let mut new_len = if self.buf.is_empty() {
                INITIAL_CAPACITY.min(self.cap).max(1)
            } else {
                self.buf.len()
            };
            while new_len < required {
                new_len = (new_len * 2).min(self.cap);
            }
            new_len = new_len.max(required).min(self.cap);
            self.buf.resize(new_len, 0);
        }
        true
    }

    /// Serializes one record. Returns `false` (and leaves the buffer
    /// unchanged) if appending would exceed the cap — this is the overflow
    /// signal the capture engine treats as fatal-for-this-rotation-window
    /// (spec.md §4.5, §7).
    pub fn add(
        &mut self,
        is_v4: bool,
        hash: &EPHash,
        pkt_type: PacketType,
        aux: u8,
        errno: u8,
        size: u32,
    ) -> bool {
        let hash_bytes = hash.as_bytes();
        let record_len = 1 + hash_bytes.len() + 1 + 1 + 1 + 4;
        if !self.ensure_capacity(record_len) {
            return false;
        }
        let start = self.write_pos;
        self.buf[start] = is_v4 as u8;
        let mut pos = start + 1;
        self.buf[pos..pos + hash_bytes.len()].copy_from_slice(hash_bytes);
        pos += hash_bytes.len();
        self.buf[pos] = match pkt_type {
            PacketType::Outgoing => 1,
            PacketType::Other => 0,
        };
        pos += 1;
        self.buf[pos] = aux;
        pos += 1;
        self.buf[pos] = errno;
        pos += 1;
        self.buf[pos..pos + 4].copy_from_slice(&size.to_le_bytes());
        self.write_pos = start + record_len;
        true
    }

    /// Returns the next parked record, if any, advancing the read cursor.
    pub fn next(&mut self) -> Option<Record> {
        if self.read_pos >= self.write_pos {
            return None;
        }
        let mut pos = self.read_pos;
        let is_v4 = self.buf[pos] != 0;
        pos += 1;
        let hash_len = if is_v4 {
            crate::packet::V4_HASH_LEN
        } else {
            crate::packet::V6_HASH_LEN
        };
        let hash_bytes = &self.buf[pos..pos + hash_len];
        let hash = if is_v4 {
            EPHash::build_v4(
                std::net::Ipv4Addr::new(hash_bytes[0], hash_bytes[1], hash_bytes[2], hash_bytes[3]),
                std::net::Ipv4Addr::new(hash_bytes[4], hash_bytes[5], hash_bytes[6], hash_bytes[7]),
                u16::from_be_bytes([hash_bytes[8], hash_bytes[9]]),
                u16::from_be_bytes([hash_bytes[10], hash_bytes[11]]),
                hash_bytes[12],
            )
        } else {
            let sip: [u8; 16] = hash_bytes[0..16].try_into().unwrap();
            let dip: [u8; 16] = hash_bytes[16..32].try_into().unwrap();
            EPHash::build_v6(
                std::net::Ipv6Addr::from(sip),
                std::net::Ipv6Addr::from(dip),
                u16::from_be_bytes([hash_bytes[32], hash_bytes[33]]),
                u16::from_be_bytes([hash_bytes[34], hash_bytes[35]]),
                hash_bytes[36],
            )
        };
        pos += hash_len;
        let pkt_type = if self.buf[pos] == 1 {
            PacketType::Outgoing
        } else {
            PacketType::Other
        };
        pos += 1;
        let aux = self.buf[pos];
        pos += 1;
        let errno = self.buf[pos];
        pos += 1;
        let size = u32::from_le_bytes(self.buf[pos..pos + 4].try_into().unwrap());
        pos += 4;
        self.read_pos = pos;
        Some(Record {
            is_v4,
            hash,
            pkt_type,
            aux,
            errno,
            size,
        })
    }

    /// Rewinds both cursors so the buffer can be handed back to the pool.
    pub fn reset(&mut self) {
        self.write_pos = 0;
        self.read_pos = 0;
    }
}

/// A bounded pool of reusable [`RingBuffer`]s, one per concurrent rotation
/// (spec.md §5: "pool must be sized to >= 1 per concurrent rotation").
/// Exhaustion is a fatal configuration error, never a soft failure.
pub struct RingBufferPool {
    free: crossbeam_channel::Sender<RingBuffer>,
    take: crossbeam_channel::Receiver<RingBuffer>,
}

impl RingBufferPool {
    pub fn new(num_buffers: usize, size_limit: usize) -> Self {
        let (tx, rx) = crossbeam_channel::bounded(num_buffers.max(1));
        for _ in 0..num_buffers.max(1) {
            let _ = tx.send(RingBuffer::new(size_limit));
        }
        Self { free: tx, take: rx }
    }

    /// Acquires one buffer, or `None` if the pool is exhausted — the caller
    /// (the capture manager) must treat `None` as fatal.
    pub fn acquire(&self) -> Option<RingBuffer> {
        self.take.try_recv().ok()
    }

    pub fn release(&self, mut buf: RingBuffer) {
        buf.reset();
        let _ = self.free.send(buf);
    }
}
