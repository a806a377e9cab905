//! Four-counter flow value. "Rcvd"/"Sent" is a link-direction label (what the
//! interface observed), independent of the client/server direction C2
//! classifies. See spec.md §3.

use std::ops::AddAssign;

use crate::packet::PacketType;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counters {
    pub bytes_rcvd: u64,
    pub bytes_sent: u64,
    pub packets_rcvd: u64,
    pub packets_sent: u64,
}

impl Counters {
    pub fn is_zero(&self) -> bool {
        self.bytes_rcvd == 0
            && self.bytes_sent == 0
            && self.packets_rcvd == 0
            && self.packets_sent == 0
    }

    /// Applies one packet observation of `size` bytes, attributed per the
    /// link-level `pkt_type` (spec.md §3: outgoing -> `*Sent`, else `*Rcvd`).
    pub fn observe(&mut self, pkt_type: PacketType, size: u64) {
        match pkt_type {
            PacketType::Outgoing => {
                self.bytes_sent = self.bytes_sent.saturating_add(size);
                self.packets_sent = self.packets_sent.saturating_add(1);
            }
            PacketType::Other => {
                self.bytes_rcvd = self.bytes_rcvd.saturating_add(size);
                self.packets_rcvd = self.packets_rcvd.saturating_add(1);
            }
        }
    }
}

impl AddAssign for Counters {
    fn add_assign(&mut self, rhs: Self) {
        self.bytes_rcvd = self.bytes_rcvd.saturating_add(rhs.bytes_rcvd);
        self.bytes_sent = self.bytes_sent.saturating_add(rhs.bytes_sent);
        self.packets_rcvd = self.packets_rcvd.saturating_add(rhs.packets_rcvd);
        self.packets_sent = self.packets_sent.saturating_add(rhs.packets_sent);
    }
}
