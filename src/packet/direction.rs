//! C2 — direction classifier. Maps `(EPHash, aux_byte)` to a confidence-rated
//! guess at which side of the flow initiated it. See spec.md §4.2.

use bitflags::bitflags;
use std::net::IpAddr;

use super::hash::{EPHash, PROTO_ICMP, PROTO_ICMPV6, PROTO_TCP, PROTO_UDP};

bitflags! {
    /// Bit layout of the TCP flags byte at header offset 13.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct TcpFlags: u8 {
        const FIN = 0b0000_0001;
        const SYN = 0b0000_0010;
        const RST = 0b0000_0100;
        const PSH = 0b0000_1000;
        const ACK = 0b0001_0000;
        const URG = 0b0010_0000;
        const ECE = 0b0100_0000;
        const CWR = 0b1000_0000;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Unknown,
    Remains,
    Reverts,
    MaybeRemains,
    MaybeReverts,
}

impl Direction {
    pub fn is_high_confidence(self) -> bool {
        matches!(self, Direction::Remains | Direction::Reverts)
    }

    /// spec.md §9 open question: "maybe" variants are treated as equivalent
    /// to their high-confidence counterpart for insertion purposes.
    pub fn reverts_for_insertion(self) -> bool {
        matches!(self, Direction::Reverts | Direction::MaybeReverts)
    }
}

const ICMPV4_REPLY_TYPES: &[u8] = &[0x00, 0x03, 0x0B, 0x0C, 0x0E];
const ICMPV4_REQUEST_TYPES: &[u8] = &[0x08, 0x0D];
const ICMPV6_REPLY_TYPES: &[u8] = &[0x81, 0x01, 0x03, 0x04];
const ICMPV6_REQUEST_TYPE: u8 = 0x80;

pub fn classify(hash: &EPHash, aux: u8) -> Direction {
    match hash.proto() {
        PROTO_TCP => classify_tcp(hash, aux),
        PROTO_UDP => classify_udp(hash),
        PROTO_ICMP => classify_icmpv4(aux),
        PROTO_ICMPV6 => classify_icmpv6(hash, aux),
        _ => Direction::Unknown,
    }
}

fn classify_tcp(hash: &EPHash, aux: u8) -> Direction {
    let flags = TcpFlags::from_bits_truncate(aux);
    if flags.contains(TcpFlags::SYN) && flags.contains(TcpFlags::ACK) {
        Direction::Reverts
    } else if flags.contains(TcpFlags::SYN) {
        Direction::Remains
    } else {
        port_heuristic(hash)
    }
}

fn classify_udp(hash: &EPHash) -> Direction {
    if is_broadcast_or_multicast(hash.dst_ip()) {
        Direction::Remains
    } else {
        port_heuristic(hash)
    }
}

fn classify_icmpv4(aux: u8) -> Direction {
    if ICMPV4_REPLY_TYPES.contains(&aux) {
        Direction::Reverts
    } else if ICMPV4_REQUEST_TYPES.contains(&aux) {
        Direction::Remains
    } else {
        Direction::Unknown
    }
}

fn classify_icmpv6(hash: &EPHash, aux: u8) -> Direction {
    if is_broadcast_or_multicast(hash.dst_ip()) {
        return Direction::Remains;
    }
    if ICMPV6_REPLY_TYPES.contains(&aux) {
        Direction::Reverts
    } else if aux == ICMPV6_REQUEST_TYPE {
        Direction::Remains
    } else {
        Direction::Unknown
    }
}

fn is_broadcast_or_multicast(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_broadcast() || {
                // coarse /23 multicast check: 224.0.0.0 - 224.0.1.255
                let octets = v4.octets();
                octets[0] == 224 && octets[1] == 0 && octets[2] <= 1
            }
        }
        IpAddr::V6(v6) => v6.octets()[0] == 0xFF,
    }
}

pub(crate) fn is_ephemeral(port: u16) -> bool {
    port == 0 || (port >> 8) >= 128
}

fn port_heuristic(hash: &EPHash) -> Direction {
    let sport = hash.sport();
    let dport = hash.dport();
    let sport_eph = is_ephemeral(sport);
    let dport_eph = is_ephemeral(dport);

    match (sport_eph, dport_eph) {
        (true, false) => Direction::Remains,
        (false, true) => Direction::Reverts,
        _ => {
            // both ephemeral or both not: smaller port is the "server" side.
            if dport < sport {
                Direction::Reverts
            } else {
                // sport < dport, or equality: assume first packet is the
                // initiator (spec.md §4.2 tie-break).
                Direction::Remains
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::hash::PROTO_TCP;
    use std::net::Ipv4Addr;

    fn hash(sport: u16, dport: u16) -> EPHash {
        EPHash::build_v4(
            Ipv4Addr::new(10, 0, 0, 1),
            Ipv4Addr::new(10, 0, 0, 2),
            dport,
            sport,
            PROTO_TCP,
        )
    }

    #[test]
    fn tcp_syn_remains_synack_reverts() {
        let h = hash(37485, 17500);
        assert_eq!(classify(&h, TcpFlags::SYN.bits()), Direction::Remains);
        assert_eq!(
            classify(&h, (TcpFlags::SYN | TcpFlags::ACK).bits()),
            Direction::Reverts
        );
    }

    #[test]
    fn port_heuristic_ephemeral_vs_fixed() {
        // sport ephemeral, dport fixed -> Remains
        assert_eq!(classify(&hash(50000, 80), 0), Direction::Remains);
        // sport fixed, dport ephemeral -> Reverts
        assert_eq!(classify(&hash(80, 50000), 0), Direction::Reverts);
    }

    #[test]
    fn port_heuristic_tie_break_prefers_remains() {
        assert_eq!(classify(&hash(100, 100), 0), Direction::Remains);
    }

    #[test]
    fn icmp_request_reply() {
        let h = EPHash::build_v4(
            Ipv4Addr::new(10, 0, 0, 1),
            Ipv4Addr::new(10, 0, 0, 2),
            0,
            0,
            crate::packet::hash::PROTO_ICMP,
        );
        assert_eq!(classify(&h, 0x08), Direction::Remains);
        assert_eq!(classify(&h, 0x00), Direction::Reverts);
        assert_eq!(classify(&h, 0x05), Direction::Unknown);
    }
}
