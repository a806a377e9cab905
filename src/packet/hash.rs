//! Endpoint hash (EPHash): the fixed-width key used by the flow table.
//!
//! v4 layout: `sip[4] dip[4] dport[2] sport[2] proto[1]` (13 bytes)
//! v6 layout: `sip[16] dip[16] dport[2] sport[2] proto[1]` (37 bytes)

use smallvec::SmallVec;
use std::net::{Ipv4Addr, Ipv6Addr};

pub const V4_HASH_LEN: usize = 13;
pub const V6_HASH_LEN: usize = 37;

pub const PROTO_TCP: u8 = 6;
pub const PROTO_UDP: u8 = 17;
pub const PROTO_ICMP: u8 = 1;
pub const PROTO_ICMPV6: u8 = 58;

/// `{proto, port}` pairs whose presence on either side of a flow causes the
/// *other* side's port to be zeroed before hashing (source-port suppression,
/// spec.md §3).
const COMMON_SERVICE_PORTS: &[(u8, u16)] = &[
    (PROTO_TCP, 80),
    (PROTO_TCP, 443),
    (PROTO_TCP, 8080),
    (PROTO_UDP, 53),
    (PROTO_TCP, 53),
    (PROTO_UDP, 443),
];

fn is_common_service_port(proto: u8, port: u16) -> bool {
    COMMON_SERVICE_PORTS
        .iter()
        .any(|&(p, common_port)| p == proto && common_port == port)
}

/// Zeroes whichever of `sport`/`dport` is *not* the common service port, per
/// the symmetric suppression rule. If both happen to match the table (rare:
/// e.g. 443->53), `dport` wins and `sport` is zeroed.
pub fn suppress_source_port(proto: u8, sport: &mut u16, dport: &mut u16) {
    let dport_common = is_common_service_port(proto, *dport);
    let sport_common = is_common_service_port(proto, *sport);
    if dport_common {
        *sport = 0;
    } else if sport_common {
        *dport = 0;
    }
}

#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct EPHash(SmallVec<[u8; V6_HASH_LEN]>);

impl EPHash {
    pub fn is_v4(&self) -> bool {
        self.0.len() == V4_HASH_LEN
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn build_v4(sip: Ipv4Addr, dip: Ipv4Addr, dport: u16, sport: u16, proto: u8) -> Self {
        let mut buf = SmallVec::<[u8; V6_HASH_LEN]>::with_capacity(V4_HASH_LEN);
        buf.extend_from_slice(&sip.octets());
        buf.extend_from_slice(&dip.octets());
        buf.extend_from_slice(&dport.to_be_bytes());
        buf.extend_from_slice(&sport.to_be_bytes());
        buf.push(proto);
        EPHash(buf)
    }

    pub fn build_v6(sip: Ipv6Addr, dip: Ipv6Addr, dport: u16, sport: u16, proto: u8) -> Self {
        let mut buf = SmallVec::<[u8; V6_HASH_LEN]>::with_capacity(V6_HASH_LEN);
        buf.extend_from_slice(&sip.octets());
        buf.extend_from_slice(&dip.octets());
        buf.extend_from_slice(&dport.to_be_bytes());
        buf.extend_from_slice(&sport.to_be_bytes());
        buf.push(proto);
        EPHash(buf)
    }

    /// Swaps the src/dst IP and port halves, leaving the protocol untouched.
    pub fn reverse(&self) -> EPHash {
        let bytes = &self.0;
        let (ip_len, port_len) = if self.is_v4() { (4, 2) } else { (16, 2) };
        let proto = bytes[bytes.len() - 1];
        let sip = &bytes[0..ip_len];
        let dip = &bytes[ip_len..ip_len * 2];
        let dport = &bytes[ip_len * 2..ip_len * 2 + port_len];
        let sport = &bytes[ip_len * 2 + port_len..ip_len * 2 + port_len * 2];

        let mut out = SmallVec::<[u8; V6_HASH_LEN]>::with_capacity(bytes.len());
        out.extend_from_slice(dip);
        out.extend_from_slice(sip);
        out.extend_from_slice(sport);
        out.extend_from_slice(dport);
        out.push(proto);
        EPHash(out)
    }

    pub fn proto(&self) -> u8 {
        self.0[self.0.len() - 1]
    }

    /// Destination port as encoded in this hash (zero if suppressed).
    pub fn dport(&self) -> u16 {
        let ip_len = if self.is_v4() { 4 } else { 16 };
        let offset = ip_len * 2;
        u16::from_be_bytes([self.0[offset], self.0[offset + 1]])
    }

    pub fn sport(&self) -> u16 {
        let ip_len = if self.is_v4() { 4 } else { 16 };
        let offset = ip_len * 2 + 2;
        u16::from_be_bytes([self.0[offset], self.0[offset + 1]])
    }

    pub fn src_ip(&self) -> std::net::IpAddr {
        self.ip_at(0)
    }

    pub fn dst_ip(&self) -> std::net::IpAddr {
        let ip_len = if self.is_v4() { 4 } else { 16 };
        self.ip_at(ip_len)
    }

    fn ip_at(&self, offset: usize) -> std::net::IpAddr {
        if self.is_v4() {
            let bytes: [u8; 4] = self.0[offset..offset + 4].try_into().unwrap();
            std::net::IpAddr::V4(Ipv4Addr::from(bytes))
        } else {
            let bytes: [u8; 16] = self.0[offset..offset + 16].try_into().unwrap();
            std::net::IpAddr::V6(Ipv6Addr::from(bytes))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reverse_is_involutive() {
        let h = EPHash::build_v4(
            Ipv4Addr::new(10, 0, 0, 1),
            Ipv4Addr::new(10, 0, 0, 2),
            17500,
            37485,
            PROTO_TCP,
        );
        assert_eq!(h.reverse().reverse(), h);
        assert_ne!(h.reverse(), h);
    }

    #[test]
    fn suppression_is_symmetric() {
        let mut sport = 53421u16;
        let mut dport = 53u16;
        suppress_source_port(PROTO_UDP, &mut sport, &mut dport);
        assert_eq!(sport, 0);
        assert_eq!(dport, 53);

        let mut sport = 443u16;
        let mut dport = 53421u16;
        suppress_source_port(PROTO_TCP, &mut sport, &mut dport);
        assert_eq!(sport, 443);
        assert_eq!(dport, 0);
    }

    #[test]
    fn v6_hash_len_is_37() {
        let h = EPHash::build_v6(
            Ipv6Addr::LOCALHOST,
            Ipv6Addr::UNSPECIFIED,
            443,
            0,
            PROTO_TCP,
        );
        assert_eq!(h.as_bytes().len(), V6_HASH_LEN);
        assert!(!h.is_v4());
    }
}
