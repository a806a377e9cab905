//! C3 — the flow table: two hash maps (v4/v6) keyed on the canonical
//! endpoint hash. See spec.md §4.3.

use rustc_hash::FxHashMap;

use super::aggmap::AggFlowMap;
use super::counters::Counters;
use crate::packet::direction::{self, Direction};
use crate::packet::{EPHash, PacketType};

#[derive(Debug, Default)]
pub struct FlowTable {
    v4: FxHashMap<EPHash, Counters>,
    v6: FxHashMap<EPHash, Counters>,
}

impl FlowTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.v4.len() + self.v6.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn map_for(&mut self, hash: &EPHash) -> &mut FxHashMap<EPHash, Counters> {
        if hash.is_v4() {
            &mut self.v4
        } else {
            &mut self.v6
        }
    }

    /// Inserts or updates the row for one packet observation. Returns the
    /// canonical key actually updated (forward or reverse of `hash`).
    pub fn upsert(&mut self, hash: EPHash, aux: u8, pkt_type: PacketType, size: u64) -> EPHash {
        let reverse = hash.reverse();
        let sport_eph = direction::is_ephemeral(hash.sport());
        let dport_eph = direction::is_ephemeral(hash.dport());
        // Prediction hint (spec.md §4.3): if sport looks ephemeral and dport
        // doesn't, the reverse row is more likely to already exist.
        let check_reverse_first = sport_eph && !dport_eph;
        let (first, second) = if check_reverse_first {
            (reverse.clone(), hash.clone())
        } else {
            (hash.clone(), reverse.clone())
        };

        let map = self.map_for(&hash);
        if let Some(counters) = map.get_mut(&first) {
            counters.observe(pkt_type, size);
            return first;
        }
        if let Some(counters) = map.get_mut(&second) {
            counters.observe(pkt_type, size);
            return second;
        }

        let canonical = if reverts_for_insertion(direction::classify(&hash, aux)) {
            reverse
        } else {
            hash
        };
        let mut counters = Counters::default();
        counters.observe(pkt_type, size);
        self.map_for(&canonical).insert(canonical.clone(), counters);
        canonical
    }

    /// Moves every row with at least one non-zero packet counter into a
    /// fresh [`AggFlowMap`], pruning the rest, and resets the retained rows'
    /// counters to zero (spec.md §4.3, "worth keeping" pruning).
    pub fn rotate(&mut self) -> (AggFlowMap, Counters) {
        let mut agg = AggFlowMap::new();
        let mut total = Counters::default();

        for (map, dst) in [(&mut self.v4, &mut agg.v4), (&mut self.v6, &mut agg.v6)] {
            let mut retained = FxHashMap::default();
            for (key, counters) in map.drain() {
                total += counters;
                if !counters.is_zero() {
                    dst.insert(key.clone(), counters);
                    retained.insert(key, Counters::default());
                }
            }
            *map = retained;
        }
        (agg, total)
    }

    /// Non-destructive snapshot, used by inspection endpoints (spec.md §4.3).
    pub fn aggregate(&self) -> AggFlowMap {
        AggFlowMap {
            v4: self.v4.clone(),
            v6: self.v6.clone(),
        }
    }
}

fn reverts_for_insertion(d: Direction) -> bool {
    d.reverts_for_insertion()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::hash::PROTO_TCP;
    use std::net::Ipv4Addr;

    fn syn(sport: u16, dport: u16) -> EPHash {
        EPHash::build_v4(
            Ipv4Addr::new(10, 0, 0, 1),
            Ipv4Addr::new(10, 0, 0, 2),
            dport,
            sport,
            PROTO_TCP,
        )
    }

    fn synack(sport: u16, dport: u16) -> EPHash {
        EPHash::build_v4(
            Ipv4Addr::new(10, 0, 0, 2),
            Ipv4Addr::new(10, 0, 0, 1),
            dport,
            sport,
            PROTO_TCP,
        )
    }

    #[test]
    fn handshake_collapses_into_one_row() {
        let mut table = FlowTable::new();
        // client(10.0.0.1:37485) -> server(10.0.0.2:17500) SYN
        table.upsert(syn(37485, 17500), 0x02, PacketType::Outgoing, 64);
        // server(10.0.0.2:17500) -> client(10.0.0.1:37485) SYN|ACK
        table.upsert(synack(17500, 37485), 0x12, PacketType::Other, 64);
        assert_eq!(table.len(), 1);
        let (agg, total) = table.rotate();
        assert_eq!(agg.len(), 1);
        assert_eq!(total.packets_sent, 1);
        assert_eq!(total.packets_rcvd, 1);
    }

    #[test]
    fn rotation_prunes_all_zero_rows() {
        let mut table = FlowTable::new();
        table.upsert(syn(1, 2), 0, PacketType::Outgoing, 10);
        let (_agg, _) = table.rotate();
        // the row was "worth keeping" (nonzero), so it survives with reset counters.
        assert_eq!(table.len(), 1);
        let (_agg2, total2) = table.rotate();
        assert!(total2.is_zero());
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn rotation_conserves_counters() {
        let mut table = FlowTable::new();
        for i in 0..10u16 {
            table.upsert(syn(40000 + i, 80), 0, PacketType::Outgoing, 100);
        }
        let before: u64 = 10 * 100;
        let (agg, total) = table.rotate();
        assert_eq!(total.bytes_sent, before);
        assert_eq!(agg.total_counters().bytes_sent, before);
    }
}
