use std::{
    collections::{BTreeMap, VecDeque},
    net,
};

use crate::{
    lsa::{
        self,
        cache::{CacheRef, LsaCache},
        LsaKey,
    },
    packet::DbDescPacket,
    util::Timer,
};

pub mod event;
pub mod handle;
pub mod status;

/// fields of the last database description packet accepted from the neighbor,
/// used for duplicate detection
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LastDd {
    pub options: u8,
    pub bits: u8,
    pub seq_num: u32,
}

/// # Neighbor
/// one neighbor of an interface, identified across the router by its peer id.
/// - db_sum_list : headers still to be described to the neighbor
/// - ls_req_list : records to pull from the neighbor
/// - ls_retrans_list : records flooded to the neighbor and not yet acknowledged
pub struct Neighbor {
    pub peerid: u32,
    pub iface: String,
    pub state: status::Status,
    pub id: net::Ipv4Addr,
    pub addr: net::Ipv4Addr,
    pub priority: u8,
    pub options: u8,
    pub dr: net::Ipv4Addr,
    pub bdr: net::Ipv4Addr,
    /// true while the neighbor is master of the exchange
    pub master: bool,
    pub dd_seq_num: u32,
    /// the neighbor has more headers to describe
    pub dd_more: bool,
    pub last_rx_dd: Option<LastDd>,
    /// last database description sent, kept for retransmission
    pub last_tx_dd: Option<DbDescPacket>,
    /// snapshot or header checks outstanding at the route decision engine
    pub dd_pending: u32,
    pub crypt_seq_num: Option<u32>,
    /// configured NBMA neighbor, kept in Down instead of being removed
    pub is_static: bool,
    pub db_sum_list: VecDeque<lsa::Header>,
    pub ls_req_list: BTreeMap<LsaKey, lsa::Header>,
    pub ls_retrans_list: BTreeMap<LsaKey, CacheRef>,
    pub inactivity_timer: Timer,
    pub db_tx_timer: Timer,
    pub ls_req_timer: Timer,
    pub ls_retrans_timer: Timer,
    pub adj_timer: Timer,
}

impl Neighbor {
    pub fn new(peerid: u32, iface: &str, id: net::Ipv4Addr, addr: net::Ipv4Addr) -> Self {
        Self {
            peerid,
            iface: iface.to_string(),
            state: status::Status::Down,
            id,
            addr,
            priority: 0,
            options: 0,
            dr: net::Ipv4Addr::UNSPECIFIED,
            bdr: net::Ipv4Addr::UNSPECIFIED,
            master: false,
            dd_seq_num: 0,
            dd_more: false,
            last_rx_dd: None,
            last_tx_dd: None,
            dd_pending: 0,
            crypt_seq_num: None,
            is_static: false,
            db_sum_list: VecDeque::new(),
            ls_req_list: BTreeMap::new(),
            ls_retrans_list: BTreeMap::new(),
            inactivity_timer: Timer::new(),
            db_tx_timer: Timer::new(),
            ls_req_timer: Timer::new(),
            ls_retrans_timer: Timer::new(),
            adj_timer: Timer::new(),
        }
    }

    /// add a flooded record, replacing any other instance of it
    pub fn retrans_add(&mut self, cache: &mut LsaCache, key: LsaKey, handle: CacheRef) {
        cache.acquire(handle);
        if let Some(old) = self.ls_retrans_list.insert(key, handle) {
            cache.release(old);
        }
    }

    pub fn retrans_remove(&mut self, cache: &mut LsaCache, key: &LsaKey) -> bool {
        match self.ls_retrans_list.remove(key) {
            Some(handle) => {
                cache.release(handle);
                true
            }
            None => false,
        }
    }

    /// the retransmission entry for `header`'s record when it is that very instance
    pub fn retrans_matches(&self, cache: &LsaCache, header: &lsa::Header) -> bool {
        self.ls_retrans_list
            .get(&header.key())
            .and_then(|handle| cache.header(*handle))
            .is_some_and(|h| h.seq_num == header.seq_num && h.checksum == header.checksum)
    }

    /// empty all three lists, releasing cache references
    pub fn clear_lists(&mut self, cache: &mut LsaCache) {
        self.db_sum_list.clear();
        self.ls_req_list.clear();
        for (_, handle) in std::mem::take(&mut self.ls_retrans_list) {
            cache.release(handle);
        }
        self.ls_retrans_timer.cancel();
        self.ls_req_timer.cancel();
    }

    pub fn cancel_timers(&mut self) {
        self.inactivity_timer.cancel();
        self.db_tx_timer.cancel();
        self.ls_req_timer.cancel();
        self.ls_retrans_timer.cancel();
        self.adj_timer.cancel();
    }

    pub fn is_dr(&self) -> bool {
        !self.addr.is_unspecified() && self.dr == self.addr
    }

    pub fn is_bdr(&self) -> bool {
        !self.addr.is_unspecified() && self.bdr == self.addr
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lsa::{Body, Lsa, NetworkLsa};

    fn record(seq: i32) -> Vec<u8> {
        Lsa::new(
            lsa::NETWORK_LSA_TYPE,
            net::Ipv4Addr::new(10, 0, 0, 1),
            net::Ipv4Addr::new(1, 1, 1, 1),
            seq,
            0,
            Body::Network(NetworkLsa {
                mask: net::Ipv4Addr::new(255, 255, 255, 0),
                attached: vec![],
            }),
        )
        .to_be_bytes()
    }

    #[test]
    fn retrans_list_holds_cache_references() {
        let mut cache = LsaCache::new();
        let mut a = Neighbor::new(1, "eth0", net::Ipv4Addr::new(2, 2, 2, 2), net::Ipv4Addr::new(10, 0, 0, 2));
        let mut b = Neighbor::new(2, "eth0", net::Ipv4Addr::new(3, 3, 3, 3), net::Ipv4Addr::new(10, 0, 0, 3));

        let first = record(lsa::InitialSequenceNumber);
        let key = lsa::Header::try_from_be_bytes(&first).unwrap().key();
        let handle = cache.add(&first).unwrap();
        a.retrans_add(&mut cache, key, handle);
        b.retrans_add(&mut cache, key, handle);
        cache.release(handle);
        assert_eq!(cache.refcount(handle), 2);

        // a newer instance replaces the old one on a, the old stays alive for b
        let second = record(lsa::InitialSequenceNumber + 1);
        let newer = cache.add(&second).unwrap();
        a.retrans_add(&mut cache, key, newer);
        cache.release(newer);
        assert_eq!(cache.refcount(handle), 1);
        assert_eq!(cache.len(), 2);

        let header = lsa::Header::try_from_be_bytes(&second).unwrap();
        assert!(a.retrans_matches(&cache, &header));
        assert!(!b.retrans_matches(&cache, &header));

        b.clear_lists(&mut cache);
        assert!(a.retrans_remove(&mut cache, &key));
        assert!(cache.is_empty());
    }
}
