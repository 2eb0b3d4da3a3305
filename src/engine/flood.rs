//! flooding of installed records and the acknowledgment rules that go with it

use std::{cmp::Ordering, net};

use tracing::{debug, trace};

use super::Engine;
use crate::{
    interface,
    lsa::{self, cache::CacheRef},
    neighbor::{event::Event, handle::pack_updates, status::Status},
    packet::{self, LsUpdatePacket},
};

impl Engine {
    /// interfaces in the flooding scope of an area, or all non stub ones for AS wide records
    fn flood_scope(&self, area: Option<net::Ipv4Addr>) -> Vec<String> {
        self.interfaces
            .values()
            .filter(|i| match area {
                Some(area) => i.area_id == area,
                None => !i.area_stub,
            })
            .filter(|i| i.state != interface::status::Status::Down)
            .map(|i| i.name.clone())
            .collect()
    }

    /// # flood
    /// flood a record the route decision engine just installed.
    /// - origin : the neighbor it came from, 0 when self-originated
    pub(crate) fn flood(&mut self, area: Option<net::Ipv4Addr>, origin: u32, lsa: &[u8]) {
        let Some(header) = lsa::Header::try_from_be_bytes(lsa) else {
            return;
        };
        let Some(handle) = self.ctx.cache.add(lsa) else {
            return;
        };
        let origin_iface = self.neighbors.get(&origin).map(|n| n.iface.clone());
        let mut flooded_back = false;

        for ifname in self.flood_scope(area) {
            if !self.flood_interface(&ifname, origin, &header, handle) {
                continue;
            }
            if origin_iface.as_deref() == Some(ifname.as_str()) {
                let (Some(iface), Some(nbr)) =
                    (self.interfaces.get(&ifname), self.neighbors.get(&origin))
                else {
                    continue;
                };
                // the designated routers already flood it on this segment
                if nbr.addr == iface.dr || nbr.addr == iface.bdr {
                    continue;
                }
                if iface.state == interface::status::Status::Backup {
                    continue;
                }
                flooded_back = true;
            }
            self.send_flood(&ifname, lsa);
        }
        self.ctx.cache.release(handle);

        // received records get acknowledged unless flooding back did it implicitly
        if origin == 0 || flooded_back {
            return;
        }
        let Some(ifname) = origin_iface else {
            return;
        };
        let Some(iface) = self.interfaces.get(&ifname) else {
            return;
        };
        let from_dr = self
            .neighbors
            .get(&origin)
            .is_some_and(|n| n.addr == iface.dr);
        if iface.state != interface::status::Status::Backup || from_dr {
            self.delayed_ack(&ifname, header);
        }
    }

    /// queue the record on every neighbor of the interface that still needs it.
    /// returns whether anything was queued.
    fn flood_interface(
        &mut self,
        ifname: &str,
        origin: u32,
        header: &lsa::Header,
        handle: CacheRef,
    ) -> bool {
        let key = header.key();
        let mut queued = false;
        let mut loaded = Vec::new();
        let mut armed = Vec::new();
        for peerid in self.peers_on(ifname) {
            let Some(nbr) = self.neighbors.get_mut(&peerid) else {
                continue;
            };
            if nbr.state < Status::Exchange {
                continue;
            }
            if nbr.state != Status::Full {
                if let Some(requested) = nbr.ls_req_list.get(&key) {
                    match lsa::compare(header, requested) {
                        Ordering::Less => continue,
                        Ordering::Equal => {
                            nbr.ls_req_list.remove(&key);
                            loaded.push(peerid);
                            continue;
                        }
                        Ordering::Greater => {
                            nbr.ls_req_list.remove(&key);
                            loaded.push(peerid);
                        }
                    }
                }
            }
            if peerid == origin {
                continue;
            }
            nbr.retrans_add(&mut self.ctx.cache, key, handle);
            armed.push(peerid);
            queued = true;
        }
        for peerid in armed {
            self.arm_retrans(peerid);
        }
        for peerid in loaded {
            self.check_loading_done(peerid);
        }
        queued
    }

    fn send_flood(&mut self, ifname: &str, lsa: &[u8]) {
        let unicast: Vec<net::Ipv4Addr> = self
            .neighbors_on(ifname)
            .filter(|n| n.state.is_flooding())
            .map(|n| n.addr)
            .collect();
        let Some(iface) = self.interfaces.get_mut(ifname) else {
            return;
        };
        let data = LsUpdatePacket::age_for_transmit(lsa, iface.transmit_delay);
        let max = packet::max_body(iface.mtu, &iface.auth);
        let updates = pack_updates(vec![data], max);
        let destinations = match iface.flood_destination() {
            Some(dst) => vec![dst],
            None => unicast,
        };
        trace!(iface = ifname, count = destinations.len(), "flooding");
        for dst in destinations {
            for update in &updates {
                self.ctx.send(iface, dst, update);
            }
        }
    }

    /// # duplicate_received
    /// the neighbor sent the instance we hold: an implied acknowledgment when it is
    /// on the retransmission list, otherwise acknowledge it directly
    pub(crate) fn duplicate_received(&mut self, peerid: u32, header: lsa::Header) {
        let Some(nbr) = self.neighbors.get_mut(&peerid) else {
            return;
        };
        if nbr.ls_req_list.contains_key(&header.key()) {
            debug!(neighbor = %nbr.id, key = %header.key(), "requested record older than announced");
            self.nbr_fsm(peerid, Event::BadLsReq);
            return;
        }
        if nbr.retrans_remove(&mut self.ctx.cache, &header.key()) {
            if nbr.ls_retrans_list.is_empty() {
                nbr.ls_retrans_timer.cancel();
            }
            let ifname = nbr.iface.clone();
            let addr = nbr.addr;
            let backup_from_dr = self.interfaces.get(&ifname).is_some_and(|i| {
                i.state == interface::status::Status::Backup && i.dr == addr
            });
            if backup_from_dr {
                self.delayed_ack(&ifname, header);
            }
        } else {
            self.direct_ack(peerid, vec![header]);
        }
    }
}
