use tracing::{debug, trace};

use super::status::Status;
use crate::{
    engine::{Engine, EngineEvent, EngineTimer},
    interface::NetworkType,
    lsa,
    packet::{
        self,
        dd::{FEATURE_BIT_I, FEATURE_BIT_M, FEATURE_BIT_MS},
        DbDescPacket, LsRequestPacket, LsUpdatePacket, LsrEntry,
    },
    util,
};

impl Engine {
    /// unicast destination of packets for one neighbor
    pub(crate) fn neighbor_destination(&self, peerid: u32) -> Option<std::net::Ipv4Addr> {
        let nbr = self.neighbors.get(&peerid)?;
        let iface = self.interfaces.get(&nbr.iface)?;
        Some(match iface.network_type {
            NetworkType::PointToPoint => crate::ALL_SPF_ROUTERS,
            _ => nbr.addr,
        })
    }

    /// # send_db_description
    /// build and send the next database description packet for the neighbor's state:
    /// the empty initial packet in ExStart, the next chunk of the summary list in Exchange.
    pub(crate) fn send_db_description(&mut self, peerid: u32) {
        let Some(dst) = self.neighbor_destination(peerid) else {
            return;
        };
        let Some(nbr) = self.neighbors.get_mut(&peerid) else {
            return;
        };
        let Some(iface) = self.interfaces.get_mut(&nbr.iface) else {
            return;
        };
        let dd = match nbr.state {
            Status::ExStart => DbDescPacket {
                interface_mtu: iface.mtu,
                options: iface.options(),
                bits: FEATURE_BIT_I | FEATURE_BIT_M | FEATURE_BIT_MS,
                dd_seq_num: nbr.dd_seq_num,
                lsa_headers: vec![],
            },
            Status::Exchange => {
                let room = packet::max_body(iface.mtu, &iface.auth).saturating_sub(8)
                    / lsa::Header::length();
                let take = room.max(1).min(nbr.db_sum_list.len());
                let lsa_headers: Vec<lsa::Header> = nbr.db_sum_list.drain(..take).collect();
                let mut bits = 0;
                if !nbr.db_sum_list.is_empty() {
                    bits |= FEATURE_BIT_M;
                }
                if !nbr.master {
                    bits |= FEATURE_BIT_MS;
                }
                DbDescPacket {
                    interface_mtu: iface.mtu,
                    options: iface.options(),
                    bits,
                    dd_seq_num: nbr.dd_seq_num,
                    lsa_headers,
                }
            }
            _ => return,
        };
        trace!(
            neighbor = %nbr.id,
            seq = dd.dd_seq_num,
            bits = dd.bits,
            headers = dd.lsa_headers.len(),
            "sending db description"
        );
        self.ctx.send(iface, dst, &dd);
        nbr.last_tx_dd = Some(dd);
        if nbr.state == Status::ExStart || !nbr.master {
            nbr.db_tx_timer.arm(
                util::secs(iface.rxmt_interval),
                &self.ctx.event_tx,
                EngineEvent::Timer(EngineTimer::DbTx(peerid)),
            );
        }
    }

    /// send the last database description again, unchanged
    pub(crate) fn resend_db_description(&mut self, peerid: u32) {
        let Some(dst) = self.neighbor_destination(peerid) else {
            return;
        };
        let Some(nbr) = self.neighbors.get(&peerid) else {
            return;
        };
        let Some(dd) = nbr.last_tx_dd.clone() else {
            return;
        };
        let Some(iface) = self.interfaces.get_mut(&nbr.iface) else {
            return;
        };
        debug!(neighbor = %nbr.id, seq = dd.dd_seq_num, "resending db description");
        self.ctx.send(iface, dst, &dd);
    }

    pub(crate) fn db_tx_timer(&mut self, peerid: u32) {
        let Some(nbr) = self.neighbors.get_mut(&peerid) else {
            return;
        };
        if !nbr.db_tx_timer.expired() {
            return;
        }
        let rearm = match nbr.state {
            Status::ExStart => true,
            Status::Exchange => !nbr.master,
            _ => false,
        };
        if !rearm {
            return;
        }
        self.resend_db_description(peerid);
        let Some(nbr) = self.neighbors.get_mut(&peerid) else {
            return;
        };
        if let Some(iface) = self.interfaces.get(&nbr.iface) {
            nbr.db_tx_timer.arm(
                util::secs(iface.rxmt_interval),
                &self.ctx.event_tx,
                EngineEvent::Timer(EngineTimer::DbTx(peerid)),
            );
        }
    }

    /// # send_ls_req
    /// request the head of the request list, as much as fits in one packet.
    /// requests only go out in Loading.
    pub(crate) fn send_ls_req(&mut self, peerid: u32) {
        let Some(dst) = self.neighbor_destination(peerid) else {
            return;
        };
        let Some(nbr) = self.neighbors.get_mut(&peerid) else {
            return;
        };
        if nbr.state != Status::Loading {
            nbr.ls_req_timer.cancel();
            return;
        }
        if nbr.ls_req_list.is_empty() {
            nbr.ls_req_timer.cancel();
            return;
        }
        let Some(iface) = self.interfaces.get_mut(&nbr.iface) else {
            return;
        };
        let room = (packet::max_body(iface.mtu, &iface.auth) / LsrEntry::length()).max(1);
        let entries: Vec<LsrEntry> = nbr
            .ls_req_list
            .keys()
            .take(room)
            .map(|key| LsrEntry::from(*key))
            .collect();
        trace!(neighbor = %nbr.id, count = entries.len(), "sending ls request");
        self.ctx.send(iface, dst, &LsRequestPacket { entries });
        nbr.ls_req_timer.arm(
            util::secs(iface.rxmt_interval),
            &self.ctx.event_tx,
            EngineEvent::Timer(EngineTimer::LsReq(peerid)),
        );
    }

    pub(crate) fn ls_req_timer(&mut self, peerid: u32) {
        let Some(nbr) = self.neighbors.get_mut(&peerid) else {
            return;
        };
        if !nbr.ls_req_timer.expired() {
            return;
        }
        if nbr.state == Status::Loading {
            self.send_ls_req(peerid);
        }
    }

    /// send records to one neighbor, split over as many updates as the mtu needs
    pub(crate) fn send_ls_update(&mut self, peerid: u32, lsas: Vec<Vec<u8>>) {
        let Some(dst) = self.neighbor_destination(peerid) else {
            return;
        };
        let Some(nbr) = self.neighbors.get(&peerid) else {
            return;
        };
        let Some(iface) = self.interfaces.get_mut(&nbr.iface) else {
            return;
        };
        let delay = iface.transmit_delay;
        let aged = lsas
            .iter()
            .map(|lsa| LsUpdatePacket::age_for_transmit(lsa, delay))
            .collect();
        for update in pack_updates(aged, packet::max_body(iface.mtu, &iface.auth)) {
            self.ctx.send(iface, dst, &update);
        }
    }

    /// # ls_retrans_timer
    /// resend unacknowledged records, always unicast to the neighbor
    pub(crate) fn ls_retrans_timer(&mut self, peerid: u32) {
        let Some(nbr) = self.neighbors.get_mut(&peerid) else {
            return;
        };
        if !nbr.ls_retrans_timer.expired() {
            return;
        }
        if nbr.ls_retrans_list.is_empty() || !nbr.state.is_flooding() {
            return;
        }
        let Some(iface) = self.interfaces.get_mut(&nbr.iface) else {
            return;
        };
        let lsas: Vec<Vec<u8>> = nbr
            .ls_retrans_list
            .values()
            .filter_map(|handle| self.ctx.cache.get(*handle))
            .map(|lsa| LsUpdatePacket::age_for_transmit(lsa, iface.transmit_delay))
            .collect();
        debug!(neighbor = %nbr.id, count = lsas.len(), "retransmitting records");
        let max = packet::max_body(iface.mtu, &iface.auth);
        // one packet per interval, the rest waits for the next round
        if let Some(update) = pack_updates(lsas, max).into_iter().next() {
            self.ctx.send(iface, nbr.addr, &update);
        }
        nbr.ls_retrans_timer.arm(
            util::secs(iface.rxmt_interval),
            &self.ctx.event_tx,
            EngineEvent::Timer(EngineTimer::LsRetrans(peerid)),
        );
    }

    pub(crate) fn arm_retrans(&mut self, peerid: u32) {
        let Some(nbr) = self.neighbors.get_mut(&peerid) else {
            return;
        };
        if nbr.ls_retrans_timer.is_armed() {
            return;
        }
        let Some(iface) = self.interfaces.get(&nbr.iface) else {
            return;
        };
        nbr.ls_retrans_timer.arm(
            util::secs(iface.rxmt_interval),
            &self.ctx.event_tx,
            EngineEvent::Timer(EngineTimer::LsRetrans(peerid)),
        );
    }
}

/// group records into updates no larger than `max` bytes of body each.
/// a record too large for any packet still goes out alone.
pub fn pack_updates(lsas: Vec<Vec<u8>>, max: usize) -> Vec<LsUpdatePacket> {
    let mut packets = Vec::new();
    let mut current: Vec<Vec<u8>> = Vec::new();
    let mut size = 4;
    for lsa in lsas {
        if !current.is_empty() && size + lsa.len() > max {
            packets.push(LsUpdatePacket {
                lsas: std::mem::take(&mut current),
            });
            size = 4;
        }
        size += lsa.len();
        current.push(lsa);
    }
    if !current.is_empty() {
        packets.push(LsUpdatePacket { lsas: current });
    }
    packets
}
