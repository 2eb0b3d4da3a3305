//! packet reception: common header checks, authentication and the per type handlers

use std::net;

use tracing::{debug, trace, warn};

use super::Engine;
use crate::{
    interface::{self, NetworkType},
    lsa,
    neighbor::{event::Event, status::Status, LastDd, Neighbor},
    packet::{
        DbDescPacket, HelloPacket, LsAckPacket, LsRequestPacket, LsUpdatePacket, OspfPacketHeader,
        Packet,
    },
    rde::RdeMessage,
};

impl Engine {
    /// create a neighbor and announce it to the route decision engine
    pub(crate) fn add_neighbor(
        &mut self,
        ifname: &str,
        id: net::Ipv4Addr,
        addr: net::Ipv4Addr,
        is_static: bool,
    ) -> u32 {
        let peerid = self.ctx.next_peerid();
        let mut nbr = Neighbor::new(peerid, ifname, id, addr);
        nbr.is_static = is_static;
        self.neighbors.insert(peerid, nbr);
        self.announce_neighbor(peerid);
        peerid
    }

    fn announce_neighbor(&self, peerid: u32) {
        let Some(nbr) = self.neighbors.get(&peerid) else {
            return;
        };
        let Some(iface) = self.interfaces.get(&nbr.iface) else {
            return;
        };
        self.ctx.to_rde(RdeMessage::NeighborUp {
            peerid,
            area: iface.area_id,
            ifname: nbr.iface.clone(),
            id: nbr.id,
            addr: nbr.addr,
        });
    }

    fn find_neighbor(&self, ifname: &str, router_id: net::Ipv4Addr, src: net::Ipv4Addr) -> Option<u32> {
        let iface = self.interfaces.get(ifname)?;
        self.neighbors_on(ifname)
            .find(|n| match iface.network_type {
                NetworkType::PointToPoint => n.id == router_id,
                _ => n.addr == src,
            })
            .map(|n| n.peerid)
    }

    /// # recv_packet
    /// accept or drop one OSPF packet received on `ifname`
    pub(crate) fn recv_packet(
        &mut self,
        ifname: &str,
        src: net::Ipv4Addr,
        dst: net::Ipv4Addr,
        data: &[u8],
    ) {
        let Some(iface) = self.interfaces.get(ifname) else {
            return;
        };
        use interface::status::Status as IfStatus;
        if iface.passive || matches!(iface.state, IfStatus::Down | IfStatus::Loopback) {
            return;
        }
        let header = match OspfPacketHeader::try_from_be_bytes(data) {
            Ok(header) => header,
            Err(err) => {
                debug!(iface = ifname, %src, %err, "packet dropped");
                return;
            }
        };
        if header.router_id == self.ctx.router_id {
            trace!(iface = ifname, "own packet ignored");
            return;
        }
        if header.area_id != iface.area_id {
            debug!(iface = ifname, %src, area = %header.area_id, "packet for another area dropped");
            return;
        }
        if dst == crate::ALL_D_ROUTERS && !iface.is_dr_or_bdr() {
            debug!(iface = ifname, %src, "AllDRouters packet while not designated, dropped");
            return;
        }
        if iface.network_type != NetworkType::PointToPoint && !iface.in_subnet(src) {
            debug!(iface = ifname, %src, "source outside the interface subnet, dropped");
            return;
        }
        let peerid = self.find_neighbor(ifname, header.router_id, src);
        let last_seq = peerid
            .and_then(|p| self.neighbors.get(&p))
            .and_then(|n| n.crypt_seq_num);
        let crypt_seq = match iface.auth.verify(data, &header, last_seq) {
            Ok(seq) => seq,
            Err(err) => {
                warn!(iface = ifname, %src, %err, "authentication failed");
                return;
            }
        };
        let packet = match Packet::decode_body(&header, data) {
            Ok(packet) => packet,
            Err(err) => {
                debug!(iface = ifname, %src, %err, "packet dropped");
                return;
            }
        };
        trace!(iface = ifname, %src, kind = packet.name(), "packet accepted");

        if let Packet::Hello(hello) = packet {
            self.recv_hello(ifname, src, &header, hello, crypt_seq);
            return;
        }
        let Some(peerid) = peerid else {
            debug!(iface = ifname, %src, "packet from unknown neighbor dropped");
            return;
        };
        if let (Some(seq), Some(nbr)) = (crypt_seq, self.neighbors.get_mut(&peerid)) {
            nbr.crypt_seq_num = Some(seq);
        }
        match packet {
            Packet::Hello(_) => {}
            Packet::DbDesc(dd) => self.recv_db_description(peerid, dd),
            Packet::LsRequest(req) => self.recv_ls_request(peerid, req),
            Packet::LsUpdate(update) => self.recv_ls_update(peerid, update),
            Packet::LsAck(ack) => self.recv_ls_ack(peerid, ack),
        }
    }

    fn recv_hello(
        &mut self,
        ifname: &str,
        src: net::Ipv4Addr,
        header: &OspfPacketHeader,
        hello: HelloPacket,
        crypt_seq: Option<u32>,
    ) {
        let Some(iface) = self.interfaces.get_mut(ifname) else {
            return;
        };
        if iface.network_type != NetworkType::PointToPoint && hello.network_mask != iface.mask {
            debug!(iface = ifname, %src, mask = %hello.network_mask, "hello mask mismatch");
            return;
        }
        if hello.hello_interval != iface.hello_interval || hello.dead_interval != iface.dead_interval {
            debug!(iface = ifname, %src, "hello timer mismatch");
            return;
        }
        if (hello.options & crate::OPTION_E != 0) == iface.area_stub {
            debug!(iface = ifname, %src, "hello stub area mismatch");
            return;
        }
        if iface.network_type == NetworkType::PointToPoint {
            iface.dst = src;
        }
        let multi_access = iface.network_type.is_multi_access();

        let peerid = match self.find_neighbor(ifname, header.router_id, src) {
            Some(peerid) => peerid,
            None => self.add_neighbor(ifname, header.router_id, src, false),
        };
        let Some(nbr) = self.neighbors.get_mut(&peerid) else {
            return;
        };
        if let Some(seq) = crypt_seq {
            nbr.crypt_seq_num = Some(seq);
        }
        let renamed = nbr.id != header.router_id || nbr.addr != src;
        nbr.id = header.router_id;
        nbr.addr = src;
        let prev_priority = nbr.priority;
        let was_dr = nbr.is_dr();
        let was_bdr = nbr.is_bdr();
        nbr.priority = hello.priority;
        nbr.options = hello.options;
        nbr.dr = hello.dr;
        nbr.bdr = hello.bdr;
        let (is_dr, is_bdr) = (nbr.is_dr(), nbr.is_bdr());
        if renamed {
            self.announce_neighbor(peerid);
        }

        self.nbr_fsm(peerid, Event::HelloReceived);
        if !hello.neighbors.contains(&self.ctx.router_id) {
            self.nbr_fsm(peerid, Event::OneWayReceived);
            return;
        }
        self.nbr_fsm(peerid, Event::TwoWayReceived);
        if !multi_access {
            return;
        }
        use interface::event::Event as IfEvent;
        let waiting = self
            .interfaces
            .get(ifname)
            .is_some_and(|i| i.state == interface::status::Status::Waiting);
        if prev_priority != hello.priority {
            self.iface_fsm(ifname, IfEvent::NeighborChange);
        }
        if waiting && ((is_dr && hello.bdr.is_unspecified()) || is_bdr) {
            self.iface_fsm(ifname, IfEvent::BackupSeen);
        } else if was_dr != is_dr || was_bdr != is_bdr {
            self.iface_fsm(ifname, IfEvent::NeighborChange);
        }
    }

    /// # recv_db_description
    /// master/slave negotiation and the header exchange
    fn recv_db_description(&mut self, peerid: u32, dd: DbDescPacket) {
        let Some(nbr) = self.neighbors.get(&peerid) else {
            return;
        };
        let Some(iface) = self.interfaces.get(&nbr.iface) else {
            return;
        };
        if dd.interface_mtu > iface.mtu {
            warn!(
                neighbor = %nbr.id,
                mtu = dd.interface_mtu,
                local = iface.mtu,
                "neighbor mtu too large, db description dropped"
            );
            return;
        }
        let mut state = nbr.state;
        if state == Status::Init {
            self.nbr_fsm(peerid, Event::TwoWayReceived);
            state = match self.neighbors.get(&peerid) {
                Some(nbr) => nbr.state,
                None => return,
            };
        }
        match state {
            Status::ExStart => self.dd_negotiate(peerid, dd),
            Status::Exchange => self.dd_exchange(peerid, dd),
            Status::Loading | Status::Full => {
                let Some(nbr) = self.neighbors.get(&peerid) else {
                    return;
                };
                if nbr.last_rx_dd == Some(last_dd(&dd)) {
                    // the slave answers a duplicate, the master drops it
                    if nbr.master {
                        self.resend_db_description(peerid);
                    }
                } else {
                    self.nbr_fsm(peerid, Event::SeqNumberMismatch);
                }
            }
            _ => {
                trace!(peerid, ?state, "db description ignored");
            }
        }
    }

    fn dd_negotiate(&mut self, peerid: u32, dd: DbDescPacket) {
        let router_id = self.ctx.router_id;
        let Some(nbr) = self.neighbors.get_mut(&peerid) else {
            return;
        };
        let init_bits = crate::packet::dd::FEATURE_BIT_I
            | crate::packet::dd::FEATURE_BIT_M
            | crate::packet::dd::FEATURE_BIT_MS;
        if dd.bits == init_bits && dd.lsa_headers.is_empty() && nbr.id > router_id {
            debug!(neighbor = %nbr.id, seq = dd.dd_seq_num, "negotiated as slave");
            nbr.master = true;
            nbr.dd_seq_num = dd.dd_seq_num;
            nbr.dd_more = true;
            nbr.last_rx_dd = Some(last_dd(&dd));
            self.nbr_fsm(peerid, Event::NegotiationDone);
        } else if !dd.is_init()
            && !dd.is_master()
            && dd.dd_seq_num == nbr.dd_seq_num
            && nbr.id < router_id
        {
            debug!(neighbor = %nbr.id, seq = dd.dd_seq_num, "negotiated as master");
            nbr.master = false;
            nbr.dd_more = dd.is_more();
            nbr.last_rx_dd = Some(last_dd(&dd));
            nbr.dd_seq_num = nbr.dd_seq_num.wrapping_add(1);
            self.forward_dd_headers(peerid, dd.lsa_headers);
            self.nbr_fsm(peerid, Event::NegotiationDone);
        } else {
            trace!(neighbor = %nbr.id, bits = dd.bits, "db description ignored in ExStart");
        }
    }

    fn dd_exchange(&mut self, peerid: u32, dd: DbDescPacket) {
        let Some(nbr) = self.neighbors.get_mut(&peerid) else {
            return;
        };
        if nbr.last_rx_dd == Some(last_dd(&dd)) {
            if nbr.master {
                self.resend_db_description(peerid);
            }
            return;
        }
        let expected = if nbr.master {
            nbr.dd_seq_num.wrapping_add(1)
        } else {
            nbr.dd_seq_num
        };
        let mismatch = if dd.is_master() != nbr.master {
            Some("master bit")
        } else if dd.is_init() {
            Some("init bit")
        } else if nbr.last_rx_dd.is_some_and(|last| last.options != dd.options) {
            Some("options")
        } else if dd.dd_seq_num != expected {
            Some("sequence number")
        } else {
            None
        };
        if let Some(what) = mismatch {
            debug!(neighbor = %nbr.id, what, "db description mismatch");
            self.nbr_fsm(peerid, Event::SeqNumberMismatch);
            return;
        }
        nbr.last_rx_dd = Some(last_dd(&dd));
        nbr.dd_more = dd.is_more();
        let we_have_more = nbr
            .last_tx_dd
            .as_ref()
            .is_some_and(|last| last.is_more());
        let slave = nbr.master;
        if slave {
            nbr.dd_seq_num = dd.dd_seq_num;
        } else {
            nbr.dd_seq_num = nbr.dd_seq_num.wrapping_add(1);
        }
        self.forward_dd_headers(peerid, dd.lsa_headers.clone());
        if slave {
            self.send_db_description(peerid);
            let sent_more = self
                .neighbors
                .get(&peerid)
                .and_then(|n| n.last_tx_dd.as_ref())
                .is_some_and(|last| last.is_more());
            if !dd.is_more() && !sent_more {
                self.nbr_fsm(peerid, Event::ExchangeDone);
            }
        } else if !dd.is_more() && !we_have_more {
            self.nbr_fsm(peerid, Event::ExchangeDone);
        } else {
            self.send_db_description(peerid);
        }
    }

    /// ask the route decision engine which offered headers to request
    fn forward_dd_headers(&mut self, peerid: u32, headers: Vec<lsa::Header>) {
        if headers.is_empty() {
            return;
        }
        if let Some(nbr) = self.neighbors.get_mut(&peerid) {
            nbr.dd_pending += 1;
        }
        self.ctx.to_rde(RdeMessage::DdHeaders { peerid, headers });
    }

    fn recv_ls_request(&mut self, peerid: u32, req: LsRequestPacket) {
        let Some(nbr) = self.neighbors.get(&peerid) else {
            return;
        };
        if !nbr.state.is_flooding() {
            trace!(neighbor = %nbr.id, state = ?nbr.state, "ls request ignored");
            return;
        }
        let keys: Option<Vec<lsa::LsaKey>> = req.entries.iter().map(|e| e.key()).collect();
        match keys {
            Some(keys) if !keys.is_empty() => {
                self.ctx.to_rde(RdeMessage::LsRequest { peerid, keys });
            }
            Some(_) => {}
            None => self.nbr_fsm(peerid, Event::BadLsReq),
        }
    }

    fn recv_ls_update(&mut self, peerid: u32, update: LsUpdatePacket) {
        let Some(nbr) = self.neighbors.get(&peerid) else {
            return;
        };
        if !nbr.state.is_flooding() {
            trace!(neighbor = %nbr.id, state = ?nbr.state, "ls update ignored");
            return;
        }
        for lsa in update.lsas {
            self.ctx.to_rde(RdeMessage::LsUpdate { peerid, lsa });
        }
    }

    fn recv_ls_ack(&mut self, peerid: u32, ack: LsAckPacket) {
        let Some(nbr) = self.neighbors.get_mut(&peerid) else {
            return;
        };
        if !nbr.state.is_flooding() {
            return;
        }
        for header in &ack.headers {
            if nbr.retrans_matches(&self.ctx.cache, header) {
                nbr.retrans_remove(&mut self.ctx.cache, &header.key());
            } else if nbr.ls_retrans_list.contains_key(&header.key()) {
                debug!(neighbor = %nbr.id, key = %header.key(), "ack for another instance");
            } else {
                trace!(neighbor = %nbr.id, key = %header.key(), "unexpected ack");
            }
        }
        if nbr.ls_retrans_list.is_empty() {
            nbr.ls_retrans_timer.cancel();
        }
    }
}

fn last_dd(dd: &DbDescPacket) -> LastDd {
    LastDd {
        options: dd.options,
        bits: dd.bits,
        seq_num: dd.dd_seq_num,
    }
}
