use std::net;

use tracing::{debug, trace};

use super::{status::Status, NetworkType};
use crate::{
    engine::{Engine, EngineEvent, EngineTimer},
    lsa,
    neighbor,
    packet::{self, HelloPacket, LsAckPacket},
    util,
};

impl Engine {
    fn hello_packet(&self, ifname: &str) -> Option<HelloPacket> {
        let iface = self.interfaces.get(ifname)?;
        let neighbors = self
            .neighbors_on(ifname)
            .filter(|n| n.state >= neighbor::status::Status::Init)
            .map(|n| n.id)
            .collect();
        Some(HelloPacket {
            network_mask: match iface.network_type {
                NetworkType::PointToPoint => net::Ipv4Addr::UNSPECIFIED,
                _ => iface.mask,
            },
            hello_interval: iface.hello_interval,
            options: iface.options(),
            priority: iface.priority(),
            dead_interval: iface.dead_interval,
            dr: iface.dr,
            bdr: iface.bdr,
            neighbors,
        })
    }

    /// # send_hello
    /// send one round of hellos and arm the next. NBMA and point-to-multipoint
    /// segments get one unicast copy per known neighbor.
    pub(crate) fn send_hello(&mut self, ifname: &str) {
        let Some(hello) = self.hello_packet(ifname) else {
            return;
        };
        let unicast: Vec<net::Ipv4Addr> = match self.interfaces.get(ifname) {
            Some(iface) if iface.network_type == NetworkType::NBMA => {
                self.neighbors_on(ifname).map(|n| n.addr).collect()
            }
            Some(_) => vec![],
            None => return,
        };
        let Some(iface) = self.interfaces.get_mut(ifname) else {
            return;
        };
        if iface.passive || iface.state == Status::Down || iface.state == Status::Loopback {
            return;
        }
        if iface.network_type == NetworkType::NBMA {
            for dst in unicast {
                self.ctx.send(iface, dst, &hello);
            }
        } else {
            self.ctx.send(iface, crate::ALL_SPF_ROUTERS, &hello);
        }
        trace!(iface = ifname, neighbors = hello.neighbors.len(), "hello sent");
        iface.hello_timer.arm(
            util::secs(iface.hello_interval),
            &self.ctx.event_tx,
            EngineEvent::Timer(EngineTimer::Hello(ifname.to_string())),
        );
    }

    /// a single hello to one address, used to poll NBMA neighbors
    pub(crate) fn send_hello_to(&mut self, ifname: &str, dst: net::Ipv4Addr) {
        let Some(hello) = self.hello_packet(ifname) else {
            return;
        };
        if let Some(iface) = self.interfaces.get_mut(ifname) {
            self.ctx.send(iface, dst, &hello);
        }
    }

    pub(crate) fn hello_timer(&mut self, ifname: &str) {
        if self
            .interfaces
            .get_mut(ifname)
            .is_some_and(|i| i.hello_timer.expired())
        {
            self.send_hello(ifname);
        }
    }

    pub(crate) fn wait_timer(&mut self, ifname: &str) {
        if self
            .interfaces
            .get_mut(ifname)
            .is_some_and(|i| i.wait_timer.expired())
        {
            self.iface_fsm(ifname, super::event::Event::WaitTimer);
        }
    }

    /// queue a delayed acknowledgment, sent with the others when the ack timer fires
    pub(crate) fn delayed_ack(&mut self, ifname: &str, header: lsa::Header) {
        let Some(iface) = self.interfaces.get_mut(ifname) else {
            return;
        };
        iface.ls_ack_list.push_back(header);
        if !iface.ack_timer.is_armed() {
            iface.ack_timer.arm(
                crate::ACK_DELAY,
                &self.ctx.event_tx,
                EngineEvent::Timer(EngineTimer::Ack(ifname.to_string())),
            );
        }
    }

    /// # ack_timer
    /// flush delayed acknowledgments, one packet per firing
    pub(crate) fn ack_timer(&mut self, ifname: &str) {
        let unicast: Vec<net::Ipv4Addr> = self
            .neighbors_on(ifname)
            .filter(|n| n.state.is_flooding())
            .map(|n| n.addr)
            .collect();
        let Some(iface) = self.interfaces.get_mut(ifname) else {
            return;
        };
        if !iface.ack_timer.expired() {
            return;
        }
        let room = (packet::max_body(iface.mtu, &iface.auth) / lsa::Header::length()).max(1);
        let take = room.min(iface.ls_ack_list.len());
        let ack = LsAckPacket {
            headers: iface.ls_ack_list.drain(..take).collect(),
        };
        if ack.headers.is_empty() {
            return;
        }
        debug!(iface = ifname, count = ack.headers.len(), "sending delayed acks");
        match iface.flood_destination() {
            Some(dst) => self.ctx.send(iface, dst, &ack),
            None => {
                for dst in unicast {
                    self.ctx.send(iface, dst, &ack);
                }
            }
        }
        if !iface.ls_ack_list.is_empty() {
            iface.ack_timer.arm(
                crate::ACK_DELAY,
                &self.ctx.event_tx,
                EngineEvent::Timer(EngineTimer::Ack(ifname.to_string())),
            );
        }
    }

    /// acknowledge straight back to the sending neighbor
    pub(crate) fn direct_ack(&mut self, peerid: u32, headers: Vec<lsa::Header>) {
        let Some(dst) = self.neighbor_destination(peerid) else {
            return;
        };
        let Some(nbr) = self.neighbors.get(&peerid) else {
            return;
        };
        let Some(iface) = self.interfaces.get_mut(&nbr.iface) else {
            return;
        };
        self.ctx.send(iface, dst, &LsAckPacket { headers });
    }
}
