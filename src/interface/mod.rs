pub mod event;
pub mod handle;
pub mod status;
pub mod trans;

use std::{collections::VecDeque, net};

use serde::{Deserialize, Serialize};

use crate::{
    config::{AreaConfig, InterfaceConfig},
    lsa,
    neighbor::{self, Neighbor},
    packet::auth::Auth,
    util::Timer,
};

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkType {
    #[default]
    Broadcast,
    PointToPoint,
    #[serde(rename = "nbma")]
    NBMA,
    PointToMultipoint,
}

impl std::fmt::Debug for NetworkType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NetworkType::Broadcast => write!(f, "Broadcast"),
            NetworkType::PointToPoint => write!(f, "PointToPoint"),
            NetworkType::NBMA => write!(f, "NBMA"),
            NetworkType::PointToMultipoint => write!(f, "PointToMultipoint"),
        }
    }
}

impl NetworkType {
    /// segments that elect a designated router
    pub fn is_multi_access(&self) -> bool {
        matches!(self, NetworkType::Broadcast | NetworkType::NBMA)
    }
}

/// # Interface
/// one configured interface and its protocol state. the neighbors live in the
/// engine's table and point back here by name; `self_nbr` stands for the local router.
pub struct Interface {
    pub name: String,
    pub area_id: net::Ipv4Addr,
    pub area_stub: bool,
    pub addr: net::Ipv4Addr,
    pub mask: net::Ipv4Addr,
    /// remote end of a point-to-point link, learned from its hellos
    pub dst: net::Ipv4Addr,
    pub network_type: NetworkType,
    pub metric: u16,
    pub hello_interval: u16,
    pub dead_interval: u32,
    pub rxmt_interval: u16,
    pub transmit_delay: u16,
    pub mtu: u16,
    pub passive: bool,
    pub static_neighbors: Vec<net::Ipv4Addr>,
    pub auth: Auth,
    pub state: status::Status,
    pub dr: net::Ipv4Addr,
    pub bdr: net::Ipv4Addr,
    pub self_nbr: Neighbor,
    /// delayed acknowledgments, flushed by `ack_timer`
    pub ls_ack_list: VecDeque<lsa::Header>,
    pub linkup: bool,
    pub loopback: bool,
    pub hello_timer: Timer,
    pub wait_timer: Timer,
    pub ack_timer: Timer,
    pub groups: Vec<net::Ipv4Addr>,
}

impl Interface {
    pub fn new(
        router_id: net::Ipv4Addr,
        area: &AreaConfig,
        config: &InterfaceConfig,
        crypt_seq: u32,
    ) -> Self {
        let addr = config.address.addr();
        let mut self_nbr = Neighbor::new(0, &config.name, router_id, addr);
        self_nbr.priority = config.priority;
        self_nbr.state = neighbor::status::Status::Full;
        let mut iface = Self {
            name: config.name.clone(),
            area_id: area.id,
            area_stub: area.stub,
            addr,
            mask: config.address.netmask(),
            dst: net::Ipv4Addr::UNSPECIFIED,
            network_type: config.network_type,
            metric: config.metric,
            hello_interval: config.hello_interval,
            dead_interval: config.dead_interval,
            rxmt_interval: config.retransmit_interval,
            transmit_delay: config.transmit_delay,
            mtu: config.mtu,
            passive: config.passive,
            static_neighbors: config.neighbors.clone(),
            auth: Auth::new(config.auth.to_kind(), crypt_seq),
            state: status::Status::Down,
            dr: net::Ipv4Addr::UNSPECIFIED,
            bdr: net::Ipv4Addr::UNSPECIFIED,
            self_nbr,
            ls_ack_list: VecDeque::new(),
            linkup: false,
            loopback: false,
            hello_timer: Timer::new(),
            wait_timer: Timer::new(),
            ack_timer: Timer::new(),
            groups: Vec::new(),
        };
        iface.update(config);
        iface
    }

    /// apply the in-place part of a reconfiguration
    pub fn update(&mut self, config: &InterfaceConfig) {
        self.metric = config.metric;
        self.hello_interval = config.hello_interval;
        self.dead_interval = config.dead_interval;
        self.rxmt_interval = config.retransmit_interval;
        self.transmit_delay = config.transmit_delay;
        self.passive = config.passive;
        self.static_neighbors = config.neighbors.clone();
        self.self_nbr.priority = config.priority;
        self.auth.rekey(config.auth.to_kind());
    }

    pub fn priority(&self) -> u8 {
        self.self_nbr.priority
    }

    /// hello options: the E bit is clear inside stub areas
    pub fn options(&self) -> u8 {
        if self.area_stub {
            0
        } else {
            crate::OPTION_E
        }
    }

    pub fn is_dr_or_bdr(&self) -> bool {
        matches!(self.state, status::Status::DR | status::Status::Backup)
    }

    pub fn in_subnet(&self, addr: net::Ipv4Addr) -> bool {
        u32::from(addr) & u32::from(self.mask) == u32::from(self.addr) & u32::from(self.mask)
    }

    /// destination of flooded updates and delayed acks on this interface.
    /// None on NBMA and point-to-multipoint, those go unicast to every adjacency.
    pub fn flood_destination(&self) -> Option<net::Ipv4Addr> {
        match self.network_type {
            NetworkType::PointToPoint => Some(crate::ALL_SPF_ROUTERS),
            NetworkType::Broadcast => {
                if self.is_dr_or_bdr() {
                    Some(crate::ALL_SPF_ROUTERS)
                } else {
                    Some(crate::ALL_D_ROUTERS)
                }
            }
            NetworkType::NBMA | NetworkType::PointToMultipoint => None,
        }
    }

    /// the election view of the local router
    pub fn self_candidate(&self) -> status::Candidate {
        status::Candidate {
            id: self.self_nbr.id,
            addr: self.addr,
            priority: self.priority(),
            dr: self.dr,
            bdr: self.bdr,
        }
    }

    pub fn cancel_timers(&mut self) {
        self.hello_timer.cancel();
        self.wait_timer.cancel();
        self.ack_timer.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn flood_destination_by_role() {
        let config = Config::from_json(
            r#"{ "router_id": "1.1.1.1", "areas": [{ "id": "0.0.0.0", "interfaces": [
                { "name": "eth0", "address": "10.0.0.1/24" }] }] }"#,
        )
        .unwrap();
        let (area, ifc) = config.interfaces().next().unwrap();
        let mut iface = Interface::new(config.router_id, area, ifc, 0);
        assert_eq!(iface.mask, net::Ipv4Addr::new(255, 255, 255, 0));
        assert!(iface.in_subnet(net::Ipv4Addr::new(10, 0, 0, 200)));
        assert!(!iface.in_subnet(net::Ipv4Addr::new(10, 0, 1, 1)));
        iface.state = status::Status::DRother;
        assert_eq!(iface.flood_destination(), Some(crate::ALL_D_ROUTERS));
        iface.state = status::Status::Backup;
        assert_eq!(iface.flood_destination(), Some(crate::ALL_SPF_ROUTERS));
        iface.network_type = NetworkType::NBMA;
        assert_eq!(iface.flood_destination(), None);
        assert_eq!(iface.options(), crate::OPTION_E);
    }
}
