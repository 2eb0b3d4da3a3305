//! per-area state of the route decision engine and the area records it originates
pub mod lsdb;

use std::{collections::BTreeMap, net};

use crate::{
    config::AreaConfig,
    interface::{status::Status as IfStatus, NetworkType},
    lsa::{self, LsaKey, NetworkLsa, RouterLink, RouterLsa},
    neighbor::status::Status as NbrStatus,
    rde::IfaceInfo,
    util,
};

pub use lsdb::Lsdb;

/// a neighbor as far as the route decision engine cares
#[derive(Debug, Clone, PartialEq)]
pub struct RdeNeighbor {
    pub peerid: u32,
    pub area: net::Ipv4Addr,
    pub ifname: String,
    pub id: net::Ipv4Addr,
    pub addr: net::Ipv4Addr,
    pub state: NbrStatus,
}

/// # Area
/// - lsdb : router, network and summary records of the area
/// - interfaces : what the interface engine last reported per interface
/// - summaries : the summary records this router wants in the area, rebuilt
///   after every route computation
#[derive(Debug)]
pub struct Area {
    pub id: net::Ipv4Addr,
    pub stub: bool,
    pub stub_default_cost: u32,
    pub lsdb: Lsdb,
    pub interfaces: BTreeMap<String, IfaceInfo>,
    pub summaries: BTreeMap<LsaKey, lsa::Body>,
}

impl Area {
    pub fn new(config: &AreaConfig) -> Self {
        Self {
            id: config.id,
            stub: config.stub,
            stub_default_cost: config.stub_default_cost,
            lsdb: Lsdb::new(),
            interfaces: BTreeMap::new(),
            summaries: BTreeMap::new(),
        }
    }

    pub fn is_backbone(&self) -> bool {
        self.id == net::Ipv4Addr::UNSPECIFIED
    }

    /// options carried by records originated into the area
    pub fn options(&self) -> u8 {
        if self.stub {
            0
        } else {
            crate::OPTION_E
        }
    }

    /// at least one interface of the area is running
    pub fn is_active(&self) -> bool {
        self.interfaces.values().any(|i| i.state != IfStatus::Down)
    }

    /// # router_lsa
    /// the router record describing this router's links into the area.
    /// - neighbors : every known neighbor, only full ones on our interfaces count
    pub fn router_lsa<'a>(
        &self,
        flags: u8,
        neighbors: impl Iterator<Item = &'a RdeNeighbor> + Clone,
    ) -> RouterLsa {
        let mut links = Vec::new();
        for iface in self.interfaces.values() {
            let full: Vec<&RdeNeighbor> = neighbors
                .clone()
                .filter(|n| n.ifname == iface.name && n.state == NbrStatus::Full)
                .collect();
            links.extend(iface_links(iface, &full));
        }
        RouterLsa { flags, links }
    }

    /// # network_lsa
    /// the network record of a segment we are designated router on, if one is due.
    /// its link state id is our address on the segment.
    pub fn network_lsa<'a>(
        &self,
        router_id: net::Ipv4Addr,
        ls_id: net::Ipv4Addr,
        neighbors: impl Iterator<Item = &'a RdeNeighbor>,
    ) -> Option<NetworkLsa> {
        let iface = self.interfaces.values().find(|i| i.addr == ls_id)?;
        if iface.state != IfStatus::DR || iface.passive {
            return None;
        }
        if !matches!(
            iface.network_type,
            NetworkType::Broadcast | NetworkType::NBMA
        ) {
            return None;
        }
        let mut attached: Vec<net::Ipv4Addr> = neighbors
            .filter(|n| n.ifname == iface.name && n.state == NbrStatus::Full)
            .map(|n| n.id)
            .collect();
        if attached.is_empty() {
            return None;
        }
        attached.insert(0, router_id);
        Some(NetworkLsa {
            mask: iface.mask,
            attached,
        })
    }
}

fn link(link_type: u8, link_id: net::Ipv4Addr, link_data: net::Ipv4Addr, metric: u16) -> RouterLink {
    RouterLink {
        link_id,
        link_data,
        link_type,
        metric,
        tos: vec![],
    }
}

fn stub_link(addr: net::Ipv4Addr, mask: net::Ipv4Addr, metric: u16) -> RouterLink {
    link(
        lsa::router::LINK_TYPE_STUB,
        util::apply_mask(addr, mask),
        mask,
        metric,
    )
}

/// links one interface contributes to the router record
fn iface_links(iface: &IfaceInfo, full: &[&RdeNeighbor]) -> Vec<RouterLink> {
    let host = net::Ipv4Addr::BROADCAST;
    match iface.state {
        IfStatus::Down => return vec![],
        IfStatus::Loopback => return vec![stub_link(iface.addr, host, 0)],
        _ => {}
    }
    if iface.passive {
        return vec![stub_link(iface.addr, iface.mask, iface.metric)];
    }
    let mut links = Vec::new();
    match iface.network_type {
        NetworkType::PointToPoint => {
            for nbr in full {
                links.push(link(
                    lsa::router::LINK_TYPE_POINT_TO_POINT,
                    nbr.id,
                    iface.addr,
                    iface.metric,
                ));
            }
            if iface.mask != host {
                links.push(stub_link(iface.addr, iface.mask, iface.metric));
            } else if !iface.dst.is_unspecified() {
                links.push(stub_link(iface.dst, host, iface.metric));
            }
        }
        NetworkType::PointToMultipoint => {
            links.push(stub_link(iface.addr, host, 0));
            for nbr in full {
                links.push(link(
                    lsa::router::LINK_TYPE_POINT_TO_POINT,
                    nbr.id,
                    iface.addr,
                    iface.metric,
                ));
            }
        }
        NetworkType::Broadcast | NetworkType::NBMA => {
            let transit = match iface.state {
                IfStatus::Waiting => false,
                IfStatus::DR => !full.is_empty(),
                _ => full.iter().any(|n| n.addr == iface.dr),
            };
            if transit {
                links.push(link(
                    lsa::router::LINK_TYPE_TRANSIT,
                    iface.dr,
                    iface.addr,
                    iface.metric,
                ));
            } else {
                links.push(stub_link(iface.addr, iface.mask, iface.metric));
            }
        }
    }
    links
}

#[cfg(test)]
mod tests {
    use super::*;

    fn area() -> Area {
        Area {
            id: net::Ipv4Addr::UNSPECIFIED,
            stub: false,
            stub_default_cost: 1,
            lsdb: Lsdb::new(),
            interfaces: BTreeMap::new(),
            summaries: BTreeMap::new(),
        }
    }

    fn info(name: &str, addr: &str, network_type: NetworkType, state: IfStatus) -> IfaceInfo {
        IfaceInfo {
            name: name.into(),
            area: net::Ipv4Addr::UNSPECIFIED,
            addr: addr.parse().unwrap(),
            mask: "255.255.255.0".parse().unwrap(),
            dst: net::Ipv4Addr::UNSPECIFIED,
            network_type,
            state,
            metric: 10,
            dr: net::Ipv4Addr::UNSPECIFIED,
            passive: false,
        }
    }

    fn nbr(ifname: &str, id: &str, addr: &str, state: NbrStatus) -> RdeNeighbor {
        RdeNeighbor {
            peerid: 1,
            area: net::Ipv4Addr::UNSPECIFIED,
            ifname: ifname.into(),
            id: id.parse().unwrap(),
            addr: addr.parse().unwrap(),
            state,
        }
    }

    #[test]
    fn transit_link_once_adjacent_to_dr() {
        let mut area = area();
        let mut eth0 = info("eth0", "10.0.0.1", NetworkType::Broadcast, IfStatus::DR);
        eth0.dr = eth0.addr;
        area.interfaces.insert("eth0".into(), eth0);
        let me: net::Ipv4Addr = "1.1.1.1".parse().unwrap();

        let neighbors = [nbr("eth0", "2.2.2.2", "10.0.0.2", NbrStatus::Exchange)];
        let rlsa = area.router_lsa(0, neighbors.iter());
        assert_eq!(rlsa.links.len(), 1);
        assert_eq!(rlsa.links[0].link_type, lsa::router::LINK_TYPE_STUB);
        assert_eq!(rlsa.links[0].link_id, "10.0.0.0".parse::<net::Ipv4Addr>().unwrap());
        assert!(area.network_lsa(me, "10.0.0.1".parse().unwrap(), neighbors.iter()).is_none());

        let neighbors = [nbr("eth0", "2.2.2.2", "10.0.0.2", NbrStatus::Full)];
        let rlsa = area.router_lsa(0, neighbors.iter());
        assert_eq!(rlsa.links[0].link_type, lsa::router::LINK_TYPE_TRANSIT);
        assert_eq!(rlsa.links[0].link_id, "10.0.0.1".parse::<net::Ipv4Addr>().unwrap());
        let nlsa = area
            .network_lsa(me, "10.0.0.1".parse().unwrap(), neighbors.iter())
            .unwrap();
        assert_eq!(nlsa.attached, vec![me, "2.2.2.2".parse().unwrap()]);
    }

    #[test]
    fn loopback_passive_and_point_to_point_links() {
        let mut area = area();
        area.interfaces.insert(
            "lo".into(),
            info("lo", "192.168.1.1", NetworkType::Broadcast, IfStatus::Loopback),
        );
        let mut stub = info("eth1", "172.16.0.1", NetworkType::Broadcast, IfStatus::PointToPoint);
        stub.passive = true;
        stub.metric = 3;
        area.interfaces.insert("eth1".into(), stub);
        let mut ptp = info("ppp0", "10.1.0.1", NetworkType::PointToPoint, IfStatus::PointToPoint);
        ptp.mask = "255.255.255.252".parse().unwrap();
        area.interfaces.insert("ppp0".into(), ptp);
        area.interfaces.insert(
            "eth9".into(),
            info("eth9", "10.9.0.1", NetworkType::Broadcast, IfStatus::Down),
        );

        let neighbors = [nbr("ppp0", "3.3.3.3", "10.1.0.2", NbrStatus::Full)];
        let rlsa = area.router_lsa(0, neighbors.iter());
        let by_type = |t| rlsa.links.iter().filter(|l| l.link_type == t).count();
        assert_eq!(by_type(lsa::router::LINK_TYPE_POINT_TO_POINT), 1);
        assert_eq!(by_type(lsa::router::LINK_TYPE_STUB), 3);
        let lo = rlsa
            .links
            .iter()
            .find(|l| l.link_id == "192.168.1.1".parse::<net::Ipv4Addr>().unwrap())
            .unwrap();
        assert_eq!(lo.metric, 0);
        assert_eq!(lo.link_data, net::Ipv4Addr::BROADCAST);
        let passive = rlsa
            .links
            .iter()
            .find(|l| l.link_id == "172.16.0.0".parse::<net::Ipv4Addr>().unwrap())
            .unwrap();
        assert_eq!(passive.metric, 3);
    }
}
