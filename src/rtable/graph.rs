//! shortest path tree of one area over its router and network records

use std::{
    cmp::Reverse,
    collections::{BTreeMap, BinaryHeap},
    net,
};

use tracing::trace;

use crate::{
    area::Area,
    lsa::{
        self,
        router::{LINK_TYPE_POINT_TO_POINT, LINK_TYPE_TRANSIT},
        Body, Lsa, LsaKey, RouterLink,
    },
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Nexthop {
    /// unspecified when the destination is directly attached
    pub addr: net::Ipv4Addr,
    pub ifname: String,
}

/// # Vertex
/// a router or transit network placed on the tree
/// - nexthop : None only for the root
#[derive(Clone, Debug)]
pub struct Vertex {
    pub key: LsaKey,
    pub lsa: Lsa,
    pub cost: u32,
    pub nexthop: Option<Nexthop>,
    pub parent: Option<LsaKey>,
}

impl Vertex {
    pub fn is_router(&self) -> bool {
        self.key.ls_type == lsa::ROUTER_LSA_TYPE
    }
}

pub type Tree = BTreeMap<LsaKey, Vertex>;

pub fn router_key(id: net::Ipv4Addr) -> LsaKey {
    LsaKey {
        ls_type: lsa::ROUTER_LSA_TYPE,
        ls_id: id,
        adv_rtr: id,
    }
}

/// equal cost ties go to routers
fn rank(key: &LsaKey) -> u8 {
    if key.ls_type == lsa::ROUTER_LSA_TYPE {
        0
    } else {
        1
    }
}

struct Edge<'a> {
    to: LsaKey,
    metric: u32,
    link: Option<&'a RouterLink>,
}

fn edges<'a>(v: &'a Vertex, networks: &BTreeMap<net::Ipv4Addr, LsaKey>) -> Vec<Edge<'a>> {
    match &v.lsa.body {
        Body::Router(r) => r
            .links
            .iter()
            .filter_map(|link| {
                let to = match link.link_type {
                    LINK_TYPE_POINT_TO_POINT => router_key(link.link_id),
                    LINK_TYPE_TRANSIT => *networks.get(&link.link_id)?,
                    _ => return None,
                };
                Some(Edge {
                    to,
                    metric: link.metric as u32,
                    link: Some(link),
                })
            })
            .collect(),
        Body::Network(n) => n
            .attached
            .iter()
            .map(|id| Edge {
                to: router_key(*id),
                metric: 0,
                link: None,
            })
            .collect(),
        _ => vec![],
    }
}

/// the far end lists a link back to `v`
fn links_back(w: &Lsa, v: &Vertex) -> bool {
    match (&w.body, v.is_router()) {
        (Body::Router(r), true) => r
            .links
            .iter()
            .any(|l| l.link_type == LINK_TYPE_POINT_TO_POINT && l.link_id == v.key.ls_id),
        (Body::Router(r), false) => r
            .links
            .iter()
            .any(|l| l.link_type == LINK_TYPE_TRANSIT && l.link_id == v.key.ls_id),
        (Body::Network(n), true) => n.attached.contains(&v.key.ls_id),
        _ => false,
    }
}

/// # next_hop
/// - the root: the link itself names our interface, the far end's link back names its address
/// - a network hanging off the root: the router's own link into that network names its address
/// - anything further away inherits from its parent
fn next_hop(area: &Area, root: &LsaKey, v: &Vertex, w: &Lsa, edge: &Edge) -> Option<Nexthop> {
    if v.key == *root {
        let link = edge.link?;
        let iface = area.interfaces.values().find(|i| i.addr == link.link_data)?;
        let addr = match &w.body {
            Body::Router(r) => {
                let back = r
                    .links
                    .iter()
                    .filter(|l| l.link_type == LINK_TYPE_POINT_TO_POINT && l.link_id == root.ls_id);
                let mut first = None;
                let mut same_subnet = None;
                for l in back {
                    first.get_or_insert(l.link_data);
                    if crate::util::apply_mask(l.link_data, iface.mask)
                        == crate::util::apply_mask(iface.addr, iface.mask)
                    {
                        same_subnet.get_or_insert(l.link_data);
                    }
                }
                same_subnet.or(first)?
            }
            _ => net::Ipv4Addr::UNSPECIFIED,
        };
        return Some(Nexthop {
            addr,
            ifname: iface.name.clone(),
        });
    }
    let inherited = v.nexthop.clone()?;
    if !v.is_router() && v.parent.as_ref() == Some(root) {
        let r = w.as_router()?;
        let link = r
            .links
            .iter()
            .find(|l| l.link_type == LINK_TYPE_TRANSIT && l.link_id == v.key.ls_id)?;
        return Some(Nexthop {
            addr: link.link_data,
            ifname: inherited.ifname,
        });
    }
    Some(inherited)
}

/// # spf
/// Dijkstra over the live router and network records of `area`, rooted at our own
/// router record. empty when we have not originated one yet.
pub fn spf(area: &Area, router_id: net::Ipv4Addr) -> Tree {
    let records: BTreeMap<LsaKey, &Lsa> = area
        .lsdb
        .live()
        .filter(|r| {
            matches!(
                r.key().ls_type,
                lsa::ROUTER_LSA_TYPE | lsa::NETWORK_LSA_TYPE
            )
        })
        .map(|r| (r.key(), &r.lsa))
        .collect();
    let networks: BTreeMap<net::Ipv4Addr, LsaKey> = records
        .keys()
        .filter(|k| k.ls_type == lsa::NETWORK_LSA_TYPE)
        .map(|k| (k.ls_id, *k))
        .collect();

    let root = router_key(router_id);
    let mut tree = Tree::new();
    let Some(root_lsa) = records.get(&root) else {
        return tree;
    };
    let mut candidates: BTreeMap<LsaKey, Vertex> = BTreeMap::new();
    let mut heap = BinaryHeap::new();
    candidates.insert(
        root,
        Vertex {
            key: root,
            lsa: (*root_lsa).clone(),
            cost: 0,
            nexthop: None,
            parent: None,
        },
    );
    heap.push(Reverse((0u32, rank(&root), root)));

    while let Some(Reverse((cost, _, key))) = heap.pop() {
        if tree.contains_key(&key) {
            continue;
        }
        // superseded heap entry
        if candidates.get(&key).map(|c| c.cost) != Some(cost) {
            continue;
        }
        let Some(v) = candidates.remove(&key) else {
            continue;
        };
        for edge in edges(&v, &networks) {
            if tree.contains_key(&edge.to) || edge.to == v.key {
                continue;
            }
            let Some(w) = records.get(&edge.to) else {
                continue;
            };
            if !links_back(w, &v) {
                trace!(from = %v.key, to = %edge.to, "no link back, skipped");
                continue;
            }
            let Some(nexthop) = next_hop(area, &root, &v, w, &edge) else {
                trace!(to = %edge.to, "next hop unresolved");
                continue;
            };
            let cost = v.cost + edge.metric;
            match candidates.get_mut(&edge.to) {
                Some(c) if c.cost <= cost => {}
                Some(c) => {
                    c.cost = cost;
                    c.parent = Some(v.key);
                    c.nexthop = Some(nexthop);
                    heap.push(Reverse((cost, rank(&edge.to), edge.to)));
                }
                None => {
                    candidates.insert(
                        edge.to,
                        Vertex {
                            key: edge.to,
                            lsa: (*w).clone(),
                            cost,
                            nexthop: Some(nexthop),
                            parent: Some(v.key),
                        },
                    );
                    heap.push(Reverse((cost, rank(&edge.to), edge.to)));
                }
            }
        }
        tree.insert(key, v);
    }
    tree
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{
        area::Lsdb,
        interface::{status::Status, NetworkType},
        lsa::{router::LINK_TYPE_STUB, InitialSequenceNumber, NetworkLsa, RouterLsa},
        rde::IfaceInfo,
    };

    pub fn addr(s: &str) -> net::Ipv4Addr {
        s.parse().unwrap()
    }

    pub fn rlink(link_type: u8, id: &str, data: &str, metric: u16) -> RouterLink {
        RouterLink {
            link_id: addr(id),
            link_data: addr(data),
            link_type,
            metric,
            tos: vec![],
        }
    }

    pub fn install(db: &mut Lsdb, ls_type: u8, ls_id: &str, adv: &str, body: Body) {
        let mut lsa = Lsa::new(
            ls_type,
            addr(ls_id),
            addr(adv),
            InitialSequenceNumber,
            crate::OPTION_E,
            body,
        );
        lsa.header.age = 1;
        db.install(lsa.to_be_bytes(), lsa);
    }

    pub fn router(db: &mut Lsdb, id: &str, flags: u8, links: Vec<RouterLink>) {
        install(
            db,
            lsa::ROUTER_LSA_TYPE,
            id,
            id,
            Body::Router(RouterLsa { flags, links }),
        );
    }

    pub fn backbone(ifaces: &[(&str, &str)]) -> Area {
        let mut area = Area::new(&crate::config::AreaConfig {
            id: net::Ipv4Addr::UNSPECIFIED,
            stub: false,
            stub_default_cost: 1,
            interfaces: vec![],
        });
        for (name, a) in ifaces {
            area.interfaces.insert(
                name.to_string(),
                IfaceInfo {
                    name: name.to_string(),
                    area: net::Ipv4Addr::UNSPECIFIED,
                    addr: addr(a),
                    mask: addr("255.255.255.0"),
                    dst: net::Ipv4Addr::UNSPECIFIED,
                    network_type: NetworkType::Broadcast,
                    state: Status::DR,
                    metric: 10,
                    dr: addr(a),
                    passive: false,
                },
            );
        }
        area
    }

    /// A(1.1.1.1) -- 10.0.0.0/24 (A is DR) -- B(2.2.2.2) -- p2p -- C(3.3.3.3)
    pub fn triangle_free_topology() -> Area {
        let mut area = backbone(&[("eth0", "10.0.0.1")]);
        let db = &mut area.lsdb;
        router(
            db,
            "1.1.1.1",
            0,
            vec![rlink(LINK_TYPE_TRANSIT, "10.0.0.1", "10.0.0.1", 10)],
        );
        router(
            db,
            "2.2.2.2",
            0,
            vec![
                rlink(LINK_TYPE_TRANSIT, "10.0.0.1", "10.0.0.2", 10),
                rlink(LINK_TYPE_POINT_TO_POINT, "3.3.3.3", "10.1.0.1", 5),
                rlink(LINK_TYPE_STUB, "192.168.2.1", "255.255.255.255", 0),
            ],
        );
        router(
            db,
            "3.3.3.3",
            lsa::router::ROUTER_FLAG_E,
            vec![
                rlink(LINK_TYPE_POINT_TO_POINT, "2.2.2.2", "10.1.0.2", 7),
                rlink(LINK_TYPE_STUB, "172.16.3.0", "255.255.255.0", 1),
            ],
        );
        install(
            db,
            lsa::NETWORK_LSA_TYPE,
            "10.0.0.1",
            "1.1.1.1",
            Body::Network(NetworkLsa {
                mask: addr("255.255.255.0"),
                attached: vec![addr("1.1.1.1"), addr("2.2.2.2")],
            }),
        );
        area
    }

    #[test]
    fn next_hops_follow_the_three_cases() {
        let area = triangle_free_topology();
        let tree = spf(&area, addr("1.1.1.1"));
        assert_eq!(tree.len(), 4);

        let net = &tree[&LsaKey {
            ls_type: lsa::NETWORK_LSA_TYPE,
            ls_id: addr("10.0.0.1"),
            adv_rtr: addr("1.1.1.1"),
        }];
        assert_eq!(net.cost, 10);
        assert_eq!(net.nexthop.as_ref().unwrap().addr, net::Ipv4Addr::UNSPECIFIED);

        // reached through a network attached to the root
        let b = &tree[&router_key(addr("2.2.2.2"))];
        assert_eq!(b.cost, 10);
        assert_eq!(
            b.nexthop,
            Some(Nexthop {
                addr: addr("10.0.0.2"),
                ifname: "eth0".into()
            })
        );

        // inherited, the metric of the far side of the p2p link does not count
        let c = &tree[&router_key(addr("3.3.3.3"))];
        assert_eq!(c.cost, 15);
        assert_eq!(c.nexthop, b.nexthop);
        assert_eq!(c.parent, Some(b.key));
    }

    #[test]
    fn one_sided_links_are_ignored() {
        let mut area = triangle_free_topology();
        // C forgets about B
        router(
            &mut area.lsdb,
            "3.3.3.3",
            0,
            vec![rlink(LINK_TYPE_STUB, "172.16.3.0", "255.255.255.0", 1)],
        );
        let tree = spf(&area, addr("1.1.1.1"));
        assert!(!tree.contains_key(&router_key(addr("3.3.3.3"))));
        assert!(tree.contains_key(&router_key(addr("2.2.2.2"))));
    }

    #[test]
    fn direct_point_to_point_next_hop() {
        let mut area = backbone(&[("ppp0", "10.1.0.1")]);
        router(
            &mut area.lsdb,
            "1.1.1.1",
            0,
            vec![rlink(LINK_TYPE_POINT_TO_POINT, "2.2.2.2", "10.1.0.1", 3)],
        );
        router(
            &mut area.lsdb,
            "2.2.2.2",
            0,
            vec![rlink(LINK_TYPE_POINT_TO_POINT, "1.1.1.1", "10.1.0.2", 9)],
        );
        let tree = spf(&area, addr("1.1.1.1"));
        let b = &tree[&router_key(addr("2.2.2.2"))];
        assert_eq!(b.cost, 3);
        assert_eq!(b.nexthop.as_ref().unwrap().addr, addr("10.1.0.2"));
        assert_eq!(b.nexthop.as_ref().unwrap().ifname, "ppp0");
    }

    #[test]
    fn no_root_no_tree() {
        let area = triangle_free_topology();
        assert!(spf(&area, addr("9.9.9.9")).is_empty());
    }
}
