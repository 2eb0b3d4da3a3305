//! route table passes: intra-area from each area's tree, then inter-area from
//! summaries, then AS externals. each pass only trusts routes of the passes before it.

use std::net;

use super::{
    graph::{Nexthop, Tree},
    PathType, Route, RouteKey, RouteTable,
};
use crate::{
    area::{Area, Lsdb},
    lsa::{self, router::LINK_TYPE_STUB, Body, LSInfinity},
};

fn route(
    key: RouteKey,
    path_type: PathType,
    cost: u32,
    area: net::Ipv4Addr,
    adv_rtr: net::Ipv4Addr,
    nexthop: Option<&Nexthop>,
) -> Route {
    let (addr, ifname) = match nexthop {
        Some(n) => (n.addr, Some(n.ifname.clone())),
        None => (net::Ipv4Addr::UNSPECIFIED, None),
    };
    Route {
        key,
        path_type,
        cost,
        cost2: 0,
        area,
        adv_rtr,
        nexthop: addr,
        ifname,
        connected: addr.is_unspecified(),
        invalid: false,
    }
}

/// # intra_area
/// transit networks, stub networks and border or boundary routers found on the tree
pub fn intra_area(table: &mut RouteTable, area: &Area, tree: &Tree, router_id: net::Ipv4Addr) {
    for v in tree.values() {
        let is_root = v.key.ls_id == router_id && v.is_router();
        match &v.lsa.body {
            Body::Router(r) => {
                let flags = lsa::router::ROUTER_FLAG_B | lsa::router::ROUTER_FLAG_E;
                if !is_root && r.flags & flags != 0 {
                    let abr = route(
                        RouteKey::router(v.key.ls_id),
                        PathType::IntraArea,
                        v.cost,
                        area.id,
                        v.key.adv_rtr,
                        v.nexthop.as_ref(),
                    );
                    table.update_border(abr.clone());
                    table.update(abr);
                }
                for link in r.links.iter().filter(|l| l.link_type == LINK_TYPE_STUB) {
                    let key = RouteKey::network(link.link_id, link.link_data);
                    let nexthop = if is_root {
                        // our own stub: the interface holding the prefix
                        area.interfaces
                            .values()
                            .find(|i| key.contains(i.addr))
                            .map(|i| Nexthop {
                                addr: net::Ipv4Addr::UNSPECIFIED,
                                ifname: i.name.clone(),
                            })
                    } else {
                        v.nexthop.clone()
                    };
                    table.update(route(
                        key,
                        PathType::IntraArea,
                        v.cost + link.metric as u32,
                        area.id,
                        v.key.adv_rtr,
                        nexthop.as_ref(),
                    ));
                }
            }
            Body::Network(n) => {
                table.update(route(
                    RouteKey::network(v.key.ls_id, n.mask),
                    PathType::IntraArea,
                    v.cost,
                    area.id,
                    v.key.adv_rtr,
                    v.nexthop.as_ref(),
                ));
            }
            _ => {}
        }
    }
}

/// # inter_area
/// summaries of `area`, each behind the route to its border router computed in
/// that same area. a border router itself only listens to the backbone.
pub fn inter_area(table: &mut RouteTable, area: &Area, router_id: net::Ipv4Addr, border: bool) {
    if border && !area.is_backbone() {
        return;
    }
    let mut found = Vec::new();
    for record in area.lsdb.live() {
        let header = &record.lsa.header;
        if !matches!(
            header.ls_type,
            lsa::SUMMARY_NETWORK_LSA_TYPE | lsa::SUMMARY_ROUTER_LSA_TYPE
        ) || header.adv_rtr == router_id
        {
            continue;
        }
        let Some(summary) = record.lsa.as_summary() else {
            continue;
        };
        if summary.metric >= LSInfinity {
            continue;
        }
        let Some(abr) = table.border_router(area.id, header.adv_rtr) else {
            continue;
        };
        let key = if header.ls_type == lsa::SUMMARY_NETWORK_LSA_TYPE {
            RouteKey::network(header.ls_id, summary.mask)
        } else {
            RouteKey::router(header.ls_id)
        };
        found.push(Route {
            key,
            path_type: PathType::InterArea,
            cost: abr.cost + summary.metric,
            cost2: 0,
            area: area.id,
            adv_rtr: header.adv_rtr,
            nexthop: abr.nexthop,
            ifname: abr.ifname.clone(),
            connected: false,
            invalid: false,
        });
    }
    for route in found {
        table.update(route);
    }
}

/// # external
/// AS external records, resolved through the forwarding address when one is set,
/// otherwise through the route to the advertising boundary router
pub fn external(table: &mut RouteTable, externals: &Lsdb, router_id: net::Ipv4Addr) {
    let mut found = Vec::new();
    for record in externals.live() {
        let header = &record.lsa.header;
        if header.adv_rtr == router_id {
            continue;
        }
        let Some(ext) = record.lsa.as_external() else {
            continue;
        };
        if ext.metric >= LSInfinity {
            continue;
        }
        let Some(asbr) = table.get(&RouteKey::router(header.adv_rtr)) else {
            continue;
        };
        let (dist, nexthop, ifname, area) = if ext.forwarding.is_unspecified() {
            (asbr.cost, asbr.nexthop, asbr.ifname.clone(), asbr.area)
        } else {
            let Some(via) = table.lookup(ext.forwarding) else {
                continue;
            };
            let nexthop = if via.connected {
                ext.forwarding
            } else {
                via.nexthop
            };
            (via.cost, nexthop, via.ifname.clone(), via.area)
        };
        let (path_type, cost, cost2) = if ext.type2 {
            (PathType::Type2External, dist, ext.metric)
        } else {
            (PathType::Type1External, dist + ext.metric, 0)
        };
        found.push(Route {
            key: RouteKey::network(header.ls_id, ext.mask),
            path_type,
            cost,
            cost2,
            area,
            adv_rtr: header.adv_rtr,
            nexthop,
            ifname,
            connected: false,
            invalid: false,
        });
    }
    for route in found {
        table.update(route);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        lsa::{ExternalLsa, SummaryLsa},
        rtable::graph::{
            self,
            tests::{addr, backbone, install, rlink, router, triangle_free_topology},
        },
    };
    use crate::lsa::{
        router::{LINK_TYPE_POINT_TO_POINT, LINK_TYPE_TRANSIT, ROUTER_FLAG_B},
        NetworkLsa,
    };

    fn computed() -> (RouteTable, Area) {
        let area = triangle_free_topology();
        let tree = graph::spf(&area, addr("1.1.1.1"));
        let mut table = RouteTable::new();
        intra_area(&mut table, &area, &tree, addr("1.1.1.1"));
        (table, area)
    }

    #[test]
    fn stub_and_transit_routes() {
        let (table, _) = computed();
        let lo = table
            .get(&RouteKey::network(addr("192.168.2.1"), addr("255.255.255.255")))
            .unwrap();
        assert_eq!(lo.cost, 10);
        assert_eq!(lo.nexthop, addr("10.0.0.2"));
        assert_eq!(lo.path_type, PathType::IntraArea);

        let segment = table
            .get(&RouteKey::network(addr("10.0.0.0"), addr("255.255.255.0")))
            .unwrap();
        assert!(segment.connected);
        assert_eq!(segment.ifname.as_deref(), Some("eth0"));

        let c_stub = table
            .get(&RouteKey::network(addr("172.16.3.0"), addr("255.255.255.0")))
            .unwrap();
        assert_eq!(c_stub.cost, 16);
        // only C advertises a boundary flag
        assert!(table.get(&RouteKey::router(addr("3.3.3.3"))).is_some());
        assert!(table.get(&RouteKey::router(addr("2.2.2.2"))).is_none());
    }

    #[test]
    fn summaries_need_a_border_router_route() {
        let (mut table, mut area) = computed();
        let summary = |metric| {
            Body::Summary(SummaryLsa {
                mask: addr("255.255.0.0"),
                metric,
            })
        };
        install(
            &mut area.lsdb,
            lsa::SUMMARY_NETWORK_LSA_TYPE,
            "10.20.0.0",
            "3.3.3.3",
            summary(4),
        );
        install(
            &mut area.lsdb,
            lsa::SUMMARY_NETWORK_LSA_TYPE,
            "10.30.0.0",
            "2.2.2.2",
            summary(4),
        );
        install(
            &mut area.lsdb,
            lsa::SUMMARY_NETWORK_LSA_TYPE,
            "10.40.0.0",
            "3.3.3.3",
            summary(LSInfinity),
        );
        inter_area(&mut table, &area, addr("1.1.1.1"), false);
        let via_c = table
            .get(&RouteKey::network(addr("10.20.0.0"), addr("255.255.0.0")))
            .unwrap();
        assert_eq!(via_c.cost, 19);
        assert_eq!(via_c.path_type, PathType::InterArea);
        assert!(table
            .get(&RouteKey::network(addr("10.30.0.0"), addr("255.255.0.0")))
            .is_none());
        assert!(table
            .get(&RouteKey::network(addr("10.40.0.0"), addr("255.255.0.0")))
            .is_none());
    }

    #[test]
    fn external_types_and_forwarding() {
        let (mut table, _) = computed();
        let mut externals = Lsdb::new();
        let ext = |type2, forwarding: &str| {
            Body::External(ExternalLsa {
                mask: addr("255.255.0.0"),
                type2,
                metric: 20,
                forwarding: addr(forwarding),
                tag: 0,
            })
        };
        install(
            &mut externals,
            lsa::AS_EXTERNAL_LSA_TYPE,
            "10.50.0.0",
            "3.3.3.3",
            ext(true, "0.0.0.0"),
        );
        install(
            &mut externals,
            lsa::AS_EXTERNAL_LSA_TYPE,
            "10.60.0.0",
            "3.3.3.3",
            ext(false, "0.0.0.0"),
        );
        // forwarding address on our own segment
        install(
            &mut externals,
            lsa::AS_EXTERNAL_LSA_TYPE,
            "10.70.0.0",
            "3.3.3.3",
            ext(false, "10.0.0.9"),
        );
        external(&mut table, &externals, addr("1.1.1.1"));

        let t2 = table
            .get(&RouteKey::network(addr("10.50.0.0"), addr("255.255.0.0")))
            .unwrap();
        assert_eq!((t2.path_type, t2.cost, t2.cost2), (PathType::Type2External, 15, 20));
        let t1 = table
            .get(&RouteKey::network(addr("10.60.0.0"), addr("255.255.0.0")))
            .unwrap();
        assert_eq!((t1.path_type, t1.cost), (PathType::Type1External, 35));
        assert_eq!(t1.nexthop, addr("10.0.0.2"));
        let fwd = table
            .get(&RouteKey::network(addr("10.70.0.0"), addr("255.255.0.0")))
            .unwrap();
        assert_eq!(fwd.nexthop, addr("10.0.0.9"));
        assert_eq!(fwd.cost, 30);
    }

    /// 9.9.9.9 borders both areas we are in and is closer through area 0.0.0.1
    #[test]
    fn backbone_summaries_use_the_backbone_route_to_their_border_router() {
        let mut zero = backbone(&[("eth0", "10.0.0.1")]);
        router(
            &mut zero.lsdb,
            "1.1.1.1",
            ROUTER_FLAG_B,
            vec![rlink(LINK_TYPE_TRANSIT, "10.0.0.1", "10.0.0.1", 20)],
        );
        router(
            &mut zero.lsdb,
            "9.9.9.9",
            ROUTER_FLAG_B,
            vec![rlink(LINK_TYPE_TRANSIT, "10.0.0.1", "10.0.0.9", 20)],
        );
        install(
            &mut zero.lsdb,
            lsa::NETWORK_LSA_TYPE,
            "10.0.0.1",
            "1.1.1.1",
            Body::Network(NetworkLsa {
                mask: addr("255.255.255.0"),
                attached: vec![addr("1.1.1.1"), addr("9.9.9.9")],
            }),
        );
        install(
            &mut zero.lsdb,
            lsa::SUMMARY_NETWORK_LSA_TYPE,
            "10.80.0.0",
            "9.9.9.9",
            Body::Summary(SummaryLsa {
                mask: addr("255.255.0.0"),
                metric: 3,
            }),
        );

        let mut one = backbone(&[("eth1", "10.1.0.1")]);
        one.id = addr("0.0.0.1");
        router(
            &mut one.lsdb,
            "1.1.1.1",
            ROUTER_FLAG_B,
            vec![rlink(LINK_TYPE_POINT_TO_POINT, "9.9.9.9", "10.1.0.1", 5)],
        );
        router(
            &mut one.lsdb,
            "9.9.9.9",
            ROUTER_FLAG_B,
            vec![rlink(LINK_TYPE_POINT_TO_POINT, "1.1.1.1", "10.1.0.2", 5)],
        );

        let me = addr("1.1.1.1");
        let mut table = RouteTable::new();
        for area in [&zero, &one] {
            intra_area(&mut table, area, &graph::spf(area, me), me);
        }
        let abr = table.get(&RouteKey::router(addr("9.9.9.9"))).unwrap();
        assert_eq!((abr.area, abr.cost), (addr("0.0.0.1"), 5));

        for area in [&zero, &one] {
            inter_area(&mut table, area, me, true);
        }
        let summary = table
            .get(&RouteKey::network(addr("10.80.0.0"), addr("255.255.0.0")))
            .unwrap();
        assert_eq!(summary.path_type, PathType::InterArea);
        assert_eq!(summary.area, addr("0.0.0.0"));
        assert_eq!(summary.cost, 23);
        assert_eq!(summary.nexthop, addr("10.0.0.9"));
        assert_eq!(summary.ifname.as_deref(), Some("eth0"));
    }
}
