//! the routing table. every computation marks all routes invalid, re-admits what it
//! still finds and sweeps the rest.
pub mod calc;
pub mod graph;

use std::{cmp::Ordering, collections::BTreeMap, fmt, net};

use crate::util;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DestinationType {
    Network,
    Router,
}

/// declaration order is preference order
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PathType {
    IntraArea,
    InterArea,
    Type1External,
    Type2External,
}

impl fmt::Display for PathType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PathType::IntraArea => "intra",
            PathType::InterArea => "inter",
            PathType::Type1External => "ext1",
            PathType::Type2External => "ext2",
        };
        write!(f, "{name}")
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RouteKey {
    pub prefix: net::Ipv4Addr,
    pub prefixlen: u8,
    pub dest_type: DestinationType,
}

impl RouteKey {
    pub fn network(addr: net::Ipv4Addr, mask: net::Ipv4Addr) -> Self {
        Self {
            prefix: util::apply_mask(addr, mask),
            prefixlen: util::mask_to_prefixlen(mask),
            dest_type: DestinationType::Network,
        }
    }

    pub fn router(id: net::Ipv4Addr) -> Self {
        Self {
            prefix: id,
            prefixlen: 32,
            dest_type: DestinationType::Router,
        }
    }

    pub fn mask(&self) -> net::Ipv4Addr {
        util::prefixlen_to_mask(self.prefixlen)
    }

    pub fn contains(&self, addr: net::Ipv4Addr) -> bool {
        util::apply_mask(addr, self.mask()) == self.prefix
    }
}

impl fmt::Display for RouteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.prefix, self.prefixlen)
    }
}

/// # Route
/// - nexthop : unspecified for directly attached destinations
/// - cost2 : the external metric of a type 2 external path
/// - connected : reached over one of our own interfaces without a gateway
#[derive(Clone, Debug, PartialEq)]
pub struct Route {
    pub key: RouteKey,
    pub path_type: PathType,
    pub cost: u32,
    pub cost2: u32,
    pub area: net::Ipv4Addr,
    pub adv_rtr: net::Ipv4Addr,
    pub nexthop: net::Ipv4Addr,
    pub ifname: Option<String>,
    pub connected: bool,
    pub invalid: bool,
}

impl Route {
    /// rank first, then cost. type 2 externals compare their external metric first.
    pub fn preference(&self, other: &Route) -> Ordering {
        match self.path_type.cmp(&other.path_type) {
            Ordering::Equal => {}
            other => return other,
        }
        if self.path_type == PathType::Type2External {
            (self.cost2, self.cost).cmp(&(other.cost2, other.cost))
        } else {
            self.cost.cmp(&other.cost)
        }
    }

    /// same forwarding behavior, what the forwarding table cares about
    pub fn same_forwarding(&self, other: &Route) -> bool {
        self.nexthop == other.nexthop && self.ifname == other.ifname && self.cost == other.cost
    }
}

/// # RouteTable
/// - routes : the best route per destination
/// - border : intra-area routes to border and boundary routers, kept per (area, router id)
///   for the computation that reads summaries of that area
#[derive(Debug, Default)]
pub struct RouteTable {
    routes: BTreeMap<RouteKey, Route>,
    border: BTreeMap<(net::Ipv4Addr, net::Ipv4Addr), Route>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// start of a computation
    pub fn invalidate(&mut self) {
        for route in self.routes.values_mut() {
            route.invalid = true;
        }
        self.border.clear();
    }

    /// remember the intra-area route to a border or boundary router inside its own area
    pub fn update_border(&mut self, route: Route) {
        let key = (route.area, route.key.prefix);
        match self.border.get(&key) {
            Some(old) if route.preference(old) != Ordering::Less => {}
            _ => {
                self.border.insert(key, route);
            }
        }
    }

    /// the route to router `id` computed inside `area`
    pub fn border_router(&self, area: net::Ipv4Addr, id: net::Ipv4Addr) -> Option<&Route> {
        self.border.get(&(area, id))
    }

    /// # update
    /// admit a candidate. it replaces a route left over from the previous
    /// computation, or a valid one it is strictly preferred to.
    pub fn update(&mut self, route: Route) -> bool {
        match self.routes.get(&route.key) {
            Some(old) if !old.invalid && route.preference(old) != Ordering::Less => false,
            _ => {
                self.routes.insert(route.key, Route {
                    invalid: false,
                    ..route
                });
                true
            }
        }
    }

    /// end of a computation: drop what was not re-admitted
    pub fn sweep(&mut self) -> Vec<Route> {
        let stale: Vec<RouteKey> = self
            .routes
            .values()
            .filter(|r| r.invalid)
            .map(|r| r.key)
            .collect();
        stale
            .into_iter()
            .filter_map(|key| self.routes.remove(&key))
            .collect()
    }

    pub fn get(&self, key: &RouteKey) -> Option<&Route> {
        self.routes.get(key).filter(|r| !r.invalid)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Route> {
        self.routes.values().filter(|r| !r.invalid)
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// # lookup
    /// longest matching valid network route among intra and inter-area ones
    pub fn lookup(&self, addr: net::Ipv4Addr) -> Option<&Route> {
        self.iter()
            .filter(|r| r.key.dest_type == DestinationType::Network)
            .filter(|r| r.path_type <= PathType::InterArea)
            .filter(|r| r.key.contains(addr))
            .max_by_key(|r| r.key.prefixlen)
    }

    /// routes the forwarding table should carry: networks reached through a gateway
    /// or an interface we do not own the prefix of
    pub fn forwarding(&self) -> BTreeMap<RouteKey, Route> {
        self.iter()
            .filter(|r| r.key.dest_type == DestinationType::Network && !r.connected)
            .map(|r| (r.key, r.clone()))
            .collect()
    }
}

/// what changed in the forwarding set between two computations
#[derive(Debug, Default, PartialEq)]
pub struct FibDiff {
    pub changed: Vec<Route>,
    pub removed: Vec<Route>,
}

pub fn fib_diff(before: &BTreeMap<RouteKey, Route>, after: &BTreeMap<RouteKey, Route>) -> FibDiff {
    let mut diff = FibDiff::default();
    for (key, route) in after {
        match before.get(key) {
            Some(old) if old.same_forwarding(route) => {}
            _ => diff.changed.push(route.clone()),
        }
    }
    for (key, route) in before {
        if !after.contains_key(key) {
            diff.removed.push(route.clone());
        }
    }
    diff
}
