//! link state of system interfaces, polled. feeds interface up/down to the
//! interface engine and connected prefixes to the route decision engine.

use std::{collections::BTreeMap, net, time::Duration};

use ipnet::Ipv4Net;
use pnet::datalink;
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::{Kroute, KrouteEvent, RouteOrigin};
use crate::{engine::EngineEvent, rde::RdeMessage};

pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LinkState {
    pub up: bool,
    pub loopback: bool,
    pub prefixes: Vec<Ipv4Net>,
}

pub fn poll() -> BTreeMap<String, LinkState> {
    datalink::interfaces()
        .into_iter()
        .map(|iface| {
            let prefixes = iface
                .ips
                .iter()
                .filter_map(|ip| match ip.ip() {
                    net::IpAddr::V4(addr) => Ipv4Net::new(addr, ip.prefix()).ok(),
                    net::IpAddr::V6(_) => None,
                })
                .collect();
            let state = LinkState {
                up: iface.is_up(),
                loopback: iface.is_loopback(),
                prefixes,
            };
            (iface.name, state)
        })
        .collect()
}

fn connected(ifname: &str, prefix: &Ipv4Net) -> Kroute {
    Kroute {
        prefix: prefix.trunc(),
        nexthop: net::Ipv4Addr::UNSPECIFIED,
        ifname: Some(ifname.to_string()),
        metric: 0,
        origin: RouteOrigin::Connected,
    }
}

/// # changes
/// link events and connected route changes between two polls
pub fn changes(
    old: &BTreeMap<String, LinkState>,
    new: &BTreeMap<String, LinkState>,
) -> (Vec<EngineEvent>, Vec<KrouteEvent>) {
    let mut links = Vec::new();
    let mut routes = Vec::new();
    let none = LinkState::default();
    for (name, state) in new {
        let before = old.get(name).unwrap_or(&none);
        if !old.contains_key(name) || before.up != state.up || before.loopback != state.loopback {
            links.push(EngineEvent::Link {
                ifname: name.clone(),
                up: state.up,
                loopback: state.loopback,
            });
        }
        let had: &[Ipv4Net] = if before.up { &before.prefixes } else { &[] };
        let has: &[Ipv4Net] = if state.up { &state.prefixes } else { &[] };
        for prefix in has.iter().filter(|p| !had.contains(p)) {
            routes.push(KrouteEvent::Add(connected(name, prefix)));
        }
        for prefix in had.iter().filter(|p| !has.contains(p)) {
            routes.push(KrouteEvent::Remove(connected(name, prefix)));
        }
    }
    for (name, state) in old.iter().filter(|(name, _)| !new.contains_key(*name)) {
        links.push(EngineEvent::Link {
            ifname: name.clone(),
            up: false,
            loopback: false,
        });
        if state.up {
            for prefix in &state.prefixes {
                routes.push(KrouteEvent::Remove(connected(name, prefix)));
            }
        }
    }
    (links, routes)
}

/// # run
/// poll forever, until either receiver goes away
pub async fn run(
    engine_tx: mpsc::UnboundedSender<EngineEvent>,
    rde_tx: mpsc::UnboundedSender<RdeMessage>,
) {
    let mut known = BTreeMap::new();
    let mut ticker = tokio::time::interval(POLL_INTERVAL);
    loop {
        ticker.tick().await;
        let current = poll();
        let (links, routes) = changes(&known, &current);
        for event in links {
            if let EngineEvent::Link { ifname, up, .. } = &event {
                info!(iface = %ifname, up, "link state changed");
            }
            if engine_tx.send(event).is_err() {
                return;
            }
        }
        for event in routes {
            debug!(?event, "connected route");
            if rde_tx.send(RdeMessage::Kroute(event)).is_err() {
                return;
            }
        }
        known = current;
    }
}
