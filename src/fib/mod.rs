//! the forwarding table boundary. computed routes go out through a [`ForwardingSink`],
//! kernel routes and link state come back in for redistribution and interface events.
pub mod link;

use std::{collections::BTreeMap, fmt, io, net, process::Command};

use ipnet::Ipv4Net;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::rde::RdeMessage;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RouteOrigin {
    Connected,
    Static,
    Kernel,
    Ospf,
}

impl fmt::Display for RouteOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RouteOrigin::Connected => "connected",
            RouteOrigin::Static => "static",
            RouteOrigin::Kernel => "kernel",
            RouteOrigin::Ospf => "ospf",
        };
        write!(f, "{name}")
    }
}

/// one forwarding entry. an unspecified next hop means directly attached.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Kroute {
    pub prefix: Ipv4Net,
    pub nexthop: net::Ipv4Addr,
    pub ifname: Option<String>,
    pub metric: u32,
    pub origin: RouteOrigin,
}

/// what the forwarding side reports to the route decision engine
#[derive(Clone, Debug, PartialEq)]
pub enum KrouteEvent {
    Add(Kroute),
    Remove(Kroute),
}

#[derive(Debug)]
pub enum FibMessage {
    Change(Kroute),
    Delete(Kroute),
    Couple,
    Decouple,
    Show(oneshot::Sender<Vec<Kroute>>),
}

pub trait ForwardingSink: Send + 'static {
    fn apply(&mut self, route: &Kroute) -> io::Result<()>;
    fn withdraw(&mut self, route: &Kroute) -> io::Result<()>;
    /// what the table held before we started
    fn snapshot(&mut self) -> io::Result<Vec<Kroute>>;
}

/// # MemorySink
/// keeps the table in memory and logs every change. used when no kernel table
/// should be touched.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub routes: BTreeMap<Ipv4Net, Kroute>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ForwardingSink for MemorySink {
    fn apply(&mut self, route: &Kroute) -> io::Result<()> {
        info!(prefix = %route.prefix, nexthop = %route.nexthop, "route installed");
        self.routes.insert(route.prefix, route.clone());
        Ok(())
    }

    fn withdraw(&mut self, route: &Kroute) -> io::Result<()> {
        info!(prefix = %route.prefix, "route withdrawn");
        self.routes.remove(&route.prefix);
        Ok(())
    }

    fn snapshot(&mut self) -> io::Result<Vec<Kroute>> {
        Ok(self.routes.values().cloned().collect())
    }
}

/// # IpCommandSink
/// drives the kernel table through iproute2. our routes carry `proto ospf`.
#[derive(Debug, Default)]
pub struct IpCommandSink;

fn run_ip(args: &[String]) -> io::Result<String> {
    let output = Command::new("ip").args(args).output()?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(io::Error::other(stderr.trim().to_string()));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

impl ForwardingSink for IpCommandSink {
    fn apply(&mut self, route: &Kroute) -> io::Result<()> {
        let mut args = vec!["route".into(), "replace".into(), route.prefix.to_string()];
        if !route.nexthop.is_unspecified() {
            args.extend(["via".into(), route.nexthop.to_string()]);
        }
        if let Some(dev) = &route.ifname {
            args.extend(["dev".into(), dev.clone()]);
        }
        args.extend(["proto".into(), "ospf".into()]);
        args.extend(["metric".into(), route.metric.to_string()]);
        run_ip(&args).map(|_| ())
    }

    fn withdraw(&mut self, route: &Kroute) -> io::Result<()> {
        let args = vec![
            "route".into(),
            "del".into(),
            route.prefix.to_string(),
            "proto".into(),
            "ospf".into(),
        ];
        run_ip(&args).map(|_| ())
    }

    fn snapshot(&mut self) -> io::Result<Vec<Kroute>> {
        let out = run_ip(&["-4".into(), "route".into(), "show".into()])?;
        Ok(out.lines().filter_map(parse_route_line).collect())
    }
}

/// one line of `ip -4 route show`
pub fn parse_route_line(line: &str) -> Option<Kroute> {
    let mut words = line.split_whitespace();
    let prefix = match words.next()? {
        "default" => Ipv4Net::new(net::Ipv4Addr::UNSPECIFIED, 0).ok()?,
        p if p.contains('/') => p.parse().ok()?,
        p => Ipv4Net::new(p.parse().ok()?, 32).ok()?,
    };
    let mut route = Kroute {
        prefix,
        nexthop: net::Ipv4Addr::UNSPECIFIED,
        ifname: None,
        metric: 0,
        origin: RouteOrigin::Kernel,
    };
    while let Some(word) = words.next() {
        match word {
            "via" => route.nexthop = words.next()?.parse().ok()?,
            "dev" => route.ifname = words.next().map(str::to_string),
            "metric" => route.metric = words.next()?.parse().ok()?,
            "proto" => {
                route.origin = match words.next()? {
                    "kernel" => RouteOrigin::Connected,
                    "static" | "boot" => RouteOrigin::Static,
                    "ospf" | "188" => RouteOrigin::Ospf,
                    _ => RouteOrigin::Kernel,
                }
            }
            _ => {}
        }
    }
    Some(route)
}

/// # Fib
/// the forwarding actor. while decoupled, changes are remembered but not applied.
pub struct Fib<S: ForwardingSink> {
    sink: S,
    coupled: bool,
    routes: BTreeMap<Ipv4Net, Kroute>,
    rde_tx: mpsc::UnboundedSender<RdeMessage>,
}

impl<S: ForwardingSink> Fib<S> {
    pub fn new(sink: S, coupled: bool, rde_tx: mpsc::UnboundedSender<RdeMessage>) -> Self {
        Self {
            sink,
            coupled,
            routes: BTreeMap::new(),
            rde_tx,
        }
    }

    /// report the existing table, our own leftovers are dropped
    pub fn load_snapshot(&mut self) {
        let existing = match self.sink.snapshot() {
            Ok(existing) => existing,
            Err(err) => {
                warn!(%err, "cannot read the forwarding table");
                return;
            }
        };
        for route in existing {
            if route.origin == RouteOrigin::Ospf {
                if let Err(err) = self.sink.withdraw(&route) {
                    debug!(prefix = %route.prefix, %err, "stale route not removed");
                }
                continue;
            }
            let _ = self.rde_tx.send(RdeMessage::Kroute(KrouteEvent::Add(route)));
        }
    }

    pub fn handle(&mut self, msg: FibMessage) {
        match msg {
            FibMessage::Change(route) => {
                if self.coupled {
                    if let Err(err) = self.sink.apply(&route) {
                        warn!(prefix = %route.prefix, %err, "route change failed");
                    }
                }
                self.routes.insert(route.prefix, route);
            }
            FibMessage::Delete(route) => {
                if self.routes.remove(&route.prefix).is_some() && self.coupled {
                    if let Err(err) = self.sink.withdraw(&route) {
                        warn!(prefix = %route.prefix, %err, "route delete failed");
                    }
                }
            }
            FibMessage::Couple => {
                if self.coupled {
                    return;
                }
                self.coupled = true;
                info!(routes = self.routes.len(), "forwarding table coupled");
                for route in self.routes.values() {
                    if let Err(err) = self.sink.apply(route) {
                        warn!(prefix = %route.prefix, %err, "route change failed");
                    }
                }
            }
            FibMessage::Decouple => {
                if !self.coupled {
                    return;
                }
                self.coupled = false;
                info!("forwarding table decoupled");
                for route in self.routes.values() {
                    if let Err(err) = self.sink.withdraw(route) {
                        warn!(prefix = %route.prefix, %err, "route delete failed");
                    }
                }
            }
            FibMessage::Show(reply) => {
                let _ = reply.send(self.routes.values().cloned().collect());
            }
        }
    }

    pub fn is_coupled(&self) -> bool {
        self.coupled
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub async fn run(mut self, mut rx: mpsc::UnboundedReceiver<FibMessage>) {
        self.load_snapshot();
        while let Some(msg) = rx.recv().await {
            self.handle(msg);
        }
        if self.coupled {
            for route in self.routes.values() {
                let _ = self.sink.withdraw(route);
            }
        }
        info!("forwarding actor stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kroute(prefix: &str, nexthop: &str) -> Kroute {
        Kroute {
            prefix: prefix.parse().unwrap(),
            nexthop: nexthop.parse().unwrap(),
            ifname: Some("eth0".into()),
            metric: 10,
            origin: RouteOrigin::Ospf,
        }
    }

    #[test]
    fn parse_ip_route_output() {
        let r = parse_route_line("default via 192.168.1.1 dev eth0 proto static metric 100").unwrap();
        assert_eq!(r.prefix, "0.0.0.0/0".parse::<Ipv4Net>().unwrap());
        assert_eq!(r.nexthop, "192.168.1.1".parse::<net::Ipv4Addr>().unwrap());
        assert_eq!(r.metric, 100);
        assert_eq!(r.origin, RouteOrigin::Static);

        let r = parse_route_line("10.0.0.0/24 dev eth1 proto kernel scope link src 10.0.0.1").unwrap();
        assert_eq!(r.origin, RouteOrigin::Connected);
        assert_eq!(r.ifname.as_deref(), Some("eth1"));
        assert!(r.nexthop.is_unspecified());

        let r = parse_route_line("172.16.0.0/16 via 10.0.0.2 dev eth1 proto ospf metric 20").unwrap();
        assert_eq!(r.origin, RouteOrigin::Ospf);
        assert!(parse_route_line("").is_none());
    }

    #[test]
    fn decoupled_changes_wait() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut fib = Fib::new(MemorySink::new(), false, tx);
        fib.handle(FibMessage::Change(kroute("10.1.0.0/16", "10.0.0.2")));
        assert!(fib.sink().routes.is_empty());

        fib.handle(FibMessage::Couple);
        assert_eq!(fib.sink().routes.len(), 1);
        fib.handle(FibMessage::Delete(kroute("10.1.0.0/16", "10.0.0.2")));
        assert!(fib.sink().routes.is_empty());

        fib.handle(FibMessage::Change(kroute("10.2.0.0/16", "10.0.0.2")));
        fib.handle(FibMessage::Decouple);
        assert!(fib.sink().routes.is_empty());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn snapshot_reports_foreign_routes_only() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut sink = MemorySink::new();
        let stale = kroute("10.9.0.0/16", "10.0.0.2");
        sink.routes.insert(stale.prefix, stale);
        let mut foreign = kroute("0.0.0.0/0", "10.0.0.254");
        foreign.origin = RouteOrigin::Static;
        sink.routes.insert(foreign.prefix, foreign.clone());

        let mut fib = Fib::new(sink, true, tx);
        fib.load_snapshot();
        assert_eq!(fib.sink().routes.len(), 1);
        match rx.try_recv() {
            Ok(RdeMessage::Kroute(KrouteEvent::Add(route))) => assert_eq!(route, foreign),
            other => panic!("unexpected {other:?}"),
        }
        assert!(rx.try_recv().is_err());
    }
}
