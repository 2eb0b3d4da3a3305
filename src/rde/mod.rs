//! the route decision engine: owns the link state databases, decides which instance
//! of a record wins, originates our own records, runs the route computation and feeds
//! the forwarding table. the interface engine asks, this actor decides.
mod origin;
pub mod schedule;

use std::{
    cmp::Ordering,
    collections::BTreeMap,
    net,
    time::Duration,
};

use ipnet::Ipv4Net;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

use crate::{
    area::{
        lsdb::{self, Lsdb},
        Area, RdeNeighbor,
    },
    config::Config,
    control::{DatabaseEntry, RdeRequest},
    engine::{EngineEvent, EngineMessage},
    fib::{FibMessage, Kroute, KrouteEvent, RouteOrigin},
    interface::{self, NetworkType},
    lsa::{self, LsaKey, MaxSequenceNumber, MinLSArrival},
    neighbor::status::Status as NbrStatus,
    rtable::{self, calc, graph, Route, RouteTable},
    util::Timer,
};
use schedule::SpfScheduler;

/// headers per snapshot message
const SNAPSHOT_CHUNK: usize = 512;

/// what the interface engine tells the route decision engine about one interface
#[derive(Debug, Clone, PartialEq)]
pub struct IfaceInfo {
    pub name: String,
    pub area: net::Ipv4Addr,
    pub addr: net::Ipv4Addr,
    pub mask: net::Ipv4Addr,
    pub dst: net::Ipv4Addr,
    pub network_type: NetworkType,
    pub state: interface::status::Status,
    pub metric: u16,
    pub dr: net::Ipv4Addr,
    pub passive: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RdeTimer {
    /// refresh, expiry or deferred origination of one record. area None for AS wide.
    Lsa {
        area: Option<net::Ipv4Addr>,
        key: LsaKey,
    },
    SpfDelay,
    SpfHold,
}

#[derive(Debug)]
pub enum RdeMessage {
    NeighborUp {
        peerid: u32,
        area: net::Ipv4Addr,
        ifname: String,
        id: net::Ipv4Addr,
        addr: net::Ipv4Addr,
    },
    NeighborState {
        peerid: u32,
        state: NbrStatus,
    },
    NeighborDown {
        peerid: u32,
    },
    Interface(IfaceInfo),
    InterfaceRemoved {
        ifname: String,
    },
    /// the neighbor entered the database exchange, it needs our headers
    DbSnapshot {
        peerid: u32,
    },
    /// headers the neighbor described
    DdHeaders {
        peerid: u32,
        headers: Vec<lsa::Header>,
    },
    LsRequest {
        peerid: u32,
        keys: Vec<LsaKey>,
    },
    LsUpdate {
        peerid: u32,
        lsa: Vec<u8>,
    },
    Kroute(KrouteEvent),
    Timer(RdeTimer),
    Control(RdeRequest),
    Reload(Config),
    Shutdown,
}

pub struct Rde {
    router_id: net::Ipv4Addr,
    config: Config,
    areas: BTreeMap<net::Ipv4Addr, Area>,
    externals: Lsdb,
    /// external records redistribution asks for
    external_wanted: BTreeMap<LsaKey, lsa::Body>,
    kroutes: BTreeMap<Ipv4Net, Kroute>,
    neighbors: BTreeMap<u32, RdeNeighbor>,
    rtable: RouteTable,
    spf: SpfScheduler,
    spf_timer: Timer,
    engine_tx: mpsc::UnboundedSender<EngineEvent>,
    fib_tx: mpsc::UnboundedSender<FibMessage>,
    tx: mpsc::UnboundedSender<RdeMessage>,
}

impl Rde {
    /// - tx : a sender into this actor's own queue, timers post through it
    pub fn new(
        config: Config,
        tx: mpsc::UnboundedSender<RdeMessage>,
        engine_tx: mpsc::UnboundedSender<EngineEvent>,
        fib_tx: mpsc::UnboundedSender<FibMessage>,
    ) -> Self {
        let areas = config.areas.iter().map(|a| (a.id, Area::new(a))).collect();
        Self {
            router_id: config.router_id,
            config,
            areas,
            externals: Lsdb::new(),
            external_wanted: BTreeMap::new(),
            kroutes: BTreeMap::new(),
            neighbors: BTreeMap::new(),
            rtable: RouteTable::new(),
            spf: SpfScheduler::new(),
            spf_timer: Timer::new(),
            engine_tx,
            fib_tx,
            tx,
        }
    }

    pub async fn run(mut self, mut rx: mpsc::UnboundedReceiver<RdeMessage>) {
        info!(router_id = %self.router_id, "route decision engine started");
        while let Some(msg) = rx.recv().await {
            if matches!(msg, RdeMessage::Shutdown) {
                break;
            }
            self.handle(msg);
        }
        self.spf_timer.cancel();
        info!("route decision engine stopped");
    }

    pub fn handle(&mut self, msg: RdeMessage) {
        match msg {
            RdeMessage::NeighborUp {
                peerid,
                area,
                ifname,
                id,
                addr,
            } => {
                let state = self
                    .neighbors
                    .get(&peerid)
                    .map_or(NbrStatus::Down, |n| n.state);
                self.neighbors.insert(
                    peerid,
                    RdeNeighbor {
                        peerid,
                        area,
                        ifname,
                        id,
                        addr,
                        state,
                    },
                );
            }
            RdeMessage::NeighborState { peerid, state } => {
                let Some(nbr) = self.neighbors.get_mut(&peerid) else {
                    return;
                };
                let was_full = nbr.state == NbrStatus::Full;
                nbr.state = state;
                if was_full != (state == NbrStatus::Full) {
                    self.topology_changed();
                }
            }
            RdeMessage::NeighborDown { peerid } => {
                if let Some(nbr) = self.neighbors.remove(&peerid) {
                    if nbr.state == NbrStatus::Full {
                        self.topology_changed();
                    }
                }
            }
            RdeMessage::Interface(info) => self.interface_update(info),
            RdeMessage::InterfaceRemoved { ifname } => {
                for area in self.areas.values_mut() {
                    area.interfaces.remove(&ifname);
                }
                self.topology_changed();
            }
            RdeMessage::DbSnapshot { peerid } => self.db_snapshot(peerid),
            RdeMessage::DdHeaders { peerid, headers } => self.dd_headers(peerid, headers),
            RdeMessage::LsRequest { peerid, keys } => self.ls_request(peerid, keys),
            RdeMessage::LsUpdate { peerid, lsa } => self.ls_update(peerid, lsa),
            RdeMessage::Kroute(event) => {
                match event {
                    KrouteEvent::Add(route) => {
                        self.kroutes.insert(route.prefix, route);
                    }
                    KrouteEvent::Remove(route) => {
                        self.kroutes.remove(&route.prefix);
                    }
                }
                self.redistribute();
            }
            RdeMessage::Timer(timer) => self.timer_fired(timer),
            RdeMessage::Control(req) => self.control(req),
            RdeMessage::Reload(config) => self.reload(config),
            RdeMessage::Shutdown => self.spf_timer.cancel(),
        }
    }

    fn to_engine(&self, msg: EngineMessage) {
        if self.engine_tx.send(EngineEvent::Rde(msg)).is_err() {
            warn!("interface engine is gone");
        }
    }

    fn to_fib(&self, msg: FibMessage) {
        if self.fib_tx.send(msg).is_err() {
            warn!("forwarding actor is gone");
        }
    }

    pub(crate) fn lsdb(&self, scope: Option<net::Ipv4Addr>) -> Option<&Lsdb> {
        match scope {
            Some(area) => self.areas.get(&area).map(|a| &a.lsdb),
            None => Some(&self.externals),
        }
    }

    pub(crate) fn lsdb_mut(&mut self, scope: Option<net::Ipv4Addr>) -> Option<&mut Lsdb> {
        match scope {
            Some(area) => self.areas.get_mut(&area).map(|a| &mut a.lsdb),
            None => Some(&mut self.externals),
        }
    }

    fn scope_of(area: net::Ipv4Addr, ls_type: u8) -> Option<net::Ipv4Addr> {
        if ls_type == lsa::AS_EXTERNAL_LSA_TYPE {
            None
        } else {
            Some(area)
        }
    }

    /// some neighbor of the scope is still describing or requesting records
    pub(crate) fn exchanging(&self, scope: Option<net::Ipv4Addr>) -> bool {
        self.neighbors
            .values()
            .filter(|n| match scope {
                Some(area) => n.area == area,
                None => self.areas.get(&n.area).is_some_and(|a| !a.stub),
            })
            .any(|n| {
                matches!(
                    n.state,
                    NbrStatus::Snapshot | NbrStatus::Exchange | NbrStatus::Loading
                )
            })
    }

    fn interface_update(&mut self, info: IfaceInfo) {
        for area in self.areas.values_mut() {
            if area.id != info.area {
                area.interfaces.remove(&info.name);
            }
        }
        let Some(area) = self.areas.get_mut(&info.area) else {
            warn!(iface = %info.name, area = %info.area, "interface of an unknown area");
            return;
        };
        if area.interfaces.get(&info.name) == Some(&info) {
            return;
        }
        trace!(iface = %info.name, state = ?info.state, "interface update");
        area.interfaces.insert(info.name.clone(), info);
        self.topology_changed();
    }

    /// our links changed: bring every area record we originate up to date
    fn topology_changed(&mut self) {
        let ids: Vec<net::Ipv4Addr> = self.areas.keys().copied().collect();
        for id in ids {
            self.originate_area(id);
        }
        self.schedule_spf();
    }

    fn db_snapshot(&self, peerid: u32) {
        let Some(nbr) = self.neighbors.get(&peerid) else {
            return;
        };
        let Some(area) = self.areas.get(&nbr.area) else {
            return;
        };
        let mut headers: Vec<lsa::Header> = area
            .lsdb
            .iter()
            .filter(|r| !r.is_maxage())
            .map(|r| r.header())
            .collect();
        if !area.stub {
            headers.extend(self.externals.iter().filter(|r| !r.is_maxage()).map(|r| r.header()));
        }
        debug!(neighbor = %nbr.id, count = headers.len(), "database snapshot");
        for chunk in headers.chunks(SNAPSHOT_CHUNK) {
            self.to_engine(EngineMessage::DbSnapshot {
                peerid,
                headers: chunk.to_vec(),
            });
        }
        self.to_engine(EngineMessage::DbSnapshotEnd { peerid });
    }

    /// # dd_headers
    /// answer the headers a neighbor described with the ones worth requesting
    fn dd_headers(&self, peerid: u32, headers: Vec<lsa::Header>) {
        let Some(nbr) = self.neighbors.get(&peerid) else {
            return;
        };
        let Some(area) = self.areas.get(&nbr.area) else {
            return;
        };
        let mut wanted = Vec::new();
        for header in headers {
            let known_type = (lsa::ROUTER_LSA_TYPE..=lsa::AS_EXTERNAL_LSA_TYPE)
                .contains(&header.ls_type);
            if !known_type || (area.stub && header.ls_type == lsa::AS_EXTERNAL_LSA_TYPE) {
                info!(neighbor = %nbr.id, ls_type = header.ls_type, "unacceptable record described");
                self.to_engine(EngineMessage::DdBadLsa { peerid });
                return;
            }
            let scope = Self::scope_of(area.id, header.ls_type);
            if self.lsdb(scope).is_some_and(|db| db.wants(&header)) {
                wanted.push(header);
            }
        }
        if !wanted.is_empty() {
            self.to_engine(EngineMessage::DdRequests {
                peerid,
                headers: wanted,
            });
        }
        self.to_engine(EngineMessage::DdEnd { peerid });
    }

    /// # ls_request
    /// everything requested, or a bad request if any record is missing
    fn ls_request(&self, peerid: u32, keys: Vec<LsaKey>) {
        let Some(nbr) = self.neighbors.get(&peerid) else {
            return;
        };
        let Some(area) = self.areas.get(&nbr.area) else {
            return;
        };
        let mut lsas = Vec::with_capacity(keys.len());
        for key in keys {
            let scope = Self::scope_of(area.id, key.ls_type);
            let found = if scope.is_none() && area.stub {
                None
            } else {
                self.lsdb(scope).and_then(|db| db.get(&key))
            };
            match found {
                Some(record) => lsas.push(record.data()),
                None => {
                    info!(neighbor = %nbr.id, %key, "requested record not in database");
                    self.to_engine(EngineMessage::LsBadRequest { peerid });
                    return;
                }
            }
        }
        self.to_engine(EngineMessage::LsUpdate { peerid, lsas });
    }

    /// # ls_update
    /// one received record: validate, then compare against our copy
    fn ls_update(&mut self, peerid: u32, data: Vec<u8>) {
        let Some(nbr) = self.neighbors.get(&peerid) else {
            return;
        };
        let Some(area) = self.areas.get(&nbr.area) else {
            return;
        };
        let lsa = match lsdb::validate(&data, area.stub, self.router_id) {
            Ok(lsa) => lsa,
            Err(err) => {
                debug!(neighbor = %nbr.id, %err, "received record dropped");
                return;
            }
        };
        let header = lsa.header;
        let key = lsa.key();
        let scope = Self::scope_of(area.id, header.ls_type);
        let data = data[..header.length as usize].to_vec();
        let current = self
            .lsdb(scope)
            .and_then(|db| db.get(&key))
            .map(|r| (r.header(), r.since_installed(), r.data()));

        if header.is_maxage() && current.is_none() && !self.exchanging(scope) {
            self.to_engine(EngineMessage::LsAckDirect { peerid, header });
            return;
        }
        let Some((ours, installed_for, our_data)) = current else {
            self.install_received(scope, peerid, data, lsa);
            return;
        };
        match lsa::compare(&header, &ours) {
            Ordering::Greater => {
                if installed_for < Duration::from_secs(MinLSArrival as u64) {
                    debug!(%key, "newer instance within MinLSArrival, dropped");
                    return;
                }
                self.install_received(scope, peerid, data, lsa);
            }
            Ordering::Equal => self.to_engine(EngineMessage::LsDuplicate { peerid, header }),
            Ordering::Less => {
                // ours is being flushed before its sequence number wraps
                if ours.is_maxage() && ours.seq_num == MaxSequenceNumber {
                    return;
                }
                self.to_engine(EngineMessage::LsNewer {
                    peerid,
                    lsa: our_data,
                });
            }
        }
    }

    fn is_self_originated(&self, scope: Option<net::Ipv4Addr>, lsa: &lsa::Lsa) -> bool {
        if lsa.header.adv_rtr == self.router_id {
            return true;
        }
        lsa.header.ls_type == lsa::NETWORK_LSA_TYPE
            && scope
                .and_then(|a| self.areas.get(&a))
                .is_some_and(|a| a.interfaces.values().any(|i| i.addr == lsa.header.ls_id))
    }

    fn install_received(
        &mut self,
        scope: Option<net::Ipv4Addr>,
        peerid: u32,
        data: Vec<u8>,
        lsa: lsa::Lsa,
    ) {
        let key = lsa.key();
        let maxage = lsa.header.is_maxage();
        let own = self.is_self_originated(scope, &lsa);
        let Some(db) = self.lsdb_mut(scope) else {
            return;
        };
        db.install(data.clone(), lsa);
        debug!(%key, peerid, "record installed");
        self.to_engine(EngineMessage::Flood {
            area: scope,
            origin: peerid,
            lsa: data,
        });
        if own {
            info!(%key, "newer instance of our own record received");
            self.originate(scope, key, true);
        } else if maxage {
            self.maybe_remove(scope, key);
        } else {
            self.arm_record(scope, key);
        }
        self.schedule_spf();
    }

    pub(crate) fn schedule_spf(&mut self) {
        if self.spf.trigger() {
            self.spf_timer.arm(
                Duration::from_millis(self.config.spf_delay),
                &self.tx,
                RdeMessage::Timer(RdeTimer::SpfDelay),
            );
        }
    }

    fn timer_fired(&mut self, timer: RdeTimer) {
        match timer {
            RdeTimer::Lsa { area, key } => self.record_timer(area, key),
            RdeTimer::SpfDelay => {
                if self.spf_timer.expired() && self.spf.delay_expired() {
                    self.run_spf();
                    self.arm_hold();
                }
            }
            RdeTimer::SpfHold => {
                if self.spf_timer.expired() && self.spf.hold_expired() {
                    self.run_spf();
                    self.arm_hold();
                }
            }
        }
    }

    fn arm_hold(&mut self) {
        self.spf_timer.arm(
            Duration::from_millis(self.config.spf_hold_time),
            &self.tx,
            RdeMessage::Timer(RdeTimer::SpfHold),
        );
    }

    /// # run_spf
    /// recompute the whole table by mark and sweep and push the difference to the
    /// forwarding table, then refresh the summaries a border router announces
    pub fn run_spf(&mut self) {
        let before = self.rtable.forwarding();
        self.rtable.invalidate();
        let border = self.is_border();
        for area in self.areas.values() {
            let tree = graph::spf(area, self.router_id);
            calc::intra_area(&mut self.rtable, area, &tree, self.router_id);
        }
        for area in self.areas.values() {
            calc::inter_area(&mut self.rtable, area, self.router_id, border);
        }
        calc::external(&mut self.rtable, &self.externals, self.router_id);
        let swept = self.rtable.sweep();

        let diff = rtable::fib_diff(&before, &self.rtable.forwarding());
        info!(
            routes = self.rtable.len(),
            changed = diff.changed.len(),
            removed = swept.len(),
            "route computation done"
        );
        for route in &diff.changed {
            if let Some(kroute) = kroute(route) {
                self.to_fib(FibMessage::Change(kroute));
            }
        }
        for route in &diff.removed {
            if let Some(kroute) = kroute(route) {
                self.to_fib(FibMessage::Delete(kroute));
            }
        }
        self.update_summaries();
    }

    fn control(&self, req: RdeRequest) {
        match req {
            RdeRequest::Database(reply) => {
                let mut entries = Vec::new();
                for area in self.areas.values() {
                    entries.extend(area.lsdb.iter().map(|r| DatabaseEntry {
                        area: Some(area.id),
                        header: r.header(),
                        self_originated: self.is_self_originated(Some(area.id), &r.lsa),
                    }));
                }
                entries.extend(self.externals.iter().map(|r| DatabaseEntry {
                    area: None,
                    header: r.header(),
                    self_originated: r.lsa.header.adv_rtr == self.router_id,
                }));
                let _ = reply.send(entries);
            }
            RdeRequest::Routes(reply) => {
                let _ = reply.send(self.rtable.iter().cloned().collect());
            }
        }
    }

    fn reload(&mut self, config: Config) {
        if config.router_id != self.router_id {
            error!("router id change refused on reload");
            return;
        }
        for ac in &config.areas {
            match self.areas.get_mut(&ac.id) {
                Some(area) => {
                    area.stub = ac.stub;
                    area.stub_default_cost = ac.stub_default_cost;
                }
                None => {
                    info!(area = %ac.id, "area added by reload");
                    self.areas.insert(ac.id, Area::new(ac));
                }
            }
        }
        let removed: Vec<net::Ipv4Addr> = self
            .areas
            .keys()
            .filter(|id| !config.areas.iter().any(|a| a.id == **id))
            .copied()
            .collect();
        for id in removed {
            info!(area = %id, "area removed by reload");
            self.areas.remove(&id);
            self.neighbors.retain(|_, n| n.area != id);
        }
        self.config = config;
        self.redistribute();
        self.topology_changed();
    }
}

fn kroute(route: &Route) -> Option<Kroute> {
    Some(Kroute {
        prefix: Ipv4Net::new(route.key.prefix, route.key.prefixlen).ok()?,
        nexthop: route.nexthop,
        ifname: route.ifname.clone(),
        metric: route.cost,
        origin: RouteOrigin::Ospf,
    })
}
