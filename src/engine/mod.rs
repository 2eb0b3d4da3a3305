//! the interface engine: interfaces, neighbors, packet exchange and flooding.
//! it owns no database, every topology decision is asked of the route decision engine.

pub mod flood;
pub mod recv;

use std::{
    collections::{BTreeMap, HashMap},
    net,
    time::{SystemTime, UNIX_EPOCH},
};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::{
    config::{Config, InterfaceChange},
    control::{self, InterfaceSummary, NeighborSummary},
    interface::{self, trans::TransCommand, Interface},
    lsa::{self, cache::LsaCache},
    neighbor::{self, Neighbor},
    packet::{self, OspfPacket},
    rde::{IfaceInfo, RdeMessage},
};

/// everything the route decision engine tells the interface engine
#[derive(Debug)]
pub enum EngineMessage {
    DbSnapshot {
        peerid: u32,
        headers: Vec<lsa::Header>,
    },
    DbSnapshotEnd {
        peerid: u32,
    },
    /// headers offered by the neighbor that are newer than ours
    DdRequests {
        peerid: u32,
        headers: Vec<lsa::Header>,
    },
    DdEnd {
        peerid: u32,
    },
    DdBadLsa {
        peerid: u32,
    },
    /// answer to a link state request
    LsUpdate {
        peerid: u32,
        lsas: Vec<Vec<u8>>,
    },
    LsBadRequest {
        peerid: u32,
    },
    /// the neighbor sent an older instance, send ours back
    LsNewer {
        peerid: u32,
        lsa: Vec<u8>,
    },
    /// the neighbor sent the instance we already have
    LsDuplicate {
        peerid: u32,
        header: lsa::Header,
    },
    /// acknowledge without flooding or installing
    LsAckDirect {
        peerid: u32,
        header: lsa::Header,
    },
    /// flood a newly installed record. area None floods AS wide.
    Flood {
        area: Option<net::Ipv4Addr>,
        origin: u32,
        lsa: Vec<u8>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineTimer {
    Hello(String),
    Wait(String),
    Ack(String),
    Inactivity(u32),
    DbTx(u32),
    LsReq(u32),
    LsRetrans(u32),
    Adjacency(u32),
}

#[derive(Debug)]
pub enum EngineEvent {
    Packet {
        ifname: String,
        src: net::Ipv4Addr,
        dst: net::Ipv4Addr,
        data: Vec<u8>,
    },
    Link {
        ifname: String,
        up: bool,
        loopback: bool,
    },
    Rde(EngineMessage),
    Timer(EngineTimer),
    Control(control::EngineRequest),
    Reload(Config),
    Shutdown,
}

/// state shared by all handlers, split from the interface and neighbor tables
/// so both can be borrowed at once
pub struct Ctx {
    pub router_id: net::Ipv4Addr,
    pub cache: LsaCache,
    pub rde_tx: mpsc::UnboundedSender<RdeMessage>,
    pub out_tx: mpsc::UnboundedSender<TransCommand>,
    pub event_tx: mpsc::UnboundedSender<EngineEvent>,
    next_peerid: u32,
}

impl Ctx {
    pub fn to_rde(&self, msg: RdeMessage) {
        if self.rde_tx.send(msg).is_err() {
            warn!("route decision engine is gone");
        }
    }

    pub fn transport(&self, cmd: TransCommand) {
        if self.out_tx.send(cmd).is_err() {
            warn!("transport is gone");
        }
    }

    /// encode, authenticate and hand a packet to the transport
    pub fn send(&self, iface: &mut Interface, dst: net::Ipv4Addr, body: &dyn OspfPacket) {
        let data = packet::encode(body, self.router_id, iface.area_id, &mut iface.auth);
        self.transport(TransCommand::Send {
            ifname: iface.name.clone(),
            src: iface.addr,
            dst,
            data,
        });
    }

    pub fn next_peerid(&mut self) -> u32 {
        self.next_peerid += 1;
        self.next_peerid
    }
}

pub struct Engine {
    pub ctx: Ctx,
    pub interfaces: BTreeMap<String, Interface>,
    pub neighbors: BTreeMap<u32, Neighbor>,
    config: Config,
    /// last link report per interface name, also for interfaces not configured yet
    links: HashMap<String, (bool, bool)>,
}

fn crypt_seq_start() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}

impl Engine {
    pub fn new(
        config: Config,
        rde_tx: mpsc::UnboundedSender<RdeMessage>,
        out_tx: mpsc::UnboundedSender<TransCommand>,
        event_tx: mpsc::UnboundedSender<EngineEvent>,
    ) -> Self {
        let ctx = Ctx {
            router_id: config.router_id,
            cache: LsaCache::new(),
            rde_tx,
            out_tx,
            event_tx,
            next_peerid: 0,
        };
        let mut engine = Self {
            ctx,
            interfaces: BTreeMap::new(),
            neighbors: BTreeMap::new(),
            config: config.clone(),
            links: HashMap::new(),
        };
        for (area, ifc) in config.interfaces() {
            engine.add_interface(area.id, ifc);
        }
        engine
    }

    pub async fn run(mut self, mut rx: mpsc::UnboundedReceiver<EngineEvent>) {
        info!(router_id = %self.ctx.router_id, "interface engine started");
        while let Some(event) = rx.recv().await {
            if matches!(event, EngineEvent::Shutdown) {
                break;
            }
            self.handle(event);
        }
        self.shutdown();
        info!("interface engine stopped");
    }

    pub fn handle(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::Packet {
                ifname,
                src,
                dst,
                data,
            } => self.recv_packet(&ifname, src, dst, &data),
            EngineEvent::Link {
                ifname,
                up,
                loopback,
            } => self.link_changed(&ifname, up, loopback),
            EngineEvent::Rde(msg) => self.rde_message(msg),
            EngineEvent::Timer(timer) => self.timer_fired(timer),
            EngineEvent::Control(req) => self.control(req),
            EngineEvent::Reload(config) => self.reload(config),
            EngineEvent::Shutdown => self.shutdown(),
        }
    }

    fn shutdown(&mut self) {
        let names: Vec<String> = self.interfaces.keys().cloned().collect();
        for name in names {
            self.iface_fsm(&name, interface::event::Event::InterfaceDown);
        }
    }

    fn add_interface(&mut self, area_id: net::Ipv4Addr, ifc: &crate::config::InterfaceConfig) {
        let Some(area) = self.config.area(area_id).cloned() else {
            return;
        };
        let iface = Interface::new(self.ctx.router_id, &area, ifc, crypt_seq_start());
        self.ctx.transport(TransCommand::Open {
            ifname: iface.name.clone(),
            addr: iface.addr,
        });
        let name = iface.name.clone();
        self.interfaces.insert(name.clone(), iface);
        self.notify_interface(&name);
        if let Some((up, loopback)) = self.links.get(&name).copied() {
            self.link_changed(&name, up, loopback);
        }
    }

    fn remove_interface(&mut self, name: &str) {
        self.iface_fsm(name, interface::event::Event::InterfaceDown);
        if self.interfaces.remove(name).is_some() {
            self.ctx.transport(TransCommand::Close {
                ifname: name.to_string(),
            });
            self.ctx.to_rde(RdeMessage::InterfaceRemoved {
                ifname: name.to_string(),
            });
        }
    }

    fn link_changed(&mut self, ifname: &str, up: bool, loopback: bool) {
        self.links.insert(ifname.to_string(), (up, loopback));
        let Some(iface) = self.interfaces.get_mut(ifname) else {
            return;
        };
        let was_up = iface.linkup;
        iface.linkup = up;
        let was_loopback = iface.loopback;
        iface.loopback = loopback;
        let state = iface.state;
        use interface::{event::Event, status::Status};
        if loopback && !was_loopback {
            self.iface_fsm(ifname, Event::LoopInd);
            return;
        }
        if !loopback && was_loopback && state == Status::Loopback {
            self.iface_fsm(ifname, Event::UnloopInd);
        }
        let state = self.interfaces.get(ifname).map(|i| i.state);
        match (up, state) {
            (true, Some(Status::Down)) => self.iface_fsm(ifname, Event::InterfaceUp),
            (false, Some(s)) if s != Status::Down && s != Status::Loopback && was_up => {
                self.iface_fsm(ifname, Event::InterfaceDown)
            }
            _ => {}
        }
    }

    fn reload(&mut self, config: Config) {
        if let Err(err) = config.check_reload(&self.config) {
            warn!(%err, "reload rejected");
            return;
        }
        let changes = self.config.diff(&config);
        self.config = config;
        for change in changes {
            match change {
                InterfaceChange::Removed { name } => {
                    info!(iface = %name, "interface removed by reload");
                    self.remove_interface(&name);
                }
                InterfaceChange::Added { area, config } => {
                    info!(iface = %config.name, "interface added by reload");
                    self.add_interface(area, &config);
                }
                InterfaceChange::Restart { area, config } => {
                    info!(iface = %config.name, "interface restarted by reload");
                    self.remove_interface(&config.name);
                    self.add_interface(area, &config);
                }
                InterfaceChange::Update { config } => {
                    let Some(iface) = self.interfaces.get_mut(&config.name) else {
                        continue;
                    };
                    let old_priority = iface.priority();
                    let was_passive = iface.passive;
                    iface.update(&config);
                    debug!(iface = %config.name, "interface updated in place");
                    if was_passive != config.passive {
                        self.iface_fsm(&config.name, interface::event::Event::InterfaceDown);
                        let up = self.interfaces.get(&config.name).is_some_and(|i| i.linkup);
                        if up {
                            self.iface_fsm(&config.name, interface::event::Event::InterfaceUp);
                        }
                    } else if old_priority != config.priority {
                        self.iface_fsm(&config.name, interface::event::Event::NeighborChange);
                    }
                    self.notify_interface(&config.name);
                }
            }
        }
    }

    fn timer_fired(&mut self, timer: EngineTimer) {
        match timer {
            EngineTimer::Hello(name) => self.hello_timer(&name),
            EngineTimer::Wait(name) => self.wait_timer(&name),
            EngineTimer::Ack(name) => self.ack_timer(&name),
            EngineTimer::Inactivity(peerid) => {
                if self
                    .neighbors
                    .get_mut(&peerid)
                    .is_some_and(|n| n.inactivity_timer.expired())
                {
                    self.nbr_fsm(peerid, neighbor::event::Event::InactivityTimer);
                }
            }
            EngineTimer::DbTx(peerid) => self.db_tx_timer(peerid),
            EngineTimer::LsReq(peerid) => self.ls_req_timer(peerid),
            EngineTimer::LsRetrans(peerid) => self.ls_retrans_timer(peerid),
            EngineTimer::Adjacency(peerid) => {
                if self
                    .neighbors
                    .get_mut(&peerid)
                    .is_some_and(|n| n.adj_timer.expired())
                {
                    self.nbr_fsm(peerid, neighbor::event::Event::AdjTimeout);
                }
            }
        }
    }

    fn rde_message(&mut self, msg: EngineMessage) {
        use neighbor::event::Event;
        match msg {
            EngineMessage::DbSnapshot { peerid, headers } => {
                if let Some(nbr) = self.neighbors.get_mut(&peerid) {
                    if nbr.state == neighbor::status::Status::Snapshot {
                        nbr.db_sum_list.extend(headers);
                    }
                }
            }
            EngineMessage::DbSnapshotEnd { peerid } => {
                let Some(nbr) = self.neighbors.get_mut(&peerid) else {
                    return;
                };
                nbr.dd_pending = nbr.dd_pending.saturating_sub(1);
                if nbr.state == neighbor::status::Status::Snapshot {
                    self.nbr_fsm(peerid, Event::SnapshotDone);
                }
            }
            EngineMessage::DdRequests { peerid, headers } => {
                let Some(nbr) = self.neighbors.get_mut(&peerid) else {
                    return;
                };
                if !matches!(
                    nbr.state,
                    neighbor::status::Status::Exchange | neighbor::status::Status::Loading
                ) {
                    return;
                }
                for header in headers {
                    nbr.ls_req_list.insert(header.key(), header);
                }
                // requests go out once the exchange is over
                if nbr.state == neighbor::status::Status::Loading
                    && !nbr.ls_req_list.is_empty()
                    && !nbr.ls_req_timer.is_armed()
                {
                    self.send_ls_req(peerid);
                }
            }
            EngineMessage::DdEnd { peerid } => {
                let Some(nbr) = self.neighbors.get_mut(&peerid) else {
                    return;
                };
                nbr.dd_pending = nbr.dd_pending.saturating_sub(1);
                self.check_loading_done(peerid);
            }
            EngineMessage::DdBadLsa { peerid } => {
                self.nbr_fsm(peerid, Event::SeqNumberMismatch);
            }
            EngineMessage::LsUpdate { peerid, lsas } => self.send_ls_update(peerid, lsas),
            EngineMessage::LsBadRequest { peerid } => {
                self.nbr_fsm(peerid, Event::BadLsReq);
            }
            EngineMessage::LsNewer { peerid, lsa } => {
                if self.pending_request(peerid, &lsa) {
                    self.nbr_fsm(peerid, Event::BadLsReq);
                } else {
                    self.send_ls_update(peerid, vec![lsa]);
                }
            }
            EngineMessage::LsDuplicate { peerid, header } => self.duplicate_received(peerid, header),
            EngineMessage::LsAckDirect { peerid, header } => self.direct_ack(peerid, vec![header]),
            EngineMessage::Flood { area, origin, lsa } => self.flood(area, origin, &lsa),
        }
    }

    /// the neighbor still owes us a newer instance of `lsa`'s record
    fn pending_request(&self, peerid: u32, lsa: &[u8]) -> bool {
        let Some(header) = lsa::Header::try_from_be_bytes(lsa) else {
            return false;
        };
        self.neighbors
            .get(&peerid)
            .is_some_and(|n| n.ls_req_list.contains_key(&header.key()))
    }

    /// Loading with nothing left to request and no header checks outstanding
    pub(crate) fn check_loading_done(&mut self, peerid: u32) {
        let Some(nbr) = self.neighbors.get_mut(&peerid) else {
            return;
        };
        if nbr.ls_req_list.is_empty() {
            nbr.ls_req_timer.cancel();
        }
        if nbr.state == neighbor::status::Status::Loading
            && nbr.ls_req_list.is_empty()
            && nbr.dd_pending == 0
        {
            self.nbr_fsm(peerid, neighbor::event::Event::LoadingDone);
        }
    }

    pub(crate) fn neighbors_on<'a>(&'a self, ifname: &'a str) -> impl Iterator<Item = &'a Neighbor> {
        self.neighbors.values().filter(move |n| n.iface == ifname)
    }

    pub(crate) fn peers_on(&self, ifname: &str) -> Vec<u32> {
        self.neighbors_on(ifname).map(|n| n.peerid).collect()
    }

    /// tell the route decision engine what it needs of an interface for origination
    pub(crate) fn notify_interface(&self, ifname: &str) {
        let Some(iface) = self.interfaces.get(ifname) else {
            return;
        };
        self.ctx.to_rde(RdeMessage::Interface(IfaceInfo {
            name: iface.name.clone(),
            area: iface.area_id,
            addr: iface.addr,
            mask: iface.mask,
            dst: iface.dst,
            network_type: iface.network_type,
            state: iface.state,
            metric: iface.metric,
            dr: iface.dr,
            passive: iface.passive,
        }));
    }

    fn control(&mut self, req: control::EngineRequest) {
        match req {
            control::EngineRequest::Interfaces(reply) => {
                let summaries = self
                    .interfaces
                    .values()
                    .map(|iface| InterfaceSummary {
                        name: iface.name.clone(),
                        area: iface.area_id,
                        addr: iface.addr,
                        mask: iface.mask,
                        network_type: iface.network_type,
                        state: iface.state,
                        dr: iface.dr,
                        bdr: iface.bdr,
                        metric: iface.metric,
                        priority: iface.priority(),
                        hello_interval: iface.hello_interval,
                        dead_interval: iface.dead_interval,
                        auth_type: iface.auth.auth_type(),
                        passive: iface.passive,
                        linkup: iface.linkup,
                        neighbors: self.neighbors_on(&iface.name).count(),
                        adjacencies: self
                            .neighbors_on(&iface.name)
                            .filter(|n| n.state == neighbor::status::Status::Full)
                            .count(),
                    })
                    .collect();
                let _ = reply.send(summaries);
            }
            control::EngineRequest::Neighbors(reply) => {
                let summaries = self
                    .neighbors
                    .values()
                    .map(|nbr| NeighborSummary {
                        id: nbr.id,
                        addr: nbr.addr,
                        iface: nbr.iface.clone(),
                        state: nbr.state,
                        priority: nbr.priority,
                        dr: nbr.dr,
                        bdr: nbr.bdr,
                        db_sum_list: nbr.db_sum_list.len(),
                        ls_req_list: nbr.ls_req_list.len(),
                        ls_retrans_list: nbr.ls_retrans_list.len(),
                    })
                    .collect();
                let _ = reply.send(summaries);
            }
        }
    }
}

#[cfg(test)]
mod tests;
