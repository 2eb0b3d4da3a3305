use tracing::{debug, info, warn};

use super::status::Status;
use crate::{
    engine::{Engine, EngineTimer},
    interface,
    rde::RdeMessage,
};

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Event {
    HelloReceived,
    Start,
    TwoWayReceived,
    NegotiationDone,
    SnapshotDone,
    ExchangeDone,
    BadLsReq,
    LoadingDone,
    AdjOk,
    SeqNumberMismatch,
    OneWayReceived,
    KillNbr,
    InactivityTimer,
    LinkDown,
    AdjTimeout,
}

impl std::fmt::Debug for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Event::HelloReceived => write!(f, "HelloReceived"),
            Event::Start => write!(f, "Start"),
            Event::TwoWayReceived => write!(f, "TwoWayReceived"),
            Event::NegotiationDone => write!(f, "NegotiationDone"),
            Event::SnapshotDone => write!(f, "SnapshotDone"),
            Event::ExchangeDone => write!(f, "ExchangeDone"),
            Event::BadLsReq => write!(f, "BadLSReq"),
            Event::LoadingDone => write!(f, "LoadingDone"),
            Event::AdjOk => write!(f, "AdjOk?"),
            Event::SeqNumberMismatch => write!(f, "SeqNumberMismatch"),
            Event::OneWayReceived => write!(f, "1-WayReceived"),
            Event::KillNbr => write!(f, "KillNbr"),
            Event::InactivityTimer => write!(f, "InactivityTimer"),
            Event::LinkDown => write!(f, "LLDown"),
            Event::AdjTimeout => write!(f, "AdjTimeout"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    Nothing,
    StartInactivity,
    ResetInactivity,
    /// NBMA: hello the configured neighbor and wait for an answer
    StartPoll,
    /// decide between 2-Way and ExStart
    Evaluate,
    Snapshot,
    ExchangeStart,
    ExchangeDone,
    /// keep or tear down the forming adjacency
    ReEvaluate,
    RestartDd,
    ClearLists,
    Delete,
}

/// # transition
/// the neighbor state table. `None` when the event is not valid in `state`.
/// a `None` next state leaves the state change to the action.
pub fn transition(state: Status, event: Event) -> Option<(Action, Option<Status>)> {
    use Status::*;
    let entry = match (event, state) {
        (Event::HelloReceived, Down) => (Action::StartInactivity, Some(Init)),
        (Event::HelloReceived, Attempt) => (Action::ResetInactivity, Some(Init)),
        (Event::HelloReceived, _) => (Action::ResetInactivity, None),
        (Event::Start, Down) => (Action::StartPoll, Some(Attempt)),
        (Event::TwoWayReceived, Init) => (Action::Evaluate, None),
        (Event::TwoWayReceived, s) if s >= TwoWay => (Action::Nothing, None),
        (Event::NegotiationDone, ExStart) => (Action::Snapshot, Some(Snapshot)),
        (Event::SnapshotDone, Snapshot) => (Action::ExchangeStart, Some(Exchange)),
        (Event::ExchangeDone, Exchange) => (Action::ExchangeDone, None),
        (Event::LoadingDone, Loading) => (Action::Nothing, Some(Full)),
        (Event::AdjOk, TwoWay) => (Action::Evaluate, None),
        (Event::AdjOk, s) if s >= ExStart => (Action::ReEvaluate, None),
        (Event::AdjTimeout, s) if s.is_forming() => (Action::RestartDd, Some(ExStart)),
        (Event::SeqNumberMismatch | Event::BadLsReq, s) if s >= Exchange => {
            (Action::RestartDd, Some(ExStart))
        }
        (Event::KillNbr | Event::LinkDown | Event::InactivityTimer, _) => {
            (Action::Delete, Some(Down))
        }
        (Event::OneWayReceived, s) if s >= TwoWay => (Action::ClearLists, Some(Init)),
        (Event::OneWayReceived, Init) => (Action::Nothing, None),
        _ => return None,
    };
    Some(entry)
}

impl Engine {
    /// # nbr_fsm
    /// run one neighbor event through the state table and its action
    pub(crate) fn nbr_fsm(&mut self, peerid: u32, event: Event) {
        let Some(nbr) = self.neighbors.get(&peerid) else {
            return;
        };
        let old = nbr.state;
        let Some((action, next)) = transition(old, event) else {
            debug!(
                neighbor = %nbr.id,
                state = ?old,
                ?event,
                "invalid status, ignored"
            );
            return;
        };
        if let Some(next) = next {
            if let Some(nbr) = self.neighbors.get_mut(&peerid) {
                nbr.state = next;
            }
        }
        self.nbr_action(peerid, action);
        let Some(nbr) = self.neighbors.get(&peerid) else {
            return;
        };
        let new = nbr.state;
        if new == old {
            return;
        }
        info!(
            neighbor = %nbr.id,
            iface = %nbr.iface,
            from = ?old,
            to = ?new,
            ?event,
            "neighbor state changed"
        );
        let ifname = nbr.iface.clone();
        self.ctx.to_rde(RdeMessage::NeighborState {
            peerid,
            state: new,
        });
        if new == Status::Full || !new.is_forming() {
            if let Some(nbr) = self.neighbors.get_mut(&peerid) {
                nbr.adj_timer.cancel();
            }
        }
        if (old < Status::TwoWay) != (new < Status::TwoWay) {
            self.iface_fsm(&ifname, interface::event::Event::NeighborChange);
        }
        if new == Status::Down {
            self.drop_neighbor(peerid);
        }
    }

    fn nbr_action(&mut self, peerid: u32, action: Action) {
        match action {
            Action::Nothing => {}
            Action::StartInactivity | Action::ResetInactivity => self.arm_inactivity(peerid),
            Action::StartPoll => {
                self.arm_inactivity(peerid);
                if let Some(nbr) = self.neighbors.get(&peerid) {
                    let (ifname, addr) = (nbr.iface.clone(), nbr.addr);
                    self.send_hello_to(&ifname, addr);
                }
            }
            Action::Evaluate => {
                if self.adjacency_ok(peerid) {
                    self.start_exstart(peerid, false);
                } else if let Some(nbr) = self.neighbors.get_mut(&peerid) {
                    nbr.state = Status::TwoWay;
                }
            }
            Action::ReEvaluate => {
                if !self.adjacency_ok(peerid) {
                    if let Some(nbr) = self.neighbors.get_mut(&peerid) {
                        nbr.clear_lists(&mut self.ctx.cache);
                        nbr.db_tx_timer.cancel();
                        nbr.last_tx_dd = None;
                        nbr.last_rx_dd = None;
                        nbr.state = Status::TwoWay;
                    }
                }
            }
            Action::Snapshot => {
                if let Some(nbr) = self.neighbors.get_mut(&peerid) {
                    nbr.db_tx_timer.cancel();
                    nbr.dd_pending += 1;
                }
                self.ctx.to_rde(RdeMessage::DbSnapshot { peerid });
            }
            Action::ExchangeStart => self.send_db_description(peerid),
            Action::ExchangeDone => {
                let Some(nbr) = self.neighbors.get_mut(&peerid) else {
                    return;
                };
                // the slave keeps its last packet to answer duplicates
                if !nbr.master {
                    nbr.db_tx_timer.cancel();
                }
                nbr.state = Status::Loading;
                if nbr.ls_req_list.is_empty() && nbr.dd_pending == 0 {
                    nbr.state = Status::Full;
                } else if !nbr.ls_req_list.is_empty() && !nbr.ls_req_timer.is_armed() {
                    self.send_ls_req(peerid);
                }
            }
            Action::RestartDd => {
                if let Some(nbr) = self.neighbors.get_mut(&peerid) {
                    nbr.clear_lists(&mut self.ctx.cache);
                }
                self.start_exstart(peerid, true);
            }
            Action::ClearLists => {
                if let Some(nbr) = self.neighbors.get_mut(&peerid) {
                    nbr.clear_lists(&mut self.ctx.cache);
                    nbr.db_tx_timer.cancel();
                    nbr.last_tx_dd = None;
                    nbr.last_rx_dd = None;
                }
            }
            Action::Delete => {
                if let Some(nbr) = self.neighbors.get_mut(&peerid) {
                    nbr.clear_lists(&mut self.ctx.cache);
                    nbr.cancel_timers();
                    nbr.last_tx_dd = None;
                    nbr.last_rx_dd = None;
                    nbr.dd_pending = 0;
                }
            }
        }
    }

    fn arm_inactivity(&mut self, peerid: u32) {
        let Some(nbr) = self.neighbors.get_mut(&peerid) else {
            return;
        };
        let Some(iface) = self.interfaces.get(&nbr.iface) else {
            return;
        };
        nbr.inactivity_timer.arm(
            std::time::Duration::from_secs(iface.dead_interval as u64),
            &self.ctx.event_tx,
            crate::engine::EngineEvent::Timer(EngineTimer::Inactivity(peerid)),
        );
    }

    /// whether an adjacency should be formed with the neighbor
    pub(crate) fn adjacency_ok(&self, peerid: u32) -> bool {
        let Some(nbr) = self.neighbors.get(&peerid) else {
            return false;
        };
        let Some(iface) = self.interfaces.get(&nbr.iface) else {
            return false;
        };
        match iface.network_type {
            interface::NetworkType::PointToPoint | interface::NetworkType::PointToMultipoint => {
                true
            }
            interface::NetworkType::Broadcast | interface::NetworkType::NBMA => {
                iface.is_dr_or_bdr() || nbr.addr == iface.dr || nbr.addr == iface.bdr
            }
        }
    }

    /// enter ExStart: claim mastership with a fresh sequence number and start
    /// sending empty initial packets until the neighbor answers.
    /// - restart : a broken exchange, jump the sequence number instead of reusing it
    fn start_exstart(&mut self, peerid: u32, restart: bool) {
        let Some(nbr) = self.neighbors.get_mut(&peerid) else {
            return;
        };
        nbr.state = Status::ExStart;
        nbr.dd_seq_num = if restart || nbr.dd_seq_num == 0 {
            nbr.dd_seq_num
                .wrapping_add(rand::random_range(1..=u16::MAX as u32))
        } else {
            nbr.dd_seq_num.wrapping_add(1)
        };
        nbr.master = false;
        nbr.dd_more = false;
        nbr.dd_pending = 0;
        nbr.last_rx_dd = None;
        nbr.last_tx_dd = None;
        let Some(iface) = self.interfaces.get(&nbr.iface) else {
            return;
        };
        nbr.adj_timer.arm(
            std::time::Duration::from_secs(iface.dead_interval as u64),
            &self.ctx.event_tx,
            crate::engine::EngineEvent::Timer(EngineTimer::Adjacency(peerid)),
        );
        debug!(neighbor = %nbr.id, seq = nbr.dd_seq_num, restart, "starting database exchange");
        self.send_db_description(peerid);
    }

    /// forget a neighbor that went Down. configured NBMA neighbors stay, polled again later.
    fn drop_neighbor(&mut self, peerid: u32) {
        let keep = self.neighbors.get(&peerid).is_some_and(|n| n.is_static);
        if keep {
            return;
        }
        if let Some(mut nbr) = self.neighbors.remove(&peerid) {
            nbr.clear_lists(&mut self.ctx.cache);
            nbr.cancel_timers();
            self.ctx.to_rde(RdeMessage::NeighborDown { peerid });
        } else {
            warn!(peerid, "dropping unknown neighbor");
        }
    }
}
