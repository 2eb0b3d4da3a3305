use std::{fmt::Debug, net, time::Duration};

use tracing::{debug, info};

use super::{
    status::{self, Candidate, Status},
    trans::TransCommand,
    NetworkType,
};
use crate::{
    engine::{Engine, EngineEvent, EngineTimer},
    neighbor,
};

#[derive(PartialEq, Eq, PartialOrd, Ord, Clone, Copy)]
pub enum Event {
    InterfaceUp,
    WaitTimer,
    BackupSeen,
    NeighborChange,
    LoopInd,
    UnloopInd,
    InterfaceDown,
}

impl Debug for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Event::InterfaceUp => write!(f, "InterfaceUp"),
            Event::WaitTimer => write!(f, "WaitTimer"),
            Event::BackupSeen => write!(f, "BackupSeen"),
            Event::NeighborChange => write!(f, "NeighborChange"),
            Event::LoopInd => write!(f, "LoopInd"),
            Event::UnloopInd => write!(f, "UnloopInd"),
            Event::InterfaceDown => write!(f, "InterfaceDown"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    Nothing,
    Start,
    Elect,
    Reset,
}

/// the interface state table. a `None` next state is decided by the action.
pub fn transition(state: Status, event: Event) -> Option<(Action, Option<Status>)> {
    let entry = match (event, state) {
        (Event::InterfaceUp, Status::Down) => (Action::Start, None),
        (Event::WaitTimer | Event::BackupSeen, Status::Waiting) => (Action::Elect, None),
        (Event::NeighborChange, s) if s.is_elected() => (Action::Elect, None),
        (Event::LoopInd, _) => (Action::Reset, Some(Status::Loopback)),
        (Event::UnloopInd, Status::Loopback) => (Action::Nothing, Some(Status::Down)),
        (Event::InterfaceDown, _) => (Action::Reset, Some(Status::Down)),
        _ => return None,
    };
    Some(entry)
}

impl Engine {
    /// # iface_fsm
    /// run one interface event through the state table and its action
    pub(crate) fn iface_fsm(&mut self, ifname: &str, event: Event) {
        let Some(iface) = self.interfaces.get(ifname) else {
            return;
        };
        let old = iface.state;
        let old_dr = iface.dr;
        let Some((action, next)) = transition(old, event) else {
            debug!(iface = ifname, state = ?old, ?event, "invalid status, ignored");
            return;
        };
        match action {
            Action::Nothing => {}
            Action::Start => self.if_act_start(ifname),
            Action::Elect => self.if_act_elect(ifname),
            Action::Reset => self.if_act_reset(ifname),
        }
        let Some(iface) = self.interfaces.get_mut(ifname) else {
            return;
        };
        if let Some(next) = next {
            iface.state = next;
        }
        let new = iface.state;
        if new != old {
            info!(iface = ifname, from = ?old, to = ?new, ?event, "interface state changed");
        }
        if new != old || iface.dr != old_dr {
            self.notify_interface(ifname);
        }
    }

    fn if_act_start(&mut self, ifname: &str) {
        let Some(iface) = self.interfaces.get_mut(ifname) else {
            return;
        };
        if iface.loopback {
            iface.state = Status::Loopback;
            return;
        }
        if iface.passive {
            iface.state = Status::PointToPoint;
            return;
        }
        if iface.network_type != NetworkType::NBMA {
            iface.groups.push(crate::ALL_SPF_ROUTERS);
            self.ctx.transport(TransCommand::Join {
                ifname: ifname.to_string(),
                group: crate::ALL_SPF_ROUTERS,
            });
        }
        iface.state = match iface.network_type {
            NetworkType::PointToPoint | NetworkType::PointToMultipoint => Status::PointToPoint,
            NetworkType::Broadcast | NetworkType::NBMA => {
                if iface.priority() == 0 {
                    Status::DRother
                } else {
                    iface.wait_timer.arm(
                        Duration::from_secs(iface.dead_interval as u64),
                        &self.ctx.event_tx,
                        EngineEvent::Timer(EngineTimer::Wait(ifname.to_string())),
                    );
                    Status::Waiting
                }
            }
        };
        let statics = if iface.network_type == NetworkType::NBMA {
            iface.static_neighbors.clone()
        } else {
            vec![]
        };
        self.send_hello(ifname);
        for addr in statics {
            let peerid = self.static_neighbor(ifname, addr);
            self.nbr_fsm(peerid, neighbor::event::Event::Start);
        }
    }

    /// the configured NBMA neighbor at `addr`, created on first use
    fn static_neighbor(&mut self, ifname: &str, addr: net::Ipv4Addr) -> u32 {
        if let Some(nbr) = self
            .neighbors
            .values()
            .find(|n| n.iface == ifname && n.addr == addr)
        {
            return nbr.peerid;
        }
        self.add_neighbor(ifname, net::Ipv4Addr::UNSPECIFIED, addr, true)
    }

    fn if_act_elect(&mut self, ifname: &str) {
        let others: Vec<Candidate> = self
            .neighbors_on(ifname)
            .filter(|n| n.state >= neighbor::status::Status::TwoWay)
            .map(|n| Candidate {
                id: n.id,
                addr: n.addr,
                priority: n.priority,
                dr: n.dr,
                bdr: n.bdr,
            })
            .collect();
        let Some(iface) = self.interfaces.get_mut(ifname) else {
            return;
        };
        let me = iface.self_candidate();
        let result = status::elect(&me, &others);
        let (old_dr, old_bdr) = (iface.dr, iface.bdr);
        iface.dr = result.dr_addr();
        iface.bdr = result.bdr_addr();
        iface.self_nbr.dr = iface.dr;
        iface.self_nbr.bdr = iface.bdr;
        iface.state = result.status_of(&me);
        iface.wait_timer.cancel();
        info!(
            iface = ifname,
            dr = %iface.dr,
            bdr = %iface.bdr,
            state = ?iface.state,
            "designated router elected"
        );

        let wants_group = iface.is_dr_or_bdr() && iface.network_type == NetworkType::Broadcast;
        let has_group = iface.groups.contains(&crate::ALL_D_ROUTERS);
        if wants_group && !has_group {
            iface.groups.push(crate::ALL_D_ROUTERS);
            self.ctx.transport(TransCommand::Join {
                ifname: ifname.to_string(),
                group: crate::ALL_D_ROUTERS,
            });
        } else if !wants_group && has_group {
            iface.groups.retain(|g| *g != crate::ALL_D_ROUTERS);
            self.ctx.transport(TransCommand::Leave {
                ifname: ifname.to_string(),
                group: crate::ALL_D_ROUTERS,
            });
        }

        if iface.dr != old_dr || iface.bdr != old_bdr {
            let peers: Vec<u32> = self
                .neighbors_on(ifname)
                .filter(|n| n.state >= neighbor::status::Status::TwoWay)
                .map(|n| n.peerid)
                .collect();
            for peerid in peers {
                self.nbr_fsm(peerid, neighbor::event::Event::AdjOk);
            }
        }
    }

    fn if_act_reset(&mut self, ifname: &str) {
        // no elections while the neighbors go away
        if let Some(iface) = self.interfaces.get_mut(ifname) {
            iface.state = Status::Down;
        }
        for peerid in self.peers_on(ifname) {
            if let Some(nbr) = self.neighbors.get_mut(&peerid) {
                // configured neighbors are recreated on the next start
                nbr.is_static = false;
            }
            self.nbr_fsm(peerid, neighbor::event::Event::KillNbr);
            if let Some(mut nbr) = self.neighbors.remove(&peerid) {
                nbr.clear_lists(&mut self.ctx.cache);
                nbr.cancel_timers();
                self.ctx
                    .to_rde(crate::rde::RdeMessage::NeighborDown { peerid });
            }
        }
        let Some(iface) = self.interfaces.get_mut(ifname) else {
            return;
        };
        iface.cancel_timers();
        iface.ls_ack_list.clear();
        iface.dr = net::Ipv4Addr::UNSPECIFIED;
        iface.bdr = net::Ipv4Addr::UNSPECIFIED;
        iface.self_nbr.dr = net::Ipv4Addr::UNSPECIFIED;
        iface.self_nbr.bdr = net::Ipv4Addr::UNSPECIFIED;
        iface.dst = net::Ipv4Addr::UNSPECIFIED;
        for group in std::mem::take(&mut iface.groups) {
            self.ctx.transport(TransCommand::Leave {
                ifname: ifname.to_string(),
                group,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitions() {
        assert_eq!(
            transition(Status::Down, Event::InterfaceUp),
            Some((Action::Start, None))
        );
        assert_eq!(transition(Status::DR, Event::InterfaceUp), None);
        assert_eq!(
            transition(Status::Waiting, Event::BackupSeen),
            Some((Action::Elect, None))
        );
        assert_eq!(transition(Status::Waiting, Event::NeighborChange), None);
        assert_eq!(transition(Status::PointToPoint, Event::NeighborChange), None);
        assert_eq!(
            transition(Status::DRother, Event::NeighborChange),
            Some((Action::Elect, None))
        );
        assert_eq!(
            transition(Status::Backup, Event::InterfaceDown),
            Some((Action::Reset, Some(Status::Down)))
        );
        assert_eq!(
            transition(Status::DR, Event::LoopInd),
            Some((Action::Reset, Some(Status::Loopback)))
        );
        assert_eq!(
            transition(Status::Loopback, Event::UnloopInd),
            Some((Action::Nothing, Some(Status::Down)))
        );
        assert_eq!(transition(Status::Down, Event::UnloopInd), None);
    }
}
