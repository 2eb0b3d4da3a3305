use std::{fmt::Debug, iter, net};

#[derive(PartialEq, Eq, PartialOrd, Ord, Clone, Copy)]
pub enum Status {
    Down,
    Loopback,
    Waiting,
    PointToPoint,
    DRother,
    Backup,
    DR,
}

impl Debug for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Status::Down => write!(f, "Down"),
            Status::Loopback => write!(f, "Loopback"),
            Status::Waiting => write!(f, "Waiting"),
            Status::PointToPoint => write!(f, "PointToPoint"),
            Status::DRother => write!(f, "DRother"),
            Status::Backup => write!(f, "Backup"),
            Status::DR => write!(f, "DR"),
        }
    }
}

impl Status {
    /// states reached through an election on a multi-access segment
    pub fn is_elected(&self) -> bool {
        matches!(self, Status::DRother | Status::Backup | Status::DR)
    }
}

/// one router as seen by the election: the local one or a neighbor in 2-Way or better
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Candidate {
    pub id: net::Ipv4Addr,
    pub addr: net::Ipv4Addr,
    pub priority: u8,
    /// declared designated router, an interface address
    pub dr: net::Ipv4Addr,
    /// declared backup designated router, an interface address
    pub bdr: net::Ipv4Addr,
}

impl Candidate {
    fn claims_dr(&self) -> bool {
        self.dr == self.addr
    }
    fn claims_bdr(&self) -> bool {
        self.bdr == self.addr
    }
    fn rank(&self) -> (u8, net::Ipv4Addr) {
        (self.priority, self.id)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct Election {
    pub dr: Option<Candidate>,
    pub bdr: Option<Candidate>,
}

impl Election {
    pub fn dr_addr(&self) -> net::Ipv4Addr {
        self.dr.map_or(net::Ipv4Addr::UNSPECIFIED, |c| c.addr)
    }
    pub fn bdr_addr(&self) -> net::Ipv4Addr {
        self.bdr.map_or(net::Ipv4Addr::UNSPECIFIED, |c| c.addr)
    }

    /// the interface state this result gives the local router
    pub fn status_of(&self, me: &Candidate) -> Status {
        if self.dr.is_some_and(|c| c.id == me.id) {
            Status::DR
        } else if self.bdr.is_some_and(|c| c.id == me.id) {
            Status::Backup
        } else {
            Status::DRother
        }
    }
}

fn eligible<'a>(me: &'a Candidate, others: &'a [Candidate]) -> Vec<&'a Candidate> {
    iter::once(me)
        .chain(others.iter())
        .filter(|c| c.priority > 0)
        .collect()
}

/// backup among routers not claiming to be designated, those claiming backup first
fn backup(eligible: &[&Candidate], skip: Option<net::Ipv4Addr>) -> Option<Candidate> {
    let pool: Vec<&Candidate> = eligible
        .iter()
        .copied()
        .filter(|c| !c.claims_dr() && Some(c.id) != skip)
        .collect();
    pool.iter()
        .filter(|c| c.claims_bdr())
        .max_by_key(|c| c.rank())
        .or_else(|| pool.iter().max_by_key(|c| c.rank()))
        .map(|c| **c)
}

fn round(me: &Candidate, others: &[Candidate]) -> Election {
    let eligible = eligible(me, others);
    let bdr = backup(&eligible, None);
    let dr = eligible
        .iter()
        .filter(|c| c.claims_dr())
        .max_by_key(|c| c.rank())
        .map(|c| **c)
        .or(bdr);

    Election { dr, bdr }
}

/// # elect
/// designated and backup designated router election of one segment.
/// - me : the local router with its current declarations
/// - others : neighbors in 2-Way or better
///
/// when the local router's own role changes after a pass, the declarations are
/// updated and the pass runs once more before the result is used.
pub fn elect(me: &Candidate, others: &[Candidate]) -> Election {
    let mut result = round(me, others);
    let was_dr = me.claims_dr();
    let was_bdr = me.claims_bdr();
    let is_dr = result.dr.is_some_and(|c| c.id == me.id);
    let is_bdr = result.bdr.is_some_and(|c| c.id == me.id);
    if was_dr != is_dr || was_bdr != is_bdr {
        let me = Candidate {
            dr: result.dr_addr(),
            bdr: result.bdr_addr(),
            ..*me
        };
        result = round(&me, others);
    }
    // a backup promoted to designated leaves the backup role to the next best router
    if let (Some(dr), Some(bdr)) = (result.dr, result.bdr) {
        if dr.id == bdr.id {
            result.bdr = backup(&eligible(me, others), Some(dr.id));
        }
    }
    result
}
