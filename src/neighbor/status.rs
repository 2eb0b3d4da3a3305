#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Status {
    Down,
    Attempt,
    Init,
    TwoWay,
    ExStart,
    /// waiting for the database snapshot after negotiation
    Snapshot,
    Exchange,
    Loading,
    Full,
}

impl Status {
    /// forming an adjacency, the adjacency timer runs
    pub fn is_forming(&self) -> bool {
        matches!(
            self,
            Status::ExStart | Status::Snapshot | Status::Exchange | Status::Loading
        )
    }

    /// taking part in flooding
    pub fn is_flooding(&self) -> bool {
        matches!(self, Status::Exchange | Status::Loading | Status::Full)
    }
}
