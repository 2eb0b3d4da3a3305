//! pacing of route computations: triggers inside the delay window collapse into one
//! run, and a hold-down after every run queues at most one more.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SpfState {
    #[default]
    Idle,
    /// a run is due when the delay timer fires
    Delay,
    /// a run just happened, `pending` remembers triggers seen since
    Hold { pending: bool },
}

#[derive(Debug, Default)]
pub struct SpfScheduler {
    state: SpfState,
}

impl SpfScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SpfState {
        self.state
    }

    /// a topology change. true when the delay timer has to be armed.
    pub fn trigger(&mut self) -> bool {
        match self.state {
            SpfState::Idle => {
                self.state = SpfState::Delay;
                true
            }
            SpfState::Delay => false,
            SpfState::Hold { .. } => {
                self.state = SpfState::Hold { pending: true };
                false
            }
        }
    }

    /// the delay timer fired. true when the computation runs now, the hold timer follows.
    pub fn delay_expired(&mut self) -> bool {
        if self.state != SpfState::Delay {
            return false;
        }
        self.state = SpfState::Hold { pending: false };
        true
    }

    /// the hold timer fired. true when a queued run happens now and the hold restarts.
    pub fn hold_expired(&mut self) -> bool {
        match self.state {
            SpfState::Hold { pending: true } => {
                self.state = SpfState::Hold { pending: false };
                true
            }
            SpfState::Hold { pending: false } => {
                self.state = SpfState::Idle;
                false
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn triggers_collapse() {
        let mut spf = SpfScheduler::new();
        assert!(spf.trigger());
        assert!(!spf.trigger());
        assert!(!spf.trigger());
        assert!(spf.delay_expired());
        assert_eq!(spf.state(), SpfState::Hold { pending: false });

        // quiet hold-down goes back to idle
        assert!(!spf.hold_expired());
        assert_eq!(spf.state(), SpfState::Idle);
    }

    #[test]
    fn hold_queues_one_run() {
        let mut spf = SpfScheduler::new();
        spf.trigger();
        spf.delay_expired();
        assert!(!spf.trigger());
        assert!(!spf.trigger());
        assert!(spf.hold_expired());
        assert_eq!(spf.state(), SpfState::Hold { pending: false });
        assert!(!spf.hold_expired());
        assert!(!spf.delay_expired());
        assert!(spf.trigger());
    }
}
