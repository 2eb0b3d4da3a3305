use std::{
    net,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio::{sync::mpsc, task::JoinHandle};

/// # Timer
/// one owned, cancellable timer. arming an armed timer replaces the pending one.
/// - the spawned task only posts `event` back into the owner's channel, the owner
///   checks `expired()` before acting so events of a replaced or cancelled timer are dropped.
#[derive(Default)]
pub struct Timer {
    task: Option<(JoinHandle<()>, Arc<AtomicBool>)>,
}

impl Timer {
    pub fn new() -> Self {
        Self { task: None }
    }

    pub fn arm<E: Send + 'static>(
        &mut self,
        after: Duration,
        tx: &mpsc::UnboundedSender<E>,
        event: E,
    ) {
        self.cancel();
        let tx = tx.clone();
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            flag.store(true, Ordering::Release);
            let _ = tx.send(event);
        });
        self.task = Some((handle, fired));
    }

    pub fn cancel(&mut self) {
        if let Some((handle, _)) = self.task.take() {
            handle.abort();
        }
    }

    pub fn is_armed(&self) -> bool {
        match &self.task {
            Some((_, fired)) => !fired.load(Ordering::Acquire),
            None => false,
        }
    }

    /// consume the expiry. true only once, and only for the currently armed timer.
    pub fn expired(&mut self) -> bool {
        let fired = match &self.task {
            Some((_, fired)) => fired.load(Ordering::Acquire),
            None => false,
        };
        if fired {
            self.task = None;
        }
        fired
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for Timer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Timer({})", if self.is_armed() { "armed" } else { "idle" })
    }
}

pub fn mask_to_prefixlen(mask: net::Ipv4Addr) -> u8 {
    u32::from(mask).leading_ones() as u8
}

pub fn prefixlen_to_mask(len: u8) -> net::Ipv4Addr {
    match len {
        0 => net::Ipv4Addr::UNSPECIFIED,
        len if len >= 32 => net::Ipv4Addr::BROADCAST,
        len => net::Ipv4Addr::from(!0u32 << (32 - len)),
    }
}

pub fn apply_mask(addr: net::Ipv4Addr, mask: net::Ipv4Addr) -> net::Ipv4Addr {
    net::Ipv4Addr::from(u32::from(addr) & u32::from(mask))
}

pub fn secs(seconds: u16) -> Duration {
    Duration::from_secs(seconds as u64)
}
