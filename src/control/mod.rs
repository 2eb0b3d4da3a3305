//! introspection and operator commands. every actor answers on a one-shot channel,
//! [`Control`] is the handle the shell (or anything else) talks through.

use std::{net, path::Path, sync::Arc};

use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::info;
use tracing_subscriber::{reload, EnvFilter, Registry};

use crate::{
    config::Config,
    engine::EngineEvent,
    error::{Error, Result},
    fib::{FibMessage, Kroute},
    interface::{self, NetworkType},
    lsa,
    neighbor,
    packet::auth::AuthType,
    rde::RdeMessage,
    rtable::Route,
};

#[derive(Debug)]
pub enum EngineRequest {
    Interfaces(oneshot::Sender<Vec<InterfaceSummary>>),
    Neighbors(oneshot::Sender<Vec<NeighborSummary>>),
}

#[derive(Debug)]
pub enum RdeRequest {
    Database(oneshot::Sender<Vec<DatabaseEntry>>),
    Routes(oneshot::Sender<Vec<Route>>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct InterfaceSummary {
    pub name: String,
    pub area: net::Ipv4Addr,
    pub addr: net::Ipv4Addr,
    pub mask: net::Ipv4Addr,
    pub network_type: NetworkType,
    pub state: interface::status::Status,
    pub dr: net::Ipv4Addr,
    pub bdr: net::Ipv4Addr,
    pub metric: u16,
    pub priority: u8,
    pub hello_interval: u16,
    pub dead_interval: u32,
    pub auth_type: AuthType,
    pub passive: bool,
    pub linkup: bool,
    pub neighbors: usize,
    pub adjacencies: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NeighborSummary {
    pub id: net::Ipv4Addr,
    pub addr: net::Ipv4Addr,
    pub iface: String,
    pub state: neighbor::status::Status,
    pub priority: u8,
    pub dr: net::Ipv4Addr,
    pub bdr: net::Ipv4Addr,
    pub db_sum_list: usize,
    pub ls_req_list: usize,
    pub ls_retrans_list: usize,
}

/// one database record. area None for AS wide records.
#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseEntry {
    pub area: Option<net::Ipv4Addr>,
    pub header: lsa::Header,
    pub self_originated: bool,
}

pub type LogHandle = reload::Handle<EnvFilter, Registry>;

pub fn log_filter(verbose: bool) -> EnvFilter {
    if verbose {
        EnvFilter::new("ospfd=debug")
    } else {
        EnvFilter::new("ospfd=info")
    }
}

/// # Control
/// cheap to clone, every method is one request and one reply
#[derive(Clone)]
pub struct Control {
    engine_tx: mpsc::UnboundedSender<EngineEvent>,
    rde_tx: mpsc::UnboundedSender<RdeMessage>,
    fib_tx: mpsc::UnboundedSender<FibMessage>,
    running: Arc<Mutex<Config>>,
    log: Option<LogHandle>,
}

impl Control {
    pub fn new(
        config: Config,
        engine_tx: mpsc::UnboundedSender<EngineEvent>,
        rde_tx: mpsc::UnboundedSender<RdeMessage>,
        fib_tx: mpsc::UnboundedSender<FibMessage>,
        log: Option<LogHandle>,
    ) -> Self {
        Self {
            engine_tx,
            rde_tx,
            fib_tx,
            running: Arc::new(Mutex::new(config)),
            log,
        }
    }

    pub async fn router_id(&self) -> net::Ipv4Addr {
        self.running.lock().await.router_id
    }

    pub async fn interfaces(&self) -> Result<Vec<InterfaceSummary>> {
        let (tx, rx) = oneshot::channel();
        self.engine_tx
            .send(EngineEvent::Control(EngineRequest::Interfaces(tx)))
            .map_err(|_| Error::ChannelClosed("interface engine"))?;
        rx.await.map_err(|_| Error::ChannelClosed("interface engine"))
    }

    pub async fn neighbors(&self) -> Result<Vec<NeighborSummary>> {
        let (tx, rx) = oneshot::channel();
        self.engine_tx
            .send(EngineEvent::Control(EngineRequest::Neighbors(tx)))
            .map_err(|_| Error::ChannelClosed("interface engine"))?;
        rx.await.map_err(|_| Error::ChannelClosed("interface engine"))
    }

    pub async fn database(&self) -> Result<Vec<DatabaseEntry>> {
        let (tx, rx) = oneshot::channel();
        self.rde_tx
            .send(RdeMessage::Control(RdeRequest::Database(tx)))
            .map_err(|_| Error::ChannelClosed("route decision engine"))?;
        rx.await.map_err(|_| Error::ChannelClosed("route decision engine"))
    }

    pub async fn routes(&self) -> Result<Vec<Route>> {
        let (tx, rx) = oneshot::channel();
        self.rde_tx
            .send(RdeMessage::Control(RdeRequest::Routes(tx)))
            .map_err(|_| Error::ChannelClosed("route decision engine"))?;
        rx.await.map_err(|_| Error::ChannelClosed("route decision engine"))
    }

    pub async fn fib(&self) -> Result<Vec<Kroute>> {
        let (tx, rx) = oneshot::channel();
        self.fib_tx
            .send(FibMessage::Show(tx))
            .map_err(|_| Error::ChannelClosed("forwarding"))?;
        rx.await.map_err(|_| Error::ChannelClosed("forwarding"))
    }

    pub fn couple(&self, coupled: bool) -> Result<()> {
        let msg = if coupled {
            FibMessage::Couple
        } else {
            FibMessage::Decouple
        };
        self.fib_tx
            .send(msg)
            .map_err(|_| Error::ChannelClosed("forwarding"))
    }

    /// # reload
    /// read and validate the file, then hand the new configuration to every actor.
    /// a changed router id is refused.
    pub async fn reload(&self, path: impl AsRef<Path>) -> Result<()> {
        let config = Config::load(path)?;
        let mut running = self.running.lock().await;
        config.check_reload(&running)?;
        self.engine_tx
            .send(EngineEvent::Reload(config.clone()))
            .map_err(|_| Error::ChannelClosed("interface engine"))?;
        self.rde_tx
            .send(RdeMessage::Reload(config.clone()))
            .map_err(|_| Error::ChannelClosed("route decision engine"))?;
        if config.fib_coupled != running.fib_coupled {
            self.couple(config.fib_coupled)?;
        }
        info!("configuration reloaded");
        *running = config;
        Ok(())
    }

    pub fn set_verbose(&self, verbose: bool) -> Result<()> {
        let Some(log) = &self.log else {
            return Ok(());
        };
        log.reload(log_filter(verbose))
            .map_err(|err| Error::Invariant(err.to_string()))
    }

    pub fn shutdown(&self) {
        let _ = self.engine_tx.send(EngineEvent::Shutdown);
        let _ = self.rde_tx.send(RdeMessage::Shutdown);
    }
}
