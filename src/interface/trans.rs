//! raw IP transport: one socket per interface, bound to the device, protocol 89.

use std::{
    collections::HashMap,
    io::{self, Read},
    net,
};

use pnet::packet::{ipv4::Ipv4Packet, Packet};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use tokio::{io::unix::AsyncFd, sync::mpsc, task::JoinHandle};
use tracing::{debug, error, info, trace, warn};

use crate::{engine::EngineEvent, IPV4_PACKET_MTU, OSPF_IP_PROTOCOL};

/// what the interface engine asks of the transport
#[derive(Debug, Clone, PartialEq)]
pub enum TransCommand {
    Open {
        ifname: String,
        addr: net::Ipv4Addr,
    },
    Close {
        ifname: String,
    },
    Join {
        ifname: String,
        group: net::Ipv4Addr,
    },
    Leave {
        ifname: String,
        group: net::Ipv4Addr,
    },
    Send {
        ifname: String,
        src: net::Ipv4Addr,
        dst: net::Ipv4Addr,
        data: Vec<u8>,
    },
}

struct RawInterface {
    addr: net::Ipv4Addr,
    socket: std::sync::Arc<AsyncFd<Socket>>,
    reader: JoinHandle<()>,
}

impl Drop for RawInterface {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

fn open_socket(ifname: &str, addr: net::Ipv4Addr) -> io::Result<Socket> {
    let socket = Socket::new(
        Domain::IPV4,
        Type::RAW,
        Some(Protocol::from(OSPF_IP_PROTOCOL as i32)),
    )?;
    socket.bind_device(Some(ifname.as_bytes()))?;
    socket.set_multicast_if_v4(&addr)?;
    socket.set_multicast_ttl_v4(1)?;
    socket.set_multicast_loop_v4(false)?;
    socket.set_ttl(1)?;
    socket.set_nonblocking(true)?;
    Ok(socket)
}

async fn read_loop(
    ifname: String,
    socket: std::sync::Arc<AsyncFd<Socket>>,
    addr: net::Ipv4Addr,
    event_tx: mpsc::UnboundedSender<EngineEvent>,
) {
    let mut buf = vec![0u8; IPV4_PACKET_MTU * 4];
    loop {
        let mut guard = match socket.readable().await {
            Ok(guard) => guard,
            Err(err) => {
                error!(iface = %ifname, %err, "raw socket failed");
                return;
            }
        };
        let len = match guard.try_io(|inner| {
            let mut socket: &Socket = inner.get_ref();
            socket.read(&mut buf)
        }) {
            Ok(Ok(len)) => len,
            Ok(Err(err)) => {
                warn!(iface = %ifname, %err, "receive failed");
                continue;
            }
            Err(_would_block) => continue,
        };
        let Some(ip) = Ipv4Packet::new(&buf[..len]) else {
            debug!(iface = %ifname, "short ip packet dropped");
            continue;
        };
        if ip.get_next_level_protocol().0 != OSPF_IP_PROTOCOL {
            continue;
        }
        let src = ip.get_source();
        if src == addr {
            continue;
        }
        trace!(iface = %ifname, %src, len, "packet received");
        let event = EngineEvent::Packet {
            ifname: ifname.clone(),
            src,
            dst: ip.get_destination(),
            data: ip.payload().to_vec(),
        };
        if event_tx.send(event).is_err() {
            return;
        }
    }
}

/// # run
/// the transport task: opens sockets on request, forwards received OSPF packets
/// to the engine and sends what the engine hands it.
pub async fn run(
    mut rx: mpsc::UnboundedReceiver<TransCommand>,
    event_tx: mpsc::UnboundedSender<EngineEvent>,
) {
    let mut raw: HashMap<String, RawInterface> = HashMap::new();
    while let Some(cmd) = rx.recv().await {
        match cmd {
            TransCommand::Open { ifname, addr } => {
                let socket = match open_socket(&ifname, addr).and_then(AsyncFd::new) {
                    Ok(socket) => std::sync::Arc::new(socket),
                    Err(err) => {
                        error!(iface = %ifname, %err, "cannot open raw socket");
                        continue;
                    }
                };
                let reader = tokio::spawn(read_loop(
                    ifname.clone(),
                    socket.clone(),
                    addr,
                    event_tx.clone(),
                ));
                info!(iface = %ifname, %addr, "raw socket opened");
                raw.insert(
                    ifname,
                    RawInterface {
                        addr,
                        socket,
                        reader,
                    },
                );
            }
            TransCommand::Close { ifname } => {
                raw.remove(&ifname);
            }
            TransCommand::Join { ifname, group } => {
                if let Some(r) = raw.get(&ifname) {
                    if let Err(err) = r.socket.get_ref().join_multicast_v4(&group, &r.addr) {
                        warn!(iface = %ifname, %group, %err, "join failed");
                    }
                }
            }
            TransCommand::Leave { ifname, group } => {
                if let Some(r) = raw.get(&ifname) {
                    if let Err(err) = r.socket.get_ref().leave_multicast_v4(&group, &r.addr) {
                        debug!(iface = %ifname, %group, %err, "leave failed");
                    }
                }
            }
            TransCommand::Send {
                ifname, dst, data, ..
            } => {
                let Some(r) = raw.get(&ifname) else {
                    continue;
                };
                let target = SockAddr::from(net::SocketAddrV4::new(dst, 0));
                if let Err(err) = r.socket.get_ref().send_to(&data, &target) {
                    warn!(iface = %ifname, %dst, %err, "send failed");
                }
            }
        }
    }
}
