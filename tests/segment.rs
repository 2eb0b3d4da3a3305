//! two routers on one broadcast segment, wired through memory

use std::{net, time::Duration};

use tokio::sync::mpsc;

use ospfd::{
    config::Config,
    control::Control,
    engine::{Engine, EngineEvent},
    fib::{Fib, MemorySink},
    interface::{status::Status as IfStatus, trans::TransCommand},
    lsa,
    neighbor::status::Status as NbrStatus,
    rde::Rde,
    rtable::PathType,
};

const ROUTER_A: &str = r#"{
    "router_id": "1.1.1.1",
    "areas": [{ "id": "0.0.0.0", "interfaces": [
        { "name": "eth0", "address": "10.0.0.1/24", "priority": 1 }
    ]}]
}"#;

const ROUTER_B: &str = r#"{
    "router_id": "2.2.2.2",
    "areas": [{ "id": "0.0.0.0", "interfaces": [
        { "name": "eth0", "address": "10.0.0.2/24", "priority": 0 },
        { "name": "lo0", "address": "192.168.2.1/32" }
    ]}]
}"#;

fn addr(s: &str) -> net::Ipv4Addr {
    s.parse().unwrap()
}

struct Router {
    control: Control,
    engine_tx: mpsc::UnboundedSender<EngineEvent>,
    out_rx: mpsc::UnboundedReceiver<TransCommand>,
}

fn start(json: &str) -> Router {
    let config = Config::from_json(json).unwrap();
    let (engine_tx, engine_rx) = mpsc::unbounded_channel();
    let (rde_tx, rde_rx) = mpsc::unbounded_channel();
    let (fib_tx, fib_rx) = mpsc::unbounded_channel();
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let control = Control::new(
        config.clone(),
        engine_tx.clone(),
        rde_tx.clone(),
        fib_tx.clone(),
        None,
    );
    let engine = Engine::new(config.clone(), rde_tx.clone(), out_tx, engine_tx.clone());
    tokio::spawn(engine.run(engine_rx));
    let rde = Rde::new(config, rde_tx.clone(), engine_tx.clone(), fib_tx);
    tokio::spawn(rde.run(rde_rx));
    tokio::spawn(Fib::new(MemorySink::new(), true, rde_tx).run(fib_rx));
    Router {
        control,
        engine_tx,
        out_rx,
    }
}

/// everything sent on eth0 by one side is received on eth0 by the other
fn wire(mut out_rx: mpsc::UnboundedReceiver<TransCommand>, peer: mpsc::UnboundedSender<EngineEvent>) {
    tokio::spawn(async move {
        while let Some(cmd) = out_rx.recv().await {
            if let TransCommand::Send {
                ifname,
                src,
                dst,
                data,
            } = cmd
            {
                if ifname == "eth0" {
                    let _ = peer.send(EngineEvent::Packet {
                        ifname,
                        src,
                        dst,
                        data,
                    });
                }
            }
        }
    });
}

fn link_up(router: &Router, ifname: &str, loopback: bool) {
    router
        .engine_tx
        .send(EngineEvent::Link {
            ifname: ifname.into(),
            up: true,
            loopback,
        })
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn two_routers_reach_full_and_route() {
    let a = start(ROUTER_A);
    let b = start(ROUTER_B);
    link_up(&a, "eth0", false);
    link_up(&b, "eth0", false);
    link_up(&b, "lo0", true);
    let Router {
        control: a_control,
        engine_tx: a_tx,
        out_rx: a_out,
    } = a;
    let Router {
        control: b_control,
        engine_tx: b_tx,
        out_rx: b_out,
    } = b;
    wire(a_out, b_tx);
    wire(b_out, a_tx);

    // wait timer, exchange and a route computation
    tokio::time::sleep(Duration::from_secs(120)).await;

    let iface = a_control
        .interfaces()
        .await
        .unwrap()
        .into_iter()
        .find(|i| i.name == "eth0")
        .unwrap();
    assert_eq!(iface.state, IfStatus::DR);
    assert_eq!(iface.dr, addr("10.0.0.1"));
    assert_eq!(iface.bdr, net::Ipv4Addr::UNSPECIFIED);

    let nbrs = a_control.neighbors().await.unwrap();
    assert_eq!(nbrs.len(), 1);
    assert_eq!(nbrs[0].id, addr("2.2.2.2"));
    assert_eq!(nbrs[0].state, NbrStatus::Full);
    let nbrs = b_control.neighbors().await.unwrap();
    assert_eq!(nbrs.len(), 1);
    assert_eq!(nbrs[0].state, NbrStatus::Full);

    for control in [&a_control, &b_control] {
        let db = control.database().await.unwrap();
        let count = |t: u8| db.iter().filter(|e| e.header.ls_type == t).count();
        assert_eq!(count(lsa::ROUTER_LSA_TYPE), 2);
        assert_eq!(count(lsa::NETWORK_LSA_TYPE), 1);
    }

    let routes = a_control.routes().await.unwrap();
    let loopback = routes
        .iter()
        .find(|r| r.key.prefix == addr("192.168.2.1") && r.key.prefixlen == 32)
        .unwrap();
    assert_eq!(loopback.path_type, PathType::IntraArea);
    assert_eq!(loopback.cost, 10);
    assert_eq!(loopback.nexthop, addr("10.0.0.2"));

    let fib = a_control.fib().await.unwrap();
    let installed = fib
        .iter()
        .find(|k| k.prefix == "192.168.2.1/32".parse().unwrap())
        .unwrap();
    assert_eq!(installed.nexthop, addr("10.0.0.2"));
    assert_eq!(installed.metric, 10);
}
