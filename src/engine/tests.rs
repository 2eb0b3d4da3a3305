use std::time::Duration;

use super::*;
use crate::{
    interface::status::Status as IfStatus,
    lsa::{Body, InitialSequenceNumber, Lsa, NetworkLsa},
    neighbor::{status::Status as NbrStatus, LastDd},
    packet::{
        auth::Auth,
        dd::{FEATURE_BIT_I, FEATURE_BIT_M, FEATURE_BIT_MS},
        DbDescPacket, LsAckPacket, OspfPacketHeader, Packet,
    },
};

const CONFIG: &str = r#"{
    "router_id": "1.1.1.1",
    "areas": [{ "id": "0.0.0.0", "interfaces": [
        { "name": "eth0", "address": "10.0.0.1/24" },
        { "name": "eth1", "address": "10.1.0.1/24" }
    ]}]
}"#;

fn addr(s: &str) -> net::Ipv4Addr {
    s.parse().unwrap()
}

fn record(seq: i32) -> Vec<u8> {
    Lsa::new(
        lsa::NETWORK_LSA_TYPE,
        addr("10.9.0.1"),
        addr("9.9.9.9"),
        seq,
        crate::OPTION_E,
        Body::Network(NetworkLsa {
            mask: addr("255.255.255.0"),
            attached: vec![addr("9.9.9.9")],
        }),
    )
    .to_be_bytes()
}

fn header(data: &[u8]) -> lsa::Header {
    lsa::Header::try_from_be_bytes(data).unwrap()
}

struct Harness {
    engine: Engine,
    rde_rx: mpsc::UnboundedReceiver<RdeMessage>,
    out_rx: mpsc::UnboundedReceiver<TransCommand>,
    event_rx: mpsc::UnboundedReceiver<EngineEvent>,
}

impl Harness {
    /// both interfaces up, the local router designated on each
    fn new() -> Self {
        let (rde_tx, rde_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let config = Config::from_json(CONFIG).unwrap();
        let mut engine = Engine::new(config, rde_tx, out_tx, event_tx);
        for iface in engine.interfaces.values_mut() {
            iface.linkup = true;
            iface.state = IfStatus::DR;
            iface.dr = iface.addr;
        }
        let mut h = Self {
            engine,
            rde_rx,
            out_rx,
            event_rx,
        };
        h.sent();
        h.rde();
        h
    }

    fn neighbor(&mut self, ifname: &str, id: &str, nbr_addr: &str, state: NbrStatus) -> u32 {
        let peerid = self
            .engine
            .add_neighbor(ifname, addr(id), addr(nbr_addr), false);
        self.nbr(peerid).state = state;
        self.rde();
        peerid
    }

    fn nbr(&mut self, peerid: u32) -> &mut Neighbor {
        self.engine.neighbors.get_mut(&peerid).unwrap()
    }

    fn iface(&mut self, ifname: &str) -> &mut Interface {
        self.engine.interfaces.get_mut(ifname).unwrap()
    }

    /// packets handed to the transport, decoded
    fn sent(&mut self) -> Vec<(String, net::Ipv4Addr, Packet)> {
        let mut out = Vec::new();
        while let Ok(cmd) = self.out_rx.try_recv() {
            if let TransCommand::Send {
                ifname, dst, data, ..
            } = cmd
            {
                let header = OspfPacketHeader::try_from_be_bytes(&data).unwrap();
                out.push((ifname, dst, Packet::decode_body(&header, &data).unwrap()));
            }
        }
        out
    }

    fn rde(&mut self) -> Vec<RdeMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = self.rde_rx.try_recv() {
            out.push(msg);
        }
        out
    }

    /// a packet from neighbor `id` at `src` arriving on `ifname`
    fn receive(&mut self, ifname: &str, id: &str, src: &str, body: &dyn packet::OspfPacket) {
        let data = packet::encode(
            body,
            addr(id),
            net::Ipv4Addr::UNSPECIFIED,
            &mut Auth::none(),
        );
        self.engine.handle(EngineEvent::Packet {
            ifname: ifname.into(),
            src: addr(src),
            dst: crate::ALL_SPF_ROUTERS,
            data,
        });
    }

    async fn settle(&mut self, secs: u64) {
        tokio::time::sleep(Duration::from_secs(secs)).await;
        while let Ok(event) = self.event_rx.try_recv() {
            self.engine.handle(event);
        }
    }
}

fn dd(bits: u8, seq: u32, headers: Vec<lsa::Header>) -> DbDescPacket {
    DbDescPacket {
        interface_mtu: crate::IPV4_PACKET_MTU as u16,
        options: crate::OPTION_E,
        bits,
        dd_seq_num: seq,
        lsa_headers: headers,
    }
}

fn db_descriptions(sent: &[(String, net::Ipv4Addr, Packet)]) -> Vec<DbDescPacket> {
    sent.iter()
        .filter_map(|(_, _, p)| match p {
            Packet::DbDesc(dd) => Some(dd.clone()),
            _ => None,
        })
        .collect()
}

#[tokio::test(start_paused = true)]
async fn flood_skips_the_sender_and_neighbors_not_exchanging() {
    let mut h = Harness::new();
    let from = h.neighbor("eth0", "2.2.2.2", "10.0.0.2", NbrStatus::Full);
    let other = h.neighbor("eth0", "3.3.3.3", "10.0.0.3", NbrStatus::Full);
    let idle = h.neighbor("eth0", "4.4.4.4", "10.0.0.4", NbrStatus::TwoWay);

    let data = record(InitialSequenceNumber);
    let key = header(&data).key();
    h.engine.handle(EngineEvent::Rde(EngineMessage::Flood {
        area: Some(net::Ipv4Addr::UNSPECIFIED),
        origin: from,
        lsa: data,
    }));

    assert!(h.nbr(from).ls_retrans_list.is_empty());
    assert!(h.nbr(other).ls_retrans_list.contains_key(&key));
    assert!(h.nbr(other).ls_retrans_timer.is_armed());
    assert!(h.nbr(idle).ls_retrans_list.is_empty());

    // one update back out the receiving interface, nothing on eth1
    let sent = h.sent();
    assert_eq!(sent.len(), 1);
    let (ifname, dst, packet) = &sent[0];
    assert_eq!((ifname.as_str(), *dst), ("eth0", crate::ALL_SPF_ROUTERS));
    let Packet::LsUpdate(update) = packet else {
        panic!("expected an update, got {packet:?}");
    };
    assert_eq!(header(&update.lsas[0]).key(), key);
    // flooding back to the sender acknowledged it implicitly
    assert!(h.iface("eth0").ls_ack_list.is_empty());
}

#[tokio::test(start_paused = true)]
async fn nobody_to_flood_to_gets_a_delayed_ack() {
    let mut h = Harness::new();
    let from = h.neighbor("eth0", "2.2.2.2", "10.0.0.2", NbrStatus::Full);

    let data = record(InitialSequenceNumber);
    let received = header(&data);
    h.engine.handle(EngineEvent::Rde(EngineMessage::Flood {
        area: Some(net::Ipv4Addr::UNSPECIFIED),
        origin: from,
        lsa: data,
    }));
    assert!(h.sent().is_empty());
    assert_eq!(h.iface("eth0").ls_ack_list.len(), 1);

    h.settle(2).await;
    let sent = h.sent();
    assert_eq!(sent.len(), 1);
    let (ifname, dst, packet) = &sent[0];
    assert_eq!((ifname.as_str(), *dst), ("eth0", crate::ALL_SPF_ROUTERS));
    assert_eq!(
        packet,
        &Packet::LsAck(LsAckPacket {
            headers: vec![received]
        })
    );
    assert!(h.iface("eth0").ls_ack_list.is_empty());
}

#[tokio::test(start_paused = true)]
async fn backup_leaves_flooding_from_the_dr_to_the_dr() {
    let mut h = Harness::new();
    let dr = h.neighbor("eth0", "2.2.2.2", "10.0.0.2", NbrStatus::Full);
    let other = h.neighbor("eth0", "3.3.3.3", "10.0.0.3", NbrStatus::Full);
    let eth0 = h.iface("eth0");
    eth0.state = IfStatus::Backup;
    eth0.dr = addr("10.0.0.2");
    eth0.bdr = addr("10.0.0.1");

    let data = record(InitialSequenceNumber);
    let key = header(&data).key();
    h.engine.handle(EngineEvent::Rde(EngineMessage::Flood {
        area: Some(net::Ipv4Addr::UNSPECIFIED),
        origin: dr,
        lsa: data,
    }));
    // queued for retransmission in case the DR fails, but not sent
    assert!(h.nbr(other).ls_retrans_list.contains_key(&key));
    assert!(h.sent().is_empty());
    assert_eq!(h.iface("eth0").ls_ack_list.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn flood_settles_requests_and_replaces_older_retransmissions() {
    let mut h = Harness::new();
    let loading = h.neighbor("eth0", "2.2.2.2", "10.0.0.2", NbrStatus::Loading);
    let ahead = h.neighbor("eth0", "3.3.3.3", "10.0.0.3", NbrStatus::Loading);
    let full = h.neighbor("eth1", "4.4.4.4", "10.1.0.4", NbrStatus::Full);

    let old = record(InitialSequenceNumber);
    let new = record(InitialSequenceNumber + 1);
    let newer = record(InitialSequenceNumber + 2);
    let key = header(&new).key();

    // the neighbor asked for exactly this instance
    h.nbr(loading).ls_req_list.insert(key, header(&new));
    // this one announced a newer instance than the one being flooded
    h.nbr(ahead).ls_req_list.insert(key, header(&newer));
    let handle = h.engine.ctx.cache.add(&old).unwrap();
    let Engine { ctx, neighbors, .. } = &mut h.engine;
    neighbors
        .get_mut(&full)
        .unwrap()
        .retrans_add(&mut ctx.cache, key, handle);
    h.engine.ctx.cache.release(handle);

    h.engine.handle(EngineEvent::Rde(EngineMessage::Flood {
        area: Some(net::Ipv4Addr::UNSPECIFIED),
        origin: 0,
        lsa: new.clone(),
    }));

    // the request is satisfied, nothing left to load
    assert!(h.nbr(loading).ls_req_list.is_empty());
    assert!(h.nbr(loading).ls_retrans_list.is_empty());
    assert_eq!(h.nbr(loading).state, NbrStatus::Full);
    assert!(h.rde().iter().any(|m| matches!(
        m,
        RdeMessage::NeighborState { peerid, state: NbrStatus::Full } if *peerid == loading
    )));

    // still waiting for the newer instance, nothing queued
    assert!(h.nbr(ahead).ls_req_list.contains_key(&key));
    assert!(h.nbr(ahead).ls_retrans_list.is_empty());
    assert_eq!(h.nbr(ahead).state, NbrStatus::Loading);

    // the older copy is replaced and its cache slot freed
    let cache = &h.engine.ctx.cache;
    let nbr = &h.engine.neighbors[&full];
    assert!(nbr.retrans_matches(cache, &header(&new)));
    assert!(!nbr.retrans_matches(cache, &header(&old)));
    assert_eq!(cache.len(), 1);

    // flooded on eth1 only
    let sent = h.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "eth1");
}

#[tokio::test(start_paused = true)]
async fn acks_remove_only_the_instance_sent() {
    let mut h = Harness::new();
    let peer = h.neighbor("eth0", "2.2.2.2", "10.0.0.2", NbrStatus::Full);
    let data = record(InitialSequenceNumber + 1);
    let flooded = header(&data);
    h.engine.handle(EngineEvent::Rde(EngineMessage::Flood {
        area: Some(net::Ipv4Addr::UNSPECIFIED),
        origin: 0,
        lsa: data,
    }));
    h.sent();
    assert_eq!(h.nbr(peer).ls_retrans_list.len(), 1);

    let older = header(&record(InitialSequenceNumber));
    let bad_checksum = lsa::Header {
        checksum: flooded.checksum ^ 1,
        ..flooded
    };
    for headers in [vec![older], vec![bad_checksum]] {
        h.receive("eth0", "2.2.2.2", "10.0.0.2", &LsAckPacket { headers });
        assert_eq!(h.nbr(peer).ls_retrans_list.len(), 1);
        assert!(h.nbr(peer).ls_retrans_timer.is_armed());
    }

    h.receive(
        "eth0",
        "2.2.2.2",
        "10.0.0.2",
        &LsAckPacket {
            headers: vec![flooded],
        },
    );
    assert!(h.nbr(peer).ls_retrans_list.is_empty());
    assert!(!h.nbr(peer).ls_retrans_timer.is_armed());
    assert!(h.engine.ctx.cache.is_empty());
}

#[tokio::test(start_paused = true)]
async fn higher_router_id_becomes_master() {
    let mut h = Harness::new();
    let peer = h.neighbor("eth0", "9.9.9.9", "10.0.0.9", NbrStatus::ExStart);
    h.nbr(peer).dd_seq_num = 100;

    let init = FEATURE_BIT_I | FEATURE_BIT_M | FEATURE_BIT_MS;
    h.receive("eth0", "9.9.9.9", "10.0.0.9", &dd(init, 5000, vec![]));
    let nbr = h.nbr(peer);
    assert!(nbr.master);
    assert_eq!(nbr.dd_seq_num, 5000);
    assert_eq!(nbr.state, NbrStatus::Snapshot);
    assert!(h
        .rde()
        .iter()
        .any(|m| matches!(m, RdeMessage::DbSnapshot { peerid } if *peerid == peer)));

    // the snapshot arrives, the slave answers with the master's sequence number
    h.engine
        .handle(EngineEvent::Rde(EngineMessage::DbSnapshotEnd { peerid: peer }));
    assert_eq!(h.nbr(peer).state, NbrStatus::Exchange);
    let sent = db_descriptions(&h.sent());
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].dd_seq_num, 5000);
    assert!(!sent[0].is_master());
    assert!(!sent[0].is_init());
}

#[tokio::test(start_paused = true)]
async fn lower_router_id_follows_our_sequence_number() {
    let mut h = Harness::new();
    let peer = h.neighbor("eth0", "0.9.9.9", "10.0.0.9", NbrStatus::ExStart);
    h.nbr(peer).dd_seq_num = 7000;

    // a lower router id claiming mastership is ignored
    let init = FEATURE_BIT_I | FEATURE_BIT_M | FEATURE_BIT_MS;
    h.receive("eth0", "0.9.9.9", "10.0.0.9", &dd(init, 42, vec![]));
    assert_eq!(h.nbr(peer).state, NbrStatus::ExStart);
    assert_eq!(h.nbr(peer).dd_seq_num, 7000);
    assert!(h.rde().is_empty());

    let offered = header(&record(InitialSequenceNumber));
    h.receive("eth0", "0.9.9.9", "10.0.0.9", &dd(0, 7000, vec![offered]));
    let nbr = h.nbr(peer);
    assert!(!nbr.master);
    assert_eq!(nbr.dd_seq_num, 7001);
    assert_eq!(nbr.state, NbrStatus::Snapshot);
    assert_eq!(nbr.dd_pending, 2);
    let msgs = h.rde();
    assert!(msgs.iter().any(|m| matches!(
        m,
        RdeMessage::DdHeaders { peerid, headers } if *peerid == peer && headers == &vec![offered]
    )));
    assert!(msgs
        .iter()
        .any(|m| matches!(m, RdeMessage::DbSnapshot { peerid } if *peerid == peer)));
}

#[tokio::test(start_paused = true)]
async fn unexpected_sequence_number_restarts_the_exchange() {
    let mut h = Harness::new();
    let peer = h.neighbor("eth0", "0.9.9.9", "10.0.0.9", NbrStatus::Exchange);
    let nbr = h.nbr(peer);
    nbr.master = false;
    nbr.dd_seq_num = 7001;
    nbr.last_rx_dd = Some(LastDd {
        options: crate::OPTION_E,
        bits: 0,
        seq_num: 7000,
    });

    h.receive("eth0", "0.9.9.9", "10.0.0.9", &dd(0, 9999, vec![]));
    assert_eq!(h.nbr(peer).state, NbrStatus::ExStart);
    assert!(h.rde().iter().any(|m| matches!(
        m,
        RdeMessage::NeighborState { peerid, state: NbrStatus::ExStart } if *peerid == peer
    )));
    let sent = db_descriptions(&h.sent());
    assert_eq!(sent.len(), 1);
    assert!(sent[0].is_init() && sent[0].is_master() && sent[0].is_more());
    assert_ne!(sent[0].dd_seq_num, 7001);
}

#[tokio::test(start_paused = true)]
async fn slave_answers_a_repeated_description() {
    let mut h = Harness::new();
    let peer = h.neighbor("eth0", "9.9.9.9", "10.0.0.9", NbrStatus::Exchange);
    let last_sent = dd(0, 5001, vec![]);
    let nbr = h.nbr(peer);
    nbr.master = true;
    nbr.dd_seq_num = 5001;
    nbr.last_rx_dd = Some(LastDd {
        options: crate::OPTION_E,
        bits: FEATURE_BIT_M | FEATURE_BIT_MS,
        seq_num: 5001,
    });
    nbr.last_tx_dd = Some(last_sent.clone());

    h.receive(
        "eth0",
        "9.9.9.9",
        "10.0.0.9",
        &dd(FEATURE_BIT_M | FEATURE_BIT_MS, 5001, vec![]),
    );
    assert_eq!(h.nbr(peer).state, NbrStatus::Exchange);
    assert_eq!(db_descriptions(&h.sent()), vec![last_sent]);
}

#[tokio::test(start_paused = true)]
async fn requests_wait_for_loading() {
    let mut h = Harness::new();
    let peer = h.neighbor("eth0", "2.2.2.2", "10.0.0.2", NbrStatus::Exchange);
    let wanted = header(&record(InitialSequenceNumber));
    h.engine.handle(EngineEvent::Rde(EngineMessage::DdRequests {
        peerid: peer,
        headers: vec![wanted],
    }));
    assert_eq!(h.nbr(peer).ls_req_list.len(), 1);
    assert!(h.sent().is_empty());

    h.engine.send_ls_req(peer);
    assert!(h.sent().is_empty());
    assert!(!h.nbr(peer).ls_req_timer.is_armed());

    h.nbr(peer).state = NbrStatus::Loading;
    h.engine.send_ls_req(peer);
    let sent = h.sent();
    assert_eq!(sent.len(), 1);
    let (_, dst, packet) = &sent[0];
    assert_eq!(*dst, addr("10.0.0.2"));
    let Packet::LsRequest(req) = packet else {
        panic!("expected a request, got {packet:?}");
    };
    assert_eq!(req.entries.len(), 1);
    assert_eq!(req.entries[0].key(), Some(wanted.key()));
    assert!(h.nbr(peer).ls_req_timer.is_armed());
}
