use std::net;

use bytes::{Buf, BufMut};

use super::OspfPacket;

/// # struct HelloPacket
/// - dr / bdr : interface addresses of the designated routers as seen by the sender
/// - neighbors : router ids the sender heard from within the dead interval
#[derive(Clone, Debug, PartialEq)]
pub struct HelloPacket {
    pub network_mask: net::Ipv4Addr,
    pub hello_interval: u16,
    pub options: u8,
    pub priority: u8,
    pub dead_interval: u32,
    pub dr: net::Ipv4Addr,
    pub bdr: net::Ipv4Addr,
    pub neighbors: Vec<net::Ipv4Addr>,
}

impl OspfPacket for HelloPacket {
    fn packet_type(&self) -> u8 {
        super::HELLO_TYPE
    }
    fn length(&self) -> usize {
        20 + 4 * self.neighbors.len()
    }
    fn put(&self, buf: &mut Vec<u8>) {
        buf.put_u32(self.network_mask.into());
        buf.put_u16(self.hello_interval);
        buf.put_u8(self.options);
        buf.put_u8(self.priority);
        buf.put_u32(self.dead_interval);
        buf.put_u32(self.dr.into());
        buf.put_u32(self.bdr.into());
        for neighbor in &self.neighbors {
            buf.put_u32((*neighbor).into());
        }
    }
}

impl HelloPacket {
    pub fn try_from_be_bytes(payload: &[u8]) -> Option<Self> {
        if payload.len() < 20 || payload.len() % 4 != 0 {
            return None;
        }
        let mut buf = payload;
        let network_mask = net::Ipv4Addr::from(buf.get_u32());
        let hello_interval = buf.get_u16();
        let options = buf.get_u8();
        let priority = buf.get_u8();
        let dead_interval = buf.get_u32();
        let dr = net::Ipv4Addr::from(buf.get_u32());
        let bdr = net::Ipv4Addr::from(buf.get_u32());
        let mut neighbors = Vec::with_capacity(buf.remaining() / 4);
        while buf.has_remaining() {
            neighbors.push(net::Ipv4Addr::from(buf.get_u32()));
        }
        Some(Self {
            network_mask,
            hello_interval,
            options,
            priority,
            dead_interval,
            dr,
            bdr,
            neighbors,
        })
    }
}
