use std::net;

use bytes::{Buf, BufMut};

pub const ROUTER_FLAG_V: u8 = 0x04;
pub const ROUTER_FLAG_E: u8 = 0x02;
pub const ROUTER_FLAG_B: u8 = 0x01;

pub const LINK_TYPE_POINT_TO_POINT: u8 = 1;
pub const LINK_TYPE_TRANSIT: u8 = 2;
pub const LINK_TYPE_STUB: u8 = 3;
pub const LINK_TYPE_VIRTUAL: u8 = 4;

#[derive(Clone, Debug, PartialEq)]
pub struct RouterLsa {
    pub flags: u8,
    pub links: Vec<RouterLink>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RouterLink {
    pub link_id: net::Ipv4Addr,
    pub link_data: net::Ipv4Addr,
    pub link_type: u8,
    pub metric: u16,
    pub tos: Vec<u32>,
}

impl RouterLink {
    pub fn put(&self, buf: &mut impl BufMut) {
        buf.put_u32(self.link_id.into());
        buf.put_u32(self.link_data.into());
        buf.put_u8(self.link_type);
        buf.put_u8(self.tos.len() as u8);
        buf.put_u16(self.metric);
        for tos in &self.tos {
            buf.put_u32(*tos);
        }
    }

    // the passed tos is host endian
    pub fn tos_type(tos: u32) -> u8 {
        (tos >> 24) as u8
    }
    pub fn tos_metric(tos: u32) -> u16 {
        (tos & 0xffff) as u16
    }
    pub fn length(&self) -> usize {
        12 + self.tos.len() * 4
    }
    pub fn try_from_be_bytes(payload: &[u8]) -> Option<Self> {
        if payload.len() < 12 {
            return None;
        }
        let mut buf = payload;
        let link_id = net::Ipv4Addr::from(buf.get_u32());
        let link_data = net::Ipv4Addr::from(buf.get_u32());
        let link_type = buf.get_u8();
        let tos_count = buf.get_u8() as usize;
        let metric = buf.get_u16();
        if buf.remaining() < tos_count * 4 {
            return None;
        }
        let tos = (0..tos_count).map(|_| buf.get_u32()).collect();
        Some(Self {
            link_id,
            link_data,
            link_type,
            metric,
            tos,
        })
    }
}

impl RouterLsa {
    pub fn is_border(&self) -> bool {
        self.flags & ROUTER_FLAG_B != 0
    }
    pub fn is_asbr(&self) -> bool {
        self.flags & ROUTER_FLAG_E != 0
    }

    /// every declared link has to fit in the body, anything else is a malformed record
    pub fn try_from_be_bytes(payload: &[u8]) -> Option<Self> {
        if payload.len() < 4 {
            return None;
        }
        let flags = payload[0];
        let link_count = u16::from_be_bytes([payload[2], payload[3]]);
        let mut links = Vec::with_capacity(link_count as usize);
        let mut offset = 4;
        for _ in 0..link_count {
            let link = RouterLink::try_from_be_bytes(&payload[offset..])?;
            offset += link.length();
            links.push(link);
        }
        if offset != payload.len() {
            return None;
        }
        Some(Self { flags, links })
    }
    pub fn put(&self, buf: &mut impl BufMut) {
        buf.put_u8(self.flags);
        buf.put_u8(0);
        buf.put_u16(self.links.len() as u16);
        for link in &self.links {
            link.put(buf);
        }
    }
    pub fn length(&self) -> usize {
        4 + self.links.iter().map(RouterLink::length).sum::<usize>()
    }
}
