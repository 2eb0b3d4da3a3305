use std::net;

use bytes::{Buf, BufMut};

#[derive(Clone, Debug, PartialEq)]
pub struct NetworkLsa {
    pub mask: net::Ipv4Addr,
    pub attached: Vec<net::Ipv4Addr>,
}

impl NetworkLsa {
    pub fn length(&self) -> usize {
        4 + 4 * self.attached.len()
    }
    pub fn put(&self, buf: &mut impl BufMut) {
        buf.put_u32(self.mask.into());
        for router in &self.attached {
            buf.put_u32((*router).into());
        }
    }
    pub fn try_from_be_bytes(payload: &[u8]) -> Option<Self> {
        if payload.len() < 4 || payload.len() % 4 != 0 {
            return None;
        }
        let mut buf = payload;
        let mask = net::Ipv4Addr::from(buf.get_u32());
        let mut attached = Vec::with_capacity(buf.remaining() / 4);
        while buf.has_remaining() {
            attached.push(net::Ipv4Addr::from(buf.get_u32()));
        }
        Some(Self { mask, attached })
    }
}
