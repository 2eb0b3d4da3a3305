use std::net;

use bytes::{Buf, BufMut};

/// type 3 (network) and type 4 (asbr) summaries share the same body
#[derive(Clone, Debug, PartialEq)]
pub struct SummaryLsa {
    pub mask: net::Ipv4Addr,
    pub metric: u32,
}

impl SummaryLsa {
    pub fn length(&self) -> usize {
        8
    }
    pub fn put(&self, buf: &mut impl BufMut) {
        buf.put_u32(self.mask.into());
        buf.put_u32(self.metric & super::LSInfinity);
    }
    /// the tos byte ahead of the metric is reserved and must be zero.
    /// trailing tos entries are ignored.
    pub fn try_from_be_bytes(payload: &[u8]) -> Option<Self> {
        if payload.len() < 8 {
            return None;
        }
        let mut buf = payload;
        let mask = net::Ipv4Addr::from(buf.get_u32());
        let metric = buf.get_u32();
        if metric & !super::LSInfinity != 0 {
            return None;
        }
        Some(Self { mask, metric })
    }
}
