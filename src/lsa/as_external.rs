use std::net;

use bytes::{Buf, BufMut};

const EXTERNAL_BIT_E: u32 = 0x8000_0000;
const EXTERNAL_TOS_MASK: u32 = 0x7f00_0000;

#[derive(Clone, Debug, PartialEq)]
pub struct ExternalLsa {
    pub mask: net::Ipv4Addr,
    /// type 2 metric when set
    pub type2: bool,
    pub metric: u32,
    pub forwarding: net::Ipv4Addr,
    pub tag: u32,
}

impl ExternalLsa {
    pub fn length(&self) -> usize {
        16
    }
    pub fn put(&self, buf: &mut impl BufMut) {
        buf.put_u32(self.mask.into());
        let mut word = self.metric & super::LSInfinity;
        if self.type2 {
            word |= EXTERNAL_BIT_E;
        }
        buf.put_u32(word);
        buf.put_u32(self.forwarding.into());
        buf.put_u32(self.tag);
    }
    pub fn try_from_be_bytes(payload: &[u8]) -> Option<Self> {
        if payload.len() < 16 {
            return None;
        }
        let mut buf = payload;
        let mask = net::Ipv4Addr::from(buf.get_u32());
        let word = buf.get_u32();
        if word & EXTERNAL_TOS_MASK != 0 {
            return None;
        }
        Some(Self {
            mask,
            type2: word & EXTERNAL_BIT_E != 0,
            metric: word & super::LSInfinity,
            forwarding: net::Ipv4Addr::from(buf.get_u32()),
            tag: buf.get_u32(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_metric_bits_rejected() {
        let ext = ExternalLsa {
            mask: net::Ipv4Addr::new(255, 255, 0, 0),
            type2: true,
            metric: 20,
            forwarding: net::Ipv4Addr::UNSPECIFIED,
            tag: 7,
        };
        let mut bytes = Vec::new();
        ext.put(&mut bytes);
        assert_eq!(bytes[4], 0x80);
        assert_eq!(ExternalLsa::try_from_be_bytes(&bytes), Some(ext));
        bytes[4] |= 0x01;
        assert_eq!(ExternalLsa::try_from_be_bytes(&bytes), None);
    }
}
