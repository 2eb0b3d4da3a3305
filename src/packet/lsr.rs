use std::net;

use bytes::{Buf, BufMut};

use super::OspfPacket;
use crate::lsa;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LsrEntry {
    pub ls_type: u32,
    pub ls_id: net::Ipv4Addr,
    pub adv_rtr: net::Ipv4Addr,
}

impl LsrEntry {
    pub fn length() -> usize {
        12
    }
    pub fn key(&self) -> Option<lsa::LsaKey> {
        let ls_type = u8::try_from(self.ls_type).ok()?;
        Some(lsa::LsaKey {
            ls_type,
            ls_id: self.ls_id,
            adv_rtr: self.adv_rtr,
        })
    }
}

impl From<lsa::LsaKey> for LsrEntry {
    fn from(key: lsa::LsaKey) -> Self {
        Self {
            ls_type: key.ls_type as u32,
            ls_id: key.ls_id,
            adv_rtr: key.adv_rtr,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct LsRequestPacket {
    pub entries: Vec<LsrEntry>,
}

impl OspfPacket for LsRequestPacket {
    fn packet_type(&self) -> u8 {
        super::LS_REQUEST_TYPE
    }
    fn length(&self) -> usize {
        self.entries.len() * LsrEntry::length()
    }
    fn put(&self, buf: &mut Vec<u8>) {
        for entry in &self.entries {
            buf.put_u32(entry.ls_type);
            buf.put_u32(entry.ls_id.into());
            buf.put_u32(entry.adv_rtr.into());
        }
    }
}

impl LsRequestPacket {
    pub fn try_from_be_bytes(payload: &[u8]) -> Option<Self> {
        if payload.len() % LsrEntry::length() != 0 {
            return None;
        }
        let mut buf = payload;
        let mut entries = Vec::with_capacity(payload.len() / LsrEntry::length());
        while buf.has_remaining() {
            entries.push(LsrEntry {
                ls_type: buf.get_u32(),
                ls_id: net::Ipv4Addr::from(buf.get_u32()),
                adv_rtr: net::Ipv4Addr::from(buf.get_u32()),
            });
        }
        Some(Self { entries })
    }
}
