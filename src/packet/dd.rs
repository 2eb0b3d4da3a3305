use bytes::{Buf, BufMut};

use super::OspfPacket;
use crate::lsa;

pub const FEATURE_BIT_I: u8 = 1 << 2;
pub const FEATURE_BIT_M: u8 = 1 << 1;
pub const FEATURE_BIT_MS: u8 = 1 << 0;

#[derive(Clone, Debug, PartialEq)]
pub struct DbDescPacket {
    pub interface_mtu: u16,
    pub options: u8,
    pub bits: u8,
    pub dd_seq_num: u32,
    pub lsa_headers: Vec<lsa::Header>,
}

impl OspfPacket for DbDescPacket {
    fn packet_type(&self) -> u8 {
        super::DB_DESC_TYPE
    }
    fn length(&self) -> usize {
        8 + self.lsa_headers.len() * lsa::Header::length()
    }
    fn put(&self, buf: &mut Vec<u8>) {
        buf.put_u16(self.interface_mtu);
        buf.put_u8(self.options);
        buf.put_u8(self.bits);
        buf.put_u32(self.dd_seq_num);
        for header in &self.lsa_headers {
            header.put(buf);
        }
    }
}

impl DbDescPacket {
    pub fn try_from_be_bytes(payload: &[u8]) -> Option<Self> {
        if payload.len() < 8 || (payload.len() - 8) % lsa::Header::length() != 0 {
            return None;
        }
        let mut buf = payload;
        let interface_mtu = buf.get_u16();
        let options = buf.get_u8();
        let bits = buf.get_u8();
        let dd_seq_num = buf.get_u32();
        let lsa_headers = buf
            .chunks(lsa::Header::length())
            .map(lsa::Header::try_from_be_bytes)
            .collect::<Option<Vec<_>>>()?;
        Some(Self {
            interface_mtu,
            options,
            bits,
            dd_seq_num,
            lsa_headers,
        })
    }

    pub fn is_init(&self) -> bool {
        self.bits & FEATURE_BIT_I != 0
    }
    pub fn is_more(&self) -> bool {
        self.bits & FEATURE_BIT_M != 0
    }
    pub fn is_master(&self) -> bool {
        self.bits & FEATURE_BIT_MS != 0
    }
}
