use super::OspfPacket;
use crate::lsa;

#[derive(Clone, Debug, PartialEq)]
pub struct LsAckPacket {
    pub headers: Vec<lsa::Header>,
}

impl OspfPacket for LsAckPacket {
    fn packet_type(&self) -> u8 {
        super::LS_ACK_TYPE
    }
    fn length(&self) -> usize {
        self.headers.len() * lsa::Header::length()
    }
    fn put(&self, buf: &mut Vec<u8>) {
        for header in &self.headers {
            header.put(buf);
        }
    }
}

impl LsAckPacket {
    pub fn try_from_be_bytes(payload: &[u8]) -> Option<Self> {
        if payload.len() % lsa::Header::length() != 0 {
            return None;
        }
        let headers = payload
            .chunks(lsa::Header::length())
            .map(lsa::Header::try_from_be_bytes)
            .collect::<Option<Vec<_>>>()?;
        Some(Self { headers })
    }
}
