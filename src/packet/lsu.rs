use bytes::{Buf, BufMut};

use super::OspfPacket;
use crate::lsa;

/// records are kept encoded, validation is the database's business
#[derive(Clone, Debug, PartialEq)]
pub struct LsUpdatePacket {
    pub lsas: Vec<Vec<u8>>,
}

impl OspfPacket for LsUpdatePacket {
    fn packet_type(&self) -> u8 {
        super::LS_UPDATE_TYPE
    }
    fn length(&self) -> usize {
        4 + self.lsas.iter().map(Vec::len).sum::<usize>()
    }
    fn put(&self, buf: &mut Vec<u8>) {
        buf.put_u32(self.lsas.len() as u32);
        for lsa in &self.lsas {
            buf.put_slice(lsa);
        }
    }
}

impl LsUpdatePacket {
    pub fn try_from_be_bytes(payload: &[u8]) -> Option<Self> {
        if payload.len() < 4 {
            return None;
        }
        let mut buf = payload;
        let count = buf.get_u32();
        let mut lsas = Vec::new();
        for _ in 0..count {
            let header = lsa::Header::try_from_be_bytes(buf)?;
            let length = header.length as usize;
            if length < lsa::Header::length() || length > buf.len() {
                return None;
            }
            lsas.push(buf[..length].to_vec());
            buf.advance(length);
        }
        Some(Self { lsas })
    }

    /// # age_for_transmit
    /// copy of an encoded record with the per hop transmit delay added
    pub fn age_for_transmit(lsa: &[u8], transmit_delay: u16) -> Vec<u8> {
        let mut data = lsa.to_vec();
        if let Some(header) = lsa::Header::try_from_be_bytes(lsa) {
            lsa::set_age(&mut data, header.age.saturating_add(transmit_delay));
        }
        data
    }
}

#[cfg(test)]
mod tests {
    use std::net;

    use super::*;
    use crate::lsa::{Body, Lsa, SummaryLsa};

    #[test]
    fn count_prefix_bounds_records() {
        let one = Lsa::new(
            lsa::SUMMARY_NETWORK_LSA_TYPE,
            net::Ipv4Addr::new(10, 1, 0, 0),
            net::Ipv4Addr::new(1, 1, 1, 1),
            lsa::InitialSequenceNumber,
            0,
            Body::Summary(SummaryLsa {
                mask: net::Ipv4Addr::new(255, 255, 0, 0),
                metric: 30,
            }),
        )
        .to_be_bytes();
        let packet = LsUpdatePacket {
            lsas: vec![one.clone(), one.clone()],
        };
        let mut buf = Vec::new();
        packet.put(&mut buf);
        assert_eq!(buf.len(), packet.length());
        assert_eq!(LsUpdatePacket::try_from_be_bytes(&buf), Some(packet));
        // count says three, only two present
        buf[3] = 3;
        assert_eq!(LsUpdatePacket::try_from_be_bytes(&buf), None);
    }

    #[test]
    fn transmit_delay_caps_at_maxage() {
        let mut data = Lsa::new(
            lsa::SUMMARY_NETWORK_LSA_TYPE,
            net::Ipv4Addr::new(10, 1, 0, 0),
            net::Ipv4Addr::new(1, 1, 1, 1),
            lsa::InitialSequenceNumber,
            0,
            Body::Summary(SummaryLsa {
                mask: net::Ipv4Addr::new(255, 255, 0, 0),
                metric: 30,
            }),
        )
        .to_be_bytes();
        lsa::set_age(&mut data, 10);
        let aged = LsUpdatePacket::age_for_transmit(&data, 1);
        assert_eq!(lsa::Header::try_from_be_bytes(&aged).unwrap().age, 11);
        lsa::set_age(&mut data, lsa::MaxAge);
        let aged = LsUpdatePacket::age_for_transmit(&data, 1);
        assert_eq!(lsa::Header::try_from_be_bytes(&aged).unwrap().age, lsa::MaxAge);
    }
}
