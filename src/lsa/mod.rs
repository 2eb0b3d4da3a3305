use std::{cmp::Ordering, net};

use bytes::{Buf, BufMut};

pub mod as_external;
pub mod cache;
pub mod network;
pub mod router;
pub mod summary;

pub use as_external::ExternalLsa;
pub use network::NetworkLsa;
pub use router::{RouterLink, RouterLsa};
pub use summary::SummaryLsa;

pub const ROUTER_LSA_TYPE: u8 = 1;
pub const NETWORK_LSA_TYPE: u8 = 2;
pub const SUMMARY_NETWORK_LSA_TYPE: u8 = 3;
pub const SUMMARY_ROUTER_LSA_TYPE: u8 = 4;
pub const AS_EXTERNAL_LSA_TYPE: u8 = 5;

#[allow(non_upper_case_globals)]
pub const LSRefreshTime: u16 = 1800;
#[allow(non_upper_case_globals)]
pub const MinLSInterval: u16 = 5;
#[allow(non_upper_case_globals)]
pub const MinLSArrival: u16 = 1;
#[allow(non_upper_case_globals)]
pub const MaxAge: u16 = 3600;
#[allow(non_upper_case_globals)]
pub const MaxAgeDiff: u16 = 900;
#[allow(non_upper_case_globals)]
pub const LSInfinity: u32 = 0xffffff;
#[allow(non_upper_case_globals)]
pub const InitialSequenceNumber: i32 = 0x80000001u32 as i32;
#[allow(non_upper_case_globals)]
pub const MaxSequenceNumber: i32 = 0x7fffffff;
/// never carried by a valid record
#[allow(non_upper_case_globals)]
pub const ReservedSequenceNumber: i32 = 0x80000000u32 as i32;

const CHECKSUM_OFFSET: usize = 16;

/// database key of a record: (type, link state id, advertising router)
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LsaKey {
    pub ls_type: u8,
    pub ls_id: net::Ipv4Addr,
    pub adv_rtr: net::Ipv4Addr,
}

impl std::fmt::Display for LsaKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "type {} id {} adv {}", self.ls_type, self.ls_id, self.adv_rtr)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Header {
    pub age: u16,
    pub options: u8,
    pub ls_type: u8,
    pub ls_id: net::Ipv4Addr,
    pub adv_rtr: net::Ipv4Addr,
    pub seq_num: i32,
    pub checksum: u16,
    pub length: u16,
}

impl Header {
    pub fn length() -> usize {
        20
    }

    pub fn key(&self) -> LsaKey {
        LsaKey {
            ls_type: self.ls_type,
            ls_id: self.ls_id,
            adv_rtr: self.adv_rtr,
        }
    }

    pub fn try_from_be_bytes(payload: &[u8]) -> Option<Self> {
        if payload.len() < Self::length() {
            return None;
        }
        let mut buf = payload;
        Some(Self {
            age: buf.get_u16(),
            options: buf.get_u8(),
            ls_type: buf.get_u8(),
            ls_id: net::Ipv4Addr::from(buf.get_u32()),
            adv_rtr: net::Ipv4Addr::from(buf.get_u32()),
            seq_num: buf.get_i32(),
            checksum: buf.get_u16(),
            length: buf.get_u16(),
        })
    }

    pub fn to_be_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(Self::length());
        self.put(&mut bytes);
        bytes
    }

    pub fn put(&self, buf: &mut impl BufMut) {
        buf.put_u16(self.age);
        buf.put_u8(self.options);
        buf.put_u8(self.ls_type);
        buf.put_u32(self.ls_id.into());
        buf.put_u32(self.adv_rtr.into());
        buf.put_i32(self.seq_num);
        buf.put_u16(self.checksum);
        buf.put_u16(self.length);
    }

    pub fn is_maxage(&self) -> bool {
        self.age >= MaxAge
    }
}

/// # compare
/// decide which of two instances of the same record is more recent.
/// - `Greater` : a is newer
/// - `Less` : b is newer
/// - `Equal` : same instance, ages within MaxAgeDiff of each other
pub fn compare(a: &Header, b: &Header) -> Ordering {
    match a.seq_num.cmp(&b.seq_num) {
        Ordering::Equal => {}
        other => return other,
    }
    match a.checksum.cmp(&b.checksum) {
        Ordering::Equal => {}
        other => return other,
    }
    let a_age = a.age.min(MaxAge);
    let b_age = b.age.min(MaxAge);
    if a_age == MaxAge && b_age != MaxAge {
        return Ordering::Greater;
    }
    if b_age == MaxAge && a_age != MaxAge {
        return Ordering::Less;
    }
    if a_age.abs_diff(b_age) > MaxAgeDiff {
        // the younger one wins
        return b_age.cmp(&a_age);
    }
    Ordering::Equal
}

/// ISO 8473 (Fletcher) checksum of a whole encoded record, age excluded.
/// the two checksum bytes are taken as zero.
pub fn fletcher_checksum(lsa: &[u8]) -> u16 {
    if lsa.len() < Header::length() {
        return 0;
    }
    let data = &lsa[2..];
    let offset = CHECKSUM_OFFSET - 2;
    let mut c0: i64 = 0;
    let mut c1: i64 = 0;
    for (i, byte) in data.iter().enumerate() {
        let byte = if i == offset || i == offset + 1 {
            0
        } else {
            *byte as i64
        };
        c0 = (c0 + byte) % 255;
        c1 = (c1 + c0) % 255;
    }
    let mut x = ((data.len() - offset - 1) as i64 * c0 - c1) % 255;
    if x <= 0 {
        x += 255;
    }
    let mut y = 510 - c0 - x;
    if y > 255 {
        y -= 255;
    }
    ((x as u16) << 8) | (y as u16 & 0xff)
}

pub fn checksum_ok(lsa: &[u8]) -> bool {
    match Header::try_from_be_bytes(lsa) {
        Some(header) => fletcher_checksum(lsa) == header.checksum,
        None => false,
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Body {
    Router(RouterLsa),
    Network(NetworkLsa),
    Summary(SummaryLsa),
    External(ExternalLsa),
}

/// one decoded record. the header age is the age at encoding time,
/// databases keep their own clock.
#[derive(Clone, Debug, PartialEq)]
pub struct Lsa {
    pub header: Header,
    pub body: Body,
}

impl Lsa {
    /// build a fresh record with length and checksum filled in
    pub fn new(
        ls_type: u8,
        ls_id: net::Ipv4Addr,
        adv_rtr: net::Ipv4Addr,
        seq_num: i32,
        options: u8,
        body: Body,
    ) -> Self {
        let mut lsa = Self {
            header: Header {
                age: 0,
                options,
                ls_type,
                ls_id,
                adv_rtr,
                seq_num,
                checksum: 0,
                length: 0,
            },
            body,
        };
        lsa.seal();
        lsa
    }

    /// recompute length and checksum after the body or sequence number changed
    pub fn seal(&mut self) {
        self.header.length = (Header::length() + self.body_length()) as u16;
        self.header.checksum = 0;
        let bytes = self.to_be_bytes();
        self.header.checksum = fletcher_checksum(&bytes);
    }

    pub fn key(&self) -> LsaKey {
        self.header.key()
    }

    fn body_length(&self) -> usize {
        match &self.body {
            Body::Router(r) => r.length(),
            Body::Network(n) => n.length(),
            Body::Summary(s) => s.length(),
            Body::External(e) => e.length(),
        }
    }

    pub fn try_from_be_bytes(payload: &[u8]) -> Option<Self> {
        let header = Header::try_from_be_bytes(payload)?;
        let length = header.length as usize;
        if length < Header::length() || payload.len() < length {
            return None;
        }
        let body = &payload[Header::length()..length];
        let body = match header.ls_type {
            ROUTER_LSA_TYPE => Body::Router(RouterLsa::try_from_be_bytes(body)?),
            NETWORK_LSA_TYPE => Body::Network(NetworkLsa::try_from_be_bytes(body)?),
            SUMMARY_NETWORK_LSA_TYPE | SUMMARY_ROUTER_LSA_TYPE => {
                Body::Summary(SummaryLsa::try_from_be_bytes(body)?)
            }
            AS_EXTERNAL_LSA_TYPE => Body::External(ExternalLsa::try_from_be_bytes(body)?),
            _ => return None,
        };
        Some(Self { header, body })
    }

    pub fn to_be_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.header.length as usize);
        self.header.put(&mut bytes);
        match &self.body {
            Body::Router(r) => r.put(&mut bytes),
            Body::Network(n) => n.put(&mut bytes),
            Body::Summary(s) => s.put(&mut bytes),
            Body::External(e) => e.put(&mut bytes),
        }
        bytes
    }

    pub fn as_router(&self) -> Option<&RouterLsa> {
        match &self.body {
            Body::Router(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_network(&self) -> Option<&NetworkLsa> {
        match &self.body {
            Body::Network(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_summary(&self) -> Option<&SummaryLsa> {
        match &self.body {
            Body::Summary(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_external(&self) -> Option<&ExternalLsa> {
        match &self.body {
            Body::External(e) => Some(e),
            _ => None,
        }
    }
}

/// rewrite the age field of an encoded record in place
pub fn set_age(lsa: &mut [u8], age: u16) {
    if lsa.len() >= 2 {
        lsa[..2].copy_from_slice(&age.min(MaxAge).to_be_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(seq_num: i32, checksum: u16, age: u16) -> Header {
        Header {
            age,
            options: crate::OPTION_E,
            ls_type: ROUTER_LSA_TYPE,
            ls_id: net::Ipv4Addr::new(1, 1, 1, 1),
            adv_rtr: net::Ipv4Addr::new(1, 1, 1, 1),
            seq_num,
            checksum,
            length: 24,
        }
    }

    #[test]
    fn compare_by_sequence_then_checksum() {
        let a = header(InitialSequenceNumber + 1, 1, 100);
        let b = header(InitialSequenceNumber, 0xffff, 0);
        assert_eq!(compare(&a, &b), Ordering::Greater);
        assert_eq!(compare(&b, &a), Ordering::Less);

        let c = header(InitialSequenceNumber, 2, 0);
        let d = header(InitialSequenceNumber, 1, 0);
        assert_eq!(compare(&c, &d), Ordering::Greater);
    }

    #[test]
    fn compare_age_band() {
        let young = header(5, 7, 10);
        let within = header(5, 7, 10 + MaxAgeDiff);
        let beyond = header(5, 7, 11 + MaxAgeDiff);
        let dead = header(5, 7, MaxAge);
        assert_eq!(compare(&young, &within), Ordering::Equal);
        assert_eq!(compare(&young, &beyond), Ordering::Greater);
        assert_eq!(compare(&beyond, &young), Ordering::Less);
        assert_eq!(compare(&dead, &young), Ordering::Greater);
        assert_eq!(compare(&dead, &header(5, 7, MaxAge)), Ordering::Equal);
    }

    #[test]
    fn compare_is_antisymmetric() {
        let samples = [
            header(InitialSequenceNumber, 1, 0),
            header(InitialSequenceNumber, 1, 2000),
            header(InitialSequenceNumber, 2, 0),
            header(3, 1, MaxAge),
            header(3, 1, 1),
            header(MaxSequenceNumber, 0, 0),
        ];
        for a in &samples {
            for b in &samples {
                assert_eq!(compare(a, b), compare(b, a).reverse());
            }
        }
    }

    #[test]
    fn sealed_record_checksums() {
        let lsa = Lsa::new(
            NETWORK_LSA_TYPE,
            net::Ipv4Addr::new(10, 0, 0, 1),
            net::Ipv4Addr::new(1, 1, 1, 1),
            InitialSequenceNumber,
            crate::OPTION_E,
            Body::Network(NetworkLsa {
                mask: net::Ipv4Addr::new(255, 255, 255, 0),
                attached: vec![net::Ipv4Addr::new(1, 1, 1, 1), net::Ipv4Addr::new(2, 2, 2, 2)],
            }),
        );
        let mut bytes = lsa.to_be_bytes();
        assert_eq!(bytes.len(), 32);
        assert!(checksum_ok(&bytes));
        // the age is not covered
        set_age(&mut bytes, 1234);
        assert!(checksum_ok(&bytes));
        bytes[25] ^= 0x01;
        assert!(!checksum_ok(&bytes));
        assert_eq!(Lsa::try_from_be_bytes(&lsa.to_be_bytes()), Some(lsa));
    }

    #[test]
    fn known_checksum_vector() {
        // router record of 1.1.1.1 with a single stub link 10.0.0.0/24 metric 10
        let lsa = Lsa::new(
            ROUTER_LSA_TYPE,
            net::Ipv4Addr::new(1, 1, 1, 1),
            net::Ipv4Addr::new(1, 1, 1, 1),
            InitialSequenceNumber,
            crate::OPTION_E,
            Body::Router(RouterLsa {
                flags: 0,
                links: vec![RouterLink {
                    link_id: net::Ipv4Addr::new(10, 0, 0, 0),
                    link_data: net::Ipv4Addr::new(255, 255, 255, 0),
                    link_type: router::LINK_TYPE_STUB,
                    metric: 10,
                    tos: vec![],
                }],
            }),
        );
        let bytes = lsa.to_be_bytes();
        // summing the whole record with the checksum in place must give zero
        let (mut c0, mut c1) = (0u32, 0u32);
        for byte in &bytes[2..] {
            c0 = (c0 + *byte as u32) % 255;
            c1 = (c1 + c0) % 255;
        }
        assert_eq!((c0, c1), (0, 0));
    }
}
