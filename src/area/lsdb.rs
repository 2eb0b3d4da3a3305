//! one link state database: the records of an area, or the AS wide externals.
//! every record keeps its own install clock, ages are derived from it.

use std::{cmp::Ordering, collections::BTreeMap, net, time::Duration};

use thiserror::Error;
use tokio::time::Instant;

use crate::{
    lsa::{self, Header, Lsa, LsaKey, MaxAge, ReservedSequenceNumber},
    util::Timer,
};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LsaError {
    #[error("malformed record")]
    Malformed,
    #[error("unknown record type {0}")]
    UnknownType(u8),
    #[error("bad checksum")]
    Checksum,
    #[error("age {0} out of range")]
    Age(u16),
    #[error("reserved sequence number")]
    Sequence,
    #[error("external record received in a stub area")]
    StubExternal,
}

/// # validate
/// the gate every received record passes before the database looks at it.
/// - stub : the receiving area carries no external records
pub fn validate(data: &[u8], stub: bool, router_id: net::Ipv4Addr) -> Result<Lsa, LsaError> {
    let header = Header::try_from_be_bytes(data).ok_or(LsaError::Malformed)?;
    if !(lsa::ROUTER_LSA_TYPE..=lsa::AS_EXTERNAL_LSA_TYPE).contains(&header.ls_type) {
        return Err(LsaError::UnknownType(header.ls_type));
    }
    let length = header.length as usize;
    if length < Header::length() || length > data.len() {
        return Err(LsaError::Malformed);
    }
    let data = &data[..length];
    if !lsa::checksum_ok(data) {
        return Err(LsaError::Checksum);
    }
    let self_originated = header.adv_rtr == router_id;
    if header.age > MaxAge || (header.age == 0 && !self_originated) {
        return Err(LsaError::Age(header.age));
    }
    if header.seq_num == ReservedSequenceNumber {
        return Err(LsaError::Sequence);
    }
    if stub && header.ls_type == lsa::AS_EXTERNAL_LSA_TYPE {
        return Err(LsaError::StubExternal);
    }
    Lsa::try_from_be_bytes(data).ok_or(LsaError::Malformed)
}

/// # Record
/// an installed instance
/// - installed : when this instance entered the database, ages count from here
/// - pending : a newer self-originated instance waits for MinLSInterval
/// - flushed : prematurely aged by us, evicted once no exchange needs it
#[derive(Debug)]
pub struct Record {
    pub lsa: Lsa,
    data: Vec<u8>,
    installed: Instant,
    pub timer: Timer,
    pub pending: bool,
    pub flushed: bool,
}

impl Record {
    pub fn new(data: Vec<u8>, lsa: Lsa) -> Self {
        Self {
            lsa,
            data,
            installed: Instant::now(),
            timer: Timer::new(),
            pending: false,
            flushed: false,
        }
    }

    pub fn key(&self) -> LsaKey {
        self.lsa.key()
    }

    pub fn age(&self) -> u16 {
        let base = self.lsa.header.age;
        if base >= MaxAge {
            return MaxAge;
        }
        let elapsed = self.installed.elapsed().as_secs();
        (base as u64 + elapsed).min(MaxAge as u64) as u16
    }

    pub fn is_maxage(&self) -> bool {
        self.age() >= MaxAge
    }

    /// the header as it would go on the wire now
    pub fn header(&self) -> Header {
        Header {
            age: self.age(),
            ..self.lsa.header
        }
    }

    /// the encoded record with its current age
    pub fn data(&self) -> Vec<u8> {
        let mut data = self.data.clone();
        lsa::set_age(&mut data, self.age());
        data
    }

    pub fn since_installed(&self) -> Duration {
        self.installed.elapsed()
    }

    /// age this instance to MaxAge in place
    pub fn premature_age(&mut self) {
        self.lsa.header.age = MaxAge;
        lsa::set_age(&mut self.data, MaxAge);
        self.flushed = true;
    }
}

#[derive(Debug, Default)]
pub struct Lsdb {
    records: BTreeMap<LsaKey, Record>,
}

impl Lsdb {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &LsaKey) -> Option<&Record> {
        self.records.get(key)
    }

    pub fn get_mut(&mut self, key: &LsaKey) -> Option<&mut Record> {
        self.records.get_mut(key)
    }

    /// install a new instance, replacing any older one and its timer
    pub fn install(&mut self, data: Vec<u8>, lsa: Lsa) -> Option<Record> {
        let key = lsa.key();
        self.records.insert(key, Record::new(data, lsa))
    }

    pub fn remove(&mut self, key: &LsaKey) -> Option<Record> {
        self.records.remove(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Record> {
        self.records.values()
    }

    /// records that take part in route computation
    pub fn live(&self) -> impl Iterator<Item = &Record> {
        self.records.values().filter(|r| !r.is_maxage())
    }

    pub fn keys(&self) -> Vec<LsaKey> {
        self.records.keys().copied().collect()
    }

    pub fn headers(&self) -> Vec<Header> {
        self.records.values().map(Record::header).collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// the offered instance is newer than ours, or we have none
    pub fn wants(&self, offered: &Header) -> bool {
        match self.records.get(&offered.key()) {
            Some(record) => lsa::compare(offered, &record.header()) == Ordering::Greater,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lsa::{Body, InitialSequenceNumber, RouterLsa};

    fn router_lsa(id: &str, seq: i32, age: u16) -> (Vec<u8>, Lsa) {
        let id: net::Ipv4Addr = id.parse().unwrap();
        let mut lsa = Lsa::new(
            lsa::ROUTER_LSA_TYPE,
            id,
            id,
            seq,
            crate::OPTION_E,
            Body::Router(RouterLsa {
                flags: 0,
                links: vec![],
            }),
        );
        lsa.header.age = age;
        (lsa.to_be_bytes(), lsa)
    }

    #[test]
    fn gate_rejects_bad_records() {
        let me: net::Ipv4Addr = "1.1.1.1".parse().unwrap();
        let (data, _) = router_lsa("2.2.2.2", InitialSequenceNumber, 1);
        assert!(validate(&data, false, me).is_ok());

        let mut corrupt = data.clone();
        let last = corrupt.len() - 1;
        corrupt[last] ^= 0xff;
        assert_eq!(validate(&corrupt, false, me), Err(LsaError::Checksum));

        let (young, _) = router_lsa("2.2.2.2", InitialSequenceNumber, 0);
        assert_eq!(validate(&young, false, me), Err(LsaError::Age(0)));
        // our own records may come back with age zero
        let (own, _) = router_lsa("1.1.1.1", InitialSequenceNumber, 0);
        assert!(validate(&own, false, me).is_ok());

        let (reserved, _) = router_lsa("2.2.2.2", ReservedSequenceNumber, 1);
        assert_eq!(validate(&reserved, false, me), Err(LsaError::Sequence));

        let ext = Lsa::new(
            lsa::AS_EXTERNAL_LSA_TYPE,
            "10.9.0.0".parse().unwrap(),
            "2.2.2.2".parse().unwrap(),
            InitialSequenceNumber,
            crate::OPTION_E,
            Body::External(lsa::ExternalLsa {
                mask: "255.255.0.0".parse().unwrap(),
                type2: true,
                metric: 20,
                forwarding: net::Ipv4Addr::UNSPECIFIED,
                tag: 0,
            }),
        );
        let mut ext_data = ext.to_be_bytes();
        lsa::set_age(&mut ext_data, 1);
        assert!(validate(&ext_data, false, me).is_ok());
        assert_eq!(validate(&ext_data, true, me), Err(LsaError::StubExternal));
        assert_eq!(validate(&ext_data[..10], false, me), Err(LsaError::Malformed));
    }

    #[tokio::test(start_paused = true)]
    async fn records_age_from_install() {
        let mut db = Lsdb::new();
        let (data, lsa) = router_lsa("2.2.2.2", InitialSequenceNumber, 10);
        let key = lsa.key();
        db.install(data, lsa);
        tokio::time::advance(Duration::from_secs(5)).await;
        let record = db.get(&key).unwrap();
        assert_eq!(record.age(), 15);
        assert_eq!(Header::try_from_be_bytes(&record.data()).unwrap().age, 15);

        tokio::time::advance(Duration::from_secs(MaxAge as u64)).await;
        assert!(db.get(&key).unwrap().is_maxage());
        assert_eq!(db.live().count(), 0);
    }

    #[test]
    fn wants_only_newer_instances() {
        let mut db = Lsdb::new();
        let (data, lsa) = router_lsa("2.2.2.2", InitialSequenceNumber + 1, 1);
        let header = lsa.header;
        db.install(data, lsa);
        let older = Header {
            seq_num: InitialSequenceNumber,
            ..header
        };
        let newer = Header {
            seq_num: InitialSequenceNumber + 2,
            ..header
        };
        assert!(!db.wants(&older));
        assert!(!db.wants(&header));
        assert!(db.wants(&newer));
        let (_, other) = router_lsa("3.3.3.3", InitialSequenceNumber, 1);
        assert!(db.wants(&other.header));
    }

    #[test]
    fn premature_aging_keeps_checksum() {
        let (data, lsa) = router_lsa("2.2.2.2", InitialSequenceNumber, 1);
        let mut record = Record::new(data, lsa);
        record.premature_age();
        assert!(record.is_maxage());
        assert!(record.flushed);
        assert!(lsa::checksum_ok(&record.data()));
    }
}
