use std::collections::HashMap;

use super::{Header, LsaKey};

/// handle to a cached record, only meaningful for the cache that issued it
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CacheRef(u32);

struct Slot {
    header: Header,
    data: Vec<u8>,
    refcnt: u32,
}

/// # LsaCache
/// arena of immutable encoded records shared by the retransmission lists.
/// identical instances (same key, sequence number and checksum) are stored once.
#[derive(Default)]
pub struct LsaCache {
    slots: Vec<Option<Slot>>,
    free: Vec<u32>,
    index: HashMap<(LsaKey, i32, u16), CacheRef>,
}

impl LsaCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// insert or look up `data` and take one reference on it
    pub fn add(&mut self, data: &[u8]) -> Option<CacheRef> {
        let header = Header::try_from_be_bytes(data)?;
        let id = (header.key(), header.seq_num, header.checksum);
        if let Some(handle) = self.index.get(&id).copied() {
            self.acquire(handle);
            return Some(handle);
        }
        let slot = Slot {
            header,
            data: data.to_vec(),
            refcnt: 1,
        };
        let handle = match self.free.pop() {
            Some(n) => {
                self.slots[n as usize] = Some(slot);
                CacheRef(n)
            }
            None => {
                self.slots.push(Some(slot));
                CacheRef(self.slots.len() as u32 - 1)
            }
        };
        self.index.insert(id, handle);
        Some(handle)
    }

    pub fn acquire(&mut self, handle: CacheRef) {
        if let Some(Some(slot)) = self.slots.get_mut(handle.0 as usize) {
            slot.refcnt += 1;
        }
    }

    /// drop one reference, the slot is freed when none are left
    pub fn release(&mut self, handle: CacheRef) {
        let Some(entry) = self.slots.get_mut(handle.0 as usize) else {
            return;
        };
        let Some(slot) = entry.as_mut() else {
            tracing::error!(?handle, "release of a freed cache slot");
            return;
        };
        slot.refcnt -= 1;
        if slot.refcnt == 0 {
            let id = (slot.header.key(), slot.header.seq_num, slot.header.checksum);
            self.index.remove(&id);
            *entry = None;
            self.free.push(handle.0);
        }
    }

    pub fn get(&self, handle: CacheRef) -> Option<&[u8]> {
        self.slots
            .get(handle.0 as usize)
            .and_then(|slot| slot.as_ref())
            .map(|slot| slot.data.as_slice())
    }

    pub fn header(&self, handle: CacheRef) -> Option<&Header> {
        self.slots
            .get(handle.0 as usize)
            .and_then(|slot| slot.as_ref())
            .map(|slot| &slot.header)
    }

    pub fn refcount(&self, handle: CacheRef) -> u32 {
        self.slots
            .get(handle.0 as usize)
            .and_then(|slot| slot.as_ref())
            .map_or(0, |slot| slot.refcnt)
    }

    /// number of live backing allocations
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}
