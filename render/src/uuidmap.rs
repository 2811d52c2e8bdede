//! Map from resource UUID to handle.
//!
//! Fixed bucket array sized at init; collisions chain within buckets. The
//! per-backend resource tables (shader, program, texture) are instances of
//! this map.

use crate::handle::Handle;
use std::sync::Mutex;
use uuid::Uuid;

pub struct UuidMap {
    buckets: Box<[Mutex<Vec<(Uuid, Handle)>>]>,
}

impl UuidMap {
    pub fn new(bucket_count: usize) -> UuidMap {
        let mut buckets = Vec::with_capacity(bucket_count.max(1));
        for _ in 0..bucket_count.max(1) {
            buckets.push(Mutex::new(Vec::new()));
        }
        UuidMap {
            buckets: buckets.into_boxed_slice(),
        }
    }

    pub fn insert(&self, uuid: Uuid, handle: Handle) {
        let mut bucket = self.bucket(&uuid).lock().unwrap();
        for entry in bucket.iter_mut() {
            if entry.0 == uuid {
                entry.1 = handle;
                return;
            }
        }
        bucket.push((uuid, handle));
    }

    pub fn lookup(&self, uuid: Uuid) -> Handle {
        let bucket = self.bucket(&uuid).lock().unwrap();
        bucket
            .iter()
            .find(|entry| entry.0 == uuid)
            .map(|entry| entry.1)
            .unwrap_or(Handle::NONE)
    }

    pub fn erase(&self, uuid: Uuid) -> Handle {
        let mut bucket = self.bucket(&uuid).lock().unwrap();
        if let Some(pos) = bucket.iter().position(|entry| entry.0 == uuid) {
            return bucket.swap_remove(pos).1;
        }
        Handle::NONE
    }

    pub fn clear(&self) {
        for bucket in self.buckets.iter() {
            bucket.lock().unwrap().clear();
        }
    }

    fn bucket(&self, uuid: &Uuid) -> &Mutex<Vec<(Uuid, Handle)>> {
        let hash = fxhash::hash64(uuid.as_bytes());
        &self.buckets[(hash % self.buckets.len() as u64) as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_lookup_erase() {
        let map = UuidMap::new(7);
        let uuid = Uuid::parse_str("1ab9bba8-3f2f-4649-86bb-8b8b07e99af2").unwrap();
        assert!(map.lookup(uuid).is_none());
        map.insert(uuid, Handle::from_raw(0x1_0000_0001));
        assert_eq!(map.lookup(uuid), Handle::from_raw(0x1_0000_0001));
        // Insert on an existing key replaces the mapping
        map.insert(uuid, Handle::from_raw(0x2_0000_0001));
        assert_eq!(map.lookup(uuid), Handle::from_raw(0x2_0000_0001));
        assert_eq!(map.erase(uuid), Handle::from_raw(0x2_0000_0001));
        assert!(map.lookup(uuid).is_none());
    }

    #[test]
    fn chained_collisions_resolve() {
        // Single bucket forces every entry to chain
        let map = UuidMap::new(1);
        let mut uuids = Vec::new();
        for _ in 0..16 {
            let uuid = Uuid::new_v4();
            map.insert(uuid, Handle::from_raw(1));
            uuids.push(uuid);
        }
        for uuid in uuids {
            assert!(map.lookup(uuid).is_some());
        }
    }
}
