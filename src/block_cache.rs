/// Block cache: bounded write-back cache of disk blocks
///
/// Holds at most `capacity` blocks in a fixed arena of slots. A block table
/// maps block indexes to slots, and an index-linked list orders resident
/// slots from least to most recently used. Writes only mark a slot dirty;
/// dirty blocks reach the disk on eviction, `sync` or `flush_all`.

use crate::disk::Disk;
use crate::error::{Result, VirtMemError};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug)]
struct Slot {
    /// Block held by this slot, `None` when the slot is empty.
    block: Option<u64>,
    data: Box<[u8]>,
    dirty: bool,
    prev: Option<usize>,
    next: Option<usize>,
}

impl Slot {
    fn new(block_size: usize) -> Self {
        Self {
            block: None,
            data: vec![0u8; block_size].into_boxed_slice(),
            dirty: false,
            prev: None,
            next: None,
        }
    }

    fn clear(&mut self) {
        self.block = None;
        self.dirty = false;
        self.prev = None;
        self.next = None;
    }
}

pub struct BlockCache {
    disk: Arc<Disk>,
    block_size: usize,
    block_count: u64,
    slots: Vec<Slot>,
    /// Block index to slot index
    block_table: HashMap<u64, usize>,
    free: Vec<usize>,
    /// Least recently used resident slot
    head: Option<usize>,
    /// Most recently used resident slot
    tail: Option<usize>,
    hits: u64,
    misses: u64,
    evictions: u64,
    write_backs: u64,
}

impl BlockCache {
    /// Create an empty cache of `capacity` slots over `disk`, covering
    /// blocks `0..block_count`.
    pub fn new(disk: Arc<Disk>, capacity: usize, block_count: u64) -> Self {
        let block_size = disk.block_size();
        debug!(
            "Initializing block cache: {} slots of {} bytes",
            capacity, block_size
        );

        Self {
            disk,
            block_size,
            block_count,
            slots: (0..capacity).map(|_| Slot::new(block_size)).collect(),
            block_table: HashMap::with_capacity(capacity),
            free: (0..capacity).rev().collect(),
            head: None,
            tail: None,
            hits: 0,
            misses: 0,
            evictions: 0,
            write_backs: 0,
        }
    }

    /// Read one byte, loading its block on a miss.
    pub fn read_byte(&mut self, block: u64, offset: usize) -> Result<u8> {
        self.check_bounds(block, offset)?;
        let slot = self.resolve(block)?;
        Ok(self.slots[slot].data[offset])
    }

    /// Write one byte. A miss loads the whole block first so the other
    /// bytes of the block survive the write-back.
    pub fn write_byte(&mut self, block: u64, offset: usize, value: u8) -> Result<()> {
        self.check_bounds(block, offset)?;
        let slot = self.resolve(block)?;
        let slot = &mut self.slots[slot];
        slot.data[offset] = value;
        slot.dirty = true;
        Ok(())
    }

    /// Evict the least recently used block, writing it back first if dirty.
    ///
    /// Returns the evicted block index, or `None` if nothing is resident.
    /// If the write-back fails the block stays resident and dirty.
    pub fn evict_one(&mut self) -> Result<Option<u64>> {
        let Some(slot) = self.head else {
            return Ok(None);
        };

        self.write_back(slot)?;
        let block = self.release(slot);
        self.evictions += 1;
        debug!("Evicted block {:?} from slot {}", block, slot);
        Ok(block)
    }

    /// Write back every dirty block without evicting anything.
    ///
    /// Returns the number of blocks written.
    pub fn sync(&mut self) -> Result<usize> {
        let mut written = 0;
        let mut cursor = self.head;
        while let Some(slot) = cursor {
            cursor = self.slots[slot].next;
            if self.slots[slot].dirty {
                self.write_back(slot)?;
                written += 1;
            }
        }
        Ok(written)
    }

    /// Write back every dirty block, then empty the cache.
    ///
    /// On a storage error nothing is dropped: blocks written so far are
    /// clean, the rest stay dirty and resident.
    pub fn flush_all(&mut self) -> Result<()> {
        let written = self.sync()?;
        let resident = self.block_table.len();

        for slot in &mut self.slots {
            slot.clear();
        }
        self.block_table.clear();
        self.free = (0..self.slots.len()).rev().collect();
        self.head = None;
        self.tail = None;

        info!(
            "Flushed cache: {} resident blocks dropped, {} written back",
            resident, written
        );
        Ok(())
    }

    pub fn contains(&self, block: u64) -> bool {
        self.block_table.contains_key(&block)
    }

    /// Whether `block` is resident and dirty.
    pub fn is_dirty(&self, block: u64) -> bool {
        self.block_table
            .get(&block)
            .is_some_and(|&slot| self.slots[slot].dirty)
    }

    /// Resident blocks, least recently used first.
    pub fn resident_blocks(&self) -> Vec<u64> {
        let mut blocks = Vec::with_capacity(self.block_table.len());
        let mut cursor = self.head;
        while let Some(slot) = cursor {
            blocks.extend(self.slots[slot].block);
            cursor = self.slots[slot].next;
        }
        blocks
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            capacity: self.slots.len(),
            resident: self.block_table.len(),
            dirty: self.slots.iter().filter(|s| s.dirty).count(),
            hits: self.hits,
            misses: self.misses,
            evictions: self.evictions,
            write_backs: self.write_backs,
        }
    }

    fn check_bounds(&self, block: u64, offset: usize) -> Result<()> {
        if block >= self.block_count || offset >= self.block_size {
            return Err(VirtMemError::AddressOutOfRange { block, offset });
        }
        Ok(())
    }

    /// Slot holding `block`, loading it from disk on a miss. The slot
    /// becomes the most recently used either way.
    fn resolve(&mut self, block: u64) -> Result<usize> {
        if let Some(&slot) = self.block_table.get(&block) {
            self.hits += 1;
            self.touch(slot);
            return Ok(slot);
        }

        self.misses += 1;
        debug!("Cache miss for block {}", block);

        let slot = self.free_slot()?;
        if let Err(e) = self.disk.read_block(block, &mut self.slots[slot].data) {
            self.free.push(slot);
            return Err(e);
        }

        let entry = &mut self.slots[slot];
        entry.block = Some(block);
        entry.dirty = false;
        self.block_table.insert(block, slot);
        self.push_back(slot);
        Ok(slot)
    }

    fn free_slot(&mut self) -> Result<usize> {
        if self.free.is_empty() {
            self.evict_one()?;
        }
        // Capacity is at least one, so an eviction always frees a slot.
        self.free.pop().ok_or_else(|| {
            VirtMemError::ConfigError("block cache has no slots".to_string())
        })
    }

    fn write_back(&mut self, slot: usize) -> Result<()> {
        let entry = &mut self.slots[slot];
        if let (Some(block), true) = (entry.block, entry.dirty) {
            self.disk.write_block(block, &entry.data)?;
            entry.dirty = false;
            self.write_backs += 1;
        }
        Ok(())
    }

    /// Unlink a resident slot and return it to the free list.
    fn release(&mut self, slot: usize) -> Option<u64> {
        self.unlink(slot);
        let block = self.slots[slot].block;
        if let Some(block) = block {
            self.block_table.remove(&block);
        }
        self.slots[slot].clear();
        self.free.push(slot);
        block
    }

    fn touch(&mut self, slot: usize) {
        if self.tail != Some(slot) {
            self.unlink(slot);
            self.push_back(slot);
        }
    }

    fn unlink(&mut self, slot: usize) {
        let (prev, next) = (self.slots[slot].prev, self.slots[slot].next);
        match prev {
            Some(p) => self.slots[p].next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.slots[n].prev = prev,
            None => self.tail = prev,
        }
        self.slots[slot].prev = None;
        self.slots[slot].next = None;
    }

    fn push_back(&mut self, slot: usize) {
        self.slots[slot].prev = self.tail;
        self.slots[slot].next = None;
        match self.tail {
            Some(t) => self.slots[t].next = Some(slot),
            None => self.head = Some(slot),
        }
        self.tail = Some(slot);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub capacity: usize,
    pub resident: usize,
    pub dirty: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub write_backs: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::{BlockStore, MemStore};
    use std::io;
    use std::sync::atomic::{AtomicBool, Ordering};

    const BS: usize = 32;

    fn cache(capacity: usize) -> (Arc<Disk>, BlockCache) {
        let disk = Arc::new(Disk::in_memory(BS));
        let cache = BlockCache::new(Arc::clone(&disk), capacity, 2048);
        (disk, cache)
    }

    /// Store whose writes fail while `fail` is set.
    struct FlakyStore {
        inner: MemStore,
        fail: Arc<AtomicBool>,
    }

    impl BlockStore for FlakyStore {
        fn read_block(&self, index: u64, buf: &mut [u8]) -> io::Result<()> {
            self.inner.read_block(index, buf)
        }

        fn write_block(&self, index: u64, data: &[u8]) -> io::Result<()> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(io::Error::new(io::ErrorKind::Other, "device offline"));
            }
            self.inner.write_block(index, data)
        }

        fn name(&self) -> &'static str {
            "flaky"
        }
    }

    #[test]
    fn test_read_miss_then_hit() {
        let (disk, mut cache) = cache(4);
        assert_eq!(cache.read_byte(5, 3).unwrap(), 0);
        assert_eq!(cache.read_byte(5, 4).unwrap(), 0);
        assert_eq!(disk.read_count(), 1);

        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses), (1, 1));
        assert_eq!(stats.resident, 1);
        assert!(!cache.is_dirty(5));
    }

    #[test]
    fn test_write_miss_preserves_sibling_bytes() {
        let (disk, mut cache) = cache(4);
        let original: Vec<u8> = (100..132).collect();
        disk.write_block(9, &original).unwrap();

        cache.write_byte(9, 0, 0xFF).unwrap();
        assert_eq!(disk.read_count(), 1);
        assert!(cache.is_dirty(9));

        cache.flush_all().unwrap();
        let mut persisted = [0u8; BS];
        disk.read_block(9, &mut persisted).unwrap();
        assert_eq!(persisted[0], 0xFF);
        assert_eq!(&persisted[1..], &original[1..]);
    }

    #[test]
    fn test_lru_eviction_order() {
        let (_disk, mut cache) = cache(3);
        for block in 0..3 {
            cache.read_byte(block, 0).unwrap();
        }
        // Refresh block 0, so block 1 becomes the eviction candidate.
        cache.write_byte(0, 1, 7).unwrap();
        assert_eq!(cache.resident_blocks(), vec![1, 2, 0]);

        cache.read_byte(3, 0).unwrap();
        assert!(!cache.contains(1));
        assert_eq!(cache.resident_blocks(), vec![2, 0, 3]);
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_clean_eviction_costs_no_write() {
        let (disk, mut cache) = cache(2);
        for block in 0..10 {
            cache.read_byte(block, 0).unwrap();
        }
        assert_eq!(disk.read_count(), 10);
        assert_eq!(disk.write_count(), 0);
        assert_eq!(cache.stats().evictions, 8);
    }

    #[test]
    fn test_dirty_block_written_back_once() {
        let (disk, mut cache) = cache(2);
        for offset in 0..BS {
            cache.write_byte(4, offset, offset as u8).unwrap();
        }
        cache.read_byte(5, 0).unwrap();
        cache.read_byte(6, 0).unwrap();

        assert!(!cache.contains(4));
        assert_eq!(disk.write_count(), 1);
        assert_eq!(cache.stats().write_backs, 1);

        // Reloading returns the written-back data.
        assert_eq!(cache.read_byte(4, 17).unwrap(), 17);
    }

    #[test]
    fn test_evict_one_on_empty_cache() {
        let (_disk, mut cache) = cache(2);
        assert_eq!(cache.evict_one().unwrap(), None);
    }

    #[test]
    fn test_sync_keeps_blocks_resident() {
        let (disk, mut cache) = cache(4);
        cache.write_byte(1, 0, 1).unwrap();
        cache.write_byte(2, 0, 2).unwrap();
        cache.read_byte(3, 0).unwrap();

        assert_eq!(cache.sync().unwrap(), 2);
        assert_eq!(disk.write_count(), 2);
        assert_eq!(cache.stats().resident, 3);
        assert_eq!(cache.stats().dirty, 0);

        // Nothing left to write.
        cache.flush_all().unwrap();
        assert_eq!(disk.write_count(), 2);
    }

    #[test]
    fn test_flush_all_empties_cache() {
        let (disk, mut cache) = cache(8);
        for block in 0..5 {
            cache.write_byte(block, 0, 1).unwrap();
        }
        cache.read_byte(6, 0).unwrap();
        cache.flush_all().unwrap();

        assert_eq!(disk.write_count(), 5);
        assert_eq!(cache.stats().resident, 0);
        assert!(cache.resident_blocks().is_empty());

        // The arena is reusable after a flush.
        for block in 10..18 {
            cache.read_byte(block, 0).unwrap();
        }
        assert_eq!(cache.stats().resident, 8);
    }

    #[test]
    fn test_out_of_range_is_rejected() {
        let (disk, mut cache) = cache(2);
        assert!(matches!(
            cache.read_byte(2048, 0),
            Err(VirtMemError::AddressOutOfRange { block: 2048, .. })
        ));
        assert!(cache.write_byte(0, BS, 1).is_err());
        assert_eq!(disk.read_count(), 0);
        assert_eq!(cache.stats().resident, 0);
    }

    #[test]
    fn test_failed_write_back_keeps_data() {
        let fail = Arc::new(AtomicBool::new(false));
        let store = FlakyStore {
            inner: MemStore::new(),
            fail: Arc::clone(&fail),
        };
        let disk = Arc::new(Disk::with_store(Box::new(store), BS));
        let mut cache = BlockCache::new(Arc::clone(&disk), 1, 2048);

        cache.write_byte(0, 0, 42).unwrap();
        fail.store(true, Ordering::SeqCst);

        let err = cache.read_byte(1, 0).unwrap_err();
        assert!(matches!(err, VirtMemError::Storage { block: 0, .. }));
        assert!(cache.is_dirty(0));
        assert!(cache.flush_all().is_err());
        assert!(cache.is_dirty(0));
        assert_eq!(disk.write_count(), 0);

        fail.store(false, Ordering::SeqCst);
        cache.flush_all().unwrap();
        assert_eq!(disk.write_count(), 1);
        assert_eq!(cache.read_byte(0, 0).unwrap(), 42);
    }
}
