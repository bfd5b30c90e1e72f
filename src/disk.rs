/// Disk: the slow, block-addressed backing store behind the cache.
///
/// A `Disk` wraps a `BlockStore` backend and counts every block transfer
/// that goes through it. The counters belong to the `Disk` instance: a new
/// `Disk` starts at zero and two disks never share counts.
///
/// Successive `Memory` sessions share one `Disk` through an `Arc` to model a
/// reboot over persisted storage. Outside this crate the disk is read-only:
/// only its counters and geometry are visible.

use crate::error::{Result, VirtMemError};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

/// Raw block transfer backend.
///
/// Implementations move whole blocks only and know nothing about caching.
/// Blocks that were never written read back as zeros.
pub trait BlockStore: Send + Sync {
    /// Fill `buf` with the contents of block `index`.
    fn read_block(&self, index: u64, buf: &mut [u8]) -> io::Result<()>;

    /// Persist `data` as the new contents of block `index`.
    fn write_block(&self, index: u64, data: &[u8]) -> io::Result<()>;

    /// Make previous writes durable.
    fn sync(&self) -> io::Result<()> {
        Ok(())
    }

    /// Short backend name for logs and stats.
    fn name(&self) -> &'static str;
}

/// Sparse in-memory block store.
#[derive(Debug, Default)]
pub struct MemStore {
    blocks: DashMap<u64, Box<[u8]>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of blocks that have been written at least once.
    pub fn populated_blocks(&self) -> usize {
        self.blocks.len()
    }
}

impl BlockStore for MemStore {
    fn read_block(&self, index: u64, buf: &mut [u8]) -> io::Result<()> {
        match self.blocks.get(&index) {
            Some(block) => buf.copy_from_slice(&block),
            None => buf.fill(0),
        }
        Ok(())
    }

    fn write_block(&self, index: u64, data: &[u8]) -> io::Result<()> {
        self.blocks.insert(index, data.into());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// Block store backed by a single image file.
///
/// Block `i` lives at byte offset `i * block_size`. The file grows on demand;
/// anything past its end reads as zeros.
#[derive(Debug)]
pub struct FileStore {
    file: Mutex<File>,
    block_size: usize,
}

impl FileStore {
    pub fn open(path: impl AsRef<Path>, block_size: usize) -> io::Result<Self> {
        let path = path.as_ref();
        info!("Opening disk image {}", path.display());
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        Ok(Self {
            file: Mutex::new(file),
            block_size,
        })
    }

    fn offset(&self, index: u64) -> io::Result<u64> {
        index
            .checked_mul(self.block_size as u64)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "block offset overflows u64"))
    }
}

impl BlockStore for FileStore {
    fn read_block(&self, index: u64, buf: &mut [u8]) -> io::Result<()> {
        let offset = self.offset(index)?;
        let mut file = self.file.lock();
        let len = file.metadata()?.len();

        buf.fill(0);
        if offset < len {
            let available = usize::try_from(len - offset).unwrap_or(usize::MAX).min(buf.len());
            file.seek(SeekFrom::Start(offset))?;
            file.read_exact(&mut buf[..available])?;
        }
        Ok(())
    }

    fn write_block(&self, index: u64, data: &[u8]) -> io::Result<()> {
        let offset = self.offset(index)?;
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)
    }

    fn sync(&self) -> io::Result<()> {
        self.file.lock().sync_all()
    }

    fn name(&self) -> &'static str {
        "file"
    }
}

/// Snapshot of a disk's transfer counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DiskStats {
    pub backend: &'static str,
    pub block_size: usize,
    pub reads: u64,
    pub writes: u64,
}

/// Instrumented block device.
pub struct Disk {
    store: Box<dyn BlockStore>,
    block_size: usize,
    reads: AtomicU64,
    writes: AtomicU64,
}

impl Disk {
    /// Fresh zero-filled disk held in memory.
    pub fn in_memory(block_size: usize) -> Self {
        Self::with_store(Box::new(MemStore::new()), block_size)
    }

    /// Disk persisted in an image file, created if missing.
    pub fn open_file(path: impl AsRef<Path>, block_size: usize) -> Result<Self> {
        let store = FileStore::open(path, block_size)?;
        Ok(Self::with_store(Box::new(store), block_size))
    }

    pub fn with_store(store: Box<dyn BlockStore>, block_size: usize) -> Self {
        debug!("Attaching {} disk, block size {}", store.name(), block_size);
        Self {
            store,
            block_size,
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
        }
    }

    /// Read one full block into `buf`. Counts one disk read on success.
    pub(crate) fn read_block(&self, index: u64, buf: &mut [u8]) -> Result<()> {
        self.check_len(buf.len())?;
        self.store.read_block(index, buf).map_err(|e| {
            warn!("Disk read of block {} failed: {}", index, e);
            VirtMemError::storage(index, e)
        })?;
        self.reads.fetch_add(1, Ordering::Relaxed);
        debug!("Disk read block {}", index);
        Ok(())
    }

    /// Persist one full block. Counts one disk write on success.
    pub(crate) fn write_block(&self, index: u64, data: &[u8]) -> Result<()> {
        self.check_len(data.len())?;
        self.store.write_block(index, data).map_err(|e| {
            warn!("Disk write of block {} failed: {}", index, e);
            VirtMemError::storage(index, e)
        })?;
        self.writes.fetch_add(1, Ordering::Relaxed);
        debug!("Disk wrote block {}", index);
        Ok(())
    }

    pub(crate) fn sync(&self) -> Result<()> {
        self.store.sync()?;
        Ok(())
    }

    fn check_len(&self, len: usize) -> Result<()> {
        if len != self.block_size {
            return Err(VirtMemError::InvalidBlockLength {
                expected: self.block_size,
                actual: len,
            });
        }
        Ok(())
    }

    pub fn read_count(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn backend(&self) -> &'static str {
        self.store.name()
    }

    pub fn stats(&self) -> DiskStats {
        DiskStats {
            backend: self.backend(),
            block_size: self.block_size,
            reads: self.read_count(),
            writes: self.write_count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unwritten_block_reads_zero() {
        let disk = Disk::in_memory(32);
        let mut buf = [0xAAu8; 32];
        disk.read_block(7, &mut buf).unwrap();
        assert_eq!(buf, [0u8; 32]);
        assert_eq!(disk.read_count(), 1);
        assert_eq!(disk.write_count(), 0);
    }

    #[test]
    fn test_write_then_read() {
        let disk = Disk::in_memory(32);
        let data: Vec<u8> = (0..32).collect();
        disk.write_block(3, &data).unwrap();

        let mut buf = [0u8; 32];
        disk.read_block(3, &mut buf).unwrap();
        assert_eq!(&buf[..], &data[..]);
        assert_eq!(disk.stats().reads, 1);
        assert_eq!(disk.stats().writes, 1);
    }

    #[test]
    fn test_partial_block_rejected_and_not_counted() {
        let disk = Disk::in_memory(32);
        let err = disk.write_block(0, &[1u8; 16]).unwrap_err();
        assert!(matches!(
            err,
            VirtMemError::InvalidBlockLength { expected: 32, actual: 16 }
        ));
        let mut short = [0u8; 8];
        assert!(disk.read_block(0, &mut short).is_err());
        assert_eq!(disk.read_count(), 0);
        assert_eq!(disk.write_count(), 0);
    }

    #[test]
    fn test_counters_are_per_instance() {
        let a = Disk::in_memory(32);
        let b = Disk::in_memory(32);
        let mut buf = [0u8; 32];
        a.read_block(0, &mut buf).unwrap();
        a.write_block(0, &buf).unwrap();
        assert_eq!((a.read_count(), a.write_count()), (1, 1));
        assert_eq!((b.read_count(), b.write_count()), (0, 0));
    }

    #[test]
    fn test_file_store_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("disk.img");

        {
            let disk = Disk::open_file(&path, 32).unwrap();
            disk.write_block(10, &[0x5Au8; 32]).unwrap();
            disk.sync().unwrap();
            assert_eq!(disk.backend(), "file");
        }

        let disk = Disk::open_file(&path, 32).unwrap();
        assert_eq!(disk.write_count(), 0);
        let mut buf = [0u8; 32];
        disk.read_block(10, &mut buf).unwrap();
        assert_eq!(buf, [0x5Au8; 32]);
        // Below the written block: a hole, zero filled.
        disk.read_block(2, &mut buf).unwrap();
        assert_eq!(buf, [0u8; 32]);
        // Past the end of the file.
        disk.read_block(500, &mut buf).unwrap();
        assert_eq!(buf, [0u8; 32]);
        assert_eq!(disk.read_count(), 3);
    }

    #[test]
    fn test_mem_store_is_sparse() {
        let store = MemStore::new();
        store.write_block(1, &[1u8; 32]).unwrap();
        store.write_block(1, &[2u8; 32]).unwrap();
        store.write_block(900, &[3u8; 32]).unwrap();
        assert_eq!(store.populated_blocks(), 2);
    }
}
