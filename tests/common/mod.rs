//! In-memory FAT32 images for the integration tests

#![allow(dead_code)]

use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};
use std::ops::Range;

use fat32_nav::{DirEntry, ShortName};

pub const BYTES_PER_SECTOR: usize = 512;
pub const RESERVED_SECTORS: usize = 32;
pub const NUM_FATS: usize = 2;
pub const SECTORS_PER_FAT: usize = 1;
pub const ROOT_CLUSTER: u32 = 2;
pub const DEFAULT_CLUSTERS: u32 = 64;
pub const SLOTS_PER_CLUSTER: usize = BYTES_PER_SECTOR / 32;

pub const EOC: u32 = 0x0FFFFFFF;

pub fn fat_offset(copy: usize, cluster: u32) -> usize {
    (RESERVED_SECTORS + copy * SECTORS_PER_FAT) * BYTES_PER_SECTOR + cluster as usize * 4
}

pub fn cluster_offset(cluster: u32) -> usize {
    (RESERVED_SECTORS + NUM_FATS * SECTORS_PER_FAT) * BYTES_PER_SECTOR
        + (cluster as usize - 2) * BYTES_PER_SECTOR
}

pub fn fat_value(image: &[u8], copy: usize, cluster: u32) -> u32 {
    let at = fat_offset(copy, cluster);
    u32::from_le_bytes([image[at], image[at + 1], image[at + 2], image[at + 3]])
}

pub fn cluster_bytes(image: &[u8], cluster: u32) -> &[u8] {
    let at = cluster_offset(cluster);
    &image[at..at + BYTES_PER_SECTOR]
}

pub fn dir(name: &str, cluster: u32) -> DirEntry {
    DirEntry::directory(ShortName::parse(name).unwrap(), cluster)
}

pub fn file(name: &str, cluster: u32, size: u32) -> DirEntry {
    DirEntry {
        attr: 0x20,
        file_size: size,
        ..DirEntry::directory(ShortName::parse(name).unwrap(), cluster)
    }
}

/// Lays out a FAT32 volume with one sector per cluster: boot sector,
/// 32 reserved sectors, two single-sector FATs and the data region.
pub struct ImageBuilder {
    data: Vec<u8>,
    clusters: u32,
}

impl ImageBuilder {
    pub fn new() -> Self {
        Self::with_clusters(DEFAULT_CLUSTERS)
    }

    pub fn with_clusters(clusters: u32) -> Self {
        let total_sectors =
            RESERVED_SECTORS + NUM_FATS * SECTORS_PER_FAT + clusters as usize;
        let mut builder = Self {
            data: vec![0u8; total_sectors * BYTES_PER_SECTOR],
            clusters,
        };
        builder.data[0..3].copy_from_slice(&[0xEB, 0x58, 0x90]);
        builder.data[3..11].copy_from_slice(b"MSWIN4.1");
        builder.boot_u16(0x0B, BYTES_PER_SECTOR as u16);
        builder.boot_u8(0x0D, 1);
        builder.boot_u16(0x0E, RESERVED_SECTORS as u16);
        builder.boot_u8(0x10, NUM_FATS as u8);
        builder.boot_u8(0x15, 0xF8);
        builder.boot_u32(0x20, total_sectors as u32);
        builder.boot_u32(0x24, SECTORS_PER_FAT as u32);
        builder.boot_u32(0x2C, ROOT_CLUSTER);
        builder.data[0x1FE] = 0x55;
        builder.data[0x1FF] = 0xAA;

        builder.set_fat(0, 0x0FFFFFF8);
        builder.set_fat(1, EOC);
        builder.set_fat(ROOT_CLUSTER, EOC);
        builder
    }

    pub fn clusters(&self) -> u32 {
        self.clusters
    }

    pub fn boot_u8(&mut self, offset: usize, value: u8) -> &mut Self {
        self.data[offset] = value;
        self
    }

    pub fn boot_u16(&mut self, offset: usize, value: u16) -> &mut Self {
        self.data[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
        self
    }

    pub fn boot_u32(&mut self, offset: usize, value: u32) -> &mut Self {
        self.data[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
        self
    }

    /// Writes a raw FAT entry into both copies
    pub fn set_fat(&mut self, cluster: u32, value: u32) -> &mut Self {
        for copy in 0..NUM_FATS {
            let at = fat_offset(copy, cluster);
            self.data[at..at + 4].copy_from_slice(&value.to_le_bytes());
        }
        self
    }

    /// Links `clusters` into one chain ending with EOC
    pub fn chain(&mut self, clusters: &[u32]) -> &mut Self {
        for pair in clusters.windows(2) {
            self.set_fat(pair[0], pair[1]);
        }
        if let Some(&last) = clusters.last() {
            self.set_fat(last, EOC);
        }
        self
    }

    /// Marks every data cluster from `from` on as in use
    pub fn fill_fat_from(&mut self, from: u32) -> &mut Self {
        for cluster in from..self.clusters + 2 {
            self.set_fat(cluster, EOC);
        }
        self
    }

    pub fn raw_slot(&mut self, cluster: u32, slot: usize, record: &[u8; 32]) -> &mut Self {
        let at = cluster_offset(cluster) + slot * 32;
        self.data[at..at + 32].copy_from_slice(record);
        self
    }

    pub fn entry(&mut self, cluster: u32, slot: usize, entry: &DirEntry) -> &mut Self {
        self.raw_slot(cluster, slot, &entry.encode())
    }

    pub fn tombstone(&mut self, cluster: u32, slot: usize, name: &str) -> &mut Self {
        let mut record = dir(name, 60).encode();
        record[0] = 0xE5;
        self.raw_slot(cluster, slot, &record)
    }

    /// Creates subdirectory `name` at `cluster`, listed in `parent` at `slot`,
    /// with its `.` and `..` entries.
    pub fn subdir(&mut self, parent: u32, slot: usize, name: &str, cluster: u32) -> &mut Self {
        let parent_ref = if parent == ROOT_CLUSTER { 0 } else { parent };
        self.set_fat(cluster, EOC);
        self.entry(parent, slot, &dir(name, cluster));
        self.entry(cluster, 0, &DirEntry::directory(ShortName::DOT, cluster));
        self.entry(cluster, 1, &DirEntry::directory(ShortName::DOTDOT, parent_ref))
    }

    /// Fills every slot of `cluster` with subdirectory-looking entries named `<prefix><n>`
    pub fn fill_cluster(&mut self, cluster: u32, prefix: &str) -> &mut Self {
        for slot in 0..SLOTS_PER_CLUSTER {
            let name = format!("{}{}", prefix, slot);
            self.entry(cluster, slot, &file(&name, 0, 0));
        }
        self
    }

    pub fn bytes(&self) -> Vec<u8> {
        self.data.clone()
    }

    pub fn build(&self) -> Cursor<Vec<u8>> {
        Cursor::new(self.data.clone())
    }
}

/// Block source that rejects writes starting inside `fail_range`
pub struct FailingDevice {
    inner: Cursor<Vec<u8>>,
    fail_range: Range<u64>,
}

impl FailingDevice {
    pub fn new(image: Vec<u8>, fail_range: Range<u64>) -> Self {
        Self {
            inner: Cursor::new(image),
            fail_range,
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.inner.into_inner()
    }
}

impl Read for FailingDevice {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl Seek for FailingDevice {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.inner.seek(pos)
    }
}

impl Write for FailingDevice {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.fail_range.contains(&self.inner.position()) {
            return Err(io::Error::other("injected write failure"));
        }
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
