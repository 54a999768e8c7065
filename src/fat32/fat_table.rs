//! FAT table access for FAT32
//!
//! Every lookup and mutation goes to the image: nothing read here is cached
//! between calls, so allocation always works from the current on-disk state.

use std::collections::HashSet;
use std::io::{self, Read, Seek, SeekFrom, Write};

use log::{debug, warn};

use super::{FIRST_DATA_CLUSTER, VolumeGeometry};
use crate::error::{Fat32Error, Result};

/// FAT32 end-of-chain marker (lowest value of the EOC range)
pub const FAT32_EOC: u32 = 0x0FFFFFF8;

/// Value written when terminating a chain
pub const FAT32_EOC_MARK: u32 = 0x0FFFFFFF;

/// FAT32 bad cluster marker
pub const FAT32_BAD_CLUSTER: u32 = 0x0FFFFFF7;

/// FAT32 free cluster marker
pub const FAT32_FREE_CLUSTER: u32 = 0x00000000;

/// FAT32 reserved cluster marker
pub const FAT32_RESERVED_CLUSTER: u32 = 0x00000001;

/// Only the low 28 bits of an entry are significant
const FAT32_ENTRY_MASK: u32 = 0x0FFFFFFF;

const FAT32_ENTRY_SIZE: u64 = 4;

/// Classified value of one FAT entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatEntry {
    Free,
    Reserved,
    Bad,
    EndOfChain,
    Next(u32),
}

impl FatEntry {
    pub fn from_raw(raw: u32) -> Self {
        match raw & FAT32_ENTRY_MASK {
            FAT32_FREE_CLUSTER => Self::Free,
            FAT32_RESERVED_CLUSTER => Self::Reserved,
            FAT32_BAD_CLUSTER => Self::Bad,
            v if v >= FAT32_EOC => Self::EndOfChain,
            v => Self::Next(v),
        }
    }

    pub fn to_raw(self) -> u32 {
        match self {
            Self::Free => FAT32_FREE_CLUSTER,
            Self::Reserved => FAT32_RESERVED_CLUSTER,
            Self::Bad => FAT32_BAD_CLUSTER,
            Self::EndOfChain => FAT32_EOC_MARK,
            Self::Next(cluster) => cluster & FAT32_ENTRY_MASK,
        }
    }
}

/// FAT table manager working directly on the image
pub struct FatTable<'a, D> {
    device: &'a mut D,
    geometry: &'a VolumeGeometry,
}

impl<'a, D: Read + Write + Seek> FatTable<'a, D> {
    pub fn new(device: &'a mut D, geometry: &'a VolumeGeometry) -> Self {
        Self { device, geometry }
    }

    fn entry_offset(&self, copy: u8, cluster: u32) -> u64 {
        self.geometry.fat_copy_offset(copy) + cluster as u64 * FAT32_ENTRY_SIZE
    }

    fn check_cluster(&self, cluster: u32) -> Result<()> {
        if self.geometry.is_valid_cluster(cluster) {
            Ok(())
        } else {
            Err(Fat32Error::InvalidCluster { cluster })
        }
    }

    fn read_raw(&mut self, copy: u8, cluster: u32) -> io::Result<u32> {
        let offset = self.entry_offset(copy, cluster);
        self.device.seek(SeekFrom::Start(offset))?;
        let mut buf = [0u8; 4];
        self.device.read_exact(&mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    /// Writes the low 28 bits of `value`, keeping the reserved high nibble on disk.
    fn write_raw(&mut self, copy: u8, cluster: u32, value: u32) -> io::Result<()> {
        let existing = self.read_raw(copy, cluster)?;
        let merged = (existing & !FAT32_ENTRY_MASK) | (value & FAT32_ENTRY_MASK);
        let offset = self.entry_offset(copy, cluster);
        self.device.seek(SeekFrom::Start(offset))?;
        self.device.write_all(&merged.to_le_bytes())
    }

    /// Get a FAT entry from the first copy
    pub fn entry(&mut self, cluster: u32) -> Result<FatEntry> {
        self.check_cluster(cluster)?;
        Ok(FatEntry::from_raw(self.read_raw(0, cluster)?))
    }

    /// Cluster following `cluster`, or `None` at the end of the chain.
    pub fn next_cluster(&mut self, cluster: u32) -> Result<Option<u32>> {
        match self.entry(cluster)? {
            FatEntry::Next(next) if self.geometry.is_valid_cluster(next) => Ok(Some(next)),
            FatEntry::Next(next) => {
                warn!("Cluster {} links to out-of-range cluster {}", cluster, next);
                Err(Fat32Error::InvalidCluster { cluster: next })
            }
            FatEntry::Reserved => {
                warn!("Cluster {} holds the reserved FAT marker", cluster);
                Err(Fat32Error::InvalidCluster {
                    cluster: FAT32_RESERVED_CLUSTER,
                })
            }
            FatEntry::EndOfChain => Ok(None),
            FatEntry::Free => Err(Fat32Error::FreeClusterInChain { cluster }),
            FatEntry::Bad => Err(Fat32Error::BadCluster { cluster }),
        }
    }

    /// Lazily walks the chain starting at `start`.
    pub fn chain(&mut self, start: u32) -> ClusterChain<'_, 'a, D> {
        ClusterChain {
            fat: self,
            start,
            next: Some(start),
            visited: HashSet::new(),
        }
    }

    /// Collects the whole chain starting at `start`.
    pub fn collect_chain(&mut self, start: u32) -> Result<Vec<u32>> {
        self.chain(start).collect()
    }

    /// Set a FAT entry in every FAT copy
    pub fn set_entry(&mut self, cluster: u32, entry: FatEntry) -> Result<()> {
        self.check_cluster(cluster)?;
        let value = entry.to_raw();
        self.write_raw(0, cluster, value)?;
        for copy in 1..self.geometry.num_fats {
            if let Err(source) = self.write_raw(copy, cluster, value) {
                warn!(
                    "FAT copy {} left stale for cluster {}: {}",
                    copy, cluster, source
                );
                return Err(Fat32Error::InconsistentFat {
                    cluster,
                    copy,
                    source,
                });
            }
        }
        Ok(())
    }

    /// Find a free cluster by scanning a fresh read of the first FAT copy,
    /// one sector at a time
    pub fn find_free_cluster(&mut self) -> Result<Option<u32>> {
        let limit = self.geometry.cluster_limit();
        let per_sector = self.geometry.bytes_per_sector as u32 / FAT32_ENTRY_SIZE as u32;
        let mut buf = vec![0u8; self.geometry.bytes_per_sector as usize];
        let mut cluster = FIRST_DATA_CLUSTER;

        while cluster < limit {
            let count = per_sector.min(limit - cluster);
            let chunk = &mut buf[..count as usize * FAT32_ENTRY_SIZE as usize];
            let offset = self.entry_offset(0, cluster);
            self.device.seek(SeekFrom::Start(offset))?;
            self.device.read_exact(chunk)?;

            let free = chunk
                .chunks_exact(FAT32_ENTRY_SIZE as usize)
                .position(|raw| {
                    let raw = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
                    FatEntry::from_raw(raw) == FatEntry::Free
                });
            if let Some(index) = free {
                return Ok(Some(cluster + index as u32));
            }
            cluster += count;
        }
        Ok(None)
    }

    /// Allocates one cluster, marks it end-of-chain and, when `previous` is
    /// given, links the old tail to it.
    pub fn allocate_cluster(&mut self, previous: Option<u32>) -> Result<u32> {
        if let Some(tail) = previous {
            self.check_cluster(tail)?;
        }
        let cluster = self.find_free_cluster()?.ok_or(Fat32Error::VolumeFull)?;
        self.set_entry(cluster, FatEntry::EndOfChain)?;
        if let Some(tail) = previous {
            if let Err(err) = self.set_entry(tail, FatEntry::Next(cluster)) {
                if let Err(rollback) = self.free_cluster(cluster) {
                    warn!(
                        "Could not release cluster {} after failing to link it: {}",
                        cluster, rollback
                    );
                }
                return Err(err);
            }
        }
        debug!("Allocated cluster {} (after {:?})", cluster, previous);
        Ok(cluster)
    }

    /// Marks `cluster` free in every copy
    pub fn free_cluster(&mut self, cluster: u32) -> Result<()> {
        self.set_entry(cluster, FatEntry::Free)?;
        debug!("Freed cluster {}", cluster);
        Ok(())
    }
}

/// Iterator over a cluster chain. Finite: a revisited cluster ends it with
/// `CyclicChain`, and any error ends it.
pub struct ClusterChain<'t, 'a, D> {
    fat: &'t mut FatTable<'a, D>,
    start: u32,
    next: Option<u32>,
    visited: HashSet<u32>,
}

impl<D: Read + Write + Seek> Iterator for ClusterChain<'_, '_, D> {
    type Item = Result<u32>;

    fn next(&mut self) -> Option<Self::Item> {
        let cluster = self.next.take()?;
        if !self.visited.insert(cluster) {
            warn!(
                "Cluster chain from {} loops back to cluster {}",
                self.start, cluster
            );
            return Some(Err(Fat32Error::CyclicChain {
                start: self.start,
                cluster,
            }));
        }
        match self.fat.next_cluster(cluster) {
            Ok(next) => {
                self.next = next;
                Some(Ok(cluster))
            }
            Err(err) => Some(Err(err)),
        }
    }
}
