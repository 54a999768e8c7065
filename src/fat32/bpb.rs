//! Boot sector (BPB) decoding and cluster/offset translation

use std::io::{Read, Seek, SeekFrom};

use super::{BOOT_SECTOR_SIZE, FIRST_DATA_CLUSTER};
use crate::error::{Fat32Error, Result};

/// Sector sizes a FAT32 boot sector may declare
const VALID_SECTOR_SIZES: [u16; 4] = [512, 1024, 2048, 4096];

/// Volume geometry decoded from the boot sector. Immutable after mount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeGeometry {
    pub bytes_per_sector: u16,
    pub sectors_per_cluster: u8,
    pub reserved_sectors: u16,
    pub num_fats: u8,
    pub sectors_per_fat: u32,
    pub root_cluster: u32,
    /// Number of clusters in the data region
    pub total_clusters: u32,
    /// Size of the whole image in bytes
    pub image_size: u64,
}

fn read_u16(bpb: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([bpb[offset], bpb[offset + 1]])
}

fn read_u32(bpb: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bpb[offset],
        bpb[offset + 1],
        bpb[offset + 2],
        bpb[offset + 3],
    ])
}

/// Reads the boot sector at the start of `device` and decodes it.
pub fn read_bpb<D: Read + Seek>(device: &mut D) -> Result<VolumeGeometry> {
    let image_size = device.seek(SeekFrom::End(0))?;
    if image_size < BOOT_SECTOR_SIZE as u64 {
        return Err(Fat32Error::corrupt_volume(format!(
            "image is {} bytes, smaller than a boot sector",
            image_size
        )));
    }
    device.seek(SeekFrom::Start(0))?;
    let mut bpb = [0u8; BOOT_SECTOR_SIZE];
    device.read_exact(&mut bpb)?;
    VolumeGeometry::parse(&bpb, image_size)
}

impl VolumeGeometry {
    /// Decodes the first 512 bytes of a volume. `image_size` is the length of the whole image.
    pub fn parse(boot_sector: &[u8], image_size: u64) -> Result<Self> {
        if boot_sector.len() < BOOT_SECTOR_SIZE {
            return Err(Fat32Error::corrupt_volume(format!(
                "boot sector is {} bytes, expected {}",
                boot_sector.len(),
                BOOT_SECTOR_SIZE
            )));
        }

        let bytes_per_sector = read_u16(boot_sector, 0x0B);
        let sectors_per_cluster = boot_sector[0x0D];
        let reserved_sectors = read_u16(boot_sector, 0x0E);
        let num_fats = boot_sector[0x10];
        let total_sectors_16 = read_u16(boot_sector, 0x13);
        let total_sectors_32 = read_u32(boot_sector, 0x20);
        let sectors_per_fat = read_u32(boot_sector, 0x24);
        let root_cluster = read_u32(boot_sector, 0x2C);

        if !VALID_SECTOR_SIZES.contains(&bytes_per_sector) {
            return Err(Fat32Error::corrupt_volume(format!(
                "bytes per sector is {}, expected 512, 1024, 2048 or 4096",
                bytes_per_sector
            )));
        }
        if sectors_per_cluster == 0 || !sectors_per_cluster.is_power_of_two() {
            return Err(Fat32Error::corrupt_volume(format!(
                "sectors per cluster is {}",
                sectors_per_cluster
            )));
        }
        if num_fats == 0 {
            return Err(Fat32Error::corrupt_volume("volume declares no FAT copies"));
        }
        if sectors_per_fat == 0 {
            return Err(Fat32Error::corrupt_volume("sectors per FAT is 0"));
        }

        let sector_bytes = bytes_per_sector as u64;
        let declared_sectors = if total_sectors_16 != 0 {
            total_sectors_16 as u64
        } else {
            total_sectors_32 as u64
        };
        let volume_size = if declared_sectors != 0 {
            image_size.min(declared_sectors * sector_bytes)
        } else {
            image_size
        };

        let data_start =
            (reserved_sectors as u64 + num_fats as u64 * sectors_per_fat as u64) * sector_bytes;
        if data_start >= volume_size {
            return Err(Fat32Error::corrupt_volume(format!(
                "data region starts at {:#x}, beyond the {} byte volume",
                data_start, volume_size
            )));
        }

        let cluster_size = sector_bytes * sectors_per_cluster as u64;
        let data_clusters = (volume_size - data_start) / cluster_size;
        let fat_capacity = (sectors_per_fat as u64 * sector_bytes / 4).saturating_sub(2);
        let total_clusters = data_clusters
            .min(fat_capacity)
            .min((super::fat_table::FAT32_BAD_CLUSTER - FIRST_DATA_CLUSTER) as u64)
            as u32;

        if root_cluster < FIRST_DATA_CLUSTER || root_cluster >= total_clusters + FIRST_DATA_CLUSTER
        {
            return Err(Fat32Error::corrupt_volume(format!(
                "root cluster {} outside [2, {})",
                root_cluster,
                total_clusters + FIRST_DATA_CLUSTER
            )));
        }

        Ok(Self {
            bytes_per_sector,
            sectors_per_cluster,
            reserved_sectors,
            num_fats,
            sectors_per_fat,
            root_cluster,
            total_clusters,
            image_size,
        })
    }

    pub fn cluster_size(&self) -> usize {
        self.bytes_per_sector as usize * self.sectors_per_cluster as usize
    }

    /// Byte offset of the first FAT copy
    pub fn fat_region_start(&self) -> u64 {
        self.reserved_sectors as u64 * self.bytes_per_sector as u64
    }

    /// Size of one FAT copy in bytes
    pub fn fat_size(&self) -> u64 {
        self.sectors_per_fat as u64 * self.bytes_per_sector as u64
    }

    /// Byte offset of FAT copy `copy` (0-based)
    pub fn fat_copy_offset(&self, copy: u8) -> u64 {
        self.fat_region_start() + copy as u64 * self.fat_size()
    }

    /// Number of 32-bit entries one FAT copy can hold
    pub fn fat_entries_per_table(&self) -> u32 {
        (self.fat_size() / 4) as u32
    }

    pub fn data_region_start(&self) -> u64 {
        self.fat_copy_offset(self.num_fats)
    }

    /// One past the highest valid data cluster
    pub fn cluster_limit(&self) -> u32 {
        self.total_clusters + FIRST_DATA_CLUSTER
    }

    pub fn is_valid_cluster(&self, cluster: u32) -> bool {
        (FIRST_DATA_CLUSTER..self.cluster_limit()).contains(&cluster)
    }

    /// Byte offset of the first byte of `cluster`.
    pub fn cluster_to_offset(&self, cluster: u32) -> Result<u64> {
        if !self.is_valid_cluster(cluster) {
            return Err(Fat32Error::InvalidCluster { cluster });
        }
        Ok(self.data_region_start()
            + (cluster - FIRST_DATA_CLUSTER) as u64 * self.cluster_size() as u64)
    }

    /// Cluster containing the byte at `offset`.
    pub fn offset_to_cluster(&self, offset: u64) -> Result<u32> {
        let data_start = self.data_region_start();
        let data_end = data_start + self.total_clusters as u64 * self.cluster_size() as u64;
        if offset < data_start || offset >= data_end {
            return Err(Fat32Error::InvalidOffset { offset });
        }
        Ok(((offset - data_start) / self.cluster_size() as u64) as u32 + FIRST_DATA_CLUSTER)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn boot_sector(bps: u16, spc: u8, reserved: u16, fats: u8, spf: u32, root: u32) -> Vec<u8> {
        let mut bs = vec![0u8; BOOT_SECTOR_SIZE];
        bs[0x0B..0x0D].copy_from_slice(&bps.to_le_bytes());
        bs[0x0D] = spc;
        bs[0x0E..0x10].copy_from_slice(&reserved.to_le_bytes());
        bs[0x10] = fats;
        bs[0x24..0x28].copy_from_slice(&spf.to_le_bytes());
        bs[0x2C..0x30].copy_from_slice(&root.to_le_bytes());
        bs[0x1FE] = 0x55;
        bs[0x1FF] = 0xAA;
        bs
    }

    #[test]
    fn data_region_follows_reserved_and_fats() {
        let bs = boot_sector(512, 2, 32, 2, 4, 2);
        let image_size = (32 + 8 + 200) * 512;
        let geometry = VolumeGeometry::parse(&bs, image_size).unwrap();

        assert_eq!(geometry.fat_region_start(), 32 * 512);
        assert_eq!(geometry.fat_copy_offset(1), 36 * 512);
        assert_eq!(geometry.data_region_start(), 40 * 512);
        assert_eq!(geometry.total_clusters, 100);
        assert_eq!(geometry.cluster_to_offset(2).unwrap(), 40 * 512);
        assert_eq!(geometry.cluster_to_offset(3).unwrap(), 42 * 512);
    }

    #[test]
    fn offset_translation_inverts_cluster_translation() {
        let bs = boot_sector(512, 1, 8, 1, 1, 2);
        let geometry = VolumeGeometry::parse(&bs, (8 + 1 + 64) * 512).unwrap();
        for cluster in 2..geometry.cluster_limit() {
            let offset = geometry.cluster_to_offset(cluster).unwrap();
            assert_eq!(geometry.offset_to_cluster(offset).unwrap(), cluster);
            assert_eq!(geometry.offset_to_cluster(offset + 511).unwrap(), cluster);
        }
        assert!(matches!(
            geometry.offset_to_cluster(0),
            Err(Fat32Error::InvalidOffset { offset: 0 })
        ));
    }

    #[test]
    fn cluster_count_is_bounded_by_fat_capacity() {
        // One FAT sector holds 128 entries, two of them reserved.
        let bs = boot_sector(512, 1, 1, 1, 1, 2);
        let geometry = VolumeGeometry::parse(&bs, (2 + 1000) * 512).unwrap();
        assert_eq!(geometry.total_clusters, 126);
    }

    #[test]
    fn declared_total_sectors_bound_the_volume() {
        let mut bs = boot_sector(512, 1, 4, 1, 1, 2);
        bs[0x20..0x24].copy_from_slice(&(4u32 + 1 + 10).to_le_bytes());
        let geometry = VolumeGeometry::parse(&bs, 1 << 20).unwrap();
        assert_eq!(geometry.total_clusters, 10);
        assert_eq!(geometry.image_size, 1 << 20);
    }

    #[test]
    fn rejects_short_boot_sector() {
        let err = VolumeGeometry::parse(&[0u8; 100], 4096).unwrap_err();
        assert!(matches!(err, Fat32Error::CorruptVolume { .. }));
    }

    #[test]
    fn rejects_sectors_too_small_for_a_directory() {
        for bps in [0, 32, 256, 768, 8192] {
            let bs = boot_sector(bps, 1, 16, 1, 1, 2);
            let err = VolumeGeometry::parse(&bs, 1 << 16).unwrap_err();
            assert!(
                matches!(err, Fat32Error::CorruptVolume { .. }),
                "{} bytes per sector accepted",
                bps
            );
        }
    }

    #[test]
    fn rejects_non_power_of_two_cluster() {
        let bs = boot_sector(512, 3, 4, 1, 1, 2);
        let err = VolumeGeometry::parse(&bs, 1 << 16).unwrap_err();
        assert!(matches!(err, Fat32Error::CorruptVolume { .. }));
    }
}
