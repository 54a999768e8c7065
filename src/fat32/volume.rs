use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use log::{debug, info};

use super::bpb::read_bpb;
use super::{FatTable, VolumeGeometry};
use crate::error::{Fat32Error, Result};

/// A mounted FAT32 image with exclusive access to its block source
pub struct Fat32Volume<D> {
    device: D,
    geometry: VolumeGeometry,
}

impl Fat32Volume<File> {
    /// Opens the image at `path` for reading and writing and mounts it.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path.as_ref())?;
        Self::mount(file)
    }
}

impl<D: Read + Write + Seek> Fat32Volume<D> {
    pub fn mount(mut device: D) -> Result<Self> {
        let geometry = read_bpb(&mut device)?;
        info!(
            "Mounted FAT32 volume: {} bytes/sector, {} sectors/cluster, {} clusters, root at {}",
            geometry.bytes_per_sector,
            geometry.sectors_per_cluster,
            geometry.total_clusters,
            geometry.root_cluster
        );
        Ok(Self { device, geometry })
    }

    pub fn geometry(&self) -> &VolumeGeometry {
        &self.geometry
    }

    pub fn fat(&mut self) -> FatTable<'_, D> {
        FatTable::new(&mut self.device, &self.geometry)
    }

    /// Collects the cluster chain starting at `start`
    pub fn chain(&mut self, start: u32) -> Result<Vec<u32>> {
        self.fat().collect_chain(start)
    }

    pub fn read_cluster(&mut self, cluster: u32) -> Result<Vec<u8>> {
        let offset = self.geometry.cluster_to_offset(cluster)?;
        self.device.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; self.geometry.cluster_size()];
        self.device.read_exact(&mut buf)?;
        debug!("Read cluster {} at {:#x}", cluster, offset);
        Ok(buf)
    }

    /// Writes exactly one cluster of data to `cluster`
    pub fn write_cluster(&mut self, cluster: u32, data: &[u8]) -> Result<()> {
        if data.len() != self.geometry.cluster_size() {
            return Err(Fat32Error::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!(
                    "cluster buffer is {} bytes, expected {}",
                    data.len(),
                    self.geometry.cluster_size()
                ),
            )));
        }
        let offset = self.geometry.cluster_to_offset(cluster)?;
        self.device.seek(SeekFrom::Start(offset))?;
        self.device.write_all(data)?;
        debug!("Wrote cluster {} at {:#x}", cluster, offset);
        Ok(())
    }

    pub fn zero_cluster(&mut self, cluster: u32) -> Result<()> {
        let zeros = vec![0u8; self.geometry.cluster_size()];
        self.write_cluster(cluster, &zeros)
    }

    pub fn flush(&mut self) -> Result<()> {
        self.device.flush()?;
        Ok(())
    }

    /// Gives the block source back
    pub fn into_inner(self) -> D {
        self.device
    }
}
