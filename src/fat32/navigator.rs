//! Current-directory state and the directory verbs built on top of it

use std::io::{Read, Seek, Write};

use log::{debug, info, warn};

use super::directory::{DirEntry, DirSlot, END_OF_DIRECTORY, ShortName, decode_entries};
use super::{DIR_ENTRY_SIZE, Fat32Volume, FatEntry, VolumeGeometry};
use crate::error::{Fat32Error, Result};

/// Where a session currently is: a directory's first cluster and the names
/// walked from the root to reach it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavigationState {
    cluster: u32,
    components: Vec<String>,
}

impl NavigationState {
    pub fn root(geometry: &VolumeGeometry) -> Self {
        Self {
            cluster: geometry.root_cluster,
            components: Vec::new(),
        }
    }

    pub fn cluster(&self) -> u32 {
        self.cluster
    }

    pub fn components(&self) -> &[String] {
        &self.components
    }

    /// `/` at the root, `/A/B` below it
    pub fn path(&self) -> String {
        if self.components.is_empty() {
            "/".to_string()
        } else {
            self.components
                .iter()
                .map(|c| format!("/{}", c))
                .collect()
        }
    }
}

/// One navigation session over a mounted volume
pub struct Navigator<D> {
    volume: Fat32Volume<D>,
    state: NavigationState,
}

impl<D: Read + Write + Seek> Navigator<D> {
    /// Starts a session at the volume root
    pub fn new(volume: Fat32Volume<D>) -> Self {
        let state = NavigationState::root(volume.geometry());
        Self { volume, state }
    }

    pub fn mount(device: D) -> Result<Self> {
        Ok(Self::new(Fat32Volume::mount(device)?))
    }

    pub fn info(&self) -> &VolumeGeometry {
        self.volume.geometry()
    }

    pub fn state(&self) -> &NavigationState {
        &self.state
    }

    pub fn path(&self) -> String {
        self.state.path()
    }

    pub fn volume_mut(&mut self) -> &mut Fat32Volume<D> {
        &mut self.volume
    }

    pub fn into_volume(self) -> Fat32Volume<D> {
        self.volume
    }

    fn root_cluster(&self) -> u32 {
        self.volume.geometry().root_cluster
    }

    fn at_root(&self) -> bool {
        self.state.cluster == self.root_cluster()
    }

    /// Slots of the directory at `dir_cluster` in chain order, up to and
    /// including the first `End` slot. Each slot is paired with its cluster.
    fn directory_slots(&mut self, dir_cluster: u32) -> Result<Vec<(u32, DirSlot)>> {
        let chain = self.volume.chain(dir_cluster)?;
        let mut slots = Vec::new();
        for cluster in chain {
            let data = self.volume.read_cluster(cluster)?;
            let mut reached_end = false;
            for slot in decode_entries(&data) {
                reached_end = matches!(slot, DirSlot::End { .. });
                slots.push((cluster, slot));
            }
            if reached_end {
                break;
            }
        }
        debug!(
            "Directory at cluster {} has {} slots",
            dir_cluster,
            slots.len()
        );
        Ok(slots)
    }

    /// Active entries of the current directory, without `.`/`..`, long-name
    /// fragments or the volume label.
    pub fn entries(&mut self) -> Result<Vec<DirEntry>> {
        let slots = self.directory_slots(self.state.cluster)?;
        Ok(slots
            .into_iter()
            .filter_map(|(_, slot)| match slot {
                DirSlot::Active { entry, .. } if entry.is_listable() => Some(entry),
                _ => None,
            })
            .collect())
    }

    /// Names in the current directory, `.` and `..` first.
    pub fn list(&mut self) -> Result<Vec<String>> {
        let mut names = vec![".".to_string(), "..".to_string()];
        names.extend(self.entries()?.iter().map(DirEntry::display_name));
        Ok(names)
    }

    fn find_active(&mut self, name: &ShortName) -> Result<Option<DirEntry>> {
        let slots = self.directory_slots(self.state.cluster)?;
        Ok(slots.into_iter().find_map(|(_, slot)| match slot {
            DirSlot::Active { entry, .. } if &entry.name == name && !entry.is_long_name() => {
                Some(entry)
            }
            _ => None,
        }))
    }

    pub fn change_directory(&mut self, name: &str) -> Result<()> {
        match name {
            "." => Ok(()),
            ".." => self.change_to_parent(),
            _ => self.change_to_child(name),
        }
    }

    fn change_to_parent(&mut self) -> Result<()> {
        if self.at_root() {
            return Ok(());
        }
        let parent = self
            .find_active(&ShortName::DOTDOT)?
            .ok_or_else(|| Fat32Error::not_found(".."))?;

        if parent.first_cluster == 0 || parent.first_cluster == self.root_cluster() {
            self.state = NavigationState::root(self.volume.geometry());
        } else {
            if !self.volume.geometry().is_valid_cluster(parent.first_cluster) {
                return Err(Fat32Error::InvalidCluster {
                    cluster: parent.first_cluster,
                });
            }
            self.state.cluster = parent.first_cluster;
            self.state.components.pop();
        }
        debug!("Moved up to {} (cluster {})", self.state.path(), self.state.cluster);
        Ok(())
    }

    fn change_to_child(&mut self, name: &str) -> Result<()> {
        let short = ShortName::parse(name)?;
        let entry = self
            .find_active(&short)?
            .filter(DirEntry::is_directory)
            .ok_or_else(|| Fat32Error::not_found(name))?;

        if !self.volume.geometry().is_valid_cluster(entry.first_cluster) {
            return Err(Fat32Error::InvalidCluster {
                cluster: entry.first_cluster,
            });
        }
        self.state.cluster = entry.first_cluster;
        self.state.components.push(name.to_string());
        debug!("Entered {} (cluster {})", self.state.path(), self.state.cluster);
        Ok(())
    }

    /// Creates an empty subdirectory `name` in the current directory and
    /// returns its first cluster. The current position does not change.
    ///
    /// On failure every cluster allocated here is released again.
    pub fn create_subdirectory(&mut self, name: &str) -> Result<u32> {
        let short = ShortName::parse(name)?;
        let current = self.state.cluster;

        let slots = self.directory_slots(current)?;
        let mut free_slot = None;
        for (cluster, slot) in &slots {
            match slot {
                DirSlot::Active { entry, .. } if entry.name == short && !entry.is_long_name() => {
                    return Err(Fat32Error::duplicate_name(name));
                }
                DirSlot::Active { .. } => {}
                _ => {
                    if free_slot.is_none() {
                        free_slot = Some((*cluster, slot.clone()));
                    }
                }
            }
        }

        let child = self.volume.fat().allocate_cluster(None)?;
        let mut extension = None;
        if let Err(err) = self.populate_subdirectory(short, child, free_slot, &mut extension) {
            self.release_allocation(child, extension);
            return Err(err);
        }

        info!(
            "Created directory {} at cluster {} in {}",
            short.display_name(),
            child,
            self.state.path()
        );
        Ok(child)
    }

    /// Writes the bootstrap entries of `child` and links it into the current
    /// directory. An extension cluster is reported through `extension` as
    /// `(cluster, previous tail)` as soon as it is linked.
    fn populate_subdirectory(
        &mut self,
        short: ShortName,
        child: u32,
        free_slot: Option<(u32, DirSlot)>,
        extension: &mut Option<(u32, u32)>,
    ) -> Result<()> {
        let current = self.state.cluster;
        let (slot_cluster, slot) = match free_slot {
            Some(found) => found,
            None => {
                let (cluster, tail) = self.extend_directory(current)?;
                *extension = Some((cluster, tail));
                (cluster, DirSlot::End { offset: 0 })
            }
        };

        let parent_ref = if current == self.root_cluster() {
            0
        } else {
            current
        };
        let mut contents = vec![0u8; self.volume.geometry().cluster_size()];
        contents[0..DIR_ENTRY_SIZE]
            .copy_from_slice(&DirEntry::directory(ShortName::DOT, child).encode());
        contents[DIR_ENTRY_SIZE..2 * DIR_ENTRY_SIZE]
            .copy_from_slice(&DirEntry::directory(ShortName::DOTDOT, parent_ref).encode());
        self.volume.write_cluster(child, &contents)?;

        let mut data = self.volume.read_cluster(slot_cluster)?;
        let offset = slot.offset();
        data[offset..offset + DIR_ENTRY_SIZE]
            .copy_from_slice(&DirEntry::directory(short, child).encode());
        // Reusing the end marker moves it one slot down.
        if let DirSlot::End { .. } = slot {
            if let Some(next) = data.get_mut(offset + DIR_ENTRY_SIZE) {
                *next = END_OF_DIRECTORY;
            }
        }
        self.volume.write_cluster(slot_cluster, &data)?;
        self.volume.flush()
    }

    /// Undoes the FAT side of a failed creation
    fn release_allocation(&mut self, child: u32, extension: Option<(u32, u32)>) {
        if let Some((cluster, tail)) = extension {
            self.release_extension(cluster, tail);
        }
        if let Err(err) = self.volume.fat().free_cluster(child) {
            warn!(
                "Could not release cluster {} after failed creation: {}",
                child, err
            );
        }
    }

    fn release_extension(&mut self, cluster: u32, tail: u32) {
        let mut fat = self.volume.fat();
        let unlinked = fat
            .set_entry(tail, FatEntry::EndOfChain)
            .and_then(|()| fat.free_cluster(cluster));
        if let Err(err) = unlinked {
            warn!(
                "Could not detach cluster {} from tail {}: {}",
                cluster, tail, err
            );
        }
    }

    /// Appends a zeroed cluster to the chain of the directory at `dir_cluster`
    /// and returns it with the previous tail.
    fn extend_directory(&mut self, dir_cluster: u32) -> Result<(u32, u32)> {
        let chain = self.volume.chain(dir_cluster)?;
        let tail = *chain
            .last()
            .ok_or(Fat32Error::InvalidCluster { cluster: dir_cluster })?;
        let extension = self.volume.fat().allocate_cluster(Some(tail))?;
        if let Err(err) = self.volume.zero_cluster(extension) {
            self.release_extension(extension, tail);
            return Err(err);
        }
        debug!(
            "Extended directory at cluster {} with cluster {}",
            dir_cluster, extension
        );
        Ok((extension, tail))
    }
}
