pub mod bpb;
pub mod directory;
pub mod fat_table;
pub mod navigator;
pub mod volume;

pub use bpb::VolumeGeometry;
pub use directory::{DirEntry, DirSlot, ShortName};
pub use fat_table::{FatEntry, FatTable};
pub use navigator::{NavigationState, Navigator};
pub use volume::Fat32Volume;

pub(crate) const DIR_ENTRY_SIZE: usize = 32;
pub(crate) const BOOT_SECTOR_SIZE: usize = 512;

/// Attribute bits of a directory entry
pub const ATTR_VOLUME_ID: u8 = 0x08;
pub const ATTR_DIRECTORY: u8 = 0x10;
pub const ATTR_LONG_NAME: u8 = 0x0F;

/// First cluster usable for data
pub const FIRST_DATA_CLUSTER: u32 = 2;
