//! fat32-nav: browse a FAT32 volume image and create directories in it

pub mod error;
pub mod fat32;

// Re-export main types
pub use error::{Fat32Error, Result};
pub use fat32::{
    DirEntry, Fat32Volume, FatEntry, NavigationState, Navigator, ShortName, VolumeGeometry,
    directory::format_short_name,
};
