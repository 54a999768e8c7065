//! 32-byte directory entry codec and 8.3 short names

use std::fmt;

use super::{ATTR_DIRECTORY, ATTR_LONG_NAME, ATTR_VOLUME_ID, DIR_ENTRY_SIZE};
use crate::error::{Fat32Error, Result};

/// First name byte marking the end of a directory
pub const END_OF_DIRECTORY: u8 = 0x00;

/// First name byte marking a deleted entry
pub const DELETED_ENTRY: u8 = 0xE5;

/// Characters DOS never allows in a short name
const ILLEGAL_SHORT_NAME_CHARS: &[u8] = b"\"*+,/:;<=>?[\\]|";

/// Space-padded 11-byte 8.3 name exactly as stored on disk
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShortName([u8; 11]);

impl ShortName {
    pub const DOT: ShortName = ShortName(*b".          ");
    pub const DOTDOT: ShortName = ShortName(*b"..         ");

    /// Takes raw on-disk bytes verbatim
    pub const fn from_bytes(bytes: [u8; 11]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 11] {
        &self.0
    }

    /// Validates a user-supplied name and converts it to the padded, upper-cased 8.3 form.
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.is_empty() {
            return Err(Fat32Error::invalid_name(raw, "name is empty"));
        }
        if raw == "." || raw == ".." {
            return Err(Fat32Error::invalid_name(raw, "name is reserved"));
        }
        if !raw.is_ascii() {
            return Err(Fat32Error::invalid_name(raw, "name is not ASCII"));
        }

        let (base, ext) = raw.split_once('.').unwrap_or((raw, ""));
        if ext.contains('.') {
            return Err(Fat32Error::invalid_name(raw, "more than one dot"));
        }
        if base.is_empty() {
            return Err(Fat32Error::invalid_name(raw, "missing base name"));
        }
        if base.len() > 8 {
            return Err(Fat32Error::invalid_name(
                raw,
                "base name longer than 8 characters",
            ));
        }
        if ext.len() > 3 {
            return Err(Fat32Error::invalid_name(
                raw,
                "extension longer than 3 characters",
            ));
        }

        for b in base.bytes().chain(ext.bytes()) {
            if b.is_ascii_control() {
                return Err(Fat32Error::invalid_name(raw, "contains a control character"));
            }
            if b == b' ' {
                return Err(Fat32Error::invalid_name(raw, "contains a space"));
            }
            if ILLEGAL_SHORT_NAME_CHARS.contains(&b) {
                return Err(Fat32Error::invalid_name(
                    raw,
                    format!("illegal character '{}'", b as char),
                ));
            }
        }

        let mut name = [b' '; 11];
        for (dst, src) in name[..8].iter_mut().zip(base.bytes()) {
            *dst = src.to_ascii_uppercase();
        }
        for (dst, src) in name[8..].iter_mut().zip(ext.bytes()) {
            *dst = src.to_ascii_uppercase();
        }
        Ok(Self(name))
    }

    /// `NAME.EXT` with the padding trimmed
    pub fn display_name(&self) -> String {
        let name = String::from_utf8_lossy(&self.0[0..8]).trim_end().to_string();
        let ext = String::from_utf8_lossy(&self.0[8..11]).trim_end().to_string();
        if ext.is_empty() {
            name
        } else {
            format!("{}.{}", name, ext)
        }
    }
}

impl fmt::Debug for ShortName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ShortName({:?})", String::from_utf8_lossy(&self.0))
    }
}

/// Validates `raw` as an 8.3 name, see [`ShortName::parse`].
pub fn format_short_name(raw: &str) -> Result<ShortName> {
    ShortName::parse(raw)
}

/// Decoded 32-byte directory record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: ShortName,
    pub attr: u8,
    /// NT flags, creation time/date and last access date (bytes 12..20)
    pub created: [u8; 8],
    /// Last write time and date (bytes 22..26)
    pub modified: [u8; 4],
    pub first_cluster: u32,
    pub file_size: u32,
}

impl DirEntry {
    /// Empty subdirectory entry named `name` starting at `cluster`
    pub fn directory(name: ShortName, cluster: u32) -> Self {
        Self {
            name,
            attr: ATTR_DIRECTORY,
            created: [0; 8],
            modified: [0; 4],
            first_cluster: cluster,
            file_size: 0,
        }
    }

    pub fn decode(record: &[u8; DIR_ENTRY_SIZE]) -> Self {
        let mut name = [0u8; 11];
        name.copy_from_slice(&record[0..11]);
        let mut created = [0u8; 8];
        created.copy_from_slice(&record[12..20]);
        let mut modified = [0u8; 4];
        modified.copy_from_slice(&record[22..26]);
        let high = u16::from_le_bytes([record[20], record[21]]) as u32;
        let low = u16::from_le_bytes([record[26], record[27]]) as u32;
        Self {
            name: ShortName(name),
            attr: record[11],
            created,
            modified,
            first_cluster: (high << 16) | low,
            file_size: u32::from_le_bytes([record[28], record[29], record[30], record[31]]),
        }
    }

    pub fn encode(&self) -> [u8; DIR_ENTRY_SIZE] {
        let mut record = [0u8; DIR_ENTRY_SIZE];
        record[0..11].copy_from_slice(&self.name.0);
        record[11] = self.attr;
        record[12..20].copy_from_slice(&self.created);
        record[20..22].copy_from_slice(&((self.first_cluster >> 16) as u16).to_le_bytes());
        record[22..26].copy_from_slice(&self.modified);
        record[26..28].copy_from_slice(&(self.first_cluster as u16).to_le_bytes());
        record[28..32].copy_from_slice(&self.file_size.to_le_bytes());
        record
    }

    pub fn is_directory(&self) -> bool {
        self.attr & ATTR_DIRECTORY != 0
    }

    pub fn is_long_name(&self) -> bool {
        self.attr & ATTR_LONG_NAME == ATTR_LONG_NAME
    }

    pub fn is_volume_label(&self) -> bool {
        !self.is_long_name() && self.attr & ATTR_VOLUME_ID != 0
    }

    /// `.` or `..` bootstrap entry
    pub fn is_dot(&self) -> bool {
        self.name == ShortName::DOT || self.name == ShortName::DOTDOT
    }

    /// Whether this entry names a real file or subdirectory
    pub fn is_listable(&self) -> bool {
        !self.is_dot() && !self.is_long_name() && !self.is_volume_label()
    }

    pub fn display_name(&self) -> String {
        self.name.display_name()
    }
}

/// Encodes `entry` into its 32-byte on-disk form.
pub fn encode_entry(entry: &DirEntry) -> [u8; DIR_ENTRY_SIZE] {
    entry.encode()
}

/// One 32-byte slot of a directory cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirSlot {
    Active { entry: DirEntry, offset: usize },
    /// Deleted entry, free for reuse
    Tombstone { offset: usize },
    /// First never-used slot; nothing after it is meaningful
    End { offset: usize },
}

impl DirSlot {
    /// Byte offset of the slot within its cluster
    pub fn offset(&self) -> usize {
        match self {
            Self::Active { offset, .. } | Self::Tombstone { offset } | Self::End { offset } => {
                *offset
            }
        }
    }

    pub fn is_free(&self) -> bool {
        !matches!(self, Self::Active { .. })
    }
}

/// Iterator over the slots of one directory cluster
pub struct DirEntries<'a> {
    records: std::slice::ChunksExact<'a, u8>,
    offset: usize,
    finished: bool,
}

impl Iterator for DirEntries<'_> {
    type Item = DirSlot;

    fn next(&mut self) -> Option<DirSlot> {
        if self.finished {
            return None;
        }
        let Some(chunk) = self.records.next() else {
            self.finished = true;
            return None;
        };
        let offset = self.offset;
        self.offset += DIR_ENTRY_SIZE;

        let slot = match chunk[0] {
            END_OF_DIRECTORY => {
                self.finished = true;
                DirSlot::End { offset }
            }
            DELETED_ENTRY => DirSlot::Tombstone { offset },
            _ => {
                let mut record = [0u8; DIR_ENTRY_SIZE];
                record.copy_from_slice(chunk);
                DirSlot::Active {
                    entry: DirEntry::decode(&record),
                    offset,
                }
            }
        };
        Some(slot)
    }
}

/// Decodes the slots of a directory cluster. Stops after the first `End` slot;
/// a trailing partial record is ignored.
pub fn decode_entries(cluster_data: &[u8]) -> DirEntries<'_> {
    DirEntries {
        records: cluster_data.chunks_exact(DIR_ENTRY_SIZE),
        offset: 0,
        finished: false,
    }
}
