//! Reading, editing and writing of Nintendo RARC (JKRArchive) archives.
//!
//! An archive is a tree of folders stored as two flat tables: one record per
//! folder and one record per entry (file or directory link), followed by a
//! shared name pool and the raw file data. Every folder's entries, including
//! the `.` and `..` shortcuts, sit in one contiguous run of the entry table.
//!
//! The byte order is given by the magic: `RARC` for big-endian archives and
//! `CRAR` for little-endian ones.
use binread::BinRead;
use binwrite::BinWrite;
mod archive;
mod cursor;
mod error;
mod node;
mod parse;
mod string_pool;
mod writer;
pub use archive::{Archive, ManifestEntry};
pub use cursor::{EndianCursor, SeekGuard};
pub use error::{RarcError, Result};
pub use node::{Directory, FileAttributes, FolderId, FolderNode, NodeId, Residency};
pub use parse::ReadOptions;
pub use string_pool::StringPool;

/// `RARC` read as a 32-bit value; written in the archive byte order it
/// becomes `CRAR` for little-endian archives.
const RARC_MAGIC: u32 = 0x5241_5243;
const HEADER_SIZE: u32 = 0x20;
const DATA_HEADER_SIZE: u32 = 0x20;
const DIR_NODE_SIZE: u32 = 0x10;
const FILE_NODE_SIZE: u32 = 0x14;
const ALIGNMENT: usize = 0x20;
/// Data field of a directory entry that links to no folder
const NO_FOLDER: u32 = 0xFFFF_FFFF;
/// Node index written for every directory entry
const DIR_NODE_INDEX: u16 = 0xFFFF;
/// Size field written for every directory entry
const DIR_DATA_SIZE: u32 = 0x10;
const SELF_SHORTCUT: &str = ".";
const PARENT_SHORTCUT: &str = "..";

/// Hash of an entry name as stored in both node tables
pub fn hash_name(name: &[u8]) -> u16 {
    name.iter()
        .fold(0u16, |hash, b| hash.wrapping_mul(3).wrapping_add(*b as u16))
}

fn is_shortcut(name: &str) -> bool {
    name == SELF_SHORTCUT || name == PARENT_SHORTCUT
}

#[derive(Debug, Eq, PartialEq, Copy, Clone, Hash)]
pub enum Endian {
    Big,
    Little,
}

impl Endian {
    /// Byte order announced by the first four bytes of an archive
    pub fn from_magic(magic: [u8; 4]) -> Option<Endian> {
        match &magic {
            b"RARC" => Some(Endian::Big),
            b"CRAR" => Some(Endian::Little),
            _ => None,
        }
    }

    pub fn magic(self) -> [u8; 4] {
        match self {
            Endian::Big => *b"RARC",
            Endian::Little => *b"CRAR",
        }
    }
}

impl Default for Endian {
    fn default() -> Self {
        Endian::Big
    }
}

impl From<Endian> for binwrite::Endian {
    fn from(endian: Endian) -> Self {
        match endian {
            Endian::Big => binwrite::Endian::Big,
            Endian::Little => binwrite::Endian::Little,
        }
    }
}

/// Fixed header following the magic. Size = 0x1C
#[derive(Debug, Default, Eq, PartialEq, Copy, Clone, BinRead, BinWrite)]
pub struct ArchiveHeader {
    pub file_size: u32,
    pub header_size: u32,
    /// Relative to the end of the header
    pub file_data_offset: u32,
    pub file_data_size: u32,
    pub mram_size: u32,
    pub aram_size: u32,
    pub dvd_size: u32,
}

impl ArchiveHeader {
    /// Absolute offset of the file data region
    pub fn file_data_start(&self) -> u64 {
        self.file_data_offset as u64 + self.header_size as u64
    }
}

/// Size = 0x20
#[derive(Debug, Default, Eq, PartialEq, Copy, Clone, BinRead, BinWrite)]
pub struct ArchiveDataHeader {
    pub dir_node_count: u32,
    pub dir_node_offset: u32,
    pub file_node_count: u32,
    pub file_node_offset: u32,
    pub string_table_size: u32,
    pub string_table_offset: u32,
    pub next_file_index: u16,
    pub sync: u8,
    pub padding: [u8; 5],
}

impl ArchiveDataHeader {
    pub fn is_sync(&self) -> bool {
        self.sync != 0
    }

    pub fn dir_node_start(&self, header: &ArchiveHeader) -> u64 {
        self.dir_node_offset as u64 + header.header_size as u64
    }

    pub fn file_node_start(&self, header: &ArchiveHeader) -> u64 {
        self.file_node_offset as u64 + header.header_size as u64
    }

    pub fn string_table_start(&self, header: &ArchiveHeader) -> u64 {
        self.string_table_offset as u64 + header.header_size as u64
    }
}

/// Size = 0x10
#[derive(Debug, Default, Eq, PartialEq, Copy, Clone, BinRead, BinWrite)]
struct ResDirNode {
    identifier: u32,
    name_offset: u32,
    hash: u16,
    child_count: u16,
    first_child_index: u32,
}

/// Size = 0x14
#[derive(Debug, Default, Eq, PartialEq, Copy, Clone, BinRead, BinWrite)]
struct ResFileNode {
    index: u16,
    hash: u16,
    attr_name_offset: u32,
    data: u32,
    data_size: u32,
    reserved: u32,
}

impl ResFileNode {
    fn attributes(&self) -> u8 {
        (self.attr_name_offset >> 24) as u8
    }

    fn name_offset(&self) -> u32 {
        self.attr_name_offset & 0x00FF_FFFF
    }
}

fn align(pos: usize, alignment: usize) -> usize {
    (pos + alignment - 1) & !(alignment - 1)
}

fn is_valid_alignment(alignment: usize) -> bool {
    alignment != 0 && (alignment & (alignment - 1)) == 0
}
