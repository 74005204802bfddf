use crate::{is_shortcut, RarcError, Result};
use derivative::*;
use serde::Serialize;
use std::fmt;

/// Index of a folder in [`crate::Archive::folders`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FolderId(pub(crate) usize);

/// Arena index of an entry. Stays valid when the entry table is re-sorted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

impl FolderId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Attribute byte of an entry
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct FileAttributes(pub u8);

impl FileAttributes {
    pub const FILE: u8 = 0x01;
    pub const DIRECTORY: u8 = 0x02;
    pub const COMPRESSED: u8 = 0x04;
    pub const LOAD_TO_MRAM: u8 = 0x10;
    pub const LOAD_TO_ARAM: u8 = 0x20;
    pub const LOAD_FROM_DVD: u8 = 0x40;
    /// Together with `COMPRESSED`: Yaz0 rather than Yay0
    pub const YAZ0_COMPRESSED: u8 = 0x80;

    const KIND_MASK: u8 = Self::FILE | Self::DIRECTORY;

    pub const fn new(value: u8) -> Self {
        Self(value)
    }

    /// Default flags for a file payload: main memory, plus the compression
    /// bits when the payload carries a Yaz0 or Yay0 header
    pub fn for_payload(data: &[u8]) -> Self {
        let mut attributes = Self::new(Self::FILE | Self::LOAD_TO_MRAM);
        if data.starts_with(b"Yaz0") {
            attributes.set(Self::COMPRESSED | Self::YAZ0_COMPRESSED);
        } else if data.starts_with(b"Yay0") {
            attributes.set(Self::COMPRESSED);
        }
        attributes
    }

    pub const fn value(&self) -> u8 {
        self.0
    }

    pub const fn has(&self, flag: u8) -> bool {
        (self.0 & flag) != 0
    }

    pub fn set(&mut self, flag: u8) {
        self.0 |= flag;
    }

    pub fn clear(&mut self, flag: u8) {
        self.0 &= !flag;
    }

    pub const fn is_file(&self) -> bool {
        self.has(Self::FILE)
    }

    pub const fn is_directory(&self) -> bool {
        self.has(Self::DIRECTORY)
    }

    pub const fn is_compressed(&self) -> bool {
        self.has(Self::COMPRESSED)
    }

    /// Memory region a file is staged to, in the priority the writer buckets
    /// them: main memory, then auxiliary memory, then disc
    pub fn residency(&self) -> Option<Residency> {
        if self.has(Self::LOAD_TO_MRAM) {
            Some(Residency::Mram)
        } else if self.has(Self::LOAD_TO_ARAM) {
            Some(Residency::Aram)
        } else if self.has(Self::LOAD_FROM_DVD) {
            Some(Residency::Dvd)
        } else {
            None
        }
    }

    pub fn set_residency(&mut self, residency: Residency) {
        self.clear(Self::LOAD_TO_MRAM | Self::LOAD_TO_ARAM | Self::LOAD_FROM_DVD);
        self.set(residency.flag());
    }
}

impl fmt::Display for FileAttributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02x}", self.0)
    }
}

impl From<u8> for FileAttributes {
    fn from(value: u8) -> Self {
        Self::new(value)
    }
}

impl std::ops::BitOr for FileAttributes {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

/// Where a file's data lives once the archive is mounted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Residency {
    Mram,
    Aram,
    Dvd,
}

impl Residency {
    pub const fn flag(self) -> u8 {
        match self {
            Residency::Mram => FileAttributes::LOAD_TO_MRAM,
            Residency::Aram => FileAttributes::LOAD_TO_ARAM,
            Residency::Dvd => FileAttributes::LOAD_FROM_DVD,
        }
    }
}

/// Pack the first four characters of a folder name, uppercased and space
/// padded, into the identifier of its directory record
pub(crate) fn make_identifier(name: &str) -> u32 {
    let mut id = [b' '; 4];
    for (slot, b) in id.iter_mut().zip(name.bytes()) {
        *slot = b.to_ascii_uppercase();
    }
    u32::from_be_bytes(id)
}

#[derive(Derivative, Clone)]
#[derivative(Debug, PartialEq)]
/// A folder of the archive tree, backed by one directory record
pub struct FolderNode {
    pub(crate) identifier: u32,
    pub(crate) name: String,
    #[derivative(PartialEq = "ignore")]
    pub(crate) name_offset: u32,
    pub(crate) hash: u16,
    pub(crate) first_child_index: u32,
    pub(crate) child_count: u16,
    pub(crate) directory: Option<NodeId>,
    pub(crate) parent: Option<FolderId>,
    pub(crate) children: Vec<NodeId>,
}

impl FolderNode {
    pub(crate) fn new(name: &str, identifier: u32, parent: Option<FolderId>) -> Self {
        FolderNode {
            identifier,
            name: name.to_owned(),
            name_offset: 0,
            hash: crate::hash_name(name.as_bytes()),
            first_child_index: 0,
            child_count: 0,
            directory: None,
            parent,
            children: vec![],
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The four-character short name, e.g. `ROOT`
    pub fn identifier(&self) -> String {
        String::from_utf8_lossy(&self.identifier.to_be_bytes()).into_owned()
    }

    pub fn hash(&self) -> u16 {
        self.hash
    }

    /// Position of the first child in the entry table, as of the last load
    /// or sort
    pub fn first_child_index(&self) -> u32 {
        self.first_child_index
    }

    pub fn child_count(&self) -> u16 {
        self.child_count
    }

    /// The directory entry in the parent folder that represents this folder.
    /// `None` for the root.
    pub fn directory(&self) -> Option<NodeId> {
        self.directory
    }

    pub fn parent(&self) -> Option<FolderId> {
        self.parent
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// All entries, including the `.` and `..` shortcuts
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }
}

#[derive(Derivative, Clone)]
#[derivative(Debug, PartialEq)]
/// One record of the flat entry table: a file, a link to a sub-folder, or
/// one of the `.`/`..` shortcuts
pub struct Directory {
    pub(crate) attributes: FileAttributes,
    pub(crate) index: u16,
    pub(crate) hash: u16,
    #[derivative(PartialEq = "ignore")]
    pub(crate) name_offset: u32,
    pub(crate) name: String,
    #[derivative(Debug = "ignore")]
    pub(crate) data: Option<Vec<u8>>,
    pub(crate) folder: Option<FolderId>,
    pub(crate) parent: Option<FolderId>,
}

impl Directory {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn attributes(&self) -> FileAttributes {
        self.attributes
    }

    /// Change residency or compression flags. The file/directory kind of an
    /// entry is fixed.
    pub fn set_attributes(&mut self, attributes: FileAttributes) -> Result<()> {
        if attributes.0 & FileAttributes::KIND_MASK != self.attributes.0 & FileAttributes::KIND_MASK {
            return Err(RarcError::invalid_op(format!(
                "cannot change the kind of entry {:?} from {} to {}",
                self.name, self.attributes, attributes
            )));
        }
        self.attributes = attributes;
        Ok(())
    }

    pub fn index(&self) -> u16 {
        self.index
    }

    pub fn hash(&self) -> u16 {
        self.hash
    }

    pub fn is_file(&self) -> bool {
        self.attributes.is_file()
    }

    pub fn is_directory(&self) -> bool {
        self.attributes.is_directory()
    }

    pub fn is_shortcut(&self) -> bool {
        self.is_directory() && is_shortcut(&self.name)
    }

    /// File contents; `None` for directory entries
    pub fn data(&self) -> Option<&[u8]> {
        self.data.as_deref()
    }

    pub fn size(&self) -> usize {
        self.data.as_ref().map_or(0, Vec::len)
    }

    /// The folder a directory entry links to
    pub fn folder(&self) -> Option<FolderId> {
        self.folder
    }

    /// The folder whose entry run contains this entry
    pub fn parent(&self) -> Option<FolderId> {
        self.parent
    }

    pub fn residency(&self) -> Option<Residency> {
        if self.is_file() {
            self.attributes.residency()
        } else {
            None
        }
    }
}
