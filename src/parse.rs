use crate::*;
use tracing::{debug, warn};

/// Settings for [`Archive::from_bytes_with`]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReadOptions {
    /// Fail with [`RarcError::CorruptArchive`] when a stored name hash does
    /// not match the name. By default the mismatch is logged and the stored
    /// hash is kept.
    pub strict_hashes: bool,
}

fn check_hash(name: &str, stored: u16, offset: u64, options: &ReadOptions) -> Result<()> {
    let computed = hash_name(name.as_bytes());
    if computed != stored {
        if options.strict_hashes {
            return Err(RarcError::corrupt(
                offset,
                format!(
                    "hash of {:?} is {:#06x}, archive stores {:#06x}",
                    name, computed, stored
                ),
            ));
        }
        warn!(offset, entry = %name, stored, computed, "name hash mismatch, keeping stored hash");
    }
    Ok(())
}

fn require_table<T: AsRef<[u8]>>(
    reader: &EndianCursor<T>,
    start: u64,
    count: u32,
    record_size: u32,
    what: &str,
) -> Result<()> {
    let end = start + count as u64 * record_size as u64;
    if end > reader.len() {
        return Err(RarcError::corrupt(
            start,
            format!(
                "{} {} records end at {:#x}, past the end of the data ({:#x})",
                count,
                what,
                end,
                reader.len()
            ),
        ));
    }
    Ok(())
}

impl Archive {
    /// Parses a RARC archive from binary data
    pub fn from_bytes(data: &[u8]) -> Result<Archive> {
        Self::from_bytes_with(data, &ReadOptions::default())
    }

    pub fn from_bytes_with(data: &[u8], options: &ReadOptions) -> Result<Archive> {
        if data.len() < 4 {
            return Err(RarcError::corrupt(0, "data too short for an archive magic"));
        }
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&data[..4]);
        let endian = Endian::from_magic(magic).ok_or(RarcError::InvalidMagic(magic))?;

        let mut reader = EndianCursor::new(data, endian);
        reader.seek(4);
        let header: ArchiveHeader = reader.read_struct((HEADER_SIZE - 4) as u64, "archive header")?;
        if header.header_size != HEADER_SIZE {
            return Err(RarcError::corrupt(
                8,
                format!(
                    "expected header size {:#x}, found {:#x}",
                    HEADER_SIZE, header.header_size
                ),
            ));
        }
        let data_end = header.file_data_start() + header.file_data_size as u64;
        if data_end > header.file_size as u64 {
            return Err(RarcError::corrupt(
                0xC,
                format!(
                    "file data ends at {:#x}, past the archive size {:#x}",
                    data_end, header.file_size
                ),
            ));
        }
        if header.file_size as u64 != reader.len() {
            warn!(
                stored = header.file_size,
                actual = reader.len(),
                "archive size does not match the data length"
            );
        }

        let data_header: ArchiveDataHeader = reader.read_struct(DATA_HEADER_SIZE as u64, "data header")?;
        if data_header.dir_node_count == 0 {
            return Err(RarcError::corrupt(0x20, "archive has no root folder"));
        }
        let dir_start = data_header.dir_node_start(&header);
        let file_start = data_header.file_node_start(&header);
        let pool_start = data_header.string_table_start(&header);
        require_table(&reader, dir_start, data_header.dir_node_count, DIR_NODE_SIZE, "folder")?;
        require_table(&reader, file_start, data_header.file_node_count, FILE_NODE_SIZE, "entry")?;

        let mut folders = Vec::with_capacity(data_header.dir_node_count as usize);
        reader.seek(dir_start);
        for _ in 0..data_header.dir_node_count {
            let record_offset = reader.position();
            let record: ResDirNode = reader.read_struct(DIR_NODE_SIZE as u64, "folder record")?;
            let name = StringPool::read_name(&mut reader, pool_start, record.name_offset)?;
            check_hash(&name, record.hash, record_offset + 8, options)?;
            folders.push(FolderNode {
                identifier: record.identifier,
                name,
                name_offset: record.name_offset,
                hash: record.hash,
                first_child_index: record.first_child_index,
                child_count: record.child_count,
                directory: None,
                parent: None,
                children: vec![],
            });
        }

        let mut nodes: Vec<Directory> = Vec::with_capacity(data_header.file_node_count as usize);
        reader.seek(file_start);
        for i in 0..data_header.file_node_count as usize {
            let record_offset = reader.position();
            let record: ResFileNode = reader.read_struct(FILE_NODE_SIZE as u64, "entry record")?;
            let name = StringPool::read_name(&mut reader, pool_start, record.name_offset())?;
            check_hash(&name, record.hash, record_offset + 2, options)?;
            let attributes = FileAttributes::new(record.attributes());
            let mut node = Directory {
                attributes,
                index: record.index,
                hash: record.hash,
                name_offset: record.name_offset(),
                name,
                data: None,
                folder: None,
                parent: None,
            };
            if attributes.is_directory() {
                if record.data != NO_FOLDER {
                    let folder = folders.get_mut(record.data as usize).ok_or_else(|| {
                        RarcError::corrupt(
                            record_offset + 8,
                            format!(
                                "entry {:?} links to folder {} of {}",
                                node.name, record.data, data_header.dir_node_count
                            ),
                        )
                    })?;
                    node.folder = Some(FolderId(record.data as usize));
                    if folder.hash == record.hash
                        && !is_shortcut(&node.name)
                        && folder.directory.is_none()
                    {
                        folder.directory = Some(NodeId(i));
                    }
                }
            } else if attributes.is_file() {
                let mut payload = reader.scoped_seek(header.file_data_start() + record.data as u64);
                node.data = Some(payload.read_bytes(record.data_size as usize)?);
            }
            nodes.push(node);
        }

        for fi in 0..folders.len() {
            let first = folders[fi].first_child_index as usize;
            let end = first + folders[fi].child_count as usize;
            if end > nodes.len() {
                return Err(RarcError::corrupt(
                    dir_start + fi as u64 * DIR_NODE_SIZE as u64 + 0xA,
                    format!(
                        "folder {:?} lists entries {}..{} of {}",
                        folders[fi].name,
                        first,
                        end,
                        nodes.len()
                    ),
                ));
            }
            for ni in first..end {
                if let Some(owner) = nodes[ni].parent {
                    return Err(RarcError::corrupt(
                        dir_start + fi as u64 * DIR_NODE_SIZE as u64 + 0xC,
                        format!("entry {} claimed by folders {} and {}", ni, owner.0, fi),
                    ));
                }
                folders[fi].children.push(NodeId(ni));
                nodes[ni].parent = Some(FolderId(fi));
                if nodes[ni].is_shortcut() {
                    continue;
                }
                if let Some(child) = nodes[ni].folder {
                    if child.0 == fi || child.0 == 0 {
                        return Err(RarcError::corrupt(
                            file_start + ni as u64 * FILE_NODE_SIZE as u64 + 8,
                            format!("entry {:?} links folder {} into itself", nodes[ni].name, child.0),
                        ));
                    }
                    folders[child.0].parent = Some(FolderId(fi));
                }
            }
        }

        let mut seen_offsets = std::collections::HashSet::new();
        let reduce_strings = nodes
            .iter()
            .filter(|n| !n.is_shortcut())
            .any(|n| !seen_offsets.insert(n.name_offset));

        let mut archive = Archive {
            endian,
            sync: data_header.is_sync(),
            reduce_strings,
            next_file_index: data_header.next_file_index,
            order: (0..nodes.len()).map(NodeId).collect(),
            folders,
            nodes,
            mram_files: vec![],
            aram_files: vec![],
            dvd_files: vec![],
        };
        archive.bucket_files();
        debug!(
            ?endian,
            folders = archive.folders.len(),
            entries = archive.nodes.len(),
            sync = archive.sync,
            "loaded archive {:?}",
            archive.folders[0].name
        );
        Ok(archive)
    }
}
