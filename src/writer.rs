use crate::*;
use num::ToPrimitive;
use std::io::Write;
use tracing::{debug, trace};

fn to_u32(value: usize, what: &str) -> Result<u32> {
    value
        .to_u32()
        .ok_or_else(|| RarcError::invalid_op(format!("{} {:#x} does not fit in 32 bits", what, value)))
}

impl Archive {
    /// Rebuild the entry table order from the folder tree.
    ///
    /// Starting at the root, each folder's shortcuts are moved behind its
    /// other entries, the folder's entries are appended to the table as one
    /// run, and the pass descends into every sub-folder of that run. Files are
    /// then numbered (sync archives) and bucketed by residency in table order.
    /// The pass only re-indexes the arenas, so repeating it is a no-op.
    pub fn sort_nodes_and_dirs(&mut self) -> Result<()> {
        let root = self
            .root()
            .ok_or_else(|| RarcError::invalid_op("the archive has no root folder"))?;
        let mut order = Vec::with_capacity(self.order.len());
        let mut visited = vec![false; self.folders.len()];
        // Pre-order walk; sub-folders are pushed in reverse so the first one
        // is laid out next
        let mut pending = vec![root];
        while let Some(folder) = pending.pop() {
            let subfolders = self.sort_folder(folder, &mut order, &mut visited)?;
            pending.extend(subfolders.into_iter().rev());
        }

        let sync = self.sync;
        for (pos, id) in order.iter().enumerate() {
            let node = &mut self.nodes[id.0];
            if node.is_directory() {
                node.index = DIR_NODE_INDEX;
            } else if sync {
                node.index = pos.to_u16().ok_or_else(|| {
                    RarcError::invalid_op(format!("{} entries do not fit in a sync archive", order.len()))
                })?;
            }
        }
        self.order = order;
        self.bucket_files();
        Ok(())
    }

    /// Append one folder's run to `order` and return its sub-folders
    fn sort_folder(
        &mut self,
        folder: FolderId,
        order: &mut Vec<NodeId>,
        visited: &mut [bool],
    ) -> Result<Vec<FolderId>> {
        if folder.0 >= self.folders.len() {
            return Err(RarcError::NotFound(format!("Folder {}", folder.0)));
        }
        if std::mem::replace(&mut visited[folder.0], true) {
            return Err(RarcError::invalid_op(format!(
                "folder {:?} is linked more than once",
                self.folders[folder.0].name
            )));
        }
        let nodes = &self.nodes;
        let entry = &mut self.folders[folder.0];
        let (mut children, shortcuts): (Vec<NodeId>, Vec<NodeId>) = entry
            .children
            .iter()
            .copied()
            .partition(|id| !nodes[id.0].is_shortcut());
        children.extend(shortcuts);
        entry.first_child_index = to_u32(order.len(), "entry index")?;
        entry.child_count = children.len().to_u16().ok_or_else(|| {
            RarcError::invalid_op(format!("folder {:?} has too many entries", entry.name))
        })?;
        trace!(
            folder = %entry.name,
            first = entry.first_child_index,
            count = entry.child_count,
            "sorted folder"
        );
        order.extend_from_slice(&children);
        entry.children = children;

        Ok(entry
            .children
            .iter()
            .map(|id| &nodes[id.0])
            .filter(|node| node.is_directory() && !node.is_shortcut())
            .filter_map(|node| node.folder)
            .collect())
    }

    /// Split the files of the entry table into main memory, auxiliary memory
    /// and disc lists, keeping table order within each list
    pub(crate) fn bucket_files(&mut self) {
        self.mram_files.clear();
        self.aram_files.clear();
        self.dvd_files.clear();
        for id in &self.order {
            let node = &self.nodes[id.0];
            if !node.is_file() || node.is_directory() {
                continue;
            }
            match node.attributes.residency() {
                Some(Residency::Aram) => self.aram_files.push(*id),
                Some(Residency::Dvd) => self.dvd_files.push(*id),
                Some(Residency::Mram) | None => self.mram_files.push(*id),
            }
        }
    }

    /// Fill the name pool: shortcuts, root name, then every other entry in
    /// table order. Records the offsets on the folders and entries.
    fn build_string_pool(&mut self) -> Result<StringPool> {
        let mut pool = StringPool::new(true);
        let self_offset = pool.write(SELF_SHORTCUT);
        let parent_offset = pool.write(PARENT_SHORTCUT);
        pool.set_lookup(self.reduce_strings);

        let mut folder_offsets: Vec<Option<u32>> = vec![None; self.folders.len()];
        folder_offsets[0] = Some(pool.write(&self.folders[0].name));
        for id in &self.order {
            let node = &mut self.nodes[id.0];
            node.name_offset = match node.name.as_str() {
                SELF_SHORTCUT if node.is_directory() => self_offset,
                PARENT_SHORTCUT if node.is_directory() => parent_offset,
                name => pool.write(name),
            };
            if node.is_shortcut() {
                continue;
            }
            if let Some(folder) = node.folder {
                if let Some(slot) = folder_offsets.get_mut(folder.0) {
                    if slot.is_none() && self.folders[folder.0].name == node.name {
                        *slot = Some(node.name_offset);
                    }
                }
            }
        }
        for (folder, offset) in self.folders.iter_mut().zip(folder_offsets) {
            folder.name_offset = match offset {
                Some(offset) => offset,
                None => pool.write(&folder.name),
            };
        }
        pool.align32();
        if pool.len() > 0x00FF_FFFF {
            return Err(RarcError::invalid_op(
                "name pool exceeds the 24-bit name offset range",
            ));
        }
        Ok(pool)
    }

    pub fn write_to_bytes(&mut self) -> Result<Vec<u8>> {
        self.sort_nodes_and_dirs()?;
        let pool = self.build_string_pool()?;

        // File data offsets, relative to the data region
        let mut data_offsets = vec![0u32; self.nodes.len()];
        let mut bucket_sizes = [0u32; 3];
        let mut rel_data_offset = 0usize;
        for (bucket, size) in [&self.mram_files, &self.aram_files, &self.dvd_files]
            .iter()
            .zip(bucket_sizes.iter_mut())
        {
            let start = rel_data_offset;
            for id in bucket.iter() {
                data_offsets[id.0] = to_u32(rel_data_offset, "file data offset")?;
                rel_data_offset += align(self.nodes[id.0].size(), ALIGNMENT);
            }
            *size = to_u32(rel_data_offset - start, "bucket size")?;
        }
        let file_data_size = to_u32(rel_data_offset, "file data size")?;

        let mut writer = EndianCursor::writer(self.endian);
        let dir_start = (HEADER_SIZE + DATA_HEADER_SIZE) as u64;
        writer.seek(dir_start);
        for folder in &self.folders {
            writer.write_struct(&ResDirNode {
                identifier: folder.identifier,
                name_offset: folder.name_offset,
                hash: folder.hash,
                child_count: folder.child_count,
                first_child_index: folder.first_child_index,
            })?;
        }
        writer.align(ALIGNMENT, 0)?;

        let file_start = writer.position();
        for id in &self.order {
            let node = &self.nodes[id.0];
            let (data, data_size) = if node.is_directory() {
                (node.folder.map_or(Ok(NO_FOLDER), |f| to_u32(f.0, "folder index"))?, DIR_DATA_SIZE)
            } else {
                (data_offsets[id.0], to_u32(node.size(), "file size")?)
            };
            writer.write_struct(&ResFileNode {
                index: node.index,
                hash: node.hash,
                attr_name_offset: (node.attributes.value() as u32) << 24 | node.name_offset,
                data,
                data_size,
                reserved: 0,
            })?;
        }
        writer.align(ALIGNMENT, 0)?;

        let pool_start = writer.position();
        writer.write_bytes(pool.as_bytes())?;
        writer.align(ALIGNMENT, 0)?;

        let data_start = writer.position();
        for bucket in [&self.mram_files, &self.aram_files, &self.dvd_files].iter() {
            for id in bucket.iter() {
                if let Some(data) = self.nodes[id.0].data() {
                    writer.write_bytes(data)?;
                }
                writer.align(ALIGNMENT, 0)?;
            }
        }
        let file_size = to_u32(writer.position() as usize, "archive size")?;

        let next_file_index = self.next_file_index();
        let header = ArchiveHeader {
            file_size,
            header_size: HEADER_SIZE,
            file_data_offset: to_u32(data_start as usize, "file data offset")? - HEADER_SIZE,
            file_data_size,
            mram_size: bucket_sizes[0],
            aram_size: bucket_sizes[1],
            dvd_size: bucket_sizes[2],
        };
        let data_header = ArchiveDataHeader {
            dir_node_count: to_u32(self.folders.len(), "folder count")?,
            dir_node_offset: dir_start as u32 - HEADER_SIZE,
            file_node_count: to_u32(self.order.len(), "entry count")?,
            file_node_offset: to_u32(file_start as usize, "entry table offset")? - HEADER_SIZE,
            string_table_size: pool.len(),
            string_table_offset: to_u32(pool_start as usize, "name pool offset")? - HEADER_SIZE,
            next_file_index,
            sync: self.sync as u8,
            padding: [0; 5],
        };
        {
            let mut head = writer.scoped_seek(0);
            head.write_u32(RARC_MAGIC)?;
            head.write_struct(&header)?;
            head.write_struct(&data_header)?;
        }
        debug!(
            endian = ?self.endian,
            folders = data_header.dir_node_count,
            entries = data_header.file_node_count,
            size = file_size,
            "wrote archive"
        );
        Ok(writer.into_inner())
    }

    pub fn write<W: Write>(&mut self, writer: &mut W) -> Result<()> {
        let data = self.write_to_bytes()?;
        writer.write_all(&data)?;
        Ok(())
    }
}
