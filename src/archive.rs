use crate::node::make_identifier;
use crate::*;
use num::ToPrimitive;
use serde::Serialize;

/// An in-memory RARC archive.
///
/// Folders and entries live in two arenas and refer to each other by index,
/// so a change made to an entry through [`Archive::node_mut`] is seen by every
/// folder that links to it. The entry table order used on disk is kept
/// separately and rebuilt by [`Archive::sort_nodes_and_dirs`].
#[derive(Debug, Clone, PartialEq)]
pub struct Archive {
    pub(crate) endian: Endian,
    pub(crate) sync: bool,
    pub(crate) reduce_strings: bool,
    pub(crate) next_file_index: u16,
    pub(crate) folders: Vec<FolderNode>,
    pub(crate) nodes: Vec<Directory>,
    pub(crate) order: Vec<NodeId>,
    pub(crate) mram_files: Vec<NodeId>,
    pub(crate) aram_files: Vec<NodeId>,
    pub(crate) dvd_files: Vec<NodeId>,
}

/// One line of [`Archive::manifest`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManifestEntry {
    pub path: String,
    pub size: usize,
    pub attributes: FileAttributes,
    pub residency: Option<Residency>,
    pub compressed: bool,
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains('/') || name.contains('\0') || is_shortcut(name) {
        return Err(RarcError::invalid_op(format!(
            "{:?} is not a valid entry name",
            name
        )));
    }
    Ok(())
}

impl Archive {
    /// An empty archive; call [`Archive::create_root`] before adding content
    pub fn new(endian: Endian) -> Archive {
        Archive {
            endian,
            sync: true,
            reduce_strings: false,
            next_file_index: 0,
            folders: vec![],
            nodes: vec![],
            order: vec![],
            mram_files: vec![],
            aram_files: vec![],
            dvd_files: vec![],
        }
    }

    /// Returns true if the data looks like a RARC archive, raw or Yaz0-wrapped
    pub fn is_rarc(data: &[u8]) -> bool {
        let magic_at = |pos: usize| {
            data.get(pos..pos + 4)
                .map_or(false, |m| m == b"RARC" || m == b"CRAR")
        };
        data.len() >= 0x20 && (magic_at(0) || (&data[0..4] == b"Yaz0" && magic_at(0x11)))
    }

    pub fn endian(&self) -> Endian {
        self.endian
    }

    pub fn set_endian(&mut self, endian: Endian) {
        self.endian = endian
    }

    /// In sync mode the node index of a file is its position in the entry
    /// table; otherwise indices are handed out as files are created
    pub fn sync(&self) -> bool {
        self.sync
    }

    pub fn set_sync(&mut self, value: bool) {
        self.sync = value
    }

    pub fn reduce_strings(&self) -> bool {
        self.reduce_strings
    }

    /// Write each distinct name to the string pool only once
    pub fn set_reduce_strings(&mut self, value: bool) {
        self.reduce_strings = value
    }

    /// Value of the data header's next-index field on the next write: the
    /// entry count for sync archives, the creation counter otherwise
    pub fn next_file_index(&self) -> u16 {
        if self.sync {
            self.order.len().to_u16().unwrap_or(u16::MAX)
        } else {
            self.next_file_index
        }
    }

    pub fn root(&self) -> Option<FolderId> {
        if self.folders.is_empty() {
            None
        } else {
            Some(FolderId(0))
        }
    }

    /// The archive name, which is the name of its root folder
    pub fn name(&self) -> Option<&str> {
        self.folders.first().map(|f| f.name.as_str())
    }

    pub fn folder(&self, id: FolderId) -> Option<&FolderNode> {
        self.folders.get(id.0)
    }

    pub fn folders(&self) -> &[FolderNode] {
        &self.folders
    }

    pub fn node(&self, id: NodeId) -> Option<&Directory> {
        self.nodes.get(id.0)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Directory> {
        self.nodes.get_mut(id.0)
    }

    /// Entries in entry-table order
    pub fn directories(&self) -> impl Iterator<Item = (NodeId, &Directory)> + '_ {
        self.order.iter().map(move |id| (*id, &self.nodes[id.0]))
    }

    /// Entries of a folder without the `.` and `..` shortcuts
    pub fn entries(&self, folder: FolderId) -> impl Iterator<Item = (NodeId, &Directory)> + '_ {
        self.folders
            .get(folder.0)
            .map(|f| f.children.as_slice())
            .unwrap_or(&[])
            .iter()
            .map(move |id| (*id, &self.nodes[id.0]))
            .filter(|(_, node)| !node.is_shortcut())
    }

    /// Files of one residency bucket in the order they were last laid out
    pub fn files_in(&self, residency: Residency) -> &[NodeId] {
        match residency {
            Residency::Mram => &self.mram_files,
            Residency::Aram => &self.aram_files,
            Residency::Dvd => &self.dvd_files,
        }
    }

    fn require_root(&self) -> Result<()> {
        if self.folders.is_empty() {
            Err(RarcError::invalid_op("the archive has no root folder"))
        } else {
            Ok(())
        }
    }

    fn require_folder(&self, folder: FolderId) -> Result<()> {
        self.require_root()?;
        if folder.0 >= self.folders.len() {
            return Err(RarcError::NotFound(format!("Folder {}", folder.0)));
        }
        Ok(())
    }

    fn require_unique(&self, name: &str, parent: FolderId) -> Result<()> {
        if self.entries(parent).any(|(_, node)| node.name == name) {
            return Err(RarcError::invalid_op(format!(
                "{} already contains an entry named {:?}",
                self.folder_path(parent),
                name
            )));
        }
        Ok(())
    }

    /// Append a directory entry to `parent` and to the entry table
    fn create_dir(&mut self, name: &str, parent: FolderId, folder: Option<FolderId>) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Directory {
            attributes: FileAttributes::new(FileAttributes::DIRECTORY),
            index: DIR_NODE_INDEX,
            hash: hash_name(name.as_bytes()),
            name_offset: 0,
            name: name.to_owned(),
            data: None,
            folder,
            parent: Some(parent),
        });
        self.folders[parent.0].children.push(id);
        self.order.push(id);
        id
    }

    fn create_shortcuts(&mut self, folder: FolderId, parent: Option<FolderId>) {
        self.create_dir(SELF_SHORTCUT, folder, Some(folder));
        self.create_dir(PARENT_SHORTCUT, folder, parent);
    }

    /// Create the root folder. Returns the existing root if there is one.
    pub fn create_root(&mut self, name: &str) -> FolderId {
        if let Some(root) = self.root() {
            return root;
        }
        let root = FolderId(0);
        self.folders
            .push(FolderNode::new(name, make_identifier("ROOT"), None));
        self.create_shortcuts(root, None);
        root
    }

    pub fn create_folder(&mut self, name: &str, parent: FolderId) -> Result<FolderId> {
        self.require_folder(parent)?;
        validate_name(name)?;
        self.require_unique(name, parent)?;

        let folder = FolderId(self.folders.len());
        self.folders
            .push(FolderNode::new(name, make_identifier(name), Some(parent)));
        let entry = self.create_dir(name, parent, Some(folder));
        self.folders[folder.0].directory = Some(entry);
        self.create_shortcuts(folder, Some(parent));
        Ok(folder)
    }

    /// Add a file to `parent`. The `FILE` flag is implied and files without a
    /// residency flag are loaded to main memory.
    pub fn create_file(
        &mut self,
        data: Vec<u8>,
        name: &str,
        parent: FolderId,
        attributes: FileAttributes,
    ) -> Result<NodeId> {
        self.require_folder(parent)?;
        validate_name(name)?;
        if attributes.is_directory() {
            return Err(RarcError::invalid_op(format!(
                "file {:?} cannot carry the directory flag",
                name
            )));
        }
        self.require_unique(name, parent)?;

        let mut attributes = attributes;
        attributes.set(FileAttributes::FILE);
        if attributes.residency().is_none() {
            attributes.set(FileAttributes::LOAD_TO_MRAM);
        }
        // Sync archives number files during the sort pass
        let index = if self.sync {
            0
        } else {
            let index = self.next_file_index;
            self.next_file_index = index
                .checked_add(1)
                .ok_or_else(|| RarcError::invalid_op("file index space exhausted"))?;
            index
        };

        let id = NodeId(self.nodes.len());
        self.nodes.push(Directory {
            attributes,
            index,
            hash: hash_name(name.as_bytes()),
            name_offset: 0,
            name: name.to_owned(),
            data: Some(data),
            folder: None,
            parent: Some(parent),
        });
        self.folders[parent.0].children.push(id);
        self.order.push(id);
        Ok(id)
    }

    /// Replace the contents of a file
    pub fn set_file_data(&mut self, node: NodeId, data: Vec<u8>) -> Result<()> {
        let entry = self
            .nodes
            .get_mut(node.0)
            .ok_or_else(|| RarcError::NotFound(format!("Entry {}", node.0)))?;
        if !entry.is_file() || entry.is_directory() {
            return Err(RarcError::invalid_op(format!(
                "{:?} is a directory entry and holds no data",
                entry.name
            )));
        }
        entry.data = Some(data);
        Ok(())
    }

    /// Detach a file from its folder. It is left out of the next write.
    ///
    /// Arena slots are never reused or compacted, so every other `NodeId`
    /// handed out by this archive stays valid.
    pub fn remove_file(&mut self, node: NodeId) -> Result<Directory> {
        let entry = self
            .nodes
            .get(node.0)
            .ok_or_else(|| RarcError::NotFound(format!("Entry {}", node.0)))?;
        if entry.is_directory() {
            return Err(RarcError::invalid_op(format!(
                "{:?} is not a file",
                entry.name
            )));
        }
        let parent = entry
            .parent
            .ok_or_else(|| RarcError::NotFound(format!("{:?} in any folder", entry.name)))?;
        self.folders[parent.0].children.retain(|id| *id != node);
        self.order.retain(|id| *id != node);
        for bucket in [&mut self.mram_files, &mut self.aram_files, &mut self.dvd_files].iter_mut() {
            bucket.retain(|id| *id != node);
        }
        let entry = &mut self.nodes[node.0];
        entry.parent = None;
        let removed = entry.clone();
        entry.data = Some(vec![]);
        Ok(removed)
    }

    /// Full path of a folder, starting with the root name
    pub fn folder_path(&self, folder: FolderId) -> String {
        let mut parts = vec![];
        let mut current = self.folders.get(folder.0);
        // Bounded by the folder count so a corrupt parent cycle cannot hang
        for _ in 0..self.folders.len() {
            let f = match current {
                Some(f) => f,
                None => break,
            };
            parts.push(f.name.as_str());
            current = f.parent.and_then(|p| self.folders.get(p.0));
        }
        parts.reverse();
        parts.join("/")
    }

    /// Full path of an entry, starting with the root name
    pub fn path_of(&self, node: NodeId) -> Option<String> {
        let entry = self.nodes.get(node.0)?;
        let parent = entry.parent?;
        Some(format!("{}/{}", self.folder_path(parent), entry.name))
    }

    fn child_named(&self, folder: FolderId, name: &str) -> Option<NodeId> {
        self.entries(folder)
            .find(|(_, node)| node.name == name)
            .map(|(id, _)| id)
    }

    /// Resolve a `/`-separated path that starts with the root name
    pub fn find_folder(&self, path: &str) -> Option<FolderId> {
        let root = self.root()?;
        let mut parts = path.split('/').filter(|p| !p.is_empty());
        if parts.next()? != self.folders[0].name {
            return None;
        }
        parts.try_fold(root, |folder, part| {
            self.child_named(folder, part)
                .and_then(|id| self.nodes[id.0].folder)
        })
    }

    /// Resolve the entry at a `/`-separated path that starts with the root
    /// name
    pub fn find(&self, path: &str) -> Option<NodeId> {
        let path = path.trim_end_matches('/');
        let (dir, name) = path.rsplit_once('/')?;
        let folder = self.find_folder(dir)?;
        self.child_named(folder, name)
    }

    /// Contents of the file at `path`
    pub fn get_file(&self, path: &str) -> Result<&[u8]> {
        self.find(path)
            .and_then(|id| self.nodes[id.0].data())
            .ok_or_else(|| RarcError::NotFound(format!("File {}", path)))
    }

    /// Every file in the tree with its full path, depth first
    pub fn files(&self) -> Vec<(String, &Directory)> {
        let mut out = vec![];
        let root = match self.root() {
            Some(root) => root,
            None => return out,
        };
        let mut visited = vec![false; self.folders.len()];
        visited[root.0] = true;
        // (folder, its path, next child to visit)
        let mut stack = vec![(root, self.folders[root.0].name.clone(), 0usize)];
        while let Some((folder, prefix, next)) = stack.last_mut() {
            let child = match self.folders[folder.0].children.get(*next) {
                Some(child) => &self.nodes[child.0],
                None => {
                    stack.pop();
                    continue;
                }
            };
            *next += 1;
            if child.is_shortcut() {
                continue;
            }
            let path = format!("{}/{}", prefix, child.name);
            if !child.is_directory() {
                out.push((path, child));
            } else if let Some(sub) = child.folder.filter(|f| f.0 < self.folders.len()) {
                if !std::mem::replace(&mut visited[sub.0], true) {
                    stack.push((sub, path, 0));
                }
            }
        }
        out
    }

    pub fn manifest(&self) -> Vec<ManifestEntry> {
        self.files()
            .into_iter()
            .map(|(path, node)| ManifestEntry {
                path,
                size: node.size(),
                attributes: node.attributes,
                residency: node.residency(),
                compressed: node.attributes.is_compressed(),
            })
            .collect()
    }

    pub fn manifest_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.manifest())?)
    }
}

#[cfg(test)]
mod tests {
    use crate::{Archive, Endian, FileAttributes, RarcError, Residency};
    use pretty_assertions::assert_eq;

    fn sample() -> Archive {
        let mut arc = Archive::new(Endian::Big);
        let root = arc.create_root("scene");
        let stage = arc.create_folder("stage", root).unwrap();
        let jmp = arc.create_folder("jmp", stage).unwrap();
        arc.create_file(vec![1, 2, 3], "stage.bcsv", stage, FileAttributes::default())
            .unwrap();
        arc.create_file(
            vec![4; 40],
            "obj.bcsv",
            jmp,
            FileAttributes::new(FileAttributes::LOAD_TO_ARAM),
        )
        .unwrap();
        arc.create_file(vec![9], "readme.txt", root, FileAttributes::default())
            .unwrap();
        arc
    }

    #[test]
    fn create_root_is_idempotent() {
        let mut arc = Archive::new(Endian::Big);
        let root = arc.create_root("ROOT");
        assert_eq!(arc.create_root("other"), root);
        assert_eq!(arc.folders().len(), 1);
        assert_eq!(arc.name(), Some("ROOT"));
        let root_folder = arc.folder(root).unwrap();
        assert!(root_folder.is_root());
        assert_eq!(root_folder.identifier(), "ROOT");
        let names: Vec<_> = root_folder
            .children()
            .iter()
            .map(|id| arc.node(*id).unwrap().name())
            .collect();
        assert_eq!(names, vec![".", ".."]);
        let dotdot = arc.node(root_folder.children()[1]).unwrap();
        assert_eq!(dotdot.folder(), None);
    }

    #[test]
    fn mutation_requires_root() {
        let mut arc = Archive::new(Endian::Big);
        let fake = crate::FolderId(0);
        assert!(matches!(
            arc.create_folder("a", fake),
            Err(RarcError::InvalidOperation(_))
        ));
        assert!(matches!(
            arc.create_file(vec![], "a", fake, FileAttributes::default()),
            Err(RarcError::InvalidOperation(_))
        ));
    }

    #[test]
    fn unknown_parent_is_not_found() {
        let mut arc = Archive::new(Endian::Big);
        arc.create_root("ROOT");
        assert!(matches!(
            arc.create_folder("a", crate::FolderId(7)),
            Err(RarcError::NotFound(_))
        ));
    }

    #[test]
    fn invalid_creations() {
        let mut arc = Archive::new(Endian::Big);
        let root = arc.create_root("ROOT");
        arc.create_file(vec![], "a", root, FileAttributes::default())
            .unwrap();
        for bad in &["", ".", "..", "x/y"] {
            assert!(matches!(
                arc.create_folder(bad, root),
                Err(RarcError::InvalidOperation(_))
            ));
        }
        assert!(matches!(
            arc.create_file(vec![], "a", root, FileAttributes::default()),
            Err(RarcError::InvalidOperation(_))
        ));
        assert!(matches!(
            arc.create_file(
                vec![],
                "b",
                root,
                FileAttributes::new(FileAttributes::DIRECTORY)
            ),
            Err(RarcError::InvalidOperation(_))
        ));
    }

    #[test]
    fn file_defaults() {
        let mut arc = Archive::new(Endian::Big);
        let root = arc.create_root("ROOT");
        let id = arc
            .create_file(vec![1], "a", root, FileAttributes::default())
            .unwrap();
        let node = arc.node(id).unwrap();
        assert!(node.is_file());
        assert_eq!(node.residency(), Some(Residency::Mram));
        assert_eq!(node.data(), Some(&[1u8][..]));
    }

    #[test]
    fn non_sync_assigns_indices_on_creation() {
        let mut arc = Archive::new(Endian::Big);
        arc.set_sync(false);
        let root = arc.create_root("ROOT");
        let a = arc
            .create_file(vec![], "a", root, FileAttributes::default())
            .unwrap();
        let b = arc
            .create_file(vec![], "b", root, FileAttributes::default())
            .unwrap();
        assert_eq!(arc.node(a).unwrap().index(), 0);
        assert_eq!(arc.node(b).unwrap().index(), 1);
        assert_eq!(arc.next_file_index(), 2);
    }

    #[test]
    fn folder_and_directory_share_state() {
        let mut arc = sample();
        let stage = arc.find_folder("scene/stage").unwrap();
        let entry = arc.folder(stage).unwrap().directory().unwrap();
        assert_eq!(arc.find("scene/stage"), Some(entry));
        assert_eq!(arc.node(entry).unwrap().folder(), Some(stage));

        let mut attrs = arc.node(entry).unwrap().attributes();
        attrs.set(FileAttributes::COMPRESSED);
        arc.node_mut(entry).unwrap().set_attributes(attrs).unwrap();

        let seen = arc.folder(stage).unwrap().directory().unwrap();
        assert!(arc.node(seen).unwrap().attributes().is_compressed());
        assert!(arc
            .node_mut(entry)
            .unwrap()
            .set_attributes(FileAttributes::new(FileAttributes::FILE))
            .is_err());
    }

    #[test]
    fn lookup_and_listing() {
        let arc = sample();
        assert_eq!(arc.get_file("scene/stage/stage.bcsv").unwrap(), &[1, 2, 3]);
        assert_eq!(arc.get_file("scene/readme.txt").unwrap(), &[9]);
        assert!(matches!(
            arc.get_file("scene/stage/jmp"),
            Err(RarcError::NotFound(_))
        ));
        assert!(matches!(
            arc.get_file("other/readme.txt"),
            Err(RarcError::NotFound(_))
        ));
        let paths: Vec<_> = arc.files().into_iter().map(|(p, _)| p).collect();
        assert_eq!(
            paths,
            vec![
                "scene/stage/jmp/obj.bcsv",
                "scene/stage/stage.bcsv",
                "scene/readme.txt"
            ]
        );
        let stage = arc.find_folder("scene/stage").unwrap();
        let names: Vec<_> = arc.entries(stage).map(|(_, n)| n.name()).collect();
        assert_eq!(names, vec!["jmp", "stage.bcsv"]);
        let obj = arc.find("scene/stage/jmp/obj.bcsv").unwrap();
        assert_eq!(arc.path_of(obj).unwrap(), "scene/stage/jmp/obj.bcsv");
    }

    #[test]
    fn set_file_data_rejects_directories() {
        let mut arc = sample();
        let file = arc.find("scene/readme.txt").unwrap();
        arc.set_file_data(file, vec![7, 7]).unwrap();
        assert_eq!(arc.get_file("scene/readme.txt").unwrap(), &[7, 7]);
        let dir = arc.find("scene/stage").unwrap();
        assert!(matches!(
            arc.set_file_data(dir, vec![1]),
            Err(RarcError::InvalidOperation(_))
        ));
    }

    #[test]
    fn remove_file_detaches() {
        let mut arc = sample();
        let file = arc.find("scene/readme.txt").unwrap();
        let removed = arc.remove_file(file).unwrap();
        assert_eq!(removed.data(), Some(&[9u8][..]));
        assert!(arc.find("scene/readme.txt").is_none());
        assert!(matches!(arc.remove_file(file), Err(RarcError::NotFound(_))));
        let dir = arc.find("scene/stage").unwrap();
        assert!(matches!(
            arc.remove_file(dir),
            Err(RarcError::InvalidOperation(_))
        ));
    }

    #[test]
    fn next_file_index_follows_mode() {
        let mut arc = sample();
        // scene: 4 entries, stage: 4, jmp: 3
        assert_eq!(arc.next_file_index(), 11);
        let readme = arc.find("scene/readme.txt").unwrap();
        arc.remove_file(readme).unwrap();
        assert_eq!(arc.next_file_index(), 10);

        let mut manual = Archive::new(Endian::Big);
        manual.set_sync(false);
        let root = manual.create_root("ROOT");
        manual
            .create_file(vec![], "a", root, FileAttributes::default())
            .unwrap();
        assert_eq!(manual.next_file_index(), 1);
    }

    #[test]
    fn node_ids_stay_valid_after_removal() {
        let mut arc = sample();
        let stage_bcsv = arc.find("scene/stage/stage.bcsv").unwrap();
        let obj = arc.find("scene/stage/jmp/obj.bcsv").unwrap();
        let slots = arc.nodes.len();
        arc.remove_file(stage_bcsv).unwrap();
        assert_eq!(arc.nodes.len(), slots);
        assert_eq!(arc.path_of(obj).unwrap(), "scene/stage/jmp/obj.bcsv");
        assert_eq!(arc.find("scene/stage/jmp/obj.bcsv"), Some(obj));
        assert!(arc.path_of(stage_bcsv).is_none());
    }

    #[test]
    fn detects_archives() {
        let mut raw = b"RARC".to_vec();
        raw.resize(0x40, 0);
        assert!(Archive::is_rarc(&raw));
        let mut yaz0 = b"Yaz0\x00\x00\x01\x00\x00\x00\x00\x00\x00\x00\x00\x00\xFFCRAR".to_vec();
        yaz0.resize(0x40, 0);
        assert!(Archive::is_rarc(&yaz0));
        assert!(!Archive::is_rarc(b"RARC"));
        let mut sarc = b"SARC".to_vec();
        sarc.resize(0x40, 0);
        assert!(!Archive::is_rarc(&sarc));
    }

    #[test]
    fn manifest_lists_files() {
        let arc = sample();
        let manifest = arc.manifest();
        assert_eq!(manifest.len(), 3);
        assert_eq!(manifest[0].path, "scene/stage/jmp/obj.bcsv");
        assert_eq!(manifest[0].size, 40);
        assert_eq!(manifest[0].residency, Some(Residency::Aram));
        assert_eq!(manifest[1].residency, Some(Residency::Mram));
        let json = arc.manifest_json().unwrap();
        assert!(json.contains("\"scene/readme.txt\""));
        assert!(json.contains("\"Aram\""));
    }
}
