// Copyright 2026 Meta-Magic Mount Developers
// SPDX-License-Identifier: GPL-3.0-or-later

use std::{
    collections::HashMap,
    fmt,
    fs::Metadata,
    os::unix::fs::{FileTypeExt, MetadataExt},
    path::{Path, PathBuf},
};

use anyhow::{Result, bail};

use crate::{core::context::MergeStats, utils::xattr};

#[derive(PartialEq, Eq, Hash, Clone, Copy, Debug)]
pub enum NodeFileType {
    RegularFile,
    Directory,
    Symlink,
    Whiteout,
}

impl NodeFileType {
    /// Classifies on-disk metadata. A character device with device id 0
    /// encodes a whiteout; anything else outside the four supported
    /// kinds is unsupported and yields `None`.
    pub fn from_metadata(metadata: &Metadata) -> Option<Self> {
        let file_type = metadata.file_type();
        if file_type.is_char_device() && metadata.rdev() == 0 {
            Some(Self::Whiteout)
        } else if file_type.is_file() {
            Some(Self::RegularFile)
        } else if file_type.is_dir() {
            Some(Self::Directory)
        } else if file_type.is_symlink() {
            Some(Self::Symlink)
        } else {
            None
        }
    }
}

impl fmt::Display for NodeFileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Directory => write!(f, "DIR"),
            Self::RegularFile => write!(f, "FILE"),
            Self::Symlink => write!(f, "LINK"),
            Self::Whiteout => write!(f, "WHT"),
        }
    }
}

/// One entry in the overlay tree. Ownership is strictly parent-to-child;
/// the root uniquely owns the whole tree.
#[derive(Clone)]
pub struct Node {
    pub name: String,
    pub file_type: NodeFileType,
    pub children: HashMap<String, Self>,
    /// Absolute path in the source module, unset for synthetic nodes.
    pub source_path: Option<PathBuf>,
    /// Module that supplied this entry, unset for synthetic nodes.
    pub source_module: Option<String>,
    /// Opaque directory: fully replaces the lower layer instead of merging.
    pub replace: bool,
}

impl Node {
    pub fn new_root<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            file_type: NodeFileType::Directory,
            children: HashMap::new(),
            source_path: None,
            source_module: None,
            replace: false,
        }
    }

    /// Creates a node from filesystem metadata without following the
    /// final symlink. Unsupported file kinds are skipped with a debug
    /// line, mirroring how lstat failures are treated.
    pub fn from_fs(
        name: &str,
        path: &Path,
        module_name: &str,
        stats: &mut MergeStats,
    ) -> Option<Self> {
        let metadata = match path.symlink_metadata() {
            Ok(m) => m,
            Err(e) => {
                log::debug!("lstat {} failed: {e}", path.display());
                return None;
            }
        };

        let Some(file_type) = NodeFileType::from_metadata(&metadata) else {
            log::debug!(
                "skip unsupported file type for {} (mode={:o})",
                path.display(),
                metadata.mode()
            );
            return None;
        };

        let replace = file_type == NodeFileType::Directory && xattr::dir_is_opaque(path);

        stats.nodes_total += 1;

        Some(Self {
            name: name.to_string(),
            file_type,
            children: HashMap::new(),
            source_path: Some(path.to_path_buf()),
            source_module: Some(module_name.to_string()),
            replace,
        })
    }

    pub fn find_child(&self, name: &str) -> Option<&Self> {
        self.children.get(name)
    }

    pub fn find_child_mut(&mut self, name: &str) -> Option<&mut Self> {
        self.children.get_mut(name)
    }

    /// Inserts `child` under `self`. Child names are unique within a
    /// directory; the caller is expected to consult `find_child` first.
    pub fn append_child(&mut self, child: Self) -> Result<()> {
        if self.children.contains_key(&child.name) {
            bail!(
                "node '{}' already has a child named '{}'",
                if self.name.is_empty() { "/" } else { &self.name },
                child.name
            );
        }
        self.children.insert(child.name.clone(), child);
        Ok(())
    }

    pub fn detach_child(&mut self, name: &str) -> Option<Self> {
        self.children.remove(name)
    }

    /// A subtree carries effective content iff any descendant is a
    /// non-directory node or any descendant directory is opaque.
    pub fn has_content(&self) -> bool {
        match self.file_type {
            NodeFileType::Directory => {
                self.replace || self.children.values().any(Self::has_content)
            }
            _ => true,
        }
    }

    /// Drops empty, non-opaque directory chains, anywhere in the tree.
    /// Whiteouts count as content and are always retained.
    pub fn prune_empty(&mut self) {
        self.children.retain(|_, child| {
            if child.file_type == NodeFileType::Directory {
                child.prune_empty();
                child.replace || child.has_content()
            } else {
                true
            }
        });
    }

    /// Looks up a descendant by `/`-separated relative path.
    pub fn lookup(&self, relative: &str) -> Option<&Self> {
        let mut current = self;
        for segment in relative.split('/').filter(|s| !s.is_empty()) {
            current = current.find_child(segment)?;
        }
        Some(current)
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn print_tree(
            node: &Node,
            f: &mut fmt::Formatter<'_>,
            prefix: &str,
            is_last: bool,
            is_root: bool,
        ) -> fmt::Result {
            let connector = if is_root {
                ""
            } else if is_last {
                "└── "
            } else {
                "├── "
            };

            let name = if node.name.is_empty() {
                "/"
            } else {
                &node.name
            };

            let flag_str = if node.replace { " [REPLACE]" } else { "" };

            let origin = match (&node.source_module, &node.source_path) {
                (Some(module), Some(path)) => format!(" {}:{}", module, path.display()),
                (Some(module), None) => format!(" {}", module),
                _ => String::new(),
            };

            writeln!(
                f,
                "{}{}{} [{}]{}{}",
                prefix, connector, name, node.file_type, flag_str, origin
            )?;

            let child_prefix = if is_root {
                ""
            } else if is_last {
                "    "
            } else {
                "│   "
            };
            let new_prefix = format!("{}{}", prefix, child_prefix);

            let mut children: Vec<_> = node.children.values().collect();
            children.sort_by(|a, b| a.name.cmp(&b.name));

            for (i, child) in children.iter().enumerate() {
                print_tree(child, f, &new_prefix, i == children.len() - 1, false)?;
            }

            Ok(())
        }

        print_tree(self, f, "", true, true)
    }
}
