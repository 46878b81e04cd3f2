// Copyright 2026 Meta-Magic Mount Developers
// SPDX-License-Identifier: GPL-3.0-or-later

use std::path::Path;

use anyhow::{Context, Result};

use crate::{
    core::{
        context::MergeContext,
        node::{Node, NodeFileType},
    },
    defs::REPLACE_DIR_FILE_NAME,
};

/// Walks `dir` and grafts every entry as a child of `parent`, recursing
/// into directories. Among modules contributing the same leaf path the
/// first-enumerated module wins; later modules may only add new names to
/// directories that are already claimed and not opaque.
///
/// Returns whether the subtree ended up carrying effective content: a
/// non-directory descendant (whiteouts included) or an opaque directory.
/// A failure to open a directory is fatal to this scan call; the caller
/// decides what it means for the module.
pub fn scan_into(
    ctx: &mut MergeContext,
    parent: &mut Node,
    dir: &Path,
    module_name: &str,
) -> Result<bool> {
    let entries = dir
        .read_dir()
        .with_context(|| format!("opendir {}", dir.display()))?;

    let mut any = false;

    for entry in entries {
        let entry = entry.with_context(|| format!("readdir {}", dir.display()))?;
        let name = entry.file_name().to_string_lossy().to_string();

        // The opacity sentinel marks its parent; it is not an entry of
        // the final view.
        if name == REPLACE_DIR_FILE_NAME {
            continue;
        }

        let path = entry.path();
        let entry_is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);

        let prior = parent.find_child(&name).is_some();
        if !prior {
            match Node::from_fs(&name, &path, module_name, &mut ctx.stats) {
                Some(node) => {
                    // find_child was consulted above, append cannot clash
                    parent.append_child(node)?;
                }
                None => continue,
            }
        }

        let Some(child) = parent.find_child_mut(&name) else {
            continue;
        };

        match child.file_type {
            NodeFileType::Directory => {
                if prior && child.replace {
                    // Opaque directories are fully owned by the module
                    // that claimed them; later content is shadowed.
                    log::debug!(
                        "{}: '{}' shadowed by opaque directory",
                        module_name,
                        path.display()
                    );
                    any = true;
                } else if entry_is_dir {
                    let sub = scan_into(ctx, child, &path, module_name)?;
                    if sub || child.replace {
                        any = true;
                    }
                } else if child.replace {
                    any = true;
                }
            }
            _ => {
                any = true;
            }
        }
    }

    Ok(any)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;

    fn ctx() -> MergeContext {
        MergeContext::default()
    }

    fn touch(path: PathBuf, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn basic_merge_combines_two_modules() {
        let dir = tempfile::tempdir().unwrap();
        let mod_a = dir.path().join("modA/system");
        let mod_b = dir.path().join("modB/system");
        touch(mod_a.join("etc/a.conf"), "a");
        touch(mod_b.join("etc/b.conf"), "b");

        let mut ctx = ctx();
        let mut system = Node::new_root("system");

        assert!(scan_into(&mut ctx, &mut system, &mod_a, "modA").unwrap());
        assert!(scan_into(&mut ctx, &mut system, &mod_b, "modB").unwrap());

        let a = system.lookup("etc/a.conf").unwrap();
        let b = system.lookup("etc/b.conf").unwrap();
        assert_eq!(a.source_module.as_deref(), Some("modA"));
        assert_eq!(b.source_module.as_deref(), Some("modB"));

        let etc = system.find_child("etc").unwrap();
        assert!(!etc.replace);
        assert_eq!(etc.source_module.as_deref(), Some("modA"));
    }

    #[test]
    fn first_writer_wins_on_same_leaf() {
        let dir = tempfile::tempdir().unwrap();
        let mod_a = dir.path().join("modA/system");
        let mod_b = dir.path().join("modB/system");
        touch(mod_a.join("bin/sh"), "from-a");
        touch(mod_b.join("bin/sh"), "from-b");

        let mut ctx = ctx();
        let mut system = Node::new_root("system");

        scan_into(&mut ctx, &mut system, &mod_a, "modA").unwrap();
        scan_into(&mut ctx, &mut system, &mod_b, "modB").unwrap();

        let sh = system.lookup("bin/sh").unwrap();
        assert_eq!(sh.source_module.as_deref(), Some("modA"));
        assert_eq!(
            sh.source_path.as_deref(),
            Some(mod_a.join("bin/sh").as_path())
        );
    }

    #[test]
    fn opaque_directory_shadows_later_content() {
        let dir = tempfile::tempdir().unwrap();
        let mod_a = dir.path().join("modA/system");
        let mod_b = dir.path().join("modB/system");
        touch(mod_a.join("fonts/A.ttf"), "a");
        touch(mod_a.join("fonts/.replace"), "");
        touch(mod_b.join("fonts/B.ttf"), "b");

        let mut ctx = ctx();
        let mut system = Node::new_root("system");

        assert!(scan_into(&mut ctx, &mut system, &mod_a, "modA").unwrap());
        assert!(scan_into(&mut ctx, &mut system, &mod_b, "modB").unwrap());

        let fonts = system.find_child("fonts").unwrap();
        assert!(fonts.replace);
        assert!(fonts.find_child("A.ttf").is_some());
        assert!(fonts.find_child("B.ttf").is_none());
    }

    #[test]
    fn later_module_claims_opaque_loses_to_earlier_merge() {
        let dir = tempfile::tempdir().unwrap();
        let mod_a = dir.path().join("modA/system");
        let mod_b = dir.path().join("modB/system");
        touch(mod_a.join("fonts/Z.ttf"), "z");
        touch(mod_b.join("fonts/A.ttf"), "a");
        touch(mod_b.join("fonts/.replace"), "");

        let mut ctx = ctx();
        let mut system = Node::new_root("system");

        scan_into(&mut ctx, &mut system, &mod_a, "modA").unwrap();
        scan_into(&mut ctx, &mut system, &mod_b, "modB").unwrap();

        // modA claimed fonts first as a plain merge dir; modB's opacity
        // does not retroactively apply, but its new file still lands.
        let fonts = system.find_child("fonts").unwrap();
        assert!(!fonts.replace);
        assert!(fonts.find_child("Z.ttf").is_some());
        assert!(fonts.find_child("A.ttf").is_some());
    }

    #[test]
    fn replace_sentinel_not_grafted_as_child() {
        let dir = tempfile::tempdir().unwrap();
        let mod_a = dir.path().join("modA/system");
        touch(mod_a.join("fonts/.replace"), "");

        let mut ctx = ctx();
        let mut system = Node::new_root("system");

        // An opaque dir with no other entries still counts as content.
        assert!(scan_into(&mut ctx, &mut system, &mod_a, "modA").unwrap());

        let fonts = system.find_child("fonts").unwrap();
        assert!(fonts.replace);
        assert!(fonts.children.is_empty());
    }

    #[test]
    fn empty_dir_chain_has_no_content() {
        let dir = tempfile::tempdir().unwrap();
        let mod_a = dir.path().join("modA/system");
        fs::create_dir_all(mod_a.join("usr/share")).unwrap();

        let mut ctx = ctx();
        let mut system = Node::new_root("system");

        assert!(!scan_into(&mut ctx, &mut system, &mod_a, "modA").unwrap());
    }

    #[test]
    fn file_shadowed_by_earlier_directory_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let mod_a = dir.path().join("modA/system");
        let mod_b = dir.path().join("modB/system");
        touch(mod_a.join("etc/hosts/extra"), "a");
        touch(mod_b.join("etc/hosts"), "plain file");

        let mut ctx = ctx();
        let mut system = Node::new_root("system");

        scan_into(&mut ctx, &mut system, &mod_a, "modA").unwrap();
        scan_into(&mut ctx, &mut system, &mod_b, "modB").unwrap();

        let hosts = system.lookup("etc/hosts").unwrap();
        assert_eq!(hosts.file_type, NodeFileType::Directory);
        assert_eq!(hosts.source_module.as_deref(), Some("modA"));
    }

    #[test]
    fn missing_dir_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = ctx();
        let mut system = Node::new_root("system");

        assert!(scan_into(&mut ctx, &mut system, &dir.path().join("gone"), "modA").is_err());
    }

    #[test]
    fn nodes_total_counts_every_creation() {
        let dir = tempfile::tempdir().unwrap();
        let mod_a = dir.path().join("modA/system");
        touch(mod_a.join("etc/a.conf"), "a");

        let mut ctx = ctx();
        let mut system = Node::new_root("system");
        scan_into(&mut ctx, &mut system, &mod_a, "modA").unwrap();

        // etc + a.conf
        assert_eq!(ctx.stats.nodes_total, 2);
    }
}
