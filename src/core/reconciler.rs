// Copyright 2026 Meta-Magic Mount Developers
// SPDX-License-Identifier: GPL-3.0-or-later

use std::{fs, path::Path};

use anyhow::{Context, Result};

use crate::{
    core::{
        context::MergeContext,
        inventory::ModuleSource,
        node::{Node, NodeFileType},
        scanner,
    },
    defs::BUILTIN_PARTITIONS,
};

/// A symlink target counts as compatible when it points, with any number
/// of trailing slashes, at `../<part>` or at the module's own copy of
/// the partition under `module_dir`.
fn is_compatible_symlink(
    link_target: &str,
    part_name: &str,
    module_dir: &Path,
    module_name: &str,
) -> bool {
    let target = link_target.trim_end_matches('/');
    if target.is_empty() {
        return false;
    }

    if target == format!("../{part_name}") {
        return true;
    }

    let absolute = module_dir.join(module_name).join(part_name);
    target == absolute.to_string_lossy()
}

/// Rebuilds a detached directory node for `part_name` from every enabled
/// module that ships it, first-writer-wins as usual. A scan failure on
/// one module is recorded and the remaining modules still contribute.
fn scan_partition_from_modules(
    ctx: &mut MergeContext,
    part_name: &str,
    parent: &mut Node,
    modules: &[ModuleSource],
) -> bool {
    let mut has_any = false;

    for module in modules {
        let part_path = module.path.join(part_name);
        if !part_path.is_dir() {
            continue;
        }

        log::debug!("collecting {} from module {}", part_name, module.name);
        match scanner::scan_into(ctx, parent, &part_path, &module.name) {
            Ok(sub) => has_any |= sub,
            Err(e) => {
                log::error!(
                    "scan {} of module {} failed: {e:#}",
                    part_name,
                    module.name
                );
                ctx.mark_module_failed(&module.name);
            }
        }
    }

    has_any
}

/// Replaces a compatible symlink node at `system/<part_name>` with a
/// directory node assembled from module contributions, when any module
/// owns a real directory for the partition.
fn reconcile_partition(
    ctx: &mut MergeContext,
    system: &mut Node,
    part_name: &str,
    modules: &[ModuleSource],
) -> Result<()> {
    let Some(child) = system.find_child(part_name) else {
        return Ok(());
    };
    if child.file_type != NodeFileType::Symlink {
        return Ok(());
    }
    let (Some(source_path), Some(source_module)) =
        (child.source_path.clone(), child.source_module.clone())
    else {
        return Ok(());
    };

    let link_target = match fs::read_link(&source_path) {
        Ok(t) => t,
        Err(e) => {
            log::warn!("readlink {} failed: {e}", source_path.display());
            return Ok(());
        }
    };
    let link_target = link_target.to_string_lossy().to_string();

    if !is_compatible_symlink(&link_target, part_name, &ctx.module_dir, &source_module) {
        log::debug!("symlink {part_name} -> {link_target} (not compatible)");
        return Ok(());
    }

    let Some(owner) = modules.iter().find(|m| m.path.join(part_name).is_dir()) else {
        log::debug!("no real directory found for {part_name}, keeping symlink");
        return Ok(());
    };
    let owner_name = owner.name.clone();

    log::info!(
        "compatible symlink system/{part_name} -> {link_target}, real dir in module '{owner_name}'"
    );

    let mut fresh = Node::new_root(part_name);
    ctx.stats.nodes_total += 1;

    if !scan_partition_from_modules(ctx, part_name, &mut fresh, modules) {
        log::debug!("no content in {part_name}, keeping symlink");
        return Ok(());
    }

    fresh.source_module = Some(owner_name);
    system.detach_child(part_name);
    system
        .append_child(fresh)
        .with_context(|| format!("attach rebuilt directory node for {part_name}"))?;

    log::info!("replaced symlink with directory node: system/{part_name}");
    Ok(())
}

/// Runs symlink reconciliation for every built-in and registered extra
/// partition. Per-partition failures are logged and do not stop the
/// remaining partitions.
pub fn reconcile(ctx: &mut MergeContext, system: &mut Node, modules: &[ModuleSource]) {
    let mut names: Vec<String> = BUILTIN_PARTITIONS
        .iter()
        .map(|(name, _)| name.to_string())
        .collect();
    names.extend(ctx.extra_parts.clone());

    for name in names {
        if let Err(e) = reconcile_partition(ctx, system, &name, modules) {
            log::error!("symlink reconciliation for {name} failed: {e:#}");
        }
    }
}

/// Moves built-in partition nodes from under `system` to the root when
/// the live system lays them out that way: a real directory at `/<part>`
/// and, except for `odm`, a symlink at `/system/<part>`.
pub fn promote(ctx: &mut MergeContext, root: &mut Node, system: &mut Node) -> Result<()> {
    for (part_name, need_symlink) in BUILTIN_PARTITIONS {
        let real_path = ctx.live_path(part_name);
        let system_path = ctx.live_system_path(part_name);

        if !real_path.is_dir() {
            log::debug!("skip promotion of {part_name}: {} not a dir", real_path.display());
            continue;
        }
        if *need_symlink && !system_path.is_symlink() {
            log::debug!(
                "skip promotion of {part_name}: no symlink at {}",
                system_path.display()
            );
            continue;
        }

        let Some(child) = system.detach_child(part_name) else {
            continue;
        };

        log::debug!("promoting '{part_name}' from /system to /");
        root.append_child(child)
            .with_context(|| format!("attach promoted partition {part_name} to root"))?;
    }

    Ok(())
}

/// Builds and attaches every registered extra partition that exists as a
/// real directory on the live system and got module content.
pub fn attach_extras(
    ctx: &mut MergeContext,
    root: &mut Node,
    modules: &[ModuleSource],
) -> Result<()> {
    for name in ctx.extra_parts.clone() {
        let real_path = ctx.live_path(&name);
        if !real_path.is_dir() {
            log::debug!(
                "extra partition '{name}' skipped, {} is not a dir",
                real_path.display()
            );
            continue;
        }

        let mut fresh = Node::new_root(name.as_str());
        ctx.stats.nodes_total += 1;

        if !scan_partition_from_modules(ctx, &name, &mut fresh, modules) {
            log::debug!("no content for extra partition '{name}', dropping node");
            continue;
        }

        root.append_child(fresh)
            .with_context(|| format!("attach extra partition {name} to root"))?;
        log::info!("extra partition '{name}' attached to root");
    }

    Ok(())
}
