// Copyright 2026 Meta-Magic Mount Developers
// SPDX-License-Identifier: GPL-3.0-or-later

use anyhow::{Context, Result};

use crate::core::{context::MergeContext, inventory, node::Node, reconciler, scanner};

/// Composes the overlay tree from every enabled module under
/// `ctx.module_dir`. Returns `None` when no module contributed any
/// effective content.
///
/// A module whose scan fails keeps its partial contribution and lands in
/// `ctx.failed_modules`; the remaining modules still build. Only a
/// failure to attach a partition to the root aborts the whole build.
pub fn build(ctx: &mut MergeContext) -> Result<Option<Node>> {
    log::info!("building mount tree from {}", ctx.module_dir.display());

    let modules = inventory::enumerate(&ctx.module_dir)
        .with_context(|| format!("enumerate modules in {}", ctx.module_dir.display()))?;

    let mut root = Node::new_root("");
    let mut system = Node::new_root("system");
    ctx.stats.nodes_total += 2;

    let mut has_any = false;

    for module in &modules {
        let mod_system = module.path.join("system");
        if !mod_system.is_dir() {
            log::debug!("module {} has no system dir, skip", module.name);
            continue;
        }

        log::info!("collecting module {}", module.name);
        ctx.stats.modules_total += 1;

        match scanner::scan_into(ctx, &mut system, &mod_system, &module.name) {
            Ok(sub) => {
                if sub {
                    has_any = true;
                } else {
                    log::debug!("module {} had no effective content", module.name);
                }
            }
            Err(e) => {
                log::error!("scan of module {} failed: {e:#}", module.name);
                ctx.mark_module_failed(&module.name);
            }
        }
    }

    if !has_any {
        log::warn!("no module contributed any content, abort");
        return Ok(None);
    }

    reconciler::reconcile(ctx, &mut system, &modules);
    reconciler::promote(ctx, &mut root, &mut system).context("promote builtin partitions")?;
    reconciler::attach_extras(ctx, &mut root, &modules).context("attach extra partitions")?;

    root.append_child(system).context("attach /system node to root")?;
    root.prune_empty();

    log::info!(
        "mount tree built: {} modules, {} nodes, {} failed",
        ctx.stats.modules_total,
        ctx.stats.nodes_total,
        ctx.failed_modules.len()
    );

    Ok(Some(root))
}
