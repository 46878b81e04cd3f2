// Copyright 2026 Meta-Magic Mount Developers
// SPDX-License-Identifier: GPL-3.0-or-later

use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::{
    conf::config::Config,
    core::{
        context::{MergeContext, MergeStats},
        inventory, planner,
        planner::MountPlan,
        tree,
    },
};

/// Builds the composition context a run starts from: directories and
/// mount source from the config, extra partitions validated through the
/// registry.
pub fn context_from(config: &Config) -> MergeContext {
    let mut ctx = MergeContext::new(config.moduledir.clone(), config.mountsource.clone());
    ctx.enable_unmountable = config.enable_unmountable;

    for partition in &config.partitions {
        ctx.register_extra_partition(partition);
    }

    ctx
}

pub fn handle_gen_config(output: &Path) -> Result<()> {
    let config = Config::default();
    config
        .save_to_file(output)
        .with_context(|| format!("write default config to {}", output.display()))?;
    println!("Wrote default config to {}", output.display());
    Ok(())
}

pub fn handle_show_config(config: &Config) -> Result<()> {
    println!("{}", toml::to_string_pretty(config)?);
    Ok(())
}

pub fn handle_modules(config: &Config) -> Result<()> {
    inventory::print_list(&config.moduledir)
}

#[derive(Serialize)]
struct PlanReport {
    plan: MountPlan,
    conflicts: Vec<planner::ConflictEntry>,
    diagnostics: Vec<planner::DiagnosticIssue>,
    failed_modules: Vec<String>,
    stats: MergeStats,
}

/// Builds the tree and prints plan, conflicts and diagnostics as JSON
/// without applying anything.
pub fn handle_plan(config: &Config) -> Result<()> {
    let mut ctx = context_from(config);

    let Some(root) = tree::build(&mut ctx)? else {
        println!(
            "{}",
            serde_json::to_string_pretty(&PlanReport {
                plan: MountPlan::default(),
                conflicts: Vec::new(),
                diagnostics: Vec::new(),
                failed_modules: ctx.failed_modules.clone(),
                stats: ctx.stats.clone(),
            })?
        );
        return Ok(());
    };

    let modules = inventory::enumerate(&ctx.module_dir)?;
    let plan = planner::emit(&root, &ctx);
    let report = planner::analyze(&root, &modules, &ctx);

    println!(
        "{}",
        serde_json::to_string_pretty(&PlanReport {
            plan,
            conflicts: report.conflicts,
            diagnostics: report.diagnostics,
            failed_modules: ctx.failed_modules.clone(),
            stats: ctx.stats.clone(),
        })?
    );

    Ok(())
}
