// Copyright 2026 Meta-Magic Mount Developers
// SPDX-License-Identifier: GPL-3.0-or-later

mod conf;
mod core;
mod defs;
mod mount;
mod utils;

use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use mimalloc::MiMalloc;

use crate::{
    conf::{
        cli::{Cli, Commands},
        cli_handlers,
        config::Config,
    },
    core::{planner, state::RuntimeState, tree},
    mount::executor::{self, DryRunExecutor},
};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

fn load_config(cli: &Cli) -> Result<Config> {
    if let Some(config_path) = &cli.config {
        return Config::from_file(config_path).with_context(|| {
            format!(
                "Failed to load config from custom path: {}",
                config_path.display()
            )
        });
    }

    match Config::load_default() {
        Ok(config) => Ok(config),
        Err(e) => {
            let is_not_found = e
                .root_cause()
                .downcast_ref::<std::io::Error>()
                .map(|io_err| io_err.kind() == std::io::ErrorKind::NotFound)
                .unwrap_or(false);

            if is_not_found {
                Ok(Config::default())
            } else {
                Err(e).context(format!(
                    "Failed to load default config from {}",
                    defs::CONFIG_FILE
                ))
            }
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // gen-config must work even when the current config is unreadable
    if let Some(Commands::GenConfig { output }) = &cli.command {
        return cli_handlers::handle_gen_config(output);
    }

    let mut config = load_config(&cli)?;
    config.merge_with_cli(
        cli.moduledir.clone(),
        cli.mountsource.clone(),
        cli.partitions.clone(),
    );

    if let Some(command) = &cli.command {
        match command {
            Commands::GenConfig { .. } => {}
            Commands::ShowConfig => cli_handlers::handle_show_config(&config)?,
            Commands::Modules => cli_handlers::handle_modules(&config)?,
            Commands::Plan => cli_handlers::handle_plan(&config)?,
        }

        return Ok(());
    }

    let log_path = if cli.dry_run {
        None
    } else {
        Some(Path::new(defs::DAEMON_LOG_FILE))
    };

    let _log_guard = utils::log::init_logging(cli.verbose, log_path)
        .context("Failed to initialize logging")?;

    tracing::info!("composing module view from {}", config.moduledir.display());

    let mut ctx = cli_handlers::context_from(&config);

    let Some(root) = tree::build(&mut ctx).context("Failed to build mount tree")? else {
        tracing::info!("no module content, nothing to mount");
        return Ok(());
    };

    let tree_str = format!("{:?}", root);
    for line in tree_str.lines() {
        log::debug!("   {}", line);
    }

    let plan = planner::emit(&root, &ctx);
    plan.log_summary();

    if cli.dry_run {
        executor::apply_plan(&plan, &mut DryRunExecutor, &mut ctx.stats)
            .context("Failed to walk mount plan")?;
    } else {
        #[cfg(linux_like)]
        {
            let stage_dir = Path::new(&config.stage_dir).join("workdir");
            let mut exec = executor::MagicMountExecutor::new(
                stage_dir.as_path(),
                ctx.live_root.as_path(),
                &ctx.mount_source,
            );
            executor::apply_plan(&plan, &mut exec, &mut ctx.stats)
                .context("Failed to apply mount plan")?;
        }

        #[cfg(not(linux_like))]
        {
            tracing::warn!("mount executor unavailable on this platform, dry-run only");
            executor::apply_plan(&plan, &mut DryRunExecutor, &mut ctx.stats)
                .context("Failed to walk mount plan")?;
        }

        let mounted_modules = crate::core::inventory::enumerate(&ctx.module_dir)
            .map(|modules| {
                modules
                    .into_iter()
                    .map(|m| m.name)
                    .filter(|name| !ctx.failed_modules.contains(name))
                    .collect()
            })
            .unwrap_or_default();
        let active_mounts = plan
            .unmountable
            .iter()
            .map(|p| p.display().to_string())
            .collect();
        if let Err(e) = RuntimeState::new(&ctx, mounted_modules, active_mounts).save() {
            tracing::warn!("failed to persist runtime state: {e:#}");
        }
    }

    if !ctx.failed_modules.is_empty() {
        tracing::warn!("failed modules: {:?}", ctx.failed_modules);
    }
    tracing::info!(
        "done: {} modules, {} nodes, {} mounted, {} skipped, {} whiteouts, {} failed ops",
        ctx.stats.modules_total,
        ctx.stats.nodes_total,
        ctx.stats.nodes_mounted,
        ctx.stats.nodes_skipped,
        ctx.stats.nodes_whiteout,
        ctx.stats.nodes_fail
    );

    Ok(())
}
