// Copyright 2026 Meta-Magic Mount Developers
// SPDX-License-Identifier: GPL-3.0-or-later

use std::{fs::OpenOptions, path::Path};

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

fn env_filter(verbose: bool) -> EnvFilter {
    let default = if verbose { "debug" } else { "info" };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

/// Sets up the tracing subscriber. With a `log_path` the daemon log is
/// written through a non-blocking appender whose guard must be held for
/// the lifetime of the process; console output stays on stderr.
pub fn init_logging(verbose: bool, log_path: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let mut guard = None;

    if let Some(path) = log_path {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create log dir {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("open log file {}", path.display()))?;
        let (writer, g) = tracing_appender::non_blocking(file);
        guard = Some(g);

        tracing_subscriber::registry()
            .with(env_filter(verbose))
            .with(fmt::layer().with_ansi(false).with_writer(writer))
            .with(fmt::layer().with_writer(std::io::stderr))
            .try_init()
            .context("install tracing subscriber")?;
    } else {
        tracing_subscriber::registry()
            .with(env_filter(verbose))
            .with(fmt::layer().with_writer(std::io::stderr))
            .try_init()
            .context("install tracing subscriber")?;
    }

    // The core modules speak through the log facade; route it either to
    // logcat (android) or into the subscriber installed above.
    #[cfg(android)]
    {
        android_logger::init_once(
            android_logger::Config::default()
                .with_max_level(if verbose {
                    log::LevelFilter::Debug
                } else {
                    log::LevelFilter::Info
                })
                .with_tag("meta-magic"),
        );
    }

    #[cfg(not(android))]
    tracing_log::LogTracer::init().context("install log bridge")?;

    Ok(guard)
}
