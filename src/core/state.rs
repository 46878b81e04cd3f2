// Copyright 2026 Meta-Magic Mount Developers
// SPDX-License-Identifier: GPL-3.0-or-later

use std::path::Path;

use anyhow::Result;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::{core::context::MergeContext, defs, utils};

/// Snapshot of the last composition run, written next to the daemon log
/// so the manager UI can report what is mounted and what failed.
#[derive(Debug, Serialize, Deserialize, Default)]
pub struct RuntimeState {
    pub timestamp: String,
    pub pid: u32,
    pub mount_source: String,
    pub stats: crate::core::context::MergeStats,
    pub mounted_modules: Vec<String>,
    pub failed_modules: Vec<String>,
    pub extra_partitions: Vec<String>,
    #[serde(default)]
    pub active_mounts: Vec<String>,
}

impl RuntimeState {
    pub fn new(
        ctx: &MergeContext,
        mounted_modules: Vec<String>,
        active_mounts: Vec<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            pid: std::process::id(),
            mount_source: ctx.mount_source.clone(),
            stats: ctx.stats.clone(),
            mounted_modules,
            failed_modules: ctx.failed_modules.clone(),
            extra_partitions: ctx.extra_parts.clone(),
            active_mounts,
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(Path::new(defs::STATE_FILE))
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            utils::ensure_dir_exists(parent)?;
        }
        utils::atomic_write(path, json)?;
        Ok(())
    }

    pub fn load() -> Result<Self> {
        Self::load_from(Path::new(defs::STATE_FILE))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let state = serde_json::from_str(&content)?;
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_round_trips_as_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run/state.json");

        let mut ctx = MergeContext::default();
        ctx.stats.modules_total = 3;
        ctx.mark_module_failed("broken_mod");

        let state = RuntimeState::new(
            &ctx,
            vec!["good_mod".into()],
            vec!["/system/etc/a.conf".into()],
        );
        state.save_to(&path).unwrap();

        let loaded = RuntimeState::load_from(&path).unwrap();
        assert_eq!(loaded.stats.modules_total, 3);
        assert_eq!(loaded.mounted_modules, vec!["good_mod"]);
        assert_eq!(loaded.failed_modules, vec!["broken_mod"]);
        assert_eq!(loaded.active_mounts, vec!["/system/etc/a.conf"]);
        assert!(!loaded.timestamp.is_empty());
    }

    #[test]
    fn missing_state_file_loads_default() {
        let dir = tempfile::tempdir().unwrap();
        let state = RuntimeState::load_from(&dir.path().join("none.json")).unwrap();
        assert_eq!(state.pid, 0);
    }
}
