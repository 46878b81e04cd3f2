// Copyright 2026 Meta-Magic Mount Developers
// SPDX-License-Identifier: GPL-3.0-or-later

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::defs;

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct MergeStats {
    pub modules_total: u32,
    pub nodes_total: u32,
    pub nodes_mounted: u32,
    pub nodes_skipped: u32,
    pub nodes_whiteout: u32,
    pub nodes_fail: u32,
}

/// Composition state for one build-and-project run. Owned exclusively by
/// the tree builder while the tree is assembled, read-only afterwards.
pub struct MergeContext {
    pub module_dir: PathBuf,
    pub mount_source: String,
    /// Root the final view is projected onto. `/` outside of tests.
    pub live_root: PathBuf,
    pub stats: MergeStats,
    pub failed_modules: Vec<String>,
    pub extra_parts: Vec<String>,
    pub enable_unmountable: bool,
}

impl Default for MergeContext {
    fn default() -> Self {
        Self::new(
            PathBuf::from(defs::MODULES_DIR),
            defs::DEFAULT_MOUNT_SOURCE.to_string(),
        )
    }
}

impl MergeContext {
    pub fn new(module_dir: PathBuf, mount_source: String) -> Self {
        Self {
            module_dir,
            mount_source,
            live_root: PathBuf::from("/"),
            stats: MergeStats::default(),
            failed_modules: Vec::new(),
            extra_parts: Vec::new(),
            enable_unmountable: false,
        }
    }

    pub fn with_live_root<P: Into<PathBuf>>(mut self, root: P) -> Self {
        self.live_root = root.into();
        self
    }

    /// Records a module failure, keeping the list ordered and free of
    /// duplicates.
    pub fn mark_module_failed(&mut self, module_name: &str) {
        if !self.failed_modules.iter().any(|m| m == module_name) {
            self.failed_modules.push(module_name.to_string());
        }
    }

    /// Validates and stores one extra partition name. Leading slashes are
    /// stripped so the stored form composes with `Path::join`; the first
    /// path segment is checked against the static blacklist.
    pub fn register_extra_partition(&mut self, raw: &str) {
        let trimmed = raw.trim_matches(|c: char| c.is_ascii_whitespace());
        if trimmed.is_empty() {
            log::warn!("extra partition: rejected empty name");
            return;
        }

        let stripped = trimmed.trim_start_matches('/');
        let segment = stripped.split('/').next().unwrap_or("");
        if segment.is_empty() {
            log::warn!("extra partition: rejected '{trimmed}' (no usable segment)");
            return;
        }

        if defs::EXTRA_PART_BLACKLIST.contains(&segment) {
            log::warn!("extra partition: rejected '{trimmed}' (blacklisted)");
            return;
        }

        log::info!(
            "extra partition: registered '{}' (total: {})",
            stripped,
            self.extra_parts.len() + 1
        );
        self.extra_parts.push(stripped.to_string());
    }

    pub fn live_path(&self, name: &str) -> PathBuf {
        self.live_root.join(name)
    }

    pub fn live_system_path(&self, name: &str) -> PathBuf {
        self.live_root.join("system").join(name)
    }
}

pub fn is_module_disabled(module_path: &Path) -> bool {
    [
        defs::DISABLE_FILE_NAME,
        defs::REMOVE_FILE_NAME,
        defs::SKIP_MOUNT_FILE_NAME,
    ]
    .iter()
    .any(|marker| module_path.join(marker).exists())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> MergeContext {
        MergeContext::default()
    }

    #[test]
    fn registry_trims_and_accepts() {
        let mut ctx = ctx();
        ctx.register_extra_partition("  my_ext  ");
        assert_eq!(ctx.extra_parts, vec!["my_ext"]);
    }

    #[test]
    fn registry_rejects_empty_and_bare_slash() {
        let mut ctx = ctx();
        ctx.register_extra_partition("  ");
        ctx.register_extra_partition("/");
        assert!(ctx.extra_parts.is_empty());
    }

    #[test]
    fn registry_rejects_blacklisted_segments() {
        let mut ctx = ctx();
        ctx.register_extra_partition("vendor");
        ctx.register_extra_partition("bin");
        ctx.register_extra_partition("/proc/self");
        assert!(ctx.extra_parts.is_empty());
    }

    #[test]
    fn registry_strips_leading_slash() {
        let mut ctx = ctx();
        ctx.register_extra_partition("/my_ext");
        assert_eq!(ctx.extra_parts, vec!["my_ext"]);
    }

    #[test]
    fn registry_keeps_duplicates_for_caller() {
        let mut ctx = ctx();
        ctx.register_extra_partition("my_ext");
        ctx.register_extra_partition("my_ext");
        assert_eq!(ctx.extra_parts.len(), 2);
    }

    #[test]
    fn failed_modules_deduplicated_in_order() {
        let mut ctx = ctx();
        ctx.mark_module_failed("b");
        ctx.mark_module_failed("a");
        ctx.mark_module_failed("b");
        assert_eq!(ctx.failed_modules, vec!["b", "a"]);
    }

    #[test]
    fn disabled_markers_detected() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!is_module_disabled(dir.path()));

        std::fs::write(dir.path().join("skip_mount"), b"").unwrap();
        assert!(is_module_disabled(dir.path()));
    }
}
