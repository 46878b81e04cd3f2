// Copyright 2026 Meta-Magic Mount Developers
// SPDX-License-Identifier: GPL-3.0-or-later

use anyhow::Result;

use crate::core::{context::MergeStats, planner::MountOp, planner::MountPlan};

#[derive(Debug, PartialEq)]
pub enum ApplyOutcome {
    Applied,
    Skipped,
}

/// Applies the primitive operations of a mount plan. The core only emits
/// the plan; everything that touches the filesystem lives behind this
/// seam.
pub trait MountExecutor {
    /// Called once before the first operation.
    fn prepare(&mut self) -> Result<()> {
        Ok(())
    }

    fn apply(&mut self, op: &MountOp) -> Result<ApplyOutcome>;
}

/// Runs a whole plan, keeping the per-node counters. A failing operation
/// is logged and the plan continues; only a failing final projection
/// aborts.
pub fn apply_plan(
    plan: &MountPlan,
    executor: &mut dyn MountExecutor,
    stats: &mut MergeStats,
) -> Result<()> {
    executor.prepare()?;

    for op in &plan.ops {
        match executor.apply(op) {
            Ok(ApplyOutcome::Applied) => match op {
                MountOp::Bind { .. } | MountOp::Mount { .. } => stats.nodes_mounted += 1,
                MountOp::Whiteout { .. } => stats.nodes_whiteout += 1,
                MountOp::Mkdir { .. } | MountOp::Opaque { .. } => {}
            },
            Ok(ApplyOutcome::Skipped) => stats.nodes_skipped += 1,
            Err(e) => {
                stats.nodes_fail += 1;
                if let MountOp::Mount { .. } = op {
                    return Err(e.context("final projection failed"));
                }
                log::error!("mount op failed: {e:#}");
            }
        }
    }

    Ok(())
}

/// Logs every operation without touching the filesystem.
pub struct DryRunExecutor;

impl MountExecutor for DryRunExecutor {
    fn apply(&mut self, op: &MountOp) -> Result<ApplyOutcome> {
        match op {
            MountOp::Bind { source, dest } => {
                log::info!("[dry-run] bind {} -> {}", source.display(), dest.display());
            }
            MountOp::Mkdir { dest } => log::info!("[dry-run] mkdir {}", dest.display()),
            MountOp::Opaque { dest } => log::info!("[dry-run] opaque {}", dest.display()),
            MountOp::Whiteout { dest } => log::info!("[dry-run] whiteout {}", dest.display()),
            MountOp::Mount { dest, source_tag } => {
                log::info!("[dry-run] mount {} (source={})", dest.display(), source_tag);
            }
        }
        Ok(ApplyOutcome::Applied)
    }
}

#[cfg(linux_like)]
pub use magic::MagicMountExecutor;

#[cfg(linux_like)]
mod magic {
    use std::{
        fs::{self, File, create_dir_all},
        os::unix::fs::{MetadataExt, symlink},
        path::{Path, PathBuf},
    };

    use anyhow::{Context, Result, bail};
    use rustix::{
        fs::{Gid, Mode, Uid, chmod, chown},
        mount::{
            MountFlags, MountPropagationFlags, UnmountFlags, mount_bind, mount_change,
            mount_move, mount_remount, unmount,
        },
    };

    use super::{ApplyOutcome, MountExecutor, MountOp};
    use crate::utils::{
        self,
        xattr::{lgetfilecon, lsetfilecon},
    };

    fn clone_symlink<S: AsRef<Path>, D: AsRef<Path>>(src: S, dst: D) -> Result<()> {
        let target = fs::read_link(src.as_ref())?;
        symlink(&target, dst.as_ref())?;
        if let Ok(con) = lgetfilecon(src.as_ref()) {
            lsetfilecon(dst.as_ref(), &con)?;
        }
        Ok(())
    }

    /// Realises a plan on a tmpfs staging root, then moves the staged
    /// partitions onto the live root.
    pub struct MagicMountExecutor {
        stage_root: PathBuf,
        live_root: PathBuf,
        mount_source: String,
    }

    impl MagicMountExecutor {
        pub fn new<P: Into<PathBuf>>(stage_root: P, live_root: P, mount_source: &str) -> Self {
            Self {
                stage_root: stage_root.into(),
                live_root: live_root.into(),
                mount_source: mount_source.to_string(),
            }
        }

        fn stage_path(&self, dest: &Path) -> PathBuf {
            match dest.strip_prefix("/") {
                Ok(rel) => self.stage_root.join(rel),
                Err(_) => self.stage_root.join(dest),
            }
        }

        fn live_path(&self, dest: &Path) -> PathBuf {
            match dest.strip_prefix("/") {
                Ok(rel) => self.live_root.join(rel),
                Err(_) => self.live_root.join(dest),
            }
        }

        /// Copies mode, ownership and SELinux context from the live
        /// counterpart so the staged directory blends in.
        fn imitate_live_dir(&self, staged: &Path, dest: &Path) -> Result<()> {
            let live = self.live_path(dest);
            let Ok(metadata) = live.metadata() else {
                return Ok(());
            };

            chmod(staged, Mode::from_raw_mode(metadata.mode()))?;
            chown(
                staged,
                Some(Uid::from_raw(metadata.uid())),
                Some(Gid::from_raw(metadata.gid())),
            )?;
            if let Ok(con) = lgetfilecon(&live) {
                lsetfilecon(staged, &con)?;
            }
            Ok(())
        }

        fn project(&self) -> Result<()> {
            for entry in self.stage_root.read_dir()?.flatten() {
                let staged = entry.path();
                let target = self.live_root.join(entry.file_name());

                if let Err(e) = mount_remount(&staged, MountFlags::RDONLY | MountFlags::BIND, "")
                {
                    log::warn!("make {} ro: {e:#?}", staged.display());
                }

                mount_move(&staged, &target).with_context(|| {
                    format!("moving {} -> {}", staged.display(), target.display())
                })?;

                if let Err(e) = mount_change(&target, MountPropagationFlags::PRIVATE) {
                    log::warn!("make {} private: {e:#?}", target.display());
                }
            }

            if let Err(e) = unmount(&self.stage_root, UnmountFlags::DETACH) {
                log::error!("failed to unmount staging root: {e}");
            }
            fs::remove_dir(&self.stage_root).ok();

            Ok(())
        }
    }

    impl MountExecutor for MagicMountExecutor {
        fn prepare(&mut self) -> Result<()> {
            if utils::is_mounted(&self.stage_root) {
                bail!(
                    "staging root {} is already a mount point",
                    self.stage_root.display()
                );
            }

            utils::mount_tmpfs(&self.stage_root, &self.mount_source)?;
            mount_change(&self.stage_root, MountPropagationFlags::PRIVATE)
                .context("make staging root private")?;
            Ok(())
        }

        fn apply(&mut self, op: &MountOp) -> Result<ApplyOutcome> {
            match op {
                MountOp::Mkdir { dest } => {
                    let staged = self.stage_path(dest);
                    create_dir_all(&staged)
                        .with_context(|| format!("mkdir {}", staged.display()))?;
                    self.imitate_live_dir(&staged, dest)?;
                    Ok(ApplyOutcome::Applied)
                }
                MountOp::Opaque { dest } => {
                    let staged = self.stage_path(dest);
                    utils::xattr::set_overlay_opaque(&staged)
                        .with_context(|| format!("mark {} opaque", staged.display()))?;
                    Ok(ApplyOutcome::Applied)
                }
                MountOp::Bind { source, dest } => {
                    let staged = self.stage_path(dest);

                    let Ok(metadata) = source.symlink_metadata() else {
                        log::warn!("bind source {} vanished, skip", source.display());
                        return Ok(ApplyOutcome::Skipped);
                    };

                    if metadata.file_type().is_symlink() {
                        clone_symlink(source, &staged).with_context(|| {
                            format!(
                                "create symlink {} -> {}",
                                source.display(),
                                staged.display()
                            )
                        })?;
                        return Ok(ApplyOutcome::Applied);
                    }

                    File::create(&staged)
                        .with_context(|| format!("create {}", staged.display()))?;
                    mount_bind(source, &staged).with_context(|| {
                        format!("bind {} -> {}", source.display(), staged.display())
                    })?;

                    let _ = mount_change(&staged, MountPropagationFlags::PRIVATE);
                    if let Err(e) =
                        mount_remount(&staged, MountFlags::RDONLY | MountFlags::BIND, "")
                    {
                        log::warn!("make {} ro: {e:#?}", staged.display());
                    }

                    Ok(ApplyOutcome::Applied)
                }
                MountOp::Whiteout { dest } => {
                    if !self.live_path(dest).exists() {
                        // nothing underneath to hide
                        return Ok(ApplyOutcome::Skipped);
                    }

                    let staged = self.stage_path(dest);
                    utils::make_device_node(&staged, libc::S_IFCHR, 0)
                        .with_context(|| format!("whiteout {}", staged.display()))?;
                    Ok(ApplyOutcome::Applied)
                }
                MountOp::Mount { dest, source_tag } => {
                    log::info!(
                        "projecting staged tree onto {} (source={})",
                        dest.display(),
                        source_tag
                    );
                    self.project()?;
                    Ok(ApplyOutcome::Applied)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{context::MergeContext, node::Node, node::NodeFileType, planner};
    use std::path::PathBuf;

    fn plan_with_whiteout() -> MountPlan {
        let mut root = Node::new_root("");
        let mut system = Node::new_root("system");
        let mut wht = Node::new_root("gone.conf");
        wht.file_type = NodeFileType::Whiteout;
        system.append_child(wht).unwrap();

        let mut file = Node::new_root("a.conf");
        file.file_type = NodeFileType::RegularFile;
        file.source_path = Some(PathBuf::from("/data/adb/modules/m/system/a.conf"));
        file.source_module = Some("m".into());
        system.append_child(file).unwrap();

        root.append_child(system).unwrap();
        planner::emit(&root, &MergeContext::default())
    }

    #[test]
    fn dry_run_counts_every_op_kind() {
        let plan = plan_with_whiteout();
        let mut stats = crate::core::context::MergeStats::default();

        apply_plan(&plan, &mut DryRunExecutor, &mut stats).unwrap();

        // bind + final mount
        assert_eq!(stats.nodes_mounted, 2);
        assert_eq!(stats.nodes_whiteout, 1);
        assert_eq!(stats.nodes_fail, 0);
    }

    struct FailingExecutor;

    impl MountExecutor for FailingExecutor {
        fn apply(&mut self, op: &MountOp) -> anyhow::Result<ApplyOutcome> {
            match op {
                MountOp::Bind { .. } => anyhow::bail!("boom"),
                MountOp::Mount { .. } => Ok(ApplyOutcome::Applied),
                _ => Ok(ApplyOutcome::Skipped),
            }
        }
    }

    #[test]
    fn op_failure_is_counted_and_does_not_abort() {
        let plan = plan_with_whiteout();
        let mut stats = crate::core::context::MergeStats::default();

        apply_plan(&plan, &mut FailingExecutor, &mut stats).unwrap();

        assert_eq!(stats.nodes_fail, 1);
        assert_eq!(stats.nodes_mounted, 1);
        assert!(stats.nodes_skipped >= 1);
    }
}
