// Copyright 2026 Meta-Magic Mount Developers
// SPDX-License-Identifier: GPL-3.0-or-later

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use rayon::prelude::*;
use serde::Serialize;
use walkdir::WalkDir;

use crate::{
    core::{
        context::MergeContext,
        inventory::ModuleSource,
        node::{Node, NodeFileType},
    },
    defs,
};

/// One primitive operation for the mount executor. `dest` is the path in
/// the final virtual view; the executor re-roots it onto its staging
/// directory.
#[derive(Debug, Clone, Serialize)]
pub enum MountOp {
    Bind { source: PathBuf, dest: PathBuf },
    Mkdir { dest: PathBuf },
    Opaque { dest: PathBuf },
    Whiteout { dest: PathBuf },
    Mount { dest: PathBuf, source_tag: String },
}

#[derive(Debug, Default, Serialize)]
pub struct MountPlan {
    pub ops: Vec<MountOp>,
    /// Targets the umount manager may detach later. Filled only when
    /// `enable_unmountable` is set.
    pub unmountable: Vec<PathBuf>,
}

#[derive(Debug, Default, PartialEq)]
pub struct PlanCounts {
    pub binds: usize,
    pub mkdirs: usize,
    pub opaques: usize,
    pub whiteouts: usize,
}

impl MountPlan {
    pub fn counts(&self) -> PlanCounts {
        let mut counts = PlanCounts::default();
        for op in &self.ops {
            match op {
                MountOp::Bind { .. } => counts.binds += 1,
                MountOp::Mkdir { .. } => counts.mkdirs += 1,
                MountOp::Opaque { .. } => counts.opaques += 1,
                MountOp::Whiteout { .. } => counts.whiteouts += 1,
                MountOp::Mount { .. } => {}
            }
        }
        counts
    }

    pub fn log_summary(&self) {
        let counts = self.counts();
        log::info!(
            "mount plan: {} binds, {} dirs, {} opaque, {} whiteouts",
            counts.binds,
            counts.mkdirs,
            counts.opaques,
            counts.whiteouts
        );
    }
}

/// Emits the ordered operation list for the executor. Pure: depends only
/// on the tree and the context configuration. Children are visited in
/// lexicographic name order so two emissions of the same tree agree.
pub fn emit(root: &Node, ctx: &MergeContext) -> MountPlan {
    let mut plan = MountPlan::default();

    emit_node(root, Path::new("/"), &mut plan, ctx.enable_unmountable);

    if ctx.enable_unmountable {
        plan.unmountable.push(PathBuf::from("/"));
    }
    plan.ops.push(MountOp::Mount {
        dest: PathBuf::from("/"),
        source_tag: ctx.mount_source.clone(),
    });

    plan
}

fn emit_node(node: &Node, dest: &Path, plan: &mut MountPlan, unmountable: bool) {
    match node.file_type {
        NodeFileType::Directory => {
            plan.ops.push(MountOp::Mkdir {
                dest: dest.to_path_buf(),
            });
            if node.replace {
                plan.ops.push(MountOp::Opaque {
                    dest: dest.to_path_buf(),
                });
            }

            let mut names: Vec<&String> = node.children.keys().collect();
            names.sort();
            for name in names {
                let child = &node.children[name];
                emit_node(child, &dest.join(name), plan, unmountable);
            }
        }
        NodeFileType::RegularFile | NodeFileType::Symlink => {
            let Some(source) = &node.source_path else {
                log::warn!("leaf {} has no source, dropped from plan", dest.display());
                return;
            };
            if unmountable {
                plan.unmountable.push(dest.to_path_buf());
            }
            plan.ops.push(MountOp::Bind {
                source: source.clone(),
                dest: dest.to_path_buf(),
            });
        }
        NodeFileType::Whiteout => {
            plan.ops.push(MountOp::Whiteout {
                dest: dest.to_path_buf(),
            });
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ConflictEntry {
    pub path: String,
    pub contenders: Vec<String>,
    pub selected: String,
}

#[derive(Debug, Clone, Serialize)]
pub enum DiagnosticLevel {
    Warning,
    Critical,
}

#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticIssue {
    pub level: DiagnosticLevel,
    pub context: String,
    pub message: String,
}

#[derive(Debug, Default, Serialize)]
pub struct AnalysisReport {
    pub conflicts: Vec<ConflictEntry>,
    pub diagnostics: Vec<DiagnosticIssue>,
}

/// Walks every enabled module layer and reports contested paths plus
/// layer-level problems (dead absolute symlinks). Read-only; the merge
/// outcome is decided by the tree, which is also where the winner of
/// each conflict is read from.
pub fn analyze(tree: &Node, modules: &[ModuleSource], ctx: &MergeContext) -> AnalysisReport {
    let mut partitions: Vec<String> = vec!["system".to_string()];
    partitions.extend(
        defs::BUILTIN_PARTITIONS
            .iter()
            .map(|(name, _)| name.to_string()),
    );
    partitions.extend(ctx.extra_parts.clone());

    let per_module: Vec<(Vec<(String, String)>, Vec<DiagnosticIssue>)> = modules
        .par_iter()
        .map(|module| {
            let mut contributions = Vec::new();
            let mut diagnostics = Vec::new();

            for part in &partitions {
                let layer = module.path.join(part);
                if !layer.is_dir() {
                    continue;
                }

                for entry in WalkDir::new(&layer).min_depth(1).into_iter().flatten() {
                    if entry.path_is_symlink()
                        && let Ok(target) = std::fs::read_link(entry.path())
                        && target.is_absolute()
                        && !target.exists()
                    {
                        diagnostics.push(DiagnosticIssue {
                            level: DiagnosticLevel::Warning,
                            context: module.name.clone(),
                            message: format!(
                                "Dead absolute symlink: {} -> {}",
                                entry.path().display(),
                                target.display()
                            ),
                        });
                    }

                    if entry.file_type().is_dir() {
                        continue;
                    }

                    if let Ok(rel) = entry.path().strip_prefix(&layer) {
                        let virtual_path = format!("{}/{}", part, rel.to_string_lossy());
                        contributions.push((virtual_path, module.name.clone()));
                    }
                }
            }

            (contributions, diagnostics)
        })
        .collect();

    let mut file_map: HashMap<String, Vec<String>> = HashMap::new();
    let mut report = AnalysisReport::default();

    for (contributions, diagnostics) in per_module {
        for (path, module) in contributions {
            file_map.entry(path).or_default().push(module);
        }
        report.diagnostics.extend(diagnostics);
    }

    for (path, contenders) in file_map {
        if contenders.len() < 2 {
            continue;
        }

        let selected = tree
            .lookup(&path)
            .or_else(|| tree.lookup(&format!("system/{path}")))
            .and_then(|n| n.source_module.clone())
            .unwrap_or_else(|| contenders[0].clone());

        report.conflicts.push(ConflictEntry {
            path,
            contenders,
            selected,
        });
    }

    report.conflicts.sort_by(|a, b| a.path.cmp(&b.path));

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{inventory, scanner, tree};
    use std::fs;

    fn leaf(name: &str, file_type: NodeFileType) -> Node {
        let mut node = Node::new_root(name);
        node.file_type = file_type;
        node.source_path = Some(PathBuf::from("/data/adb/modules/m").join(name));
        node.source_module = Some("m".to_string());
        node
    }

    fn sample_tree() -> Node {
        let mut root = Node::new_root("");
        let mut system = Node::new_root("system");
        let mut etc = Node::new_root("etc");
        etc.append_child(leaf("b.conf", NodeFileType::RegularFile))
            .unwrap();
        etc.append_child(leaf("a.conf", NodeFileType::RegularFile))
            .unwrap();
        etc.append_child(leaf("removed.conf", NodeFileType::Whiteout))
            .unwrap();
        let mut fonts = Node::new_root("fonts");
        fonts.replace = true;
        fonts
            .append_child(leaf("A.ttf", NodeFileType::RegularFile))
            .unwrap();
        system.append_child(etc).unwrap();
        system.append_child(fonts).unwrap();
        root.append_child(system).unwrap();
        root
    }

    #[test]
    fn emission_is_deterministic_and_ordered() {
        let root = sample_tree();
        let ctx = MergeContext::default();

        let plan_a = emit(&root, &ctx);
        let plan_b = emit(&root, &ctx);

        let render = |plan: &MountPlan| format!("{:?}", plan.ops);
        assert_eq!(render(&plan_a), render(&plan_b));

        // parent dirs come before their contents, a.conf before b.conf
        let dests: Vec<String> = plan_a
            .ops
            .iter()
            .map(|op| match op {
                MountOp::Bind { dest, .. }
                | MountOp::Mkdir { dest }
                | MountOp::Opaque { dest }
                | MountOp::Whiteout { dest }
                | MountOp::Mount { dest, .. } => dest.display().to_string(),
            })
            .collect();

        let pos = |needle: &str| dests.iter().position(|d| d == needle).unwrap();
        assert!(pos("/system") < pos("/system/etc"));
        assert!(pos("/system/etc") < pos("/system/etc/a.conf"));
        assert!(pos("/system/etc/a.conf") < pos("/system/etc/b.conf"));
    }

    #[test]
    fn opaque_and_whiteout_ops_emitted() {
        let root = sample_tree();
        let ctx = MergeContext::default();
        let plan = emit(&root, &ctx);

        assert!(plan.ops.iter().any(|op| matches!(
            op,
            MountOp::Opaque { dest } if dest == Path::new("/system/fonts")
        )));
        assert!(plan.ops.iter().any(|op| matches!(
            op,
            MountOp::Whiteout { dest } if dest == Path::new("/system/etc/removed.conf")
        )));

        let counts = plan.counts();
        assert_eq!(counts.binds, 3);
        assert_eq!(counts.whiteouts, 1);
        assert_eq!(counts.opaques, 1);
    }

    #[test]
    fn final_op_is_the_mount() {
        let root = sample_tree();
        let mut ctx = MergeContext::default();
        ctx.mount_source = "TEST".into();

        let plan = emit(&root, &ctx);
        match plan.ops.last().unwrap() {
            MountOp::Mount { dest, source_tag } => {
                assert_eq!(dest, Path::new("/"));
                assert_eq!(source_tag, "TEST");
            }
            other => panic!("unexpected final op {other:?}"),
        }
    }

    #[test]
    fn unmountable_collected_only_when_enabled() {
        let root = sample_tree();

        let ctx = MergeContext::default();
        assert!(emit(&root, &ctx).unmountable.is_empty());

        let mut ctx = MergeContext::default();
        ctx.enable_unmountable = true;
        let plan = emit(&root, &ctx);
        assert!(plan.unmountable.contains(&PathBuf::from("/system/etc/a.conf")));
        assert!(plan.unmountable.contains(&PathBuf::from("/")));
    }

    #[test]
    fn analyze_reports_contested_paths_with_winner() {
        let tmp = tempfile::tempdir().unwrap();
        let module_dir = tmp.path().join("modules");
        for (module, content) in [("modA", "a"), ("modB", "b")] {
            let path = module_dir.join(module).join("system/bin/sh");
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, content).unwrap();
        }

        let live = tmp.path().join("live");
        fs::create_dir_all(live.join("system")).unwrap();
        let mut ctx = MergeContext::new(module_dir.clone(), "KSU".into()).with_live_root(live);

        let modules = inventory::enumerate(&module_dir).unwrap();
        let built = tree::build(&mut ctx).unwrap().unwrap();

        let report = analyze(&built, &modules, &ctx);
        assert_eq!(report.conflicts.len(), 1);

        let conflict = &report.conflicts[0];
        assert_eq!(conflict.path, "system/bin/sh");
        assert_eq!(conflict.contenders.len(), 2);
        assert_eq!(
            conflict.selected,
            built.lookup("system/bin/sh").unwrap().source_module.clone().unwrap()
        );
    }

    #[test]
    fn analyze_flags_dead_absolute_symlinks() {
        let tmp = tempfile::tempdir().unwrap();
        let module_dir = tmp.path().join("modules");
        let bin = module_dir.join("modA/system/bin");
        fs::create_dir_all(&bin).unwrap();
        std::os::unix::fs::symlink("/definitely/not/here", bin.join("dead")).unwrap();

        let ctx = MergeContext::new(module_dir.clone(), "KSU".into());
        let modules = inventory::enumerate(&module_dir).unwrap();
        let root = Node::new_root("");

        let report = analyze(&root, &modules, &ctx);
        assert_eq!(report.diagnostics.len(), 1);
        assert!(report.diagnostics[0].message.contains("dead") || report.diagnostics[0].message.contains("Dead"));
    }

    #[test]
    fn scanner_tree_round_trips_through_planner() {
        let tmp = tempfile::tempdir().unwrap();
        let mod_a = tmp.path().join("modA/system");
        let conf = mod_a.join("etc/a.conf");
        fs::create_dir_all(conf.parent().unwrap()).unwrap();
        fs::write(&conf, "a").unwrap();

        let mut ctx = MergeContext::default();
        let mut root = Node::new_root("");
        let mut system = Node::new_root("system");
        scanner::scan_into(&mut ctx, &mut system, &mod_a, "modA").unwrap();
        root.append_child(system).unwrap();

        let plan = emit(&root, &ctx);
        assert!(plan.ops.iter().any(|op| matches!(
            op,
            MountOp::Bind { source, dest }
                if source == &conf && dest == Path::new("/system/etc/a.conf")
        )));
    }
}
