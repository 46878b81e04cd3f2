// Copyright 2026 Meta-Magic Mount Developers
// SPDX-License-Identifier: GPL-3.0-or-later

use std::{
    fs,
    io::{BufRead, BufReader},
    path::{Path, PathBuf},
    sync::OnceLock,
};

use anyhow::{Context, Result};
use regex_lite::Regex;
use serde::Serialize;

use crate::{core::context::is_module_disabled, utils};

static MODULE_PROP_REGEX: OnceLock<Regex> = OnceLock::new();

/// One enabled module root, in directory listing order. The listing
/// order is what defines merge precedence for the whole run.
#[derive(Debug, Clone)]
pub struct ModuleSource {
    pub name: String,
    pub path: PathBuf,
}

/// Enumerates `(module_name, module_root)` pairs under `module_dir`,
/// keeping directory entries that are not disabled. The underlying
/// readdir order is preserved.
pub fn enumerate(module_dir: &Path) -> Result<Vec<ModuleSource>> {
    let entries = module_dir
        .read_dir()
        .with_context(|| format!("opendir {}", module_dir.display()))?;

    let mut modules = Vec::new();
    for entry in entries {
        let entry = entry?;
        let path = entry.path();

        if !path.is_dir() {
            log::debug!("skip non-dir entry {}", path.display());
            continue;
        }

        if is_module_disabled(&path) {
            log::info!("module {} is disabled", path.display());
            continue;
        }

        let name = entry.file_name().to_string_lossy().to_string();
        modules.push(ModuleSource { name, path });
    }

    Ok(modules)
}

#[derive(Default, Serialize)]
pub struct ModuleProp {
    pub name: String,
    pub version: String,
    pub author: String,
    pub description: String,
}

impl From<&Path> for ModuleProp {
    fn from(path: &Path) -> Self {
        let mut prop = ModuleProp::default();
        let re = MODULE_PROP_REGEX.get_or_init(|| {
            Regex::new(r"^([a-zA-Z0-9_.]+)=(.*)$").expect("Failed to compile module prop regex")
        });

        if let Ok(file) = fs::File::open(path) {
            for line in BufReader::new(file).lines().map_while(Result::ok) {
                if let Some(caps) = re.captures(line.trim()) {
                    let k = caps.get(1).map_or("", |m| m.as_str());
                    let v = caps.get(2).map_or("", |m| m.as_str());

                    match k {
                        "name" => prop.name = v.to_string(),
                        "version" => prop.version = v.to_string(),
                        "author" => prop.author = v.to_string(),
                        "description" => prop.description = v.to_string(),
                        _ => {}
                    }
                }
            }
        }
        prop
    }
}

#[derive(Serialize)]
struct ModuleInfo {
    id: String,
    name: String,
    version: String,
    author: String,
    description: String,
    is_mounted: bool,
}

/// Prints the enabled module inventory as a JSON array, flagging the
/// modules the last run actually projected.
pub fn print_list(module_dir: &Path) -> Result<()> {
    let modules = enumerate(module_dir)?;
    let state = crate::core::state::RuntimeState::load().unwrap_or_default();

    let infos: Vec<ModuleInfo> = modules
        .into_iter()
        .map(|m| {
            if let Err(e) = utils::validate_module_id(&m.name) {
                log::warn!("{e:#}");
            }
            let prop = ModuleProp::from(m.path.join("module.prop").as_path());
            ModuleInfo {
                is_mounted: state.mounted_modules.iter().any(|id| id == &m.name),
                id: m.name,
                name: prop.name,
                version: prop.version,
                author: prop.author,
                description: prop.description,
            }
        })
        .collect();

    println!("{}", serde_json::to_string(&infos)?);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn enumerate_filters_disabled_and_non_dirs() {
        let dir = tempfile::tempdir().unwrap();

        fs::create_dir(dir.path().join("modA")).unwrap();
        fs::create_dir(dir.path().join("modB")).unwrap();
        fs::write(dir.path().join("modB").join("disable"), b"").unwrap();
        fs::write(dir.path().join("stray.txt"), b"").unwrap();

        let modules = enumerate(dir.path()).unwrap();
        let names: Vec<_> = modules.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["modA"]);
    }

    #[test]
    fn enumerate_fails_on_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert!(enumerate(&dir.path().join("nope")).is_err());
    }

    #[test]
    fn module_prop_parsed_line_by_line() {
        let dir = tempfile::tempdir().unwrap();
        let prop_file = dir.path().join("module.prop");
        fs::write(
            &prop_file,
            "id=mymod\nname=My Module\nversion=v1.2\nauthor=someone\njunk line\n",
        )
        .unwrap();

        let prop = ModuleProp::from(prop_file.as_path());
        assert_eq!(prop.name, "My Module");
        assert_eq!(prop.version, "v1.2");
        assert_eq!(prop.author, "someone");
        assert_eq!(prop.description, "");
    }
}
