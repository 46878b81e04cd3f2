// Copyright 2026 Meta-Magic Mount Developers
// SPDX-License-Identifier: GPL-3.0-or-later

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::defs;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_moduledir")]
    pub moduledir: PathBuf,
    #[serde(default = "default_mountsource")]
    pub mountsource: String,
    #[serde(default, deserialize_with = "deserialize_partitions_flexible")]
    pub partitions: Vec<String>,
    #[serde(default = "default_stage_dir")]
    pub stage_dir: String,
    #[serde(default)]
    pub enable_unmountable: bool,
}

fn default_moduledir() -> PathBuf {
    PathBuf::from(defs::MODULES_DIR)
}

fn default_mountsource() -> String {
    defs::DEFAULT_MOUNT_SOURCE.to_string()
}

fn default_stage_dir() -> String {
    defs::DEFAULT_STAGE_DIR.to_string()
}

fn deserialize_partitions_flexible<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrVec {
        String(String),
        Vec(Vec<String>),
    }

    match StringOrVec::deserialize(deserializer)? {
        StringOrVec::Vec(v) => Ok(v),
        StringOrVec::String(s) => Ok(s
            .split(',')
            .map(|item| item.trim().to_string())
            .filter(|item| !item.is_empty())
            .collect()),
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            moduledir: default_moduledir(),
            mountsource: default_mountsource(),
            partitions: Vec::new(),
            stage_dir: default_stage_dir(),
            enable_unmountable: false,
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).context("failed to read config file")?;

        let config: Config = toml::from_str(&content).context("failed to parse config file")?;

        Ok(config)
    }

    pub fn load_default() -> Result<Self> {
        Self::from_file(defs::CONFIG_FILE)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self).context("failed to serialize config")?;

        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent).context("failed to create config directory")?;
        }

        fs::write(path.as_ref(), content).context("failed to write config file")?;

        Ok(())
    }

    pub fn merge_with_cli(
        &mut self,
        moduledir: Option<PathBuf>,
        mountsource: Option<String>,
        partitions: Vec<String>,
    ) {
        if let Some(dir) = moduledir {
            self.moduledir = dir;
        }

        if let Some(source) = mountsource {
            self.mountsource = source;
        }

        if !partitions.is_empty() {
            self.partitions = partitions;
        }
    }
}
