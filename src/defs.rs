// Copyright 2026 Meta-Magic Mount Developers
// SPDX-License-Identifier: GPL-3.0-or-later

pub const MODULES_DIR: &str = "/data/adb/modules";
pub const DEFAULT_MOUNT_SOURCE: &str = "KSU";
pub const CONFIG_FILE: &str = "/data/adb/meta-magic/config.toml";
pub const RUN_DIR: &str = "/data/adb/meta-magic/run";
pub const STATE_FILE: &str = "/data/adb/meta-magic/run/state.json";
pub const DAEMON_LOG_FILE: &str = "/data/adb/meta-magic/run/daemon.log";
pub const DEFAULT_STAGE_DIR: &str = "/debug_ramdisk";

pub const DISABLE_FILE_NAME: &str = "disable";
pub const REMOVE_FILE_NAME: &str = "remove";
pub const SKIP_MOUNT_FILE_NAME: &str = "skip_mount";

pub const REPLACE_DIR_XATTR: &str = "trusted.overlay.opaque";
pub const REPLACE_DIR_FILE_NAME: &str = ".replace";

/// Built-in partitions, in processing order. The flag says whether
/// promotion to `/` requires `/system/<name>` to be a symlink.
pub const BUILTIN_PARTITIONS: &[(&str, bool)] = &[
    ("vendor", true),
    ("system_ext", true),
    ("product", true),
    ("odm", false),
];

/// First path segments that can never be registered as extra partitions.
/// The tail four are built-ins and belong to the reconciler instead.
pub const EXTRA_PART_BLACKLIST: &[&str] = &[
    "bin",
    "etc",
    "data",
    "data_mirror",
    "sdcard",
    "tmp",
    "dev",
    "sys",
    "mnt",
    "proc",
    "d",
    "test",
    "product",
    "vendor",
    "system_ext",
    "odm",
];
