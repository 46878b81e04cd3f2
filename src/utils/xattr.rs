// Copyright 2026 Meta-Magic Mount Developers
// SPDX-License-Identifier: GPL-3.0-or-later

use std::path::Path;

use anyhow::Result;
#[cfg(linux_like)]
use anyhow::Context;
#[cfg(linux_like)]
use extattr::{Flags as XattrFlags, lgetxattr, lsetxattr};

use crate::defs::{REPLACE_DIR_FILE_NAME, REPLACE_DIR_XATTR};

const SELINUX_XATTR: &str = "security.selinux";

/// A directory is opaque when it carries `trusted.overlay.opaque=y` or
/// ships a `.replace` sentinel at its top level.
pub fn dir_is_opaque(path: &Path) -> bool {
    #[cfg(linux_like)]
    if let Ok(value) = lgetxattr(path, REPLACE_DIR_XATTR)
        && value == b"y"
    {
        return true;
    }

    path.join(REPLACE_DIR_FILE_NAME).exists()
}

pub fn set_overlay_opaque<P: AsRef<Path>>(path: P) -> Result<()> {
    #[cfg(linux_like)]
    lsetxattr(
        path.as_ref(),
        REPLACE_DIR_XATTR,
        b"y",
        XattrFlags::empty(),
    )?;
    Ok(())
}

pub fn lsetfilecon<P: AsRef<Path>>(path: P, con: &str) -> Result<()> {
    #[cfg(linux_like)]
    if let Err(e) = lsetxattr(
        path.as_ref(),
        SELINUX_XATTR,
        con.as_bytes(),
        XattrFlags::empty(),
    ) {
        let io_err = std::io::Error::from(e);
        log::debug!(
            "lsetfilecon: {} -> {} failed: {}",
            path.as_ref().display(),
            con,
            io_err
        );
    }
    Ok(())
}

#[cfg(linux_like)]
pub fn lgetfilecon<P: AsRef<Path>>(path: P) -> Result<String> {
    let con = lgetxattr(path.as_ref(), SELINUX_XATTR).with_context(|| {
        format!(
            "Failed to get SELinux context for {}",
            path.as_ref().display()
        )
    })?;
    let con_str = String::from_utf8_lossy(&con).trim_matches('\0').to_string();

    Ok(con_str)
}

#[cfg(not(linux_like))]
pub fn lgetfilecon<P: AsRef<Path>>(_path: P) -> Result<String> {
    unimplemented!();
}
