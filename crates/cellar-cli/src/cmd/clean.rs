//! Clean command

use std::path::Path;

use anyhow::{Context as _, Result};

use cellar_core::Reporter;
use cellar_core::pipeline::EXIT_SUCCESS;

use crate::cmd::list::keg_size;
use crate::ops::Context;
use crate::ui::theme::format_size;

/// Remove partial downloads and build directories kept from failed builds.
///
/// Verified cache entries are left alone.
pub async fn clean(quiet: bool, dry_run: bool) -> Result<i32> {
    let ctx = Context::load(None, quiet)?;
    let output = &ctx.output;
    let _lock = if dry_run {
        None
    } else {
        Some(ctx.installer.lock().await?)
    };

    let mut reclaimed = 0;
    if dry_run {
        output.info("Would remove partial downloads from the cache");
    } else {
        reclaimed += ctx
            .installer
            .cache()
            .prune()
            .context("Failed to prune cache")?;
    }

    let scratch = ctx.layout.scratch();
    for dir in scratch_dirs(&scratch)? {
        let size = keg_size(&dir);
        if dry_run {
            output.info(&format!("Would remove {} ({})", dir.display(), format_size(size)));
            continue;
        }
        std::fs::remove_dir_all(&dir)
            .with_context(|| format!("Failed to remove {}", dir.display()))?;
        reclaimed += size;
    }

    if !dry_run {
        output.success(&format!("Reclaimed {}", format_size(reclaimed)));
    }
    Ok(EXIT_SUCCESS)
}

/// Directories directly under the scratch root, sorted.
fn scratch_dirs(root: &Path) -> Result<Vec<std::path::PathBuf>> {
    let Ok(entries) = std::fs::read_dir(root) else {
        return Ok(Vec::new());
    };
    let mut dirs = Vec::new();
    for entry in entries {
        let entry = entry.with_context(|| format!("Failed to read {}", root.display()))?;
        if entry.file_type().is_ok_and(|t| t.is_dir()) {
            dirs.push(entry.path());
        }
    }
    dirs.sort();
    Ok(dirs)
}
