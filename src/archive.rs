use std::fs;
use std::path::Path;

use anyhow::Context;
use chrono::{DateTime, Local};
use tracing::{info, warn};

pub const HISTORY_FOLDER: &str = "history";
/// Extensions of earlier exports that get moved aside before a new run.
pub const ARCHIVED_EXTENSIONS: &[&str] = &["csv", "xlsx", "parquet"];

/// Moves earlier exports in `folder` into `folder/history`, renamed
/// `<stem>-<YYYY-MM-DD>.<ext>` after the file's creation date.
///
/// Both folders are created when missing. Returns how many files moved.
pub fn move_to_history(folder: &Path) -> anyhow::Result<usize> {
    let history = folder.join(HISTORY_FOLDER);
    fs::create_dir_all(&history)
        .with_context(|| format!("failed to create {}", history.display()))?;

    let mut moved = 0;
    for entry in fs::read_dir(folder)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let (Some(stem), Some(ext)) = (
            path.file_stem().and_then(|s| s.to_str()),
            path.extension().and_then(|s| s.to_str()),
        ) else {
            continue;
        };
        if !ARCHIVED_EXTENSIONS.contains(&ext) {
            continue;
        }

        let date = match created_on(&path) {
            Ok(date) => date,
            Err(err) => {
                warn!(file = %path.display(), error = %err, "skipping file without a timestamp");
                continue;
            }
        };
        let destination = history.join(format!("{stem}-{date}.{ext}"));
        fs::rename(&path, &destination)
            .with_context(|| format!("failed to move {}", path.display()))?;
        moved += 1;
    }
    if moved > 0 {
        info!(folder = %folder.display(), moved, "moved earlier exports to history");
    }
    Ok(moved)
}

/// Creation date, or modification date where the file system has none.
fn created_on(path: &Path) -> anyhow::Result<String> {
    let meta = fs::metadata(path)?;
    let time = meta.created().or_else(|_| meta.modified())?;
    Ok(DateTime::<Local>::from(time).format("%Y-%m-%d").to_string())
}
