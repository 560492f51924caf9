// ABOUTME: Utility functions for the slidefold application
// ABOUTME: Provides directory helpers, absolute paths and the atomic write used for build output

use crate::errors::{FoldError, Result};
use log::warn;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Ensure a directory exists, creating it if necessary
pub fn ensure_directory_exists(path: &Path) -> Result<()> {
    if !path.exists() {
        fs::create_dir_all(path).map_err(|e| FoldError::write(path, e))?;
    } else if !path.is_dir() {
        return Err(FoldError::ValidationError(format!(
            "Path exists but is not a directory: {:?}",
            path
        )));
    }
    Ok(())
}

/// Ensure a file's parent directory exists
pub fn ensure_parent_directory_exists(file_path: &Path) -> Result<()> {
    if let Some(parent) = file_path.parent() {
        if !parent.as_os_str().is_empty() {
            ensure_directory_exists(parent)?;
        }
    }
    Ok(())
}

/// Get the absolute path, canonicalizing the deepest existing ancestor so
/// paths that do not exist yet resolve the same way as existing ones
pub fn get_absolute_path(path: &Path) -> Result<PathBuf> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map_err(|e| {
                FoldError::ValidationError(format!(
                    "Failed to get absolute path for {:?}: {}",
                    path, e
                ))
            })?
            .join(path)
    };

    let mut missing = Vec::new();
    let mut existing = absolute.as_path();
    loop {
        if let Ok(canonical) = fs::canonicalize(existing) {
            let mut resolved = canonical;
            for part in missing.iter().rev() {
                resolved.push(part);
            }
            return Ok(resolved);
        }
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                missing.push(name.to_os_string());
                existing = parent;
            }
            _ => {
                return Err(FoldError::ValidationError(format!(
                    "Failed to get absolute path for {:?}",
                    path
                )))
            }
        }
    }
}

/// Hidden sibling path used while `path` is being written
pub fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "output".to_string());
    let tmp_name = format!(".{}.{}.tmp", name, uuid::Uuid::new_v4());
    match path.parent() {
        Some(parent) => parent.join(tmp_name),
        None => PathBuf::from(tmp_name),
    }
}

/// Whether `path` looks like a file produced by [`temp_sibling`]
pub fn is_temp_artifact(path: &Path) -> bool {
    path.file_name()
        .map(|n| n.to_string_lossy())
        .is_some_and(|n| n.starts_with('.') && n.ends_with(".tmp"))
}

/// Replace `path` with `contents` so readers see either the old or the new file
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    ensure_parent_directory_exists(path)?;
    let tmp = temp_sibling(path);

    let written = File::create(&tmp)
        .and_then(|mut file| {
            file.write_all(contents)?;
            file.sync_all()
        })
        .and_then(|_| fs::rename(&tmp, path));

    if let Err(e) = written {
        if tmp.exists() {
            if let Err(cleanup) = fs::remove_file(&tmp) {
                warn!("Failed to clean up temp file {:?}: {}", tmp, cleanup);
            }
        }
        return Err(FoldError::write(path, e));
    }
    Ok(())
}
