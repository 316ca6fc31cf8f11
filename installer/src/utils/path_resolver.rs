use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Schema dump location relative to the panel root. Used as the basepath marker.
const SCHEMA_MARKER: &str = "install/froxlor.sql";

/// Resolve deployment folder (absolute path)
pub fn resolve_deployment_folder() -> PathBuf {
    // Prefer the folder where the binary is running from
    if let Ok(exe_path) = std::env::current_exe() {
        if let Some(dir) = exe_path.parent() {
            return dir.to_path_buf();
        }
    }

    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

/// Walk up from `start` (at most 12 levels) looking for a directory containing `marker`.
fn find_upwards(start: &Path, marker: &str) -> Option<PathBuf> {
    let mut dir = start.to_path_buf();
    for _ in 0..12 {
        if dir.join(marker).exists() {
            return Some(dir);
        }
        match dir.parent() {
            Some(parent) => dir = parent.to_path_buf(),
            None => break,
        }
    }
    None
}

/// Resolve the panel installation root.
///
/// Order: explicit setting, then the nearest ancestor of the CWD or of the binary that
/// contains the schema dump, then the CWD itself.
pub fn resolve_basepath(configured: Option<&Path>) -> PathBuf {
    if let Some(path) = configured {
        return path.to_path_buf();
    }

    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    if let Some(found) = find_upwards(&cwd, SCHEMA_MARKER) {
        return found;
    }
    if let Some(found) = find_upwards(&resolve_deployment_folder(), SCHEMA_MARKER) {
        return found;
    }

    cwd
}

/// Resolve log folder (absolute path), creating it when needed.
///
/// Never inside the panel's web root: an explicit setting wins, otherwise an existing
/// `install_logs/` above the CWD, otherwise `install_logs/` next to the binary.
pub fn resolve_log_folder(configured: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = configured {
        std::fs::create_dir_all(path)
            .with_context(|| format!("Failed to create log folder {:?}", path))?;
        return Ok(path.to_path_buf());
    }

    if let Ok(cwd) = std::env::current_dir() {
        if let Some(parent) = find_upwards(&cwd, "install_logs") {
            return Ok(parent.join("install_logs"));
        }
    }

    let log_dir = resolve_deployment_folder().join("install_logs");
    std::fs::create_dir_all(&log_dir)
        .with_context(|| format!("Failed to create log folder {:?}", log_dir))?;
    Ok(log_dir)
}
