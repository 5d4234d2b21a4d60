use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::warn;

/// Per-user config directory holding the cached TLS material, created if
/// missing. Falls back to a directory under the system temp dir when the
/// platform has no notion of a user config directory.
pub fn config_dir() -> Result<PathBuf> {
    let dir = match directories::ProjectDirs::from("", "", "httpshare") {
        Some(dirs) => dirs.config_dir().to_path_buf(),
        None => {
            warn!("no user config directory, using temp dir");
            std::env::temp_dir().join("httpshare")
        }
    };
    ensure_dir(&dir)?;
    Ok(dir)
}

/// Explicit directory if given, otherwise [`config_dir`].
pub fn resolve_config_dir(explicit: Option<&Path>) -> Result<PathBuf> {
    match explicit {
        Some(dir) => {
            ensure_dir(dir)?;
            Ok(dir.to_path_buf())
        }
        None => config_dir(),
    }
}

fn ensure_dir(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("create config dir {}", dir.display()))
}
