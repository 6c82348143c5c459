use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Get the DockSing configuration directory (~/.docksing)
pub fn get_config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Could not find home directory")?;
    let config_dir = home.join(".docksing");
    std::fs::create_dir_all(&config_dir)?;
    Ok(config_dir)
}

/// Get temporary directory for file transfers
pub fn get_temp_dir() -> Result<PathBuf> {
    let temp_dir = get_config_dir()?.join("tmp");
    std::fs::create_dir_all(&temp_dir)?;
    Ok(temp_dir)
}

/// Scratch path for an image archive awaiting upload
pub fn temp_archive_path(digest: &str) -> Result<PathBuf> {
    let short = &digest[..digest.len().min(12)];
    Ok(get_temp_dir()?.join(format!(
        "docksing-{}-{}-{}.tar",
        short,
        std::process::id(),
        chrono::Utc::now().timestamp()
    )))
}

/// Expand a leading `~/` to the home directory
pub fn expand_home(path: &str) -> PathBuf {
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Resolve a host path against `base`, expanding `~/`. The path does not
/// need to exist.
pub fn absolutize(path: &str, base: &Path) -> PathBuf {
    let expanded = expand_home(path);
    let joined = if expanded.is_absolute() {
        expanded
    } else {
        base.join(expanded)
    };
    normalize(&joined)
}

/// Lexically drop `.` components and fold `..` into their parent
fn normalize(path: &Path) -> PathBuf {
    use std::path::Component;

    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other),
        }
    }
    out
}
