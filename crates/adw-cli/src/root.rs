use std::path::{Path, PathBuf};

use adw_core::paths::ADW_DIR;

/// Resolve the ADW root directory.
///
/// Priority:
/// 1. `--root` flag / `ADW_ROOT` env var (passed in as `explicit`)
/// 2. Walk upward from `cwd` looking for `.adw/`
/// 3. Walk upward from `cwd` looking for `.git/`
/// 4. Fall back to `cwd`
pub fn resolve_root(explicit: Option<&Path>) -> PathBuf {
    if let Some(p) = explicit {
        return p.to_path_buf();
    }
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    find_root_from(&cwd)
}

fn find_root_from(start: &Path) -> PathBuf {
    for marker in [ADW_DIR, ".git"] {
        if let Some(dir) = start.ancestors().find(|d| d.join(marker).is_dir()) {
            return dir.to_path_buf();
        }
    }
    start.to_path_buf()
}
