use std::path::{Path, PathBuf};

use govern_core::paths::GOVERN_DIR;

/// Resolve the data root.
///
/// Priority:
/// 1. `--root` flag / `GOVERN_ROOT` env var (passed in as `explicit`)
/// 2. Walk upward from the cwd looking for `.govern/`
/// 3. Fall back to the cwd
pub fn resolve_root(explicit: Option<&Path>) -> PathBuf {
    if let Some(p) = explicit {
        return p.to_path_buf();
    }
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    find_govern_dir(&cwd).unwrap_or(cwd)
}

fn find_govern_dir(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .find(|dir| dir.join(GOVERN_DIR).is_dir())
        .map(Path::to_path_buf)
}
