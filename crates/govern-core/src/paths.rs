use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Directory constants
// ---------------------------------------------------------------------------

pub const GOVERN_DIR: &str = ".govern";
pub const CONFIG_FILE: &str = ".govern/config.yaml";
pub const DB_FILE: &str = ".govern/governance.redb";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn govern_dir(root: &Path) -> PathBuf {
    root.join(GOVERN_DIR)
}

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

pub fn db_path(root: &Path) -> PathBuf {
    root.join(DB_FILE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_live_under_govern_dir() {
        let root = Path::new("/srv/acme");
        assert_eq!(config_path(root), PathBuf::from("/srv/acme/.govern/config.yaml"));
        assert!(db_path(root).starts_with(govern_dir(root)));
    }
}
