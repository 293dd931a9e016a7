use anyhow::Context;
use govern_core::config::GovernConfig;
use govern_core::store::GovernStore;
use govern_core::{io, paths};
use std::path::Path;

pub fn run(root: &Path) -> anyhow::Result<()> {
    println!("Initializing governance data in: {}", root.display());

    let dir = paths::govern_dir(root);
    io::ensure_dir(&dir).with_context(|| format!("failed to create {}", dir.display()))?;

    if paths::config_path(root).exists() {
        println!("  exists:  {}", paths::CONFIG_FILE);
    } else {
        GovernConfig::default()
            .save(root)
            .context("failed to write config.yaml")?;
        println!("  created: {}", paths::CONFIG_FILE);
    }

    let existed = paths::db_path(root).exists();
    GovernStore::open_root(root).context("failed to open database")?;
    if existed {
        println!("  exists:  {}", paths::DB_FILE);
    } else {
        println!("  created: {}", paths::DB_FILE);
    }
    Ok(())
}
