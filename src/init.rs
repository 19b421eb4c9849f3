//! `shopfloor init`: create the `.shopfloor/` directory.
//!
//! ```text
//! .shopfloor/
//! ├── shopfloor.toml   # Configuration (defaults written on first init)
//! └── shopfloor.db     # SQLite database, migrated on open
//! ```

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::config::{CONFIG_DIR, CONFIG_FILE, ShopfloorConfig, ShopfloorToml};
use crate::shop::server::open_database;

/// Result of initializing a shopfloor project.
#[derive(Debug)]
pub struct InitResult {
    /// Path to the `.shopfloor` directory
    pub config_dir: PathBuf,
    /// Database file that was opened (and migrated)
    pub db_path: PathBuf,
    /// Whether the directory was newly created (false if it already existed)
    pub created: bool,
}

/// Initialize a project in `project_dir`. Existing files are kept; missing
/// ones are created.
pub fn init_project(project_dir: &Path) -> Result<InitResult> {
    let config_dir = get_config_dir(project_dir);
    let created = !config_dir.exists();
    std::fs::create_dir_all(&config_dir)
        .with_context(|| format!("Failed to create directory: {}", config_dir.display()))?;

    let config_path = config_dir.join(CONFIG_FILE);
    if !config_path.exists() {
        ShopfloorToml::default().save(&config_path)?;
    }

    let config = ShopfloorConfig::load(project_dir)?;
    let db_path = config.db_path();
    open_database(&db_path)?;

    Ok(InitResult {
        config_dir,
        db_path,
        created,
    })
}

pub fn is_initialized(project_dir: &Path) -> bool {
    get_config_dir(project_dir).exists()
}

pub fn get_config_dir(project_dir: &Path) -> PathBuf {
    project_dir.join(CONFIG_DIR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_init_creates_config_and_database() {
        let dir = tempdir().unwrap();
        assert!(!is_initialized(dir.path()));

        let result = init_project(dir.path()).unwrap();
        assert!(result.created);
        assert_eq!(result.config_dir, dir.path().join(".shopfloor"));
        assert!(result.config_dir.join("shopfloor.toml").is_file());
        assert!(result.db_path.is_file());
        assert!(is_initialized(dir.path()));
    }

    #[test]
    fn test_init_twice_keeps_existing_config() {
        let dir = tempdir().unwrap();
        init_project(dir.path()).unwrap();

        let config_path = dir.path().join(".shopfloor/shopfloor.toml");
        std::fs::write(&config_path, "[server]\nport = 9000\n").unwrap();

        let again = init_project(dir.path()).unwrap();
        assert!(!again.created);
        let content = std::fs::read_to_string(&config_path).unwrap();
        assert!(content.contains("9000"));
    }
}
