//! Configuration loading and root folder resolution
//!
//! The root folder holds the SQLite database, the schema contract file and the
//! pipeline thresholds file. Resolution priority:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. OS-dependent compiled default (fallback)

use crate::{Error, Result};
use std::path::{Path, PathBuf};

/// Environment variable naming the root folder
pub const ROOT_FOLDER_ENV: &str = "CAVEAT_ROOT_FOLDER";

/// Database file name inside the root folder
pub const DATABASE_FILE: &str = "caveat.db";

/// Schema contract file name inside the root folder
pub const CONTRACT_FILE: &str = "contract.toml";

/// Pipeline thresholds file name inside the root folder
pub const CONFIG_FILE: &str = "caveat.toml";

/// Resolve the root folder following the 4-tier priority order
pub fn resolve_root_folder(cli_arg: Option<&Path>) -> PathBuf {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(ROOT_FOLDER_ENV) {
        return PathBuf::from(path);
    }

    // Priority 3: TOML config file pointing elsewhere
    if let Ok(config_path) = locate_config_file() {
        if let Ok(toml_content) = std::fs::read_to_string(&config_path) {
            if let Ok(config) = toml::from_str::<toml::Value>(&toml_content) {
                if let Some(root_folder) = config.get("root_folder").and_then(|v| v.as_str()) {
                    return PathBuf::from(root_folder);
                }
            }
        }
    }

    // Priority 4: OS-dependent compiled default
    default_root_folder()
}

/// Get default configuration file path for the platform
fn locate_config_file() -> Result<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join("caveat").join("config.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Ok(path);
        }
    }
    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc/caveat/config.toml");
        if system_config.exists() {
            return Ok(system_config);
        }
    }
    Err(Error::Config("No config file found".to_string()))
}

/// Get OS-dependent default root folder path
fn default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("caveat"))
        .unwrap_or_else(|| PathBuf::from("./caveat_data"))
}

/// Create the root folder if missing
pub fn ensure_root_folder(root: &Path) -> Result<()> {
    if !root.exists() {
        std::fs::create_dir_all(root)?;
        tracing::info!("Created root folder: {}", root.display());
    }
    Ok(())
}

/// Database path inside the root folder
pub fn database_path(root: &Path) -> PathBuf {
    root.join(DATABASE_FILE)
}

/// Default schema contract path inside the root folder
pub fn contract_path(root: &Path) -> PathBuf {
    root.join(CONTRACT_FILE)
}

/// Default pipeline thresholds path inside the root folder
pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_arg_wins_over_environment() {
        let resolved = resolve_root_folder(Some(Path::new("/tmp/caveat-cli-arg")));
        assert_eq!(resolved, PathBuf::from("/tmp/caveat-cli-arg"));
    }

    #[test]
    fn derived_paths_live_inside_root() {
        let root = Path::new("/data/caveat");
        assert_eq!(database_path(root), PathBuf::from("/data/caveat/caveat.db"));
        assert_eq!(contract_path(root), PathBuf::from("/data/caveat/contract.toml"));
        assert_eq!(config_path(root), PathBuf::from("/data/caveat/caveat.toml"));
    }
}
