//! Config path resolution for the `muse` binary
//!
//! Order: first positional argument, then `MUSE_CONFIG_PATH`, then the
//! path shipped in the repository.

use std::path::PathBuf;

/// Environment variable overriding the config location
pub const CONFIG_PATH_ENV: &str = "MUSE_CONFIG_PATH";

/// Which config file a binary wants when nothing overrides it
#[derive(Debug, Clone)]
pub enum ConfigType {
    /// `config/muse.yaml`
    Gateway,
    Custom(String),
}

impl ConfigType {
    pub fn default_path(&self) -> &str {
        match self {
            ConfigType::Gateway => "config/muse.yaml",
            ConfigType::Custom(path) => path.as_str(),
        }
    }

    /// Every config type shares one override variable
    pub fn env_var_name(&self) -> &str {
        CONFIG_PATH_ENV
    }
}

/// `MUSE_CONFIG_PATH` if set, else the type's default path
///
/// ```
/// use muse::bin_common::{load_config_from_env, ConfigType};
///
/// let path = load_config_from_env(ConfigType::Gateway);
/// assert!(path.ends_with("muse.yaml") || std::env::var("MUSE_CONFIG_PATH").is_ok());
/// ```
pub fn load_config_from_env(config_type: ConfigType) -> PathBuf {
    match std::env::var(config_type.env_var_name()) {
        Ok(path) if !path.trim().is_empty() => PathBuf::from(path),
        _ => PathBuf::from(config_type.default_path()),
    }
}

/// Process arguments without the program name
pub fn parse_args() -> Vec<String> {
    std::env::args().skip(1).collect()
}

pub fn config_path_from_args(args: &[String], config_type: ConfigType) -> PathBuf {
    args.first()
        .map(PathBuf::from)
        .unwrap_or_else(|| load_config_from_env(config_type))
}
