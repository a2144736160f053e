use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::{DEFAULT_RENDEZVOUS_ADDRESS, DEFAULT_RENDEZVOUS_PORT};

pub const CONFIG_FILE_NAME: &str = ".portal.yml";

/// On-disk configuration. Lives in the home directory and is created
/// with defaults on first run.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub rendezvous_address: String,
    pub rendezvous_port: u16,
    pub verbose: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            rendezvous_address: DEFAULT_RENDEZVOUS_ADDRESS.to_string(),
            rendezvous_port: DEFAULT_RENDEZVOUS_PORT,
            verbose: false,
        }
    }
}

impl Config {
    pub fn path() -> Result<PathBuf> {
        let home = dirs::home_dir().ok_or_else(|| {
            Error::Io(io::Error::new(
                io::ErrorKind::NotFound,
                "home directory not found",
            ))
        })?;
        Ok(home.join(CONFIG_FILE_NAME))
    }

    pub fn load_or_init() -> Result<Config> {
        Self::load_or_init_at(&Self::path()?)
    }

    /// Reads the config file, writing the embedded defaults first if it
    /// does not exist yet.
    pub fn load_or_init_at(path: &Path) -> Result<Config> {
        if !path.exists() {
            let config = Config::default();
            let text = serde_yaml::to_string(&config).map_err(|_| Error::Malformed)?;
            fs::write(path, text)?;
            debug!("wrote default config to {}", path.display());
            return Ok(config);
        }
        let text = fs::read_to_string(path)?;
        serde_yaml::from_str(&text).map_err(|_| Error::Malformed)
    }
}
