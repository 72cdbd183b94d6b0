// Engine settings read from the server configuration

use std::path::{Path, PathBuf};

use mangos_shared::config::Config;

/// Sub directory of the data dir holding the vmap files.
pub const VMAPS_DIR: &str = "vmaps";

#[derive(Debug, Clone, PartialEq)]
pub struct VMapConfig {
    pub data_dir: PathBuf,
    pub enable_line_of_sight: bool,
    pub enable_height: bool,
}

impl VMapConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            enable_line_of_sight: true,
            enable_height: true,
        }
    }

    /// Reads `DataDir`, `vmap.enableLOS` and `vmap.enableHeight`.
    pub fn from_config(config: &Config) -> Self {
        Self {
            data_dir: PathBuf::from(config.get_string_default("DataDir", ".")),
            enable_line_of_sight: config.get_bool_default("vmap.enableLOS", true),
            enable_height: config.get_bool_default("vmap.enableHeight", true),
        }
    }

    pub fn vmaps_dir(&self) -> PathBuf {
        self.data_dir.join(VMAPS_DIR)
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }
}

impl Default for VMapConfig {
    fn default() -> Self {
        Self::new(".")
    }
}
