// Error types for vmap file loading

use std::path::PathBuf;

use thiserror::Error;

/// Outcome of map/tile load, unload and existence checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadResult {
    Success,
    DisabledInConfig,
    FileNotFound,
    VersionMismatch,
    ReadFromFileFailed,
}

impl LoadResult {
    pub fn is_success(self) -> bool {
        self == LoadResult::Success
    }
}

impl std::fmt::Display for LoadResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            LoadResult::Success => "success",
            LoadResult::DisabledInConfig => "disabled in config",
            LoadResult::FileNotFound => "file not found",
            LoadResult::VersionMismatch => "version mismatch",
            LoadResult::ReadFromFileFailed => "read from file failed",
        };
        f.write_str(text)
    }
}

/// Low level failure while reading or writing a vmap file.
#[derive(Error, Debug)]
pub enum VmapError {
    #[error("file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("wrong file header, expected {expected:?}, found {found:?}")]
    InvalidMagic { expected: String, found: String },

    #[error("chunk mismatch: expected {expected:?}, found {found:?}")]
    ChunkMismatch { expected: String, found: String },

    #[error("malformed vmap data: {reason}")]
    Format { reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl VmapError {
    pub fn format(reason: impl Into<String>) -> Self {
        VmapError::Format { reason: reason.into() }
    }

    /// Maps a low level failure onto the public load taxonomy.
    pub fn load_result(&self) -> LoadResult {
        match self {
            VmapError::FileNotFound(_) => LoadResult::FileNotFound,
            VmapError::InvalidMagic { .. } => LoadResult::VersionMismatch,
            VmapError::Io(err) if err.kind() == std::io::ErrorKind::NotFound => {
                LoadResult::FileNotFound
            }
            _ => LoadResult::ReadFromFileFailed,
        }
    }
}
