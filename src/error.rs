//! Errors for configuration and logging setup.
//!
//! Allocation paths never produce these: they report exhaustion as `None`.

use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
    ConfigRead { path: PathBuf, source: std::io::Error },
    ConfigWrite { path: PathBuf, source: std::io::Error },
    ConfigParse(toml::de::Error),
    ConfigSerialize(toml::ser::Error),
    ConfigInvalid(String),
    /// An environment override could not be parsed.
    EnvVar { name: &'static str, value: String },
    LogFile(String),
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::ConfigRead { path, source } => {
                write!(f, "Failed to read config {}: {}", path.display(), source)
            }
            Self::ConfigWrite { path, source } => {
                write!(f, "Failed to write config {}: {}", path.display(), source)
            }
            Self::ConfigParse(e) => write!(f, "Failed to parse config: {}", e),
            Self::ConfigSerialize(e) => write!(f, "Failed to serialize config: {}", e),
            Self::ConfigInvalid(msg) => write!(f, "Invalid config: {}", msg),
            Self::EnvVar { name, value } => write!(f, "Invalid value {:?} for {}", value, name),
            Self::LogFile(msg) => write!(f, "Failed to open log file: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ConfigRead { source, .. } | Self::ConfigWrite { source, .. } => Some(source),
            Self::ConfigParse(e) => Some(e),
            Self::ConfigSerialize(e) => Some(e),
            _ => None,
        }
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Self::ConfigParse(e)
    }
}

impl From<toml::ser::Error> for Error {
    fn from(e: toml::ser::Error) -> Self {
        Self::ConfigSerialize(e)
    }
}
