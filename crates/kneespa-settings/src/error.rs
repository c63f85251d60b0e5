//! Error types for the settings crate.

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SettingsError {
    /// A value failed validation
    #[error("Invalid setting '{key}': {reason}")]
    InvalidSetting { key: String, reason: String },

    /// Extension other than `.json` or `.toml`
    #[error("Unsupported config format: {0}")]
    UnsupportedFormat(String),

    #[error("Config directory error: {0}")]
    ConfigDirectory(String),

    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// File exists but is not valid JSON/TOML for a config
    #[error("{}: {message}", path.display())]
    Parse { path: PathBuf, message: String },

    #[error("Could not serialize config: {0}")]
    Serialize(String),
}

impl SettingsError {
    pub fn invalid(key: impl Into<String>, reason: impl Into<String>) -> Self {
        SettingsError::InvalidSetting {
            key: key.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn io(path: &Path) -> impl FnOnce(io::Error) -> Self + '_ {
        move |source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn parse(path: &Path) -> impl FnOnce(String) -> Self + '_ {
        move |message| SettingsError::Parse {
            path: path.to_path_buf(),
            message,
        }
    }
}

pub type SettingsResult<T> = Result<T, SettingsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = SettingsError::invalid("connection.baud_rate", "must be > 0");
        assert_eq!(
            err.to_string(),
            "Invalid setting 'connection.baud_rate': must be > 0"
        );

        let path = Path::new("/etc/kneespa.toml");
        let err = SettingsError::io(path)(io::Error::new(io::ErrorKind::NotFound, "gone"));
        assert_eq!(err.to_string(), "/etc/kneespa.toml: gone");

        let err = SettingsError::parse(path)("expected `=`".to_string());
        assert!(matches!(err, SettingsError::Parse { .. }));
    }
}
