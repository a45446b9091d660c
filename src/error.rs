use std::time::Duration;

use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Configuration parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{operation} failed for '{path}': {source}")]
    Backend {
        operation: &'static str,
        path: String,
        #[source]
        source: BoxError,
    },

    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Directory not empty: {0}")]
    DirectoryNotEmpty(String),

    #[error("Is a directory: {0}")]
    IsADirectory(String),

    #[error("Not a directory: {0}")]
    NotADirectory(String),

    #[error("Empty file name")]
    EmptyName,

    #[error("Source and destination are the same: {0}")]
    SameSourceDestination(String),

    #[error("Cannot rename '{from}' to '{to}': incompatible destination")]
    IncompatibleRename { from: String, to: String },

    #[error("Invalid offset: {0}")]
    InvalidOffset(i64),

    #[error("Invalid whence: {0}")]
    InvalidWhence(i32),

    #[error("File already closed: {0}")]
    FileClosed(String),

    #[error("File opened read-only: {0}")]
    ReadOnly(String),

    #[error("File opened write-only: {0}")]
    WriteOnly(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn backend(
        operation: &'static str,
        path: impl Into<String>,
        source: impl Into<BoxError>,
    ) -> Self {
        Error::Backend {
            operation,
            path: path.into(),
            source: source.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, Error::AlreadyExists(_))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout { .. })
    }

    pub fn is_config(&self) -> bool {
        matches!(self, Error::Config(_) | Error::ConfigParse(_))
    }

    /// Converts an IO error into the stable variant for `path`, keeping the
    /// raw error only when no sentinel fits.
    pub fn from_io(operation: &'static str, path: &str, err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Error::NotFound(path.to_owned()),
            std::io::ErrorKind::AlreadyExists => Error::AlreadyExists(path.to_owned()),
            _ => Error::backend(operation, path, err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_map_to_sentinels() {
        let err = Error::from_io(
            "read",
            "a/b.txt",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert!(err.is_not_found());

        let err = Error::from_io(
            "mkdir",
            "a",
            std::io::Error::new(std::io::ErrorKind::AlreadyExists, "exists"),
        );
        assert!(err.is_already_exists());

        let err = Error::from_io(
            "write",
            "a",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(matches!(err, Error::Backend { operation: "write", .. }));
        assert!(err.to_string().contains("'a'"));
    }
}
