pub mod config;
pub mod connection;
pub mod error;
pub mod file;
pub mod fs;
mod instrument;
pub mod logging;
pub mod metrics;
pub mod provider;

pub use connection::{ConnectionManager, ConnectionStatus};
pub use error::{Error, Result};
pub use file::{File, OpenOptions};
pub use fs::CloudFileSystem;
pub use provider::{DirListing, ObjectInfo, StorageProvider, UploadMode};
