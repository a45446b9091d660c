use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{Error, Result};

/// What a write does when its parent directories cannot be materialized.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ParentDirPolicy {
    /// Log the failure and attempt the write anyway.
    #[default]
    BestEffort,
    /// Abort the write with the directory error.
    Strict,
}

#[derive(Debug, Clone, Deserialize)]
pub struct S3Config {
    pub bucket: String,
    #[serde(default = "default_region")]
    pub region: String,
    pub endpoint: Option<String>,
    pub access_key_id: String,
    pub secret_access_key: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LocalConfig {
    pub root: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BackendConfig {
    S3(S3Config),
    Local(LocalConfig),
}

/// Timeouts and retry cadence shared by every backend.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FsConfig {
    pub connect_timeout_secs: u64,
    pub operation_timeout_secs: u64,
    pub retry_interval_secs: u64,
    pub parent_directories: ParentDirPolicy,
}

impl Default for FsConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 10,
            operation_timeout_secs: 30,
            retry_interval_secs: 60,
            parent_directories: ParentDirPolicy::BestEffort,
        }
    }
}

impl FsConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.connect_timeout_secs == 0 {
            return Err(Error::Config("connect_timeout_secs must be positive".to_string()));
        }
        if self.operation_timeout_secs == 0 {
            return Err(Error::Config("operation_timeout_secs must be positive".to_string()));
        }
        if self.retry_interval_secs == 0 {
            return Err(Error::Config("retry_interval_secs must be positive".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(rename = "log_level")]
    pub loglevel: Option<String>,
    #[serde(default)]
    pub filesystem: FsConfig,
    pub backend: BackendConfig,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.filesystem.validate()?;
        match &self.backend {
            BackendConfig::S3(s3) => {
                if s3.bucket.trim().is_empty() {
                    return Err(Error::Config("s3 bucket name is empty".to_string()));
                }
                if s3.access_key_id.is_empty() || s3.secret_access_key.is_empty() {
                    return Err(Error::Config(format!(
                        "s3 credentials missing for bucket '{}'",
                        s3.bucket
                    )));
                }
            }
            BackendConfig::Local(local) => {
                if local.root.as_os_str().is_empty() {
                    return Err(Error::Config("local root path is empty".to_string()));
                }
            }
        }
        Ok(())
    }

    pub fn loglevel(&self) -> &str {
        self.loglevel.as_deref().unwrap_or("info")
    }
}

fn default_region() -> String {
    "us-east-1".to_string()
}
