//! Stove configuration.
//!
//! A config file holds one table per profile; the profile is picked by name
//! (default `main`):
//!
//! ```toml
//! [main]
//! host = "localhost"
//! port = 8000
//! workers = 1
//! timeout = 1.0
//! command = ["python", "app.py", "--host", "{host}", "--port", "{port}"]
//! build = ["cargo", "build"]
//! ignore = ["target", "node_modules"]
//! ```

use crate::error::{Result, StoveError};
use crate::rotation::addr::Address;
use crate::rotation::supervisor::WorkerEntry;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_HOST: &str = "localhost";
const DEFAULT_PORT: u16 = 8000;
const DEFAULT_TIMEOUT_SECS: f64 = 1.0;
const DEFAULT_DEBOUNCE_MS: u64 = 100;
const DEFAULT_MAX_PORT_ATTEMPTS: u32 = 64;
const DEFAULT_PROBE_TIMEOUT_MS: u64 = 200;
const DEFAULT_CLIENT_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoveConfig {
    /// Host for both the relay listener and the workers
    pub host: String,
    /// Fixed port clients connect to
    pub port: u16,
    /// Number of worker slots
    pub workers: usize,
    /// Grace period in seconds before a retiring worker is killed
    pub timeout: f64,
    /// Worker argv; `{host}` and `{port}` are substituted at spawn time
    pub command: Vec<String>,
    pub env: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
    /// Optional argv run before every rotation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build: Option<Vec<String>>,
    pub watch_dir: PathBuf,
    pub recursive: bool,
    pub watch_moved: bool,
    pub watch_created: bool,
    pub watch_deleted: bool,
    pub watch_modified: bool,
    pub watch_closed: bool,
    /// Path components the watcher never reacts to
    pub ignore: Vec<String>,
    pub debounce_ms: u64,
    pub max_port_attempts: u32,
    pub probe_timeout_ms: u64,
    /// How long the relay waits on a client that has not finished its request
    pub client_timeout_ms: u64,
}

impl Default for StoveConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            workers: 1,
            timeout: DEFAULT_TIMEOUT_SECS,
            command: Vec::new(),
            env: BTreeMap::new(),
            working_dir: None,
            build: None,
            watch_dir: PathBuf::from("."),
            recursive: true,
            watch_moved: true,
            watch_created: true,
            watch_deleted: true,
            watch_modified: true,
            watch_closed: true,
            ignore: vec![
                "target".to_string(),
                "node_modules".to_string(),
                "__pycache__".to_string(),
            ],
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            max_port_attempts: DEFAULT_MAX_PORT_ATTEMPTS,
            probe_timeout_ms: DEFAULT_PROBE_TIMEOUT_MS,
            client_timeout_ms: DEFAULT_CLIENT_TIMEOUT_MS,
        }
    }
}

impl StoveConfig {
    /// Load profile `profile` from the TOML file at `path`.
    pub fn from_file(path: &Path, profile: &str) -> Result<Self> {
        tracing::trace!(path = %path.display(), profile = %profile, "Loading config");
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content, profile).map_err(|e| match e {
            StoveError::ProfileNotFound { name, .. } => StoveError::ProfileNotFound {
                name,
                path: path.display().to_string(),
            },
            other => other,
        })
    }

    pub fn from_toml(content: &str, profile: &str) -> Result<Self> {
        let mut profiles: BTreeMap<String, StoveConfig> = toml::from_str(content)?;
        let config = profiles
            .remove(profile)
            .ok_or_else(|| StoveError::ProfileNotFound {
                name: profile.to_string(),
                path: "<inline>".to_string(),
            })?;
        let config = config.normalized();
        config.validate()?;
        Ok(config)
    }

    /// `localhost` resolves to IPv4 loopback so probes and binds agree.
    pub fn normalized(mut self) -> Self {
        if self.host == "localhost" {
            self.host = "127.0.0.1".to_string();
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(StoveError::Config("workers must be at least 1".into()));
        }
        if self.command.is_empty() {
            return Err(StoveError::Config("command must not be empty".into()));
        }
        if self.max_port_attempts == 0 {
            return Err(StoveError::Config(
                "max_port_attempts must be at least 1".into(),
            ));
        }
        if Duration::try_from_secs_f64(self.timeout).is_err() {
            return Err(StoveError::Config(format!(
                "timeout must be a non-negative number of seconds, got {}",
                self.timeout
            )));
        }
        if self.client_timeout_ms == 0 {
            return Err(StoveError::Config(
                "client_timeout_ms must be at least 1".into(),
            ));
        }
        if matches!(&self.build, Some(argv) if argv.is_empty()) {
            return Err(StoveError::Config("build must not be empty".into()));
        }
        Ok(())
    }

    pub fn retire_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn client_timeout(&self) -> Duration {
        Duration::from_millis(self.client_timeout_ms)
    }

    pub fn listen_addr(&self) -> String {
        Address::new(self.host.as_str(), self.port).to_string()
    }

    pub fn worker_entry(&self) -> WorkerEntry {
        WorkerEntry {
            argv: self.command.clone(),
            env: self.env.clone(),
            working_dir: self.working_dir.clone(),
        }
    }
}

/// Supplies a fresh configuration snapshot for each rotation.
pub trait ConfigSource: Send + Sync {
    fn load(&self) -> Result<StoveConfig>;
}

/// Re-reads a profile from disk every time it is asked.
#[derive(Debug, Clone)]
pub struct FileConfigSource {
    path: PathBuf,
    profile: String,
}

impl FileConfigSource {
    pub fn new(path: impl Into<PathBuf>, profile: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            profile: profile.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn profile(&self) -> &str {
        &self.profile
    }
}

impl ConfigSource for FileConfigSource {
    fn load(&self) -> Result<StoveConfig> {
        StoveConfig::from_file(&self.path, &self.profile)
    }
}

impl ConfigSource for StoveConfig {
    fn load(&self) -> Result<StoveConfig> {
        let config = self.clone().normalized();
        config.validate()?;
        Ok(config)
    }
}
