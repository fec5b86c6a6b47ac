//! Sync engine configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use wm_types::DatasetKind;

use crate::geofence::{MAX_TRIGGER_DISTANCE, MIN_TRIGGER_DISTANCE};

/// Sync engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Local record cache.
    pub storage: StorageConfig,
    /// Remote dataset endpoints.
    pub remote: RemoteConfig,
    /// Geofence registration.
    pub geofence: GeofenceConfig,
    /// Coordinator session.
    pub session: SessionConfig,
    /// Reachability probing.
    pub connectivity: ConnectivityConfig,
    /// Application bookkeeping.
    pub app: AppConfig,
}

impl Config {
    /// Load configuration from the default path, or defaults if absent.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = default_config_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Read {
            path: path.as_ref().to_path_buf(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Save configuration to a file, creating parent directories.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;

        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        std::fs::write(path.as_ref(), content).map_err(|e| ConfigError::Write {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Validate every section, collecting all problems.
    ///
    /// # Example
    ///
    /// ```
    /// use wm_core::Config;
    ///
    /// let config = Config::default();
    /// assert!(config.validate().is_ok());
    /// ```
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();
        errors.extend(self.storage.validate());
        errors.extend(self.remote.validate());
        errors.extend(self.geofence.validate());
        errors.extend(self.session.validate());
        errors.extend(self.connectivity.validate());

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// Load and validate in one step.
    pub fn load_validated<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::load(path)?;
        config.validate()?;
        Ok(config)
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Database file path.
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: wm_store::default_db_path(),
        }
    }
}

impl StorageConfig {
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if self.path.as_os_str().is_empty() {
            errors.push(ValidationError::new("storage.path", "database path cannot be empty"));
        }
        errors
    }
}

/// Remote dataset endpoints.
///
/// URLs are `http://` or `https://` feature services, or `file://` paths to
/// a feature table saved as JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub observations_name: String,
    pub observations_url: String,
    pub locations_name: String,
    pub locations_url: String,
    /// Bypass caches when downloading.
    pub force_refresh: bool,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            observations_name: "secchi_observations".to_string(),
            observations_url: "https://localhost/secchi_observations".to_string(),
            locations_name: "secchi_locations".to_string(),
            locations_url: "https://localhost/secchi_locations".to_string(),
            force_refresh: false,
        }
    }
}

impl RemoteConfig {
    pub fn name(&self, kind: DatasetKind) -> &str {
        match kind {
            DatasetKind::Observations => &self.observations_name,
            DatasetKind::Locations => &self.locations_name,
        }
    }

    pub fn url(&self, kind: DatasetKind) -> &str {
        match kind {
            DatasetKind::Observations => &self.observations_url,
            DatasetKind::Locations => &self.locations_url,
        }
    }

    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        for (field, name) in [
            ("remote.observations_name", &self.observations_name),
            ("remote.locations_name", &self.locations_name),
        ] {
            if name.trim().is_empty() {
                errors.push(ValidationError::new(field, "dataset name cannot be empty"));
            }
        }
        for (field, url) in [
            ("remote.observations_url", &self.observations_url),
            ("remote.locations_url", &self.locations_url),
        ] {
            if url.is_empty() {
                errors.push(ValidationError::new(field, "dataset URL cannot be empty"));
            } else if !["http://", "https://", "file://"]
                .iter()
                .any(|scheme| url.starts_with(scheme))
            {
                errors.push(ValidationError::new(
                    field,
                    format!("unsupported URL '{}': expected http://, https:// or file://", url),
                ));
            }
        }
        errors
    }
}

/// Geofence configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeofenceConfig {
    /// Trigger distance in meters.
    pub trigger_distance: f64,
    /// Name the location fences are registered under.
    pub fence_name: String,
}

impl Default for GeofenceConfig {
    fn default() -> Self {
        Self {
            trigger_distance: 10.0,
            fence_name: "secchi_locations".to_string(),
        }
    }
}

impl GeofenceConfig {
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if !(MIN_TRIGGER_DISTANCE..=MAX_TRIGGER_DISTANCE).contains(&self.trigger_distance) {
            errors.push(ValidationError::new(
                "geofence.trigger_distance",
                format!(
                    "trigger distance {} is out of range ({}..={} meters)",
                    self.trigger_distance, MIN_TRIGGER_DISTANCE, MAX_TRIGGER_DISTANCE
                ),
            ));
        }
        if self.fence_name.trim().is_empty() {
            errors.push(ValidationError::new("geofence.fence_name", "fence name cannot be empty"));
        }
        errors
    }
}

/// Maximum consumer queue capacity.
pub const MAX_CONSUMER_QUEUE: usize = 4096;

/// Coordinator session configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Bus channel scoping this session's messages.
    pub channel: u32,
    /// Capacity of the consumer update queue.
    pub consumer_queue: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            channel: 1,
            consumer_queue: crate::consumer::DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if self.consumer_queue == 0 {
            errors.push(ValidationError::new(
                "session.consumer_queue",
                "consumer queue capacity must be at least 1",
            ));
        } else if self.consumer_queue > MAX_CONSUMER_QUEUE {
            errors.push(ValidationError::new(
                "session.consumer_queue",
                format!(
                    "consumer queue capacity {} is too large (maximum {})",
                    self.consumer_queue, MAX_CONSUMER_QUEUE
                ),
            ));
        }
        errors
    }
}

/// Minimum probe interval in seconds.
pub const MIN_PROBE_INTERVAL: u64 = 1;
/// Maximum probe interval in seconds (1 hour).
pub const MAX_PROBE_INTERVAL: u64 = 3600;

/// Connectivity probe configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectivityConfig {
    /// `host:port` to open a TCP connection to.
    pub probe: String,
    pub interval_secs: u64,
    pub timeout_secs: u64,
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            probe: "8.8.8.8:53".to_string(),
            interval_secs: 15,
            timeout_secs: 3,
        }
    }
}

impl ConnectivityConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        match self.probe.rsplit_once(':') {
            None => errors.push(ValidationError::new(
                "connectivity.probe",
                format!("invalid probe address '{}': expected format 'host:port'", self.probe),
            )),
            Some((host, _)) if host.is_empty() => errors.push(ValidationError::new(
                "connectivity.probe",
                "probe host cannot be empty",
            )),
            Some((_, port)) => match port.parse::<u16>() {
                Ok(0) => errors.push(ValidationError::new(
                    "connectivity.probe",
                    "port cannot be 0",
                )),
                Err(_) => errors.push(ValidationError::new(
                    "connectivity.probe",
                    format!("invalid port '{}': must be a number 1-65535", port),
                )),
                Ok(_) => {}
            },
        }

        if self.interval_secs < MIN_PROBE_INTERVAL {
            errors.push(ValidationError::new(
                "connectivity.interval_secs",
                format!(
                    "probe interval {} is too short (minimum {} second)",
                    self.interval_secs, MIN_PROBE_INTERVAL
                ),
            ));
        } else if self.interval_secs > MAX_PROBE_INTERVAL {
            errors.push(ValidationError::new(
                "connectivity.interval_secs",
                format!(
                    "probe interval {} is too long (maximum {} seconds / 1 hour)",
                    self.interval_secs, MAX_PROBE_INTERVAL
                ),
            ));
        }

        if self.timeout_secs == 0 {
            errors.push(ValidationError::new(
                "connectivity.timeout_secs",
                "probe timeout must be at least 1 second",
            ));
        } else if self.timeout_secs > self.interval_secs {
            errors.push(ValidationError::new(
                "connectivity.timeout_secs",
                format!(
                    "probe timeout {} exceeds the probe interval {}",
                    self.timeout_secs, self.interval_secs
                ),
            ));
        }

        errors
    }
}

/// Application bookkeeping.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Set after the first successful sync.
    pub initialized: bool,
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Failed to serialize config: {0}")]
    Serialize(toml::ser::Error),
    #[error("Failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Configuration validation failed:\n{}", format_validation_errors(.0))]
    Validation(Vec<ValidationError>),
}

/// A single validation problem.
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// Field path, e.g. `geofence.trigger_distance`.
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn format_validation_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("watermeasurements")
        .join("config.toml")
}
