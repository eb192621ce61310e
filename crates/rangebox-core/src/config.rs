//! Configuration management.
//!
//! Two kinds of configuration live here:
//!
//! 1. [`DaemonConfig`] — process-level settings (socket, data dir, monitor
//!    cadence, event broker, logging), loaded once at startup from defaults,
//!    config files and `RANGEBOX_*` environment variables.
//! 2. [`ExerciseConfig`] / [`PlatformConfig`] — per-controller documents
//!    persisted as JSON in the data directory. These round-trip through
//!    their validators on every load and save, and are updated through
//!    typed partial patches so a `SET_CONFIG` merges onto the persisted
//!    state instead of resetting it.
//!
//! ## Example Configuration File
//!
//! ```toml
//! data_dir = "~/.rangebox"
//!
//! [monitor]
//! poll_interval_secs = 5
//!
//! [events]
//! enabled = true
//! redis_url = "redis://127.0.0.1:6379"
//!
//! [logging]
//! level = "info"
//! ```

use crate::error::{CoreError, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use rangebox_constants::env as env_vars;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Rangebox daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Data directory (persisted configs, PID file, generated specs).
    pub data_dir: PathBuf,
    /// IPC socket path.
    pub socket_path: PathBuf,
    /// Command server settings.
    pub server: ServerConfig,
    /// Lifecycle monitor settings.
    pub monitor: MonitorConfig,
    /// Event publishing settings.
    pub events: EventsConfig,
    /// Logging configuration.
    pub logging: LoggingConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            socket_path: default_socket_path(),
            server: ServerConfig::default(),
            monitor: MonitorConfig::default(),
            events: EventsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl DaemonConfig {
    /// Loads configuration from files and environment.
    ///
    /// Sources, in order of precedence:
    /// 1. Environment variables (`RANGEBOX_*`)
    /// 2. User config file (`~/.config/rangebox/config.toml`)
    /// 3. System config file (`/etc/rangebox/config.toml`)
    /// 4. Default values
    ///
    /// # Errors
    ///
    /// Returns an error if configuration cannot be loaded.
    pub fn load() -> std::result::Result<Self, figment::Error> {
        Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(system_config_path()))
            .merge(Toml::file(user_config_path()))
            .merge(Env::prefixed(env_vars::CONFIG_PREFIX).split("_"))
            .extract()
    }

    /// Loads configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from(path: impl AsRef<Path>) -> std::result::Result<Self, figment::Error> {
        Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(env_vars::CONFIG_PREFIX).split("_"))
            .extract()
    }
}

/// Command server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Seconds a connection may take to deliver its request line.
    pub read_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            read_timeout_secs: 5,
        }
    }
}

/// Lifecycle monitor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Poll interval in seconds.
    pub poll_interval_secs: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 5,
        }
    }
}

/// Event publishing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Whether events are published at all.
    pub enabled: bool,
    /// Redis broker URL.
    pub redis_url: String,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            redis_url: "redis://127.0.0.1:6379".to_string(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("/var/lib"))
        .join(".rangebox")
}

fn default_socket_path() -> PathBuf {
    if let Ok(path) = std::env::var(env_vars::SOCKET) {
        return PathBuf::from(path);
    }
    std::env::var(env_vars::XDG_RUNTIME_DIR).map_or_else(
        |_| PathBuf::from("/tmp").join("rangebox").join("rangeboxd.sock"),
        |dir| PathBuf::from(dir).join("rangebox").join("rangeboxd.sock"),
    )
}

fn user_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("~/.config"))
        .join("rangebox")
        .join("config.toml")
}

fn system_config_path() -> PathBuf {
    PathBuf::from("/etc/rangebox/config.toml")
}

/// Configuration of the pooled exercise fleet.
///
/// Persisted as `exercises.json` in the data directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExerciseConfig {
    /// Container name prefix; instance names are `<prefix><port>`.
    pub name_prefix: String,
    /// First host port of the pool range (inclusive).
    pub port_start: u16,
    /// Last host port of the pool range (inclusive).
    pub port_end: u16,
    /// Port the exercise application listens on inside the container.
    pub container_port: u16,
    /// Image every pool instance runs.
    pub image: String,
    /// Minutes an instance lives before the monitor reaps it.
    pub lifespan_minutes: u32,
    /// Extra `KEY=VALUE` environment entries for instances.
    pub env: Vec<String>,
    /// Missions export settings.
    pub missions: MissionsConfig,
}

impl Default for ExerciseConfig {
    fn default() -> Self {
        Self {
            name_prefix: "js_".to_string(),
            port_start: 3000,
            port_end: 3009,
            container_port: 3000,
            image: "rangebox/exercise:latest".to_string(),
            lifespan_minutes: 120,
            env: Vec::new(),
            missions: MissionsConfig::default(),
        }
    }
}

impl ExerciseConfig {
    /// Path of the persisted document under `data_dir`.
    #[must_use]
    pub fn path(data_dir: &Path) -> PathBuf {
        data_dir.join("exercises.json")
    }

    /// Loads the persisted config, writing defaults on first run.
    ///
    /// # Errors
    ///
    /// Returns an error if the document cannot be read, parsed or validated.
    pub fn load(data_dir: &Path) -> Result<Self> {
        let path = Self::path(data_dir);
        if !path.exists() {
            let config = Self::default();
            config.save(data_dir)?;
            return Ok(config);
        }
        let raw = std::fs::read_to_string(&path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Validates and persists the config.
    ///
    /// # Errors
    ///
    /// Returns an error if validation fails or the document cannot be written.
    pub fn save(&self, data_dir: &Path) -> Result<()> {
        self.validate()?;
        std::fs::create_dir_all(data_dir)?;
        let raw = serde_json::to_string_pretty(self)?;
        std::fs::write(Self::path(data_dir), raw)?;
        Ok(())
    }

    /// Returns a merged copy with the patch applied, validated.
    ///
    /// # Errors
    ///
    /// Returns an error if the merged config fails validation.
    pub fn apply_patch(&self, patch: &ExercisePatch) -> Result<Self> {
        let mut merged = self.clone();
        if let Some(prefix) = &patch.name_prefix {
            merged.name_prefix = prefix.clone();
        }
        if let Some(start) = patch.port_start {
            merged.port_start = start;
        }
        if let Some(end) = patch.port_end {
            merged.port_end = end;
        }
        if let Some(port) = patch.container_port {
            merged.container_port = port;
        }
        if let Some(image) = &patch.image {
            merged.image = image.clone();
        }
        if let Some(lifespan) = patch.lifespan_minutes {
            merged.lifespan_minutes = lifespan;
        }
        if let Some(env) = &patch.env {
            merged.env = env.clone();
        }
        if let Some(missions) = &patch.missions {
            merged.missions = missions.clone();
        }
        merged.validate()?;
        Ok(merged)
    }

    /// Checks invariants of the config.
    ///
    /// # Errors
    ///
    /// Returns a `Config` error naming the violated field.
    pub fn validate(&self) -> Result<()> {
        if self.name_prefix.is_empty() {
            return Err(CoreError::Config("name_prefix must not be empty".into()));
        }
        if self.port_start == 0 || self.port_start > self.port_end {
            return Err(CoreError::Config(format!(
                "invalid port range [{}, {}]",
                self.port_start, self.port_end
            )));
        }
        if self.container_port == 0 {
            return Err(CoreError::Config("container_port must not be 0".into()));
        }
        if self.image.is_empty() {
            return Err(CoreError::Config("image must not be empty".into()));
        }
        if self.lifespan_minutes == 0 {
            return Err(CoreError::Config("lifespan_minutes must be at least 1".into()));
        }
        Ok(())
    }

    /// Ports of the pool range, ascending.
    pub fn ports(&self) -> impl Iterator<Item = u16> {
        self.port_start..=self.port_end
    }

    /// Number of slots in the pool.
    #[must_use]
    pub fn pool_size(&self) -> usize {
        usize::from(self.port_end - self.port_start) + 1
    }

    /// Derived container name for a slot port.
    #[must_use]
    pub fn instance_name(&self, port: u16) -> String {
        format!("{}{}", self.name_prefix, port)
    }
}

/// Partial update for [`ExerciseConfig`]; unset fields keep their value.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExercisePatch {
    pub name_prefix: Option<String>,
    pub port_start: Option<u16>,
    pub port_end: Option<u16>,
    pub container_port: Option<u16>,
    pub image: Option<String>,
    pub lifespan_minutes: Option<u32>,
    pub env: Option<Vec<String>>,
    pub missions: Option<MissionsConfig>,
}

/// Missions export settings (helper container + descriptor + output).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MissionsConfig {
    /// Image of the export helper container.
    pub export_image: String,
    /// Mission descriptor file, relative to the data directory.
    pub descriptor: String,
    /// Directory the finished archive is moved to, relative to the data dir.
    pub output_dir: String,
    /// Seconds the helper may run before it is abandoned.
    pub timeout_secs: u64,
}

impl Default for MissionsConfig {
    fn default() -> Self {
        Self {
            export_image: "rangebox/mission-export:latest".to_string(),
            descriptor: "missions.yaml".to_string(),
            output_dir: "exports".to_string(),
            timeout_secs: 300,
        }
    }
}

/// Configuration of the fixed platform pair.
///
/// Persisted as `platform.json` in the data directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformConfig {
    /// Name of the scoreboard web container.
    pub web_name: String,
    /// Name of the cache container.
    pub cache_name: String,
    /// Image of the web container.
    pub web_image: String,
    /// Image of the cache container.
    pub cache_image: String,
    /// Host port of the web container.
    pub web_port: u16,
    /// Host port of the cache container.
    pub cache_port: u16,
    /// Generated deployment spec file, relative to the data directory.
    pub spec_file: String,
    /// Deployment tool argv; the spec path is appended as the last argument.
    pub deploy_command: Vec<String>,
    /// Seconds the deployment tool may run.
    pub deploy_timeout_secs: u64,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            web_name: "rtb_web".to_string(),
            cache_name: "rtb_cache".to_string(),
            web_image: "rangebox/platform-web:latest".to_string(),
            cache_image: "memcached:1.6-alpine".to_string(),
            web_port: 8888,
            cache_port: 11211,
            spec_file: "platform.yaml".to_string(),
            deploy_command: vec![
                "process-compose".to_string(),
                "up".to_string(),
                "--detached".to_string(),
                "--config".to_string(),
            ],
            deploy_timeout_secs: 120,
        }
    }
}

impl PlatformConfig {
    /// Path of the persisted document under `data_dir`.
    #[must_use]
    pub fn path(data_dir: &Path) -> PathBuf {
        data_dir.join("platform.json")
    }

    /// Loads the persisted config, writing defaults on first run.
    ///
    /// # Errors
    ///
    /// Returns an error if the document cannot be read, parsed or validated.
    pub fn load(data_dir: &Path) -> Result<Self> {
        let path = Self::path(data_dir);
        if !path.exists() {
            let config = Self::default();
            config.save(data_dir)?;
            return Ok(config);
        }
        let raw = std::fs::read_to_string(&path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Validates and persists the config.
    ///
    /// # Errors
    ///
    /// Returns an error if validation fails or the document cannot be written.
    pub fn save(&self, data_dir: &Path) -> Result<()> {
        self.validate()?;
        std::fs::create_dir_all(data_dir)?;
        let raw = serde_json::to_string_pretty(self)?;
        std::fs::write(Self::path(data_dir), raw)?;
        Ok(())
    }

    /// Returns a merged copy with the patch applied, validated.
    ///
    /// # Errors
    ///
    /// Returns an error if the merged config fails validation.
    pub fn apply_patch(&self, patch: &PlatformPatch) -> Result<Self> {
        let mut merged = self.clone();
        if let Some(name) = &patch.web_name {
            merged.web_name = name.clone();
        }
        if let Some(name) = &patch.cache_name {
            merged.cache_name = name.clone();
        }
        if let Some(image) = &patch.web_image {
            merged.web_image = image.clone();
        }
        if let Some(image) = &patch.cache_image {
            merged.cache_image = image.clone();
        }
        if let Some(port) = patch.web_port {
            merged.web_port = port;
        }
        if let Some(port) = patch.cache_port {
            merged.cache_port = port;
        }
        if let Some(file) = &patch.spec_file {
            merged.spec_file = file.clone();
        }
        if let Some(command) = &patch.deploy_command {
            merged.deploy_command = command.clone();
        }
        if let Some(secs) = patch.deploy_timeout_secs {
            merged.deploy_timeout_secs = secs;
        }
        merged.validate()?;
        Ok(merged)
    }

    /// Checks invariants of the config.
    ///
    /// # Errors
    ///
    /// Returns a `Config` error naming the violated field.
    pub fn validate(&self) -> Result<()> {
        if self.web_name.is_empty() || self.cache_name.is_empty() {
            return Err(CoreError::Config("container names must not be empty".into()));
        }
        if self.web_name == self.cache_name {
            return Err(CoreError::Config("container names must differ".into()));
        }
        if self.web_image.is_empty() || self.cache_image.is_empty() {
            return Err(CoreError::Config("images must not be empty".into()));
        }
        if self.web_port == 0 || self.cache_port == 0 || self.web_port == self.cache_port {
            return Err(CoreError::Config(format!(
                "invalid platform ports {} / {}",
                self.web_port, self.cache_port
            )));
        }
        if self.deploy_command.is_empty() {
            return Err(CoreError::Config("deploy_command must not be empty".into()));
        }
        if self.deploy_timeout_secs == 0 {
            return Err(CoreError::Config("deploy_timeout_secs must be at least 1".into()));
        }
        Ok(())
    }

    /// Both managed container names, web first.
    #[must_use]
    pub fn names(&self) -> [String; 2] {
        [self.web_name.clone(), self.cache_name.clone()]
    }

    /// Absolute path of the generated deployment spec.
    #[must_use]
    pub fn spec_path(&self, data_dir: &Path) -> PathBuf {
        data_dir.join(&self.spec_file)
    }
}

/// Partial update for [`PlatformConfig`]; unset fields keep their value.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlatformPatch {
    pub web_name: Option<String>,
    pub cache_name: Option<String>,
    pub web_image: Option<String>,
    pub cache_image: Option<String>,
    pub web_port: Option<u16>,
    pub cache_port: Option<u16>,
    pub spec_file: Option<String>,
    pub deploy_command: Option<Vec<String>>,
    pub deploy_timeout_secs: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = DaemonConfig::default();
        assert_eq!(config.monitor.poll_interval_secs, 5);
        assert_eq!(config.server.read_timeout_secs, 5);
        assert!(config.events.enabled);
    }

    #[test]
    fn test_exercise_defaults_validate() {
        assert!(ExerciseConfig::default().validate().is_ok());
        assert!(PlatformConfig::default().validate().is_ok());
    }

    #[test]
    fn test_exercise_first_load_writes_defaults() {
        let dir = TempDir::new().unwrap();
        let config = ExerciseConfig::load(dir.path()).unwrap();
        assert_eq!(config.port_start, 3000);
        assert!(ExerciseConfig::path(dir.path()).exists());
    }

    #[test]
    fn test_exercise_round_trip() {
        let dir = TempDir::new().unwrap();
        let mut config = ExerciseConfig::load(dir.path()).unwrap();
        config.port_end = 3004;
        config.lifespan_minutes = 45;
        config.save(dir.path()).unwrap();

        let reloaded = ExerciseConfig::load(dir.path()).unwrap();
        assert_eq!(reloaded.port_end, 3004);
        assert_eq!(reloaded.lifespan_minutes, 45);
    }

    #[test]
    fn test_patch_merges_onto_persisted_fields() {
        let config = ExerciseConfig {
            port_end: 3020,
            lifespan_minutes: 30,
            ..ExerciseConfig::default()
        };
        let patch = ExercisePatch {
            lifespan_minutes: Some(60),
            ..ExercisePatch::default()
        };
        let merged = config.apply_patch(&patch).unwrap();
        assert_eq!(merged.lifespan_minutes, 60);
        // Untouched fields survive the merge.
        assert_eq!(merged.port_end, 3020);
        assert_eq!(merged.name_prefix, "js_");
    }

    #[test]
    fn test_patch_rejects_inverted_range() {
        let config = ExerciseConfig::default();
        let patch = ExercisePatch {
            port_start: Some(4000),
            port_end: Some(3000),
            ..ExercisePatch::default()
        };
        assert!(config.apply_patch(&patch).is_err());
    }

    #[test]
    fn test_platform_rejects_equal_names() {
        let config = PlatformConfig {
            cache_name: "rtb_web".to_string(),
            ..PlatformConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_instance_names() {
        let config = ExerciseConfig::default();
        assert_eq!(config.instance_name(3000), "js_3000");
        assert_eq!(config.pool_size(), 10);
        assert_eq!(config.ports().next(), Some(3000));
    }
}
