//! Configuration system for netfeed
//!
//! Provides:
//! - `.env` discovery (working directory, executable directory, and their parents)
//! - Config file discovery (CLI flag, env var, standard paths)
//! - TOML parsing with serde
//! - Environment variable overrides
//! - Resolution into the immutable [`PipelineConfig`]

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Configuration errors. All of them are raised before anything is spawned.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),

    #[error("Capture mode is required (file or live)")]
    MissingMode,

    #[error("An interface is required in live mode")]
    MissingInterface,

    #[error("A capture file is required in file mode")]
    MissingPcap,

    #[error("Capture file not found: {0}")]
    PcapNotFound(PathBuf),

    #[error("Storage URL and API key are required (SUPABASE_URL, SUPABASE_API_KEY)")]
    MissingCredentials,

    #[error("Batch size must be at least 1")]
    InvalidBatchSize,
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Capture mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureMode {
    /// Replay a capture file; ends at EOF
    File,
    /// Tail a live interface; runs until stopped
    Live,
}

impl CaptureMode {
    pub fn as_str(self) -> &'static str {
        match self {
            CaptureMode::File => "file",
            CaptureMode::Live => "live",
        }
    }
}

impl FromStr for CaptureMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "file" => Ok(CaptureMode::File),
            "live" => Ok(CaptureMode::Live),
            other => Err(format!("invalid capture mode '{}', expected file or live", other)),
        }
    }
}

impl std::fmt::Display for CaptureMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Complete netfeed configuration, as read from file and environment
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NetfeedConfig {
    /// Log intent instead of writing to storage
    pub dry_run: bool,

    /// General settings
    pub general: GeneralSettings,

    /// Capture settings
    pub capture: CaptureSettings,

    /// Storage endpoint settings
    pub storage: StorageSettings,

    /// Batching settings
    pub batch: BatchSettings,
}

/// General settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralSettings {
    /// Log level: trace, debug, info, warn, error
    pub log_level: String,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

/// Capture settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    /// tshark binary name or path
    pub tshark_path: String,

    /// Capture mode
    pub mode: Option<CaptureMode>,

    /// Interface to tail in live mode
    pub interface: Option<String>,

    /// Capture file to replay in file mode
    pub pcap: Option<PathBuf>,

    /// Time allowed for the capture process to exit before it is killed
    pub stop_grace_ms: u64,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            tshark_path: "tshark".to_string(),
            mode: None,
            interface: None,
            pcap: None,
            stop_grace_ms: 3000,
        }
    }
}

/// Storage endpoint settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Base URL of the storage service
    pub url: Option<String>,

    /// API key, sent both as `apikey` and as bearer token
    pub api_key: Option<String>,

    /// REST prefix appended to the base URL
    pub rest_path: String,

    /// Target table
    pub table: String,

    /// Upper bound on a single delivery call
    pub timeout_secs: u64,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            url: None,
            api_key: None,
            rest_path: "rest/v1".to_string(),
            table: "network_packets".to_string(),
            timeout_secs: 30,
        }
    }
}

/// Batching settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchSettings {
    /// Records per delivery call
    pub batch_size: usize,

    /// Maximum records delivered per run (0 or absent = unlimited)
    pub limit: Option<u64>,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            batch_size: 200,
            limit: None,
        }
    }
}

/// What the capture process reads from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureTarget {
    Live { interface: String },
    File { path: PathBuf },
}

impl CaptureTarget {
    pub fn mode(&self) -> CaptureMode {
        match self {
            CaptureTarget::Live { .. } => CaptureMode::Live,
            CaptureTarget::File { .. } => CaptureMode::File,
        }
    }

    /// Interface name or file path
    pub fn location(&self) -> String {
        match self {
            CaptureTarget::Live { interface } => interface.clone(),
            CaptureTarget::File { path } => path.display().to_string(),
        }
    }
}

/// Resolved storage endpoint
#[derive(Debug, Clone)]
pub struct StorageTarget {
    /// `{url}/{rest_path}`
    pub endpoint: String,

    pub api_key: String,

    pub timeout: Duration,
}

impl StorageTarget {
    /// URL records for `table` are written to
    pub fn collection_url(&self, table: &str) -> String {
        format!("{}/{}", self.endpoint, table)
    }
}

/// Validated, immutable configuration of one pipeline run
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub target: CaptureTarget,

    pub storage: StorageTarget,

    pub table: String,

    pub batch_size: usize,

    pub limit: Option<u64>,

    pub dry_run: bool,

    pub tshark_path: String,

    pub stop_grace: Duration,
}

impl PipelineConfig {
    /// Validate `config` and freeze it for a run
    pub fn resolve(config: &NetfeedConfig) -> ConfigResult<Self> {
        if config.batch.batch_size < 1 {
            return Err(ConfigError::InvalidBatchSize);
        }

        let target = match config.capture.mode {
            None => return Err(ConfigError::MissingMode),
            Some(CaptureMode::Live) => {
                let interface = config
                    .capture
                    .interface
                    .as_deref()
                    .map(str::trim)
                    .filter(|i| !i.is_empty())
                    .ok_or(ConfigError::MissingInterface)?;
                CaptureTarget::Live {
                    interface: interface.to_string(),
                }
            }
            Some(CaptureMode::File) => {
                let pcap = config.capture.pcap.as_ref().ok_or(ConfigError::MissingPcap)?;
                let expanded = expand_home(pcap);
                let path = expanded
                    .canonicalize()
                    .map_err(|_| ConfigError::PcapNotFound(expanded.clone()))?;
                CaptureTarget::File { path }
            }
        };

        let url = non_empty(config.storage.url.as_deref());
        let api_key = non_empty(config.storage.api_key.as_deref());
        // Required in dry-run too, so a dry run validates the real setup
        let (Some(url), Some(api_key)) = (url, api_key) else {
            return Err(ConfigError::MissingCredentials);
        };
        let storage = StorageTarget {
            endpoint: join_url(url, &config.storage.rest_path),
            api_key: api_key.to_string(),
            timeout: Duration::from_secs(config.storage.timeout_secs),
        };

        let table = config.storage.table.trim();
        if table.is_empty() {
            return Err(ConfigError::ValidationError(
                "Table name cannot be empty".to_string(),
            ));
        }

        Ok(Self {
            target,
            storage,
            table: table.to_string(),
            batch_size: config.batch.batch_size,
            limit: config.batch.limit.filter(|limit| *limit > 0),
            dry_run: config.dry_run,
            tshark_path: config.capture.tshark_path.clone(),
            stop_grace: Duration::from_millis(config.capture.stop_grace_ms),
        })
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn join_url(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let path = path.trim_matches('/');
    if path.is_empty() {
        base.to_string()
    } else {
        format!("{}/{}", base, path)
    }
}

/// Expand a leading `~` to the home directory
pub fn expand_home(path: &Path) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    path.to_path_buf()
}

/// Where a candidate config file came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConfigOrigin {
    Flag,
    Env,
    User,
    System,
}

impl ConfigOrigin {
    fn is_explicit(self) -> bool {
        matches!(self, ConfigOrigin::Flag | ConfigOrigin::Env)
    }
}

impl std::fmt::Display for ConfigOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ConfigOrigin::Flag => "--config",
            ConfigOrigin::Env => "NETFEED_CONFIG",
            ConfigOrigin::User => "user config dir",
            ConfigOrigin::System => "system config dir",
        })
    }
}

/// Configuration loader
pub struct ConfigLoader {
    /// Path to config file (if specified via CLI)
    cli_path: Option<PathBuf>,
}

impl ConfigLoader {
    /// Create a new config loader
    pub fn new() -> Self {
        Self { cli_path: None }
    }

    /// Set the config path from CLI argument
    pub fn with_cli_path(mut self, path: Option<PathBuf>) -> Self {
        self.cli_path = path;
        self
    }

    /// Load configuration with the following precedence:
    /// 1. CLI --config flag
    /// 2. NETFEED_CONFIG environment variable
    /// 3. ~/.config/netfeed/config.toml
    /// 4. /etc/netfeed/config.toml
    /// 5. Default values
    ///
    /// Environment overrides are applied on top of whichever was found.
    pub fn load(&self) -> ConfigResult<NetfeedConfig> {
        let mut config = match self.find_config_file() {
            Some(path) => {
                info!("Loading configuration from: {}", path.display());
                self.load_from_file(&path)?
            }
            None => {
                debug!("No config file found, using defaults");
                NetfeedConfig::default()
            }
        };

        apply_overrides(&mut config, |key| std::env::var(key).ok());
        self.validate(&config)?;

        Ok(config)
    }

    /// First existing config file in search order.
    /// An explicitly named file that is missing is reported and skipped.
    pub fn find_config_file(&self) -> Option<PathBuf> {
        let env_path = std::env::var_os("NETFEED_CONFIG").map(PathBuf::from);
        let home = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")));

        self.search_order(env_path, home)
            .into_iter()
            .find_map(|(origin, path)| {
                if path.is_file() {
                    return Some(path);
                }
                if origin.is_explicit() {
                    warn!("Config file from {} not found: {}", origin, path.display());
                }
                None
            })
    }

    fn search_order(
        &self,
        env_path: Option<PathBuf>,
        user_config_home: Option<PathBuf>,
    ) -> Vec<(ConfigOrigin, PathBuf)> {
        let mut order = Vec::with_capacity(4);
        order.extend(self.cli_path.clone().map(|p| (ConfigOrigin::Flag, p)));
        order.extend(env_path.map(|p| (ConfigOrigin::Env, p)));
        order.extend(
            user_config_home.map(|dir| (ConfigOrigin::User, dir.join("netfeed").join("config.toml"))),
        );
        if cfg!(unix) {
            order.push((ConfigOrigin::System, PathBuf::from("/etc/netfeed/config.toml")));
        }
        order
    }

    /// Load configuration from a TOML file
    fn load_from_file(&self, path: &Path) -> ConfigResult<NetfeedConfig> {
        let content = std::fs::read_to_string(path)?;
        let config: NetfeedConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Checks that do not depend on the chosen run
    fn validate(&self, config: &NetfeedConfig) -> ConfigResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&config.general.log_level.to_lowercase().as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log level: {}. Must be one of: {:?}",
                config.general.log_level, valid_levels
            )));
        }

        if config.capture.tshark_path.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "tshark_path cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Apply environment overrides through `lookup`.
///
/// Unparseable numbers and booleans leave the current value in place.
pub fn apply_overrides<F>(config: &mut NetfeedConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(val) = lookup("SUPABASE_URL") {
        config.storage.url = Some(val);
    }
    if let Some(val) = lookup("SUPABASE_API_KEY") {
        config.storage.api_key = Some(val);
    }
    if let Some(val) = lookup("NETFEED_LOG_LEVEL") {
        config.general.log_level = val;
    }
    if let Some(val) = lookup("NETFEED_TSHARK") {
        config.capture.tshark_path = val;
    }
    if let Some(val) = lookup("NETFEED_TABLE") {
        config.storage.table = val;
    }
    if let Some(val) = lookup("NETFEED_BATCH_SIZE") {
        config.batch.batch_size = val.trim().parse().unwrap_or(config.batch.batch_size);
    }
    if let Some(val) = lookup("NETFEED_LIMIT") {
        if let Ok(limit) = val.trim().parse() {
            config.batch.limit = Some(limit);
        }
    }
    if let Some(val) = lookup("NETFEED_DRY_RUN") {
        config.dry_run = val.trim().parse().unwrap_or(config.dry_run);
    }
}

/// Load the first `.env` file found next to the working directory or the
/// executable (or any of their parents). Variables already set in the
/// environment are left untouched.
///
/// Returns the path that was loaded. Must run before an async runtime is
/// started.
pub fn load_dotenv() -> Option<PathBuf> {
    let cwd = std::env::current_dir().ok();
    let exe_dir = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf));

    load_dotenv_from(&dotenv_candidates(cwd.as_deref(), exe_dir.as_deref()))
}

/// Load the first existing file among `candidates` into the environment.
///
/// Call only while the process is single-threaded (before an async
/// runtime starts), since it mutates the environment.
pub fn load_dotenv_from(candidates: &[PathBuf]) -> Option<PathBuf> {
    for path in candidates {
        if !path.is_file() {
            continue;
        }
        match std::fs::read_to_string(path) {
            Ok(content) => {
                for (key, value) in parse_dotenv(&content) {
                    if std::env::var_os(&key).is_none() {
                        std::env::set_var(key, value);
                    }
                }
                info!("Environment loaded from {}", path.display());
                return Some(path.clone());
            }
            Err(e) => warn!("Failed to read {}: {}", path.display(), e),
        }
    }

    None
}

/// `.env` paths to probe, in order, without duplicates
pub fn dotenv_candidates(cwd: Option<&Path>, exe_dir: Option<&Path>) -> Vec<PathBuf> {
    let mut seen = HashSet::new();
    let mut candidates = Vec::new();

    for start in [cwd, exe_dir].into_iter().flatten() {
        for dir in start.ancestors() {
            let path = dir.join(".env");
            if seen.insert(path.clone()) {
                candidates.push(path);
            }
        }
    }

    candidates
}

/// Parse `.env` content into key/value pairs
pub fn parse_dotenv(content: &str) -> Vec<(String, String)> {
    let mut vars = Vec::new();

    for raw in content.lines() {
        let mut line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some(rest) = line.strip_prefix("export ") {
            line = rest.trim();
        }

        let Some((key, value)) = line.split_once('=') else {
            continue;
        };

        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let value = value.trim().trim_matches('"').trim_matches('\'');
        vars.push((key.to_string(), value.to_string()));
    }

    vars
}
