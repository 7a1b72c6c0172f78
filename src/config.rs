//! Production configuration system
//!
//! Provides centralized configuration management with:
//! - Environment variable support
//! - Config file loading (optional)
//! - Runtime defaults
//! - Validation and type safety

use crate::models::Billing;
use anyhow::{Context, Result};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Logging configuration
    pub logging: LoggingConfig,

    /// Event store and state file locations
    pub storage: StorageConfig,

    /// Aggregation and report configuration
    pub report: ReportConfig,

    /// Pricing table configuration
    pub pricing: PricingConfig,

    /// Network tier configuration
    pub network: NetworkConfig,

    /// Per-source collector configuration
    pub claude: ClaudeSourceConfig,
    pub codex: CodexSourceConfig,
    pub cursor: CursorSourceConfig,

    /// The config file this instance was loaded from, if any. Recorded so
    /// the caller can log it once the logging subscriber exists.
    #[serde(skip)]
    pub source_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
    pub output: String,
    pub directory: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    /// IANA timezone name used for window math.
    pub timezone: String,
    /// When true, events with unresolvable pricing contribute their
    /// estimate (if any) to final totals instead of null.
    pub include_unknown: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PricingConfig {
    /// Path to a pricing table file; the bundled table is used when unset.
    pub table_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub timeout_secs: u64,
    /// Validity window for per-endpoint response caches.
    pub cache_ttl_minutes: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClaudeSourceConfig {
    pub enabled: bool,
    pub dir: PathBuf,
    /// How this tool's usage is billed; subscription zeroes final cost.
    pub billing: Billing,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CodexSourceConfig {
    pub enabled: bool,
    pub dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CursorSourceConfig {
    pub enabled: bool,
    /// The host application's support directory (local state, transcripts).
    pub app_dir: Option<PathBuf>,
    /// Session credential for the dashboard/team APIs. When unset the
    /// collector attempts extraction from the app's local storage.
    pub session_token: Option<String>,
    pub team_id: Option<String>,
    pub dashboard_url: String,
    pub team_url: String,
}

fn home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "ERROR".to_string(),
            format: "pretty".to_string(),
            output: "console".to_string(),
            directory: PathBuf::from("logs"),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("agent-spend"),
        }
    }
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            timezone: "UTC".to_string(),
            include_unknown: false,
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 10,
            cache_ttl_minutes: 15,
        }
    }
}

impl Default for ClaudeSourceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: home_dir().join(".claude"),
            billing: Billing::Usage,
        }
    }
}

impl Default for CodexSourceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: home_dir().join(".codex"),
        }
    }
}

impl Default for CursorSourceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            app_dir: None,
            session_token: None,
            team_id: None,
            dashboard_url: "https://cursor.com/api/dashboard/get-monthly-invoice".to_string(),
            team_url: "https://cursor.com/api/dashboard/teams/usage".to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            logging: LoggingConfig::default(),
            storage: StorageConfig::default(),
            report: ReportConfig::default(),
            pricing: PricingConfig::default(),
            network: NetworkConfig::default(),
            claude: ClaudeSourceConfig::default(),
            codex: CodexSourceConfig::default(),
            cursor: CursorSourceConfig::default(),
            source_file: None,
        }
    }
}

impl Config {
    /// Load configuration from environment, file, and defaults
    pub fn load() -> Result<Self> {
        let mut config = Config::default();

        // Try to load from config file if it exists
        let config_paths = [
            PathBuf::from("agent-spend.toml"),
            PathBuf::from(".agent-spend.toml"),
            dirs::config_dir()
                .map(|d| d.join("agent-spend").join("config.toml"))
                .unwrap_or_default(),
        ];

        // No logging here: load runs before the subscriber exists, so the
        // source path is recorded on the config for the caller to report.
        for path in &config_paths {
            if path.exists() {
                config = Self::load_from_file(path)?;
                config.source_file = Some(path.clone());
                break;
            }
        }

        // Override with environment variables
        config.apply_env_overrides()?;

        // Validate configuration
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from TOML file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        // Logging overrides
        if let Ok(val) = env::var("LOG_LEVEL") {
            self.logging.level = val;
        }
        if let Ok(val) = env::var("LOG_FORMAT") {
            self.logging.format = val;
        }
        if let Ok(val) = env::var("LOG_OUTPUT") {
            self.logging.output = val;
        }

        // Storage overrides
        if let Ok(val) = env::var("AGENT_SPEND_DATA_DIR") {
            self.storage.data_dir = PathBuf::from(val);
        }

        // Report overrides
        if let Ok(val) = env::var("AGENT_SPEND_TIMEZONE") {
            self.report.timezone = val;
        }
        if let Ok(val) = env::var("AGENT_SPEND_INCLUDE_UNKNOWN") {
            self.report.include_unknown = val
                .parse()
                .context("Invalid AGENT_SPEND_INCLUDE_UNKNOWN")?;
        }

        // Network overrides
        if let Ok(val) = env::var("AGENT_SPEND_CACHE_TTL_MINUTES") {
            self.network.cache_ttl_minutes = val
                .parse()
                .context("Invalid AGENT_SPEND_CACHE_TTL_MINUTES")?;
        }
        if let Ok(val) = env::var("AGENT_SPEND_TIMEOUT_SECS") {
            self.network.timeout_secs =
                val.parse().context("Invalid AGENT_SPEND_TIMEOUT_SECS")?;
        }

        // Source path overrides
        if let Ok(val) = env::var("CLAUDE_HOME") {
            self.claude.dir = PathBuf::from(val);
        }
        if let Ok(val) = env::var("CODEX_HOME") {
            self.codex.dir = PathBuf::from(val);
        }
        if let Ok(val) = env::var("CURSOR_SESSION_TOKEN") {
            self.cursor.session_token = Some(val);
        }

        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        self.report
            .timezone
            .parse::<Tz>()
            .map_err(|_| anyhow::anyhow!("Invalid timezone: {}", self.report.timezone))?;

        if self.network.timeout_secs == 0 {
            return Err(anyhow::anyhow!("Network timeout must be greater than 0"));
        }

        if self.network.cache_ttl_minutes < 0 {
            return Err(anyhow::anyhow!("Cache TTL minutes cannot be negative"));
        }

        Ok(())
    }

    /// Timezone used for window math; validated at load time.
    pub fn timezone(&self) -> Tz {
        self.report
            .timezone
            .parse::<Tz>()
            .unwrap_or(chrono_tz::UTC)
    }
}

/// Global configuration instance
static CONFIG: OnceLock<Config> = OnceLock::new();

/// Seed the global configuration with an already-loaded instance. First
/// call wins; every later [`get_config`] returns the seeded value, so the
/// binary loads its configuration exactly once.
pub fn init_config(config: Config) -> &'static Config {
    CONFIG.get_or_init(|| config)
}

/// Get the global configuration instance, loading it on first use when
/// nothing was seeded.
pub fn get_config() -> &'static Config {
    CONFIG.get_or_init(|| Config::load().expect("Failed to load configuration"))
}
