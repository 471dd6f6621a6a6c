//! Configuration loading, validation, and management for threadsage.
//!
//! Loads configuration from `~/.threadsage/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use threadsage_core::ResponseStyle;

/// The root configuration structure.
///
/// Maps directly to `~/.threadsage/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Generative backends in priority order.
    #[serde(default = "default_providers")]
    pub providers: Vec<ProviderEntry>,

    #[serde(default)]
    pub budget: BudgetConfig,

    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub style: StyleConfig,

    #[serde(default)]
    pub formatter: FormatterConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub schedule: ScheduleConfig,

    #[serde(default)]
    pub gateway: GatewayConfig,

    #[serde(default)]
    pub discord: DiscordConfig,
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("providers", &self.providers)
            .field("budget", &self.budget)
            .field("session", &self.session)
            .field("style", &self.style)
            .field("formatter", &self.formatter)
            .field("store", &self.store)
            .field("schedule", &self.schedule)
            .field("gateway", &self.gateway)
            .field("discord", &self.discord)
            .finish()
    }
}

/// One generative backend.
#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderEntry {
    /// Name used in logs (e.g., "primary").
    pub name: String,

    /// Wire protocol: "gemini" or "openai".
    pub kind: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Base URL; the protocol's public endpoint when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    pub model: String,

    #[serde(default = "default_provider_timeout")]
    pub timeout_secs: u64,

    /// Whether calls are gated by the daily token budget.
    #[serde(default)]
    pub budgeted: bool,
}

impl std::fmt::Debug for ProviderEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderEntry")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("model", &self.model)
            .field("timeout_secs", &self.timeout_secs)
            .field("budgeted", &self.budgeted)
            .finish()
    }
}

fn default_provider_timeout() -> u64 {
    15
}

fn default_providers() -> Vec<ProviderEntry> {
    vec![
        ProviderEntry {
            name: "primary".into(),
            kind: "gemini".into(),
            api_key: None,
            api_url: None,
            model: "gemini-2.0-flash".into(),
            timeout_secs: default_provider_timeout(),
            budgeted: true,
        },
        ProviderEntry {
            name: "secondary".into(),
            kind: "openai".into(),
            api_key: None,
            api_url: None,
            model: "gpt-4o-mini".into(),
            timeout_secs: default_provider_timeout(),
            budgeted: false,
        },
    ]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetConfig {
    /// Tokens a user may spend on budgeted providers per UTC day.
    #[serde(default = "default_daily_token_limit")]
    pub daily_token_limit: u64,
}

fn default_daily_token_limit() -> u64 {
    510_000
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            daily_token_limit: default_daily_token_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Prior turns included in the context.
    #[serde(default = "default_max_history_turns")]
    pub max_history_turns: usize,

    #[serde(default = "default_thread_lifetime_days")]
    pub thread_lifetime_days: u32,

    #[serde(default = "default_new_thread_points")]
    pub new_thread_points: i64,

    #[serde(default = "default_reply_points")]
    pub reply_points: i64,

    #[serde(default = "default_language")]
    pub default_language: String,

    /// User allowed to manage any thread.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_id: Option<String>,

    /// Author id written on assistant replies.
    #[serde(default = "default_bot_id")]
    pub bot_id: String,
}

fn default_max_history_turns() -> usize {
    10
}
fn default_thread_lifetime_days() -> u32 {
    7
}
fn default_new_thread_points() -> i64 {
    5
}
fn default_reply_points() -> i64 {
    1
}
fn default_language() -> String {
    "vi".into()
}
fn default_bot_id() -> String {
    "threadsage".into()
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_history_turns: default_max_history_turns(),
            thread_lifetime_days: default_thread_lifetime_days(),
            new_thread_points: default_new_thread_points(),
            reply_points: default_reply_points(),
            default_language: default_language(),
            admin_id: None,
            bot_id: default_bot_id(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StyleConfig {
    /// How long the requester has to pick a style.
    #[serde(default = "default_style_timeout")]
    pub timeout_secs: u64,

    /// Style used when nobody picks one in time.
    #[serde(default = "default_style_on_timeout")]
    pub default_on_timeout: ResponseStyle,

    /// Simple answers are cut to this many characters.
    #[serde(default = "default_simple_max_chars")]
    pub simple_max_chars: usize,
}

fn default_style_timeout() -> u64 {
    60
}
fn default_style_on_timeout() -> ResponseStyle {
    ResponseStyle::Detailed
}
fn default_simple_max_chars() -> usize {
    500
}

impl Default for StyleConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_style_timeout(),
            default_on_timeout: default_style_on_timeout(),
            simple_max_chars: default_simple_max_chars(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormatterConfig {
    /// Longest message the platform accepts, in characters.
    #[serde(default = "default_max_message_len")]
    pub max_message_len: usize,
}

fn default_max_message_len() -> usize {
    2000
}

impl Default for FormatterConfig {
    fn default() -> Self {
        Self {
            max_message_len: default_max_message_len(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,

    #[serde(default = "default_connect_attempts")]
    pub connect_attempts: u32,

    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

fn default_db_path() -> PathBuf {
    AppConfig::config_dir().join("threadsage.db")
}
fn default_connect_attempts() -> u32 {
    5
}
fn default_retry_delay_ms() -> u64 {
    500
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            connect_attempts: default_connect_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

/// Cron expressions (minute hour day month weekday) for maintenance jobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_sweep_schedule")]
    pub sweep: String,

    #[serde(default = "default_reset_monthly_schedule")]
    pub reset_monthly: String,

    #[serde(default = "default_reset_daily_tokens_schedule")]
    pub reset_daily_tokens: String,
}

fn default_sweep_schedule() -> String {
    "0 * * * *".into()
}
fn default_reset_monthly_schedule() -> String {
    "0 0 1 * *".into()
}
fn default_reset_daily_tokens_schedule() -> String {
    "0 0 * * *".into()
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            sweep: default_sweep_schedule(),
            reset_monthly: default_reset_monthly_schedule(),
            reset_daily_tokens: default_reset_daily_tokens_schedule(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,

    /// Bearer token required on /v1 routes when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_token: Option<String>,
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("port", &self.port)
            .field("host", &self.host)
            .field("admin_token", &redact(&self.admin_token))
            .finish()
    }
}

fn default_port() -> u16 {
    42618
}
fn default_host() -> String {
    "127.0.0.1".into()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            admin_token: None,
        }
    }
}

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct DiscordConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bot_token: Option<String>,

    /// Channels the bot answers in; empty means all.
    #[serde(default)]
    pub allowed_channels: Vec<String>,
}

impl std::fmt::Debug for DiscordConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscordConfig")
            .field("bot_token", &redact(&self.bot_token))
            .field("allowed_channels", &self.allowed_channels)
            .finish()
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.threadsage/config.toml).
    ///
    /// Environment overrides (highest priority):
    /// - `THREADSAGE_PRIMARY_API_KEY` / `THREADSAGE_SECONDARY_API_KEY`
    /// - `GEMINI_API_KEY` / `OPENAI_API_KEY` for entries of that kind without a key
    /// - `THREADSAGE_DB_PATH`, `THREADSAGE_ADMIN_ID`, `THREADSAGE_DAILY_TOKEN_LIMIT`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        let slots = ["THREADSAGE_PRIMARY_API_KEY", "THREADSAGE_SECONDARY_API_KEY"];
        for (entry, key) in self.providers.iter_mut().zip(slots) {
            if let Some(value) = var(key) {
                entry.api_key = Some(value);
            }
        }

        for entry in &mut self.providers {
            if entry.api_key.is_none() {
                entry.api_key = match entry.kind.as_str() {
                    "gemini" => var("GEMINI_API_KEY"),
                    "openai" => var("OPENAI_API_KEY"),
                    _ => None,
                };
            }
        }

        if let Some(path) = var("THREADSAGE_DB_PATH") {
            self.store.path = PathBuf::from(path);
        }

        if let Some(admin) = var("THREADSAGE_ADMIN_ID") {
            self.session.admin_id = Some(admin);
        }

        if let Some(limit) = var("THREADSAGE_DAILY_TOKEN_LIMIT") {
            self.budget.daily_token_limit = limit.parse().map_err(|_| {
                ConfigError::ValidationError(format!(
                    "THREADSAGE_DAILY_TOKEN_LIMIT must be an integer, got '{limit}'"
                ))
            })?;
        }

        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".threadsage")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.providers.is_empty() {
            return Err(ConfigError::ValidationError(
                "at least one provider must be configured".into(),
            ));
        }

        if let Some(bad) = self
            .providers
            .iter()
            .find(|p| !matches!(p.kind.as_str(), "gemini" | "openai"))
        {
            return Err(ConfigError::ValidationError(format!(
                "provider '{}' has unknown kind '{}'",
                bad.name, bad.kind
            )));
        }

        if self.budget.daily_token_limit == 0 {
            return Err(ConfigError::ValidationError(
                "budget.daily_token_limit must be > 0".into(),
            ));
        }

        if self.formatter.max_message_len == 0 {
            return Err(ConfigError::ValidationError(
                "formatter.max_message_len must be > 0".into(),
            ));
        }

        if self.session.max_history_turns == 0 {
            return Err(ConfigError::ValidationError(
                "session.max_history_turns must be > 0".into(),
            ));
        }

        Ok(())
    }

    /// Generate a default config TOML string (for `onboard` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            providers: default_providers(),
            budget: BudgetConfig::default(),
            session: SessionConfig::default(),
            style: StyleConfig::default(),
            formatter: FormatterConfig::default(),
            store: StoreConfig::default(),
            schedule: ScheduleConfig::default(),
            gateway: GatewayConfig::default(),
            discord: DiscordConfig::default(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
