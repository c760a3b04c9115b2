use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_PATH_ENV: &str = "TRIP_PLOT_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";

const MAPS_API_KEY_ENV: &str = "TRIP_PLOT_MAPS_API_KEY";
const SMTP_USERNAME_ENV: &str = "TRIP_PLOT_SMTP_USERNAME";
const SMTP_PASSWORD_ENV: &str = "TRIP_PLOT_SMTP_PASSWORD";

/// Upper bound on `maps.max_attempts`
pub const MAX_ATTEMPTS_LIMIT: u32 = 10;
/// Tick steps plotters can place exactly on whole hours
pub const TICK_STEPS: [u32; 4] = [1, 2, 5, 10];

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub addresses: Addresses,
    #[serde(default)]
    pub labels: Labels,
    #[serde(default)]
    pub windows: Windows,
    pub maps: MapsConfig,
    pub smtp: SmtpConfig,
    #[serde(default)]
    pub chart: ChartConfig,
}

/// The two fixed endpoints of the trip
#[derive(Debug, Clone, Deserialize)]
pub struct Addresses {
    pub a: String,
    pub b: String,
}

/// Text drawn next to the last point of each series
#[derive(Debug, Clone, Deserialize)]
pub struct Labels {
    #[serde(default = "default_label_to_a")]
    pub to_a: String,
    #[serde(default = "default_label_to_b")]
    pub to_b: String,
}

impl Default for Labels {
    fn default() -> Self {
        Self {
            to_a: default_label_to_a(),
            to_b: default_label_to_b(),
        }
    }
}

/// Closed hour range `[start_hour, end_hour]` on the target date
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
pub struct HourWindow {
    pub start_hour: u32,
    pub end_hour: u32,
}

impl HourWindow {
    pub const fn new(start_hour: u32, end_hour: u32) -> Self {
        Self {
            start_hour,
            end_hour,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Windows {
    #[serde(default = "default_window_a_to_b")]
    pub a_to_b: HourWindow,
    #[serde(default = "default_window_b_to_a")]
    pub b_to_a: HourWindow,
}

impl Default for Windows {
    fn default() -> Self {
        Self {
            a_to_b: default_window_a_to_b(),
            b_to_a: default_window_b_to_a(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MapsConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_maps_base_url")]
    pub base_url: String,
    #[serde(default = "default_maps_timeout_secs")]
    pub timeout_secs: u64,
    /// Total attempts per query. 1 means no retry.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the first retry; doubled for each further one
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

impl MapsConfig {
    pub fn request_policy(&self) -> RequestPolicy {
        RequestPolicy {
            timeout: Duration::from_secs(self.timeout_secs),
            max_attempts: self.max_attempts,
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
        }
    }
}

/// Timeout and retry contract for outgoing provider requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestPolicy {
    pub timeout: Duration,
    pub max_attempts: u32,
    pub retry_backoff: Duration,
}

impl RequestPolicy {
    /// Wait before attempt `attempt` (1-based, so the first retry is 1)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2_u32.saturating_pow(attempt.saturating_sub(1));
        self.retry_backoff.saturating_mul(factor)
    }
}

impl Default for RequestPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(default_maps_timeout_secs()),
            max_attempts: default_max_attempts(),
            retry_backoff: Duration::from_millis(default_retry_backoff_ms()),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmtpConfig {
    #[serde(default = "default_smtp_host")]
    pub host: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// Sender address. Falls back to `username` when absent.
    #[serde(default)]
    pub sender: Option<String>,
    pub recipient: Recipient,
    #[serde(default = "default_smtp_timeout_secs")]
    pub timeout_secs: u64,
}

impl SmtpConfig {
    pub fn sender_address(&self) -> &str {
        self.sender.as_deref().unwrap_or(&self.username)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Either a plain mailbox or a phone number reached through a carrier's
/// email-to-SMS gateway
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum Recipient {
    Email { email: String },
    Sms { phone: String, gateway: String },
}

impl Recipient {
    pub fn address(&self) -> String {
        match self {
            Recipient::Email { email } => email.clone(),
            Recipient::Sms { phone, gateway } => format!("{}@{}", phone, gateway),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChartConfig {
    #[serde(default = "default_chart_path")]
    pub path: PathBuf,
    #[serde(default = "default_chart_width")]
    pub width: u32,
    #[serde(default = "default_chart_height")]
    pub height: u32,
    /// Visible x range, in hours of the target date
    #[serde(default = "default_chart_x_range")]
    pub x_range: HourWindow,
    #[serde(default = "default_tick_hours")]
    pub tick_hours: u32,
}

impl Default for ChartConfig {
    fn default() -> Self {
        Self {
            path: default_chart_path(),
            width: default_chart_width(),
            height: default_chart_height(),
            x_range: default_chart_x_range(),
            tick_hours: default_tick_hours(),
        }
    }
}

fn default_label_to_a() -> String {
    "To A".to_string()
}

fn default_label_to_b() -> String {
    "To B".to_string()
}

fn default_window_a_to_b() -> HourWindow {
    HourWindow::new(4, 14)
}

fn default_window_b_to_a() -> HourWindow {
    HourWindow::new(12, 22)
}

fn default_maps_base_url() -> String {
    "https://maps.googleapis.com/maps/api/directions/json".to_string()
}

fn default_maps_timeout_secs() -> u64 {
    30
}

fn default_max_attempts() -> u32 {
    1
}

fn default_retry_backoff_ms() -> u64 {
    2000
}

fn default_smtp_host() -> String {
    "smtp.gmail.com".to_string()
}

fn default_smtp_port() -> u16 {
    587
}

fn default_smtp_timeout_secs() -> u64 {
    60
}

fn default_chart_path() -> PathBuf {
    PathBuf::from("trip_duration_plot.jpg")
}

fn default_chart_width() -> u32 {
    1200
}

fn default_chart_height() -> u32 {
    1800
}

fn default_chart_x_range() -> HourWindow {
    HourWindow::new(4, 22)
}

fn default_tick_hours() -> u32 {
    2
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::ReadError(e.to_string()))?;

        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Load from the path named by `TRIP_PLOT_CONFIG` (or `config.yaml`),
    /// apply secret overrides from the environment and validate.
    pub fn from_env() -> Result<Self, ConfigError> {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());
        let mut config = Self::load(&path)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Replace secrets with values from `lookup` where present
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup(MAPS_API_KEY_ENV) {
            self.maps.api_key = key;
        }
        if let Some(username) = lookup(SMTP_USERNAME_ENV) {
            self.smtp.username = username;
        }
        if let Some(password) = lookup(SMTP_PASSWORD_ENV) {
            self.smtp.password = password;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.addresses.a.trim().is_empty() || self.addresses.b.trim().is_empty() {
            return Err(ConfigError::Invalid("both addresses must be set".into()));
        }
        for (name, window) in [
            ("windows.a_to_b", self.windows.a_to_b),
            ("windows.b_to_a", self.windows.b_to_a),
            ("chart.x_range", self.chart.x_range),
        ] {
            if window.start_hour >= window.end_hour || window.end_hour > 23 {
                return Err(ConfigError::Invalid(format!(
                    "{} must satisfy start_hour < end_hour <= 23, got {}..{}",
                    name, window.start_hour, window.end_hour
                )));
            }
        }
        if self.maps.api_key.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "maps.api_key is empty (set it in the file or via {})",
                MAPS_API_KEY_ENV
            )));
        }
        if self.maps.max_attempts == 0 || self.maps.max_attempts > MAX_ATTEMPTS_LIMIT {
            return Err(ConfigError::Invalid(format!(
                "maps.max_attempts must be between 1 and {}, got {}",
                MAX_ATTEMPTS_LIMIT, self.maps.max_attempts
            )));
        }
        if self.smtp.sender_address().is_empty() {
            return Err(ConfigError::Invalid("smtp.sender or smtp.username must be set".into()));
        }
        if self.chart.width == 0 || self.chart.height == 0 {
            return Err(ConfigError::Invalid(
                "chart width and height must be non-zero".into(),
            ));
        }
        if !TICK_STEPS.contains(&self.chart.tick_hours)
            || self.chart.x_range.start_hour % self.chart.tick_hours != 0
        {
            return Err(ConfigError::Invalid(format!(
                "chart.tick_hours must be one of {:?} and divide chart.x_range.start_hour, got {}",
                TICK_STEPS, self.chart.tick_hours
            )));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(String),
    #[error("Failed to parse config: {0}")]
    ParseError(String),
    #[error("Invalid config: {0}")]
    Invalid(String),
}
