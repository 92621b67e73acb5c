use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const DEFAULT_PORT: u16 = 18790;
pub const DEFAULT_BIND: &str = "127.0.0.1";
pub const DEFAULT_TICK_SECS: u64 = 60; // one evaluation pass per minute
pub const DEFAULT_GENERATION_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_DELIVERY_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_GENERATOR_URL: &str = "http://127.0.0.1:8080";

/// Top-level config (reportline.toml + REPORTLINE_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReportlineConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub generator: GeneratorConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Tick cadence and run bounds for the execution engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between two evaluation passes over the active definitions.
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,
    /// Upper bound on a single report generator call. On expiry the run is
    /// recorded as a `timeout` delivery failure.
    #[serde(default = "default_generation_timeout_secs")]
    pub generation_timeout_secs: u64,
    /// Upper bound on delivering one artifact (mail and/or file write).
    #[serde(default = "default_delivery_timeout_secs")]
    pub delivery_timeout_secs: u64,
    /// Deactivate a definition after this many failed runs in a row.
    /// Unset means failures never pause a definition.
    #[serde(default)]
    pub max_consecutive_failures: Option<u32>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_secs: DEFAULT_TICK_SECS,
            generation_timeout_secs: DEFAULT_GENERATION_TIMEOUT_SECS,
            delivery_timeout_secs: DEFAULT_DELIVERY_TIMEOUT_SECS,
            max_consecutive_failures: None,
        }
    }
}

/// Where the external report renderer lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorConfig {
    #[serde(default = "default_generator_url")]
    pub base_url: String,
    /// Sent as a bearer token when set.
    pub api_key: Option<String>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_GENERATOR_URL.to_string(),
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// `From:` header on every outbound mail.
    #[serde(default = "default_from_address")]
    pub from_address: String,
    /// When set, filesystem destinations must resolve inside this directory.
    pub output_root: Option<String>,
    #[serde(default = "default_mail_retry_attempts")]
    pub mail_retry_attempts: u32,
    #[serde(default = "default_mail_retry_base_ms")]
    pub mail_retry_base_ms: u64,
    /// SMTP relay. Without it mail is logged instead of sent.
    pub smtp: Option<SmtpConfig>,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            from_address: default_from_address(),
            output_root: None,
            mail_retry_attempts: default_mail_retry_attempts(),
            mail_retry_base_ms: default_mail_retry_base_ms(),
            smtp: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_tick_secs() -> u64 {
    DEFAULT_TICK_SECS
}
fn default_generation_timeout_secs() -> u64 {
    DEFAULT_GENERATION_TIMEOUT_SECS
}
fn default_delivery_timeout_secs() -> u64 {
    DEFAULT_DELIVERY_TIMEOUT_SECS
}
fn default_generator_url() -> String {
    DEFAULT_GENERATOR_URL.to_string()
}
fn default_from_address() -> String {
    "reports@localhost".to_string()
}
fn default_mail_retry_attempts() -> u32 {
    3
}
fn default_mail_retry_base_ms() -> u64 {
    500
}
fn default_smtp_port() -> u16 {
    587
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.reportline/reportline.db", home)
}

impl ReportlineConfig {
    /// Load config from a TOML file with REPORTLINE_* env var overrides.
    ///
    /// Nested keys use a double underscore, e.g.
    /// `REPORTLINE_SCHEDULER__TICK_SECS=30`.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);
        debug!(path = %path, "loading configuration");

        let config: ReportlineConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("REPORTLINE_").split("__"))
            .extract()
            .map_err(|e| crate::error::ReportlineError::Config(e.to_string()))?;

        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.reportline/reportline.toml", home)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        figment::Jail::expect_with(|jail| {
            let path = jail.directory().join("absent.toml");
            let cfg = ReportlineConfig::load(path.to_str()).expect("load");
            assert_eq!(cfg.gateway.port, DEFAULT_PORT);
            assert_eq!(cfg.scheduler.tick_secs, DEFAULT_TICK_SECS);
            assert!(cfg.scheduler.max_consecutive_failures.is_none());
            assert!(cfg.delivery.smtp.is_none());
            Ok(())
        });
    }

    #[test]
    fn toml_then_env_override() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "reportline.toml",
                r#"
                [scheduler]
                tick_secs = 15
                max_consecutive_failures = 5

                [delivery.smtp]
                host = "smtp.example.com"
                "#,
            )?;
            jail.set_env("REPORTLINE_SCHEDULER__TICK_SECS", "30");
            jail.set_env("REPORTLINE_GATEWAY__PORT", "9000");

            let cfg = ReportlineConfig::load(Some("reportline.toml")).expect("load");
            assert_eq!(cfg.scheduler.tick_secs, 30);
            assert_eq!(cfg.scheduler.max_consecutive_failures, Some(5));
            assert_eq!(cfg.gateway.port, 9000);
            let smtp = cfg.delivery.smtp.expect("smtp section");
            assert_eq!(smtp.host, "smtp.example.com");
            assert_eq!(smtp.port, 587);
            Ok(())
        });
    }
}
