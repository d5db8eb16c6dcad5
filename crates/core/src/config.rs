use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::resilience::{CircuitBreakerConfig, RateLimiterConfig};
use crate::sla::SlaThresholds;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub runtime: RuntimeConfig,
    pub resilience: ResilienceConfig,
    pub ingestion: IngestionConfig,
    pub sla: SlaConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

/// Mailbox and processing-loop settings shared by every subagent.
#[derive(Clone, Debug, PartialEq)]
pub struct RuntimeConfig {
    pub mailbox_capacity: usize,
    pub dequeue_timeout_ms: u64,
    pub retry_base_delay_ms: u64,
    pub max_retries: u32,
    pub health_error_rate_threshold: f64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResilienceConfig {
    pub breaker_failure_threshold: u32,
    pub breaker_recovery_timeout_secs: u64,
    pub rate_limit_max_requests: u32,
    pub rate_limit_window_secs: u64,
    pub rate_limit_poll_interval_ms: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IngestionConfig {
    pub polling_interval_secs: u64,
    pub processing_interval_ms: u64,
    pub buffer_size: usize,
    pub batch_size: usize,
    pub partitions: usize,
    pub dedup_capacity: usize,
    pub ticket_cache_capacity: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SlaConfig {
    pub check_interval_secs: u64,
    pub warning_threshold_minutes: i64,
    pub critical_threshold_minutes: i64,
    pub alert_cooldown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
    pub webhook_secret: Option<SecretString>,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub log_level: Option<String>,
    pub log_format: Option<LogFormat>,
    pub bind_address: Option<String>,
    pub port: Option<u16>,
    pub webhook_secret: Option<String>,
    pub polling_interval_secs: Option<u64>,
    pub partitions: Option<usize>,
    pub sla_check_interval_secs: Option<u64>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            runtime: RuntimeConfig {
                mailbox_capacity: 10_000,
                dequeue_timeout_ms: 1_000,
                retry_base_delay_ms: 1_000,
                max_retries: 3,
                health_error_rate_threshold: 0.1,
            },
            resilience: ResilienceConfig {
                breaker_failure_threshold: 5,
                breaker_recovery_timeout_secs: 60,
                rate_limit_max_requests: 100,
                rate_limit_window_secs: 60,
                rate_limit_poll_interval_ms: 1_000,
            },
            ingestion: IngestionConfig {
                polling_interval_secs: 30,
                processing_interval_ms: 1_000,
                buffer_size: 10_000,
                batch_size: 100,
                partitions: default_partitions(),
                dedup_capacity: 10_000,
                ticket_cache_capacity: 10_000,
            },
            sla: SlaConfig {
                check_interval_secs: 60,
                warning_threshold_minutes: 30,
                critical_threshold_minutes: 10,
                alert_cooldown_secs: 300,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
                webhook_secret: None,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn default_partitions() -> usize {
    std::thread::available_parallelism().map(|count| count.get()).unwrap_or(1)
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl RuntimeConfig {
    pub fn dequeue_timeout(&self) -> Duration {
        Duration::from_millis(self.dequeue_timeout_ms)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }
}

impl ResilienceConfig {
    pub fn circuit_breaker(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.breaker_failure_threshold,
            recovery_timeout: Duration::from_secs(self.breaker_recovery_timeout_secs),
        }
    }

    pub fn rate_limiter(&self) -> RateLimiterConfig {
        RateLimiterConfig {
            max_requests: self.rate_limit_max_requests,
            time_window: Duration::from_secs(self.rate_limit_window_secs),
            poll_interval: Duration::from_millis(self.rate_limit_poll_interval_ms),
        }
    }
}

impl IngestionConfig {
    pub fn polling_interval(&self) -> Duration {
        Duration::from_secs(self.polling_interval_secs)
    }

    pub fn processing_interval(&self) -> Duration {
        Duration::from_millis(self.processing_interval_ms)
    }
}

impl SlaConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    pub fn alert_cooldown(&self) -> Duration {
        Duration::from_secs(self.alert_cooldown_secs)
    }

    pub fn thresholds(&self) -> SlaThresholds {
        SlaThresholds {
            warning_minutes: self.warning_threshold_minutes,
            critical_minutes: self.critical_threshold_minutes,
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("slawatch.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(runtime) = patch.runtime {
            if let Some(mailbox_capacity) = runtime.mailbox_capacity {
                self.runtime.mailbox_capacity = mailbox_capacity;
            }
            if let Some(dequeue_timeout_ms) = runtime.dequeue_timeout_ms {
                self.runtime.dequeue_timeout_ms = dequeue_timeout_ms;
            }
            if let Some(retry_base_delay_ms) = runtime.retry_base_delay_ms {
                self.runtime.retry_base_delay_ms = retry_base_delay_ms;
            }
            if let Some(max_retries) = runtime.max_retries {
                self.runtime.max_retries = max_retries;
            }
            if let Some(threshold) = runtime.health_error_rate_threshold {
                self.runtime.health_error_rate_threshold = threshold;
            }
        }

        if let Some(resilience) = patch.resilience {
            if let Some(threshold) = resilience.breaker_failure_threshold {
                self.resilience.breaker_failure_threshold = threshold;
            }
            if let Some(timeout) = resilience.breaker_recovery_timeout_secs {
                self.resilience.breaker_recovery_timeout_secs = timeout;
            }
            if let Some(max_requests) = resilience.rate_limit_max_requests {
                self.resilience.rate_limit_max_requests = max_requests;
            }
            if let Some(window) = resilience.rate_limit_window_secs {
                self.resilience.rate_limit_window_secs = window;
            }
            if let Some(interval) = resilience.rate_limit_poll_interval_ms {
                self.resilience.rate_limit_poll_interval_ms = interval;
            }
        }

        if let Some(ingestion) = patch.ingestion {
            if let Some(interval) = ingestion.polling_interval_secs {
                self.ingestion.polling_interval_secs = interval;
            }
            if let Some(interval) = ingestion.processing_interval_ms {
                self.ingestion.processing_interval_ms = interval;
            }
            if let Some(buffer_size) = ingestion.buffer_size {
                self.ingestion.buffer_size = buffer_size;
            }
            if let Some(batch_size) = ingestion.batch_size {
                self.ingestion.batch_size = batch_size;
            }
            if let Some(partitions) = ingestion.partitions {
                self.ingestion.partitions = partitions;
            }
            if let Some(capacity) = ingestion.dedup_capacity {
                self.ingestion.dedup_capacity = capacity;
            }
            if let Some(capacity) = ingestion.ticket_cache_capacity {
                self.ingestion.ticket_cache_capacity = capacity;
            }
        }

        if let Some(sla) = patch.sla {
            if let Some(interval) = sla.check_interval_secs {
                self.sla.check_interval_secs = interval;
            }
            if let Some(minutes) = sla.warning_threshold_minutes {
                self.sla.warning_threshold_minutes = minutes;
            }
            if let Some(minutes) = sla.critical_threshold_minutes {
                self.sla.critical_threshold_minutes = minutes;
            }
            if let Some(cooldown) = sla.alert_cooldown_secs {
                self.sla.alert_cooldown_secs = cooldown;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
            if let Some(webhook_secret) = server.webhook_secret {
                self.server.webhook_secret = Some(secret_value(webhook_secret));
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("SLAWATCH_RUNTIME_MAILBOX_CAPACITY") {
            self.runtime.mailbox_capacity =
                parse_usize("SLAWATCH_RUNTIME_MAILBOX_CAPACITY", &value)?;
        }
        if let Some(value) = read_env("SLAWATCH_RUNTIME_MAX_RETRIES") {
            self.runtime.max_retries = parse_u32("SLAWATCH_RUNTIME_MAX_RETRIES", &value)?;
        }
        if let Some(value) = read_env("SLAWATCH_RUNTIME_HEALTH_ERROR_RATE_THRESHOLD") {
            self.runtime.health_error_rate_threshold =
                parse_f64("SLAWATCH_RUNTIME_HEALTH_ERROR_RATE_THRESHOLD", &value)?;
        }

        if let Some(value) = read_env("SLAWATCH_RESILIENCE_BREAKER_FAILURE_THRESHOLD") {
            self.resilience.breaker_failure_threshold =
                parse_u32("SLAWATCH_RESILIENCE_BREAKER_FAILURE_THRESHOLD", &value)?;
        }
        if let Some(value) = read_env("SLAWATCH_RESILIENCE_BREAKER_RECOVERY_TIMEOUT_SECS") {
            self.resilience.breaker_recovery_timeout_secs =
                parse_u64("SLAWATCH_RESILIENCE_BREAKER_RECOVERY_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("SLAWATCH_RESILIENCE_RATE_LIMIT_MAX_REQUESTS") {
            self.resilience.rate_limit_max_requests =
                parse_u32("SLAWATCH_RESILIENCE_RATE_LIMIT_MAX_REQUESTS", &value)?;
        }
        if let Some(value) = read_env("SLAWATCH_RESILIENCE_RATE_LIMIT_WINDOW_SECS") {
            self.resilience.rate_limit_window_secs =
                parse_u64("SLAWATCH_RESILIENCE_RATE_LIMIT_WINDOW_SECS", &value)?;
        }

        if let Some(value) = read_env("SLAWATCH_INGESTION_POLLING_INTERVAL_SECS") {
            self.ingestion.polling_interval_secs =
                parse_u64("SLAWATCH_INGESTION_POLLING_INTERVAL_SECS", &value)?;
        }
        if let Some(value) = read_env("SLAWATCH_INGESTION_BUFFER_SIZE") {
            self.ingestion.buffer_size = parse_usize("SLAWATCH_INGESTION_BUFFER_SIZE", &value)?;
        }
        if let Some(value) = read_env("SLAWATCH_INGESTION_PARTITIONS") {
            self.ingestion.partitions = parse_usize("SLAWATCH_INGESTION_PARTITIONS", &value)?;
        }
        if let Some(value) = read_env("SLAWATCH_INGESTION_DEDUP_CAPACITY") {
            self.ingestion.dedup_capacity =
                parse_usize("SLAWATCH_INGESTION_DEDUP_CAPACITY", &value)?;
        }

        if let Some(value) = read_env("SLAWATCH_SLA_CHECK_INTERVAL_SECS") {
            self.sla.check_interval_secs = parse_u64("SLAWATCH_SLA_CHECK_INTERVAL_SECS", &value)?;
        }
        if let Some(value) = read_env("SLAWATCH_SLA_WARNING_THRESHOLD_MINUTES") {
            self.sla.warning_threshold_minutes =
                parse_i64("SLAWATCH_SLA_WARNING_THRESHOLD_MINUTES", &value)?;
        }
        if let Some(value) = read_env("SLAWATCH_SLA_CRITICAL_THRESHOLD_MINUTES") {
            self.sla.critical_threshold_minutes =
                parse_i64("SLAWATCH_SLA_CRITICAL_THRESHOLD_MINUTES", &value)?;
        }
        if let Some(value) = read_env("SLAWATCH_SLA_ALERT_COOLDOWN_SECS") {
            self.sla.alert_cooldown_secs = parse_u64("SLAWATCH_SLA_ALERT_COOLDOWN_SECS", &value)?;
        }

        if let Some(value) = read_env("SLAWATCH_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("SLAWATCH_SERVER_PORT") {
            self.server.port = parse_u16("SLAWATCH_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("SLAWATCH_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("SLAWATCH_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }
        if let Some(value) = read_env("SLAWATCH_SERVER_WEBHOOK_SECRET") {
            self.server.webhook_secret = Some(secret_value(value));
        }

        let log_level =
            read_env("SLAWATCH_LOGGING_LEVEL").or_else(|| read_env("SLAWATCH_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("SLAWATCH_LOGGING_FORMAT").or_else(|| read_env("SLAWATCH_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(log_format) = overrides.log_format {
            self.logging.format = log_format;
        }
        if let Some(bind_address) = overrides.bind_address {
            self.server.bind_address = bind_address;
        }
        if let Some(port) = overrides.port {
            self.server.port = port;
        }
        if let Some(webhook_secret) = overrides.webhook_secret {
            self.server.webhook_secret = Some(secret_value(webhook_secret));
        }
        if let Some(interval) = overrides.polling_interval_secs {
            self.ingestion.polling_interval_secs = interval;
        }
        if let Some(partitions) = overrides.partitions {
            self.ingestion.partitions = partitions;
        }
        if let Some(interval) = overrides.sla_check_interval_secs {
            self.sla.check_interval_secs = interval;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_runtime(&self.runtime)?;
        validate_resilience(&self.resilience)?;
        validate_ingestion(&self.ingestion)?;
        validate_sla(&self.sla)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("slawatch.toml"), PathBuf::from("config/slawatch.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_runtime(runtime: &RuntimeConfig) -> Result<(), ConfigError> {
    if runtime.mailbox_capacity == 0 {
        return Err(ConfigError::Validation(
            "runtime.mailbox_capacity must be greater than zero".to_string(),
        ));
    }
    if runtime.dequeue_timeout_ms == 0 {
        return Err(ConfigError::Validation(
            "runtime.dequeue_timeout_ms must be greater than zero".to_string(),
        ));
    }
    if runtime.max_retries > 16 {
        return Err(ConfigError::Validation(
            "runtime.max_retries must be in range 0..=16 (backoff doubles per retry)".to_string(),
        ));
    }
    let threshold = runtime.health_error_rate_threshold;
    if !(threshold > 0.0 && threshold <= 1.0) {
        return Err(ConfigError::Validation(
            "runtime.health_error_rate_threshold must be in range (0, 1]".to_string(),
        ));
    }
    Ok(())
}

fn validate_resilience(resilience: &ResilienceConfig) -> Result<(), ConfigError> {
    if resilience.breaker_failure_threshold == 0 {
        return Err(ConfigError::Validation(
            "resilience.breaker_failure_threshold must be greater than zero".to_string(),
        ));
    }
    if resilience.rate_limit_max_requests == 0 || resilience.rate_limit_window_secs == 0 {
        return Err(ConfigError::Validation(
            "resilience.rate_limit_max_requests and rate_limit_window_secs \
             must be greater than zero"
                .to_string(),
        ));
    }
    if resilience.rate_limit_poll_interval_ms == 0 {
        return Err(ConfigError::Validation(
            "resilience.rate_limit_poll_interval_ms must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

fn validate_ingestion(ingestion: &IngestionConfig) -> Result<(), ConfigError> {
    let zero_field = [
        ("polling_interval_secs", ingestion.polling_interval_secs as usize),
        ("processing_interval_ms", ingestion.processing_interval_ms as usize),
        ("buffer_size", ingestion.buffer_size),
        ("batch_size", ingestion.batch_size),
        ("partitions", ingestion.partitions),
        ("dedup_capacity", ingestion.dedup_capacity),
        ("ticket_cache_capacity", ingestion.ticket_cache_capacity),
    ]
    .into_iter()
    .find(|(_, value)| *value == 0);

    if let Some((field, _)) = zero_field {
        return Err(ConfigError::Validation(format!(
            "ingestion.{field} must be greater than zero"
        )));
    }
    Ok(())
}

fn validate_sla(sla: &SlaConfig) -> Result<(), ConfigError> {
    if sla.check_interval_secs == 0 {
        return Err(ConfigError::Validation(
            "sla.check_interval_secs must be greater than zero".to_string(),
        ));
    }
    if sla.critical_threshold_minutes < 0 {
        return Err(ConfigError::Validation(
            "sla.critical_threshold_minutes must not be negative".to_string(),
        ));
    }
    if sla.warning_threshold_minutes <= sla.critical_threshold_minutes {
        return Err(ConfigError::Validation(format!(
            "sla.warning_threshold_minutes ({}) must be greater than \
             sla.critical_threshold_minutes ({})",
            sla.warning_threshold_minutes, sla.critical_threshold_minutes
        )));
    }
    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.bind_address.trim().is_empty() {
        return Err(ConfigError::Validation("server.bind_address must not be empty".to_string()));
    }

    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    let empty_secret = server
        .webhook_secret
        .as_ref()
        .is_some_and(|secret| secret.expose_secret().trim().is_empty());
    if empty_secret {
        return Err(ConfigError::Validation(
            "server.webhook_secret is set but empty; remove it to disable signature checks"
                .to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn invalid_override(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidEnvOverride { key: key.to_string(), value: value.to_string() }
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.trim().parse::<u16>().map_err(|_| invalid_override(key, value))
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.trim().parse::<u32>().map_err(|_| invalid_override(key, value))
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.trim().parse::<u64>().map_err(|_| invalid_override(key, value))
}

fn parse_i64(key: &str, value: &str) -> Result<i64, ConfigError> {
    value.trim().parse::<i64>().map_err(|_| invalid_override(key, value))
}

fn parse_usize(key: &str, value: &str) -> Result<usize, ConfigError> {
    value.trim().parse::<usize>().map_err(|_| invalid_override(key, value))
}

fn parse_f64(key: &str, value: &str) -> Result<f64, ConfigError> {
    value.trim().parse::<f64>().map_err(|_| invalid_override(key, value))
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    runtime: Option<RuntimePatch>,
    resilience: Option<ResiliencePatch>,
    ingestion: Option<IngestionPatch>,
    sla: Option<SlaPatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct RuntimePatch {
    mailbox_capacity: Option<usize>,
    dequeue_timeout_ms: Option<u64>,
    retry_base_delay_ms: Option<u64>,
    max_retries: Option<u32>,
    health_error_rate_threshold: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct ResiliencePatch {
    breaker_failure_threshold: Option<u32>,
    breaker_recovery_timeout_secs: Option<u64>,
    rate_limit_max_requests: Option<u32>,
    rate_limit_window_secs: Option<u64>,
    rate_limit_poll_interval_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct IngestionPatch {
    polling_interval_secs: Option<u64>,
    processing_interval_ms: Option<u64>,
    buffer_size: Option<usize>,
    batch_size: Option<usize>,
    partitions: Option<usize>,
    dedup_capacity: Option<usize>,
    ticket_cache_capacity: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct SlaPatch {
    check_interval_secs: Option<u64>,
    warning_threshold_minutes: Option<i64>,
    critical_threshold_minutes: Option<i64>,
    alert_cooldown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
    webhook_secret: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
