use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub guard: GuardConfig,
    pub worker: WorkerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

/// Reply-guard tuning: rogue detection window, pause durations and the
/// generation retry bound.
#[derive(Clone, Debug)]
pub struct GuardConfig {
    /// Lookback window for counting outbound automated messages, in seconds.
    pub rogue_window_secs: u64,
    /// Outbound messages allowed inside the lookback window before the
    /// breaker trips.
    pub rogue_max_messages: u64,
    /// Pause applied automatically when the breaker trips, in minutes.
    pub auto_pause_minutes: u32,
    /// Pause applied when a caller supplies no explicit duration, in minutes.
    pub default_pause_minutes: u32,
    /// Failure count at which a retryable generation failure is dropped.
    pub retry_threshold: u32,
}

#[derive(Clone, Debug)]
pub struct WorkerConfig {
    pub poll_interval_ms: u64,
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
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub rogue_window_secs: Option<u64>,
    pub rogue_max_messages: Option<u64>,
    pub auto_pause_minutes: Option<u32>,
    pub default_pause_minutes: Option<u32>,
    pub retry_threshold: Option<u32>,
    pub poll_interval_ms: Option<u64>,
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
            database: DatabaseConfig {
                url: "sqlite://parley.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            guard: GuardConfig {
                rogue_window_secs: 60,
                rogue_max_messages: 10,
                auto_pause_minutes: 30,
                default_pause_minutes: 30,
                retry_threshold: 3,
            },
            worker: WorkerConfig { poll_interval_ms: 250 },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
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

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("parley.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(guard) = patch.guard {
            if let Some(rogue_window_secs) = guard.rogue_window_secs {
                self.guard.rogue_window_secs = rogue_window_secs;
            }
            if let Some(rogue_max_messages) = guard.rogue_max_messages {
                self.guard.rogue_max_messages = rogue_max_messages;
            }
            if let Some(auto_pause_minutes) = guard.auto_pause_minutes {
                self.guard.auto_pause_minutes = auto_pause_minutes;
            }
            if let Some(default_pause_minutes) = guard.default_pause_minutes {
                self.guard.default_pause_minutes = default_pause_minutes;
            }
            if let Some(retry_threshold) = guard.retry_threshold {
                self.guard.retry_threshold = retry_threshold;
            }
        }

        if let Some(worker) = patch.worker {
            if let Some(poll_interval_ms) = worker.poll_interval_ms {
                self.worker.poll_interval_ms = poll_interval_ms;
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
        if let Some(value) = read_env("PARLEY_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("PARLEY_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse_u32("PARLEY_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("PARLEY_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("PARLEY_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("PARLEY_GUARD_ROGUE_WINDOW_SECS") {
            self.guard.rogue_window_secs = parse_u64("PARLEY_GUARD_ROGUE_WINDOW_SECS", &value)?;
        }
        if let Some(value) = read_env("PARLEY_GUARD_ROGUE_MAX_MESSAGES") {
            self.guard.rogue_max_messages = parse_u64("PARLEY_GUARD_ROGUE_MAX_MESSAGES", &value)?;
        }
        if let Some(value) = read_env("PARLEY_GUARD_AUTO_PAUSE_MINUTES") {
            self.guard.auto_pause_minutes = parse_u32("PARLEY_GUARD_AUTO_PAUSE_MINUTES", &value)?;
        }
        if let Some(value) = read_env("PARLEY_GUARD_DEFAULT_PAUSE_MINUTES") {
            self.guard.default_pause_minutes =
                parse_u32("PARLEY_GUARD_DEFAULT_PAUSE_MINUTES", &value)?;
        }
        if let Some(value) = read_env("PARLEY_GUARD_RETRY_THRESHOLD") {
            self.guard.retry_threshold = parse_u32("PARLEY_GUARD_RETRY_THRESHOLD", &value)?;
        }

        if let Some(value) = read_env("PARLEY_WORKER_POLL_INTERVAL_MS") {
            self.worker.poll_interval_ms = parse_u64("PARLEY_WORKER_POLL_INTERVAL_MS", &value)?;
        }

        let log_level = read_env("PARLEY_LOGGING_LEVEL").or_else(|| read_env("PARLEY_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("PARLEY_LOGGING_FORMAT").or_else(|| read_env("PARLEY_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(rogue_window_secs) = overrides.rogue_window_secs {
            self.guard.rogue_window_secs = rogue_window_secs;
        }
        if let Some(rogue_max_messages) = overrides.rogue_max_messages {
            self.guard.rogue_max_messages = rogue_max_messages;
        }
        if let Some(auto_pause_minutes) = overrides.auto_pause_minutes {
            self.guard.auto_pause_minutes = auto_pause_minutes;
        }
        if let Some(default_pause_minutes) = overrides.default_pause_minutes {
            self.guard.default_pause_minutes = default_pause_minutes;
        }
        if let Some(retry_threshold) = overrides.retry_threshold {
            self.guard.retry_threshold = retry_threshold;
        }
        if let Some(poll_interval_ms) = overrides.poll_interval_ms {
            self.worker.poll_interval_ms = poll_interval_ms;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_guard(&self.guard)?;
        validate_worker(&self.worker)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("parley.toml"), PathBuf::from("config/parley.toml")]
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

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_guard(guard: &GuardConfig) -> Result<(), ConfigError> {
    if guard.rogue_window_secs == 0 {
        return Err(ConfigError::Validation(
            "guard.rogue_window_secs must be greater than zero".to_string(),
        ));
    }

    if guard.rogue_max_messages == 0 {
        return Err(ConfigError::Validation(
            "guard.rogue_max_messages must be greater than zero".to_string(),
        ));
    }

    if guard.auto_pause_minutes == 0 {
        return Err(ConfigError::Validation(
            "guard.auto_pause_minutes must be greater than zero".to_string(),
        ));
    }

    if guard.default_pause_minutes == 0 {
        return Err(ConfigError::Validation(
            "guard.default_pause_minutes must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_worker(worker: &WorkerConfig) -> Result<(), ConfigError> {
    if worker.poll_interval_ms == 0 || worker.poll_interval_ms > 60_000 {
        return Err(ConfigError::Validation(
            "worker.poll_interval_ms must be in range 1..=60000".to_string(),
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

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    guard: Option<GuardPatch>,
    worker: Option<WorkerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct GuardPatch {
    rogue_window_secs: Option<u64>,
    rogue_max_messages: Option<u64>,
    auto_pause_minutes: Option<u32>,
    default_pause_minutes: Option<u32>,
    retry_threshold: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct WorkerPatch {
    poll_interval_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::sync::{Mutex, OnceLock};

    use tempfile::TempDir;

    use super::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    #[test]
    fn defaults_validate() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let config = AppConfig::load(LoadOptions::default())
            .map_err(|err| format!("config load failed: {err}"))?;

        ensure(config.guard.rogue_window_secs == 60, "default rogue window should be 60s")?;
        ensure(config.guard.rogue_max_messages == 10, "default rogue max should be 10")?;
        ensure(config.guard.retry_threshold == 3, "default retry threshold should be 3")?;
        ensure(
            matches!(config.logging.format, LogFormat::Compact),
            "default logging format should be compact",
        )
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_PARLEY_DB_URL", "sqlite://from-env.db");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("parley.toml");
            fs::write(
                &path,
                r#"
[database]
url = "${TEST_PARLEY_DB_URL}"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.database.url == "sqlite://from-env.db",
                "database url should be loaded from environment",
            )
        })();

        clear_vars(&["TEST_PARLEY_DB_URL"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("PARLEY_GUARD_ROGUE_MAX_MESSAGES", "25");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("parley.toml");
            fs::write(
                &path,
                r#"
[database]
url = "sqlite://from-file.db"

[guard]
rogue_max_messages = 5
retry_threshold = 7

[logging]
level = "warn"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    database_url: Some("sqlite://from-override.db".to_string()),
                    log_level: Some("debug".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.database.url == "sqlite://from-override.db",
                "override database url should win",
            )?;
            ensure(config.logging.level == "debug", "overridden log level should be debug")?;
            ensure(
                config.guard.rogue_max_messages == 25,
                "env rogue max should win over the file value",
            )?;
            ensure(config.guard.retry_threshold == 7, "file retry threshold should apply")
        })();

        clear_vars(&["PARLEY_GUARD_ROGUE_MAX_MESSAGES"]);
        result
    }

    #[test]
    fn validation_rejects_zero_rogue_window() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let error = match AppConfig::load(LoadOptions {
            overrides: ConfigOverrides {
                rogue_window_secs: Some(0),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        }) {
            Ok(_) => {
                return Err("expected validation failure but config load succeeded".to_string())
            }
            Err(error) => error,
        };

        let has_message = matches!(
            error,
            ConfigError::Validation(ref message) if message.contains("guard.rogue_window_secs")
        );
        ensure(has_message, "validation failure should mention guard.rogue_window_secs")
    }

    #[test]
    fn invalid_env_override_is_rejected() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("PARLEY_GUARD_RETRY_THRESHOLD", "lots");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => return Err("expected env override failure".to_string()),
                Err(error) => error,
            };
            ensure(
                matches!(
                    error,
                    ConfigError::InvalidEnvOverride { ref key, .. }
                        if key == "PARLEY_GUARD_RETRY_THRESHOLD"
                ),
                "error should name the offending variable",
            )
        })();

        clear_vars(&["PARLEY_GUARD_RETRY_THRESHOLD"]);
        result
    }

    #[test]
    fn missing_required_file_is_an_error() {
        let result = AppConfig::load(LoadOptions {
            config_path: Some("does-not-exist.toml".into()),
            require_file: true,
            ..LoadOptions::default()
        });

        assert!(matches!(result, Err(ConfigError::MissingConfigFile(_))));
    }
}
