use chrono::NaiveDate;
use config::{ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub search: SearchConfig,
    pub query: QueryConfig,
    pub database: DatabaseConfig,
    pub alerts: AlertsConfig,
    pub startup: StartupConfig,
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SearchConfig {
    pub api_base: String,
    pub consumer_key: String,
    pub consumer_secret: String,
    /// Pre-issued app-only token; obtained from the consumer key pair when absent.
    pub bearer_token: Option<String>,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueryConfig {
    pub text: String,
    pub latitude: f64,
    pub longitude: f64,
    pub radius_km: u32,
    pub mode: RunMode,
    pub since: Option<NaiveDate>,
    pub until: Option<NaiveDate>,
    pub resume_cursor: Option<String>,
    pub delay_secs: u64,
    pub page_size: u32,
    pub tag: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    Continuous,
    Bounded,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub name: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AlertsConfig {
    pub api_base: String,
    pub bot_token: Option<String>,
    pub operator_chat_id: Option<i64>,
    pub poll_timeout_secs: u64,
    pub queue_capacity: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StartupConfig {
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TelemetryConfig {
    pub log_level: String,
    pub log_format: LogFormat,
    pub metrics_enabled: bool,
    pub metrics_port: u16,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

impl Config {
    /// Layers compiled defaults, an optional TOML file and `HARVESTER__*`
    /// environment variables. Callers validate what their command needs.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();

        // Load default configuration
        builder = builder.add_source(config::Config::try_from(&Config::default())?);

        match path {
            Some(path) => {
                builder = builder.add_source(File::from(path));
            }
            None if Path::new("config.toml").exists() => {
                builder = builder.add_source(File::with_name("config"));
            }
            None => {}
        }

        // Layer on environment variables (HARVESTER_ prefix)
        builder = builder.add_source(
            Environment::with_prefix("HARVESTER")
                .separator("__")
                .try_parsing(true),
        );

        let settings: Config = builder.build()?.try_deserialize()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.query.text.trim().is_empty() {
            return Err(ConfigError::Message("query.text is required".into()));
        }

        if self.query.tag.trim().is_empty() {
            return Err(ConfigError::Message("query.tag is required".into()));
        }

        if !(-90.0..=90.0).contains(&self.query.latitude)
            || !(-180.0..=180.0).contains(&self.query.longitude)
        {
            return Err(ConfigError::Message(format!(
                "query center ({}, {}) is out of range",
                self.query.latitude, self.query.longitude
            )));
        }

        if self.query.radius_km == 0 {
            return Err(ConfigError::Message(
                "query.radius_km must be greater than 0".into(),
            ));
        }

        if self.query.page_size == 0 {
            return Err(ConfigError::Message(
                "query.page_size must be greater than 0".into(),
            ));
        }

        if self.query.mode == RunMode::Bounded {
            match (self.query.since, self.query.until) {
                (Some(since), Some(until)) if since > until => {
                    return Err(ConfigError::Message(format!(
                        "query.since ({since}) must not be after query.until ({until})"
                    )));
                }
                (Some(_), Some(_)) => {}
                _ => {
                    return Err(ConfigError::Message(
                        "bounded mode requires query.since and query.until".into(),
                    ));
                }
            }
        }

        if let Some(cursor) = self.resume_cursor()? {
            if cursor <= 0 {
                return Err(ConfigError::Message(
                    "query.resume_cursor must be a positive id".into(),
                ));
            }
        }

        let has_key_pair =
            !self.search.consumer_key.is_empty() && !self.search.consumer_secret.is_empty();
        let has_token = self
            .search
            .bearer_token
            .as_deref()
            .is_some_and(|token| !token.is_empty());
        if !has_key_pair && !has_token {
            return Err(ConfigError::Message(
                "search credentials are required (consumer key/secret or bearer_token)".into(),
            ));
        }

        self.validate_database()?;

        if self.alerts.queue_capacity == 0 {
            return Err(ConfigError::Message(
                "alerts.queue_capacity must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    /// The resume cursor applies only when it was actually supplied: present,
    /// non-empty and not `"0"`.
    /// The subset `migrate` needs.
    pub fn validate_database(&self) -> Result<(), ConfigError> {
        if self.database.host.is_empty() || self.database.name.is_empty() {
            return Err(ConfigError::Message(
                "database.host and database.name are required".into(),
            ));
        }
        Ok(())
    }

    pub fn resume_cursor(&self) -> Result<Option<i64>, ConfigError> {
        match self.query.resume_cursor.as_deref().map(str::trim) {
            Some(raw) if !raw.is_empty() && raw != "0" => raw
                .parse::<i64>()
                .map(Some)
                .map_err(|e| ConfigError::Message(format!("invalid query.resume_cursor {raw:?}: {e}"))),
            _ => Ok(None),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            search: SearchConfig {
                api_base: "https://api.twitter.com".to_string(),
                consumer_key: String::new(),
                consumer_secret: String::new(),
                bearer_token: None,
                request_timeout_secs: 30,
            },
            query: QueryConfig {
                text: String::new(),
                latitude: 40.415178,
                longitude: -3.703697,
                radius_km: 50,
                mode: RunMode::Continuous,
                since: None,
                until: None,
                resume_cursor: None,
                delay_secs: 15,
                page_size: 100,
                tag: "harvester".to_string(),
            },
            database: DatabaseConfig {
                host: "localhost".to_string(),
                port: 5432,
                name: "harvester".to_string(),
                username: None,
                password: None,
                max_connections: 4,
                min_connections: 1,
                connect_timeout_secs: 10,
            },
            alerts: AlertsConfig {
                api_base: "https://api.telegram.org".to_string(),
                bot_token: None,
                operator_chat_id: None,
                poll_timeout_secs: 30,
                queue_capacity: 256,
            },
            startup: StartupConfig {
                max_retries: 5,
                retry_base_delay_ms: 1000,
            },
            telemetry: TelemetryConfig {
                log_level: "info".to_string(),
                log_format: LogFormat::Pretty,
                metrics_enabled: false,
                metrics_port: 9090,
            },
        }
    }
}
