//! Worker configuration loaded from environment variables.
//!
//! A `.env` file in the working directory is loaded first if present. Every
//! setting has a default except the bus brokers and topics.

use sqlx::postgres::PgConnectOptions;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use webhook_worker_redpanda::{DEFAULT_GROUP_ID, KafkaMessageSourceBuilder};
use webhook_worker_runtime::{DispatchSettings, RetryPolicy};

/// Invalid or incomplete configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Neither `KAFKA_BROKERS` nor any `KAFKA_BROKER_n` is set.
    #[error("No Kafka brokers configured (set KAFKA_BROKERS or KAFKA_BROKER_1..3)")]
    MissingBrokers,

    /// `TOPIC_PIX` is not set.
    #[error("No topics configured (set TOPIC_PIX)")]
    MissingTopics,

    /// A variable is set but cannot be parsed.
    #[error("Invalid value for {key}: {value:?}")]
    Invalid {
        /// Variable name
        key: &'static str,
        /// The raw value
        value: String,
    },

    /// A credential file under `DB_SECRET_DIR` cannot be read.
    #[error("Failed to read secret {}: {reason}", path.display())]
    Secret {
        /// File that was read
        path: PathBuf,
        /// I/O error message
        reason: String,
    },
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Text,
    /// One JSON object per event
    Json,
}

/// Full worker configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// `PostgreSQL` connection
    pub database: DatabaseConfig,
    /// Kafka/Redpanda consumer
    pub kafka: KafkaConfig,
    /// Dispatch loop timing
    pub dispatch: DispatchSettings,
    /// Startup connection retry
    pub startup: RetryPolicy,
    /// Log format
    pub log_format: LogFormat,
    /// Service identity reported at startup
    pub pod: PodConfig,
}

/// Identity of the running instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodConfig {
    /// Instance name (`POD_NAME`)
    pub name: String,
    /// Deployed version (`API_VERSION`)
    pub api_version: String,
    /// Deployment environment (`ENV`)
    pub env: String,
}

/// `PostgreSQL` configuration.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Full connection URL; overrides the individual fields when set
    pub url: Option<String>,
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// Database name
    pub name: String,
    /// Schema placed on the `search_path`
    pub schema: Option<String>,
    /// Login user
    pub user: String,
    /// Login password
    pub password: String,
    /// Pool size
    pub max_connections: u32,
    /// Apply the bundled migrations on startup
    pub run_migrations: bool,
}

/// Kafka/Redpanda configuration.
#[derive(Debug, Clone)]
pub struct KafkaConfig {
    /// Comma-separated broker addresses
    pub brokers: String,
    /// Consumer group
    pub group_id: String,
    /// Client id reported to the brokers
    pub client_id: Option<String>,
    /// `security.protocol`, e.g. `SASL_SSL`
    pub protocol: Option<String>,
    /// SASL mechanism, e.g. `SCRAM-SHA-512`
    pub mechanism: Option<String>,
    /// SASL username
    pub user: Option<String>,
    /// SASL password
    pub password: Option<String>,
    /// Subscribed topics
    pub topics: Vec<String>,
    /// Where a new group starts reading
    pub auto_offset_reset: String,
}

impl Config {
    /// Load from the process environment, after reading `.env` if present.
    ///
    /// # Errors
    ///
    /// See [`Config::from_lookup`].
    pub fn from_env() -> Result<Self, ConfigError> {
        // A missing .env file is normal outside development.
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok().filter(|v| !v.is_empty()))
    }

    /// Load from an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if brokers or topics are missing, a number does
    /// not parse, or a secret file cannot be read.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            database: DatabaseConfig::load(&lookup)?,
            kafka: KafkaConfig::load(&lookup)?,
            dispatch: load_dispatch(&lookup)?,
            startup: load_startup(&lookup)?,
            pod: PodConfig {
                name: lookup("POD_NAME").unwrap_or_else(|| "webhook-worker".to_string()),
                api_version: lookup("API_VERSION")
                    .unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_string()),
                env: lookup("ENV").unwrap_or_else(|| "dev".to_string()),
            },
            log_format: match lookup("LOG_FORMAT").as_deref() {
                None | Some("text") => LogFormat::Text,
                Some("json") => LogFormat::Json,
                Some(other) => {
                    return Err(ConfigError::Invalid {
                        key: "LOG_FORMAT",
                        value: other.to_string(),
                    });
                }
            },
        })
    }
}

impl DatabaseConfig {
    fn load(lookup: &impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let (user, password) = match lookup("DB_SECRET_DIR") {
            Some(dir) => {
                let dir = PathBuf::from(dir);
                (read_secret(&dir.join("username"))?, read_secret(&dir.join("password"))?)
            }
            None => (
                lookup("DB_USER").unwrap_or_else(|| "postgres".to_string()),
                lookup("DB_PASSWORD").unwrap_or_default(),
            ),
        };

        Ok(Self {
            url: lookup("DATABASE_URL"),
            host: lookup("DB_HOST").unwrap_or_else(|| "localhost".to_string()),
            port: parse_or(lookup, "DB_PORT", 5432)?,
            name: lookup("DB_NAME").unwrap_or_else(|| "postgres".to_string()),
            schema: lookup("DB_SCHEMA"),
            user,
            password,
            max_connections: parse_or(lookup, "DB_MAX_CONNECTION", 30)?,
            run_migrations: parse_or(lookup, "DB_RUN_MIGRATIONS", true)?,
        })
    }

    /// Connection options for the pool.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if `DATABASE_URL` does not parse.
    pub fn connect_options(&self) -> Result<PgConnectOptions, ConfigError> {
        let options = match &self.url {
            Some(url) => url.parse::<PgConnectOptions>().map_err(|_| ConfigError::Invalid {
                key: "DATABASE_URL",
                value: "<redacted>".to_string(),
            })?,
            None => PgConnectOptions::new()
                .host(&self.host)
                .port(self.port)
                .database(&self.name)
                .username(&self.user)
                .password(&self.password),
        };

        Ok(match &self.schema {
            Some(schema) => options.options([("search_path", schema.as_str())]),
            None => options,
        })
    }

    /// Where the pool connects, without credentials.
    #[must_use]
    pub fn display_target(&self) -> String {
        match &self.url {
            Some(_) => "DATABASE_URL".to_string(),
            None => format!("{}:{}/{}", self.host, self.port, self.name),
        }
    }
}

impl KafkaConfig {
    fn load(lookup: &impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let brokers = lookup("KAFKA_BROKERS")
            .or_else(|| {
                let listed: Vec<String> = ["KAFKA_BROKER_1", "KAFKA_BROKER_2", "KAFKA_BROKER_3"]
                    .into_iter()
                    .filter_map(|key| lookup(key))
                    .collect();
                (!listed.is_empty()).then(|| listed.join(","))
            })
            .ok_or(ConfigError::MissingBrokers)?;

        let topics: Vec<String> = lookup("TOPIC_PIX")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();
        if topics.is_empty() {
            return Err(ConfigError::MissingTopics);
        }

        Ok(Self {
            brokers,
            group_id: lookup("KAFKA_GROUP_ID").unwrap_or_else(|| DEFAULT_GROUP_ID.to_string()),
            client_id: lookup("KAFKA_CLIENT_ID"),
            protocol: lookup("KAFKA_PROTOCOL"),
            mechanism: lookup("KAFKA_MECHANISM"),
            user: lookup("KAFKA_USER"),
            password: lookup("KAFKA_PASSWORD"),
            topics,
            auto_offset_reset: lookup("KAFKA_AUTO_OFFSET_RESET")
                .unwrap_or_else(|| "latest".to_string()),
        })
    }

    /// A consumer builder carrying these settings.
    #[must_use]
    pub fn source_builder(&self) -> KafkaMessageSourceBuilder {
        let mut builder = webhook_worker_redpanda::KafkaMessageSource::builder()
            .brokers(&self.brokers)
            .group_id(&self.group_id)
            .auto_offset_reset(&self.auto_offset_reset)
            .topics(self.topics.iter().cloned());

        if let Some(client_id) = &self.client_id {
            builder = builder.client_id(client_id);
        }
        if let Some(protocol) = &self.protocol {
            builder = builder.security_protocol(protocol);
        }
        if let (Some(mechanism), Some(user), Some(password)) =
            (&self.mechanism, &self.user, &self.password)
        {
            builder = builder.sasl(mechanism, user, password);
        }
        builder
    }
}

fn load_dispatch(lookup: &impl Fn(&str) -> Option<String>) -> Result<DispatchSettings, ConfigError> {
    let defaults = DispatchSettings::default();
    Ok(DispatchSettings {
        initial_delay: secs_or(lookup, "DISPATCH_INITIAL_DELAY_SECS", defaults.initial_delay)?,
        tick_interval: secs_or(lookup, "DISPATCH_INTERVAL_SECS", defaults.tick_interval)?,
        request_timeout: secs_or(lookup, "DISPATCH_TIMEOUT_SECS", defaults.request_timeout)?,
    })
}

fn load_startup(lookup: &impl Fn(&str) -> Option<String>) -> Result<RetryPolicy, ConfigError> {
    let defaults = RetryPolicy::default();
    Ok(RetryPolicy::builder()
        .max_attempts(parse_or(lookup, "STARTUP_MAX_ATTEMPTS", defaults.max_attempts)?)
        .backoff(secs_or(lookup, "STARTUP_BACKOFF_SECS", defaults.backoff)?)
        .build())
}

fn parse_or<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value: raw }),
        None => Ok(default),
    }
}

fn secs_or(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: Duration,
) -> Result<Duration, ConfigError> {
    parse_or(lookup, key, default.as_secs()).map(Duration::from_secs)
}

fn read_secret(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path)
        .map(|s| s.trim_end().to_string())
        .map_err(|e| ConfigError::Secret {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
}
