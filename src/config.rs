use std::env;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use crate::errors::DeliveryError;
use crate::logging::LogLevel;

/// Runtime configuration, read from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the gateway listens on.
    pub bind_addr: String,
    /// PostgreSQL URL for the message store.
    pub database_url: String,
    /// Redis URL for the presence store.
    pub redis_url: String,
    /// Kafka bootstrap servers.
    pub kafka_brokers: String,
    /// Topic the durable channel uses.
    pub kafka_topic: String,
    /// Consumer group shared by processor instances.
    pub kafka_group_id: String,
    /// `auto.offset.reset` for the consumer.
    pub kafka_offset_reset: String,
    /// HS256 signing secret for connection tokens.
    pub jwt_secret: String,
    /// Presence marker lifetime. Must exceed the heartbeat interval.
    pub presence_ttl: Duration,
    /// Heartbeat cadence refreshing the presence TTL.
    pub heartbeat_interval: Duration,
    /// Upper bound on waiting for the durable channel's delivery report.
    pub publish_timeout: Duration,
    /// Connections kept by the Postgres pool.
    pub db_pool_size: usize,
    pub log_level: LogLevel,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:3000".to_string(),
            database_url: String::new(),
            redis_url: "redis://127.0.0.1:6379".to_string(),
            kafka_brokers: "127.0.0.1:9092".to_string(),
            kafka_topic: "chat.messages".to_string(),
            kafka_group_id: "chat-message-processors".to_string(),
            kafka_offset_reset: "latest".to_string(),
            jwt_secret: String::new(),
            presence_ttl: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(10),
            publish_timeout: Duration::from_secs(5),
            db_pool_size: 16,
            log_level: LogLevel::Info,
        }
    }
}

impl Config {
    /// Read configuration from the environment.
    ///
    /// `DATABASE_URL` and `JWT_SECRET` are required; everything else has a
    /// default. Invalid numeric values fall back to the default with a
    /// warning on stderr (they cannot go through the log queue, which is
    /// not running yet).
    pub fn from_env() -> Result<Self, DeliveryError> {
        let defaults = Self::default();

        let database_url = env::var("DATABASE_URL")
            .map_err(|_| DeliveryError::Config("DATABASE_URL is required".into()))?;
        let jwt_secret = env::var("JWT_SECRET")
            .map_err(|_| DeliveryError::Config("JWT_SECRET is required".into()))?;

        let config = Self {
            bind_addr: env::var("COURIER_ADDR").unwrap_or(defaults.bind_addr),
            database_url,
            redis_url: env::var("REDIS_URL").unwrap_or(defaults.redis_url),
            kafka_brokers: env::var("KAFKA_BROKERS").unwrap_or(defaults.kafka_brokers),
            kafka_topic: env::var("KAFKA_TOPIC").unwrap_or(defaults.kafka_topic),
            kafka_group_id: env::var("KAFKA_GROUP_ID").unwrap_or(defaults.kafka_group_id),
            kafka_offset_reset: env::var("KAFKA_AUTO_OFFSET_RESET")
                .unwrap_or(defaults.kafka_offset_reset),
            jwt_secret,
            presence_ttl: Duration::from_secs(parse_env_or("PRESENCE_TTL_SECS", 30u64)),
            heartbeat_interval: Duration::from_secs(parse_env_or(
                "HEARTBEAT_INTERVAL_SECS",
                10u64,
            )),
            publish_timeout: Duration::from_millis(parse_env_or("PUBLISH_TIMEOUT_MS", 5_000u64)),
            db_pool_size: parse_env_or("DB_POOL_SIZE", defaults.db_pool_size),
            log_level: LogLevel::from_str_lossy(
                &env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into()),
            ),
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject combinations that would break the presence invariant: the
    /// heartbeat must fire strictly more often than the TTL expires, so a
    /// single delayed tick cannot cause a spurious offline transition.
    pub fn validate(&self) -> Result<(), DeliveryError> {
        if self.heartbeat_interval >= self.presence_ttl {
            return Err(DeliveryError::Config(format!(
                "heartbeat interval ({:?}) must be shorter than the presence TTL ({:?})",
                self.heartbeat_interval, self.presence_ttl
            )));
        }
        if self.presence_ttl.is_zero() {
            return Err(DeliveryError::Config("presence TTL must be non-zero".into()));
        }
        Ok(())
    }
}

/// Parse an env var, falling back to `default` (with a warning) when the
/// value is present but unparseable.
fn parse_env_or<T: FromStr + Display + Copy>(name: &str, default: T) -> T {
    match env::var(name) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            eprintln!(
                "warning: invalid {} value {:?}, using default {}",
                name, raw, default
            );
            default
        }),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn heartbeat_must_beat_the_ttl() {
        let config = Config {
            presence_ttl: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(10),
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }
}
