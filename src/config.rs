use std::env;
use std::str::FromStr;
use std::time::Duration;

// ============================================================================
// Configuration
// ============================================================================
//
// Loaded from environment variables (a local `.env` is honoured by main).
// Every option has a development default; a value that is present but does
// not parse, or breaks a rule below, stops the process before any consumer
// is created.
//
// ============================================================================

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConfigError {
    #[error("{0} must not be empty")]
    Missing(&'static str),

    #[error("{key} has invalid value {value:?}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("Topic {0:?} is configured for more than one channel")]
    DuplicateTopic(String),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub redpanda: RedpandaConfig,
    pub pipeline: PipelineConfig,
    pub producer: ProducerConfig,
    pub server: ServerConfig,
}

/// Broker connection, channel names and consumer groups
#[derive(Debug, Clone)]
pub struct RedpandaConfig {
    pub brokers: String,
    pub primary_topic: String,
    pub retry_topic: String,
    pub dlq_topic: String,
    pub consumer_group_id: String,
    pub dlq_consumer_group_id: String,
    /// Where a group without committed offsets starts: earliest or latest
    pub auto_offset_reset: String,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub max_retries: u32,
    pub retry_delay: Duration,
    /// Probability that the simulated processing step fails
    pub failure_rate: f64,
    /// Dead-letter records kept in memory for the operator endpoint
    pub dlq_history: usize,
}

#[derive(Debug, Clone)]
pub struct ProducerConfig {
    pub pacing: Duration,
    pub price_min: f64,
    pub price_max: f64,
    /// How long a finished bulk job stays queryable
    pub job_retention: Duration,
    /// Upper bound on tracked bulk jobs; the oldest finished ones go first
    pub max_jobs: usize,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup, then validate it
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let config = Self {
            redpanda: RedpandaConfig {
                brokers: string_or(&lookup, "REDPANDA_BROKERS", "localhost:9092"),
                primary_topic: string_or(&lookup, "ORDERS_TOPIC", "orders"),
                retry_topic: string_or(&lookup, "RETRY_TOPIC", "orders-retry"),
                dlq_topic: string_or(&lookup, "DLQ_TOPIC", "orders-dlq"),
                consumer_group_id: string_or(&lookup, "CONSUMER_GROUP_ID", "order-processing-group"),
                dlq_consumer_group_id: string_or(&lookup, "DLQ_CONSUMER_GROUP_ID", "dlq-monitor-group"),
                auto_offset_reset: string_or(&lookup, "AUTO_OFFSET_RESET", "earliest"),
            },
            pipeline: PipelineConfig {
                max_retries: parse_or(&lookup, "MAX_RETRIES", 3)?,
                retry_delay: Duration::from_millis(parse_or(&lookup, "RETRY_DELAY_MS", 5000)?),
                failure_rate: parse_or(&lookup, "FAILURE_RATE", 0.1)?,
                dlq_history: parse_or(&lookup, "DLQ_HISTORY", 100)?,
            },
            producer: ProducerConfig {
                pacing: Duration::from_millis(parse_or(&lookup, "PRODUCER_PACING_MS", 500)?),
                price_min: parse_or(&lookup, "PRICE_MIN", 10.0)?,
                price_max: parse_or(&lookup, "PRICE_MAX", 1000.0)?,
                job_retention: Duration::from_secs(parse_or(&lookup, "JOB_RETENTION_SECS", 3600)?),
                max_jobs: parse_or(&lookup, "MAX_TRACKED_JOBS", 1000)?,
            },
            server: ServerConfig {
                host: string_or(&lookup, "HTTP_HOST", "0.0.0.0"),
                port: parse_or(&lookup, "HTTP_PORT", 8080)?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let rp = &self.redpanda;
        for (key, value) in [
            ("REDPANDA_BROKERS", &rp.brokers),
            ("ORDERS_TOPIC", &rp.primary_topic),
            ("RETRY_TOPIC", &rp.retry_topic),
            ("DLQ_TOPIC", &rp.dlq_topic),
            ("CONSUMER_GROUP_ID", &rp.consumer_group_id),
            ("DLQ_CONSUMER_GROUP_ID", &rp.dlq_consumer_group_id),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::Missing(key));
            }
        }

        if rp.primary_topic == rp.retry_topic || rp.primary_topic == rp.dlq_topic {
            return Err(ConfigError::DuplicateTopic(rp.primary_topic.clone()));
        }
        if rp.retry_topic == rp.dlq_topic {
            return Err(ConfigError::DuplicateTopic(rp.retry_topic.clone()));
        }

        if !matches!(rp.auto_offset_reset.as_str(), "earliest" | "latest") {
            return Err(invalid("AUTO_OFFSET_RESET", &rp.auto_offset_reset, "expected earliest or latest"));
        }

        let pipeline = &self.pipeline;
        if pipeline.max_retries < 1 {
            return Err(invalid("MAX_RETRIES", pipeline.max_retries, "must be at least 1"));
        }
        if !(0.0..=1.0).contains(&pipeline.failure_rate) {
            return Err(invalid("FAILURE_RATE", pipeline.failure_rate, "must be within 0.0..=1.0"));
        }
        if pipeline.dlq_history < 1 {
            return Err(invalid("DLQ_HISTORY", pipeline.dlq_history, "must be at least 1"));
        }

        let producer = &self.producer;
        if !producer.price_min.is_finite() || producer.price_min < 0.0 {
            return Err(invalid("PRICE_MIN", producer.price_min, "must be a non-negative number"));
        }
        if !producer.price_max.is_finite() || producer.price_max <= producer.price_min {
            return Err(invalid("PRICE_MAX", producer.price_max, "must be greater than PRICE_MIN"));
        }
        if producer.max_jobs < 1 {
            return Err(invalid("MAX_TRACKED_JOBS", producer.max_jobs, "must be at least 1"));
        }

        Ok(())
    }
}

fn string_or<F>(lookup: &F, key: &str, default: &str) -> String
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key).unwrap_or_else(|| default.to_string())
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e: T::Err| invalid(key, &raw, e.to_string())),
        None => Ok(default),
    }
}

fn invalid(key: &'static str, value: impl ToString, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason: reason.into(),
    }
}
