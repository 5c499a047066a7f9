use crate::jobs::{EtlConfig, EtlHealthPolicy};
use crate::services::affinity::ScoringWeights;
use crate::services::feed::FeedConfig;
use crate::services::profile_builder::{AggregatorConfig, SegmentThresholds};
use anyhow::{anyhow, Context, Result};
use std::env;
use std::fmt::Display;
use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct Config {
    pub app: AppConfig,
    pub database: DatabaseConfig,
    pub cache: CacheConfig,
    pub personalization: PersonalizationConfig,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub service_name: String,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Unset runs against the in-memory store
    pub url: Option<String>,
    pub max_connections: u32,
    pub run_migrations: bool,
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Unset falls back to the in-process cache
    pub redis_url: Option<String>,
}

/// Tunables of every personalization component
#[derive(Debug, Clone, Default)]
pub struct PersonalizationConfig {
    pub feed: FeedConfig,
    pub scoring: ScoringWeights,
    pub aggregator: AggregatorConfig,
    pub segments: SegmentThresholds,
    pub etl: EtlConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let feed_defaults = FeedConfig::default();
        let scoring_defaults = ScoringWeights::default();
        let aggregator_defaults = AggregatorConfig::default();
        let segment_defaults = SegmentThresholds::default();
        let etl_defaults = EtlConfig::default();
        let health_defaults = EtlHealthPolicy::default();

        Ok(Config {
            app: AppConfig {
                host: env_or("HTTP_HOST", "0.0.0.0".to_string())?,
                port: env_or("HTTP_PORT", 8020)?,
                service_name: env_or("SERVICE_NAME", "personalization-service".to_string())?,
            },
            database: DatabaseConfig {
                url: env_opt("DATABASE_URL"),
                max_connections: env_or("DATABASE_MAX_CONNECTIONS", 10)?,
                run_migrations: env_or("RUN_MIGRATIONS", true)?,
            },
            cache: CacheConfig {
                redis_url: env_opt("REDIS_URL"),
            },
            personalization: PersonalizationConfig {
                feed: FeedConfig {
                    default_limit: env_or("FEED_DEFAULT_LIMIT", feed_defaults.default_limit)?,
                    default_fallback_limit: env_or(
                        "FEED_DEFAULT_FALLBACK_LIMIT",
                        feed_defaults.default_fallback_limit,
                    )?,
                    min_affinity: env_or("FEED_MIN_AFFINITY", feed_defaults.min_affinity)?,
                    cache_ttl_secs: env_or("FEED_CACHE_TTL_SECS", feed_defaults.cache_ttl_secs)?,
                    trending_window_days: env_or(
                        "TRENDING_WINDOW_DAYS",
                        feed_defaults.trending_window_days,
                    )?,
                    ..feed_defaults
                },
                scoring: ScoringWeights {
                    topic: env_or("AFFINITY_TOPIC_WEIGHT", scoring_defaults.topic)?,
                    vector: env_or("AFFINITY_VECTOR_WEIGHT", scoring_defaults.vector)?,
                    freshness: env_or("AFFINITY_FRESHNESS_WEIGHT", scoring_defaults.freshness)?,
                    engagement: env_or("AFFINITY_ENGAGEMENT_WEIGHT", scoring_defaults.engagement)?,
                    ..scoring_defaults
                },
                aggregator: AggregatorConfig {
                    decay_days: env_or("TOPIC_DECAY_DAYS", aggregator_defaults.decay_days)?,
                    lookback_days: env_or(
                        "ENGAGEMENT_LOOKBACK_DAYS",
                        aggregator_defaults.lookback_days,
                    )?,
                    max_topics: env_or("PROFILE_MAX_TOPICS", aggregator_defaults.max_topics)?,
                },
                segments: SegmentThresholds {
                    regular_min_events: env_or(
                        "SEGMENT_REGULAR_MIN_EVENTS",
                        segment_defaults.regular_min_events,
                    )?,
                    power_min_events: env_or(
                        "SEGMENT_POWER_MIN_EVENTS",
                        segment_defaults.power_min_events,
                    )?,
                },
                etl: EtlConfig {
                    concurrency: env_or("ETL_CONCURRENCY", etl_defaults.concurrency)?,
                    affinity_top_n: env_or("ETL_AFFINITY_TOP_N", etl_defaults.affinity_top_n)?,
                    content_refresh_hours: env_or(
                        "ETL_CONTENT_REFRESH_HOURS",
                        etl_defaults.content_refresh_hours,
                    )?,
                    freshness_half_life_days: env_or(
                        "ETL_FRESHNESS_HALF_LIFE_DAYS",
                        etl_defaults.freshness_half_life_days,
                    )?,
                    cluster_seed: env_opt("ETL_CLUSTER_SEED")
                        .map(|s| s.parse::<u64>())
                        .transpose()
                        .context("ETL_CLUSTER_SEED must be a valid u64")?,
                    health: EtlHealthPolicy {
                        max_error_ratio: env_or(
                            "ETL_MAX_ERROR_RATIO",
                            health_defaults.max_error_ratio,
                        )?,
                        max_duration_ms: env_or(
                            "ETL_MAX_DURATION_MS",
                            health_defaults.max_duration_ms,
                        )?,
                    },
                    ..etl_defaults
                },
            },
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.app.port == 0 {
            return Err(anyhow!("HTTP port must be greater than 0"));
        }

        if self.database.url.as_deref() == Some("") {
            return Err(anyhow!("DATABASE_URL must not be empty when set"));
        }

        if self.database.max_connections == 0 {
            return Err(anyhow!("Database max connections must be greater than 0"));
        }

        self.personalization.validate()
    }
}

impl PersonalizationConfig {
    pub fn validate(&self) -> Result<()> {
        let feed = &self.feed;
        if feed.default_limit == 0 || feed.default_limit > feed.max_limit {
            return Err(anyhow!(
                "Feed default limit must be between 1 and {}",
                feed.max_limit
            ));
        }
        if feed.default_fallback_limit > feed.max_limit {
            return Err(anyhow!(
                "Feed fallback limit must be at most {}",
                feed.max_limit
            ));
        }
        if !(0.0..=1.0).contains(&feed.min_affinity) {
            return Err(anyhow!("Minimum affinity must be within [0, 1]"));
        }
        if feed.trending_window_days <= 0 {
            return Err(anyhow!("Trending window must be positive"));
        }

        let weights = [
            self.scoring.topic,
            self.scoring.vector,
            self.scoring.freshness,
            self.scoring.engagement,
        ];
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(anyhow!("Affinity weights must be non-negative"));
        }
        if weights.iter().sum::<f32>() <= 0.0 {
            return Err(anyhow!("At least one affinity weight must be positive"));
        }

        if self.aggregator.decay_days <= 0.0 || !self.aggregator.decay_days.is_finite() {
            return Err(anyhow!("Topic decay days must be positive"));
        }
        if self.aggregator.lookback_days <= 0 {
            return Err(anyhow!("Engagement lookback days must be positive"));
        }

        if self.segments.regular_min_events == 0
            || self.segments.regular_min_events >= self.segments.power_min_events
        {
            return Err(anyhow!(
                "Segment thresholds must satisfy 0 < regular < power"
            ));
        }

        if self.etl.concurrency == 0 {
            return Err(anyhow!("ETL concurrency must be greater than 0"));
        }
        if self.etl.affinity_top_n == 0 {
            return Err(anyhow!("ETL affinity top-N must be greater than 0"));
        }
        if self.etl.freshness_half_life_days <= 0.0 {
            return Err(anyhow!("Freshness half-life must be positive"));
        }

        Ok(())
    }
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow!("{} has an invalid value {:?}: {}", key, raw, e)),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        Config {
            app: AppConfig {
                host: "0.0.0.0".to_string(),
                port: 8020,
                service_name: "personalization-service".to_string(),
            },
            database: DatabaseConfig {
                url: None,
                max_connections: 10,
                run_migrations: false,
            },
            cache: CacheConfig { redis_url: None },
            personalization: PersonalizationConfig::default(),
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(config().validate().is_ok());
    }

    #[test]
    fn test_invalid_limits() {
        let mut config = config();
        config.personalization.feed.default_limit = 0;
        assert!(config.validate().is_err());

        config.personalization.feed.default_limit = 500;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_segment_thresholds() {
        let mut config = config();
        config.personalization.segments.regular_min_events = 60;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_negative_weight_rejected() {
        let mut config = config();
        config.personalization.scoring.topic = -0.1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_or_parses_and_defaults() {
        assert_eq!(env_or("PERSONALIZATION_TEST_UNSET_KEY", 7usize).unwrap(), 7);
    }
}
