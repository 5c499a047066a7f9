// ============================================
// Personalization ETL
// ============================================
//
// Batch job that refreshes everything the feed path reads.
// Designed to run as a CronJob or via `--mode etl`.
//
// Workflow:
// 1. Load active users and content vectors (the only fatal step)
// 2. Content pass: freshness, engagement and highlights for stale vectors
// 3. Cluster pass: recluster all content on a blocking thread
// 4. User pass: rebuild profiles, optionally replace top-N affinities
// 5. Audit log row
//
// Per-item failures are logged and counted; completed items stay persisted.
//
// Usage:
//   personalization-service --mode etl --refresh-affinities

use crate::config::PersonalizationConfig;
use crate::db::Repositories;
use crate::error::{AppError, Result};
use crate::metrics;
use crate::models::ContentVectorSnapshot;
use crate::services::affinity::AffinityScorer;
use crate::services::clustering::{refresh_clusters, TopicClusterer};
use crate::services::opt_out::purge_personalization;
use crate::services::profile_builder::{EngagementAggregator, ProfileBuilder, ProfileFlags};
use crate::utils::{half_life_decay, normalize_score};
use chrono::{DateTime, Duration, Utc};
use feed_cache::CacheStore;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

const MILLIS_PER_DAY: f64 = 86_400_000.0;

/// ETL tunables
#[derive(Debug, Clone)]
pub struct EtlConfig {
    /// Users and content items processed concurrently
    pub concurrency: usize,
    /// Affinities stored per user
    pub affinity_top_n: usize,
    /// Content refreshed longer ago than this is recomputed
    pub content_refresh_hours: i64,
    pub freshness_half_life_days: f64,
    /// Window of events counted towards engagement scores
    pub engagement_lookback_days: i64,
    pub max_highlights: usize,
    /// Fixed clustering seed; random when unset
    pub cluster_seed: Option<u64>,
    pub health: EtlHealthPolicy,
}

impl Default for EtlConfig {
    fn default() -> Self {
        Self {
            concurrency: 8,
            affinity_top_n: 50,
            content_refresh_hours: 24,
            freshness_half_life_days: 7.0,
            engagement_lookback_days: 30,
            max_highlights: 3,
            cluster_seed: None,
            health: EtlHealthPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EtlOptions {
    pub refresh_affinities: bool,
    pub skip_audit_log: bool,
    pub refresh_clusters: bool,
}

impl Default for EtlOptions {
    fn default() -> Self {
        Self {
            refresh_affinities: false,
            skip_audit_log: false,
            refresh_clusters: true,
        }
    }
}

/// Result of one ETL run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EtlSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub profiles: u64,
    pub content_vectors: u64,
    pub affinities: u64,
    pub clusters: u64,
    pub duration_ms: u64,
    pub errors: u64,
}

/// Caller-side thresholds for treating a run as failed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EtlHealthPolicy {
    /// errors / profiles above this fails the run
    pub max_error_ratio: f64,
    pub max_duration_ms: u64,
}

impl Default for EtlHealthPolicy {
    fn default() -> Self {
        Self {
            max_error_ratio: 0.005,
            max_duration_ms: 5 * 60 * 1000,
        }
    }
}

impl EtlHealthPolicy {
    /// Reasons the run breaches the policy; empty when healthy
    pub fn violations(&self, summary: &EtlSummary) -> Vec<String> {
        let mut violations = Vec::new();

        let ratio = if summary.profiles == 0 {
            if summary.errors > 0 {
                f64::INFINITY
            } else {
                0.0
            }
        } else {
            summary.errors as f64 / summary.profiles as f64
        };
        if ratio > self.max_error_ratio {
            violations.push(format!(
                "error ratio {:.4} exceeds {:.4}",
                ratio, self.max_error_ratio
            ));
        }

        if summary.duration_ms > self.max_duration_ms {
            violations.push(format!(
                "duration {}ms exceeds {}ms",
                summary.duration_ms, self.max_duration_ms
            ));
        }

        violations
    }

    pub fn is_healthy(&self, summary: &EtlSummary) -> bool {
        self.violations(summary).is_empty()
    }
}

enum UserOutcome {
    Rebuilt { affinities: usize },
    Purged,
}

pub struct EtlOrchestrator {
    repos: Repositories,
    cache: Arc<dyn CacheStore>,
    config: PersonalizationConfig,
    builder: ProfileBuilder,
    scorer: AffinityScorer,
}

impl EtlOrchestrator {
    pub fn new(
        repos: Repositories,
        cache: Arc<dyn CacheStore>,
        config: PersonalizationConfig,
    ) -> Self {
        let builder = ProfileBuilder::new(
            EngagementAggregator::new(config.aggregator.clone()),
            config.segments.clone(),
        );
        let scorer = AffinityScorer::new(config.scoring.clone());
        Self {
            repos,
            cache,
            config,
            builder,
            scorer,
        }
    }

    pub async fn run(&self, options: EtlOptions) -> Result<EtlSummary> {
        let timer = Instant::now();
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let etl = &self.config.etl;

        info!(
            run_id = %run_id,
            refresh_affinities = options.refresh_affinities,
            refresh_clusters = options.refresh_clusters,
            concurrency = etl.concurrency,
            "Starting personalization ETL"
        );

        let since = started_at - Duration::days(self.config.aggregator.lookback_days);
        let active = self
            .repos
            .events
            .active_user_ids(since)
            .await
            .map_err(|e| AppError::Unavailable(format!("failed to load active users: {}", e)))?;
        let vectors = self
            .repos
            .content
            .list_vectors()
            .await
            .map_err(|e| AppError::Unavailable(format!("failed to load content vectors: {}", e)))?;

        let mut errors = 0u64;

        // Content pass
        let (vectors, content_vectors, content_errors) =
            self.refresh_content(vectors, started_at).await;
        errors += content_errors;

        // Cluster pass
        let mut clusters = 0u64;
        if options.refresh_clusters {
            let clusterer = match etl.cluster_seed {
                Some(seed) => TopicClusterer::seeded(seed),
                None => TopicClusterer::default(),
            };
            match refresh_clusters(&self.repos, clusterer).await {
                Ok(report) => clusters = report.clusters as u64,
                Err(e) => {
                    error!(run_id = %run_id, error = %e, "Cluster refresh failed");
                    metrics::record_etl_error("clusters");
                    errors += 1;
                }
            }
        }

        // User pass
        let mut users: BTreeSet<String> = active.into_iter().collect();
        match self.repos.profiles.list_opted_out().await {
            Ok(opted_out) => users.extend(opted_out),
            Err(e) => {
                warn!(run_id = %run_id, error = %e, "Failed to list opted-out users");
                metrics::record_etl_error("users");
                errors += 1;
            }
        }

        let results: Vec<(String, Result<UserOutcome>)> = stream::iter(users)
            .map(|user_id| {
                let vectors = &vectors;
                async move {
                    let outcome = self.process_user(&user_id, vectors, options, started_at).await;
                    (user_id, outcome)
                }
            })
            .buffer_unordered(etl.concurrency.max(1))
            .collect()
            .await;

        let mut profiles = 0u64;
        let mut affinities = 0u64;
        let mut purged = 0u64;
        for (user_id, result) in results {
            match result {
                Ok(UserOutcome::Rebuilt { affinities: n }) => {
                    profiles += 1;
                    affinities += n as u64;
                }
                Ok(UserOutcome::Purged) => purged += 1,
                Err(e) => {
                    error!(
                        run_id = %run_id,
                        user_id = %user_id,
                        error = %e,
                        "Failed to refresh user"
                    );
                    metrics::record_etl_error("users");
                    errors += 1;
                }
            }
        }

        let mut summary = EtlSummary {
            run_id,
            started_at,
            profiles,
            content_vectors,
            affinities,
            clusters,
            duration_ms: timer.elapsed().as_millis() as u64,
            errors,
        };

        if !options.skip_audit_log {
            if let Err(e) = self.repos.audit.record_etl_run(&summary).await {
                error!(run_id = %run_id, error = %e, "Failed to record ETL audit log");
                metrics::record_etl_error("audit");
                summary.errors += 1;
            }
        }

        metrics::record_etl_run();
        info!(
            run_id = %run_id,
            profiles = summary.profiles,
            purged,
            content_vectors = summary.content_vectors,
            affinities = summary.affinities,
            clusters = summary.clusters,
            errors = summary.errors,
            duration_ms = summary.duration_ms,
            "Personalization ETL completed"
        );

        Ok(summary)
    }

    async fn process_user(
        &self,
        user_id: &str,
        vectors: &[ContentVectorSnapshot],
        options: EtlOptions,
        now: DateTime<Utc>,
    ) -> Result<UserOutcome> {
        let stored = self.repos.profiles.get_profile(user_id).await?;
        let flags = stored.as_ref().map(ProfileFlags::from).unwrap_or_default();

        if flags.personalization_opt_out {
            purge_personalization(&self.repos, self.cache.as_ref(), user_id).await?;
            return Ok(UserOutcome::Purged);
        }

        let since = now - Duration::days(self.config.aggregator.lookback_days);
        let events = self.repos.events.events_for_user(user_id, since).await?;
        let profile = self.builder.rebuild(user_id, &events, vectors, flags, now)?;
        if !self.repos.profiles.upsert_profile(&profile).await? {
            // Opted out after the profile was read
            purge_personalization(&self.repos, self.cache.as_ref(), user_id).await?;
            return Ok(UserOutcome::Purged);
        }

        let mut affinities = 0;
        if options.refresh_affinities {
            let top = self
                .scorer
                .top_affinities(&profile, vectors, self.config.etl.affinity_top_n);
            self.repos.affinities.replace_for_user(user_id, &top).await?;
            affinities = top.len();
        }

        Ok(UserOutcome::Rebuilt { affinities })
    }

    /// Returns the vectors with refreshed fields applied, the refreshed count and the error count
    async fn refresh_content(
        &self,
        mut vectors: Vec<ContentVectorSnapshot>,
        now: DateTime<Utc>,
    ) -> (Vec<ContentVectorSnapshot>, u64, u64) {
        let etl = &self.config.etl;
        let stale: Vec<usize> = vectors
            .iter()
            .enumerate()
            .filter(|(_, v)| needs_refresh(v, now, etl.content_refresh_hours))
            .map(|(idx, _)| idx)
            .collect();

        if stale.is_empty() {
            return (vectors, 0, 0);
        }

        let counts = match self
            .repos
            .events
            .post_event_counts(now - Duration::days(etl.engagement_lookback_days))
            .await
        {
            Ok(counts) => counts,
            Err(e) => {
                error!(error = %e, "Failed to load post event counts, skipping content pass");
                metrics::record_etl_error("content");
                return (vectors, 0, 1);
            }
        };
        let engagement = engagement_scores(&counts);

        let updates: Vec<(usize, f32, f32, Vec<String>)> = stale
            .into_iter()
            .map(|idx| {
                let v = &vectors[idx];
                let age_days = (now - v.published_at).num_milliseconds() as f64 / MILLIS_PER_DAY;
                let freshness = half_life_decay(age_days, etl.freshness_half_life_days) as f32;
                let engagement = engagement.get(&v.post_id).copied().unwrap_or(0.0);
                let highlights = generate_highlights(v, etl.max_highlights);
                (idx, engagement, freshness, highlights)
            })
            .collect();

        let results: Vec<(usize, f32, f32, Vec<String>, Result<()>)> = stream::iter(updates)
            .map(|(idx, engagement, freshness, highlights)| {
                let post_id = vectors[idx].post_id.clone();
                async move {
                    let result = self
                        .persist_content(&post_id, engagement, freshness, &highlights, now)
                        .await;
                    (idx, engagement, freshness, highlights, result)
                }
            })
            .buffer_unordered(etl.concurrency.max(1))
            .collect()
            .await;

        let mut refreshed = 0u64;
        let mut errors = 0u64;
        for (idx, engagement, freshness, highlights, result) in results {
            match result {
                Ok(()) => {
                    let v = &mut vectors[idx];
                    v.engagement_score = engagement;
                    v.freshness_score = freshness;
                    v.highlights = highlights;
                    v.refreshed_at = Some(now);
                    refreshed += 1;
                }
                Err(e) => {
                    error!(
                        post_id = %vectors[idx].post_id,
                        error = %e,
                        "Failed to refresh content vector"
                    );
                    metrics::record_etl_error("content");
                    errors += 1;
                }
            }
        }

        info!(refreshed, errors, "Content pass completed");
        (vectors, refreshed, errors)
    }

    async fn persist_content(
        &self,
        post_id: &str,
        engagement: f32,
        freshness: f32,
        highlights: &[String],
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.repos
            .content
            .update_scores(post_id, engagement, freshness, now)
            .await?;
        self.repos.content.upsert_highlights(post_id, highlights).await
    }
}

fn needs_refresh(vector: &ContentVectorSnapshot, now: DateTime<Utc>, refresh_hours: i64) -> bool {
    if !vector.published {
        return false;
    }
    let has_summary = vector.summary.as_deref().is_some_and(|s| !s.trim().is_empty());
    match vector.refreshed_at {
        None => true,
        Some(_) if has_summary && vector.highlights.is_empty() => true,
        Some(at) => now - at > Duration::hours(refresh_hours),
    }
}

/// Log-normalized event counts in [0, 1]
fn engagement_scores(counts: &HashMap<String, u64>) -> HashMap<String, f32> {
    let max_log = counts
        .values()
        .map(|c| (1.0 + *c as f32).ln())
        .fold(0.0f32, f32::max);
    if max_log <= 0.0 {
        return HashMap::new();
    }

    counts
        .iter()
        .map(|(post_id, count)| {
            let score = normalize_score((1.0 + *count as f32).ln(), 0.0, max_log);
            (post_id.clone(), score)
        })
        .collect()
}

/// Summary sentences ranked by overlap with tags and title words
pub fn generate_highlights(vector: &ContentVectorSnapshot, max: usize) -> Vec<String> {
    let Some(summary) = vector.summary.as_deref() else {
        return Vec::new();
    };

    let mut vocabulary: HashSet<String> = vector
        .tags
        .iter()
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect();
    vocabulary.extend(words(&vector.title));

    let mut sentences: Vec<(usize, usize, String)> = summary
        .split_inclusive(|c: char| matches!(c, '.' | '!' | '?'))
        .map(str::trim)
        .filter(|s| s.chars().any(char::is_alphanumeric))
        .enumerate()
        .map(|(position, sentence)| {
            let overlap = words(sentence).filter(|w| vocabulary.contains(w)).count();
            (position, overlap, sentence.to_string())
        })
        .collect();

    sentences.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    sentences
        .into_iter()
        .take(max)
        .map(|(_, _, sentence)| sentence)
        .collect()
}

fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= 3)
        .map(str::to_lowercase)
}
