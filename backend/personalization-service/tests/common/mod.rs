//! Shared fixtures for personalization integration tests
//!
//! - A small blog corpus (react, rust, cooking) published within the last week
//! - Engagement events for named readers
//! - `FlakyStore`: delegates to `MemoryStore`, failing selected operations
//! - `BrokenCache`: every operation errors

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use feed_cache::{CacheError, CacheResult, CacheStore};
use personalization_service::db::{
    AffinityRepository, AuditLogRepository, ClusterRepository, ContentVectorRepository,
    EngagementRepository, ProfileRepository,
};
use personalization_service::error::{AppError, Result};
use personalization_service::models::{
    AffinityScore, ContentVectorSnapshot, EngagementEventType, TopicCluster, UserEngagementEvent,
    UserProfileSnapshot,
};
use personalization_service::{EtlSummary, MemoryStore};
use std::collections::HashMap;
use std::sync::Arc;

pub fn vector(
    post_id: &str,
    tags: &[&str],
    embedding: Vec<f32>,
    age_days: i64,
) -> ContentVectorSnapshot {
    ContentVectorSnapshot {
        post_id: post_id.to_string(),
        slug: format!("{}-slug", post_id),
        title: format!("Working with {}", tags.first().copied().unwrap_or("things")),
        summary: Some(format!(
            "A practical guide to {}. Covers setup and common mistakes. Ends with a checklist.",
            tags.join(" and ")
        )),
        tags: tags.iter().map(|t| t.to_string()).collect(),
        embedding,
        engagement_score: 0.2,
        freshness_score: 0.5,
        highlights: Vec::new(),
        published: true,
        published_at: Utc::now() - Duration::days(age_days),
        refreshed_at: None,
    }
}

pub fn event(
    user_id: &str,
    post_id: &str,
    event_type: EngagementEventType,
    duration_seconds: Option<f64>,
    age_days: i64,
) -> UserEngagementEvent {
    UserEngagementEvent {
        user_id: user_id.to_string(),
        post_id: Some(post_id.to_string()),
        slug: None,
        event_type,
        duration_seconds,
        max_scroll_percent: Some(80.0),
        created_at: Utc::now() - Duration::days(age_days),
        sentiment: None,
    }
}

pub fn corpus() -> Vec<ContentVectorSnapshot> {
    let mut draft = vector("draft", &["react"], vec![1.0, 0.0, 0.0], 0);
    draft.published = false;

    vec![
        vector(
            "react-hooks",
            &["react", "frontend", "tone:informative"],
            vec![1.0, 0.0, 0.0],
            1,
        ),
        vector("react-server", &["react", "ssr"], vec![0.9, 0.1, 0.0], 2),
        vector("react-testing", &["react", "testing"], vec![0.95, 0.0, 0.05], 3),
        vector("rust-async", &["rust", "async"], vec![0.0, 1.0, 0.0], 1),
        vector("rust-errors", &["rust"], vec![0.05, 0.95, 0.0], 4),
        vector("sourdough", &["cooking"], vec![0.0, 0.0, 1.0], 2),
        draft,
    ]
}

/// Store seeded with the corpus plus a react reader and a rust reader
pub async fn seeded_store() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    for v in corpus() {
        store.put_vector(v).await;
    }

    for e in [
        event("react-reader", "react-hooks", EngagementEventType::Session, Some(240.0), 1),
        event("react-reader", "react-server", EngagementEventType::Session, Some(180.0), 2),
        event("react-reader", "react-hooks", EngagementEventType::View, None, 3),
        event("rust-reader", "rust-async", EngagementEventType::Session, Some(300.0), 1),
        event("rust-reader", "rust-errors", EngagementEventType::View, None, 2),
    ] {
        store.push_event(e).await;
    }

    store
}

/// Add `count` readers named `reader-{i}`, each with one recent view
pub async fn add_readers(store: &MemoryStore, count: usize) -> Vec<String> {
    let mut ids = Vec::with_capacity(count);
    for i in 0..count {
        let user_id = format!("reader-{}", i);
        let post = if i % 2 == 0 { "react-hooks" } else { "rust-async" };
        store
            .push_event(event(&user_id, post, EngagementEventType::View, None, 1))
            .await;
        ids.push(user_id);
    }
    ids
}

/// MemoryStore wrapper with injectable failures
pub struct FlakyStore {
    pub inner: Arc<MemoryStore>,
    /// `upsert_profile` fails for this reader
    pub fail_profile_for: Option<String>,
    /// Every content read fails
    pub fail_content: bool,
    /// Every profile read fails
    pub fail_profiles: bool,
    /// This reader opts out of personalization right after their profile is read
    pub opt_out_after_read: Option<String>,
}

impl FlakyStore {
    pub fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            fail_profile_for: None,
            fail_content: false,
            fail_profiles: false,
            opt_out_after_read: None,
        }
    }

    fn injected(what: &str) -> AppError {
        AppError::Storage(format!("injected failure: {}", what))
    }
}

#[async_trait]
impl ContentVectorRepository for FlakyStore {
    async fn list_vectors(&self) -> Result<Vec<ContentVectorSnapshot>> {
        if self.fail_content {
            return Err(Self::injected("list_vectors"));
        }
        self.inner.list_vectors().await
    }

    async fn get_vector(&self, post_id: &str) -> Result<Option<ContentVectorSnapshot>> {
        if self.fail_content {
            return Err(Self::injected("get_vector"));
        }
        self.inner.get_vector(post_id).await
    }

    async fn list_published_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<ContentVectorSnapshot>> {
        if self.fail_content {
            return Err(Self::injected("list_published_since"));
        }
        self.inner.list_published_since(since).await
    }

    async fn upsert_highlights(&self, post_id: &str, highlights: &[String]) -> Result<()> {
        self.inner.upsert_highlights(post_id, highlights).await
    }

    async fn update_scores(
        &self,
        post_id: &str,
        engagement_score: f32,
        freshness_score: f32,
        refreshed_at: DateTime<Utc>,
    ) -> Result<()> {
        self.inner
            .update_scores(post_id, engagement_score, freshness_score, refreshed_at)
            .await
    }
}

#[async_trait]
impl ClusterRepository for FlakyStore {
    async fn replace_all(&self, clusters: &[TopicCluster]) -> Result<()> {
        self.inner.replace_all(clusters).await
    }

    async fn list_clusters(&self) -> Result<Vec<TopicCluster>> {
        self.inner.list_clusters().await
    }
}

#[async_trait]
impl ProfileRepository for FlakyStore {
    async fn get_profile(&self, user_id: &str) -> Result<Option<UserProfileSnapshot>> {
        if self.fail_profiles {
            return Err(Self::injected("get_profile"));
        }
        let profile = self.inner.get_profile(user_id).await?;
        if self.opt_out_after_read.as_deref() == Some(user_id) {
            self.inner.update_opt_out(user_id, Some(true), None).await?;
        }
        Ok(profile)
    }

    async fn upsert_profile(&self, profile: &UserProfileSnapshot) -> Result<bool> {
        if self.fail_profile_for.as_deref() == Some(profile.user_id.as_str()) {
            return Err(Self::injected("upsert_profile"));
        }
        self.inner.upsert_profile(profile).await
    }

    async fn clear_features(&self, user_id: &str) -> Result<bool> {
        self.inner.clear_features(user_id).await
    }

    async fn update_opt_out(
        &self,
        user_id: &str,
        personalization_opt_out: Option<bool>,
        analytics_opt_out: Option<bool>,
    ) -> Result<()> {
        self.inner
            .update_opt_out(user_id, personalization_opt_out, analytics_opt_out)
            .await
    }

    async fn list_opted_out(&self) -> Result<Vec<String>> {
        self.inner.list_opted_out().await
    }
}

#[async_trait]
impl AffinityRepository for FlakyStore {
    async fn replace_for_user(&self, user_id: &str, scores: &[AffinityScore]) -> Result<()> {
        self.inner.replace_for_user(user_id, scores).await
    }

    async fn list_for_user(&self, user_id: &str) -> Result<Vec<AffinityScore>> {
        self.inner.list_for_user(user_id).await
    }

    async fn delete_for_user(&self, user_id: &str) -> Result<()> {
        self.inner.delete_for_user(user_id).await
    }
}

#[async_trait]
impl EngagementRepository for FlakyStore {
    async fn events_for_user(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<UserEngagementEvent>> {
        self.inner.events_for_user(user_id, since).await
    }

    async fn active_user_ids(&self, since: DateTime<Utc>) -> Result<Vec<String>> {
        self.inner.active_user_ids(since).await
    }

    async fn post_event_counts(&self, since: DateTime<Utc>) -> Result<HashMap<String, u64>> {
        self.inner.post_event_counts(since).await
    }
}

#[async_trait]
impl AuditLogRepository for FlakyStore {
    async fn record_etl_run(&self, summary: &EtlSummary) -> Result<()> {
        self.inner.record_etl_run(summary).await
    }
}

/// Cache whose backend is always down
pub struct BrokenCache;

#[async_trait]
impl CacheStore for BrokenCache {
    async fn get_raw(&self, _key: &str) -> CacheResult<Option<String>> {
        Err(CacheError::Unavailable("connection refused".to_string()))
    }

    async fn set_raw(&self, _key: &str, _value: String, _ttl_secs: u64) -> CacheResult<()> {
        Err(CacheError::Unavailable("connection refused".to_string()))
    }

    async fn delete(&self, _key: &str) -> CacheResult<()> {
        Err(CacheError::Unavailable("connection refused".to_string()))
    }

    async fn purge_prefix(&self, _prefix: &str) -> CacheResult<usize> {
        Err(CacheError::Unavailable("connection refused".to_string()))
    }
}
