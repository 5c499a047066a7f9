//! Repository interfaces for every store the personalization pipeline touches.
//!
//! Algorithms only see these traits; `postgres` and `memory` provide the backends.

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgPersonalizationStore;

use crate::error::Result;
use crate::jobs::EtlSummary;
use crate::models::{
    AffinityScore, ContentVectorSnapshot, TopicCluster, UserEngagementEvent, UserProfileSnapshot,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;

#[async_trait]
pub trait ContentVectorRepository: Send + Sync {
    /// All vectors, published or not
    async fn list_vectors(&self) -> Result<Vec<ContentVectorSnapshot>>;

    async fn get_vector(&self, post_id: &str) -> Result<Option<ContentVectorSnapshot>>;

    /// Published vectors with `published_at >= since`
    async fn list_published_since(&self, since: DateTime<Utc>)
        -> Result<Vec<ContentVectorSnapshot>>;

    /// Replace highlights without touching the embedding
    async fn upsert_highlights(&self, post_id: &str, highlights: &[String]) -> Result<()>;

    /// Store recomputed derived scores and stamp `refreshed_at`
    async fn update_scores(
        &self,
        post_id: &str,
        engagement_score: f32,
        freshness_score: f32,
        refreshed_at: DateTime<Utc>,
    ) -> Result<()>;
}

#[async_trait]
pub trait ClusterRepository: Send + Sync {
    /// Delete every cluster and membership, then insert `clusters`, atomically
    async fn replace_all(&self, clusters: &[TopicCluster]) -> Result<()>;

    async fn list_clusters(&self) -> Result<Vec<TopicCluster>>;
}

#[async_trait]
pub trait ProfileRepository: Send + Sync {
    async fn get_profile(&self, user_id: &str) -> Result<Option<UserProfileSnapshot>>;

    /// Insert or refresh a rebuilt profile.
    ///
    /// An existing row keeps its opt-out flags, which only `update_opt_out`
    /// changes. Nothing is written when the stored row has opted out of
    /// personalization; the return value is `false` in that case.
    async fn upsert_profile(&self, profile: &UserProfileSnapshot) -> Result<bool>;

    /// Drop topics and the feature vector. Returns `true` if anything was cleared.
    async fn clear_features(&self, user_id: &str) -> Result<bool>;

    /// Partial update of opt-out flags; `None` leaves a flag unchanged.
    /// Creates a neutral profile row when the user has none yet.
    async fn update_opt_out(
        &self,
        user_id: &str,
        personalization_opt_out: Option<bool>,
        analytics_opt_out: Option<bool>,
    ) -> Result<()>;

    async fn list_opted_out(&self) -> Result<Vec<String>>;
}

#[async_trait]
pub trait AffinityRepository: Send + Sync {
    /// Delete all stored affinities of the user, then insert `scores`
    async fn replace_for_user(&self, user_id: &str, scores: &[AffinityScore]) -> Result<()>;

    async fn list_for_user(&self, user_id: &str) -> Result<Vec<AffinityScore>>;

    async fn delete_for_user(&self, user_id: &str) -> Result<()>;
}

#[async_trait]
pub trait EngagementRepository: Send + Sync {
    async fn events_for_user(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<UserEngagementEvent>>;

    /// Users with at least one event since `since`
    async fn active_user_ids(&self, since: DateTime<Utc>) -> Result<Vec<String>>;

    /// post_id → event count since `since`
    async fn post_event_counts(&self, since: DateTime<Utc>) -> Result<HashMap<String, u64>>;
}

#[async_trait]
pub trait AuditLogRepository: Send + Sync {
    async fn record_etl_run(&self, summary: &EtlSummary) -> Result<()>;
}

/// Bundle of repository handles passed explicitly to services
#[derive(Clone)]
pub struct Repositories {
    pub content: Arc<dyn ContentVectorRepository>,
    pub clusters: Arc<dyn ClusterRepository>,
    pub profiles: Arc<dyn ProfileRepository>,
    pub affinities: Arc<dyn AffinityRepository>,
    pub events: Arc<dyn EngagementRepository>,
    pub audit: Arc<dyn AuditLogRepository>,
}

impl Repositories {
    /// Use one backend for every repository
    pub fn from_store<S>(store: Arc<S>) -> Self
    where
        S: ContentVectorRepository
            + ClusterRepository
            + ProfileRepository
            + AffinityRepository
            + EngagementRepository
            + AuditLogRepository
            + 'static,
    {
        Self {
            content: store.clone(),
            clusters: store.clone(),
            profiles: store.clone(),
            affinities: store.clone(),
            events: store.clone(),
            audit: store,
        }
    }
}
