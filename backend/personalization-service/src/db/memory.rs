//! In-process store implementing every repository trait.
//!
//! Used by the simulation mode when no DATABASE_URL is configured, and by tests.

use super::{
    AffinityRepository, AuditLogRepository, ClusterRepository, ContentVectorRepository,
    EngagementRepository, ProfileRepository,
};
use crate::error::{AppError, Result};
use crate::jobs::EtlSummary;
use crate::models::{
    AffinityScore, ContentVectorSnapshot, TopicCluster, UserEngagementEvent, UserProfileSnapshot,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use tokio::sync::RwLock;

#[derive(Default)]
pub struct MemoryStore {
    vectors: RwLock<Vec<ContentVectorSnapshot>>,
    clusters: RwLock<Vec<TopicCluster>>,
    profiles: RwLock<HashMap<String, UserProfileSnapshot>>,
    affinities: RwLock<HashMap<String, Vec<AffinityScore>>>,
    events: RwLock<Vec<UserEngagementEvent>>,
    audit_log: RwLock<Vec<EtlSummary>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a content vector by post_id
    pub async fn put_vector(&self, vector: ContentVectorSnapshot) {
        let mut vectors = self.vectors.write().await;
        match vectors.iter_mut().find(|v| v.post_id == vector.post_id) {
            Some(existing) => *existing = vector,
            None => vectors.push(vector),
        }
    }

    pub async fn push_event(&self, event: UserEngagementEvent) {
        self.events.write().await.push(event);
    }

    pub async fn audit_entries(&self) -> Vec<EtlSummary> {
        self.audit_log.read().await.clone()
    }
}

#[async_trait]
impl ContentVectorRepository for MemoryStore {
    async fn list_vectors(&self) -> Result<Vec<ContentVectorSnapshot>> {
        Ok(self.vectors.read().await.clone())
    }

    async fn get_vector(&self, post_id: &str) -> Result<Option<ContentVectorSnapshot>> {
        Ok(self
            .vectors
            .read()
            .await
            .iter()
            .find(|v| v.post_id == post_id)
            .cloned())
    }

    async fn list_published_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<ContentVectorSnapshot>> {
        Ok(self
            .vectors
            .read()
            .await
            .iter()
            .filter(|v| v.published && v.published_at >= since)
            .cloned()
            .collect())
    }

    async fn upsert_highlights(&self, post_id: &str, highlights: &[String]) -> Result<()> {
        let mut vectors = self.vectors.write().await;
        let vector = vectors
            .iter_mut()
            .find(|v| v.post_id == post_id)
            .ok_or_else(|| AppError::NotFound(format!("content vector {}", post_id)))?;
        vector.highlights = highlights.to_vec();
        Ok(())
    }

    async fn update_scores(
        &self,
        post_id: &str,
        engagement_score: f32,
        freshness_score: f32,
        refreshed_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut vectors = self.vectors.write().await;
        let vector = vectors
            .iter_mut()
            .find(|v| v.post_id == post_id)
            .ok_or_else(|| AppError::NotFound(format!("content vector {}", post_id)))?;
        vector.engagement_score = engagement_score;
        vector.freshness_score = freshness_score;
        vector.refreshed_at = Some(refreshed_at);
        Ok(())
    }
}

#[async_trait]
impl ClusterRepository for MemoryStore {
    async fn replace_all(&self, clusters: &[TopicCluster]) -> Result<()> {
        *self.clusters.write().await = clusters.to_vec();
        Ok(())
    }

    async fn list_clusters(&self) -> Result<Vec<TopicCluster>> {
        Ok(self.clusters.read().await.clone())
    }
}

#[async_trait]
impl ProfileRepository for MemoryStore {
    async fn get_profile(&self, user_id: &str) -> Result<Option<UserProfileSnapshot>> {
        Ok(self.profiles.read().await.get(user_id).cloned())
    }

    async fn upsert_profile(&self, profile: &UserProfileSnapshot) -> Result<bool> {
        let mut profiles = self.profiles.write().await;
        match profiles.get_mut(&profile.user_id) {
            Some(existing) if existing.personalization_opt_out => Ok(false),
            Some(existing) => {
                let personalization_opt_out = existing.personalization_opt_out;
                let analytics_opt_out = existing.analytics_opt_out;
                *existing = profile.clone();
                existing.personalization_opt_out = personalization_opt_out;
                existing.analytics_opt_out = analytics_opt_out;
                Ok(true)
            }
            None => {
                profiles.insert(profile.user_id.clone(), profile.clone());
                Ok(true)
            }
        }
    }

    async fn clear_features(&self, user_id: &str) -> Result<bool> {
        let mut profiles = self.profiles.write().await;
        match profiles.get_mut(user_id) {
            Some(p) if !p.topics.is_empty() || !p.feature_vector.is_empty() => {
                p.topics.clear();
                p.feature_vector.clear();
                p.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn update_opt_out(
        &self,
        user_id: &str,
        personalization_opt_out: Option<bool>,
        analytics_opt_out: Option<bool>,
    ) -> Result<()> {
        let mut profiles = self.profiles.write().await;
        let profile = profiles
            .entry(user_id.to_string())
            .or_insert_with(|| UserProfileSnapshot::neutral(user_id));
        if let Some(flag) = personalization_opt_out {
            profile.personalization_opt_out = flag;
        }
        if let Some(flag) = analytics_opt_out {
            profile.analytics_opt_out = flag;
        }
        Ok(())
    }

    async fn list_opted_out(&self) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self
            .profiles
            .read()
            .await
            .values()
            .filter(|p| p.personalization_opt_out)
            .map(|p| p.user_id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }
}

#[async_trait]
impl AffinityRepository for MemoryStore {
    async fn replace_for_user(&self, user_id: &str, scores: &[AffinityScore]) -> Result<()> {
        self.affinities
            .write()
            .await
            .insert(user_id.to_string(), scores.to_vec());
        Ok(())
    }

    async fn list_for_user(&self, user_id: &str) -> Result<Vec<AffinityScore>> {
        Ok(self
            .affinities
            .read()
            .await
            .get(user_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn delete_for_user(&self, user_id: &str) -> Result<()> {
        self.affinities.write().await.remove(user_id);
        Ok(())
    }
}

#[async_trait]
impl EngagementRepository for MemoryStore {
    async fn events_for_user(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<UserEngagementEvent>> {
        Ok(self
            .events
            .read()
            .await
            .iter()
            .filter(|e| e.user_id == user_id && e.created_at >= since)
            .cloned()
            .collect())
    }

    async fn active_user_ids(&self, since: DateTime<Utc>) -> Result<Vec<String>> {
        let ids: BTreeSet<String> = self
            .events
            .read()
            .await
            .iter()
            .filter(|e| e.created_at >= since)
            .map(|e| e.user_id.clone())
            .collect();
        Ok(ids.into_iter().collect())
    }

    async fn post_event_counts(&self, since: DateTime<Utc>) -> Result<HashMap<String, u64>> {
        let mut counts = HashMap::new();
        for event in self.events.read().await.iter() {
            if event.created_at < since {
                continue;
            }
            if let Some(post_id) = &event.post_id {
                *counts.entry(post_id.clone()).or_insert(0) += 1;
            }
        }
        Ok(counts)
    }
}

#[async_trait]
impl AuditLogRepository for MemoryStore {
    async fn record_etl_run(&self, summary: &EtlSummary) -> Result<()> {
        self.audit_log.write().await.push(summary.clone());
        Ok(())
    }
}
