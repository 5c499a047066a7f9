//! Reader opt-out handling

use crate::db::Repositories;
use crate::error::Result;
use feed_cache::{CacheKey, CacheStore};
use std::sync::Arc;
use tracing::{info, warn};

/// What a purge removed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeOutcome {
    pub profile_cleared: bool,
    pub cached_feeds: usize,
}

/// Clear derived features, stored affinities and cached feeds of one reader.
///
/// Cache failures are logged and reported as zero purged keys; cached feeds
/// expire on their own TTL.
pub async fn purge_personalization(
    repos: &Repositories,
    cache: &dyn CacheStore,
    user_id: &str,
) -> Result<PurgeOutcome> {
    let mut outcome = PurgeOutcome::default();

    outcome.profile_cleared = repos.profiles.clear_features(user_id).await?;

    repos.affinities.delete_for_user(user_id).await?;

    let prefix = CacheKey::personalized_feed_prefix(Some(user_id));
    match cache.purge_prefix(&prefix).await {
        Ok(removed) => outcome.cached_feeds = removed,
        Err(e) => warn!(user_id = %user_id, error = %e, "Failed to purge cached feeds"),
    }

    Ok(outcome)
}

pub struct OptOutService {
    repos: Repositories,
    cache: Arc<dyn CacheStore>,
}

impl OptOutService {
    pub fn new(repos: Repositories, cache: Arc<dyn CacheStore>) -> Self {
        Self { repos, cache }
    }

    /// Partial flag update; `None` leaves a flag unchanged.
    ///
    /// Enabling the personalization opt-out purges everything derived for the reader.
    pub async fn set_opt_out(
        &self,
        user_id: &str,
        personalization: Option<bool>,
        analytics: Option<bool>,
    ) -> Result<PurgeOutcome> {
        self.repos
            .profiles
            .update_opt_out(user_id, personalization, analytics)
            .await?;

        let outcome = if personalization == Some(true) {
            purge_personalization(&self.repos, self.cache.as_ref(), user_id).await?
        } else {
            PurgeOutcome::default()
        };

        info!(
            user_id = %user_id,
            personalization = ?personalization,
            analytics = ?analytics,
            cached_feeds = outcome.cached_feeds,
            "Updated opt-out flags"
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{AffinityRepository, MemoryStore, ProfileRepository};
    use crate::models::{AffinityScore, TopicPreference, UserProfileSnapshot};
    use chrono::Utc;
    use feed_cache::MemoryCache;

    async fn seeded() -> (Arc<MemoryStore>, Arc<MemoryCache>, OptOutService) {
        let store = Arc::new(MemoryStore::new());
        let cache = Arc::new(MemoryCache::new());

        let mut profile = UserProfileSnapshot::neutral("u1");
        profile.topics = vec![TopicPreference {
            name: "react".to_string(),
            weight: 2.0,
            last_seen: Utc::now(),
        }];
        profile.feature_vector = vec![0.5, 0.5];
        store.upsert_profile(&profile).await.unwrap();
        store
            .replace_for_user(
                "u1",
                &[AffinityScore {
                    user_id: "u1".to_string(),
                    post_id: "p1".to_string(),
                    affinity: 0.7,
                    reason: vec![],
                    computed_at: Utc::now(),
                }],
            )
            .await
            .unwrap();

        let key = CacheKey::personalized_feed(Some("u1"), None, 20, 10);
        cache.set_raw(&key, "{}".to_string(), 60).await.unwrap();
        let other = CacheKey::personalized_feed(Some("u2"), None, 20, 10);
        cache.set_raw(&other, "{}".to_string(), 60).await.unwrap();

        let service = OptOutService::new(Repositories::from_store(store.clone()), cache.clone());
        (store, cache, service)
    }

    #[tokio::test]
    async fn test_opt_out_purges_derived_state() {
        let (store, cache, service) = seeded().await;

        let outcome = service.set_opt_out("u1", Some(true), None).await.unwrap();

        assert!(outcome.profile_cleared);
        assert_eq!(outcome.cached_feeds, 1);
        assert_eq!(cache.len(), 1);
        assert!(store.list_for_user("u1").await.unwrap().is_empty());

        let profile = store.get_profile("u1").await.unwrap().unwrap();
        assert!(profile.personalization_opt_out);
        assert!(profile.topics.is_empty());
        assert!(profile.feature_vector.is_empty());
    }

    #[tokio::test]
    async fn test_analytics_only_update_keeps_features() {
        let (store, cache, service) = seeded().await;

        let outcome = service.set_opt_out("u1", None, Some(true)).await.unwrap();

        assert_eq!(outcome, PurgeOutcome::default());
        assert_eq!(cache.len(), 2);
        let profile = store.get_profile("u1").await.unwrap().unwrap();
        assert!(profile.analytics_opt_out);
        assert_eq!(profile.topics.len(), 1);
        assert_eq!(store.list_for_user("u1").await.unwrap().len(), 1);
    }
}
