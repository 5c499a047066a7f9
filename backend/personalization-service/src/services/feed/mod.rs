//! Personalized feed assembly
//!
//! Request flow:
//! 1. Ineligible (opted out, or anonymous without a context post): trending only, no cache
//! 2. Cache lookup unless `force_refresh`
//! 3. Load or rebuild the profile, score published candidates, keep the top `limit`
//! 4. Blend trending items when the list is short or the profile has no signal
//! 5. Cache write with TTL
//!
//! Storage and cache failures in steps 2-4 degrade to the trending path. Only a
//! failure to produce even the trending list is returned as an error.

pub mod trending;

pub use trending::{rank_trending, trending_items, trending_score, TRENDING_REASON};

use crate::config::PersonalizationConfig;
use crate::db::Repositories;
use crate::error::{AppError, Result};
use crate::metrics;
use crate::models::{
    CacheStatus, ContentVectorSnapshot, FeedItemSource, FeedRequest, PersonalizedFeedItem,
    PersonalizedFeedResponse, TopicPreference, UserProfileSnapshot,
};
use crate::services::affinity::AffinityScorer;
use crate::services::profile_builder::{
    EngagementAggregator, ProfileBuilder, ProfileFlags, TONE_PREFIX,
};
use chrono::{DateTime, Duration, Utc};
use feed_cache::{CacheKey, CacheStore};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

pub const MAX_FEED_LIMIT: usize = 100;

/// Weight given to each tag of the context post in an anonymous pseudo-profile
const CONTEXT_TOPIC_WEIGHT: f64 = 1.0;

#[derive(Debug, Clone)]
pub struct FeedConfig {
    pub default_limit: usize,
    pub default_fallback_limit: usize,
    pub max_limit: usize,
    /// Personalized candidates scoring below this are dropped
    pub min_affinity: f32,
    pub cache_ttl_secs: u64,
    pub trending_window_days: i64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            default_limit: 20,
            default_fallback_limit: 10,
            max_limit: MAX_FEED_LIMIT,
            min_affinity: 0.2,
            cache_ttl_secs: feed_cache::ttl::PERSONALIZED_FEED,
            trending_window_days: 14,
        }
    }
}

/// Everything a request needs, passed explicitly instead of through globals
#[derive(Clone)]
pub struct PersonalizationContext {
    /// `None` when no backing store is configured
    pub repos: Option<Repositories>,
    pub cache: Arc<dyn CacheStore>,
    pub config: PersonalizationConfig,
}

impl PersonalizationContext {
    pub fn new(
        repos: Option<Repositories>,
        cache: Arc<dyn CacheStore>,
        config: PersonalizationConfig,
    ) -> Self {
        Self {
            repos,
            cache,
            config,
        }
    }
}

/// Request parameters after defaults and caps are applied
#[derive(Debug, Clone)]
struct ResolvedRequest {
    user_id: Option<String>,
    context_post_id: Option<String>,
    limit: usize,
    fallback_limit: usize,
    force_refresh: bool,
}

impl ResolvedRequest {
    fn cache_key(&self) -> String {
        CacheKey::personalized_feed(
            self.user_id.as_deref(),
            self.context_post_id.as_deref(),
            self.limit,
            self.fallback_limit,
        )
    }
}

/// Why the trending list was used
#[derive(Debug, Clone, Copy)]
enum FallbackCause {
    Ineligible,
    Degraded,
}

impl FallbackCause {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Ineligible => "ineligible",
            Self::Degraded => "degraded",
        }
    }
}

pub struct FeedAssembler {
    ctx: PersonalizationContext,
    scorer: AffinityScorer,
    builder: ProfileBuilder,
}

impl FeedAssembler {
    pub fn new(ctx: PersonalizationContext) -> Self {
        let scorer = AffinityScorer::new(ctx.config.scoring.clone());
        let builder = ProfileBuilder::new(
            EngagementAggregator::new(ctx.config.aggregator.clone()),
            ctx.config.segments.clone(),
        );
        Self {
            ctx,
            scorer,
            builder,
        }
    }

    pub fn context(&self) -> &PersonalizationContext {
        &self.ctx
    }

    pub async fn get_personalized_feed(
        &self,
        request: FeedRequest,
    ) -> Result<PersonalizedFeedResponse> {
        let started = Instant::now();
        let request = self.resolve(request);

        let Some(repos) = &self.ctx.repos else {
            warn!("Personalized feed requested without a backing store");
            return Err(AppError::Unavailable(
                "personalization store is not configured".to_string(),
            ));
        };

        let response = match self.assemble(repos, &request, started).await {
            Ok(Some(response)) => response,
            Ok(None) => {
                self.trending_only(repos, &request, FallbackCause::Ineligible, started)
                    .await?
            }
            Err(e) => {
                warn!(
                    user_id = ?request.user_id,
                    error = %e,
                    "Personalized feed degraded to trending"
                );
                self.trending_only(repos, &request, FallbackCause::Degraded, started)
                    .await?
            }
        };

        metrics::record_feed_request(response.cache.as_str(), started.elapsed());
        Ok(response)
    }

    fn resolve(&self, request: FeedRequest) -> ResolvedRequest {
        let config = &self.ctx.config.feed;
        let max = config.max_limit.clamp(1, MAX_FEED_LIMIT);
        let non_empty = |value: Option<String>| {
            value
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        ResolvedRequest {
            user_id: non_empty(request.user_id),
            context_post_id: non_empty(request.context_post_id),
            limit: request.limit.unwrap_or(config.default_limit).clamp(1, max),
            fallback_limit: request
                .fallback_limit
                .unwrap_or(config.default_fallback_limit)
                .min(max),
            force_refresh: request.force_refresh,
        }
    }

    /// `Ok(None)` means the reader cannot be personalized
    async fn assemble(
        &self,
        repos: &Repositories,
        request: &ResolvedRequest,
        started: Instant,
    ) -> Result<Option<PersonalizedFeedResponse>> {
        let now = Utc::now();

        let context_post = match &request.context_post_id {
            Some(post_id) => repos.content.get_vector(post_id).await?,
            None => None,
        };

        let stored = match &request.user_id {
            Some(user_id) => repos.profiles.get_profile(user_id).await?,
            None => None,
        };

        if stored.as_ref().is_some_and(|p| p.personalization_opt_out) {
            debug!(user_id = ?request.user_id, "Reader opted out of personalization");
            return Ok(None);
        }
        if request.user_id.is_none() && context_post.is_none() {
            return Ok(None);
        }

        let key = request.cache_key();
        if !request.force_refresh {
            match feed_cache::get_json::<PersonalizedFeedResponse>(self.ctx.cache.as_ref(), &key)
                .await
            {
                Ok(Some(mut cached)) => {
                    cached.cache = CacheStatus::Hit;
                    cached.latency_ms = started.elapsed().as_millis() as u64;
                    return Ok(Some(cached));
                }
                Ok(None) => {}
                Err(e) => warn!(key = %key, error = %e, "Feed cache read failed, treating as miss"),
            }
        }

        let profile = match (&request.user_id, stored, &context_post) {
            (Some(_), Some(profile), _) => profile,
            (Some(user_id), None, _) => self.rebuild_profile(repos, user_id, now).await?,
            (None, _, Some(context)) => contextual_profile(context),
            (None, _, None) => return Ok(None),
        };

        let candidates = repos.content.list_vectors().await?;

        let has_signal = profile.has_signal();
        let mut items = if has_signal {
            self.rank(&profile, candidates, request)
        } else {
            Vec::new()
        };

        let mut fallback = false;
        if !has_signal || items.len() < request.fallback_limit {
            fallback = true;
            let reason = if has_signal { "sparse" } else { "no_signal" };
            metrics::record_feed_fallback(reason);

            let trending = trending_items(
                repos.content.as_ref(),
                self.ctx.config.feed.trending_window_days,
                request.fallback_limit,
                request.context_post_id.as_deref(),
            )
            .await?;
            blend(&mut items, trending, request.fallback_limit);
        }

        let mut response = PersonalizedFeedResponse {
            items,
            cache: if request.force_refresh {
                CacheStatus::Bypass
            } else {
                CacheStatus::Miss
            },
            fallback,
            segment: request.user_id.as_ref().map(|_| profile.segment),
            generated_at: now,
            latency_ms: 0,
        };

        if let Err(e) = feed_cache::set_json(
            self.ctx.cache.as_ref(),
            &key,
            &response,
            self.ctx.config.feed.cache_ttl_secs,
        )
        .await
        {
            warn!(key = %key, error = %e, "Feed cache write failed");
        }

        response.latency_ms = started.elapsed().as_millis() as u64;
        info!(
            user_id = ?request.user_id,
            items = response.items.len(),
            fallback = response.fallback,
            cache = response.cache.as_str(),
            latency_ms = response.latency_ms,
            "Assembled personalized feed"
        );

        Ok(Some(response))
    }

    /// Profile from recent events, used when none is stored yet. Not persisted.
    async fn rebuild_profile(
        &self,
        repos: &Repositories,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<UserProfileSnapshot> {
        let since = now - Duration::days(self.ctx.config.aggregator.lookback_days);
        let events = repos.events.events_for_user(user_id, since).await?;
        if events.is_empty() {
            return Ok(UserProfileSnapshot::neutral(user_id));
        }

        let vectors = repos.content.list_vectors().await?;
        self.builder
            .rebuild(user_id, &events, &vectors, ProfileFlags::default(), now)
    }

    fn rank(
        &self,
        profile: &UserProfileSnapshot,
        candidates: Vec<ContentVectorSnapshot>,
        request: &ResolvedRequest,
    ) -> Vec<PersonalizedFeedItem> {
        let min_affinity = self.ctx.config.feed.min_affinity;
        let mut scored: Vec<PersonalizedFeedItem> = candidates
            .iter()
            .filter(|c| c.published)
            .filter(|c| Some(c.post_id.as_str()) != request.context_post_id.as_deref())
            .filter_map(|content| {
                let scored = self.scorer.score(profile, content);
                (scored.affinity >= min_affinity).then(|| {
                    PersonalizedFeedItem::from_content(
                        content,
                        scored.affinity,
                        scored.reason,
                        FeedItemSource::Personalized,
                    )
                })
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.post_id.cmp(&b.post_id))
        });
        scored.truncate(request.limit);
        scored
    }

    async fn trending_only(
        &self,
        repos: &Repositories,
        request: &ResolvedRequest,
        cause: FallbackCause,
        started: Instant,
    ) -> Result<PersonalizedFeedResponse> {
        metrics::record_feed_fallback(cause.as_str());

        let items = trending_items(
            repos.content.as_ref(),
            self.ctx.config.feed.trending_window_days,
            request.fallback_limit,
            request.context_post_id.as_deref(),
        )
        .await
        .map_err(|e| {
            warn!(error = %e, "Trending fallback unavailable");
            AppError::Unavailable(format!("trending feed unavailable: {}", e))
        })?;

        Ok(PersonalizedFeedResponse {
            items,
            cache: CacheStatus::Bypass,
            fallback: true,
            segment: None,
            generated_at: Utc::now(),
            latency_ms: started.elapsed().as_millis() as u64,
        })
    }
}

/// Append trending items not already present until `fallback_limit` is reached
fn blend(
    items: &mut Vec<PersonalizedFeedItem>,
    trending: Vec<PersonalizedFeedItem>,
    fallback_limit: usize,
) {
    let mut seen: HashSet<String> = items.iter().map(|i| i.post_id.clone()).collect();
    for item in trending {
        if items.len() >= fallback_limit {
            break;
        }
        if seen.insert(item.post_id.clone()) {
            items.push(item);
        }
    }
}

/// Pseudo-profile for an anonymous reader built from the post they are viewing
fn contextual_profile(context: &ContentVectorSnapshot) -> UserProfileSnapshot {
    let mut profile = UserProfileSnapshot::neutral(feed_cache::ANONYMOUS);
    profile.topics = context
        .tags
        .iter()
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty() && !t.starts_with(TONE_PREFIX))
        .map(|name| TopicPreference {
            name,
            weight: CONTEXT_TOPIC_WEIGHT,
            last_seen: context.published_at,
        })
        .collect();
    profile.feature_vector = context.embedding.clone();
    profile
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(post_id: &str, source: FeedItemSource) -> PersonalizedFeedItem {
        PersonalizedFeedItem {
            post_id: post_id.to_string(),
            slug: post_id.to_string(),
            title: post_id.to_string(),
            summary: None,
            tags: vec![],
            highlights: vec![],
            score: 0.5,
            reason: vec![],
            source,
        }
    }

    #[test]
    fn test_blend_deduplicates_and_stops_at_limit() {
        let mut items = vec![item("a", FeedItemSource::Personalized)];
        let trending = vec![
            item("a", FeedItemSource::Trending),
            item("b", FeedItemSource::Trending),
            item("c", FeedItemSource::Trending),
            item("d", FeedItemSource::Trending),
        ];

        blend(&mut items, trending, 3);

        let ids: Vec<&str> = items.iter().map(|i| i.post_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(items[0].source, FeedItemSource::Personalized);
    }

    #[test]
    fn test_blend_never_truncates_personalized_items() {
        let mut items = vec![
            item("a", FeedItemSource::Personalized),
            item("b", FeedItemSource::Personalized),
        ];
        blend(&mut items, vec![item("c", FeedItemSource::Trending)], 1);
        assert_eq!(items.len(), 2);
    }

    #[test]
    fn test_contextual_profile_uses_post_signal() {
        let context = ContentVectorSnapshot {
            post_id: "ctx".to_string(),
            slug: "ctx".to_string(),
            title: "Context".to_string(),
            summary: None,
            tags: vec!["React".to_string(), "tone:persuasive".to_string()],
            embedding: vec![0.3, 0.7],
            engagement_score: 0.0,
            freshness_score: 0.0,
            highlights: vec![],
            published: true,
            published_at: Utc::now(),
            refreshed_at: None,
        };

        let profile = contextual_profile(&context);
        assert!(profile.has_signal());
        assert_eq!(profile.topics.len(), 1);
        assert_eq!(profile.topics[0].name, "react");
        assert_eq!(profile.feature_vector, vec![0.3, 0.7]);
    }
}
