//! Trending fallback pool
//!
//! Non-personalized ranking of recent published content, served when a
//! reader cannot be personalized or the personalized list runs short.
//!
//! Algorithm:
//! - Time decay: 1 / (1 + age_hours / 24)
//! - Engagement boost: 1 + ln(1 + 10 * engagement_score)
//! - Score = time_score * engagement_boost

use crate::db::ContentVectorRepository;
use crate::error::Result;
use crate::models::{ContentVectorSnapshot, FeedItemSource, PersonalizedFeedItem};
use chrono::{DateTime, Duration, Utc};
use tracing::debug;

pub const TRENDING_REASON: &str = "Trending now";

/// Ranking score for one item
pub fn trending_score(content: &ContentVectorSnapshot, now: DateTime<Utc>) -> f64 {
    let age_hours = (now - content.published_at).num_minutes().max(0) as f64 / 60.0;
    let time_score = 1.0 / (1.0 + age_hours / 24.0);

    let engagement = content.engagement_score.clamp(0.0, 1.0) as f64;
    let engagement_boost = 1.0 + (1.0 + engagement * 10.0).ln();

    time_score * engagement_boost
}

/// Published items sorted by trending score, highest first
pub fn rank_trending(
    vectors: Vec<ContentVectorSnapshot>,
    now: DateTime<Utc>,
) -> Vec<(ContentVectorSnapshot, f64)> {
    let mut scored: Vec<(ContentVectorSnapshot, f64)> = vectors
        .into_iter()
        .filter(|v| v.published)
        .map(|v| {
            let score = trending_score(&v, now);
            (v, score)
        })
        .collect();

    scored.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.post_id.cmp(&b.0.post_id))
    });
    scored
}

/// Top `limit` trending items from the last `window_days`, never `exclude`
pub async fn trending_items(
    content: &dyn ContentVectorRepository,
    window_days: i64,
    limit: usize,
    exclude: Option<&str>,
) -> Result<Vec<PersonalizedFeedItem>> {
    let now = Utc::now();
    let recent = content
        .list_published_since(now - Duration::days(window_days))
        .await?;

    let items: Vec<PersonalizedFeedItem> = rank_trending(recent, now)
        .into_iter()
        .filter(|(v, _)| Some(v.post_id.as_str()) != exclude)
        .take(limit)
        .map(|(v, score)| {
            PersonalizedFeedItem::from_content(
                &v,
                score as f32,
                vec![TRENDING_REASON.to_string()],
                FeedItemSource::Trending,
            )
        })
        .collect();

    debug!(window_days, items = items.len(), "Built trending list");
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn post(id: &str, age_hours: i64, engagement: f32) -> ContentVectorSnapshot {
        ContentVectorSnapshot {
            post_id: id.to_string(),
            slug: id.to_string(),
            title: id.to_string(),
            summary: None,
            tags: vec![],
            embedding: vec![],
            engagement_score: engagement,
            freshness_score: 0.0,
            highlights: vec![],
            published: true,
            published_at: Utc::now() - Duration::hours(age_hours),
            refreshed_at: None,
        }
    }

    #[test]
    fn test_newer_posts_rank_higher() {
        let ranked = rank_trending(vec![post("old", 48, 0.5), post("new", 1, 0.5)], Utc::now());
        assert_eq!(ranked[0].0.post_id, "new");
    }

    #[test]
    fn test_engagement_matters() {
        let ranked = rank_trending(vec![post("quiet", 12, 0.1), post("busy", 12, 0.9)], Utc::now());
        assert_eq!(ranked[0].0.post_id, "busy");
    }

    #[test]
    fn test_unpublished_excluded() {
        let mut draft = post("draft", 1, 1.0);
        draft.published = false;
        assert!(rank_trending(vec![draft], Utc::now()).is_empty());
    }

    #[test]
    fn test_zero_engagement_has_unit_boost() {
        let now = Utc::now();
        let mut fresh = post("p", 0, 0.0);
        fresh.published_at = now;
        assert!((trending_score(&fresh, now) - 1.0).abs() < 1e-9);
    }
}
