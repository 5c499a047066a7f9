//! Reader-to-content affinity scoring
//!
//! affinity = topic * topic_overlap
//!          + vector * max(0, cosine(profile.feature_vector, content.embedding))
//!          + fresh * freshness_score
//!          + engage * engagement_score
//!
//! clamped to [0, 1]. Empty or mismatched vectors contribute nothing.

use crate::models::{AffinityScore, ContentVectorSnapshot, UserProfileSnapshot};
use crate::utils::cosine_similarity;
use chrono::Utc;
use std::collections::HashMap;

pub const MAX_TOPIC_REASONS: usize = 3;
pub const REASON_SIMILAR: &str = "Similar to your reading history";
pub const REASON_FRESH: &str = "Fresh";
pub const REASON_POPULAR: &str = "Popular with readers";

/// Weights of the affinity terms
#[derive(Debug, Clone)]
pub struct ScoringWeights {
    pub topic: f32,
    pub vector: f32,
    pub freshness: f32,
    pub engagement: f32,
    /// Cosine at or above which the history reason is attached
    pub similarity_reason_threshold: f32,
    /// Freshness / engagement at or above which their reasons are attached
    pub highlight_reason_threshold: f32,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            topic: 0.45,
            vector: 0.40,
            freshness: 0.10,
            engagement: 0.05,
            similarity_reason_threshold: 0.5,
            highlight_reason_threshold: 0.8,
        }
    }
}

/// Score and reasons for one (profile, content) pair
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredContent {
    pub affinity: f32,
    pub topic_overlap: f32,
    pub similarity: f32,
    pub reason: Vec<String>,
}

pub struct AffinityScorer {
    weights: ScoringWeights,
}

impl Default for AffinityScorer {
    fn default() -> Self {
        Self::new(ScoringWeights::default())
    }
}

impl AffinityScorer {
    pub fn new(weights: ScoringWeights) -> Self {
        Self { weights }
    }

    pub fn score(
        &self,
        profile: &UserProfileSnapshot,
        content: &ContentVectorSnapshot,
    ) -> ScoredContent {
        let (topic_overlap, matched) = topic_overlap(profile, content);
        let similarity = cosine_similarity(&profile.feature_vector, &content.embedding).max(0.0);
        let freshness = content.freshness_score.clamp(0.0, 1.0);
        let engagement = content.engagement_score.clamp(0.0, 1.0);

        let affinity = (self.weights.topic * topic_overlap
            + self.weights.vector * similarity
            + self.weights.freshness * freshness
            + self.weights.engagement * engagement)
            .clamp(0.0, 1.0);

        let mut reason: Vec<String> = matched
            .into_iter()
            .take(MAX_TOPIC_REASONS)
            .map(|tag| format!("Topic match: {}", tag))
            .collect();
        if similarity >= self.weights.similarity_reason_threshold {
            reason.push(REASON_SIMILAR.to_string());
        }
        if freshness >= self.weights.highlight_reason_threshold {
            reason.push(REASON_FRESH.to_string());
        }
        if engagement >= self.weights.highlight_reason_threshold {
            reason.push(REASON_POPULAR.to_string());
        }

        ScoredContent {
            affinity,
            topic_overlap,
            similarity,
            reason,
        }
    }

    /// Best `n` candidates for the profile, highest affinity first
    pub fn top_affinities(
        &self,
        profile: &UserProfileSnapshot,
        candidates: &[ContentVectorSnapshot],
        n: usize,
    ) -> Vec<AffinityScore> {
        let computed_at = Utc::now();
        let mut scores: Vec<AffinityScore> = candidates
            .iter()
            .filter(|c| c.published)
            .map(|content| {
                let scored = self.score(profile, content);
                AffinityScore {
                    user_id: profile.user_id.clone(),
                    post_id: content.post_id.clone(),
                    affinity: scored.affinity,
                    reason: scored.reason,
                    computed_at,
                }
            })
            .collect();

        scores.sort_by(|a, b| {
            b.affinity
                .partial_cmp(&a.affinity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.post_id.cmp(&b.post_id))
        });
        scores.truncate(n);
        scores
    }
}

/// Share of positive topic weight matched by content tags, plus the
/// matched tags ordered strongest first
fn topic_overlap(
    profile: &UserProfileSnapshot,
    content: &ContentVectorSnapshot,
) -> (f32, Vec<String>) {
    let total: f64 = profile
        .topics
        .iter()
        .filter(|t| t.weight > 0.0)
        .map(|t| t.weight)
        .sum();
    if total <= 0.0 || content.tags.is_empty() {
        return (0.0, Vec::new());
    }

    let tags: HashMap<String, &str> = content
        .tags
        .iter()
        .map(|t| (t.trim().to_lowercase(), t.as_str()))
        .collect();

    let mut matched: Vec<(&str, f64)> = profile
        .topics
        .iter()
        .filter(|t| t.weight > 0.0)
        .filter_map(|t| {
            tags.get(&t.name.trim().to_lowercase())
                .map(|tag| (*tag, t.weight))
        })
        .collect();

    matched.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    let matched_weight: f64 = matched.iter().map(|(_, w)| w).sum();
    let overlap = (matched_weight / total).clamp(0.0, 1.0) as f32;

    (
        overlap,
        matched.into_iter().map(|(tag, _)| tag.to_string()).collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TopicPreference;

    fn content(tags: &[&str], embedding: Vec<f32>) -> ContentVectorSnapshot {
        ContentVectorSnapshot {
            post_id: "p1".to_string(),
            slug: "p1".to_string(),
            title: "Post".to_string(),
            summary: None,
            tags: tags.iter().map(|t| t.to_string()).collect(),
            embedding,
            engagement_score: 0.3,
            freshness_score: 0.3,
            highlights: vec![],
            published: true,
            published_at: Utc::now(),
            refreshed_at: None,
        }
    }

    fn profile(topics: &[(&str, f64)], feature_vector: Vec<f32>) -> UserProfileSnapshot {
        let mut profile = UserProfileSnapshot::neutral("u1");
        profile.topics = topics
            .iter()
            .map(|(name, weight)| TopicPreference {
                name: name.to_string(),
                weight: *weight,
                last_seen: Utc::now(),
            })
            .collect();
        profile.feature_vector = feature_vector;
        profile
    }

    #[test]
    fn test_overlap_outscores_orthogonal_profile() {
        let scorer = AffinityScorer::default();
        let item = content(&["react", "frontend"], vec![1.0, 0.0]);

        let matching = scorer.score(&profile(&[("react", 2.0)], vec![0.0, 1.0]), &item);
        let unrelated = scorer.score(&profile(&[("rust", 2.0)], vec![0.0, 1.0]), &item);

        assert!(matching.affinity > unrelated.affinity);
        assert!(matching.reason.contains(&"Topic match: react".to_string()));
        assert!(unrelated.reason.iter().all(|r| !r.starts_with("Topic match")));
    }

    #[test]
    fn test_overlap_is_case_insensitive_fraction() {
        let scorer = AffinityScorer::default();
        let item = content(&["React"], vec![]);
        let scored = scorer.score(&profile(&[("react", 3.0), ("rust", 1.0)], vec![]), &item);

        assert!((scored.topic_overlap - 0.75).abs() < 1e-6);
        assert_eq!(scored.reason, vec!["Topic match: React".to_string()]);
    }

    #[test]
    fn test_empty_vectors_degrade_to_neutral() {
        let scorer = AffinityScorer::default();
        let scored = scorer.score(&profile(&[], vec![]), &content(&[], vec![]));

        assert_eq!(scored.similarity, 0.0);
        assert!(scored.affinity >= 0.0 && scored.affinity < 0.1);
        assert!(scored.reason.is_empty());
    }

    #[test]
    fn test_negative_cosine_contributes_nothing() {
        let scorer = AffinityScorer::default();
        let scored = scorer.score(&profile(&[], vec![-1.0, 0.0]), &content(&[], vec![1.0, 0.0]));
        assert_eq!(scored.similarity, 0.0);
    }

    #[test]
    fn test_reason_thresholds() {
        let scorer = AffinityScorer::default();
        let mut item = content(&[], vec![1.0, 0.0]);
        item.freshness_score = 0.9;
        item.engagement_score = 0.95;

        let scored = scorer.score(&profile(&[], vec![1.0, 0.1]), &item);
        assert_eq!(
            scored.reason,
            vec![REASON_SIMILAR.to_string(), REASON_FRESH.to_string(), REASON_POPULAR.to_string()]
        );
        assert!(scored.affinity <= 1.0);
    }

    #[test]
    fn test_topic_reasons_capped() {
        let scorer = AffinityScorer::default();
        let item = content(&["a", "b", "c", "d"], vec![]);
        let scored = scorer.score(
            &profile(&[("a", 4.0), ("b", 3.0), ("c", 2.0), ("d", 1.0)], vec![]),
            &item,
        );
        assert_eq!(scored.reason.len(), MAX_TOPIC_REASONS);
        assert_eq!(scored.reason[0], "Topic match: a");
        assert!((scored.topic_overlap - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_top_affinities_sorted_and_truncated() {
        let scorer = AffinityScorer::default();
        let mut low = content(&["rust"], vec![0.0, 1.0]);
        low.post_id = "low".to_string();
        let mut high = content(&["react"], vec![1.0, 0.0]);
        high.post_id = "high".to_string();
        let mut draft = content(&["react"], vec![1.0, 0.0]);
        draft.post_id = "draft".to_string();
        draft.published = false;

        let reader = profile(&[("react", 1.0)], vec![1.0, 0.0]);
        let top = scorer.top_affinities(&reader, &[low, high, draft], 1);

        assert_eq!(top.len(), 1);
        assert_eq!(top[0].post_id, "high");
        assert_eq!(top[0].user_id, "u1");
    }
}
