use super::engagement_aggregator::{EngagementAggregator, TagLookup};
use crate::error::{AppError, Result};
use crate::models::{
    ContentVectorSnapshot, EngagementEventType, UserEngagementEvent, UserProfileSnapshot,
    UserSegment,
};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tracing::{debug, info};

/// Event-volume thresholds for segment classification
#[derive(Debug, Clone)]
pub struct SegmentThresholds {
    pub regular_min_events: usize,
    pub power_min_events: usize,
}

impl Default for SegmentThresholds {
    fn default() -> Self {
        Self {
            regular_min_events: 10,
            power_min_events: 50,
        }
    }
}

impl SegmentThresholds {
    pub fn classify(&self, total_events: usize) -> UserSegment {
        if total_events >= self.power_min_events {
            UserSegment::Power
        } else if total_events >= self.regular_min_events {
            UserSegment::Regular
        } else if total_events > 0 {
            UserSegment::Casual
        } else {
            UserSegment::New
        }
    }
}

/// Opt-out flags carried over from the stored profile
#[derive(Debug, Clone, Copy, Default)]
pub struct ProfileFlags {
    pub personalization_opt_out: bool,
    pub analytics_opt_out: bool,
}

impl From<&UserProfileSnapshot> for ProfileFlags {
    fn from(profile: &UserProfileSnapshot) -> Self {
        Self {
            personalization_opt_out: profile.personalization_opt_out,
            analytics_opt_out: profile.analytics_opt_out,
        }
    }
}

/// Weighted sum of embeddings.
///
/// Content without a positive weight or without an embedding is ignored.
/// Embeddings that disagree on dimensionality are a configuration error.
pub fn build_feature_vector(
    vectors: &[ContentVectorSnapshot],
    weights: &HashMap<String, f64>,
) -> Result<Vec<f32>> {
    let mut feature: Vec<f32> = Vec::new();
    let mut dimension: Option<(usize, &str)> = None;

    for vector in vectors {
        let weight = match weights.get(&vector.post_id) {
            Some(w) if w.is_finite() && *w > 0.0 => *w as f32,
            _ => continue,
        };
        if vector.embedding.is_empty() {
            continue;
        }

        match dimension {
            None => {
                dimension = Some((vector.embedding.len(), vector.post_id.as_str()));
                feature = vec![0.0; vector.embedding.len()];
            }
            Some((dim, first)) if dim != vector.embedding.len() => {
                return Err(AppError::Configuration(format!(
                    "embedding dimensionality mismatch: {} has {}, {} has {}",
                    first,
                    dim,
                    vector.post_id,
                    vector.embedding.len()
                )));
            }
            Some(_) => {}
        }

        for (out, value) in feature.iter_mut().zip(&vector.embedding) {
            *out += weight * value;
        }
    }

    Ok(feature)
}

/// Composes aggregation, feature vector and scalar fields into a snapshot
pub struct ProfileBuilder {
    aggregator: EngagementAggregator,
    thresholds: SegmentThresholds,
}

impl ProfileBuilder {
    pub fn new(aggregator: EngagementAggregator, thresholds: SegmentThresholds) -> Self {
        Self {
            aggregator,
            thresholds,
        }
    }

    pub fn aggregator(&self) -> &EngagementAggregator {
        &self.aggregator
    }

    pub fn rebuild(
        &self,
        user_id: &str,
        events: &[UserEngagementEvent],
        vectors: &[ContentVectorSnapshot],
        flags: ProfileFlags,
        now: DateTime<Utc>,
    ) -> Result<UserProfileSnapshot> {
        if flags.personalization_opt_out {
            debug!(user_id = %user_id, "Personalization opt-out, returning neutral profile");
            let mut profile = UserProfileSnapshot::neutral(user_id);
            profile.personalization_opt_out = true;
            profile.analytics_opt_out = flags.analytics_opt_out;
            profile.updated_at = now;
            return Ok(profile);
        }

        let lookup = TagLookup::from_vectors(vectors);
        let aggregate = self.aggregator.aggregate(events, &lookup, now);
        let feature_vector = build_feature_vector(vectors, &aggregate.post_weights)?;

        let durations: Vec<f64> = events
            .iter()
            .filter_map(|e| e.duration_seconds)
            .filter(|d| d.is_finite() && *d >= 0.0)
            .collect();
        let avg_read_time_seconds = if durations.is_empty() {
            0.0
        } else {
            durations.iter().sum::<f64>() / durations.len() as f64
        };

        let count = |kind: EngagementEventType| {
            events.iter().filter(|e| e.event_type == kind).count() as u32
        };

        let profile = UserProfileSnapshot {
            user_id: user_id.to_string(),
            segment: self.thresholds.classify(events.len()),
            avg_read_time_seconds,
            session_count: count(EngagementEventType::Session),
            view_count: count(EngagementEventType::View),
            topics: aggregate.topics,
            tone_preference: aggregate.tone,
            feature_vector,
            personalization_opt_out: false,
            analytics_opt_out: flags.analytics_opt_out,
            last_active_at: events.iter().map(|e| e.created_at).max(),
            updated_at: now,
        };

        info!(
            user_id = %user_id,
            segment = profile.segment.as_str(),
            topics = profile.topics.len(),
            dims = profile.feature_vector.len(),
            "Rebuilt user profile"
        );

        Ok(profile)
    }
}
