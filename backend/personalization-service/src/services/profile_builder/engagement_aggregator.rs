// ============================================
// Engagement Aggregator
// ============================================
//
// Converts a reader's raw event history into decayed topic preferences
// and a tone preference.
//
// Topic weight formula:
// weight(tag) = SUM(signal * 0.5^(age_days / decay_days))
//
// Signals:
// - session: duration_seconds (1.0 when absent or zero)
// - view / share / feedback: 1.0
//
// Tags of the form "tone:<name>" feed the tone preference instead of topics.

use crate::models::{
    ContentVectorSnapshot, EngagementEventType, TonePreference, TopicPreference,
    UserEngagementEvent,
};
use crate::utils::half_life_decay;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tracing::debug;

pub const TONE_PREFIX: &str = "tone:";

const MILLIS_PER_DAY: f64 = 86_400_000.0;

/// Configuration for engagement aggregation
#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    /// Age in days at which an event's contribution halves
    pub decay_days: f64,
    /// How far back events are loaded for a rebuild
    pub lookback_days: i64,
    /// Maximum number of topics kept per profile
    pub max_topics: usize,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            decay_days: 14.0,
            lookback_days: 90,
            max_topics: 50,
        }
    }
}

/// Resolves the post an event refers to, by post_id first and slug second
#[derive(Debug, Clone, Default)]
pub struct TagLookup {
    tags: HashMap<String, Vec<String>>,
    slugs: HashMap<String, String>,
}

impl TagLookup {
    pub fn from_vectors(vectors: &[ContentVectorSnapshot]) -> Self {
        let mut lookup = Self::default();
        for vector in vectors {
            lookup.insert(&vector.post_id, Some(&vector.slug), vector.tags.clone());
        }
        lookup
    }

    pub fn insert(&mut self, post_id: &str, slug: Option<&str>, tags: Vec<String>) {
        if let Some(slug) = slug.filter(|s| !s.is_empty()) {
            self.slugs.insert(slug.to_string(), post_id.to_string());
        }
        self.tags.insert(post_id.to_string(), tags);
    }

    pub fn resolve(&self, event: &UserEngagementEvent) -> Option<(&str, &[String])> {
        let post_id = match &event.post_id {
            Some(id) if self.tags.contains_key(id) => id.as_str(),
            _ => self.slugs.get(event.slug.as_deref()?)?.as_str(),
        };
        self.tags
            .get_key_value(post_id)
            .map(|(id, tags)| (id.as_str(), tags.as_slice()))
    }
}

/// Output of one aggregation pass
#[derive(Debug, Clone, Default)]
pub struct EngagementAggregate {
    /// Sorted by descending weight
    pub topics: Vec<TopicPreference>,
    pub tone: TonePreference,
    /// post_id → accumulated decayed signal, used as feature-vector weights
    pub post_weights: HashMap<String, f64>,
}

pub struct EngagementAggregator {
    config: AggregatorConfig,
}

impl EngagementAggregator {
    pub fn new(config: AggregatorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    /// Signal strength of a single event
    pub fn signal(event: &UserEngagementEvent) -> f64 {
        match event.event_type {
            EngagementEventType::Session => event
                .duration_seconds
                .filter(|d| d.is_finite() && *d > 0.0)
                .unwrap_or(1.0),
            _ => 1.0,
        }
    }

    pub fn decay_factor(&self, age_days: f64) -> f64 {
        half_life_decay(age_days, self.config.decay_days)
    }

    pub fn aggregate(
        &self,
        events: &[UserEngagementEvent],
        lookup: &TagLookup,
        now: DateTime<Utc>,
    ) -> EngagementAggregate {
        let mut topics: HashMap<String, (f64, DateTime<Utc>)> = HashMap::new();
        let mut post_weights: HashMap<String, f64> = HashMap::new();
        let mut tone_counts = [0u32; TonePreference::ALL.len()];
        let mut unresolved = 0usize;

        for event in events {
            let Some((post_id, tags)) = lookup.resolve(event) else {
                unresolved += 1;
                continue;
            };

            let age_days = (now - event.created_at).num_milliseconds() as f64 / MILLIS_PER_DAY;
            let contribution = Self::signal(event) * self.decay_factor(age_days);

            *post_weights.entry(post_id.to_string()).or_insert(0.0) += contribution;

            for tag in tags {
                let tag = tag.trim().to_lowercase();
                if tag.is_empty() {
                    continue;
                }

                if let Some(tone) = tag.strip_prefix(TONE_PREFIX) {
                    if let Some(tone) = TonePreference::parse(tone) {
                        if let Some(idx) = TonePreference::ALL.iter().position(|t| *t == tone) {
                            tone_counts[idx] += 1;
                        }
                    }
                    continue;
                }

                let entry = topics.entry(tag).or_insert((0.0, event.created_at));
                entry.0 += contribution;
                if event.created_at > entry.1 {
                    entry.1 = event.created_at;
                }
            }
        }

        let mut topics: Vec<TopicPreference> = topics
            .into_iter()
            .map(|(name, (weight, last_seen))| TopicPreference {
                name,
                weight,
                last_seen,
            })
            .collect();

        topics.sort_by(|a, b| {
            b.weight
                .partial_cmp(&a.weight)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.name.cmp(&b.name))
        });
        topics.truncate(self.config.max_topics);

        debug!(
            events = events.len(),
            unresolved,
            topics = topics.len(),
            "Aggregated engagement events"
        );

        EngagementAggregate {
            topics,
            tone: dominant_tone(&tone_counts),
            post_weights,
        }
    }
}

/// Most frequent tone; earlier entries in `TonePreference::ALL` win ties
fn dominant_tone(counts: &[u32]) -> TonePreference {
    let mut best = TonePreference::default();
    let mut best_count = 0;
    for (tone, count) in TonePreference::ALL.iter().zip(counts) {
        if *count > best_count {
            best = *tone;
            best_count = *count;
        }
    }
    best
}
