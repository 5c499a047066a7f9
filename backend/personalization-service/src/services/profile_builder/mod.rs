// ============================================
// Profile Builder
// ============================================
//
// Rebuilds a reader profile from engagement history:
// 1. EngagementAggregator: events -> decayed topics, tone, per-post weights
// 2. build_feature_vector: per-post weights x embeddings -> feature vector
// 3. ProfileBuilder: scalar fields, segment and opt-out handling
//
// Profiles are rebuilt by the ETL pass and, when missing, on the feed path
// (without persisting).

pub mod builder;
pub mod engagement_aggregator;

pub use builder::{build_feature_vector, ProfileBuilder, ProfileFlags, SegmentThresholds};
pub use engagement_aggregator::{
    AggregatorConfig, EngagementAggregate, EngagementAggregator, TagLookup, TONE_PREFIX,
};
