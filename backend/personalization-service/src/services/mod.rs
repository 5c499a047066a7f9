pub mod affinity;
pub mod clustering;
pub mod feed;
pub mod opt_out;
pub mod profile_builder;

pub use affinity::{AffinityScorer, ScoredContent, ScoringWeights};
pub use clustering::{refresh_clusters, ClusteringReport, TopicClusterer};
pub use feed::{FeedAssembler, FeedConfig, PersonalizationContext};
pub use opt_out::{purge_personalization, OptOutService, PurgeOutcome};
pub use profile_builder::{
    build_feature_vector, AggregatorConfig, EngagementAggregator, ProfileBuilder, ProfileFlags,
    SegmentThresholds,
};
