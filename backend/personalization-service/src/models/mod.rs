use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Embedding plus derived scores for one published item
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContentVectorSnapshot {
    pub post_id: String,
    pub slug: String,
    pub title: String,
    pub summary: Option<String>,
    pub tags: Vec<String>,
    pub embedding: Vec<f32>,
    /// Normalized reader engagement in [0, 1]
    pub engagement_score: f32,
    /// Recency in [0, 1], 1.0 = just published
    pub freshness_score: f32,
    pub highlights: Vec<String>,
    pub published: bool,
    pub published_at: DateTime<Utc>,
    /// Last time scores and highlights were recomputed
    pub refreshed_at: Option<DateTime<Utc>>,
}

/// Member of a topic cluster
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClusterMember {
    pub post_id: String,
    /// Cosine similarity of the member vector to the final centroid
    pub membership_score: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TopicCluster {
    pub id: String,
    pub centroid: Vec<f32>,
    pub label: String,
    pub keywords: Vec<String>,
    pub members: Vec<ClusterMember>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngagementEventType {
    Session,
    View,
    Share,
    Feedback,
}

impl EngagementEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Session => "session",
            Self::View => "view",
            Self::Share => "share",
            Self::Feedback => "feedback",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "session" => Some(Self::Session),
            "view" => Some(Self::View),
            "share" => Some(Self::Share),
            "feedback" => Some(Self::Feedback),
            _ => None,
        }
    }
}

impl std::fmt::Display for EngagementEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Append-only reader engagement record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserEngagementEvent {
    pub user_id: String,
    pub post_id: Option<String>,
    pub slug: Option<String>,
    pub event_type: EngagementEventType,
    pub duration_seconds: Option<f64>,
    pub max_scroll_percent: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub sentiment: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TopicPreference {
    pub name: String,
    /// Recency-decayed accumulation
    pub weight: f64,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TonePreference {
    #[default]
    Informative,
    Conversational,
    Persuasive,
}

impl TonePreference {
    /// Tie-break order when two tones are observed equally often
    pub const ALL: [TonePreference; 3] = [
        TonePreference::Informative,
        TonePreference::Conversational,
        TonePreference::Persuasive,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Informative => "informative",
            Self::Conversational => "conversational",
            Self::Persuasive => "persuasive",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "informative" => Some(Self::Informative),
            "conversational" => Some(Self::Conversational),
            "persuasive" => Some(Self::Persuasive),
            _ => None,
        }
    }
}

/// Coarse engagement-volume bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum UserSegment {
    /// No engagement recorded
    #[default]
    New,
    Casual,
    Regular,
    Power,
}

impl UserSegment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Casual => "casual",
            Self::Regular => "regular",
            Self::Power => "power",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "new" => Some(Self::New),
            "casual" => Some(Self::Casual),
            "regular" => Some(Self::Regular),
            "power" => Some(Self::Power),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserProfileSnapshot {
    pub user_id: String,
    pub segment: UserSegment,
    pub avg_read_time_seconds: f64,
    pub session_count: u32,
    pub view_count: u32,
    pub topics: Vec<TopicPreference>,
    pub tone_preference: TonePreference,
    pub feature_vector: Vec<f32>,
    pub personalization_opt_out: bool,
    pub analytics_opt_out: bool,
    pub last_active_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl UserProfileSnapshot {
    /// Snapshot with no personalization signal at all
    pub fn neutral(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            segment: UserSegment::New,
            avg_read_time_seconds: 0.0,
            session_count: 0,
            view_count: 0,
            topics: Vec::new(),
            tone_preference: TonePreference::Informative,
            feature_vector: Vec::new(),
            personalization_opt_out: false,
            analytics_opt_out: false,
            last_active_at: None,
            updated_at: Utc::now(),
        }
    }

    /// True when topics or a non-zero feature vector can drive ranking
    pub fn has_signal(&self) -> bool {
        let has_topics = self.topics.iter().any(|t| t.weight > 0.0);
        let has_vector = self.feature_vector.iter().any(|v| *v != 0.0);
        has_topics || has_vector
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AffinityScore {
    pub user_id: String,
    pub post_id: String,
    pub affinity: f32,
    pub reason: Vec<String>,
    pub computed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedItemSource {
    Personalized,
    Trending,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PersonalizedFeedItem {
    pub post_id: String,
    pub slug: String,
    pub title: String,
    pub summary: Option<String>,
    pub tags: Vec<String>,
    pub highlights: Vec<String>,
    pub score: f32,
    pub reason: Vec<String>,
    pub source: FeedItemSource,
}

impl PersonalizedFeedItem {
    pub fn from_content(
        content: &ContentVectorSnapshot,
        score: f32,
        reason: Vec<String>,
        source: FeedItemSource,
    ) -> Self {
        Self {
            post_id: content.post_id.clone(),
            slug: content.slug.clone(),
            title: content.title.clone(),
            summary: content.summary.clone(),
            tags: content.tags.clone(),
            highlights: content.highlights.clone(),
            score,
            reason,
            source,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheStatus {
    Hit,
    Miss,
    Bypass,
}

impl CacheStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hit => "hit",
            Self::Miss => "miss",
            Self::Bypass => "bypass",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PersonalizedFeedResponse {
    pub items: Vec<PersonalizedFeedItem>,
    pub cache: CacheStatus,
    pub fallback: bool,
    pub segment: Option<UserSegment>,
    pub generated_at: DateTime<Utc>,
    pub latency_ms: u64,
}

/// Feed request as received from the HTTP layer or a batch trigger
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeedRequest {
    pub user_id: Option<String>,
    pub limit: Option<usize>,
    pub fallback_limit: Option<usize>,
    pub context_post_id: Option<String>,
    #[serde(default)]
    pub force_refresh: bool,
}
