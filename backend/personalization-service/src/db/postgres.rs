//! Postgres implementation of the repository traits

use super::{
    AffinityRepository, AuditLogRepository, ClusterRepository, ContentVectorRepository,
    EngagementRepository, ProfileRepository,
};
use crate::error::{AppError, Result};
use crate::jobs::EtlSummary;
use crate::models::{
    AffinityScore, ClusterMember, ContentVectorSnapshot, EngagementEventType, TonePreference,
    TopicCluster, TopicPreference, UserEngagementEvent, UserProfileSnapshot, UserSegment,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use std::collections::HashMap;
use tracing::{debug, error, warn};

const CONTENT_COLUMNS: &str = "post_id, slug, title, summary, tags, embedding, engagement_score, \
     freshness_score, highlights, published, published_at, refreshed_at";

const PROFILE_COLUMNS: &str = "user_id, segment, avg_read_time_seconds, session_count, view_count, \
     topics, tone_preference, feature_vector, personalization_opt_out, analytics_opt_out, \
     last_active_at, updated_at";

#[derive(FromRow)]
struct ContentVectorRow {
    post_id: String,
    slug: String,
    title: String,
    summary: Option<String>,
    tags: Vec<String>,
    embedding: Vec<f32>,
    engagement_score: f32,
    freshness_score: f32,
    highlights: Vec<String>,
    published: bool,
    published_at: DateTime<Utc>,
    refreshed_at: Option<DateTime<Utc>>,
}

impl From<ContentVectorRow> for ContentVectorSnapshot {
    fn from(row: ContentVectorRow) -> Self {
        Self {
            post_id: row.post_id,
            slug: row.slug,
            title: row.title,
            summary: row.summary,
            tags: row.tags,
            embedding: row.embedding,
            engagement_score: row.engagement_score,
            freshness_score: row.freshness_score,
            highlights: row.highlights,
            published: row.published,
            published_at: row.published_at,
            refreshed_at: row.refreshed_at,
        }
    }
}

#[derive(FromRow)]
struct ProfileRow {
    user_id: String,
    segment: String,
    avg_read_time_seconds: f64,
    session_count: i32,
    view_count: i32,
    topics: Json<Vec<TopicPreference>>,
    tone_preference: String,
    feature_vector: Vec<f32>,
    personalization_opt_out: bool,
    analytics_opt_out: bool,
    last_active_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
}

impl From<ProfileRow> for UserProfileSnapshot {
    fn from(row: ProfileRow) -> Self {
        let segment = UserSegment::parse(&row.segment).unwrap_or_else(|| {
            warn!(user_id = %row.user_id, segment = %row.segment, "Unknown segment in profile row");
            UserSegment::New
        });
        Self {
            user_id: row.user_id,
            segment,
            avg_read_time_seconds: row.avg_read_time_seconds,
            session_count: row.session_count.max(0) as u32,
            view_count: row.view_count.max(0) as u32,
            topics: row.topics.0,
            tone_preference: TonePreference::parse(&row.tone_preference).unwrap_or_default(),
            feature_vector: row.feature_vector,
            personalization_opt_out: row.personalization_opt_out,
            analytics_opt_out: row.analytics_opt_out,
            last_active_at: row.last_active_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(FromRow)]
struct EventRow {
    user_id: String,
    post_id: Option<String>,
    slug: Option<String>,
    event_type: String,
    duration_seconds: Option<f64>,
    max_scroll_percent: Option<f64>,
    created_at: DateTime<Utc>,
    sentiment: Option<String>,
}

#[derive(FromRow)]
struct AffinityRow {
    user_id: String,
    post_id: String,
    affinity: f32,
    reason: Vec<String>,
    computed_at: DateTime<Utc>,
}

#[derive(FromRow)]
struct ClusterRow {
    id: String,
    centroid: Vec<f32>,
    label: String,
    keywords: Vec<String>,
}

#[derive(FromRow)]
struct MemberRow {
    cluster_id: String,
    post_id: String,
    membership_score: f32,
}

/// Postgres-backed store for all personalization tables
#[derive(Clone)]
pub struct PgPersonalizationStore {
    pool: PgPool,
}

impl PgPersonalizationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply the embedded schema migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::Storage(format!("migration failed: {}", e)))
    }

    /// Cheap connectivity check
    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl ContentVectorRepository for PgPersonalizationStore {
    async fn list_vectors(&self) -> Result<Vec<ContentVectorSnapshot>> {
        let rows = sqlx::query_as::<_, ContentVectorRow>(&format!(
            "SELECT {} FROM content_vectors ORDER BY post_id",
            CONTENT_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to list content vectors: {}", e);
            AppError::from(e)
        })?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn get_vector(&self, post_id: &str) -> Result<Option<ContentVectorSnapshot>> {
        let row = sqlx::query_as::<_, ContentVectorRow>(&format!(
            "SELECT {} FROM content_vectors WHERE post_id = $1",
            CONTENT_COLUMNS
        ))
        .bind(post_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn list_published_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<ContentVectorSnapshot>> {
        let rows = sqlx::query_as::<_, ContentVectorRow>(&format!(
            "SELECT {} FROM content_vectors \
             WHERE published = TRUE AND published_at >= $1 \
             ORDER BY published_at DESC",
            CONTENT_COLUMNS
        ))
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn upsert_highlights(&self, post_id: &str, highlights: &[String]) -> Result<()> {
        let result = sqlx::query("UPDATE content_vectors SET highlights = $2 WHERE post_id = $1")
            .bind(post_id)
            .bind(highlights)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("content vector {}", post_id)));
        }
        Ok(())
    }

    async fn update_scores(
        &self,
        post_id: &str,
        engagement_score: f32,
        freshness_score: f32,
        refreshed_at: DateTime<Utc>,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE content_vectors
            SET engagement_score = $2, freshness_score = $3, refreshed_at = $4
            WHERE post_id = $1
            "#,
        )
        .bind(post_id)
        .bind(engagement_score)
        .bind(freshness_score)
        .bind(refreshed_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("content vector {}", post_id)));
        }
        Ok(())
    }
}

#[async_trait]
impl ClusterRepository for PgPersonalizationStore {
    async fn replace_all(&self, clusters: &[TopicCluster]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM topic_cluster_members")
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM topic_clusters")
            .execute(&mut *tx)
            .await?;

        for cluster in clusters {
            sqlx::query(
                r#"
                INSERT INTO topic_clusters (id, centroid, label, keywords)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(&cluster.id)
            .bind(&cluster.centroid)
            .bind(&cluster.label)
            .bind(&cluster.keywords)
            .execute(&mut *tx)
            .await?;

            for member in &cluster.members {
                sqlx::query(
                    "INSERT INTO topic_cluster_members (cluster_id, post_id, membership_score) \
                     VALUES ($1, $2, $3)",
                )
                .bind(&cluster.id)
                .bind(&member.post_id)
                .bind(member.membership_score)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        debug!(clusters = clusters.len(), "Replaced topic clusters");
        Ok(())
    }

    async fn list_clusters(&self) -> Result<Vec<TopicCluster>> {
        let clusters = sqlx::query_as::<_, ClusterRow>(
            "SELECT id, centroid, label, keywords FROM topic_clusters ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        let members = sqlx::query_as::<_, MemberRow>(
            "SELECT cluster_id, post_id, membership_score FROM topic_cluster_members \
             ORDER BY cluster_id, membership_score DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut by_cluster: HashMap<String, Vec<ClusterMember>> = HashMap::new();
        for row in members {
            by_cluster
                .entry(row.cluster_id)
                .or_default()
                .push(ClusterMember {
                    post_id: row.post_id,
                    membership_score: row.membership_score,
                });
        }

        Ok(clusters
            .into_iter()
            .map(|row| TopicCluster {
                members: by_cluster.remove(&row.id).unwrap_or_default(),
                id: row.id,
                centroid: row.centroid,
                label: row.label,
                keywords: row.keywords,
            })
            .collect())
    }
}

#[async_trait]
impl ProfileRepository for PgPersonalizationStore {
    async fn get_profile(&self, user_id: &str) -> Result<Option<UserProfileSnapshot>> {
        let row = sqlx::query_as::<_, ProfileRow>(&format!(
            "SELECT {} FROM user_profiles WHERE user_id = $1",
            PROFILE_COLUMNS
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn upsert_profile(&self, profile: &UserProfileSnapshot) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO user_profiles (
                user_id, segment, avg_read_time_seconds, session_count, view_count, topics,
                tone_preference, feature_vector, personalization_opt_out, analytics_opt_out,
                last_active_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (user_id) DO UPDATE SET
                segment = EXCLUDED.segment,
                avg_read_time_seconds = EXCLUDED.avg_read_time_seconds,
                session_count = EXCLUDED.session_count,
                view_count = EXCLUDED.view_count,
                topics = EXCLUDED.topics,
                tone_preference = EXCLUDED.tone_preference,
                feature_vector = EXCLUDED.feature_vector,
                last_active_at = EXCLUDED.last_active_at,
                updated_at = EXCLUDED.updated_at
            WHERE NOT user_profiles.personalization_opt_out
            "#,
        )
        .bind(&profile.user_id)
        .bind(profile.segment.as_str())
        .bind(profile.avg_read_time_seconds)
        .bind(profile.session_count.min(i32::MAX as u32) as i32)
        .bind(profile.view_count.min(i32::MAX as u32) as i32)
        .bind(Json(&profile.topics))
        .bind(profile.tone_preference.as_str())
        .bind(&profile.feature_vector)
        .bind(profile.personalization_opt_out)
        .bind(profile.analytics_opt_out)
        .bind(profile.last_active_at)
        .bind(profile.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn clear_features(&self, user_id: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE user_profiles
            SET topics = '[]'::jsonb, feature_vector = '{}', updated_at = NOW()
            WHERE user_id = $1
              AND (jsonb_array_length(topics) > 0 OR cardinality(feature_vector) > 0)
            "#,
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn update_opt_out(
        &self,
        user_id: &str,
        personalization_opt_out: Option<bool>,
        analytics_opt_out: Option<bool>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO user_profiles (user_id, personalization_opt_out, analytics_opt_out)
            VALUES ($1, COALESCE($2, FALSE), COALESCE($3, FALSE))
            ON CONFLICT (user_id) DO UPDATE SET
                personalization_opt_out = COALESCE($2, user_profiles.personalization_opt_out),
                analytics_opt_out = COALESCE($3, user_profiles.analytics_opt_out),
                updated_at = NOW()
            "#,
        )
        .bind(user_id)
        .bind(personalization_opt_out)
        .bind(analytics_opt_out)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_opted_out(&self) -> Result<Vec<String>> {
        let ids = sqlx::query_scalar::<_, String>(
            r#"
            SELECT user_id FROM user_profiles
            WHERE personalization_opt_out = TRUE
            ORDER BY user_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }
}

#[async_trait]
impl AffinityRepository for PgPersonalizationStore {
    async fn replace_for_user(&self, user_id: &str, scores: &[AffinityScore]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM user_affinities WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        for score in scores {
            sqlx::query(
                "INSERT INTO user_affinities (user_id, post_id, affinity, reason, computed_at) \
                 VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(user_id)
            .bind(&score.post_id)
            .bind(score.affinity)
            .bind(&score.reason)
            .bind(score.computed_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn list_for_user(&self, user_id: &str) -> Result<Vec<AffinityScore>> {
        let rows = sqlx::query_as::<_, AffinityRow>(
            "SELECT user_id, post_id, affinity, reason, computed_at FROM user_affinities \
             WHERE user_id = $1 ORDER BY affinity DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| AffinityScore {
                user_id: row.user_id,
                post_id: row.post_id,
                affinity: row.affinity,
                reason: row.reason,
                computed_at: row.computed_at,
            })
            .collect())
    }

    async fn delete_for_user(&self, user_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM user_affinities WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl EngagementRepository for PgPersonalizationStore {
    async fn events_for_user(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<UserEngagementEvent>> {
        let rows = sqlx::query_as::<_, EventRow>(
            r#"
            SELECT user_id, post_id, slug, event_type, duration_seconds, max_scroll_percent,
                   created_at, sentiment
            FROM user_engagement_events
            WHERE user_id = $1 AND created_at >= $2
            ORDER BY created_at
            "#,
        )
        .bind(user_id)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let Some(event_type) = EngagementEventType::parse(&row.event_type) else {
                    warn!(
                        user_id = %row.user_id,
                        event_type = %row.event_type,
                        "Skipping unknown event type"
                    );
                    return None;
                };
                Some(UserEngagementEvent {
                    user_id: row.user_id,
                    post_id: row.post_id,
                    slug: row.slug,
                    event_type,
                    duration_seconds: row.duration_seconds,
                    max_scroll_percent: row.max_scroll_percent,
                    created_at: row.created_at,
                    sentiment: row.sentiment,
                })
            })
            .collect())
    }

    async fn active_user_ids(&self, since: DateTime<Utc>) -> Result<Vec<String>> {
        let ids = sqlx::query_scalar::<_, String>(
            "SELECT DISTINCT user_id FROM user_engagement_events WHERE created_at >= $1 \
             ORDER BY user_id",
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }

    async fn post_event_counts(&self, since: DateTime<Utc>) -> Result<HashMap<String, u64>> {
        let rows = sqlx::query_as::<_, (String, i64)>(
            "SELECT post_id, COUNT(*) FROM user_engagement_events \
             WHERE post_id IS NOT NULL AND created_at >= $1 GROUP BY post_id",
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(post_id, count)| (post_id, count.max(0) as u64))
            .collect())
    }
}

#[async_trait]
impl AuditLogRepository for PgPersonalizationStore {
    async fn record_etl_run(&self, summary: &EtlSummary) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO personalization_etl_runs (
                run_id, started_at, profiles, content_vectors, affinities, clusters, errors,
                duration_ms
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(summary.run_id)
        .bind(summary.started_at)
        .bind(summary.profiles as i64)
        .bind(summary.content_vectors as i64)
        .bind(summary.affinities as i64)
        .bind(summary.clusters as i64)
        .bind(summary.errors as i64)
        .bind(summary.duration_ms as i64)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
