/// Personalized Feed API Handlers
///
/// HTTP endpoints for the personalized feed, health and metrics
use actix_web::{get, web, HttpResponse};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::error::Result;
use crate::metrics;
use crate::models::FeedRequest;
use crate::services::feed::FeedAssembler;

/// Query parameters for GET /api/v1/personalized-feed
#[derive(Debug, Deserialize)]
pub struct FeedQuery {
    pub user_id: Option<String>,

    /// Limit (default: 20, max: 100)
    pub limit: Option<usize>,

    /// Minimum feed size reached by trending fallback (default: 10, max: 100)
    pub fallback_limit: Option<usize>,

    /// Post the reader is currently viewing
    pub context_post_id: Option<String>,

    #[serde(default)]
    pub force_refresh: bool,
}

impl From<FeedQuery> for FeedRequest {
    fn from(query: FeedQuery) -> Self {
        Self {
            user_id: query.user_id,
            limit: query.limit,
            fallback_limit: query.fallback_limit,
            context_post_id: query.context_post_id,
            force_refresh: query.force_refresh,
        }
    }
}

/// GET /api/v1/personalized-feed
///
/// Ranked feed for a reader, falling back to trending content
#[get("/api/v1/personalized-feed")]
pub async fn get_personalized_feed(
    query: web::Query<FeedQuery>,
    assembler: web::Data<FeedAssembler>,
) -> Result<HttpResponse> {
    debug!(
        user_id = ?query.user_id,
        limit = ?query.limit,
        context_post_id = ?query.context_post_id,
        "Personalized feed request"
    );

    let response = assembler
        .get_personalized_feed(query.into_inner().into())
        .await?;

    Ok(HttpResponse::Ok().json(response))
}

/// GET /health
#[get("/health")]
pub async fn health(assembler: web::Data<FeedAssembler>) -> HttpResponse {
    let store = assembler.context().repos.is_some();
    HttpResponse::Ok().json(json!({
        "status": if store { "ok" } else { "degraded" },
        "store_configured": store,
    }))
}

/// GET /metrics
#[get("/metrics")]
pub async fn metrics_endpoint() -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(metrics::render())
}
