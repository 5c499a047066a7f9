pub mod feed;

pub use feed::{get_personalized_feed, health, metrics_endpoint, FeedQuery};

use actix_web::web;

/// Register every route on an actix app
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(get_personalized_feed)
        .service(health)
        .service(metrics_endpoint);
}
