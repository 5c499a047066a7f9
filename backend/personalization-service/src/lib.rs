pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod jobs;
pub mod metrics;
pub mod models;
pub mod services;
pub mod utils;

pub use config::{Config, PersonalizationConfig};
pub use db::{MemoryStore, PgPersonalizationStore, Repositories};
pub use error::{AppError, Result};
pub use jobs::{EtlOptions, EtlOrchestrator, EtlSummary};
pub use services::{FeedAssembler, PersonalizationContext};
