// ============================================
// Background Jobs Module
// ============================================
//
// Contains the personalization ETL runner.
//
// Triggered via:
// - CronJob
// - Command line argument (--mode etl)

pub mod etl;

pub use etl::{
    generate_highlights, EtlConfig, EtlHealthPolicy, EtlOptions, EtlOrchestrator, EtlSummary,
};
