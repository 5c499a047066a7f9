//! Integration Tests: Personalization ETL
//!
//! Coverage:
//! - One failing profile write is counted and does not roll back the rest
//! - Affinities are replaced only when requested
//! - Opted-out readers are purged instead of rebuilt
//! - An opt-out landing mid-run is never overwritten
//! - Content pass refreshes engagement, freshness and highlights
//! - Clusters are rebuilt and the run is audited
//! - Failure to load the initial inputs aborts the run

mod common;

use common::{add_readers, seeded_store, FlakyStore};
use feed_cache::{CacheKey, CacheStore, MemoryCache};
use personalization_service::db::{
    AffinityRepository, ClusterRepository, ContentVectorRepository, ProfileRepository,
};
use personalization_service::error::AppError;
use personalization_service::jobs::EtlHealthPolicy;
use personalization_service::models::{AffinityScore, TopicPreference, UserProfileSnapshot};
use personalization_service::{
    EtlOptions, EtlOrchestrator, MemoryStore, PersonalizationConfig, Repositories,
};
use chrono::Utc;
use std::sync::Arc;

fn config() -> PersonalizationConfig {
    let mut config = PersonalizationConfig::default();
    config.etl.cluster_seed = Some(7);
    config.etl.concurrency = 3;
    config
}

fn orchestrator(repos: Repositories) -> EtlOrchestrator {
    EtlOrchestrator::new(repos, Arc::new(MemoryCache::new()), config())
}

#[tokio::test]
async fn test_single_profile_failure_is_counted() {
    let store = seeded_store().await;
    let readers = add_readers(&store, 5).await;
    let total_users = readers.len() + 2;

    let mut flaky = FlakyStore::new(store.clone());
    flaky.fail_profile_for = Some("reader-2".to_string());
    let etl = orchestrator(Repositories::from_store(Arc::new(flaky)));

    let summary = etl.run(EtlOptions::default()).await.unwrap();

    assert_eq!(summary.errors, 1);
    assert_eq!(summary.profiles as usize, total_users - 1);
    assert!(store.get_profile("reader-2").await.unwrap().is_none());
    for user_id in readers.iter().filter(|u| *u != "reader-2") {
        let profile = store.get_profile(user_id).await.unwrap();
        assert!(profile.is_some(), "{} should be persisted", user_id);
    }

    let policy = EtlHealthPolicy::default();
    assert!(!policy.is_healthy(&summary));
}

#[tokio::test]
async fn test_clean_run_is_healthy_and_audited() {
    let store = seeded_store().await;
    let etl = orchestrator(Repositories::from_store(store.clone()));

    let summary = etl.run(EtlOptions::default()).await.unwrap();

    assert_eq!(summary.errors, 0);
    assert_eq!(summary.profiles, 2);
    assert!(EtlHealthPolicy::default().is_healthy(&summary));

    let audit = store.audit_entries().await;
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0], summary);
}

#[tokio::test]
async fn test_skip_audit_log() {
    let store = seeded_store().await;
    let etl = orchestrator(Repositories::from_store(store.clone()));

    etl.run(EtlOptions {
        skip_audit_log: true,
        ..Default::default()
    })
    .await
    .unwrap();

    assert!(store.audit_entries().await.is_empty());
}

#[tokio::test]
async fn test_rebuilt_profile_reflects_history() {
    let store = seeded_store().await;
    let etl = orchestrator(Repositories::from_store(store.clone()));

    etl.run(EtlOptions::default()).await.unwrap();

    let profile = store.get_profile("react-reader").await.unwrap().unwrap();
    assert_eq!(profile.topics[0].name, "react");
    assert!(profile.topics.iter().all(|t| !t.name.starts_with("tone:")));
    assert_eq!(profile.feature_vector.len(), 3);
    assert!(profile.feature_vector[0] > profile.feature_vector[1]);
    assert_eq!(profile.session_count, 2);
    assert_eq!(profile.view_count, 1);
}

#[tokio::test]
async fn test_affinities_only_when_requested() {
    let store = seeded_store().await;
    let etl = orchestrator(Repositories::from_store(store.clone()));

    let plain = etl.run(EtlOptions::default()).await.unwrap();
    assert_eq!(plain.affinities, 0);
    assert!(store.list_for_user("react-reader").await.unwrap().is_empty());

    let with_affinities = etl
        .run(EtlOptions {
            refresh_affinities: true,
            ..Default::default()
        })
        .await
        .unwrap();

    let stored = store.list_for_user("react-reader").await.unwrap();
    assert!(!stored.is_empty());
    assert!(stored.iter().all(|a| a.post_id != "draft"));
    assert!(stored[0].post_id.starts_with("react-"));
    assert!(stored.windows(2).all(|w| w[0].affinity >= w[1].affinity));
    assert!(with_affinities.affinities >= stored.len() as u64);
}

#[tokio::test]
async fn test_opted_out_reader_is_purged() {
    let store = seeded_store().await;
    let cache = Arc::new(MemoryCache::new());

    let mut profile = UserProfileSnapshot::neutral("react-reader");
    profile.topics = vec![TopicPreference {
        name: "react".to_string(),
        weight: 3.0,
        last_seen: Utc::now(),
    }];
    profile.feature_vector = vec![1.0, 0.0, 0.0];
    profile.personalization_opt_out = true;
    store.upsert_profile(&profile).await.unwrap();
    store
        .replace_for_user(
            "react-reader",
            &[AffinityScore {
                user_id: "react-reader".to_string(),
                post_id: "react-hooks".to_string(),
                affinity: 0.9,
                reason: vec![],
                computed_at: Utc::now(),
            }],
        )
        .await
        .unwrap();
    let key = CacheKey::personalized_feed(Some("react-reader"), None, 20, 10);
    cache.set_raw(&key, "{}".to_string(), 300).await.unwrap();

    let repos = Repositories::from_store(store.clone());
    let etl = EtlOrchestrator::new(repos, cache.clone(), config());
    let summary = etl
        .run(EtlOptions {
            refresh_affinities: true,
            ..Default::default()
        })
        .await
        .unwrap();

    assert_eq!(summary.errors, 0);
    assert_eq!(summary.profiles, 1, "only rust-reader is rebuilt");

    let purged = store.get_profile("react-reader").await.unwrap().unwrap();
    assert!(purged.personalization_opt_out);
    assert!(purged.topics.is_empty());
    assert!(purged.feature_vector.is_empty());
    assert!(store.list_for_user("react-reader").await.unwrap().is_empty());
    assert!(cache.get_raw(&key).await.unwrap().is_none());
}

#[tokio::test]
async fn test_opt_out_during_run_is_preserved() {
    let store = seeded_store().await;
    let mut flaky = FlakyStore::new(store.clone());
    flaky.opt_out_after_read = Some("react-reader".to_string());
    let etl = orchestrator(Repositories::from_store(Arc::new(flaky)));

    let summary = etl
        .run(EtlOptions {
            refresh_affinities: true,
            ..Default::default()
        })
        .await
        .unwrap();

    assert_eq!(summary.errors, 0);
    assert_eq!(summary.profiles, 1, "only rust-reader is rebuilt");

    let profile = store.get_profile("react-reader").await.unwrap().unwrap();
    assert!(profile.personalization_opt_out);
    assert!(profile.topics.is_empty());
    assert!(profile.feature_vector.is_empty());
    assert!(store.list_for_user("react-reader").await.unwrap().is_empty());
    assert!(!store.list_for_user("rust-reader").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_content_pass_refreshes_published_vectors() {
    let store = seeded_store().await;
    add_readers(&store, 4).await;
    let etl = orchestrator(Repositories::from_store(store.clone()));

    let summary = etl.run(EtlOptions::default()).await.unwrap();
    assert_eq!(summary.content_vectors, 6);

    let hooks = store.get_vector("react-hooks").await.unwrap().unwrap();
    assert!((hooks.engagement_score - 1.0).abs() < 1e-6);
    assert!(hooks.freshness_score > 0.0 && hooks.freshness_score < 1.0);
    assert!(hooks.refreshed_at.is_some());
    assert!(!hooks.highlights.is_empty());
    assert!(hooks.highlights.len() <= 3);

    let sourdough = store.get_vector("sourdough").await.unwrap().unwrap();
    assert_eq!(sourdough.engagement_score, 0.0);

    let draft = store.get_vector("draft").await.unwrap().unwrap();
    assert!(draft.refreshed_at.is_none());

    // Fresh vectors are skipped on the next run
    let again = etl.run(EtlOptions::default()).await.unwrap();
    assert_eq!(again.content_vectors, 0);
}

#[tokio::test]
async fn test_clusters_are_rebuilt() {
    let store = seeded_store().await;
    let etl = orchestrator(Repositories::from_store(store.clone()));

    let summary = etl.run(EtlOptions::default()).await.unwrap();
    let clusters = store.list_clusters().await.unwrap();

    assert!(summary.clusters >= 1);
    assert_eq!(summary.clusters as usize, clusters.len());
    let members: usize = clusters.iter().map(|c| c.members.len()).sum();
    assert_eq!(members, 7);

    let skipped = etl
        .run(EtlOptions {
            refresh_clusters: false,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(skipped.clusters, 0);
    assert_eq!(store.list_clusters().await.unwrap(), clusters);
}

#[tokio::test]
async fn test_unreadable_content_aborts_run() {
    let store = seeded_store().await;
    let mut flaky = FlakyStore::new(store.clone());
    flaky.fail_content = true;
    let etl = orchestrator(Repositories::from_store(Arc::new(flaky)));

    let err = etl.run(EtlOptions::default()).await.unwrap_err();

    assert!(matches!(err, AppError::Unavailable(_)));
    assert!(store.audit_entries().await.is_empty());
}

#[tokio::test]
async fn test_empty_store_completes() {
    let etl = orchestrator(Repositories::from_store(Arc::new(MemoryStore::new())));

    let summary = etl.run(EtlOptions::default()).await.unwrap();

    assert_eq!(summary.profiles, 0);
    assert_eq!(summary.content_vectors, 0);
    assert_eq!(summary.clusters, 0);
    assert_eq!(summary.errors, 0);
}
