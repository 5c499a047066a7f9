//! Integration Tests: Topic Clustering Refresh
//!
//! Coverage:
//! - Every valid vector lands in exactly one stored cluster
//! - Malformed embeddings are skipped, not fatal
//! - A fixed seed reproduces the same clusters
//! - Mixed dimensionality aborts without touching stored clusters

mod common;

use common::{corpus, vector};
use personalization_service::db::ClusterRepository;
use personalization_service::error::AppError;
use personalization_service::models::ContentVectorSnapshot;
use personalization_service::services::clustering::cluster_count;
use personalization_service::services::{refresh_clusters, TopicClusterer};
use personalization_service::{MemoryStore, Repositories};
use std::collections::HashSet;
use std::sync::Arc;

async fn store_with(vectors: Vec<ContentVectorSnapshot>) -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    for v in vectors {
        store.put_vector(v).await;
    }
    store
}

#[tokio::test]
async fn test_refresh_assigns_every_vector_once() {
    let store = store_with(corpus()).await;
    let repos = Repositories::from_store(store.clone());

    let report = refresh_clusters(&repos, TopicClusterer::seeded(11))
        .await
        .unwrap();

    assert_eq!(report.assignments, 7);
    assert_eq!(report.skipped, 0);
    assert!(report.clusters >= 1 && report.clusters <= cluster_count(7));

    let clusters = store.list_clusters().await.unwrap();
    assert_eq!(clusters.len(), report.clusters);

    let mut seen = HashSet::new();
    for cluster in &clusters {
        assert!(!cluster.label.is_empty());
        assert!(cluster.keywords.len() <= 8);
        assert_eq!(cluster.centroid.len(), 3);
        for member in &cluster.members {
            assert!(seen.insert(member.post_id.clone()), "{} assigned twice", member.post_id);
            assert!((-1.0 - 1e-6..=1.0 + 1e-6).contains(&member.membership_score));
        }
    }
    assert_eq!(seen.len(), 7);
}

#[tokio::test]
async fn test_malformed_embeddings_are_skipped() {
    let mut vectors = corpus();
    vectors.push(vector("empty", &["misc"], vec![], 1));
    vectors.push(vector("nan", &["misc"], vec![f32::NAN, 0.0, 1.0], 1));
    let store = store_with(vectors).await;

    let report = refresh_clusters(&Repositories::from_store(store), TopicClusterer::seeded(2))
        .await
        .unwrap();

    assert_eq!(report.skipped, 2);
    assert_eq!(report.assignments, 7);
}

#[tokio::test]
async fn test_same_seed_same_clusters() {
    let first_store = store_with(corpus()).await;
    let second_store = store_with(corpus()).await;

    refresh_clusters(&Repositories::from_store(first_store.clone()), TopicClusterer::seeded(5))
        .await
        .unwrap();
    refresh_clusters(&Repositories::from_store(second_store.clone()), TopicClusterer::seeded(5))
        .await
        .unwrap();

    assert_eq!(
        first_store.list_clusters().await.unwrap(),
        second_store.list_clusters().await.unwrap()
    );
}

#[tokio::test]
async fn test_dimension_mismatch_keeps_previous_clusters() {
    let store = store_with(corpus()).await;
    let repos = Repositories::from_store(store.clone());
    refresh_clusters(&repos, TopicClusterer::seeded(1)).await.unwrap();
    let before = store.list_clusters().await.unwrap();

    store
        .put_vector(vector("wide", &["rust"], vec![0.1, 0.2, 0.3, 0.4], 1))
        .await;
    let err = refresh_clusters(&repos, TopicClusterer::seeded(1))
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::Configuration(_)));
    assert_eq!(store.list_clusters().await.unwrap(), before);
}

#[tokio::test]
async fn test_empty_corpus_yields_no_clusters() {
    let empty = Repositories::from_store(Arc::new(MemoryStore::new()));
    let report = refresh_clusters(&empty, TopicClusterer::seeded(4)).await.unwrap();

    assert_eq!(report.clusters, 0);
    assert_eq!(report.assignments, 0);
}
