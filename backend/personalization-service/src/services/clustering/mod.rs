//! Topic clustering over content embeddings
//!
//! k-means with cosine assignment:
//! - k = round(sqrt(N)) bounded to [2, min(N, 8)]
//! - centroids seeded from k distinct random items
//! - at most 6 rounds, stopping once no centroid moves more than 0.01 (1 - cosine)
//!
//! CPU-bound; only called from the ETL pass on a blocking thread.

use crate::db::Repositories;
use crate::error::{AppError, Result};
use crate::models::{ClusterMember, ContentVectorSnapshot, TopicCluster};
use crate::services::profile_builder::TONE_PREFIX;
use crate::utils::{capitalize, cosine_similarity, is_finite_vector};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info, warn};

pub const MAX_CLUSTERS: usize = 8;
pub const MAX_ROUNDS: usize = 6;
pub const CONVERGENCE_THRESHOLD: f32 = 0.01;
pub const MAX_KEYWORDS: usize = 8;
pub const MIN_KEYWORD_LEN: usize = 4;
pub const DEFAULT_LABEL: &str = "Topic";

/// Similarities closer than this are ties, won by the lower centroid index
const ASSIGN_TOLERANCE: f32 = 1e-6;

const TAG_WEIGHT: f64 = 1.0;
const WORD_WEIGHT: f64 = 0.5;

/// Summary of one clustering run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusteringReport {
    pub clusters: usize,
    pub assignments: usize,
    /// Items skipped for a missing or malformed embedding
    pub skipped: usize,
}

#[derive(Debug, Clone, Default)]
pub struct ClusterOutcome {
    pub clusters: Vec<TopicCluster>,
    pub skipped: usize,
}

impl ClusterOutcome {
    pub fn report(&self) -> ClusteringReport {
        ClusteringReport {
            clusters: self.clusters.len(),
            assignments: self.clusters.iter().map(|c| c.members.len()).sum(),
            skipped: self.skipped,
        }
    }
}

/// Number of clusters for `n` items
pub fn cluster_count(n: usize) -> usize {
    if n == 0 {
        return 0;
    }
    let upper = n.min(MAX_CLUSTERS);
    ((n as f64).sqrt().round() as usize).max(2).min(upper)
}

pub struct TopicClusterer {
    rng: StdRng,
}

impl Default for TopicClusterer {
    fn default() -> Self {
        Self::new(StdRng::from_entropy())
    }
}

impl TopicClusterer {
    pub fn new(rng: StdRng) -> Self {
        Self { rng }
    }

    /// Deterministic initialization
    pub fn seeded(seed: u64) -> Self {
        Self::new(StdRng::seed_from_u64(seed))
    }

    pub fn cluster(&mut self, vectors: &[ContentVectorSnapshot]) -> Result<ClusterOutcome> {
        let mut items: Vec<&ContentVectorSnapshot> = Vec::with_capacity(vectors.len());
        let mut skipped = 0;

        for vector in vectors {
            if vector.embedding.is_empty() || !is_finite_vector(&vector.embedding) {
                let err = AppError::Validation(format!(
                    "post {} has a missing or non-finite embedding",
                    vector.post_id
                ));
                warn!(post_id = %vector.post_id, error = %err, "Skipping item in clustering");
                skipped += 1;
                continue;
            }
            items.push(vector);
        }

        if let Some(first) = items.first() {
            let dim = first.embedding.len();
            if let Some(bad) = items.iter().find(|v| v.embedding.len() != dim) {
                return Err(AppError::Configuration(format!(
                    "embedding dimensionality mismatch: expected {}, post {} has {}",
                    dim,
                    bad.post_id,
                    bad.embedding.len()
                )));
            }
        }

        let n = items.len();
        if n == 0 {
            return Ok(ClusterOutcome {
                clusters: Vec::new(),
                skipped,
            });
        }

        let k = cluster_count(n);
        let mut centroids: Vec<Vec<f32>> = rand::seq::index::sample(&mut self.rng, n, k)
            .into_iter()
            .map(|i| items[i].embedding.clone())
            .collect();

        for round in 0..MAX_ROUNDS {
            let assignment = assign(&items, &centroids);
            let updated = recompute_centroids(&items, &assignment, &centroids);

            let shift = centroids
                .iter()
                .zip(&updated)
                .map(|(old, new)| 1.0 - cosine_similarity(old, new))
                .fold(0.0f32, f32::max);

            centroids = updated;
            debug!(round, shift, "k-means round complete");

            if shift < CONVERGENCE_THRESHOLD {
                break;
            }
        }

        let assignment = assign(&items, &centroids);
        let mut groups: Vec<Vec<&ContentVectorSnapshot>> = vec![Vec::new(); centroids.len()];
        for (item, cluster) in items.iter().zip(&assignment) {
            groups[*cluster].push(item);
        }

        let mut populated: Vec<(Vec<f32>, Vec<&ContentVectorSnapshot>)> = centroids
            .into_iter()
            .zip(groups)
            .filter(|(_, members)| !members.is_empty())
            .collect();

        if populated.is_empty() {
            populated.push((items[0].embedding.clone(), vec![items[0]]));
        }

        let clusters: Vec<TopicCluster> = populated
            .into_iter()
            .enumerate()
            .map(|(idx, (centroid, members))| build_cluster(idx, centroid, &members))
            .collect();

        info!(
            items = n,
            k,
            clusters = clusters.len(),
            skipped,
            "Clustered content vectors"
        );

        Ok(ClusterOutcome { clusters, skipped })
    }
}

/// Index of the most similar centroid for every item
fn assign(items: &[&ContentVectorSnapshot], centroids: &[Vec<f32>]) -> Vec<usize> {
    items
        .iter()
        .map(|item| {
            let mut best = 0;
            let mut best_sim = f32::NEG_INFINITY;
            for (idx, centroid) in centroids.iter().enumerate() {
                let sim = cosine_similarity(&item.embedding, centroid);
                if sim > best_sim + ASSIGN_TOLERANCE {
                    best = idx;
                    best_sim = sim;
                }
            }
            best
        })
        .collect()
}

/// Mean of assigned vectors; a centroid with no members keeps its value
fn recompute_centroids(
    items: &[&ContentVectorSnapshot],
    assignment: &[usize],
    previous: &[Vec<f32>],
) -> Vec<Vec<f32>> {
    let dim = previous.first().map(Vec::len).unwrap_or(0);
    let mut sums = vec![vec![0.0f32; dim]; previous.len()];
    let mut counts = vec![0usize; previous.len()];

    for (item, cluster) in items.iter().zip(assignment) {
        counts[*cluster] += 1;
        for (sum, value) in sums[*cluster].iter_mut().zip(&item.embedding) {
            *sum += value;
        }
    }

    sums.into_iter()
        .zip(counts)
        .zip(previous)
        .map(|((sum, count), old)| {
            if count == 0 {
                old.clone()
            } else {
                sum.into_iter().map(|v| v / count as f32).collect()
            }
        })
        .collect()
}

fn build_cluster(
    idx: usize,
    centroid: Vec<f32>,
    members: &[&ContentVectorSnapshot],
) -> TopicCluster {
    let keywords = extract_keywords(members);
    let label = keywords
        .first()
        .map(|k| capitalize(k))
        .unwrap_or_else(|| DEFAULT_LABEL.to_string());

    let members = members
        .iter()
        .map(|m| ClusterMember {
            post_id: m.post_id.clone(),
            membership_score: cosine_similarity(&m.embedding, &centroid),
        })
        .collect();

    TopicCluster {
        id: format!("cluster-{}", idx),
        centroid,
        label,
        keywords,
        members,
    }
}

/// Top keywords by weight, ties broken alphabetically
fn extract_keywords(members: &[&ContentVectorSnapshot]) -> Vec<String> {
    let mut weights: HashMap<String, f64> = HashMap::new();

    for member in members {
        for tag in &member.tags {
            let tag = tag.trim().to_lowercase();
            if tag.is_empty() || tag.starts_with(TONE_PREFIX) {
                continue;
            }
            *weights.entry(tag).or_insert(0.0) += TAG_WEIGHT;
        }

        let text = [Some(member.title.as_str()), member.summary.as_deref()];
        for word in text
            .into_iter()
            .flatten()
            .flat_map(|t| t.split(|c: char| !c.is_alphanumeric()))
            .filter(|w| w.chars().count() >= MIN_KEYWORD_LEN)
        {
            *weights.entry(word.to_lowercase()).or_insert(0.0) += WORD_WEIGHT;
        }
    }

    let mut ranked: Vec<(String, f64)> = weights.into_iter().collect();
    ranked.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });

    ranked
        .into_iter()
        .take(MAX_KEYWORDS)
        .map(|(word, _)| word)
        .collect()
}

/// Recluster all content and replace stored clusters wholesale
pub async fn refresh_clusters(
    repos: &Repositories,
    mut clusterer: TopicClusterer,
) -> Result<ClusteringReport> {
    let vectors = repos.content.list_vectors().await?;

    let outcome = tokio::task::spawn_blocking(move || clusterer.cluster(&vectors)).await??;

    repos.clusters.replace_all(&outcome.clusters).await?;

    let report = outcome.report();
    info!(
        clusters = report.clusters,
        assignments = report.assignments,
        skipped = report.skipped,
        "Topic clusters refreshed"
    );
    Ok(report)
}
