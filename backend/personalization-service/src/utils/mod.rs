// Vector and scoring helpers shared by clustering, profiling and ranking

/// Magnitudes below this are treated as zero vectors
pub const COSINE_EPSILON: f32 = 1e-9;

/// Cosine similarity in [-1, 1].
///
/// Returns 0.0 for empty inputs, mismatched lengths, or near-zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a < COSINE_EPSILON || norm_b < COSINE_EPSILON {
        return 0.0;
    }

    (dot / (norm_a * norm_b)).clamp(-1.0, 1.0)
}

/// Half-life decay: 1.0 at age 0, 0.5 at `half_life`, strictly decreasing.
///
/// Negative ages (clock skew) count as age 0.
pub fn half_life_decay(age: f64, half_life: f64) -> f64 {
    if half_life <= 0.0 {
        return 1.0;
    }
    0.5f64.powf(age.max(0.0) / half_life)
}

/// Normalize a score to [0, 1] range
pub fn normalize_score(score: f32, min: f32, max: f32) -> f32 {
    if max - min < f32::EPSILON {
        0.5
    } else {
        ((score - min) / (max - min)).clamp(0.0, 1.0)
    }
}

/// True when every component is finite
pub fn is_finite_vector(v: &[f32]) -> bool {
    v.iter().all(|x| x.is_finite())
}

/// Capitalize the first character
pub fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
