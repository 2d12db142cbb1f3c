

use std::collections::HashSet;

use crate::utils::word_tokens;

/// Plain cosine in [-1, 1]; 0 for empty, mismatched or zero vectors.
pub fn raw_cosine(vec1: &[f32], vec2: &[f32]) -> f64 {
    if vec1.len() != vec2.len() || vec1.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = vec1.iter().zip(vec2.iter()).map(|(a, b)| a * b).sum();
    let mag1: f32 = vec1.iter().map(|a| a * a).sum::<f32>().sqrt();
    let mag2: f32 = vec2.iter().map(|b| b * b).sum::<f32>().sqrt();

    if mag1 == 0.0 || mag2 == 0.0 {
        return 0.0;
    }

    f64::from(dot_product / (mag1 * mag2))
}

/// Cosine mapped into [0, 1].
pub fn cosine_similarity(vec1: &[f32], vec2: &[f32]) -> f64 {
    if vec1.len() != vec2.len() || vec1.is_empty() {
        return 0.0;
    }
    ((raw_cosine(vec1, vec2) + 1.0) / 2.0).clamp(0.0, 1.0)
}


pub fn word_jaccard(a: &str, b: &str) -> f64 {
    let wa: HashSet<String> = word_tokens(a).into_iter().collect();
    let wb: HashSet<String> = word_tokens(b).into_iter().collect();
    if wa.is_empty() || wb.is_empty() {
        return 0.0;
    }
    let inter = wa.intersection(&wb).count() as f64;
    let union = wa.union(&wb).count() as f64;
    inter / union
}

/// Divides by the maximum; all-zero input stays zero.
pub fn normalize_by_max(values: &[f64]) -> Vec<f64> {
    let max = values.iter().copied().fold(0.0_f64, f64::max);
    if max <= 0.0 {
        return vec![0.0; values.len()];
    }
    values.iter().map(|v| (v / max).clamp(0.0, 1.0)).collect()
}
