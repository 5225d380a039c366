//! Collaborative-filtering recommender (C5, spec §4.5).

use std::sync::Arc;

use crate::error::{AppError, Result};
use crate::models::{ScoredVehicle, UserId};
use crate::registry::ModelRegistry;

pub struct CollabRecommender {
    registry: Arc<ModelRegistry>,
}

impl CollabRecommender {
    pub fn new(registry: Arc<ModelRegistry>) -> Self {
        Self { registry }
    }

    /// Dense vehicle-score vector from `V . U[user_row]`, min-max normalized
    /// to [0, 1], sorted descending, truncated to `n`.
    pub async fn collaborative(&self, user_id: UserId, n: usize) -> Result<Vec<ScoredVehicle>> {
        let model = self.registry.require_collaborative().await?;

        let row_idx = *model
            .user_index
            .get(&user_id)
            .ok_or_else(|| AppError::NotFound(format!("user {user_id}")))?;
        let user_vec = model
            .user_features
            .get(row_idx)
            .ok_or_else(|| AppError::NotFound(format!("user {user_id}")))?;

        let mut scores: Vec<(i64, f64)> = model
            .vehicle_ids
            .iter()
            .enumerate()
            .map(|(col_idx, &vehicle_id)| {
                let vehicle_vec = &model.vehicle_features[col_idx];
                let dot: f64 = user_vec.iter().zip(vehicle_vec.iter()).map(|(a, b)| a * b).sum();
                (vehicle_id, dot)
            })
            .collect();

        normalize_min_max(&mut scores);

        scores.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal).then(a.0.cmp(&b.0)));
        scores.truncate(n);

        Ok(scores
            .into_iter()
            .map(|(vehicle_id, score)| ScoredVehicle { vehicle_id, score })
            .collect())
    }
}

/// `(s - min) / (max - min)`, dividing by `1.0` instead when the vector is
/// flat (spec §4.5).
fn normalize_min_max(scores: &mut [(i64, f64)]) {
    if scores.is_empty() {
        return;
    }
    let max = scores.iter().map(|(_, s)| *s).fold(f64::NEG_INFINITY, f64::max);
    let min = scores.iter().map(|(_, s)| *s).fold(f64::INFINITY, f64::min);
    let range = max - min;
    let divisor = if range > 0.0 { range } else { 1.0 };
    for (_, s) in scores.iter_mut() {
        *s = (*s - min) / divisor;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_into_zero_one_range() {
        let mut scores = vec![(1, 4.0), (2, 1.0), (3, 2.5)];
        normalize_min_max(&mut scores);
        assert!((scores[0].1 - 1.0).abs() < 1e-9);
        assert!((scores[1].1 - 0.0).abs() < 1e-9);
        assert!(scores[2].1 > 0.0 && scores[2].1 < 1.0);
    }

    #[test]
    fn flat_vector_normalizes_to_zero() {
        let mut scores = vec![(1, 3.0), (2, 3.0)];
        normalize_min_max(&mut scores);
        assert_eq!(scores[0].1, 0.0);
        assert_eq!(scores[1].1, 0.0);
    }
}
