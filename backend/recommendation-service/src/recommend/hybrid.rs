//! Hybrid content + collaborative recommender with cold-start routing (C6,
//! spec §4.6).

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{AppError, Result};
use crate::models::{RecommendationEntry, SimilarityKind, UserId, VehicleId};
use crate::recommend::collab::CollabRecommender;
use crate::recommend::content::ContentRecommender;
use crate::stores::{UserStore, VehicleStore};

/// Cold-start weight policy keyed by the user's interaction count (spec
/// §4.6 table).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HybridWeights {
    pub content: f64,
    pub collaborative: f64,
}

impl HybridWeights {
    pub fn for_interaction_count(k: usize) -> Result<Self> {
        match k {
            0 => Err(AppError::InsufficientData(
                "no interactions recorded for user".to_string(),
            )),
            1..=3 => Ok(HybridWeights { content: 0.9, collaborative: 0.1 }),
            4..=10 => Ok(HybridWeights { content: 0.7, collaborative: 0.3 }),
            _ => Ok(HybridWeights { content: 0.5, collaborative: 0.5 }),
        }
    }
}

pub struct HybridRecommender {
    content: Arc<ContentRecommender>,
    collab: Arc<CollabRecommender>,
    users: Arc<UserStore>,
    vehicles: Arc<VehicleStore>,
}

impl HybridRecommender {
    pub fn new(
        content: Arc<ContentRecommender>,
        collab: Arc<CollabRecommender>,
        users: Arc<UserStore>,
        vehicles: Arc<VehicleStore>,
    ) -> Self {
        Self { content, collab, users, vehicles }
    }

    pub async fn recommend(&self, user_id: UserId, n: usize) -> Result<Vec<RecommendationEntry>> {
        let interactions = self.users.interactions_for(user_id).await?;
        let weights = HybridWeights::for_interaction_count(interactions.len())?;

        let fetch_n = n.saturating_mul(3).max(1);

        // Step 1: ensure both models are loaded and the collaborative
        // scores are fetched concurrently with the content accumulation
        // below (spec §4.6 step 1-2; independent I/O joined per spec §5).
        let collab_future = self.collab.collaborative(user_id, fetch_n);
        let content_future = self.accumulate_content_scores(&interactions, fetch_n);

        let (collab_scores, content_scores) = tokio::join!(collab_future, content_future);
        // A failed collaborative fetch (model not loaded yet) degrades to
        // content-only scoring rather than failing the whole request.
        let collab_scores: HashMap<VehicleId, f64> = collab_scores
            .map(|v| v.into_iter().map(|sv| (sv.vehicle_id, sv.score)).collect())
            .unwrap_or_default();

        let mut combined: HashMap<VehicleId, f64> = HashMap::new();
        for (id, score) in &content_scores {
            *combined.entry(*id).or_insert(0.0) += weights.content * score;
        }
        for (id, score) in &collab_scores {
            *combined.entry(*id).or_insert(0.0) += weights.collaborative * score;
        }

        self.rank_and_enrich(combined, n).await
    }

    /// Content-only strategy: same neighbor accumulation the hybrid path
    /// uses, without blending in collaborative scores.
    pub async fn content_only(&self, user_id: UserId, n: usize) -> Result<Vec<RecommendationEntry>> {
        let interactions = self.users.interactions_for(user_id).await?;
        if interactions.is_empty() {
            return Err(AppError::InsufficientData(
                "no interactions recorded for user".to_string(),
            ));
        }
        let fetch_n = n.saturating_mul(3).max(1);
        let scores = self.accumulate_content_scores(&interactions, fetch_n).await;
        self.rank_and_enrich(scores, n).await
    }

    /// Collaborative-only strategy: raw model output, enriched and capped.
    pub async fn collaborative_only(&self, user_id: UserId, n: usize) -> Result<Vec<RecommendationEntry>> {
        let fetch_n = n.saturating_mul(3).max(1);
        let scores: HashMap<VehicleId, f64> = self
            .collab
            .collaborative(user_id, fetch_n)
            .await?
            .into_iter()
            .map(|sv| (sv.vehicle_id, sv.score))
            .collect();
        self.rank_and_enrich(scores, n).await
    }

    async fn accumulate_content_scores(
        &self,
        interactions: &HashMap<VehicleId, f64>,
        fetch_n: usize,
    ) -> HashMap<VehicleId, f64> {
        let mut content_scores: HashMap<VehicleId, f64> = HashMap::new();
        for (vehicle_id, weight) in interactions {
            if let Ok(neighbors) = self
                .content
                .similar_scores(*vehicle_id, fetch_n, SimilarityKind::User)
                .await
            {
                for sv in neighbors {
                    *content_scores.entry(sv.vehicle_id).or_insert(0.0) += weight * sv.score;
                }
            }
        }
        normalize_by_max(&mut content_scores);
        content_scores
    }

    /// Sort descending (ties by id ascending, spec §4.6), take top `n`,
    /// enrich via `VehicleStore`, drop ids whose row is missing.
    async fn rank_and_enrich(
        &self,
        combined: HashMap<VehicleId, f64>,
        n: usize,
    ) -> Result<Vec<RecommendationEntry>> {
        let mut ranked: Vec<(VehicleId, f64)> = combined.into_iter().collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal).then(a.0.cmp(&b.0)));

        let mut entries = Vec::with_capacity(n);
        for (vehicle_id, score) in ranked {
            if entries.len() >= n {
                break;
            }
            if let Ok(vehicle) = self.vehicles.get(vehicle_id).await {
                entries.push(RecommendationEntry {
                    vehicle_id,
                    score,
                    features: vehicle.enriched_features(),
                });
            }
        }

        Ok(entries)
    }
}

/// Normalize a score map by its own maximum so both dictionaries live in
/// [0, 1] before combination (spec §4.6 step 4).
fn normalize_by_max(scores: &mut HashMap<VehicleId, f64>) {
    let max = scores.values().copied().fold(f64::MIN, f64::max);
    if max > 0.0 {
        for v in scores.values_mut() {
            *v /= max;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cold_start_weight_table() {
        assert!(HybridWeights::for_interaction_count(0).is_err());
        assert_eq!(
            HybridWeights::for_interaction_count(2).unwrap(),
            HybridWeights { content: 0.9, collaborative: 0.1 }
        );
        assert_eq!(
            HybridWeights::for_interaction_count(7).unwrap(),
            HybridWeights { content: 0.7, collaborative: 0.3 }
        );
        assert_eq!(
            HybridWeights::for_interaction_count(25).unwrap(),
            HybridWeights { content: 0.5, collaborative: 0.5 }
        );
    }

    #[test]
    fn normalize_by_max_scales_into_unit_range() {
        let mut scores: HashMap<VehicleId, f64> = HashMap::new();
        scores.insert(1, 4.0);
        scores.insert(2, 2.0);
        normalize_by_max(&mut scores);
        assert_eq!(scores[&1], 1.0);
        assert_eq!(scores[&2], 0.5);
    }
}
