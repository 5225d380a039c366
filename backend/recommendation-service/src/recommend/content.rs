//! Content-based similarity recommender (C4, spec §4.4).

use std::sync::Arc;

use crate::cache::CacheFacade;
use crate::error::{AppError, Result};
use crate::models::{RecommendationEntry, ScoredVehicle, SimilarityKind, VehicleId};
use crate::registry::ModelRegistry;
use crate::stores::VehicleStore;

pub struct ContentRecommender {
    registry: Arc<ModelRegistry>,
    vehicles: Arc<VehicleStore>,
    cache: CacheFacade,
}

impl ContentRecommender {
    pub fn new(registry: Arc<ModelRegistry>, vehicles: Arc<VehicleStore>, cache: CacheFacade) -> Self {
        Self {
            registry,
            vehicles,
            cache,
        }
    }

    /// Top-`n` similar vehicles, enriched with catalog features. Missing
    /// vehicle ids in the similarity list are skipped silently (spec §4.4).
    pub async fn similar(&self, vehicle_id: VehicleId, n: usize) -> Result<Vec<RecommendationEntry>> {
        if let Some(cached) = self
            .cache
            .get_cached_similar::<Vec<RecommendationEntry>>(vehicle_id, n)
            .await
        {
            return Ok(cached);
        }

        let scored = self.similar_scores(vehicle_id, n, SimilarityKind::Vehicle).await?;

        let mut entries = Vec::with_capacity(scored.len());
        for sv in scored {
            if let Ok(vehicle) = self.vehicles.get(sv.vehicle_id).await {
                entries.push(RecommendationEntry {
                    vehicle_id: sv.vehicle_id,
                    score: sv.score,
                    features: vehicle.enriched_features(),
                });
            }
            // Missing-vehicle ids are skipped silently, per spec.
        }

        self.cache.set_cached_similar(vehicle_id, n, &entries).await;
        Ok(entries)
    }

    /// Raw (id, score) pairs without enrichment, used by the hybrid path
    /// against the `user_similarity` map (spec §4.4).
    pub async fn similar_scores(
        &self,
        vehicle_id: VehicleId,
        n: usize,
        kind: SimilarityKind,
    ) -> Result<Vec<ScoredVehicle>> {
        let map = match kind {
            SimilarityKind::Vehicle => self.registry.require_vehicle_similarity().await?,
            SimilarityKind::User => self.registry.require_user_similarity().await?,
        };

        let list = map
            .get(vehicle_id)
            .ok_or_else(|| AppError::NotFound(format!("vehicle {vehicle_id}")))?;

        Ok(list.iter().take(n).copied().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SimilarityMap;
    use std::collections::HashMap;

    #[test]
    fn similarity_list_is_truncated_and_ordered() {
        let mut inner = HashMap::new();
        inner.insert(
            10,
            vec![
                ScoredVehicle { vehicle_id: 22, score: 0.91 },
                ScoredVehicle { vehicle_id: 7, score: 0.88 },
                ScoredVehicle { vehicle_id: 3, score: 0.70 },
            ],
        );
        let map = SimilarityMap(inner);
        let list = map.get(10).unwrap();
        let top2: Vec<_> = list.iter().take(2).copied().collect();
        assert_eq!(top2.len(), 2);
        assert_eq!(top2[0].vehicle_id, 22);
        assert_eq!(top2[1].vehicle_id, 7);
        assert!(top2[0].score >= top2[1].score);
    }
}
