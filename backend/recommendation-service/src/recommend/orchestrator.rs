//! Entry point for recommendation requests (C7, spec §4.7): validates the
//! user, dispatches to a strategy, and memoizes the per-user result.

use std::sync::Arc;

use crate::cache::CacheFacade;
use crate::error::{AppError, Result};
use crate::models::{RecommendationEntry, RecommendationResult, RecommendationStrategy, VehicleId};
use crate::recommend::collab::CollabRecommender;
use crate::recommend::content::ContentRecommender;
use crate::recommend::hybrid::HybridRecommender;
use crate::stores::{UserStore, VehicleStore};

pub struct RecommendationOrchestrator {
    content: Arc<ContentRecommender>,
    #[allow(dead_code)]
    collab: Arc<CollabRecommender>,
    hybrid: Arc<HybridRecommender>,
    users: Arc<UserStore>,
    vehicles: Arc<VehicleStore>,
    cache: CacheFacade,
}

impl RecommendationOrchestrator {
    pub fn new(
        content: Arc<ContentRecommender>,
        collab: Arc<CollabRecommender>,
        hybrid: Arc<HybridRecommender>,
        users: Arc<UserStore>,
        vehicles: Arc<VehicleStore>,
        cache: CacheFacade,
    ) -> Self {
        Self { content, collab, hybrid, users, vehicles, cache }
    }

    pub async fn recommend(
        &self,
        user_id: i64,
        n: usize,
        strategy: RecommendationStrategy,
    ) -> Result<RecommendationResult> {
        if !self.users.user_exists(user_id).await? {
            return Err(AppError::NotFound(format!("user {user_id}")));
        }

        let strategy_key = strategy_key(strategy);
        if let Some(cached) = self.cache.get_cached_recommendations(user_id, n, strategy_key).await {
            return Ok(cached);
        }

        let items: Vec<RecommendationEntry> = match strategy {
            RecommendationStrategy::Content => self.hybrid.content_only(user_id, n).await?,
            RecommendationStrategy::Collaborative => self.hybrid.collaborative_only(user_id, n).await?,
            RecommendationStrategy::Hybrid => self.hybrid.recommend(user_id, n).await?,
        };

        let result = RecommendationResult { items, strategy };
        self.cache
            .set_cached_recommendations(user_id, n, strategy_key, &result)
            .await;
        Ok(result)
    }

    pub async fn similar(&self, vehicle_id: VehicleId, n: usize) -> Result<Vec<RecommendationEntry>> {
        if !self.vehicles.exists(vehicle_id).await {
            return Err(AppError::NotFound(format!("vehicle {vehicle_id}")));
        }
        self.content.similar(vehicle_id, n).await
    }
}

fn strategy_key(strategy: RecommendationStrategy) -> &'static str {
    match strategy {
        RecommendationStrategy::Content => "content",
        RecommendationStrategy::Collaborative => "collaborative",
        RecommendationStrategy::Hybrid => "hybrid",
    }
}
