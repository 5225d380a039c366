//! Shared application state handed to every handler (spec §6).

use std::sync::Arc;

use sqlx::PgPool;

use crate::assistant::{AssistantOrchestrator, FeedbackService, PopularQueryService};
use crate::recommend::orchestrator::RecommendationOrchestrator;
use crate::registry::ModelRegistry;
use crate::stores::UserStore;

#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub recommendations: Arc<RecommendationOrchestrator>,
    pub assistant: Arc<AssistantOrchestrator>,
    pub popular_queries: Arc<PopularQueryService>,
    pub feedback: Arc<FeedbackService>,
    pub models: Arc<ModelRegistry>,
    pub users: Arc<UserStore>,
}
