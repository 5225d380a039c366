use actix_web::{web, HttpResponse};
use serde::Deserialize;

use crate::auth::AuthContext;
use crate::error::{AppError, Result};
use crate::models::RecommendationStrategy;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct RecommendationQuery {
    #[serde(default = "default_top_n")]
    top_n: usize,
    #[serde(default)]
    strategy: Option<String>,
}

fn default_top_n() -> usize {
    10
}

fn parse_strategy(raw: Option<&str>) -> RecommendationStrategy {
    match raw.map(str::to_lowercase).as_deref() {
        Some("content") => RecommendationStrategy::Content,
        Some("collaborative") => RecommendationStrategy::Collaborative,
        _ => RecommendationStrategy::Hybrid,
    }
}

/// `GET /api/recommendations/user/{user_id}` (spec §6): owner-or-admin
/// check, then dispatches to the requested strategy.
pub async fn get_user_recommendations(
    state: web::Data<AppState>,
    auth: AuthContext,
    path: web::Path<i64>,
    query: web::Query<RecommendationQuery>,
) -> Result<HttpResponse> {
    let user_id = path.into_inner();

    if user_id != auth.user_id && !auth.is_admin {
        return Err(AppError::Forbidden(format!(
            "user {} may not view recommendations for user {user_id}",
            auth.user_id
        )));
    }

    let strategy = parse_strategy(query.strategy.as_deref());
    let result = state
        .recommendations
        .recommend(user_id, query.top_n, strategy)
        .await?;

    Ok(HttpResponse::Ok().json(result))
}

/// `GET /api/recommendations/similar/{vehicle_id}` (spec §6): no ownership
/// check, vehicle catalog data is not user-scoped.
pub async fn get_similar_vehicles(
    state: web::Data<AppState>,
    _auth: AuthContext,
    path: web::Path<i64>,
    query: web::Query<RecommendationQuery>,
) -> Result<HttpResponse> {
    let vehicle_id = path.into_inner();
    let items = state.recommendations.similar(vehicle_id, query.top_n).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "items": items })))
}
