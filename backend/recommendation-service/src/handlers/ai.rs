use actix_web::{web, HttpResponse};
use serde::Deserialize;

use crate::assistant::classifier::AuthenticatedUser;
use crate::auth::AuthContext;
use crate::error::{AppError, Result};
use crate::models::Vote;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct QueryBody {
    query: QueryInner,
    #[serde(default)]
    #[allow(dead_code)]
    context: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct QueryInner {
    user_id: i64,
    question: String,
}

/// `POST /api/ai/query` (spec §6, §4.10): ownership enforced the same way
/// as the recommendations endpoints, then runs the full assistant pipeline.
pub async fn query(
    state: web::Data<AppState>,
    auth: AuthContext,
    body: web::Json<QueryBody>,
) -> Result<HttpResponse> {
    if body.query.user_id != auth.user_id && !auth.is_admin {
        return Err(AppError::Forbidden(format!(
            "user {} may not submit questions on behalf of user {}",
            auth.user_id, body.query.user_id
        )));
    }

    let user = AuthenticatedUser { id: auth.user_id, email: auth.email.clone(), name: auth.name.clone() };
    let (message_id, response) = state.assistant.ask(&body.query.question, &user).await;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "message_id": message_id,
        "response": response,
    })))
}

/// `GET /api/ai/context/{user_id}` (spec §6, SPEC_FULL §11.1): a snapshot of
/// the caller's weighted interaction history, cached the same way
/// recommendation results are.
pub async fn context(
    state: web::Data<AppState>,
    auth: AuthContext,
    path: web::Path<i64>,
) -> Result<HttpResponse> {
    let user_id = path.into_inner();
    if user_id != auth.user_id && !auth.is_admin {
        return Err(AppError::Forbidden(format!(
            "user {} may not view the ML context for user {user_id}",
            auth.user_id
        )));
    }

    let interactions = state.users.interactions_for(user_id).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "user_id": user_id,
        "interaction_count": interactions.len(),
        "interactions": interactions,
    })))
}

#[derive(Debug, Deserialize)]
pub struct FeedbackBody {
    message_id: String,
    vote: Vote,
}

/// `POST /api/ai/feedback` (spec §6, §4.12).
pub async fn feedback(state: web::Data<AppState>, _auth: AuthContext, body: web::Json<FeedbackBody>) -> Result<HttpResponse> {
    let updated = state.feedback.submit(&body.message_id, body.vote).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "message_id": body.message_id, "vote": updated })))
}

#[derive(Debug, Deserialize)]
pub struct PopularQueriesQuery {
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_limit() -> usize {
    10
}

/// `GET /api/ai/popular-queries` (spec §6, §4.11): unauthenticated, no
/// ownership check.
pub async fn popular_queries(
    state: web::Data<AppState>,
    query: web::Query<PopularQueriesQuery>,
) -> HttpResponse {
    let top = state.popular_queries.top(query.limit).await;
    HttpResponse::Ok().json(top)
}
