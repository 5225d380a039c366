use actix_web::{web, HttpResponse};

use crate::state::AppState;

/// `GET /health` (spec §6): unauthenticated liveness/readiness probe.
pub async fn health(state: web::Data<AppState>) -> HttpResponse {
    let db_ok = sqlx::query("SELECT 1").fetch_one(&state.db).await.is_ok();
    let loaded = state.models.loaded_summary().await;
    let ml_models_loaded = loaded.values().all(|ready| *ready);
    let orchestrator_ready = db_ok;

    HttpResponse::Ok().json(serde_json::json!({
        "db": db_ok,
        "ml_models_loaded": ml_models_loaded,
        "models": loaded,
        "orchestrator_ready": orchestrator_ready,
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
