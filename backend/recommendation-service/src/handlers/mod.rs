//! HTTP surface (spec §6): thin handlers over the orchestrators, returning
//! the spec's JSON response shapes and status-code mapping.

pub mod ai;
pub mod health;
pub mod recommendations;

use actix_web::web;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/recommendations")
            .route("/user/{user_id}", web::get().to(recommendations::get_user_recommendations))
            .route("/similar/{vehicle_id}", web::get().to(recommendations::get_similar_vehicles)),
    )
    .service(
        web::scope("/api/ai")
            .route("/query", web::post().to(ai::query))
            .route("/context/{user_id}", web::get().to(ai::context))
            .route("/feedback", web::post().to(ai::feedback))
            .route("/popular-queries", web::get().to(ai::popular_queries)),
    )
    .route("/health", web::get().to(health::health));
}
