use std::sync::Arc;

use actix_web::{web, App, HttpServer};
use redis_utils::RedisPool;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use recommendation_engine::assistant::{AssistantOrchestrator, FeedbackService, PopularQueryService, QueryClassifier, SafeSqlExecutor};
use recommendation_engine::cache::CacheFacade;
use recommendation_engine::config::Config;
use recommendation_engine::handlers;
use recommendation_engine::llm::LlmClient;
use recommendation_engine::recommend::{CollabRecommender, ContentRecommender, HybridRecommender, RecommendationOrchestrator};
use recommendation_engine::registry::ModelRegistry;
use recommendation_engine::state::AppState;
use recommendation_engine::stores::{UserStore, VehicleStore};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().expect("failed to load configuration");
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting recommendation-engine");

    let db_pool = sqlx::postgres::PgPoolOptions::new()
        .min_connections(config.database.pool_min)
        .max_connections(config.database.pool_max)
        .connect(&config.database.url)
        .await
        .expect("failed to create database pool");

    let redis_pool = RedisPool::connect(&config.redis.url(), None)
        .await
        .expect("failed to connect to redis");
    let cache = CacheFacade::new(redis_pool.manager());

    let models = Arc::new(ModelRegistry::new(config.models.model_path.clone()));
    let users = Arc::new(UserStore::new(db_pool.clone()));
    let vehicles = Arc::new(
        VehicleStore::new(db_pool.clone(), cache.clone(), "data/car-features.json").await,
    );

    let content = Arc::new(ContentRecommender::new(models.clone(), vehicles.clone(), cache.clone()));
    let collab = Arc::new(CollabRecommender::new(models.clone()));
    let hybrid = Arc::new(HybridRecommender::new(content.clone(), collab.clone(), users.clone(), vehicles.clone()));
    let recommendations = Arc::new(RecommendationOrchestrator::new(
        content.clone(),
        collab.clone(),
        hybrid.clone(),
        users.clone(),
        vehicles.clone(),
        cache.clone(),
    ));

    let llm = Arc::new(LlmClient::new(config.llm.clone()));
    let classifier = Arc::new(QueryClassifier::new(llm.clone(), cache.clone()));
    let sql_executor = Arc::new(SafeSqlExecutor::new(db_pool.clone()));
    let popular_queries = Arc::new(PopularQueryService::new(llm.clone()));
    let feedback = Arc::new(FeedbackService::new());
    let assistant = Arc::new(AssistantOrchestrator::new(
        classifier.clone(),
        llm.clone(),
        sql_executor.clone(),
        popular_queries.clone(),
        feedback.clone(),
    ));

    let state = AppState {
        db: db_pool.clone(),
        recommendations,
        assistant,
        popular_queries,
        feedback,
        models,
        users,
    };

    let jwt_config = config.jwt.clone();
    let bind_host = config.app.host.clone();
    let bind_port = config.app.port;

    tracing::info!(host = %bind_host, port = bind_port, "binding http server");

    HttpServer::new(move || {
        App::new()
            .wrap(actix_middleware::CorrelationIdMiddleware)
            .app_data(web::Data::new(state.clone()))
            .app_data(web::Data::new(jwt_config.clone()))
            .app_data(web::JsonConfig::default().limit(1_048_576))
            .configure(handlers::configure)
    })
    .bind((bind_host, bind_port))?
    .run()
    .await
}
