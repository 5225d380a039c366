use std::sync::Arc;
use std::time::Duration;

use recommendation_engine::assistant::feedback::FeedbackService;
use recommendation_engine::assistant::popular_queries::PopularQueryService;
use recommendation_engine::assistant::sql_executor::{SafeSqlExecutor, UserScope};
use recommendation_engine::config::LlmConfig;
use recommendation_engine::llm::LlmClient;
use recommendation_engine::models::Vote;
use recommendation_engine::registry::ModelRegistry;

fn test_llm_config() -> LlmConfig {
    LlmConfig {
        enabled: true,
        api_key: "test-key".to_string(),
        model: "gpt-4o-mini".to_string(),
        max_tokens: 200,
        timeout_secs: 5,
        temperature: 0.0,
    }
}

/// Polls a registry accessor until its background load completes or the
/// timeout elapses -- the registry's load is fire-and-forget (spec §4.2),
/// so tests that need the artifact loaded must poll rather than await once.
async fn wait_for<T, F, Fut>(mut probe: F) -> T
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Option<T>>,
{
    for _ in 0..50 {
        if let Some(value) = probe().await {
            return value;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("artifact did not become ready in time");
}

/// Scenario S1 (spec §8): a warm `vehicle_similarity` map for vehicle 10
/// yields the top-2 neighbors in descending score order.
#[tokio::test]
async fn similar_vehicle_scores_respect_warm_cache_ordering() {
    let registry = Arc::new(ModelRegistry::new("trained_models"));
    let _ = wait_for(|| {
        let registry = registry.clone();
        async move { registry.vehicle_similarity().await }
    })
    .await;

    let scored = registry
        .require_vehicle_similarity()
        .await
        .expect("vehicle_similarity should be loaded by now");

    let list = scored.get(10).expect("vehicle 10 has neighbors");
    let top2: Vec<_> = list.iter().take(2).copied().collect();
    assert_eq!(top2.len(), 2);
    assert_eq!(top2[0].vehicle_id, 22);
    assert_eq!(top2[1].vehicle_id, 7);
    assert!((top2[0].score - 0.91).abs() < 1e-9);
    assert!((top2[1].score - 0.88).abs() < 1e-9);
}

/// Scenario S6 (spec §8): repeated submission toggles the vote back to
/// NOT_VOTED; switching to a different vote replaces it outright.
#[tokio::test]
async fn feedback_toggle_matches_scenario_s6() {
    let service = FeedbackService::new();
    service.register_message("100").await;

    assert_eq!(service.submit("100", Vote::Upvoted).await.unwrap(), Vote::Upvoted);
    assert_eq!(service.submit("100", Vote::Upvoted).await.unwrap(), Vote::NotVoted);
    assert_eq!(service.submit("100", Vote::Downvoted).await.unwrap(), Vote::Downvoted);
}

/// Scenario S3 (spec §8): an LLM-generated query with an embedded
/// semicolon is rejected before ever reaching the database.
#[tokio::test]
async fn safe_sql_executor_rejects_embedded_semicolon_without_touching_db() {
    let db = sqlx::postgres::PgPoolOptions::new()
        .connect_lazy("postgres://localhost/unused")
        .expect("lazy pool construction never touches the network");
    let executor = SafeSqlExecutor::new(db);
    let scope = UserScope { id: 7, name: "Jane Doe".to_string(), email: "jane@example.com".to_string() };

    let result = executor
        .run("SELECT * FROM Vehicles; DROP TABLE Users", &scope)
        .await;
    assert!(result.is_err());
}

/// Scenario S5 (spec §8): two near-duplicate questions merge into a single
/// popular-query row once their embeddings clear the similarity threshold.
#[tokio::test]
async fn popular_query_merges_near_duplicate_questions() {
    let server = wiremock::MockServer::start().await;

    // Both calls return the same embedding vector, so cosine similarity is
    // 1.0 and comfortably above the 0.68 merge threshold.
    wiremock::Mock::given(wiremock::matchers::method("POST"))
        .and(wiremock::matchers::path("/embeddings"))
        .respond_with(wiremock::ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "data": [{ "embedding": [0.1, 0.2, 0.3] }]
        })))
        .mount(&server)
        .await;

    let llm = Arc::new(LlmClient::with_endpoint(
        test_llm_config(),
        format!("{}/chat/completions", server.uri()),
    ));
    let service = PopularQueryService::new(llm);

    service.save("Which SUVs are under 30k?").await;
    service.save("Which SUVs under 30K").await;

    let top = service.top(10).await;
    assert_eq!(top.len(), 1);
    assert_eq!(top[0].count, 2);
}
