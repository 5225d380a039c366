//! Typed external key/value facade (C1): key schema, TTL policy, and the
//! "cache miss or deserialization error degrades to recomputation, never to
//! failure" contract from spec §4.1.

use redis::AsyncCommands;
use redis_utils::SharedConnectionManager;
use serde::{de::DeserializeOwned, Serialize};
use tracing::warn;

use crate::models::{RecommendationResult, VehicleId};

pub const DEFAULT_TTL_SECS: usize = 900;
pub const QUERY_EMBEDDING_TTL_SECS: usize = 3600;
pub const CATEGORY_EMBEDDING_TTL_SECS: usize = 86_400;

#[derive(Clone)]
pub struct CacheFacade {
    conn: SharedConnectionManager,
}

impl CacheFacade {
    pub fn new(conn: SharedConnectionManager) -> Self {
        Self { conn }
    }

    fn user_recs_key(user_id: i64, n: usize, strategy: &str) -> String {
        format!("rec:user:{user_id}:top:{n}:model:{strategy}")
    }

    fn vehicle_similar_key(vehicle_id: VehicleId, n: usize) -> String {
        format!("rec:vehicle:{vehicle_id}:top:{n}")
    }

    fn user_ml_context_key(user_id: i64) -> String {
        format!("context:user:{user_id}:ml")
    }

    fn query_embedding_key(text: &str) -> String {
        format!("embedding:query:{text}")
    }

    fn category_embedding_key(category: &str) -> String {
        format!("embedding:category:{category}")
    }

    const VEHICLE_FEATURES_KEY: &'static str = "vehicle_features";

    async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let mut conn = self.conn.lock().await;
        let raw: redis::RedisResult<Option<String>> = conn.get(key).await;
        match raw {
            Ok(Some(s)) => match serde_json::from_str(&s) {
                Ok(v) => Some(v),
                Err(e) => {
                    warn!(key, error = %e, "cache deserialization failed, treating as miss");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(key, error = %e, "cache read failed, treating as miss");
                None
            }
        }
    }

    async fn set_json<T: Serialize>(&self, key: &str, value: &T, ttl_secs: usize) {
        let payload = match serde_json::to_string(value) {
            Ok(p) => p,
            Err(e) => {
                warn!(key, error = %e, "cache serialization failed, skipping write");
                return;
            }
        };
        let mut conn = self.conn.lock().await;
        let result: redis::RedisResult<()> = conn.set_ex(key, payload, ttl_secs as u64).await;
        if let Err(e) = result {
            warn!(key, error = %e, "cache write failed");
        }
    }

    pub async fn get_cached_recommendations(
        &self,
        user_id: i64,
        n: usize,
        strategy: &str,
    ) -> Option<RecommendationResult> {
        self.get_json(&Self::user_recs_key(user_id, n, strategy))
            .await
    }

    pub async fn set_cached_recommendations(
        &self,
        user_id: i64,
        n: usize,
        strategy: &str,
        result: &RecommendationResult,
    ) {
        self.set_json(
            &Self::user_recs_key(user_id, n, strategy),
            result,
            DEFAULT_TTL_SECS,
        )
        .await;
    }

    pub async fn get_cached_similar<T: DeserializeOwned>(
        &self,
        vehicle_id: VehicleId,
        n: usize,
    ) -> Option<T> {
        self.get_json(&Self::vehicle_similar_key(vehicle_id, n))
            .await
    }

    pub async fn set_cached_similar<T: Serialize>(&self, vehicle_id: VehicleId, n: usize, value: &T) {
        self.set_json(&Self::vehicle_similar_key(vehicle_id, n), value, DEFAULT_TTL_SECS)
            .await;
    }

    pub async fn get_user_ml_context(&self, user_id: i64) -> Option<serde_json::Value> {
        self.get_json(&Self::user_ml_context_key(user_id)).await
    }

    pub async fn set_user_ml_context(&self, user_id: i64, value: &serde_json::Value) {
        self.set_json(&Self::user_ml_context_key(user_id), value, DEFAULT_TTL_SECS)
            .await;
    }

    pub async fn get_query_embedding(&self, text: &str) -> Option<Vec<f32>> {
        self.get_json(&Self::query_embedding_key(text)).await
    }

    pub async fn set_query_embedding(&self, text: &str, embedding: &[f32]) {
        self.set_json(
            &Self::query_embedding_key(text),
            &embedding.to_vec(),
            QUERY_EMBEDDING_TTL_SECS,
        )
        .await;
    }

    pub async fn get_category_embedding(&self, category: &str) -> Option<Vec<Vec<f32>>> {
        self.get_json(&Self::category_embedding_key(category)).await
    }

    pub async fn set_category_embedding(&self, category: &str, embeddings: &[Vec<f32>]) {
        self.set_json(
            &Self::category_embedding_key(category),
            &embeddings.to_vec(),
            CATEGORY_EMBEDDING_TTL_SECS,
        )
        .await;
    }

    pub async fn get_vehicle_features<T: DeserializeOwned>(&self) -> Option<T> {
        self.get_json(Self::VEHICLE_FEATURES_KEY).await
    }

    pub async fn set_vehicle_features<T: Serialize>(&self, value: &T) {
        self.set_json(Self::VEHICLE_FEATURES_KEY, value, DEFAULT_TTL_SECS)
            .await;
    }

    /// Deletes all keys matching `rec:user:{user_id}:*` via a cursor scan
    /// (spec §4.1). Best-effort: scan/delete failures are logged, not
    /// propagated.
    pub async fn invalidate_user_cache(&self, user_id: i64) {
        let pattern = format!("rec:user:{user_id}:*");
        let mut conn = self.conn.lock().await;
        let mut cursor: u64 = 0;
        loop {
            let scan_result: redis::RedisResult<(u64, Vec<String>)> = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut *conn)
                .await;
            let (next_cursor, keys) = match scan_result {
                Ok(v) => v,
                Err(e) => {
                    warn!(user_id, error = %e, "cache invalidation scan failed");
                    return;
                }
            };
            if !keys.is_empty() {
                let del_result: redis::RedisResult<()> = conn.del(&keys).await;
                if let Err(e) = del_result {
                    warn!(user_id, error = %e, "cache invalidation delete failed");
                }
            }
            cursor = next_cursor;
            if cursor == 0 {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_schema_matches_spec() {
        assert_eq!(
            CacheFacade::user_recs_key(42, 5, "hybrid"),
            "rec:user:42:top:5:model:hybrid"
        );
        assert_eq!(CacheFacade::vehicle_similar_key(10, 2), "rec:vehicle:10:top:2");
        assert_eq!(CacheFacade::user_ml_context_key(42), "context:user:42:ml");
        assert_eq!(
            CacheFacade::query_embedding_key("suv"),
            "embedding:query:suv"
        );
        assert_eq!(
            CacheFacade::category_embedding_key("GENERAL"),
            "embedding:category:GENERAL"
        );
        assert_eq!(CacheFacade::VEHICLE_FEATURES_KEY, "vehicle_features");
    }
}
