//! Deduplicates user questions by semantic similarity and maintains a
//! ranked list (C11, spec §4.11).

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;

use crate::llm::LlmClient;
use crate::models::PopularQuery;

const SIMILARITY_THRESHOLD: f32 = 0.68;

pub struct PopularQueryService {
    llm: Arc<LlmClient>,
    rows: Mutex<Vec<PopularQuery>>,
}

impl PopularQueryService {
    pub fn new(llm: Arc<LlmClient>) -> Self {
        Self { llm, rows: Mutex::new(Vec::new()) }
    }

    pub async fn save(&self, question: &str) {
        let trimmed = question.trim();
        if trimmed.is_empty() {
            return;
        }

        let embedding = match self.llm.embed(trimmed).await {
            Ok(e) => Some(e),
            Err(e) => {
                tracing::warn!(error = %e, "popular query embedding failed, saving without embedding");
                None
            }
        };

        let mut rows = self.rows.lock().await;

        let Some(new_embedding) = embedding.as_ref() else {
            rows.push(PopularQuery {
                text: trimmed.to_string(),
                count: 1,
                last_asked: Utc::now(),
                embedding: None,
            });
            return;
        };

        // Backfill embeddings for any row that was inserted without one
        // (e.g. a prior embedding-service outage), then find the closest
        // match (spec §4.11 steps 3-4).
        for row in rows.iter_mut() {
            if row.embedding.is_none() {
                row.embedding = self.llm.embed(&row.text).await.ok();
            }
        }

        let best = rows
            .iter_mut()
            .filter_map(|row| row.embedding.as_ref().map(|e| (cosine_similarity(new_embedding, e), row)))
            .max_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

        match best {
            Some((similarity, row)) if similarity >= SIMILARITY_THRESHOLD => {
                row.count += 1;
                row.last_asked = Utc::now();
            }
            _ => {
                rows.push(PopularQuery {
                    text: trimmed.to_string(),
                    count: 1,
                    last_asked: Utc::now(),
                    embedding: Some(new_embedding.clone()),
                });
            }
        }
    }

    pub async fn top(&self, limit: usize) -> Vec<PopularQuery> {
        let rows = self.rows.lock().await;
        let mut sorted: Vec<PopularQuery> = rows.clone();
        sorted.sort_by(|a, b| b.count.cmp(&a.count).then(b.last_asked.cmp(&a.last_asked)));
        sorted.truncate(limit);
        sorted
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || b.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_similarity_of_identical_vectors_is_one() {
        let v = vec![0.1, 0.9, 0.3];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_similarity_threshold_matches_spec_default() {
        assert_eq!(SIMILARITY_THRESHOLD, 0.68);
    }
}
