//! Classifies a free-form question into a closed category set, with a
//! safety gate applied first (C8, spec §4.8).

use std::sync::Arc;

use crate::cache::CacheFacade;
use crate::llm::LlmClient;
use crate::models::QueryCategory;

const FORBIDDEN_SQL_KEYWORDS: &[&str] = &[
    "drop", "delete", "alter", "insert", "update", "truncate", "exec", "--",
];
const FUZZY_THRESHOLD: f64 = 0.85;
const RESERVE_PRICE_PHRASE: &str = "reserve price";
const DEFINITIONAL_BOOST: f64 = 0.15;

/// Fixed example prompts embedded once per (non-UNSAFE) category and
/// cached under `embedding:category:{category}` (spec §4.1, §4.8).
fn example_bank(category: QueryCategory) -> &'static [&'static str] {
    match category {
        QueryCategory::General => &[
            "What is a salvage title?",
            "Explain how vehicle auctions work",
            "What does ABS stand for?",
        ],
        QueryCategory::VehicleSearch => &[
            "Show me SUVs under 30000 dollars",
            "Find a red sedan with low mileage",
            "Which trucks have the best horsepower?",
        ],
        QueryCategory::AuctionSearch => &[
            "What auctions end today?",
            "Show me active bids on trucks",
            "Which auctions have no bids yet?",
        ],
        QueryCategory::FinanceCalc => &[
            "What would my monthly payment be for a 20000 dollar loan?",
            "Calculate financing for this car over 60 months",
            "How much interest would I pay on this auction price?",
        ],
        QueryCategory::UserSpecific => &[
            "Show my saved searches",
            "What vehicles have I bid on?",
            "List my watchlist",
        ],
        QueryCategory::Unsafe => &[],
    }
}

pub struct AuthenticatedUser {
    pub id: i64,
    pub email: String,
    pub name: String,
}

pub struct QueryClassifier {
    llm: Arc<LlmClient>,
    cache: CacheFacade,
}

impl QueryClassifier {
    pub fn new(llm: Arc<LlmClient>, cache: CacheFacade) -> Self {
        Self { llm, cache }
    }

    pub async fn classify(&self, question: &str, user: &AuthenticatedUser) -> QueryCategory {
        if self.is_unsafe(question, user) {
            return QueryCategory::Unsafe;
        }

        let query_embedding = match self.embed_query(question).await {
            Some(e) => e,
            None => return QueryCategory::General,
        };

        let mut best_category = QueryCategory::General;
        let mut best_score = f64::MIN;

        for category in QueryCategory::SCORED {
            let bank_embeddings = self.embed_category(category).await;
            let max_sim = bank_embeddings
                .iter()
                .map(|e| cosine_similarity(&query_embedding, e))
                .fold(f64::MIN, f64::max);

            // Normalize cosine similarity in [-1, 1] to [0, 1] (spec §4.8).
            let mut score = (max_sim as f64 + 1.0) / 2.0;

            if category == QueryCategory::General && starts_with_definitional_trigger(question) {
                score += DEFINITIONAL_BOOST;
            }

            if score > best_score {
                best_score = score;
                best_category = category;
            }
        }

        best_category
    }

    fn is_unsafe(&self, question: &str, user: &AuthenticatedUser) -> bool {
        let normalized = question.to_lowercase();

        for keyword in FORBIDDEN_SQL_KEYWORDS {
            if fuzzy_contains(&normalized, keyword) {
                return true;
            }
        }

        if fuzzy_contains(&normalized, RESERVE_PRICE_PHRASE) {
            return true;
        }

        references_other_user(&normalized, user)
    }

    async fn embed_query(&self, question: &str) -> Option<Vec<f32>> {
        if let Some(cached) = self.cache.get_query_embedding(question).await {
            return Some(cached);
        }
        match self.llm.embed(question).await {
            Ok(embedding) => {
                self.cache.set_query_embedding(question, &embedding).await;
                Some(embedding)
            }
            Err(e) => {
                tracing::warn!(error = %e, "query embedding failed, defaulting to GENERAL");
                None
            }
        }
    }

    async fn embed_category(&self, category: QueryCategory) -> Vec<Vec<f32>> {
        let key = category.as_str();
        if let Some(cached) = self.cache.get_category_embedding(key).await {
            return cached;
        }
        let mut embeddings = Vec::new();
        for prompt in example_bank(category) {
            if let Ok(embedding) = self.llm.embed(prompt).await {
                embeddings.push(embedding);
            }
        }
        self.cache.set_category_embedding(key, &embeddings).await;
        embeddings
    }
}

fn starts_with_definitional_trigger(question: &str) -> bool {
    let trimmed = question.trim().to_lowercase();
    ["what is", "explain", "define", "difference between"]
        .iter()
        .any(|trigger| trimmed.starts_with(trigger))
}

/// Does any token-window of `text` fuzzily contain `needle` (>= 85%
/// similarity, spec §4.8)?
fn fuzzy_contains(text: &str, needle: &str) -> bool {
    if text.contains(needle) {
        return true;
    }
    let needle_len = needle.chars().count();
    let words: Vec<&str> = text.split_whitespace().collect();
    for window_size in 1..=needle.split_whitespace().count().max(1) {
        for window in words.windows(window_size) {
            let candidate = window.join(" ");
            if candidate.len() < needle_len.saturating_sub(2) {
                continue;
            }
            if similarity_ratio(&candidate, needle) >= FUZZY_THRESHOLD {
                return true;
            }
        }
    }
    false
}

fn similarity_ratio(a: &str, b: &str) -> f64 {
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    let distance = levenshtein(a, b);
    1.0 - (distance as f64 / max_len as f64)
}

fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut dp = vec![vec![0usize; b.len() + 1]; a.len() + 1];
    for (i, row) in dp.iter_mut().enumerate() {
        row[0] = i;
    }
    for j in 0..=b.len() {
        dp[0][j] = j;
    }
    for i in 1..=a.len() {
        for j in 1..=b.len() {
            let cost = if a[i - 1] == b[j - 1] { 0 } else { 1 };
            dp[i][j] = (dp[i - 1][j] + 1)
                .min(dp[i][j - 1] + 1)
                .min(dp[i - 1][j - 1] + cost);
        }
    }
    dp[a.len()][b.len()]
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

/// True when the question references a user id/email/name token that does
/// not match the authenticated user's own (spec §4.8).
fn references_other_user(normalized_question: &str, user: &AuthenticatedUser) -> bool {
    let own_id = user.id.to_string();
    let own_email = user.email.to_lowercase();
    let own_name = user.name.to_lowercase();

    if let Some(idx) = normalized_question.find("user ") {
        let rest = &normalized_question[idx + "user ".len()..];
        if let Some(token) = rest.split_whitespace().next() {
            let token = token.trim_matches(|c: char| !c.is_alphanumeric());
            let digits = token.trim_end_matches(|c: char| !c.is_ascii_digit());
            if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) && digits != own_id {
                return true;
            }
        }
    }

    for token in normalized_question.split(|c: char| !c.is_alphanumeric() && c != '@' && c != '.') {
        if token.is_empty() {
            continue;
        }
        if token.contains('@') && token != own_email {
            return true;
        }
    }

    // A bare full-name mention that isn't the caller's own name is treated
    // conservatively: only flagged when it looks like a possessive
    // ("<name>'s") to avoid false positives on common words.
    if normalized_question.contains("'s ") && !own_name.is_empty() {
        for word in own_name.split_whitespace() {
            if normalized_question.contains(&format!("{word}'s")) {
                return false;
            }
        }
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> AuthenticatedUser {
        AuthenticatedUser { id: 7, email: "me@example.com".to_string(), name: "Jane Doe".to_string() }
    }

    #[test]
    fn flags_forbidden_keyword_even_with_typo() {
        let normalized = "please dorp the table".to_string();
        assert!(fuzzy_contains(&normalized, "drop"));
    }

    #[test]
    fn flags_reserve_price_phrase() {
        let normalized = "what's the reserve price on this truck".to_string();
        assert!(fuzzy_contains(&normalized, RESERVE_PRICE_PHRASE));
    }

    #[test]
    fn flags_cross_user_probe() {
        let u = user();
        assert!(references_other_user("show me user 9's bids", &u));
    }

    #[test]
    fn allows_own_user_reference() {
        let u = user();
        assert!(!references_other_user("show me user 7's bids", &u));
    }

    #[test]
    fn definitional_trigger_detected() {
        assert!(starts_with_definitional_trigger("What is a lien?"));
        assert!(starts_with_definitional_trigger("Explain salvage titles"));
        assert!(!starts_with_definitional_trigger("Show me trucks"));
    }

    #[test]
    fn cosine_similarity_identical_vectors_is_one() {
        let v = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }
}
