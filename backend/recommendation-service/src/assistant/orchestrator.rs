//! Ties the assistant pipeline together: classify, prompt, call the LLM,
//! validate and execute SQL, summarize, render (C10, spec §4.10).

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use crate::assistant::classifier::{AuthenticatedUser, QueryClassifier};
use crate::assistant::feedback::FeedbackService;
use crate::assistant::popular_queries::PopularQueryService;
use crate::assistant::sql_executor::{SafeSqlExecutor, UserScope};
use crate::assistant::ui_block::UiBlockBuilder;
use crate::llm::LlmClient;
use crate::models::{AssistantResponse, ChartType, QueryCategory, UiType};

const LLM_ATTEMPTS: u32 = 3;

static JSON_FENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)```(?:json)?\s*(.*?)\s*```").unwrap());

/// Shape the LLM is instructed to emit. Every field is optional: a
/// malformed or partial response degrades to the fallback response rather
/// than erroring (spec §4.10 step 4).
#[derive(Debug, Deserialize, Default)]
struct LlmPlan {
    #[serde(default)]
    sql: Option<String>,
    #[serde(default)]
    answer: Option<String>,
    #[serde(default)]
    ui_type: Option<String>,
    #[serde(default)]
    chart_type: Option<String>,
    #[serde(default)]
    suggested_actions: Vec<String>,
    #[serde(default)]
    sources: Vec<String>,
}

pub struct AssistantOrchestrator {
    classifier: Arc<QueryClassifier>,
    llm: Arc<LlmClient>,
    sql_executor: Arc<SafeSqlExecutor>,
    popular_queries: Arc<PopularQueryService>,
    feedback: Arc<FeedbackService>,
}

impl AssistantOrchestrator {
    pub fn new(
        classifier: Arc<QueryClassifier>,
        llm: Arc<LlmClient>,
        sql_executor: Arc<SafeSqlExecutor>,
        popular_queries: Arc<PopularQueryService>,
        feedback: Arc<FeedbackService>,
    ) -> Self {
        Self { classifier, llm, sql_executor, popular_queries, feedback }
    }

    /// Runs the full pipeline and returns the message id (for feedback
    /// submission) alongside the rendered response.
    pub async fn ask(&self, question: &str, user: &AuthenticatedUser) -> (String, AssistantResponse) {
        let message_id = uuid::Uuid::new_v4().to_string();

        // Best-effort popularity tracking: never lets a slow/failed
        // embedding call delay or fail the user-facing answer (spec §4.10,
        // §4.11).
        let popular_queries = self.popular_queries.clone();
        let question_owned = question.to_string();
        tokio::spawn(async move {
            popular_queries.save(&question_owned).await;
        });

        let category = self.classifier.classify(question, user).await;

        let response = if category == QueryCategory::Unsafe {
            Self::unsafe_fallback()
        } else {
            self.handle_category(category, question, user).await
        };

        self.feedback.register_message(&message_id).await;
        (message_id, response)
    }

    async fn handle_category(
        &self,
        category: QueryCategory,
        question: &str,
        user: &AuthenticatedUser,
    ) -> AssistantResponse {
        let (system_prompt, user_prompt) = Self::build_prompt(category, question, user);

        let raw = match self.llm.call(&system_prompt, &user_prompt, LLM_ATTEMPTS).await {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(error = %e, "assistant LLM call failed");
                return Self::upstream_failure_fallback();
            }
        };

        let plan = match Self::parse_plan(&raw) {
            Some(plan) => plan,
            None => {
                tracing::warn!("assistant LLM response was not valid JSON, falling back");
                return Self::parse_failure_fallback();
            }
        };

        match category {
            QueryCategory::General | QueryCategory::FinanceCalc => {
                self.render_direct(category, &plan)
            }
            QueryCategory::VehicleSearch | QueryCategory::AuctionSearch | QueryCategory::UserSpecific => {
                self.render_via_sql(category, &plan, user).await
            }
            QueryCategory::Unsafe => Self::unsafe_fallback(),
        }
    }

    /// GENERAL and FINANCE_CALC answers come straight from the model; no
    /// database round-trip is involved (spec §4.10).
    fn render_direct(&self, category: QueryCategory, plan: &LlmPlan) -> AssistantResponse {
        let answer = plan.answer.clone().unwrap_or_default();
        let ui_type = Self::resolve_ui_type(plan, UiType::Text);
        let chart_type = Self::resolve_chart_type(plan, ui_type);
        let data = Value::Null;
        let ui_block = UiBlockBuilder::render(ui_type, &answer, &data, chart_type);

        AssistantResponse {
            answer,
            ui_type,
            chart_type,
            query_type: category.as_str().to_string(),
            data,
            suggested_actions: plan.suggested_actions.clone(),
            sources: plan.sources.clone(),
            ui_block,
        }
    }

    /// VEHICLE_SEARCH, AUCTION_SEARCH, and USER_SPECIFIC run the model's
    /// proposed SQL through the allow-list executor, then summarize the
    /// rows (spec §4.9, §4.10).
    async fn render_via_sql(
        &self,
        category: QueryCategory,
        plan: &LlmPlan,
        user: &AuthenticatedUser,
    ) -> AssistantResponse {
        let Some(sql) = plan.sql.as_deref().filter(|s| !s.trim().is_empty()) else {
            return Self::parse_failure_fallback();
        };

        let scope = UserScope { id: user.id, name: user.name.clone(), email: user.email.clone() };

        let rows = match self.sql_executor.run(sql, &scope).await {
            Ok(rows) => rows,
            Err(e) => {
                tracing::warn!(error = %e.message(), "assistant SQL rejected by the safety gate");
                return Self::sql_rejected_fallback(category);
            }
        };

        let data = serde_json::to_value(&rows).unwrap_or(Value::Array(Vec::new()));
        let answer = self.summarize(category, &rows, plan).await;
        let ui_type = Self::resolve_ui_type(plan, Self::default_ui_for(category, &rows));
        let chart_type = Self::resolve_chart_type(plan, ui_type);
        let ui_block = UiBlockBuilder::render(ui_type, &answer, &data, chart_type);

        AssistantResponse {
            answer,
            ui_type,
            chart_type,
            query_type: category.as_str().to_string(),
            data,
            suggested_actions: plan.suggested_actions.clone(),
            sources: plan.sources.clone(),
            ui_block,
        }
    }

    /// A second LLM call turns raw rows into a short natural-language
    /// summary; an empty result set skips the call entirely since there is
    /// nothing to summarize (spec §4.10 step 5).
    async fn summarize(
        &self,
        category: QueryCategory,
        rows: &[std::collections::HashMap<String, Value>],
        plan: &LlmPlan,
    ) -> String {
        if rows.is_empty() {
            return format!("No {} matched your question.", Self::subject_for(category));
        }

        let system_prompt =
            "Summarize the following query results in 1-3 plain sentences for a car auction buyer. \
             Do not invent data that is not present in the rows.";
        let rows_json = serde_json::to_string(rows).unwrap_or_default();
        let user_prompt = format!("Question context: {:?}\nRows: {rows_json}", plan.answer);

        match self.llm.call(system_prompt, &user_prompt, LLM_ATTEMPTS).await {
            Ok(summary) if !summary.trim().is_empty() => summary,
            _ => format!("Found {} matching {}.", rows.len(), Self::subject_for(category)),
        }
    }

    fn subject_for(category: QueryCategory) -> &'static str {
        match category {
            QueryCategory::VehicleSearch => "vehicles",
            QueryCategory::AuctionSearch => "auctions",
            QueryCategory::UserSpecific => "records",
            _ => "results",
        }
    }

    fn default_ui_for(
        category: QueryCategory,
        rows: &[std::collections::HashMap<String, Value>],
    ) -> UiType {
        match category {
            _ if rows.is_empty() => UiType::Text,
            QueryCategory::VehicleSearch | QueryCategory::AuctionSearch => UiType::CardGrid,
            QueryCategory::UserSpecific => UiType::Table,
            _ => UiType::Text,
        }
    }

    fn resolve_ui_type(plan: &LlmPlan, default: UiType) -> UiType {
        match plan.ui_type.as_deref().map(str::to_uppercase).as_deref() {
            Some("TEXT") => UiType::Text,
            Some("TABLE") => UiType::Table,
            Some("CARD_GRID") => UiType::CardGrid,
            Some("CALCULATOR") => UiType::Calculator,
            Some("CHART") => UiType::Chart,
            _ => default,
        }
    }

    fn resolve_chart_type(plan: &LlmPlan, ui_type: UiType) -> Option<ChartType> {
        if ui_type != UiType::Chart {
            return None;
        }
        Some(match plan.chart_type.as_deref().map(str::to_lowercase).as_deref() {
            Some("line") => ChartType::Line,
            Some("pie") => ChartType::Pie,
            _ => ChartType::Bar,
        })
    }

    /// Strips an optional ```json fence before parsing (spec SPEC_FULL
    /// §11.3): some providers wrap JSON-mode output in a markdown fence
    /// even when asked not to.
    fn parse_plan(raw: &str) -> Option<LlmPlan> {
        let unfenced = match JSON_FENCE.captures(raw) {
            Some(caps) => caps[1].to_string(),
            None => raw.trim().to_string(),
        };
        serde_json::from_str(&unfenced).ok()
    }

    fn build_prompt(category: QueryCategory, question: &str, user: &AuthenticatedUser) -> (String, String) {
        let schema_hint = "Respond with a single JSON object only, no prose outside it, shaped as: \
            {\"sql\": string|null, \"answer\": string, \"ui_type\": \"TEXT\"|\"TABLE\"|\"CARD_GRID\"|\"CALCULATOR\"|\"CHART\", \
            \"chart_type\": \"bar\"|\"line\"|\"pie\"|null, \"suggested_actions\": [string], \"sources\": [string]}.";

        let system_prompt = match category {
            QueryCategory::General => format!(
                "You are an assistant for a vehicle auction marketplace. Answer general questions about \
                 auctions, vehicles, and financing in plain language. Do not write SQL. {schema_hint}"
            ),
            QueryCategory::FinanceCalc => format!(
                "You are a financing calculator for a vehicle auction marketplace. Compute monthly \
                 payments, interest, or amortization from the numbers in the question. Return the \
                 computed figures under \"answer\" and set ui_type to CALCULATOR. Do not write SQL. \
                 {schema_hint}"
            ),
            QueryCategory::VehicleSearch => format!(
                "You are a SQL generator for a vehicle auction marketplace's read replica. Write one \
                 SELECT statement against the Vehicles table (joined with VehicleFeatures if useful) \
                 that answers the question, and put it in \"sql\". {schema_hint}"
            ),
            QueryCategory::AuctionSearch => format!(
                "You are a SQL generator for a vehicle auction marketplace's read replica. Write one \
                 SELECT statement against Auctions, Bids, or AuctionAnalytics that answers the question, \
                 and put it in \"sql\". {schema_hint}"
            ),
            QueryCategory::UserSpecific => format!(
                "You are a SQL generator for a vehicle auction marketplace's read replica. Write one \
                 SELECT statement scoped to the authenticated caller only: every reference to their data \
                 MUST include the literal condition `WHERE UserId = {}` (or join through it). Never \
                 reference any other user id. Put the statement in \"sql\". {schema_hint}",
                user.id
            ),
            QueryCategory::Unsafe => schema_hint.to_string(),
        };

        (system_prompt, question.to_string())
    }

    fn unsafe_fallback() -> AssistantResponse {
        let answer = "I can't help with that request.".to_string();
        let ui_block = UiBlockBuilder::render(UiType::Text, &answer, &Value::Null, None);
        AssistantResponse {
            answer,
            ui_type: UiType::Text,
            chart_type: None,
            query_type: QueryCategory::Unsafe.as_str().to_string(),
            data: Value::Null,
            suggested_actions: Vec::new(),
            sources: Vec::new(),
            ui_block,
        }
    }

    /// A query classified as a data category but whose generated SQL was
    /// rejected by the safety gate: unlike `unsafe_fallback`, the original
    /// category is preserved since the classifier's decision was correct
    /// (spec §8 scenario: rejected SQL keeps `query_type` at the classified
    /// category, not UNSAFE).
    fn sql_rejected_fallback(category: QueryCategory) -> AssistantResponse {
        let answer = "Sorry I cannot assist with that".to_string();
        let ui_block = UiBlockBuilder::render(UiType::Text, &answer, &Value::Null, None);
        AssistantResponse {
            answer,
            ui_type: UiType::Text,
            chart_type: None,
            query_type: category.as_str().to_string(),
            data: Value::Null,
            suggested_actions: Vec::new(),
            sources: Vec::new(),
            ui_block,
        }
    }

    fn parse_failure_fallback() -> AssistantResponse {
        let answer = "I wasn't able to work out an answer to that. Could you rephrase it?".to_string();
        let ui_block = UiBlockBuilder::render(UiType::Text, &answer, &Value::Null, None);
        AssistantResponse {
            answer,
            ui_type: UiType::Text,
            chart_type: None,
            query_type: QueryCategory::General.as_str().to_string(),
            data: Value::Null,
            suggested_actions: Vec::new(),
            sources: Vec::new(),
            ui_block,
        }
    }

    fn upstream_failure_fallback() -> AssistantResponse {
        let answer = "The assistant is temporarily unavailable. Please try again shortly.".to_string();
        let ui_block = UiBlockBuilder::render(UiType::Text, &answer, &Value::Null, None);
        AssistantResponse {
            answer,
            ui_type: UiType::Text,
            chart_type: None,
            query_type: QueryCategory::General.as_str().to_string(),
            data: Value::Null,
            suggested_actions: Vec::new(),
            sources: Vec::new(),
            ui_block,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sql_rejected_fallback_keeps_classified_category() {
        let response = AssistantOrchestrator::sql_rejected_fallback(QueryCategory::VehicleSearch);
        assert_eq!(response.answer, "Sorry I cannot assist with that");
        assert_eq!(response.query_type, "VEHICLE_SEARCH");
    }

    #[test]
    fn strips_json_fence_before_parsing() {
        let raw = "```json\n{\"answer\": \"hi\"}\n```";
        let plan = AssistantOrchestrator::parse_plan(raw).expect("should parse");
        assert_eq!(plan.answer.as_deref(), Some("hi"));
    }

    #[test]
    fn parses_plain_json_without_fence() {
        let raw = "{\"answer\": \"hi\"}";
        assert!(AssistantOrchestrator::parse_plan(raw).is_some());
    }

    #[test]
    fn malformed_json_returns_none() {
        assert!(AssistantOrchestrator::parse_plan("not json at all").is_none());
    }

    #[test]
    fn resolves_chart_type_only_for_chart_ui() {
        let mut plan = LlmPlan::default();
        plan.ui_type = Some("TABLE".to_string());
        plan.chart_type = Some("pie".to_string());
        assert_eq!(AssistantOrchestrator::resolve_chart_type(&plan, UiType::Table), None);
        assert_eq!(
            AssistantOrchestrator::resolve_chart_type(&plan, UiType::Chart),
            Some(ChartType::Pie)
        );
    }

    #[test]
    fn user_specific_prompt_injects_user_id_literal() {
        let user = AuthenticatedUser { id: 42, email: "a@b.com".to_string(), name: "A B".to_string() };
        let (system, _) = AssistantOrchestrator::build_prompt(QueryCategory::UserSpecific, "my bids", &user);
        assert!(system.contains("WHERE UserId = 42"));
    }
}
