//! Data model types shared across the recommendation and assistant pipelines
//! (spec §3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub type VehicleId = i64;
pub type UserId = i64;

/// Immutable catalog entry, enriched with static spec-sheet features joined
/// by (make, model, year). Never mutated at runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vehicle {
    pub id: VehicleId,
    pub make: String,
    pub model: String,
    pub year: i32,
    pub price: f64,
    pub mileage: i64,
    pub color: String,
    pub fuel_type: String,
    pub transmission: String,
    pub status: String,
    #[serde(flatten)]
    pub specs: VehicleSpecs,
}

/// Numeric specs joined from `app/data/car-features.json`. All fields are
/// optional because not every (make, model, year) has a matching entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VehicleSpecs {
    pub horsepower: Option<f64>,
    pub torque: Option<f64>,
    pub engine_size: Option<f64>,
    pub city_mpg: Option<f64>,
    pub co2_emissions: Option<f64>,
    pub zero_to_60: Option<f64>,
    pub drivetrain_type: Option<String>,
}

impl Vehicle {
    /// Vehicle + specs flattened into a JSON map, the shape handed to
    /// `RecommendationResult` and card/table UI blocks.
    pub fn enriched_features(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("id".to_string(), serde_json::json!(self.id));
        map.insert("make".to_string(), serde_json::json!(self.make));
        map.insert("model".to_string(), serde_json::json!(self.model));
        map.insert("year".to_string(), serde_json::json!(self.year));
        map.insert("price".to_string(), serde_json::json!(self.price));
        map.insert("mileage".to_string(), serde_json::json!(self.mileage));
        map.insert("color".to_string(), serde_json::json!(self.color));
        map.insert("fuel_type".to_string(), serde_json::json!(self.fuel_type));
        map.insert(
            "transmission".to_string(),
            serde_json::json!(self.transmission),
        );
        map.insert("status".to_string(), serde_json::json!(self.status));
        if let Some(hp) = self.specs.horsepower {
            map.insert("horsepower".to_string(), serde_json::json!(hp));
        }
        if let Some(t) = self.specs.torque {
            map.insert("torque".to_string(), serde_json::json!(t));
        }
        if let Some(e) = self.specs.engine_size {
            map.insert("engine_size".to_string(), serde_json::json!(e));
        }
        if let Some(m) = self.specs.city_mpg {
            map.insert("city_mpg".to_string(), serde_json::json!(m));
        }
        if let Some(c) = self.specs.co2_emissions {
            map.insert("co2_emissions".to_string(), serde_json::json!(c));
        }
        if let Some(z) = self.specs.zero_to_60 {
            map.insert("zero_to_60".to_string(), serde_json::json!(z));
        }
        if let Some(d) = &self.specs.drivetrain_type {
            map.insert("drivetrain_type".to_string(), serde_json::json!(d));
        }
        map
    }
}

/// Per-type interaction weight table (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionType {
    View,
    Share,
    FavoriteAdded,
    ContactedSeller,
}

impl InteractionType {
    /// Fixed per-type weight used to build aggregated (user, vehicle) counts.
    pub fn weight(&self) -> f64 {
        match self {
            InteractionType::View => 1.0,
            InteractionType::Share => 2.0,
            InteractionType::FavoriteAdded => 3.0,
            InteractionType::ContactedSeller => 5.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Interaction {
    pub user_id: UserId,
    pub vehicle_id: VehicleId,
    pub interaction_type: InteractionType,
    pub created_at: DateTime<Utc>,
}

/// An ordered (vehicle id, score) pair, `score` in [0, 1].
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ScoredVehicle {
    pub vehicle_id: VehicleId,
    pub score: f64,
}

/// Which of the two distinct top-K maps a lookup targets (spec §3, §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimilarityKind {
    /// Weighted toward physical specs.
    Vehicle,
    /// Weighted toward buyer-facing attributes.
    User,
}

impl SimilarityKind {
    pub fn artifact_name(&self) -> &'static str {
        match self {
            SimilarityKind::Vehicle => "vehicle_similarity",
            SimilarityKind::User => "user_similarity",
        }
    }
}

/// `vehicle_id -> ordered [(vehicle_id, score)]`, length <= top-K.
///
/// Invariant (spec §8.1): the self-id never appears in its own list, and
/// each list is sorted by score descending.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SimilarityMap(pub HashMap<VehicleId, Vec<ScoredVehicle>>);

impl SimilarityMap {
    pub fn get(&self, vehicle_id: VehicleId) -> Option<&[ScoredVehicle]> {
        self.0.get(&vehicle_id).map(|v| v.as_slice())
    }
}

/// Recommendation strategy selector used by the orchestrator's factory (C7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecommendationStrategy {
    Content,
    Collaborative,
    Hybrid,
}

/// Ordered sequence of (vehicle id, score, enriched features), length <=
/// requested top-N. Scores are non-increasing within one result (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationEntry {
    pub vehicle_id: VehicleId,
    pub score: f64,
    pub features: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationResult {
    pub items: Vec<RecommendationEntry>,
    pub strategy: RecommendationStrategy,
}

/// Closed set of assistant query categories (C8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueryCategory {
    General,
    VehicleSearch,
    AuctionSearch,
    FinanceCalc,
    UserSpecific,
    Unsafe,
}

impl QueryCategory {
    pub const SCORED: [QueryCategory; 5] = [
        QueryCategory::General,
        QueryCategory::VehicleSearch,
        QueryCategory::AuctionSearch,
        QueryCategory::FinanceCalc,
        QueryCategory::UserSpecific,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueryCategory::General => "GENERAL",
            QueryCategory::VehicleSearch => "VEHICLE_SEARCH",
            QueryCategory::AuctionSearch => "AUCTION_SEARCH",
            QueryCategory::FinanceCalc => "FINANCE_CALC",
            QueryCategory::UserSpecific => "USER_SPECIFIC",
            QueryCategory::Unsafe => "UNSAFE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UiType {
    Text,
    Table,
    CardGrid,
    Calculator,
    Chart,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartType {
    Bar,
    Line,
    Pie,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantResponse {
    pub answer: String,
    pub ui_type: UiType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chart_type: Option<ChartType>,
    pub query_type: String,
    pub data: serde_json::Value,
    pub suggested_actions: Vec<String>,
    pub sources: Vec<String>,
    pub ui_block: String,
}

impl AssistantResponse {
    /// Invariant (spec §8.5): `chart_type` is set iff `ui_type == CHART`.
    pub fn is_well_formed(&self) -> bool {
        matches!(self.ui_type, UiType::Chart) == self.chart_type.is_some()
    }
}

/// (display text, count, last-asked timestamp, embedding) — C11.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PopularQuery {
    pub text: String,
    pub count: u64,
    pub last_asked: DateTime<Utc>,
    #[serde(skip_serializing)]
    pub embedding: Option<Vec<f32>>,
}

/// Tri-valued vote per assistant message (C12).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Vote {
    NotVoted,
    Upvoted,
    Downvoted,
}

impl Vote {
    /// Toggle semantics (spec §4.12, §8.10): resubmitting the same vote
    /// resets it to `NotVoted`.
    pub fn toggle(self, submitted: Vote) -> Vote {
        if self == submitted {
            Vote::NotVoted
        } else {
            submitted
        }
    }
}
