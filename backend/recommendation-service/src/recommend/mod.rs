pub mod content;
pub mod collab;
pub mod hybrid;
pub mod orchestrator;

pub use content::ContentRecommender;
pub use collab::CollabRecommender;
pub use hybrid::HybridRecommender;
pub use orchestrator::RecommendationOrchestrator;
