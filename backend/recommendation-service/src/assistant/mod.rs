//! The natural-language assistant pipeline (C8-C13): classify, prompt,
//! call the LLM, validate and execute SQL, summarize, and render (spec
//! §4.10).

pub mod classifier;
pub mod feedback;
pub mod orchestrator;
pub mod popular_queries;
pub mod sql_executor;
pub mod ui_block;

pub use classifier::{AuthenticatedUser, QueryClassifier};
pub use feedback::FeedbackService;
pub use orchestrator::AssistantOrchestrator;
pub use popular_queries::PopularQueryService;
pub use sql_executor::{SafeSqlExecutor, UserScope};
pub use ui_block::UiBlockBuilder;
