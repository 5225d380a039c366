pub mod assistant;
pub mod auth;
pub mod cache;
pub mod config;
pub mod error;
pub mod handlers;
pub mod llm;
pub mod models;
pub mod recommend;
pub mod registry;
pub mod state;
pub mod stores;
