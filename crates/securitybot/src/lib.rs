//! Security alert verification daemon
//!
//! Process-side pieces around the `tasker` core: configuration, logging,
//! the HTTP bridges that satisfy its chat and push-auth contracts, and the
//! HTTP API for ingestion and reporting.

pub mod api;
pub mod auth;
pub mod chat;
pub mod config;
pub mod telemetry;

pub use api::{ApiError, ApiState};
pub use auth::HttpAuthBridge;
pub use chat::HttpChatBridge;
pub use config::{AuthBridgeConfig, BotConfig, ChatBridgeConfig, ConfigError};
