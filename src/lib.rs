//! # Webhook Provider Library
//!
//! Discovers webhooks across a GitHub organization, correlates them with
//! catalog entities by repository, and publishes them as `Resource` entities
//! with `dependencyOf` relations.

pub mod catalog;
pub mod config;
pub mod credentials;
pub mod error;
pub mod github;
pub mod handlers;
pub mod provider;
pub mod reconcile;
pub mod scheduler;
pub mod server;
pub mod telemetry;
