//! SonarCloud provider
//!
//! Manages SonarCloud projects, webhooks, permissions and quality gate
//! selections for an infrastructure-as-code host, and exposes read-only data
//! sources over the same API.
//!
//! # Overview
//!
//! - **[`SonarCloudProvider`]**: the [`ProviderService`] a host drives
//!   (schema, configure, plan, CRUD, import, data sources)
//! - **[`reconcile`]**: the engine behind set-valued resources. SonarCloud
//!   has no batch endpoint for permissions or gate selections and its reads
//!   lag behind its writes, so each change is diffed, applied as concurrent
//!   single-key calls and then polled until the remote set matches
//! - **[`client`]**: the SonarCloud web API, behind the [`SonarCloudApi`] trait
//! - **Schema, validation and planning** driven by attribute schemas
//! - **[`testing`]**: a [`ProviderTester`](testing::ProviderTester) harness and
//!   an in-memory SonarCloud
//!
//! # Quick Start
//!
//! ```ignore
//! use sonarcloud_provider::{init_logging, ProviderService, SonarCloudProvider};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     init_logging();
//!
//!     let provider = SonarCloudProvider::new();
//!     provider.configure(json!({"organization": "acme"})).await?; // token from SONARCLOUD_TOKEN
//!
//!     let state = provider
//!         .create(
//!             "sonarcloud_user_group_permissions",
//!             json!({"name": "devs", "project_key": "acme_web", "permissions": ["scan", "user"]}),
//!         )
//!         .await?;
//!     println!("{}", state);
//!     Ok(())
//! }
//! ```
//!
//! # Resources
//!
//! - `sonarcloud_project`
//! - `sonarcloud_webhook`
//! - `sonarcloud_user_group_permissions`
//! - `sonarcloud_user_permissions`
//! - `sonarcloud_quality_gate_selection`
//!
//! # Data sources
//!
//! `sonarcloud_projects`, `sonarcloud_quality_gates`, `sonarcloud_quality_gate`,
//! `sonarcloud_user_groups`, `sonarcloud_user_group`,
//! `sonarcloud_user_group_members`, `sonarcloud_user_group_permissions`,
//! `sonarcloud_user_permissions`, `sonarcloud_webhooks`.

#![warn(clippy::all)]

pub mod client;
pub mod config;
pub mod data_sources;
pub mod error;
pub mod logging;
pub mod plan;
pub mod provider;
pub mod reconcile;
pub mod resources;
pub mod schema;
pub mod service;
pub mod testing;
pub mod validation;

// Re-export main types at crate root
pub use client::{Client, ClientConfig, ClientError, SonarCloudApi};
pub use config::ProviderConfig;
pub use error::ProviderError;
pub use logging::{init_logging, init_logging_with_default, try_init_logging};
pub use plan::{AttributeChange, PlanResult};
pub use provider::{ProviderContext, SonarCloudProvider};
pub use schema::ProviderSchema;
pub use service::{ImportedResource, ProviderMetadata, ProviderService, ServerCapabilities};
pub use validation::{is_valid, validate, validate_result};

// Re-export async_trait for convenience
pub use async_trait::async_trait;

// Re-export commonly used external types
pub use serde_json;
pub use tracing;
