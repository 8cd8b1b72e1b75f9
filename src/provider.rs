//! Provider abstraction: provider metadata, tenant configs, credential strategies, and the request
//! pipeline.
//!
//! `metadata` holds the immutable [`ProviderMetadata`] describing a provider type and `config`
//! the per-tenant [`IntegrationConfig`]. A single concrete [`Provider`] combines them with an
//! [`AuthStrategy`] (OAuth 2.0, API key, or Basic) and a [`ProviderHooks`] implementation for
//! the operations only a concrete integration can supply.

pub mod auth;
pub mod config;
pub mod hooks;
pub mod lifecycle;
pub mod metadata;
pub mod request;

pub use auth::*;
pub use config::*;
pub use hooks::*;
pub use lifecycle::*;
pub use metadata::*;
pub use request::*;
