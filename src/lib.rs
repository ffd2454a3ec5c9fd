// Error taxonomy shared by every component
pub mod error;

// Configuration loading
pub mod config;

// Per-tenant access tokens, encrypted at rest
pub mod credentials;

// Local product catalog and search
pub mod catalog;

// Upstream storefront catalog client
pub mod shopify;

// Install (authorization-code) flow
pub mod oauth;

// Ingestion and periodic scheduling
pub mod sync;

// HTTP transport
pub mod api;

pub use error::{SyncError, SyncResult};
