//! # autoreact-core
//!
//! Core logic for autoreact, an HTTP-controlled auto-reactor for a messaging
//! platform account.
//!
//! This crate is framework-agnostic and can be used by:
//! - the axum control server (`autoreact-http`)
//! - the daemon binary (`autoreact-daemon`)
//! - tests, through the in-memory client backend
//!
//! ## Key Concepts
//!
//! - **Execution context**: a dedicated thread with its own single-threaded
//!   runtime, one per account, which owns every async call for that account
//! - **Account session**: client, context, credentials and login state for one
//!   phone number, kept as one registry entry
//! - **Subscription**: a background loop reacting to new messages in one group

pub mod client;
pub mod config;
pub mod error;
pub mod paths;
pub mod reaction;
pub mod registry;
pub mod runtime;
pub mod service;
pub mod session;

// Re-export commonly used types
pub use config::ServiceConfig;
pub use error::{ControlError, Reply};
pub use reaction::SubscriptionPolicy;
pub use registry::SessionRegistry;
pub use runtime::ExecutionContext;
pub use service::ReactorService;
pub use session::{AccountSession, AuthState};
