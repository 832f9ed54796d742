//! Shared state for the HTTP server.

use autoreact_core::ReactorService;
use std::sync::Arc;

/// Shared state available to all HTTP handlers.
#[derive(Clone)]
pub struct SharedState {
    pub service: Arc<ReactorService>,
}

impl SharedState {
    pub fn new(service: Arc<ReactorService>) -> Self {
        Self { service }
    }
}
