//! HTTP API for the NLQ dashboard

mod handlers;
mod relay;
mod sse;
mod types;

pub use handlers::create_router;
pub use relay::Relay;
#[allow(unused_imports)] // Public API re-exports
pub use types::*;

use crate::runtime::RuntimeManager;
use std::sync::Arc;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub runtime: Arc<RuntimeManager>,
    pub relay: Arc<Relay>,
}

impl AppState {
    pub fn new(runtime: RuntimeManager, relay: Relay) -> Self {
        Self {
            runtime: Arc::new(runtime),
            relay: Arc::new(relay),
        }
    }
}
