//! Application state

use std::sync::Arc;
use std::time::Duration;

use portcullis_auth_core::{Gateway, SessionConfig};

use crate::config::Config;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Login, callback, session and sign-out logic
    pub gateway: Arc<Gateway>,
    /// Application configuration
    pub config: Arc<Config>,
}

impl AppState {
    /// Create new application state
    pub fn new(gateway: Gateway, config: Config) -> Self {
        Self {
            gateway: Arc::new(gateway),
            config: Arc::new(config),
        }
    }

    /// Get request timeout from config
    pub fn request_timeout(&self) -> Duration {
        self.config.request_timeout
    }

    /// Cookie names and attributes
    pub fn session_config(&self) -> &SessionConfig {
        &self.config.gateway.session
    }
}
