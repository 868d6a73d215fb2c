//! Provider callback types

use serde::{Deserialize, Serialize};

/// Query parameters the identity provider sends back to the callback path
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CallbackParams {
    /// Authorization code
    pub code: Option<String>,
    /// State parameter (CSRF protection)
    pub state: Option<String>,
    /// Provider error code (e.g. `access_denied`)
    pub error: Option<String>,
    /// Human readable provider error description
    pub error_description: Option<String>,
}

impl CallbackParams {
    /// Successful callback parameters
    pub fn success(code: impl Into<String>, state: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            state: Some(state.into()),
            ..Self::default()
        }
    }

    /// Whether the provider reported an error
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}
