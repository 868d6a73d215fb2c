//! Portcullis Auth Core - OpenID Connect relying-party logic
//!
//! Authorization-code login against a single provider (Amazon Cognito),
//! claim normalization, sealed session cookies and provider sign-out.
//! Framework agnostic; the HTTP surface lives in `gateway-api`.

pub mod config;
pub mod crypto;
pub mod error;
pub mod gateway;
pub mod metadata;
pub mod negotiator;
pub mod normalize;
pub mod session;
pub mod signout;
pub mod token;

pub use config::*;
pub use crypto::{constant_time_str_eq, CookieKey, CookieKeyError, CookieSealer, OpenError};
pub use error::*;
pub use gateway::*;
pub use metadata::{MetadataCache, ProviderMetadata};
pub use negotiator::*;
pub use normalize::*;
pub use session::*;
pub use signout::*;
pub use token::{claims_from_json, IdTokenValidator, PROTOCOL_CLAIMS};
