//! Portcullis Types - Shared domain types
//!
//! This crate contains the domain types used across the gateway:
//! - Claims and claim sets asserted by the identity provider
//! - Identities and authentication schemes
//! - Local sessions and provider callback parameters

pub mod auth;
pub mod claim;
pub mod identity;
pub mod session;

pub use auth::*;
pub use claim::*;
pub use identity::*;
pub use session::*;
