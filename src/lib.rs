//! Bearer-token verification for an Auth0-gated provisioning API
//!
//! This crate implements the token-handling core shared by every
//! protected endpoint: fetch and cache the tenant's signing keys,
//! verify a presented bearer token's signature and standard claims,
//! and authorize it against the scopes and permissions an endpoint
//! demands.
//!
//! The usual entry point is [`Authority`], constructed once at
//! startup from [`AuthConfig`] and cloned into each handler:
//!
//! ```no_run
//! use craftgate::{AuthConfig, Authority, Requirements};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AuthConfig::from_env()?;
//! let authority = Authority::from_config(&config).await?;
//!
//! let claims = authority
//!     .verify("…token…", &Requirements::permissions(vec!["create:server"]))
//!     .await?;
//!
//! println!("hello, {}", claims.subject().unwrap_or("anonymous"));
//! # Ok(())
//! # }
//! ```
//!
//! Failures carry the HTTP status and stable error code the API
//! reports to callers; see [`VerifyError`] and [`ErrorResponse`].

#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

mod authority;
pub mod clock;
mod config;
pub mod error;
pub mod jwa;
pub mod jwk;
mod jwks;
pub mod jwt;
pub mod scope;


pub use authority::Authority;
pub use config::AuthConfig;
pub use error::{ErrorResponse, VerifyError};
pub use jwk::Jwk;
pub use jwks::Jwks;
pub use jwt::{Audience, ClaimSet, Issuer, TokenValidator};
pub use scope::Requirements;
