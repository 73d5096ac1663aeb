//! Provider settings sourced from the environment
//!
//! Settings are read from `AUTH0_`-prefixed environment variables,
//! matching the deployment surface of the API this crate guards:
//! `AUTH0_DOMAIN`, `AUTH0_API_AUDIENCE`, `AUTH0_ISSUER`, and
//! optionally `AUTH0_ALGORITHMS`.

use figment::{providers::Env, Figment};
use serde::{Deserialize, Serialize};

use crate::jwa::Algorithm;
use crate::jwt::{Audience, Issuer, TokenValidator};

/// Settings identifying the token issuer this service trusts
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthConfig {
    /// The provider tenant domain, e.g. `tenant.us.auth0.com`
    pub domain: String,

    /// The audience tokens must be minted for
    pub api_audience: String,

    /// The expected `iss` claim, usually `https://{domain}/`
    pub issuer: String,

    /// The signature algorithms accepted from this issuer
    #[serde(default = "default_algorithms")]
    pub algorithms: Vec<Algorithm>,
}

fn default_algorithms() -> Vec<Algorithm> {
    vec![Algorithm::RS256]
}

impl AuthConfig {
    /// Loads settings from `AUTH0_`-prefixed environment variables
    ///
    /// # Errors
    ///
    /// Fails when a required variable is unset or a value cannot be
    /// parsed.
    pub fn from_env() -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Env::prefixed("AUTH0_"))
            .extract()
    }

    /// The well-known JWKS endpoint for this tenant
    #[must_use]
    pub fn jwks_url(&self) -> String {
        format!("https://{}/.well-known/jwks.json", self.domain)
    }

    /// Builds the validator enforcing this issuer's expectations
    pub fn validator(&self) -> TokenValidator {
        TokenValidator::default()
            .extend_approved_algorithms(self.algorithms.iter().copied())
            .require_issuer(Issuer::new(self.issuer.as_str()))
            .add_allowed_audience(Audience::new(self.api_audience.as_str()))
    }
}
