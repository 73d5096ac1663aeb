//! Verification errors and their HTTP-facing shape
//!
//! Every failure the verification core can produce is folded into
//! [`VerifyError`]. The collaborating HTTP layer maps an error to a
//! response through [`VerifyError::status_code()`] and
//! [`ErrorResponse`]; nothing in this crate escapes uncaught.

use std::{error::Error as StdError, fmt};

use serde::Serialize;
use thiserror::Error;

/// The provided name could not be matched with supported algorithms
#[derive(Debug, Error)]
#[error("'{0}' does not match supported algorithms")]
pub struct UnknownAlgorithm(pub(crate) String);

/// An error occurring while creating a signature
#[derive(Debug, Error)]
pub enum SigningError {
    /// The key cannot be used with the requested algorithm
    #[error("key incompatible with algorithm '{0}'")]
    IncompatibleAlgorithm(crate::jwa::Algorithm),

    /// The key holds no private material usable for signing
    #[error("cannot sign without a private key")]
    MissingPrivateKey,
}

/// The reason a structurally sound token was rejected
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum InvalidReason {
    /// The signature does not match the resolved key
    Signature,
    /// The token is expired according to the `exp` claim
    Expired,
    /// The token is not yet valid according to the `nbf` claim
    NotYetValid,
    /// The `iss` claim does not equal the expected issuer
    IssuerMismatch,
    /// No audience in the `aud` claim is an allowed audience
    AudienceMismatch,
    /// The token's algorithm is not an approved algorithm
    Algorithm,
    /// A standard claim required by the validator is absent
    MissingStandardClaim(&'static str),
}

impl InvalidReason {
    pub(crate) fn code(self) -> &'static str {
        match self {
            Self::Signature => "invalid_signature",
            Self::Expired => "token_expired",
            Self::NotYetValid => "token_not_yet_valid",
            Self::IssuerMismatch => "invalid_issuer",
            Self::AudienceMismatch => "invalid_audience",
            Self::Algorithm => "invalid_algorithm",
            Self::MissingStandardClaim(_) => "missing_claim",
        }
    }
}

impl fmt::Display for InvalidReason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Signature => f.write_str("signature mismatch"),
            Self::Expired => f.write_str("token expired"),
            Self::NotYetValid => f.write_str("token not yet valid"),
            Self::IssuerMismatch => f.write_str("issuer mismatch"),
            Self::AudienceMismatch => f.write_str("audience mismatch"),
            Self::Algorithm => f.write_str("algorithm not approved"),
            Self::MissingStandardClaim(claim) => write!(f, "required '{}' claim missing", claim),
        }
    }
}

/// An error produced while verifying a bearer token
#[derive(Debug, Error)]
pub enum VerifyError {
    /// The signing key set could not be fetched or parsed
    #[error("unable to fetch signing keys")]
    KeyFetch(#[source] Box<dyn StdError + Send + Sync + 'static>),

    /// No key in the current key set matches the token's key id
    /// and algorithm
    #[error("no matching key found to validate token")]
    KeyNotFound,

    /// The token is structurally malformed
    #[error("malformed token")]
    Decode(#[source] Box<dyn StdError + Send + Sync + 'static>),

    /// The token failed signature or standard claim validation
    #[error("token rejected: {0}")]
    TokenInvalid(InvalidReason),

    /// A claim required for authorization is absent or has the
    /// wrong shape
    #[error("no claim '{claim}' found in token")]
    MissingClaim {
        /// The name of the absent claim
        claim: &'static str,
    },

    /// A claim is present but does not grant a required value
    #[error("insufficient {claim} ({value}); access to this resource is denied")]
    InsufficientClaim {
        /// The name of the deficient claim
        claim: &'static str,
        /// The first required value not granted by the token
        value: String,
    },
}

pub(crate) fn key_fetch(
    source: impl Into<Box<dyn StdError + Send + Sync + 'static>>,
) -> VerifyError {
    VerifyError::KeyFetch(source.into())
}

pub(crate) fn decode(source: impl Into<Box<dyn StdError + Send + Sync + 'static>>) -> VerifyError {
    VerifyError::Decode(source.into())
}

impl VerifyError {
    /// The HTTP status classification for this error
    ///
    /// Malformed tokens and missing claims are client errors (400),
    /// insufficient authorization is forbidden (403), all other
    /// verification failures are unauthorized (401). A failure to
    /// reach the key endpoint is the only server-side error (503).
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::KeyFetch(_) => 503,
            Self::KeyNotFound | Self::TokenInvalid(_) => 401,
            Self::Decode(_) | Self::MissingClaim { .. } => 400,
            Self::InsufficientClaim { .. } => 403,
        }
    }

    /// A stable machine-readable code for this error
    #[must_use]
    pub fn error_code(&self) -> String {
        match self {
            Self::KeyFetch(_) => "key_fetch_failed".to_string(),
            Self::KeyNotFound => "unknown_key".to_string(),
            Self::Decode(_) => "malformed_token".to_string(),
            Self::TokenInvalid(reason) => reason.code().to_string(),
            Self::MissingClaim { claim } => format!("missing_{}", claim),
            Self::InsufficientClaim { claim, .. } => format!("insufficient_{}", claim),
        }
    }

    /// The reason the token was rejected, if rejected by the core
    /// validator
    #[must_use]
    pub fn invalid_reason(&self) -> Option<InvalidReason> {
        match self {
            Self::TokenInvalid(reason) => Some(*reason),
            _ => None,
        }
    }
}

/// The serializable body the HTTP collaborator returns for a denial
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ErrorResponse {
    /// Always `"error"`
    pub status: &'static str,
    /// HTTP status classification (400, 401, 403, or 503)
    pub status_code: u16,
    /// Stable machine-readable code, e.g. `insufficient_scope`
    pub code: String,
    /// Human-readable message
    pub msg: String,
}

impl From<&VerifyError> for ErrorResponse {
    fn from(err: &VerifyError) -> Self {
        Self {
            status: "error",
            status_code: err.status_code(),
            code: err.error_code(),
            msg: err.to_string(),
        }
    }
}

impl From<VerifyError> for ErrorResponse {
    fn from(err: VerifyError) -> Self {
        Self::from(&err)
    }
}
