//! Signing algorithms usable with the identity provider's keys
//!
//! Auth0 signs API tokens with RS256 by default. HMAC variants are
//! supported for symmetric deployments and for minting tokens under
//! test.

use std::{convert::TryFrom, fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::UnknownAlgorithm;

/// A JSON Web Signature algorithm
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, Serialize, Deserialize)]
#[allow(clippy::upper_case_acronyms)]
#[non_exhaustive]
pub enum Algorithm {
    /// HMAC using SHA-256
    HS256,
    /// HMAC using SHA-384
    HS384,
    /// HMAC using SHA-512
    HS512,
    /// RSA PKCS 1.5 using SHA-256
    RS256,
    /// RSA PKCS 1.5 using SHA-384
    RS384,
    /// RSA PKCS 1.5 using SHA-512
    RS512,
}

impl Algorithm {
    /// Whether the algorithm uses a symmetric (shared) secret
    #[must_use]
    pub fn is_symmetric(self) -> bool {
        matches!(self, Self::HS256 | Self::HS384 | Self::HS512)
    }

    pub(crate) fn hmac_algorithm(self) -> Option<ring::hmac::Algorithm> {
        match self {
            Self::HS256 => Some(ring::hmac::HMAC_SHA256),
            Self::HS384 => Some(ring::hmac::HMAC_SHA384),
            Self::HS512 => Some(ring::hmac::HMAC_SHA512),
            _ => None,
        }
    }

    pub(crate) fn rsa_verification_params(
        self,
    ) -> Option<&'static ring::signature::RsaParameters> {
        match self {
            Self::RS256 => Some(&ring::signature::RSA_PKCS1_2048_8192_SHA256),
            Self::RS384 => Some(&ring::signature::RSA_PKCS1_2048_8192_SHA384),
            Self::RS512 => Some(&ring::signature::RSA_PKCS1_2048_8192_SHA512),
            _ => None,
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::HS256 => "HS256",
            Self::HS384 => "HS384",
            Self::HS512 => "HS512",
            Self::RS256 => "RS256",
            Self::RS384 => "RS384",
            Self::RS512 => "RS512",
        };

        f.write_str(s)
    }
}

impl TryFrom<&'_ str> for Algorithm {
    type Error = UnknownAlgorithm;

    #[inline]
    fn try_from(value: &'_ str) -> Result<Self, Self::Error> {
        match value {
            "HS256" => Ok(Self::HS256),
            "HS384" => Ok(Self::HS384),
            "HS512" => Ok(Self::HS512),
            "RS256" => Ok(Self::RS256),
            "RS384" => Ok(Self::RS384),
            "RS512" => Ok(Self::RS512),
            _ => Err(UnknownAlgorithm(value.to_string())),
        }
    }
}

impl FromStr for Algorithm {
    type Err = UnknownAlgorithm;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::try_from(s)
    }
}
