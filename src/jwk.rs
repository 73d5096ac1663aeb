//! JSON Web Keys as published by the identity provider
//!
//! Only the key shapes the provider actually publishes are modeled:
//! RSA public keys (`kty: "RSA"`) for asymmetric verification and
//! symmetric secrets (`kty: "oct"`) for HMAC. Anything else in a key
//! set is skipped during deserialization.

use std::{convert::TryFrom, fmt};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::{InvalidReason, SigningError, UnknownAlgorithm, VerifyError};
use crate::jwa::Algorithm;

/// An identifier for a key within a key set
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct KeyId(String);

impl KeyId {
    /// Wraps the given identifier
    pub fn new(kid: impl Into<String>) -> Self {
        Self(kid.into())
    }

    /// The identifier as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&'_ str> for KeyId {
    fn from(kid: &str) -> Self {
        Self(kid.to_string())
    }
}

impl From<String> for KeyId {
    fn from(kid: String) -> Self {
        Self(kid)
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The intended usage of a key, per RFC 7517 §4.2
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Usage {
    /// The key may be used for signing
    #[serde(rename = "sig")]
    Signing,
    /// The key may be used for encryption
    #[serde(rename = "enc")]
    Encryption,
}

/// A key was not usable as a verification key
#[derive(Debug, Error)]
pub enum InvalidJwk {
    /// The `kty` member names an unsupported key type
    #[error("unsupported key type '{0}'")]
    UnsupportedKeyType(String),

    /// A key component required by the key type is absent
    #[error("missing key component '{0}'")]
    MissingComponent(&'static str),

    /// A key component was not valid base64url
    #[error("invalid base64url in key component '{0}'")]
    MalformedComponent(&'static str),

    /// The `alg` member names an unsupported algorithm
    #[error(transparent)]
    UnknownAlgorithm(#[from] UnknownAlgorithm),
}

#[derive(Clone, PartialEq, Eq)]
enum Key {
    Rsa { modulus: Vec<u8>, exponent: Vec<u8> },
    Hmac { secret: Vec<u8> },
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Rsa { .. } => f.write_str("Rsa { modulus, exponent }"),
            Self::Hmac { .. } => f.write_str("Hmac { secret }"),
        }
    }
}

/// A single verification key from the provider's key set
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(try_from = "JwkDto")]
pub struct Jwk {
    kid: Option<KeyId>,
    usage: Option<Usage>,
    alg: Option<Algorithm>,
    key: Key,
}

impl Jwk {
    /// Constructs an RSA public key from its raw modulus and exponent
    pub fn rsa(modulus: Vec<u8>, exponent: Vec<u8>) -> Self {
        Self {
            kid: None,
            usage: None,
            alg: None,
            key: Key::Rsa { modulus, exponent },
        }
    }

    /// Constructs a symmetric key from a raw HMAC secret
    pub fn hmac(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            kid: None,
            usage: None,
            alg: None,
            key: Key::Hmac {
                secret: secret.into(),
            },
        }
    }

    /// Assigns a key identifier
    #[must_use]
    pub fn with_key_id(mut self, kid: impl Into<KeyId>) -> Self {
        self.kid = Some(kid.into());
        self
    }

    /// Restricts the key to a single algorithm
    #[must_use]
    pub fn with_algorithm(mut self, alg: Algorithm) -> Self {
        self.alg = Some(alg);
        self
    }

    /// Declares the key's intended usage
    #[must_use]
    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = Some(usage);
        self
    }

    /// The key's identifier, if it has one
    #[must_use]
    pub fn key_id(&self) -> Option<&KeyId> {
        self.kid.as_ref()
    }

    /// The algorithm the key is restricted to, if restricted
    #[must_use]
    pub fn algorithm(&self) -> Option<Algorithm> {
        self.alg
    }

    /// Whether this key can verify signatures made with `alg`
    ///
    /// A key restricted to a different algorithm or declared for
    /// encryption use is never compatible.
    #[must_use]
    pub fn supports(&self, alg: Algorithm) -> bool {
        if self.usage == Some(Usage::Encryption) {
            return false;
        }

        if let Some(key_alg) = self.alg {
            if key_alg != alg {
                return false;
            }
        }

        match self.key {
            Key::Rsa { .. } => !alg.is_symmetric(),
            Key::Hmac { .. } => alg.is_symmetric(),
        }
    }

    /// Verifies `signature` over `message` using the given algorithm
    ///
    /// # Errors
    ///
    /// Fails with an algorithm rejection if the key cannot be used
    /// with `alg`, or a signature rejection if verification fails.
    pub fn verify(
        &self,
        alg: Algorithm,
        message: &[u8],
        signature: &[u8],
    ) -> Result<(), VerifyError> {
        if !self.supports(alg) {
            return Err(VerifyError::TokenInvalid(InvalidReason::Algorithm));
        }

        match &self.key {
            Key::Rsa { modulus, exponent } => {
                let params = alg
                    .rsa_verification_params()
                    .ok_or(VerifyError::TokenInvalid(InvalidReason::Algorithm))?;

                let components = ring::signature::RsaPublicKeyComponents {
                    n: modulus.as_slice(),
                    e: exponent.as_slice(),
                };

                components
                    .verify(params, message, signature)
                    .map_err(|_| VerifyError::TokenInvalid(InvalidReason::Signature))
            }
            Key::Hmac { secret } => {
                let hmac_alg = alg
                    .hmac_algorithm()
                    .ok_or(VerifyError::TokenInvalid(InvalidReason::Algorithm))?;

                let key = ring::hmac::Key::new(hmac_alg, secret);
                ring::hmac::verify(&key, message, signature)
                    .map_err(|_| VerifyError::TokenInvalid(InvalidReason::Signature))
            }
        }
    }

    /// Signs `message` with the given algorithm
    ///
    /// Only symmetric keys can produce signatures; the provider holds
    /// the private half of its RSA keys.
    ///
    /// # Errors
    ///
    /// Fails if the key is asymmetric or incompatible with `alg`.
    pub fn sign(&self, alg: Algorithm, message: &[u8]) -> Result<Vec<u8>, SigningError> {
        match &self.key {
            Key::Hmac { secret } => {
                let hmac_alg = alg
                    .hmac_algorithm()
                    .ok_or(SigningError::IncompatibleAlgorithm(alg))?;

                let key = ring::hmac::Key::new(hmac_alg, secret);
                let digest = ring::hmac::sign(&key, message);
                Ok(digest.as_ref().to_owned())
            }
            Key::Rsa { .. } => Err(SigningError::MissingPrivateKey),
        }
    }
}

#[derive(Debug, Deserialize)]
struct JwkDto {
    kty: String,
    #[serde(default)]
    kid: Option<KeyId>,
    #[serde(rename = "use", default)]
    usage: Option<Usage>,
    #[serde(default)]
    alg: Option<String>,
    #[serde(default)]
    n: Option<String>,
    #[serde(default)]
    e: Option<String>,
    #[serde(default)]
    k: Option<String>,
}

fn decode_component(
    value: Option<String>,
    name: &'static str,
) -> Result<Vec<u8>, InvalidJwk> {
    let value = value.ok_or(InvalidJwk::MissingComponent(name))?;
    URL_SAFE_NO_PAD
        .decode(value)
        .map_err(|_| InvalidJwk::MalformedComponent(name))
}

impl TryFrom<JwkDto> for Jwk {
    type Error = InvalidJwk;

    fn try_from(dto: JwkDto) -> Result<Self, Self::Error> {
        let alg = dto.alg.as_deref().map(Algorithm::try_from).transpose()?;

        let key = match dto.kty.as_str() {
            "RSA" => Key::Rsa {
                modulus: decode_component(dto.n, "n")?,
                exponent: decode_component(dto.e, "e")?,
            },
            "oct" => Key::Hmac {
                secret: decode_component(dto.k, "k")?,
            },
            other => return Err(InvalidJwk::UnsupportedKeyType(other.to_string())),
        };

        Ok(Self {
            kid: dto.kid,
            usage: dto.usage,
            alg,
            key,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_rsa_key() {
        let jwk: Jwk = serde_json::from_value(serde_json::json!({
            "kty": "RSA",
            "kid": "key-1",
            "use": "sig",
            "alg": "RS256",
            "n": "qw",
            "e": "AQAB"
        }))
        .unwrap();

        assert_eq!(jwk.key_id().map(KeyId::as_str), Some("key-1"));
        assert_eq!(jwk.algorithm(), Some(Algorithm::RS256));
        assert!(jwk.supports(Algorithm::RS256));
        assert!(!jwk.supports(Algorithm::RS384));
        assert!(!jwk.supports(Algorithm::HS256));
    }

    #[test]
    fn rejects_unsupported_key_type() {
        let jwk: Result<Jwk, _> = serde_json::from_value(serde_json::json!({
            "kty": "EC",
            "crv": "P-256"
        }));

        assert!(jwk.is_err());
    }

    #[test]
    fn encryption_keys_never_verify() {
        let jwk = Jwk::hmac(b"secret".to_vec()).with_usage(Usage::Encryption);
        assert!(!jwk.supports(Algorithm::HS256));
    }

    #[test]
    fn hmac_round_trip() {
        let jwk = Jwk::hmac(b"test".to_vec());
        let sig = jwk.sign(Algorithm::HS256, b"message").unwrap();
        jwk.verify(Algorithm::HS256, b"message", &sig).unwrap();

        let err = jwk.verify(Algorithm::HS256, b"tampered", &sig).unwrap_err();
        assert_eq!(err.invalid_reason(), Some(InvalidReason::Signature));
    }

    #[test]
    fn rsa_keys_cannot_sign() {
        let jwk = Jwk::rsa(vec![0; 256], vec![1, 0, 1]);
        assert!(matches!(
            jwk.sign(Algorithm::RS256, b"message"),
            Err(SigningError::MissingPrivateKey)
        ));
    }
}
