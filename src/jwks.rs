//! The provider's published key set

use serde::{Deserialize, Deserializer};

use crate::jwa::Algorithm;
use crate::jwk::{Jwk, KeyId};

/// A JSON Web Key Set (JWKS)
///
/// Deserialization is lenient: entries with unsupported key types or
/// algorithms are dropped with a warning rather than failing the
/// whole set, since providers routinely publish keys this consumer
/// has no use for.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct Jwks {
    #[serde(deserialize_with = "deserialize_keys", default)]
    keys: Vec<Jwk>,
}

impl Jwks {
    /// Adds a key to the set
    pub fn add_key(&mut self, key: Jwk) {
        self.keys.push(key);
    }

    /// A view of the keys in this set
    #[must_use]
    pub fn keys(&self) -> &[Jwk] {
        &self.keys
    }

    /// Finds the key to verify a token with the given key id and
    /// algorithm
    ///
    /// When a key id is provided, an exact match is preferred; a key
    /// published without an id may be used only if no key carries the
    /// requested id. Without a key id, the first compatible key wins.
    #[must_use]
    pub fn get_key(&self, kid: Option<&KeyId>, alg: Algorithm) -> Option<&Jwk> {
        match kid {
            Some(kid) => self
                .keys
                .iter()
                .find(|k| k.supports(alg) && k.key_id() == Some(kid))
                .or_else(|| {
                    self.keys
                        .iter()
                        .find(|k| k.supports(alg) && k.key_id().is_none())
                }),
            None => self.keys.iter().find(|k| k.supports(alg)),
        }
    }
}

fn deserialize_keys<'de, D>(deserializer: D) -> Result<Vec<Jwk>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum MaybeJwk {
        Jwk(Jwk),
        Unknown(serde_json::Value),
    }

    let keys = Vec::<MaybeJwk>::deserialize(deserializer)?;

    Ok(keys
        .into_iter()
        .enumerate()
        .filter_map(|(idx, key)| match key {
            MaybeJwk::Jwk(jwk) => Some(jwk),
            MaybeJwk::Unknown(value) => {
                tracing::warn!(
                    jwks.idx = idx,
                    jwk.kid = ?value.get("kid"),
                    jwk.kty = ?value.get("kty"),
                    "ignoring unrecognized JWK"
                );
                None
            }
        })
        .collect())
}
