//! The verification authority
//!
//! [`Authority`] owns the cached signing key set and composes key
//! resolution, token verification, and claim authorization behind a
//! single [`verify`][Authority::verify] call. It is cheap to clone
//! and safe to share across request-handling tasks; the key cache is
//! the only shared mutable state and is swapped atomically.

use std::{sync::Arc, time::Duration};

use arc_swap::ArcSwap;
use reqwest::{
    header::{self, HeaderValue},
    Client, StatusCode,
};

use crate::clock::{Clock, System, UnixTime};
use crate::config::AuthConfig;
use crate::error::{self, VerifyError};
use crate::jwks::Jwks;
use crate::jwt::{self, ClaimSet, TokenValidator};
use crate::scope::{self, Requirements};

/// Bound on any single fetch of the provider's key set
const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug)]
struct CachedKeys {
    jwks: Jwks,
    etag: Option<HeaderValue>,
    last_modified: Option<HeaderValue>,
    fetched_at: UnixTime,
}

impl CachedKeys {
    fn new(jwks: Jwks) -> Self {
        Self {
            jwks,
            etag: None,
            last_modified: None,
            fetched_at: System.now(),
        }
    }
}

#[derive(Debug)]
struct RemoteJwks {
    jwks_url: String,
    client: Client,
}

#[derive(Debug)]
struct Inner {
    data: ArcSwap<CachedKeys>,
    remote: Option<RemoteJwks>,
    validator: TokenValidator,
}

/// A token-verification authority backed by a (possibly remote) key set
#[derive(Debug, Clone)]
#[must_use]
pub struct Authority {
    inner: Arc<Inner>,
}

impl Authority {
    /// Constructs an authority over an already-held key set
    ///
    /// No network activity will ever occur; a key id absent from
    /// `jwks` simply fails resolution.
    pub fn new(jwks: Jwks, validator: TokenValidator) -> Self {
        Self {
            inner: Arc::new(Inner {
                data: ArcSwap::from_pointee(CachedKeys::new(jwks)),
                remote: None,
                validator,
            }),
        }
    }

    /// Constructs an authority by fetching the key set from a URL
    ///
    /// # Errors
    ///
    /// Fails with a key-fetch error if the endpoint cannot be
    /// reached within the timeout or returns a malformed key set.
    pub async fn from_url(
        jwks_url: String,
        validator: TokenValidator,
    ) -> Result<Self, VerifyError> {
        let client = Client::builder()
            .user_agent(concat!("craftgate/", env!("CARGO_PKG_VERSION")))
            .timeout(FETCH_TIMEOUT)
            .build()
            .map_err(error::key_fetch)?;

        let response = client
            .get(&jwks_url)
            .send()
            .await
            .map_err(error::key_fetch)?;

        if let Err(err) = response.error_for_status_ref() {
            return Err(error::key_fetch(err));
        }

        let etag = response.headers().get(header::ETAG).map(ToOwned::to_owned);
        let last_modified = response
            .headers()
            .get(header::LAST_MODIFIED)
            .map(ToOwned::to_owned);
        let jwks = response.json::<Jwks>().await.map_err(error::key_fetch)?;

        tracing::info!(jwks.url = %jwks_url, "signing keys fetched");

        let data = CachedKeys {
            jwks,
            etag,
            last_modified,
            fetched_at: System.now(),
        };

        Ok(Self {
            inner: Arc::new(Inner {
                data: ArcSwap::from_pointee(data),
                remote: Some(RemoteJwks { jwks_url, client }),
                validator,
            }),
        })
    }

    /// Constructs an authority from provider settings
    ///
    /// The key set is fetched from the provider's well-known JWKS
    /// endpoint and the validator is built from the configured
    /// issuer, audience, and algorithms.
    ///
    /// # Errors
    ///
    /// See [`from_url`][Self::from_url].
    pub async fn from_config(config: &AuthConfig) -> Result<Self, VerifyError> {
        Self::from_url(config.jwks_url(), config.validator()).await
    }

    /// Spawns a background task refreshing the key set on a fixed
    /// interval
    ///
    /// Refresh failures are ignored until the next tick.
    pub fn spawn_refresh(&self, interval: Duration) {
        let this = self.clone();

        tokio::spawn(async move {
            let mut timer = tokio::time::interval(interval);
            timer.tick().await;

            loop {
                timer.tick().await;
                let _ = this.refresh().await;
            }
        });
    }

    /// Refreshes the key set from the remote endpoint
    ///
    /// Sends conditional headers when the previous response carried
    /// an `ETag` or `Last-Modified`. On any failure the currently
    /// cached keys are left untouched. An authority without a remote
    /// source refreshes to itself trivially.
    ///
    /// # Errors
    ///
    /// Fails with a key-fetch error if the endpoint cannot be
    /// reached or returns a malformed key set.
    #[tracing::instrument(skip(self), fields(jwks.url = tracing::field::Empty))]
    pub async fn refresh(&self) -> Result<(), VerifyError> {
        let remote = match &self.inner.remote {
            Some(remote) => remote,
            None => return Ok(()),
        };

        let span = tracing::Span::current();
        span.record("jwks.url", remote.jwks_url.as_str());
        tracing::debug!("refreshing signing keys");

        let mut request = remote.client.get(&remote.jwks_url);

        {
            let data = self.inner.data.load();
            if let Some(etag) = &data.etag {
                request = request.header(header::IF_NONE_MATCH, etag);
            } else if let Some(last_modified) = &data.last_modified {
                request = request.header(header::IF_MODIFIED_SINCE, last_modified);
            }
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(err) => {
                let error: &dyn std::error::Error = &err;
                tracing::warn!(error, "key refresh failed; key endpoint unreachable");
                return Err(error::key_fetch(err));
            }
        };

        if response.status() == StatusCode::NOT_MODIFIED {
            tracing::debug!("signing keys not modified");
            return Ok(());
        }

        if let Err(err) = response.error_for_status_ref() {
            tracing::warn!(
                http.status_code = response.status().as_u16(),
                "key refresh failed; unexpected response status",
            );
            return Err(error::key_fetch(err));
        }

        let etag = response.headers().get(header::ETAG).map(ToOwned::to_owned);
        let last_modified = response
            .headers()
            .get(header::LAST_MODIFIED)
            .map(ToOwned::to_owned);

        match response.json::<Jwks>().await {
            Ok(jwks) => {
                let data = Arc::new(CachedKeys {
                    jwks,
                    etag,
                    last_modified,
                    fetched_at: System.now(),
                });

                self.inner.data.store(data);
                tracing::info!("signing keys refreshed");
                Ok(())
            }
            Err(err) => {
                let error: &dyn std::error::Error = &err;
                tracing::warn!(error, "key refresh failed; malformed key set");
                Err(error::key_fetch(err))
            }
        }
    }

    /// Replaces the cached key set
    pub fn set_jwks(&self, jwks: Jwks) {
        self.inner.data.store(Arc::new(CachedKeys::new(jwks)));
    }

    /// The time the cached key set was last fetched or installed
    #[must_use]
    pub fn keys_fetched_at(&self) -> UnixTime {
        self.inner.data.load().fetched_at
    }

    /// Verifies a bearer token and authorizes it against the
    /// requirements
    ///
    /// Stages run in order: decompose, resolve key, verify signature
    /// and standard claims, check scopes, check permissions. The
    /// first failing stage is returned and no later stage runs. A
    /// key id not found in the cached set triggers one refresh of a
    /// remote key set before failing, covering provider key
    /// rotation.
    ///
    /// # Errors
    ///
    /// Any stage's failure, as a [`VerifyError`].
    pub async fn verify(
        &self,
        token: &str,
        requirements: &Requirements,
    ) -> Result<ClaimSet, VerifyError> {
        self.verify_with_clock(token, requirements, &System).await
    }

    /// Verifies a bearer token, telling time with the provided clock
    ///
    /// # Errors
    ///
    /// See [`verify`][Self::verify].
    pub async fn verify_with_clock<C: Clock + Sync>(
        &self,
        token: &str,
        requirements: &Requirements,
        clock: &C,
    ) -> Result<ClaimSet, VerifyError> {
        let decomposed = jwt::decompose(token)?;

        let claims = match self.verify_against_cache(&decomposed, clock) {
            Ok(claims) => claims,
            Err(VerifyError::KeyNotFound) if self.inner.remote.is_some() => {
                // The token may reference a key rotated in after our
                // last fetch.
                self.refresh().await?;
                self.verify_against_cache(&decomposed, clock)?
            }
            Err(err) => return Err(err),
        };

        scope::check(&claims, requirements)?;

        Ok(claims)
    }

    fn verify_against_cache<C: Clock>(
        &self,
        decomposed: &jwt::Decomposed<'_>,
        clock: &C,
    ) -> Result<ClaimSet, VerifyError> {
        let guard = self.inner.data.load();
        let header = decomposed.header();

        let key = guard
            .jwks
            .get_key(header.key_id(), header.algorithm())
            .ok_or_else(|| {
                if let Some(kid) = header.key_id() {
                    tracing::debug!(kid = %kid, alg = %header.algorithm(), "no matching key");
                } else {
                    tracing::debug!(alg = %header.algorithm(), "no matching key");
                }
                VerifyError::KeyNotFound
            })?;

        decomposed.verify_with_clock(key, &self.inner.validator, clock)
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read as _, Write as _};
    use std::net::{TcpListener, TcpStream};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine as _;
    use color_eyre::Result;
    use serde_json::json;

    use super::*;
    use crate::clock::TestClock;
    use crate::error::ErrorResponse;
    use crate::jwa::Algorithm;
    use crate::jwk::Jwk;
    use crate::jwt::{Audience, Issuer};
    use crate::test;

    fn key() -> Jwk {
        Jwk::hmac(b"authority test secret".to_vec()).with_key_id("primary")
    }

    fn validator() -> TokenValidator {
        TokenValidator::default()
            .add_approved_algorithm(Algorithm::HS256)
            .require_issuer(Issuer::new("https://issuer.test/"))
            .add_allowed_audience(Audience::new("provisioning-api"))
    }

    fn authority() -> Authority {
        let mut jwks = Jwks::default();
        jwks.add_key(key());

        Authority::new(jwks, validator())
    }

    fn jwks_body(kid: &str) -> String {
        json!({
            "keys": [{
                "kty": "oct",
                "kid": kid,
                "k": URL_SAFE_NO_PAD.encode(b"authority test secret"),
            }]
        })
        .to_string()
    }

    fn read_request(stream: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];

        while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
            match stream.read(&mut chunk) {
                Ok(0) | Err(_) => break,
                Ok(n) => buf.extend_from_slice(&chunk[..n]),
            }
        }

        String::from_utf8_lossy(&buf).to_ascii_lowercase()
    }

    /// Serves each body once, in order, repeating the last; the
    /// listener closes after `max_requests` connections.
    fn serve_jwks(bodies: Vec<String>, max_requests: usize) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/jwks.json", listener.local_addr().unwrap());
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);

        thread::spawn(move || {
            for stream in listener.incoming().take(max_requests) {
                let mut stream = match stream {
                    Ok(stream) => stream,
                    Err(_) => break,
                };

                let _ = read_request(&mut stream);
                let served = counter.fetch_add(1, Ordering::SeqCst);
                let body = bodies
                    .get(served)
                    .or_else(|| bodies.last())
                    .cloned()
                    .unwrap_or_default();

                let response = format!(
                    "HTTP/1.1 200 OK\r\n\
                     Content-Type: application/json\r\n\
                     Content-Length: {}\r\n\
                     Connection: close\r\n\r\n{}",
                    body.len(),
                    body,
                );
                let _ = stream.write_all(response.as_bytes());
            }
        });

        (url, hits)
    }

    /// Serves the body with an `ETag`, answering 304 to any request
    /// presenting it back.
    fn serve_conditional_jwks(body: String) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/jwks.json", listener.local_addr().unwrap());
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);

        thread::spawn(move || {
            for stream in listener.incoming().take(4) {
                let mut stream = match stream {
                    Ok(stream) => stream,
                    Err(_) => break,
                };

                let request = read_request(&mut stream);
                counter.fetch_add(1, Ordering::SeqCst);

                let response = if request.contains("if-none-match: \"keys-v1\"") {
                    "HTTP/1.1 304 Not Modified\r\n\
                     ETag: \"keys-v1\"\r\n\
                     Content-Length: 0\r\n\
                     Connection: close\r\n\r\n"
                        .to_string()
                } else {
                    format!(
                        "HTTP/1.1 200 OK\r\n\
                         Content-Type: application/json\r\n\
                         ETag: \"keys-v1\"\r\n\
                         Content-Length: {}\r\n\
                         Connection: close\r\n\r\n{}",
                        body.len(),
                        body,
                    )
                };
                let _ = stream.write_all(response.as_bytes());
            }
        });

        (url, hits)
    }

    fn token(claims: serde_json::Value) -> String {
        test::mint_hmac(&key(), claims).unwrap()
    }

    const NOW: TestClock = TestClock::new(UnixTime(1_000));

    #[tokio::test]
    async fn verifies_and_authorizes_a_good_token() -> Result<()> {
        let auth = authority();
        let token = token(json!({
            "iss": "https://issuer.test/",
            "aud": "provisioning-api",
            "sub": "steve",
            "exp": 5_000,
            "scope": "read:data write:data",
            "permissions": ["create:server"]
        }));

        let requirements = Requirements::scopes(vec!["read:data"])
            .with_permission("create:server");

        let claims = auth.verify_with_clock(&token, &requirements, &NOW).await?;
        assert_eq!(claims.subject(), Some("steve"));
        Ok(())
    }

    #[tokio::test]
    async fn verification_is_idempotent() -> Result<()> {
        let auth = authority();
        let token = token(json!({
            "iss": "https://issuer.test/",
            "aud": "provisioning-api",
            "sub": "steve",
            "exp": 5_000
        }));

        let first = auth
            .verify_with_clock(&token, &Requirements::none(), &NOW)
            .await?;
        let second = auth
            .verify_with_clock(&token, &Requirements::none(), &NOW)
            .await?;

        assert_eq!(first, second);
        Ok(())
    }

    #[tokio::test]
    async fn unknown_key_id_fails_without_a_remote() {
        let auth = authority();
        let rotated = Jwk::hmac(b"authority test secret".to_vec()).with_key_id("rotated-out");
        let token = test::mint_hmac(
            &rotated,
            json!({
                "iss": "https://issuer.test/",
                "aud": "provisioning-api",
                "exp": 5_000
            }),
        )
        .unwrap();

        let err = auth
            .verify_with_clock(&token, &Requirements::none(), &NOW)
            .await
            .unwrap_err();

        assert!(matches!(err, VerifyError::KeyNotFound));
        assert_eq!(err.status_code(), 401);
    }

    #[tokio::test]
    async fn insufficient_scope_maps_to_forbidden() {
        let auth = authority();
        let token = token(json!({
            "iss": "https://issuer.test/",
            "aud": "provisioning-api",
            "exp": 5_000,
            "scope": "read:data write:data"
        }));

        let err = auth
            .verify_with_clock(&token, &Requirements::scopes(vec!["admin"]), &NOW)
            .await
            .unwrap_err();

        let body = ErrorResponse::from(&err);
        assert_eq!(body.status_code, 403);
        assert_eq!(body.code, "insufficient_scope");
        assert!(body.msg.contains("admin"));
    }

    #[tokio::test]
    async fn missing_permissions_maps_to_bad_request() {
        let auth = authority();
        let token = token(json!({
            "iss": "https://issuer.test/",
            "aud": "provisioning-api",
            "exp": 5_000,
            "scope": "read:data"
        }));

        let err = auth
            .verify_with_clock(
                &token,
                &Requirements::permissions(vec!["admin:all"]),
                &NOW,
            )
            .await
            .unwrap_err();

        let body = ErrorResponse::from(&err);
        assert_eq!(body.status_code, 400);
        assert_eq!(body.code, "missing_permissions");
    }

    #[tokio::test]
    async fn malformed_token_fails_before_key_resolution() {
        let auth = authority();

        let err = auth
            .verify_with_clock("garbage", &Requirements::none(), &NOW)
            .await
            .unwrap_err();

        assert!(matches!(err, VerifyError::Decode(_)));
        assert_eq!(err.status_code(), 400);
    }

    #[tokio::test]
    async fn bad_token_does_not_evict_cached_keys() -> Result<()> {
        let auth = authority();
        let fetched_at = auth.keys_fetched_at();

        let _ = auth
            .verify_with_clock("garbage", &Requirements::none(), &NOW)
            .await;

        assert_eq!(auth.keys_fetched_at(), fetched_at);

        let good = token(json!({
            "iss": "https://issuer.test/",
            "aud": "provisioning-api",
            "exp": 5_000
        }));
        auth.verify_with_clock(&good, &Requirements::none(), &NOW)
            .await?;
        Ok(())
    }

    #[tokio::test]
    async fn cached_key_is_reused_without_refetch() -> Result<()> {
        let (url, hits) = serve_jwks(vec![jwks_body("primary")], 4);
        let auth = Authority::from_url(url, validator()).await?;
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        let token = token(json!({
            "iss": "https://issuer.test/",
            "aud": "provisioning-api",
            "sub": "steve",
            "exp": 5_000
        }));

        auth.verify_with_clock(&token, &Requirements::none(), &NOW)
            .await?;
        auth.verify_with_clock(&token, &Requirements::none(), &NOW)
            .await?;

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[tokio::test]
    async fn unknown_key_id_triggers_one_refetch() -> Result<()> {
        let (url, hits) = serve_jwks(vec![jwks_body("old"), jwks_body("primary")], 4);
        let auth = Authority::from_url(url, validator()).await?;
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        // Signed with a key rotated in after the initial fetch
        let token = token(json!({
            "iss": "https://issuer.test/",
            "aud": "provisioning-api",
            "sub": "steve",
            "exp": 5_000
        }));

        let claims = auth
            .verify_with_clock(&token, &Requirements::none(), &NOW)
            .await?;
        assert_eq!(claims.subject(), Some("steve"));
        assert_eq!(hits.load(Ordering::SeqCst), 2);

        auth.verify_with_clock(&token, &Requirements::none(), &NOW)
            .await?;
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        Ok(())
    }

    #[tokio::test]
    async fn refresh_short_circuits_on_not_modified() -> Result<()> {
        let (url, hits) = serve_conditional_jwks(jwks_body("primary"));
        let auth = Authority::from_url(url, validator()).await?;
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        auth.refresh().await?;
        assert_eq!(hits.load(Ordering::SeqCst), 2);

        // The 304 must leave the previously fetched keys in place
        let token = token(json!({
            "iss": "https://issuer.test/",
            "aud": "provisioning-api",
            "exp": 5_000
        }));
        auth.verify_with_clock(&token, &Requirements::none(), &NOW)
            .await?;
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        Ok(())
    }

    #[tokio::test]
    async fn refresh_failure_leaves_cache_usable() -> Result<()> {
        let (url, hits) = serve_jwks(vec![jwks_body("primary")], 1);
        let auth = Authority::from_url(url, validator()).await?;
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        // The listener is gone after the first request
        let err = auth.refresh().await.unwrap_err();
        assert!(matches!(err, VerifyError::KeyFetch(_)));
        assert_eq!(err.status_code(), 503);

        let token = token(json!({
            "iss": "https://issuer.test/",
            "aud": "provisioning-api",
            "exp": 5_000
        }));
        auth.verify_with_clock(&token, &Requirements::none(), &NOW)
            .await?;
        Ok(())
    }
}
