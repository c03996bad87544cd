//! Identity provider client: discovery, token endpoint grants, and ID token verification.
//!
//! The orchestrator only talks to the provider through [`TokenExchanger`] and
//! [`IdTokenVerifier`], so tests can swap in stubs. [`OidcProvider`] is the production
//! implementation of both, bound to one cluster's OAuth2 client.

use jsonwebtoken::{
    Algorithm, DecodingKey, Validation, decode, decode_header,
    jwk::{Jwk, JwkSet},
};
use reqwest::{Certificate, Client, header::ACCEPT};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::Value;
use std::{
    fmt,
    future::Future,
    pin::Pin,
    time::{Duration, SystemTime},
};
use tokio::sync::RwLock;
use tracing::{debug, instrument, warn};
use url::Url;

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

// Tokens this close to expiry are treated as expired.
const EXPIRY_DELTA: Duration = Duration::from_secs(10);

const MAX_ERROR_BODY: usize = 512;

pub type ProviderFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, ProviderError>> + Send + 'a>>;

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("provider request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("provider returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("discovery issuer mismatch: expected {expected}, got {found}")]
    IssuerMismatch { expected: String, found: String },
    #[error("invalid provider URL: {0}")]
    Url(#[from] url::ParseError),
    #[error("invalid CA certificate: {0}")]
    Certificate(#[source] reqwest::Error),
    #[error("token response has no id_token")]
    MissingIdToken,
    #[error("malformed id token: {0}")]
    MalformedIdToken(#[source] jsonwebtoken::errors::Error),
    #[error("unsupported id token signing algorithm: {0:?}")]
    UnsupportedAlgorithm(Algorithm),
    #[error("no signing key found for kid {0:?}")]
    UnknownKey(Option<String>),
    #[error("invalid signing key: {0}")]
    InvalidKey(#[source] jsonwebtoken::errors::Error),
    #[error("id token rejected: {0}")]
    Rejected(#[source] jsonwebtoken::errors::Error),
}

/// Token endpoint response.
#[derive(Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    id_token: Option<String>,
}

impl TokenResponse {
    #[must_use]
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            token_type: Some("Bearer".to_string()),
            refresh_token: None,
            expires_in: None,
            id_token: None,
        }
    }

    #[must_use]
    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self
    }

    #[must_use]
    pub fn with_id_token(mut self, id_token: impl Into<String>) -> Self {
        self.id_token = Some(id_token.into());
        self
    }

    /// The signed ID token embedded in the response.
    ///
    /// # Errors
    /// Returns `ProviderError::MissingIdToken` if the field is absent or blank.
    pub fn id_token(&self) -> Result<&str, ProviderError> {
        self.id_token
            .as_deref()
            .filter(|token| !token.trim().is_empty())
            .ok_or(ProviderError::MissingIdToken)
    }
}

impl fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenResponse")
            .field("access_token", &"[REDACTED]")
            .field("token_type", &self.token_type)
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("expires_in", &self.expires_in)
            .field("id_token", &self.id_token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// A token already held by the caller. Token sources reuse it while it is valid and
/// fall back to a refresh grant otherwise.
pub struct HeldToken {
    access_token: Option<String>,
    refresh_token: SecretString,
    expires_at: SystemTime,
}

impl HeldToken {
    /// A token holding only a refresh token, already past its expiry, so any token
    /// source has to perform a refresh.
    #[must_use]
    pub fn expired(refresh_token: impl Into<String>) -> Self {
        let now = SystemTime::now();
        Self {
            access_token: None,
            refresh_token: SecretString::from(refresh_token.into()),
            expires_at: now.checked_sub(Duration::from_secs(60 * 60)).unwrap_or(now),
        }
    }

    #[must_use]
    pub fn new(access_token: String, refresh_token: String, expires_at: SystemTime) -> Self {
        Self {
            access_token: Some(access_token),
            refresh_token: SecretString::from(refresh_token),
            expires_at,
        }
    }

    #[must_use]
    pub fn refresh_token(&self) -> &str {
        self.refresh_token.expose_secret()
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        SystemTime::now() + EXPIRY_DELTA >= self.expires_at
    }

    /// The held token as a response, if it can still be used without a refresh.
    #[must_use]
    pub fn reusable(&self) -> Option<TokenResponse> {
        if self.is_expired() {
            return None;
        }
        let access_token = self.access_token.as_ref()?;
        Some(TokenResponse::new(access_token.clone()).with_refresh_token(self.refresh_token()))
    }
}

impl fmt::Debug for HeldToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeldToken")
            .field("access_token", &self.access_token.as_ref().map(|_| "[REDACTED]"))
            .field("refresh_token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

pub trait TokenExchanger: Send + Sync {
    /// Exchange an authorization code at the token endpoint.
    fn exchange_code<'a>(&'a self, code: &'a str) -> ProviderFuture<'a, TokenResponse>;

    /// Return a valid token for `held`, refreshing it if needed.
    fn token<'a>(&'a self, held: &'a HeldToken) -> ProviderFuture<'a, TokenResponse>;
}

pub trait IdTokenVerifier: Send + Sync {
    /// Check signature, issuer, audience and expiry; return the claim set.
    fn verify<'a>(&'a self, raw_id_token: &'a str) -> ProviderFuture<'a, Value>;
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderMetadata {
    pub issuer: String,
    pub authorization_endpoint: Url,
    pub token_endpoint: Url,
    pub jwks_uri: Url,
}

pub struct OidcProvider {
    http: Client,
    metadata: ProviderMetadata,
    client_id: String,
    client_secret: SecretString,
    redirect_uri: String,
    keys: RwLock<JwkSet>,
}

impl fmt::Debug for OidcProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OidcProvider")
            .field("issuer", &self.metadata.issuer)
            .field("client_id", &self.client_id)
            .field("redirect_uri", &self.redirect_uri)
            .finish_non_exhaustive()
    }
}

/// Build the HTTP client used to reach the identity provider.
///
/// # Errors
/// Returns an error if `ca_pem` is not a valid PEM certificate or the client cannot be built.
pub fn http_client(ca_pem: Option<&str>) -> Result<Client, ProviderError> {
    let mut builder = Client::builder()
        .user_agent(crate::APP_USER_AGENT)
        .timeout(HTTP_TIMEOUT);

    if let Some(pem) = ca_pem {
        let certificate =
            Certificate::from_pem(pem.as_bytes()).map_err(ProviderError::Certificate)?;
        builder = builder.add_root_certificate(certificate);
    }

    Ok(builder.build()?)
}

impl OidcProvider {
    /// Run OIDC discovery for `issuer` and load its signing keys.
    ///
    /// # Errors
    /// Returns an error if discovery or the JWKS fetch fails, or the discovered issuer
    /// differs from `issuer`.
    #[instrument(skip(http, client_secret))]
    pub async fn discover(
        http: Client,
        issuer: &str,
        client_id: &str,
        client_secret: SecretString,
        redirect_uri: &str,
    ) -> Result<Self, ProviderError> {
        let metadata = fetch_discovery(&http, issuer).await?;
        if metadata.issuer != issuer {
            return Err(ProviderError::IssuerMismatch {
                expected: issuer.to_string(),
                found: metadata.issuer,
            });
        }

        let keys = fetch_jwks(&http, &metadata.jwks_uri).await?;
        debug!("loaded {} signing keys from {}", keys.keys.len(), metadata.jwks_uri);

        Ok(Self {
            http,
            metadata,
            client_id: client_id.to_string(),
            client_secret,
            redirect_uri: redirect_uri.to_string(),
            keys: RwLock::new(keys),
        })
    }

    #[must_use]
    pub fn metadata(&self) -> &ProviderMetadata {
        &self.metadata
    }

    async fn token_request(&self, form: &[(&str, &str)]) -> Result<TokenResponse, ProviderError> {
        let response = self
            .http
            .post(self.metadata.token_endpoint.clone())
            .basic_auth(&self.client_id, Some(self.client_secret.expose_secret()))
            .header(ACCEPT, "application/json")
            .form(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body: truncate(body),
            });
        }

        Ok(response.json::<TokenResponse>().await?)
    }

    async fn signing_key(&self, kid: Option<&str>) -> Result<Jwk, ProviderError> {
        {
            let keys = self.keys.read().await;
            if let Some(jwk) = select_jwk(&keys.keys, kid) {
                return Ok(jwk.clone());
            }
        }

        // Unknown kid usually means the provider rotated keys. Fetch outside the lock.
        warn!("signing key {kid:?} not cached, refreshing JWKS");
        let fresh = fetch_jwks(&self.http, &self.metadata.jwks_uri).await?;
        let jwk = select_jwk(&fresh.keys, kid).cloned();
        *self.keys.write().await = fresh;

        jwk.ok_or_else(|| ProviderError::UnknownKey(kid.map(str::to_string)))
    }

    async fn verify_id_token(&self, raw_id_token: &str) -> Result<Value, ProviderError> {
        let header = decode_header(raw_id_token).map_err(ProviderError::MalformedIdToken)?;
        if !is_supported_alg(header.alg) {
            return Err(ProviderError::UnsupportedAlgorithm(header.alg));
        }

        let jwk = self.signing_key(header.kid.as_deref()).await?;
        let key = DecodingKey::from_jwk(&jwk).map_err(ProviderError::InvalidKey)?;
        let validation = id_token_validation(header.alg, &self.metadata.issuer, &self.client_id);

        decode::<Value>(raw_id_token, &key, &validation)
            .map(|data| data.claims)
            .map_err(ProviderError::Rejected)
    }
}

impl TokenExchanger for OidcProvider {
    fn exchange_code<'a>(&'a self, code: &'a str) -> ProviderFuture<'a, TokenResponse> {
        Box::pin(async move {
            self.token_request(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", &self.redirect_uri),
            ])
            .await
        })
    }

    fn token<'a>(&'a self, held: &'a HeldToken) -> ProviderFuture<'a, TokenResponse> {
        Box::pin(async move {
            if let Some(current) = held.reusable() {
                return Ok(current);
            }
            self.token_request(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", held.refresh_token()),
            ])
            .await
        })
    }
}

impl IdTokenVerifier for OidcProvider {
    fn verify<'a>(&'a self, raw_id_token: &'a str) -> ProviderFuture<'a, Value> {
        Box::pin(self.verify_id_token(raw_id_token))
    }
}

#[must_use]
pub fn discovery_url(issuer: &str) -> String {
    format!(
        "{}/.well-known/openid-configuration",
        issuer.trim_end_matches('/')
    )
}

async fn fetch_discovery(http: &Client, issuer: &str) -> Result<ProviderMetadata, ProviderError> {
    let url = Url::parse(&discovery_url(issuer))?;
    let response = http.get(url).send().await?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ProviderError::Status {
            status: status.as_u16(),
            body: truncate(body),
        });
    }
    Ok(response.json::<ProviderMetadata>().await?)
}

async fn fetch_jwks(http: &Client, jwks_uri: &Url) -> Result<JwkSet, ProviderError> {
    let response = http.get(jwks_uri.clone()).send().await?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ProviderError::Status {
            status: status.as_u16(),
            body: truncate(body),
        });
    }
    Ok(response.json::<JwkSet>().await?)
}

fn select_jwk<'a>(keys: &'a [Jwk], kid: Option<&str>) -> Option<&'a Jwk> {
    match kid {
        Some(kid) => keys
            .iter()
            .find(|key| key.common.key_id.as_deref() == Some(kid)),
        None if keys.len() == 1 => keys.first(),
        None => None,
    }
}

fn id_token_validation(alg: Algorithm, issuer: &str, client_id: &str) -> Validation {
    let mut validation = Validation::new(alg);
    validation.set_required_spec_claims(&["exp", "iss", "aud", "sub"]);
    validation.set_issuer(&[issuer]);
    validation.set_audience(&[client_id]);
    validation
}

// HMAC would mean sharing the client secret as a verification key.
fn is_supported_alg(alg: Algorithm) -> bool {
    matches!(
        alg,
        Algorithm::RS256
            | Algorithm::RS384
            | Algorithm::RS512
            | Algorithm::PS256
            | Algorithm::PS384
            | Algorithm::PS512
            | Algorithm::ES256
            | Algorithm::ES384
            | Algorithm::EdDSA
    )
}

fn truncate(mut body: String) -> String {
    if body.len() > MAX_ERROR_BODY {
        let mut end = MAX_ERROR_BODY;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        body.truncate(end);
    }
    body
}
