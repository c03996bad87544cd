//! Second leg of the login: turn a provider redirect (or a refresh form post) into a
//! verified ID token and the page that shows it.
//!
//! Every failure is reported to the browser as [`USER_ERROR_MESSAGE`]. The specific
//! cause only goes to the operator log.

use super::{
    Settings,
    cluster::Cluster,
    nonce::NonceStore,
    provider::{HeldToken, ProviderError},
    render::TokenPage,
};
use secrecy::ExposeSecret;
use serde_json::Value;
use std::{collections::HashMap, fmt};
use tracing::{debug, error, info};
use url::form_urlencoded;

pub const USER_ERROR_MESSAGE: &str = "Invalid token request";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    AwaitingCode,
    AwaitingRefresh,
    Exchanging,
    Verifying,
    Success,
    Failed,
}

/// Why a callback was rejected. `Display` is the operator message.
#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    #[error("provider reported error: {error}, error_description: {description}")]
    ProviderReported { error: String, description: String },
    #[error("no code in request")]
    MissingCode,
    #[error("invalid or expired state parameter")]
    InvalidState,
    #[error("no refresh_token in request")]
    MissingRefreshToken,
    #[error("failed to get token: {0}")]
    Exchange(ProviderError),
    #[error("no id_token in token response")]
    MissingIdToken,
    #[error("failed to verify ID token: {0}")]
    Verification(ProviderError),
    #[error("failed to format ID token claims: {0}")]
    ClaimsFormat(#[from] serde_json::Error),
}

impl FlowError {
    /// What the browser is told, whatever went wrong.
    #[must_use]
    pub fn user_message(&self) -> &'static str {
        USER_ERROR_MESSAGE
    }
}

/// Callback parameters from the query string and, for `POST`, an url-encoded body.
///
/// The first value of a key wins, body before query.
#[derive(Default)]
pub struct CallbackParams {
    values: HashMap<String, String>,
}

impl CallbackParams {
    #[must_use]
    pub fn parse(query: Option<&str>, body: &[u8]) -> Self {
        let query = query.map(str::as_bytes).unwrap_or_default();
        let mut values = HashMap::new();
        for (key, value) in form_urlencoded::parse(body).chain(form_urlencoded::parse(query)) {
            values
                .entry(key.into_owned())
                .or_insert_with(|| value.into_owned());
        }
        Self { values }
    }

    /// Value for `key`, empty values count as absent.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values
            .get(key)
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }

    fn owned(&self, key: &str) -> Option<String> {
        self.get(key).map(ToString::to_string)
    }
}

// Parameter values carry codes and refresh tokens.
impl fmt::Debug for CallbackParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<&str> = self.values.keys().map(String::as_str).collect();
        keys.sort_unstable();
        f.debug_struct("CallbackParams").field("keys", &keys).finish()
    }
}

pub enum CallbackRequest {
    /// Redirect back from the provider's authorization endpoint.
    Code {
        error: Option<String>,
        error_description: Option<String>,
        code: Option<String>,
        state: Option<String>,
    },
    /// Refresh request posted by a client holding a refresh token.
    Refresh { refresh_token: Option<String> },
}

impl CallbackRequest {
    #[must_use]
    pub fn code(params: &CallbackParams) -> Self {
        Self::Code {
            error: params.owned("error"),
            error_description: params.owned("error_description"),
            code: params.owned("code"),
            state: params.owned("state"),
        }
    }

    #[must_use]
    pub fn refresh(params: &CallbackParams) -> Self {
        Self::Refresh {
            refresh_token: params.owned("refresh_token"),
        }
    }
}

impl fmt::Debug for CallbackRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Code { error, code, state, .. } => f
                .debug_struct("Code")
                .field("error", error)
                .field("code", &code.as_ref().map(|_| "[REDACTED]"))
                .field("state", &state.as_ref().map(|_| "[REDACTED]"))
                .finish_non_exhaustive(),
            Self::Refresh { refresh_token } => f
                .debug_struct("Refresh")
                .field("refresh_token", &refresh_token.as_ref().map(|_| "[REDACTED]"))
                .finish(),
        }
    }
}

/// One callback for one cluster, from parameter checks to the rendered token data.
pub struct CallbackFlow<'a> {
    cluster: &'a Cluster,
    nonces: &'a NonceStore,
    settings: &'a Settings,
    state: FlowState,
}

impl<'a> CallbackFlow<'a> {
    #[must_use]
    pub fn new(cluster: &'a Cluster, nonces: &'a NonceStore, settings: &'a Settings) -> Self {
        Self {
            cluster,
            nonces,
            settings,
            state: FlowState::AwaitingCode,
        }
    }

    #[must_use]
    pub fn state(&self) -> FlowState {
        self.state
    }

    /// Drive the flow to `Success` or `Failed`. Failures are logged here.
    ///
    /// # Errors
    /// Returns the reason the request was rejected; callers show
    /// [`FlowError::user_message`] only.
    pub async fn run(&mut self, request: CallbackRequest) -> Result<TokenPage, FlowError> {
        info!(cluster = %self.cluster.name(), "Handling callback");

        match self.drive(request).await {
            Ok(page) => {
                self.transition(FlowState::Success);
                Ok(page)
            }
            Err(err) => {
                self.transition(FlowState::Failed);
                error!(cluster = %self.cluster.name(), "Callback rejected: {err}");
                Err(err)
            }
        }
    }

    async fn drive(&mut self, request: CallbackRequest) -> Result<TokenPage, FlowError> {
        let cluster = self.cluster;
        let exchanger = cluster.exchanger();

        let (response, presented_refresh) = match request {
            CallbackRequest::Code {
                error,
                error_description,
                code,
                state,
            } => {
                self.transition(FlowState::AwaitingCode);
                if let Some(error) = error {
                    return Err(FlowError::ProviderReported {
                        error,
                        description: error_description.unwrap_or_default(),
                    });
                }
                let code = code.ok_or(FlowError::MissingCode)?;
                let state = state.ok_or(FlowError::InvalidState)?;
                if !self.nonces.validate(&state).await {
                    return Err(FlowError::InvalidState);
                }

                self.transition(FlowState::Exchanging);
                let response = exchanger
                    .exchange_code(&code)
                    .await
                    .map_err(FlowError::Exchange)?;
                (response, None)
            }
            CallbackRequest::Refresh { refresh_token } => {
                self.transition(FlowState::AwaitingRefresh);
                let refresh_token = refresh_token.ok_or(FlowError::MissingRefreshToken)?;

                self.transition(FlowState::Exchanging);
                let held = HeldToken::expired(refresh_token.clone());
                let response = exchanger.token(&held).await.map_err(FlowError::Exchange)?;
                (response, Some(refresh_token))
            }
        };

        self.transition(FlowState::Verifying);
        let raw_id_token = response
            .id_token()
            .map_err(|_| FlowError::MissingIdToken)?;
        let claims = cluster
            .verifier()
            .verify(raw_id_token)
            .await
            .map_err(FlowError::Verification)?;
        let formatted = serde_json::to_string_pretty(&claims)?;

        let refresh_token = response.refresh_token.clone().or(presented_refresh);
        Ok(self.token_page(raw_id_token, refresh_token, &claims, formatted))
    }

    fn transition(&mut self, next: FlowState) {
        debug!(
            cluster = %self.cluster.name(),
            from = ?self.state,
            to = ?next,
            "Callback flow transition"
        );
        self.state = next;
    }

    fn token_page(
        &self,
        id_token: &str,
        refresh_token: Option<String>,
        claims: &Value,
        formatted: String,
    ) -> TokenPage {
        let config = self.cluster.config();
        TokenPage {
            cluster_name: config.name.clone(),
            short_description: config.short_description.clone(),
            description: config.description.clone(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.expose_secret().to_string(),
            issuer: config.issuer.clone(),
            k8s_master_uri: config.k8s_master_uri.clone(),
            k8s_ca_uri: config.k8s_ca_uri.clone(),
            k8s_ca_pem: config.k8s_ca_pem.clone(),
            username: username(claims, &config.name),
            id_token: id_token.to_string(),
            refresh_token,
            idp_ca_uri: self.settings.idp_ca_uri().map(ToString::to_string),
            idp_ca_pem: self.settings.idp_ca_pem().map(ToString::to_string),
            logo_uri: self.settings.logo_uri().map(ToString::to_string),
            web_path_prefix: self.settings.web_path_prefix().to_string(),
            kubectl_version: self.settings.kubectl_version().to_string(),
            claims: formatted,
        }
    }
}

/// kubectl user name: email, then name, then subject.
fn username(claims: &Value, fallback: &str) -> String {
    ["email", "name", "sub"]
        .iter()
        .find_map(|claim| {
            claims
                .get(claim)
                .and_then(Value::as_str)
                .filter(|value| !value.is_empty())
        })
        .unwrap_or(fallback)
        .to_string()
}
