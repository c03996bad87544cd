//! The login relay: nonce store, cluster registry, provider client, and the two legs of
//! the authorization-code flow.

pub mod callback;
pub mod cluster;
pub mod login;
pub mod nonce;
pub mod provider;
pub mod render;

use self::{cluster::ClusterRegistry, nonce::NonceStore, render::Presenter};
use std::sync::Arc;

pub const DEFAULT_KUBECTL_VERSION: &str = "v1.31.0";

/// Relay-wide display and trust settings shared by every cluster.
#[derive(Clone, Debug)]
pub struct Settings {
    web_path_prefix: String,
    idp_ca_uri: Option<String>,
    idp_ca_pem: Option<String>,
    logo_uri: Option<String>,
    kubectl_version: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self::new("/")
    }
}

impl Settings {
    #[must_use]
    pub fn new(web_path_prefix: &str) -> Self {
        Self {
            web_path_prefix: normalize_prefix(web_path_prefix),
            idp_ca_uri: None,
            idp_ca_pem: None,
            logo_uri: None,
            kubectl_version: DEFAULT_KUBECTL_VERSION.to_string(),
        }
    }

    #[must_use]
    pub fn with_idp_ca_uri(mut self, uri: Option<String>) -> Self {
        self.idp_ca_uri = uri;
        self
    }

    #[must_use]
    pub fn with_idp_ca_pem(mut self, pem: Option<String>) -> Self {
        self.idp_ca_pem = pem;
        self
    }

    #[must_use]
    pub fn with_logo_uri(mut self, uri: Option<String>) -> Self {
        self.logo_uri = uri;
        self
    }

    #[must_use]
    pub fn with_kubectl_version(mut self, version: String) -> Self {
        self.kubectl_version = version;
        self
    }

    /// Always starts and ends with `/`.
    #[must_use]
    pub fn web_path_prefix(&self) -> &str {
        &self.web_path_prefix
    }

    #[must_use]
    pub fn idp_ca_uri(&self) -> Option<&str> {
        self.idp_ca_uri.as_deref()
    }

    #[must_use]
    pub fn idp_ca_pem(&self) -> Option<&str> {
        self.idp_ca_pem.as_deref()
    }

    #[must_use]
    pub fn logo_uri(&self) -> Option<&str> {
        self.logo_uri.as_deref()
    }

    #[must_use]
    pub fn kubectl_version(&self) -> &str {
        &self.kubectl_version
    }

    #[must_use]
    pub fn login_path(&self, cluster: &str) -> String {
        format!("{}login/{cluster}", self.web_path_prefix)
    }
}

fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim().trim_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        format!("/{trimmed}/")
    }
}

/// Everything a request handler needs, shared behind an `Arc`.
pub struct Relay {
    settings: Settings,
    clusters: ClusterRegistry,
    nonces: NonceStore,
    presenter: Arc<dyn Presenter>,
}

impl Relay {
    #[must_use]
    pub fn new(
        settings: Settings,
        clusters: ClusterRegistry,
        nonces: NonceStore,
        presenter: Arc<dyn Presenter>,
    ) -> Self {
        Self {
            settings,
            clusters,
            nonces,
            presenter,
        }
    }

    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    #[must_use]
    pub fn clusters(&self) -> &ClusterRegistry {
        &self.clusters
    }

    #[must_use]
    pub fn nonces(&self) -> &NonceStore {
        &self.nonces
    }

    #[must_use]
    pub fn presenter(&self) -> &dyn Presenter {
        self.presenter.as_ref()
    }
}
