//! Per-cluster OAuth2 clients and the read-only registry that resolves them by name.

use super::provider::{IdTokenVerifier, OidcProvider, TokenExchanger};
use regex::Regex;
use secrecy::SecretString;
use std::{collections::HashMap, fmt, sync::Arc};
use url::Url;

pub const DEFAULT_SCOPES: [&str; 5] = ["openid", "profile", "email", "offline_access", "groups"];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("no clusters configured")]
    Empty,
    #[error("duplicate cluster name: {0}")]
    Duplicate(String),
    #[error("invalid cluster name {0:?}: use lowercase letters, digits, '-', '_' or '.'")]
    InvalidName(String),
}

/// Static settings for one cluster, fixed at startup.
#[derive(Clone)]
pub struct ClusterConfig {
    pub name: String,
    pub short_description: String,
    pub description: String,
    pub client_id: String,
    pub client_secret: SecretString,
    pub issuer: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    pub connector_id: Option<String>,
    pub k8s_master_uri: Option<String>,
    pub k8s_ca_uri: Option<String>,
    pub k8s_ca_pem: Option<String>,
}

impl ClusterConfig {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: SecretString,
        issuer: impl Into<String>,
        redirect_uri: impl Into<String>,
    ) -> Self {
        let name = name.into();
        Self {
            short_description: name.clone(),
            description: String::new(),
            name,
            client_id: client_id.into(),
            client_secret,
            issuer: issuer.into(),
            redirect_uri: redirect_uri.into(),
            scopes: DEFAULT_SCOPES.iter().map(ToString::to_string).collect(),
            connector_id: None,
            k8s_master_uri: None,
            k8s_ca_uri: None,
            k8s_ca_pem: None,
        }
    }

    #[must_use]
    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = scopes;
        self
    }

    #[must_use]
    pub fn with_connector_id(mut self, connector_id: impl Into<String>) -> Self {
        self.connector_id = Some(connector_id.into());
        self
    }

    #[must_use]
    pub fn with_descriptions(
        mut self,
        short_description: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        self.short_description = short_description.into();
        self.description = description.into();
        self
    }

    #[must_use]
    pub fn with_k8s_master_uri(mut self, uri: impl Into<String>) -> Self {
        self.k8s_master_uri = Some(uri.into());
        self
    }

    #[must_use]
    pub fn with_k8s_ca(mut self, uri: Option<String>, pem: Option<String>) -> Self {
        self.k8s_ca_uri = uri;
        self.k8s_ca_pem = pem;
        self
    }
}

impl fmt::Debug for ClusterConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterConfig")
            .field("name", &self.name)
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("issuer", &self.issuer)
            .field("redirect_uri", &self.redirect_uri)
            .field("scopes", &self.scopes)
            .field("connector_id", &self.connector_id)
            .finish_non_exhaustive()
    }
}

/// A cluster bound to its identity provider.
pub struct Cluster {
    config: ClusterConfig,
    authorization_endpoint: Url,
    exchanger: Arc<dyn TokenExchanger>,
    verifier: Arc<dyn IdTokenVerifier>,
}

impl Cluster {
    #[must_use]
    pub fn new(
        config: ClusterConfig,
        authorization_endpoint: Url,
        exchanger: Arc<dyn TokenExchanger>,
        verifier: Arc<dyn IdTokenVerifier>,
    ) -> Self {
        Self {
            config,
            authorization_endpoint,
            exchanger,
            verifier,
        }
    }

    /// Bind a cluster to a discovered provider, which serves as both exchanger and verifier.
    #[must_use]
    pub fn with_provider(config: ClusterConfig, provider: Arc<OidcProvider>) -> Self {
        let authorization_endpoint = provider.metadata().authorization_endpoint.clone();
        Self::new(config, authorization_endpoint, provider.clone(), provider)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.config.name
    }

    #[must_use]
    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    #[must_use]
    pub fn authorization_endpoint(&self) -> &Url {
        &self.authorization_endpoint
    }

    #[must_use]
    pub fn exchanger(&self) -> &dyn TokenExchanger {
        self.exchanger.as_ref()
    }

    #[must_use]
    pub fn verifier(&self) -> &dyn IdTokenVerifier {
        self.verifier.as_ref()
    }
}

impl fmt::Debug for Cluster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cluster")
            .field("config", &self.config)
            .field("authorization_endpoint", &self.authorization_endpoint.as_str())
            .finish_non_exhaustive()
    }
}

/// Name to cluster lookup. Keeps configuration order for the index page.
#[derive(Debug)]
pub struct ClusterRegistry {
    clusters: Vec<Arc<Cluster>>,
    by_name: HashMap<String, usize>,
}

impl ClusterRegistry {
    /// # Errors
    /// Returns an error if `clusters` is empty, a name is invalid, or a name repeats.
    pub fn new(clusters: Vec<Cluster>) -> Result<Self, RegistryError> {
        if clusters.is_empty() {
            return Err(RegistryError::Empty);
        }

        let mut by_name = HashMap::with_capacity(clusters.len());
        for (index, cluster) in clusters.iter().enumerate() {
            if !valid_cluster_name(cluster.name()) {
                return Err(RegistryError::InvalidName(cluster.name().to_string()));
            }
            if by_name.insert(cluster.name().to_string(), index).is_some() {
                return Err(RegistryError::Duplicate(cluster.name().to_string()));
            }
        }

        Ok(Self {
            clusters: clusters.into_iter().map(Arc::new).collect(),
            by_name,
        })
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<Cluster>> {
        self.by_name
            .get(name)
            .and_then(|&index| self.clusters.get(index))
            .cloned()
    }

    /// The only configured cluster, if there is exactly one.
    #[must_use]
    pub fn single(&self) -> Option<&Cluster> {
        match self.clusters.as_slice() {
            [only] => Some(only.as_ref()),
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Cluster> {
        self.clusters.iter().map(|cluster| &**cluster)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }
}

/// Cluster names become path segments, so keep them URL-safe.
#[must_use]
pub fn valid_cluster_name(name: &str) -> bool {
    Regex::new(r"^[a-z0-9]([a-z0-9._-]{0,62})$").is_ok_and(|re| re.is_match(name))
}
