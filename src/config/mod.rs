//! YAML configuration file.
//!
//! The file describes relay-wide display settings and one entry per cluster. It is read
//! once at startup; CA files referenced from it are read at the same time so a bad path
//! fails the process instead of a later request.
//!
//! ```yaml
//! web_path_prefix: /
//! logo_uri: https://example.com/logo.png
//! idp_ca_pem_file: /etc/dexgate/idp-ca.pem
//! clusters:
//!   - name: prod
//!     short_description: Production
//!     client_id: kubernetes
//!     client_secret: change-me
//!     issuer: https://dex.example.com
//!     redirect_uri: https://login.example.com/callback/prod
//!     k8s_master_uri: https://k8s.example.com:6443
//! ```

use crate::relay::{
    DEFAULT_KUBECTL_VERSION, Settings,
    cluster::{ClusterConfig, valid_cluster_name},
};
use anyhow::{Context, Result, bail};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
};
use tracing::debug;
use url::Url;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    #[serde(default = "default_web_path_prefix")]
    pub web_path_prefix: String,
    #[serde(default)]
    pub idp_ca_uri: Option<String>,
    #[serde(default)]
    pub idp_ca_pem: Option<String>,
    #[serde(default)]
    pub idp_ca_pem_file: Option<PathBuf>,
    #[serde(default)]
    pub logo_uri: Option<String>,
    #[serde(default)]
    pub kubectl_version: Option<String>,
    pub clusters: Vec<ClusterEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClusterEntry {
    pub name: String,
    #[serde(default)]
    pub short_description: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    pub client_id: String,
    pub client_secret: SecretString,
    pub issuer: String,
    pub redirect_uri: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub connector_id: Option<String>,
    #[serde(default)]
    pub k8s_master_uri: Option<String>,
    #[serde(default)]
    pub k8s_ca_uri: Option<String>,
    #[serde(default)]
    pub k8s_ca_pem: Option<String>,
    #[serde(default)]
    pub k8s_ca_pem_file: Option<PathBuf>,
}

fn default_web_path_prefix() -> String {
    "/".to_string()
}

impl FileConfig {
    /// Load and validate a configuration file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, is not valid YAML, or fails validation.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading configuration from {}", path.display());
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file {}", path.display()))?;
        Self::from_yaml(&contents)
            .with_context(|| format!("Invalid configuration file {}", path.display()))
    }

    /// # Errors
    /// Returns an error if `contents` is not valid YAML or fails validation.
    pub fn from_yaml(contents: &str) -> Result<Self> {
        let config: Self =
            serde_yml::from_str(contents).context("Failed to parse YAML configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    /// Returns the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.clusters.is_empty() {
            bail!("at least one cluster must be configured");
        }

        let mut names = HashSet::new();
        for cluster in &self.clusters {
            if !valid_cluster_name(&cluster.name) {
                bail!(
                    "invalid cluster name {:?}: use lowercase letters, digits, '-', '_' or '.'",
                    cluster.name
                );
            }
            if !names.insert(cluster.name.as_str()) {
                bail!("duplicate cluster name: {}", cluster.name);
            }
            cluster
                .validate()
                .with_context(|| format!("cluster {}", cluster.name))?;
        }

        if let Some(uri) = &self.logo_uri {
            Url::parse(uri).with_context(|| format!("invalid logo_uri: {uri}"))?;
        }
        Ok(())
    }

    /// Relay-wide settings, with the IdP CA read from disk if only a file was given.
    ///
    /// # Errors
    /// Returns an error if the CA file cannot be read.
    pub fn settings(&self) -> Result<Settings> {
        let idp_ca_pem = read_pem(
            self.idp_ca_pem.as_deref(),
            self.idp_ca_pem_file.as_deref(),
            "IdP CA",
        )?;

        Ok(Settings::new(&self.web_path_prefix)
            .with_idp_ca_uri(self.idp_ca_uri.clone())
            .with_idp_ca_pem(idp_ca_pem)
            .with_logo_uri(self.logo_uri.clone())
            .with_kubectl_version(
                self.kubectl_version
                    .clone()
                    .unwrap_or_else(|| DEFAULT_KUBECTL_VERSION.to_string()),
            ))
    }
}

impl ClusterEntry {
    fn validate(&self) -> Result<()> {
        if self.client_id.trim().is_empty() {
            bail!("client_id must not be empty");
        }
        if self.client_secret.expose_secret().is_empty() {
            bail!("client_secret must not be empty");
        }
        Url::parse(&self.issuer).with_context(|| format!("invalid issuer: {}", self.issuer))?;
        Url::parse(&self.redirect_uri)
            .with_context(|| format!("invalid redirect_uri: {}", self.redirect_uri))?;
        if let Some(uri) = &self.k8s_master_uri {
            Url::parse(uri).with_context(|| format!("invalid k8s_master_uri: {uri}"))?;
        }
        Ok(())
    }

    /// # Errors
    /// Returns an error if the cluster CA file cannot be read.
    pub fn cluster_config(&self) -> Result<ClusterConfig> {
        let k8s_ca_pem = read_pem(
            self.k8s_ca_pem.as_deref(),
            self.k8s_ca_pem_file.as_deref(),
            "cluster CA",
        )
        .with_context(|| format!("cluster {}", self.name))?;

        let mut config = ClusterConfig::new(
            self.name.clone(),
            self.client_id.clone(),
            self.client_secret.clone(),
            self.issuer.clone(),
            self.redirect_uri.clone(),
        )
        .with_descriptions(
            self.short_description
                .clone()
                .unwrap_or_else(|| self.name.clone()),
            self.description.clone().unwrap_or_default(),
        )
        .with_k8s_ca(self.k8s_ca_uri.clone(), k8s_ca_pem);

        if !self.scopes.is_empty() {
            config = config.with_scopes(self.scopes.clone());
        }
        if let Some(connector_id) = self.connector_id.as_deref().filter(|id| !id.is_empty()) {
            config = config.with_connector_id(connector_id);
        }
        if let Some(uri) = &self.k8s_master_uri {
            config = config.with_k8s_master_uri(uri.clone());
        }
        Ok(config)
    }
}

/// Inline PEM wins over a file.
fn read_pem(inline: Option<&str>, file: Option<&Path>, what: &str) -> Result<Option<String>> {
    if let Some(pem) = inline.filter(|pem| !pem.trim().is_empty()) {
        return Ok(Some(pem.to_string()));
    }
    match file {
        Some(path) => {
            debug!("Reading {what} from {}", path.display());
            let pem = fs::read_to_string(path)
                .with_context(|| format!("Failed to load {what} from file {}", path.display()))?;
            Ok(Some(pem))
        }
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    const MINIMAL: &str = r"
clusters:
  - name: prod
    client_id: kubernetes
    client_secret: s3cret
    issuer: https://dex.example.com
    redirect_uri: https://login.example.com/callback/prod
";

    fn temp_file(contents: &str) -> Result<PathBuf> {
        let path = env::temp_dir().join(format!("dexgate-{}.pem", uuid::Uuid::new_v4()));
        fs::write(&path, contents)?;
        Ok(path)
    }

    #[test]
    fn minimal_config_gets_defaults() -> Result<()> {
        let config = FileConfig::from_yaml(MINIMAL)?;
        let settings = config.settings()?;
        assert_eq!(settings.web_path_prefix(), "/");
        assert_eq!(settings.kubectl_version(), DEFAULT_KUBECTL_VERSION);
        assert!(settings.idp_ca_pem().is_none());

        let cluster = config.clusters[0].cluster_config()?;
        assert_eq!(cluster.short_description, "prod");
        assert_eq!(
            cluster.scopes,
            ["openid", "profile", "email", "offline_access", "groups"]
        );
        assert!(cluster.connector_id.is_none());
        assert!(cluster.k8s_ca_pem.is_none());
        Ok(())
    }

    #[test]
    fn sample_config_parses() -> Result<()> {
        let config = FileConfig::from_yaml(include_str!("../../dexgate.sample.yaml"))?;
        assert_eq!(config.clusters.len(), 2);
        assert_eq!(config.settings()?.web_path_prefix(), "/");
        Ok(())
    }

    #[test]
    fn full_cluster_entry() -> Result<()> {
        let config = FileConfig::from_yaml(
            r"
web_path_prefix: /k8s
logo_uri: https://example.com/logo.png
kubectl_version: v1.30.2
idp_ca_uri: https://example.com/ca.pem
idp_ca_pem: IDP-PEM
clusters:
  - name: staging
    short_description: Staging
    description: Pre-production
    client_id: kube-staging
    client_secret: other
    issuer: https://dex.example.com
    redirect_uri: https://login.example.com/k8s/callback/staging
    scopes: [openid, email]
    connector_id: ldap
    k8s_master_uri: https://staging.example.com:6443
    k8s_ca_uri: https://example.com/k8s-ca.pem
    k8s_ca_pem: K8S-PEM
",
        )?;

        let settings = config.settings()?;
        assert_eq!(settings.web_path_prefix(), "/k8s/");
        assert_eq!(settings.kubectl_version(), "v1.30.2");
        assert_eq!(settings.idp_ca_pem(), Some("IDP-PEM"));

        let cluster = config.clusters[0].cluster_config()?;
        assert_eq!(cluster.short_description, "Staging");
        assert_eq!(cluster.description, "Pre-production");
        assert_eq!(cluster.scopes, ["openid", "email"]);
        assert_eq!(cluster.connector_id.as_deref(), Some("ldap"));
        assert_eq!(cluster.k8s_ca_pem.as_deref(), Some("K8S-PEM"));
        assert_eq!(
            cluster.k8s_master_uri.as_deref(),
            Some("https://staging.example.com:6443")
        );
        Ok(())
    }

    #[test]
    fn ca_files_are_read_at_load_time() -> Result<()> {
        let idp = temp_file("IDP FROM FILE")?;
        let k8s = temp_file("K8S FROM FILE")?;
        let yaml = format!(
            "idp_ca_pem_file: {}\n{}    k8s_ca_pem_file: {}\n",
            idp.display(),
            MINIMAL.trim_start(),
            k8s.display()
        );

        let config = FileConfig::from_yaml(&yaml)?;
        let idp_pem = config.settings()?.idp_ca_pem().map(ToString::to_string);
        let k8s_pem = config.clusters[0].cluster_config()?.k8s_ca_pem;
        fs::remove_file(idp)?;
        fs::remove_file(k8s)?;

        assert_eq!(idp_pem.as_deref(), Some("IDP FROM FILE"));
        assert_eq!(k8s_pem.as_deref(), Some("K8S FROM FILE"));
        Ok(())
    }

    #[test]
    fn inline_pem_wins_over_file() -> Result<()> {
        let pem = read_pem(Some("INLINE"), Some(Path::new("/nonexistent/ca.pem")), "IdP CA")?;
        assert_eq!(pem.as_deref(), Some("INLINE"));
        assert_eq!(read_pem(None, None, "IdP CA")?, None);
        Ok(())
    }

    #[test]
    fn unreadable_ca_file_names_the_path() -> Result<()> {
        let config = FileConfig::from_yaml(&format!(
            "idp_ca_pem_file: /nonexistent/dexgate/ca.pem\n{MINIMAL}"
        ))?;
        let err = match config.settings() {
            Err(err) => err,
            Ok(_) => bail!("missing CA file was accepted"),
        };
        assert!(err.to_string().contains("/nonexistent/dexgate/ca.pem"));
        Ok(())
    }

    #[test]
    fn rejects_empty_cluster_list() {
        assert!(FileConfig::from_yaml("clusters: []").is_err());
    }

    #[test]
    fn rejects_duplicate_and_invalid_names() {
        let duplicate = format!("{MINIMAL}{}", MINIMAL.replace("clusters:\n", ""));
        let err = FileConfig::from_yaml(&duplicate).err().map(|e| e.to_string());
        assert_eq!(err.as_deref(), Some("duplicate cluster name: prod"));

        let invalid = MINIMAL.replace("name: prod", "name: Prod/Admin");
        assert!(FileConfig::from_yaml(&invalid).is_err());
    }

    #[test]
    fn rejects_bad_urls_and_unknown_keys() {
        assert!(FileConfig::from_yaml(&MINIMAL.replace("https://dex.example.com", "not a url")).is_err());
        assert!(FileConfig::from_yaml(&format!("{MINIMAL}listen: 0.0.0.0\n")).is_err());
        assert!(FileConfig::from_yaml("clusters: [").is_err());
    }

    #[test]
    fn missing_file_names_the_path() {
        let err = FileConfig::from_file("/nonexistent/dexgate.yaml")
            .err()
            .map(|e| e.to_string());
        assert!(err.is_some_and(|e| e.contains("/nonexistent/dexgate.yaml")));
    }

    #[test]
    fn debug_redacts_client_secret() -> Result<()> {
        let config = FileConfig::from_yaml(MINIMAL)?;
        assert!(!format!("{config:?}").contains("s3cret"));
        Ok(())
    }
}
