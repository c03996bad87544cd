//! HTML rendering for the index, token and error pages.
//!
//! The orchestrator hands a [`TokenPage`] to a [`Presenter`] and never looks at the
//! output. Templates are embedded at build time and rendered with Handlebars, which
//! HTML-escapes every `{{value}}`.

use anyhow::{Context, Result};
use handlebars::Handlebars;
use serde::Serialize;
use std::fmt;

const HEADER_TEMPLATE: &str = include_str!("../../templates/header.hbs");
const FOOTER_TEMPLATE: &str = include_str!("../../templates/footer.hbs");
const INDEX_TEMPLATE: &str = include_str!("../../templates/index.hbs");
const TOKEN_TEMPLATE: &str = include_str!("../../templates/token.hbs");
const ERROR_TEMPLATE: &str = include_str!("../../templates/error.hbs");

/// Everything the token page needs to print a ready-to-use kubectl configuration.
#[derive(Clone, Serialize)]
pub struct TokenPage {
    pub cluster_name: String,
    pub short_description: String,
    pub description: String,
    pub client_id: String,
    pub client_secret: String,
    pub issuer: String,
    pub k8s_master_uri: Option<String>,
    pub k8s_ca_uri: Option<String>,
    pub k8s_ca_pem: Option<String>,
    pub username: String,
    pub id_token: String,
    pub refresh_token: Option<String>,
    pub idp_ca_uri: Option<String>,
    pub idp_ca_pem: Option<String>,
    pub logo_uri: Option<String>,
    pub web_path_prefix: String,
    pub kubectl_version: String,
    pub claims: String,
}

impl fmt::Debug for TokenPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenPage")
            .field("cluster_name", &self.cluster_name)
            .field("username", &self.username)
            .field("client_secret", &"[REDACTED]")
            .field("id_token", &"[REDACTED]")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct IndexEntry {
    pub name: String,
    pub short_description: String,
    pub description: String,
    pub login_path: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct IndexPage {
    pub clusters: Vec<IndexEntry>,
    pub logo_uri: Option<String>,
    pub web_path_prefix: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct ErrorPage {
    pub message: String,
    pub logo_uri: Option<String>,
    pub web_path_prefix: String,
}

pub trait Presenter: Send + Sync {
    /// # Errors
    /// Returns an error if the page cannot be rendered.
    fn token_page(&self, page: &TokenPage) -> Result<String>;

    /// # Errors
    /// Returns an error if the page cannot be rendered.
    fn index_page(&self, page: &IndexPage) -> Result<String>;

    /// # Errors
    /// Returns an error if the page cannot be rendered.
    fn error_page(&self, page: &ErrorPage) -> Result<String>;
}

#[derive(Debug)]
pub struct HandlebarsPresenter {
    registry: Handlebars<'static>,
}

impl HandlebarsPresenter {
    /// # Errors
    /// Returns an error if an embedded template fails to parse.
    pub fn new() -> Result<Self> {
        let mut registry = Handlebars::new();
        registry
            .register_partial("header", HEADER_TEMPLATE)
            .context("Failed to register header partial")?;
        registry
            .register_partial("footer", FOOTER_TEMPLATE)
            .context("Failed to register footer partial")?;
        registry
            .register_template_string("index", INDEX_TEMPLATE)
            .context("Failed to register index template")?;
        registry
            .register_template_string("token", TOKEN_TEMPLATE)
            .context("Failed to register token template")?;
        registry
            .register_template_string("error", ERROR_TEMPLATE)
            .context("Failed to register error template")?;
        Ok(Self { registry })
    }

    fn render<T: Serialize>(&self, name: &str, data: &T) -> Result<String> {
        self.registry
            .render(name, data)
            .with_context(|| format!("Failed to render {name} template"))
    }
}

impl Presenter for HandlebarsPresenter {
    fn token_page(&self, page: &TokenPage) -> Result<String> {
        self.render("token", page)
    }

    fn index_page(&self, page: &IndexPage) -> Result<String> {
        self.render("index", page)
    }

    fn error_page(&self, page: &ErrorPage) -> Result<String> {
        self.render("error", page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token_page() -> TokenPage {
        TokenPage {
            cluster_name: "prod".to_string(),
            short_description: "Production".to_string(),
            description: "Main production cluster".to_string(),
            client_id: "kubernetes".to_string(),
            client_secret: "s3cret".to_string(),
            issuer: "https://dex.example.com".to_string(),
            k8s_master_uri: Some("https://k8s.example.com:6443".to_string()),
            k8s_ca_uri: None,
            k8s_ca_pem: Some("-----BEGIN CERTIFICATE-----\nMIIB\n-----END CERTIFICATE-----".to_string()),
            username: "alice@example.com".to_string(),
            id_token: "eyJhbGciOiJSUzI1NiJ9.e30.sig".to_string(),
            refresh_token: Some("refresh-abc".to_string()),
            idp_ca_uri: None,
            idp_ca_pem: None,
            logo_uri: None,
            web_path_prefix: "/".to_string(),
            kubectl_version: "v1.31.0".to_string(),
            claims: "{\n  \"email\": \"alice@example.com\"\n}".to_string(),
        }
    }

    #[test]
    fn token_page_contains_tokens_and_escaped_claims() -> Result<()> {
        let presenter = HandlebarsPresenter::new()?;
        let html = presenter.token_page(&token_page())?;

        assert!(html.contains("eyJhbGciOiJSUzI1NiJ9.e30.sig"));
        assert!(html.contains("refresh-abc"));
        assert!(html.contains("https://k8s.example.com:6443"));
        assert!(html.contains("&quot;email&quot;"));
        assert!(html.contains("v1.31.0"));
        Ok(())
    }

    #[test]
    fn token_page_renders_without_optional_fields() -> Result<()> {
        let presenter = HandlebarsPresenter::new()?;
        let mut page = token_page();
        page.k8s_master_uri = None;
        page.k8s_ca_pem = None;
        page.refresh_token = None;
        let html = presenter.token_page(&page)?;
        assert!(html.contains("prod"));
        Ok(())
    }

    #[test]
    fn index_lists_clusters() -> Result<()> {
        let presenter = HandlebarsPresenter::new()?;
        let html = presenter.index_page(&IndexPage {
            clusters: vec![
                IndexEntry {
                    name: "prod".to_string(),
                    short_description: "Production".to_string(),
                    description: String::new(),
                    login_path: "/login/prod".to_string(),
                },
                IndexEntry {
                    name: "staging".to_string(),
                    short_description: "Staging".to_string(),
                    description: "<b>test</b>".to_string(),
                    login_path: "/login/staging".to_string(),
                },
            ],
            logo_uri: Some("https://example.com/logo.png".to_string()),
            web_path_prefix: "/".to_string(),
        })?;

        assert!(html.contains("/login/prod"));
        assert!(html.contains("/login/staging"));
        assert!(html.contains("&lt;b&gt;test&lt;/b&gt;"));
        assert!(html.contains("https://example.com/logo.png"));
        Ok(())
    }

    #[test]
    fn error_page_shows_message() -> Result<()> {
        let presenter = HandlebarsPresenter::new()?;
        let html = presenter.error_page(&ErrorPage {
            message: "Invalid token request".to_string(),
            logo_uri: None,
            web_path_prefix: "/".to_string(),
        })?;
        assert!(html.contains("Invalid token request"));
        Ok(())
    }

    #[test]
    fn debug_redacts_tokens() {
        let debug = format!("{:?}", token_page());
        assert!(!debug.contains("refresh-abc"));
        assert!(!debug.contains("s3cret"));
        assert!(!debug.contains("e30.sig"));
    }
}
