use super::internal_error;
use crate::relay::{
    Relay,
    render::{IndexEntry, IndexPage},
};
use axum::{
    extract::Extension,
    response::{Html, IntoResponse, Redirect, Response},
};
use std::sync::Arc;
use tracing::{debug, error};

/// Cluster picker. With a single cluster there is nothing to pick.
pub async fn index(Extension(relay): Extension<Arc<Relay>>) -> Response {
    let settings = relay.settings();

    if let Some(cluster) = relay.clusters().single() {
        let login_path = settings.login_path(cluster.name());
        debug!("Redirecting to {login_path}");
        return Redirect::to(&login_path).into_response();
    }

    let page = IndexPage {
        clusters: relay
            .clusters()
            .iter()
            .map(|cluster| {
                let config = cluster.config();
                IndexEntry {
                    name: config.name.clone(),
                    short_description: config.short_description.clone(),
                    description: config.description.clone(),
                    login_path: settings.login_path(cluster.name()),
                }
            })
            .collect(),
        logo_uri: settings.logo_uri().map(ToString::to_string),
        web_path_prefix: settings.web_path_prefix().to_string(),
    };

    match relay.presenter().index_page(&page) {
        Ok(html) => Html(html).into_response(),
        Err(err) => {
            error!("Failed to render index page: {err:#}");
            internal_error()
        }
    }
}
