use super::{error_page, internal_error};
use crate::relay::{Relay, login::authorization_url};
use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
};
use std::sync::Arc;
use tracing::{error, info};

/// Send the browser to the identity provider for `cluster`.
pub async fn login(
    Path(cluster): Path<String>,
    Extension(relay): Extension<Arc<Relay>>,
) -> Response {
    let Some(cluster) = relay.clusters().get(&cluster) else {
        info!("Login requested for unknown cluster");
        return error_page(&relay, StatusCode::NOT_FOUND, "Unknown cluster");
    };

    match authorization_url(relay.nonces(), &cluster).await {
        Ok(url) => Redirect::to(url.as_str()).into_response(),
        Err(err) => {
            error!(cluster = %cluster.name(), "Failed to start login: {err:#}");
            internal_error()
        }
    }
}
