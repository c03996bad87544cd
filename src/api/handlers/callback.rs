use super::{error_page, internal_error, no_store};
use crate::relay::{
    Relay,
    callback::{CallbackFlow, CallbackParams, CallbackRequest},
};
use axum::{
    body::Bytes,
    extract::{Extension, Path, RawQuery},
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::{error, info};

/// Provider redirect (`GET`) or refresh request (`POST`) for `cluster`.
pub async fn callback(
    method: Method,
    Path(cluster): Path<String>,
    Extension(relay): Extension<Arc<Relay>>,
    RawQuery(query): RawQuery,
    body: Bytes,
) -> Response {
    let Some(cluster) = relay.clusters().get(&cluster) else {
        info!("Callback for unknown cluster");
        return error_page(&relay, StatusCode::NOT_FOUND, "Unknown cluster");
    };

    // GET reads the query string only
    let form: &[u8] = if method == Method::POST { &body } else { &[] };
    let params = CallbackParams::parse(query.as_deref(), form);
    let request = match method {
        Method::GET => CallbackRequest::code(&params),
        Method::POST => CallbackRequest::refresh(&params),
        // not a browser; no HTML
        other => {
            return (
                StatusCode::BAD_REQUEST,
                format!("Method not implemented: {other}"),
            )
                .into_response();
        }
    };

    let mut flow = CallbackFlow::new(&cluster, relay.nonces(), relay.settings());
    match flow.run(request).await {
        Ok(page) => match relay.presenter().token_page(&page) {
            Ok(html) => no_store(StatusCode::OK, html),
            Err(err) => {
                error!(cluster = %cluster.name(), "Failed to render token page: {err:#}");
                internal_error()
            }
        },
        Err(err) => error_page(&relay, StatusCode::BAD_REQUEST, err.user_message()),
    }
}
