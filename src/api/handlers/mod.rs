pub mod callback;
pub use self::callback::callback;

pub mod health;
pub use self::health::health;

pub mod index;
pub use self::index::index;

pub mod login;
pub use self::login::login;

// common responses for the handlers
use crate::relay::{Relay, render::ErrorPage};
use axum::{
    http::{StatusCode, header::CACHE_CONTROL},
    response::{Html, IntoResponse, Response},
};
use tracing::error;

/// An HTML page that must not be cached by the browser or a proxy.
pub(crate) fn no_store(status: StatusCode, html: String) -> Response {
    (status, [(CACHE_CONTROL, "no-store")], Html(html)).into_response()
}

pub(crate) fn internal_error() -> Response {
    (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response()
}

/// Render the error page with `message`; fall back to a plain 500 if that fails.
pub(crate) fn error_page(relay: &Relay, status: StatusCode, message: &str) -> Response {
    let settings = relay.settings();
    let page = ErrorPage {
        message: message.to_string(),
        logo_uri: settings.logo_uri().map(ToString::to_string),
        web_path_prefix: settings.web_path_prefix().to_string(),
    };

    match relay.presenter().error_page(&page) {
        Ok(html) => no_store(status, html),
        Err(err) => {
            error!("Failed to render error page: {err:#}");
            internal_error()
        }
    }
}
