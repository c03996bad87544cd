//! # Dexgate (kubectl login relay)
//!
//! `dexgate` is a small web front end that walks a human through an `OpenID Connect`
//! authorization-code flow against an identity provider (usually Dex) and hands back
//! the resulting ID and refresh tokens, ready to paste into a `kubectl` config.
//!
//! One process serves many clusters. Each cluster has its own OAuth2 client, scopes,
//! redirect URI and optional Dex connector, and every login flow is bound to exactly
//! one of them from the first redirect to the token page.
//!
//! ## Flow Overview
//!
//! 1. `GET <prefix>login/<cluster>` issues a single-use state nonce and redirects to the
//!    provider's authorization endpoint.
//! 2. The provider redirects back to `GET <prefix>callback/<cluster>`. The state nonce is
//!    checked before the code is exchanged, then the ID token is verified against the
//!    provider's JWKS.
//! 3. `POST <prefix>callback/<cluster>` with a `refresh_token` form field runs the same
//!    pipeline through a refresh grant instead of a code exchange.
//!
//! ## Error Surfaces
//!
//! Browsers only ever see a generic "Invalid token request" page. The actual cause
//! (provider error codes, exchange failures, signature problems) is logged for operators.
//!
//! ## Limitations
//!
//! State nonces live in process memory. Running more than one replica behind a load
//! balancer requires sticky sessions.

pub mod api;
pub mod cli;
pub mod config;
pub mod relay;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
