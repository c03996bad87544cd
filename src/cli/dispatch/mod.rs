use crate::cli::actions::{Action, server::Args};
use anyhow::{Context, Result};
use std::{path::PathBuf, time::Duration};

/// # Errors
/// Returns an error if required arguments are missing.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let config = matches
        .get_one::<String>("config")
        .map(PathBuf::from)
        .context("missing required argument: --config")?;
    let port = matches
        .get_one::<u16>("port")
        .copied()
        .unwrap_or(crate::cli::commands::DEFAULT_PORT);
    let nonce_ttl = matches
        .get_one::<u64>("nonce-ttl")
        .copied()
        .map_or(crate::relay::nonce::DEFAULT_NONCE_TTL, Duration::from_secs);

    Ok(Action::Server(Args {
        config,
        port,
        nonce_ttl,
    }))
}
