use crate::{
    api,
    cli::telemetry,
    config::FileConfig,
    relay::{
        Relay, Settings,
        cluster::{Cluster, ClusterRegistry},
        nonce::NonceStore,
        provider::{OidcProvider, http_client},
        render::HandlebarsPresenter,
    },
};
use anyhow::{Context, Result};
use std::{path::PathBuf, sync::Arc, time::Duration};
use tracing::info;

#[derive(Debug)]
pub struct Args {
    pub config: PathBuf,
    pub port: u16,
    pub nonce_ttl: Duration,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the configuration is invalid, discovery fails for any cluster,
/// or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    let file = FileConfig::from_file(&args.config)?;
    let settings = file.settings()?;
    log_startup_args(&args, &file, &settings);

    let http = http_client(settings.idp_ca_pem()).context("Failed to build HTTP client")?;

    let mut clusters = Vec::with_capacity(file.clusters.len());
    for entry in &file.clusters {
        let config = entry.cluster_config()?;
        let provider = OidcProvider::discover(
            http.clone(),
            &config.issuer,
            &config.client_id,
            config.client_secret.clone(),
            &config.redirect_uri,
        )
        .await
        .with_context(|| {
            format!(
                "Failed to query provider {} for cluster {}",
                config.issuer, config.name
            )
        })?;

        info!(
            cluster = %config.name,
            "Provider ready, authorization endpoint {}",
            provider.metadata().authorization_endpoint
        );
        clusters.push(Cluster::with_provider(config, Arc::new(provider)));
    }

    let relay = Relay::new(
        settings,
        ClusterRegistry::new(clusters)?,
        NonceStore::new(args.nonce_ttl),
        Arc::new(HandlebarsPresenter::new()?),
    );

    let result = api::serve(args.port, Arc::new(relay)).await;
    telemetry::shutdown_tracer();
    result
}

fn log_startup_args(args: &Args, file: &FileConfig, settings: &Settings) {
    let clusters = file
        .clusters
        .iter()
        .map(|cluster| format!("{} ({})", cluster.name, cluster.issuer))
        .collect::<Vec<_>>()
        .join(", ");

    let entries = [
        ("config", args.config.display().to_string()),
        ("listen", format!("tcp:{}", args.port)),
        ("web_path_prefix", settings.web_path_prefix().to_string()),
        ("nonce_ttl", format!("{}s", args.nonce_ttl.as_secs())),
        ("kubectl_version", settings.kubectl_version().to_string()),
        ("idp_ca_pem_set", settings.idp_ca_pem().is_some().to_string()),
        (
            "logo_uri",
            settings.logo_uri().unwrap_or("none").to_string(),
        ),
        ("clusters", clusters),
    ];
    log_entries("Startup configuration", &entries);
}

fn log_entries(title: &str, entries: &[(&str, String)]) {
    let max_key_len = entries.iter().map(|(key, _)| key.len()).max().unwrap_or(0);
    let mut message = format!("{}\n\n{title}:", dexgate_banner());
    for (key, value) in entries {
        let padding = " ".repeat(max_key_len.saturating_sub(key.len()));
        let _ =
            std::fmt::Write::write_fmt(&mut message, format_args!("\n  {key}:{padding} {value}"));
    }
    info!("{message}");
}

fn dexgate_banner() -> String {
    let short_hash = short_commit(crate::GIT_COMMIT_HASH);
    DEXGATE_BANNER.replace(
        "{VERSION}",
        &format!(" - {} - {}", env!("CARGO_PKG_VERSION"), short_hash),
    )
}

fn short_commit(hash: &str) -> String {
    let trimmed = hash.trim();
    trimmed.get(..7).unwrap_or(trimmed).to_string()
}

const DEXGATE_BANNER: &str = r"
    .--------.
    |  .--.  |
    | |    | |
  .-+-+----+-+-.
  |    (  )    |   D E X G A T E {VERSION}
  |     ||     |
  '------------'";
