use super::{cluster::Cluster, nonce::NonceStore};
use anyhow::Result;
use tracing::{debug, info, instrument};
use url::Url;

/// Build the provider authorization URL for `cluster`, carrying a freshly issued state nonce.
///
/// `access_type=offline` is always requested so the provider hands out a refresh token.
///
/// # Errors
/// Returns an error if a nonce cannot be generated.
#[instrument(skip_all, fields(cluster = %cluster.name()))]
pub async fn authorization_url(nonces: &NonceStore, cluster: &Cluster) -> Result<Url> {
    info!("Handling login for cluster");

    let state = nonces.issue().await?;
    let config = cluster.config();

    let mut url = cluster.authorization_endpoint().clone();
    {
        let mut query = url.query_pairs_mut();
        query
            .append_pair("client_id", &config.client_id)
            .append_pair("redirect_uri", &config.redirect_uri)
            .append_pair("response_type", "code")
            .append_pair("scope", &config.scopes.join(" "))
            .append_pair("state", &state)
            .append_pair("access_type", "offline");

        if let Some(connector_id) = &config.connector_id {
            debug!("Using dex connector with id {connector_id}");
            query.append_pair("connector_id", connector_id);
        }
    }

    Ok(url)
}
