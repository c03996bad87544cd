//! Single-use, time-bounded state nonces for CSRF protection.
//!
//! Every login redirect carries a fresh nonce in the OAuth2 `state` parameter. The
//! callback only proceeds if the nonce is still in the store, and checking it removes it,
//! so a callback URL can never be replayed.
//!
//! Expired entries are swept on every `issue` instead of by a background task. Issuance
//! is the dominant operation, so the map stays bounded by the number of logins started
//! within one TTL window.

use anyhow::{Context, Result};
use base64ct::{Base64UrlUnpadded, Encoding};
use rand::{RngCore, rngs::OsRng};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

pub const DEFAULT_NONCE_TTL: Duration = Duration::from_secs(10 * 60);

// 256 bits
const NONCE_BYTES: usize = 32;

#[derive(Debug)]
pub struct NonceStore {
    ttl: Duration,
    entries: Mutex<HashMap<String, Instant>>,
}

impl Default for NonceStore {
    fn default() -> Self {
        Self::new(DEFAULT_NONCE_TTL)
    }
}

impl NonceStore {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Generate a new nonce and remember it until it is validated or expires.
    ///
    /// # Errors
    /// Returns an error if the OS random source fails or the TTL cannot be represented
    /// as an expiry instant. There is no fallback value.
    pub async fn issue(&self) -> Result<String> {
        let value = generate_nonce(&mut OsRng)?;
        self.insert(value.clone()).await?;
        Ok(value)
    }

    pub(crate) async fn insert(&self, value: String) -> Result<()> {
        let now = Instant::now();
        let expires_at = now
            .checked_add(self.ttl)
            .with_context(|| format!("nonce TTL of {}s is out of range", self.ttl.as_secs()))?;

        let mut entries = self.entries.lock().await;
        entries.retain(|_, expires_at| *expires_at > now);
        entries.insert(value, expires_at);
        Ok(())
    }

    /// Consume a nonce. Returns `true` at most once per issued value, and only before
    /// its expiry.
    pub async fn validate(&self, value: &str) -> bool {
        if value.is_empty() {
            return false;
        }

        // Check and removal share one critical section.
        let mut entries = self.entries.lock().await;
        match entries.remove(value) {
            Some(expires_at) => Instant::now() < expires_at,
            None => false,
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

fn generate_nonce<R: RngCore>(rng: &mut R) -> Result<String> {
    let mut bytes = [0u8; NONCE_BYTES];
    rng.try_fill_bytes(&mut bytes)
        .context("failed to generate state nonce")?;
    Ok(Base64UrlUnpadded::encode_string(&bytes))
}
