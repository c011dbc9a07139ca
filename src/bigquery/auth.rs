// ABOUTME: Ambient Google credentials for the BigQuery REST API
// ABOUTME: Caches access tokens from the environment or the gcloud CLI and refreshes them

use crate::utils;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio::sync::Mutex;

/// Environment variable holding a ready-made OAuth access token
pub const ACCESS_TOKEN_ENV: &str = "GOOGLE_OAUTH_ACCESS_TOKEN";

/// Age after which a cached token is fetched again; Google tokens live an hour
const TOKEN_LIFETIME: Duration = Duration::from_secs(45 * 60);

/// Where access tokens come from
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn fetch(&self) -> Result<String>;
}

/// `GOOGLE_OAUTH_ACCESS_TOKEN`, else `gcloud auth print-access-token`
pub struct AmbientTokenSource;

#[async_trait]
impl TokenSource for AmbientTokenSource {
    async fn fetch(&self) -> Result<String> {
        access_token().await
    }
}

struct FixedTokenSource(String);

#[async_trait]
impl TokenSource for FixedTokenSource {
    async fn fetch(&self) -> Result<String> {
        Ok(self.0.clone())
    }
}

struct CachedToken {
    value: String,
    fetched_at: Instant,
}

/// Access token cache shared by every request of a client
///
/// A token is reused until it ages past [`TOKEN_LIFETIME`] or BigQuery
/// rejects it, whichever comes first.
pub struct Credentials {
    source: Box<dyn TokenSource>,
    cached: Mutex<Option<CachedToken>>,
}

impl Credentials {
    pub fn new(source: impl TokenSource + 'static) -> Self {
        Self {
            source: Box::new(source),
            cached: Mutex::new(None),
        }
    }

    pub fn ambient() -> Self {
        Self::new(AmbientTokenSource)
    }

    /// Always hands out `token`; refreshing yields the same value
    pub fn fixed(token: impl Into<String>) -> Self {
        Self::new(FixedTokenSource(token.into()))
    }

    /// Current token, fetched when none is cached or the cached one is stale
    pub async fn token(&self) -> Result<String> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.fetched_at.elapsed() < TOKEN_LIFETIME {
                return Ok(token.value.clone());
            }
            tracing::debug!("Cached access token expired; fetching a new one");
        }
        self.fetch_into(&mut cached).await
    }

    /// Replace a token the server refused
    ///
    /// When another request already swapped `rejected` out, the newer token is
    /// returned without fetching again.
    pub async fn refresh(&self, rejected: &str) -> Result<String> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.value != rejected && token.fetched_at.elapsed() < TOKEN_LIFETIME {
                return Ok(token.value.clone());
            }
        }
        self.fetch_into(&mut cached).await
    }

    async fn fetch_into(&self, cached: &mut Option<CachedToken>) -> Result<String> {
        let value = self.source.fetch().await?;
        *cached = Some(CachedToken {
            value: value.clone(),
            fetched_at: Instant::now(),
        });
        Ok(value)
    }
}

/// Resolve an access token for BigQuery
///
/// Prefers `GOOGLE_OAUTH_ACCESS_TOKEN`; otherwise asks `gcloud` for the
/// active account's token.
pub async fn access_token() -> Result<String> {
    if let Some(token) = token_from_env(std::env::var(ACCESS_TOKEN_ENV).ok()) {
        tracing::debug!("Using access token from {}", ACCESS_TOKEN_ENV);
        return Ok(token);
    }

    utils::check_required_tools()?;

    let output = Command::new("gcloud")
        .arg("auth")
        .arg("print-access-token")
        .output()
        .await
        .context("Failed to execute gcloud. Is the Google Cloud SDK installed?")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("gcloud auth print-access-token failed: {}", stderr.trim());
    }

    let token = String::from_utf8(output.stdout)
        .context("gcloud returned a non UTF-8 access token")?
        .trim()
        .to_string();
    if token.is_empty() {
        bail!("gcloud returned an empty access token. Run `gcloud auth login` first");
    }

    tracing::debug!("Using access token from gcloud");
    Ok(token)
}

fn token_from_env(value: Option<String>) -> Option<String> {
    value
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
}
