//! Authenticated HTTP client for the marketplace API
//!
//! Wraps reqwest::Client with bearer token injection and status checking.

use anyhow::{bail, Context, Result};
use serde::Serialize;

use crate::auth::TokenStore;
use crate::config::Config;
use crate::models::UserIdentity;

/// Authenticated client for the chat REST endpoints.
pub struct MarketClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
    identity: Option<UserIdentity>,
    page_size: u32,
}

impl MarketClient {
    /// Load config and build client. Fails if no valid token is stored.
    pub fn new() -> Result<Self> {
        let config = Config::load()?;
        Self::from_config(&config)
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let token = config
            .get_access_token()
            .context("Not logged in. Run 'carmarket-chat login' first.")?;
        if token.is_expired() {
            bail!("Token expired. Run 'carmarket-chat login'.");
        }

        Ok(Self {
            http: reqwest::Client::new(),
            base_url: config.api_url(),
            token: token.token,
            identity: config.user.clone(),
            page_size: config.page_size(),
        })
    }

    /// The logged-in user as recorded at login time.
    pub fn identity(&self) -> Option<&UserIdentity> {
        self.identity.as_ref()
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    pub(crate) fn token(&self) -> &str {
        &self.token
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// GET request with bearer auth.
    pub async fn get(&self, path: &str) -> Result<reqwest::Response> {
        let url = self.url(path);
        tracing::debug!("GET {}", url);

        let resp = self
            .http
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await
            .with_context(|| format!("GET {} failed", url))?;

        check_response(resp, &url).await
    }

    /// GET request with bearer auth and query parameters.
    pub async fn get_query(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<reqwest::Response> {
        let url = self.url(path);
        tracing::debug!("GET {} {:?}", url, query);

        let resp = self
            .http
            .get(&url)
            .bearer_auth(&self.token)
            .query(query)
            .send()
            .await
            .with_context(|| format!("GET {} failed", url))?;

        check_response(resp, &url).await
    }

    /// POST request with bearer auth and a JSON body.
    pub async fn post<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<reqwest::Response> {
        let url = self.url(path);
        tracing::debug!("POST {}", url);

        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await
            .with_context(|| format!("POST {} failed", url))?;

        check_response(resp, &url).await
    }

    /// POST request with bearer auth and no body.
    pub async fn post_empty(&self, path: &str) -> Result<reqwest::Response> {
        let url = self.url(path);
        tracing::debug!("POST {}", url);

        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .send()
            .await
            .with_context(|| format!("POST {} failed", url))?;

        check_response(resp, &url).await
    }
}

/// Check HTTP response status code and return a clear error on failure.
async fn check_response(resp: reqwest::Response, url: &str) -> Result<reqwest::Response> {
    let status = resp.status();
    if status == reqwest::StatusCode::UNAUTHORIZED {
        bail!(
            "401 Unauthorized for {}. Token may be invalid -- run 'carmarket-chat login'.",
            url
        );
    }
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        bail!("HTTP {} for {}: {}", status.as_u16(), url, body);
    }
    Ok(resp)
}
