//! Authentication against the marketplace backend
//!
//! Exchanges username/password for a bearer token and stores it, together
//! with the user's identity, in the config file.

pub mod tokens;

use std::io::{self, BufRead, Write};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::models::UserIdentity;

pub use tokens::{StoredToken, TokenStore};

#[derive(Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginResponse {
    token: String,
    /// Token lifetime in seconds
    expires_in: Option<u64>,
    user: UserIdentity,
}

/// Read a password from stdin when it was not given on the command line.
fn prompt_password(username: &str) -> Result<String> {
    print!("Password for {}: ", username);
    io::stdout().flush().ok();
    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .context("Failed to read password")?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

/// Log in and persist the access token and identity.
pub async fn login(username: &str, password: Option<String>, force: bool) -> Result<()> {
    let mut config = Config::load()?;

    if !force {
        if let Some(token) = config.get_access_token() {
            if !token.is_expired() {
                println!("Already logged in. Use --force to re-authenticate.");
                return Ok(());
            }
            tracing::info!("Stored token expired, logging in again");
        }
    }

    let password = match password {
        Some(p) => p,
        None => prompt_password(username)?,
    };
    if password.is_empty() {
        bail!("Empty password");
    }

    let url = format!("{}/api/auth/login", config.api_url());
    tracing::debug!("Login POST {}", url);

    let resp = reqwest::Client::new()
        .post(&url)
        .json(&LoginRequest {
            username,
            password: &password,
        })
        .send()
        .await
        .with_context(|| format!("Login request to {} failed", url))?;

    let status = resp.status();
    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        bail!("Invalid username or password");
    }
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        bail!("Login failed: HTTP {}: {}", status.as_u16(), body);
    }

    let login: LoginResponse = resp
        .json()
        .await
        .context("Failed to parse login response")?;

    config.set_access_token(login.token, login.expires_in);
    println!("Logged in as {} (id {}).", login.user.username, login.user.id);
    config.user = Some(login.user);
    config.save()?;

    Ok(())
}

/// Clear stored credentials.
pub async fn logout() -> Result<()> {
    let mut config = Config::load()?;
    config.clear_tokens();
    config.save()?;
    println!("Logged out.");
    Ok(())
}

/// Display current auth status
pub async fn status() -> Result<()> {
    let config = Config::load()?;

    println!("API:         {}", config.api_url());
    println!("Live feed:   {}", config.live_url());

    match config.get_access_token() {
        Some(token) if !token.is_expired() => {
            println!("Token:       valid");
            if let Some(exp) = token.expires_at {
                println!("  expires_at: {}", exp);
            }
        }
        Some(_) => {
            println!("Token:       expired");
        }
        None => {
            println!("Token:       none");
        }
    }

    match config.user {
        Some(ref user) => println!("User:        {} (id {})", user.username, user.id),
        None => println!("User:        unknown"),
    }

    Ok(())
}
