//! Current user endpoint (/api/users/me)

use anyhow::{Context, Result};

use super::client::MarketClient;
use crate::config::Config;
use crate::models::UserIdentity;

/// Fetch the current user and refresh the identity stored in config.
pub async fn whoami() -> Result<()> {
    let mut config = Config::load()?;
    let client = MarketClient::from_config(&config)?;
    let resp = client.get("/api/users/me").await?;
    let me: UserIdentity = resp
        .json()
        .await
        .context("Failed to parse /api/users/me response")?;

    println!();
    println!(
        "Display Name: {}",
        me.display_name.as_deref().unwrap_or("(none)")
    );
    println!("Username:     {}", me.username);
    println!("ID:           {}", me.id);

    if config.user.as_ref() != Some(&me) {
        tracing::info!("Updating stored identity");
        config.user = Some(me);
        config.save()?;
    }

    Ok(())
}
