//! Relay health check

use relaycrypt_core::{TransferError, TransferResult};
use reqwest::Url;

/// Verify the relay is reachable with `GET /health`
pub async fn check_health(client: &reqwest::Client, base: &Url) -> TransferResult<()> {
    let url = base
        .join("health")
        .map_err(|e| TransferError::Config(format!("invalid relay url {base}: {e}")))?;
    let resp = client
        .get(url.clone())
        .send()
        .await
        .map_err(|e| TransferError::Network(format!("relay health check failed: {e}")))?;
    if !resp.status().is_success() {
        return Err(TransferError::Http {
            status: resp.status().as_u16(),
            url: url.to_string(),
        });
    }
    Ok(())
}

/// Returns true if the relay answers, false otherwise (non-panicking)
pub async fn is_healthy(client: &reqwest::Client, base: &Url) -> bool {
    check_health(client, base).await.is_ok()
}
