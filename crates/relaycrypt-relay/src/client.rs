//! reqwest-backed relay client

use async_trait::async_trait;
use bytes::Bytes;
use relaycrypt_core::config::RelayConfig;
use relaycrypt_core::{TransferError, TransferResult};
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Response, Url};
use tracing::debug;

use crate::transport::{DownloadRelay, UploadRelay};
use crate::wire::{
    AnnouncedFile, ChunkUpload, DigestBody, ManifestAck, ManifestBody, RemoteManifest,
};

/// Build the shared HTTP client from relay config.
pub fn build_client(cfg: &RelayConfig) -> TransferResult<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(cfg.connect_timeout())
        .timeout(cfg.request_timeout())
        .user_agent(concat!("relaycrypt/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| TransferError::Config(format!("building HTTP client: {e}")))
}

/// Parse a relay base URL and apply the TLS policy.
///
/// If `enforce_tls` is true and the URL uses HTTP, this returns an error.
/// Otherwise, a warning is logged for non-HTTPS relays.
pub fn check_relay_url(raw: &str, enforce_tls: bool) -> TransferResult<Url> {
    let mut url = Url::parse(raw)
        .map_err(|e| TransferError::Config(format!("invalid relay url {raw}: {e}")))?;
    match url.scheme() {
        "https" => {}
        "http" => {
            if enforce_tls {
                return Err(TransferError::Config(format!(
                    "relay url uses plaintext HTTP ({raw}), but enforce_tls is enabled. \
                     Use an HTTPS relay or set relay.enforce_tls = false for local development."
                )));
            }
            tracing::warn!(
                relay = %raw,
                "relay uses plaintext HTTP; chunk metadata and tokens are visible on the wire"
            );
        }
        other => {
            return Err(TransferError::Config(format!(
                "unsupported relay url scheme '{other}' in {raw}"
            )))
        }
    }
    url.set_fragment(None);
    url.set_query(None);
    Ok(url)
}

fn network(err: reqwest::Error) -> TransferError {
    if err.is_decode() {
        return TransferError::Protocol(format!("malformed relay response: {err}"));
    }
    match (err.status(), err.url()) {
        (Some(status), Some(url)) => TransferError::Http {
            status: status.as_u16(),
            url: url.to_string(),
        },
        _ => TransferError::Network(err.to_string()),
    }
}

fn ensure_success(resp: Response) -> TransferResult<Response> {
    let status = resp.status();
    if status.is_success() {
        Ok(resp)
    } else {
        Err(TransferError::Http {
            status: status.as_u16(),
            url: resp.url().to_string(),
        })
    }
}

/// One session's view of the relay: base URL, token, and client id.
#[derive(Debug, Clone)]
pub struct HttpRelay {
    client: reqwest::Client,
    base: Url,
    token: String,
    client_id: String,
}

impl HttpRelay {
    pub fn new(
        client: reqwest::Client,
        base: Url,
        token: impl Into<String>,
        client_id: impl Into<String>,
    ) -> Self {
        Self {
            client,
            base,
            token: token.into(),
            client_id: client_id.into(),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// `{base}/{direction}/{token}/{rest...}?clientId=...`
    fn endpoint(&self, direction: &str, rest: &[&str]) -> TransferResult<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| {
                TransferError::Config(format!("relay url {} cannot be a base", self.base))
            })?
            .pop_if_empty()
            .push(direction)
            .push(&self.token)
            .extend(rest);
        url.query_pairs_mut().append_pair("clientId", &self.client_id);
        Ok(url)
    }

    async fn post_empty(&self, url: Url) -> TransferResult<()> {
        debug!(%url, "POST");
        let resp = self.client.post(url).send().await.map_err(network)?;
        ensure_success(resp)?;
        Ok(())
    }
}

#[async_trait]
impl UploadRelay for HttpRelay {
    async fn announce(&self, files: &[AnnouncedFile]) -> TransferResult<ManifestAck> {
        let url = self.endpoint("receive", &["manifest"])?;
        debug!(%url, files = files.len(), "announcing manifest");
        let resp = self
            .client
            .post(url)
            .json(&serde_json::json!({ "files": files }))
            .send()
            .await
            .map_err(network)?;
        let body = ensure_success(resp)?.bytes().await.map_err(network)?;
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(ManifestAck::default());
        }
        serde_json::from_slice(&body)
            .map_err(|e| TransferError::Protocol(format!("malformed manifest ack: {e}")))
    }

    async fn upload_chunk(&self, chunk: &ChunkUpload) -> TransferResult<()> {
        let url = self.endpoint("receive", &["chunk"])?;
        let part = Part::stream_with_length(
            Body::from(chunk.payload.clone()),
            chunk.payload.len() as u64,
        )
        .file_name(chunk.file_name.clone());
        let mut form = Form::new()
            .part("chunk", part)
            .text("relativePath", chunk.relative_path.clone())
            .text("fileName", chunk.file_name.clone())
            .text("chunkIndex", chunk.chunk_index.to_string())
            .text("totalChunks", chunk.total_chunks.to_string())
            .text("fileSize", chunk.file_size.to_string())
            .text("clientId", self.client_id.clone());
        if let Some(nonce) = &chunk.nonce {
            form = form.text("nonce", nonce.clone());
        }
        debug!(
            path = %chunk.relative_path,
            chunk = chunk.chunk_index,
            bytes = chunk.payload.len(),
            "uploading chunk"
        );
        let resp = self
            .client
            .post(url)
            .multipart(form)
            .send()
            .await
            .map_err(network)?;
        ensure_success(resp)?;
        Ok(())
    }

    async fn finalize(&self, relative_path: &str) -> TransferResult<()> {
        let url = self.endpoint("receive", &["finalize"])?;
        let form = Form::new().text("relativePath", relative_path.to_string());
        let resp = self
            .client
            .post(url)
            .multipart(form)
            .send()
            .await
            .map_err(network)?;
        ensure_success(resp)?;
        Ok(())
    }

    async fn complete_upload(&self) -> TransferResult<()> {
        self.post_empty(self.endpoint("receive", &["complete"])?).await
    }
}

#[async_trait]
impl DownloadRelay for HttpRelay {
    async fn manifest(&self) -> TransferResult<RemoteManifest> {
        let url = self.endpoint("send", &["manifest"])?;
        debug!(%url, "fetching manifest");
        let resp = self.client.get(url).send().await.map_err(network)?;
        let body = ensure_success(resp)?.bytes().await.map_err(network)?;
        let parsed: ManifestBody = serde_json::from_slice(&body)
            .map_err(|e| TransferError::Protocol(format!("malformed manifest: {e}")))?;
        Ok(parsed.into())
    }

    async fn download_chunk(&self, file_index: usize, chunk_index: u32) -> TransferResult<Bytes> {
        let file = file_index.to_string();
        let chunk = chunk_index.to_string();
        let url = self.endpoint("send", &[&file, "chunk", &chunk])?;
        let resp = self.client.get(url).send().await.map_err(network)?;
        ensure_success(resp)?.bytes().await.map_err(network)
    }

    async fn file_digest(&self, file_index: usize) -> TransferResult<String> {
        let file = file_index.to_string();
        let url = self.endpoint("send", &[&file, "hash"])?;
        let resp = self.client.get(url).send().await.map_err(network)?;
        let body = ensure_success(resp)?.bytes().await.map_err(network)?;
        let parsed: DigestBody = serde_json::from_slice(&body)
            .map_err(|e| TransferError::Protocol(format!("malformed digest response: {e}")))?;
        Ok(parsed.digest)
    }

    async fn complete_download(&self) -> TransferResult<()> {
        self.post_empty(self.endpoint("send", &["complete"])?).await
    }
}
