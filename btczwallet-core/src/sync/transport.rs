//! HTTP over the Tor SOCKS proxy.

use super::{Result, SyncError};
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

/// A fully signed GET request, ready to send.
#[derive(Debug, Clone)]
pub struct SignedRequest {
    pub url: String,
    pub path: String,
    pub api_key: String,
    pub timestamp: String,
    pub signature: String,
    /// Encrypted parameter envelope, sent as `?data=...`.
    pub data: Option<String>,
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

/// Seam between the request client and the network.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn get(&self, request: &SignedRequest) -> Result<HttpResponse>;

    /// Open a long-lived response and forward its body line by line until
    /// the server closes it. Fails if the status is not 200.
    async fn stream_lines(&self, request: &SignedRequest, lines: mpsc::Sender<String>)
        -> Result<()>;
}

/// reqwest client routed through `socks5h`, so onion names resolve inside Tor.
pub struct ReqwestTransport {
    client: reqwest::Client,
    stream_client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(socks_proxy: &str, timeout: Duration) -> Result<Self> {
        let proxy = || {
            reqwest::Proxy::all(socks_proxy)
                .map_err(|e| SyncError::InvalidInput(format!("Invalid proxy URL: {}", e)))
        };

        let client = reqwest::Client::builder()
            .proxy(proxy()?)
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::InvalidInput(e.to_string()))?;

        // No overall timeout: the push stream stays open indefinitely
        let stream_client = reqwest::Client::builder()
            .proxy(proxy()?)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| SyncError::InvalidInput(e.to_string()))?;

        Ok(Self {
            client,
            stream_client,
        })
    }

    fn build(&self, client: &reqwest::Client, request: &SignedRequest) -> reqwest::RequestBuilder {
        let mut builder = client
            .get(&request.url)
            .header("Authorization", &request.api_key)
            .header("X-Timestamp", &request.timestamp)
            .header("X-Signature", &request.signature);
        if let Some(data) = &request.data {
            builder = builder.query(&[("data", data)]);
        }
        builder
    }
}

fn no_response(e: reqwest::Error) -> SyncError {
    SyncError::NoResponse(e.to_string())
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn get(&self, request: &SignedRequest) -> Result<HttpResponse> {
        debug!("GET {}", request.path);
        let resp = self
            .build(&self.client, request)
            .send()
            .await
            .map_err(no_response)?;
        let status = resp.status().as_u16();
        let body = resp.text().await.map_err(no_response)?;
        Ok(HttpResponse { status, body })
    }

    async fn stream_lines(
        &self,
        request: &SignedRequest,
        lines: mpsc::Sender<String>,
    ) -> Result<()> {
        let mut resp = self
            .build(&self.stream_client, request)
            .send()
            .await
            .map_err(no_response)?;
        if resp.status() != reqwest::StatusCode::OK {
            return Err(SyncError::NoResponse(format!(
                "Stream rejected with status {}",
                resp.status()
            )));
        }

        let mut pending: Vec<u8> = Vec::new();
        while let Some(chunk) = resp.chunk().await.map_err(no_response)? {
            pending.extend_from_slice(&chunk);
            while let Some(pos) = pending.iter().position(|b| *b == b'\n') {
                let raw: Vec<u8> = pending.drain(..=pos).collect();
                let line = String::from_utf8_lossy(&raw).into_owned();
                if lines.send(line).await.is_err() {
                    return Ok(());
                }
            }
        }
        Ok(())
    }
}
