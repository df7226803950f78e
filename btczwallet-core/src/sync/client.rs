//! Authenticated request client for the wallet server.
//!
//! Every call is signed; calls with parameters carry them only inside an
//! AES-256-GCM envelope. The client never retries. Retry policy belongs to
//! the reconciliation loops.

use super::transport::{HttpTransport, SignedRequest};
use super::{Result, SyncError};
use crate::crypto::{
    canonical_json, decrypt_envelope, encrypt_envelope, request_timestamp, sign_request,
    ProtocolKey, RequestParams,
};
use crate::database::Credential;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// Build a parameter map from string pairs.
pub fn params<K: Into<String>, V: Into<String>>(
    pairs: impl IntoIterator<Item = (K, V)>,
) -> RequestParams {
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

#[derive(Clone)]
pub struct RequestClient {
    transport: Arc<dyn HttpTransport>,
}

impl RequestClient {
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &Arc<dyn HttpTransport> {
        &self.transport
    }

    /// Sign (and, with parameters, encrypt) a request without sending it.
    pub fn prepare(
        &self,
        credential: &Credential,
        path: &str,
        params: &RequestParams,
    ) -> Result<SignedRequest> {
        let canonical = canonical_json(params);
        let timestamp = request_timestamp();
        let signature = sign_request(&credential.secret_key, &timestamp, &canonical)?;

        let data = if params.is_empty() {
            None
        } else {
            let key = ProtocolKey::from_secret(&credential.secret_key)?;
            Some(encrypt_envelope(&key, canonical.as_bytes())?)
        };

        Ok(SignedRequest {
            url: format!("{}{}", credential.base_url(), path),
            path: path.to_string(),
            api_key: credential.api_key.clone(),
            timestamp,
            signature,
            data,
        })
    }

    /// Send a request and return the logical response body.
    ///
    /// `{"error": ...}` becomes [`SyncError::ServerError`]; `{"data": ...}` is
    /// decrypted; any other JSON body is returned unchanged.
    pub async fn request(
        &self,
        credential: &Credential,
        path: &str,
        params: &RequestParams,
    ) -> Result<Value> {
        let request = self.prepare(credential, path, params)?;
        let response = self.transport.get(&request).await?;

        let body: Value = serde_json::from_str(&response.body).map_err(|e| {
            SyncError::NoResponse(format!(
                "Unparseable response from {} (HTTP {}): {}",
                path, response.status, e
            ))
        })?;

        if let Some(error) = body.get("error") {
            let message = match error {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            warn!("Server rejected {}: {}", path, message);
            return Err(SyncError::ServerError(message));
        }

        if !(200..300).contains(&response.status) {
            return Err(SyncError::NoResponse(format!(
                "HTTP {} from {}",
                response.status, path
            )));
        }

        match body.get("data") {
            Some(Value::String(envelope)) => {
                let key = ProtocolKey::from_secret(&credential.secret_key)?;
                let plaintext = decrypt_envelope(&key, envelope)?;
                debug!("Decrypted {} byte response from {}", plaintext.len(), path);
                serde_json::from_slice(&plaintext).map_err(|e| {
                    SyncError::NoResponse(format!("Malformed payload from {}: {}", path, e))
                })
            }
            _ => Ok(body),
        }
    }

    /// [`request`](Self::request) and deserialize into `T`.
    pub async fn request_as<T: DeserializeOwned>(
        &self,
        credential: &Credential,
        path: &str,
        params: &RequestParams,
    ) -> Result<T> {
        let value = self.request(credential, path, params).await?;
        serde_json::from_value(value).map_err(|e| {
            SyncError::NoResponse(format!("Unexpected payload from {}: {}", path, e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::test_support::{FakeServer, Reply, TEST_SECRET};
    use serde_json::json;

    fn credential() -> Credential {
        Credential::new("wallet.onion", "api-key", TEST_SECRET)
    }

    #[test]
    fn test_prepare_without_params_sends_no_data() {
        let client = RequestClient::new(FakeServer::new());
        let request = client
            .prepare(&credential(), "/status", &RequestParams::new())
            .unwrap();

        assert_eq!(request.url, "http://wallet.onion/status");
        assert_eq!(request.api_key, "api-key");
        assert!(request.data.is_none());
        assert_eq!(
            request.signature,
            sign_request(TEST_SECRET, &request.timestamp, "{}").unwrap()
        );
    }

    #[test]
    fn test_prepare_encrypts_params() {
        let client = RequestClient::new(FakeServer::new());
        let p = params([("get", "unread")]);
        let request = client.prepare(&credential(), "/messages", &p).unwrap();

        let envelope = request.data.unwrap();
        assert!(!envelope.contains("unread"));
        let key = ProtocolKey::from_secret(TEST_SECRET).unwrap();
        let plaintext = decrypt_envelope(&key, &envelope).unwrap();
        assert_eq!(plaintext, br#"{"get":"unread"}"#.to_vec());
    }

    #[tokio::test]
    async fn test_encrypted_response_is_decrypted() {
        let server = FakeServer::new();
        server.route("/balances", None, Reply::Data(json!({"transparent": 1.5, "shielded": "2"})));
        let client = RequestClient::new(server.clone());

        let value = client
            .request(&credential(), "/balances", &RequestParams::new())
            .await
            .unwrap();
        assert_eq!(value["transparent"], json!(1.5));
        assert_eq!(server.calls("/balances"), 1);
    }

    #[tokio::test]
    async fn test_plain_response_used_as_is() {
        let server = FakeServer::new();
        server.route(
            "/addresses",
            None,
            Reply::Plain(json!({"transparent": "t1a", "shielded": "zs1a"})),
        );
        let client = RequestClient::new(server);

        let value = client
            .request(&credential(), "/addresses", &RequestParams::new())
            .await
            .unwrap();
        assert_eq!(value["shielded"], json!("zs1a"));
    }

    #[tokio::test]
    async fn test_error_payload_is_server_error() {
        let server = FakeServer::new();
        server.route("/book", None, Reply::Error("Address already exists".into()));
        let client = RequestClient::new(server);

        let err = client
            .request(&credential(), "/book", &params([("name", "a"), ("address", "t1")]))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::ServerError(ref m) if m == "Address already exists"));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_transport_failure_is_no_response() {
        let server = FakeServer::new();
        server.route("/status", None, Reply::Unreachable);
        let client = RequestClient::new(server);

        let err = client
            .request(&credential(), "/status", &RequestParams::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::NoResponse(_)));
    }

    #[tokio::test]
    async fn test_undecryptable_envelope_is_retryable() {
        let server = FakeServer::new();
        let foreign = ProtocolKey::from_bytes([9u8; 32]);
        let envelope = encrypt_envelope(&foreign, b"{}").unwrap();
        server.route(
            "/balances",
            None,
            Reply::Raw(200, json!({ "data": envelope }).to_string()),
        );
        let client = RequestClient::new(server);

        let err = client
            .request(&credential(), "/balances", &RequestParams::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Crypto(_)));
        assert!(err.is_retryable());
    }
}
