//! Scripted wallet server for tests.
//!
//! Verifies every request signature, decrypts the parameter envelope and
//! answers from a per-route script.

use super::transport::{HttpResponse, HttpTransport, SignedRequest};
use super::{Result, SyncError};
use crate::crypto::{
    canonical_json, decrypt_envelope, encrypt_envelope, sign_request, ProtocolKey, RequestParams,
};
use super::engine::SyncContext;
use super::events::{EventHub, Presentation};
use super::RequestClient;
use crate::config::WalletConfig;
use crate::database::{Credential, Database};
use crate::tor::{ControlChannel, TorBootstrap};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub const TEST_SECRET: &str = "q83vEjRWeJq83vEjRWeJq83vEjRWeJq83vEjRWeJq80=";

pub fn test_credential() -> Credential {
    Credential::new("wallet.onion", "api-key", TEST_SECRET)
}

/// Control channel that reports a finished bootstrap on every poll.
struct FinishedChannel;

#[async_trait]
impl ControlChannel for FinishedChannel {
    async fn bootstrap_phase(&self) -> crate::tor::Result<String> {
        Ok("NOTICE BOOTSTRAP PROGRESS=100 TAG=done SUMMARY=\"Done\"".to_string())
    }
}

pub fn finished_channel() -> Arc<dyn ControlChannel> {
    Arc::new(FinishedChannel)
}

/// Bootstrap that has not been started.
pub fn idle_bootstrap() -> Arc<TorBootstrap> {
    Arc::new(TorBootstrap::new(finished_channel(), Duration::from_millis(10)))
}

/// Bootstrap already in `Ready`.
pub async fn ready_bootstrap() -> Arc<TorBootstrap> {
    let bootstrap = idle_bootstrap();
    bootstrap.start();
    assert!(bootstrap.wait_ready(&CancellationToken::new()).await);
    bootstrap
}

/// In-memory cache holding the test credential.
pub fn paired_database() -> Arc<Mutex<Database>> {
    let db = Database::in_memory().unwrap();
    db.ensure_all().unwrap();
    db.save_credential(&test_credential()).unwrap();
    Arc::new(Mutex::new(db))
}

/// Sync context over `server` with a paired in-memory cache.
pub async fn test_context(
    server: Arc<FakeServer>,
    hub: EventHub,
    presentation: Arc<dyn Presentation>,
) -> Arc<SyncContext> {
    Arc::new(SyncContext::new(
        paired_database(),
        RequestClient::new(server),
        test_credential(),
        Arc::new(hub),
        presentation,
        ready_bootstrap().await,
        WalletConfig::default(),
    ))
}

#[derive(Debug, Clone)]
pub enum Reply {
    /// Encrypted `{"data": ...}` envelope around the value.
    Data(Value),
    /// The value as a bare JSON body.
    Plain(Value),
    /// `{"error": ...}` with HTTP 400.
    Error(String),
    /// Arbitrary status and body.
    Raw(u16, String),
    /// Transport failure before any response.
    Unreachable,
}

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub path: String,
    pub params: RequestParams,
}

type RouteKey = (String, Option<String>);

pub struct FakeServer {
    secret: String,
    /// Replies are consumed in order; the last one repeats.
    routes: Mutex<HashMap<RouteKey, VecDeque<Reply>>>,
    calls: Mutex<Vec<RecordedCall>>,
    stream: Mutex<Vec<String>>,
}

impl FakeServer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            secret: TEST_SECRET.to_string(),
            routes: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            stream: Mutex::new(Vec::new()),
        })
    }

    fn key(path: &str, get: Option<&str>) -> RouteKey {
        (path.to_string(), get.map(str::to_string))
    }

    /// Answer every call to `path` (optionally only `get=<get>`) with `reply`.
    pub fn route(&self, path: &str, get: Option<&str>, reply: Reply) {
        let mut routes = self.routes.lock().unwrap();
        routes.insert(Self::key(path, get), VecDeque::from([reply]));
    }

    /// Queue a reply after those already scripted for the route.
    pub fn push(&self, path: &str, get: Option<&str>, reply: Reply) {
        let mut routes = self.routes.lock().unwrap();
        routes
            .entry(Self::key(path, get))
            .or_default()
            .push_back(reply);
    }

    pub fn set_stream(&self, lines: &[&str]) {
        *self.stream.lock().unwrap() = lines.iter().map(|l| l.to_string()).collect();
    }

    pub fn calls(&self, path: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.path == path)
            .count()
    }

    pub fn recorded(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn last_params(&self, path: &str) -> Option<RequestParams> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|c| c.path == path)
            .map(|c| c.params.clone())
    }

    fn protocol_key(&self) -> ProtocolKey {
        ProtocolKey::from_secret(&self.secret).unwrap()
    }

    /// Authenticate and record a request; returns its decrypted parameters.
    fn accept(&self, request: &SignedRequest) -> std::result::Result<RequestParams, HttpResponse> {
        let params: RequestParams = match &request.data {
            Some(envelope) => {
                let plaintext = decrypt_envelope(&self.protocol_key(), envelope)
                    .map_err(|_| reject(400, "Invalid data"))?;
                serde_json::from_slice(&plaintext).map_err(|_| reject(400, "Invalid data"))?
            }
            None => RequestParams::new(),
        };

        let expected = sign_request(&self.secret, &request.timestamp, &canonical_json(&params))
            .map_err(|_| reject(500, "Signing failed"))?;
        if request.api_key != "api-key" || expected != request.signature {
            return Err(reject(401, "Invalid signature"));
        }

        self.calls.lock().unwrap().push(RecordedCall {
            path: request.path.clone(),
            params: params.clone(),
        });
        Ok(params)
    }

    fn next_reply(&self, path: &str, params: &RequestParams) -> Option<Reply> {
        let mut routes = self.routes.lock().unwrap();
        let get = params.get("get").map(String::as_str);
        let queue = match routes.contains_key(&Self::key(path, get)) {
            true => routes.get_mut(&Self::key(path, get)),
            false => routes.get_mut(&Self::key(path, None)),
        }?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

fn reject(status: u16, message: &str) -> HttpResponse {
    HttpResponse {
        status,
        body: json!({ "error": message }).to_string(),
    }
}

#[async_trait]
impl HttpTransport for FakeServer {
    async fn get(&self, request: &SignedRequest) -> Result<HttpResponse> {
        let params = match self.accept(request) {
            Ok(params) => params,
            Err(response) => return Ok(response),
        };

        match self.next_reply(&request.path, &params) {
            Some(Reply::Data(value)) => {
                let envelope =
                    encrypt_envelope(&self.protocol_key(), value.to_string().as_bytes())?;
                Ok(HttpResponse {
                    status: 200,
                    body: json!({ "data": envelope }).to_string(),
                })
            }
            Some(Reply::Plain(value)) => Ok(HttpResponse {
                status: 200,
                body: value.to_string(),
            }),
            Some(Reply::Error(message)) => Ok(reject(400, &message)),
            Some(Reply::Raw(status, body)) => Ok(HttpResponse { status, body }),
            Some(Reply::Unreachable) => Err(SyncError::NoResponse(
                "Connection refused by proxy".to_string(),
            )),
            None => Ok(reject(404, "Not found")),
        }
    }

    async fn stream_lines(
        &self,
        request: &SignedRequest,
        lines: mpsc::Sender<String>,
    ) -> Result<()> {
        if self.accept(request).is_err() {
            return Err(SyncError::NoResponse("Stream rejected".to_string()));
        }
        let scripted = self.stream.lock().unwrap().clone();
        if scripted.is_empty() {
            return Err(SyncError::NoResponse("Stream unavailable".to_string()));
        }
        for line in scripted {
            if lines.send(format!("{}\n", line)).await.is_err() {
                break;
            }
        }
        Ok(())
    }
}
