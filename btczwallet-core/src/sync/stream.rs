//! Server push channel, read as a server-sent-event stream.

use super::engine::SyncContext;
use super::events::SessionEvent;
use super::Result;
use crate::crypto::RequestParams;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub const RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// Payload of a `data:` line, or `None` for anything else.
pub fn parse_event_line(raw: &str) -> Option<String> {
    let line = raw.trim_end_matches(['\r', '\n']);
    line.strip_prefix("data:")
        .map(|payload| payload.trim_start().to_string())
}

pub struct StreamClient {
    ctx: Arc<SyncContext>,
    path: String,
}

impl StreamClient {
    pub fn new(ctx: Arc<SyncContext>) -> Self {
        let path = ctx.config().stream_path.clone();
        Self { ctx, path }
    }

    /// Hold the stream open, reconnecting after every disconnect, until
    /// cancelled.
    pub async fn run(&self, cancel: CancellationToken) {
        if !self.ctx.bootstrap().wait_ready(&cancel).await {
            return;
        }

        loop {
            let result = tokio::select! {
                _ = cancel.cancelled() => break,
                result = self.connect_once() => result,
            };
            match result {
                Ok(count) => debug!("Stream closed after {} event(s)", count),
                Err(e) => debug!("Stream error: {}", e),
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(RECONNECT_DELAY) => {}
            }
        }
        info!("Stream stopped");
    }

    /// One connection. Returns the number of events published.
    async fn connect_once(&self) -> Result<usize> {
        let request = self.ctx.client().prepare(
            self.ctx.credential(),
            &self.path,
            &RequestParams::new(),
        )?;
        let transport = self.ctx.client().transport().clone();
        let (tx, mut rx) = mpsc::channel::<String>(64);

        let reader = async move { transport.stream_lines(&request, tx).await };
        let consumer = async {
            let mut published = 0;
            while let Some(line) = rx.recv().await {
                if let Some(payload) = parse_event_line(&line) {
                    self.ctx.hub().emit(SessionEvent::StreamAction(payload));
                    published += 1;
                }
            }
            published
        };

        let (result, published) = tokio::join!(reader, consumer);
        result.map(|_| published)
    }
}
