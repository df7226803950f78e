//! Tor control protocol client.

use super::{Result, TorError};
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::debug;

/// Source of bootstrap-phase status strings.
#[async_trait]
pub trait ControlChannel: Send + Sync {
    /// Return the current bootstrap phase line, e.g.
    /// `NOTICE BOOTSTRAP PROGRESS=85 TAG=ap_conn_done SUMMARY="..."`.
    async fn bootstrap_phase(&self) -> Result<String>;
}

/// Control port over TCP. The connection is opened lazily and dropped on
/// any error, so the next poll reconnects.
pub struct TorControlPort {
    addr: String,
    password: Option<String>,
    conn: Mutex<Option<BufReader<TcpStream>>>,
}

impl TorControlPort {
    pub fn new(addr: impl Into<String>, password: Option<String>) -> Self {
        Self {
            addr: addr.into(),
            password,
            conn: Mutex::new(None),
        }
    }

    async fn connect(&self) -> Result<BufReader<TcpStream>> {
        let stream = TcpStream::connect(&self.addr).await?;
        let mut conn = BufReader::new(stream);

        let command = match &self.password {
            Some(password) => format!("AUTHENTICATE \"{}\"\r\n", escape_quoted(password)),
            None => "AUTHENTICATE\r\n".to_string(),
        };
        conn.get_mut().write_all(command.as_bytes()).await?;

        let (code, lines) = read_reply(&mut conn).await?;
        if !code.starts_with('2') {
            return Err(TorError::Authentication(lines.join(" ")));
        }
        debug!("Authenticated to Tor control port at {}", self.addr);
        Ok(conn)
    }

    async fn query(conn: &mut BufReader<TcpStream>) -> Result<String> {
        conn.get_mut()
            .write_all(b"GETINFO status/bootstrap-phase\r\n")
            .await?;
        let (code, lines) = read_reply(conn).await?;
        if !code.starts_with('2') {
            return Err(TorError::Protocol(lines.join(" ")));
        }
        lines
            .into_iter()
            .find_map(|line| {
                line.strip_prefix("status/bootstrap-phase=")
                    .map(str::to_string)
            })
            .ok_or_else(|| TorError::Protocol("Missing bootstrap-phase in reply".to_string()))
    }
}

#[async_trait]
impl ControlChannel for TorControlPort {
    async fn bootstrap_phase(&self) -> Result<String> {
        let mut guard = self.conn.lock().await;
        if guard.is_none() {
            *guard = Some(self.connect().await?);
        }
        let conn = guard.as_mut().ok_or(TorError::Closed)?;

        match Self::query(conn).await {
            Ok(phase) => Ok(phase),
            Err(e) => {
                *guard = None;
                Err(e)
            }
        }
    }
}

fn escape_quoted(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Read one control reply. Returns the final status code and the text of
/// every line with the `NNN-`/`NNN ` prefix removed.
async fn read_reply(conn: &mut BufReader<TcpStream>) -> Result<(String, Vec<String>)> {
    let mut lines = Vec::new();
    loop {
        let mut line = String::new();
        if conn.read_line(&mut line).await? == 0 {
            return Err(TorError::Closed);
        }
        let line = line.trim_end_matches(['\r', '\n']);
        let (code, separator, text) = match (line.get(..3), line.get(3..4), line.get(4..)) {
            (Some(code), Some(separator), Some(text)) => (code, separator, text),
            _ => return Err(TorError::Protocol(format!("Malformed reply line: {}", line))),
        };
        lines.push(text.to_string());
        if separator == " " {
            return Ok((code.to_string(), lines));
        }
    }
}
