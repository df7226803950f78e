//! Wallet server protocol and reconciliation.
//!
//! Implements the client side of the wallet server sync:
//! - Signed, encrypted requests over the Tor SOCKS proxy
//! - Polling loops that converge the local cache toward server truth
//! - Idempotent merges keyed by natural keys (txid, address, contact id, timestamp)
//! - A handler table for presentation events

pub mod actions;
pub mod client;
pub mod confirmations;
pub mod engine;
pub mod events;
pub mod models;
pub mod reconcile;
pub mod stream;
pub mod transport;
pub mod version;

#[cfg(test)]
pub(crate) mod test_support;

pub use actions::WalletActions;
pub use client::RequestClient;
pub use confirmations::{confirmations, Confirmation, CONFIRMED_DEPTH};
pub use engine::{LoopKind, ReconciliationEngine, ServerGate, ServerStatus, SyncContext};
pub use events::{
    EventHub, EventHubBuilder, EventKind, Presentation, SessionEvent, Surface, SurfaceState,
};
pub use stream::StreamClient;
pub use transport::{HttpResponse, HttpTransport, ReqwestTransport, SignedRequest};
pub use version::{check_version, ProtocolVersion};

use crate::crypto::CryptoError;
use crate::DatabaseError;
use thiserror::Error;

/// Failure taxonomy for wallet server calls
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Transport is not ready")]
    TransportNotReady,

    #[error("No response from server: {0}")]
    NoResponse(String),

    #[error("{0}")]
    ServerError(String),

    #[error("Server version {} is incompatible, requires at least {required}", .found.as_deref().unwrap_or("unknown"))]
    IncompatibleVersion {
        found: Option<String>,
        required: String,
    },

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl SyncError {
    /// Whether a background loop should simply try again on its next tick.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::NoResponse(_) | SyncError::Crypto(_))
    }
}

/// Result type for sync operations
pub type Result<T> = std::result::Result<T, SyncError>;
