//! BitcoinZ Mobile Wallet Core Library
//!
//! The wallet never runs a node. Every chain and messaging operation is
//! delegated to a remote wallet server reached over a Tor circuit, and a
//! local SQLite cache is kept converging toward server truth by a set of
//! polling reconciliation loops.

pub mod config;
pub mod crypto;
pub mod database;
pub mod platform;
pub mod session;
pub mod sync;
pub mod tor;
pub mod units;

pub use config::{LoopIntervals, WalletConfig};
pub use crypto::{CryptoError, ProtocolKey};
pub use database::{Credential, Database};
pub use session::{Session, SessionStatus};
pub use sync::{EventHub, EventKind, SessionEvent, Surface, SyncError};
pub use tor::{BootstrapState, TorBootstrap};

use thiserror::Error;

/// Result type for wallet operations
pub type Result<T> = std::result::Result<T, WalletError>;

/// Local cache store errors
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Lock poisoned: {0}")]
    LockPoisoned(String),
}

/// General error type for wallet operations
#[derive(Error, Debug)]
pub enum WalletError {
    #[error("Crypto error: {0}")]
    Crypto(#[from] crypto::CryptoError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Sync error: {0}")]
    Sync(#[from] sync::SyncError),

    #[error("Tor error: {0}")]
    Tor(#[from] tor::TorError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Wallet is not paired with a server")]
    NotPaired,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
