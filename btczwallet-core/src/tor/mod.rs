//! Tor circuit bootstrap.
//!
//! The wallet never issues a network call before the local Tor client reports
//! a complete bootstrap. This module watches the control port and exposes a
//! progress value and a readiness signal; it never touches the SOCKS side.

pub mod bootstrap;
pub mod control;

pub use bootstrap::{parse_progress, BootstrapState, TorBootstrap};
pub use control::{ControlChannel, TorControlPort};

use thiserror::Error;

/// Control channel errors
#[derive(Error, Debug)]
pub enum TorError {
    #[error("Control port I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Control protocol error: {0}")]
    Protocol(String),

    #[error("Control port authentication failed: {0}")]
    Authentication(String),

    #[error("Control connection closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, TorError>;
