//! Cryptographic primitives for the wallet server protocol.
//!
//! This module provides:
//! - AES-256-GCM parameter and response envelopes
//! - HMAC-SHA512 request signing over canonical JSON

pub mod cipher;
pub mod signing;

pub use cipher::{decrypt_envelope, encrypt_envelope, ProtocolKey};
pub use signing::{canonical_json, request_timestamp, sign_request, RequestParams};

use thiserror::Error;

/// Errors that can occur in cryptographic operations
#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Invalid secret key: {0}")]
    InvalidSecret(String),

    #[error("Invalid key length: expected {expected}, got {got}")]
    InvalidKeyLength { expected: usize, got: usize },

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("Authentication failed - data may have been tampered with")]
    AuthenticationFailed,
}

/// Result type for crypto operations
pub type Result<T> = std::result::Result<T, CryptoError>;
