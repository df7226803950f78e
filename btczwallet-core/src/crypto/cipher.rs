//! AES-256-GCM envelopes for wallet server parameters and responses.
//!
//! The protocol key is the first 32 bytes of the URL-safe base64 decoding of
//! the pairing secret. The wire format is:
//! `base64(nonce(12) || ciphertext || auth_tag(16))`

use crate::crypto::{CryptoError, Result};
use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig, STANDARD};
use base64::engine::DecodePaddingMode;
use base64::{alphabet, Engine};
use zeroize::Zeroize;

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// URL-safe decoder that tolerates both padded and unpadded secrets.
const SECRET_DECODER: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Symmetric key shared with the wallet server.
#[derive(Clone)]
pub struct ProtocolKey {
    key: [u8; 32],
}

impl ProtocolKey {
    /// Derive the protocol key from the pairing secret.
    pub fn from_secret(secret_key: &str) -> Result<Self> {
        let mut decoded = SECRET_DECODER
            .decode(secret_key.trim())
            .map_err(|e| CryptoError::InvalidSecret(e.to_string()))?;

        if decoded.len() < 32 {
            let got = decoded.len();
            decoded.zeroize();
            return Err(CryptoError::InvalidKeyLength { expected: 32, got });
        }

        let mut key = [0u8; 32];
        key.copy_from_slice(&decoded[..32]);
        decoded.zeroize();

        Ok(Self { key })
    }

    /// Create a key from raw bytes
    pub fn from_bytes(key: [u8; 32]) -> Self {
        Self { key }
    }

    /// Get the raw key bytes (use sparingly)
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.key
    }
}

impl Drop for ProtocolKey {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

impl std::fmt::Debug for ProtocolKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ProtocolKey(..)")
    }
}

/// Encrypt a plaintext into a base64 envelope.
///
/// A fresh random nonce is generated for every call.
pub fn encrypt_envelope(key: &ProtocolKey, plaintext: &[u8]) -> Result<String> {
    let cipher = Aes256Gcm::new(key.as_bytes().into());
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let nonce_bytes: [u8; NONCE_LEN] = nonce.into();

    // aes-gcm appends the tag, so this is ciphertext || tag
    let ciphertext_with_tag = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

    let mut wire = Vec::with_capacity(NONCE_LEN + ciphertext_with_tag.len());
    wire.extend_from_slice(&nonce_bytes);
    wire.extend_from_slice(&ciphertext_with_tag);

    Ok(STANDARD.encode(wire))
}

/// Decrypt a base64 envelope produced by the server or by [`encrypt_envelope`].
pub fn decrypt_envelope(key: &ProtocolKey, envelope: &str) -> Result<Vec<u8>> {
    let wire = STANDARD
        .decode(envelope.trim())
        .map_err(|e| CryptoError::DecryptionFailed(format!("Invalid base64: {}", e)))?;

    if wire.len() < NONCE_LEN + TAG_LEN {
        return Err(CryptoError::DecryptionFailed(
            "Envelope too short".to_string(),
        ));
    }

    let nonce_bytes: [u8; NONCE_LEN] = wire[..NONCE_LEN]
        .try_into()
        .map_err(|_| CryptoError::DecryptionFailed("Invalid nonce length".to_string()))?;

    let cipher = Aes256Gcm::new(key.as_bytes().into());
    cipher
        .decrypt(&Nonce::from(nonce_bytes), &wire[NONCE_LEN..])
        .map_err(|_| CryptoError::AuthenticationFailed)
}
