//! Payload sealing
//!
//! Change payloads leave the device sealed with AES-256-GCM. The server only
//! ever stores ciphertext. A sealed payload is the 12-byte nonce followed by
//! the ciphertext.

use aes_gcm::{
    aead::{rand_core::RngCore, Aead, KeyInit, OsRng},
    Aes256Gcm, Key, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use sha2::{Digest, Sha256};
use thiserror::Error;

const NONCE_LEN: usize = 12;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum VaultError {
    #[error("Encryption failed")]
    Seal,

    #[error("Decryption failed: wrong key or corrupted payload")]
    Open,

    #[error("Sealed payload too short ({0} bytes)")]
    Truncated(usize),

    #[error("Invalid key: {0}")]
    InvalidKey(String),
}

/// Seals and opens Change payloads
pub trait Vault {
    fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, VaultError>;
    fn open(&self, sealed: &[u8]) -> Result<Vec<u8>, VaultError>;
}

/// AES-256-GCM vault keyed by the derived key material
pub struct AesGcmVault {
    cipher: Aes256Gcm,
}

impl AesGcmVault {
    pub fn new(key: &[u8; 32]) -> Self {
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key)),
        }
    }

    /// Build from the base64 key stored in the config file
    pub fn from_base64(encoded: &str) -> Result<Self, VaultError> {
        Ok(Self::new(&key_from_base64(encoded)?))
    }
}

impl Vault for AesGcmVault {
    fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, VaultError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
            .map_err(|_| VaultError::Seal)?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    fn open(&self, sealed: &[u8]) -> Result<Vec<u8>, VaultError> {
        if sealed.len() < NONCE_LEN {
            return Err(VaultError::Truncated(sealed.len()));
        }
        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| VaultError::Open)
    }
}

/// Derive the payload key from the account id and the recovery secret
pub fn derive_key(user_id: &str, secret: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(user_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(secret.as_bytes());
    hasher.finalize().into()
}

pub fn key_to_base64(key: &[u8; 32]) -> String {
    BASE64.encode(key)
}

pub fn key_from_base64(encoded: &str) -> Result<[u8; 32], VaultError> {
    let bytes = BASE64
        .decode(encoded)
        .map_err(|e| VaultError::InvalidKey(e.to_string()))?;
    bytes
        .try_into()
        .map_err(|b: Vec<u8>| VaultError::InvalidKey(format!("expected 32 bytes, got {}", b.len())))
}
