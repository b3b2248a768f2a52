//! AES-256-GCM encryption for API credentials stored at rest.
//!
//! Credentials are encrypted under a single master key supplied through
//! configuration. Each ciphertext carries its own random 96-bit nonce.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine as _;
use rand::Rng;

use crate::error::CoreError;

/// Master key length in bytes.
pub const KEY_LEN: usize = 32;

/// Nonce length in bytes.
pub const NONCE_LEN: usize = 12;

/// Ciphertext plus the nonce it was sealed with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedSecret {
    pub ciphertext: Vec<u8>,
    pub nonce: Vec<u8>,
}

/// Master key used to seal and open credentials.
#[derive(Clone)]
pub struct MasterKey([u8; KEY_LEN]);

impl MasterKey {
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Decode a standard-alphabet base64 key of exactly [`KEY_LEN`] bytes.
    pub fn from_base64(encoded: &str) -> Result<Self, CoreError> {
        let raw = BASE64_STANDARD
            .decode(encoded.trim())
            .map_err(|e| CoreError::Crypto(format!("Master key is not valid base64: {e}")))?;
        let bytes: [u8; KEY_LEN] = raw.try_into().map_err(|raw: Vec<u8>| {
            CoreError::Crypto(format!(
                "Master key must be {KEY_LEN} bytes, got {}",
                raw.len()
            ))
        })?;
        Ok(Self(bytes))
    }

    fn cipher(&self) -> Result<Aes256Gcm, CoreError> {
        Aes256Gcm::new_from_slice(&self.0)
            .map_err(|_| CoreError::Crypto("Invalid master key length".into()))
    }

    /// Encrypt `plaintext` under a fresh random nonce.
    pub fn seal(&self, plaintext: &str) -> Result<SealedSecret, CoreError> {
        let mut nonce = [0u8; NONCE_LEN];
        rand::rng().fill(&mut nonce);
        let ciphertext = self
            .cipher()?
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_bytes())
            .map_err(|_| CoreError::Crypto("Encryption failed".into()))?;
        Ok(SealedSecret {
            ciphertext,
            nonce: nonce.to_vec(),
        })
    }

    /// Decrypt a sealed secret back to its UTF-8 plaintext.
    pub fn open(&self, ciphertext: &[u8], nonce: &[u8]) -> Result<String, CoreError> {
        if nonce.len() != NONCE_LEN {
            return Err(CoreError::Crypto(format!(
                "Nonce must be {NONCE_LEN} bytes, got {}",
                nonce.len()
            )));
        }
        let plaintext = self
            .cipher()?
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CoreError::Crypto("Decryption failed".into()))?;
        String::from_utf8(plaintext)
            .map_err(|_| CoreError::Crypto("Decrypted secret is not UTF-8".into()))
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MasterKey(..)")
    }
}
