//! AES-256-CBC encryption for stored OAuth tokens.
//!
//! Each secret is encrypted with a fresh random 16-byte IV and serialized as an
//! envelope: `hex(iv) ":" hex(ciphertext)`. The key is 32 bytes, supplied as 64
//! hex characters through [`EncryptionConfig`].

use crate::config::EncryptionConfig;
use aes::Aes256;
use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::{rngs::OsRng, RngCore};
use std::fmt;
use thiserror::Error;

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// Size of the encryption key in bytes (256 bits)
pub const KEY_SIZE: usize = 32;

/// Size of the CBC initialization vector in bytes
const IV_SIZE: usize = 16;

/// AES block size; ciphertext length is always a multiple of this
const BLOCK_SIZE: usize = 16;

/// Cipher failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CipherError {
    /// Key material is missing or is not exactly 32 bytes
    #[error("encryption key misconfigured: {0}")]
    Configuration(String),

    /// Envelope is malformed, or the key/padding does not match
    #[error("decryption failed: {0}")]
    Decryption(String),
}

/// Symmetric cipher for token envelopes.
///
/// Constructed once from configuration; a `Cipher` cannot exist without a
/// valid 32-byte key, so every encrypt/decrypt call runs against validated
/// key material.
#[derive(Clone)]
pub struct Cipher {
    key: [u8; KEY_SIZE],
}

impl fmt::Debug for Cipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cipher").field("key", &"<redacted>").finish()
    }
}

impl Cipher {
    /// Builds a cipher from the `[encryption]` config section.
    ///
    /// # Errors
    /// * `CipherError::Configuration` - If no key is configured or it is malformed
    pub fn from_config(config: &EncryptionConfig) -> Result<Self, CipherError> {
        let key_hex = config
            .key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                CipherError::Configuration("ENCRYPTION_KEY is not set".to_string())
            })?;

        Self::from_hex_key(key_hex)
    }

    /// Validates a hex-encoded key and builds a cipher from it.
    ///
    /// # Arguments
    /// * `key_hex` - 64 hex characters (32 bytes)
    pub fn from_hex_key(key_hex: &str) -> Result<Self, CipherError> {
        let bytes = hex::decode(key_hex.trim()).map_err(|e| {
            CipherError::Configuration(format!("encryption key is not valid hex: {}", e))
        })?;

        let key: [u8; KEY_SIZE] = bytes.as_slice().try_into().map_err(|_| {
            CipherError::Configuration(format!(
                "encryption key must be {} bytes ({} hex characters), got {} bytes",
                KEY_SIZE,
                KEY_SIZE * 2,
                bytes.len()
            ))
        })?;

        Ok(Self { key })
    }

    /// Encrypts a secret into an `iv:ciphertext` envelope.
    ///
    /// A new random IV is drawn for every call, so encrypting the same
    /// plaintext twice never yields the same envelope.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, CipherError> {
        let mut iv = [0u8; IV_SIZE];
        OsRng.fill_bytes(&mut iv);

        let encryptor = Aes256CbcEnc::new_from_slices(&self.key, &iv)
            .map_err(|e| CipherError::Configuration(format!("failed to create cipher: {}", e)))?;
        let ciphertext = encryptor.encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());

        Ok(format!("{}:{}", hex::encode(iv), hex::encode(ciphertext)))
    }

    /// Decrypts an `iv:ciphertext` envelope back into the original secret.
    pub fn decrypt(&self, envelope: &str) -> Result<String, CipherError> {
        let (iv_hex, ciphertext_hex) = envelope.split_once(':').ok_or_else(|| {
            CipherError::Decryption("envelope is missing the ':' separator".to_string())
        })?;

        let iv = hex::decode(iv_hex)
            .map_err(|e| CipherError::Decryption(format!("invalid IV hex: {}", e)))?;
        if iv.len() != IV_SIZE {
            return Err(CipherError::Decryption(format!(
                "invalid IV size: expected {}, got {}",
                IV_SIZE,
                iv.len()
            )));
        }

        let ciphertext = hex::decode(ciphertext_hex)
            .map_err(|e| CipherError::Decryption(format!("invalid ciphertext hex: {}", e)))?;
        if ciphertext.is_empty() || ciphertext.len() % BLOCK_SIZE != 0 {
            return Err(CipherError::Decryption(format!(
                "ciphertext length {} is not a positive multiple of {}",
                ciphertext.len(),
                BLOCK_SIZE
            )));
        }

        let decryptor = Aes256CbcDec::new_from_slices(&self.key, &iv)
            .map_err(|e| CipherError::Decryption(format!("failed to create cipher: {}", e)))?;
        let plaintext = decryptor
            .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
            .map_err(|_| {
                CipherError::Decryption("bad padding (wrong key or corrupted data)".to_string())
            })?;

        String::from_utf8(plaintext)
            .map_err(|_| CipherError::Decryption("decrypted data is not valid UTF-8".to_string()))
    }
}
