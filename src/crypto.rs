//! # Archive Encryption
//!
//! Sealing and opening of backup archives with AES-256-GCM.
//!
//! ## Algorithm
//!
//! - **Cipher**: AES-256-GCM (authenticated, 16-byte tag)
//! - **Master key**: 256 random bits from the OS RNG, stored by [`crate::key`]
//! - **Per-archive key**: PBKDF2-HMAC-SHA256 over the master key with a random
//!   16-byte salt and a fixed [`KDF_ITERATIONS`] iteration count
//! - **Nonce**: 96 random bits per archive
//!
//! ## Sealed Format
//!
//! ```text
//! [RGARCH01][16-byte salt][12-byte nonce][ciphertext + 16-byte GCM tag]
//! ```
//!
//! The iteration count is part of the format version; changing it requires a
//! new magic header so existing archives stay readable.

use crate::error::{GuardError, Result};
use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use hmac::Hmac;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::Path;

pub const KEY_SIZE: usize = 32; // 256 bits
pub const NONCE_SIZE: usize = 12; // 96 bits for GCM
pub const SALT_SIZE: usize = 16;
pub const KDF_ITERATIONS: u32 = 100_000;

const MAGIC_HEADER: &[u8] = b"RGARCH01";

#[derive(Clone)]
pub struct CryptoKey {
    key: [u8; KEY_SIZE],
}

impl std::fmt::Debug for CryptoKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CryptoKey(..)")
    }
}

impl CryptoKey {
    /// Generate a new random key
    pub fn generate() -> Self {
        let mut key = [0u8; KEY_SIZE];
        OsRng.fill_bytes(&mut key);
        Self { key }
    }

    /// Create a key from existing bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != KEY_SIZE {
            return Err(GuardError::InvalidKeyFormat);
        }
        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(bytes);
        Ok(Self { key })
    }

    /// Get the key as bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.key
    }

    fn cipher_for(&self, salt: &[u8]) -> Result<Aes256Gcm> {
        let mut derived = [0u8; KEY_SIZE];
        pbkdf2::pbkdf2::<Hmac<Sha256>>(&self.key, salt, KDF_ITERATIONS, &mut derived)
            .map_err(|e| GuardError::Crypto(e.to_string()))?;
        Aes256Gcm::new_from_slice(&derived).map_err(|e| GuardError::Crypto(e.to_string()))
    }

    /// Seal `plaintext` into the archive format.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut salt = [0u8; SALT_SIZE];
        OsRng.fill_bytes(&mut salt);
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce_bytes);

        let cipher = self.cipher_for(&salt)?;
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
            .map_err(|e| GuardError::Crypto(e.to_string()))?;

        let mut result =
            Vec::with_capacity(MAGIC_HEADER.len() + SALT_SIZE + NONCE_SIZE + ciphertext.len());
        result.extend_from_slice(MAGIC_HEADER);
        result.extend_from_slice(&salt);
        result.extend_from_slice(&nonce_bytes);
        result.extend_from_slice(&ciphertext);

        Ok(result)
    }

    /// Open data produced by [`CryptoKey::encrypt`].
    ///
    /// Fails on a wrong key or any tampering; nothing is returned in that case.
    pub fn decrypt(&self, sealed: &[u8]) -> Result<Vec<u8>> {
        let header_len = MAGIC_HEADER.len() + SALT_SIZE + NONCE_SIZE;
        if sealed.len() < header_len {
            return Err(GuardError::Crypto("Ciphertext too short".into()));
        }
        if !Self::is_sealed(sealed) {
            return Err(GuardError::Crypto("Invalid encrypted data format".into()));
        }

        let data = &sealed[MAGIC_HEADER.len()..];
        let (salt, rest) = data.split_at(SALT_SIZE);
        let (nonce_bytes, ciphertext) = rest.split_at(NONCE_SIZE);

        let cipher = self.cipher_for(salt)?;
        cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|e| GuardError::Crypto(e.to_string()))
    }

    /// Check if data carries the archive magic header
    pub fn is_sealed(data: &[u8]) -> bool {
        data.len() >= MAGIC_HEADER.len() && &data[..MAGIC_HEADER.len()] == MAGIC_HEADER
    }
}

/// Hex-encoded SHA-256 of `data`.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Hex-encoded SHA-256 of a file, streamed.
pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}
