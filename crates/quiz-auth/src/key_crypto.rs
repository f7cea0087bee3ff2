//! AES-256-GCM encryption of signing-key secret material at rest, keyed by
//! a 32-byte key read from the environment. A sibling RustCrypto AEAD to
//! `aes-siv` (used elsewhere in the wider crate family for deterministic
//! encryption of connector credentials) — GCM is used here instead because
//! key material is encrypted once and decrypted once per process, so
//! nonce reuse across calls is not a concern as long as each encryption
//! draws a fresh random nonce, which it does.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::RngCore;

#[derive(Debug, thiserror::Error)]
pub enum KeyCryptoError {
    #[error("master key must be exactly 32 bytes, got {0}")]
    BadMasterKeyLength(usize),
    #[error("AEAD encryption failed")]
    Encrypt,
    #[error("AEAD decryption failed (wrong key, or corrupted ciphertext)")]
    Decrypt,
}

/// Wraps the 32-byte master key used to encrypt/decrypt JWT signing secrets.
/// Never logged, never serialized.
#[derive(Clone)]
pub struct MasterKey(Key<Aes256Gcm>);

impl MasterKey {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KeyCryptoError> {
        if bytes.len() != 32 {
            return Err(KeyCryptoError::BadMasterKeyLength(bytes.len()));
        }
        Ok(Self(*Key::<Aes256Gcm>::from_slice(bytes)))
    }

    /// Reads and base64-decodes `TRIVIACORE_JWT_MASTER_KEY` from the
    /// environment, per §6's "Token-secret encryption key is read from
    /// environment".
    pub fn from_env() -> anyhow::Result<Self> {
        let encoded = std::env::var("TRIVIACORE_JWT_MASTER_KEY")
            .map_err(|_| anyhow::anyhow!("TRIVIACORE_JWT_MASTER_KEY is not set"))?;
        let bytes = base64::decode(encoded)?;
        Ok(Self::from_bytes(&bytes)?)
    }

    /// Encrypts `plaintext`, returning `(ciphertext, nonce)`.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<(Vec<u8>, [u8; 12]), KeyCryptoError> {
        let cipher = Aes256Gcm::new(&self.0);
        let mut nonce_bytes = [0u8; 12];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| KeyCryptoError::Encrypt)?;
        Ok((ciphertext, nonce_bytes))
    }

    pub fn decrypt(&self, ciphertext: &[u8], nonce: &[u8; 12]) -> Result<Vec<u8>, KeyCryptoError> {
        let cipher = Aes256Gcm::new(&self.0);
        let nonce = Nonce::from_slice(nonce);
        cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| KeyCryptoError::Decrypt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_secret_material() {
        let key = MasterKey::from_bytes(&[7u8; 32]).unwrap();
        let secret = b"super-secret-hmac-key-material-for-hs256";
        let (ciphertext, nonce) = key.encrypt(secret).unwrap();
        assert_ne!(ciphertext, secret);
        let decrypted = key.decrypt(&ciphertext, &nonce).unwrap();
        assert_eq!(decrypted, secret);
    }

    #[test]
    fn rejects_wrong_master_key() {
        let key_a = MasterKey::from_bytes(&[1u8; 32]).unwrap();
        let key_b = MasterKey::from_bytes(&[2u8; 32]).unwrap();
        let (ciphertext, nonce) = key_a.encrypt(b"secret").unwrap();
        assert!(key_b.decrypt(&ciphertext, &nonce).is_err());
    }

    #[test]
    fn rejects_short_master_key() {
        assert!(matches!(
            MasterKey::from_bytes(&[0u8; 16]),
            Err(KeyCryptoError::BadMasterKeyLength(16))
        ));
    }
}
