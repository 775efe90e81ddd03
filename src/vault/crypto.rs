//! Authenticated encryption for credentials at rest.
//!
//! AES-256-GCM with a fresh random 96-bit nonce per encryption.
//! Ciphertexts are stored as `<hex-nonce>:<hex-ciphertext>`.

use aes_gcm::aead::{Aead, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Key, KeyInit, Nonce};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use sha2::{Digest, Sha256};

use crate::errors::Error;

/// Fixed salt mixed into key derivation
const KEY_SALT: &[u8] = b"shipwright-vault-v1";

const NONCE_LEN: usize = 12;

/// Symmetric cipher wrapping the vault's 256-bit key.
pub struct VaultCipher {
    cipher: Aes256Gcm,
}

impl VaultCipher {
    /// Derive the cipher key from a configured master key.
    ///
    /// The master key may be hex- or base64-encoded; either way the
    /// actual key is SHA-256(salt || master bytes).
    pub fn from_master_key(master: &str) -> Self {
        let master_bytes = hex::decode(master)
            .ok()
            .or_else(|| BASE64.decode(master).ok())
            .unwrap_or_else(|| master.as_bytes().to_vec());
        Self::from_key_bytes(&derive_key(&master_bytes))
    }

    /// Generate a random, process-scoped key.
    ///
    /// Credentials encrypted under an ephemeral key cannot be decrypted
    /// after a restart; callers log the degraded-mode warning.
    pub fn ephemeral() -> Self {
        let key = Aes256Gcm::generate_key(&mut OsRng);
        Self {
            cipher: Aes256Gcm::new(&key),
        }
    }

    fn from_key_bytes(key_bytes: &[u8; 32]) -> Self {
        let key = Key::<Aes256Gcm>::from_slice(key_bytes);
        Self {
            cipher: Aes256Gcm::new(key),
        }
    }

    /// Encrypt plaintext, returning `<hex-nonce>:<hex-ciphertext>`.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<String, Error> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| Error::Internal("encryption failed".to_string()))?;
        Ok(format!("{}:{}", hex::encode(nonce), hex::encode(ciphertext)))
    }

    /// Decrypt a `<hex-nonce>:<hex-ciphertext>` string.
    pub fn decrypt(&self, stored: &str) -> Result<Vec<u8>, Error> {
        let (nonce_hex, ciphertext_hex) = stored
            .split_once(':')
            .ok_or_else(|| Error::InvalidCredential("malformed ciphertext".to_string()))?;

        let nonce_bytes = hex::decode(nonce_hex)
            .map_err(|_| Error::InvalidCredential("malformed nonce encoding".to_string()))?;
        if nonce_bytes.len() != NONCE_LEN {
            return Err(Error::InvalidCredential("invalid nonce length".to_string()));
        }

        let ciphertext = hex::decode(ciphertext_hex)
            .map_err(|_| Error::InvalidCredential("malformed ciphertext encoding".to_string()))?;

        self.cipher
            .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_ref())
            .map_err(|_| Error::InvalidCredential("decryption failed".to_string()))
    }
}

fn derive_key(master: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(KEY_SALT);
    hasher.update(master);
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let cipher = VaultCipher::from_master_key("test-master-key");
        let plaintext = b"secret credential payload";

        let stored = cipher.encrypt(plaintext).unwrap();
        let (nonce_hex, _) = stored.split_once(':').unwrap();
        assert_eq!(nonce_hex.len(), NONCE_LEN * 2);

        let decrypted = cipher.decrypt(&stored).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_fresh_nonce_per_encryption() {
        let cipher = VaultCipher::from_master_key("test-master-key");
        let first = cipher.encrypt(b"same data").unwrap();
        let second = cipher.encrypt(b"same data").unwrap();

        assert_ne!(first, second);
        assert_eq!(cipher.decrypt(&first).unwrap(), b"same data");
        assert_eq!(cipher.decrypt(&second).unwrap(), b"same data");
    }

    #[test]
    fn test_wrong_key_fails() {
        let stored = VaultCipher::from_master_key("key-one")
            .encrypt(b"secret")
            .unwrap();
        assert!(VaultCipher::from_master_key("key-two")
            .decrypt(&stored)
            .is_err());
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let cipher = VaultCipher::from_master_key("test-master-key");
        let stored = cipher.encrypt(b"secret").unwrap();

        // Flip the last ciphertext nibble
        let mut tampered = stored.clone();
        let last = tampered.pop().unwrap();
        tampered.push(if last == '0' { '1' } else { '0' });

        assert!(cipher.decrypt(&tampered).is_err());
    }

    #[test]
    fn test_invalid_nonce_length_rejected() {
        let cipher = VaultCipher::from_master_key("test-master-key");
        assert!(cipher.decrypt("abcd:deadbeef").is_err());
    }

    #[test]
    fn test_hex_and_raw_master_keys_differ() {
        // A hex-decodable master key is decoded before derivation, so it
        // yields a different cipher than the literal string bytes.
        let hex_key = VaultCipher::from_master_key("00aabbcc");
        let raw_key = VaultCipher::from_master_key("not-hex-!!");
        let stored = hex_key.encrypt(b"x").unwrap();
        assert!(raw_key.decrypt(&stored).is_err());
    }

    #[test]
    fn test_roundtrip_various_lengths() {
        let cipher = VaultCipher::from_master_key("test-master-key");
        for len in [0usize, 1, 15, 16, 17, 1024] {
            let data = vec![0x5a; len];
            let stored = cipher.encrypt(&data).unwrap();
            assert_eq!(cipher.decrypt(&stored).unwrap(), data);
        }
    }
}
