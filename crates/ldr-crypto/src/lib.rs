//! Authenticated symmetric encryption for persisted sensitive fields
//! (loader SQL text, source database password). See spec §4.3 (C3).
//!
//! Ciphertext layout: `base64(nonce[12] || ciphertext || tag[16])`.
//! Nulls pass through unchanged — callers hold `Option<String>`, not this
//! crate.

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Key};
use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
/// Minimum base64 length that could plausibly hold nonce+tag (empty plaintext).
const MIN_ENCRYPTED_LEN: usize = 28;

/// A 32-byte AES-256-GCM key, supplied at startup from configuration.
pub struct EncryptionService {
    cipher: Aes256Gcm,
}

impl EncryptionService {
    /// Build the service from a raw 32-byte key. Fails with
    /// `CRYPTO_KEY_INVALID` if the key is empty or the wrong length.
    pub fn new(key_bytes: &[u8]) -> Result<Self> {
        if key_bytes.len() != 32 {
            bail!(
                "CRYPTO_KEY_INVALID: encryption key must be 32 bytes, got {}",
                key_bytes.len()
            );
        }
        let key = Key::<Aes256Gcm>::from_slice(key_bytes);
        Ok(Self {
            cipher: Aes256Gcm::new(key),
        })
    }

    /// Build the service from a base64-encoded 32-byte key (the format
    /// `encryption.key` is supplied in, per spec §6.3).
    pub fn from_base64_key(encoded: &str) -> Result<Self> {
        let bytes = BASE64
            .decode(encoded.trim())
            .context("CRYPTO_KEY_INVALID: encryption key is not valid base64")?;
        Self::new(&bytes)
    }

    /// Encrypt plaintext, returning a base64-encoded `nonce || ciphertext || tag`.
    pub fn encrypt(&self, plain: &str) -> Result<String> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plain.as_bytes())
            .map_err(|_| anyhow::anyhow!("CRYPTO_DECRYPT_FAILED: encryption failure"))?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(nonce.as_slice());
        out.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(out))
    }

    /// Decrypt a ciphertext produced by [`encrypt`]. Fails with
    /// `CRYPTO_DECRYPT_FAILED` on a wrong key or tampered ciphertext.
    pub fn decrypt(&self, cipher_b64: &str) -> Result<String> {
        let raw = BASE64
            .decode(cipher_b64.trim())
            .context("CRYPTO_DECRYPT_FAILED: ciphertext is not valid base64")?;

        if raw.len() < NONCE_LEN + TAG_LEN {
            bail!("CRYPTO_DECRYPT_FAILED: ciphertext too short");
        }
        let (nonce_bytes, ct) = raw.split_at(NONCE_LEN);
        let nonce = aes_gcm::Nonce::from_slice(nonce_bytes);

        let plain = self
            .cipher
            .decrypt(nonce, ct)
            .map_err(|_| anyhow::anyhow!("CRYPTO_DECRYPT_FAILED: wrong key or tampered ciphertext"))?;

        String::from_utf8(plain).context("CRYPTO_DECRYPT_FAILED: decrypted bytes are not utf-8")
    }

    /// Encrypt an `Option<String>`; `None` passes through unchanged.
    pub fn encrypt_opt(&self, plain: Option<&str>) -> Result<Option<String>> {
        plain.map(|p| self.encrypt(p)).transpose()
    }

    /// Decrypt an `Option<String>`; `None` passes through unchanged.
    pub fn decrypt_opt(&self, cipher: Option<&str>) -> Result<Option<String>> {
        cipher.map(|c| self.decrypt(c)).transpose()
    }
}

/// Heuristic: does `s` look like something [`EncryptionService::encrypt`]
/// produced? Valid base64, long enough to hold nonce+tag.
pub fn is_encrypted(s: &str) -> bool {
    let s = s.trim();
    if s.len() < MIN_ENCRYPTED_LEN {
        return false;
    }
    BASE64.decode(s).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> EncryptionService {
        EncryptionService::new(&[7u8; 32]).unwrap()
    }

    #[test]
    fn round_trips_plaintext() {
        let svc = service();
        let cipher = svc.encrypt("select * from t where x = :fromTime").unwrap();
        assert!(is_encrypted(&cipher));
        let plain = svc.decrypt(&cipher).unwrap();
        assert_eq!(plain, "select * from t where x = :fromTime");
    }

    #[test]
    fn round_trips_mixed_script_text() {
        let svc = service();
        let original = "مرحبا 你好 naïve café";
        let cipher = svc.encrypt(original).unwrap();
        assert_eq!(svc.decrypt(&cipher).unwrap(), original);
    }

    #[test]
    fn two_encryptions_of_same_plaintext_differ() {
        let svc = service();
        let a = svc.encrypt("same").unwrap();
        let b = svc.encrypt("same").unwrap();
        assert_ne!(a, b, "nonces must be random per call");
    }

    #[test]
    fn rejects_short_key() {
        let err = EncryptionService::new(&[1u8; 16]).unwrap_err();
        assert!(err.to_string().contains("CRYPTO_KEY_INVALID"));
    }

    #[test]
    fn rejects_empty_key() {
        let err = EncryptionService::new(&[]).unwrap_err();
        assert!(err.to_string().contains("CRYPTO_KEY_INVALID"));
    }

    #[test]
    fn decrypt_fails_with_wrong_key() {
        let svc_a = EncryptionService::new(&[1u8; 32]).unwrap();
        let svc_b = EncryptionService::new(&[2u8; 32]).unwrap();
        let cipher = svc_a.encrypt("secret").unwrap();
        let err = svc_b.decrypt(&cipher).unwrap_err();
        assert!(err.to_string().contains("CRYPTO_DECRYPT_FAILED"));
    }

    #[test]
    fn decrypt_fails_on_tampered_ciphertext() {
        let svc = service();
        let mut cipher = svc.encrypt("secret").unwrap();
        cipher.replace_range(0..1, if cipher.starts_with('A') { "B" } else { "A" });
        assert!(svc.decrypt(&cipher).is_err());
    }

    #[test]
    fn none_passes_through_unchanged() {
        let svc = service();
        assert_eq!(svc.encrypt_opt(None).unwrap(), None);
        assert_eq!(svc.decrypt_opt(None).unwrap(), None);
    }

    #[test]
    fn is_encrypted_rejects_plain_short_strings() {
        assert!(!is_encrypted("hello"));
        assert!(!is_encrypted(""));
    }
}
