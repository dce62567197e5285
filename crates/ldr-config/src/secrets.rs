//! Secret resolution — the single source of truth for runtime secret values.
//!
//! # Contract
//! - Config YAML stores only the **env var NAME** that holds a secret, never
//!   the secret itself (`loader.encryption.key_env`, default
//!   `LDR_ENCRYPTION_KEY`).
//! - At startup, callers invoke [`resolve_encryption_key`] once and pass the
//!   result into `ldr_crypto::EncryptionService::new`; never scatter
//!   `std::env::var` calls elsewhere.
//! - Error messages reference the env var **NAME**, never its value.
//! - An empty/absent/malformed key is a hard startup failure (spec §4.3,
//!   §6.3: "empty or shorter keys cause hard startup failure").

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::Value;

const DEFAULT_KEY_ENV: &str = "LDR_ENCRYPTION_KEY";

/// Resolve the env var name holding the base64-encoded encryption key from
/// the merged config (`loader.encryption.key_env`), falling back to
/// [`DEFAULT_KEY_ENV`] when the config is silent.
fn key_env_name(config_json: &Value) -> String {
    config_json
        .pointer("/loader/encryption/key_env")
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(DEFAULT_KEY_ENV)
        .to_string()
}

/// Resolve the 32 raw encryption key bytes for `ldr_crypto::EncryptionService`
/// from the environment, per spec §4.3 / §6.3.
///
/// Fails with `CRYPTO_KEY_INVALID` if the named env var is unset, blank, not
/// valid base64, or does not decode to exactly 32 bytes.
pub fn resolve_encryption_key(config_json: &Value) -> Result<Vec<u8>> {
    let var_name = key_env_name(config_json);

    let raw = std::env::var(&var_name)
        .with_context(|| format!("CRYPTO_KEY_INVALID: required env var '{var_name}' is not set"))?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        bail!("CRYPTO_KEY_INVALID: env var '{var_name}' is set but blank");
    }

    let bytes = BASE64
        .decode(trimmed)
        .with_context(|| format!("CRYPTO_KEY_INVALID: env var '{var_name}' is not valid base64"))?;

    if bytes.len() != 32 {
        bail!(
            "CRYPTO_KEY_INVALID: env var '{var_name}' decodes to {} bytes, expected 32",
            bytes.len()
        );
    }

    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // std::env::var is process-global; serialise tests that touch it.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn resolves_default_env_var_name() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var(DEFAULT_KEY_ENV, BASE64.encode([9u8; 32]));
        let key = resolve_encryption_key(&serde_json::json!({})).unwrap();
        assert_eq!(key.len(), 32);
        std::env::remove_var(DEFAULT_KEY_ENV);
    }

    #[test]
    fn honours_configured_env_var_name() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var("CUSTOM_KEY_VAR", BASE64.encode([3u8; 32]));
        let config = serde_json::json!({"loader": {"encryption": {"key_env": "CUSTOM_KEY_VAR"}}});
        let key = resolve_encryption_key(&config).unwrap();
        assert_eq!(key, vec![3u8; 32]);
        std::env::remove_var("CUSTOM_KEY_VAR");
    }

    #[test]
    fn missing_env_var_fails() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::remove_var(DEFAULT_KEY_ENV);
        let err = resolve_encryption_key(&serde_json::json!({})).unwrap_err();
        assert!(err.to_string().contains("CRYPTO_KEY_INVALID"));
    }

    #[test]
    fn wrong_length_fails() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var(DEFAULT_KEY_ENV, BASE64.encode([1u8; 16]));
        let err = resolve_encryption_key(&serde_json::json!({})).unwrap_err();
        assert!(err.to_string().contains("CRYPTO_KEY_INVALID"));
        std::env::remove_var(DEFAULT_KEY_ENV);
    }
}
