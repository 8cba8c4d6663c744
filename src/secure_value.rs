//! Secure-value resolution for configuration secrets: `${VAR}` pulls from
//! the environment, `ENC(<base64>)` decrypts with AES-GCM using a key from
//! `COMPLIK_ENCRYPTION_KEY`, everything else passes through verbatim.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::Engine;
use thiserror::Error;

const ENCRYPTION_KEY_ENV: &str = "COMPLIK_ENCRYPTION_KEY";
const NONCE_LEN: usize = 12;

#[derive(Debug, Error)]
pub enum SecureValueError {
    #[error("environment variable {0} is not set")]
    MissingEnvVar(String),
    #[error("{ENCRYPTION_KEY_ENV} is not set but an ENC(...) value needs decrypting")]
    MissingEncryptionKey,
    #[error("invalid base64 payload: {0}")]
    InvalidBase64(#[from] base64::DecodeError),
    #[error("ciphertext too short to contain a nonce")]
    CiphertextTooShort,
    #[error("decryption failed")]
    DecryptionFailed,
}

/// Pads or truncates the key-env-var's raw bytes to exactly 32 bytes, as
/// the wire contract requires.
fn derive_key() -> Result<[u8; 32], SecureValueError> {
    let raw = std::env::var(ENCRYPTION_KEY_ENV).map_err(|_| SecureValueError::MissingEncryptionKey)?;
    let mut key = [0u8; 32];
    let bytes = raw.as_bytes();
    let n = bytes.len().min(32);
    key[..n].copy_from_slice(&bytes[..n]);
    Ok(key)
}

fn decrypt(base64_payload: &str) -> Result<String, SecureValueError> {
    let key_bytes = derive_key()?;
    let payload = base64::engine::general_purpose::STANDARD.decode(base64_payload)?;
    if payload.len() < NONCE_LEN {
        return Err(SecureValueError::CiphertextTooShort);
    }
    let (nonce_bytes, ciphertext) = payload.split_at(NONCE_LEN);

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key_bytes));
    let nonce = Nonce::from_slice(nonce_bytes);
    let plaintext = cipher.decrypt(nonce, ciphertext).map_err(|_| SecureValueError::DecryptionFailed)?;
    String::from_utf8(plaintext).map_err(|_| SecureValueError::DecryptionFailed)
}

/// Resolves one configuration string. `${NAME}` substitutes the
/// environment variable `NAME` (fatal if unset); `ENC(<base64>)` decrypts
/// via AES-GCM (fatal if `COMPLIK_ENCRYPTION_KEY` is unset); any other
/// string passes through unchanged.
pub fn resolve(raw: &str) -> Result<String, SecureValueError> {
    if let Some(inner) = raw.strip_prefix("${").and_then(|s| s.strip_suffix('}')) {
        return std::env::var(inner).map_err(|_| SecureValueError::MissingEnvVar(inner.to_string()));
    }
    if let Some(inner) = raw.strip_prefix("ENC(").and_then(|s| s.strip_suffix(')')) {
        return decrypt(inner);
    }
    Ok(raw.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// `std::env::set_var` mutates process-global state; serialize the
    /// tests in this module so they don't race on the same env vars.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn encrypt_for_test(key_bytes: &[u8; 32], plaintext: &str) -> String {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key_bytes));
        let nonce_bytes = [7u8; NONCE_LEN];
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = cipher.encrypt(nonce, plaintext.as_bytes()).expect("encrypt");
        let mut payload = nonce_bytes.to_vec();
        payload.extend(ciphertext);
        base64::engine::general_purpose::STANDARD.encode(payload)
    }

    #[test]
    fn plain_strings_pass_through_unchanged() {
        let _guard = ENV_LOCK.lock().unwrap();
        assert_eq!(resolve("plain-value").unwrap(), "plain-value");
    }

    #[test]
    fn env_var_reference_is_substituted() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var("COMPLIK_TEST_SECRET", "s3cr3t");
        assert_eq!(resolve("${COMPLIK_TEST_SECRET}").unwrap(), "s3cr3t");
        std::env::remove_var("COMPLIK_TEST_SECRET");
    }

    #[test]
    fn missing_env_var_is_an_error() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::remove_var("COMPLIK_TEST_MISSING");
        assert!(matches!(resolve("${COMPLIK_TEST_MISSING}"), Err(SecureValueError::MissingEnvVar(_))));
    }

    #[test]
    fn enc_wrapped_value_round_trips_through_aes_gcm() {
        let _guard = ENV_LOCK.lock().unwrap();
        let key = [9u8; 32];
        std::env::set_var("COMPLIK_ENCRYPTION_KEY", String::from_utf8(key.to_vec()).unwrap());
        let encoded = encrypt_for_test(&key, "db-password");
        assert_eq!(resolve(&format!("ENC({encoded})")).unwrap(), "db-password");
        std::env::remove_var("COMPLIK_ENCRYPTION_KEY");
    }

    #[test]
    fn enc_wrapped_value_without_a_key_is_a_fatal_error() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::remove_var("COMPLIK_ENCRYPTION_KEY");
        assert!(matches!(resolve("ENC(anything)"), Err(SecureValueError::MissingEncryptionKey)));
    }
}
