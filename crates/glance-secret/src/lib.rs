//! Glance Secret
//!
//! Reversible encryption of configuration values whose parameter type is
//! `password`. Values are encrypted at rest and decrypted only at the moment
//! they are handed to the script runtime; decrypted values are never persisted
//! or logged.
//!
//! AES-256-ECB with PKCS7 padding, base64-encoded, key derived via SHA-256
//! from caller-supplied secret material. The codec operates entry-by-entry so
//! the ordered `key=value` form of a [`ConfigMap`] is preserved exactly.

use aes::Aes256;
use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use sha2::{Digest, Sha256};

use glance_widget::{ConfigMap, ParamSpec};

const BLOCK_SIZE: usize = 16;

/// Errors raised while decoding stored secret values.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SecretError {
  /// The stored ciphertext for a parameter could not be decrypted. The
  /// instance must not be executed; callers record this like a fatal
  /// execution failure.
  #[error("malformed ciphertext for parameter '{name}': {message}")]
  Malformed { name: String, message: String },
}

/// Encrypts and decrypts `password`-typed configuration values.
#[derive(Clone)]
pub struct SecretCodec {
  key: [u8; 32],
}

impl SecretCodec {
  /// Derive the AES-256 key from the deployment's secret material. The same
  /// material must be used by every process sharing stored configuration.
  pub fn new(secret: &str) -> Self {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    let digest = hasher.finalize();

    let mut key = [0u8; 32];
    key.copy_from_slice(&digest);
    Self { key }
  }

  /// Encrypt every non-empty value whose matching spec is `password`; all
  /// other entries pass through unchanged, in order.
  pub fn encrypt_config(&self, plain: &ConfigMap, specs: &[ParamSpec]) -> ConfigMap {
    plain
      .iter()
      .map(|(key, value)| {
        let secret = !value.is_empty() && is_secret_param(specs, key);
        let stored = if secret {
          self.encrypt_value(value)
        } else {
          value.to_string()
        };
        (key.to_string(), stored)
      })
      .collect()
  }

  /// Inverse of [`encrypt_config`](Self::encrypt_config). Applied only when
  /// values are handed to the script runtime.
  pub fn decrypt_config(
    &self,
    stored: &ConfigMap,
    specs: &[ParamSpec],
  ) -> Result<ConfigMap, SecretError> {
    stored
      .iter()
      .map(|(key, value)| {
        let secret = !value.is_empty() && is_secret_param(specs, key);
        let plain = if secret {
          self.decrypt_value(value).map_err(|message| {
            SecretError::Malformed {
              name: key.to_string(),
              message,
            }
          })?
        } else {
          value.to_string()
        };
        Ok((key.to_string(), plain))
      })
      .collect()
  }

  fn encrypt_value(&self, plain: &str) -> String {
    BASE64.encode(encrypt_aes256(plain.as_bytes(), &self.key))
  }

  fn decrypt_value(&self, stored: &str) -> Result<String, String> {
    let ciphertext = BASE64
      .decode(stored.trim())
      .map_err(|e| format!("base64 decode failed: {e}"))?;
    let plain = decrypt_aes256(&ciphertext, &self.key)?;
    String::from_utf8(plain).map_err(|e| format!("decryption produced invalid UTF-8: {e}"))
  }
}

fn is_secret_param(specs: &[ParamSpec], key: &str) -> bool {
  specs.iter().any(|spec| spec.name == key && spec.is_secret())
}

/// AES-256-ECB encrypt with PKCS7 padding.
fn encrypt_aes256(data: &[u8], key: &[u8; 32]) -> Vec<u8> {
  let cipher = Aes256::new(GenericArray::from_slice(key));

  let padding_len = BLOCK_SIZE - (data.len() % BLOCK_SIZE);
  let mut padded = data.to_vec();
  padded.extend(std::iter::repeat_n(padding_len as u8, padding_len));

  let mut encrypted = Vec::with_capacity(padded.len());
  for chunk in padded.chunks(BLOCK_SIZE) {
    let mut block = GenericArray::clone_from_slice(chunk);
    cipher.encrypt_block(&mut block);
    encrypted.extend_from_slice(&block);
  }

  encrypted
}

/// AES-256-ECB decrypt with PKCS7 unpadding. Rejects truncated input and
/// invalid padding instead of silently returning garbage.
fn decrypt_aes256(data: &[u8], key: &[u8; 32]) -> Result<Vec<u8>, String> {
  if data.is_empty() || data.len() % BLOCK_SIZE != 0 {
    return Err(format!("ciphertext length {} is not a block multiple", data.len()));
  }

  let cipher = Aes256::new(GenericArray::from_slice(key));
  let mut decrypted = Vec::with_capacity(data.len());
  for chunk in data.chunks(BLOCK_SIZE) {
    let mut block = GenericArray::clone_from_slice(chunk);
    cipher.decrypt_block(&mut block);
    decrypted.extend_from_slice(&block);
  }

  let pad_len = *decrypted.last().ok_or("empty plaintext")? as usize;
  if pad_len == 0 || pad_len > BLOCK_SIZE || pad_len > decrypted.len() {
    return Err("invalid padding".to_string());
  }
  let valid = decrypted[decrypted.len() - pad_len..]
    .iter()
    .all(|&b| b == pad_len as u8);
  if !valid {
    return Err("invalid padding".to_string());
  }

  decrypted.truncate(decrypted.len() - pad_len);
  Ok(decrypted)
}

#[cfg(test)]
mod tests {
  use super::*;
  use glance_widget::ParamSpec;

  fn specs() -> Vec<ParamSpec> {
    vec![
      ParamSpec::text("city"),
      ParamSpec::password("api_key"),
      ParamSpec::password("token"),
    ]
  }

  #[test]
  fn round_trip_restores_the_original_map() {
    let codec = SecretCodec::new("unit-test-secret");
    for lines in [
      "city=Lyon\napi_key=sk-12345\ntoken=abc",
      "api_key=x",
      "city=only-plain",
      "",
    ] {
      let plain: ConfigMap = lines.parse().unwrap();
      let stored = codec.encrypt_config(&plain, &specs());
      let back = codec.decrypt_config(&stored, &specs()).unwrap();
      assert_eq!(back, plain, "round trip failed for {lines:?}");
    }
  }

  #[test]
  fn only_password_values_are_rewritten() {
    let codec = SecretCodec::new("unit-test-secret");
    let plain: ConfigMap = "city=Lyon\napi_key=sk-12345".parse().unwrap();
    let stored = codec.encrypt_config(&plain, &specs());

    assert_eq!(stored.get("city"), Some("Lyon"));
    let stored_key = stored.get("api_key").unwrap();
    assert_ne!(stored_key, "sk-12345");
    assert!(!stored_key.contains("sk-12345"));
  }

  #[test]
  fn empty_secret_values_pass_through() {
    let codec = SecretCodec::new("unit-test-secret");
    let plain: ConfigMap = "api_key=".parse().unwrap();
    let stored = codec.encrypt_config(&plain, &specs());
    assert_eq!(stored.get("api_key"), Some(""));
  }

  #[test]
  fn entry_order_is_preserved() {
    let codec = SecretCodec::new("unit-test-secret");
    let plain: ConfigMap = "token=t\ncity=Lyon\napi_key=k".parse().unwrap();
    let stored = codec.encrypt_config(&plain, &specs());
    let keys: Vec<&str> = stored.iter().map(|(k, _)| k).collect();
    assert_eq!(keys, vec!["token", "city", "api_key"]);
  }

  #[test]
  fn malformed_ciphertext_is_a_local_error() {
    let codec = SecretCodec::new("unit-test-secret");
    let stored: ConfigMap = "api_key=not base64!!".parse().unwrap();
    let err = codec.decrypt_config(&stored, &specs()).unwrap_err();
    match err {
      SecretError::Malformed { name, .. } => assert_eq!(name, "api_key"),
    }
  }

  #[test]
  fn wrong_key_never_yields_the_plaintext() {
    let codec = SecretCodec::new("unit-test-secret");
    let other = SecretCodec::new("a-different-secret");
    let plain: ConfigMap = "api_key=sk-12345".parse().unwrap();
    let stored = codec.encrypt_config(&plain, &specs());

    match other.decrypt_config(&stored, &specs()) {
      Ok(decrypted) => assert_ne!(decrypted.get("api_key"), Some("sk-12345")),
      Err(SecretError::Malformed { .. }) => {}
    }
  }
}
