//! Sealing of provider API keys at rest.
//!
//! AES-256-GCM with a PBKDF2-SHA256 key derived from the process-wide
//! secret. Sealed values are `enc:v1:<hex nonce>:<hex ciphertext>`; the
//! version tag leaves room for rotating the scheme without guessing.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::Sha256;

use opshub_core::CoreError;

const SEAL_PREFIX: &str = "enc:v1:";
const PBKDF2_ROUNDS: u32 = 100_000;
const PBKDF2_SALT: &[u8] = b"opshub-llm-provider-keys";
const NONCE_LEN: usize = 12;

#[derive(Clone)]
pub struct SecretBox {
  cipher: Aes256Gcm,
}

impl SecretBox {
  pub fn new(master_secret: &str) -> Result<Self, CoreError> {
    if master_secret.len() < 32 {
      return Err(CoreError::InvalidConfig(
        "encryption key must be at least 32 characters".to_string(),
      ));
    }
    let mut key_bytes = [0u8; 32];
    pbkdf2_hmac::<Sha256>(
      master_secret.as_bytes(),
      PBKDF2_SALT,
      PBKDF2_ROUNDS,
      &mut key_bytes,
    );
    let key = Key::<Aes256Gcm>::from_slice(&key_bytes);
    Ok(Self {
      cipher: Aes256Gcm::new(key),
    })
  }

  pub fn is_sealed(value: &str) -> bool {
    value.starts_with(SEAL_PREFIX)
  }

  pub fn seal(&self, plaintext: &str) -> Result<String, CoreError> {
    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);
    let ciphertext = self
      .cipher
      .encrypt(nonce, plaintext.as_bytes())
      .map_err(|_| CoreError::Internal("api key encryption failed".to_string()))?;
    Ok(format!(
      "{SEAL_PREFIX}{}:{}",
      hex::encode(nonce_bytes),
      hex::encode(ciphertext)
    ))
  }

  pub fn open(&self, sealed: &str) -> Result<String, CoreError> {
    let rest = sealed
      .strip_prefix(SEAL_PREFIX)
      .ok_or_else(|| CoreError::Internal("value is not sealed".to_string()))?;
    let (nonce_hex, ct_hex) = rest
      .split_once(':')
      .ok_or_else(|| CoreError::Internal("malformed sealed value".to_string()))?;
    let nonce_bytes = hex::decode(nonce_hex)
      .map_err(|_| CoreError::Internal("malformed sealed nonce".to_string()))?;
    let ciphertext = hex::decode(ct_hex)
      .map_err(|_| CoreError::Internal("malformed sealed ciphertext".to_string()))?;
    if nonce_bytes.len() != NONCE_LEN {
      return Err(CoreError::Internal("malformed sealed nonce".to_string()));
    }
    let nonce = Nonce::from_slice(&nonce_bytes);
    let plaintext = self
      .cipher
      .decrypt(nonce, ciphertext.as_ref())
      .map_err(|_| CoreError::Internal("api key decryption failed".to_string()))?;
    String::from_utf8(plaintext)
      .map_err(|_| CoreError::Internal("decrypted key is not utf-8".to_string()))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn secret_box() -> SecretBox {
    SecretBox::new("unit-test-master-secret-0123456789abcdef").unwrap()
  }

  #[test]
  fn seal_open_round_trip() {
    let sb = secret_box();
    let sealed = sb.seal("sk-live-abc123").unwrap();
    assert!(SecretBox::is_sealed(&sealed));
    assert!(!sealed.contains("sk-live-abc123"));
    assert_eq!(sb.open(&sealed).unwrap(), "sk-live-abc123");
  }

  #[test]
  fn sealing_twice_differs_but_opens_the_same() {
    let sb = secret_box();
    let a = sb.seal("sk-x").unwrap();
    let b = sb.seal("sk-x").unwrap();
    assert_ne!(a, b);
    assert_eq!(sb.open(&a).unwrap(), sb.open(&b).unwrap());
  }

  #[test]
  fn wrong_master_secret_fails_to_open() {
    let sealed = secret_box().seal("sk-y").unwrap();
    let other = SecretBox::new("another-master-secret-0123456789abcdef!!").unwrap();
    assert!(other.open(&sealed).is_err());
  }

  #[test]
  fn short_master_secret_is_rejected() {
    assert!(SecretBox::new("too-short").is_err());
  }

  #[test]
  fn tampered_ciphertext_is_rejected() {
    let sb = secret_box();
    let sealed = sb.seal("sk-z").unwrap();
    let flipped = if sealed.ends_with('0') { '1' } else { '0' };
    let mut tampered = sealed.clone();
    tampered.pop();
    tampered.push(flipped);
    assert!(sb.open(&tampered).is_err());
  }
}
