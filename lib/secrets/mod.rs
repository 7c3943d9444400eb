use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// GCM nonce width. Each encrypted record carries its own random salt of this
/// size, used directly as the nonce.
pub const SALT_LEN: usize = 12;

#[derive(Error, Debug)]
pub enum SecretsError {
    #[error("Invalid base64 payload: {0}")]
    Encoding(#[from] base64::DecodeError),

    #[error("Salt must be {SALT_LEN} bytes, got {0}")]
    BadSalt(usize),

    #[error("Encryption failed")]
    Encrypt,

    #[error("Decryption failed (wrong secret or tampered payload)")]
    Decrypt,

    #[error("Decrypted payload is not valid UTF-8")]
    NotUtf8,
}

/// A secret stored at rest: base64 ciphertext plus the base64 salt it was
/// sealed with. The AEAD tag makes tampering detectable at decrypt time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedValue {
    pub value: String,
    pub salt: String,
}

pub fn generate_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    salt
}

fn derive_key(password_secret: &str) -> [u8; 32] {
    let digest = Sha256::digest(password_secret.as_bytes());
    digest.into()
}

/// Seals `plaintext` under the node's password secret and the given salt.
pub fn encrypt(
    plaintext: &str,
    password_secret: &str,
    salt: &[u8],
) -> Result<EncryptedValue, SecretsError> {
    if salt.len() != SALT_LEN {
        return Err(SecretsError::BadSalt(salt.len()));
    }
    let key_bytes = derive_key(password_secret);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key_bytes));
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(salt), plaintext.as_bytes())
        .map_err(|_| SecretsError::Encrypt)?;

    Ok(EncryptedValue {
        value: BASE64.encode(ciphertext),
        salt: BASE64.encode(salt),
    })
}

/// Opens a sealed value. Fails if the password secret differs or the payload
/// was modified.
pub fn decrypt(sealed: &EncryptedValue, password_secret: &str) -> Result<String, SecretsError> {
    let salt = BASE64.decode(&sealed.salt)?;
    if salt.len() != SALT_LEN {
        return Err(SecretsError::BadSalt(salt.len()));
    }
    let ciphertext = BASE64.decode(&sealed.value)?;

    let key_bytes = derive_key(password_secret);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key_bytes));
    let plaintext = cipher
        .decrypt(Nonce::from_slice(&salt), ciphertext.as_ref())
        .map_err(|_| SecretsError::Decrypt)?;

    String::from_utf8(plaintext).map_err(|_| SecretsError::NotUtf8)
}
