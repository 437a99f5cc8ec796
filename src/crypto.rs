//! Endpoint credential encryption using AES-256-GCM.
//!
//! Passwords for RTU/PLC endpoints are sealed before they reach the database.
//! Each sealed payload is `version || nonce || ciphertext+tag`, and the
//! owning tenant/well/connection ids are bound in as additional authenticated
//! data so a ciphertext cannot be replayed onto another connection row.

#![allow(deprecated)]

use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, AeadCore, KeyInit, OsRng, Payload},
};
use thiserror::Error;
use uuid::Uuid;
use zeroize::{Zeroize, ZeroizeOnDrop};

const VERSION_ENCRYPTED: u8 = 0x01;
const VERSION_FIELD_LEN: usize = 1;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const MIN_ENCRYPTED_LEN: usize = VERSION_FIELD_LEN + NONCE_LEN + TAG_LEN;

/// Crypto error types
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid key length: expected 32 bytes, got {0}")]
    InvalidKeyLength(usize),
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),
    #[error("decryption failed: {0}")]
    DecryptionFailed(String),
    #[error("invalid ciphertext format")]
    InvalidFormat,
    #[error("empty ciphertext")]
    EmptyCiphertext,
}

/// Secure wrapper for encryption keys with zeroization
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct ZeroizingKey(Vec<u8>);

impl std::fmt::Debug for ZeroizingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ZeroizingKey([REDACTED])")
    }
}

/// Type alias for crypto keys
pub type CryptoKey = ZeroizingKey;

impl CryptoKey {
    /// Create a new crypto key from bytes
    pub fn new(bytes: Vec<u8>) -> Result<Self, CryptoError> {
        if bytes.len() != 32 {
            return Err(CryptoError::InvalidKeyLength(bytes.len()));
        }
        Ok(ZeroizingKey(bytes))
    }

    /// Get the key as bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Identity a sealed credential is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CredentialScope {
    pub tenant_id: Uuid,
    pub well_id: Uuid,
    pub connection_id: Uuid,
}

impl CredentialScope {
    fn aad(&self) -> String {
        format!("{}|{}|{}", self.tenant_id, self.well_id, self.connection_id)
    }
}

/// Encrypt bytes using AES-256-GCM
pub fn encrypt_bytes(
    key: &CryptoKey,
    aad: &[u8],
    plaintext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher_key = Key::<Aes256Gcm>::from_slice(key.as_bytes());
    let cipher = Aes256Gcm::new(cipher_key);

    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

    let mut ciphertext = cipher
        .encrypt(
            &nonce,
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

    let mut result = Vec::with_capacity(VERSION_FIELD_LEN + NONCE_LEN + ciphertext.len());
    result.push(VERSION_ENCRYPTED);
    result.extend_from_slice(&nonce);
    result.append(&mut ciphertext);

    Ok(result)
}

/// Decrypt bytes using AES-256-GCM
pub fn decrypt_bytes(
    key: &CryptoKey,
    aad: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    if ciphertext.is_empty() {
        return Err(CryptoError::EmptyCiphertext);
    }

    if ciphertext[0] != VERSION_ENCRYPTED || ciphertext.len() < MIN_ENCRYPTED_LEN {
        return Err(CryptoError::InvalidFormat);
    }

    let nonce = Nonce::from_slice(&ciphertext[VERSION_FIELD_LEN..VERSION_FIELD_LEN + NONCE_LEN]);
    let tag_and_ct = &ciphertext[VERSION_FIELD_LEN + NONCE_LEN..];

    let cipher_key = Key::<Aes256Gcm>::from_slice(key.as_bytes());
    let cipher = Aes256Gcm::new(cipher_key);

    cipher
        .decrypt(
            nonce,
            Payload {
                msg: tag_and_ct,
                aad,
            },
        )
        .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))
}

/// Seal an endpoint password for storage.
pub fn seal_password(
    key: &CryptoKey,
    scope: &CredentialScope,
    password: &str,
) -> Result<Vec<u8>, CryptoError> {
    encrypt_bytes(key, scope.aad().as_bytes(), password.as_bytes())
}

/// Open a sealed endpoint password.
pub fn open_password(
    key: &CryptoKey,
    scope: &CredentialScope,
    sealed: &[u8],
) -> Result<String, CryptoError> {
    let bytes = decrypt_bytes(key, scope.aad().as_bytes(), sealed)?;
    String::from_utf8(bytes)
        .map_err(|e| CryptoError::DecryptionFailed(format!("Invalid UTF-8: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> CryptoKey {
        CryptoKey::new(vec![0u8; 32]).expect("valid test key")
    }

    fn scope() -> CredentialScope {
        CredentialScope {
            tenant_id: Uuid::new_v4(),
            well_id: Uuid::new_v4(),
            connection_id: Uuid::new_v4(),
        }
    }

    #[test]
    fn sealed_password_opens_with_same_scope() {
        let key = test_key();
        let scope = scope();

        let sealed = seal_password(&key, &scope, "opc-secret").expect("seal succeeds");
        assert_eq!(sealed[0], VERSION_ENCRYPTED);
        assert!(!sealed.windows(10).any(|w| w == b"opc-secret"));

        let opened = open_password(&key, &scope, &sealed).expect("open succeeds");
        assert_eq!(opened, "opc-secret");
    }

    #[test]
    fn sealed_password_is_bound_to_its_connection() {
        let key = test_key();
        let original = scope();
        let other = CredentialScope {
            connection_id: Uuid::new_v4(),
            ..original
        };

        let sealed = seal_password(&key, &original, "opc-secret").expect("seal succeeds");
        assert!(matches!(
            open_password(&key, &other, &sealed),
            Err(CryptoError::DecryptionFailed(_))
        ));
    }

    #[test]
    fn modified_ciphertext_fails() {
        let key = test_key();
        let mut encrypted = encrypt_bytes(&key, b"aad", b"secret message").expect("encrypts");
        encrypted[13] ^= 0x01;

        assert!(decrypt_bytes(&key, b"aad", &encrypted).is_err());
    }

    #[test]
    fn nonces_are_unique() {
        let key = test_key();
        let first = encrypt_bytes(&key, b"aad", b"secret").expect("encrypts");
        let second = encrypt_bytes(&key, b"aad", b"secret").expect("encrypts");

        assert_ne!(&first[1..13], &second[1..13]);
    }

    #[test]
    fn unversioned_or_truncated_payloads_are_rejected() {
        let key = test_key();

        assert!(matches!(
            decrypt_bytes(&key, b"aad", b"plain-password"),
            Err(CryptoError::InvalidFormat)
        ));
        assert!(matches!(
            decrypt_bytes(&key, b"aad", &[VERSION_ENCRYPTED, 0x02]),
            Err(CryptoError::InvalidFormat)
        ));
        assert!(matches!(
            decrypt_bytes(&key, b"aad", &[]),
            Err(CryptoError::EmptyCiphertext)
        ));
    }

    #[test]
    fn invalid_key_length_rejected() {
        assert!(matches!(
            CryptoKey::new(vec![0u8; 16]),
            Err(CryptoError::InvalidKeyLength(16))
        ));
        assert!(CryptoKey::new(vec![0u8; 64]).is_err());
    }
}
