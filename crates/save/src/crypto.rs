//! Optional payload encryption.
//!
//! Configured from two base64 secrets: a 32-byte AES-256 key and a 16-byte
//! CBC IV. When either is absent or malformed the provider is disabled and
//! payloads pass through untouched. Ciphertext is stored as base64 text.

use aes::Aes256;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use tracing::info;

use crate::error::{IntegrityError, SaveError};

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

const KEY_LEN: usize = 32;
const IV_LEN: usize = 16;

#[derive(Clone)]
struct CipherKeys {
    key: [u8; KEY_LEN],
    iv: [u8; IV_LEN],
}

/// Symmetric encryption of slot payloads; a no-op when unconfigured.
#[derive(Clone, Default)]
pub struct EncryptionProvider {
    keys: Option<CipherKeys>,
}

impl std::fmt::Debug for EncryptionProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionProvider")
            .field("configured", &self.is_configured())
            .finish()
    }
}

impl EncryptionProvider {
    /// Provider that stores plaintext.
    pub fn disabled() -> Self {
        Self { keys: None }
    }

    /// Build from the externally supplied secrets.
    ///
    /// Never fails: a missing or invalid secret disables encryption with a
    /// single informational log line.
    pub fn from_secrets(key: Option<&str>, iv: Option<&str>) -> Self {
        match Self::try_from_secrets(key, iv) {
            Ok(provider) => {
                info!("Save payload encryption enabled");
                provider
            }
            Err(e) => {
                info!("Save payload encryption disabled: {}", e);
                Self::disabled()
            }
        }
    }

    /// Strict variant of [`from_secrets`](Self::from_secrets).
    pub fn try_from_secrets(key: Option<&str>, iv: Option<&str>) -> Result<Self, SaveError> {
        let (Some(key), Some(iv)) = (key, iv) else {
            return Err(SaveError::EncryptionConfig(
                "key and IV must both be set".to_string(),
            ));
        };

        let key: [u8; KEY_LEN] = decode_secret("key", key)?;
        let iv: [u8; IV_LEN] = decode_secret("IV", iv)?;

        Ok(Self {
            keys: Some(CipherKeys { key, iv }),
        })
    }

    pub fn is_configured(&self) -> bool {
        self.keys.is_some()
    }

    /// Encrypt `plaintext`, or return it unchanged when disabled.
    pub fn encrypt(&self, plaintext: &[u8]) -> Vec<u8> {
        let Some(keys) = &self.keys else {
            return plaintext.to_vec();
        };

        let ciphertext = Aes256CbcEnc::new(&keys.key.into(), &keys.iv.into())
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext);
        STANDARD.encode(ciphertext).into_bytes()
    }

    /// Reverse of [`encrypt`](Self::encrypt).
    pub fn decrypt(&self, payload: &[u8]) -> Result<Vec<u8>, IntegrityError> {
        let Some(keys) = &self.keys else {
            return Ok(payload.to_vec());
        };

        let ciphertext = STANDARD
            .decode(payload.trim_ascii())
            .map_err(|e| IntegrityError::Decrypt(format!("base64: {e}")))?;

        Aes256CbcDec::new(&keys.key.into(), &keys.iv.into())
            .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
            .map_err(|_| IntegrityError::Decrypt("bad padding or key".to_string()))
    }
}

fn decode_secret<const N: usize>(name: &str, encoded: &str) -> Result<[u8; N], SaveError> {
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|e| SaveError::EncryptionConfig(format!("{name} is not valid base64: {e}")))?;

    bytes.try_into().map_err(|bytes: Vec<u8>| {
        SaveError::EncryptionConfig(format!(
            "{name} must be {N} bytes, got {}",
            bytes.len()
        ))
    })
}
