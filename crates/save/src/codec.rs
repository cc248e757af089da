//! Record <-> slot file bytes.
//!
//! Write path: checksum over canonical plaintext, stamp, JSON, encrypt.
//! Read path: decrypt, parse, validate, verify checksum.

use tracing::info;

use crate::crypto::EncryptionProvider;
use crate::error::{IntegrityError, SaveError};
use crate::integrity::IntegrityGuard;
use crate::record::{SaveFile, SaveRecord};

/// A successfully decoded slot file.
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    pub record: SaveRecord,
    /// The file was readable but not in the current on-disk form (plaintext
    /// while encryption is configured) and should be written back.
    pub needs_rewrite: bool,
}

#[derive(Debug, Clone, Default)]
pub struct SaveCodec {
    encryption: EncryptionProvider,
}

impl SaveCodec {
    pub fn new(encryption: EncryptionProvider) -> Self {
        Self { encryption }
    }

    pub fn is_encrypted(&self) -> bool {
        self.encryption.is_configured()
    }

    pub fn encode(&self, record: &SaveRecord) -> Result<Vec<u8>, SaveError> {
        let checksum = IntegrityGuard::compute_checksum(record);
        let json = serde_json::to_vec_pretty(&record.to_file(checksum))
            .map_err(|e| SaveError::Serialization(e.to_string()))?;
        Ok(self.encryption.encrypt(&json))
    }

    pub fn decode(&self, bytes: &[u8]) -> Result<Decoded, IntegrityError> {
        match self.encryption.decrypt(bytes) {
            Ok(plaintext) => Ok(Decoded {
                record: parse_and_verify(&plaintext)?,
                needs_rewrite: false,
            }),
            Err(decrypt_err) if self.encryption.is_configured() => {
                // Files written before encryption was configured.
                let record = parse_and_verify(bytes).map_err(|_| decrypt_err)?;
                info!("Accepted plaintext save file; it will be re-written encrypted");
                Ok(Decoded {
                    record,
                    needs_rewrite: true,
                })
            }
            Err(e) => Err(e),
        }
    }
}

fn parse_and_verify(plaintext: &[u8]) -> Result<SaveRecord, IntegrityError> {
    let file: SaveFile =
        serde_json::from_slice(plaintext).map_err(|e| IntegrityError::Malformed(e.to_string()))?;
    IntegrityGuard::check(file)
}
