//! Encrypted export and import of finalized key material.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use zeroize::Zeroizing;

use crate::element::{SealPurpose, SecureElement};
use crate::error::{CeremonyError, Result};
use crate::types::{EncryptedBackup, FinalizedKeySet};

/// Envelope version written by [`KeyBackupManager::backup`].
pub const BACKUP_VERSION: u8 = 1;

const SW_DECRYPTION_FAIL: u16 = 0xB019;
const SW_INVALID_KEYS_VERSION: u16 = 0xB023;

#[derive(Serialize, Deserialize)]
struct BackupEnvelope {
    version: u8,
    keys: FinalizedKeySet,
}

#[derive(Deserialize)]
struct VersionProbe {
    version: u8,
}

pub struct KeyBackupManager;

impl KeyBackupManager {
    /// Seals `keys` under the element's backup key.
    pub fn backup<E: SecureElement>(element: &E, keys: &FinalizedKeySet) -> Result<EncryptedBackup> {
        let envelope = BackupEnvelope {
            version: BACKUP_VERSION,
            keys: keys.clone(),
        };
        let plaintext = Zeroizing::new(serde_json::to_vec(&envelope)?);
        let blob = element.seal(SealPurpose::Backup, &plaintext)?;
        info!(identity = %keys.identity, bytes = blob.len(), "keys backed up");
        Ok(EncryptedBackup(blob))
    }

    /// Opens a backup produced by [`KeyBackupManager::backup`] on a device with
    /// the same seed.
    ///
    /// # Errors
    /// `Backup` with status 0xB019 when the blob does not decrypt, 0xB023 when
    /// its envelope version is unknown.
    pub fn restore<E: SecureElement>(element: &E, backup: &EncryptedBackup) -> Result<FinalizedKeySet> {
        let plaintext = element.unseal(SealPurpose::Backup, &backup.0).map_err(|err| {
            warn!(error = %err, "backup decryption failed");
            CeremonyError::Backup {
                reason: "backup could not be decrypted".to_string(),
                status: SW_DECRYPTION_FAIL,
            }
        })?;

        let probe: VersionProbe = serde_json::from_slice(&plaintext)?;
        if probe.version != BACKUP_VERSION {
            return Err(CeremonyError::Backup {
                reason: format!("unsupported backup version {}", probe.version),
                status: SW_INVALID_KEYS_VERSION,
            });
        }

        let envelope: BackupEnvelope = serde_json::from_slice(&plaintext)?;
        info!(identity = %envelope.keys.identity, "keys restored");
        Ok(envelope.keys)
    }
}
