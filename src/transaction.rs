//! Minimal transaction model for the signing ceremony.

use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CeremonyError, Result};
use crate::types::{GroupPublicPackage, PublicAddress, TxHash, Wire};

/// Asset id of the chain's native coin.
pub const NATIVE_ASSET_ID: [u8; 32] = [
    0x51, 0xf3, 0x3a, 0x2f, 0x14, 0xf9, 0x27, 0x35, 0xe5, 0x62, 0xdc, 0x65, 0x8a, 0x56, 0x39, 0x27,
    0x9d, 0xdc, 0xa3, 0xd5, 0x07, 0x9a, 0x6d, 0x12, 0x42, 0xb2, 0xa5, 0x88, 0xa9, 0xcb, 0xf4, 0x4c,
];

const TX_HASH_CONTEXT: &str = "frost-ceremony 2024-06 transaction signature hash";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Spend {
    #[serde(with = "hex::serde")]
    pub nullifier: [u8; 32],
    #[serde(with = "hex::serde")]
    pub asset_id: [u8; 32],
    pub value: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Output {
    pub owner: PublicAddress,
    #[serde(with = "hex::serde")]
    pub asset_id: [u8; 32],
    pub value: u64,
    pub memo: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mint {
    #[serde(with = "hex::serde")]
    pub asset_id: [u8; 32],
    pub value: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Burn {
    #[serde(with = "hex::serde")]
    pub asset_id: [u8; 32],
    pub value: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub version: u8,
    pub fee: i64,
    pub expiration: u32,
    /// Group verifying key the transaction is authorized by.
    #[serde(with = "hex::serde")]
    pub public_key: Vec<u8>,
    #[serde(with = "hex::serde")]
    pub public_key_randomness: [u8; 32],
    pub spends: Vec<Spend>,
    pub outputs: Vec<Output>,
    pub mints: Vec<Mint>,
    pub burns: Vec<Burn>,
}

impl Wire for Transaction {}

/// Result of reviewing a transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewedTransaction {
    pub hash: TxHash,
    pub fields: Vec<(String, String)>,
}

/// A transaction with its aggregated group signature.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTransaction {
    pub transaction: Transaction,
    #[serde(with = "hex::serde")]
    pub signature: Vec<u8>,
}

impl Wire for SignedTransaction {}

impl Transaction {
    /// One native spend paying `value` to `owner`, authorized by `group`.
    pub fn transfer(
        group: &GroupPublicPackage,
        owner: PublicAddress,
        value: u64,
        fee: i64,
        memo: &str,
    ) -> Self {
        let mut nullifier = [0u8; 32];
        let mut public_key_randomness = [0u8; 32];
        OsRng.fill_bytes(&mut nullifier);
        OsRng.fill_bytes(&mut public_key_randomness);

        Transaction {
            version: 1,
            fee,
            expiration: 0,
            public_key: group.verifying_key.clone(),
            public_key_randomness,
            spends: vec![Spend {
                nullifier,
                asset_id: NATIVE_ASSET_ID,
                value: value.saturating_add(fee.unsigned_abs()),
            }],
            outputs: vec![Output {
                owner,
                asset_id: NATIVE_ASSET_ID,
                value,
                memo: memo.to_string(),
            }],
            mints: Vec::new(),
            burns: Vec::new(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !matches!(self.version, 1 | 2) {
            return Err(CeremonyError::InvalidPayload(format!(
                "unsupported transaction version {}",
                self.version
            )));
        }
        if self.public_key.len() != 32 {
            return Err(CeremonyError::InvalidPayload(
                "transaction public key must be 32 bytes".to_string(),
            ));
        }
        if self.spends.is_empty() && self.mints.is_empty() {
            return Err(CeremonyError::InvalidPayload(
                "transaction has neither spends nor mints".to_string(),
            ));
        }
        Ok(())
    }

    /// True when the transaction touches anything but the native asset.
    pub fn requires_expert_mode(&self) -> bool {
        !self.mints.is_empty()
            || !self.burns.is_empty()
            || self.spends.iter().any(|s| s.asset_id != NATIVE_ASSET_ID)
            || self.outputs.iter().any(|o| o.asset_id != NATIVE_ASSET_ID)
    }

    /// Canonical hash signed by the group.
    pub fn hash(&self) -> TxHash {
        let mut hasher = blake3::Hasher::new_derive_key(TX_HASH_CONTEXT);
        hasher.update(&[self.version]);
        hasher.update(&self.expiration.to_le_bytes());
        hasher.update(&self.fee.to_le_bytes());
        hasher.update(&self.public_key);
        hasher.update(&self.public_key_randomness);

        for spend in &self.spends {
            hasher.update(&spend.nullifier);
            hasher.update(&spend.asset_id);
            hasher.update(&spend.value.to_le_bytes());
        }
        for output in &self.outputs {
            hasher.update(output.owner.as_bytes());
            hasher.update(&output.asset_id);
            hasher.update(&output.value.to_le_bytes());
            hasher.update(&(output.memo.len() as u64).to_le_bytes());
            hasher.update(output.memo.as_bytes());
        }
        for mint in &self.mints {
            hasher.update(&mint.asset_id);
            hasher.update(&mint.value.to_le_bytes());
        }
        for burn in &self.burns {
            hasher.update(&burn.asset_id);
            hasher.update(&burn.value.to_le_bytes());
        }

        TxHash::from_bytes(*hasher.finalize().as_bytes())
    }

    /// Fields shown to the user before signing.
    pub fn review_fields(&self) -> Vec<(String, String)> {
        let mut fields = Vec::with_capacity(self.outputs.len() * 3 + 3);
        fields.push(("Tx Version".to_string(), format!("V{}", self.version)));

        for (i, output) in self.outputs.iter().enumerate() {
            let number = i + 1;
            fields.push((format!("Owner {number}"), output.owner.to_hex()));
            fields.push((format!("Amount {number}"), output.value.to_string()));
            fields.push((format!("AssetID {number}"), hex::encode(output.asset_id)));
        }
        for (i, mint) in self.mints.iter().enumerate() {
            fields.push((
                format!("Mint {}", i + 1),
                format!("{} of {}", mint.value, hex::encode(mint.asset_id)),
            ));
        }
        for (i, burn) in self.burns.iter().enumerate() {
            fields.push((
                format!("Burn {}", i + 1),
                format!("{} of {}", burn.value, hex::encode(burn.asset_id)),
            ));
        }

        fields.push(("Fee".to_string(), self.fee.to_string()));
        fields.push(("Expiration".to_string(), self.expiration.to_string()));
        fields
    }
}

/// Parses and validates a serialized transaction.
///
/// # Errors
/// `ExpertModeRequired` when the transaction references a non-native asset
/// and `expert_mode` is off.
pub fn review(serialized: &[u8], expert_mode: bool) -> Result<ReviewedTransaction> {
    let transaction = Transaction::from_bytes(serialized)
        .map_err(|err| CeremonyError::InvalidPayload(err.to_string()))?;
    transaction.validate()?;

    if transaction.requires_expert_mode() && !expert_mode {
        return Err(CeremonyError::ExpertModeRequired);
    }

    let hash = transaction.hash();
    debug!(tx_hash = %hash, outputs = transaction.outputs.len(), "transaction reviewed");
    Ok(ReviewedTransaction {
        hash,
        fields: transaction.review_fields(),
    })
}
