//! Data model shared by the ceremony components.
//!
//! Binary payloads are opaque byte sequences. They serialize with `serde_json`
//! and travel across the agent boundary as hex strings (see [`Wire`]).

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{CeremonyError, Result};

/// Length in bytes of an [`Identity`].
pub const IDENTITY_LEN: usize = 32;

/// Length in bytes of a transaction hash.
pub const TX_HASH_LEN: usize = 32;

/// Largest group a ceremony supports.
pub const MAX_PARTICIPANTS: usize = 4;

/// Smallest threshold a ceremony supports.
pub const MIN_SIGNERS: u16 = 2;

/// Hex/byte encoding used at the agent boundary.
pub trait Wire: Serialize + DeserializeOwned {
    fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    fn to_hex(&self) -> Result<String> {
        Ok(hex::encode(self.to_bytes()?))
    }

    fn from_hex(data: &str) -> Result<Self> {
        Self::from_bytes(&hex::decode(data)?)
    }
}

macro_rules! fixed_bytes {
    ($(#[$meta:meta])* $name:ident, $len:expr) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(#[serde(with = "hex::serde")] [u8; $len]);

        impl $name {
            pub const fn from_bytes(bytes: [u8; $len]) -> Self {
                $name(bytes)
            }

            pub fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }

            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }

            pub fn from_hex(data: &str) -> Result<Self> {
                let bytes = hex::decode(data)?;
                Self::try_from(bytes.as_slice())
            }
        }

        impl TryFrom<&[u8]> for $name {
            type Error = CeremonyError;

            fn try_from(bytes: &[u8]) -> Result<Self> {
                let array: [u8; $len] = bytes.try_into().map_err(|_| {
                    CeremonyError::InvalidPayload(format!(
                        "{} must be {} bytes, got {}",
                        stringify!($name),
                        $len,
                        bytes.len()
                    ))
                })?;
                Ok($name(array))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.to_hex())
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({}..)", stringify!($name), &self.to_hex()[..8])
            }
        }
    };
}

fixed_bytes!(
    /// A participant's protocol-level identifier.
    Identity,
    IDENTITY_LEN
);

fixed_bytes!(
    /// Canonical hash of a transaction, bound by the signing ceremony.
    TxHash,
    TX_HASH_LEN
);

fixed_bytes!(
    /// Multisig account address derived at the end of the DKG.
    PublicAddress,
    32
);

/// Sealed secret half of a round package.
///
/// Only the issuing identity can open it; it binds the next round to the
/// session that produced it.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretReceipt(#[serde(with = "hex::serde")] pub Vec<u8>);

impl fmt::Debug for SecretReceipt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretReceipt({} bytes)", self.0.len())
    }
}

/// Share of the group secret key, encrypted for one recipient.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedShard {
    pub sender: Identity,
    pub recipient: Identity,
    #[serde(with = "hex::serde")]
    pub ciphertext: Vec<u8>,
}

/// Broadcast half of round 1.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Round1PublicPackage {
    pub identity: Identity,
    pub min_signers: u16,
    pub identities: Vec<Identity>,
    #[serde(with = "hex::serde")]
    pub frost_package: Vec<u8>,
    pub shards: Vec<EncryptedShard>,
}

impl Wire for Round1PublicPackage {}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Round1Package {
    pub public_package: Round1PublicPackage,
    pub secret_package: SecretReceipt,
}

/// Round 2 sub-package addressed to a single recipient.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Round2Share {
    pub sender: Identity,
    pub recipient: Identity,
    #[serde(with = "hex::serde")]
    pub ciphertext: Vec<u8>,
}

/// Round 2 output of one identity: one share per other participant.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Round2PublicPackage {
    pub sender: Identity,
    pub packages: Vec<Round2Share>,
}

impl Wire for Round2PublicPackage {}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Round2Package {
    pub public_package: Round2PublicPackage,
    pub secret_package: SecretReceipt,
}

/// Group verification data every participant derives identically.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupPublicPackage {
    pub identities: Vec<Identity>,
    pub min_signers: u16,
    #[serde(with = "hex::serde")]
    pub verifying_key: Vec<u8>,
    #[serde(with = "hex::serde")]
    pub frost_package: Vec<u8>,
}

impl Wire for GroupPublicPackage {}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewKey {
    /// `ak || nk`
    #[serde(with = "hex::serde")]
    pub view_key: Vec<u8>,
    #[serde(with = "hex::serde")]
    pub ivk: [u8; 32],
    #[serde(with = "hex::serde")]
    pub ovk: [u8; 32],
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofGenerationKey {
    #[serde(with = "hex::serde")]
    pub ak: [u8; 32],
    #[serde(with = "hex::serde")]
    pub nsk: [u8; 32],
}

/// Key material produced by round 3, owned by a single identity.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizedKeySet {
    pub identity: Identity,
    pub identities: Vec<Identity>,
    pub min_signers: u16,
    pub public_address: PublicAddress,
    pub view_key: ViewKey,
    pub proof_generation_key: ProofGenerationKey,
    pub group_public_package: GroupPublicPackage,
    #[serde(with = "hex::serde")]
    pub key_package: Vec<u8>,
}

impl fmt::Debug for FinalizedKeySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FinalizedKeySet")
            .field("identity", &self.identity)
            .field("participants", &self.identities.len())
            .field("min_signers", &self.min_signers)
            .field("public_address", &self.public_address)
            .finish_non_exhaustive()
    }
}

/// Which key `retrieve_keys` returns.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyKind {
    PublicAddress,
    ViewKey,
    ProofGenerationKey,
    Identity,
}

impl TryFrom<u8> for KeyKind {
    type Error = CeremonyError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(KeyKind::PublicAddress),
            1 => Ok(KeyKind::ViewKey),
            2 => Ok(KeyKind::ProofGenerationKey),
            3 => Ok(KeyKind::Identity),
            other => Err(CeremonyError::InvalidPayload(format!(
                "unknown key kind {other}"
            ))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RetrievedKey {
    PublicAddress(PublicAddress),
    ViewKey(ViewKey),
    ProofGenerationKey(ProofGenerationKey),
    Identity(Identity),
}

impl RetrievedKey {
    /// Raw response bytes, laid out as the device returns them.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            RetrievedKey::PublicAddress(address) => address.as_bytes().to_vec(),
            RetrievedKey::ViewKey(key) => {
                let mut out = Vec::with_capacity(32 * 4);
                out.extend_from_slice(&key.view_key);
                out.extend_from_slice(&key.ivk);
                out.extend_from_slice(&key.ovk);
                out
            }
            RetrievedKey::ProofGenerationKey(key) => {
                let mut out = Vec::with_capacity(32 * 2);
                out.extend_from_slice(&key.ak);
                out.extend_from_slice(&key.nsk);
                out
            }
            RetrievedKey::Identity(identity) => identity.as_bytes().to_vec(),
        }
    }
}

/// Public nonce commitment of one identity for one transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commitment {
    pub identity: Identity,
    pub tx_hash: TxHash,
    #[serde(with = "hex::serde")]
    pub bytes: Vec<u8>,
}

impl Wire for Commitment {}

/// Secret signing nonces matching a [`Commitment`].
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Nonce {
    pub identity: Identity,
    pub tx_hash: TxHash,
    #[serde(with = "hex::serde")]
    pub bytes: Vec<u8>,
}

impl fmt::Debug for Nonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Nonce")
            .field("identity", &self.identity)
            .field("tx_hash", &self.tx_hash)
            .finish_non_exhaustive()
    }
}

/// Commitments of the signing identities bound to one transaction hash.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningPackage {
    pub tx_hash: TxHash,
    #[serde(with = "hex::serde")]
    pub public_key_randomness: [u8; 32],
    pub identities: Vec<Identity>,
    #[serde(with = "hex::serde")]
    pub frost_package: Vec<u8>,
}

impl Wire for SigningPackage {}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureShare {
    pub identity: Identity,
    pub tx_hash: TxHash,
    #[serde(with = "hex::serde")]
    pub bytes: Vec<u8>,
}

impl Wire for SignatureShare {}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregatedSignature {
    pub tx_hash: TxHash,
    #[serde(with = "hex::serde")]
    pub bytes: Vec<u8>,
}

impl Wire for AggregatedSignature {}

/// Encrypted export of a [`FinalizedKeySet`].
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedBackup(#[serde(with = "hex::serde")] pub Vec<u8>);

impl fmt::Debug for EncryptedBackup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EncryptedBackup({} bytes)", self.0.len())
    }
}
