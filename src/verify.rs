//! Signature aggregation and verification.

use frost_ed25519 as frost;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{info, warn};

use crate::element::{decode, encode, frost_identifier};
use crate::error::{CeremonyError, Result};
use crate::sign::RANDOMNESS_LEN;
use crate::transaction::SignedTransaction;
use crate::types::{
    AggregatedSignature, Commitment, GroupPublicPackage, Identity, SignatureShare, SigningPackage,
    TxHash,
};

/// Combines signature shares into a group signature.
pub trait Aggregator {
    /// Builds the signing package for `tx_hash` from the signers' commitments.
    ///
    /// `public_key_randomness` travels with the package so every signer can
    /// check it against the randomness it was asked to sign with.
    fn signing_package(
        &self,
        tx_hash: &TxHash,
        public_key_randomness: &[u8; RANDOMNESS_LEN],
        commitments: &[Commitment],
    ) -> Result<SigningPackage>;

    fn aggregate(
        &self,
        identities: &[Identity],
        group: &GroupPublicPackage,
        package: &SigningPackage,
        shares: &[SignatureShare],
    ) -> Result<AggregatedSignature>;

    /// Checks `signed` against the group it must come from.
    fn verify(&self, group: &GroupPublicPackage, signed: &SignedTransaction) -> Result<bool>;
}

/// FROST(Ed25519, SHA-512) aggregator.
#[derive(Clone, Copy, Debug, Default)]
pub struct FrostAggregator;

impl Aggregator for FrostAggregator {
    fn signing_package(
        &self,
        tx_hash: &TxHash,
        public_key_randomness: &[u8; RANDOMNESS_LEN],
        commitments: &[Commitment],
    ) -> Result<SigningPackage> {
        let mut frost_commitments = BTreeMap::new();
        let mut identities = Vec::with_capacity(commitments.len());
        for commitment in commitments {
            if commitment.tx_hash != *tx_hash {
                return Err(CeremonyError::AggregationMismatch(format!(
                    "commitment from {} is bound to {}",
                    commitment.identity, commitment.tx_hash
                )));
            }
            let decoded: frost::round1::SigningCommitments = decode(&commitment.bytes)?;
            if frost_commitments
                .insert(frost_identifier(&commitment.identity)?, decoded)
                .is_some()
            {
                return Err(CeremonyError::AggregationMismatch(format!(
                    "duplicate commitment from {}",
                    commitment.identity
                )));
            }
            identities.push(commitment.identity);
        }
        identities.sort();

        let package = frost::SigningPackage::new(frost_commitments, tx_hash.as_bytes());
        Ok(SigningPackage {
            tx_hash: *tx_hash,
            public_key_randomness: *public_key_randomness,
            identities,
            frost_package: encode(&package)?,
        })
    }

    fn aggregate(
        &self,
        identities: &[Identity],
        group: &GroupPublicPackage,
        package: &SigningPackage,
        shares: &[SignatureShare],
    ) -> Result<AggregatedSignature> {
        if shares.len() < group.min_signers as usize {
            return Err(CeremonyError::AggregationMismatch(format!(
                "{} shares, at least {} required",
                shares.len(),
                group.min_signers
            )));
        }

        let members: BTreeSet<&Identity> = identities.iter().collect();
        let signers: BTreeSet<&Identity> = package.identities.iter().collect();
        let mut frost_shares = BTreeMap::new();
        for share in shares {
            if share.tx_hash != package.tx_hash {
                return Err(CeremonyError::AggregationMismatch(format!(
                    "share from {} signs {}, package signs {}",
                    share.identity, share.tx_hash, package.tx_hash
                )));
            }
            if !members.contains(&share.identity) || !signers.contains(&share.identity) {
                return Err(CeremonyError::AggregationMismatch(format!(
                    "share from {} is not part of the signing package",
                    share.identity
                )));
            }
            let decoded: frost::round2::SignatureShare = decode(&share.bytes)?;
            if frost_shares
                .insert(frost_identifier(&share.identity)?, decoded)
                .is_some()
            {
                return Err(CeremonyError::AggregationMismatch(format!(
                    "duplicate share from {}",
                    share.identity
                )));
            }
        }

        let frost_package: frost::SigningPackage = decode(&package.frost_package)?;
        let public_key_package: frost::keys::PublicKeyPackage = decode(&group.frost_package)?;
        let signature = frost::aggregate(&frost_package, &frost_shares, &public_key_package)
            .map_err(|err| CeremonyError::AggregationMismatch(err.to_string()))?;

        info!(tx_hash = %package.tx_hash, shares = shares.len(), "signature aggregated");
        Ok(AggregatedSignature {
            tx_hash: package.tx_hash,
            bytes: signature.serialize().map_err(CeremonyError::crypto)?,
        })
    }

    fn verify(&self, group: &GroupPublicPackage, signed: &SignedTransaction) -> Result<bool> {
        let tx_hash = signed.transaction.hash();
        if signed.transaction.public_key != group.verifying_key {
            warn!(tx_hash = %tx_hash, "transaction is not signed for this group");
            return Ok(false);
        }
        let verifying_key = frost::VerifyingKey::deserialize(&signed.transaction.public_key)
            .map_err(|err| CeremonyError::InvalidPayload(err.to_string()))?;
        let signature = frost::Signature::deserialize(&signed.signature)
            .map_err(|err| CeremonyError::InvalidPayload(err.to_string()))?;

        let valid = verifying_key.verify(tx_hash.as_bytes(), &signature).is_ok();
        if !valid {
            warn!(tx_hash = %tx_hash, "signature does not verify");
        }
        Ok(valid)
    }
}
