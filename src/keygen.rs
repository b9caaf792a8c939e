//! Three-round distributed key generation for one identity.
//!
//! ```text
//! Idle ──round1──► Round1Complete ──round2──► Round2Complete ──round3──► Finalized
//! ```
//!
//! `round1` is accepted from any state and restarts the ceremony. A failing
//! operation never transitions.

use std::collections::BTreeSet;
use std::fmt;
use tracing::{info, warn};

use crate::config::check_participant_count;
use crate::element::{SealPurpose, SecureElement};
use crate::error::{CeremonyError, Result};
use crate::types::{
    EncryptedShard, FinalizedKeySet, GroupPublicPackage, Identity, Round1Package,
    Round1PublicPackage, Round2Package, Round2PublicPackage, Round2Share, SecretReceipt, Wire,
};

pub enum DkgState<E: SecureElement> {
    Idle,
    Round1Complete {
        public_package: Round1PublicPackage,
        secret: E::Round1Secret,
    },
    Round2Complete {
        round1_digest: [u8; 32],
        public_package: Round2PublicPackage,
        secret: E::Round2Secret,
    },
    Finalized(Box<FinalizedKeySet>),
}

impl<E: SecureElement> DkgState<E> {
    pub const fn state_name(&self) -> &'static str {
        match self {
            DkgState::Idle => "Idle",
            DkgState::Round1Complete { .. } => "Round1Complete",
            DkgState::Round2Complete { .. } => "Round2Complete",
            DkgState::Finalized(_) => "Finalized",
        }
    }
}

impl<E: SecureElement> fmt::Debug for DkgState<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.state_name())
    }
}

/// Drives the DKG handshake for the identity at `index`.
#[derive(Debug)]
pub struct DkgRoundCoordinator<E: SecureElement> {
    index: u8,
    state: DkgState<E>,
}

impl<E: SecureElement> DkgRoundCoordinator<E> {
    pub fn new(index: u8) -> Self {
        DkgRoundCoordinator {
            index,
            state: DkgState::Idle,
        }
    }

    pub fn index(&self) -> u8 {
        self.index
    }

    pub fn state(&self) -> &DkgState<E> {
        &self.state
    }

    /// Round 1: commits to the identity set and issues the broadcast package.
    ///
    /// # Errors
    /// - `ParticipantCount` when the identity count or `min_signers` is out of bounds.
    /// - `PackageMismatch` on duplicate identities or when the own identity is absent.
    pub fn round1(
        &mut self,
        element: &E,
        identities: &[Identity],
        min_signers: u16,
    ) -> Result<Round1Package> {
        check_participant_count(identities.len(), min_signers)?;

        let identity = element.identity(self.index)?;
        let unique: BTreeSet<&Identity> = identities.iter().collect();
        if unique.len() != identities.len() {
            return Err(CeremonyError::PackageMismatch(
                "identity list contains duplicates".to_string(),
            ));
        }
        if !unique.contains(&identity) {
            return Err(CeremonyError::PackageMismatch(format!(
                "identity list does not contain own identity {identity}"
            )));
        }

        let (public_package, secret) = element.dkg_round1(self.index, identities, min_signers)?;
        let receipt = seal_receipt(element, &identity, &public_package.to_bytes()?)?;

        if matches!(self.state, DkgState::Finalized(_)) {
            warn!(index = self.index, identity = %identity, "round 1 restarted, discarding finalized keys");
        }
        self.state = DkgState::Round1Complete {
            public_package: public_package.clone(),
            secret,
        };

        info!(
            index = self.index,
            identity = %identity,
            participants = identities.len(),
            min_signers,
            "DKG round 1 complete"
        );
        Ok(Round1Package {
            public_package,
            secret_package: receipt,
        })
    }

    /// Round 2: consumes every participant's round 1 package.
    ///
    /// # Errors
    /// - `ProtocolOrder` unless round 1 completed.
    /// - `PackageMismatch` for a foreign receipt, or unknown, duplicate or missing identities.
    pub fn round2(
        &mut self,
        element: &E,
        packages: &[Round1PublicPackage],
        receipt: &SecretReceipt,
    ) -> Result<Round2Package> {
        let (own, secret) = match &self.state {
            DkgState::Round1Complete {
                public_package,
                secret,
            } => (public_package, secret),
            other => {
                return Err(CeremonyError::ProtocolOrder {
                    operation: "round2",
                    state: other.state_name(),
                })
            }
        };

        check_receipt(element, &own.identity, &own.to_bytes()?, receipt)?;
        check_round1_packages(own, packages)?;

        let (public_package, secret) =
            element.dkg_round2(self.index, secret.clone(), packages)?;
        let receipt = seal_receipt(element, &own.identity, &public_package.to_bytes()?)?;
        let round1_digest = round1_digest(packages)?;

        info!(
            index = self.index,
            identity = %own.identity,
            shares = public_package.packages.len(),
            "DKG round 2 complete"
        );
        self.state = DkgState::Round2Complete {
            round1_digest,
            public_package: public_package.clone(),
            secret,
        };
        Ok(Round2Package {
            public_package,
            secret_package: receipt,
        })
    }

    /// Round 3: verifies the shares addressed to this identity and finalizes keys.
    ///
    /// `shares` and `shards` must only contain entries whose recipient is this
    /// identity.
    pub fn round3(
        &mut self,
        element: &E,
        packages: &[Round1PublicPackage],
        shares: &[Round2Share],
        receipt: &SecretReceipt,
        shards: &[EncryptedShard],
    ) -> Result<()> {
        let (digest, own, secret) = match &self.state {
            DkgState::Round2Complete {
                round1_digest,
                public_package,
                secret,
            } => (round1_digest, public_package, secret),
            other => {
                return Err(CeremonyError::ProtocolOrder {
                    operation: "round3",
                    state: other.state_name(),
                })
            }
        };
        let identity = own.sender;

        check_receipt(element, &identity, &own.to_bytes()?, receipt)?;
        if round1_digest(packages)? != *digest {
            return Err(CeremonyError::PackageMismatch(
                "round 1 packages differ from the ones used in round 2".to_string(),
            ));
        }

        let participants: BTreeSet<Identity> = packages.iter().map(|p| p.identity).collect();
        let others: BTreeSet<Identity> = participants
            .iter()
            .copied()
            .filter(|id| *id != identity)
            .collect();

        let mut senders = BTreeSet::new();
        for share in shares {
            if share.recipient != identity {
                return Err(CeremonyError::PackageMismatch(format!(
                    "round 2 package from {} is addressed to {}",
                    share.sender, share.recipient
                )));
            }
            if !senders.insert(share.sender) {
                return Err(CeremonyError::PackageMismatch(format!(
                    "duplicate round 2 package from {}",
                    share.sender
                )));
            }
        }
        if senders != others {
            return Err(CeremonyError::PackageMismatch(
                "round 2 packages do not cover every other participant".to_string(),
            ));
        }

        let mut shard_senders = BTreeSet::new();
        for shard in shards {
            if shard.recipient != identity {
                return Err(CeremonyError::PackageMismatch(format!(
                    "key shard from {} is addressed to {}",
                    shard.sender, shard.recipient
                )));
            }
            if !shard_senders.insert(shard.sender) {
                return Err(CeremonyError::PackageMismatch(format!(
                    "duplicate key shard from {}",
                    shard.sender
                )));
            }
        }
        if shard_senders != participants {
            return Err(CeremonyError::PackageMismatch(
                "key shards do not cover every participant".to_string(),
            ));
        }

        let keys = element.dkg_round3(self.index, secret, packages, shares, shards)?;

        info!(
            index = self.index,
            identity = %identity,
            address = %keys.public_address,
            "DKG finalized"
        );
        self.state = DkgState::Finalized(Box::new(keys));
        Ok(())
    }

    /// Installs restored keys, bypassing the rounds.
    pub fn restore(&mut self, keys: FinalizedKeySet) {
        self.state = DkgState::Finalized(Box::new(keys));
    }

    pub fn keys(&self) -> Result<&FinalizedKeySet> {
        match &self.state {
            DkgState::Finalized(keys) => Ok(keys),
            _ => Err(CeremonyError::NoKeysPresent),
        }
    }

    pub fn get_public_package(&self) -> Result<GroupPublicPackage> {
        Ok(self.keys()?.group_public_package.clone())
    }

    pub fn get_identities(&self) -> Result<Vec<Identity>> {
        Ok(self.keys()?.identities.clone())
    }
}

fn receipt_digest(identity: &Identity, package: &[u8]) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new_derive_key("frost-ceremony 2024-06 round receipt");
    hasher.update(identity.as_bytes());
    hasher.update(package);
    *hasher.finalize().as_bytes()
}

fn seal_receipt<E: SecureElement>(
    element: &E,
    identity: &Identity,
    package: &[u8],
) -> Result<SecretReceipt> {
    let digest = receipt_digest(identity, package);
    Ok(SecretReceipt(element.seal(SealPurpose::Session, &digest)?))
}

fn check_receipt<E: SecureElement>(
    element: &E,
    identity: &Identity,
    package: &[u8],
    receipt: &SecretReceipt,
) -> Result<()> {
    let opened = element
        .unseal(SealPurpose::Session, &receipt.0)
        .map_err(|_| {
            CeremonyError::PackageMismatch("secret package was not issued by this device".to_string())
        })?;
    if opened[..] != receipt_digest(identity, package) {
        return Err(CeremonyError::PackageMismatch(
            "secret package belongs to a different session".to_string(),
        ));
    }
    Ok(())
}

/// Checks the round 1 packages against the identity set committed in round 1.
fn check_round1_packages(own: &Round1PublicPackage, packages: &[Round1PublicPackage]) -> Result<()> {
    let expected: BTreeSet<Identity> = own.identities.iter().copied().collect();
    let mut seen = BTreeSet::new();
    for package in packages {
        if !expected.contains(&package.identity) {
            return Err(CeremonyError::PackageMismatch(format!(
                "round 1 package from unknown identity {}",
                package.identity
            )));
        }
        if !seen.insert(package.identity) {
            return Err(CeremonyError::PackageMismatch(format!(
                "duplicate round 1 package from {}",
                package.identity
            )));
        }
        let identities: BTreeSet<Identity> = package.identities.iter().copied().collect();
        if identities != expected || package.min_signers != own.min_signers {
            return Err(CeremonyError::PackageMismatch(format!(
                "round 1 package from {} uses different ceremony parameters",
                package.identity
            )));
        }
        if package.identity == own.identity && package != own {
            return Err(CeremonyError::PackageMismatch(
                "own round 1 package was altered".to_string(),
            ));
        }
    }
    if seen != expected {
        return Err(CeremonyError::PackageMismatch(format!(
            "expected {} round 1 packages, got {}",
            expected.len(),
            seen.len()
        )));
    }
    Ok(())
}

/// Order-independent digest of a round 1 package set.
fn round1_digest(packages: &[Round1PublicPackage]) -> Result<[u8; 32]> {
    let mut ordered: Vec<&Round1PublicPackage> = packages.iter().collect();
    ordered.sort_by_key(|p| p.identity);
    let mut hasher = blake3::Hasher::new_derive_key("frost-ceremony 2024-06 round1 set");
    for package in ordered {
        hasher.update(&package.to_bytes()?);
    }
    Ok(*hasher.finalize().as_bytes())
}

/// Runs a complete DKG for indices `0..n` of one element.
#[cfg(test)]
pub(crate) fn finalize_for_tests(
    element: &crate::element::SoftwareElement,
    n: u8,
    min_signers: u16,
) -> Vec<FinalizedKeySet> {
    let identities: Vec<Identity> = (0..n).map(|i| element.identity(i).unwrap()).collect();
    let mut coordinators: Vec<DkgRoundCoordinator<crate::element::SoftwareElement>> =
        (0..n).map(DkgRoundCoordinator::new).collect();
    let round1: Vec<Round1Package> = coordinators
        .iter_mut()
        .map(|c| c.round1(element, &identities, min_signers).unwrap())
        .collect();
    let public: Vec<Round1PublicPackage> =
        round1.iter().map(|p| p.public_package.clone()).collect();
    let round2: Vec<Round2Package> = coordinators
        .iter_mut()
        .zip(&round1)
        .map(|(c, own)| c.round2(element, &public, &own.secret_package).unwrap())
        .collect();
    for (i, coordinator) in coordinators.iter_mut().enumerate() {
        let identity = identities[i];
        let shares: Vec<Round2Share> = round2
            .iter()
            .flat_map(|p| p.public_package.packages.iter())
            .filter(|s| s.recipient == identity)
            .cloned()
            .collect();
        let shards: Vec<EncryptedShard> = public
            .iter()
            .flat_map(|p| p.shards.iter())
            .filter(|s| s.recipient == identity)
            .cloned()
            .collect();
        coordinator
            .round3(element, &public, &shares, &round2[i].secret_package, &shards)
            .unwrap();
    }
    coordinators
        .iter()
        .map(|c| c.keys().unwrap().clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::SoftwareElement;

    type Coordinator = DkgRoundCoordinator<SoftwareElement>;

    fn setup(n: u8) -> (SoftwareElement, Vec<Coordinator>, Vec<Identity>) {
        let element = SoftwareElement::new([5; 32]);
        let coordinators = (0..n).map(Coordinator::new).collect();
        let identities = (0..n).map(|i| element.identity(i).unwrap()).collect();
        (element, coordinators, identities)
    }

    fn run_to_round2(
        element: &SoftwareElement,
        coordinators: &mut [Coordinator],
        identities: &[Identity],
        min_signers: u16,
    ) -> (Vec<Round1Package>, Vec<Round2Package>) {
        let round1: Vec<Round1Package> = coordinators
            .iter_mut()
            .map(|c| c.round1(element, identities, min_signers).unwrap())
            .collect();
        let public: Vec<Round1PublicPackage> =
            round1.iter().map(|p| p.public_package.clone()).collect();
        let round2 = coordinators
            .iter_mut()
            .zip(&round1)
            .map(|(c, own)| c.round2(element, &public, &own.secret_package).unwrap())
            .collect();
        (round1, round2)
    }

    fn inbox(round2: &[Round2Package], identity: &Identity) -> Vec<Round2Share> {
        round2
            .iter()
            .flat_map(|p| p.public_package.packages.iter())
            .filter(|s| s.recipient == *identity)
            .cloned()
            .collect()
    }

    fn shards(round1: &[Round1Package], identity: &Identity) -> Vec<EncryptedShard> {
        round1
            .iter()
            .flat_map(|p| p.public_package.shards.iter())
            .filter(|s| s.recipient == *identity)
            .cloned()
            .collect()
    }

    #[test]
    fn test_full_dkg_agrees() {
        let (element, mut coordinators, identities) = setup(3);
        let (round1, round2) = run_to_round2(&element, &mut coordinators, &identities, 2);
        let public: Vec<Round1PublicPackage> =
            round1.iter().map(|p| p.public_package.clone()).collect();

        for (i, coordinator) in coordinators.iter_mut().enumerate() {
            let result = coordinator.round3(
                &element,
                &public,
                &inbox(&round2, &identities[i]),
                &round2[i].secret_package,
                &shards(&round1, &identities[i]),
            );
            assert!(result.is_ok(), "round 3 failed: {:?}", result.err());
        }

        let first = coordinators[0].keys().unwrap();
        for coordinator in &coordinators[1..] {
            let keys = coordinator.keys().unwrap();
            assert_eq!(keys.public_address, first.public_address);
            assert_eq!(keys.group_public_package, first.group_public_package);
        }
    }

    #[test]
    fn test_round2_before_round1() {
        let (element, mut coordinators, _) = setup(2);
        let err = coordinators[0]
            .round2(&element, &[], &SecretReceipt(vec![0; 40]))
            .unwrap_err();
        assert!(matches!(
            err,
            CeremonyError::ProtocolOrder { operation: "round2", state: "Idle" }
        ));
    }

    #[test]
    fn test_round1_bounds() {
        let element = SoftwareElement::new([5; 32]);
        let identities: Vec<Identity> = (0..5).map(|i| element.identity(i).unwrap()).collect();
        let mut coordinator = Coordinator::new(0);

        let err = coordinator.round1(&element, &identities, 2).unwrap_err();
        assert!(matches!(err, CeremonyError::ParticipantCount { .. }));
        let err = coordinator.round1(&element, &identities[..2], 3).unwrap_err();
        assert!(matches!(err, CeremonyError::ParticipantCount { .. }));
        assert_eq!(coordinator.state().state_name(), "Idle");
    }

    #[test]
    fn test_round1_requires_own_identity() {
        let element = SoftwareElement::new([5; 32]);
        let identities = vec![element.identity(1).unwrap(), element.identity(2).unwrap()];
        let mut coordinator = Coordinator::new(0);
        let err = coordinator.round1(&element, &identities, 2).unwrap_err();
        assert!(matches!(err, CeremonyError::PackageMismatch(_)));
    }

    #[test]
    fn test_round2_rejects_missing_participant() {
        let (element, mut coordinators, identities) = setup(3);
        let round1: Vec<Round1Package> = coordinators
            .iter_mut()
            .map(|c| c.round1(&element, &identities, 2).unwrap())
            .collect();
        let partial: Vec<Round1PublicPackage> =
            round1[..2].iter().map(|p| p.public_package.clone()).collect();

        let err = coordinators[0]
            .round2(&element, &partial, &round1[0].secret_package)
            .unwrap_err();
        assert!(matches!(err, CeremonyError::PackageMismatch(_)));
        assert_eq!(coordinators[0].state().state_name(), "Round1Complete");
    }

    #[test]
    fn test_round2_rejects_foreign_receipt() {
        let (element, mut coordinators, identities) = setup(2);
        let round1: Vec<Round1Package> = coordinators
            .iter_mut()
            .map(|c| c.round1(&element, &identities, 2).unwrap())
            .collect();
        let public: Vec<Round1PublicPackage> =
            round1.iter().map(|p| p.public_package.clone()).collect();

        let err = coordinators[0]
            .round2(&element, &public, &round1[1].secret_package)
            .unwrap_err();
        assert!(matches!(err, CeremonyError::PackageMismatch(_)));
    }

    #[test]
    fn test_round3_rejects_misaddressed_share() {
        let (element, mut coordinators, identities) = setup(2);
        let (round1, round2) = run_to_round2(&element, &mut coordinators, &identities, 2);
        let public: Vec<Round1PublicPackage> =
            round1.iter().map(|p| p.public_package.clone()).collect();

        // Shares meant for identity 1 handed to identity 0.
        let err = coordinators[0]
            .round3(
                &element,
                &public,
                &inbox(&round2, &identities[1]),
                &round2[0].secret_package,
                &shards(&round1, &identities[0]),
            )
            .unwrap_err();
        assert!(matches!(err, CeremonyError::PackageMismatch(_)));
        assert_eq!(coordinators[0].state().state_name(), "Round2Complete");
    }

    #[test]
    fn test_keys_before_finalized() {
        let coordinator = Coordinator::new(0);
        assert!(matches!(
            coordinator.get_public_package(),
            Err(CeremonyError::NoKeysPresent)
        ));
    }
}
