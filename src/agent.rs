//! The participant capability surface and the device that implements it.

use std::collections::BTreeMap;
use std::fmt;
use tracing::{info, warn};

use crate::backup::KeyBackupManager;
use crate::element::{SecureElement, MAX_IDENTITY_INDEX};
use crate::error::{CeremonyError, Result};
use crate::identity::IdentityRegistry;
use crate::keygen::DkgRoundCoordinator;
use crate::sign::SigningCeremonyCoordinator;
use crate::transaction::{review, ReviewedTransaction};
use crate::types::{
    Commitment, EncryptedBackup, EncryptedShard, FinalizedKeySet, GroupPublicPackage, Identity,
    KeyKind, Nonce, PublicAddress, RetrievedKey, Round1Package, Round1PublicPackage,
    Round2Package, Round2Share, SecretReceipt, SignatureShare, SigningPackage, TxHash,
};

/// Operations every ceremony participant exposes.
///
/// Post-DKG operations act on the participant's active identity.
pub trait ParticipantAgent {
    fn get_identity(&mut self, index: u8, persist: bool) -> Result<Identity>;

    fn round1(
        &mut self,
        index: u8,
        identities: &[Identity],
        min_signers: u16,
    ) -> Result<Round1Package>;

    fn round2(
        &mut self,
        index: u8,
        round1_public_packages: &[Round1PublicPackage],
        round1_secret: &SecretReceipt,
    ) -> Result<Round2Package>;

    fn round3(
        &mut self,
        index: u8,
        round1_public_packages: &[Round1PublicPackage],
        round2_public_packages: &[Round2Share],
        round2_secret: &SecretReceipt,
        shards: &[EncryptedShard],
    ) -> Result<()>;

    fn backup_keys(&self) -> Result<EncryptedBackup>;

    fn restore_keys(&mut self, backup: &EncryptedBackup) -> Result<()>;

    fn retrieve_keys(&self, kind: KeyKind) -> Result<RetrievedKey>;

    fn get_public_package(&self) -> Result<GroupPublicPackage>;

    fn get_identities(&self) -> Result<Vec<Identity>>;

    fn get_commitments(&mut self, tx_hash: &TxHash) -> Result<Commitment>;

    fn get_nonces(&mut self, tx_hash: &TxHash) -> Result<Nonce>;

    fn sign(
        &mut self,
        public_key_randomness: &[u8],
        signing_package: &SigningPackage,
        tx_hash: &TxHash,
    ) -> Result<SignatureShare>;

    fn review_transaction(&self, serialized_tx: &[u8]) -> Result<ReviewedTransaction>;

    fn set_expert_mode(&mut self, enabled: bool);
}

/// What the device asks the user to confirm.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Prompt {
    Identity {
        index: u8,
        identity: Identity,
    },
    Round1 {
        index: u8,
        participants: usize,
        min_signers: u16,
    },
    BackupKeys {
        address: PublicAddress,
        participants: usize,
        min_signers: u16,
    },
    RestoreKeys {
        address: PublicAddress,
        participants: usize,
        min_signers: u16,
    },
    ReviewTransaction {
        fields: Vec<(String, String)>,
    },
}

/// User confirmation hook. May block until the user answers.
pub trait Approver {
    fn confirm(&self, prompt: &Prompt) -> bool;
}

/// Approves every prompt.
#[derive(Clone, Copy, Debug, Default)]
pub struct AutoApprove;

impl Approver for AutoApprove {
    fn confirm(&self, _prompt: &Prompt) -> bool {
        true
    }
}

/// Per-index DKG and signing state.
#[derive(Debug)]
pub struct Slot<E: SecureElement> {
    pub dkg: DkgRoundCoordinator<E>,
    pub signing: SigningCeremonyCoordinator,
}

impl<E: SecureElement> Slot<E> {
    fn new(index: u8) -> Self {
        Slot {
            dkg: DkgRoundCoordinator::new(index),
            signing: SigningCeremonyCoordinator::new(),
        }
    }
}

/// A secure element with its identity slots and session settings.
pub struct Device<E: SecureElement> {
    element: E,
    registry: IdentityRegistry,
    slots: BTreeMap<u8, Slot<E>>,
    expert_mode: bool,
    approver: Box<dyn Approver>,
}

impl<E: SecureElement + fmt::Debug> fmt::Debug for Device<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("element", &self.element)
            .field("registry", &self.registry)
            .field("slots", &self.slots.keys().collect::<Vec<_>>())
            .field("expert_mode", &self.expert_mode)
            .finish_non_exhaustive()
    }
}

impl<E: SecureElement> Device<E> {
    pub fn new(element: E) -> Self {
        Device {
            element,
            registry: IdentityRegistry::new(),
            slots: BTreeMap::new(),
            expert_mode: false,
            approver: Box::new(AutoApprove),
        }
    }

    pub fn with_approver(mut self, approver: impl Approver + 'static) -> Self {
        self.approver = Box::new(approver);
        self
    }

    pub fn with_expert_mode(mut self, enabled: bool) -> Self {
        self.expert_mode = enabled;
        self
    }

    pub fn element(&self) -> &E {
        &self.element
    }

    pub fn expert_mode(&self) -> bool {
        self.expert_mode
    }

    pub fn active_index(&self) -> Option<u8> {
        self.registry.active()
    }

    pub fn slot(&self, index: u8) -> Option<&Slot<E>> {
        self.slots.get(&index)
    }

    /// Shows the identity at `index` to the user and persists it once confirmed.
    pub fn review_identity(&mut self, index: u8) -> Result<Identity> {
        let identity = self.registry.get_identity(&self.element, index, false)?;
        self.approve(&Prompt::Identity { index, identity }, "identity review")?;
        self.registry.activate(index, identity)?;
        Ok(identity)
    }

    fn approve(&self, prompt: &Prompt, operation: &'static str) -> Result<()> {
        if self.approver.confirm(prompt) {
            Ok(())
        } else {
            warn!(operation, "operation denied by user");
            Err(CeremonyError::Denied(operation))
        }
    }

    fn element_and_slot(&mut self, index: u8) -> Result<(&E, &mut Slot<E>)> {
        if index > MAX_IDENTITY_INDEX {
            return Err(CeremonyError::InvalidIndex {
                index,
                max: MAX_IDENTITY_INDEX,
            });
        }
        let slot = self.slots.entry(index).or_insert_with(|| Slot::new(index));
        Ok((&self.element, slot))
    }

    fn active_keys(&self) -> Result<&FinalizedKeySet> {
        let index = self.registry.active().ok_or(CeremonyError::NoKeysPresent)?;
        self.slots
            .get(&index)
            .ok_or(CeremonyError::NoKeysPresent)?
            .dkg
            .keys()
    }

    /// Active slot together with the element, for the signing operations.
    fn active_signing(&mut self) -> Result<(&E, &FinalizedKeySet, &mut SigningCeremonyCoordinator)> {
        let index = self.registry.active().ok_or(CeremonyError::NoKeysPresent)?;
        let slot = self.slots.get_mut(&index).ok_or(CeremonyError::NoKeysPresent)?;
        let keys = slot.dkg.keys()?;
        Ok((&self.element, keys, &mut slot.signing))
    }
}

impl<E: SecureElement> ParticipantAgent for Device<E> {
    fn get_identity(&mut self, index: u8, persist: bool) -> Result<Identity> {
        self.registry.get_identity(&self.element, index, persist)
    }

    fn round1(
        &mut self,
        index: u8,
        identities: &[Identity],
        min_signers: u16,
    ) -> Result<Round1Package> {
        let identity = self.element.identity(index)?;
        self.approve(
            &Prompt::Round1 {
                index,
                participants: identities.len(),
                min_signers,
            },
            "round1",
        )?;

        let (element, slot) = self.element_and_slot(index)?;
        let package = slot.dkg.round1(element, identities, min_signers)?;
        slot.signing.reset();
        self.registry.activate(index, identity)?;
        Ok(package)
    }

    fn round2(
        &mut self,
        index: u8,
        round1_public_packages: &[Round1PublicPackage],
        round1_secret: &SecretReceipt,
    ) -> Result<Round2Package> {
        let (element, slot) = self.element_and_slot(index)?;
        slot.dkg.round2(element, round1_public_packages, round1_secret)
    }

    fn round3(
        &mut self,
        index: u8,
        round1_public_packages: &[Round1PublicPackage],
        round2_public_packages: &[Round2Share],
        round2_secret: &SecretReceipt,
        shards: &[EncryptedShard],
    ) -> Result<()> {
        let (element, slot) = self.element_and_slot(index)?;
        slot.dkg.round3(
            element,
            round1_public_packages,
            round2_public_packages,
            round2_secret,
            shards,
        )
    }

    fn backup_keys(&self) -> Result<EncryptedBackup> {
        let keys = self.active_keys()?;
        self.approve(
            &Prompt::BackupKeys {
                address: keys.public_address,
                participants: keys.identities.len(),
                min_signers: keys.min_signers,
            },
            "backup",
        )?;
        KeyBackupManager::backup(&self.element, keys)
    }

    fn restore_keys(&mut self, backup: &EncryptedBackup) -> Result<()> {
        let keys = KeyBackupManager::restore(&self.element, backup)?;
        self.approve(
            &Prompt::RestoreKeys {
                address: keys.public_address,
                participants: keys.identities.len(),
                min_signers: keys.min_signers,
            },
            "restore",
        )?;

        let index = IdentityRegistry::locate(&self.element, &keys.identity)?;
        let identity = keys.identity;
        let (_, slot) = self.element_and_slot(index)?;
        slot.dkg.restore(keys);
        slot.signing.reset();
        self.registry.activate(index, identity)?;
        info!(index, identity = %identity, "keys restored into slot");
        Ok(())
    }

    fn retrieve_keys(&self, kind: KeyKind) -> Result<RetrievedKey> {
        let keys = self.active_keys()?;
        Ok(match kind {
            KeyKind::PublicAddress => RetrievedKey::PublicAddress(keys.public_address),
            KeyKind::ViewKey => RetrievedKey::ViewKey(keys.view_key.clone()),
            KeyKind::ProofGenerationKey => {
                RetrievedKey::ProofGenerationKey(keys.proof_generation_key.clone())
            }
            KeyKind::Identity => RetrievedKey::Identity(keys.identity),
        })
    }

    fn get_public_package(&self) -> Result<GroupPublicPackage> {
        Ok(self.active_keys()?.group_public_package.clone())
    }

    fn get_identities(&self) -> Result<Vec<Identity>> {
        Ok(self.active_keys()?.identities.clone())
    }

    fn get_commitments(&mut self, tx_hash: &TxHash) -> Result<Commitment> {
        let (element, keys, signing) = self.active_signing()?;
        signing.get_commitments(element, keys, tx_hash)
    }

    fn get_nonces(&mut self, tx_hash: &TxHash) -> Result<Nonce> {
        let (_, keys, signing) = self.active_signing()?;
        signing.get_nonces(keys, tx_hash)
    }

    fn sign(
        &mut self,
        public_key_randomness: &[u8],
        signing_package: &SigningPackage,
        tx_hash: &TxHash,
    ) -> Result<SignatureShare> {
        let (element, keys, signing) = self.active_signing()?;
        signing.sign(element, keys, public_key_randomness, signing_package, tx_hash)
    }

    fn review_transaction(&self, serialized_tx: &[u8]) -> Result<ReviewedTransaction> {
        let reviewed = review(serialized_tx, self.expert_mode)?;
        self.approve(
            &Prompt::ReviewTransaction {
                fields: reviewed.fields.clone(),
            },
            "review transaction",
        )?;
        Ok(reviewed)
    }

    fn set_expert_mode(&mut self, enabled: bool) {
        info!(enabled, "expert mode toggled");
        self.expert_mode = enabled;
    }
}
