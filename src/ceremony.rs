//! Orchestrates the n-party DKG and signing flows across participant agents.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::info;

use crate::agent::ParticipantAgent;
use crate::config::{check_participant_count, Topology};
use crate::error::{CeremonyError, Result};
use crate::transaction::{SignedTransaction, Transaction};
use crate::types::{
    EncryptedBackup, EncryptedShard, GroupPublicPackage, Identity, KeyKind, PublicAddress,
    RetrievedKey, Round1Package, Round1PublicPackage, Round2Package, Round2Share, Wire,
};
use crate::verify::Aggregator;

/// Where a participant lives: which device, which identity index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Seat {
    pub device: usize,
    pub index: u8,
}

/// Agreed outcome of a completed DKG.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DkgOutcome {
    pub identities: Vec<Identity>,
    pub public_address: PublicAddress,
    pub group_public_package: GroupPublicPackage,
}

pub struct Ceremony<A: ParticipantAgent> {
    devices: Vec<A>,
    seats: Vec<Seat>,
    min_signers: u16,
    identities: Vec<Identity>,
}

impl<A: ParticipantAgent> Ceremony<A> {
    /// Lays out `participants` seats over devices created by `make_device`.
    ///
    /// `Shared` puts every participant on one device at indices `0..n`;
    /// `PerParticipant` gives each participant its own device at index 0.
    pub fn new(
        topology: Topology,
        participants: usize,
        min_signers: u16,
        mut make_device: impl FnMut() -> A,
    ) -> Result<Self> {
        check_participant_count(participants, min_signers)?;

        let (devices, seats) = match topology {
            Topology::Shared => {
                let seats = (0..participants)
                    .map(|i| Seat {
                        device: 0,
                        index: i as u8,
                    })
                    .collect();
                (vec![make_device()], seats)
            }
            Topology::PerParticipant => {
                let devices = (0..participants).map(|_| make_device()).collect();
                let seats = (0..participants)
                    .map(|i| Seat { device: i, index: 0 })
                    .collect();
                (devices, seats)
            }
        };

        info!(?topology, participants, min_signers, "ceremony created");
        Self::from_parts(devices, seats, min_signers)
    }

    /// Rebuilds a ceremony over existing devices.
    pub fn from_parts(devices: Vec<A>, seats: Vec<Seat>, min_signers: u16) -> Result<Self> {
        check_participant_count(seats.len(), min_signers)?;
        if let Some(seat) = seats.iter().find(|s| s.device >= devices.len()) {
            return Err(CeremonyError::Config(format!(
                "seat refers to device {} of {}",
                seat.device,
                devices.len()
            )));
        }
        Ok(Ceremony {
            devices,
            seats,
            min_signers,
            identities: Vec::new(),
        })
    }

    pub fn devices(&self) -> &[A] {
        &self.devices
    }

    pub fn seats(&self) -> &[Seat] {
        &self.seats
    }

    pub fn min_signers(&self) -> u16 {
        self.min_signers
    }

    /// The agent of participant `position`, with its identity made active.
    pub fn participant(&mut self, position: usize) -> Result<&mut A> {
        let seat = *self.seats.get(position).ok_or_else(|| {
            CeremonyError::Config(format!(
                "participant {position} does not exist ({} seats)",
                self.seats.len()
            ))
        })?;
        let agent = &mut self.devices[seat.device];
        agent.get_identity(seat.index, true)?;
        Ok(agent)
    }

    /// Persists every participant's identity, in seat order.
    pub fn identities(&mut self) -> Result<Vec<Identity>> {
        let mut identities = Vec::with_capacity(self.seats.len());
        for position in 0..self.seats.len() {
            let seat = self.seats[position];
            identities.push(self.devices[seat.device].get_identity(seat.index, true)?);
        }
        self.identities = identities.clone();
        Ok(identities)
    }

    /// Runs identities and rounds 1 to 3, then checks every participant agrees.
    pub fn run_dkg(&mut self) -> Result<DkgOutcome> {
        let identities = self.identities()?;
        let min_signers = self.min_signers;

        // Step 1: every participant commits to the identity set.
        let mut round1: Vec<Round1Package> = Vec::with_capacity(self.seats.len());
        for seat in self.seats.clone() {
            round1.push(self.devices[seat.device].round1(seat.index, &identities, min_signers)?);
        }
        let public1: Vec<Round1PublicPackage> =
            round1.iter().map(|p| p.public_package.clone()).collect();
        info!(participants = public1.len(), "round 1 broadcast");

        // Step 2: every participant answers with one share per other participant.
        let mut round2: Vec<Round2Package> = Vec::with_capacity(self.seats.len());
        for (seat, own) in self.seats.clone().into_iter().zip(&round1) {
            round2.push(self.devices[seat.device].round2(
                seat.index,
                &public1,
                &own.secret_package,
            )?);
        }

        // Step 3: route shares and shards to their recipients and finalize.
        let inboxes = round2_inboxes(&round2);
        let shards = shard_inboxes(&public1);
        for ((seat, identity), own) in self.seats.clone().into_iter().zip(&identities).zip(&round2) {
            let inbox = inboxes.get(identity).map(Vec::as_slice).unwrap_or_default();
            let own_shards = shards.get(identity).map(Vec::as_slice).unwrap_or_default();
            self.devices[seat.device].round3(
                seat.index,
                &public1,
                inbox,
                &own.secret_package,
                own_shards,
            )?;
        }

        // Step 4: every participant must derive the same account.
        let mut outcome: Option<DkgOutcome> = None;
        for position in 0..self.seats.len() {
            let agent = self.participant(position)?;
            let public_address = match agent.retrieve_keys(KeyKind::PublicAddress)? {
                RetrievedKey::PublicAddress(address) => address,
                _ => {
                    return Err(CeremonyError::crypto(
                        "device returned a different key kind",
                    ))
                }
            };
            let group_public_package = agent.get_public_package()?;

            match &outcome {
                None => {
                    outcome = Some(DkgOutcome {
                        identities: identities.clone(),
                        public_address,
                        group_public_package,
                    })
                }
                Some(first) => {
                    if first.public_address != public_address
                        || first.group_public_package != group_public_package
                    {
                        return Err(CeremonyError::PackageMismatch(format!(
                            "participant {position} derived a different group key"
                        )));
                    }
                }
            }
        }

        let outcome = outcome.ok_or(CeremonyError::NoKeysPresent)?;
        info!(address = %outcome.public_address, "DKG complete, all participants agree");
        Ok(outcome)
    }

    /// Encrypted backups of every participant, in seat order.
    pub fn backups(&mut self) -> Result<Vec<EncryptedBackup>> {
        let mut backups = Vec::with_capacity(self.seats.len());
        for position in 0..self.seats.len() {
            backups.push(self.participant(position)?.backup_keys()?);
        }
        Ok(backups)
    }

    /// Restores each participant from its backup, in seat order.
    pub fn restore(&mut self, backups: &[EncryptedBackup]) -> Result<()> {
        if backups.len() != self.seats.len() {
            return Err(CeremonyError::Config(format!(
                "{} backups for {} participants",
                backups.len(),
                self.seats.len()
            )));
        }
        for (seat, backup) in self.seats.clone().into_iter().zip(backups) {
            self.devices[seat.device].restore_keys(backup)?;
        }
        self.identities()?;
        Ok(())
    }

    /// Signs `transaction` with the participants at `signers` and aggregates.
    pub fn sign_transaction(
        &mut self,
        aggregator: &impl Aggregator,
        transaction: &Transaction,
        signers: &[usize],
    ) -> Result<SignedTransaction> {
        if signers.len() < self.min_signers as usize {
            return Err(CeremonyError::AggregationMismatch(format!(
                "{} signers selected, at least {} required",
                signers.len(),
                self.min_signers
            )));
        }
        let serialized = transaction.to_bytes()?;
        let tx_hash = transaction.hash();

        // Step 1: every signer reviews the transaction.
        for &position in signers {
            let reviewed = self.participant(position)?.review_transaction(&serialized)?;
            if reviewed.hash != tx_hash {
                return Err(CeremonyError::PackageMismatch(format!(
                    "participant {position} computed a different transaction hash"
                )));
            }
        }

        // Step 2: collect commitments and build the signing package.
        let mut commitments = Vec::with_capacity(signers.len());
        for &position in signers {
            commitments.push(self.participant(position)?.get_commitments(&tx_hash)?);
        }
        let package = aggregator.signing_package(
            &tx_hash,
            &transaction.public_key_randomness,
            &commitments,
        )?;

        // Step 3: release nonces and sign.
        let mut shares = Vec::with_capacity(signers.len());
        for &position in signers {
            let agent = self.participant(position)?;
            agent.get_nonces(&tx_hash)?;
            shares.push(agent.sign(&transaction.public_key_randomness, &package, &tx_hash)?);
        }

        // Step 4: aggregate and check the result.
        let first = *signers.first().ok_or_else(|| {
            CeremonyError::AggregationMismatch("no signers selected".to_string())
        })?;
        let group = self.participant(first)?.get_public_package()?;
        let identities = if self.identities.is_empty() {
            self.identities()?
        } else {
            self.identities.clone()
        };
        let signature = aggregator.aggregate(&identities, &group, &package, &shares)?;

        let signed = SignedTransaction {
            transaction: transaction.clone(),
            signature: signature.bytes,
        };
        if !aggregator.verify(&group, &signed)? {
            return Err(CeremonyError::AggregationMismatch(
                "aggregated signature does not verify".to_string(),
            ));
        }
        info!(tx_hash = %tx_hash, signers = signers.len(), "transaction signed");
        Ok(signed)
    }
}

/// Round 2 shares keyed by recipient identity.
pub fn round2_inboxes(packages: &[Round2Package]) -> BTreeMap<Identity, Vec<Round2Share>> {
    let mut inboxes: BTreeMap<Identity, Vec<Round2Share>> = BTreeMap::new();
    for share in packages.iter().flat_map(|p| p.public_package.packages.iter()) {
        inboxes.entry(share.recipient).or_default().push(share.clone());
    }
    inboxes
}

/// Group secret key shards keyed by recipient identity.
pub fn shard_inboxes(packages: &[Round1PublicPackage]) -> BTreeMap<Identity, Vec<EncryptedShard>> {
    let mut inboxes: BTreeMap<Identity, Vec<EncryptedShard>> = BTreeMap::new();
    for shard in packages.iter().flat_map(|p| p.shards.iter()) {
        inboxes.entry(shard.recipient).or_default().push(shard.clone());
    }
    inboxes
}
