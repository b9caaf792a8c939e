//! FROST distributed key generation and threshold signing ceremony.
//!
//! Participants are [`agent::Device`]s backed by a [`element::SecureElement`].
//! [`ceremony::Ceremony`] drives the DKG and the signing flow across them; the
//! functions below run the same flows against JSON files, as the CLI does.

pub mod agent;
pub mod backup;
pub mod ceremony;
pub mod config;
pub mod element;
pub mod error;
pub mod identity;
pub mod keygen;
pub mod sign;
pub mod transaction;
pub mod types;
pub mod verify;

use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::BufReader;
use std::path::Path;

pub use agent::{Approver, AutoApprove, Device, ParticipantAgent, Prompt};
pub use ceremony::{Ceremony, DkgOutcome, Seat};
pub use config::{CeremonyConfig, Topology};
pub use element::{SecureElement, SoftwareElement};
pub use error::{CeremonyError, Result};
pub use transaction::{SignedTransaction, Transaction};
pub use verify::{Aggregator, FrostAggregator};

use types::{EncryptedBackup, GroupPublicPackage, Identity, PublicAddress};

/// Value sent to self by the transaction `sign_message` builds.
const TRANSFER_VALUE: u64 = 1;
const TRANSFER_FEE: i64 = 1;

/// Seed of one simulated device.
#[derive(Serialize, Deserialize)]
pub struct DeviceRecord {
    #[serde(with = "hex::serde")]
    pub seed: [u8; 32],
}

/// Everything needed to bring a ceremony back: device seeds, seat layout and
/// one encrypted backup per participant.
///
/// The seeds unlock the backups, so the file is secret material and must be
/// stored like a private key.
#[derive(Serialize, Deserialize)]
pub struct CeremonyFile {
    pub topology: Topology,
    pub min_signers: u16,
    pub devices: Vec<DeviceRecord>,
    pub seats: Vec<Seat>,
    pub identities: Vec<Identity>,
    pub backups: Vec<EncryptedBackup>,
    pub public_address: PublicAddress,
    pub group_public_package: GroupPublicPackage,
}

/// Runs identities, the DKG and the backups, then writes the ceremony file.
///
/// # Arguments
/// - `config`: Participants, threshold, topology and expert mode.
/// - `keys_file`: Path of the JSON ceremony file to write.
pub fn generate_keys(
    config: &CeremonyConfig,
    keys_file: &str,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    config.validate()?;

    // Step 1: Create the devices with fresh seeds.
    let mut ceremony = Ceremony::new(
        config.topology,
        config.participants,
        config.min_signers,
        || Device::new(SoftwareElement::random()).with_expert_mode(config.expert_mode),
    )?;

    // Step 2: Run the three DKG rounds.
    let outcome = ceremony.run_dkg()?;
    println!("DKG complete, public address: {}", outcome.public_address);

    // Step 3: Back up every participant's keys.
    let backups = ceremony.backups()?;

    // Step 4: Save the ceremony file.
    let ceremony_file = CeremonyFile {
        topology: config.topology,
        min_signers: config.min_signers,
        devices: ceremony
            .devices()
            .iter()
            .map(|device| DeviceRecord {
                seed: *device.element().seed(),
            })
            .collect(),
        seats: ceremony.seats().to_vec(),
        identities: outcome.identities,
        backups,
        public_address: outcome.public_address,
        group_public_package: outcome.group_public_package,
    };
    write_json(keys_file, &ceremony_file)?;

    println!(
        "Generated {} shares with threshold {}. Keys saved to {}",
        config.participants, config.min_signers, keys_file
    );
    Ok(())
}

/// Signs a one-spend, one-output native transaction carrying `memo`.
///
/// # Arguments
/// - `memo`: Memo of the transaction output.
/// - `signers`: Positions of the participants that sign.
/// - `keys_file`: Ceremony file written by [`generate_keys`].
/// - `signature_file`: Path to save the signed transaction.
/// - `expert_mode`: Display mode of the restored devices.
///
/// # Errors
/// Returns an error if loading the ceremony, restoring keys, or signing fails.
pub fn sign_message(
    memo: &str,
    signers: &[usize],
    keys_file: &str,
    signature_file: &str,
    expert_mode: bool,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    // Step 1: Load the ceremony file.
    let ceremony_file: CeremonyFile = read_json(keys_file)?;

    // Step 2: Rebuild the devices and restore their keys.
    let devices = ceremony_file
        .devices
        .iter()
        .map(|record| Device::new(SoftwareElement::new(record.seed)).with_expert_mode(expert_mode))
        .collect();
    let mut ceremony = Ceremony::from_parts(
        devices,
        ceremony_file.seats.clone(),
        ceremony_file.min_signers,
    )?;
    ceremony.restore(&ceremony_file.backups)?;

    // Step 3: Build the transaction, paying back to the group address.
    let transaction = Transaction::transfer(
        &ceremony_file.group_public_package,
        ceremony_file.public_address,
        TRANSFER_VALUE,
        TRANSFER_FEE,
        memo,
    );

    // Step 4: Review, commit, sign and aggregate.
    let signed = ceremony.sign_transaction(&FrostAggregator, &transaction, signers)?;

    // Step 5: Save the signed transaction.
    write_json(signature_file, &signed)?;

    println!("Signed transaction {} saved to: {}", transaction.hash(), signature_file);
    Ok(())
}

/// Validates the group signature of a signed transaction.
///
/// # Arguments
/// - `keys_file`: Ceremony file holding the group public package.
/// - `signature_file`: Signed transaction written by [`sign_message`].
///
/// # Returns
/// - `Ok(())` if the transaction is signed by the ceremony's group.
/// - An error if a file cannot be read or the signature does not verify.
pub fn validate_signature(
    keys_file: &str,
    signature_file: &str,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    // Step 1: Load the group key and the signed transaction.
    let ceremony_file: CeremonyFile = read_json(keys_file)?;
    let signed: SignedTransaction = read_json(signature_file)?;

    // Step 2: Verify against the ceremony's group key.
    if !FrostAggregator.verify(&ceremony_file.group_public_package, &signed)? {
        return Err("Signature verification failed".into());
    }

    println!("Signature is valid!");
    Ok(())
}

fn read_json<T: serde::de::DeserializeOwned>(path: &str) -> Result<T> {
    let file = File::open(path)?;
    Ok(serde_json::from_reader(BufReader::new(file))?)
}

fn write_json<T: Serialize>(path: &str, value: &T) -> Result<()> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let file = File::create(path)?;
    serde_json::to_writer_pretty(file, value)?;
    Ok(())
}
