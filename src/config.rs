//! Ceremony configuration.
//!
//! Loaded from a JSON file with `serde_json`; every field has a default so a
//! partial file is accepted. CLI arguments override the loaded values.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::error::{CeremonyError, Result};
use crate::types::{MAX_PARTICIPANTS, MIN_SIGNERS};

/// How participants are mapped onto devices.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Topology {
    /// One device holds every participant identity, one slot per index.
    #[default]
    Shared,
    /// Each participant has its own device, seeded independently.
    PerParticipant,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CeremonyConfig {
    pub participants: usize,
    pub min_signers: u16,
    pub topology: Topology,
    pub expert_mode: bool,
}

impl Default for CeremonyConfig {
    fn default() -> Self {
        CeremonyConfig {
            participants: 2,
            min_signers: 2,
            topology: Topology::Shared,
            expert_mode: false,
        }
    }
}

impl CeremonyConfig {
    /// Loads and validates a configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let config: CeremonyConfig = serde_json::from_reader(BufReader::new(file))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        check_participant_count(self.participants, self.min_signers)
    }
}

/// Checks `2 <= min_signers <= participants <= MAX_PARTICIPANTS`.
pub fn check_participant_count(participants: usize, min_signers: u16) -> Result<()> {
    let valid = participants >= MIN_SIGNERS as usize
        && participants <= MAX_PARTICIPANTS
        && min_signers >= MIN_SIGNERS
        && min_signers as usize <= participants;
    if !valid {
        return Err(CeremonyError::ParticipantCount {
            participants,
            min_signers,
            max: MAX_PARTICIPANTS,
        });
    }
    Ok(())
}
