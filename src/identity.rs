//! Issues and tracks per-participant identities on a device.

use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::element::{SecureElement, MAX_IDENTITY_INDEX};
use crate::error::{CeremonyError, Result};
use crate::types::Identity;

/// Confirmed identities of one device, plus the one post-DKG operations use.
#[derive(Debug, Default)]
pub struct IdentityRegistry {
    confirmed: BTreeMap<u8, Identity>,
    active: Option<u8>,
}

impl IdentityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Derives the identity at `index`.
    ///
    /// With `persist` the identity is confirmed and becomes the active one;
    /// otherwise it is a preview and nothing changes.
    pub fn get_identity<E: SecureElement>(
        &mut self,
        element: &E,
        index: u8,
        persist: bool,
    ) -> Result<Identity> {
        let identity = element.identity(index)?;
        if persist {
            self.activate(index, identity)?;
        } else {
            debug!(index, identity = %identity, "identity preview");
        }
        Ok(identity)
    }

    /// Confirms `identity` at `index` and makes it active.
    pub fn activate(&mut self, index: u8, identity: Identity) -> Result<()> {
        if let Some(existing) = self.confirmed.get(&index) {
            if *existing != identity {
                return Err(CeremonyError::PackageMismatch(format!(
                    "identity at index {index} no longer matches its derivation"
                )));
            }
        }
        if self.active != Some(index) {
            info!(index, identity = %identity, "active identity selected");
        }
        self.confirmed.insert(index, identity);
        self.active = Some(index);
        Ok(())
    }

    pub fn active(&self) -> Option<u8> {
        self.active
    }

    pub fn confirmed(&self, index: u8) -> Option<Identity> {
        self.confirmed.get(&index).copied()
    }

    /// Finds the index whose derivation yields `identity`.
    pub fn locate<E: SecureElement>(element: &E, identity: &Identity) -> Result<u8> {
        for index in 0..=MAX_IDENTITY_INDEX {
            if element.identity(index)? == *identity {
                return Ok(index);
            }
        }
        Err(CeremonyError::PackageMismatch(format!(
            "identity {identity} is not derived by this device"
        )))
    }
}
