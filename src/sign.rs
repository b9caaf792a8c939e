//! Commitment, nonce and share signing for one identity.
//!
//! ```text
//! NoActiveCeremony ──get_commitments──► CommitmentsIssued ──get_nonces──► NonceIssued ──sign──► Signed
//! ```
//!
//! Only reachable once the identity holds finalized keys. Each ceremony is
//! bound to a single transaction hash.

use std::collections::HashSet;
use std::fmt;
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::element::SecureElement;
use crate::error::{CeremonyError, Result};
use crate::types::{Commitment, FinalizedKeySet, Nonce, SignatureShare, SigningPackage, TxHash};

/// Length of the public key randomness accepted by `sign`.
pub const RANDOMNESS_LEN: usize = 32;

pub enum SigningState {
    NoActiveCeremony,
    CommitmentsIssued {
        tx_hash: TxHash,
        commitment: Vec<u8>,
        nonces: Zeroizing<Vec<u8>>,
    },
    NonceIssued {
        tx_hash: TxHash,
        commitment: Vec<u8>,
        nonces: Zeroizing<Vec<u8>>,
    },
    Signed {
        tx_hash: TxHash,
    },
}

impl SigningState {
    pub const fn state_name(&self) -> &'static str {
        match self {
            SigningState::NoActiveCeremony => "NoActiveCeremony",
            SigningState::CommitmentsIssued { .. } => "CommitmentsIssued",
            SigningState::NonceIssued { .. } => "NonceIssued",
            SigningState::Signed { .. } => "Signed",
        }
    }

    fn bound_hash(&self) -> Option<&TxHash> {
        match self {
            SigningState::NoActiveCeremony => None,
            SigningState::CommitmentsIssued { tx_hash, .. }
            | SigningState::NonceIssued { tx_hash, .. }
            | SigningState::Signed { tx_hash } => Some(tx_hash),
        }
    }
}

impl fmt::Debug for SigningState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.bound_hash() {
            Some(tx_hash) => write!(f, "{}({})", self.state_name(), tx_hash),
            None => f.write_str(self.state_name()),
        }
    }
}

#[derive(Debug)]
pub struct SigningCeremonyCoordinator {
    state: SigningState,
    /// Hashes this identity signed since its keys were installed. Lives as
    /// long as the device session and is cleared by `reset`.
    signed: HashSet<TxHash>,
}

impl Default for SigningCeremonyCoordinator {
    fn default() -> Self {
        SigningCeremonyCoordinator {
            state: SigningState::NoActiveCeremony,
            signed: HashSet::new(),
        }
    }
}

impl SigningCeremonyCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &SigningState {
        &self.state
    }

    /// Forgets every ceremony, used when the identity's keys are replaced.
    pub fn reset(&mut self) {
        self.state = SigningState::NoActiveCeremony;
        self.signed.clear();
    }

    /// Binds the ceremony to `tx_hash` and returns this identity's commitment.
    ///
    /// The same bound hash returns the same commitment; a different hash
    /// discards the current nonces and starts over.
    pub fn get_commitments<E: SecureElement>(
        &mut self,
        element: &E,
        keys: &FinalizedKeySet,
        tx_hash: &TxHash,
    ) -> Result<Commitment> {
        if self.signed.contains(tx_hash) {
            return Err(CeremonyError::SignatureReplay {
                tx_hash: tx_hash.to_hex(),
            });
        }

        match &self.state {
            SigningState::CommitmentsIssued {
                tx_hash: bound,
                commitment,
                ..
            }
            | SigningState::NonceIssued {
                tx_hash: bound,
                commitment,
                ..
            } if bound == tx_hash => {
                return Ok(Commitment {
                    identity: keys.identity,
                    tx_hash: *tx_hash,
                    bytes: commitment.clone(),
                });
            }
            SigningState::CommitmentsIssued { tx_hash: bound, .. }
            | SigningState::NonceIssued { tx_hash: bound, .. } => {
                debug!(identity = %keys.identity, previous = %bound, tx_hash = %tx_hash, "signing ceremony reset");
            }
            _ => {}
        }

        let (commitment, nonces) = element.commit(keys)?;
        self.state = SigningState::CommitmentsIssued {
            tx_hash: *tx_hash,
            commitment: commitment.clone(),
            nonces,
        };

        info!(identity = %keys.identity, tx_hash = %tx_hash, "commitments issued");
        Ok(Commitment {
            identity: keys.identity,
            tx_hash: *tx_hash,
            bytes: commitment,
        })
    }

    /// Releases the nonces bound to `tx_hash`.
    pub fn get_nonces(&mut self, keys: &FinalizedKeySet, tx_hash: &TxHash) -> Result<Nonce> {
        let state = std::mem::replace(&mut self.state, SigningState::NoActiveCeremony);
        let (next, nonces) = match state {
            SigningState::CommitmentsIssued {
                tx_hash: bound,
                commitment,
                nonces,
            }
            | SigningState::NonceIssued {
                tx_hash: bound,
                commitment,
                nonces,
            } if bound == *tx_hash => {
                let released = nonces.to_vec();
                (
                    SigningState::NonceIssued {
                        tx_hash: bound,
                        commitment,
                        nonces,
                    },
                    released,
                )
            }
            other => {
                let state_name = other.state_name();
                self.state = other;
                return Err(CeremonyError::ProtocolOrder {
                    operation: "get_nonces",
                    state: state_name,
                });
            }
        };
        self.state = next;

        debug!(identity = %keys.identity, tx_hash = %tx_hash, "nonces issued");
        Ok(Nonce {
            identity: keys.identity,
            tx_hash: *tx_hash,
            bytes: nonces,
        })
    }

    /// Signs `package` for `tx_hash` and closes the ceremony.
    ///
    /// # Errors
    /// - `SignatureReplay` if this identity already signed `tx_hash`.
    /// - `ProtocolOrder` unless the nonces for `tx_hash` were issued.
    /// - `PackageMismatch` if the package does not carry this identity's
    ///   commitment, signs a different message, or carries different public
    ///   key randomness.
    pub fn sign<E: SecureElement>(
        &mut self,
        element: &E,
        keys: &FinalizedKeySet,
        public_key_randomness: &[u8],
        package: &SigningPackage,
        tx_hash: &TxHash,
    ) -> Result<SignatureShare> {
        if self.signed.contains(tx_hash) {
            return Err(CeremonyError::SignatureReplay {
                tx_hash: tx_hash.to_hex(),
            });
        }

        let (commitment, nonces) = match &self.state {
            SigningState::NonceIssued {
                tx_hash: bound,
                commitment,
                nonces,
            } if bound == tx_hash => (commitment, nonces),
            other => {
                return Err(CeremonyError::ProtocolOrder {
                    operation: "sign",
                    state: other.state_name(),
                })
            }
        };

        if public_key_randomness.len() != RANDOMNESS_LEN {
            return Err(CeremonyError::InvalidPayload(format!(
                "public key randomness must be {RANDOMNESS_LEN} bytes"
            )));
        }
        if package.tx_hash != *tx_hash {
            return Err(CeremonyError::PackageMismatch(
                "signing package is bound to another transaction".to_string(),
            ));
        }
        if package.public_key_randomness[..] != *public_key_randomness {
            return Err(CeremonyError::PackageMismatch(
                "public key randomness differs from the signing package".to_string(),
            ));
        }

        let view = element.inspect_signing_package(keys, package)?;
        if view.message != tx_hash.as_bytes() {
            return Err(CeremonyError::PackageMismatch(
                "signing package message is not the transaction hash".to_string(),
            ));
        }
        if view.commitments.get(&keys.identity) != Some(commitment) {
            return Err(CeremonyError::PackageMismatch(
                "signing package does not carry this identity's commitment".to_string(),
            ));
        }

        let share = element.sign_share(keys, package, nonces)?;

        self.signed.insert(*tx_hash);
        self.state = SigningState::Signed { tx_hash: *tx_hash };

        info!(
            identity = %keys.identity,
            tx_hash = %tx_hash,
            signers = view.commitments.len(),
            "signature share issued"
        );
        Ok(SignatureShare {
            identity: keys.identity,
            tx_hash: *tx_hash,
            bytes: share,
        })
    }
}
