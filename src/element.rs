//! The secure-element boundary.
//!
//! Coordinators never touch FROST directly: every key derivation, DKG part,
//! nonce commitment and share signature goes through [`SecureElement`].
//! [`SoftwareElement`] implements it with `frost-ed25519`, `x25519-dalek`,
//! `chacha20poly1305` and `blake3`.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use frost_ed25519 as frost;
use frost_ed25519::keys::dkg;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroizing;

use crate::error::{CeremonyError, Result};
use crate::types::{
    EncryptedShard, FinalizedKeySet, GroupPublicPackage, Identity, ProofGenerationKey,
    PublicAddress, Round1PublicPackage, Round2PublicPackage, Round2Share, SigningPackage, ViewKey,
};

/// Highest identity index the element derives.
pub const MAX_IDENTITY_INDEX: u8 = 5;

const NONCE_LEN: usize = 12;

const IDENTITY_CONTEXT: &str = "frost-ceremony 2024-06 identity";
const SHARD_CONTEXT: &str = "frost-ceremony 2024-06 group secret shard";
const ROUND2_CONTEXT: &str = "frost-ceremony 2024-06 round2 package";
const GROUP_SECRET_CONTEXT: &str = "frost-ceremony 2024-06 group secret key";
const SESSION_CONTEXT: &str = "frost-ceremony 2024-06 session storage";
const BACKUP_CONTEXT: &str = "frost-ceremony 2024-06 backup";

/// Which storage key a sealed blob is bound to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SealPurpose {
    /// Round receipts, valid for the lifetime of the device.
    Session,
    /// Key backups.
    Backup,
}

/// Commitments and message carried by a signing package, keyed by identity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SigningPackageView {
    pub message: Vec<u8>,
    pub commitments: BTreeMap<Identity, Vec<u8>>,
}

/// Opaque cryptographic capability of a participant device.
pub trait SecureElement {
    /// Secret state kept between DKG round 1 and round 2.
    type Round1Secret: Clone;
    /// Secret state kept between DKG round 2 and round 3.
    type Round2Secret;

    fn identity(&self, index: u8) -> Result<Identity>;

    fn dkg_round1(
        &self,
        index: u8,
        identities: &[Identity],
        min_signers: u16,
    ) -> Result<(Round1PublicPackage, Self::Round1Secret)>;

    /// `packages` holds the round 1 packages of every participant, own included.
    fn dkg_round2(
        &self,
        index: u8,
        secret: Self::Round1Secret,
        packages: &[Round1PublicPackage],
    ) -> Result<(Round2PublicPackage, Self::Round2Secret)>;

    /// `shares` and `shards` must already be filtered down to this identity.
    fn dkg_round3(
        &self,
        index: u8,
        secret: &Self::Round2Secret,
        packages: &[Round1PublicPackage],
        shares: &[Round2Share],
        shards: &[EncryptedShard],
    ) -> Result<FinalizedKeySet>;

    /// Returns `(commitment, nonces)` for a fresh signing round.
    fn commit(&self, keys: &FinalizedKeySet) -> Result<(Vec<u8>, Zeroizing<Vec<u8>>)>;

    fn inspect_signing_package(
        &self,
        keys: &FinalizedKeySet,
        package: &SigningPackage,
    ) -> Result<SigningPackageView>;

    fn sign_share(
        &self,
        keys: &FinalizedKeySet,
        package: &SigningPackage,
        nonces: &[u8],
    ) -> Result<Vec<u8>>;

    fn seal(&self, purpose: SealPurpose, plaintext: &[u8]) -> Result<Vec<u8>>;

    fn unseal(&self, purpose: SealPurpose, blob: &[u8]) -> Result<Zeroizing<Vec<u8>>>;
}

/// Software secure element seeded with 32 bytes.
#[derive(Clone)]
pub struct SoftwareElement {
    seed: Zeroizing<[u8; 32]>,
}

impl fmt::Debug for SoftwareElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SoftwareElement").finish_non_exhaustive()
    }
}

impl SoftwareElement {
    pub fn new(seed: [u8; 32]) -> Self {
        SoftwareElement {
            seed: Zeroizing::new(seed),
        }
    }

    /// Creates an element with a fresh random seed.
    pub fn random() -> Self {
        let mut seed = [0u8; 32];
        OsRng.fill_bytes(&mut seed);
        Self::new(seed)
    }

    pub fn seed(&self) -> &[u8; 32] {
        &self.seed
    }

    fn identity_secret(&self, index: u8) -> Result<StaticSecret> {
        if index > MAX_IDENTITY_INDEX {
            return Err(CeremonyError::InvalidIndex {
                index,
                max: MAX_IDENTITY_INDEX,
            });
        }
        let mut material = Zeroizing::new([0u8; 33]);
        material[..32].copy_from_slice(&self.seed[..]);
        material[32] = index;
        Ok(StaticSecret::from(blake3::derive_key(
            IDENTITY_CONTEXT,
            &material[..],
        )))
    }

    /// Symmetric key shared by `sender` and `recipient` for one context.
    fn pair_key(
        &self,
        index: u8,
        peer: &Identity,
        sender: &Identity,
        recipient: &Identity,
        context: &str,
    ) -> Result<Zeroizing<[u8; 32]>> {
        let secret = self.identity_secret(index)?;
        let shared = secret.diffie_hellman(&PublicKey::from(*peer.as_bytes()));
        let mut material = Zeroizing::new(Vec::with_capacity(96));
        material.extend_from_slice(shared.as_bytes());
        material.extend_from_slice(sender.as_bytes());
        material.extend_from_slice(recipient.as_bytes());
        Ok(Zeroizing::new(blake3::derive_key(context, &material)))
    }

    fn encrypt_for(
        &self,
        index: u8,
        recipient: &Identity,
        context: &str,
        plaintext: &[u8],
    ) -> Result<Vec<u8>> {
        let sender = self.identity(index)?;
        let key = self.pair_key(index, recipient, &sender, recipient, context)?;
        encrypt(&key, plaintext)
    }

    fn decrypt_from(
        &self,
        index: u8,
        sender: &Identity,
        context: &str,
        ciphertext: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>> {
        let recipient = self.identity(index)?;
        let key = self.pair_key(index, sender, sender, &recipient, context)?;
        decrypt(&key, ciphertext)
    }

    fn storage_key(&self, purpose: SealPurpose) -> Zeroizing<[u8; 32]> {
        let context = match purpose {
            SealPurpose::Session => SESSION_CONTEXT,
            SealPurpose::Backup => BACKUP_CONTEXT,
        };
        Zeroizing::new(blake3::derive_key(context, &self.seed[..]))
    }
}

impl SecureElement for SoftwareElement {
    type Round1Secret = dkg::round1::SecretPackage;
    type Round2Secret = dkg::round2::SecretPackage;

    fn identity(&self, index: u8) -> Result<Identity> {
        let secret = self.identity_secret(index)?;
        Ok(Identity::from_bytes(PublicKey::from(&secret).to_bytes()))
    }

    fn dkg_round1(
        &self,
        index: u8,
        identities: &[Identity],
        min_signers: u16,
    ) -> Result<(Round1PublicPackage, Self::Round1Secret)> {
        let identity = self.identity(index)?;
        let max_signers = u16::try_from(identities.len())
            .map_err(|_| CeremonyError::crypto("too many identities"))?;

        let (secret, package) = dkg::part1(
            frost_identifier(&identity)?,
            max_signers,
            min_signers,
            OsRng,
        )
        .map_err(CeremonyError::crypto)?;

        // Contribution to the group secret key, one encrypted copy per recipient.
        let mut contribution = Zeroizing::new([0u8; 32]);
        OsRng.fill_bytes(&mut contribution[..]);
        let shards = identities
            .iter()
            .map(|recipient| {
                Ok(EncryptedShard {
                    sender: identity,
                    recipient: *recipient,
                    ciphertext: self.encrypt_for(
                        index,
                        recipient,
                        SHARD_CONTEXT,
                        &contribution[..],
                    )?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let public_package = Round1PublicPackage {
            identity,
            min_signers,
            identities: identities.to_vec(),
            frost_package: encode(&package)?,
            shards,
        };
        Ok((public_package, secret))
    }

    fn dkg_round2(
        &self,
        index: u8,
        secret: Self::Round1Secret,
        packages: &[Round1PublicPackage],
    ) -> Result<(Round2PublicPackage, Self::Round2Secret)> {
        let identity = self.identity(index)?;

        let mut identities_by_id = BTreeMap::new();
        let mut others = BTreeMap::new();
        for package in packages.iter().filter(|p| p.identity != identity) {
            let identifier = frost_identifier(&package.identity)?;
            let frost_package: dkg::round1::Package = decode(&package.frost_package)?;
            identities_by_id.insert(identifier, package.identity);
            others.insert(identifier, frost_package);
        }

        let (secret, outgoing) = dkg::part2(secret, &others).map_err(CeremonyError::crypto)?;

        let mut shares = Vec::with_capacity(outgoing.len());
        for (identifier, package) in outgoing {
            let recipient = identities_by_id.get(&identifier).ok_or_else(|| {
                CeremonyError::crypto("round 2 produced a package for an unknown identifier")
            })?;
            let plaintext = Zeroizing::new(encode(&package)?);
            shares.push(Round2Share {
                sender: identity,
                recipient: *recipient,
                ciphertext: self.encrypt_for(index, recipient, ROUND2_CONTEXT, &plaintext)?,
            });
        }

        Ok((
            Round2PublicPackage {
                sender: identity,
                packages: shares,
            },
            secret,
        ))
    }

    fn dkg_round3(
        &self,
        index: u8,
        secret: &Self::Round2Secret,
        packages: &[Round1PublicPackage],
        shares: &[Round2Share],
        shards: &[EncryptedShard],
    ) -> Result<FinalizedKeySet> {
        let identity = self.identity(index)?;
        let own = packages
            .iter()
            .find(|p| p.identity == identity)
            .ok_or_else(|| CeremonyError::crypto("own round 1 package missing"))?;

        let mut round1 = BTreeMap::new();
        for package in packages.iter().filter(|p| p.identity != identity) {
            let frost_package: dkg::round1::Package = decode(&package.frost_package)?;
            round1.insert(frost_identifier(&package.identity)?, frost_package);
        }

        let mut round2 = BTreeMap::new();
        for share in shares {
            let plaintext = self.decrypt_from(index, &share.sender, ROUND2_CONTEXT, &share.ciphertext)?;
            let frost_package: dkg::round2::Package = decode(&plaintext)?;
            round2.insert(frost_identifier(&share.sender)?, frost_package);
        }

        let (key_package, public_key_package) =
            dkg::part3(secret, &round1, &round2).map_err(CeremonyError::crypto)?;

        let mut ordered: Vec<&EncryptedShard> = shards.iter().collect();
        ordered.sort_by_key(|shard| shard.sender);
        let mut hasher = blake3::Hasher::new_derive_key(GROUP_SECRET_CONTEXT);
        for shard in ordered {
            let plaintext = self.decrypt_from(index, &shard.sender, SHARD_CONTEXT, &shard.ciphertext)?;
            hasher.update(&plaintext);
        }
        let group_secret = Zeroizing::new(*hasher.finalize().as_bytes());

        let verifying_key = public_key_package
            .verifying_key()
            .serialize()
            .map_err(CeremonyError::crypto)?;
        let ak: [u8; 32] = verifying_key
            .as_slice()
            .try_into()
            .map_err(|_| CeremonyError::crypto("group verifying key is not 32 bytes"))?;
        let (public_address, view_key, proof_generation_key) = derive_keys(&ak, &group_secret);

        let mut identities = own.identities.clone();
        identities.sort();

        Ok(FinalizedKeySet {
            identity,
            identities: identities.clone(),
            min_signers: own.min_signers,
            public_address,
            view_key,
            proof_generation_key,
            group_public_package: GroupPublicPackage {
                identities,
                min_signers: own.min_signers,
                verifying_key,
                frost_package: encode(&public_key_package)?,
            },
            key_package: encode(&key_package)?,
        })
    }

    fn commit(&self, keys: &FinalizedKeySet) -> Result<(Vec<u8>, Zeroizing<Vec<u8>>)> {
        let key_package: frost::keys::KeyPackage = decode(&keys.key_package)?;
        let (nonces, commitments) = frost::round1::commit(key_package.signing_share(), &mut OsRng);
        Ok((encode(&commitments)?, Zeroizing::new(encode(&nonces)?)))
    }

    fn inspect_signing_package(
        &self,
        keys: &FinalizedKeySet,
        package: &SigningPackage,
    ) -> Result<SigningPackageView> {
        let frost_package: frost::SigningPackage = decode(&package.frost_package)?;

        let mut identities_by_id = BTreeMap::new();
        for identity in &keys.identities {
            identities_by_id.insert(frost_identifier(identity)?, *identity);
        }

        let mut commitments = BTreeMap::new();
        for (identifier, commitment) in frost_package.signing_commitments() {
            let identity = identities_by_id.get(identifier).ok_or_else(|| {
                CeremonyError::PackageMismatch(
                    "signing package commits an identity outside the group".to_string(),
                )
            })?;
            commitments.insert(*identity, encode(commitment)?);
        }

        Ok(SigningPackageView {
            message: frost_package.message().to_vec(),
            commitments,
        })
    }

    fn sign_share(
        &self,
        keys: &FinalizedKeySet,
        package: &SigningPackage,
        nonces: &[u8],
    ) -> Result<Vec<u8>> {
        let frost_package: frost::SigningPackage = decode(&package.frost_package)?;
        let nonces: frost::round1::SigningNonces = decode(nonces)?;
        let key_package: frost::keys::KeyPackage = decode(&keys.key_package)?;
        let share = frost::round2::sign(&frost_package, &nonces, &key_package)
            .map_err(CeremonyError::crypto)?;
        encode(&share)
    }

    fn seal(&self, purpose: SealPurpose, plaintext: &[u8]) -> Result<Vec<u8>> {
        encrypt(&self.storage_key(purpose), plaintext)
    }

    fn unseal(&self, purpose: SealPurpose, blob: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        decrypt(&self.storage_key(purpose), blob)
    }
}

/// Derives the account keys from the group verifying key and group secret.
pub fn derive_keys(
    ak: &[u8; 32],
    group_secret: &[u8; 32],
) -> (PublicAddress, ViewKey, ProofGenerationKey) {
    let nsk = blake3::derive_key("frost-ceremony 2024-06 nsk", group_secret);
    let nk = blake3::derive_key("frost-ceremony 2024-06 nk", &nsk);

    let mut view_key = Vec::with_capacity(64);
    view_key.extend_from_slice(ak);
    view_key.extend_from_slice(&nk);

    let ivk = blake3::derive_key("frost-ceremony 2024-06 ivk", &view_key);
    let ovk = blake3::derive_key("frost-ceremony 2024-06 ovk", group_secret);
    let address = blake3::derive_key("frost-ceremony 2024-06 address", &ivk);

    (
        PublicAddress::from_bytes(address),
        ViewKey { view_key, ivk, ovk },
        ProofGenerationKey { ak: *ak, nsk },
    )
}

/// FROST identifier of a ceremony identity.
pub(crate) fn frost_identifier(identity: &Identity) -> Result<frost::Identifier> {
    frost::Identifier::derive(identity.as_bytes()).map_err(CeremonyError::crypto)
}

pub(crate) fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

pub(crate) fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(|err| CeremonyError::InvalidPayload(err.to_string()))
}

/// ChaCha20-Poly1305 with a random nonce appended to the ciphertext.
pub(crate) fn encrypt(key: &[u8; 32], plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);
    let mut out = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(CeremonyError::crypto)?;
    out.extend_from_slice(&nonce);
    Ok(out)
}

pub(crate) fn decrypt(key: &[u8; 32], blob: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    if blob.len() < NONCE_LEN {
        return Err(CeremonyError::crypto("ciphertext too short"));
    }
    let (ciphertext, nonce) = blob.split_at(blob.len() - NONCE_LEN);
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map(Zeroizing::new)
        .map_err(CeremonyError::crypto)
}
