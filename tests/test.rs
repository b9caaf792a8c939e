// Test module for frost_ceremony
#[cfg(test)]
mod tests {
    use frost_ceremony::agent::{Approver, Prompt};
    use frost_ceremony::transaction::Mint;
    use frost_ceremony::types::{KeyKind, RetrievedKey, SecretReceipt, Wire};
    use frost_ceremony::{
        generate_keys, sign_message, validate_signature, Aggregator, Ceremony, CeremonyConfig,
        CeremonyError, Device, FrostAggregator, ParticipantAgent, SecureElement, SignedTransaction,
        SoftwareElement, Topology, Transaction,
    };
    use std::fs::{self, remove_file};

    type SoftwareDevice = Device<SoftwareElement>;

    fn finalized(topology: Topology, n: usize, t: u16) -> Ceremony<SoftwareDevice> {
        let mut ceremony =
            Ceremony::new(topology, n, t, || Device::new(SoftwareElement::random())).unwrap();
        let result = ceremony.run_dkg();
        assert!(result.is_ok(), "DKG failed with t={}, n={}: {:?}", t, n, result.err());
        ceremony
    }

    fn transfer(ceremony: &mut Ceremony<SoftwareDevice>, memo: &str) -> Transaction {
        let group = ceremony.participant(0).unwrap().get_public_package().unwrap();
        let address = match ceremony
            .participant(0)
            .unwrap()
            .retrieve_keys(KeyKind::PublicAddress)
            .unwrap()
        {
            RetrievedKey::PublicAddress(address) => address,
            other => panic!("unexpected key {:?}", other),
        };
        Transaction::transfer(&group, address, 10, 1, memo)
    }

    struct RejectBackup;

    impl Approver for RejectBackup {
        fn confirm(&self, prompt: &Prompt) -> bool {
            !matches!(prompt, Prompt::BackupKeys { .. })
        }
    }

    #[test]
    fn test_generate_keys() {
        let keys_file = "./results/test_generate_keys_ceremony.json";
        let result = generate_keys(&CeremonyConfig::default(), keys_file);
        assert!(result.is_ok(), "Failed to generate keys with t=2, n=2: {:?}", result.err());
        assert!(fs::metadata(keys_file).is_ok(), "Keys file not found: {}", keys_file);
        remove_file(keys_file).unwrap();
    }

    #[test]
    fn test_sign_message() {
        let keys_file = "./results/test_sign_message_ceremony.json";
        let signature_file = "./results/test_sign_message_signed.json";
        let result = generate_keys(&CeremonyConfig::default(), keys_file);
        assert!(result.is_ok(), "Failed to generate keys with t=2, n=2: {:?}", result.err());
        let result = sign_message("hi, this is a test", &[0, 1], keys_file, signature_file, false);
        assert!(result.is_ok(), "Failed to sign with t=2, n=2: {:?}", result.err());
        assert!(fs::metadata(signature_file).is_ok(), "Signature file not found: {}", signature_file);
        remove_file(keys_file).unwrap();
        remove_file(signature_file).unwrap();
    }

    #[test]
    fn test_verify_signature() {
        let keys_file = "./results/test_verify_signature_ceremony.json";
        let signature_file = "./results/test_verify_signature_signed.json";
        let config = CeremonyConfig {
            participants: 3,
            min_signers: 2,
            topology: Topology::PerParticipant,
            expert_mode: false,
        };
        let result = generate_keys(&config, keys_file);
        assert!(result.is_ok(), "Failed to generate keys with t=2, n=3: {:?}", result.err());
        let result = sign_message("hi, this is a test", &[1, 2], keys_file, signature_file, false);
        assert!(result.is_ok(), "Failed to sign with signers 1,2: {:?}", result.err());
        let result = validate_signature(keys_file, signature_file);
        assert!(result.is_ok(), "Failed to verify signature: {:?}", result.err());
        remove_file(keys_file).unwrap();
        remove_file(signature_file).unwrap();
    }

    #[test]
    fn test_two_of_two_end_to_end() {
        let mut ceremony = finalized(Topology::Shared, 2, 2);
        let tx = transfer(&mut ceremony, "end to end");
        assert_eq!(tx.spends.len(), 1);
        assert!(tx.mints.is_empty() && tx.burns.is_empty());

        let result = ceremony.sign_transaction(&FrostAggregator, &tx, &[0, 1]);
        assert!(result.is_ok(), "Failed to sign transaction: {:?}", result.err());
        let signed = result.unwrap();
        let group = ceremony.participant(0).unwrap().get_public_package().unwrap();
        assert!(FrostAggregator.verify(&group, &signed).unwrap(), "Signature should verify");
    }

    #[test]
    fn test_consensus_per_participant() {
        let mut ceremony = finalized(Topology::PerParticipant, 4, 3);
        let mut addresses = Vec::new();
        for position in 0..4 {
            let agent = ceremony.participant(position).unwrap();
            addresses.push(agent.retrieve_keys(KeyKind::PublicAddress).unwrap());
            assert_eq!(agent.get_identities().unwrap().len(), 4);
        }
        assert!(addresses.windows(2).all(|pair| pair[0] == pair[1]), "Addresses differ");
    }

    #[test]
    fn test_any_t_subset_signs() {
        let mut ceremony = finalized(Topology::Shared, 3, 2);
        let group = ceremony.participant(0).unwrap().get_public_package().unwrap();
        for (i, signers) in [[0, 1], [0, 2], [1, 2]].iter().enumerate() {
            let tx = transfer(&mut ceremony, &format!("subset {}", i));
            let result = ceremony.sign_transaction(&FrostAggregator, &tx, signers);
            assert!(result.is_ok(), "Signers {:?} failed: {:?}", signers, result.err());
            assert!(FrostAggregator.verify(&group, &result.unwrap()).unwrap());
        }
    }

    #[test]
    fn test_backup_round_trip() {
        let mut ceremony = finalized(Topology::PerParticipant, 2, 2);
        let backups = ceremony.backups().unwrap();

        for (position, backup) in backups.iter().enumerate() {
            let original = ceremony.participant(position).unwrap();
            let seed = *original.element().seed();
            let mut restored = Device::new(SoftwareElement::new(seed));
            let result = restored.restore_keys(backup);
            assert!(result.is_ok(), "Failed to restore keys: {:?}", result.err());

            for kind in [
                KeyKind::PublicAddress,
                KeyKind::ViewKey,
                KeyKind::ProofGenerationKey,
                KeyKind::Identity,
            ] {
                assert_eq!(
                    restored.retrieve_keys(kind).unwrap(),
                    original.retrieve_keys(kind).unwrap()
                );
            }
            assert_eq!(
                restored.get_public_package().unwrap(),
                original.get_public_package().unwrap()
            );
            assert_eq!(
                restored.get_identities().unwrap(),
                original.get_identities().unwrap()
            );
        }
    }

    #[test]
    fn test_restored_devices_sign() {
        let mut ceremony = finalized(Topology::Shared, 2, 2);
        let backups = ceremony.backups().unwrap();
        let seed = *ceremony.devices()[0].element().seed();

        let mut restored = Ceremony::from_parts(
            vec![Device::new(SoftwareElement::new(seed))],
            ceremony.seats().to_vec(),
            2,
        )
        .unwrap();
        restored.restore(&backups).unwrap();
        let tx = transfer(&mut restored, "after restore");
        let result = restored.sign_transaction(&FrostAggregator, &tx, &[0, 1]);
        assert!(result.is_ok(), "Restored devices failed to sign: {:?}", result.err());
    }

    #[test]
    fn test_expert_mode_gate() {
        let mut ceremony = finalized(Topology::Shared, 2, 2);
        let mut tx = transfer(&mut ceremony, "mint");
        tx.mints.push(Mint {
            asset_id: [7; 32],
            value: 100,
        });
        let bytes = tx.to_bytes().unwrap();

        let agent = ceremony.participant(0).unwrap();
        let err = agent.review_transaction(&bytes).unwrap_err();
        assert!(matches!(err, CeremonyError::ExpertModeRequired), "Unexpected error: {:?}", err);
        assert!(err.to_string().contains("Expert mode is required"));
        assert_eq!(err.status_word(), 0xB027);

        agent.set_expert_mode(true);
        assert!(agent.review_transaction(&bytes).is_ok());
        let result = ceremony.sign_transaction(&FrostAggregator, &tx, &[0, 1]);
        assert!(result.is_ok(), "Mint should sign in expert mode: {:?}", result.err());
    }

    // fail tests
    #[test]
    fn test_generate_keys_fail() {
        let keys_file = "./results/test_generate_keys_fail_ceremony.json";
        let config = CeremonyConfig {
            participants: 5,
            min_signers: 3,
            ..CeremonyConfig::default()
        };
        let result = generate_keys(&config, keys_file);
        assert!(result.is_err(), "Generating keys should fail with n=5");
        assert!(fs::metadata(keys_file).is_err(), "No keys file should be written");
    }

    #[test]
    fn test_sign_message_fail() {
        let keys_file = "./results/test_sign_message_fail_ceremony.json";
        let signature_file = "./results/test_sign_message_fail_signed.json";
        let config = CeremonyConfig {
            participants: 3,
            ..CeremonyConfig::default()
        };
        let result = generate_keys(&config, keys_file);
        assert!(result.is_ok(), "Failed to generate keys with t=2, n=3: {:?}", result.err());
        let result = sign_message("hi, this is a test", &[0], keys_file, signature_file, false);
        assert!(result.is_err(), "Signing should fail with a single signer when t=2");
        remove_file(keys_file).unwrap();
    }

    #[test]
    fn test_verify_signature_fail() {
        let keys_file = "./results/test_verify_signature_fail_ceremony.json";
        let signature_file = "./results/test_verify_signature_fail_signed.json";
        let result = generate_keys(&CeremonyConfig::default(), keys_file);
        assert!(result.is_ok(), "Failed to generate keys with t=2, n=2: {:?}", result.err());
        let result = sign_message("hi, this is a test", &[0, 1], keys_file, signature_file, false);
        assert!(result.is_ok(), "Failed to sign: {:?}", result.err());

        let mut signed: SignedTransaction =
            serde_json::from_str(&fs::read_to_string(signature_file).unwrap()).unwrap();
        signed.transaction.outputs[0].memo = "different memo".to_string();
        fs::write(signature_file, serde_json::to_string(&signed).unwrap()).unwrap();

        let result = validate_signature(keys_file, signature_file);
        assert!(result.is_err(), "Verification should fail for a tampered transaction");
        remove_file(keys_file).unwrap();
        remove_file(signature_file).unwrap();
    }

    #[test]
    fn test_fewer_than_t_shares_fail() {
        let mut ceremony = finalized(Topology::Shared, 3, 2);
        let tx = transfer(&mut ceremony, "short");
        let tx_hash = tx.hash();

        let mut commitments = Vec::new();
        for position in 0..2 {
            commitments.push(ceremony.participant(position).unwrap().get_commitments(&tx_hash).unwrap());
        }
        let package = FrostAggregator
            .signing_package(&tx_hash, &tx.public_key_randomness, &commitments)
            .unwrap();
        let mut shares = Vec::new();
        for position in 0..2 {
            let agent = ceremony.participant(position).unwrap();
            agent.get_nonces(&tx_hash).unwrap();
            shares.push(agent.sign(&tx.public_key_randomness, &package, &tx_hash).unwrap());
        }
        let agent = ceremony.participant(0).unwrap();
        let group = agent.get_public_package().unwrap();
        let identities = agent.get_identities().unwrap();

        let err = FrostAggregator
            .aggregate(&identities, &group, &package, &shares[..1])
            .unwrap_err();
        assert!(matches!(err, CeremonyError::AggregationMismatch(_)), "Unexpected error: {:?}", err);

        let signature = FrostAggregator.aggregate(&identities, &group, &package, &shares);
        assert!(signature.is_ok(), "Two shares should aggregate: {:?}", signature.err());
        let signed = SignedTransaction {
            transaction: tx,
            signature: signature.unwrap().bytes,
        };
        assert!(FrostAggregator.verify(&group, &signed).unwrap());
    }

    #[test]
    fn test_round2_before_round1() {
        let mut device = Device::new(SoftwareElement::random());
        let err = device
            .round2(0, &[], &SecretReceipt(vec![0; 44]))
            .unwrap_err();
        assert!(matches!(err, CeremonyError::ProtocolOrder { .. }), "Unexpected error: {:?}", err);
        assert_eq!(err.status_word(), 0xB022);
    }

    #[test]
    fn test_round3_before_round2() {
        let element = SoftwareElement::random();
        let identities = vec![element.identity(0).unwrap(), element.identity(1).unwrap()];
        let mut device = Device::new(element);
        let round1 = device.round1(0, &identities, 2).unwrap();
        let err = device
            .round3(0, &[round1.public_package], &[], &round1.secret_package, &[])
            .unwrap_err();
        assert!(matches!(err, CeremonyError::ProtocolOrder { .. }), "Unexpected error: {:?}", err);
    }

    #[test]
    fn test_sign_replay() {
        let mut ceremony = finalized(Topology::Shared, 2, 2);
        let tx = transfer(&mut ceremony, "replay");
        let tx_hash = tx.hash();
        ceremony.sign_transaction(&FrostAggregator, &tx, &[0, 1]).unwrap();

        let agent = ceremony.participant(0).unwrap();
        let err = agent.get_commitments(&tx_hash).unwrap_err();
        assert!(matches!(err, CeremonyError::SignatureReplay { .. }), "Unexpected error: {:?}", err);

        let result = ceremony.sign_transaction(&FrostAggregator, &tx, &[0, 1]);
        assert!(
            matches!(result, Err(CeremonyError::SignatureReplay { .. })),
            "Second signing should be rejected: {:?}",
            result
        );
    }

    #[test]
    fn test_commitments_before_finalized() {
        let mut device = Device::new(SoftwareElement::random());
        device.get_identity(0, true).unwrap();
        let tx_hash = frost_ceremony::types::TxHash::from_bytes([1; 32]);
        let err = device.get_commitments(&tx_hash).unwrap_err();
        assert!(matches!(err, CeremonyError::NoKeysPresent), "Unexpected error: {:?}", err);
        assert_eq!(err.status_word(), 0xB022);
        assert!(matches!(device.backup_keys(), Err(CeremonyError::NoKeysPresent)));
    }

    #[test]
    fn test_participant_bounds() {
        let element = SoftwareElement::random();
        let identities: Vec<_> = (0..5).map(|i| element.identity(i).unwrap()).collect();
        let mut device = Device::new(element);

        let err = device.round1(0, &identities, 2).unwrap_err();
        assert!(matches!(err, CeremonyError::ParticipantCount { .. }), "Unexpected error: {:?}", err);
        let err = device.round1(0, &identities[..2], 3).unwrap_err();
        assert!(matches!(err, CeremonyError::ParticipantCount { .. }), "Unexpected error: {:?}", err);
        assert_eq!(err.status_word(), 0xB024);
    }

    #[test]
    fn test_invalid_identity_index() {
        let mut device = Device::new(SoftwareElement::random());
        let err = device.get_identity(6, true).unwrap_err();
        assert!(matches!(err, CeremonyError::InvalidIndex { .. }), "Unexpected error: {:?}", err);
    }

    #[test]
    fn test_restore_with_wrong_seed() {
        let mut ceremony = finalized(Topology::Shared, 2, 2);
        let backup = ceremony.participant(0).unwrap().backup_keys().unwrap();
        let mut other = Device::new(SoftwareElement::random());
        let err = other.restore_keys(&backup).unwrap_err();
        assert!(matches!(err, CeremonyError::Backup { .. }), "Unexpected error: {:?}", err);
        assert_eq!(err.status_word(), 0xB019);
        assert!(other.retrieve_keys(KeyKind::PublicAddress).is_err());
    }

    #[test]
    fn test_denied_backup_keeps_keys() {
        let mut ceremony = Ceremony::new(Topology::Shared, 2, 2, || {
            Device::new(SoftwareElement::random()).with_approver(RejectBackup)
        })
        .unwrap();
        ceremony.run_dkg().unwrap();

        let agent = ceremony.participant(0).unwrap();
        let err = agent.backup_keys().unwrap_err();
        assert!(matches!(err, CeremonyError::Denied(_)), "Unexpected error: {:?}", err);
        assert_eq!(err.status_word(), 0x6985);
        assert!(agent.retrieve_keys(KeyKind::ViewKey).is_ok());
    }

    #[test]
    fn test_new_hash_resets_commitments() {
        let mut ceremony = finalized(Topology::Shared, 2, 2);
        let first = transfer(&mut ceremony, "first").hash();
        let second = transfer(&mut ceremony, "second").hash();

        let agent = ceremony.participant(0).unwrap();
        agent.get_commitments(&first).unwrap();
        agent.get_commitments(&second).unwrap();
        let err = agent.get_nonces(&first).unwrap_err();
        assert!(matches!(err, CeremonyError::ProtocolOrder { .. }), "Unexpected error: {:?}", err);
        assert!(agent.get_nonces(&second).is_ok());
    }

    #[test]
    fn test_verify_other_group_fail() {
        let mut ceremony_a = finalized(Topology::Shared, 2, 2);
        let mut ceremony_b = finalized(Topology::Shared, 2, 2);
        let group_a = ceremony_a.participant(0).unwrap().get_public_package().unwrap();
        let group_b = ceremony_b.participant(0).unwrap().get_public_package().unwrap();

        let tx = transfer(&mut ceremony_b, "signed by another group");
        let signed = ceremony_b
            .sign_transaction(&FrostAggregator, &tx, &[0, 1])
            .unwrap();
        assert!(FrostAggregator.verify(&group_b, &signed).unwrap());
        assert!(
            !FrostAggregator.verify(&group_a, &signed).unwrap(),
            "A transaction signed by another group must not verify"
        );
    }

    #[test]
    fn test_validate_signature_other_ceremony_fail() {
        let keys_file = "./results/test_validate_other_ceremony_a.json";
        let other_keys_file = "./results/test_validate_other_ceremony_b.json";
        let signature_file = "./results/test_validate_other_ceremony_signed.json";
        let config = CeremonyConfig::default();
        assert!(generate_keys(&config, keys_file).is_ok());
        assert!(generate_keys(&config, other_keys_file).is_ok());
        let result = sign_message("hi, this is a test", &[0, 1], other_keys_file, signature_file, false);
        assert!(result.is_ok(), "Failed to sign: {:?}", result.err());

        assert!(validate_signature(other_keys_file, signature_file).is_ok());
        let result = validate_signature(keys_file, signature_file);
        assert!(result.is_err(), "Verification should fail against another ceremony");
        remove_file(keys_file).unwrap();
        remove_file(other_keys_file).unwrap();
        remove_file(signature_file).unwrap();
    }

    #[test]
    fn test_mismatched_randomness_fail() {
        let mut ceremony = finalized(Topology::Shared, 2, 2);
        let tx = transfer(&mut ceremony, "randomness");
        let tx_hash = tx.hash();

        let mut commitments = Vec::new();
        for position in 0..2 {
            commitments.push(ceremony.participant(position).unwrap().get_commitments(&tx_hash).unwrap());
        }
        let package = FrostAggregator
            .signing_package(&tx_hash, &tx.public_key_randomness, &commitments)
            .unwrap();

        let agent = ceremony.participant(0).unwrap();
        agent.get_nonces(&tx_hash).unwrap();
        let result = agent.sign(&tx.public_key_randomness, &package, &tx_hash);
        assert!(result.is_ok(), "Matching randomness should sign: {:?}", result.err());

        let mut other_randomness = tx.public_key_randomness;
        other_randomness[0] ^= 0xff;
        let agent = ceremony.participant(1).unwrap();
        agent.get_nonces(&tx_hash).unwrap();
        let err = agent.sign(&other_randomness, &package, &tx_hash).unwrap_err();
        assert!(matches!(err, CeremonyError::PackageMismatch(_)), "Unexpected error: {:?}", err);
    }
}
