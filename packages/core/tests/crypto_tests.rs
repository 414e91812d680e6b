//! Tests for the primitive layer and the key lifecycle
//!
//! This test suite covers:
//! - Classic Suite Provider (X25519, Ed25519, ChaCha20-Poly1305, HKDF)
//! - Master key derivation and verification records
//! - Key Manager registration, login and one-time prekey bookkeeping

use e2ee_core::crypto::keys::KeyManager;
use e2ee_core::crypto::master_key::{generate_salt, MasterKey};
use e2ee_core::crypto::types::SymmetricKey;
use e2ee_core::crypto::CryptoProvider;
use e2ee_core::{ClassicSuiteProvider, Config, CryptoStore, E2eeError, MemoryBackend};
use std::sync::Arc;

/// Test that ClassicSuiteProvider generates matching DH key pairs
#[test]
fn test_classic_suite_generate_dh_keypair() {
    let pair = ClassicSuiteProvider::generate_dh_keypair().expect("Failed to generate DH keys");
    assert_eq!(
        ClassicSuiteProvider::dh_public_from_private(&pair.private),
        pair.public,
        "Public key should be derivable from private key"
    );

    let other = ClassicSuiteProvider::generate_dh_keypair().unwrap();
    assert_ne!(pair.public, other.public, "Fresh key pairs should differ");
}

/// Test signature creation and verification
#[test]
fn test_classic_suite_sign_verify() {
    let (signing_key, verifying_key) = ClassicSuiteProvider::generate_signing_keypair().unwrap();
    let message = b"Hello, E2EE!";

    let signature = ClassicSuiteProvider::sign(&signing_key, message).expect("Failed to sign message");
    assert!(
        ClassicSuiteProvider::verify(&verifying_key, message, &signature).is_ok(),
        "Signature verification failed"
    );

    // Verification should fail with wrong message
    assert!(
        ClassicSuiteProvider::verify(&verifying_key, b"Modified message", &signature).is_err(),
        "Verification should fail with wrong message"
    );
}

/// Test AEAD encryption and decryption with a detached tag
#[test]
fn test_classic_suite_aead_encrypt_decrypt() {
    let key = SymmetricKey::from_bytes([0u8; 32]);
    let nonce = ClassicSuiteProvider::generate_nonce().unwrap();
    let plaintext = b"Secret message for encryption test";
    let aad = b"associated data";

    let (ciphertext, tag) = ClassicSuiteProvider::aead_encrypt(&key, &nonce, plaintext, aad)
        .expect("Encryption failed");
    assert_eq!(ciphertext.len(), plaintext.len(), "Ciphertext excludes the tag");

    let decrypted = ClassicSuiteProvider::aead_decrypt(&key, &nonce, &ciphertext, &tag, aad)
        .expect("Decryption failed");
    assert_eq!(decrypted, plaintext, "Decrypted plaintext doesn't match");

    // Wrong key, nonce or AAD all fail
    let wrong_key = SymmetricKey::from_bytes([1u8; 32]);
    assert!(ClassicSuiteProvider::aead_decrypt(&wrong_key, &nonce, &ciphertext, &tag, aad).is_err());
    let wrong_nonce = ClassicSuiteProvider::generate_nonce().unwrap();
    assert!(ClassicSuiteProvider::aead_decrypt(&key, &wrong_nonce, &ciphertext, &tag, aad).is_err());
    assert!(ClassicSuiteProvider::aead_decrypt(&key, &nonce, &ciphertext, &tag, b"other").is_err());
}

/// Test HKDF key derivation
#[test]
fn test_classic_suite_hkdf() {
    let salt = b"test_salt";
    let ikm = b"input_key_material_for_derivation";
    let info = b"context_info";

    let key = ClassicSuiteProvider::hkdf_derive_key(salt, ikm, info, 32).expect("HKDF derivation failed");
    assert_eq!(key.len(), 32, "Derived key length incorrect");

    // Same inputs should give same output
    let again = ClassicSuiteProvider::hkdf_derive_key(salt, ikm, info, 32).unwrap();
    assert_eq!(*key, *again, "HKDF should be deterministic");

    let other_info = ClassicSuiteProvider::hkdf_derive_key(salt, ikm, b"other", 32).unwrap();
    assert_ne!(*key, *other_info, "Different info should give different keys");
}

/// Test master key verification record
#[test]
fn test_master_key_verification() {
    let salt = generate_salt(32);
    let key = MasterKey::derive("passphrase", &salt, 100_000).unwrap();
    let record = key.create_verification_record().unwrap();

    let same = MasterKey::derive("passphrase", &salt, 100_000).unwrap();
    assert!(same.verify(&record), "Same passphrase and salt should verify");

    let other = MasterKey::derive("passphrase!", &salt, 100_000).unwrap();
    assert!(!other.verify(&record), "Different passphrase must not verify");
}

fn key_manager(account: &str, backend: &Arc<MemoryBackend>) -> KeyManager<ClassicSuiteProvider> {
    let store = CryptoStore::new(backend.clone(), account).unwrap();
    let config = Config {
        one_time_pre_key_count: 5,
        ..Config::default()
    };
    KeyManager::with_config(store, config).unwrap()
}

/// Test full registration → login → key retrieval flow
#[test]
fn test_key_manager_lifecycle() {
    let backend = Arc::new(MemoryBackend::new());
    let keys = key_manager("alice", &backend);
    assert!(!keys.is_initialized().unwrap());

    let bundle = keys.initialize_user_keys("hunter22").unwrap();
    assert!(keys.is_initialized().unwrap());
    assert_eq!(bundle.one_time_pre_keys.len(), 5);

    let master_key = keys
        .login_and_derive_master_key("hunter22")
        .unwrap()
        .expect("Correct passphrase should log in");

    let signed_pre_key = keys.get_signed_pre_key_private(&master_key).unwrap();
    assert_eq!(
        ClassicSuiteProvider::dh_public_from_private(&signed_pre_key),
        bundle.signed_pre_key.public_key
    );

    let one_time = keys.get_one_time_pre_key_private(&master_key, 3).unwrap();
    assert_eq!(
        ClassicSuiteProvider::dh_public_from_private(&one_time),
        bundle.one_time_pre_keys[2].public_key
    );

    // Published bundle is reproducible from storage
    assert_eq!(keys.public_bundle().unwrap(), bundle);

    keys.clear_all_crypto_data().unwrap();
    assert!(backend.is_empty(), "Logout must wipe every record");
}

/// Test that bundles survive a JSON round trip through the directory service
#[test]
fn test_public_bundle_json() {
    let backend = Arc::new(MemoryBackend::new());
    let keys = key_manager("bob", &backend);
    let bundle = keys.initialize_user_keys("pw").unwrap();

    let json = serde_json::to_string(&bundle).unwrap();
    assert!(json.contains("\"identity_key\""));
    assert_eq!(serde_json::from_str::<e2ee_core::PublicKeyBundle>(&json).unwrap(), bundle);
}

/// Test that consuming an unknown one-time key fails
#[test]
fn test_unknown_one_time_pre_key() {
    let backend = Arc::new(MemoryBackend::new());
    let keys = key_manager("bob", &backend);
    keys.initialize_user_keys("pw").unwrap();
    let master_key = keys.login_and_derive_master_key("pw").unwrap().unwrap();

    assert!(matches!(
        keys.consume_one_time_pre_key(&master_key, 99),
        Err(E2eeError::KeyNotFound(_))
    ));
}
