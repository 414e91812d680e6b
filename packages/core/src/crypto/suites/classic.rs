use crate::crypto::provider::CryptoProvider;
use crate::crypto::CLASSIC_SUITE_ID;
use crate::crypto::types::{
    DhKeyPair, DhPrivateKey, DhPublicKey, SignatureBytes, SigningPrivateKey, SigningPublicKey,
    SymmetricKey, KEY_LEN, NONCE_LEN, TAG_LEN,
};
use crate::error::CryptoError;
use chacha20poly1305::{
    aead::{generic_array::GenericArray, AeadInPlace},
    ChaCha20Poly1305, Key as AeadKeyChacha, KeyInit, Nonce,
};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use hkdf::Hkdf;
use rand::rngs::OsRng;
use rand_core::RngCore;
use sha2::Sha256;
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};
use zeroize::Zeroizing;

/// Concrete implementation of `CryptoProvider` for the classic suite.
pub struct ClassicSuiteProvider;

impl CryptoProvider for ClassicSuiteProvider {
    fn generate_dh_keypair() -> Result<DhKeyPair, CryptoError> {
        let private_key = StaticSecret::random_from_rng(OsRng);
        let public_key = X25519PublicKey::from(&private_key);
        Ok(DhKeyPair {
            private: DhPrivateKey::from_bytes(private_key.to_bytes()),
            public: DhPublicKey::from_bytes(public_key.to_bytes()),
        })
    }

    fn dh_public_from_private(private_key: &DhPrivateKey) -> DhPublicKey {
        let static_secret = StaticSecret::from(*private_key.as_bytes());
        DhPublicKey::from_bytes(X25519PublicKey::from(&static_secret).to_bytes())
    }

    fn diffie_hellman(
        private_key: &DhPrivateKey,
        public_key: &DhPublicKey,
    ) -> Result<Zeroizing<[u8; KEY_LEN]>, CryptoError> {
        let static_secret = StaticSecret::from(*private_key.as_bytes());
        let remote = X25519PublicKey::from(*public_key.as_bytes());
        let shared_secret = static_secret.diffie_hellman(&remote);
        if !shared_secret.was_contributory() {
            return Err(CryptoError::InvalidInputError(
                "Non-contributory DH output (low-order public key)".to_string(),
            ));
        }
        Ok(Zeroizing::new(shared_secret.to_bytes()))
    }

    fn generate_signing_keypair() -> Result<(SigningPrivateKey, SigningPublicKey), CryptoError> {
        let signing_key = SigningKey::generate(&mut OsRng);
        let verifying_key = signing_key.verifying_key();
        Ok((
            SigningPrivateKey::from_bytes(signing_key.to_bytes()),
            SigningPublicKey::from_bytes(verifying_key.to_bytes()),
        ))
    }

    fn signing_public_from_private(private_key: &SigningPrivateKey) -> SigningPublicKey {
        let signing_key = SigningKey::from_bytes(private_key.as_bytes());
        SigningPublicKey::from_bytes(signing_key.verifying_key().to_bytes())
    }

    fn sign(private_key: &SigningPrivateKey, message: &[u8]) -> Result<SignatureBytes, CryptoError> {
        let signing_key = SigningKey::from_bytes(private_key.as_bytes());
        let signature = signing_key
            .try_sign(message)
            .map_err(|e| CryptoError::SigningError(e.to_string()))?;
        Ok(signature.to_bytes())
    }

    fn verify(
        public_key: &SigningPublicKey,
        message: &[u8],
        signature: &SignatureBytes,
    ) -> Result<(), CryptoError> {
        let verifying_key = VerifyingKey::from_bytes(public_key.as_bytes())
            .map_err(|e| CryptoError::InvalidInputError(format!("Invalid verifying key: {}", e)))?;
        let signature_obj = Signature::from_bytes(signature);

        verifying_key
            .verify(message, &signature_obj)
            .map_err(|e| CryptoError::SignatureVerificationError(e.to_string()))
    }

    fn identity_dh_private(private_key: &SigningPrivateKey) -> DhPrivateKey {
        let signing_key = SigningKey::from_bytes(private_key.as_bytes());
        let scalar_bytes = Zeroizing::new(signing_key.to_scalar_bytes());
        DhPrivateKey::from_bytes(*scalar_bytes)
    }

    fn identity_dh_public(public_key: &SigningPublicKey) -> Result<DhPublicKey, CryptoError> {
        let verifying_key = VerifyingKey::from_bytes(public_key.as_bytes())
            .map_err(|e| CryptoError::InvalidInputError(format!("Invalid verifying key: {}", e)))?;
        Ok(DhPublicKey::from_bytes(verifying_key.to_montgomery().to_bytes()))
    }

    fn aead_encrypt(
        key: &SymmetricKey,
        nonce: &[u8; NONCE_LEN],
        plaintext: &[u8],
        associated_data: &[u8],
    ) -> Result<(Vec<u8>, [u8; TAG_LEN]), CryptoError> {
        let cipher = ChaCha20Poly1305::new(AeadKeyChacha::from_slice(key.as_bytes()));
        let mut buffer = plaintext.to_vec();

        let tag = cipher
            .encrypt_in_place_detached(Nonce::from_slice(nonce), associated_data, &mut buffer)
            .map_err(|e| CryptoError::AeadEncryptionError(e.to_string()))?;

        let mut tag_bytes = [0u8; TAG_LEN];
        tag_bytes.copy_from_slice(tag.as_slice());
        Ok((buffer, tag_bytes))
    }

    fn aead_decrypt(
        key: &SymmetricKey,
        nonce: &[u8; NONCE_LEN],
        ciphertext: &[u8],
        tag: &[u8; TAG_LEN],
        associated_data: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let cipher = ChaCha20Poly1305::new(AeadKeyChacha::from_slice(key.as_bytes()));
        let mut buffer = ciphertext.to_vec();

        cipher
            .decrypt_in_place_detached(
                Nonce::from_slice(nonce),
                associated_data,
                &mut buffer,
                GenericArray::from_slice(tag),
            )
            .map_err(|e| CryptoError::AeadDecryptionError(e.to_string()))?;
        Ok(buffer)
    }

    fn hkdf_derive_key(
        salt: &[u8],
        ikm: &[u8],
        info: &[u8],
        len: usize,
    ) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        let hkdf = Hkdf::<Sha256>::new(Some(salt), ikm);
        let mut okm = Zeroizing::new(vec![0u8; len]);
        hkdf.expand(info, &mut okm)?;
        Ok(okm)
    }

    fn generate_nonce() -> Result<[u8; NONCE_LEN], CryptoError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.try_fill_bytes(&mut nonce_bytes)?;
        Ok(nonce_bytes)
    }

    fn suite_id() -> u16 {
        CLASSIC_SUITE_ID
    }
}
