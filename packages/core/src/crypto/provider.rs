//! Defines the CryptoProvider trait for crypto-agility.

use crate::crypto::types::{
    DhKeyPair, DhPrivateKey, DhPublicKey, SignatureBytes, SigningPrivateKey, SigningPublicKey,
    SymmetricKey, KEY_LEN, NONCE_LEN, TAG_LEN,
};
use crate::error::CryptoError;
use zeroize::Zeroizing;

/// Trait that formalizes all cryptographic operations for a specific cipher suite.
///
/// Every protocol layer (X3DH, Double Ratchet, key manager) is generic over
/// a provider, so a suite can be swapped without touching protocol code.
pub trait CryptoProvider: Send + Sync + 'static {
    /// Generates a new Diffie-Hellman key pair.
    fn generate_dh_keypair() -> Result<DhKeyPair, CryptoError>;

    /// Derives the Diffie-Hellman public key from a private key.
    fn dh_public_from_private(private_key: &DhPrivateKey) -> DhPublicKey;

    /// Computes a Diffie-Hellman agreement. Non-contributory results
    /// (low-order peer points) are rejected.
    fn diffie_hellman(
        private_key: &DhPrivateKey,
        public_key: &DhPublicKey,
    ) -> Result<Zeroizing<[u8; KEY_LEN]>, CryptoError>;

    /// Generates a new signature key pair.
    fn generate_signing_keypair() -> Result<(SigningPrivateKey, SigningPublicKey), CryptoError>;

    /// Derives a signature public key from a signature private key.
    fn signing_public_from_private(private_key: &SigningPrivateKey) -> SigningPublicKey;

    /// Signs a message with the given private key.
    fn sign(private_key: &SigningPrivateKey, message: &[u8]) -> Result<SignatureBytes, CryptoError>;

    /// Verifies a signature with the given public key.
    fn verify(
        public_key: &SigningPublicKey,
        message: &[u8],
        signature: &SignatureBytes,
    ) -> Result<(), CryptoError>;

    /// Deterministic conversion of an identity signing key into its
    /// Diffie-Hellman form.
    fn identity_dh_private(private_key: &SigningPrivateKey) -> DhPrivateKey;

    /// Public counterpart of [`CryptoProvider::identity_dh_private`].
    fn identity_dh_public(public_key: &SigningPublicKey) -> Result<DhPublicKey, CryptoError>;

    /// AEAD encryption with a detached tag.
    fn aead_encrypt(
        key: &SymmetricKey,
        nonce: &[u8; NONCE_LEN],
        plaintext: &[u8],
        associated_data: &[u8],
    ) -> Result<(Vec<u8>, [u8; TAG_LEN]), CryptoError>;

    /// AEAD decryption. A tag mismatch is `AeadDecryptionError`.
    fn aead_decrypt(
        key: &SymmetricKey,
        nonce: &[u8; NONCE_LEN],
        ciphertext: &[u8],
        tag: &[u8; TAG_LEN],
        associated_data: &[u8],
    ) -> Result<Vec<u8>, CryptoError>;

    /// Derives a key from input key material using HKDF.
    fn hkdf_derive_key(
        salt: &[u8],
        ikm: &[u8],
        info: &[u8],
        len: usize,
    ) -> Result<Zeroizing<Vec<u8>>, CryptoError>;

    /// Single-output KDF with an empty salt and a context label.
    fn kdf(ikm: &[u8], info: &[u8]) -> Result<SymmetricKey, CryptoError> {
        let okm = Self::hkdf_derive_key(&[], ikm, info, KEY_LEN)?;
        SymmetricKey::from_slice(&okm)
    }

    /// Generates a random AEAD nonce.
    fn generate_nonce() -> Result<[u8; NONCE_LEN], CryptoError>;

    /// Returns the suite id associated with this CryptoProvider.
    fn suite_id() -> u16;
}
