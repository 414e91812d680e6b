//! Криптографические наборы (Crypto Suites)
//!
//! Реализации `CryptoProvider` trait.
//!
//! ### Classic Suite
//! - **DH**: X25519
//! - **Signatures**: Ed25519 (identity key, конвертируется в X25519)
//! - **AEAD**: ChaCha20-Poly1305 (detached tag)
//! - **KDF**: HKDF-SHA256
//! - **Suite ID**: 1
//!
//! ```rust
//! use e2ee_core::crypto::suites::classic::ClassicSuiteProvider;
//! use e2ee_core::crypto::provider::CryptoProvider;
//!
//! let pair = ClassicSuiteProvider::generate_dh_keypair().unwrap();
//! assert_eq!(ClassicSuiteProvider::dh_public_from_private(&pair.private), pair.public);
//! ```

pub mod classic;
