//! Typed key material shared by every layer.
//!
//! Binary fields are fixed-size arrays, so a record decoded from storage or
//! a wire message already carries correctly sized keys. Secret types zeroize
//! on drop and never print their contents.

use crate::error::CryptoError;
use crate::utils::b64;
use serde::{de::Error as _, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

pub const KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;
pub const SIGNATURE_LEN: usize = 64;

pub type SignatureBytes = [u8; SIGNATURE_LEN];

fn array_from_slice<const N: usize>(bytes: &[u8], what: &str) -> Result<[u8; N], CryptoError> {
    bytes.try_into().map_err(|_| {
        CryptoError::InvalidInputError(format!(
            "Invalid {} length: expected {}, got {}",
            what,
            N,
            bytes.len()
        ))
    })
}

macro_rules! public_key_type {
    ($name:ident, $what:literal) => {
        #[derive(Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name([u8; KEY_LEN]);

        // JSON (wire): base64 строка; bincode (хранилище): сырые байты
        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                if serializer.is_human_readable() {
                    serializer.serialize_str(&b64::encode(&self.0))
                } else {
                    self.0.serialize(serializer)
                }
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                if deserializer.is_human_readable() {
                    let encoded = String::deserialize(deserializer)?;
                    let bytes = b64::decode(&encoded).map_err(D::Error::custom)?;
                    Self::from_slice(&bytes).map_err(D::Error::custom)
                } else {
                    <[u8; KEY_LEN]>::deserialize(deserializer).map(Self)
                }
            }
        }

        impl $name {
            pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
                Self(bytes)
            }

            pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
                Ok(Self(array_from_slice(bytes, $what)?))
            }

            pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
                &self.0
            }

            pub fn to_bytes(self) -> [u8; KEY_LEN] {
                self.0
            }

            /// Short hex prefix, safe to log.
            pub fn fingerprint(&self) -> String {
                hex::encode(&self.0[..8])
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.fingerprint())
            }
        }
    };
}

macro_rules! secret_key_type {
    ($name:ident, $what:literal) => {
        #[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop, Serialize, Deserialize)]
        pub struct $name([u8; KEY_LEN]);

        impl $name {
            pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
                Self(bytes)
            }

            pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
                Ok(Self(array_from_slice(bytes, $what)?))
            }

            pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
                &self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}(<redacted>)", stringify!($name))
            }
        }
    };
}

public_key_type!(DhPublicKey, "DH public key");
public_key_type!(SigningPublicKey, "signing public key");
secret_key_type!(DhPrivateKey, "DH private key");
secret_key_type!(SigningPrivateKey, "signing private key");
secret_key_type!(SymmetricKey, "symmetric key");

/// X25519 key pair (ratchet, ephemeral, prekeys).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DhKeyPair {
    pub private: DhPrivateKey,
    pub public: DhPublicKey,
}

/// Identity key: an Ed25519 signing pair. Its X25519 form is derived on
/// demand by the provider.
#[derive(Clone, Debug)]
pub struct IdentityKeyPair {
    pub private: SigningPrivateKey,
    pub public: SigningPublicKey,
}
