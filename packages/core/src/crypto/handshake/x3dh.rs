//! X3DH (Extended Triple Diffie-Hellman) Protocol
//!
//! ## Ключи
//!
//! ### Alice (инициатор)
//! - **IK_A**: Identity Key (Ed25519, конвертируется в X25519)
//! - **EK_A**: Ephemeral Key (одноразовый, генерируется для каждой сессии)
//!
//! ### Bob (получатель)
//! - **IK_B**: Identity Key
//! - **SPK_B**: Signed Prekey + Sig(SPK_B) identity ключом
//! - **OPK_B**: One-time Prekey (опционально)
//!
//! ## Протокол
//!
//! ```text
//! DH1 = DH(IK_A, SPK_B)
//! DH2 = DH(EK_A, IK_B)
//! DH3 = DH(EK_A, SPK_B)
//! DH4 = DH(EK_A, OPK_B)          -- только если bundle содержит OPK
//! SK  = HKDF-SHA256(salt = "", ikm = DH1 || DH2 || DH3 [|| DH4],
//!                   info = "X3DHSharedSecret", 32)
//! ```
//!
//! Без OPK четвёртый член отсутствует полностью (не заполняется нулями).

use crate::crypto::handshake::{InitiatorOutput, KeyAgreement};
use crate::crypto::provider::CryptoProvider;
use crate::crypto::types::{
    DhPrivateKey, DhPublicKey, SignatureBytes, SigningPrivateKey, SigningPublicKey, SymmetricKey,
    KEY_LEN,
};
use crate::utils::b64;
use crate::utils::error::{E2eeError, Result};
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;
use tracing::{debug, trace};
use zeroize::Zeroizing;

/// HKDF info для shared secret
pub const X3DH_INFO: &[u8] = b"X3DHSharedSecret";

/// Signed prekey в опубликованном bundle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedPreKeyPublic {
    pub key_id: u32,
    pub public_key: DhPublicKey,
    #[serde(with = "b64::array")]
    pub signature: SignatureBytes,
    pub expires_at: i64,
}

/// One-time prekey в опубликованном bundle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OneTimePreKeyPublic {
    pub key_id: u32,
    pub public_key: DhPublicKey,
}

/// Публикуемый bundle пользователя (для directory service)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKeyBundle {
    /// Ed25519 verifying key
    pub identity_key: SigningPublicKey,
    /// X25519-форма identity key
    pub identity_dh_key: DhPublicKey,
    pub signed_pre_key: SignedPreKeyPublic,
    pub one_time_pre_keys: Vec<OneTimePreKeyPublic>,
}

impl PublicKeyBundle {
    /// Bundle для одного handshake: signed prekey + не более одного OPK
    ///
    /// `KeyNotFound`, если запрошенного OPK нет в bundle.
    pub fn for_handshake(&self, one_time_pre_key_id: Option<u32>) -> Result<PreKeyBundle> {
        let one_time_pre_key = match one_time_pre_key_id {
            Some(id) => Some(
                self.one_time_pre_keys
                    .iter()
                    .find(|k| k.key_id == id)
                    .copied()
                    .ok_or_else(|| {
                        E2eeError::KeyNotFound(format!("one-time pre-key {} not in bundle", id))
                    })?,
            ),
            None => None,
        };

        Ok(PreKeyBundle {
            identity_key: self.identity_key,
            identity_dh_key: self.identity_dh_key,
            signed_pre_key: self.signed_pre_key.clone(),
            one_time_pre_key,
        })
    }

    /// Bundle с первым доступным OPK (либо без OPK, если пул пуст)
    pub fn first_available(&self) -> PreKeyBundle {
        PreKeyBundle {
            identity_key: self.identity_key,
            identity_dh_key: self.identity_dh_key,
            signed_pre_key: self.signed_pre_key.clone(),
            one_time_pre_key: self.one_time_pre_keys.first().copied(),
        }
    }
}

/// Публичные ключи получателя для одного handshake
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreKeyBundle {
    pub identity_key: SigningPublicKey,
    pub identity_dh_key: DhPublicKey,
    pub signed_pre_key: SignedPreKeyPublic,
    pub one_time_pre_key: Option<OneTimePreKeyPublic>,
}

/// Приватные ключи получателя
#[derive(Debug, Clone)]
pub struct ResponderKeys {
    pub identity: SigningPrivateKey,
    pub signed_pre_key: DhPrivateKey,
    /// Приватный OPK, соответствующий id из handshake (если найден)
    pub one_time_pre_key: Option<DhPrivateKey>,
}

/// Публичные ключи инициатора из handshake-сообщения
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerHandshakeKeys {
    pub identity_key: SigningPublicKey,
    pub identity_dh_key: DhPublicKey,
    pub ephemeral_key: DhPublicKey,
    pub used_one_time_pre_key_id: Option<u32>,
}

/// X3DH Protocol Implementation
///
/// Stateless struct - все данные передаются через параметры методов.
pub struct X3dhProtocol<P: CryptoProvider> {
    _phantom: PhantomData<P>,
}

impl<P: CryptoProvider> X3dhProtocol<P> {
    /// Проверить подпись signed prekey identity ключом
    pub fn verify_signed_pre_key(
        public_key: &DhPublicKey,
        signature: &SignatureBytes,
        identity_key: &SigningPublicKey,
    ) -> bool {
        P::verify(identity_key, public_key.as_bytes(), signature).is_ok()
    }

    /// X25519-форма identity key должна совпадать с конверсией Ed25519 ключа
    fn check_identity_binding(identity_key: &SigningPublicKey, identity_dh_key: &DhPublicKey) -> Result<()> {
        let expected = P::identity_dh_public(identity_key)
            .map_err(|e| E2eeError::HandshakeFailure(format!("Invalid identity key: {}", e)))?;
        if &expected != identity_dh_key {
            return Err(E2eeError::HandshakeFailure(
                "Identity DH key does not match identity signing key".to_string(),
            ));
        }
        Ok(())
    }

    fn derive_shared_secret(dh_outputs: &[&[u8; KEY_LEN]]) -> Result<SymmetricKey> {
        let mut combined_dh = Zeroizing::new(Vec::with_capacity(dh_outputs.len() * KEY_LEN));
        for dh in dh_outputs {
            combined_dh.extend_from_slice(&dh[..]);
        }

        Ok(P::kdf(&combined_dh, X3DH_INFO)?)
    }
}

impl<P: CryptoProvider> KeyAgreement<P> for X3dhProtocol<P> {
    type PublicKeyBundle = PreKeyBundle;
    type ResponderKeys = ResponderKeys;
    type PeerKeys = PeerHandshakeKeys;
    type SharedSecret = SymmetricKey;

    fn perform_as_initiator(
        local_identity: &SigningPrivateKey,
        remote_bundle: &Self::PublicKeyBundle,
    ) -> Result<InitiatorOutput<Self::SharedSecret>> {
        debug!(
            target: "crypto::x3dh",
            remote_identity = %remote_bundle.identity_key.fingerprint(),
            has_one_time_pre_key = %remote_bundle.one_time_pre_key.is_some(),
            "Starting X3DH as initiator"
        );

        // 1. Подпись signed prekey проверяется ДО любых DH
        let spk = &remote_bundle.signed_pre_key;
        if !Self::verify_signed_pre_key(&spk.public_key, &spk.signature, &remote_bundle.identity_key) {
            debug!(target: "crypto::x3dh", "Signed prekey signature verification failed");
            return Err(E2eeError::HandshakeFailure(
                "Signed pre-key signature verification failed".to_string(),
            ));
        }
        Self::check_identity_binding(&remote_bundle.identity_key, &remote_bundle.identity_dh_key)?;

        // 2. Ephemeral key для этой сессии
        let ephemeral = P::generate_dh_keypair()?;
        let local_identity_dh = P::identity_dh_private(local_identity);

        // 3. DH операции
        trace!(target: "crypto::x3dh", "Computing DH1 = DH(IK_A, SPK_B)");
        let dh1 = P::diffie_hellman(&local_identity_dh, &spk.public_key)?;

        trace!(target: "crypto::x3dh", "Computing DH2 = DH(EK_A, IK_B)");
        let dh2 = P::diffie_hellman(&ephemeral.private, &remote_bundle.identity_dh_key)?;

        trace!(target: "crypto::x3dh", "Computing DH3 = DH(EK_A, SPK_B)");
        let dh3 = P::diffie_hellman(&ephemeral.private, &spk.public_key)?;

        let dh4 = match &remote_bundle.one_time_pre_key {
            Some(opk) => {
                trace!(target: "crypto::x3dh", key_id = %opk.key_id, "Computing DH4 = DH(EK_A, OPK_B)");
                Some(P::diffie_hellman(&ephemeral.private, &opk.public_key)?)
            }
            None => None,
        };

        let mut outputs: Vec<&[u8; KEY_LEN]> = vec![&*dh1, &*dh2, &*dh3];
        if let Some(dh4) = &dh4 {
            outputs.push(&**dh4);
        }

        // 4. Shared secret
        let shared_secret = Self::derive_shared_secret(&outputs)?;

        debug!(
            target: "crypto::x3dh",
            dh_count = %outputs.len(),
            "X3DH completed successfully as initiator"
        );

        Ok(InitiatorOutput {
            shared_secret,
            ephemeral_public: ephemeral.public,
            used_one_time_pre_key_id: remote_bundle.one_time_pre_key.map(|k| k.key_id),
        })
    }

    fn perform_as_responder(
        local_keys: &Self::ResponderKeys,
        peer_keys: &Self::PeerKeys,
    ) -> Result<Self::SharedSecret> {
        debug!(
            target: "crypto::x3dh",
            remote_identity = %peer_keys.identity_key.fingerprint(),
            used_one_time_pre_key_id = ?peer_keys.used_one_time_pre_key_id,
            "Starting X3DH as responder"
        );

        Self::check_identity_binding(&peer_keys.identity_key, &peer_keys.identity_dh_key)?;

        let one_time_pre_key = match (peer_keys.used_one_time_pre_key_id, &local_keys.one_time_pre_key) {
            (Some(_), Some(key)) => Some(key),
            (Some(id), None) => {
                return Err(E2eeError::HandshakeFailure(format!(
                    "One-time pre-key {} is not available",
                    id
                )))
            }
            (None, Some(_)) => {
                return Err(E2eeError::HandshakeFailure(
                    "One-time pre-key supplied but not claimed by initiator".to_string(),
                ))
            }
            (None, None) => None,
        };

        let local_identity_dh = P::identity_dh_private(&local_keys.identity);

        // Те же DH, но с другой стороны
        trace!(target: "crypto::x3dh", "Computing DH1 = DH(SPK_B, IK_A)");
        let dh1 = P::diffie_hellman(&local_keys.signed_pre_key, &peer_keys.identity_dh_key)?;

        trace!(target: "crypto::x3dh", "Computing DH2 = DH(IK_B, EK_A)");
        let dh2 = P::diffie_hellman(&local_identity_dh, &peer_keys.ephemeral_key)?;

        trace!(target: "crypto::x3dh", "Computing DH3 = DH(SPK_B, EK_A)");
        let dh3 = P::diffie_hellman(&local_keys.signed_pre_key, &peer_keys.ephemeral_key)?;

        let dh4 = match one_time_pre_key {
            Some(opk) => {
                trace!(target: "crypto::x3dh", "Computing DH4 = DH(OPK_B, EK_A)");
                Some(P::diffie_hellman(opk, &peer_keys.ephemeral_key)?)
            }
            None => None,
        };

        let mut outputs: Vec<&[u8; KEY_LEN]> = vec![&*dh1, &*dh2, &*dh3];
        if let Some(dh4) = &dh4 {
            outputs.push(&**dh4);
        }

        let shared_secret = Self::derive_shared_secret(&outputs)?;

        debug!(
            target: "crypto::x3dh",
            dh_count = %outputs.len(),
            "X3DH completed successfully as responder"
        );

        Ok(shared_secret)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::suites::classic::ClassicSuiteProvider;
    use crate::crypto::types::DhKeyPair;

    type P = ClassicSuiteProvider;
    type X3dh = X3dhProtocol<ClassicSuiteProvider>;

    struct Bob {
        identity: SigningPrivateKey,
        identity_public: SigningPublicKey,
        signed_pre_key: DhKeyPair,
        one_time_pre_key: DhKeyPair,
        signature: SignatureBytes,
    }

    fn bob() -> Bob {
        let (identity, identity_public) = P::generate_signing_keypair().unwrap();
        let signed_pre_key = P::generate_dh_keypair().unwrap();
        let one_time_pre_key = P::generate_dh_keypair().unwrap();
        let signature = P::sign(&identity, signed_pre_key.public.as_bytes()).unwrap();
        Bob {
            identity,
            identity_public,
            signed_pre_key,
            one_time_pre_key,
            signature,
        }
    }

    fn bundle(bob: &Bob, with_opk: bool) -> PreKeyBundle {
        PreKeyBundle {
            identity_key: bob.identity_public,
            identity_dh_key: P::identity_dh_public(&bob.identity_public).unwrap(),
            signed_pre_key: SignedPreKeyPublic {
                key_id: 1,
                public_key: bob.signed_pre_key.public,
                signature: bob.signature,
                expires_at: 0,
            },
            one_time_pre_key: with_opk.then_some(OneTimePreKeyPublic {
                key_id: 7,
                public_key: bob.one_time_pre_key.public,
            }),
        }
    }

    fn peer_keys(alice_public: &SigningPublicKey, output: &InitiatorOutput<SymmetricKey>) -> PeerHandshakeKeys {
        PeerHandshakeKeys {
            identity_key: *alice_public,
            identity_dh_key: P::identity_dh_public(alice_public).unwrap(),
            ephemeral_key: output.ephemeral_public,
            used_one_time_pre_key_id: output.used_one_time_pre_key_id,
        }
    }

    #[test]
    fn test_x3dh_alice_bob_get_same_secret_with_one_time_key() {
        let bob = bob();
        let (alice_identity, alice_public) = P::generate_signing_keypair().unwrap();

        let output = X3dh::perform_as_initiator(&alice_identity, &bundle(&bob, true)).unwrap();
        assert_eq!(output.used_one_time_pre_key_id, Some(7));

        let bob_secret = X3dh::perform_as_responder(
            &ResponderKeys {
                identity: bob.identity.clone(),
                signed_pre_key: bob.signed_pre_key.private.clone(),
                one_time_pre_key: Some(bob.one_time_pre_key.private.clone()),
            },
            &peer_keys(&alice_public, &output),
        )
        .unwrap();

        assert_eq!(output.shared_secret, bob_secret, "X3DH must produce same secret");
    }

    #[test]
    fn test_x3dh_without_one_time_key() {
        let bob = bob();
        let (alice_identity, alice_public) = P::generate_signing_keypair().unwrap();

        let output = X3dh::perform_as_initiator(&alice_identity, &bundle(&bob, false)).unwrap();
        assert_eq!(output.used_one_time_pre_key_id, None);

        let bob_secret = X3dh::perform_as_responder(
            &ResponderKeys {
                identity: bob.identity.clone(),
                signed_pre_key: bob.signed_pre_key.private.clone(),
                one_time_pre_key: None,
            },
            &peer_keys(&alice_public, &output),
        )
        .unwrap();

        assert_eq!(output.shared_secret, bob_secret);
    }

    #[test]
    fn test_fourth_term_is_omitted_not_zero_filled() {
        let dh = [[1u8; 32], [2u8; 32], [3u8; 32]];
        let three = X3dh::derive_shared_secret(&[&dh[0], &dh[1], &dh[2]]).unwrap();
        let zero = [0u8; 32];
        let zero_filled = X3dh::derive_shared_secret(&[&dh[0], &dh[1], &dh[2], &zero]).unwrap();
        assert_ne!(three, zero_filled);

        let mut concat = Vec::new();
        for d in &dh {
            concat.extend_from_slice(d);
        }
        assert_eq!(three, P::kdf(&concat, b"X3DHSharedSecret").unwrap());
    }

    #[test]
    fn test_x3dh_rejects_invalid_signature() {
        let bob = bob();
        let (alice_identity, _) = P::generate_signing_keypair().unwrap();

        let mut malicious = bundle(&bob, true);
        malicious.signed_pre_key.signature = [0xFF; 64];

        let result = X3dh::perform_as_initiator(&alice_identity, &malicious);
        assert!(matches!(result, Err(E2eeError::HandshakeFailure(_))));
    }

    #[test]
    fn test_x3dh_rejects_mismatched_identity_dh_key() {
        let bob = bob();
        let (alice_identity, _) = P::generate_signing_keypair().unwrap();

        let mut forged = bundle(&bob, false);
        forged.identity_dh_key = P::generate_dh_keypair().unwrap().public;

        let result = X3dh::perform_as_initiator(&alice_identity, &forged);
        assert!(matches!(result, Err(E2eeError::HandshakeFailure(_))));
    }

    #[test]
    fn test_responder_without_claimed_one_time_key_fails() {
        let bob = bob();
        let (alice_identity, alice_public) = P::generate_signing_keypair().unwrap();
        let output = X3dh::perform_as_initiator(&alice_identity, &bundle(&bob, true)).unwrap();

        let result = X3dh::perform_as_responder(
            &ResponderKeys {
                identity: bob.identity.clone(),
                signed_pre_key: bob.signed_pre_key.private.clone(),
                one_time_pre_key: None,
            },
            &peer_keys(&alice_public, &output),
        );
        assert!(matches!(result, Err(E2eeError::HandshakeFailure(_))));
    }

    #[test]
    fn test_verify_signed_pre_key() {
        let bob = bob();
        assert!(X3dh::verify_signed_pre_key(
            &bob.signed_pre_key.public,
            &bob.signature,
            &bob.identity_public
        ));

        let other = P::generate_dh_keypair().unwrap();
        assert!(!X3dh::verify_signed_pre_key(
            &other.public,
            &bob.signature,
            &bob.identity_public
        ));
    }

    #[test]
    fn test_bundle_json_roundtrip() {
        let bob = bob();
        let b = bundle(&bob, true);
        let json = serde_json::to_string(&b).unwrap();
        assert!(json.contains("\"one_time_pre_key\":{\"key_id\":7"));
        let back: PreKeyBundle = serde_json::from_str(&json).unwrap();
        assert_eq!(back, b);
    }
}
