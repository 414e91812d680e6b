//! Double Ratchet Protocol Implementation
//!
//! ## Архитектура
//!
//! Double Ratchet состоит из двух ratchets:
//! 1. **Symmetric Ratchet**: каждый chain key даёт один message key и
//!    следующий chain key (два независимых HKDF вызова)
//! 2. **DH Ratchet**: `root || DH(local, remote)` даёт новый root key и
//!    новый chain key
//!
//! ## Фазы
//!
//! ```text
//! Alice (инициатор)                          Bob (получатель)
//! -----                                      ---
//! X3DH → SS                                  X3DH → SS
//! root = KDF(SS, "RootKey")                  root = KDF(SS, "RootKey")
//! CK0  = KDF(SS, "InitialChainKey")          CK0  = KDF(SS, "InitialChainKey")
//!   ↓                                          ↓
//! AwaitingFirstReceive { sending: CK0 }      AwaitingFirstSend { receiving: CK0 }
//!
//! encrypt(msg1) with CK0, R_A  ──────────→   decrypt(msg1) with CK0
//!                                            first send: new pair R_B,
//!                                            DH(R_B, R_A) → root1, CK_B
//! decrypt(msg2): DH(R_A, R_B) → root1  ←──── encrypt(msg2) with CK_B, R_B
//!   ↓                                          ↓
//! Established                                Established
//! ```
//!
//! Пропущенные message keys не кэшируются: сообщение, пришедшее не по
//! порядку, не расшифруется.

use crate::crypto::provider::CryptoProvider;
use crate::crypto::types::{DhKeyPair, DhPrivateKey, DhPublicKey, SymmetricKey, NONCE_LEN, TAG_LEN};
use crate::utils::error::{E2eeError, Result};
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;
use tracing::{debug, trace, warn};

pub const ROOT_KEY_INFO: &[u8] = b"RootKey";
pub const INITIAL_CHAIN_KEY_INFO: &[u8] = b"InitialChainKey";
pub const MESSAGE_KEY_INFO: &[u8] = b"MessageKey";
pub const CHAIN_KEY_INFO: &[u8] = b"ChainKey";

/// Chain key для цепочек инициатор → получатель
pub const SENDING_CHAIN_KEY_INFO: &[u8] = b"SendingChainKey";
/// Chain key для цепочек получатель → инициатор
pub const RECEIVING_CHAIN_KEY_INFO: &[u8] = b"ReceivingChainKey";

/// Роль стороны в handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Initiator,
    Responder,
}

impl Role {
    /// Метка цепочек, которые шифруют исходящие сообщения этой стороны
    pub fn outgoing_chain_info(self) -> &'static [u8] {
        match self {
            Role::Initiator => SENDING_CHAIN_KEY_INFO,
            Role::Responder => RECEIVING_CHAIN_KEY_INFO,
        }
    }

    /// Метка цепочек, которые шифруют входящие сообщения
    pub fn incoming_chain_info(self) -> &'static [u8] {
        match self {
            Role::Initiator => RECEIVING_CHAIN_KEY_INFO,
            Role::Responder => SENDING_CHAIN_KEY_INFO,
        }
    }
}

/// Sending chain: chain key + текущая ratchet пара
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendingChain {
    pub chain_key: SymmetricKey,
    /// Номер следующего сообщения в цепочке
    pub counter: u32,
    pub ratchet_key: DhKeyPair,
}

/// Receiving chain: chain key + ratchet ключ собеседника
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceivingChain {
    pub chain_key: SymmetricKey,
    /// Номер ожидаемого сообщения в цепочке
    pub counter: u32,
    pub remote_ratchet_key: DhPublicKey,
    /// Длина предыдущей receiving chain
    pub previous_counter: u32,
}

/// Фаза сессии. Каждая фаза содержит ровно те цепочки, что уже существуют.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RatchetPhase {
    /// Инициатор: может отправлять, ratchet ключ собеседника ещё неизвестен
    AwaitingFirstReceive { sending: SendingChain },
    /// Получатель: может принимать, sending chain появится при первой отправке
    AwaitingFirstSend { receiving: ReceivingChain },
    /// Обе цепочки установлены
    Established {
        sending: SendingChain,
        receiving: ReceivingChain,
    },
}

/// Полное состояние Double Ratchet для одного контакта
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RatchetState {
    pub suite_id: u16,
    pub role: Role,
    pub root_key: SymmetricKey,
    pub phase: RatchetPhase,
}

impl RatchetState {
    pub fn sending_chain(&self) -> Option<&SendingChain> {
        match &self.phase {
            RatchetPhase::AwaitingFirstReceive { sending }
            | RatchetPhase::Established { sending, .. } => Some(sending),
            RatchetPhase::AwaitingFirstSend { .. } => None,
        }
    }

    pub fn receiving_chain(&self) -> Option<&ReceivingChain> {
        match &self.phase {
            RatchetPhase::AwaitingFirstSend { receiving }
            | RatchetPhase::Established { receiving, .. } => Some(receiving),
            RatchetPhase::AwaitingFirstReceive { .. } => None,
        }
    }

    fn receiving_chain_mut(&mut self) -> Option<&mut ReceivingChain> {
        match &mut self.phase {
            RatchetPhase::AwaitingFirstSend { receiving }
            | RatchetPhase::Established { receiving, .. } => Some(receiving),
            RatchetPhase::AwaitingFirstReceive { .. } => None,
        }
    }

    /// Текущий ratchet ключ собеседника (None до его первого сообщения)
    pub fn remote_ratchet_key(&self) -> Option<DhPublicKey> {
        self.receiving_chain().map(|chain| chain.remote_ratchet_key)
    }

    /// Наш текущий ratchet ключ (None, пока sending chain нет)
    pub fn local_ratchet_key(&self) -> Option<DhPublicKey> {
        self.sending_chain().map(|chain| chain.ratchet_key.public)
    }

    /// (send counter, receive counter)
    pub fn counters(&self) -> (u32, u32) {
        (
            self.sending_chain().map_or(0, |chain| chain.counter),
            self.receiving_chain().map_or(0, |chain| chain.counter),
        )
    }

    pub fn is_established(&self) -> bool {
        matches!(self.phase, RatchetPhase::Established { .. })
    }
}

/// Заголовок сообщения (передаётся открыто, аутентифицируется как AAD)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RatchetHeader {
    pub ratchet_key: DhPublicKey,
    pub counter: u32,
    pub previous_counter: u32,
}

impl RatchetHeader {
    pub fn associated_data(&self) -> Vec<u8> {
        self.associated_data_with(&[])
    }

    /// AAD заголовка + внешний контекст (заголовок фиксированной длины,
    /// контекст идёт последним)
    pub fn associated_data_with(&self, context: &[u8]) -> Vec<u8> {
        let mut aad = Vec::with_capacity(32 + 8 + context.len());
        aad.extend_from_slice(self.ratchet_key.as_bytes());
        aad.extend_from_slice(&self.counter.to_be_bytes());
        aad.extend_from_slice(&self.previous_counter.to_be_bytes());
        aad.extend_from_slice(context);
        aad
    }
}

/// Зашифрованное сообщение Double Ratchet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RatchetMessage {
    pub header: RatchetHeader,
    pub ciphertext: Vec<u8>,
    pub nonce: [u8; NONCE_LEN],
    pub tag: [u8; TAG_LEN],
}

/// Операции Double Ratchet над `RatchetState`
///
/// Все операции либо полностью применяются к состоянию, либо
/// оставляют его нетронутым.
pub struct DoubleRatchet<P: CryptoProvider> {
    _phantom: PhantomData<P>,
}

impl<P: CryptoProvider> DoubleRatchet<P> {
    /// Message key из chain key
    pub fn derive_message_key(chain_key: &SymmetricKey) -> Result<SymmetricKey> {
        Ok(P::kdf(chain_key.as_bytes(), MESSAGE_KEY_INFO)?)
    }

    /// Следующий chain key
    pub fn advance_chain_key(chain_key: &SymmetricKey) -> Result<SymmetricKey> {
        Ok(P::kdf(chain_key.as_bytes(), CHAIN_KEY_INFO)?)
    }

    /// (root key, initial chain key) из X3DH shared secret
    pub fn derive_initial_keys(shared_secret: &SymmetricKey) -> Result<(SymmetricKey, SymmetricKey)> {
        let root_key = P::kdf(shared_secret.as_bytes(), ROOT_KEY_INFO)?;
        let chain_key = P::kdf(shared_secret.as_bytes(), INITIAL_CHAIN_KEY_INFO)?;
        Ok((root_key, chain_key))
    }

    /// DH ratchet step: (новый root key, новый chain key)
    pub fn dh_ratchet_step(
        root_key: &SymmetricKey,
        local_private: &DhPrivateKey,
        remote_public: &DhPublicKey,
        chain_info: &[u8],
    ) -> Result<(SymmetricKey, SymmetricKey)> {
        let dh_output = P::diffie_hellman(local_private, remote_public)?;

        let mut combined = zeroize::Zeroizing::new(Vec::with_capacity(64));
        combined.extend_from_slice(root_key.as_bytes());
        combined.extend_from_slice(&*dh_output);

        let new_root = P::kdf(&combined, ROOT_KEY_INFO)?;
        let chain_key = P::kdf(&combined, chain_info)?;
        Ok((new_root, chain_key))
    }

    /// Состояние инициатора: sending chain из X3DH, первая ratchet пара
    pub fn initialize_as_initiator(shared_secret: &SymmetricKey) -> Result<RatchetState> {
        let (root_key, chain_key) = Self::derive_initial_keys(shared_secret)?;
        let ratchet_key = P::generate_dh_keypair()?;

        debug!(
            target: "crypto::double_ratchet",
            ratchet_key = %ratchet_key.public.fingerprint(),
            "Initialized initiator ratchet"
        );

        Ok(RatchetState {
            suite_id: P::suite_id(),
            role: Role::Initiator,
            root_key,
            phase: RatchetPhase::AwaitingFirstReceive {
                sending: SendingChain {
                    chain_key,
                    counter: 0,
                    ratchet_key,
                },
            },
        })
    }

    /// Состояние получателя: receiving chain из X3DH, ratchet ключ
    /// инициатора известен сразу
    pub fn initialize_as_responder(
        shared_secret: &SymmetricKey,
        remote_ratchet_key: DhPublicKey,
    ) -> Result<RatchetState> {
        let (root_key, chain_key) = Self::derive_initial_keys(shared_secret)?;

        debug!(
            target: "crypto::double_ratchet",
            remote_ratchet_key = %remote_ratchet_key.fingerprint(),
            "Initialized responder ratchet"
        );

        Ok(RatchetState {
            suite_id: P::suite_id(),
            role: Role::Responder,
            root_key,
            phase: RatchetPhase::AwaitingFirstSend {
                receiving: ReceivingChain {
                    chain_key,
                    counter: 0,
                    remote_ratchet_key,
                    previous_counter: 0,
                },
            },
        })
    }

    /// Зашифровать сообщение
    ///
    /// Перед шифрованием выполняется sending-side DH step, если sending
    /// chain ещё нет или она достигла `rotation_interval` сообщений.
    pub fn encrypt(
        state: &mut RatchetState,
        plaintext: &[u8],
        rotation_interval: u32,
    ) -> Result<RatchetMessage> {
        Self::encrypt_with_context(state, plaintext, rotation_interval, &[])
    }

    /// `encrypt`, дополнительно аутентифицирующий `context` (например,
    /// message id конверта). Получатель должен передать тот же контекст.
    pub fn encrypt_with_context(
        state: &mut RatchetState,
        plaintext: &[u8],
        rotation_interval: u32,
        context: &[u8],
    ) -> Result<RatchetMessage> {
        let mut next = state.clone();

        let rotate = match &next.phase {
            RatchetPhase::AwaitingFirstSend { .. } => true,
            RatchetPhase::Established { sending, .. } => sending.counter >= rotation_interval,
            // ratchet ключ собеседника неизвестен
            RatchetPhase::AwaitingFirstReceive { .. } => false,
        };
        if rotate {
            Self::ratchet_sending_chain(&mut next)?;
        }

        let (sending, previous_counter) = match &mut next.phase {
            RatchetPhase::AwaitingFirstReceive { sending } => (sending, 0),
            RatchetPhase::Established { sending, receiving } => (sending, receiving.counter),
            RatchetPhase::AwaitingFirstSend { .. } => {
                return Err(E2eeError::ChainKeyAbsent("sending chain".to_string()))
            }
        };

        let header = RatchetHeader {
            ratchet_key: sending.ratchet_key.public,
            counter: sending.counter,
            previous_counter,
        };

        let message_key = Self::derive_message_key(&sending.chain_key)?;
        let nonce = P::generate_nonce()?;
        let (ciphertext, tag) =
            P::aead_encrypt(&message_key, &nonce, plaintext, &header.associated_data_with(context))?;
        drop(message_key);

        sending.chain_key = Self::advance_chain_key(&sending.chain_key)?;
        sending.counter = sending
            .counter
            .checked_add(1)
            .ok_or_else(|| E2eeError::Validation("Sending counter overflow".to_string()))?;

        trace!(
            target: "crypto::double_ratchet",
            counter = %header.counter,
            len = %ciphertext.len(),
            "Encrypted message"
        );

        *state = next;
        Ok(RatchetMessage {
            header,
            ciphertext,
            nonce,
            tag,
        })
    }

    /// Расшифровать сообщение
    ///
    /// `handshake` - сообщение несёт handshake данные (первые сообщения
    /// инициатора). При любой ошибке состояние не меняется.
    pub fn decrypt(
        state: &mut RatchetState,
        message: &RatchetMessage,
        handshake: bool,
    ) -> Result<Vec<u8>> {
        Self::decrypt_with_context(state, message, handshake, &[])
    }

    pub fn decrypt_with_context(
        state: &mut RatchetState,
        message: &RatchetMessage,
        handshake: bool,
        context: &[u8],
    ) -> Result<Vec<u8>> {
        let mut next = state.clone();
        Self::prepare_receiving_chain(&mut next, &message.header, handshake)?;

        let receiving = next
            .receiving_chain_mut()
            .ok_or_else(|| E2eeError::ChainKeyAbsent("receiving chain".to_string()))?;

        if message.header.counter != receiving.counter {
            warn!(
                target: "crypto::double_ratchet",
                expected = %receiving.counter,
                received = %message.header.counter,
                "Out-of-order message, skipped keys are not cached"
            );
        }

        let message_key = Self::derive_message_key(&receiving.chain_key)?;
        let plaintext = P::aead_decrypt(
            &message_key,
            &message.nonce,
            &message.ciphertext,
            &message.tag,
            &message.header.associated_data_with(context),
        )?;
        drop(message_key);

        receiving.chain_key = Self::advance_chain_key(&receiving.chain_key)?;
        receiving.counter = receiving
            .counter
            .checked_add(1)
            .ok_or_else(|| E2eeError::Validation("Receiving counter overflow".to_string()))?;

        trace!(
            target: "crypto::double_ratchet",
            counter = %message.header.counter,
            len = %plaintext.len(),
            "Decrypted message"
        );

        *state = next;
        Ok(plaintext)
    }

    /// Новая ratchet пара + DH step с ratchet ключом собеседника
    fn ratchet_sending_chain(state: &mut RatchetState) -> Result<()> {
        let receiving = match &state.phase {
            RatchetPhase::AwaitingFirstSend { receiving }
            | RatchetPhase::Established { receiving, .. } => receiving.clone(),
            RatchetPhase::AwaitingFirstReceive { .. } => {
                return Err(E2eeError::ChainKeyAbsent(
                    "remote ratchet key unknown".to_string(),
                ))
            }
        };

        let ratchet_key = P::generate_dh_keypair()?;
        let (root_key, chain_key) = Self::dh_ratchet_step(
            &state.root_key,
            &ratchet_key.private,
            &receiving.remote_ratchet_key,
            state.role.outgoing_chain_info(),
        )?;

        debug!(
            target: "crypto::double_ratchet",
            ratchet_key = %ratchet_key.public.fingerprint(),
            "Sending DH ratchet step"
        );

        state.root_key = root_key;
        state.phase = RatchetPhase::Established {
            sending: SendingChain {
                chain_key,
                counter: 0,
                ratchet_key,
            },
            receiving,
        };
        Ok(())
    }

    /// Выбрать (и при смене ratchet ключа собеседника пересчитать)
    /// receiving chain для заголовка
    fn prepare_receiving_chain(
        state: &mut RatchetState,
        header: &RatchetHeader,
        handshake: bool,
    ) -> Result<()> {
        let next_phase = match &state.phase {
            RatchetPhase::AwaitingFirstSend { receiving } => {
                // Сообщения инициатора до нашего ответа идут по цепочке из X3DH
                if header.ratchet_key != receiving.remote_ratchet_key {
                    return Err(E2eeError::UnexpectedRatchetKey(
                        header.ratchet_key.fingerprint(),
                    ));
                }
                return Ok(());
            }
            RatchetPhase::AwaitingFirstReceive { sending } => {
                if handshake {
                    return Err(E2eeError::ChainKeyAbsent(
                        "handshake message for an initiated session".to_string(),
                    ));
                }

                let (root_key, chain_key) = Self::dh_ratchet_step(
                    &state.root_key,
                    &sending.ratchet_key.private,
                    &header.ratchet_key,
                    state.role.incoming_chain_info(),
                )?;
                state.root_key = root_key;

                RatchetPhase::Established {
                    sending: sending.clone(),
                    receiving: ReceivingChain {
                        chain_key,
                        counter: 0,
                        remote_ratchet_key: header.ratchet_key,
                        previous_counter: 0,
                    },
                }
            }
            RatchetPhase::Established { sending, receiving } => {
                if header.ratchet_key == receiving.remote_ratchet_key {
                    return Ok(());
                }
                if handshake {
                    return Err(E2eeError::UnexpectedRatchetKey(
                        header.ratchet_key.fingerprint(),
                    ));
                }

                let (root_key, chain_key) = Self::dh_ratchet_step(
                    &state.root_key,
                    &sending.ratchet_key.private,
                    &header.ratchet_key,
                    state.role.incoming_chain_info(),
                )?;
                state.root_key = root_key;

                RatchetPhase::Established {
                    sending: sending.clone(),
                    receiving: ReceivingChain {
                        chain_key,
                        counter: 0,
                        remote_ratchet_key: header.ratchet_key,
                        previous_counter: receiving.counter,
                    },
                }
            }
        };

        debug!(
            target: "crypto::double_ratchet",
            remote_ratchet_key = %header.ratchet_key.fingerprint(),
            "Receiving DH ratchet step"
        );

        state.phase = next_phase;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::suites::classic::ClassicSuiteProvider;

    type Ratchet = DoubleRatchet<ClassicSuiteProvider>;

    fn session_pair() -> (RatchetState, RatchetState) {
        let shared_secret = SymmetricKey::from_bytes([42u8; 32]);
        let alice = Ratchet::initialize_as_initiator(&shared_secret).unwrap();
        let alice_ratchet_key = alice.sending_chain().unwrap().ratchet_key.public;
        let bob = Ratchet::initialize_as_responder(&shared_secret, alice_ratchet_key).unwrap();
        (alice, bob)
    }

    #[test]
    fn test_kdf_chain_is_deterministic() {
        let chain_key = SymmetricKey::from_bytes([9u8; 32]);

        let mk1 = Ratchet::derive_message_key(&chain_key).unwrap();
        let mk2 = Ratchet::derive_message_key(&chain_key).unwrap();
        assert_eq!(mk1, mk2);

        let next1 = Ratchet::advance_chain_key(&chain_key).unwrap();
        let next2 = Ratchet::advance_chain_key(&chain_key).unwrap();
        assert_eq!(next1, next2);

        // Разные метки - разные ключи
        assert_ne!(mk1, next1);
        assert_ne!(next1, chain_key);
    }

    #[test]
    fn test_initial_keys_match_on_both_sides() {
        let (alice, bob) = session_pair();
        assert_eq!(alice.root_key, bob.root_key);
        assert_eq!(
            alice.sending_chain().unwrap().chain_key,
            bob.receiving_chain().unwrap().chain_key
        );
        assert!(alice.receiving_chain().is_none());
        assert!(bob.sending_chain().is_none());
    }

    #[test]
    fn test_alice_bob_full_exchange() {
        let (mut alice, mut bob) = session_pair();

        let msg1 = Ratchet::encrypt(&mut alice, b"Hello Bob!", 100).unwrap();
        assert_eq!(msg1.header.counter, 0);
        assert_eq!(Ratchet::decrypt(&mut bob, &msg1, true).unwrap(), b"Hello Bob!");
        assert_eq!(bob.counters(), (0, 1));

        // Первая отправка Bob - DH ratchet step
        let msg2 = Ratchet::encrypt(&mut bob, b"Hi Alice!", 100).unwrap();
        assert!(bob.is_established());
        assert_ne!(msg2.header.ratchet_key, msg1.header.ratchet_key);
        assert_eq!(msg2.header.previous_counter, 1);

        assert_eq!(Ratchet::decrypt(&mut alice, &msg2, false).unwrap(), b"Hi Alice!");
        assert!(alice.is_established());
        assert_eq!(alice.remote_ratchet_key(), Some(msg2.header.ratchet_key));
        assert_eq!(alice.root_key, bob.root_key);

        // Alice продолжает по той же sending chain
        let msg3 = Ratchet::encrypt(&mut alice, b"How are you?", 100).unwrap();
        assert_eq!(msg3.header.ratchet_key, msg1.header.ratchet_key);
        assert_eq!(msg3.header.counter, 1);
        assert_eq!(Ratchet::decrypt(&mut bob, &msg3, false).unwrap(), b"How are you?");
    }

    #[test]
    fn test_periodic_rotation() {
        let (mut alice, mut bob) = session_pair();
        let first = Ratchet::encrypt(&mut alice, b"hi", 3).unwrap();
        Ratchet::decrypt(&mut bob, &first, true).unwrap();
        let reply = Ratchet::encrypt(&mut bob, b"hello", 3).unwrap();
        Ratchet::decrypt(&mut alice, &reply, false).unwrap();

        let original_key = first.header.ratchet_key;
        let mut keys = Vec::new();
        for i in 0..4 {
            let msg = Ratchet::encrypt(&mut alice, format!("m{}", i).as_bytes(), 3).unwrap();
            keys.push(msg.header.ratchet_key);
            assert_eq!(
                Ratchet::decrypt(&mut bob, &msg, false).unwrap(),
                format!("m{}", i).as_bytes()
            );
        }

        // counter 1, 2 на старом ключе, затем ротация
        assert_eq!(keys[0], original_key);
        assert_eq!(keys[1], original_key);
        assert_ne!(keys[2], original_key);
        assert_eq!(keys[3], keys[2]);
        assert_eq!(alice.counters().0, 2);
        assert_eq!(bob.receiving_chain().unwrap().previous_counter, 3);
    }

    #[test]
    fn test_no_rotation_before_remote_key_is_known() {
        let (mut alice, _bob) = session_pair();
        let first = Ratchet::encrypt(&mut alice, b"0", 1).unwrap();
        let second = Ratchet::encrypt(&mut alice, b"1", 1).unwrap();
        assert_eq!(first.header.ratchet_key, second.header.ratchet_key);
        assert_eq!(second.header.counter, 1);
    }

    #[test]
    fn test_tampered_message_leaves_state_unchanged() {
        let (mut alice, mut bob) = session_pair();
        let msg = Ratchet::encrypt(&mut alice, b"secret", 100).unwrap();

        let snapshot = bincode::serialize(&bob).unwrap();

        let mut tampered = msg.clone();
        tampered.ciphertext[0] ^= 0x01;
        assert!(matches!(
            Ratchet::decrypt(&mut bob, &tampered, true),
            Err(E2eeError::AuthenticationError)
        ));

        let mut tampered = msg.clone();
        tampered.header.counter = 5;
        assert!(Ratchet::decrypt(&mut bob, &tampered, true).is_err());

        assert_eq!(bincode::serialize(&bob).unwrap(), snapshot);
        assert_eq!(Ratchet::decrypt(&mut bob, &msg, true).unwrap(), b"secret");
    }

    #[test]
    fn test_context_is_authenticated() {
        let (mut alice, mut bob) = session_pair();
        let msg = Ratchet::encrypt_with_context(&mut alice, b"bound", 100, b"message-1").unwrap();
        let snapshot = bincode::serialize(&bob).unwrap();

        assert!(matches!(
            Ratchet::decrypt_with_context(&mut bob, &msg, true, b"message-2"),
            Err(E2eeError::AuthenticationError)
        ));
        assert!(Ratchet::decrypt(&mut bob, &msg, true).is_err());
        assert_eq!(bincode::serialize(&bob).unwrap(), snapshot);

        assert_eq!(
            Ratchet::decrypt_with_context(&mut bob, &msg, true, b"message-1").unwrap(),
            b"bound"
        );
    }

    #[test]
    fn test_responder_rejects_unknown_ratchet_key() {
        let (_alice, mut bob) = session_pair();
        let (mut stranger, _) = session_pair();
        let msg = Ratchet::encrypt(&mut stranger, b"spoof", 100).unwrap();

        assert!(matches!(
            Ratchet::decrypt(&mut bob, &msg, true),
            Err(E2eeError::UnexpectedRatchetKey(_))
        ));
    }

    #[test]
    fn test_initiator_rejects_handshake_message() {
        let (mut alice, _bob) = session_pair();
        let (mut other, _) = session_pair();
        let msg = Ratchet::encrypt(&mut other, b"x", 100).unwrap();

        assert!(matches!(
            Ratchet::decrypt(&mut alice, &msg, true),
            Err(E2eeError::ChainKeyAbsent(_))
        ));
    }

    #[test]
    fn test_out_of_order_message_fails() {
        let (mut alice, mut bob) = session_pair();
        let msg1 = Ratchet::encrypt(&mut alice, b"1", 100).unwrap();
        let msg2 = Ratchet::encrypt(&mut alice, b"2", 100).unwrap();

        assert!(Ratchet::decrypt(&mut bob, &msg2, true).is_err());
        assert_eq!(bob.counters().1, 0);
        assert_eq!(Ratchet::decrypt(&mut bob, &msg1, true).unwrap(), b"1");
        assert_eq!(Ratchet::decrypt(&mut bob, &msg2, true).unwrap(), b"2");
    }

    #[test]
    fn test_forward_secrecy_of_message_keys() {
        let chain_key = SymmetricKey::from_bytes([3u8; 32]);
        let used = Ratchet::derive_message_key(&chain_key).unwrap();

        // Все последующие ключи цепочки отличаются от использованного
        let mut current = Ratchet::advance_chain_key(&chain_key).unwrap();
        for _ in 0..16 {
            assert_ne!(Ratchet::derive_message_key(&current).unwrap(), used);
            assert_ne!(current, chain_key);
            current = Ratchet::advance_chain_key(&current).unwrap();
        }
    }
}
