//! Session Manager
//!
//! Склеивает X3DH handshake и Double Ratchet, хранит состояние сессий и
//! сериализует операции над одной сессией.
//!
//! ## Состояния сессии
//!
//! ```text
//! Uninitialized ──create_session──→ AwaitingFirstReceive ──receive──→ Established
//!               ──accept_session──→ AwaitingFirstSend    ──send─────→ Established
//! ```
//!
//! ## Атомарность
//!
//! Каждая операция - read-modify-write записи сессии под блокировкой
//! контакта. Изменённая копия сохраняется только после успешного
//! шифрования/расшифровки, поэтому ошибка оставляет сессию нетронутой.

use crate::config::Config;
use crate::crypto::handshake::{
    KeyAgreement, PeerHandshakeKeys, PreKeyBundle, ResponderKeys, X3dhProtocol,
};
use crate::crypto::history::MessageHistory;
use crate::crypto::keys::KeyManager;
use crate::crypto::master_key::MasterKey;
use crate::crypto::messaging::{
    DoubleRatchet, RatchetHeader, RatchetMessage, RatchetPhase, RatchetState,
};
use crate::crypto::provider::CryptoProvider;
use crate::crypto::types::{DhPublicKey, SigningPublicKey, NONCE_LEN, TAG_LEN};
use crate::storage::{CryptoStore, StoreName};
use crate::utils::b64;
use crate::utils::error::{E2eeError, Result};
use crate::utils::time::current_timestamp;
use crate::utils::uuid::generate_v4;
use crate::utils::validation::{validate_contact_id, validate_message_id};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Handshake данные инициатора, которые получатель передаёт в `accept_session`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeData {
    pub identity_key: SigningPublicKey,
    pub identity_dh_key: DhPublicKey,
    pub ephemeral_key: DhPublicKey,
    /// Первый ratchet ключ инициатора
    pub ratchet_key: DhPublicKey,
    pub used_one_time_pre_key_id: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Сообщения инициатора до первого ответа
    Handshake(HandshakeData),
    Ratchet,
}

/// Зашифрованное сообщение в wire format (JSON, бинарные поля в base64)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedEnvelope {
    pub message_id: String,
    pub kind: MessageKind,
    pub ratchet_key: DhPublicKey,
    pub counter: u32,
    pub previous_counter: u32,
    #[serde(with = "b64::vec")]
    pub ciphertext: Vec<u8>,
    #[serde(with = "b64::array")]
    pub nonce: [u8; NONCE_LEN],
    #[serde(with = "b64::array")]
    pub tag: [u8; TAG_LEN],
}

impl EncryptedEnvelope {
    pub fn handshake(&self) -> Option<&HandshakeData> {
        match &self.kind {
            MessageKind::Handshake(data) => Some(data),
            MessageKind::Ratchet => None,
        }
    }

    pub fn is_handshake(&self) -> bool {
        self.handshake().is_some()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    fn ratchet_message(&self) -> RatchetMessage {
        RatchetMessage {
            header: RatchetHeader {
                ratchet_key: self.ratchet_key,
                counter: self.counter,
                previous_counter: self.previous_counter,
            },
            ciphertext: self.ciphertext.clone(),
            nonce: self.nonce,
            tag: self.tag,
        }
    }
}

/// Состояние сессии с точки зрения вызывающего
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    Uninitialized,
    AwaitingFirstSend,
    AwaitingFirstReceive,
    Established,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionCounters {
    pub send: u32,
    pub receive: u32,
    /// Длина предыдущей receiving chain
    pub previous: u32,
}

/// Identity собеседника, закреплённая при установке сессии
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerIdentity {
    pub identity_key: SigningPublicKey,
    pub identity_dh_key: DhPublicKey,
}

/// Запись сессии в `StoreName::Sessions`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub contact_id: String,
    pub session_id: String,
    pub ratchet: RatchetState,
    pub peer_identity_key: SigningPublicKey,
    pub peer_identity_dh_key: DhPublicKey,
    /// Прикладывается к исходящим сообщениям, пока собеседник не ответил
    pub pending_handshake: Option<HandshakeData>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl SessionRecord {
    pub fn status(&self) -> SessionStatus {
        match self.ratchet.phase {
            RatchetPhase::AwaitingFirstReceive { .. } => SessionStatus::AwaitingFirstReceive,
            RatchetPhase::AwaitingFirstSend { .. } => SessionStatus::AwaitingFirstSend,
            RatchetPhase::Established { .. } => SessionStatus::Established,
        }
    }
}

/// Менеджер сессий: одна сессия на контакт
pub struct SessionManager<P: CryptoProvider> {
    store: CryptoStore,
    key_manager: KeyManager<P>,
    history: MessageHistory,
    config: Config,

    /// Блокировка на contact id
    contact_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl<P: CryptoProvider> SessionManager<P> {
    pub fn new(key_manager: KeyManager<P>) -> Self {
        let store = key_manager.store().clone();
        let config = key_manager.config().clone();
        Self {
            history: MessageHistory::new(store.clone()),
            store,
            key_manager,
            config,
            contact_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn key_manager(&self) -> &KeyManager<P> {
        &self.key_manager
    }

    pub fn history(&self) -> &MessageHistory {
        &self.history
    }

    fn contact_lock(&self, contact_id: &str) -> Result<Arc<Mutex<()>>> {
        validate_contact_id(contact_id)?;

        let mut locks = self
            .contact_locks
            .lock()
            .map_err(|_| E2eeError::Storage("Session lock table poisoned".to_string()))?;
        Ok(locks.entry(contact_id.to_string()).or_default().clone())
    }

    /// Убрать блокировку контакта из таблицы, если её больше никто не держит
    ///
    /// Клоны выдаются только под блокировкой таблицы, поэтому счётчик 2
    /// (таблица + `lock`) означает отсутствие других владельцев.
    fn release_contact_lock(&self, contact_id: &str, lock: &Arc<Mutex<()>>) {
        if let Ok(mut locks) = self.contact_locks.lock() {
            if Arc::strong_count(lock) == 2 {
                locks.remove(contact_id);
            }
        }
    }

    fn find_record(&self, contact_id: &str) -> Result<Option<SessionRecord>> {
        let record: Option<SessionRecord> = self.store.get(StoreName::Sessions, contact_id)?;
        if let Some(record) = &record {
            if record.ratchet.suite_id != P::suite_id() {
                return Err(E2eeError::Validation(format!(
                    "Session suite {} does not match provider suite {}",
                    record.ratchet.suite_id,
                    P::suite_id()
                )));
            }
        }
        Ok(record)
    }

    fn load_record(&self, contact_id: &str) -> Result<SessionRecord> {
        self.find_record(contact_id)?
            .ok_or_else(|| E2eeError::SessionNotFound(contact_id.to_string()))
    }

    fn save_record(&self, record: &SessionRecord) -> Result<()> {
        self.store.put(StoreName::Sessions, &record.contact_id, record)
    }

    /// Инициировать сессию (Alice)
    ///
    /// Выполняет X3DH с bundle собеседника, сохраняет сессию в фазе
    /// `AwaitingFirstReceive` и возвращает handshake данные для отправки.
    /// Существующая сессия с контактом заменяется.
    pub fn create_session(
        &self,
        master_key: &MasterKey,
        contact_id: &str,
        peer_bundle: &PreKeyBundle,
    ) -> Result<HandshakeData> {
        let lock = self.contact_lock(contact_id)?;
        let _guard = lock
            .lock()
            .map_err(|_| E2eeError::Storage("Session lock poisoned".to_string()))?;

        let now = current_timestamp();
        if peer_bundle.signed_pre_key.expires_at <= now {
            warn!(
                target: "crypto::session",
                contact_id = %contact_id,
                key_id = %peer_bundle.signed_pre_key.key_id,
                "Peer signed pre-key has expired"
            );
        }

        let identity = self.key_manager.get_identity_key_pair(master_key)?;
        let output = X3dhProtocol::<P>::perform_as_initiator(&identity.private, peer_bundle)?;

        let ratchet = DoubleRatchet::<P>::initialize_as_initiator(&output.shared_secret)?;
        let ratchet_key = ratchet
            .local_ratchet_key()
            .ok_or_else(|| E2eeError::ChainKeyAbsent("initiator sending chain".to_string()))?;

        let handshake = HandshakeData {
            identity_key: identity.public,
            identity_dh_key: P::identity_dh_public(&identity.public)?,
            ephemeral_key: output.ephemeral_public,
            ratchet_key,
            used_one_time_pre_key_id: output.used_one_time_pre_key_id,
        };

        if self.store.contains(StoreName::Sessions, contact_id)? {
            info!(target: "crypto::session", contact_id = %contact_id, "Replacing existing session");
        }

        let record = SessionRecord {
            contact_id: contact_id.to_string(),
            session_id: generate_v4(),
            ratchet,
            peer_identity_key: peer_bundle.identity_key,
            peer_identity_dh_key: peer_bundle.identity_dh_key,
            pending_handshake: Some(handshake.clone()),
            created_at: now,
            updated_at: now,
        };
        self.save_record(&record)?;

        info!(
            target: "crypto::session",
            contact_id = %contact_id,
            session_id = %record.session_id,
            used_one_time_pre_key_id = ?handshake.used_one_time_pre_key_id,
            "Session created as initiator"
        );

        Ok(handshake)
    }

    /// Принять сессию (Bob)
    ///
    /// One-time prekey, на который ссылается инициатор, удаляется только
    /// после успешного X3DH. Повторное использование id даёт `KeyNotFound`.
    pub fn accept_session(
        &self,
        master_key: &MasterKey,
        contact_id: &str,
        handshake: &HandshakeData,
    ) -> Result<()> {
        let lock = self.contact_lock(contact_id)?;
        let _guard = lock
            .lock()
            .map_err(|_| E2eeError::Storage("Session lock poisoned".to_string()))?;

        let record = self.respond_to_handshake(master_key, contact_id, handshake)?;
        self.commit_accepted(master_key, &record, handshake)
    }

    /// X3DH со стороны получателя. Ничего не сохраняет и не удаляет:
    /// one-time prekey только читается.
    fn respond_to_handshake(
        &self,
        master_key: &MasterKey,
        contact_id: &str,
        handshake: &HandshakeData,
    ) -> Result<SessionRecord> {
        let now = current_timestamp();
        if self.key_manager.signed_pre_key_expired(now)? {
            warn!(
                target: "crypto::session",
                contact_id = %contact_id,
                "Accepting handshake with an expired signed pre-key"
            );
        }

        let one_time_pre_key = match handshake.used_one_time_pre_key_id {
            Some(key_id) => Some(
                self.key_manager
                    .get_one_time_pre_key_private(master_key, key_id)?,
            ),
            None => None,
        };

        let local_keys = ResponderKeys {
            identity: self.key_manager.get_identity_private_key(master_key)?,
            signed_pre_key: self.key_manager.get_signed_pre_key_private(master_key)?,
            one_time_pre_key,
        };
        let peer_keys = PeerHandshakeKeys {
            identity_key: handshake.identity_key,
            identity_dh_key: handshake.identity_dh_key,
            ephemeral_key: handshake.ephemeral_key,
            used_one_time_pre_key_id: handshake.used_one_time_pre_key_id,
        };

        let shared_secret = X3dhProtocol::<P>::perform_as_responder(&local_keys, &peer_keys)?;
        let ratchet =
            DoubleRatchet::<P>::initialize_as_responder(&shared_secret, handshake.ratchet_key)?;

        Ok(SessionRecord {
            contact_id: contact_id.to_string(),
            session_id: generate_v4(),
            ratchet,
            peer_identity_key: handshake.identity_key,
            peer_identity_dh_key: handshake.identity_dh_key,
            pending_handshake: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// Удалить использованный one-time prekey и сохранить принятую сессию
    fn commit_accepted(
        &self,
        master_key: &MasterKey,
        record: &SessionRecord,
        handshake: &HandshakeData,
    ) -> Result<()> {
        if let Some(key_id) = handshake.used_one_time_pre_key_id {
            self.key_manager
                .consume_one_time_pre_key(master_key, key_id)?;
        }
        self.save_record(record)?;

        info!(
            target: "crypto::session",
            contact_id = %record.contact_id,
            session_id = %record.session_id,
            "Session accepted as responder"
        );
        Ok(())
    }

    /// Шифрование на копии записи; вызывающий держит блокировку контакта
    fn encrypt_record(
        &self,
        record: &mut SessionRecord,
        plaintext: &str,
    ) -> Result<EncryptedEnvelope> {
        let message_id = generate_v4();
        let message = DoubleRatchet::<P>::encrypt_with_context(
            &mut record.ratchet,
            plaintext.as_bytes(),
            self.config.dh_ratchet_interval,
            message_id.as_bytes(),
        )?;

        let kind = match &record.pending_handshake {
            Some(handshake) => MessageKind::Handshake(handshake.clone()),
            None => MessageKind::Ratchet,
        };
        record.updated_at = current_timestamp();

        Ok(EncryptedEnvelope {
            message_id,
            kind,
            ratchet_key: message.header.ratchet_key,
            counter: message.header.counter,
            previous_counter: message.header.previous_counter,
            ciphertext: message.ciphertext,
            nonce: message.nonce,
            tag: message.tag,
        })
    }

    /// Расшифровка на копии записи; вызывающий держит блокировку контакта
    fn decrypt_record(
        &self,
        record: &mut SessionRecord,
        envelope: &EncryptedEnvelope,
    ) -> Result<String> {
        validate_message_id(&envelope.message_id)?;

        if let Some(handshake) = envelope.handshake() {
            if handshake.identity_key != record.peer_identity_key {
                return Err(E2eeError::HandshakeFailure(format!(
                    "Handshake identity {} does not match session peer",
                    handshake.identity_key.fingerprint()
                )));
            }
        }

        let plaintext = DoubleRatchet::<P>::decrypt_with_context(
            &mut record.ratchet,
            &envelope.ratchet_message(),
            envelope.is_handshake(),
            envelope.message_id.as_bytes(),
        )?;
        let plaintext = String::from_utf8(plaintext)
            .map_err(|_| E2eeError::Validation("Decrypted message is not UTF-8".to_string()))?;

        if record.ratchet.is_established() {
            record.pending_handshake = None;
        }
        record.updated_at = current_timestamp();

        debug!(
            target: "crypto::session",
            contact_id = %record.contact_id,
            message_id = %envelope.message_id,
            counter = %envelope.counter,
            "Message decrypted"
        );
        Ok(plaintext)
    }

    /// Зашифровать сообщение для контакта
    pub fn encrypt_and_send_message(
        &self,
        contact_id: &str,
        plaintext: &str,
    ) -> Result<EncryptedEnvelope> {
        self.send(None, contact_id, plaintext)
    }

    /// `encrypt_and_send_message` + запись plaintext в историю отправленных
    ///
    /// История пишется до сохранения сессии: ошибка записи не сдвигает
    /// sending chain.
    pub fn encrypt_and_send_message_recorded(
        &self,
        master_key: &MasterKey,
        contact_id: &str,
        plaintext: &str,
    ) -> Result<EncryptedEnvelope> {
        self.send(Some(master_key), contact_id, plaintext)
    }

    fn send(
        &self,
        history_key: Option<&MasterKey>,
        contact_id: &str,
        plaintext: &str,
    ) -> Result<EncryptedEnvelope> {
        let lock = self.contact_lock(contact_id)?;
        let _guard = lock
            .lock()
            .map_err(|_| E2eeError::Storage("Session lock poisoned".to_string()))?;

        let mut record = self.load_record(contact_id)?;
        let envelope = self.encrypt_record(&mut record, plaintext)?;

        if let Some(master_key) = history_key {
            self.history
                .record_sent(master_key, contact_id, &envelope.message_id, plaintext)?;
        }
        self.save_record(&record)?;

        debug!(
            target: "crypto::session",
            contact_id = %contact_id,
            message_id = %envelope.message_id,
            counter = %envelope.counter,
            handshake = %envelope.is_handshake(),
            "Message encrypted"
        );
        Ok(envelope)
    }

    /// Расшифровать сообщение от контакта
    ///
    /// `SessionNotFound`, если сессии нет; ошибка расшифровки не меняет
    /// сохранённое состояние.
    pub fn receive_and_decrypt_message(
        &self,
        contact_id: &str,
        envelope: &EncryptedEnvelope,
    ) -> Result<String> {
        let lock = self.contact_lock(contact_id)?;
        let _guard = lock
            .lock()
            .map_err(|_| E2eeError::Storage("Session lock poisoned".to_string()))?;

        let mut record = self.load_record(contact_id)?;
        let plaintext = self.decrypt_record(&mut record, envelope)?;
        self.save_record(&record)?;
        Ok(plaintext)
    }

    /// Принять входящее сообщение, при необходимости установив сессию
    ///
    /// Handshake сообщение без существующей сессии принимается и
    /// расшифровывается под одной блокировкой: сессия сохраняется, только
    /// если первое сообщение расшифровалось. Handshake с новым ratchet
    /// ключом от закреплённой identity заменяет сессию (собеседник
    /// начал её заново).
    pub fn receive_message(
        &self,
        master_key: &MasterKey,
        contact_id: &str,
        envelope: &EncryptedEnvelope,
    ) -> Result<String> {
        self.receive(master_key, contact_id, envelope, false)
    }

    /// `receive_message` + запись plaintext в историю полученных
    ///
    /// История пишется до сохранения сессии: ошибка записи не сдвигает
    /// receiving chain, сообщение можно принять повторно.
    pub fn receive_and_decrypt_message_recorded(
        &self,
        master_key: &MasterKey,
        contact_id: &str,
        envelope: &EncryptedEnvelope,
    ) -> Result<String> {
        self.receive(master_key, contact_id, envelope, true)
    }

    fn receive(
        &self,
        master_key: &MasterKey,
        contact_id: &str,
        envelope: &EncryptedEnvelope,
        record_history: bool,
    ) -> Result<String> {
        let lock = self.contact_lock(contact_id)?;
        let _guard = lock
            .lock()
            .map_err(|_| E2eeError::Storage("Session lock poisoned".to_string()))?;

        validate_message_id(&envelope.message_id)?;

        let existing = self.find_record(contact_id)?;
        let handshake = match (existing, envelope.handshake()) {
            (Some(record), Some(handshake)) if Self::is_reinitiation(&record, handshake) => {
                if handshake.identity_key != record.peer_identity_key {
                    return Err(E2eeError::HandshakeFailure(format!(
                        "Handshake identity {} does not match session peer",
                        handshake.identity_key.fingerprint()
                    )));
                }
                info!(
                    target: "crypto::session",
                    contact_id = %contact_id,
                    "Peer re-initiated session"
                );
                handshake
            }
            (Some(mut record), _) => {
                let plaintext = self.decrypt_record(&mut record, envelope)?;
                if record_history {
                    self.history.record_received(
                        master_key,
                        contact_id,
                        &envelope.message_id,
                        &plaintext,
                    )?;
                }
                self.save_record(&record)?;
                return Ok(plaintext);
            }
            (None, Some(handshake)) => handshake,
            (None, None) => return Err(E2eeError::SessionNotFound(contact_id.to_string())),
        };

        let mut record = self.respond_to_handshake(master_key, contact_id, handshake)?;
        let plaintext = self.decrypt_record(&mut record, envelope)?;
        if record_history {
            self.history
                .record_received(master_key, contact_id, &envelope.message_id, &plaintext)?;
        }
        self.commit_accepted(master_key, &record, handshake)?;
        Ok(plaintext)
    }

    /// Handshake несёт ratchet ключ, отличный от уже известного ключа
    /// собеседника. Сообщения той же сессии всегда повторяют известный ключ.
    fn is_reinitiation(record: &SessionRecord, handshake: &HandshakeData) -> bool {
        record
            .ratchet
            .remote_ratchet_key()
            .is_some_and(|known| known != handshake.ratchet_key)
    }

    pub fn has_session(&self, contact_id: &str) -> Result<bool> {
        self.store.contains(StoreName::Sessions, contact_id)
    }

    /// Удалить сессию. Возвращает false, если её не было.
    pub fn delete_session(&self, contact_id: &str) -> Result<bool> {
        let lock = self.contact_lock(contact_id)?;
        let guard = lock
            .lock()
            .map_err(|_| E2eeError::Storage("Session lock poisoned".to_string()))?;

        let removed = self.store.delete(StoreName::Sessions, contact_id)?;
        if removed {
            info!(target: "crypto::session", contact_id = %contact_id, "Session deleted");
        }

        self.release_contact_lock(contact_id, &lock);
        drop(guard);
        Ok(removed)
    }

    pub fn session_status(&self, contact_id: &str) -> Result<SessionStatus> {
        match self.store.get::<SessionRecord>(StoreName::Sessions, contact_id)? {
            Some(record) => Ok(record.status()),
            None => Ok(SessionStatus::Uninitialized),
        }
    }

    pub fn session_counters(&self, contact_id: &str) -> Result<SessionCounters> {
        let record = self.load_record(contact_id)?;
        let (send, receive) = record.ratchet.counters();
        Ok(SessionCounters {
            send,
            receive,
            previous: record
                .ratchet
                .receiving_chain()
                .map_or(0, |chain| chain.previous_counter),
        })
    }

    /// Текущий ratchet ключ собеседника
    pub fn remote_ratchet_key(&self, contact_id: &str) -> Result<Option<DhPublicKey>> {
        Ok(self.load_record(contact_id)?.ratchet.remote_ratchet_key())
    }

    pub fn peer_identity(&self, contact_id: &str) -> Result<PeerIdentity> {
        let record = self.load_record(contact_id)?;
        Ok(PeerIdentity {
            identity_key: record.peer_identity_key,
            identity_dh_key: record.peer_identity_dh_key,
        })
    }

    /// Contact id всех сохранённых сессий
    pub fn list_sessions(&self) -> Result<Vec<String>> {
        self.store.keys(StoreName::Sessions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::suites::classic::ClassicSuiteProvider;
    use crate::storage::MemoryBackend;

    type Manager = SessionManager<ClassicSuiteProvider>;

    struct Party {
        manager: Manager,
        master_key: MasterKey,
    }

    fn party(account: &str, backend: &Arc<MemoryBackend>, config: Config) -> Party {
        let store = CryptoStore::new(backend.clone(), account).unwrap();
        let keys = KeyManager::with_config(store, config).unwrap();
        keys.initialize_user_keys("passphrase").unwrap();
        let master_key = keys
            .login_and_derive_master_key("passphrase")
            .unwrap()
            .unwrap();
        Party {
            manager: SessionManager::new(keys),
            master_key,
        }
    }

    fn small_config() -> Config {
        Config {
            one_time_pre_key_count: 3,
            ..Config::default()
        }
    }

    fn established_pair() -> (Party, Party) {
        let backend = Arc::new(MemoryBackend::new());
        let alice = party("alice", &backend, small_config());
        let bob = party("bob", &backend, small_config());

        let bundle = bob.manager.key_manager().public_bundle().unwrap();
        let handshake = alice
            .manager
            .create_session(&alice.master_key, "bob", &bundle.first_available())
            .unwrap();
        bob.manager
            .accept_session(&bob.master_key, "alice", &handshake)
            .unwrap();
        (alice, bob)
    }

    #[test]
    fn test_status_transitions() {
        let (alice, bob) = established_pair();
        assert_eq!(
            alice.manager.session_status("bob").unwrap(),
            SessionStatus::AwaitingFirstReceive
        );
        assert_eq!(
            bob.manager.session_status("alice").unwrap(),
            SessionStatus::AwaitingFirstSend
        );
        assert_eq!(
            bob.manager.session_status("carol").unwrap(),
            SessionStatus::Uninitialized
        );

        let hi = alice.manager.encrypt_and_send_message("bob", "hi").unwrap();
        assert!(hi.is_handshake());
        assert_eq!(bob.manager.receive_and_decrypt_message("alice", &hi).unwrap(), "hi");

        let hello = bob.manager.encrypt_and_send_message("alice", "hello").unwrap();
        assert!(!hello.is_handshake());
        assert_eq!(
            bob.manager.session_status("alice").unwrap(),
            SessionStatus::Established
        );

        assert_eq!(alice.manager.receive_and_decrypt_message("bob", &hello).unwrap(), "hello");
        assert_eq!(
            alice.manager.session_status("bob").unwrap(),
            SessionStatus::Established
        );

        // После ответа handshake больше не прикладывается
        let next = alice.manager.encrypt_and_send_message("bob", "ok").unwrap();
        assert_eq!(next.kind, MessageKind::Ratchet);
        assert_eq!(bob.manager.receive_and_decrypt_message("alice", &next).unwrap(), "ok");
    }

    #[test]
    fn test_session_not_found() {
        let (alice, _bob) = established_pair();
        assert!(matches!(
            alice.manager.encrypt_and_send_message("carol", "x"),
            Err(E2eeError::SessionNotFound(_))
        ));

        let envelope = alice.manager.encrypt_and_send_message("bob", "x").unwrap();
        assert!(matches!(
            alice.manager.receive_and_decrypt_message("carol", &envelope),
            Err(E2eeError::SessionNotFound(_))
        ));
    }

    #[test]
    fn test_delete_and_list_sessions() {
        let (alice, _bob) = established_pair();
        assert_eq!(alice.manager.list_sessions().unwrap(), vec!["bob".to_string()]);
        assert!(alice.manager.has_session("bob").unwrap());

        assert!(alice.manager.delete_session("bob").unwrap());
        assert!(!alice.manager.delete_session("bob").unwrap());
        assert!(!alice.manager.has_session("bob").unwrap());
        assert!(alice.manager.list_sessions().unwrap().is_empty());
    }

    #[test]
    fn test_delete_session_releases_contact_lock() {
        let (alice, _bob) = established_pair();
        alice.manager.encrypt_and_send_message("bob", "x").unwrap();
        assert!(alice.manager.contact_locks.lock().unwrap().contains_key("bob"));

        assert!(alice.manager.delete_session("bob").unwrap());
        assert!(alice.manager.contact_locks.lock().unwrap().is_empty());

        // Удаление несуществующей сессии тоже не оставляет записей
        assert!(!alice.manager.delete_session("carol").unwrap());
        assert!(alice.manager.contact_locks.lock().unwrap().is_empty());
    }

    #[test]
    fn test_rewritten_message_id_is_rejected_without_state_change() {
        let (alice, bob) = established_pair();
        let envelope = alice.manager.encrypt_and_send_message("bob", "hi").unwrap();

        let mut relayed = envelope.clone();
        relayed.message_id = String::new();
        assert!(matches!(
            bob.manager
                .receive_and_decrypt_message_recorded(&bob.master_key, "alice", &relayed),
            Err(E2eeError::Validation(_))
        ));

        relayed.message_id = "another-id".to_string();
        assert!(matches!(
            bob.manager.receive_and_decrypt_message("alice", &relayed),
            Err(E2eeError::AuthenticationError)
        ));
        assert_eq!(bob.manager.session_counters("alice").unwrap().receive, 0);

        assert_eq!(
            bob.manager
                .receive_and_decrypt_message_recorded(&bob.master_key, "alice", &envelope)
                .unwrap(),
            "hi"
        );
    }

    #[test]
    fn test_peer_identity_is_pinned() {
        let (alice, bob) = established_pair();
        let bob_bundle = bob.manager.key_manager().public_bundle().unwrap();
        let alice_bundle = alice.manager.key_manager().public_bundle().unwrap();

        let pinned = alice.manager.peer_identity("bob").unwrap();
        assert_eq!(pinned.identity_key, bob_bundle.identity_key);
        assert_eq!(pinned.identity_dh_key, bob_bundle.identity_dh_key);

        let pinned = bob.manager.peer_identity("alice").unwrap();
        assert_eq!(pinned.identity_key, alice_bundle.identity_key);
    }

    #[test]
    fn test_envelope_json_wire_format() {
        let (alice, bob) = established_pair();
        let envelope = alice.manager.encrypt_and_send_message("bob", "hi").unwrap();

        let json = envelope.to_json().unwrap();
        assert!(json.contains("\"handshake\""));
        assert!(json.contains("\"used_one_time_pre_key_id\":1"));

        let decoded = EncryptedEnvelope::from_json(&json).unwrap();
        assert_eq!(decoded, envelope);
        assert_eq!(
            bob.manager.receive_and_decrypt_message("alice", &decoded).unwrap(),
            "hi"
        );
    }

    #[test]
    fn test_handshake_identity_mismatch_is_rejected() {
        let (alice, bob) = established_pair();
        let mut envelope = alice.manager.encrypt_and_send_message("bob", "hi").unwrap();
        if let MessageKind::Handshake(data) = &mut envelope.kind {
            data.identity_key = bob.manager.key_manager().public_bundle().unwrap().identity_key;
        }

        assert!(matches!(
            bob.manager.receive_and_decrypt_message("alice", &envelope),
            Err(E2eeError::HandshakeFailure(_))
        ));
    }

    #[test]
    fn test_empty_contact_id_is_rejected() {
        let (alice, _bob) = established_pair();
        assert!(matches!(
            alice.manager.encrypt_and_send_message("", "x"),
            Err(E2eeError::Validation(_))
        ));
    }
}
