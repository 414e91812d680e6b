// История сообщений
//
// Plaintext отправленных и полученных сообщений, зашифрованный мастер-ключом.
// Отправленное видит только отправитель, полученное только получатель:
// кэши локальны для аккаунта и никогда не передаются собеседнику.

use crate::crypto::master_key::MasterKey;
use crate::storage::models::{MessageDirection, StoredMessage};
use crate::storage::{CryptoStore, StoreName};
use crate::utils::error::{E2eeError, Result};
use crate::utils::time::current_timestamp;
use crate::utils::validation::{validate_contact_id, validate_message_id};
use tracing::debug;

/// Запись истории после расшифровки
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub message_id: String,
    pub contact_id: String,
    pub direction: MessageDirection,
    pub plaintext: String,
    pub timestamp: i64,
}

pub struct MessageHistory {
    store: CryptoStore,
}

impl MessageHistory {
    pub fn new(store: CryptoStore) -> Self {
        Self { store }
    }

    /// Ключ записи: message id выбирает отправитель, поэтому он уникален
    /// только в пределах контакта. Длина contact id делает ключ однозначным.
    fn record_key(contact_id: &str, message_id: &str) -> String {
        format!("{}:{}/{}", contact_id.len(), contact_id, message_id)
    }

    fn store_name(direction: MessageDirection) -> StoreName {
        match direction {
            MessageDirection::Sent => StoreName::SentMessages,
            MessageDirection::Received => StoreName::ReceivedMessages,
        }
    }

    fn record(
        &self,
        master_key: &MasterKey,
        direction: MessageDirection,
        contact_id: &str,
        message_id: &str,
        plaintext: &str,
    ) -> Result<()> {
        validate_contact_id(contact_id)?;
        validate_message_id(message_id)?;

        let record = StoredMessage {
            message_id: message_id.to_string(),
            contact_id: contact_id.to_string(),
            direction,
            encrypted_plaintext: master_key.encrypt(plaintext.as_bytes())?,
            timestamp: current_timestamp(),
        };
        self.store.put(
            Self::store_name(direction),
            &Self::record_key(contact_id, message_id),
            &record,
        )?;

        debug!(
            target: "crypto::history",
            message_id = %message_id,
            direction = ?direction,
            "Recorded message"
        );
        Ok(())
    }

    pub fn record_sent(
        &self,
        master_key: &MasterKey,
        contact_id: &str,
        message_id: &str,
        plaintext: &str,
    ) -> Result<()> {
        self.record(master_key, MessageDirection::Sent, contact_id, message_id, plaintext)
    }

    pub fn record_received(
        &self,
        master_key: &MasterKey,
        contact_id: &str,
        message_id: &str,
        plaintext: &str,
    ) -> Result<()> {
        self.record(master_key, MessageDirection::Received, contact_id, message_id, plaintext)
    }

    fn decrypt_entry(master_key: &MasterKey, record: StoredMessage) -> Result<HistoryEntry> {
        let bytes = master_key.decrypt(&record.encrypted_plaintext)?;
        let plaintext = String::from_utf8(bytes.to_vec())
            .map_err(|_| E2eeError::Serialization("History entry is not UTF-8".to_string()))?;

        Ok(HistoryEntry {
            message_id: record.message_id,
            contact_id: record.contact_id,
            direction: record.direction,
            plaintext,
            timestamp: record.timestamp,
        })
    }

    fn get(
        &self,
        master_key: &MasterKey,
        direction: MessageDirection,
        contact_id: &str,
        message_id: &str,
    ) -> Result<Option<String>> {
        match self.store.get::<StoredMessage>(
            Self::store_name(direction),
            &Self::record_key(contact_id, message_id),
        )? {
            Some(record) => Ok(Some(Self::decrypt_entry(master_key, record)?.plaintext)),
            None => Ok(None),
        }
    }

    pub fn get_sent(
        &self,
        master_key: &MasterKey,
        contact_id: &str,
        message_id: &str,
    ) -> Result<Option<String>> {
        self.get(master_key, MessageDirection::Sent, contact_id, message_id)
    }

    pub fn get_received(
        &self,
        master_key: &MasterKey,
        contact_id: &str,
        message_id: &str,
    ) -> Result<Option<String>> {
        self.get(master_key, MessageDirection::Received, contact_id, message_id)
    }

    /// Вся история с контактом (оба направления), по времени
    pub fn conversation(&self, master_key: &MasterKey, contact_id: &str) -> Result<Vec<HistoryEntry>> {
        let mut entries = Vec::new();
        for direction in [MessageDirection::Sent, MessageDirection::Received] {
            for (_, record) in self
                .store
                .get_all::<StoredMessage>(Self::store_name(direction))?
            {
                if record.contact_id == contact_id {
                    entries.push(Self::decrypt_entry(master_key, record)?);
                }
            }
        }
        entries.sort_by_key(|entry| entry.timestamp);
        Ok(entries)
    }

    pub fn delete(
        &self,
        direction: MessageDirection,
        contact_id: &str,
        message_id: &str,
    ) -> Result<bool> {
        self.store.delete(
            Self::store_name(direction),
            &Self::record_key(contact_id, message_id),
        )
    }

    pub fn clear(&self) -> Result<()> {
        self.store.clear(StoreName::SentMessages)?;
        self.store.clear(StoreName::ReceivedMessages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryBackend, StorageBackend};
    use std::sync::Arc;

    fn history(account: &str, backend: &Arc<MemoryBackend>) -> MessageHistory {
        MessageHistory::new(CryptoStore::new(backend.clone(), account).unwrap())
    }

    #[test]
    fn test_record_and_read_back() {
        let backend = Arc::new(MemoryBackend::new());
        let history = history("alice", &backend);
        let key = MasterKey::from_bytes([5u8; 32]);

        history.record_sent(&key, "bob", "m1", "hi").unwrap();
        history.record_received(&key, "bob", "m2", "hello").unwrap();

        assert_eq!(history.get_sent(&key, "bob", "m1").unwrap(), Some("hi".to_string()));
        assert_eq!(
            history.get_received(&key, "bob", "m2").unwrap(),
            Some("hello".to_string())
        );
        // Направления не смешиваются
        assert_eq!(history.get_received(&key, "bob", "m1").unwrap(), None);

        let conversation = history.conversation(&key, "bob").unwrap();
        assert_eq!(conversation.len(), 2);
        assert!(history.conversation(&key, "carol").unwrap().is_empty());
    }

    #[test]
    fn test_plaintext_is_encrypted_at_rest() {
        let backend = Arc::new(MemoryBackend::new());
        let history = history("alice", &backend);
        let key = MasterKey::from_bytes([5u8; 32]);
        history.record_sent(&key, "bob", "m1", "attack at dawn").unwrap();

        let wrong = MasterKey::from_bytes([6u8; 32]);
        assert!(matches!(
            history.get_sent(&wrong, "bob", "m1"),
            Err(E2eeError::AuthenticationError)
        ));

        let raw = backend
            .get("alice/sent_messages", &MessageHistory::record_key("bob", "m1"))
            .unwrap()
            .unwrap();
        assert!(!raw.windows(6).any(|w| w == b"attack"));
    }

    #[test]
    fn test_history_is_per_account() {
        let backend = Arc::new(MemoryBackend::new());
        let alice = history("alice", &backend);
        let bob = history("bob", &backend);
        let key = MasterKey::from_bytes([5u8; 32]);

        alice.record_sent(&key, "bob", "m1", "hi").unwrap();
        assert_eq!(bob.get_sent(&key, "bob", "m1").unwrap(), None);
        assert_eq!(bob.get_received(&key, "bob", "m1").unwrap(), None);
    }

    #[test]
    fn test_delete_and_clear() {
        let backend = Arc::new(MemoryBackend::new());
        let history = history("alice", &backend);
        let key = MasterKey::from_bytes([5u8; 32]);

        history.record_sent(&key, "bob", "m1", "a").unwrap();
        history.record_received(&key, "bob", "m2", "b").unwrap();

        assert!(history.delete(MessageDirection::Sent, "bob", "m1").unwrap());
        assert!(!history.delete(MessageDirection::Sent, "bob", "m1").unwrap());

        history.clear().unwrap();
        assert_eq!(history.get_received(&key, "bob", "m2").unwrap(), None);
    }

    #[test]
    fn test_same_message_id_from_different_contacts() {
        let backend = Arc::new(MemoryBackend::new());
        let history = history("bob", &backend);
        let key = MasterKey::from_bytes([5u8; 32]);

        history.record_received(&key, "alice", "m1", "from alice").unwrap();
        history.record_received(&key, "carol", "m1", "from carol").unwrap();

        assert_eq!(
            history.get_received(&key, "alice", "m1").unwrap(),
            Some("from alice".to_string())
        );
        assert_eq!(
            history.get_received(&key, "carol", "m1").unwrap(),
            Some("from carol".to_string())
        );
        let conversation = history.conversation(&key, "alice").unwrap();
        assert_eq!(conversation.len(), 1);
        assert_eq!(conversation[0].plaintext, "from alice");

        // Разделитель внутри contact id не склеивает ключи
        assert_ne!(
            MessageHistory::record_key("a/b", "c"),
            MessageHistory::record_key("a", "b/c")
        );
    }
}
