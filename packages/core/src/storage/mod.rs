// Модуль хранилища
//
// `StorageBackend` - тупой key-value субстрат (байты по namespace + key).
// `CryptoStore` - handle, привязанный к одному аккаунту: партиционирует
// записи по account id и (де)сериализует типизированные записи.

pub mod memory;
pub mod models;

pub use memory::MemoryBackend;

use crate::utils::error::Result;
use crate::utils::serialization::{from_bytes, to_bytes};
use crate::utils::validation::validate_account_id;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

/// Логические хранилища
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreName {
    /// Identity и signed prekey (зашифрованные приватные половины)
    UserKeys,
    /// One-time prekeys по id
    OneTimePreKeys,
    /// Состояние сессий по contact id
    Sessions,
    /// Соль и запись верификации мастер-ключа
    MasterKeySalt,
    /// Кэш отправленных plaintext (зашифрован мастер-ключом)
    SentMessages,
    /// Кэш полученных plaintext (зашифрован мастер-ключом)
    ReceivedMessages,
}

impl StoreName {
    pub const ALL: [StoreName; 6] = [
        StoreName::UserKeys,
        StoreName::OneTimePreKeys,
        StoreName::Sessions,
        StoreName::MasterKeySalt,
        StoreName::SentMessages,
        StoreName::ReceivedMessages,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StoreName::UserKeys => "user_keys",
            StoreName::OneTimePreKeys => "one_time_pre_keys",
            StoreName::Sessions => "sessions",
            StoreName::MasterKeySalt => "master_key_salt",
            StoreName::SentMessages => "sent_messages",
            StoreName::ReceivedMessages => "received_messages",
        }
    }
}

/// Персистентное key-value хранилище
///
/// Реализации обязаны быть потокобезопасными. Недоступность хранилища
/// возвращается как `E2eeError::Storage` и фатальна для вызывающего.
pub trait StorageBackend: Send + Sync {
    fn put(&self, namespace: &str, key: &str, value: Vec<u8>) -> Result<()>;

    fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>>;

    /// Все записи namespace, отсортированные по ключу
    fn get_all(&self, namespace: &str) -> Result<Vec<(String, Vec<u8>)>>;

    /// Удалить запись, вернув её значение. Атомарно: из двух конкурентных
    /// вызовов значение получает только один.
    fn remove(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>>;

    fn clear(&self, namespace: &str) -> Result<()>;
}

/// Handle хранилища для одного аккаунта
#[derive(Clone)]
pub struct CryptoStore {
    backend: Arc<dyn StorageBackend>,
    account_id: String,
}

impl CryptoStore {
    pub fn new(backend: Arc<dyn StorageBackend>, account_id: impl Into<String>) -> Result<Self> {
        let account_id = account_id.into();
        validate_account_id(&account_id)?;

        Ok(Self {
            backend,
            account_id,
        })
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    fn namespace(&self, store: StoreName) -> String {
        format!("{}/{}", self.account_id, store.as_str())
    }

    pub fn put<T: Serialize>(&self, store: StoreName, key: &str, record: &T) -> Result<()> {
        let bytes = to_bytes(record)?;
        self.backend.put(&self.namespace(store), key, bytes)
    }

    pub fn get<T: DeserializeOwned>(&self, store: StoreName, key: &str) -> Result<Option<T>> {
        match self.backend.get(&self.namespace(store), key)? {
            Some(bytes) => Ok(Some(from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn get_all<T: DeserializeOwned>(&self, store: StoreName) -> Result<Vec<(String, T)>> {
        self.backend
            .get_all(&self.namespace(store))?
            .into_iter()
            .map(|(key, bytes)| -> Result<(String, T)> { Ok((key, from_bytes(&bytes)?)) })
            .collect()
    }

    pub fn keys(&self, store: StoreName) -> Result<Vec<String>> {
        Ok(self
            .backend
            .get_all(&self.namespace(store))?
            .into_iter()
            .map(|(key, _)| key)
            .collect())
    }

    pub fn contains(&self, store: StoreName, key: &str) -> Result<bool> {
        Ok(self.backend.get(&self.namespace(store), key)?.is_some())
    }

    /// Удалить запись без декодирования
    pub fn delete(&self, store: StoreName, key: &str) -> Result<bool> {
        Ok(self.backend.remove(&self.namespace(store), key)?.is_some())
    }

    pub fn clear(&self, store: StoreName) -> Result<()> {
        self.backend.clear(&self.namespace(store))
    }

    /// Стереть все хранилища аккаунта
    pub fn clear_all(&self) -> Result<()> {
        for store in StoreName::ALL {
            self.clear(store)?;
        }
        debug!(target: "storage", account = %self.account_id, "Cleared all stores");
        Ok(())
    }
}
