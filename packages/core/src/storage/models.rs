// Модели данных для хранилища
//
// Все бинарные поля - массивы фиксированной длины либо serde_bytes буферы,
// поэтому декодированная запись сразу содержит типизированные ключи.

use crate::crypto::master_key::EncryptedBlob;
use crate::crypto::types::{DhPublicKey, SignatureBytes, SigningPublicKey};
use crate::utils::b64;
use serde::{Deserialize, Serialize};

/// Ключи записей в `StoreName::UserKeys`
pub const IDENTITY_RECORD_KEY: &str = "identity";
pub const SIGNED_PRE_KEY_RECORD_KEY: &str = "signed_pre_key";
pub const ONE_TIME_PRE_KEY_COUNTER_KEY: &str = "one_time_pre_key_counter";

/// Ключ записи в `StoreName::MasterKeySalt`
pub const SALT_RECORD_KEY: &str = "master";

/// Identity key (Ed25519). Приватная половина ЗАШИФРОВАНА мастер-ключом.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredIdentityKey {
    pub verifying_key: SigningPublicKey,
    /// X25519-форма публичного ключа (детерминированная конверсия)
    pub dh_public_key: DhPublicKey,
    pub encrypted_signing_key: EncryptedBlob,
    pub created_at: i64,
}

/// Signed prekey
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredSignedPreKey {
    pub key_id: u32,
    pub public_key: DhPublicKey,
    #[serde(with = "b64::array")]
    pub signature: SignatureBytes, // Подпись identity ключом (не шифруется)
    pub encrypted_private_key: EncryptedBlob,
    pub created_at: i64,
    pub expires_at: i64,
}

/// One-time prekey
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredOneTimePreKey {
    pub key_id: u32,
    pub public_key: DhPublicKey,
    pub encrypted_private_key: EncryptedBlob,
    pub created_at: i64,
}

/// Следующий свободный id one-time prekey (id не переиспользуются)
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct OneTimePreKeyCounter {
    pub next_id: u32,
}

/// Соль PBKDF2 + запись верификации. Создаётся при регистрации, не меняется.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MasterKeySaltRecord {
    #[serde(with = "serde_bytes")]
    pub salt: Vec<u8>,
    pub iterations: u32,
    pub verification: EncryptedBlob,
    pub created_at: i64,
}

/// Направление сообщения в истории
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageDirection {
    Sent,
    Received,
}

/// Plaintext сообщения в истории (ЗАШИФРОВАН мастер-ключом)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub message_id: String,
    pub contact_id: String,
    pub direction: MessageDirection,
    pub encrypted_plaintext: EncryptedBlob,
    pub timestamp: i64,
}
