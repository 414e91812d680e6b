// Управление ключами
// Генерация, шифрование мастер-ключом, хранение и выдача приватных ключей

use crate::config::Config;
use crate::crypto::handshake::{OneTimePreKeyPublic, PublicKeyBundle, SignedPreKeyPublic};
use crate::crypto::master_key::{generate_salt, EncryptedBlob, MasterKey};
use crate::crypto::provider::CryptoProvider;
use crate::crypto::types::{DhPrivateKey, IdentityKeyPair, SigningPrivateKey};
use crate::storage::models::{
    MasterKeySaltRecord, OneTimePreKeyCounter, StoredIdentityKey, StoredOneTimePreKey,
    StoredSignedPreKey, IDENTITY_RECORD_KEY, ONE_TIME_PRE_KEY_COUNTER_KEY, SALT_RECORD_KEY,
    SIGNED_PRE_KEY_RECORD_KEY,
};
use crate::storage::{CryptoStore, StoreName};
use crate::utils::error::{E2eeError, Result};
use crate::utils::time::current_timestamp;
use std::marker::PhantomData;
use std::sync::Mutex;
use tracing::{debug, info, warn};

/// Ключ записи one-time prekey (zero-padded, чтобы порядок совпадал с id)
fn one_time_pre_key_record_key(key_id: u32) -> String {
    format!("{:010}", key_id)
}

/// Менеджер криптографических ключей
///
/// Единственный владелец записей ключей в хранилище. Приватные половины
/// хранятся только зашифрованными и расшифровываются по запросу.
pub struct KeyManager<P: CryptoProvider> {
    store: CryptoStore,
    config: Config,

    /// Сериализует read-delete при потреблении one-time prekeys
    one_time_pre_key_lock: Mutex<()>,

    _phantom: PhantomData<P>,
}

impl<P: CryptoProvider> KeyManager<P> {
    /// Создать менеджер с глобальной конфигурацией
    pub fn new(store: CryptoStore) -> Self {
        Self {
            store,
            config: Config::global().clone(),
            one_time_pre_key_lock: Mutex::new(()),
            _phantom: PhantomData,
        }
    }

    /// Создать менеджер с явной конфигурацией
    pub fn with_config(store: CryptoStore, config: Config) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            store,
            config,
            one_time_pre_key_lock: Mutex::new(()),
            _phantom: PhantomData,
        })
    }

    pub fn store(&self) -> &CryptoStore {
        &self.store
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Зарегистрированы ли ключи для этого аккаунта
    pub fn is_initialized(&self) -> Result<bool> {
        self.store.contains(StoreName::MasterKeySalt, SALT_RECORD_KEY)
    }

    /// Сгенерировать и сохранить все ключи пользователя
    ///
    /// Генерирует identity, signed prekey и пул one-time prekeys, шифрует
    /// приватные половины свежим мастер-ключом, сохраняет соль и запись
    /// верификации. Возвращает только публичный материал.
    pub fn initialize_user_keys(&self, passphrase: &str) -> Result<PublicKeyBundle> {
        if passphrase.chars().count() < self.config.passphrase_min_length {
            return Err(E2eeError::Validation(format!(
                "Passphrase must be at least {} characters long",
                self.config.passphrase_min_length
            )));
        }

        if self.is_initialized()? {
            return Err(E2eeError::Validation(format!(
                "Keys already initialized for account {}",
                self.store.account_id()
            )));
        }

        info!(
            target: "crypto::keys",
            account = %self.store.account_id(),
            one_time_pre_keys = %self.config.one_time_pre_key_count,
            "Initializing user keys"
        );

        if let Err(e) = self.generate_and_store_keys(passphrase) {
            // Частично записанные ключи бесполезны без соли
            if let Err(cleanup) = self.store.clear_all() {
                warn!(target: "crypto::keys", error = %cleanup, "Cleanup after failed initialization failed");
            }
            return Err(e);
        }

        self.public_bundle()
    }

    fn generate_and_store_keys(&self, passphrase: &str) -> Result<()> {
        let now = current_timestamp();

        let salt = generate_salt(self.config.salt_length);
        let master_key = MasterKey::derive(passphrase, &salt, self.config.pbkdf2_iterations)?;

        // Identity
        let (identity_private, identity_public) = P::generate_signing_keypair()?;
        let identity_record = StoredIdentityKey {
            verifying_key: identity_public,
            dh_public_key: P::identity_dh_public(&identity_public)?,
            encrypted_signing_key: master_key.encrypt(identity_private.as_bytes())?,
            created_at: now,
        };
        self.store
            .put(StoreName::UserKeys, IDENTITY_RECORD_KEY, &identity_record)?;

        // Signed prekey
        let signed_pre_key = P::generate_dh_keypair()?;
        let signature = P::sign(&identity_private, signed_pre_key.public.as_bytes())?;
        let spk_record = StoredSignedPreKey {
            key_id: self.config.signed_pre_key_id,
            public_key: signed_pre_key.public,
            signature,
            encrypted_private_key: master_key.encrypt(signed_pre_key.private.as_bytes())?,
            created_at: now,
            expires_at: now
                .checked_add(self.config.signed_pre_key_ttl_secs)
                .ok_or_else(|| E2eeError::Config("signed_pre_key_ttl_secs overflows".to_string()))?,
        };
        self.store
            .put(StoreName::UserKeys, SIGNED_PRE_KEY_RECORD_KEY, &spk_record)?;

        // One-time prekeys: ids 1..=count
        self.store.put(
            StoreName::UserKeys,
            ONE_TIME_PRE_KEY_COUNTER_KEY,
            &OneTimePreKeyCounter { next_id: 1 },
        )?;
        self.generate_one_time_pre_keys(&master_key, self.config.one_time_pre_key_count as usize)?;

        // Соль и запись верификации пишутся последними
        let salt_record = MasterKeySaltRecord {
            salt,
            iterations: self.config.pbkdf2_iterations,
            verification: master_key.create_verification_record()?,
            created_at: now,
        };
        self.store
            .put(StoreName::MasterKeySalt, SALT_RECORD_KEY, &salt_record)?;

        debug!(target: "crypto::keys", "User keys stored");
        Ok(())
    }

    fn generate_one_time_pre_keys(
        &self,
        master_key: &MasterKey,
        count: usize,
    ) -> Result<Vec<OneTimePreKeyPublic>> {
        let counter: OneTimePreKeyCounter = self
            .store
            .get(StoreName::UserKeys, ONE_TIME_PRE_KEY_COUNTER_KEY)?
            .unwrap_or(OneTimePreKeyCounter { next_id: 1 });

        // Диапазон id проверяется до генерации, чтобы не оставить половину пула
        let next_id = u32::try_from(count)
            .ok()
            .and_then(|count| counter.next_id.checked_add(count))
            .ok_or_else(|| E2eeError::Validation("One-time pre-key ids exhausted".to_string()))?;

        let now = current_timestamp();
        let mut generated = Vec::with_capacity(count);

        for key_id in counter.next_id..next_id {
            let pair = P::generate_dh_keypair()?;

            let record = StoredOneTimePreKey {
                key_id,
                public_key: pair.public,
                encrypted_private_key: master_key.encrypt(pair.private.as_bytes())?,
                created_at: now,
            };
            self.store.put(
                StoreName::OneTimePreKeys,
                &one_time_pre_key_record_key(key_id),
                &record,
            )?;

            generated.push(OneTimePreKeyPublic {
                key_id,
                public_key: pair.public,
            });
        }

        self.store.put(
            StoreName::UserKeys,
            ONE_TIME_PRE_KEY_COUNTER_KEY,
            &OneTimePreKeyCounter { next_id },
        )?;

        Ok(generated)
    }

    /// Перезагрузить соль, деривировать мастер-ключ и проверить его
    ///
    /// Неверный пароль даёт `Ok(None)`, а не ошибку.
    pub fn login_and_derive_master_key(&self, passphrase: &str) -> Result<Option<MasterKey>> {
        let salt_record: MasterKeySaltRecord = self
            .store
            .get(StoreName::MasterKeySalt, SALT_RECORD_KEY)?
            .ok_or_else(|| E2eeError::KeyNotFound("master key salt".to_string()))?;

        if passphrase.is_empty() {
            return Ok(None);
        }

        let master_key = MasterKey::derive(passphrase, &salt_record.salt, salt_record.iterations)?;

        if master_key.verify(&salt_record.verification) {
            debug!(target: "crypto::keys", account = %self.store.account_id(), "Master key verified");
            Ok(Some(master_key))
        } else {
            debug!(target: "crypto::keys", account = %self.store.account_id(), "Wrong passphrase");
            Ok(None)
        }
    }

    fn decrypt_key_bytes(master_key: &MasterKey, blob: &EncryptedBlob) -> Result<[u8; 32]> {
        let plaintext = master_key.decrypt(blob)?;
        let bytes: [u8; 32] = plaintext
            .as_slice()
            .try_into()
            .map_err(|_| E2eeError::InvalidKey("Stored private key has wrong length".to_string()))?;
        Ok(bytes)
    }

    fn load_identity_record(&self) -> Result<StoredIdentityKey> {
        self.store
            .get(StoreName::UserKeys, IDENTITY_RECORD_KEY)?
            .ok_or_else(|| E2eeError::KeyNotFound("identity key".to_string()))
    }

    fn load_signed_pre_key_record(&self) -> Result<StoredSignedPreKey> {
        self.store
            .get(StoreName::UserKeys, SIGNED_PRE_KEY_RECORD_KEY)?
            .ok_or_else(|| E2eeError::KeyNotFound("signed pre-key".to_string()))
    }

    /// Приватный identity key (Ed25519)
    pub fn get_identity_private_key(&self, master_key: &MasterKey) -> Result<SigningPrivateKey> {
        let record = self.load_identity_record()?;
        let bytes = Self::decrypt_key_bytes(master_key, &record.encrypted_signing_key)?;
        Ok(SigningPrivateKey::from_bytes(bytes))
    }

    /// Identity key pair (приватная + публичная половины)
    pub fn get_identity_key_pair(&self, master_key: &MasterKey) -> Result<IdentityKeyPair> {
        let record = self.load_identity_record()?;
        let bytes = Self::decrypt_key_bytes(master_key, &record.encrypted_signing_key)?;
        Ok(IdentityKeyPair {
            private: SigningPrivateKey::from_bytes(bytes),
            public: record.verifying_key,
        })
    }

    /// Приватный ключ текущего signed prekey
    pub fn get_signed_pre_key_private(&self, master_key: &MasterKey) -> Result<DhPrivateKey> {
        let record = self.load_signed_pre_key_record()?;
        let bytes = Self::decrypt_key_bytes(master_key, &record.encrypted_private_key)?;
        Ok(DhPrivateKey::from_bytes(bytes))
    }

    /// Приватный one-time prekey без удаления
    pub fn get_one_time_pre_key_private(
        &self,
        master_key: &MasterKey,
        key_id: u32,
    ) -> Result<DhPrivateKey> {
        let record: StoredOneTimePreKey = self
            .store
            .get(StoreName::OneTimePreKeys, &one_time_pre_key_record_key(key_id))?
            .ok_or_else(|| E2eeError::KeyNotFound(format!("one-time pre-key {}", key_id)))?;
        let bytes = Self::decrypt_key_bytes(master_key, &record.encrypted_private_key)?;
        Ok(DhPrivateKey::from_bytes(bytes))
    }

    /// Расшифровать и удалить one-time prekey (однократное использование)
    ///
    /// Повторное потребление того же id даёт `KeyNotFound`. При неверном
    /// мастер-ключе запись не удаляется.
    pub fn consume_one_time_pre_key(
        &self,
        master_key: &MasterKey,
        key_id: u32,
    ) -> Result<DhPrivateKey> {
        let _guard = self
            .one_time_pre_key_lock
            .lock()
            .map_err(|_| E2eeError::Storage("One-time pre-key lock poisoned".to_string()))?;

        let private_key = self.get_one_time_pre_key_private(master_key, key_id)?;

        // remove атомарен в backend: конкурирующий менеджер на том же
        // хранилище получит None
        if !self
            .store
            .delete(StoreName::OneTimePreKeys, &one_time_pre_key_record_key(key_id))?
        {
            return Err(E2eeError::KeyNotFound(format!("one-time pre-key {}", key_id)));
        }

        debug!(target: "crypto::keys", key_id = %key_id, "Consumed one-time pre-key");
        Ok(private_key)
    }

    /// Количество оставшихся one-time prekeys
    pub fn count_one_time_pre_keys(&self) -> Result<usize> {
        Ok(self.store.keys(StoreName::OneTimePreKeys)?.len())
    }

    /// Дополнить пул one-time prekeys до `target` ключей
    ///
    /// Новые id продолжают последовательность после максимального выданного.
    pub fn replenish_one_time_pre_keys(
        &self,
        master_key: &MasterKey,
        target: usize,
    ) -> Result<Vec<OneTimePreKeyPublic>> {
        // Мастер-ключ должен быть верным, иначе новые ключи будет невозможно расшифровать
        let salt_record: MasterKeySaltRecord = self
            .store
            .get(StoreName::MasterKeySalt, SALT_RECORD_KEY)?
            .ok_or_else(|| E2eeError::KeyNotFound("master key salt".to_string()))?;
        if !master_key.verify(&salt_record.verification) {
            return Err(E2eeError::AuthenticationError);
        }

        let _guard = self
            .one_time_pre_key_lock
            .lock()
            .map_err(|_| E2eeError::Storage("One-time pre-key lock poisoned".to_string()))?;

        let current = self.count_one_time_pre_keys()?;
        if current >= target {
            return Ok(Vec::new());
        }

        let generated = self.generate_one_time_pre_keys(master_key, target - current)?;
        info!(
            target: "crypto::keys",
            generated = %generated.len(),
            total = %target,
            "Replenished one-time pre-keys"
        );
        Ok(generated)
    }

    /// Истёк ли текущий signed prekey
    pub fn signed_pre_key_expired(&self, now: i64) -> Result<bool> {
        Ok(self.load_signed_pre_key_record()?.expires_at <= now)
    }

    /// Публикуемый bundle (только публичный материал)
    pub fn public_bundle(&self) -> Result<PublicKeyBundle> {
        let identity = self.load_identity_record()?;
        let spk = self.load_signed_pre_key_record()?;

        let mut one_time_pre_keys: Vec<OneTimePreKeyPublic> = self
            .store
            .get_all::<StoredOneTimePreKey>(StoreName::OneTimePreKeys)?
            .into_iter()
            .map(|(_, record)| OneTimePreKeyPublic {
                key_id: record.key_id,
                public_key: record.public_key,
            })
            .collect();
        one_time_pre_keys.sort_by_key(|k| k.key_id);

        Ok(PublicKeyBundle {
            identity_key: identity.verifying_key,
            identity_dh_key: identity.dh_public_key,
            signed_pre_key: SignedPreKeyPublic {
                key_id: spk.key_id,
                public_key: spk.public_key,
                signature: spk.signature,
                expires_at: spk.expires_at,
            },
            one_time_pre_keys,
        })
    }

    /// Стереть все криптоданные аккаунта (logout)
    pub fn clear_all_crypto_data(&self) -> Result<()> {
        self.store.clear_all()?;
        info!(target: "crypto::keys", account = %self.store.account_id(), "Cleared all crypto data");
        Ok(())
    }
}
