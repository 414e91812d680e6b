// Мастер-ключ: защищает все секреты в хранилище
// PBKDF2-HMAC-SHA256 для деривации ключа + AES-256-GCM для шифрования

use crate::config::MIN_PBKDF2_ITERATIONS;
use crate::crypto::types::{KEY_LEN, NONCE_LEN, TAG_LEN};
use crate::utils::error::{E2eeError, Result};
use aes_gcm::{
    aead::{generic_array::GenericArray, AeadInPlace, KeyInit},
    Aes256Gcm, Nonce,
};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::fmt;
use tracing::{debug, trace};
use zeroize::Zeroizing;

/// Известный plaintext записи верификации мастер-ключа
pub const VERIFICATION_PLAINTEXT: [u8; 5] = [1, 2, 3, 4, 5];

/// Результат AEAD-шифрования: ciphertext + nonce + отдельный tag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedBlob {
    #[serde(with = "serde_bytes")]
    pub ciphertext: Vec<u8>,
    pub nonce: [u8; NONCE_LEN],
    pub tag: [u8; TAG_LEN],
}

/// 256-битный мастер-ключ. Живёт только в памяти, обнуляется при drop.
pub struct MasterKey(Zeroizing<[u8; KEY_LEN]>);

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MasterKey(<redacted>)")
    }
}

impl MasterKey {
    /// Деривировать мастер-ключ из пароля с использованием PBKDF2
    ///
    /// # Arguments
    /// * `passphrase` - Пользовательский пароль (не пустой)
    /// * `salt` - Случайная соль
    /// * `iterations` - Количество итераций (не меньше 100 000)
    ///
    /// Одинаковые входные данные всегда дают одинаковый ключ.
    pub fn derive(passphrase: &str, salt: &[u8], iterations: u32) -> Result<Self> {
        if passphrase.is_empty() {
            return Err(E2eeError::Validation(
                "Passphrase cannot be empty".to_string(),
            ));
        }

        if salt.is_empty() {
            return Err(E2eeError::Validation("Salt cannot be empty".to_string()));
        }

        if iterations < MIN_PBKDF2_ITERATIONS {
            return Err(E2eeError::Validation(format!(
                "PBKDF2 iterations must be at least {}, got {}",
                MIN_PBKDF2_ITERATIONS, iterations
            )));
        }

        debug!(
            target: "crypto::master_key",
            iterations = %iterations,
            salt_len = %salt.len(),
            "Deriving master key"
        );

        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        pbkdf2_hmac::<Sha256>(passphrase.as_bytes(), salt, iterations, &mut *key);

        Ok(Self(key))
    }

    /// Создать из готовых байтов (ключ из внешнего хранилища секретов)
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(Zeroizing::new(bytes))
    }

    /// Зашифровать данные с использованием AES-256-GCM
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<EncryptedBlob> {
        let cipher = Aes256Gcm::new(GenericArray::from_slice(&*self.0));

        let mut nonce = [0u8; NONCE_LEN];
        rand::rngs::OsRng.fill_bytes(&mut nonce);

        let mut buffer = plaintext.to_vec();
        let tag = cipher
            .encrypt_in_place_detached(Nonce::from_slice(&nonce), b"", &mut buffer)
            .map_err(|e| E2eeError::Crypto(format!("Encryption failed: {}", e)))?;

        let mut tag_bytes = [0u8; TAG_LEN];
        tag_bytes.copy_from_slice(tag.as_slice());

        trace!(
            target: "crypto::master_key",
            len = %buffer.len(),
            "Encrypted blob"
        );

        Ok(EncryptedBlob {
            ciphertext: buffer,
            nonce,
            tag: tag_bytes,
        })
    }

    /// Расшифровать данные
    ///
    /// Неверный ключ или изменённые данные дают `AuthenticationError`.
    pub fn decrypt(&self, blob: &EncryptedBlob) -> Result<Zeroizing<Vec<u8>>> {
        let cipher = Aes256Gcm::new(GenericArray::from_slice(&*self.0));

        let mut buffer = Zeroizing::new(blob.ciphertext.clone());
        cipher
            .decrypt_in_place_detached(
                Nonce::from_slice(&blob.nonce),
                b"",
                &mut buffer,
                GenericArray::from_slice(&blob.tag),
            )
            .map_err(|_| E2eeError::AuthenticationError)?;

        Ok(buffer)
    }

    /// Создать запись верификации (шифротекст известного plaintext)
    pub fn create_verification_record(&self) -> Result<EncryptedBlob> {
        self.encrypt(&VERIFICATION_PLAINTEXT)
    }

    /// Проверить ключ по записи верификации
    ///
    /// Возвращает false при ошибке аутентификации, никогда не падает.
    pub fn verify(&self, record: &EncryptedBlob) -> bool {
        match self.decrypt(record) {
            Ok(plaintext) => plaintext.as_slice() == VERIFICATION_PLAINTEXT,
            Err(_) => false,
        }
    }
}

/// Генерировать случайную соль
pub fn generate_salt(len: usize) -> Vec<u8> {
    let mut salt = vec![0u8; len];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    salt
}
