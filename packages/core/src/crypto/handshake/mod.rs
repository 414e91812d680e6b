//! Key Agreement Protocols
//!
//! Протоколы установки общего секрета между двумя сторонами без
//! предварительного обмена секретами.
//!
//! ## Dataflow
//! ```text
//! Alice (инициатор)                          Bob (получатель)
//! ==================                         =================
//!
//! 1. Получает Bob's PreKeyBundle
//! 2. KeyAgreement::perform_as_initiator()
//!    → shared_secret, ephemeral_public,
//!      used_one_time_pre_key_id
//! 3. Отправляет handshake data →
//!                                            1. Находит приватные ключи
//!                                               (identity, signed prekey,
//!                                                one-time prekey по id)
//!                                            2. KeyAgreement::perform_as_responder()
//!                                               → shared_secret (тот же!)
//! ```

use crate::crypto::provider::CryptoProvider;
use crate::crypto::types::{DhPublicKey, SigningPrivateKey};
use crate::utils::error::Result;

pub mod x3dh;

/// Результат handshake на стороне инициатора
#[derive(Debug, Clone)]
pub struct InitiatorOutput<S> {
    /// Общий секрет (32 байта)
    pub shared_secret: S,

    /// Ephemeral public key, который нужно передать получателю.
    /// Приватная половина уничтожается сразу после handshake.
    pub ephemeral_public: DhPublicKey,

    /// ID использованного one-time prekey (None, если bundle его не содержал)
    pub used_one_time_pre_key_id: Option<u32>,
}

/// Протокол установки ключей (Key Agreement)
///
/// ## Ответственность
/// - Установка общего секретного ключа через криптографический handshake
/// - Проверка подлинности signed prekey перед использованием
///
/// ## Не отвечает за:
/// - Шифрование сообщений (это делает Double Ratchet)
/// - Хранение и потребление ключей (это делает KeyManager)
pub trait KeyAgreement<P: CryptoProvider> {
    /// Публичные ключи получателя, выданные directory service
    type PublicKeyBundle;

    /// Приватные ключи получателя для ответного handshake
    type ResponderKeys;

    /// Публичные ключи инициатора из handshake-сообщения
    type PeerKeys;

    /// Общий секретный ключ
    type SharedSecret;

    /// Выполнить handshake как инициатор (Alice)
    fn perform_as_initiator(
        local_identity: &SigningPrivateKey,
        remote_bundle: &Self::PublicKeyBundle,
    ) -> Result<InitiatorOutput<Self::SharedSecret>>;

    /// Выполнить handshake как получатель (Bob)
    ///
    /// Получает тот же shared secret, что и инициатор.
    fn perform_as_responder(
        local_keys: &Self::ResponderKeys,
        peer_keys: &Self::PeerKeys,
    ) -> Result<Self::SharedSecret>;
}

pub use x3dh::{
    OneTimePreKeyPublic, PeerHandshakeKeys, PreKeyBundle, PublicKeyBundle, ResponderKeys,
    SignedPreKeyPublic, X3dhProtocol,
};
