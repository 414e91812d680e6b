// E2EE Core
// X3DH + Double Ratchet с зашифрованным хранилищем ключей

#![warn(clippy::all)]

// Модули
pub mod config;
pub mod crypto;
pub mod error;
pub mod storage;
pub mod utils;

// Re-exports для удобства
pub use config::Config;
pub use crypto::handshake::{PreKeyBundle, PublicKeyBundle};
pub use crypto::history::MessageHistory;
pub use crypto::keys::KeyManager;
pub use crypto::master_key::MasterKey;
pub use crypto::session_manager::{
    EncryptedEnvelope, HandshakeData, MessageKind, SessionManager, SessionStatus,
};
pub use crypto::suites::classic::ClassicSuiteProvider;
pub use storage::{CryptoStore, MemoryBackend, StorageBackend, StoreName};
pub use utils::error::{E2eeError, Result};
