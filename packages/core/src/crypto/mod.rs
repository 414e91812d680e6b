//! Криптографический модуль
//!
//! # Архитектура
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Application                          │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 SessionManager (High-Level API)             │
//! │  - Одна сессия = один контакт                               │
//! │  - Блокировка на контакт, persistence состояния             │
//! │  - История сообщений (MessageHistory)                       │
//! └─────────────────────────────────────────────────────────────┘
//!                │                           │
//!                ▼                           ▼
//! ┌───────────────────────────┐  ┌──────────────────────────┐
//! │   KeyAgreement (X3DH)     │  │  DoubleRatchet           │
//! │  - X3DH handshake         │  │  - Symmetric ratchet     │
//! │  - Ephemeral keys         │  │  - DH ratchet            │
//! │  - Shared secret          │  │  - Forward secrecy       │
//! └───────────────────────────┘  └──────────────────────────┘
//!                │                           │
//!                ▼                           │
//! ┌───────────────────────────┐              │
//! │   KeyManager              │              │
//! │  - Identity, prekeys      │              │
//! │  - Шифрование MasterKey   │              │
//! └───────────────────────────┘              │
//!                │                           │
//!                └─────────────┬─────────────┘
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │              CryptoProvider (Crypto-Agility)                │
//! │  - DH (X25519)                                              │
//! │  - Signatures (Ed25519)                                     │
//! │  - AEAD (ChaCha20-Poly1305)                                 │
//! │  - KDF (HKDF-SHA256)                                        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Модули
//!
//! ### Core Traits
//! - [`provider`]: CryptoProvider trait для crypto-agility
//! - [`handshake`]: KeyAgreement trait и X3DH
//! - [`messaging`]: Double Ratchet
//!
//! ### Implementations
//! - [`suites`]: Реализации CryptoProvider (Classic)
//!
//! ### High-Level APIs
//! - [`session_manager`]: сессии с контактами
//! - [`history`]: зашифрованная история сообщений
//!
//! ### Keys
//! - [`types`]: типизированные ключи
//! - [`master_key`]: деривация мастер-ключа и шифрование секретов
//! - [`keys`]: KeyManager

// ============================================================================
// Core Traits
// ============================================================================

/// CryptoProvider trait для crypto-agility
pub mod provider;

/// Key Agreement protocols (X3DH)
pub mod handshake;

/// Secure Messaging protocols (Double Ratchet)
pub mod messaging;

// ============================================================================
// Implementations
// ============================================================================

/// Криптографические наборы
pub mod suites;

// ============================================================================
// High-Level APIs
// ============================================================================

pub mod session_manager;

pub mod history;

// ============================================================================
// Keys
// ============================================================================

pub mod types;

pub mod master_key;

pub mod keys;

// ============================================================================
// Re-exports для удобства
// ============================================================================

pub use provider::CryptoProvider;

/// Suite ID for the classic suite
///
/// Записывается в состояние каждой сессии; сессия другого набора не загружается.
pub const CLASSIC_SUITE_ID: u16 = 1;
