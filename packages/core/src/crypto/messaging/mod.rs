//! Secure Messaging Protocols
//!
//! Протоколы защищённого обмена сообщениями поверх общего секрета,
//! полученного от KeyAgreement.
//!
//! ## Протоколы
//! - **Double Ratchet**: symmetric ratchet на каждое сообщение + DH ratchet
//!   при смене ratchet ключа
//!
//! ## Security Properties
//!
//! ### Forward Secrecy
//! Message key используется ровно один раз и сразу уничтожается. Chain key
//! продвигается односторонней KDF, поэтому компрометация текущего
//! состояния не раскрывает прошлые сообщения.
//!
//! ### Break-in Recovery
//! Каждый DH ratchet step подмешивает в root key свежий DH секрет.
//!
//! ### Out-of-Order Messages
//! Не поддерживаются: пропущенные message keys не кэшируются.
//!
//! ## Не отвечает за:
//! - Хранение состояния и блокировки (это делает SessionManager)
//! - Handshake (это делает KeyAgreement)

pub mod double_ratchet;

pub use double_ratchet::{
    DoubleRatchet, RatchetHeader, RatchetMessage, RatchetPhase, RatchetState, ReceivingChain,
    Role, SendingChain,
};
