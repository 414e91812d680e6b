//! Централизованная конфигурация E2EE core
//!
//! Все константы протокола определены здесь. Компоненты принимают явный
//! экземпляр `Config` либо используют глобальный (`Config::global()`).

use crate::utils::error::{E2eeError, Result};
use std::sync::OnceLock;

/// Глобальная конфигурация (синглтон)
static GLOBAL_CONFIG: OnceLock<Config> = OnceLock::new();

/// Нижняя граница итераций PBKDF2
pub const MIN_PBKDF2_ITERATIONS: u32 = 100_000;

/// Основная структура конфигурации
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    // ============================================
    // МАСТЕР-КЛЮЧ
    // ============================================

    /// PBKDF2: количество итераций для деривации мастер-ключа из пароля
    pub pbkdf2_iterations: u32,

    /// Длина соли для PBKDF2 (в байтах)
    pub salt_length: usize,

    /// Минимальная длина пароля
    pub passphrase_min_length: usize,

    // ============================================
    // ПРЕДКЛЮЧИ
    // ============================================

    /// Размер пула one-time prekeys
    pub one_time_pre_key_count: u32,

    /// ID текущего signed prekey
    pub signed_pre_key_id: u32,

    /// Время жизни signed prekey (в секундах)
    /// По умолчанию: 30 дней
    pub signed_pre_key_ttl_secs: i64,

    // ============================================
    // DOUBLE RATCHET
    // ============================================

    /// Периодическая ротация DH ratchet: каждые N отправленных сообщений
    pub dh_ratchet_interval: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pbkdf2_iterations: MIN_PBKDF2_ITERATIONS,
            salt_length: 32,
            passphrase_min_length: 1,

            one_time_pre_key_count: 100,
            signed_pre_key_id: 1,
            signed_pre_key_ttl_secs: 30 * 24 * 60 * 60, // 30 days

            dh_ratchet_interval: 100,
        }
    }
}

impl Config {
    /// Создать конфигурацию из переменных окружения
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(parsed) = env_override("PBKDF2_ITERATIONS") {
            config.pbkdf2_iterations = parsed;
        }

        if let Some(parsed) = env_override("ONE_TIME_PRE_KEY_COUNT") {
            config.one_time_pre_key_count = parsed;
        }

        if let Some(parsed) = env_override("SIGNED_PRE_KEY_TTL_SECS") {
            config.signed_pre_key_ttl_secs = parsed;
        }

        if let Some(parsed) = env_override("DH_RATCHET_INTERVAL") {
            config.dh_ratchet_interval = parsed;
        }

        config
    }

    /// Проверить инварианты конфигурации
    pub fn validate(&self) -> Result<()> {
        if self.pbkdf2_iterations < MIN_PBKDF2_ITERATIONS {
            return Err(E2eeError::Config(format!(
                "pbkdf2_iterations must be at least {}, got {}",
                MIN_PBKDF2_ITERATIONS, self.pbkdf2_iterations
            )));
        }

        if self.dh_ratchet_interval == 0 {
            return Err(E2eeError::Config(
                "dh_ratchet_interval must be positive".to_string(),
            ));
        }

        if self.salt_length < 16 {
            return Err(E2eeError::Config(format!(
                "salt_length too short: {}",
                self.salt_length
            )));
        }

        Ok(())
    }

    /// Получить глобальный экземпляр конфигурации
    ///
    /// Автоматически инициализирует конфигурацию со значениями по умолчанию при первом вызове
    pub fn global() -> &'static Config {
        GLOBAL_CONFIG.get_or_init(Config::default)
    }

    /// Инициализировать глобальную конфигурацию со значениями по умолчанию
    ///
    /// # Errors
    ///
    /// Возвращает ошибку, если конфигурация уже была инициализирована
    pub fn init() -> Result<()> {
        Self::init_with(Self::default())
    }

    /// Инициализировать глобальную конфигурацию из переменных окружения
    pub fn init_from_env() -> Result<()> {
        Self::init_with(Self::from_env())
    }

    /// Инициализировать глобальную конфигурацию с кастомным экземпляром
    ///
    /// # Errors
    ///
    /// Невалидная конфигурация или повторная инициализация
    pub fn init_with(config: Config) -> Result<()> {
        config.validate()?;
        GLOBAL_CONFIG
            .set(config)
            .map_err(|_| E2eeError::Config("Config already initialized".to_string()))
    }

    /// Проверить, инициализирована ли глобальная конфигурация
    pub fn is_initialized() -> bool {
        GLOBAL_CONFIG.get().is_some()
    }
}

fn env_override<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|val| val.parse().ok())
}
