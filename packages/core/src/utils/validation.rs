use crate::utils::error::{E2eeError, Result};

/// Максимальная длина идентификатора (аккаунт, контакт, сообщение)
pub const MAX_ID_LENGTH: usize = 256;

fn validate_id(kind: &str, id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(E2eeError::Validation(format!("{} cannot be empty", kind)));
    }
    if id.len() > MAX_ID_LENGTH {
        return Err(E2eeError::Validation(format!(
            "{} must be at most {} bytes",
            kind, MAX_ID_LENGTH
        )));
    }
    Ok(())
}

/// Account id становится префиксом namespace, поэтому '/' запрещён
pub fn validate_account_id(id: &str) -> Result<()> {
    validate_id("Account id", id)?;
    if id.contains('/') {
        return Err(E2eeError::Validation(format!("Invalid account id: {:?}", id)));
    }
    Ok(())
}

pub fn validate_contact_id(id: &str) -> Result<()> {
    validate_id("Contact id", id)
}

pub fn validate_message_id(id: &str) -> Result<()> {
    validate_id("Message id", id)
}
