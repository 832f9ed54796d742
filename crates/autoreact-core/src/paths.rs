use std::path::Path;

use crate::error::ControlError;

/// Create the sessions directory (and parents) if it does not exist yet.
pub fn ensure_sessions_dir(dir: &Path) -> Result<(), String> {
    std::fs::create_dir_all(dir)
        .map_err(|e| format!("Failed to create sessions directory {}: {}", dir.display(), e))
}

/// The phone number names a session file, so it is restricted to ASCII
/// digits with an optional leading `+`.
pub fn validate_phone(phone: &str) -> Result<(), ControlError> {
    let digits = phone.strip_prefix('+').unwrap_or(phone);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ControlError::InvalidPhone(phone.to_string()));
    }
    Ok(())
}
