//! Field validation for inbound requests.
//!
//! Pure functions, no state. Each returns [`TandemError::InvalidInput`] (or a
//! payload error for uploads) with a message suitable for showing to the user.

use crate::error::{TandemError, TandemResult};
use crate::identity::Role;

/// Minimum session code length.
pub const SESSION_CODE_MIN_LEN: usize = 4;
/// Maximum session code length.
pub const SESSION_CODE_MAX_LEN: usize = 20;
/// Maximum display name length, in characters.
pub const NAME_MAX_LEN: usize = 50;

/// Check that a session code is 4–20 ASCII alphanumeric characters.
pub fn session_code(code: &str) -> TandemResult<()> {
    let len = code.len();
    if !(SESSION_CODE_MIN_LEN..=SESSION_CODE_MAX_LEN).contains(&len) {
        return Err(TandemError::InvalidInput(format!(
            "session code must be {SESSION_CODE_MIN_LEN}-{SESSION_CODE_MAX_LEN} characters"
        )));
    }
    if !code.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(TandemError::InvalidInput(
            "session code must be alphanumeric".into(),
        ));
    }
    Ok(())
}

/// Check a display name and return it trimmed.
pub fn name(name: &str) -> TandemResult<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(TandemError::InvalidInput("name is required".into()));
    }
    if trimmed.chars().count() > NAME_MAX_LEN {
        return Err(TandemError::InvalidInput(format!(
            "name must be at most {NAME_MAX_LEN} characters"
        )));
    }
    if trimmed.chars().any(char::is_control) {
        return Err(TandemError::InvalidInput(
            "name must not contain control characters".into(),
        ));
    }
    Ok(trimmed.to_string())
}

/// Parse a role string (`"host"` or `"client"`).
pub fn role(role: &str) -> TandemResult<Role> {
    match role {
        "host" => Ok(Role::Host),
        "client" => Ok(Role::Client),
        other => Err(TandemError::InvalidInput(format!("unknown role: {other}"))),
    }
}

/// Check an upload's declared size and media type.
pub fn upload(file_size: u64, file_type: &str, max_bytes: u64, type_prefix: &str) -> TandemResult<()> {
    if file_size > max_bytes {
        return Err(TandemError::PayloadTooLarge {
            size: file_size,
            max: max_bytes,
        });
    }
    if !file_type.starts_with(type_prefix) {
        return Err(TandemError::PayloadWrongType(file_type.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_code_bounds() {
        assert!(session_code("ABC1").is_ok());
        assert!(session_code("a1b2c3d4e5f6g7h8i9j0").is_ok());
        assert!(session_code("AB1").is_err());
        assert!(session_code("a1b2c3d4e5f6g7h8i9j0k").is_err());
        assert!(session_code("").is_err());
    }

    #[test]
    fn session_code_rejects_symbols() {
        assert!(session_code("ABC-1").is_err());
        assert!(session_code("ABC 1").is_err());
        assert!(session_code("ÄBC12").is_err());
    }

    #[test]
    fn name_is_trimmed() {
        assert_eq!(name("  Dana ").unwrap(), "Dana");
    }

    #[test]
    fn name_rejects_blank_long_and_control() {
        assert!(name("   ").is_err());
        assert!(name(&"x".repeat(NAME_MAX_LEN + 1)).is_err());
        assert!(name(&"x".repeat(NAME_MAX_LEN)).is_ok());
        assert!(name("bad\u{7}bell").is_err());
    }

    #[test]
    fn role_parsing() {
        assert_eq!(role("host").unwrap(), Role::Host);
        assert_eq!(role("client").unwrap(), Role::Client);
        assert!(role("Host").is_err());
        assert!(role("admin").is_err());
    }

    #[test]
    fn upload_limits() {
        assert!(upload(1024, "audio/mpeg", 2048, "audio/").is_ok());
        assert!(matches!(
            upload(4096, "audio/mpeg", 2048, "audio/"),
            Err(TandemError::PayloadTooLarge { size: 4096, max: 2048 })
        ));
        assert!(matches!(
            upload(10, "video/mp4", 2048, "audio/"),
            Err(TandemError::PayloadWrongType(_))
        ));
    }
}
