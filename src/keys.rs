//! Key builder: normalized server/client keys and store paths.
//!
//! DESIGN
//! ======
//! Operators see display names ("Server 1", "Client 2"); the store is keyed
//! by normalized keys ("server1", "client2"). Every path the store exposes is
//! built here so no caller interpolates path strings inline.

/// Root collection holding all server nodes.
pub const SERVERS_ROOT: &str = "servers";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyError {
    #[error("key is empty")]
    Empty,
    #[error("invalid key: {0}")]
    Invalid(String),
}

impl crate::frame::ErrorCode for KeyError {
    fn error_code(&self) -> &'static str {
        "E_INVALID_KEY"
    }
}

/// Normalize a display name or key: lowercase, all whitespace removed.
fn normalize(raw: &str) -> Result<String, KeyError> {
    let key: String = raw
        .chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect();
    if key.is_empty() {
        return Err(KeyError::Empty);
    }
    if !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
        return Err(KeyError::Invalid(raw.to_string()));
    }
    Ok(key)
}

/// `"Server 1"` → `"server1"`. Already-normalized keys pass through.
pub fn server_key(display: &str) -> Result<String, KeyError> {
    normalize(display)
}

/// `"Client 2"` → `"client2"`.
pub fn client_key(display: &str) -> Result<String, KeyError> {
    normalize(display)
}

#[must_use]
pub fn server_key_for(number: u32) -> String {
    format!("server{number}")
}

#[must_use]
pub fn client_key_for(number: u32) -> String {
    format!("client{number}")
}

/// `"server1"` → `"Server 1"`.
#[must_use]
pub fn server_display(key: &str) -> String {
    display_name(key)
}

/// `"client2"` → `"Client 2"`.
#[must_use]
pub fn client_display(key: &str) -> String {
    display_name(key)
}

/// Capitalize, then a space before the first digit run.
fn display_name(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 1);
    let mut chars = key.chars();
    if let Some(first) = chars.next() {
        out.extend(first.to_uppercase());
    }
    let mut spaced = false;
    for c in chars {
        if !spaced && c.is_ascii_digit() {
            out.push(' ');
            spaced = true;
        }
        out.push(c);
    }
    out
}

/// Trailing number of a key (`"client12"` → `12`), used for ordering.
#[must_use]
pub fn key_number(key: &str) -> Option<u32> {
    let digits: String = key.chars().skip_while(|c| !c.is_ascii_digit()).collect();
    match digits.parse() {
        Ok(n) => Some(n),
        Err(_) => None,
    }
}

// =============================================================================
// PATHS
// =============================================================================

#[must_use]
pub fn server_path(server: &str) -> String {
    format!("{SERVERS_ROOT}/{server}")
}

#[must_use]
pub fn mode_path(server: &str) -> String {
    format!("{SERVERS_ROOT}/{server}/mode")
}

#[must_use]
pub fn active_client_path(server: &str) -> String {
    format!("{SERVERS_ROOT}/{server}/client_id")
}

#[must_use]
pub fn data_session_path(server: &str) -> String {
    format!("{SERVERS_ROOT}/{server}/data")
}

#[must_use]
pub fn record_session_path(server: &str, client: &str) -> String {
    format!("{SERVERS_ROOT}/{server}/record/{client}")
}

#[cfg(test)]
#[path = "keys_test.rs"]
mod tests;
