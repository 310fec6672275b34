//! Key namespace.
//!
//! Singleton records live under fixed ASCII keys. User records live under
//! `user-<plexUserID>`, with the id appended verbatim. No singleton key may
//! begin with `USER_PREFIX`; that is checked at compile time below, so a
//! user key can never equal a singleton key and a `USER_PREFIX` scan never
//! yields a singleton record.

use plexaccess_common::{Error, Result};

/// Local symmetric key used to seal the upstream token.
pub const APP_SECRET: &[u8] = b"app-secret";

/// Sealed upstream token.
pub const PLEX_TOKEN: &[u8] = b"plex-token";

/// Pending authorization pin.
pub const PLEX_PIN: &[u8] = b"plex-pin";

/// Bound media server identity.
pub const PLEX_SERVER: &[u8] = b"plex-server";

/// Prefix of every user record key.
pub const USER_PREFIX: &[u8] = b"user-";

/// Reserved marker key. Nothing is written here.
pub const ALL_USERS: &[u8] = b"users";

/// Every fixed key in the namespace.
pub const SINGLETON_KEYS: [&[u8]; 5] = [APP_SECRET, PLEX_TOKEN, PLEX_PIN, PLEX_SERVER, ALL_USERS];

const fn has_prefix(key: &[u8], prefix: &[u8]) -> bool {
    if key.len() < prefix.len() {
        return false;
    }
    let mut i = 0;
    while i < prefix.len() {
        if key[i] != prefix[i] {
            return false;
        }
        i += 1;
    }
    true
}

const fn singletons_outside_user_prefix() -> bool {
    let mut i = 0;
    while i < SINGLETON_KEYS.len() {
        if has_prefix(SINGLETON_KEYS[i], USER_PREFIX) {
            return false;
        }
        i += 1;
    }
    true
}

const _: () = assert!(singletons_outside_user_prefix());

/// Build the record key for a user.
///
/// # Errors
/// - `Error::Validation` if `id` is empty; the bare prefix is not a user key
pub fn user_key(id: &str) -> Result<Vec<u8>> {
    if id.is_empty() {
        return Err(Error::Validation("id is required".to_string()));
    }

    let mut key = Vec::with_capacity(USER_PREFIX.len() + id.len());
    key.extend_from_slice(USER_PREFIX);
    key.extend_from_slice(id.as_bytes());
    Ok(key)
}

/// Render a key for log output.
pub fn display(key: &[u8]) -> String {
    String::from_utf8_lossy(key).into_owned()
}
