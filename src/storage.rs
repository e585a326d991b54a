//! Cached identity and shop configuration in the OS credential store.
//!
//! On Windows this uses DPAPI (via the `keyring` crate), on macOS Keychain,
//! and on Linux the Secret Service API. This replaces the browser build's
//! localStorage entries (`currentUser`, `adminLoggedIn`, `adminUser`): the
//! backend stays the sole authority for authorization, these entries are a
//! convenience cache so pages can render without a round trip.

use keyring::Entry;
use serde_json::Value;
use tracing::{info, warn};

const SERVICE_NAME: &str = "gearshed-shop";

// Credential keys
const KEY_STORE_URL: &str = "store_url";
const KEY_CURRENT_USER: &str = "current_user";
const KEY_ADMIN_LOGGED_IN: &str = "admin_logged_in";
const KEY_ADMIN_USER: &str = "admin_user";

/// All credential keys managed by this module.
const ALL_KEYS: &[&str] = &[
    KEY_STORE_URL,
    KEY_CURRENT_USER,
    KEY_ADMIN_LOGGED_IN,
    KEY_ADMIN_USER,
];

// ---------------------------------------------------------------------------
// Low-level helpers
// ---------------------------------------------------------------------------

/// Retrieve a single credential from the OS keyring. Returns `None` when the
/// entry does not exist (or the platform returns a "not found" error).
pub fn get_credential(key: &str) -> Option<String> {
    let entry = match Entry::new(SERVICE_NAME, key) {
        Ok(e) => e,
        Err(e) => {
            warn!(key, error = %e, "keyring: failed to create entry");
            return None;
        }
    };
    match entry.get_password() {
        Ok(pw) => Some(pw),
        Err(keyring::Error::NoEntry) => None,
        Err(e) => {
            warn!(key, error = %e, "keyring: failed to read credential");
            None
        }
    }
}

/// Store a credential in the OS keyring.
pub fn set_credential(key: &str, value: &str) -> Result<(), String> {
    let entry = Entry::new(SERVICE_NAME, key).map_err(|e| e.to_string())?;
    entry.set_password(value).map_err(|e| e.to_string())?;
    Ok(())
}

/// Delete a credential from the OS keyring. Silently succeeds if the entry
/// does not exist.
pub fn delete_credential(key: &str) -> Result<(), String> {
    let entry = Entry::new(SERVICE_NAME, key).map_err(|e| e.to_string())?;
    match entry.delete_credential() {
        Ok(()) => Ok(()),
        Err(keyring::Error::NoEntry) => Ok(()),
        Err(e) => Err(e.to_string()),
    }
}

pub fn has_credential(key: &str) -> bool {
    get_credential(key).is_some()
}

// ---------------------------------------------------------------------------
// Shop configuration
// ---------------------------------------------------------------------------

/// The client is considered configured when a store URL is present.
pub fn is_configured() -> bool {
    has_credential(KEY_STORE_URL)
}

/// Backend base URL, e.g. `https://shop.gearshed.shop`.
pub fn store_url() -> Option<String> {
    get_credential(KEY_STORE_URL)
}

/// Persist the backend base URL (already normalised by the API layer).
pub fn set_store_url(url: &str) -> Result<(), String> {
    let trimmed = url.trim();
    if trimmed.is_empty() {
        return Err("Store URL cannot be empty".into());
    }
    set_credential(KEY_STORE_URL, trimmed)
}

// ---------------------------------------------------------------------------
// Customer session cache
// ---------------------------------------------------------------------------

/// Cache the signed-in user's identity JSON.
pub fn remember_user(user: &Value) -> Result<(), String> {
    let serialized =
        serde_json::to_string(user).map_err(|e| format!("serialize cached user: {e}"))?;
    set_credential(KEY_CURRENT_USER, &serialized)
}

/// The cached signed-in user, or `None` when absent. A malformed cached
/// entry is treated as absent (and removed) rather than surfaced.
pub fn cached_user() -> Option<Value> {
    let raw = get_credential(KEY_CURRENT_USER)?;
    match serde_json::from_str::<Value>(&raw) {
        Ok(user) if user.is_object() => Some(user),
        _ => {
            warn!("cached user entry is malformed, clearing it");
            let _ = delete_credential(KEY_CURRENT_USER);
            None
        }
    }
}

/// Drop the cached user (sign-out).
pub fn clear_user() -> Result<(), String> {
    delete_credential(KEY_CURRENT_USER)
}

// ---------------------------------------------------------------------------
// Admin gate cache
// ---------------------------------------------------------------------------

/// Mark the admin console as unlocked for this machine. Not a security
/// boundary: every admin request is still authorized server-side.
pub fn set_admin_signed_in(username: &str) -> Result<(), String> {
    set_credential(KEY_ADMIN_LOGGED_IN, "true")?;
    set_credential(KEY_ADMIN_USER, username)
}

/// Whether the local admin gate flag is set.
pub fn admin_signed_in() -> bool {
    get_credential(KEY_ADMIN_LOGGED_IN).as_deref() == Some("true")
}

/// The cached admin username, if the gate flag is set.
pub fn admin_user() -> Option<String> {
    if !admin_signed_in() {
        return None;
    }
    get_credential(KEY_ADMIN_USER)
}

/// Clear the admin gate flag and cached username.
pub fn clear_admin() -> Result<(), String> {
    delete_credential(KEY_ADMIN_LOGGED_IN)?;
    delete_credential(KEY_ADMIN_USER)
}

/// Delete every stored credential (factory reset).
pub fn factory_reset() -> Result<(), String> {
    info!("performing factory reset – deleting all credentials");
    for key in ALL_KEYS {
        delete_credential(key)?;
    }
    Ok(())
}
