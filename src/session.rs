//! Customer session and the admin gate.
//!
//! Sign-in posts credentials, verifies the cookie session actually took with
//! a `/api/users/me` probe, and caches the identity in the OS keyring so
//! protected pages can render without a round trip. The cached identity is a
//! convenience only — the backend authorizes every mutating request itself,
//! whatever the local flags say.

use serde_json::Value;
use tracing::{info, warn};
use zeroize::Zeroizing;

use crate::api::ApiClient;
use crate::data_helpers::normalize_phone;
use crate::storage;

// ---------------------------------------------------------------------------
// Identity shapes
// ---------------------------------------------------------------------------

/// Normalise a backend user payload into the cached identity shape:
/// `{id, name, firstName, lastName, email, phone}`. The display name falls
/// back through username → first+last → email, matching the header widget.
fn identity_from_profile(data: &Value) -> Value {
    let first = crate::value_str(data, &["firstName"]);
    let last = crate::value_str(data, &["lastName"]);
    let email = crate::value_str(data, &["email"]).unwrap_or_default();

    let name = crate::value_str(data, &["username"])
        .or_else(|| {
            first.as_deref().map(|f| match last.as_deref() {
                Some(l) => format!("{f} {l}"),
                None => f.to_string(),
            })
        })
        .unwrap_or_else(|| email.clone());

    serde_json::json!({
        "id": data.get("id").cloned().unwrap_or(Value::Null),
        "name": name,
        "firstName": first,
        "lastName": last,
        "email": email,
        "phone": crate::value_str(data, &["phone"]),
    })
}

/// Lightweight email shape check — enough to catch obvious typos before a
/// round trip; the backend does the real validation.
fn email_looks_valid(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.is_empty()
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !email.contains(char::is_whitespace)
}

// ---------------------------------------------------------------------------
// Customer sign-in / registration
// ---------------------------------------------------------------------------

/// Sign a customer in. On success the session cookie lives in the API
/// client's jar and the identity is cached locally; the returned value is
/// the cached identity shape.
pub async fn sign_in(api: &ApiClient, email: &str, password: String) -> Result<Value, String> {
    let password = Zeroizing::new(password);
    let email = email.trim();
    if email.is_empty() || password.is_empty() {
        return Err("Please enter your email and password".into());
    }

    let data = api
        .post(
            "/api/users/login",
            &serde_json::json!({ "email": email, "password": &*password }),
        )
        .await
        .map_err(|e| e.to_string())?;

    // Double-check the session cookie actually works before trusting it.
    let profile = api
        .get("/api/users/me")
        .await
        .map_err(|_| "Session verification failed".to_string())?;

    let identity = identity_from_profile(if profile.is_object() { &profile } else { &data });
    storage::remember_user(&identity)?;
    info!(email = %email, "customer signed in");
    Ok(identity)
}

/// Registration form fields. Phone is optional; everything else is required.
#[derive(Debug, Clone, Default)]
pub struct RegistrationForm {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub password: String,
    pub phone: String,
}

impl RegistrationForm {
    pub fn validate(&self) -> Result<(), String> {
        if self.first_name.trim().is_empty()
            || self.last_name.trim().is_empty()
            || self.email.trim().is_empty()
            || self.password.is_empty()
        {
            return Err("Please fill in all required fields".into());
        }
        if !email_looks_valid(self.email.trim()) {
            return Err("Please enter a valid email address".into());
        }
        Ok(())
    }
}

/// Register a new customer account (`POST /api/users/register`).
pub async fn register(api: &ApiClient, form: RegistrationForm) -> Result<(), String> {
    form.validate()?;
    let password = Zeroizing::new(form.password);

    api.post(
        "/api/users/register",
        &serde_json::json!({
            "firstName": form.first_name.trim(),
            "lastName": form.last_name.trim(),
            "email": form.email.trim(),
            "password": &*password,
            "phone": normalize_phone(&form.phone),
        }),
    )
    .await
    .map_err(|e| e.to_string())?;

    info!("customer registered");
    Ok(())
}

// ---------------------------------------------------------------------------
// Auth gate
// ---------------------------------------------------------------------------

/// Outcome of the protected-page gate.
#[derive(Debug, Clone, PartialEq)]
pub enum Gate {
    /// The identity to render with.
    Allowed(Value),
    /// No cached identity and the server probe failed: send the user to the
    /// sign-in entry point.
    SignInRequired,
}

/// The gate every protected page runs on load: cached identity wins, else
/// one authoritative `/api/users/me` probe whose result is cached for next
/// time, else a redirect to sign-in.
pub async fn require_user(api: &ApiClient) -> Gate {
    if let Some(user) = storage::cached_user() {
        return Gate::Allowed(user);
    }

    match api.get("/api/users/me").await {
        Ok(profile) if profile.is_object() => {
            let identity = identity_from_profile(&profile);
            if let Err(e) = storage::remember_user(&identity) {
                warn!("failed to cache probed identity: {e}");
            }
            Gate::Allowed(identity)
        }
        Ok(_) => Gate::SignInRequired,
        Err(e) => {
            warn!(error = %e, "session probe failed");
            Gate::SignInRequired
        }
    }
}

/// Drop the cached identity (the profile page's sign-out button).
pub fn sign_out() -> Result<(), String> {
    storage::clear_user()
}

// ---------------------------------------------------------------------------
// Admin gate
// ---------------------------------------------------------------------------

/// Sign into the admin console (`POST /api/admin/login`) and set the local
/// gate flags. The flags only gate console *navigation*; each admin request
/// is still authorized server-side.
pub async fn admin_sign_in(api: &ApiClient, username: &str, password: String) -> Result<(), String> {
    let password = Zeroizing::new(password);
    let username = username.trim();
    if username.is_empty() || password.is_empty() {
        return Err("Please enter both email and password".into());
    }

    api.post(
        "/api/admin/login",
        &serde_json::json!({ "username": username, "password": &*password }),
    )
    .await
    .map_err(|e| e.to_string())?;

    storage::set_admin_signed_in(username)?;
    info!(username = %username, "admin signed in");
    Ok(())
}

/// Whether the local admin gate flag is set.
pub fn admin_gate() -> bool {
    storage::admin_signed_in()
}

/// Clear the admin gate flags.
pub fn admin_sign_out() -> Result<(), String> {
    storage::clear_admin()
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_prefers_username_then_full_name_then_email() {
        let with_username = serde_json::json!({
            "id": 9, "username": "coach_dan", "firstName": "Dan",
            "lastName": "Reyes", "email": "dan@example.com"
        });
        assert_eq!(identity_from_profile(&with_username)["name"], "coach_dan");

        let with_names = serde_json::json!({
            "id": 9, "firstName": "Dan", "lastName": "Reyes",
            "email": "dan@example.com", "phone": "0917 555 0123"
        });
        let identity = identity_from_profile(&with_names);
        assert_eq!(identity["name"], "Dan Reyes");
        assert_eq!(identity["id"], 9);
        assert_eq!(identity["phone"], "0917 555 0123");

        let bare = serde_json::json!({ "id": 9, "email": "dan@example.com" });
        assert_eq!(identity_from_profile(&bare)["name"], "dan@example.com");
    }

    #[test]
    fn identity_handles_missing_last_name() {
        let data = serde_json::json!({ "id": 1, "firstName": "Dan", "email": "d@e.com" });
        assert_eq!(identity_from_profile(&data)["name"], "Dan");
    }

    #[test]
    fn email_shape_check() {
        assert!(email_looks_valid("dan@example.com"));
        assert!(email_looks_valid("a.b+c@mail.example.co"));
        assert!(!email_looks_valid("dan"));
        assert!(!email_looks_valid("dan@"));
        assert!(!email_looks_valid("@example.com"));
        assert!(!email_looks_valid("dan@example"));
        assert!(!email_looks_valid("dan@.com"));
        assert!(!email_looks_valid("dan @example.com"));
    }

    #[test]
    fn registration_form_validation() {
        let valid = RegistrationForm {
            first_name: "Dan".into(),
            last_name: "Reyes".into(),
            email: "dan@example.com".into(),
            password: "hunter22".into(),
            phone: String::new(),
        };
        assert!(valid.validate().is_ok());

        let mut missing = valid.clone();
        missing.last_name = String::new();
        assert!(missing.validate().is_err());

        let mut bad_email = valid;
        bad_email.email = "dan@example".into();
        assert!(bad_email.validate().is_err());
    }
}
