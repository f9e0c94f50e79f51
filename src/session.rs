//! Session persistence in the OS credential store.
//!
//! On Windows this uses DPAPI (via the `keyring` crate), on macOS Keychain,
//! and on Linux the Secret Service API. The stored value is the session
//! JSON; parsing back is tolerant about key spellings but fails closed on
//! missing token, user id, or role.

use keyring::Entry;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::db;

const SERVICE_NAME: &str = "storekeep";
const KEY_SESSION: &str = "session";

/// Roles allowed to operate this client. The same phone number may also
/// exist as a customer account; those must never produce a session here.
const STORE_OWNER_ROLES: &[&str] = &["store_owner", "shopkeeper"];

/// Returns `true` when `role` is a store-owner variant.
pub fn is_store_owner_role(role: &str) -> bool {
    STORE_OWNER_ROLES.contains(&role.trim().to_ascii_lowercase().as_str())
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionUser {
    pub id: String,
    pub name: String,
    pub role: String,
    pub is_activated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    pub token: String,
    pub user: SessionUser,
}

impl Session {
    /// Parse a session from a verify/login response body.
    ///
    /// The token may appear under `token`, `accessToken`, or `access_token`;
    /// the activation flag under `isActivated` or `is_activated`. Anything
    /// missing a token, user id, or role is treated as malformed.
    pub fn from_json(value: &Value, phone_fallback: Option<&str>) -> Result<Self, String> {
        let token = crate::value_str(value, &["token", "accessToken", "access_token"])
            .ok_or("Malformed auth response: missing token")?;
        let user = value
            .get("user")
            .ok_or("Malformed auth response: missing user")?;

        let id = crate::value_str(user, &["id", "userId", "user_id"])
            .ok_or("Malformed auth response: missing user id")?;
        let role = crate::value_str(user, &["role"])
            .ok_or("Malformed auth response: missing role")?;
        let name = crate::value_str(user, &["name"]).unwrap_or_default();
        let is_activated = user
            .get("isActivated")
            .or_else(|| user.get("is_activated"))
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let phone = crate::value_str(user, &["phone"])
            .or_else(|| phone_fallback.map(|p| p.to_string()));
        let email = crate::value_str(user, &["email"]);

        Ok(Self {
            token,
            user: SessionUser {
                id,
                name,
                role,
                is_activated,
                phone,
                email,
            },
        })
    }

    /// Enforce the store-owner role guard. A session for any other role is a
    /// configuration error, never a login.
    pub fn ensure_store_owner(self) -> Result<Self, String> {
        if is_store_owner_role(&self.user.role) {
            Ok(self)
        } else {
            Err(format!(
                "Account role '{}' cannot use the store dashboard. \
                 Sign in with a store-owner account.",
                self.user.role
            ))
        }
    }
}

// ---------------------------------------------------------------------------
// Keyring access
// ---------------------------------------------------------------------------

fn session_entry() -> Result<Entry, String> {
    Entry::new(SERVICE_NAME, KEY_SESSION).map_err(|e| format!("keyring entry: {e}"))
}

/// Persist the session. Overwrites any previous session.
pub fn save_session(session: &Session) -> Result<(), String> {
    let raw = serde_json::to_string(session).map_err(|e| format!("serialize session: {e}"))?;
    session_entry()?
        .set_password(&raw)
        .map_err(|e| format!("keyring write: {e}"))?;
    info!(user_id = %session.user.id, role = %session.user.role, "session saved");
    Ok(())
}

/// Load the persisted session, if any. A stored value that fails the role
/// guard (left over from an app that predates the guard) is discarded.
pub fn get_session() -> Option<Session> {
    let entry = match session_entry() {
        Ok(e) => e,
        Err(e) => {
            warn!(error = %e, "keyring: failed to create session entry");
            return None;
        }
    };
    let raw = match entry.get_password() {
        Ok(pw) => pw,
        Err(keyring::Error::NoEntry) => return None,
        Err(e) => {
            warn!(error = %e, "keyring: failed to read session");
            return None;
        }
    };
    let session: Session = match serde_json::from_str(&raw) {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, "stored session no longer parses, discarding");
            let _ = entry.delete_credential();
            return None;
        }
    };
    if !is_store_owner_role(&session.user.role) {
        warn!(role = %session.user.role, "stored session has non-owner role, discarding");
        let _ = entry.delete_credential();
        return None;
    }
    Some(session)
}

/// Remove the persisted session and clear the inventory caches, preventing
/// cross-user contamination when a different account signs in next.
pub fn clear_session(db: &db::DbState) -> Result<(), String> {
    match session_entry()?.delete_credential() {
        Ok(()) | Err(keyring::Error::NoEntry) => {}
        Err(e) => return Err(format!("keyring delete: {e}")),
    }
    db::clear_inventory_cache(db)?;
    info!("session and inventory cache cleared");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_login_shape_with_camel_case_activation() {
        let body = serde_json::json!({
            "mode": "login",
            "token": "jwt-abc",
            "user": {
                "id": "u1",
                "name": "Asha",
                "role": "store_owner",
                "isActivated": true,
                "email": "asha@example.com"
            }
        });
        let session = Session::from_json(&body, Some("+911234567890")).unwrap();
        assert_eq!(session.token, "jwt-abc");
        assert_eq!(session.user.id, "u1");
        assert!(session.user.is_activated);
        // phone absent from response, falls back to the number we verified
        assert_eq!(session.user.phone.as_deref(), Some("+911234567890"));
    }

    #[test]
    fn token_accepted_under_alternate_keys() {
        for key in ["token", "accessToken", "access_token"] {
            let body = serde_json::json!({
                key: "jwt-x",
                "user": { "id": "u1", "name": "A", "role": "shopkeeper" }
            });
            let session = Session::from_json(&body, None).unwrap();
            assert_eq!(session.token, "jwt-x");
        }
    }

    #[test]
    fn unknown_shape_fails_closed() {
        let body = serde_json::json!({ "jwt": "x", "user": { "id": "u1", "role": "store_owner" } });
        assert!(Session::from_json(&body, None).is_err());

        let body = serde_json::json!({ "token": "x" });
        assert!(Session::from_json(&body, None).is_err());

        let body = serde_json::json!({ "token": "x", "user": { "name": "no id", "role": "store_owner" } });
        assert!(Session::from_json(&body, None).is_err());
    }

    #[test]
    fn role_guard_refuses_customer_roles() {
        let body = serde_json::json!({
            "token": "jwt-abc",
            "user": { "id": "u1", "name": "A", "role": "customer" }
        });
        let err = Session::from_json(&body, None)
            .unwrap()
            .ensure_store_owner()
            .unwrap_err();
        assert!(err.contains("customer"), "error should name the role: {err}");

        assert!(is_store_owner_role("store_owner"));
        assert!(is_store_owner_role("Shopkeeper"));
        assert!(!is_store_owner_role("customer"));
        assert!(!is_store_owner_role("driver"));
    }
}
