//! Phone/OTP authentication handshake.
//!
//! Two-step flow against the backend: `start_phone_verification` sends the
//! OTP and returns a verification session id, `verify_otp` exchanges the
//! code for either a logged-in session or a signup invitation. The backend
//! has grown a second generation of auth routes under `/api/auth/`; when the
//! classic path is gone (404) the call is retried once against the newer
//! path so the client works against either deployment.
//!
//! Every outcome that carries a user passes through the store-owner role
//! guard; a verified customer account is a configuration error, not a login.

use serde_json::{json, Value};
use tracing::{info, warn};

use crate::api::{ApiError, Backend};
use crate::session::Session;

/// Result of `start_phone_verification`.
#[derive(Debug, Clone, PartialEq)]
pub struct OtpChallenge {
    /// Opaque verification session id, echoed back in `verify_otp`.
    pub session_id: String,
    /// Whether an account already exists for this phone number.
    pub exists: bool,
}

/// Result of `verify_otp`.
#[derive(Debug, Clone)]
pub enum VerifyOutcome {
    /// Existing account - a session is ready (caller persists it).
    LoggedIn(Session),
    /// New phone number - the caller should run store-owner signup.
    SignupRequired,
}

/// Call `path`, retrying once against `fallback_path` when the primary path
/// does not exist on this deployment.
async fn post_with_fallback(
    backend: &Backend,
    path: &str,
    fallback_path: &str,
    body: &Value,
) -> Result<Value, ApiError> {
    match backend.post(path, None, body).await {
        Err(e) if e.is_not_found() => {
            info!(path, fallback_path, "auth path missing, using newer variant");
            backend.post(fallback_path, None, body).await
        }
        other => other,
    }
}

/// Send an OTP to `phone` (E.164, e.g. `+911234567890`).
///
/// Also used as the resend call; the backend invalidates prior codes.
pub async fn start_phone_verification(
    backend: &Backend,
    phone: &str,
) -> Result<OtpChallenge, String> {
    let phone = phone.trim();
    if phone.is_empty() {
        return Err("Phone number is required".into());
    }

    let body = json!({ "phone": phone });
    let resp = post_with_fallback(backend, "/auth/phone/start", "/api/auth/send-otp", &body)
        .await
        .map_err(|e| e.to_string())?;

    let session_id = crate::value_str(&resp, &["sessionId", "session_id"])
        .ok_or("Malformed auth response: missing session id")?;
    let exists = resp
        .get("exists")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    info!(exists, "OTP verification started");
    Ok(OtpChallenge { session_id, exists })
}

/// Exchange the OTP for a session (existing account) or a signup invitation
/// (new phone number).
pub async fn verify_otp(
    backend: &Backend,
    phone: &str,
    otp: &str,
    session_id: &str,
) -> Result<VerifyOutcome, String> {
    let body = json!({
        "phone": phone,
        "sessionId": session_id,
        "otp": otp,
    });
    let resp = post_with_fallback(backend, "/auth/phone/verify", "/api/auth/verify-otp", &body)
        .await
        .map_err(|e| e.to_string())?;

    match crate::value_str(&resp, &["mode"]).as_deref() {
        Some("signup") => Ok(VerifyOutcome::SignupRequired),
        Some("login") => {
            let session = Session::from_json(&resp, Some(phone))?.ensure_store_owner()?;
            Ok(VerifyOutcome::LoggedIn(session))
        }
        other => {
            warn!(mode = ?other, "unexpected verify response mode");
            // Some deployments omit `mode` on login responses; a parseable
            // session is still a login, anything else fails closed.
            if let Ok(session) = Session::from_json(&resp, Some(phone)) {
                return Ok(VerifyOutcome::LoggedIn(session.ensure_store_owner()?));
            }
            Err("Unexpected response from server".into())
        }
    }
}

/// Password login with an email or phone identifier.
pub async fn login_with_password(
    backend: &Backend,
    identifier: &str,
    password: &str,
) -> Result<Session, String> {
    let body = json!({
        "email": identifier.trim(),
        "password": password,
    });
    let resp = backend
        .post("/auth/password/login", None, &body)
        .await
        .map_err(|e| match e {
            ApiError::Business { ref message } if message == "INVALID_CREDENTIALS" => {
                "Incorrect email/phone or password".to_string()
            }
            other => other.to_string(),
        })?;

    Session::from_json(&resp, None)?.ensure_store_owner()
}

/// Store-owner signup details collected after a first-time OTP verification.
#[derive(Debug, Clone)]
pub struct SignupDetails {
    pub phone: String,
    pub owner_name: String,
    pub store_name: String,
    pub store_address: String,
    pub radius_km: f64,
    pub email: String,
    pub password: String,
    pub latitude: f64,
    pub longitude: f64,
}

/// Complete store-owner signup. Creates the account and its store; returns
/// the new session when the backend includes one.
pub async fn register_store_owner(
    backend: &Backend,
    details: &SignupDetails,
) -> Result<Option<Session>, String> {
    let body = json!({
        "phone": details.phone,
        "ownerName": details.owner_name.trim(),
        "storeName": details.store_name.trim(),
        "storeAddress": details.store_address,
        "radiusKm": details.radius_km,
        "email": details.email.trim().to_lowercase(),
        "password": details.password,
        "latitude": details.latitude,
        "longitude": details.longitude,
    });
    let resp = backend
        .post("/store-owner/signup/complete", None, &body)
        .await
        .map_err(|e| e.to_string())?;

    match Session::from_json(&resp, Some(&details.phone)) {
        Ok(session) => Ok(Some(session.ensure_store_owner()?)),
        // Signup succeeded but the backend wants a fresh login
        Err(_) => Ok(None),
    }
}
