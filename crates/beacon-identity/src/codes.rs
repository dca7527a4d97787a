//! Error codes and the user-facing message table.
//!
//! The REST API reports failures as `SCREAMING_SNAKE` codes, optionally
//! followed by ` : <detail>`. They are translated to the `auth/<kind>` form
//! the web SDK exposes so callers can match on one vocabulary.

/// Invalid arguments passed to an identity call.
pub const ARGUMENT_ERROR: &str = "auth/argument-error";
/// Malformed email address.
pub const INVALID_EMAIL: &str = "auth/invalid-email";
/// Sign-up with an address that already has an account.
pub const EMAIL_ALREADY_IN_USE: &str = "auth/email-already-in-use";
/// No account for the given email.
pub const USER_NOT_FOUND: &str = "auth/user-not-found";
/// The API key is missing or rejected.
pub const INVALID_API_KEY: &str = "auth/invalid-api-key";
/// Transport failure talking to the provider.
pub const NETWORK_REQUEST_FAILED: &str = "auth/network-request-failed";
/// The provider did not answer within the request timeout.
pub const TIMEOUT: &str = "auth/timeout";
/// Unexpected response or local persistence failure.
pub const INTERNAL_ERROR: &str = "auth/internal-error";

/// Translate a server error code to its `auth/<kind>` form.
///
/// Unknown codes are lower-cased with `_` replaced by `-`.
pub fn from_server_code(server_code: &str) -> String {
    let mapped = match server_code {
        "EMAIL_EXISTS" => EMAIL_ALREADY_IN_USE,
        "INVALID_EMAIL" => INVALID_EMAIL,
        "EMAIL_NOT_FOUND" => USER_NOT_FOUND,
        "INVALID_PASSWORD" => "auth/wrong-password",
        "INVALID_LOGIN_CREDENTIALS" | "INVALID_IDP_RESPONSE" => "auth/invalid-credential",
        "MISSING_PASSWORD" => "auth/missing-password",
        "WEAK_PASSWORD" => "auth/weak-password",
        "USER_DISABLED" => "auth/user-disabled",
        "TOO_MANY_ATTEMPTS_TRY_LATER" => "auth/too-many-requests",
        "OPERATION_NOT_ALLOWED" | "PASSWORD_LOGIN_DISABLED" => "auth/operation-not-allowed",
        "TOKEN_EXPIRED" | "USER_NOT_FOUND" => "auth/user-token-expired",
        "INVALID_REFRESH_TOKEN" | "INVALID_ID_TOKEN" => "auth/invalid-user-token",
        "CREDENTIAL_TOO_OLD_LOGIN_AGAIN" => "auth/requires-recent-login",
        "INVALID_API_KEY" | "API_KEY_INVALID" => INVALID_API_KEY,
        "UNAUTHORIZED_DOMAIN" => "auth/unauthorized-continue-uri",
        "INVALID_CONTINUE_URI" => "auth/invalid-continue-uri",
        "MISSING_CONTINUE_URI" => "auth/missing-continue-uri",
        other => return format!("auth/{}", other.to_lowercase().replace('_', "-")),
    };
    mapped.to_string()
}

/// Split `"WEAK_PASSWORD : Password should be at least 6 characters"` into
/// the code and its optional detail.
pub fn split_server_message(message: &str) -> (&str, Option<&str>) {
    match message.split_once(" : ") {
        Some((code, detail)) => (code.trim(), Some(detail.trim()).filter(|d| !d.is_empty())),
        None => (message.trim(), None),
    }
}

/// The message the provider SDK would report for `code`.
pub fn provider_message(code: &str, detail: Option<&str>) -> String {
    match detail {
        Some(detail) => format!("Firebase: {detail} ({code})."),
        None => format!("Firebase: Error ({code})."),
    }
}

/// Mapped user message for `code`, if the table has one.
pub fn mapped_user_message(code: &str) -> Option<&'static str> {
    match code {
        ARGUMENT_ERROR => Some("firebaseAuth.errors.argumentError"),
        INVALID_EMAIL => Some("firebaseAuth.errors.invalidEmail"),
        EMAIL_ALREADY_IN_USE => Some("firebaseAuth.errors.emailAlreadyInUse"),
        _ => None,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
