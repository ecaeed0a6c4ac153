//! Maps raw provider failures into the closed [`AuthErrorKind`] taxonomy.
//!
//! Structured error codes and HTTP status win; the message-substring
//! fallback exists only for providers that surface nothing better and is
//! confined to [`classify_message`] so it can be swapped without touching
//! call sites.

use super::types::{AuthError, AuthErrorKind, ProviderFailure};

/// Builds a classified [`AuthError`] from a provider failure.
pub(crate) fn auth_error(failure: &ProviderFailure) -> AuthError {
    let error = AuthError::new(classify(failure), failure.message.clone());
    match (failure.status, failure.code.as_deref()) {
        (Some(status), Some(code)) => error.with_details(format!("HTTP {status}, code {code}")),
        (Some(status), None) => error.with_details(format!("HTTP {status}")),
        (None, Some(code)) => error.with_details(format!("code {code}")),
        (None, None) => error,
    }
}

/// Classifies a provider failure into the closed taxonomy.
pub(crate) fn classify(failure: &ProviderFailure) -> AuthErrorKind {
    // Structured GoTrue error codes are authoritative when present.
    if let Some(code) = failure.code.as_deref() {
        match code {
            "invalid_credentials" | "invalid_grant" => return AuthErrorKind::InvalidCredentials,
            "user_already_exists" | "email_exists" | "phone_exists" => {
                return AuthErrorKind::DuplicateAccount;
            }
            "weak_password" => return AuthErrorKind::WeakPassword,
            _ => {}
        }
    }

    // An HTTP status means the provider was reached; fall back to its
    // documented message shapes before giving up on a closer category.
    if let Some(status) = failure.status {
        return match status {
            400 | 401 if failure.message.contains("Invalid login credentials") => {
                AuthErrorKind::InvalidCredentials
            }
            400 | 422 if failure.message.contains("already registered") => {
                AuthErrorKind::DuplicateAccount
            }
            400 | 422 if failure.message.contains("Password should be") => {
                AuthErrorKind::WeakPassword
            }
            _ => AuthErrorKind::ProviderRejected,
        };
    }

    classify_message(&failure.message)
}

/// Message-substring fallback for failures that carried no HTTP response.
/// Do not extend the marker set; prefer structured codes upstream.
fn classify_message(message: &str) -> AuthErrorKind {
    const NETWORK_MARKERS: [&str; 4] = ["Network", "fetch", "abort", "timeout"];
    if NETWORK_MARKERS.iter().any(|m| message.contains(m)) {
        AuthErrorKind::NetworkUnreachable
    } else {
        AuthErrorKind::Unknown
    }
}
