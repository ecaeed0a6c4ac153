//! Session and error types shared across the auth machinery.

use std::fmt;

use chrono::{DateTime, Utc};
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Proof of an authenticated principal with a validity window.
///
/// A session is either fully present or absent (`Option<Session>`); partial
/// or corrupt sessions are never modeled. Provider errors while fetching a
/// session surface as "absent plus an error", not as a malformed session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Opaque identifier of the authenticated principal.
    pub principal_id: String,
    /// Email the principal signed in with, when the provider reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Start of the validity window, as supplied by the provider.
    pub issued_at: DateTime<Utc>,
    /// End of the validity window, as supplied by the provider.
    pub expires_at: DateTime<Utc>,
    /// Bearer token for data and storage calls.
    pub access_token: String,
    /// Long-lived token used to obtain a fresh access token.
    pub refresh_token: String,
    /// Provider-specific payload, stored and forwarded without interpretation.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub raw: Value,
}

impl Session {
    /// Returns true if the validity window has elapsed.
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

/// Client-visible authentication status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthStatus {
    /// Process start, before the first session-restore attempt completes.
    Initializing,
    Authenticated,
    Unauthenticated,
}

impl fmt::Display for AuthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthStatus::Initializing => write!(f, "initializing"),
            AuthStatus::Authenticated => write!(f, "authenticated"),
            AuthStatus::Unauthenticated => write!(f, "unauthenticated"),
        }
    }
}

/// The authoritative client-visible auth state.
///
/// `status` is always derived from `session` presence inside the store's
/// mutation path; the two cannot disagree.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionState {
    pub status: AuthStatus,
    pub session: Option<Session>,
    /// Most recent classified failure, cleared at the start of the next
    /// identity operation.
    pub last_error: Option<AuthError>,
    /// Set after a password-reset link was dispatched; consumed by the UI to
    /// show the confirmation state.
    pub reset_link_sent: bool,
}

impl SessionState {
    /// The state a store starts in at process start.
    pub fn initial() -> Self {
        Self {
            status: AuthStatus::Initializing,
            session: None,
            last_error: None,
            reset_link_sent: false,
        }
    }
}

/// Categories of identity-operation failures (closed set).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthErrorKind {
    /// Wrong email/password combination.
    InvalidCredentials,
    /// Registration against an email that already has an account.
    DuplicateAccount,
    /// Password rejected by the provider's strength policy.
    WeakPassword,
    /// Could not reach the provider (connect failure, timeout).
    NetworkUnreachable,
    /// Account was created but the secondary profile record could not be
    /// written. Non-fatal.
    ProfileProvisioningFailed,
    /// The provider answered with an error not covered by a closer category.
    ProviderRejected,
    Unknown,
}

impl fmt::Display for AuthErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthErrorKind::InvalidCredentials => write!(f, "invalid_credentials"),
            AuthErrorKind::DuplicateAccount => write!(f, "duplicate_account"),
            AuthErrorKind::WeakPassword => write!(f, "weak_password"),
            AuthErrorKind::NetworkUnreachable => write!(f, "network_unreachable"),
            AuthErrorKind::ProfileProvisioningFailed => write!(f, "profile_provisioning_failed"),
            AuthErrorKind::ProviderRejected => write!(f, "provider_rejected"),
            AuthErrorKind::Unknown => write!(f, "unknown"),
        }
    }
}

/// Classified error from an identity operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthError {
    /// Error category
    pub kind: AuthErrorKind,
    /// One-line summary suitable for display
    pub message: String,
    /// Optional additional details (e.g., provider status/code)
    pub details: Option<String>,
}

impl AuthError {
    /// Creates a new auth error.
    pub fn new(kind: AuthErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: None,
        }
    }

    /// Attaches detail text.
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AuthError {}

/// Result type for identity operations. Exactly one of success value or
/// classified error; no exception escapes this boundary.
pub type AuthResult<T> = std::result::Result<T, AuthError>;

/// Raw failure surfaced by an external collaborator.
///
/// Providers are not assumed to share a code taxonomy; message-only failures
/// must be tolerated. Classification into [`AuthErrorKind`] happens in one
/// place (`auth::classify`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderFailure {
    /// HTTP status, when the failure came from an HTTP response.
    pub status: Option<u16>,
    /// Structured error code, when the provider supplied one.
    pub code: Option<String>,
    pub message: String,
}

impl ProviderFailure {
    /// Creates a message-only failure.
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            status: None,
            code: None,
            message: message.into(),
        }
    }

    /// Creates a failure from an HTTP error response.
    pub fn http(status: u16, code: Option<String>, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            code,
            message: message.into(),
        }
    }

    /// Creates a failure from a transport-level error (no HTTP response).
    ///
    /// The message is prefixed the way the original client rewrote fetch
    /// failures, so the message-based classifier fallback recognizes it.
    pub fn from_transport(error: &reqwest::Error) -> Self {
        Self::message(format!("Network request failed: {error}"))
    }
}

impl fmt::Display for ProviderFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ProviderFailure {}

/// Stream of provider-pushed session changes (token refresh, external
/// sign-out, invalidation from another device).
pub type SessionStream = BoxStream<'static, Option<Session>>;
