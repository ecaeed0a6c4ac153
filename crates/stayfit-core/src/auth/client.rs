//! Identity operations: sign-up, sign-in, sign-out, password reset.
//!
//! Every operation runs through the same shape: raise the busy guard, race
//! the provider call against the request timeout, classify any failure, and
//! commit exactly one transition to the session store. No failure escapes as
//! a panic; callers inspect the returned result.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::{Value, json};
use tracing::warn;

use crate::config::{Config, RESET_REDIRECT};
use crate::provider::{DataBackend, IdentityProvider, SignUpRequest};

use super::classify;
use super::store::{SessionStore, StateChange};
use super::types::{AuthError, AuthErrorKind, AuthResult, ProviderFailure, Session};

/// Tunables for identity operations.
#[derive(Debug, Clone)]
pub struct AuthOptions {
    /// Race applied to every provider call; elapsing resolves the operation
    /// as `NetworkUnreachable`.
    pub request_timeout: Duration,
    /// Client-side cooldown between password-reset dispatches, independent
    /// of server-side throttling.
    pub resend_cooldown: Duration,
    /// Deep link embedded in the password-reset email.
    pub reset_redirect: Option<String>,
}

impl Default for AuthOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(15),
            resend_cooldown: Duration::from_secs(60),
            reset_redirect: Some(RESET_REDIRECT.to_string()),
        }
    }
}

impl AuthOptions {
    /// Derives options from the loaded client configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            request_timeout: config.request_timeout(),
            resend_cooldown: config.reset_resend_cooldown(),
            reset_redirect: Some(RESET_REDIRECT.to_string()),
        }
    }
}

/// Successful registration outcome.
///
/// `session` is absent for confirmation-gated sign-ups; `warning` carries a
/// non-fatal `ProfileProvisioningFailed` when the account exists but the
/// profile record could not be written.
#[derive(Debug, Clone)]
pub struct SignUpOutcome {
    pub session: Option<Session>,
    pub warning: Option<AuthError>,
}

/// Result of a password-reset request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResetDispatch {
    /// The provider dispatched a reset link.
    Sent,
    /// Rejected client-side: a link went out less than the cooldown ago.
    /// No provider call was made.
    CooldownActive { remaining: Duration },
}

/// Front door for identity operations. Owns nothing but references: the
/// store and collaborators are injected, so tests build isolated instances.
pub struct AuthClient {
    provider: Arc<dyn IdentityProvider>,
    backend: Arc<dyn DataBackend>,
    store: SessionStore,
    options: AuthOptions,
    /// Per-email timestamps of the last successful reset dispatch.
    reset_sent: Mutex<HashMap<String, Instant>>,
}

impl AuthClient {
    pub fn new(
        provider: Arc<dyn IdentityProvider>,
        backend: Arc<dyn DataBackend>,
        store: SessionStore,
        options: AuthOptions,
    ) -> Self {
        Self {
            provider,
            backend,
            store,
            options,
            reset_sent: Mutex::new(HashMap::new()),
        }
    }

    /// The store this client mutates. UI subscribes here.
    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Registers a new account. Metadata (name, …) is forwarded opaquely to
    /// the provider. On success with a principal, a corresponding profile
    /// record is created; if that secondary call fails the operation still
    /// succeeds and the warning is surfaced in the outcome and `last_error`.
    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: Value,
    ) -> AuthResult<SignUpOutcome> {
        let _busy = self.store.begin_operation();

        let request = SignUpRequest {
            email: email.to_string(),
            password: password.to_string(),
            metadata: metadata.clone(),
        };
        let response = match self.with_timeout(self.provider.sign_up(request)).await {
            Ok(response) => response,
            Err(failure) => {
                let error = classify::auth_error(&failure);
                warn!("Error signing up: {}", failure.message);
                self.store
                    .apply(StateChange::new().session(None).error(error.clone()));
                return Err(error);
            }
        };

        let warning = match self.provision_profile(&response.principal_id, email, &metadata).await
        {
            Ok(()) => None,
            Err(failure) => {
                warn!("Error creating user profile: {}", failure.message);
                Some(
                    AuthError::new(
                        AuthErrorKind::ProfileProvisioningFailed,
                        format!("Account created, but the profile could not be saved: {failure}"),
                    )
                    .with_details(failure.message),
                )
            }
        };

        let mut change = StateChange::new().session(response.session.clone());
        change = match &warning {
            Some(warning) => change.error(warning.clone()),
            None => change.clear_error(),
        };
        self.store.apply(change);

        Ok(SignUpOutcome {
            session: response.session,
            warning,
        })
    }

    /// Verifies credentials and stores the issued session. No partial
    /// session is ever stored on failure.
    pub async fn sign_in(&self, email: &str, password: &str) -> AuthResult<Session> {
        let _busy = self.store.begin_operation();

        match self
            .with_timeout(self.provider.sign_in_with_password(email, password))
            .await
        {
            Ok(session) => {
                self.store
                    .apply(StateChange::new().session(Some(session.clone())).clear_error());
                Ok(session)
            }
            Err(failure) => {
                let error = classify::auth_error(&failure);
                warn!("Error signing in: {}", failure.message);
                self.store
                    .apply(StateChange::new().session(None).error(error.clone()));
                Err(error)
            }
        }
    }

    /// Revokes the session. Local state clears unconditionally: losing the
    /// ability to sign out on a network blip is worse than a stale remote
    /// session, so a remote failure is only surfaced via `last_error` and
    /// the returned result.
    pub async fn sign_out(&self) -> AuthResult<()> {
        let _busy = self.store.begin_operation();

        match self.with_timeout(self.provider.sign_out()).await {
            Ok(()) => {
                self.store.apply(StateChange::new().session(None).clear_error());
                Ok(())
            }
            Err(failure) => {
                let error = classify::auth_error(&failure);
                warn!("Error signing out: {}", failure.message);
                self.store
                    .apply(StateChange::new().session(None).error(error.clone()));
                Err(error)
            }
        }
    }

    /// Requests a password-reset link. Never changes the auth status; only
    /// `last_error` and the `reset_link_sent` flag move. Resend is disabled
    /// client-side for the cooldown window after each successful dispatch.
    pub async fn reset_password(&self, email: &str) -> AuthResult<ResetDispatch> {
        if let Some(remaining) = self.cooldown_remaining(email) {
            return Ok(ResetDispatch::CooldownActive { remaining });
        }

        let _busy = self.store.begin_operation();

        let redirect = self.options.reset_redirect.as_deref();
        match self
            .with_timeout(self.provider.send_password_reset(email, redirect))
            .await
        {
            Ok(()) => {
                self.reset_sent
                    .lock()
                    .expect("reset cooldown lock poisoned")
                    .insert(email.to_string(), Instant::now());
                self.store
                    .apply(StateChange::new().reset_link_sent(true).clear_error());
                Ok(ResetDispatch::Sent)
            }
            Err(failure) => {
                let error = classify::auth_error(&failure);
                warn!("Error resetting password: {}", failure.message);
                self.store
                    .apply(StateChange::new().reset_link_sent(false).error(error.clone()));
                Err(error)
            }
        }
    }

    /// Remaining cooldown for this email, if one is active. Elapsed entries
    /// are pruned so the map does not grow with every address ever typed.
    fn cooldown_remaining(&self, email: &str) -> Option<Duration> {
        let mut sent = self.reset_sent.lock().expect("reset cooldown lock poisoned");
        sent.retain(|_, at| at.elapsed() < self.options.resend_cooldown);
        sent.get(email)
            .map(|at| self.options.resend_cooldown.saturating_sub(at.elapsed()))
            .filter(|remaining| !remaining.is_zero())
    }

    /// Creates the profile record matching a fresh principal.
    async fn provision_profile(
        &self,
        principal_id: &str,
        email: &str,
        metadata: &Value,
    ) -> Result<(), ProviderFailure> {
        let name = metadata
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or("User");
        let record = json!({
            "id": principal_id,
            "name": name,
            "email": email,
            "created_at": Utc::now().to_rfc3339(),
        });
        self.with_timeout(self.backend.create_record("profiles", record))
            .await
            .map(|_| ())
    }

    /// Races a provider call against the request timeout. The provider's
    /// own request is not aborted; the operation simply resolves first.
    async fn with_timeout<T>(
        &self,
        call: impl Future<Output = Result<T, ProviderFailure>> + Send,
    ) -> Result<T, ProviderFailure> {
        match tokio::time::timeout(self.options.request_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(ProviderFailure::message(format!(
                "timeout: no response within {:.0?}",
                self.options.request_timeout
            ))),
        }
    }
}
