//! GoTrue endpoint wiring: sign-up, the password and refresh grants,
//! logout, recovery mail, and session restoration.

use serde_json::{Value, json};
use tracing::warn;

use crate::auth::{ProviderFailure, Session};
use crate::provider::{SignUpRequest, SignUpResponse};

use super::SupabaseClient;

impl SupabaseClient {
    fn auth_url(&self, path: &str) -> String {
        format!("{}/auth/v1/{path}", self.base())
    }

    pub(super) async fn sign_up_request(
        &self,
        request: SignUpRequest,
    ) -> Result<SignUpResponse, ProviderFailure> {
        let response = self
            .http
            .post(self.auth_url("signup"))
            .json(&json!({
                "email": request.email,
                "password": request.password,
                "data": request.metadata,
            }))
            .send()
            .await
            .map_err(|e| ProviderFailure::from_transport(&e))?;
        if !response.status().is_success() {
            return Err(Self::failure_from_response(response).await);
        }
        let payload: Value = response
            .json()
            .await
            .map_err(|e| ProviderFailure::message(format!("Failed to parse sign-up response: {e}")))?;

        // With email confirmation enabled GoTrue returns the bare user
        // object and no tokens; the account exists but cannot act yet.
        if payload.get("access_token").is_some() {
            let session = Self::session_from_payload(&payload)?;
            self.remember_session(&session);
            return Ok(SignUpResponse {
                principal_id: session.principal_id.clone(),
                email: session.email.clone(),
                session: Some(session),
            });
        }

        let user = if payload.get("id").is_some() {
            &payload
        } else {
            payload.get("user").unwrap_or(&Value::Null)
        };
        let principal_id = user
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                ProviderFailure::message("Failed to parse sign-up response: missing user id")
            })?
            .to_string();
        let email = user
            .get("email")
            .and_then(Value::as_str)
            .map(ToString::to_string);
        Ok(SignUpResponse {
            principal_id,
            email,
            session: None,
        })
    }

    pub(super) async fn password_grant(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Session, ProviderFailure> {
        let response = self
            .http
            .post(self.auth_url("token"))
            .query(&[("grant_type", "password")])
            .json(&json!({ "email": email, "password": password }))
            .send()
            .await
            .map_err(|e| ProviderFailure::from_transport(&e))?;
        if !response.status().is_success() {
            return Err(Self::failure_from_response(response).await);
        }
        let payload: Value = response
            .json()
            .await
            .map_err(|e| ProviderFailure::message(format!("Failed to parse token response: {e}")))?;
        Self::session_from_payload(&payload)
    }

    async fn refresh_grant(&self, refresh_token: &str) -> Result<Session, ProviderFailure> {
        let response = self
            .http
            .post(self.auth_url("token"))
            .query(&[("grant_type", "refresh_token")])
            .json(&json!({ "refresh_token": refresh_token }))
            .send()
            .await
            .map_err(|e| ProviderFailure::from_transport(&e))?;
        if !response.status().is_success() {
            return Err(Self::failure_from_response(response).await);
        }
        let payload: Value = response
            .json()
            .await
            .map_err(|e| ProviderFailure::message(format!("Failed to parse token response: {e}")))?;
        Self::session_from_payload(&payload)
    }

    pub(super) async fn logout_request(&self, access_token: &str) -> Result<(), ProviderFailure> {
        let response = self
            .http
            .post(self.auth_url("logout"))
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| ProviderFailure::from_transport(&e))?;
        if !response.status().is_success() {
            return Err(Self::failure_from_response(response).await);
        }
        Ok(())
    }

    pub(super) async fn recover_request(
        &self,
        email: &str,
        redirect_to: Option<&str>,
    ) -> Result<(), ProviderFailure> {
        let mut request = self
            .http
            .post(self.auth_url("recover"))
            .json(&json!({ "email": email }));
        if let Some(redirect_to) = redirect_to {
            request = request.query(&[("redirect_to", redirect_to)]);
        }
        let response = request
            .send()
            .await
            .map_err(|e| ProviderFailure::from_transport(&e))?;
        if !response.status().is_success() {
            return Err(Self::failure_from_response(response).await);
        }
        Ok(())
    }

    /// Restores the signed-in session: memory first, then the on-disk
    /// cache, refreshing through GoTrue when the access token has expired.
    pub(super) async fn restore_session(&self) -> Result<Option<Session>, ProviderFailure> {
        let remembered = self.lock_current().clone();
        let session = match remembered {
            Some(session) => Some(session),
            None => match self.cache.load() {
                Ok(session) => session,
                Err(error) => {
                    // An unreadable cache means no session, not a hard
                    // failure; the next sign-in rewrites it.
                    warn!("Failed to load persisted session: {error:#}");
                    None
                }
            },
        };
        let Some(session) = session else {
            return Ok(None);
        };

        if !session.is_expired() {
            *self.lock_current() = Some(session.clone());
            return Ok(Some(session));
        }

        match self.refresh_grant(&session.refresh_token).await {
            Ok(fresh) => {
                self.remember_session(&fresh);
                Ok(Some(fresh))
            }
            // The backend answered and rejected the refresh token: the
            // session is gone for good.
            Err(failure) if failure.status.is_some() => {
                self.forget_session();
                Ok(None)
            }
            // Transport-level failures stay errors so callers can tell
            // "signed out" from "unreachable".
            Err(failure) => Err(failure),
        }
    }
}
