//! Supabase-backed collaborator implementation.
//!
//! One HTTP client covering the three Supabase surfaces the app consumes:
//! GoTrue (`/auth/v1`), PostgREST (`/rest/v1`) and Storage (`/storage/v1`).
//! All requests carry the anon key and the configured timeout; failures are
//! surfaced as [`ProviderFailure`] with whatever structured code the backend
//! reported, so classification stays out of this layer.

mod auth;
mod cache;
mod rest;
mod storage;

pub use cache::SessionCache;

use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::warn;

use crate::auth::{ProviderFailure, Session, SessionStream};
use crate::config::{Config, paths};
use crate::provider::{DataBackend, IdentityProvider, ObjectInfo, SignUpRequest, SignUpResponse};

/// Capacity of the session-change fan-out channel. Changes are rare (sign
/// in/out, token refresh); a small buffer is plenty.
const CHANGE_CHANNEL_CAPACITY: usize = 16;

/// Client for a Supabase project.
pub struct SupabaseClient {
    config: Config,
    http: reqwest::Client,
    cache: SessionCache,
    /// In-memory copy of the persisted session; source of the bearer token
    /// for data and storage calls.
    current: Mutex<Option<Session>>,
    changes: broadcast::Sender<Option<Session>>,
}

impl SupabaseClient {
    /// Creates a client persisting its session under the default home
    /// directory.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(config: Config) -> Result<Self> {
        Self::with_session_path(config, paths::session_path())
    }

    /// Creates a client persisting its session at a specific path.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn with_session_path(config: Config, session_path: PathBuf) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "apikey",
            HeaderValue::from_str(&config.supabase_anon_key)
                .context("Supabase anon key is not a valid header value")?,
        );
        headers.insert("x-app-name", HeaderValue::from_static("StayFit"));
        headers.insert("x-app-version", HeaderValue::from_static("1.0.0"));
        headers.insert(
            "x-platform",
            HeaderValue::from_static(std::env::consts::OS),
        );

        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .default_headers(headers)
            .build()
            .context("Failed to build HTTP client")?;

        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Ok(Self {
            config,
            http,
            cache: SessionCache::new(session_path),
            current: Mutex::new(None),
            changes,
        })
    }

    fn base(&self) -> &str {
        self.config.supabase_url.trim_end_matches('/')
    }

    /// Bearer token for data and storage calls: the signed-in principal's
    /// access token when present, the anon key otherwise.
    pub(super) fn bearer_token(&self) -> String {
        self.lock_current()
            .as_ref()
            .map_or_else(|| self.config.supabase_anon_key.clone(), |s| s.access_token.clone())
    }

    /// Adopts a freshly issued session: memory, disk, and change stream.
    fn remember_session(&self, session: &Session) {
        *self.lock_current() = Some(session.clone());
        if let Err(error) = self.cache.save(session) {
            warn!("Failed to persist session: {error:#}");
        }
        let _ = self.changes.send(Some(session.clone()));
    }

    /// Drops the session everywhere and notifies the change stream.
    fn forget_session(&self) {
        *self.lock_current() = None;
        if let Err(error) = self.cache.clear() {
            warn!("Failed to clear persisted session: {error:#}");
        }
        let _ = self.changes.send(None);
    }

    fn lock_current(&self) -> std::sync::MutexGuard<'_, Option<Session>> {
        self.current.lock().expect("session slot lock poisoned")
    }

    /// Reachability probe against the REST root. Any HTTP answer, even an
    /// error status, proves the backend is reachable.
    pub(crate) async fn ping(&self, timeout: std::time::Duration) -> Result<u16, ProviderFailure> {
        let response = self
            .http
            .get(format!("{}/rest/v1/", self.base()))
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| ProviderFailure::from_transport(&e))?;
        Ok(response.status().as_u16())
    }

    /// Converts an error response into a failure, pulling out whatever
    /// structured fields the Supabase surface reported.
    pub(super) async fn failure_from_response(response: reqwest::Response) -> ProviderFailure {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Self::failure_from_body(status, &body)
    }

    /// GoTrue reports `{error_code, msg}`, its token endpoint
    /// `{error, error_description}`, PostgREST `{code, message}`, Storage
    /// `{error, message}`. Tolerate all of them, and message-only bodies.
    pub(super) fn failure_from_body(status: u16, body: &str) -> ProviderFailure {
        if let Ok(json) = serde_json::from_str::<Value>(body) {
            let code = ["error_code", "code", "error"]
                .iter()
                .find_map(|key| json.get(*key).and_then(Value::as_str))
                .map(ToString::to_string);
            let message = ["msg", "message", "error_description"]
                .iter()
                .find_map(|key| json.get(*key).and_then(Value::as_str))
                .map(ToString::to_string);
            if code.is_some() || message.is_some() {
                let message = message.unwrap_or_else(|| format!("HTTP {status}"));
                return ProviderFailure::http(status, code, message);
            }
        }

        let trimmed = body.trim();
        let message = if trimmed.is_empty() {
            format!("HTTP {status}")
        } else {
            format!("HTTP {status}: {trimmed}")
        };
        ProviderFailure::http(status, None, message)
    }

    /// Maps a GoTrue token payload onto a [`Session`]. The full payload is
    /// carried along as the opaque `raw` value.
    pub(super) fn session_from_payload(payload: &Value) -> Result<Session, ProviderFailure> {
        let access_token = require_str(payload, "access_token")?;
        let refresh_token = require_str(payload, "refresh_token")?;
        let user = payload.get("user").unwrap_or(&Value::Null);
        let principal_id = user
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                ProviderFailure::message("Failed to parse session payload: missing user id")
            })?
            .to_string();
        let email = user
            .get("email")
            .and_then(Value::as_str)
            .map(ToString::to_string);

        let now = Utc::now();
        let expires_at = payload
            .get("expires_at")
            .and_then(Value::as_i64)
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
            .or_else(|| {
                payload
                    .get("expires_in")
                    .and_then(Value::as_i64)
                    .map(|secs| now + TimeDelta::seconds(secs))
            })
            .unwrap_or_else(|| now + TimeDelta::hours(1));

        Ok(Session {
            principal_id,
            email,
            issued_at: now,
            expires_at,
            access_token,
            refresh_token,
            raw: payload.clone(),
        })
    }
}

fn require_str(payload: &Value, key: &str) -> Result<String, ProviderFailure> {
    payload
        .get(key)
        .and_then(Value::as_str)
        .map(ToString::to_string)
        .ok_or_else(|| {
            ProviderFailure::message(format!("Failed to parse session payload: missing {key}"))
        })
}

#[async_trait]
impl IdentityProvider for SupabaseClient {
    async fn sign_up(&self, request: SignUpRequest) -> Result<SignUpResponse, ProviderFailure> {
        self.sign_up_request(request).await
    }

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Session, ProviderFailure> {
        let session = self.password_grant(email, password).await?;
        self.remember_session(&session);
        Ok(session)
    }

    async fn sign_out(&self) -> Result<(), ProviderFailure> {
        let token = self.lock_current().as_ref().map(|s| s.access_token.clone());
        // Local state clears before the revocation round trip; a network
        // blip must not leave the device signed in.
        self.forget_session();
        match token {
            Some(token) => self.logout_request(&token).await,
            None => Ok(()),
        }
    }

    async fn send_password_reset(
        &self,
        email: &str,
        redirect_to: Option<&str>,
    ) -> Result<(), ProviderFailure> {
        self.recover_request(email, redirect_to).await
    }

    async fn current_session(&self) -> Result<Option<Session>, ProviderFailure> {
        self.restore_session().await
    }

    fn session_changes(&self) -> SessionStream {
        let rx = self.changes.subscribe();
        futures_util::stream::unfold(rx, |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(change) => return Some((change, rx)),
                    // A lagged receiver only missed intermediate states;
                    // keep going and deliver the next one.
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
        .boxed()
    }
}

#[async_trait]
impl DataBackend for SupabaseClient {
    async fn create_record(&self, table: &str, record: Value) -> Result<Value, ProviderFailure> {
        self.insert_row(table, record).await
    }

    async fn fetch_one(
        &self,
        table: &str,
        filters: &[(&str, &str)],
    ) -> Result<Value, ProviderFailure> {
        self.select_row(table, filters).await
    }

    async fn fetch_many(
        &self,
        table: &str,
        filters: &[(&str, &str)],
        order: Option<&str>,
        limit: Option<u32>,
    ) -> Result<Vec<Value>, ProviderFailure> {
        self.select_rows(table, filters, order, limit).await
    }

    async fn update_record(
        &self,
        table: &str,
        filters: &[(&str, &str)],
        changes: Value,
    ) -> Result<Vec<Value>, ProviderFailure> {
        self.update_rows(table, filters, changes).await
    }

    async fn delete_record(
        &self,
        table: &str,
        filters: &[(&str, &str)],
    ) -> Result<(), ProviderFailure> {
        self.delete_rows(table, filters).await
    }

    async fn upload_object(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<ObjectInfo, ProviderFailure> {
        self.put_object(bucket, path, bytes, content_type).await
    }

    async fn signed_object_url(
        &self,
        bucket: &str,
        path: &str,
        expires_in_secs: u32,
    ) -> Result<String, ProviderFailure> {
        self.sign_object_url(bucket, path, expires_in_secs).await
    }

    async fn delete_object(&self, bucket: &str, path: &str) -> Result<(), ProviderFailure> {
        self.remove_object(bucket, path).await
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
    ) -> Result<Vec<ObjectInfo>, ProviderFailure> {
        self.list_bucket(bucket, prefix).await
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    /// Test: full token payload maps onto a session.
    #[test]
    fn test_session_from_payload() {
        let payload = json!({
            "access_token": "at",
            "refresh_token": "rt",
            "expires_in": 3600,
            "user": { "id": "u1", "email": "a@b.com" }
        });

        let session = SupabaseClient::session_from_payload(&payload).unwrap();
        assert_eq!(session.principal_id, "u1");
        assert_eq!(session.email.as_deref(), Some("a@b.com"));
        assert_eq!(session.access_token, "at");
        assert!(!session.is_expired());
        assert_eq!(session.raw, payload);
    }

    /// Test: `expires_at` (absolute) wins over `expires_in` when present.
    #[test]
    fn test_session_expiry_prefers_absolute() {
        let expires_at = (Utc::now() + TimeDelta::seconds(120)).timestamp();
        let payload = json!({
            "access_token": "at",
            "refresh_token": "rt",
            "expires_at": expires_at,
            "expires_in": 999_999,
            "user": { "id": "u1" }
        });

        let session = SupabaseClient::session_from_payload(&payload).unwrap();
        assert_eq!(session.expires_at.timestamp(), expires_at);
    }

    /// Test: payloads missing tokens or user id are parse failures, never
    /// partial sessions.
    #[test]
    fn test_session_from_payload_rejects_partial() {
        let missing_token = json!({ "refresh_token": "rt", "user": { "id": "u1" } });
        assert!(SupabaseClient::session_from_payload(&missing_token).is_err());

        let missing_user = json!({ "access_token": "at", "refresh_token": "rt" });
        assert!(SupabaseClient::session_from_payload(&missing_user).is_err());
    }

    /// Test: error-body parsing across the Supabase surfaces.
    #[test]
    fn test_failure_from_body_shapes() {
        let gotrue = SupabaseClient::failure_from_body(
            400,
            r#"{"code":400,"error_code":"invalid_credentials","msg":"Invalid login credentials"}"#,
        );
        assert_eq!(gotrue.code.as_deref(), Some("invalid_credentials"));
        assert_eq!(gotrue.message, "Invalid login credentials");
        assert_eq!(gotrue.status, Some(400));

        let token = SupabaseClient::failure_from_body(
            400,
            r#"{"error":"invalid_grant","error_description":"Invalid Refresh Token"}"#,
        );
        assert_eq!(token.code.as_deref(), Some("invalid_grant"));
        assert_eq!(token.message, "Invalid Refresh Token");

        let postgrest = SupabaseClient::failure_from_body(
            406,
            r#"{"code":"PGRST116","message":"JSON object requested, multiple (or no) rows returned","details":null,"hint":null}"#,
        );
        assert_eq!(postgrest.code.as_deref(), Some("PGRST116"));

        let plain = SupabaseClient::failure_from_body(502, "Bad Gateway");
        assert!(plain.code.is_none());
        assert_eq!(plain.message, "HTTP 502: Bad Gateway");

        let empty = SupabaseClient::failure_from_body(500, "");
        assert_eq!(empty.message, "HTTP 500");
    }
}
