//! External collaborator boundaries.
//!
//! The auth core talks to two collaborators through object-safe traits so
//! tests can substitute in-memory fakes: an identity provider (credential
//! verification, registration, session issuance/revocation) and a data
//! backend (record CRUD plus object storage).

pub mod supabase;

use async_trait::async_trait;
use serde_json::Value;

use crate::auth::{ProviderFailure, Session, SessionStream};

/// Registration request forwarded to the identity provider.
///
/// `metadata` is arbitrary profile data (name, creation timestamp, …) stored
/// by the provider without interpretation here.
#[derive(Debug, Clone)]
pub struct SignUpRequest {
    pub email: String,
    pub password: String,
    pub metadata: Value,
}

/// Registration outcome.
///
/// `session` may be absent on success: confirmation-gated registration
/// creates the principal but issues no session until the email is verified.
#[derive(Debug, Clone)]
pub struct SignUpResponse {
    pub principal_id: String,
    pub email: Option<String>,
    pub session: Option<Session>,
}

/// External identity provider (credential verification, registration,
/// session issuance/revocation).
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn sign_up(&self, request: SignUpRequest) -> Result<SignUpResponse, ProviderFailure>;

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Session, ProviderFailure>;

    async fn sign_out(&self) -> Result<(), ProviderFailure>;

    async fn send_password_reset(
        &self,
        email: &str,
        redirect_to: Option<&str>,
    ) -> Result<(), ProviderFailure>;

    /// Returns the current session, if any. May be served from a local
    /// cache; no network guarantee.
    async fn current_session(&self) -> Result<Option<Session>, ProviderFailure>;

    /// Long-lived stream of provider-pushed session changes (token refresh,
    /// external sign-out, invalidation from another device).
    fn session_changes(&self) -> SessionStream;
}

/// Object metadata returned by storage operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    /// Path of the object within its bucket.
    pub path: String,
    /// Public URL, for objects in public buckets.
    pub public_url: Option<String>,
}

/// External data backend (structured-record CRUD and object storage).
///
/// Every call follows the same request/response mapping: the raw record as
/// `serde_json::Value` in, the raw record(s) out, failures surfaced as
/// [`ProviderFailure`].
#[async_trait]
pub trait DataBackend: Send + Sync {
    async fn create_record(&self, table: &str, record: Value) -> Result<Value, ProviderFailure>;

    /// Fetches exactly one record. Fails with the backend's row-not-found
    /// code (PostgREST: `PGRST116`) when no record matches.
    async fn fetch_one(
        &self,
        table: &str,
        filters: &[(&str, &str)],
    ) -> Result<Value, ProviderFailure>;

    /// Fetches all matching records, optionally ordered (`column.desc` /
    /// `column.asc`) and limited.
    async fn fetch_many(
        &self,
        table: &str,
        filters: &[(&str, &str)],
        order: Option<&str>,
        limit: Option<u32>,
    ) -> Result<Vec<Value>, ProviderFailure>;

    async fn update_record(
        &self,
        table: &str,
        filters: &[(&str, &str)],
        changes: Value,
    ) -> Result<Vec<Value>, ProviderFailure>;

    async fn delete_record(
        &self,
        table: &str,
        filters: &[(&str, &str)],
    ) -> Result<(), ProviderFailure>;

    /// Uploads (upserting) an object and returns its metadata.
    async fn upload_object(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<ObjectInfo, ProviderFailure>;

    /// Returns a short-lived signed download URL.
    async fn signed_object_url(
        &self,
        bucket: &str,
        path: &str,
        expires_in_secs: u32,
    ) -> Result<String, ProviderFailure>;

    async fn delete_object(&self, bucket: &str, path: &str) -> Result<(), ProviderFailure>;

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
    ) -> Result<Vec<ObjectInfo>, ProviderFailure>;
}
