//! Profile rows in the `profiles` table, keyed by principal id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::info;

use crate::auth::{ProviderFailure, Session};
use crate::provider::DataBackend;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// Fetches the signed-in principal's profile, creating the default row when
/// none exists yet. A missing row is normal right after sign-up if profile
/// provisioning failed or has not landed.
///
/// # Errors
/// Returns the backend failure for anything other than a missing row.
pub async fn get_user_profile(
    backend: &dyn DataBackend,
    session: &Session,
) -> Result<Profile, ProviderFailure> {
    match backend
        .fetch_one("profiles", &[("id", &session.principal_id)])
        .await
    {
        Ok(row) => parse_profile(row),
        Err(failure) if failure.code.as_deref() == Some("PGRST116") => {
            info!(principal_id = %session.principal_id, "No profile row, creating default");
            let row = backend
                .create_record("profiles", default_profile(session))
                .await?;
            parse_profile(row)
        }
        Err(failure) => Err(failure),
    }
}

/// Applies partial changes to a profile and returns the updated row.
///
/// # Errors
/// Returns the backend failure, or a parse failure if no row came back.
pub async fn update_profile(
    backend: &dyn DataBackend,
    principal_id: &str,
    changes: Value,
) -> Result<Profile, ProviderFailure> {
    let rows = backend
        .update_record("profiles", &[("id", principal_id)], changes)
        .await?;
    let row = rows
        .into_iter()
        .next()
        .ok_or_else(|| ProviderFailure::message("Profile update matched no rows"))?;
    parse_profile(row)
}

/// The row written when a principal has no profile yet: display name from
/// the sign-up metadata, falling back to the mailbox part of the email.
pub fn default_profile(session: &Session) -> Value {
    let metadata_name = session
        .raw
        .pointer("/user/user_metadata/name")
        .and_then(Value::as_str)
        .map(ToString::to_string);
    let name = metadata_name.or_else(|| {
        session
            .email
            .as_deref()
            .and_then(|email| email.split('@').next())
            .map(ToString::to_string)
    });

    json!({
        "id": session.principal_id,
        "name": name,
        "email": session.email,
        "created_at": Utc::now().to_rfc3339(),
    })
}

fn parse_profile(row: Value) -> Result<Profile, ProviderFailure> {
    serde_json::from_value(row)
        .map_err(|e| ProviderFailure::message(format!("Failed to parse profile row: {e}")))
}
