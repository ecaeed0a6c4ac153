//! Storage bucket access: uploads, URLs, deletion and listing.

use reqwest::header::CONTENT_TYPE;
use serde_json::{Value, json};

use crate::auth::ProviderFailure;
use crate::provider::ObjectInfo;

use super::SupabaseClient;

impl SupabaseClient {
    fn storage_url(&self, path: &str) -> String {
        format!("{}/storage/v1/{path}", self.base())
    }

    fn public_object_url(&self, bucket: &str, path: &str) -> String {
        self.storage_url(&format!("object/public/{bucket}/{path}"))
    }

    pub(super) async fn put_object(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<ObjectInfo, ProviderFailure> {
        let response = self
            .http
            .post(self.storage_url(&format!("object/{bucket}/{path}")))
            .bearer_auth(self.bearer_token())
            .header(CONTENT_TYPE, content_type)
            .header("x-upsert", "true")
            .body(bytes)
            .send()
            .await
            .map_err(|e| ProviderFailure::from_transport(&e))?;
        if !response.status().is_success() {
            return Err(Self::failure_from_response(response).await);
        }
        Ok(ObjectInfo {
            path: path.to_string(),
            public_url: Some(self.public_object_url(bucket, path)),
        })
    }

    pub(super) async fn sign_object_url(
        &self,
        bucket: &str,
        path: &str,
        expires_in_secs: u32,
    ) -> Result<String, ProviderFailure> {
        let response = self
            .http
            .post(self.storage_url(&format!("object/sign/{bucket}/{path}")))
            .bearer_auth(self.bearer_token())
            .json(&json!({ "expiresIn": expires_in_secs }))
            .send()
            .await
            .map_err(|e| ProviderFailure::from_transport(&e))?;
        if !response.status().is_success() {
            return Err(Self::failure_from_response(response).await);
        }
        let payload: Value = response
            .json()
            .await
            .map_err(|e| ProviderFailure::message(format!("Failed to parse sign response: {e}")))?;
        let signed = payload
            .get("signedURL")
            .and_then(Value::as_str)
            .ok_or_else(|| ProviderFailure::message("Sign response carried no signedURL"))?;
        Ok(self.storage_url(signed.trim_start_matches('/')))
    }

    pub(super) async fn remove_object(
        &self,
        bucket: &str,
        path: &str,
    ) -> Result<(), ProviderFailure> {
        let response = self
            .http
            .delete(self.storage_url(&format!("object/{bucket}")))
            .bearer_auth(self.bearer_token())
            .json(&json!({ "prefixes": [path] }))
            .send()
            .await
            .map_err(|e| ProviderFailure::from_transport(&e))?;
        if !response.status().is_success() {
            return Err(Self::failure_from_response(response).await);
        }
        Ok(())
    }

    pub(super) async fn list_bucket(
        &self,
        bucket: &str,
        prefix: &str,
    ) -> Result<Vec<ObjectInfo>, ProviderFailure> {
        let response = self
            .http
            .post(self.storage_url(&format!("object/list/{bucket}")))
            .bearer_auth(self.bearer_token())
            .json(&json!({ "prefix": prefix }))
            .send()
            .await
            .map_err(|e| ProviderFailure::from_transport(&e))?;
        if !response.status().is_success() {
            return Err(Self::failure_from_response(response).await);
        }
        let entries: Vec<Value> = response
            .json()
            .await
            .map_err(|e| ProviderFailure::message(format!("Failed to parse list response: {e}")))?;
        Ok(entries
            .iter()
            .filter_map(|entry| entry.get("name").and_then(Value::as_str))
            .map(|name| {
                let object_path = if prefix.is_empty() {
                    name.to_string()
                } else {
                    format!("{prefix}/{name}")
                };
                let public_url = Some(self.public_object_url(bucket, &object_path));
                ObjectInfo {
                    path: object_path,
                    public_url,
                }
            })
            .collect())
    }

    /// Existence probe for a bucket: an empty listing succeeds on a real
    /// bucket, and a missing one answers with a not-found error.
    pub(crate) async fn bucket_exists(&self, bucket: &str) -> Result<bool, ProviderFailure> {
        match self.list_bucket(bucket, "").await {
            Ok(_) => Ok(true),
            Err(failure) if is_missing_bucket(&failure) => Ok(false),
            Err(failure) => Err(failure),
        }
    }
}

fn is_missing_bucket(failure: &ProviderFailure) -> bool {
    failure.message.to_lowercase().contains("not found")
}
