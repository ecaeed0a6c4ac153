//! PostgREST table access. Filters are equality-only (`column=eq.value`),
//! which is all the app's queries need.

use reqwest::header::ACCEPT;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::auth::ProviderFailure;

use super::SupabaseClient;

impl SupabaseClient {
    fn rest_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{table}", self.base())
    }

    fn filter_params(filters: &[(&str, &str)]) -> Vec<(String, String)> {
        filters
            .iter()
            .map(|(column, value)| ((*column).to_string(), format!("eq.{value}")))
            .collect()
    }

    async fn json_body<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ProviderFailure> {
        if !response.status().is_success() {
            return Err(Self::failure_from_response(response).await);
        }
        response
            .json()
            .await
            .map_err(|e| ProviderFailure::message(format!("Failed to parse response body: {e}")))
    }

    pub(super) async fn insert_row(
        &self,
        table: &str,
        record: Value,
    ) -> Result<Value, ProviderFailure> {
        let response = self
            .http
            .post(self.rest_url(table))
            .bearer_auth(self.bearer_token())
            .header("Prefer", "return=representation")
            .json(&[record])
            .send()
            .await
            .map_err(|e| ProviderFailure::from_transport(&e))?;
        let rows: Vec<Value> = Self::json_body(response).await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| ProviderFailure::message("Insert returned no rows"))
    }

    /// Fetches exactly one row. PostgREST answers a single-object request
    /// matching zero rows with `PGRST116`, which callers use to detect
    /// missing records.
    pub(super) async fn select_row(
        &self,
        table: &str,
        filters: &[(&str, &str)],
    ) -> Result<Value, ProviderFailure> {
        let response = self
            .http
            .get(self.rest_url(table))
            .bearer_auth(self.bearer_token())
            .header(ACCEPT, "application/vnd.pgrst.object+json")
            .query(&[("select", "*")])
            .query(&Self::filter_params(filters))
            .send()
            .await
            .map_err(|e| ProviderFailure::from_transport(&e))?;
        Self::json_body(response).await
    }

    pub(super) async fn select_rows(
        &self,
        table: &str,
        filters: &[(&str, &str)],
        order: Option<&str>,
        limit: Option<u32>,
    ) -> Result<Vec<Value>, ProviderFailure> {
        let mut request = self
            .http
            .get(self.rest_url(table))
            .bearer_auth(self.bearer_token())
            .query(&[("select", "*")])
            .query(&Self::filter_params(filters));
        if let Some(order) = order {
            request = request.query(&[("order", order)]);
        }
        if let Some(limit) = limit {
            request = request.query(&[("limit", limit.to_string())]);
        }
        let response = request
            .send()
            .await
            .map_err(|e| ProviderFailure::from_transport(&e))?;
        Self::json_body(response).await
    }

    pub(super) async fn update_rows(
        &self,
        table: &str,
        filters: &[(&str, &str)],
        changes: Value,
    ) -> Result<Vec<Value>, ProviderFailure> {
        let response = self
            .http
            .patch(self.rest_url(table))
            .bearer_auth(self.bearer_token())
            .header("Prefer", "return=representation")
            .query(&Self::filter_params(filters))
            .json(&changes)
            .send()
            .await
            .map_err(|e| ProviderFailure::from_transport(&e))?;
        Self::json_body(response).await
    }

    pub(super) async fn delete_rows(
        &self,
        table: &str,
        filters: &[(&str, &str)],
    ) -> Result<(), ProviderFailure> {
        let response = self
            .http
            .delete(self.rest_url(table))
            .bearer_auth(self.bearer_token())
            .query(&Self::filter_params(filters))
            .send()
            .await
            .map_err(|e| ProviderFailure::from_transport(&e))?;
        if !response.status().is_success() {
            return Err(Self::failure_from_response(response).await);
        }
        Ok(())
    }

    /// Lightweight existence probe: select a single row and interpret a
    /// relation-does-not-exist error as "table missing".
    pub(crate) async fn table_exists(&self, table: &str) -> Result<bool, ProviderFailure> {
        match self.select_rows(table, &[], None, Some(1)).await {
            Ok(_) => Ok(true),
            Err(failure) if is_missing_relation(&failure) => Ok(false),
            Err(failure) => Err(failure),
        }
    }
}

/// Postgres reports a missing table as `42P01` (undefined_table); older
/// PostgREST versions only carry the "relation … does not exist" message.
fn is_missing_relation(failure: &ProviderFailure) -> bool {
    failure.code.as_deref() == Some("42P01") || failure.message.contains("does not exist")
}
