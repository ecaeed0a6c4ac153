//! Workout rows in the `workouts` table.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::auth::ProviderFailure;
use crate::provider::DataBackend;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workout {
    pub id: String,
    pub user_id: String,
    pub name: String,
    /// Duration in minutes.
    #[serde(default)]
    pub duration: Option<i64>,
    #[serde(default)]
    pub level: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// Fields the caller supplies when creating a workout; id and timestamp
/// come from the backend.
#[derive(Debug, Clone, Serialize)]
pub struct NewWorkout {
    pub user_id: String,
    pub name: String,
    pub duration: Option<i64>,
    pub level: Option<String>,
}

/// All workouts, newest first.
///
/// # Errors
/// Returns the backend failure.
pub async fn list_workouts(backend: &dyn DataBackend) -> Result<Vec<Workout>, ProviderFailure> {
    let rows = backend
        .fetch_many("workouts", &[], Some("created_at.desc"), None)
        .await?;
    rows.into_iter().map(parse_workout).collect()
}

/// One principal's workouts, newest first.
///
/// # Errors
/// Returns the backend failure.
pub async fn list_user_workouts(
    backend: &dyn DataBackend,
    user_id: &str,
) -> Result<Vec<Workout>, ProviderFailure> {
    let rows = backend
        .fetch_many(
            "workouts",
            &[("user_id", user_id)],
            Some("created_at.desc"),
            None,
        )
        .await?;
    rows.into_iter().map(parse_workout).collect()
}

/// # Errors
/// Returns the backend failure; a missing id surfaces as `PGRST116`.
pub async fn get_workout(backend: &dyn DataBackend, id: &str) -> Result<Workout, ProviderFailure> {
    let row = backend.fetch_one("workouts", &[("id", id)]).await?;
    parse_workout(row)
}

/// # Errors
/// Returns the backend failure.
pub async fn create_workout(
    backend: &dyn DataBackend,
    workout: &NewWorkout,
) -> Result<Workout, ProviderFailure> {
    let record = json!({
        "user_id": workout.user_id,
        "name": workout.name,
        "duration": workout.duration,
        "level": workout.level,
        "created_at": Utc::now().to_rfc3339(),
    });
    let row = backend.create_record("workouts", record).await?;
    parse_workout(row)
}

/// Applies partial changes to a workout and returns the updated row.
///
/// # Errors
/// Returns the backend failure, or a parse failure if no row came back.
pub async fn update_workout(
    backend: &dyn DataBackend,
    id: &str,
    changes: Value,
) -> Result<Workout, ProviderFailure> {
    let rows = backend
        .update_record("workouts", &[("id", id)], changes)
        .await?;
    let row = rows
        .into_iter()
        .next()
        .ok_or_else(|| ProviderFailure::message("Workout update matched no rows"))?;
    parse_workout(row)
}

/// # Errors
/// Returns the backend failure.
pub async fn delete_workout(backend: &dyn DataBackend, id: &str) -> Result<(), ProviderFailure> {
    backend.delete_record("workouts", &[("id", id)]).await
}

fn parse_workout(row: Value) -> Result<Workout, ProviderFailure> {
    serde_json::from_value(row)
        .map_err(|e| ProviderFailure::message(format!("Failed to parse workout row: {e}")))
}
