//! Object storage helpers: avatars and workout images, with the bucket
//! and path conventions the app uses everywhere.

use crate::auth::ProviderFailure;
use crate::provider::{DataBackend, ObjectInfo};
use crate::setup::{AVATARS_BUCKET, WORKOUT_IMAGES_BUCKET};

/// Validity window for signed URLs handed to the UI.
const SIGNED_URL_TTL_SECS: u32 = 3600;

fn extension_for(content_type: &str) -> &'static str {
    match content_type {
        "image/png" => "png",
        "image/webp" => "webp",
        _ => "jpg",
    }
}

/// Uploads (or replaces) a principal's avatar and returns its object info.
///
/// # Errors
/// Returns the backend failure.
pub async fn upload_avatar(
    backend: &dyn DataBackend,
    principal_id: &str,
    bytes: Vec<u8>,
    content_type: &str,
) -> Result<ObjectInfo, ProviderFailure> {
    let path = format!("{principal_id}/avatar.{}", extension_for(content_type));
    backend
        .upload_object(AVATARS_BUCKET, &path, bytes, content_type)
        .await
}

/// Uploads an image attached to a workout, keyed under the owner.
///
/// # Errors
/// Returns the backend failure.
pub async fn upload_workout_image(
    backend: &dyn DataBackend,
    user_id: &str,
    workout_id: &str,
    bytes: Vec<u8>,
    content_type: &str,
) -> Result<ObjectInfo, ProviderFailure> {
    let path = format!("{user_id}/{workout_id}.{}", extension_for(content_type));
    backend
        .upload_object(WORKOUT_IMAGES_BUCKET, &path, bytes, content_type)
        .await
}

/// Short-lived signed URL for an object in a private bucket.
///
/// # Errors
/// Returns the backend failure.
pub async fn signed_url(
    backend: &dyn DataBackend,
    bucket: &str,
    path: &str,
) -> Result<String, ProviderFailure> {
    backend.signed_object_url(bucket, path, SIGNED_URL_TTL_SECS).await
}

/// # Errors
/// Returns the backend failure.
pub async fn delete_image(
    backend: &dyn DataBackend,
    bucket: &str,
    path: &str,
) -> Result<(), ProviderFailure> {
    backend.delete_object(bucket, path).await
}

/// All images stored for one principal's workouts.
///
/// # Errors
/// Returns the backend failure.
pub async fn list_workout_images(
    backend: &dyn DataBackend,
    user_id: &str,
) -> Result<Vec<ObjectInfo>, ProviderFailure> {
    backend.list_objects(WORKOUT_IMAGES_BUCKET, user_id).await
}
