//! Startup environment checks: backend reachability, schema presence, and
//! storage buckets. Run once at launch, before any screen depends on data.

use tracing::{info, warn};

use crate::config::Config;
use crate::provider::supabase::SupabaseClient;

pub const PROFILES_TABLE: &str = "profiles";
pub const WORKOUTS_TABLE: &str = "workouts";
pub const AVATARS_BUCKET: &str = "avatars";
pub const WORKOUT_IMAGES_BUCKET: &str = "workout-images";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkStatus {
    Connected,
    Unreachable { detail: String },
}

impl NetworkStatus {
    #[must_use]
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatabaseStatus {
    pub profiles_table: bool,
    pub workouts_table: bool,
}

impl DatabaseStatus {
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.profiles_table && self.workouts_table
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageStatus {
    Ready,
    Incomplete {
        avatars_bucket: bool,
        workout_images_bucket: bool,
    },
    /// Checks were bypassed; uploads may fail later.
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupReport {
    pub network: NetworkStatus,
    /// `None` when the backend was unreachable and no probe ran.
    pub database: Option<DatabaseStatus>,
    pub storage: Option<StorageStatus>,
}

impl SetupReport {
    /// Whether the app can proceed to its normal flow.
    #[must_use]
    pub fn is_usable(&self) -> bool {
        self.network.is_connected() && self.database.is_some_and(|d| d.is_ready())
    }
}

/// Probes backend reachability. Any HTTP response counts as connected; an
/// auth error still proves the network path works.
pub async fn check_network(client: &SupabaseClient, config: &Config) -> NetworkStatus {
    match client.ping(config.probe_timeout()).await {
        Ok(status) => {
            info!(status, "Backend reachable");
            NetworkStatus::Connected
        }
        Err(failure) => {
            warn!("Backend unreachable: {failure}");
            NetworkStatus::Unreachable {
                detail: failure.message,
            }
        }
    }
}

/// Probes the application tables. A probe failure other than a definitive
/// relation-does-not-exist answer is reported as missing, with a warning.
pub async fn check_database_setup(client: &SupabaseClient) -> DatabaseStatus {
    DatabaseStatus {
        profiles_table: probe_table(client, PROFILES_TABLE).await,
        workouts_table: probe_table(client, WORKOUTS_TABLE).await,
    }
}

/// Probes the storage buckets uploads depend on.
pub async fn check_storage_buckets(client: &SupabaseClient) -> StorageStatus {
    let avatars_bucket = probe_bucket(client, AVATARS_BUCKET).await;
    let workout_images_bucket = probe_bucket(client, WORKOUT_IMAGES_BUCKET).await;
    if avatars_bucket && workout_images_bucket {
        StorageStatus::Ready
    } else {
        StorageStatus::Incomplete {
            avatars_bucket,
            workout_images_bucket,
        }
    }
}

/// Runs the launch checks in order: network first, and only when the
/// backend is reachable, schema and storage. `bypass_storage` skips the
/// bucket probes for installs that never upload.
pub async fn run_setup_checks(
    client: &SupabaseClient,
    config: &Config,
    bypass_storage: bool,
) -> SetupReport {
    let network = check_network(client, config).await;
    if !network.is_connected() {
        return SetupReport {
            network,
            database: None,
            storage: None,
        };
    }

    let database = check_database_setup(client).await;
    if !database.is_ready() {
        warn!(
            profiles = database.profiles_table,
            workouts = database.workouts_table,
            "Database schema incomplete"
        );
    }

    let storage = if bypass_storage {
        StorageStatus::Skipped
    } else {
        check_storage_buckets(client).await
    };

    SetupReport {
        network,
        database: Some(database),
        storage: Some(storage),
    }
}

async fn probe_table(client: &SupabaseClient, table: &str) -> bool {
    match client.table_exists(table).await {
        Ok(exists) => exists,
        Err(failure) => {
            warn!(table, "Table probe failed: {failure}");
            false
        }
    }
}

async fn probe_bucket(client: &SupabaseClient, bucket: &str) -> bool {
    match client.bucket_exists(bucket).await {
        Ok(exists) => exists,
        Err(failure) => {
            warn!(bucket, "Bucket probe failed: {failure}");
            false
        }
    }
}
