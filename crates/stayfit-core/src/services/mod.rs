//! Application data services on top of [`DataBackend`](crate::provider::DataBackend).

pub mod profiles;
pub mod storage;
pub mod workouts;
