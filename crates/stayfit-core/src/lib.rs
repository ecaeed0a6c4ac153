//! Core StayFit client library (auth session machine, backend wrappers, setup checks).

pub mod auth;
pub mod config;
pub mod provider;
pub mod services;
pub mod setup;
