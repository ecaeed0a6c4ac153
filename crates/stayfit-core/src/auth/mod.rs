//! Client-side authentication session state machine.

mod classify;

pub mod bootstrap;
pub mod client;
pub mod store;
pub mod types;

pub use bootstrap::{BootstrapHandle, bootstrap};
pub use client::{AuthClient, AuthOptions, ResetDispatch, SignUpOutcome};
pub use store::{SessionStore, Subscription};
pub use types::{
    AuthError, AuthErrorKind, AuthResult, AuthStatus, ProviderFailure, Session, SessionState,
    SessionStream,
};
