//! Process-start session restore and provider change subscription.
//!
//! Runs exactly once per store: restore a prior session if the provider has
//! one, settle the store either way, then keep forwarding provider-pushed
//! session changes into the store for the rest of the process lifetime.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::provider::IdentityProvider;

use super::classify;
use super::store::{SessionStore, StateChange};
use super::types::ProviderFailure;

/// Owner of the long-lived change-stream task. Dropping the handle (or
/// calling [`shutdown`](Self::shutdown)) detaches the subscription; this is
/// resource cleanup, not a state transition.
pub struct BootstrapHandle {
    task: JoinHandle<()>,
}

impl BootstrapHandle {
    /// Stops forwarding provider-pushed changes.
    pub fn shutdown(self) {
        self.task.abort();
    }
}

impl Drop for BootstrapHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Restores the prior session and subscribes to provider-pushed changes.
///
/// Fail-closed: if the restore attempt errors or times out, the store
/// settles to unauthenticated with `last_error` set so the UI can tell
/// "genuinely logged out" from "couldn't check". The store never stays in
/// `Initializing` past this call.
///
/// # Panics
/// Panics if the store was already bootstrapped; the sequencer runs once
/// per process.
pub async fn bootstrap(
    store: SessionStore,
    provider: Arc<dyn IdentityProvider>,
    restore_timeout: Duration,
) -> BootstrapHandle {
    store.mark_bootstrapped();

    let restored = tokio::time::timeout(restore_timeout, provider.current_session()).await;
    match restored {
        Ok(Ok(session)) => {
            debug!(restored = session.is_some(), "session restore completed");
            store.apply(StateChange::new().session(session).clear_error());
        }
        Ok(Err(failure)) => {
            warn!("Error getting session: {}", failure.message);
            store.apply(
                StateChange::new()
                    .session(None)
                    .error(classify::auth_error(&failure)),
            );
        }
        Err(_) => {
            let failure = ProviderFailure::message(format!(
                "timeout: session restore got no response within {restore_timeout:.0?}"
            ));
            warn!("Error getting session: {}", failure.message);
            store.apply(
                StateChange::new()
                    .session(None)
                    .error(classify::auth_error(&failure)),
            );
        }
    }

    // Provider-pushed changes converge on the same apply path as explicit
    // operations; the store reflects whichever transition landed last.
    let mut changes = provider.session_changes();
    let task = tokio::spawn(async move {
        while let Some(session) = changes.next().await {
            store.apply(StateChange::new().session(session));
        }
    });

    BootstrapHandle { task }
}
