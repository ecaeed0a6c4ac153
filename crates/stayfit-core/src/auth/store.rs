//! Single source of truth for the client-visible auth state.
//!
//! The store is an explicit object constructed once at process start and
//! injected into whatever consumes it (navigation guard, UI). Listeners are
//! notified synchronously after every committed transition; the busy
//! indicator is a sibling flag queried via [`SessionStore::is_busy`] so that
//! in-flight bookkeeping does not generate transitions of its own.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::types::{AuthError, AuthStatus, Session, SessionState};

type Listener = Arc<dyn Fn(&SessionState) + Send + Sync + 'static>;

/// A partial update applied through the store's single mutation choke point.
///
/// `status` is never an input; it is derived from session presence inside
/// [`SessionStore::apply`].
#[derive(Default)]
pub(crate) struct StateChange {
    /// `Some(new_session)` replaces the session slot (including `Some(None)`
    /// for "known absent", which settles an initializing store).
    session: Option<Option<Session>>,
    /// `Some(new_error)` replaces the last-error slot.
    last_error: Option<Option<AuthError>>,
    reset_link_sent: Option<bool>,
}

impl StateChange {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Replaces the session slot. `None` means "known absent" and moves an
    /// initializing store to unauthenticated.
    pub(crate) fn session(mut self, session: Option<Session>) -> Self {
        self.session = Some(session);
        self
    }

    pub(crate) fn error(mut self, error: AuthError) -> Self {
        self.last_error = Some(Some(error));
        self
    }

    pub(crate) fn clear_error(mut self) -> Self {
        self.last_error = Some(None);
        self
    }

    pub(crate) fn reset_link_sent(mut self, sent: bool) -> Self {
        self.reset_link_sent = Some(sent);
        self
    }
}

struct StoreInner {
    state: SessionState,
    /// Whether the first session-restore attempt (or any later session
    /// write) has completed. Until then the derived status stays
    /// `Initializing`.
    settled: bool,
    in_flight: usize,
    bootstrapped: bool,
    listeners: HashMap<u64, Listener>,
    next_listener_id: u64,
}

/// Process-wide holder of [`SessionState`]. Cheap to clone; clones share
/// state and listeners.
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<Mutex<StoreInner>>,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore {
    /// Creates a store in the `Initializing` state.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(StoreInner {
                state: SessionState::initial(),
                settled: false,
                in_flight: 0,
                bootstrapped: false,
                listeners: HashMap::new(),
                next_listener_id: 0,
            })),
        }
    }

    /// Returns a snapshot of the current state. Never blocks on I/O, never
    /// fails.
    pub fn state(&self) -> SessionState {
        self.lock().state.clone()
    }

    /// Returns true while at least one identity operation is in flight.
    ///
    /// UI uses this to disable duplicate submissions; it is a counter, not a
    /// bool, so overlapping operations keep it truthful until the last one
    /// finishes.
    pub fn is_busy(&self) -> bool {
        self.lock().in_flight > 0
    }

    /// Registers a listener invoked with the new state after every committed
    /// transition, starting from the next transition. Ordering among
    /// listeners is unspecified; each is invoked exactly once per
    /// transition.
    ///
    /// The returned [`Subscription`] unsubscribes when dropped; explicit
    /// [`Subscription::unsubscribe`] is idempotent.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&SessionState) + Send + Sync + 'static,
    {
        let mut inner = self.lock();
        let id = inner.next_listener_id;
        inner.next_listener_id += 1;
        inner.listeners.insert(id, Arc::new(listener));
        Subscription {
            inner: Arc::clone(&self.inner),
            id,
        }
    }

    /// Applies a partial update, derives `status` from session presence, and
    /// notifies listeners with the post-transition state.
    ///
    /// Crate-internal: only the bootstrap sequencer and identity operations
    /// mutate the store.
    ///
    /// # Panics
    /// Panics if the derived state would violate the status/session
    /// invariant. That indicates corruption of the store, not a user-facing
    /// failure.
    pub(crate) fn apply(&self, change: StateChange) {
        let (snapshot, listeners) = {
            let mut inner = self.lock();

            if let Some(session) = change.session {
                inner.state.session = session;
                inner.settled = true;
            }
            if let Some(error) = change.last_error {
                inner.state.last_error = error;
            }
            if let Some(sent) = change.reset_link_sent {
                inner.state.reset_link_sent = sent;
            }

            inner.state.status = match (&inner.state.session, inner.settled) {
                (Some(_), _) => AuthStatus::Authenticated,
                (None, true) => AuthStatus::Unauthenticated,
                (None, false) => AuthStatus::Initializing,
            };
            assert_eq!(
                inner.state.status == AuthStatus::Authenticated,
                inner.state.session.is_some(),
                "session store invariant violated: status/session mismatch"
            );

            let listeners: Vec<Listener> = inner.listeners.values().map(Arc::clone).collect();
            (inner.state.clone(), listeners)
        };

        // Invoke outside the lock so a listener reading the store back does
        // not deadlock.
        for listener in listeners {
            listener(&snapshot);
        }
    }

    /// Marks the start of an identity operation: raises the busy counter and
    /// clears the previous error. Not a transition; listeners are not
    /// notified until the operation commits its result through `apply`.
    pub(crate) fn begin_operation(&self) -> OperationGuard {
        let mut inner = self.lock();
        inner.in_flight += 1;
        inner.state.last_error = None;
        OperationGuard {
            store: self.clone(),
        }
    }

    /// Marks this store as having run its bootstrap sequence.
    ///
    /// # Panics
    /// Panics if called twice; the sequencer runs exactly once per store.
    pub(crate) fn mark_bootstrapped(&self) {
        let mut inner = self.lock();
        assert!(
            !inner.bootstrapped,
            "bootstrap already ran for this session store"
        );
        inner.bootstrapped = true;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StoreInner> {
        // Listener callbacks run outside the lock, so the only way to poison
        // it is a panic inside the store itself.
        self.inner.lock().expect("session store lock poisoned")
    }
}

/// Busy-counter guard for one in-flight identity operation.
pub(crate) struct OperationGuard {
    store: SessionStore,
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        let mut inner = self.store.lock();
        inner.in_flight = inner.in_flight.saturating_sub(1);
    }
}

/// Handle for a registered listener. Unsubscribes when dropped.
pub struct Subscription {
    inner: Arc<Mutex<StoreInner>>,
    id: u64,
}

impl Subscription {
    /// Removes the listener. Safe to call more than once.
    pub fn unsubscribe(&self) {
        let mut inner = self.inner.lock().expect("session store lock poisoned");
        inner.listeners.remove(&self.id);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
