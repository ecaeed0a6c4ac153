//! End-to-end behavior of the session store, identity operations, and the
//! bootstrap sequencer, against scripted in-memory collaborators.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeDelta, Utc};
use serde_json::{Value, json};
use tokio::sync::broadcast;

use stayfit_core::auth::{
    AuthClient, AuthErrorKind, AuthOptions, AuthStatus, ProviderFailure, ResetDispatch, Session,
    SessionStore, SessionStream, bootstrap,
};
use stayfit_core::provider::{
    DataBackend, IdentityProvider, ObjectInfo, SignUpRequest, SignUpResponse,
};

fn session(principal_id: &str) -> Session {
    Session {
        principal_id: principal_id.to_string(),
        email: Some(format!("{principal_id}@example.com")),
        issued_at: Utc::now(),
        expires_at: Utc::now() + TimeDelta::hours(1),
        access_token: format!("at-{principal_id}"),
        refresh_token: format!("rt-{principal_id}"),
        raw: json!({ "user": { "id": principal_id } }),
    }
}

fn network_failure() -> ProviderFailure {
    ProviderFailure::message("Network request failed: connection refused")
}

/// Scripted identity provider: each operation pops its next result from a
/// queue. An optional delay simulates a slow backend for timeout tests.
struct MockProvider {
    sign_up_results: Mutex<VecDeque<Result<SignUpResponse, ProviderFailure>>>,
    sign_in_results: Mutex<VecDeque<Result<Session, ProviderFailure>>>,
    sign_out_results: Mutex<VecDeque<Result<(), ProviderFailure>>>,
    reset_results: Mutex<VecDeque<Result<(), ProviderFailure>>>,
    restore_results: Mutex<VecDeque<Result<Option<Session>, ProviderFailure>>>,
    reset_calls: AtomicUsize,
    sign_out_calls: AtomicUsize,
    delay: Option<Duration>,
    changes: broadcast::Sender<Option<Session>>,
}

impl MockProvider {
    fn new() -> Self {
        let (changes, _) = broadcast::channel(16);
        Self {
            sign_up_results: Mutex::new(VecDeque::new()),
            sign_in_results: Mutex::new(VecDeque::new()),
            sign_out_results: Mutex::new(VecDeque::new()),
            reset_results: Mutex::new(VecDeque::new()),
            restore_results: Mutex::new(VecDeque::new()),
            reset_calls: AtomicUsize::new(0),
            sign_out_calls: AtomicUsize::new(0),
            delay: None,
            changes,
        }
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn queue_sign_up(&self, result: Result<SignUpResponse, ProviderFailure>) {
        self.sign_up_results.lock().unwrap().push_back(result);
    }

    fn queue_sign_in(&self, result: Result<Session, ProviderFailure>) {
        self.sign_in_results.lock().unwrap().push_back(result);
    }

    fn queue_sign_out(&self, result: Result<(), ProviderFailure>) {
        self.sign_out_results.lock().unwrap().push_back(result);
    }

    fn queue_reset(&self, result: Result<(), ProviderFailure>) {
        self.reset_results.lock().unwrap().push_back(result);
    }

    fn queue_restore(&self, result: Result<Option<Session>, ProviderFailure>) {
        self.restore_results.lock().unwrap().push_back(result);
    }

    fn push_change(&self, change: Option<Session>) {
        self.changes.send(change).unwrap();
    }

    async fn maybe_delay(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn pop<T>(queue: &Mutex<VecDeque<T>>, operation: &str) -> T {
        queue
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| panic!("no scripted result for {operation}"))
    }
}

#[async_trait]
impl IdentityProvider for MockProvider {
    async fn sign_up(&self, _request: SignUpRequest) -> Result<SignUpResponse, ProviderFailure> {
        self.maybe_delay().await;
        Self::pop(&self.sign_up_results, "sign_up")
    }

    async fn sign_in_with_password(
        &self,
        _email: &str,
        _password: &str,
    ) -> Result<Session, ProviderFailure> {
        self.maybe_delay().await;
        Self::pop(&self.sign_in_results, "sign_in_with_password")
    }

    async fn sign_out(&self) -> Result<(), ProviderFailure> {
        self.sign_out_calls.fetch_add(1, Ordering::SeqCst);
        self.maybe_delay().await;
        Self::pop(&self.sign_out_results, "sign_out")
    }

    async fn send_password_reset(
        &self,
        _email: &str,
        _redirect_to: Option<&str>,
    ) -> Result<(), ProviderFailure> {
        self.reset_calls.fetch_add(1, Ordering::SeqCst);
        self.maybe_delay().await;
        Self::pop(&self.reset_results, "send_password_reset")
    }

    async fn current_session(&self) -> Result<Option<Session>, ProviderFailure> {
        self.maybe_delay().await;
        let mut results = self.restore_results.lock().unwrap();
        results.pop_front().unwrap_or(Ok(None))
    }

    fn session_changes(&self) -> SessionStream {
        use futures_util::StreamExt;
        let rx = self.changes.subscribe();
        futures_util::stream::unfold(rx, |mut rx| async move {
            match rx.recv().await {
                Ok(change) => Some((change, rx)),
                Err(_) => None,
            }
        })
        .boxed()
    }
}

/// Scripted data backend; only record creation is exercised by identity
/// operations (profile provisioning).
struct MockBackend {
    create_results: Mutex<VecDeque<Result<Value, ProviderFailure>>>,
    created: Mutex<Vec<(String, Value)>>,
}

impl MockBackend {
    fn new() -> Self {
        Self {
            create_results: Mutex::new(VecDeque::new()),
            created: Mutex::new(Vec::new()),
        }
    }

    fn queue_create(&self, result: Result<Value, ProviderFailure>) {
        self.create_results.lock().unwrap().push_back(result);
    }
}

#[async_trait]
impl DataBackend for MockBackend {
    async fn create_record(&self, table: &str, record: Value) -> Result<Value, ProviderFailure> {
        self.created
            .lock()
            .unwrap()
            .push((table.to_string(), record.clone()));
        self.create_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(record))
    }

    async fn fetch_one(
        &self,
        _table: &str,
        _filters: &[(&str, &str)],
    ) -> Result<Value, ProviderFailure> {
        unimplemented!()
    }

    async fn fetch_many(
        &self,
        _table: &str,
        _filters: &[(&str, &str)],
        _order: Option<&str>,
        _limit: Option<u32>,
    ) -> Result<Vec<Value>, ProviderFailure> {
        unimplemented!()
    }

    async fn update_record(
        &self,
        _table: &str,
        _filters: &[(&str, &str)],
        _changes: Value,
    ) -> Result<Vec<Value>, ProviderFailure> {
        unimplemented!()
    }

    async fn delete_record(
        &self,
        _table: &str,
        _filters: &[(&str, &str)],
    ) -> Result<(), ProviderFailure> {
        unimplemented!()
    }

    async fn upload_object(
        &self,
        _bucket: &str,
        _path: &str,
        _bytes: Vec<u8>,
        _content_type: &str,
    ) -> Result<ObjectInfo, ProviderFailure> {
        unimplemented!()
    }

    async fn signed_object_url(
        &self,
        _bucket: &str,
        _path: &str,
        _expires_in_secs: u32,
    ) -> Result<String, ProviderFailure> {
        unimplemented!()
    }

    async fn delete_object(&self, _bucket: &str, _path: &str) -> Result<(), ProviderFailure> {
        unimplemented!()
    }

    async fn list_objects(
        &self,
        _bucket: &str,
        _prefix: &str,
    ) -> Result<Vec<ObjectInfo>, ProviderFailure> {
        unimplemented!()
    }
}

struct Harness {
    provider: Arc<MockProvider>,
    backend: Arc<MockBackend>,
    store: SessionStore,
    client: AuthClient,
}

fn harness_with(provider: MockProvider, options: AuthOptions) -> Harness {
    let provider = Arc::new(provider);
    let backend = Arc::new(MockBackend::new());
    let store = SessionStore::new();
    let client = AuthClient::new(
        provider.clone(),
        backend.clone(),
        store.clone(),
        options,
    );
    Harness {
        provider,
        backend,
        store,
        client,
    }
}

fn harness() -> Harness {
    harness_with(MockProvider::new(), AuthOptions::default())
}

/// Test: successful sign-in authenticates the store with a clean error slot.
#[tokio::test]
async fn test_sign_in_success() {
    let h = harness();
    h.provider.queue_sign_in(Ok(session("u1")));

    let signed_in = h.client.sign_in("u1@example.com", "pw").await.unwrap();
    assert_eq!(signed_in.principal_id, "u1");

    let state = h.store.state();
    assert_eq!(state.status, AuthStatus::Authenticated);
    assert_eq!(state.session.unwrap().principal_id, "u1");
    assert!(state.last_error.is_none());
    assert!(!h.store.is_busy());
}

/// Test: rejected credentials settle the store unauthenticated with a
/// classified error, and no partial session survives.
#[tokio::test]
async fn test_sign_in_invalid_credentials() {
    let h = harness();
    h.provider.queue_sign_in(Err(ProviderFailure::http(
        400,
        Some("invalid_credentials".to_string()),
        "Invalid login credentials",
    )));

    let error = h.client.sign_in("u1@example.com", "wrong").await.unwrap_err();
    assert_eq!(error.kind, AuthErrorKind::InvalidCredentials);

    let state = h.store.state();
    assert_eq!(state.status, AuthStatus::Unauthenticated);
    assert!(state.session.is_none());
    assert_eq!(state.last_error.unwrap().kind, AuthErrorKind::InvalidCredentials);
}

/// Test: registering an email that already has an account maps to
/// `DuplicateAccount`.
#[tokio::test]
async fn test_sign_up_duplicate_account() {
    let h = harness();
    h.provider.queue_sign_up(Err(ProviderFailure::http(
        422,
        Some("user_already_exists".to_string()),
        "User already registered",
    )));

    let error = h
        .client
        .sign_up("u1@example.com", "pw", json!({ "name": "Ada" }))
        .await
        .unwrap_err();
    assert_eq!(error.kind, AuthErrorKind::DuplicateAccount);
    assert_eq!(h.store.state().status, AuthStatus::Unauthenticated);
    assert!(h.backend.created.lock().unwrap().is_empty());
}

/// Test: confirmation-gated sign-up succeeds without a session; the store
/// stays unauthenticated and the profile is still provisioned.
#[tokio::test]
async fn test_sign_up_deferred_confirmation() {
    let h = harness();
    h.provider.queue_sign_up(Ok(SignUpResponse {
        principal_id: "u1".to_string(),
        email: Some("u1@example.com".to_string()),
        session: None,
    }));

    let outcome = h
        .client
        .sign_up("u1@example.com", "pw", json!({ "name": "Ada" }))
        .await
        .unwrap();
    assert!(outcome.session.is_none());
    assert!(outcome.warning.is_none());

    let state = h.store.state();
    assert_eq!(state.status, AuthStatus::Unauthenticated);
    assert!(state.last_error.is_none());

    let created = h.backend.created.lock().unwrap();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].0, "profiles");
    assert_eq!(created[0].1.get("name").and_then(Value::as_str), Some("Ada"));
}

/// Test: a failed profile write does not fail the sign-up; the outcome and
/// `last_error` carry a `ProfileProvisioningFailed` warning while the
/// session stands.
#[tokio::test]
async fn test_sign_up_profile_warning() {
    let h = harness();
    h.provider.queue_sign_up(Ok(SignUpResponse {
        principal_id: "u1".to_string(),
        email: Some("u1@example.com".to_string()),
        session: Some(session("u1")),
    }));
    h.backend
        .queue_create(Err(ProviderFailure::http(500, None, "insert failed")));

    let outcome = h
        .client
        .sign_up("u1@example.com", "pw", json!({ "name": "Ada" }))
        .await
        .unwrap();
    assert!(outcome.session.is_some());
    assert_eq!(
        outcome.warning.unwrap().kind,
        AuthErrorKind::ProfileProvisioningFailed
    );

    let state = h.store.state();
    assert_eq!(state.status, AuthStatus::Authenticated);
    assert_eq!(
        state.last_error.unwrap().kind,
        AuthErrorKind::ProfileProvisioningFailed
    );
}

/// Test: sign-out clears local state even when the remote revocation
/// fails; the failure is surfaced, not obeyed.
#[tokio::test]
async fn test_sign_out_clears_locally_on_remote_failure() {
    let h = harness();
    h.provider.queue_sign_in(Ok(session("u1")));
    h.client.sign_in("u1@example.com", "pw").await.unwrap();

    h.provider
        .queue_sign_out(Err(ProviderFailure::http(500, None, "revoke failed")));
    let error = h.client.sign_out().await.unwrap_err();
    assert_eq!(error.kind, AuthErrorKind::ProviderRejected);

    let state = h.store.state();
    assert_eq!(state.status, AuthStatus::Unauthenticated);
    assert!(state.session.is_none());
    assert!(state.last_error.is_some());
}

/// Test: signing out while already signed out is a no-op success.
#[tokio::test]
async fn test_sign_out_idempotent() {
    let h = harness();
    h.provider.queue_sign_out(Ok(()));
    h.provider.queue_sign_out(Ok(()));

    h.client.sign_out().await.unwrap();
    h.client.sign_out().await.unwrap();

    let state = h.store.state();
    assert_eq!(state.status, AuthStatus::Unauthenticated);
    assert!(state.last_error.is_none());
    assert_eq!(h.provider.sign_out_calls.load(Ordering::SeqCst), 2);
}

/// Test: a second reset request inside the cooldown window is rejected
/// client-side without reaching the provider; after the window it goes out
/// again.
#[tokio::test]
async fn test_reset_password_cooldown() {
    let options = AuthOptions {
        resend_cooldown: Duration::from_millis(50),
        ..AuthOptions::default()
    };
    let provider = MockProvider::new();
    provider.queue_reset(Ok(()));
    provider.queue_reset(Ok(()));
    let h = harness_with(provider, options);

    let first = h.client.reset_password("u1@example.com").await.unwrap();
    assert_eq!(first, ResetDispatch::Sent);
    assert!(h.store.state().reset_link_sent);

    let second = h.client.reset_password("u1@example.com").await.unwrap();
    assert!(matches!(second, ResetDispatch::CooldownActive { remaining } if !remaining.is_zero()));
    assert_eq!(h.provider.reset_calls.load(Ordering::SeqCst), 1);

    tokio::time::sleep(Duration::from_millis(60)).await;
    let third = h.client.reset_password("u1@example.com").await.unwrap();
    assert_eq!(third, ResetDispatch::Sent);
    assert_eq!(h.provider.reset_calls.load(Ordering::SeqCst), 2);
}

/// Test: the cooldown is per email; a different address sends immediately.
#[tokio::test]
async fn test_reset_password_cooldown_is_per_email() {
    let provider = MockProvider::new();
    provider.queue_reset(Ok(()));
    provider.queue_reset(Ok(()));
    let h = harness_with(provider, AuthOptions::default());

    h.client.reset_password("a@example.com").await.unwrap();
    let other = h.client.reset_password("b@example.com").await.unwrap();
    assert_eq!(other, ResetDispatch::Sent);
    assert_eq!(h.provider.reset_calls.load(Ordering::SeqCst), 2);
}

/// Test: a failed reset request never moves the auth status, only the
/// error slot and the sent flag.
#[tokio::test]
async fn test_reset_password_failure_keeps_status() {
    let h = harness();
    h.provider.queue_sign_in(Ok(session("u1")));
    h.client.sign_in("u1@example.com", "pw").await.unwrap();

    h.provider
        .queue_reset(Err(ProviderFailure::http(429, None, "over_email_send_rate_limit")));
    let error = h.client.reset_password("u1@example.com").await.unwrap_err();
    assert_eq!(error.kind, AuthErrorKind::ProviderRejected);

    let state = h.store.state();
    assert_eq!(state.status, AuthStatus::Authenticated);
    assert!(!state.reset_link_sent);
    assert!(state.last_error.is_some());
}

/// Test: a provider that answers slower than the request timeout resolves
/// the operation as `NetworkUnreachable`.
#[tokio::test(start_paused = true)]
async fn test_slow_provider_times_out() {
    let provider = MockProvider::new().with_delay(Duration::from_secs(60));
    provider.queue_sign_in(Ok(session("u1")));
    let h = harness_with(provider, AuthOptions::default());

    let error = h.client.sign_in("u1@example.com", "pw").await.unwrap_err();
    assert_eq!(error.kind, AuthErrorKind::NetworkUnreachable);
    assert_eq!(h.store.state().status, AuthStatus::Unauthenticated);
}

/// Test: bootstrap restores a persisted session and authenticates without
/// any user action.
#[tokio::test]
async fn test_bootstrap_restores_session() {
    let provider = Arc::new(MockProvider::new());
    provider.queue_restore(Ok(Some(session("u1"))));
    let store = SessionStore::new();

    let handle = bootstrap(store.clone(), provider, Duration::from_secs(5)).await;

    let state = store.state();
    assert_eq!(state.status, AuthStatus::Authenticated);
    assert_eq!(state.session.unwrap().principal_id, "u1");
    assert!(state.last_error.is_none());
    handle.shutdown();
}

/// Test: with nothing persisted, bootstrap settles unauthenticated with no
/// error; the store never stays in `Initializing`.
#[tokio::test]
async fn test_bootstrap_settles_without_session() {
    let provider = Arc::new(MockProvider::new());
    let store = SessionStore::new();
    assert_eq!(store.state().status, AuthStatus::Initializing);

    let handle = bootstrap(store.clone(), provider, Duration::from_secs(5)).await;

    let state = store.state();
    assert_eq!(state.status, AuthStatus::Unauthenticated);
    assert!(state.last_error.is_none());
    handle.shutdown();
}

/// Test: a failed restore fails closed: unauthenticated, with the failure
/// classified into `last_error` so the UI can tell "logged out" from
/// "couldn't check".
#[tokio::test]
async fn test_bootstrap_fails_closed() {
    let provider = Arc::new(MockProvider::new());
    provider.queue_restore(Err(network_failure()));
    let store = SessionStore::new();

    let handle = bootstrap(store.clone(), provider, Duration::from_secs(5)).await;

    let state = store.state();
    assert_eq!(state.status, AuthStatus::Unauthenticated);
    assert_eq!(
        state.last_error.unwrap().kind,
        AuthErrorKind::NetworkUnreachable
    );
    handle.shutdown();
}

/// Test: a restore that hangs past the timeout also fails closed as
/// unreachable.
#[tokio::test(start_paused = true)]
async fn test_bootstrap_restore_timeout() {
    let provider = Arc::new(MockProvider::new().with_delay(Duration::from_secs(60)));
    provider.queue_restore(Ok(Some(session("u1"))));
    let store = SessionStore::new();

    let handle = bootstrap(store.clone(), provider, Duration::from_secs(5)).await;

    let state = store.state();
    assert_eq!(state.status, AuthStatus::Unauthenticated);
    assert_eq!(
        state.last_error.unwrap().kind,
        AuthErrorKind::NetworkUnreachable
    );
    handle.shutdown();
}

/// Test: provider-pushed session changes flow through bootstrap into the
/// store, in both directions.
#[tokio::test]
async fn test_bootstrap_forwards_pushed_changes() {
    let provider = Arc::new(MockProvider::new());
    let store = SessionStore::new();
    let handle = bootstrap(store.clone(), provider.clone(), Duration::from_secs(5)).await;

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let _subscription = store.subscribe(move |state| {
        let _ = tx.send(state.status);
    });

    provider.push_change(Some(session("u1")));
    let status = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(status, AuthStatus::Authenticated);
    assert_eq!(store.state().session.unwrap().principal_id, "u1");

    provider.push_change(None);
    let status = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(status, AuthStatus::Unauthenticated);
    handle.shutdown();
}

/// Test: one committed transition notifies every live subscriber exactly
/// once; an unsubscribed listener hears nothing.
#[tokio::test]
async fn test_subscriber_fanout_exactly_once() {
    let h = harness();
    h.provider.queue_sign_in(Ok(session("u1")));

    let counters: Vec<Arc<AtomicUsize>> =
        (0..3).map(|_| Arc::new(AtomicUsize::new(0))).collect();
    let subscriptions: Vec<_> = counters
        .iter()
        .map(|counter| {
            let counter = counter.clone();
            h.store.subscribe(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
        })
        .collect();

    let dropped_counter = Arc::new(AtomicUsize::new(0));
    {
        let counter = dropped_counter.clone();
        let subscription = h.store.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        subscription.unsubscribe();
    }

    h.client.sign_in("u1@example.com", "pw").await.unwrap();

    for counter in &counters {
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
    assert_eq!(dropped_counter.load(Ordering::SeqCst), 0);
    drop(subscriptions);
}

/// Test: the busy flag is raised while an operation is in flight and
/// lowered by the time its transition is observable.
#[tokio::test]
async fn test_busy_during_operation() {
    let h = harness();
    h.provider.queue_sign_in(Ok(session("u1")));

    let observed = Arc::new(Mutex::new(Vec::new()));
    let _subscription = {
        let observed = observed.clone();
        let store = h.store.clone();
        h.store.subscribe(move |_| {
            observed.lock().unwrap().push(store.is_busy());
        })
    };

    assert!(!h.store.is_busy());
    h.client.sign_in("u1@example.com", "pw").await.unwrap();
    assert!(!h.store.is_busy());

    // The commit happens while the operation guard is still held.
    assert_eq!(observed.lock().unwrap().as_slice(), &[true]);
}
