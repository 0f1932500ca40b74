use super::*;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::stream::{self, BoxStream};
use storage::MemoryStateStore;
use tokio::sync::Notify;

use crate::validation::DefaultCredentialPolicy;

const VALID_EMAIL: &str = "jane@example.com";
const VALID_PASSWORD: &str = "abcd1234";

#[derive(Default)]
struct CountingValidator {
    policy: DefaultCredentialPolicy,
    email_calls: AtomicUsize,
    password_calls: AtomicUsize,
}

impl CredentialValidator for CountingValidator {
    fn validate_email(&self, email: &str) -> ValidationResult {
        self.email_calls.fetch_add(1, Ordering::SeqCst);
        self.policy.validate_email(email)
    }

    fn validate_password(&self, password: &str) -> ValidationResult {
        self.password_calls.fetch_add(1, Ordering::SeqCst);
        self.policy.validate_password(password)
    }
}

struct ScriptedAuthenticator {
    script: Vec<AuthEvent>,
    /// Terminal outcomes wait for this gate when set.
    gate: Option<Arc<Notify>>,
    calls: AtomicUsize,
    last_credentials: StdMutex<Option<(String, String)>>,
}

impl ScriptedAuthenticator {
    fn new(script: Vec<AuthEvent>) -> Self {
        Self {
            script,
            gate: None,
            calls: AtomicUsize::new(0),
            last_credentials: StdMutex::new(None),
        }
    }

    fn gated(script: Vec<AuthEvent>, gate: Arc<Notify>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::new(script)
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Authenticator for ScriptedAuthenticator {
    fn authenticate(&self, email: &str, password: &str) -> BoxStream<'static, AuthEvent> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_credentials.lock().expect("lock") = Some((email.into(), password.into()));
        let gate = self.gate.clone();
        stream::iter(self.script.clone())
            .then(move |event| {
                let gate = gate.clone();
                async move {
                    if event != AuthEvent::Loading {
                        if let Some(gate) = gate {
                            gate.notified().await;
                        }
                    }
                    event
                }
            })
            .boxed()
    }
}

#[derive(Default)]
struct FakeSynchronizer {
    fail: bool,
    /// Synchronization waits for this gate when set.
    gate: Option<Arc<Notify>>,
    calls: AtomicUsize,
}

#[async_trait]
impl NoteSynchronizer for FakeSynchronizer {
    async fn synchronize(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if self.fail {
            return Err(anyhow!("backend offline"));
        }
        Ok(())
    }
}

struct FixedSession(String);

#[async_trait]
impl SessionIdentityProvider for FixedSession {
    async fn session_identity(&self) -> Result<String> {
        Ok(self.0.clone())
    }
}

struct Harness {
    validator: Arc<CountingValidator>,
    authenticator: Arc<ScriptedAuthenticator>,
    synchronizer: Arc<FakeSynchronizer>,
    session: String,
    saved_state: Arc<MemoryStateStore>,
}

impl Harness {
    fn new(authenticator: ScriptedAuthenticator) -> Self {
        Self {
            validator: Arc::new(CountingValidator::default()),
            authenticator: Arc::new(authenticator),
            synchronizer: Arc::new(FakeSynchronizer::default()),
            session: String::new(),
            saved_state: Arc::new(MemoryStateStore::new()),
        }
    }

    fn succeeding() -> Self {
        Self::new(ScriptedAuthenticator::new(vec![
            AuthEvent::Loading,
            AuthEvent::Success,
        ]))
    }

    fn with_failing_sync(mut self) -> Self {
        self.synchronizer = Arc::new(FakeSynchronizer {
            fail: true,
            ..FakeSynchronizer::default()
        });
        self
    }

    async fn start(&self) -> (SignInOrchestrator, EffectReceiver) {
        SignInOrchestrator::start(SignInDependencies {
            validator: self.validator.clone(),
            authenticator: self.authenticator.clone(),
            synchronizer: self.synchronizer.clone(),
            session: Arc::new(FixedSession(self.session.clone())),
            saved_state: self.saved_state.clone(),
        })
        .await
    }

    fn sync_calls(&self) -> usize {
        self.synchronizer.calls.load(Ordering::SeqCst)
    }
}

async fn enter_credentials(orchestrator: &SignInOrchestrator, email: &str, password: &str) {
    orchestrator
        .on_event(SignInEvent::EmailChanged(email.into()))
        .await;
    orchestrator
        .on_event(SignInEvent::PasswordChanged(password.into()))
        .await;
}

fn drain(receiver: &mut EffectReceiver) -> Vec<UiEffect> {
    std::iter::from_fn(|| receiver.try_recv()).collect()
}

#[tokio::test]
async fn blank_email_short_circuits_password_check_and_authentication() {
    let harness = Harness::succeeding();
    let (orchestrator, mut effects) = harness.start().await;

    enter_credentials(&orchestrator, "", "x").await;
    orchestrator.on_event(SignInEvent::SubmitRequested).await;
    orchestrator.wait_idle().await;

    assert_eq!(
        drain(&mut effects),
        vec![UiEffect::ShowSnackbar("The email can't be blank".into())]
    );
    assert_eq!(harness.validator.email_calls.load(Ordering::SeqCst), 1);
    assert_eq!(harness.validator.password_calls.load(Ordering::SeqCst), 0);
    assert_eq!(harness.authenticator.calls(), 0);
    assert_eq!(orchestrator.state().await, SignInState::Idle);
}

#[tokio::test]
async fn weak_password_is_reported_after_email_passes() {
    let harness = Harness::succeeding();
    let (orchestrator, mut effects) = harness.start().await;

    enter_credentials(&orchestrator, VALID_EMAIL, "short").await;
    orchestrator.on_event(SignInEvent::SubmitRequested).await;

    assert_eq!(
        drain(&mut effects),
        vec![UiEffect::ShowSnackbar(
            "The password needs to consist of at least 8 characters".into()
        )]
    );
    assert_eq!(harness.validator.email_calls.load(Ordering::SeqCst), 1);
    assert_eq!(harness.validator.password_calls.load(Ordering::SeqCst), 1);
    assert_eq!(harness.authenticator.calls(), 0);
    assert_eq!(orchestrator.state().await, SignInState::Idle);
}

#[tokio::test]
async fn successful_sign_in_synchronizes_then_navigates() {
    let harness = Harness::succeeding();
    let (orchestrator, mut effects) = harness.start().await;

    enter_credentials(&orchestrator, VALID_EMAIL, VALID_PASSWORD).await;
    orchestrator.on_event(SignInEvent::SubmitRequested).await;
    orchestrator.wait_idle().await;

    assert_eq!(
        drain(&mut effects),
        vec![
            UiEffect::ShowProgress(true),
            UiEffect::ShowProgress(false),
            UiEffect::NavigateToNoteList,
        ]
    );
    assert_eq!(orchestrator.state().await, SignInState::Ready);
    assert_eq!(harness.sync_calls(), 1);
    assert_eq!(
        *harness
            .authenticator
            .last_credentials
            .lock()
            .expect("lock"),
        Some((VALID_EMAIL.to_string(), VALID_PASSWORD.to_string()))
    );
    assert_eq!(orchestrator.credentials().await, Credentials::default());
    assert_eq!(harness.saved_state.load(EMAIL_KEY).await.expect("load"), None);
}

#[tokio::test]
async fn authentication_error_without_message_uses_fallback_and_allows_retry() {
    let harness = Harness::new(ScriptedAuthenticator::new(vec![
        AuthEvent::Loading,
        AuthEvent::Error(None),
    ]));
    let (orchestrator, mut effects) = harness.start().await;

    enter_credentials(&orchestrator, VALID_EMAIL, VALID_PASSWORD).await;
    orchestrator.on_event(SignInEvent::SubmitRequested).await;
    orchestrator.wait_idle().await;

    assert_eq!(
        drain(&mut effects),
        vec![
            UiEffect::ShowProgress(true),
            UiEffect::ShowSnackbar(UNEXPECTED_ERROR_MESSAGE.into()),
            UiEffect::ShowProgress(false),
        ]
    );
    assert_eq!(orchestrator.state().await, SignInState::Idle);
    assert_eq!(harness.sync_calls(), 0);

    orchestrator.on_event(SignInEvent::SubmitRequested).await;
    orchestrator.wait_idle().await;
    assert_eq!(harness.authenticator.calls(), 2);
    assert_eq!(drain(&mut effects).len(), 3);
}

#[tokio::test]
async fn authentication_error_message_is_shown_verbatim() {
    let harness = Harness::new(ScriptedAuthenticator::new(vec![AuthEvent::Error(Some(
        "Wrong email or password".into(),
    ))]));
    let (orchestrator, mut effects) = harness.start().await;

    enter_credentials(&orchestrator, VALID_EMAIL, VALID_PASSWORD).await;
    orchestrator.on_event(SignInEvent::SubmitRequested).await;
    orchestrator.wait_idle().await;

    assert_eq!(
        drain(&mut effects),
        vec![
            UiEffect::ShowProgress(true),
            UiEffect::ShowSnackbar("Wrong email or password".into()),
            UiEffect::ShowProgress(false),
        ]
    );
}

#[tokio::test]
async fn authentication_stream_without_outcome_counts_as_error() {
    let harness = Harness::new(ScriptedAuthenticator::new(vec![AuthEvent::Loading]));
    let (orchestrator, mut effects) = harness.start().await;

    enter_credentials(&orchestrator, VALID_EMAIL, VALID_PASSWORD).await;
    orchestrator.on_event(SignInEvent::SubmitRequested).await;
    orchestrator.wait_idle().await;

    assert_eq!(
        drain(&mut effects),
        vec![
            UiEffect::ShowProgress(true),
            UiEffect::ShowSnackbar(UNEXPECTED_ERROR_MESSAGE.into()),
            UiEffect::ShowProgress(false),
        ]
    );
    assert_eq!(orchestrator.state().await, SignInState::Idle);
}

#[tokio::test]
async fn second_submit_while_authenticating_is_ignored() {
    let gate = Arc::new(Notify::new());
    let harness = Harness::new(ScriptedAuthenticator::gated(
        vec![AuthEvent::Loading, AuthEvent::Success],
        gate.clone(),
    ));
    let (orchestrator, mut effects) = harness.start().await;

    enter_credentials(&orchestrator, VALID_EMAIL, VALID_PASSWORD).await;
    orchestrator.on_event(SignInEvent::SubmitRequested).await;
    assert_eq!(orchestrator.state().await, SignInState::Authenticating);
    orchestrator.on_event(SignInEvent::SubmitRequested).await;

    gate.notify_one();
    orchestrator.wait_idle().await;

    assert_eq!(harness.authenticator.calls(), 1);
    assert_eq!(harness.validator.email_calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        drain(&mut effects),
        vec![
            UiEffect::ShowProgress(true),
            UiEffect::ShowProgress(false),
            UiEffect::NavigateToNoteList,
        ]
    );
}

#[tokio::test]
async fn existing_session_navigates_without_validation_or_authentication() {
    let mut harness = Harness::succeeding();
    harness.session = "session-token".into();
    let (orchestrator, mut effects) = harness.start().await;

    assert_eq!(drain(&mut effects), vec![UiEffect::NavigateToNoteList]);
    assert_eq!(orchestrator.state().await, SignInState::Ready);

    orchestrator.on_event(SignInEvent::SubmitRequested).await;
    orchestrator.wait_idle().await;
    assert_eq!(harness.validator.email_calls.load(Ordering::SeqCst), 0);
    assert_eq!(harness.authenticator.calls(), 0);
    assert!(drain(&mut effects).is_empty());
}

#[tokio::test]
async fn register_request_navigates_and_ends_the_flow() {
    let harness = Harness::succeeding();
    let (orchestrator, mut effects) = harness.start().await;
    enter_credentials(&orchestrator, VALID_EMAIL, VALID_PASSWORD).await;

    orchestrator.on_event(SignInEvent::RegisterRequested).await;
    assert_eq!(
        orchestrator.state().await,
        SignInState::NavigatedToRegister
    );
    assert_eq!(orchestrator.credentials().await, Credentials::default());

    orchestrator.on_event(SignInEvent::SubmitRequested).await;
    orchestrator.on_event(SignInEvent::RegisterRequested).await;
    assert_eq!(drain(&mut effects), vec![UiEffect::NavigateToRegister]);
    assert_eq!(harness.authenticator.calls(), 0);
}

#[tokio::test]
async fn failed_synchronization_still_navigates_with_notice() {
    let harness = Harness::succeeding().with_failing_sync();
    let (orchestrator, mut effects) = harness.start().await;

    enter_credentials(&orchestrator, VALID_EMAIL, VALID_PASSWORD).await;
    orchestrator.on_event(SignInEvent::SubmitRequested).await;
    orchestrator.wait_idle().await;

    assert_eq!(
        drain(&mut effects),
        vec![
            UiEffect::ShowProgress(true),
            UiEffect::ShowSnackbar(SYNC_FAILED_MESSAGE.into()),
            UiEffect::ShowProgress(false),
            UiEffect::NavigateToNoteList,
        ]
    );
    assert_eq!(orchestrator.state().await, SignInState::Ready);
    assert_eq!(harness.sync_calls(), 1);
}

#[tokio::test]
async fn credentials_are_restored_and_persisted() {
    let mut harness = Harness::succeeding();
    harness.saved_state = Arc::new(MemoryStateStore::with_values([
        (EMAIL_KEY, "restored@example.com"),
        (PASSWORD_KEY, "restored1"),
    ]));
    let (orchestrator, _effects) = harness.start().await;

    assert_eq!(
        orchestrator.credentials().await,
        Credentials {
            email: "restored@example.com".into(),
            password: "restored1".into(),
        }
    );

    orchestrator
        .on_event(SignInEvent::EmailChanged("new@example.com".into()))
        .await;
    assert_eq!(
        harness.saved_state.load(EMAIL_KEY).await.expect("load"),
        Some("new@example.com".to_string())
    );
    assert_eq!(
        harness.saved_state.load(PASSWORD_KEY).await.expect("load"),
        Some("restored1".to_string())
    );
}

#[tokio::test]
async fn close_cancels_inflight_sign_in_and_discards_effects() {
    let gate = Arc::new(Notify::new());
    let harness = Harness::new(ScriptedAuthenticator::gated(
        vec![AuthEvent::Loading, AuthEvent::Success],
        gate.clone(),
    ));
    let (orchestrator, mut effects) = harness.start().await;

    enter_credentials(&orchestrator, VALID_EMAIL, VALID_PASSWORD).await;
    orchestrator.on_event(SignInEvent::SubmitRequested).await;
    orchestrator.close().await;
    gate.notify_one();
    tokio::task::yield_now().await;

    assert_eq!(effects.recv().await, None);
    assert_eq!(orchestrator.state().await, SignInState::Closed);
    assert_eq!(harness.sync_calls(), 0);
}

#[tokio::test]
async fn credential_changes_after_ready_are_ignored() {
    let harness = Harness::succeeding();
    let (orchestrator, _effects) = harness.start().await;

    enter_credentials(&orchestrator, VALID_EMAIL, VALID_PASSWORD).await;
    orchestrator.on_event(SignInEvent::SubmitRequested).await;
    orchestrator.wait_idle().await;
    assert_eq!(orchestrator.state().await, SignInState::Ready);

    orchestrator
        .on_event(SignInEvent::EmailChanged("late@example.com".into()))
        .await;
    assert_eq!(orchestrator.credentials().await.email, "");
    assert_eq!(harness.saved_state.load(EMAIL_KEY).await.expect("load"), None);
}

#[tokio::test]
async fn close_releases_submit_blocked_on_full_effect_buffer() {
    let harness = Harness::succeeding();
    let (orchestrator, _effects) = harness.start().await;
    let orchestrator = Arc::new(orchestrator);

    for _ in 0..crate::effects::EFFECT_CHANNEL_CAPACITY {
        orchestrator.on_event(SignInEvent::SubmitRequested).await;
    }
    let blocked = tokio::spawn({
        let orchestrator = orchestrator.clone();
        async move { orchestrator.on_event(SignInEvent::SubmitRequested).await }
    });
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert!(!blocked.is_finished());

    orchestrator.close().await;
    tokio::time::timeout(std::time::Duration::from_secs(2), blocked)
        .await
        .expect("submit still blocked after close")
        .expect("join");
    assert_eq!(orchestrator.state().await, SignInState::Closed);
}

#[tokio::test]
async fn close_before_ready_forgets_saved_credentials() {
    let harness = Harness::new(ScriptedAuthenticator::new(vec![AuthEvent::Error(None)]));
    let (orchestrator, _effects) = harness.start().await;

    enter_credentials(&orchestrator, VALID_EMAIL, VALID_PASSWORD).await;
    orchestrator.on_event(SignInEvent::SubmitRequested).await;
    orchestrator.wait_idle().await;
    assert_eq!(
        harness.saved_state.load(PASSWORD_KEY).await.expect("load"),
        Some(VALID_PASSWORD.to_string())
    );

    orchestrator.close().await;
    assert_eq!(orchestrator.credentials().await, Credentials::default());
    assert_eq!(harness.saved_state.load(EMAIL_KEY).await.expect("load"), None);
    assert_eq!(harness.saved_state.load(PASSWORD_KEY).await.expect("load"), None);
}

#[tokio::test]
async fn credential_edit_during_synchronization_is_not_kept_after_ready() {
    let gate = Arc::new(Notify::new());
    let mut harness = Harness::succeeding();
    harness.synchronizer = Arc::new(FakeSynchronizer {
        gate: Some(gate.clone()),
        ..FakeSynchronizer::default()
    });
    let (orchestrator, _effects) = harness.start().await;

    enter_credentials(&orchestrator, VALID_EMAIL, VALID_PASSWORD).await;
    orchestrator.on_event(SignInEvent::SubmitRequested).await;
    while orchestrator.state().await != SignInState::Synchronizing {
        tokio::task::yield_now().await;
    }
    orchestrator
        .on_event(SignInEvent::EmailChanged("late@example.com".into()))
        .await;

    gate.notify_one();
    orchestrator.wait_idle().await;

    assert_eq!(orchestrator.state().await, SignInState::Ready);
    assert_eq!(orchestrator.credentials().await, Credentials::default());
    assert_eq!(harness.saved_state.load(EMAIL_KEY).await.expect("load"), None);
}
