//! Sign-in screen state machine.
//!
//! Validation gates the remote call, a successful sign-in triggers note synchronization,
//! and every user-visible outcome leaves through the effect channel. At most one
//! authentication attempt runs per orchestrator; submits arriving meanwhile are ignored.

use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use futures::StreamExt;
use storage::KeyValueStore;
use tokio::{sync::Mutex, task::JoinHandle};
use tracing::{debug, error, info, warn};

use crate::{
    capabilities::{AuthEvent, Authenticator, NoteSynchronizer, SessionIdentityProvider},
    effects::{effect_channel, EffectReceiver, EffectSender, UiEffect},
    validation::{CredentialValidator, ValidationResult},
};

pub const SIGN_IN_NAMESPACE: &str = "sign_in";
pub const EMAIL_KEY: &str = "email";
pub const PASSWORD_KEY: &str = "password";

pub const UNEXPECTED_ERROR_MESSAGE: &str = "An unexpected error occurred";
pub const SYNC_FAILED_MESSAGE: &str = "Notes could not be synchronized; showing cached notes";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignInState {
    Idle,
    Validating,
    Authenticating,
    Synchronizing,
    /// Transient: an error is being surfaced before returning to `Idle`.
    Failed,
    Ready,
    NavigatedToRegister,
    Closed,
}

impl SignInState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SignInState::Ready | SignInState::NavigatedToRegister | SignInState::Closed
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignInEvent {
    EmailChanged(String),
    PasswordChanged(String),
    RegisterRequested,
    SubmitRequested,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

pub struct SignInDependencies {
    pub validator: Arc<dyn CredentialValidator>,
    pub authenticator: Arc<dyn Authenticator>,
    pub synchronizer: Arc<dyn NoteSynchronizer>,
    pub session: Arc<dyn SessionIdentityProvider>,
    /// Restores credentials across process recreation.
    pub saved_state: Arc<dyn KeyValueStore>,
}

pub struct SignInOrchestrator {
    shared: Arc<SignInShared>,
    inflight: StdMutex<Option<JoinHandle<()>>>,
}

struct SignInShared {
    validator: Arc<dyn CredentialValidator>,
    authenticator: Arc<dyn Authenticator>,
    synchronizer: Arc<dyn NoteSynchronizer>,
    saved_state: Arc<dyn KeyValueStore>,
    state: Mutex<SignInState>,
    credentials: Mutex<Credentials>,
    effects: EffectSender,
}

impl SignInOrchestrator {
    /// Restores saved credentials and checks for an existing session.
    ///
    /// A non-blank session identity moves straight to `Ready` and queues
    /// `NavigateToNoteList` without validating or authenticating anything.
    pub async fn start(deps: SignInDependencies) -> (Self, EffectReceiver) {
        let (effects, receiver) = effect_channel();
        let credentials = load_credentials(deps.saved_state.as_ref()).await;
        let identity = match deps.session.session_identity().await {
            Ok(identity) => identity,
            Err(err) => {
                warn!(error = %err, "could not read session identity; treating as signed out");
                String::new()
            }
        };

        let orchestrator = Self {
            shared: Arc::new(SignInShared {
                validator: deps.validator,
                authenticator: deps.authenticator,
                synchronizer: deps.synchronizer,
                saved_state: deps.saved_state,
                state: Mutex::new(SignInState::Idle),
                credentials: Mutex::new(credentials),
                effects,
            }),
            inflight: StdMutex::new(None),
        };

        if !identity.trim().is_empty() {
            info!("existing session found; skipping sign-in");
            orchestrator.shared.set_state(SignInState::Ready).await;
            orchestrator
                .shared
                .effects
                .send(UiEffect::NavigateToNoteList)
                .await;
        }

        (orchestrator, receiver)
    }

    pub async fn on_event(&self, event: SignInEvent) {
        match event {
            SignInEvent::EmailChanged(email) => self.change_credential(EMAIL_KEY, email).await,
            SignInEvent::PasswordChanged(password) => {
                self.change_credential(PASSWORD_KEY, password).await
            }
            SignInEvent::RegisterRequested => self.navigate_to_register().await,
            SignInEvent::SubmitRequested => self.submit().await,
        }
    }

    pub async fn state(&self) -> SignInState {
        *self.shared.state.lock().await
    }

    pub async fn credentials(&self) -> Credentials {
        self.shared.credentials.lock().await.clone()
    }

    /// Waits for the in-flight sign-in attempt, if any, to settle.
    pub async fn wait_idle(&self) {
        let handle = self.take_inflight();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                if !err.is_cancelled() {
                    error!(error = %err, "sign-in task failed");
                }
            }
        }
    }

    /// Tears the screen down: cancels in-flight work and discards undelivered effects.
    ///
    /// Unless sign-in completed, the entered credentials are forgotten, saved copies included.
    /// Remote side effects that already happened (e.g. a stored session) are kept.
    pub async fn close(&self) {
        if let Some(handle) = self.take_inflight() {
            handle.abort();
        }
        self.shared.effects.close();
        let mut state = self.shared.state.lock().await;
        if !state.is_terminal() {
            *state = SignInState::Closed;
            self.shared.clear_credentials().await;
        }
        debug!(state = ?*state, "sign-in screen closed");
    }

    async fn change_credential(&self, key: &'static str, value: String) {
        // Held until the value is saved so a concurrent finish cannot clear it first.
        let state = self.shared.state.lock().await;
        if state.is_terminal() {
            debug!(state = ?*state, key, "ignoring credential change after sign-in flow ended");
            return;
        }
        {
            let mut credentials = self.shared.credentials.lock().await;
            match key {
                EMAIL_KEY => credentials.email = value.clone(),
                _ => credentials.password = value.clone(),
            }
        }
        self.shared.persist(key, &value).await;
    }

    async fn navigate_to_register(&self) {
        {
            let mut state = self.shared.state.lock().await;
            if *state != SignInState::Idle {
                debug!(state = ?*state, "ignoring register request");
                return;
            }
            *state = SignInState::NavigatedToRegister;
        }
        self.shared.clear_credentials().await;
        self.shared.effects.send(UiEffect::NavigateToRegister).await;
    }

    async fn submit(&self) {
        let credentials = {
            let mut state = self.shared.state.lock().await;
            if *state != SignInState::Idle {
                debug!(state = ?*state, "sign-in already in progress; ignoring submit");
                return;
            }
            *state = SignInState::Validating;
            self.shared.credentials.lock().await.clone()
        };

        if let Some(message) = self.shared.validation_error(&credentials) {
            debug!(%message, "credentials rejected locally");
            self.shared.set_state(SignInState::Failed).await;
            self.shared
                .effects
                .send(UiEffect::ShowSnackbar(message))
                .await;
            self.shared.set_state(SignInState::Idle).await;
            return;
        }

        self.shared.set_state(SignInState::Authenticating).await;
        self.shared.effects.send(UiEffect::ShowProgress(true)).await;

        let mut inflight = self.inflight.lock().unwrap_or_else(PoisonError::into_inner);
        if self.shared.effects.close_requested() {
            debug!("screen closed before authentication started");
            return;
        }
        let shared = Arc::clone(&self.shared);
        *inflight = Some(tokio::spawn(async move {
            shared.run_sign_in(credentials).await
        }));
    }

    fn take_inflight(&self) -> Option<JoinHandle<()>> {
        self.inflight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

impl Drop for SignInOrchestrator {
    fn drop(&mut self) {
        if let Some(handle) = self.take_inflight() {
            handle.abort();
        }
        self.shared.effects.close();
    }
}

impl SignInShared {
    /// No-op once the screen is closed; `Closed` is final.
    async fn set_state(&self, next: SignInState) {
        let mut state = self.state.lock().await;
        if *state == SignInState::Closed {
            debug!(to = ?next, "ignoring transition after close");
            return;
        }
        debug!(from = ?*state, to = ?next, "sign-in state transition");
        *state = next;
    }

    /// Email first, then password; the password check never runs if the email fails.
    fn validation_error(&self, credentials: &Credentials) -> Option<String> {
        let email = self.validator.validate_email(&credentials.email);
        if !email.successful() {
            return Some(failure_message(&email));
        }
        let password = self.validator.validate_password(&credentials.password);
        if !password.successful() {
            return Some(failure_message(&password));
        }
        None
    }

    async fn run_sign_in(self: Arc<Self>, credentials: Credentials) {
        let mut events = self
            .authenticator
            .authenticate(&credentials.email, &credentials.password);
        loop {
            match events.next().await {
                Some(AuthEvent::Loading) => debug!("authentication in progress"),
                Some(AuthEvent::Success) => return self.finish_sign_in().await,
                Some(AuthEvent::Error(message)) => return self.fail_sign_in(message).await,
                None => {
                    warn!("authentication ended without an outcome");
                    return self.fail_sign_in(None).await;
                }
            }
        }
    }

    async fn finish_sign_in(&self) {
        self.set_state(SignInState::Synchronizing).await;
        if let Err(err) = self.synchronizer.synchronize().await {
            warn!(error = %err, "note synchronization failed; continuing with cached notes");
            self.effects
                .send(UiEffect::ShowSnackbar(SYNC_FAILED_MESSAGE.to_string()))
                .await;
        }
        self.effects.send(UiEffect::ShowProgress(false)).await;
        self.effects.send(UiEffect::NavigateToNoteList).await;

        let mut state = self.state.lock().await;
        if *state == SignInState::Closed {
            return;
        }
        *state = SignInState::Ready;
        self.clear_credentials().await;
        info!("sign-in complete");
    }

    async fn fail_sign_in(&self, message: Option<String>) {
        let message = message
            .filter(|message| !message.trim().is_empty())
            .unwrap_or_else(|| UNEXPECTED_ERROR_MESSAGE.to_string());
        warn!(%message, "sign-in failed");
        self.set_state(SignInState::Failed).await;
        self.effects.send(UiEffect::ShowSnackbar(message)).await;
        self.effects.send(UiEffect::ShowProgress(false)).await;
        self.set_state(SignInState::Idle).await;
    }

    async fn persist(&self, key: &str, value: &str) {
        if let Err(err) = self.saved_state.save(key, value).await {
            warn!(error = %err, key, "failed to persist sign-in field");
        }
    }

    async fn clear_credentials(&self) {
        *self.credentials.lock().await = Credentials::default();
        for key in [EMAIL_KEY, PASSWORD_KEY] {
            if let Err(err) = self.saved_state.remove(key).await {
                warn!(error = %err, key, "failed to clear sign-in field");
            }
        }
    }
}

fn failure_message(result: &ValidationResult) -> String {
    result
        .error_message()
        .unwrap_or(UNEXPECTED_ERROR_MESSAGE)
        .to_string()
}

async fn load_credentials(store: &dyn KeyValueStore) -> Credentials {
    let mut credentials = Credentials::default();
    for (key, field) in [
        (EMAIL_KEY, &mut credentials.email),
        (PASSWORD_KEY, &mut credentials.password),
    ] {
        match store.load_or_empty(key).await {
            Ok(value) => *field = value,
            Err(err) => warn!(error = %err, key, "failed to restore sign-in field"),
        }
    }
    credentials
}

#[cfg(test)]
#[path = "tests/sign_in_tests.rs"]
mod tests;
