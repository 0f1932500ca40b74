//! Client-side core of the notes app: credential validation, the sign-in orchestrator,
//! its outbound effect channel, and the HTTP backend that authenticates and synchronizes.

pub mod capabilities;
pub mod effects;
pub mod remote;
pub mod sign_in;
pub mod validation;

pub use capabilities::{
    AuthEvent, Authenticator, MissingAuthenticator, MissingNoteSynchronizer, NoteSynchronizer,
    SessionIdentityProvider, SignedOut, StoredSessionIdentity, SESSION_ID_KEY, SESSION_NAMESPACE,
};
pub use effects::{effect_channel, EffectReceiver, EffectSender, UiEffect};
pub use remote::{BackendError, HttpNotesBackend};
pub use sign_in::{
    Credentials, SignInDependencies, SignInEvent, SignInOrchestrator, SignInState, EMAIL_KEY,
    PASSWORD_KEY, SIGN_IN_NAMESPACE, SYNC_FAILED_MESSAGE, UNEXPECTED_ERROR_MESSAGE,
};
pub use validation::{CredentialValidator, DefaultCredentialPolicy, ValidationResult};
