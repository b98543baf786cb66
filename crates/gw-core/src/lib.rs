pub mod classify;
pub mod coordinator;
pub mod credential_store;
pub mod error;
pub mod events;
pub mod rotation;
pub mod state;

pub use classify::{classify_request, ClassifiedRequest};
pub use coordinator::{CoordinatorOutcome, RequestCoordinator};
pub use credential_store::CredentialStore;
pub use error::ProxyError;
pub use rotation::{RotationConfig, RotationController};
pub use state::{AppState, RuntimeSettings};
