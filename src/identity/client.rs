use async_trait::async_trait;

use crate::error::AuthResult;

use super::user::{Credentials, User};

/// The hosted identity service as seen by the session store.
///
/// Implementations own token storage (memory, token file, cookies); the store
/// only ever sees users and errors.
#[async_trait]
pub trait AuthClient: Send + Sync {
    async fn sign_in(&self, credentials: &Credentials) -> AuthResult<User>;
    async fn sign_out(&self) -> AuthResult<()>;
    async fn reset_password(&self, email: &str) -> AuthResult<()>;
    /// Re-validate whatever session the collaborator holds. `Ok(None)` means
    /// there is no session to restore.
    async fn current_user(&self) -> AuthResult<Option<User>>;
}
