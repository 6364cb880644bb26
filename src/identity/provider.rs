use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use tokio::task::JoinHandle;

use crate::error::AuthResult;
use crate::tprintln;

use super::client::AuthClient;
use super::session::SessionStore;
use super::user::User;

static CURRENT: Lazy<RwLock<Option<Arc<SessionStore>>>> = Lazy::new(|| RwLock::new(None));

/// Process-wide owner of the session store. Lifecycle follows the host:
/// `start` at application start, `teardown` at exit.
pub struct SessionProvider;

impl SessionProvider {
    /// Install a fresh store (loading, no user), replacing any previous one.
    pub fn install(client: Arc<dyn AuthClient>) -> Arc<SessionStore> {
        let store = Arc::new(SessionStore::new(client));
        let prev = CURRENT.write().replace(store.clone());
        if prev.is_some() {
            tracing::debug!(target: "tripdesk::session", "replaced existing session store");
        }
        tprintln!("provider.install");
        store
    }

    /// Install and kick off the initial session resolution in the background.
    /// Must be called from within a tokio runtime.
    pub fn start(client: Arc<dyn AuthClient>) -> (Arc<SessionStore>, JoinHandle<AuthResult<Option<User>>>) {
        let store = Self::install(client);
        let bg = store.clone();
        let handle = tokio::spawn(async move { bg.refresh_session().await });
        (store, handle)
    }

    pub fn current() -> Option<Arc<SessionStore>> { CURRENT.read().clone() }

    pub fn teardown() {
        if CURRENT.write().take().is_some() {
            tprintln!("provider.teardown");
        }
    }
}
