//! Session store: the single source of truth for who is signed in.
//!
//! State is published as whole `SessionSnapshot` values through a watch
//! channel, so a reader sees either the old or the new snapshot and never a
//! mix. Every user-mutating call takes a ticket before it awaits the auth
//! collaborator; a completion is applied only if no newer ticket was issued
//! in the meantime, which makes the last issued request win regardless of the
//! order network responses arrive in. A failed sign-in sets no user, so it
//! hands the lead back to the request it overtook if that one is still out.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;

use crate::error::{AuthError, AuthResult};
use crate::tprintln;

use super::client::AuthClient;
use super::user::{Credentials, User};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub user: Option<User>,
    pub is_loading: bool,
    pub error: Option<AuthError>,
}

impl SessionSnapshot {
    /// State at application start: nothing resolved yet.
    pub fn initial() -> Self { Self { user: None, is_loading: true, error: None } }

    pub fn is_authenticated(&self) -> bool { !self.is_loading && self.user.is_some() }
}

impl Default for SessionSnapshot {
    fn default() -> Self { Self::initial() }
}

type Ticket = u64;

#[derive(Debug, Default)]
struct Requests {
    issued: Ticket,
    // ticket whose completion may still be applied
    latest: Ticket,
    // (ticket, latest at the time it was issued)
    in_flight: Vec<(Ticket, Ticket)>,
}

impl Requests {
    fn finish(&mut self, ticket: Ticket) -> Option<Ticket> {
        let pos = self.in_flight.iter().position(|(t, _)| *t == ticket)?;
        Some(self.in_flight.swap_remove(pos).1)
    }

    fn is_pending(&self, ticket: Ticket) -> bool {
        self.in_flight.iter().any(|(t, _)| *t == ticket)
    }
}

pub struct SessionStore {
    client: Arc<dyn AuthClient>,
    state: watch::Sender<SessionSnapshot>,
    // checked and published under the same lock
    requests: Mutex<Requests>,
}

impl SessionStore {
    pub fn new(client: Arc<dyn AuthClient>) -> Self {
        let (state, _rx) = watch::channel(SessionSnapshot::initial());
        Self { client, state, requests: Mutex::new(Requests::default()) }
    }

    pub fn snapshot(&self) -> SessionSnapshot { self.state.borrow().clone() }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> { self.state.subscribe() }

    fn issue(&self) -> Ticket {
        let mut reqs = self.requests.lock();
        reqs.issued += 1;
        let ticket = reqs.issued;
        let overtaken = reqs.latest;
        reqs.in_flight.push((ticket, overtaken));
        reqs.latest = ticket;
        ticket
    }

    /// Publish `next` computed from the current snapshot if `ticket` is still
    /// the newest, and retire the ticket. Returns false when the result was
    /// superseded.
    fn apply<F>(&self, ticket: Ticket, next: F) -> bool
    where
        F: FnOnce(&SessionSnapshot) -> SessionSnapshot,
    {
        let mut reqs = self.requests.lock();
        reqs.finish(ticket);
        if reqs.latest != ticket {
            tracing::debug!(target: "tripdesk::session", "discarding result of request {} (latest {})", ticket, reqs.latest);
            return false;
        }
        let replacement = next(&self.state.borrow());
        self.state.send_replace(replacement);
        true
    }

    /// Record a failure that leaves `user` alone. If the request this one
    /// overtook is still in flight it becomes the newest again and will settle
    /// `is_loading` itself.
    fn fail_without_user(&self, ticket: Ticket, err: &AuthError) -> bool {
        let mut reqs = self.requests.lock();
        let overtaken = reqs.finish(ticket);
        if reqs.latest != ticket || err.is_superseded() {
            return false;
        }
        let recorded = err.clone();
        let still_out = overtaken.filter(|t| reqs.is_pending(*t));
        match still_out {
            Some(prev) => {
                tracing::debug!(target: "tripdesk::session", "request {} failed, request {} leads again", ticket, prev);
                reqs.latest = prev;
                self.state.send_modify(|s| s.error = Some(recorded));
            }
            None => self.state.send_modify(|s| {
                s.error = Some(recorded);
                s.is_loading = false;
            }),
        }
        true
    }

    // Untracked writes (errors, clear_error) never touch `user`, so they don't
    // need a ticket, but they still replace the snapshot atomically.
    fn update<F>(&self, f: F)
    where
        F: FnOnce(&mut SessionSnapshot),
    {
        let _guard = self.requests.lock();
        self.state.send_modify(f);
    }

    fn mark_loading(&self, ticket: Ticket) {
        let reqs = self.requests.lock();
        if reqs.latest == ticket {
            self.state.send_modify(|s| s.is_loading = true);
        }
    }

    pub async fn sign_in(&self, credentials: &Credentials) -> AuthResult<User> {
        let ticket = self.issue();
        tracing::info!(target: "tripdesk::session", "sign-in requested for {}", credentials.email);
        let res = self.client.sign_in(credentials).await;
        match res {
            Ok(user) => {
                let applied = self.apply(ticket, |_| SessionSnapshot {
                    user: Some(user.clone()),
                    is_loading: false,
                    error: None,
                });
                if !applied { return Err(AuthError::superseded()); }
                tprintln!("session.sign_in user={} role={}", user.id, user.role);
                Ok(user)
            }
            Err(e) => {
                let recorded = self.fail_without_user(ticket, &e);
                tracing::warn!(target: "tripdesk::session", "sign-in failed: {}", e);
                if !recorded { return Err(AuthError::superseded()); }
                Err(e)
            }
        }
    }

    pub async fn sign_out(&self) -> AuthResult<()> {
        let ticket = self.issue();
        let res = self.client.sign_out().await;
        let err = res.as_ref().err().cloned();
        // The local session goes away even if revocation failed.
        let applied = self.apply(ticket, |_| SessionSnapshot {
            user: None,
            is_loading: false,
            error: err.clone(),
        });
        if let Some(e) = &err {
            tracing::warn!(target: "tripdesk::session", "sign-out revocation failed: {}", e);
        }
        if !applied { return Err(AuthError::superseded()); }
        tprintln!("session.sign_out ok={}", err.is_none());
        res
    }

    pub async fn reset_password(&self, email: &str) -> AuthResult<()> {
        match self.client.reset_password(email).await {
            Ok(()) => {
                tracing::info!(target: "tripdesk::session", "password reset requested for {}", email);
                Ok(())
            }
            Err(e) => {
                let recorded = e.clone();
                self.update(move |s| s.error = Some(recorded));
                tracing::warn!(target: "tripdesk::session", "password reset failed: {}", e);
                Err(e)
            }
        }
    }

    /// Re-validate the collaborator's session. Runs at startup and whenever
    /// the host regains focus.
    pub async fn refresh_session(&self) -> AuthResult<Option<User>> {
        let ticket = self.issue();
        self.mark_loading(ticket);
        let res = self.client.current_user().await;
        let applied = match &res {
            Ok(user) => self.apply(ticket, |cur| SessionSnapshot {
                user: user.clone(),
                is_loading: false,
                error: cur.error.clone(),
            }),
            Err(e) => {
                tracing::warn!(target: "tripdesk::session", "session refresh failed: {}", e);
                self.apply(ticket, |_| SessionSnapshot {
                    user: None,
                    is_loading: false,
                    error: Some(e.clone()),
                })
            }
        };
        if !applied { return Err(AuthError::superseded()); }
        tprintln!("session.refresh authenticated={}", matches!(res, Ok(Some(_))));
        res
    }

    pub fn clear_error(&self) {
        self.update(|s| s.error = None);
    }
}
