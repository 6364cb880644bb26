//! Access guard: decides whether a protected page renders, shows a loading
//! indicator, or sends the user elsewhere.
//!
//! The decision is recomputed from scratch on every render; nothing granted
//! earlier survives a session change. Redirects go through the deferred
//! [`Redirector`] and are latched per (location, decision) so a page that
//! re-renders while still denied does not navigate again.

use std::sync::Arc;

use tokio::sync::watch;

use crate::identity::{Role, SessionSnapshot};
use crate::nav::Redirector;

use super::route::{self, RouteRequirement};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    Unauthenticated,
    RoleNotAllowed(Role),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    Loading,
    Denied { target: String, reason: DenyReason },
    Granted,
}

/// Pure decision for `session` opening `location` under `requirement`.
pub fn evaluate(requirement: &RouteRequirement, session: &SessionSnapshot, location: &str) -> GuardDecision {
    if session.is_loading {
        return GuardDecision::Loading;
    }
    // errors without a user land here too: fail closed
    let Some(user) = session.user.as_ref() else {
        return GuardDecision::Denied {
            target: route::sign_in_target(location),
            reason: DenyReason::Unauthenticated,
        };
    };
    if requirement.allows(user.role) {
        GuardDecision::Granted
    } else {
        GuardDecision::Denied {
            target: user.role.default_path().to_string(),
            reason: DenyReason::RoleNotAllowed(user.role),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rendered<T> {
    Loading,
    Redirecting(String),
    Content(T),
}

impl<T> Rendered<T> {
    pub fn is_content(&self) -> bool { matches!(self, Rendered::Content(_)) }
}

pub struct AccessGuard {
    requirement: &'static RouteRequirement,
    // route prefix this guard is mounted on; None covers every location
    scope: Option<&'static str>,
    redirector: Arc<Redirector>,
    latch: Option<(String, GuardDecision)>,
    issued: usize,
}

impl AccessGuard {
    pub fn new(requirement: &'static RouteRequirement, redirector: Arc<Redirector>) -> Self {
        Self { requirement, scope: None, redirector, latch: None, issued: 0 }
    }

    /// Guard mounted on the route table entry covering `location`; None for
    /// public pages and unknown paths.
    pub fn for_location(location: &str, redirector: Arc<Redirector>) -> Option<Self> {
        let page = route::lookup(location)?;
        let req = page.requirement?;
        Some(Self { scope: Some(page.prefix), ..Self::new(req, redirector) })
    }

    /// Whether `location` is inside the page this guard is mounted on.
    pub fn covers(&self, location: &str) -> bool {
        match self.scope {
            Some(prefix) => route::matches_prefix(route::path_of(location), prefix),
            None => true,
        }
    }

    pub fn requirement(&self) -> &'static RouteRequirement { self.requirement }

    /// Redirects this guard has handed to the redirector so far.
    pub fn redirects_issued(&self) -> usize { self.issued }

    pub fn render<T, F>(&mut self, session: &SessionSnapshot, location: &str, children: F) -> Rendered<T>
    where
        F: FnOnce() -> T,
    {
        let decision = evaluate(self.requirement, session, location);
        match decision {
            GuardDecision::Loading => {
                self.latch = None;
                Rendered::Loading
            }
            GuardDecision::Granted => {
                self.latch = None;
                Rendered::Content(children())
            }
            GuardDecision::Denied { target, reason } => {
                let key = GuardDecision::Denied { target: target.clone(), reason };
                let latched = matches!(&self.latch, Some((loc, d)) if loc == location && *d == key);
                if !latched {
                    tracing::info!(target: "tripdesk::guard", "denied {} ({:?}), redirecting to {}", location, reason, target);
                    self.redirector.redirect(&target);
                    self.issued += 1;
                    self.latch = Some((location.to_string(), key));
                }
                Rendered::Redirecting(target)
            }
        }
    }

    /// Re-render whenever the session or the location changes. Returns once
    /// the location leaves the guard's scope or both channels are closed.
    /// `on_render` sees each outcome.
    pub async fn watch<F>(
        &mut self,
        mut session: watch::Receiver<SessionSnapshot>,
        mut location: watch::Receiver<String>,
        mut on_render: F,
    ) where
        F: FnMut(&Rendered<()>),
    {
        let mut session_open = true;
        let mut location_open = true;
        loop {
            let snap = session.borrow_and_update().clone();
            let loc = location.borrow_and_update().clone();
            if !self.covers(&loc) {
                tracing::debug!(target: "tripdesk::guard", "left guarded page for {}", loc);
                return;
            }
            let view = self.render(&snap, &loc, || ());
            on_render(&view);

            loop {
                if !session_open && !location_open { return; }
                tokio::select! {
                    r = session.changed(), if session_open => {
                        if r.is_ok() { break; }
                        session_open = false;
                    }
                    r = location.changed(), if location_open => {
                        if r.is_ok() { break; }
                        location_open = false;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::route::{ACCOUNT_ROUTES, AGENT_ROUTES, OPERATOR_ROUTES, SIGN_IN_PATH};
    use crate::error::AuthError;
    use crate::identity::{User, AGENT_DASHBOARD};
    use crate::nav::{MemoryNavigator, Navigator};

    fn loaded(role: Option<Role>) -> SessionSnapshot {
        SessionSnapshot {
            user: role.map(|r| User::new("u1", r, "Test User")),
            is_loading: false,
            error: None,
        }
    }

    fn guard(req: &'static RouteRequirement, start: &str) -> (AccessGuard, Arc<Redirector>, Arc<MemoryNavigator>) {
        let nav = Arc::new(MemoryNavigator::new(start));
        let redirector = Arc::new(Redirector::new(nav.clone()));
        (AccessGuard::new(req, redirector.clone()), redirector, nav)
    }

    #[test]
    fn grants_iff_role_in_allow_list() {
        for req in [&OPERATOR_ROUTES, &AGENT_ROUTES] {
            for role in Role::ALL {
                let d = evaluate(req, &loaded(Some(role)), "/x");
                assert_eq!(d == GuardDecision::Granted, req.allows(role), "{:?} {:?}", role, req);
            }
        }
    }

    #[test]
    fn loading_never_redirects() {
        let (mut g, r, _nav) = guard(&OPERATOR_ROUTES, "/operator");
        let mut snap = loaded(Some(Role::TravelAgent));
        snap.is_loading = true;
        for _ in 0..3 {
            assert_eq!(g.render(&snap, "/operator", || "page"), Rendered::Loading);
        }
        assert_eq!(g.redirects_issued(), 0);
        assert_eq!(r.pending(), 0);
    }

    #[test]
    fn role_mismatch_goes_to_role_default() {
        let (mut g, r, nav) = guard(&OPERATOR_ROUTES, "/operator");
        let v = g.render(&loaded(Some(Role::TravelAgent)), "/operator", || "page");
        assert_eq!(v, Rendered::Redirecting(AGENT_DASHBOARD.to_string()));
        r.commit();
        assert_eq!(nav.current_path(), AGENT_DASHBOARD);
    }

    #[test]
    fn unauthenticated_goes_to_sign_in_with_return_target() {
        let (mut g, _r, _nav) = guard(&OPERATOR_ROUTES, "/operator/packages");
        let v = g.render(&loaded(None), "/operator/packages", || "page");
        assert_eq!(v, Rendered::Redirecting(format!("{}?redirect=%2Foperator%2Fpackages", SIGN_IN_PATH)));
    }

    #[test]
    fn error_without_user_fails_closed() {
        let mut snap = loaded(None);
        snap.error = Some(AuthError::network("network_failure", "offline"));
        assert_eq!(evaluate(&OPERATOR_ROUTES, &snap, "/operator"), evaluate(&OPERATOR_ROUTES, &loaded(None), "/operator"));
    }

    #[test]
    fn empty_allow_list_grants_any_user() {
        let (mut g, _r, _nav) = guard(&ACCOUNT_ROUTES, "/account");
        assert_eq!(g.render(&loaded(Some(Role::Admin)), "/account", || 7), Rendered::Content(7));
        assert!(matches!(g.render(&loaded(None), "/account", || 7), Rendered::Redirecting(_)));
    }

    #[test]
    fn repeated_denied_renders_redirect_once() {
        let (mut g, r, _nav) = guard(&OPERATOR_ROUTES, "/operator");
        let snap = loaded(Some(Role::TravelAgent));
        for _ in 0..5 {
            assert!(matches!(g.render(&snap, "/operator", || ()), Rendered::Redirecting(_)));
        }
        assert_eq!(g.redirects_issued(), 1);
        assert_eq!(r.pending(), 1);
    }

    #[test]
    fn latch_resets_after_grant() {
        let (mut g, _r, _nav) = guard(&OPERATOR_ROUTES, "/operator");
        g.render(&loaded(None), "/operator", || ());
        assert!(g.render(&loaded(Some(Role::TourOperator)), "/operator", || ()).is_content());
        // signed out again: a fresh denial, so a fresh redirect
        g.render(&loaded(None), "/operator", || ());
        assert_eq!(g.redirects_issued(), 2);
    }

    #[test]
    fn for_location_skips_public_pages() {
        let nav = Arc::new(MemoryNavigator::new("/"));
        let r = Arc::new(Redirector::new(nav));
        assert!(AccessGuard::for_location("/", r.clone()).is_none());
        assert!(AccessGuard::for_location("/auth/login", r.clone()).is_none());
        let g = AccessGuard::for_location("/admin/users", r).unwrap();
        assert!(!g.requirement().allows(Role::TravelAgent));
        assert!(g.covers("/admin"));
        assert!(g.covers("/admin/users?page=2"));
        assert!(!g.covers("/agent"));
    }
}
