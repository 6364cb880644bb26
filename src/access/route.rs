//! Static route table: which roles may open which page, and where users go
//! when they may not.

use std::borrow::Cow;

use crate::identity::{Role, ADMIN_DASHBOARD, AGENT_DASHBOARD, OPERATOR_DASHBOARD};

pub const HOME_PATH: &str = "/";
pub const SIGN_IN_PATH: &str = "/auth/login";
pub const RESET_PASSWORD_PATH: &str = "/auth/reset-password";
pub const ACCOUNT_PATH: &str = "/account";

/// Query parameter carrying the originally requested path to the sign-in page.
pub const RETURN_PARAM: &str = "redirect";

/// Set of roles allowed on a route. Empty means any signed-in user.
/// Built once in the static table below and compared by value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RouteRequirement {
    allowed: u8,
}

impl RouteRequirement {
    pub const ANY_AUTHENTICATED: RouteRequirement = RouteRequirement { allowed: 0 };

    pub const fn of(roles: &[Role]) -> Self {
        let mut allowed = 0u8;
        let mut i = 0;
        while i < roles.len() {
            allowed |= roles[i].bit();
            i += 1;
        }
        Self { allowed }
    }

    pub fn is_any_authenticated(&self) -> bool { self.allowed == 0 }

    pub fn allows(&self, role: Role) -> bool {
        self.is_any_authenticated() || self.allowed & role.bit() != 0
    }

    pub fn roles(&self) -> Vec<Role> {
        Role::ALL.iter().copied().filter(|r| self.allowed & r.bit() != 0).collect()
    }
}

pub static ADMIN_ROUTES: RouteRequirement = RouteRequirement::of(&[Role::SuperAdmin, Role::Admin]);
pub static OPERATOR_ROUTES: RouteRequirement = RouteRequirement::of(&[Role::TourOperator, Role::Admin, Role::SuperAdmin]);
pub static AGENT_ROUTES: RouteRequirement = RouteRequirement::of(&[Role::TravelAgent, Role::Admin, Role::SuperAdmin]);
pub static ACCOUNT_ROUTES: RouteRequirement = RouteRequirement::ANY_AUTHENTICATED;

#[derive(Debug)]
pub struct Route {
    pub prefix: &'static str,
    pub title: &'static str,
    /// None for public pages.
    pub requirement: Option<&'static RouteRequirement>,
}

pub static ROUTES: &[Route] = &[
    Route { prefix: HOME_PATH, title: "Tripdesk", requirement: None },
    Route { prefix: SIGN_IN_PATH, title: "Sign in", requirement: None },
    Route { prefix: RESET_PASSWORD_PATH, title: "Reset password", requirement: None },
    Route { prefix: ADMIN_DASHBOARD, title: "Admin dashboard", requirement: Some(&ADMIN_ROUTES) },
    Route { prefix: OPERATOR_DASHBOARD, title: "Tour operator dashboard", requirement: Some(&OPERATOR_ROUTES) },
    Route { prefix: AGENT_DASHBOARD, title: "Travel agent dashboard", requirement: Some(&AGENT_ROUTES) },
    Route { prefix: ACCOUNT_PATH, title: "Account", requirement: Some(&ACCOUNT_ROUTES) },
];

/// Path component of a location, without query or fragment.
pub fn path_of(location: &str) -> &str {
    let end = location.find(|c| c == '?' || c == '#').unwrap_or(location.len());
    &location[..end]
}

pub(crate) fn matches_prefix(path: &str, prefix: &str) -> bool {
    if prefix == HOME_PATH { return path == HOME_PATH || path.is_empty(); }
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

/// Longest route prefix matching `location` on a segment boundary.
pub fn lookup(location: &str) -> Option<&'static Route> {
    let path = path_of(location);
    ROUTES
        .iter()
        .filter(|r| matches_prefix(path, r.prefix))
        .max_by_key(|r| r.prefix.len())
}

/// Sign-in location that brings the user back to `requested` afterwards.
pub fn sign_in_target(requested: &str) -> String {
    let path = path_of(requested);
    if path == HOME_PATH || path == SIGN_IN_PATH || path.is_empty() {
        return SIGN_IN_PATH.to_string();
    }
    format!("{}?{}={}", SIGN_IN_PATH, RETURN_PARAM, urlencoding::encode(requested))
}

/// Return target carried by a sign-in location. Only same-origin absolute
/// paths are accepted.
pub fn return_target(location: &str) -> Option<String> {
    let query = location.split_once('?')?.1;
    let query = query.split('#').next().unwrap_or(query);
    let raw = query.split('&').find_map(|kv| {
        let (k, v) = kv.split_once('=')?;
        (k == RETURN_PARAM).then_some(v)
    })?;
    let decoded: Cow<str> = urlencoding::decode(raw).ok()?;
    if !decoded.starts_with('/') || decoded.starts_with("//") || decoded.contains('\\') {
        return None;
    }
    Some(decoded.into_owned())
}

/// Where to land right after signing in from `location`: the return target if
/// the role may open it, otherwise the role's dashboard.
pub fn post_sign_in_path(role: Role, location: &str) -> String {
    if let Some(target) = return_target(location) {
        let allowed = match lookup(&target).and_then(|r| r.requirement) {
            Some(req) => req.allows(role),
            None => true,
        };
        if allowed { return target; }
    }
    role.default_path().to_string()
}
