//! Route-level access control for the dashboards.

pub mod route;
mod guard;

pub use guard::{evaluate, AccessGuard, DenyReason, GuardDecision, Rendered};
pub use route::{Route, RouteRequirement, ROUTES, SIGN_IN_PATH};
