//! Who is signed in, with which role, and the auth service behind it.
//! Keep the public surface thin and split implementation across sub-modules.

mod role;
mod user;
mod client;
mod hosted;
mod tokens;
mod session;
mod provider;

pub use role::{Role, UnknownRole, ADMIN_DASHBOARD, AGENT_DASHBOARD, OPERATOR_DASHBOARD};
pub use user::{Credentials, Profile, User};
pub use client::AuthClient;
pub use hosted::HostedAuthClient;
pub use tokens::{jwt_expiry, TokenPair, TokenStore};
pub use session::{SessionSnapshot, SessionStore};
pub use provider::SessionProvider;
