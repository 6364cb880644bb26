use serde::{Deserialize, Serialize};

use super::role::Role;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Profile {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: String,
    pub role: Role,
    pub name: String,
    #[serde(default)]
    pub profile: Option<Profile>,
}

impl User {
    pub fn new<S: Into<String>>(id: S, role: Role, name: S) -> Self {
        Self { id: id.into(), role, name: name.into(), profile: None }
    }

    pub fn email(&self) -> Option<&str> {
        self.profile.as_ref().and_then(|p| p.email.as_deref())
    }
}

// Password stays out of Debug output so credentials never end up in logs.
#[derive(Clone)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl Credentials {
    pub fn new<S: Into<String>>(email: S, password: S) -> Self {
        Self { email: email.into(), password: password.into() }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials").field("email", &self.email).field("password", &"***").finish()
    }
}
