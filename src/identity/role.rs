use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Permission class assigned to a user. Exactly one per user.
///
/// Roles are flat: "admin can open the operator dashboard" is expressed by
/// listing `Admin` in that route's allow-list, never inferred from here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Role {
    SuperAdmin,
    Admin,
    TourOperator,
    TravelAgent,
}

pub const ADMIN_DASHBOARD: &str = "/admin";
pub const OPERATOR_DASHBOARD: &str = "/operator";
pub const AGENT_DASHBOARD: &str = "/agent";

impl Role {
    pub const ALL: [Role; 4] = [Role::SuperAdmin, Role::Admin, Role::TourOperator, Role::TravelAgent];

    /// Canonical wire name, as stored in the profiles table.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::SuperAdmin => "SUPER_ADMIN",
            Role::Admin => "ADMIN",
            Role::TourOperator => "TOUR_OPERATOR",
            Role::TravelAgent => "TRAVEL_AGENT",
        }
    }

    /// Landing page for a signed-in user of this role; also where the guard
    /// sends a user who opened a page their role may not see.
    pub fn default_path(&self) -> &'static str {
        match self {
            Role::SuperAdmin | Role::Admin => ADMIN_DASHBOARD,
            Role::TourOperator => OPERATOR_DASHBOARD,
            Role::TravelAgent => AGENT_DASHBOARD,
        }
    }

    pub(crate) const fn bit(&self) -> u8 {
        match self {
            Role::SuperAdmin => 1 << 0,
            Role::Admin => 1 << 1,
            Role::TourOperator => 1 << 2,
            Role::TravelAgent => 1 << 3,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownRole(pub String);

impl fmt::Display for UnknownRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown role '{}'", self.0)
    }
}

impl std::error::Error for UnknownRole {}

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // SUPER_ADMIN, super-admin, SuperAdmin and superadmin all name the same role
        let norm: String = s
            .trim()
            .chars()
            .filter(|c| *c != '_' && *c != '-' && *c != ' ')
            .collect::<String>()
            .to_ascii_lowercase();
        match norm.as_str() {
            "superadmin" => Ok(Role::SuperAdmin),
            "admin" => Ok(Role::Admin),
            "touroperator" | "operator" => Ok(Role::TourOperator),
            "travelagent" | "agent" => Ok(Role::TravelAgent),
            _ => Err(UnknownRole(s.to_string())),
        }
    }
}

impl Serialize for Role {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Role {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
