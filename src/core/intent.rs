use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

/// Bookkeeping state an agent rests in between sessions.
pub const START: &str = "START";
/// Opens a session; allocates a fresh session id.
pub const LOGIN: &str = "LOGIN";
/// Closes a session; clears all session context.
pub const LOGOUT: &str = "LOGOUT";
/// Prefix of actions that begin a new search within an entity family.
pub const SEARCH_PREFIX: &str = "SEARCH_";

/// Role label that selects an agent's transition table and working hours.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Sales,
    Hr,
    Developer,
    Admin,
    Attacker,
}

impl Role {
    pub const ALL: [Role; 5] = [
        Role::Sales,
        Role::Hr,
        Role::Developer,
        Role::Admin,
        Role::Attacker,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Sales => "sales",
            Role::Hr => "hr",
            Role::Developer => "developer",
            Role::Admin => "admin",
            Role::Attacker => "attacker",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownRole(pub String);

impl std::fmt::Display for UnknownRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown role: {}", self.0)
    }
}

impl std::error::Error for UnknownRole {}

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "sales" => Ok(Role::Sales),
            "hr" => Ok(Role::Hr),
            "developer" | "dev" => Ok(Role::Developer),
            "admin" => Ok(Role::Admin),
            "attacker" => Ok(Role::Attacker),
            other => Err(UnknownRole(other.to_string())),
        }
    }
}

/// A resolved action parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Id(u64),
    Text(String),
}

impl std::fmt::Display for ParamValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParamValue::Id(id) => write!(f, "{id}"),
            ParamValue::Text(text) => f.write_str(text),
        }
    }
}

/// One planned database action, prior to SQL rendering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    pub user: String,
    pub role: Role,
    pub action: String,
    #[serde(default)]
    pub params: BTreeMap<String, ParamValue>,
    pub session_id: Option<String>,
    /// 1 for malicious or scripted activity, 0 otherwise.
    pub anomaly_flag: u8,
}

impl Intent {
    /// START and LOGOUT only move the state machine; nothing is sent to the database.
    pub fn is_bookkeeping(&self) -> bool {
        self.action == START || self.action == LOGOUT
    }

    pub fn is_anomalous(&self) -> bool {
        self.anomaly_flag != 0
    }
}

/// Synthetic client fingerprint, fixed for a worker's lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientProfile {
    pub os: String,
    pub program: String,
    pub connector: String,
    pub hostname: String,
    pub source_ip: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_names_round_trip() {
        for role in Role::ALL {
            assert_eq!(role.as_str().parse::<Role>(), Ok(role));
        }
        assert!("janitor".parse::<Role>().is_err());
    }

    #[test]
    fn start_and_logout_are_bookkeeping() {
        let mut intent = Intent {
            user: "sales_001".to_string(),
            role: Role::Sales,
            action: START.to_string(),
            params: BTreeMap::new(),
            session_id: None,
            anomaly_flag: 0,
        };
        assert!(intent.is_bookkeeping());
        intent.action = LOGOUT.to_string();
        assert!(intent.is_bookkeeping());
        intent.action = LOGIN.to_string();
        assert!(!intent.is_bookkeeping());
    }
}
