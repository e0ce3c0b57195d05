//! Access log records.

use serde::Serialize;

use crate::http::request::ClientMeta;

/// What the relay did with a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// Permitted, but the client was sent straight to a direct-download host.
    Allow,
    /// Refused: bad target, unknown user or origin outside the allow-list.
    Deny,
    /// Permitted, but the relay failed (upstream or store).
    Error,
    /// Proxied through the relay.
    Proxy,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Allow => "allow",
            Action::Deny => "deny",
            Action::Error => "error",
            Action::Proxy => "proxy",
        }
    }
}

impl std::str::FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "allow" => Ok(Action::Allow),
            "deny" => Ok(Action::Deny),
            "error" => Ok(Action::Error),
            "proxy" => Ok(Action::Proxy),
            other => Err(format!("unknown log action '{other}'")),
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One terminal decision, as written to the log table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEntry {
    #[serde(serialize_with = "crate::store::serialize_ts")]
    pub ts: i64,
    pub user: String,
    pub origin: String,
    pub status: u16,
    pub action: Action,
    pub reason: String,
    pub path: String,
    pub ip: String,
    pub city: String,
    pub colo: String,
    pub user_agent: String,
}

impl LogEntry {
    /// Entry stamped with the client's edge metadata.
    pub fn new(ts: i64, meta: &ClientMeta, action: Action, status: u16) -> Self {
        Self {
            ts,
            user: String::new(),
            origin: String::new(),
            status,
            action,
            reason: String::new(),
            path: String::new(),
            ip: meta.ip.clone(),
            city: meta.city.clone(),
            colo: meta.colo.clone(),
            user_agent: meta.user_agent.clone(),
        }
    }

    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    pub fn origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = origin.into();
        self
    }

    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }
}

/// A stored entry with its insertion id.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogRow {
    pub id: i64,
    #[serde(flatten)]
    pub entry: LogEntry,
}
