use crate::core::intent::{ClientProfile, Intent};
use chrono::{DateTime, Utc};

/// Transient failure reported by an executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecError {
    /// The connection is gone; the caller may reconnect once.
    Connection(String),
    /// The statement could not be run.
    Execution(String),
}

impl std::fmt::Display for ExecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecError::Connection(msg) => write!(f, "connection error: {msg}"),
            ExecError::Execution(msg) => write!(f, "execution error: {msg}"),
        }
    }
}

impl std::error::Error for ExecError {}

/// Renders an intent into SQL text.
pub trait Translator: Send + Sync {
    /// Returns `None` when the action has no SQL rendering.
    fn translate(&self, intent: &Intent) -> Option<String>;
}

/// Runs rendered statements over one open connection.
pub trait Executor: Send {
    /// Executes `sql` for `intent`; `Ok(false)` means the database rejected it.
    fn execute(
        &mut self,
        intent: &Intent,
        sql: &str,
        timestamp: Option<DateTime<Utc>>,
        profile: Option<&ClientProfile>,
    ) -> Result<bool, ExecError>;
}

/// Opens executor connections for workers.
pub trait Connector: Send + Sync {
    fn connect(&self, user: &str, profile: &ClientProfile) -> Result<Box<dyn Executor>, ExecError>;
}
