//! Failures surfaced by snapshot construction and ref resolution.
//!
//! Every variant is recoverable and leaves the ref cache untouched. Messages
//! are written for a tool-calling client that reads them to decide its next
//! step (re-snapshot, fix the token, pick another scope).

use serde_json::{json, Value};
use thiserror::Error;

use super::driver::DriverError;

/// Accepted ref token shape, echoed back in `InvalidRefFormat`.
pub const REF_PATTERN: &str = "^@?e\\d+$";

/// How many available refs a `RefNotFound` message lists before eliding.
pub const MAX_LISTED_REFS: usize = 10;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RefError {
    #[error("Scope '{selector}' was requested but matched no nodes")]
    ScopeNotFound { selector: String },

    #[error("Page driver unavailable: {0}")]
    DriverUnavailable(String),

    #[error("Invalid ref '{token}': expected a token matching {} (e.g. 'e12' or '@e12')", REF_PATTERN)]
    InvalidRefFormat { token: String },

    #[error("{}", not_found_message(.ref_id, .available, .stale))]
    RefNotFound {
        ref_id: String,
        available: Vec<String>,
        /// The ref is in the current table but no element matches it anymore.
        stale: bool,
    },
}

impl RefError {
    /// Stable snake_case tag for structured error reporting.
    pub fn kind(&self) -> &'static str {
        match self {
            RefError::ScopeNotFound { .. } => "scope_not_found",
            RefError::DriverUnavailable(_) => "driver_unavailable",
            RefError::InvalidRefFormat { .. } => "invalid_ref_format",
            RefError::RefNotFound { .. } => "ref_not_found",
        }
    }

    /// `true` when taking a fresh snapshot is the sensible next step.
    pub fn suggests_resnapshot(&self) -> bool {
        matches!(self, RefError::RefNotFound { .. })
    }

    pub fn to_json(&self) -> Value {
        json!({
            "error": self.kind(),
            "message": self.to_string(),
        })
    }
}

fn not_found_message(ref_id: &str, available: &[String], stale: &bool) -> String {
    let head = if *stale {
        format!(
            "Ref '{}' is in the last snapshot but no element matches it anymore; take a new snapshot.",
            ref_id
        )
    } else {
        format!("Ref '{}' not found.", ref_id)
    };

    if available.is_empty() {
        return format!("{} No refs available; take a snapshot first.", head);
    }

    let listed: Vec<&str> = available
        .iter()
        .take(MAX_LISTED_REFS)
        .map(|s| s.as_str())
        .collect();
    let ellipsis = if available.len() > MAX_LISTED_REFS {
        ", ..."
    } else {
        ""
    };
    format!(
        "{} Available refs: {}{}",
        head,
        listed.join(", "),
        ellipsis
    )
}

impl From<DriverError> for RefError {
    fn from(err: DriverError) -> Self {
        match err {
            DriverError::ScopeNotFound(selector) => RefError::ScopeNotFound { selector },
            DriverError::Unavailable(msg) | DriverError::Protocol(msg) => {
                RefError::DriverUnavailable(msg)
            }
        }
    }
}

impl From<RefError> for pagemark_core::Error {
    fn from(err: RefError) -> Self {
        pagemark_core::Error::Ref {
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}
