//! Status conditions shared by the bucket status and its backends

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Ready condition type
pub const READY: &str = "Ready";
/// Synced condition type
pub const SYNCED: &str = "Synced";

pub const REASON_AVAILABLE: &str = "Available";
pub const REASON_UNAVAILABLE: &str = "Unavailable";
pub const REASON_CREATING: &str = "Creating";
pub const REASON_DELETING: &str = "Deleting";
pub const REASON_RECONCILE_SUCCESS: &str = "ReconcileSuccess";
pub const REASON_RECONCILE_ERROR: &str = "ReconcileError";

/// Status condition
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Condition type
    #[serde(rename = "type")]
    pub type_: String,

    /// Status (True, False, Unknown)
    pub status: String,

    /// Last transition time
    pub last_transition_time: DateTime<Utc>,

    /// Reason for the condition
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Human-readable message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Condition {
    fn new(type_: &str, status: &str, reason: &str, message: Option<String>) -> Self {
        Self {
            type_: type_.to_string(),
            status: status.to_string(),
            last_transition_time: Utc::now(),
            reason: Some(reason.to_string()),
            message,
        }
    }

    /// Resource is available for use
    pub fn available() -> Self {
        Self::new(READY, "True", REASON_AVAILABLE, None)
    }

    /// Resource is not available
    pub fn unavailable(message: impl Into<String>) -> Self {
        let message = message.into();
        let message = (!message.is_empty()).then_some(message);
        Self::new(READY, "False", REASON_UNAVAILABLE, message)
    }

    /// Resource is being created
    pub fn creating() -> Self {
        Self::new(READY, "False", REASON_CREATING, None)
    }

    /// Resource is being deleted
    pub fn deleting() -> Self {
        Self::new(READY, "False", REASON_DELETING, None)
    }

    /// Last reconciliation succeeded
    pub fn reconcile_success() -> Self {
        Self::new(SYNCED, "True", REASON_RECONCILE_SUCCESS, None)
    }

    /// Last reconciliation failed
    pub fn reconcile_error(message: impl Into<String>) -> Self {
        Self::new(SYNCED, "False", REASON_RECONCILE_ERROR, Some(message.into()))
    }

    /// Same type, status, reason and message; transition time ignored
    pub fn equivalent(&self, other: &Condition) -> bool {
        self.type_ == other.type_
            && self.status == other.status
            && self.reason == other.reason
            && self.message == other.message
    }

    /// Whether the condition reports the Available reason
    pub fn is_available(&self) -> bool {
        self.reason.as_deref() == Some(REASON_AVAILABLE)
    }

    /// Whether the condition reports ReconcileSuccess
    pub fn is_reconcile_success(&self) -> bool {
        self.reason.as_deref() == Some(REASON_RECONCILE_SUCCESS)
    }
}
