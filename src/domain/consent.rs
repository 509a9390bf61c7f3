//! Consent model
//!
//! A VCA starts `Unconfirmed`. A human decision moves it to `Approved` or
//! `Vetoed`. Records are kept as an append-only history; the current consent
//! is the most recent entry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::{now_millis, utc_timestamp, CognitiveState, VcaId};

/// Recorded human response.
///
/// Serialized as `approved` / `vetoed`. Legacy `y` / `n` documents are
/// accepted on read; anything else is kept verbatim so corrupt or unknown
/// values still reach the ledger as `unknown` instead of failing the load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ConsentResponse {
    Approved,
    Vetoed,
    Unrecognized(String),
}

impl ConsentResponse {
    pub fn as_str(&self) -> &str {
        match self {
            ConsentResponse::Approved => "approved",
            ConsentResponse::Vetoed => "vetoed",
            ConsentResponse::Unrecognized(raw) => raw,
        }
    }
}

impl From<String> for ConsentResponse {
    fn from(raw: String) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "approved" | "y" | "yes" => ConsentResponse::Approved,
            "vetoed" | "n" | "no" => ConsentResponse::Vetoed,
            _ => ConsentResponse::Unrecognized(raw),
        }
    }
}

impl From<ConsentResponse> for String {
    fn from(response: ConsentResponse) -> Self {
        match response {
            ConsentResponse::Unrecognized(raw) => raw,
            other => other.as_str().to_string(),
        }
    }
}

impl fmt::Display for ConsentResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single human decision on a VCA
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsentRecord {
    /// Whether the human-facing prompt (haptic pulse) was issued
    pub haptic_delivered: bool,
    pub user_response: ConsentResponse,
    #[serde(with = "utc_timestamp")]
    pub timestamp: DateTime<Utc>,
}

impl ConsentRecord {
    pub fn new(response: ConsentResponse) -> Self {
        Self {
            haptic_delivered: true,
            user_response: response,
            timestamp: now_millis(),
        }
    }

    pub fn approved() -> Self {
        Self::new(ConsentResponse::Approved)
    }

    pub fn vetoed() -> Self {
        Self::new(ConsentResponse::Vetoed)
    }
}

/// Consent state derived from the current record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsentState {
    Unconfirmed,
    Approved,
    Vetoed,
    /// A record exists but its response is not one we recognise
    Indeterminate,
}

impl ConsentState {
    pub fn from_record(record: Option<&ConsentRecord>) -> Self {
        match record.map(|r| &r.user_response) {
            None => ConsentState::Unconfirmed,
            Some(ConsentResponse::Approved) => ConsentState::Approved,
            Some(ConsentResponse::Vetoed) => ConsentState::Vetoed,
            Some(ConsentResponse::Unrecognized(_)) => ConsentState::Indeterminate,
        }
    }
}

/// What the human answered when prompted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsentDecision {
    Approved,
    Vetoed,
    /// Prompt abandoned before a response; leaves the VCA untouched
    Cancelled,
}

impl ConsentDecision {
    /// Response to record, or `None` when nothing should be recorded
    pub fn response(self) -> Option<ConsentResponse> {
        match self {
            ConsentDecision::Approved => Some(ConsentResponse::Approved),
            ConsentDecision::Vetoed => Some(ConsentResponse::Vetoed),
            ConsentDecision::Cancelled => None,
        }
    }
}

/// How to treat a VCA that already carries consent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReconfirmPolicy {
    /// Refuse to capture consent again
    #[default]
    Reject,
    /// Append a new record; the previous one stays in the history
    Override,
}

/// Everything shown to the human when asking for consent
#[derive(Debug, Clone, PartialEq)]
pub struct ConsentRequest {
    pub vca_id: VcaId,
    pub intent: String,
    pub task_data: String,
    pub cognitive_state: CognitiveState,
    pub proof_verified: bool,
    pub proof_type: String,
    pub created_at: DateTime<Utc>,
    /// Current consent, if this is a re-confirmation
    pub previous: Option<ConsentRecord>,
}
