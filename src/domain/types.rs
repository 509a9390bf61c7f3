//! Core type definitions for the VCA ledger
//!
//! Identifiers, the cognitive-state snapshot, and serde helpers shared by the
//! VCA record, ledger entries and rollups.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::infra::{Result, VcaError};

/// 32-byte hash (SHA-256)
pub type Hash256 = [u8; 32];

/// Width of the zero-padded counter in a transaction id (`tx-000001`)
pub const TX_ID_WIDTH: usize = 6;

/// Inclusive bounds for every cognitive metric, in percent
pub const METRIC_MIN: f64 = 0.0;
pub const METRIC_MAX: f64 = 100.0;

/// Serde module for serializing Hash256 as hex strings
pub mod hash256_hex {
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<[u8; 32], D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("expected 32 bytes for Hash256"))
    }
}

/// Current time truncated to the millisecond precision documents are
/// stored with, so a record compares equal to its own reloaded copy.
pub fn now_millis() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

/// Serde module for UTC timestamps as RFC 3339 with millisecond precision
/// and a `Z` suffix.
///
/// Reads accept any RFC 3339 timestamp, so second-resolution documents
/// (`2024-01-01T00:00:00Z`) still load.
pub mod utc_timestamp {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}

/// Identifier of a single Verifiable Cognitive Action (`vca-xxxxxxxx`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VcaId(pub String);

impl VcaId {
    pub const PREFIX: &'static str = "vca-";

    /// Fresh id from eight hex characters of a v4 UUID
    pub fn generate() -> Self {
        let raw = Uuid::new_v4().simple().to_string();
        Self(format!("{}{}", Self::PREFIX, &raw[..8]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VcaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for VcaId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for VcaId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Identifier of a batch rollup (`batch-<unix seconds>`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(pub String);

impl BatchId {
    pub const PREFIX: &'static str = "batch-";

    pub fn from_timestamp(ts: DateTime<Utc>) -> Self {
        Self(format!("{}{}", Self::PREFIX, ts.timestamp()))
    }

    /// Same id with a short random suffix, used when the second-resolution
    /// id is already taken.
    pub fn with_suffix(&self) -> Self {
        let raw = Uuid::new_v4().simple().to_string();
        Self(format!("{}-{}", self.0, &raw[..4]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for BatchId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Ledger transaction identifier (`tx-000042`)
///
/// Derived from the ledger's monotonic sequence; only the storage layer
/// mints new ones.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxId(pub String);

impl TxId {
    pub const PREFIX: &'static str = "tx-";

    pub fn from_sequence(sequence: u64) -> Self {
        Self(format!(
            "{}{:0width$}",
            Self::PREFIX,
            sequence,
            width = TX_ID_WIDTH
        ))
    }

    /// Sequence number encoded in the id, if it is well formed
    pub fn sequence(&self) -> Option<u64> {
        self.0.strip_prefix(Self::PREFIX)?.parse().ok()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Convert a percentage to the fixed-point integer the circuit consumes
/// (percent x 100, rounded to nearest).
pub fn to_fixed_point(percent: f64) -> u32 {
    (percent * 100.0).round() as u32
}

/// Snapshot of the agent's cognitive metrics, all in percent.
///
/// `confidence` and `threshold` are required; the remaining metrics are
/// optional and only validated when present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CognitiveState {
    pub confidence: f64,
    pub threshold: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fatigue: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub focus: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub urgency: Option<f64>,
}

impl CognitiveState {
    pub fn new(confidence: f64, threshold: f64) -> Self {
        Self {
            confidence,
            threshold,
            fatigue: None,
            focus: None,
            urgency: None,
        }
    }

    pub fn with_fatigue(mut self, fatigue: f64) -> Self {
        self.fatigue = Some(fatigue);
        self
    }

    pub fn with_focus(mut self, focus: f64) -> Self {
        self.focus = Some(focus);
        self
    }

    pub fn with_urgency(mut self, urgency: f64) -> Self {
        self.urgency = Some(urgency);
        self
    }

    /// Every present metric as `(name, value)`, required ones first
    pub fn metrics(&self) -> Vec<(&'static str, f64)> {
        let mut out = vec![("confidence", self.confidence), ("threshold", self.threshold)];
        for (name, value) in [
            ("fatigue", self.fatigue),
            ("focus", self.focus),
            ("urgency", self.urgency),
        ] {
            if let Some(v) = value {
                out.push((name, v));
            }
        }
        out
    }

    /// Reject any metric outside [0, 100]. NaN is out of range.
    pub fn validate(&self) -> Result<()> {
        for (metric, value) in self.metrics() {
            if !(METRIC_MIN..=METRIC_MAX).contains(&value) {
                return Err(VcaError::InvalidRange {
                    metric: metric.to_string(),
                    value,
                });
            }
        }
        Ok(())
    }

    pub fn confidence_fixed_point(&self) -> u32 {
        to_fixed_point(self.confidence)
    }

    pub fn threshold_fixed_point(&self) -> u32 {
        to_fixed_point(self.threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vca_id_format() {
        let id = VcaId::generate();
        assert!(id.as_str().starts_with("vca-"));
        assert_eq!(id.as_str().len(), 12);
        assert_ne!(id, VcaId::generate());
    }

    #[test]
    fn test_tx_id_padding_and_sequence() {
        let tx = TxId::from_sequence(7);
        assert_eq!(tx.as_str(), "tx-000007");
        assert_eq!(tx.sequence(), Some(7));

        let wide = TxId::from_sequence(1_234_567);
        assert_eq!(wide.as_str(), "tx-1234567");
        assert_eq!(wide.sequence(), Some(1_234_567));

        assert_eq!(TxId("rollup-batch-1".into()).sequence(), None);
    }

    #[test]
    fn test_batch_id_from_timestamp() {
        let ts = DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let id = BatchId::from_timestamp(ts);
        assert_eq!(id.as_str(), "batch-1704067200");
        assert!(id.with_suffix().as_str().starts_with("batch-1704067200-"));
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Stamped {
        #[serde(with = "utc_timestamp")]
        at: DateTime<Utc>,
    }

    #[test]
    fn test_now_millis_survives_serialization() {
        for _ in 0..50 {
            let stamped = Stamped { at: now_millis() };
            let json = serde_json::to_string(&stamped).unwrap();
            let back: Stamped = serde_json::from_str(&json).unwrap();
            assert_eq!(back, stamped);
            assert_eq!(stamped.at.timestamp_subsec_nanos() % 1_000_000, 0);
        }
    }

    #[test]
    fn test_fixed_point_conversion() {
        assert_eq!(to_fixed_point(94.3), 9430);
        assert_eq!(to_fixed_point(92.0), 9200);
        assert_eq!(to_fixed_point(0.0), 0);
        assert_eq!(to_fixed_point(100.0), 10000);
        assert_eq!(to_fixed_point(94.456), 9446);
    }

    #[test]
    fn test_cognitive_state_validation() {
        assert!(CognitiveState::new(96.0, 92.0).validate().is_ok());
        assert!(CognitiveState::new(0.0, 100.0).validate().is_ok());

        let err = CognitiveState::new(100.5, 92.0).validate().unwrap_err();
        assert!(matches!(err, VcaError::InvalidRange { ref metric, .. } if metric == "confidence"));

        let err = CognitiveState::new(50.0, -1.0).validate().unwrap_err();
        assert!(matches!(err, VcaError::InvalidRange { ref metric, .. } if metric == "threshold"));

        let err = CognitiveState::new(50.0, 50.0)
            .with_fatigue(120.0)
            .validate()
            .unwrap_err();
        assert!(matches!(err, VcaError::InvalidRange { ref metric, .. } if metric == "fatigue"));

        assert!(CognitiveState::new(f64::NAN, 50.0).validate().is_err());
    }

    #[test]
    fn test_cognitive_state_serializes_only_present_metrics() {
        let state = CognitiveState::new(94.3, 92.0).with_focus(80.0);
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["confidence"], 94.3);
        assert_eq!(json["focus"], 80.0);
        assert!(json.get("fatigue").is_none());
        assert!(json.get("urgency").is_none());
    }
}
