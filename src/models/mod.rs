// src/models/mod.rs
//! Core data types shared across the engine: record identities and values,
//! candidate pairs, labeled examples, scored pairs and clusters.

pub mod fields;

pub use fields::{DataModel, FieldDef, FieldKind};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Feature vector of one candidate pair; length and slot meaning are fixed
/// by the [`DataModel`] that produced it.
pub type FeatureVector = Vec<f64>;

/// Field-name to value mapping of a single record.
pub type FieldMap = HashMap<String, FieldValue>;

/// Caller-assigned unique record identity, integer or text.
///
/// The derived ordering (all integer keys before all text keys, natural
/// order within each) is the deterministic tie-break used throughout the
/// engine wherever two candidates are otherwise equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordKey {
    Int(i64),
    Text(String),
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordKey::Int(n) => write!(f, "{}", n),
            RecordKey::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<i64> for RecordKey {
    fn from(n: i64) -> Self {
        RecordKey::Int(n)
    }
}

impl From<&str> for RecordKey {
    fn from(s: &str) -> Self {
        RecordKey::Text(s.to_string())
    }
}

impl From<String> for RecordKey {
    fn from(s: String) -> Self {
        RecordKey::Text(s)
    }
}

/// One field value. `Missing` is an explicit marker, distinct from an
/// absent map entry only in that it was declared by the caller; the engine
/// treats both identically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Text(String),
    Number(f64),
    Missing,
}

pub const MISSING: FieldValue = FieldValue::Missing;

impl FieldValue {
    pub fn text(s: impl Into<String>) -> Self {
        FieldValue::Text(s.into())
    }

    pub fn number(n: f64) -> Self {
        FieldValue::Number(n)
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, FieldValue::Missing)
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Text(s.to_string())
    }
}

impl From<f64> for FieldValue {
    fn from(n: f64) -> Self {
        FieldValue::Number(n)
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Text(s) => write!(f, "{}", s),
            // Integral numbers display without a trailing ".0" so that
            // Number(60614.0) and Text("60614") agree under exact
            // comparison.
            FieldValue::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => {
                write!(f, "{}", *n as i64)
            }
            FieldValue::Number(n) => write!(f, "{}", n),
            FieldValue::Missing => Ok(()),
        }
    }
}

/// One record: an opaque unique key plus its field values. Records are
/// supplied wholesale per run and never owned or mutated by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    pub key: RecordKey,
    pub fields: FieldMap,
}

impl Record {
    pub fn new(key: impl Into<RecordKey>, fields: FieldMap) -> Self {
        Record {
            key: key.into(),
            fields,
        }
    }

    /// Value of a field, with absent entries reading as missing.
    pub fn value(&self, field: &str) -> &FieldValue {
        self.fields.get(field).unwrap_or(&MISSING)
    }
}

/// An unordered pair of distinct record keys, stored normalized with the
/// smaller key first so that `(a, b)` and `(b, a)` collapse to one
/// identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct CandidatePair {
    a: RecordKey,
    b: RecordKey,
}

impl CandidatePair {
    /// Returns `None` when both keys are equal; a record is never a
    /// candidate against itself.
    pub fn new(x: RecordKey, y: RecordKey) -> Option<Self> {
        if x == y {
            return None;
        }
        let (a, b) = if x < y { (x, y) } else { (y, x) };
        Some(CandidatePair { a, b })
    }

    pub fn a(&self) -> &RecordKey {
        &self.a
    }

    pub fn b(&self) -> &RecordKey {
        &self.b
    }
}

impl fmt::Display for CandidatePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.a, self.b)
    }
}

/// Operator-assigned class of a labeled pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchLabel {
    Match,
    Distinct,
}

/// A labeled training example. Both full field mappings are stored so the
/// log replays on later runs without access to the original records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabeledExample {
    pub left: FieldMap,
    pub right: FieldMap,
    pub label: MatchLabel,
}

/// A candidate pair with its model probability of referring to the same
/// entity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredPair {
    pub pair: CandidatePair,
    pub score: f64,
}

/// One entity cluster. `members` and `confidences` are positionally
/// aligned; a singleton carries `None` since there is no edge evidence to
/// derive a confidence from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Cluster {
    pub members: Vec<RecordKey>,
    pub confidences: Vec<Option<f64>>,
}

impl Cluster {
    pub fn singleton(key: RecordKey) -> Self {
        Cluster {
            members: vec![key],
            confidences: vec![None],
        }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn is_singleton(&self) -> bool {
        self.members.len() == 1
    }

    pub fn contains(&self, key: &RecordKey) -> bool {
        self.members.iter().any(|k| k == key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidate_pair_normalizes_order() {
        let ab = CandidatePair::new(RecordKey::from(2), RecordKey::from(1)).unwrap();
        let ba = CandidatePair::new(RecordKey::from(1), RecordKey::from(2)).unwrap();
        assert_eq!(ab, ba);
        assert_eq!(ab.a(), &RecordKey::Int(1));
        assert!(CandidatePair::new(RecordKey::from(3), RecordKey::from(3)).is_none());
    }

    #[test]
    fn test_record_key_ordering_is_total() {
        let mut keys = vec![
            RecordKey::from("b"),
            RecordKey::from(10),
            RecordKey::from("a"),
            RecordKey::from(2),
        ];
        keys.sort();
        assert_eq!(
            keys,
            vec![
                RecordKey::Int(2),
                RecordKey::Int(10),
                RecordKey::Text("a".into()),
                RecordKey::Text("b".into()),
            ]
        );
    }

    #[test]
    fn test_field_value_serde_forms() {
        let v: FieldValue = serde_json::from_str("\"abc corp\"").unwrap();
        assert_eq!(v, FieldValue::text("abc corp"));
        let v: FieldValue = serde_json::from_str("60614").unwrap();
        assert_eq!(v, FieldValue::number(60614.0));
        let v: FieldValue = serde_json::from_str("null").unwrap();
        assert!(v.is_missing());
        assert_eq!(serde_json::to_string(&FieldValue::Missing).unwrap(), "null");
    }

    #[test]
    fn test_number_display_drops_integral_fraction() {
        assert_eq!(FieldValue::number(60614.0).to_string(), "60614");
        assert_eq!(FieldValue::number(1.5).to_string(), "1.5");
    }

    #[test]
    fn test_record_absent_field_reads_missing() {
        let record = Record::new(1, FieldMap::new());
        assert!(record.value("anything").is_missing());
    }
}
