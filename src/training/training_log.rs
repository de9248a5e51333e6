// src/training/training_log.rs

use log::info;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use crate::error::{MatchError, Result};
use crate::models::{DataModel, FieldMap, FieldValue, LabeledExample, MatchLabel};

/// The append-only record of operator labeling decisions.
///
/// Each example stores both full field mappings, so the log replays on a
/// later run without access to the original records. The embedded
/// fingerprint pins the log to the field configuration it was labeled
/// under; replaying it against a different layout would poison the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingLog {
    pub fingerprint: String,
    #[serde(rename = "match", default)]
    matches: Vec<(FieldMap, FieldMap)>,
    #[serde(rename = "distinct", default)]
    distincts: Vec<(FieldMap, FieldMap)>,
}

impl TrainingLog {
    pub fn new(fingerprint: String) -> Self {
        TrainingLog {
            fingerprint,
            matches: Vec::new(),
            distincts: Vec::new(),
        }
    }

    pub fn for_model(model: &DataModel) -> Self {
        Self::new(model.fingerprint())
    }

    pub fn append(&mut self, example: LabeledExample) {
        match example.label {
            MatchLabel::Match => self.matches.push((example.left, example.right)),
            MatchLabel::Distinct => self.distincts.push((example.left, example.right)),
        }
    }

    pub fn match_count(&self) -> usize {
        self.matches.len()
    }

    pub fn distinct_count(&self) -> usize {
        self.distincts.len()
    }

    pub fn len(&self) -> usize {
        self.matches.len() + self.distincts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matches.is_empty() && self.distincts.is_empty()
    }

    /// All examples, matches first, insertion order preserved within each
    /// class. The classifier fit is order-independent, so this ordering is
    /// only about stable iteration.
    pub fn examples(&self) -> Vec<LabeledExample> {
        let mut out = Vec::with_capacity(self.len());
        for (left, right) in &self.matches {
            out.push(LabeledExample {
                left: left.clone(),
                right: right.clone(),
                label: MatchLabel::Match,
            });
        }
        for (left, right) in &self.distincts {
            out.push(LabeledExample {
                left: left.clone(),
                right: right.clone(),
                label: MatchLabel::Distinct,
            });
        }
        out
    }

    /// Order-insensitive digests of every logged pair, for skipping
    /// already-labeled pairs when a session resumes.
    pub fn digests(&self) -> HashSet<String> {
        self.matches
            .iter()
            .chain(self.distincts.iter())
            .map(|(left, right)| pair_digest(left, right))
            .collect()
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.flush()?;
        info!(
            "Wrote training log to {} ({} match / {} distinct examples)",
            path.display(),
            self.match_count(),
            self.distinct_count()
        );
        Ok(())
    }

    /// Loads a log and verifies it was labeled under the given field
    /// configuration.
    pub fn load(path: &Path, expected_fingerprint: &str) -> Result<Self> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let log: TrainingLog = serde_json::from_reader(reader)?;
        if log.fingerprint != expected_fingerprint {
            return Err(MatchError::Configuration(format!(
                "training log at {} was labeled under a different field configuration (log fingerprint {}, current {})",
                path.display(),
                log.fingerprint,
                expected_fingerprint
            )));
        }
        info!(
            "Loaded training log from {} ({} match / {} distinct examples)",
            path.display(),
            log.match_count(),
            log.distinct_count()
        );
        Ok(log)
    }
}

/// Order-insensitive content digest of a record pair.
pub fn pair_digest(left: &FieldMap, right: &FieldMap) -> String {
    let mut sides = [canonical_form(left), canonical_form(right)];
    sides.sort();
    let mut hasher = Sha256::new();
    hasher.update(sides[0].as_bytes());
    hasher.update([0x1e]);
    hasher.update(sides[1].as_bytes());
    hex::encode(hasher.finalize())
}

// Deterministic, type-tagged rendering of a field mapping. Text and
// numeric values that render alike must not collide.
fn canonical_form(fields: &FieldMap) -> String {
    let ordered: BTreeMap<&String, &FieldValue> = fields.iter().collect();
    let mut out = String::new();
    for (name, value) in ordered {
        match value {
            FieldValue::Text(s) => {
                out.push_str(name);
                out.push_str("=t:");
                out.push_str(s);
            }
            FieldValue::Number(x) => {
                out.push_str(name);
                out.push_str("=n:");
                out.push_str(&x.to_string());
            }
            FieldValue::Missing => {
                out.push_str(name);
                out.push_str("=m");
            }
        }
        out.push('\x1f');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FieldDef, FieldKind};
    use tempfile::tempdir;

    fn fields(pairs: &[(&str, &str)]) -> FieldMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), FieldValue::text(*v)))
            .collect()
    }

    fn example(left: FieldMap, right: FieldMap, label: MatchLabel) -> LabeledExample {
        LabeledExample { left, right, label }
    }

    fn model() -> DataModel {
        DataModel::new(vec![FieldDef::new("name", FieldKind::Str)]).unwrap()
    }

    #[test]
    fn test_round_trip_preserves_examples() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("training.json");

        let mut log = TrainingLog::for_model(&model());
        log.append(example(
            fields(&[("name", "abc corp")]),
            fields(&[("name", "abc corporation")]),
            MatchLabel::Match,
        ));
        log.append(example(
            fields(&[("name", "abc corp")]),
            fields(&[("name", "xyz inc")]),
            MatchLabel::Distinct,
        ));
        log.save(&path).unwrap();

        let loaded = TrainingLog::load(&path, &model().fingerprint()).unwrap();
        assert_eq!(loaded.match_count(), 1);
        assert_eq!(loaded.distinct_count(), 1);
        let examples = loaded.examples();
        assert_eq!(examples.len(), 2);
        assert_eq!(examples[0].label, MatchLabel::Match);
        assert_eq!(examples[0].left, fields(&[("name", "abc corp")]));
    }

    #[test]
    fn test_fingerprint_mismatch_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("training.json");
        let log = TrainingLog::new("aaaa".to_string());
        log.save(&path).unwrap();

        match TrainingLog::load(&path, "bbbb") {
            Err(MatchError::Configuration(msg)) => {
                assert!(msg.contains("different field configuration"))
            }
            other => panic!("expected Configuration error, got {:?}", other),
        }
    }

    #[test]
    fn test_wire_format_uses_match_and_distinct_lists() {
        let mut log = TrainingLog::new("fp".to_string());
        log.append(example(
            fields(&[("name", "a")]),
            fields(&[("name", "b")]),
            MatchLabel::Match,
        ));
        let value = serde_json::to_value(&log).unwrap();
        assert!(value.get("fingerprint").is_some());
        assert_eq!(value["match"].as_array().unwrap().len(), 1);
        assert_eq!(value["distinct"].as_array().unwrap().len(), 0);
        // Each example is a two-element array of field mappings.
        assert_eq!(value["match"][0].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_pair_digest_ignores_side_order() {
        let a = fields(&[("name", "abc corp")]);
        let b = fields(&[("name", "xyz inc")]);
        assert_eq!(pair_digest(&a, &b), pair_digest(&b, &a));
        assert_ne!(pair_digest(&a, &b), pair_digest(&a, &a));
    }

    #[test]
    fn test_pair_digest_separates_text_from_number() {
        let text: FieldMap = [("v".to_string(), FieldValue::text("42"))].into();
        let number: FieldMap = [("v".to_string(), FieldValue::number(42.0))].into();
        assert_ne!(pair_digest(&text, &text), pair_digest(&number, &number));
    }
}
