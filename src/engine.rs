// src/engine.rs
//! Top-level engine API. [`ActiveMatcher`] opens labeling sessions over a
//! record set and produces a [`TrainedModel`]; [`StaticMatcher`] reloads
//! one and partitions record sets without retraining.

use indicatif::MultiProgress;
use log::info;
use std::collections::HashSet;
use std::path::Path;

use crate::blocking::Blocker;
use crate::canonical;
use crate::clustering;
use crate::comparators::featurize;
use crate::error::{MatchError, Result};
use crate::models::{Cluster, DataModel, FieldMap, Record, RecordKey};
use crate::scoring::{record_lookup, score_pairs, ParallelConfig};
use crate::settings::TrainedModel;
use crate::training::{ActiveSession, TrainingConfig, TrainingLog};

/// Training front door: builds active learning sessions, fresh or resumed
/// from a persisted training log.
pub struct ActiveMatcher {
    model: DataModel,
    config: TrainingConfig,
}

impl ActiveMatcher {
    pub fn new(model: DataModel) -> Self {
        ActiveMatcher {
            model,
            config: TrainingConfig::default(),
        }
    }

    pub fn with_config(mut self, config: TrainingConfig) -> Self {
        self.config = config;
        self
    }

    pub fn model(&self) -> &DataModel {
        &self.model
    }

    /// Opens a fresh labeling session over `records`.
    pub fn prepare_training(&self, records: &[Record]) -> Result<ActiveSession> {
        let log = TrainingLog::for_model(&self.model);
        ActiveSession::new(self.model.clone(), records, self.config.clone(), log)
    }

    /// Opens a session seeded from a previously persisted training log.
    /// Already-labeled pairs are not asked again.
    pub fn resume_training(&self, records: &[Record], log: TrainingLog) -> Result<ActiveSession> {
        ActiveSession::new(self.model.clone(), records, self.config.clone(), log)
    }
}

/// Scoring-time engine over a persisted [`TrainedModel`]. Holds no record
/// state; records are supplied wholesale per call.
pub struct StaticMatcher {
    settings: TrainedModel,
    model: DataModel,
    parallel: ParallelConfig,
    progress: Option<MultiProgress>,
}

impl StaticMatcher {
    /// Wraps a trained model, rebuilding its field configuration. Fails
    /// when the artifact's field set no longer validates or its
    /// fingerprint does not match its own declared fields.
    pub fn new(settings: TrainedModel) -> Result<Self> {
        let model = settings.data_model()?;
        Ok(StaticMatcher {
            settings,
            model,
            parallel: ParallelConfig::default(),
            progress: None,
        })
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        Self::new(TrainedModel::load(path.as_ref())?)
    }

    pub fn with_parallel(mut self, parallel: ParallelConfig) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn with_progress(mut self, progress: MultiProgress) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn settings(&self) -> &TrainedModel {
        &self.settings
    }

    pub fn model(&self) -> &DataModel {
        &self.model
    }

    /// Scores one pair of field mappings directly. Unlike the batch pass,
    /// a comparator failure here surfaces to the caller.
    pub fn score_pair(&self, left: &FieldMap, right: &FieldMap) -> Result<f64> {
        let features = featurize(&self.model, left, right)?;
        Ok(self.settings.classifier.predict(&features))
    }

    /// Partitions `records` into disjoint entity clusters at `threshold`.
    ///
    /// Blocking, pairwise scoring and graph clustering run in sequence,
    /// then every record left out of a multi-member cluster is appended as
    /// a singleton, so the output covers each input key exactly once.
    /// Duplicate input keys are rejected up front.
    pub fn partition(&self, records: &[Record], threshold: f64) -> Result<Vec<Cluster>> {
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(MatchError::InvalidThreshold(threshold));
        }
        let mut seen: HashSet<&RecordKey> = HashSet::new();
        for record in records {
            if !seen.insert(&record.key) {
                return Err(MatchError::Configuration(format!(
                    "duplicate record key '{}'",
                    record.key
                )));
            }
        }

        let blocker = Blocker::new(self.settings.predicates.clone());
        let (pairs, blocking_report) = blocker.candidate_pairs(records);
        info!(
            "Partitioning {} records: {} candidate pairs from {} blocks ({:.0}% coverage)",
            records.len(),
            blocking_report.pair_count,
            blocking_report.block_count,
            blocking_report.coverage() * 100.0
        );

        let lookup = record_lookup(records);
        let (scored, scoring_report) = score_pairs(
            &self.model,
            &self.settings.classifier,
            &lookup,
            &pairs,
            &self.parallel,
            self.progress.as_ref(),
        )?;

        let mut clusters = clustering::cluster(&scored, threshold)?;
        let multi_member = clusters.len();

        let clustered: HashSet<RecordKey> = clusters
            .iter()
            .flat_map(|c| c.members.iter().cloned())
            .collect();
        for record in records {
            if !clustered.contains(&record.key) {
                clusters.push(Cluster::singleton(record.key.clone()));
            }
        }
        clusters.sort_by(|a, b| a.members[0].cmp(&b.members[0]));

        info!(
            "Partition complete: {} clusters ({} multi-member), {} pairs scored, {} dropped",
            clusters.len(),
            multi_member,
            scoring_report.scored_count,
            scoring_report.failed_count
        );
        Ok(clusters)
    }

    /// Canonical representative of a cluster's member field mappings.
    pub fn canonicalize(&self, members: &[&FieldMap]) -> FieldMap {
        canonical::canonicalize(&self.model, members)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocking::Predicate;
    use crate::models::{FieldDef, FieldKind, FieldValue, MatchLabel};
    use crate::scoring::LogisticClassifier;

    fn model() -> DataModel {
        DataModel::new(vec![
            FieldDef::new("name", FieldKind::Str),
            FieldDef::new("zip", FieldKind::Exact),
        ])
        .unwrap()
    }

    // Features are [name similarity, zip similarity].
    fn trained_settings(predicates: Vec<Predicate>) -> TrainedModel {
        let mut classifier = LogisticClassifier::new(2);
        let examples = vec![
            (vec![1.0, 1.0], MatchLabel::Match),
            (vec![0.95, 1.0], MatchLabel::Match),
            (vec![0.3, 0.0], MatchLabel::Distinct),
            (vec![0.2, 0.0], MatchLabel::Distinct),
        ];
        classifier.fit(&examples).unwrap();
        TrainedModel::new(&model(), predicates, classifier)
    }

    fn company(key: i64, name: &str, zip: &str) -> Record {
        let fields: FieldMap = [
            ("name".to_string(), FieldValue::text(name)),
            ("zip".to_string(), FieldValue::text(zip)),
        ]
        .into();
        Record::new(key, fields)
    }

    fn sample_records() -> Vec<Record> {
        vec![
            company(1, "abc corp", "60614"),
            company(2, "abc corp", "60614"),
            company(3, "xyz inc", "10001"),
        ]
    }

    fn name_zip_predicates() -> Vec<Predicate> {
        vec![
            Predicate::Token {
                field: "name".into(),
            },
            Predicate::WholeField {
                field: "zip".into(),
            },
        ]
    }

    #[test]
    fn test_partition_scenario_two_plus_singleton() {
        let matcher = StaticMatcher::new(trained_settings(name_zip_predicates())).unwrap();
        let clusters = matcher.partition(&sample_records(), 0.5).unwrap();
        assert_eq!(clusters.len(), 2);
        assert_eq!(
            clusters[0].members,
            vec![RecordKey::Int(1), RecordKey::Int(2)]
        );
        assert!(clusters[0].confidences.iter().all(|c| c.unwrap() > 0.5));
        assert_eq!(clusters[1].members, vec![RecordKey::Int(3)]);
        assert_eq!(clusters[1].confidences, vec![None]);
    }

    #[test]
    fn test_partition_covers_every_key_exactly_once() {
        let matcher = StaticMatcher::new(trained_settings(name_zip_predicates())).unwrap();
        let records = sample_records();
        for threshold in [0.3, 0.5, 0.9] {
            let clusters = matcher.partition(&records, threshold).unwrap();
            let mut keys: Vec<RecordKey> = clusters
                .iter()
                .flat_map(|c| c.members.iter().cloned())
                .collect();
            keys.sort();
            assert_eq!(
                keys,
                vec![RecordKey::Int(1), RecordKey::Int(2), RecordKey::Int(3)],
                "threshold {}",
                threshold
            );
        }
    }

    #[test]
    fn test_zero_coverage_partitions_as_singletons() {
        // Predicates over a field no record carries emit no block keys.
        let predicates = vec![Predicate::Token {
            field: "website".into(),
        }];
        let matcher = StaticMatcher::new(trained_settings(predicates)).unwrap();
        let clusters = matcher.partition(&sample_records(), 0.5).unwrap();
        assert_eq!(clusters.len(), 3);
        assert!(clusters.iter().all(|c| c.is_singleton()));
        assert!(clusters.iter().all(|c| c.confidences == vec![None]));
    }

    #[test]
    fn test_duplicate_record_keys_rejected() {
        let matcher = StaticMatcher::new(trained_settings(name_zip_predicates())).unwrap();
        let records = vec![
            company(1, "abc corp", "60614"),
            company(1, "abc corporation", "60614"),
        ];
        assert!(matches!(
            matcher.partition(&records, 0.5),
            Err(MatchError::Configuration(_))
        ));
    }

    #[test]
    fn test_invalid_threshold_rejected_before_any_work() {
        let matcher = StaticMatcher::new(trained_settings(name_zip_predicates())).unwrap();
        assert!(matches!(
            matcher.partition(&sample_records(), 0.0),
            Err(MatchError::InvalidThreshold(_))
        ));
    }

    #[test]
    fn test_score_pair_is_symmetric_and_surfaces_failures() {
        let matcher = StaticMatcher::new(trained_settings(name_zip_predicates())).unwrap();
        let left = company(1, "abc corp", "60614").fields;
        let right = company(2, "abc corporation", "60614").fields;
        let forward = matcher.score_pair(&left, &right).unwrap();
        let backward = matcher.score_pair(&right, &left).unwrap();
        assert!((forward - backward).abs() < 1e-12);
        assert!(forward > 0.5);

        // Missing on a field not declared has_missing is a comparator
        // error; the direct entry point propagates it.
        let mut gappy = left.clone();
        gappy.insert("zip".to_string(), FieldValue::Missing);
        assert!(matches!(
            matcher.score_pair(&gappy, &right),
            Err(MatchError::Comparator { .. })
        ));
    }

    #[test]
    fn test_canonicalize_delegates_field_rules() {
        let matcher = StaticMatcher::new(trained_settings(name_zip_predicates())).unwrap();
        let a = company(1, "abc corp", "60614").fields;
        let b = company(2, "abc corporation", "60614").fields;
        let rep = matcher.canonicalize(&[&a, &b]);
        assert_eq!(rep["name"], FieldValue::text("abc corporation"));
        assert_eq!(rep["zip"], FieldValue::text("60614"));
    }

    #[test]
    fn test_prepare_training_opens_sampling_session() {
        let matcher = ActiveMatcher::new(model());
        let session = matcher.prepare_training(&sample_records()).unwrap();
        assert_eq!(session.state(), crate::training::SessionState::Sampling);
        assert!(session.pool_len() > 0);
        assert!(session.training_log().is_empty());
    }

    #[test]
    fn test_resume_training_rejects_foreign_log() {
        let matcher = ActiveMatcher::new(model());
        let foreign = TrainingLog::new("deadbeef".to_string());
        assert!(matches!(
            matcher.resume_training(&sample_records(), foreign),
            Err(MatchError::Configuration(_))
        ));
    }
}
