// src/training/ensemble.rs

use log::warn;

use crate::blocking::{co_blocks, learn_predicates, Predicate};
use crate::comparators::featurize;
use crate::error::Result;
use crate::models::{
    CandidatePair, DataModel, FeatureVector, FieldMap, LabeledExample, MatchLabel, Record,
};
use crate::scoring::{LogisticClassifier, MIN_LABELS_PER_CLASS};

/// Regularization grid of the logistic committee members.
const ENSEMBLE_L2_GRID: [f64; 3] = [0.001, 0.01, 0.1];
/// The blocking member learns at full recall so its vote tracks what the
/// final training pass will select.
const ENSEMBLE_RECALL_TARGET: f64 = 1.0;

/// One sampled candidate with everything a committee member needs to vote.
#[derive(Debug, Clone)]
pub struct PoolPair {
    pub pair: CandidatePair,
    pub left: FieldMap,
    pub right: FieldMap,
    pub features: FeatureVector,
}

/// A committee member voting on how likely a pool pair is a match.
/// Members answer 0.5 while they have nothing to go on, so an untrained
/// committee is unanimous rather than artificially divided.
pub trait CandidateLearner: Send {
    fn name(&self) -> &'static str;

    /// Refits from the full accumulated example set.
    fn retrain(
        &mut self,
        model: &DataModel,
        records: &[Record],
        examples: &[LabeledExample],
    ) -> Result<()>;

    fn predict(&self, candidate: &PoolPair) -> f64;
}

struct LogisticMember {
    classifier: LogisticClassifier,
    l2: f64,
    trained: bool,
}

impl LogisticMember {
    fn new(l2: f64) -> Self {
        LogisticMember {
            classifier: LogisticClassifier::with_l2(0, l2),
            l2,
            trained: false,
        }
    }
}

impl CandidateLearner for LogisticMember {
    fn name(&self) -> &'static str {
        "logistic"
    }

    fn retrain(
        &mut self,
        model: &DataModel,
        _records: &[Record],
        examples: &[LabeledExample],
    ) -> Result<()> {
        let mut samples: Vec<(FeatureVector, MatchLabel)> = Vec::with_capacity(examples.len());
        for example in examples {
            match featurize(model, &example.left, &example.right) {
                Ok(features) => samples.push((features, example.label)),
                Err(e) => warn!("Skipping unfeaturizable training example: {}", e),
            }
        }
        let matches = samples
            .iter()
            .filter(|(_, label)| *label == MatchLabel::Match)
            .count();
        let distincts = samples.len() - matches;
        if matches < MIN_LABELS_PER_CLASS || distincts < MIN_LABELS_PER_CLASS {
            self.trained = false;
            return Ok(());
        }
        self.classifier = LogisticClassifier::with_l2(model.feature_len(), self.l2);
        self.classifier.fit(&samples)?;
        self.trained = true;
        Ok(())
    }

    fn predict(&self, candidate: &PoolPair) -> f64 {
        if !self.trained {
            return 0.5;
        }
        self.classifier.predict(&candidate.features)
    }
}

struct BlockingMember {
    predicates: Vec<Predicate>,
    trained: bool,
}

impl BlockingMember {
    fn new() -> Self {
        BlockingMember {
            predicates: Vec::new(),
            trained: false,
        }
    }
}

impl CandidateLearner for BlockingMember {
    fn name(&self) -> &'static str {
        "blocking"
    }

    fn retrain(
        &mut self,
        model: &DataModel,
        records: &[Record],
        examples: &[LabeledExample],
    ) -> Result<()> {
        if !examples.iter().any(|e| e.label == MatchLabel::Match) {
            self.predicates.clear();
            self.trained = false;
            return Ok(());
        }
        let learned = learn_predicates(model, examples, records, ENSEMBLE_RECALL_TARGET);
        self.predicates = learned.predicates;
        self.trained = true;
        Ok(())
    }

    /// Whether the currently learned blocking would even consider the
    /// pair: 1.0 when some predicate co-blocks it, else 0.0.
    fn predict(&self, candidate: &PoolPair) -> f64 {
        if !self.trained {
            return 0.5;
        }
        if self
            .predicates
            .iter()
            .any(|p| co_blocks(p, &candidate.left, &candidate.right))
        {
            1.0
        } else {
            0.0
        }
    }
}

/// A fixed committee of learners scored uniformly: three logistic members
/// across the regularization grid plus the blocking member. The pair the
/// committee disagrees on most is the next one worth asking about.
pub struct DisagreementEnsemble {
    members: Vec<Box<dyn CandidateLearner>>,
}

impl DisagreementEnsemble {
    pub fn new() -> Self {
        let mut members: Vec<Box<dyn CandidateLearner>> = ENSEMBLE_L2_GRID
            .iter()
            .map(|&l2| Box::new(LogisticMember::new(l2)) as Box<dyn CandidateLearner>)
            .collect();
        members.push(Box::new(BlockingMember::new()));
        DisagreementEnsemble { members }
    }

    pub fn retrain(
        &mut self,
        model: &DataModel,
        records: &[Record],
        examples: &[LabeledExample],
    ) -> Result<()> {
        for member in &mut self.members {
            member.retrain(model, records, examples)?;
        }
        Ok(())
    }

    /// Population variance of the member predictions for one candidate.
    pub fn disagreement(&self, candidate: &PoolPair) -> f64 {
        let predictions: Vec<f64> = self.members.iter().map(|m| m.predict(candidate)).collect();
        let mean = predictions.iter().sum::<f64>() / predictions.len() as f64;
        predictions.iter().map(|p| (p - mean).powi(2)).sum::<f64>() / predictions.len() as f64
    }

    /// Index of the most contested pool pair. The pool is kept in
    /// ascending pair order and the comparison is strict, so exact ties go
    /// to the lowest pair.
    pub fn select(&self, pool: &[PoolPair]) -> Option<usize> {
        let mut best: Option<(usize, f64)> = None;
        for (i, candidate) in pool.iter().enumerate() {
            let variance = self.disagreement(candidate);
            if best.map_or(true, |(_, v)| variance > v) {
                best = Some((i, variance));
            }
        }
        best.map(|(i, _)| i)
    }
}

impl Default for DisagreementEnsemble {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FieldDef, FieldKind, FieldValue};

    fn name_fields(name: &str) -> FieldMap {
        [("name".to_string(), FieldValue::text(name))].into()
    }

    fn model() -> DataModel {
        DataModel::new(vec![FieldDef::new("name", FieldKind::Str)]).unwrap()
    }

    fn pool_pair(model: &DataModel, a: i64, b: i64, left: &str, right: &str) -> PoolPair {
        let left = name_fields(left);
        let right = name_fields(right);
        PoolPair {
            pair: CandidatePair::new(a.into(), b.into()).unwrap(),
            features: featurize(model, &left, &right).unwrap(),
            left,
            right,
        }
    }

    fn example(left: &str, right: &str, label: MatchLabel) -> LabeledExample {
        LabeledExample {
            left: name_fields(left),
            right: name_fields(right),
            label,
        }
    }

    #[test]
    fn test_untrained_committee_is_unanimous() {
        let model = model();
        let ensemble = DisagreementEnsemble::new();
        let candidate = pool_pair(&model, 1, 2, "abc corp", "abc corp");
        assert_eq!(ensemble.disagreement(&candidate), 0.0);
    }

    #[test]
    fn test_untrained_selection_takes_lowest_pair() {
        let model = model();
        let ensemble = DisagreementEnsemble::new();
        let pool = vec![
            pool_pair(&model, 1, 2, "abc corp", "abc corp"),
            pool_pair(&model, 1, 3, "abc corp", "xyz inc"),
        ];
        assert_eq!(ensemble.select(&pool), Some(0));
        assert_eq!(ensemble.select(&[]), None);
    }

    #[test]
    fn test_contested_pair_outranks_consensus_pair() {
        let model = model();
        let mut ensemble = DisagreementEnsemble::new();
        let examples = vec![
            example("abc corp", "abc corp", MatchLabel::Match),
            example("river north", "river north", MatchLabel::Match),
            example("aaa", "zzz", MatchLabel::Distinct),
            example("bbb", "qqq", MatchLabel::Distinct),
        ];
        ensemble.retrain(&model, &[], &examples).unwrap();

        // Identical names: every member near 1.0.
        let consensus = pool_pair(&model, 1, 2, "main street", "main street");
        // Mid similarity and not co-blocked: logistic members hedge while
        // the blocking member votes 0.
        let contested = pool_pair(&model, 3, 4, "pqr stuff", "jkl thing");
        assert!(ensemble.disagreement(&contested) > ensemble.disagreement(&consensus));

        let pool = vec![consensus, contested];
        assert_eq!(ensemble.select(&pool), Some(1));
    }

    #[test]
    fn test_single_class_members_stay_neutral() {
        let model = model();
        let mut ensemble = DisagreementEnsemble::new();
        let examples = vec![example("aaa", "zzz", MatchLabel::Distinct)];
        ensemble.retrain(&model, &[], &examples).unwrap();
        let candidate = pool_pair(&model, 1, 2, "abc corp", "abc corp");
        // Logistic members lack a match class and the blocking member lacks
        // match examples, so everyone still answers 0.5.
        assert_eq!(ensemble.disagreement(&candidate), 0.0);
    }
}
