// src/training/mod.rs
//! Active learning: a pool of sampled candidate pairs, a disagreement
//! committee that picks the next pair worth asking about, and an explicit
//! session state machine driven by a labeling oracle.

pub mod ensemble;
pub mod oracle;
pub mod training_log;

pub use ensemble::{CandidateLearner, DisagreementEnsemble, PoolPair};
pub use oracle::{ConsoleOracle, LabelResponse, LabelingOracle};
pub use training_log::{pair_digest, TrainingLog};

use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeSet, HashSet};
use uuid::Uuid;

use crate::blocking::{learn_predicates, template_library, Blocker};
use crate::comparators::featurize;
use crate::error::{MatchError, Result};
use crate::models::{CandidatePair, DataModel, FieldMap, LabeledExample, MatchLabel, Record};
use crate::scoring::{record_lookup, LogisticClassifier, MIN_LABELS_PER_CLASS};
use crate::settings::TrainedModel;

/// Candidate pool size for one labeling session.
const DEFAULT_SAMPLE_SIZE: usize = 1500;
/// Seed for the deterministic sampling passes.
const DEFAULT_SAMPLE_SEED: u64 = 42;
/// Fraction of labeled match pairs the learned blocking must co-block.
const DEFAULT_RECALL_TARGET: f64 = 1.0;

/// Tunables of one active learning session.
#[derive(Debug, Clone)]
pub struct TrainingConfig {
    pub sample_size: usize,
    pub sample_seed: u64,
    pub recall_target: f64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        TrainingConfig {
            sample_size: DEFAULT_SAMPLE_SIZE,
            sample_seed: DEFAULT_SAMPLE_SEED,
            recall_target: DEFAULT_RECALL_TARGET,
        }
    }
}

/// Where a session currently stands. The only suspension point is
/// `AwaitingLabel`; dropping a session at any state persists nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Ready to select the next pair.
    Sampling,
    /// A pair has been presented and not yet marked.
    AwaitingLabel,
    /// Finished by the operator or out of candidates.
    Stopped,
}

/// One active learning session over a fixed record set.
///
/// The session owns the sampled candidate pool, the disagreement committee
/// and the accumulated training log. Termination is operator-driven; there
/// is no iteration limit.
pub struct ActiveSession {
    id: Uuid,
    model: DataModel,
    config: TrainingConfig,
    /// Retained record sample; the blocking learner weighs predicate cost
    /// against it during committee retraining and the final train pass.
    sample: Vec<Record>,
    pool: Vec<PoolPair>,
    ensemble: DisagreementEnsemble,
    log: TrainingLog,
    state: SessionState,
    current: Option<usize>,
}

impl ActiveSession {
    /// Starts a session, resuming from `log` when it carries prior
    /// examples. Pairs already present in the log are excluded from the
    /// pool so the operator is never asked twice.
    pub fn new(
        model: DataModel,
        records: &[Record],
        config: TrainingConfig,
        log: TrainingLog,
    ) -> Result<Self> {
        if log.fingerprint != model.fingerprint() {
            return Err(MatchError::Configuration(format!(
                "training log fingerprint {} does not match the current field configuration {}",
                log.fingerprint,
                model.fingerprint()
            )));
        }

        let exclude = log.digests();
        let pool = build_pool(&model, records, &config, &exclude);
        let sample = sample_records(records, &config);

        let mut ensemble = DisagreementEnsemble::new();
        if !log.is_empty() {
            ensemble.retrain(&model, &sample, &log.examples())?;
        }

        let id = Uuid::new_v4();
        info!(
            "Active learning session {}: {} candidate pairs pooled, {} prior examples loaded",
            id,
            pool.len(),
            log.len()
        );
        Ok(ActiveSession {
            id,
            model,
            config,
            sample,
            pool,
            ensemble,
            log,
            state: SessionState::Sampling,
            current: None,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn pool_len(&self) -> usize {
        self.pool.len()
    }

    pub fn training_log(&self) -> &TrainingLog {
        &self.log
    }

    pub fn match_count(&self) -> usize {
        self.log.match_count()
    }

    pub fn distinct_count(&self) -> usize {
        self.log.distinct_count()
    }

    /// The pair the committee most wants labeled, as the two full field
    /// mappings. Repeated calls return the same pair until it is marked.
    /// `None` once the session is stopped or the pool is exhausted.
    pub fn next_pair(&mut self) -> Option<(FieldMap, FieldMap)> {
        match self.state {
            SessionState::Stopped => None,
            SessionState::AwaitingLabel => {
                let candidate = &self.pool[self.current?];
                Some((candidate.left.clone(), candidate.right.clone()))
            }
            SessionState::Sampling => {
                if self.pool.is_empty() {
                    info!("Session {}: candidate pool exhausted, stopping", self.id);
                    self.state = SessionState::Stopped;
                    return None;
                }
                let idx = self.ensemble.select(&self.pool)?;
                let candidate = &self.pool[idx];
                debug!(
                    "Session {}: presenting pair {} (disagreement {:.4})",
                    self.id,
                    candidate.pair,
                    self.ensemble.disagreement(candidate)
                );
                self.current = Some(idx);
                self.state = SessionState::AwaitingLabel;
                Some((candidate.left.clone(), candidate.right.clone()))
            }
        }
    }

    /// Records the operator's verdict on the presented pair.
    ///
    /// Match and Distinct append an example and retrain the committee;
    /// Unsure discards the pair without an example; Finished stops the
    /// session and is legal in any state.
    pub fn mark(&mut self, response: LabelResponse) -> Result<()> {
        match response {
            LabelResponse::Finished => {
                info!(
                    "Session {}: finished by operator with {} match / {} distinct examples",
                    self.id,
                    self.log.match_count(),
                    self.log.distinct_count()
                );
                self.current = None;
                self.state = SessionState::Stopped;
                Ok(())
            }
            LabelResponse::Unsure => {
                let candidate = self.take_current()?;
                debug!("Session {}: pair {} skipped as unsure", self.id, candidate.pair);
                Ok(())
            }
            LabelResponse::Match | LabelResponse::Distinct => {
                let candidate = self.take_current()?;
                let label = if response == LabelResponse::Match {
                    MatchLabel::Match
                } else {
                    MatchLabel::Distinct
                };
                self.log.append(LabeledExample {
                    left: candidate.left,
                    right: candidate.right,
                    label,
                });
                self.ensemble
                    .retrain(&self.model, &self.sample, &self.log.examples())?;
                debug!(
                    "Session {}: {} match / {} distinct examples accumulated",
                    self.id,
                    self.log.match_count(),
                    self.log.distinct_count()
                );
                Ok(())
            }
        }
    }

    fn take_current(&mut self) -> Result<PoolPair> {
        match (self.state, self.current.take()) {
            (SessionState::AwaitingLabel, Some(idx)) => {
                self.state = SessionState::Sampling;
                Ok(self.pool.remove(idx))
            }
            _ => Err(MatchError::Configuration(
                "mark called with no pair awaiting a label".into(),
            )),
        }
    }

    /// Learns blocking predicates from the accumulated match examples and
    /// fits the final classifier on the full label set.
    ///
    /// The final model depends only on the accumulated examples, not on
    /// the order they were labeled in. Both classes must be represented;
    /// nothing is persisted on failure.
    pub fn train(&self) -> Result<TrainedModel> {
        let matches = self.log.match_count();
        let distincts = self.log.distinct_count();
        if matches < MIN_LABELS_PER_CLASS || distincts < MIN_LABELS_PER_CLASS {
            return Err(MatchError::InsufficientData { matches, distincts });
        }
        let examples = self.log.examples();
        info!(
            "Session {}: training on {} examples ({} match / {} distinct)",
            self.id,
            examples.len(),
            matches,
            distincts
        );

        let learned = learn_predicates(
            &self.model,
            &examples,
            &self.sample,
            self.config.recall_target,
        );
        if learned.is_empty() {
            warn!(
                "Session {}: no blocking predicates learned; partition runs with this model will degrade to singletons",
                self.id
            );
        }

        let mut samples = Vec::with_capacity(examples.len());
        for example in &examples {
            match featurize(&self.model, &example.left, &example.right) {
                Ok(features) => samples.push((features, example.label)),
                Err(e) => warn!("Skipping unfeaturizable training example: {}", e),
            }
        }
        let mut classifier = LogisticClassifier::new(self.model.feature_len());
        classifier.fit(&samples)?;

        info!(
            "Session {}: trained model with {} blocking predicates ({:.0}% match recall)",
            self.id,
            learned.predicates.len(),
            learned.achieved_recall * 100.0
        );
        Ok(TrainedModel::new(&self.model, learned.predicates, classifier))
    }
}

/// Drives a session to completion against an oracle: present, label, mark,
/// until the oracle finishes or the pool runs out.
pub fn run_labeling<O: LabelingOracle>(session: &mut ActiveSession, oracle: &mut O) -> Result<()> {
    while let Some((left, right)) = session.next_pair() {
        let response = oracle.label(&left, &right)?;
        session.mark(response)?;
    }
    Ok(())
}

/// Assembles the candidate pool: up to half from template-predicate
/// co-blocks (pairs some blocking rule could plausibly find), the rest
/// uniform random (pairs no rule would find, so the committee also sees
/// clear negatives). Already-labeled pairs are excluded by content digest.
fn build_pool(
    model: &DataModel,
    records: &[Record],
    config: &TrainingConfig,
    exclude: &HashSet<String>,
) -> Vec<PoolPair> {
    let lookup = record_lookup(records);
    let mut rng = StdRng::seed_from_u64(config.sample_seed);

    let (blocked, _) = Blocker::new(template_library(model)).candidate_pairs(records);
    let blocked_take = (config.sample_size / 2).min(blocked.len());
    let mut combined: BTreeSet<CandidatePair> = blocked
        .choose_multiple(&mut rng, blocked_take)
        .cloned()
        .collect();

    if records.len() >= 2 {
        let mut attempts = 0usize;
        let attempt_cap = config.sample_size * 20 + 100;
        while combined.len() < config.sample_size && attempts < attempt_cap {
            attempts += 1;
            let i = rng.gen_range(0..records.len());
            let j = rng.gen_range(0..records.len());
            if i == j {
                continue;
            }
            if let Some(pair) =
                CandidatePair::new(records[i].key.clone(), records[j].key.clone())
            {
                combined.insert(pair);
            }
        }
    }

    let mut pool = Vec::with_capacity(combined.len());
    for pair in combined {
        // Both sides resolve; the pair was built from these records.
        let (left, right) = match (lookup.get(pair.a()).copied(), lookup.get(pair.b()).copied()) {
            (Some(l), Some(r)) => (l, r),
            _ => continue,
        };
        if exclude.contains(&pair_digest(left, right)) {
            continue;
        }
        match featurize(model, left, right) {
            Ok(features) => pool.push(PoolPair {
                pair,
                left: left.clone(),
                right: right.clone(),
                features,
            }),
            Err(e) => warn!("Skipping sampled pair {}: {}", pair, e),
        }
    }
    debug!(
        "Candidate pool built: {} pairs ({} via blocking templates)",
        pool.len(),
        blocked_take
    );
    pool
}

/// Record sample retained for predicate cost estimation, deterministic for
/// a given seed.
fn sample_records(records: &[Record], config: &TrainingConfig) -> Vec<Record> {
    if records.len() <= config.sample_size {
        return records.to_vec();
    }
    let mut rng = StdRng::seed_from_u64(config.sample_seed);
    records
        .choose_multiple(&mut rng, config.sample_size)
        .cloned()
        .collect()
}
