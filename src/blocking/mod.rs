// src/blocking/mod.rs

pub mod learner;
pub mod predicates;

pub use learner::{learn_predicates, LearnedBlocking};
pub use predicates::{co_blocks, template_library, templates_for, Predicate, MIN_TOKEN_LENGTH};

use log::{debug, warn};
use std::collections::{BTreeSet, HashMap, HashSet};

use crate::models::{CandidatePair, Record, RecordKey};

/// Coverage fraction below which a blocking pass is reported as degraded.
pub const LOW_COVERAGE_THRESHOLD: f64 = 0.5;

/// Outcome counts of one blocking pass over a record set. Low coverage is
/// never an error; the uncovered records simply partition as singletons.
#[derive(Debug, Clone, Default)]
pub struct BlockingReport {
    pub total_records: usize,
    pub covered_records: usize,
    /// Keys that emitted no block key under any predicate, sorted.
    pub uncovered: Vec<RecordKey>,
    pub block_count: usize,
    pub pair_count: usize,
}

impl BlockingReport {
    pub fn coverage(&self) -> f64 {
        if self.total_records == 0 {
            1.0
        } else {
            self.covered_records as f64 / self.total_records as f64
        }
    }

    pub fn is_low_coverage(&self) -> bool {
        self.total_records > 0 && self.coverage() < LOW_COVERAGE_THRESHOLD
    }
}

/// Groups records that share a block key under any learned predicate and
/// emits the within-block pairs as scoring candidates.
#[derive(Debug, Clone)]
pub struct Blocker {
    predicates: Vec<Predicate>,
}

impl Blocker {
    pub fn new(predicates: Vec<Predicate>) -> Self {
        Blocker { predicates }
    }

    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    /// All within-block pairs over `records`, deduplicated across blocks
    /// and predicates, in ascending pair order.
    pub fn candidate_pairs(&self, records: &[Record]) -> (Vec<CandidatePair>, BlockingReport) {
        let mut blocks: HashMap<String, Vec<&RecordKey>> = HashMap::new();
        let mut covered: HashSet<&RecordKey> = HashSet::new();

        for record in records {
            let mut emitted = false;
            for predicate in &self.predicates {
                for key in predicate.block_keys(&record.fields) {
                    blocks.entry(key).or_default().push(&record.key);
                    emitted = true;
                }
            }
            if emitted {
                covered.insert(&record.key);
            }
        }

        // A block shared by many records contributes quadratic pairs and
        // the same pair often recurs under several predicates; the BTreeSet
        // collapses them and fixes the output order.
        let mut pairs: BTreeSet<CandidatePair> = BTreeSet::new();
        for members in blocks.values() {
            if members.len() < 2 {
                continue;
            }
            for i in 0..members.len() {
                for j in (i + 1)..members.len() {
                    if let Some(pair) = CandidatePair::new(members[i].clone(), members[j].clone())
                    {
                        pairs.insert(pair);
                    }
                }
            }
        }

        let mut uncovered: Vec<RecordKey> = records
            .iter()
            .map(|r| &r.key)
            .filter(|k| !covered.contains(*k))
            .cloned()
            .collect();
        uncovered.sort();

        let report = BlockingReport {
            total_records: records.len(),
            covered_records: covered.len(),
            uncovered,
            block_count: blocks.len(),
            pair_count: pairs.len(),
        };
        debug!(
            "Blocking pass: {} blocks, {} candidate pairs, {}/{} records covered",
            report.block_count, report.pair_count, report.covered_records, report.total_records
        );
        if report.is_low_coverage() {
            warn!(
                "Low blocking coverage: {:.0}% of {} records emitted a block key; the rest will partition as singletons",
                report.coverage() * 100.0,
                report.total_records
            );
        }

        (pairs.into_iter().collect(), report)
    }
}
