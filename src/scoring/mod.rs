// src/scoring/mod.rs

pub mod classifier;

pub use classifier::{LogisticClassifier, MIN_LABELS_PER_CLASS};

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use log::{debug, warn};
use rayon::prelude::*;
use std::collections::HashMap;

use crate::comparators::featurize;
use crate::error::{MatchError, Result};
use crate::models::{CandidatePair, DataModel, FieldMap, Record, RecordKey, ScoredPair};

/// Thread budget for the scoring pass.
#[derive(Debug, Clone)]
pub struct ParallelConfig {
    pub workers: usize,
}

impl Default for ParallelConfig {
    fn default() -> Self {
        ParallelConfig {
            workers: num_cpus::get(),
        }
    }
}

/// Outcome counts of one scoring pass. A failed pair is one whose
/// featurization errored; it is dropped rather than aborting the batch.
#[derive(Debug, Clone, Default)]
pub struct ScoringReport {
    pub candidate_count: usize,
    pub scored_count: usize,
    pub failed_count: usize,
}

/// Featurizes and scores every candidate pair, in input order.
///
/// Pairs are independent, so the batch fans out over a local rayon pool.
/// Per-pair comparator failures are logged and counted but never abort the
/// run.
pub fn score_pairs(
    model: &DataModel,
    classifier: &LogisticClassifier,
    lookup: &HashMap<&RecordKey, &FieldMap>,
    pairs: &[CandidatePair],
    parallel: &ParallelConfig,
    multi_progress: Option<&MultiProgress>,
) -> Result<(Vec<ScoredPair>, ScoringReport)> {
    let pb = multi_progress.map(|mp| {
        let pb = mp.add(ProgressBar::new(pairs.len() as u64));
        pb.set_style(
            ProgressStyle::default_bar()
                .template(
                    "  {spinner:.cyan} [{elapsed_precise}] {bar:30.green/blue} {pos}/{len} {msg}",
                )
                .unwrap()
                .progress_chars("█▉▊▋▌▍▎▏  "),
        );
        pb.set_message("Scoring candidate pairs...");
        pb
    });

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(parallel.workers.max(1))
        .build()
        .map_err(|e| MatchError::Configuration(format!("scoring thread pool: {}", e)))?;

    let outcomes: Vec<Option<ScoredPair>> = pool.install(|| {
        pairs
            .par_iter()
            .map(|pair| {
                let outcome = score_one(model, classifier, lookup, pair);
                if let Some(pb) = &pb {
                    pb.inc(1);
                }
                match outcome {
                    Ok(score) => Some(ScoredPair {
                        pair: pair.clone(),
                        score,
                    }),
                    Err(e) => {
                        warn!("Skipping candidate pair {}: {}", pair, e);
                        None
                    }
                }
            })
            .collect()
    });
    if let Some(pb) = &pb {
        pb.finish_with_message("Scoring complete.");
    }

    let mut scored = Vec::with_capacity(outcomes.len());
    let mut failed_count = 0usize;
    for outcome in outcomes {
        match outcome {
            Some(s) => scored.push(s),
            None => failed_count += 1,
        }
    }
    let report = ScoringReport {
        candidate_count: pairs.len(),
        scored_count: scored.len(),
        failed_count,
    };
    debug!(
        "Scored {}/{} candidate pairs ({} failed)",
        report.scored_count, report.candidate_count, report.failed_count
    );
    Ok((scored, report))
}

fn score_one(
    model: &DataModel,
    classifier: &LogisticClassifier,
    lookup: &HashMap<&RecordKey, &FieldMap>,
    pair: &CandidatePair,
) -> Result<f64> {
    let left = lookup.get(pair.a()).copied().ok_or_else(|| {
        MatchError::Configuration(format!("candidate pair references unknown key '{}'", pair.a()))
    })?;
    let right = lookup.get(pair.b()).copied().ok_or_else(|| {
        MatchError::Configuration(format!("candidate pair references unknown key '{}'", pair.b()))
    })?;
    let features = featurize(model, left, right)?;
    Ok(classifier.predict(&features))
}

/// Borrow-keyed lookup from a record slice. Later entries win on duplicate
/// keys; duplicate detection is the caller's concern.
pub fn record_lookup(records: &[Record]) -> HashMap<&RecordKey, &FieldMap> {
    records.iter().map(|r| (&r.key, &r.fields)).collect()
}
