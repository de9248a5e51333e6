// src/blocking/learner.rs

use log::{debug, warn};
use std::collections::{HashMap, HashSet};

use crate::blocking::predicates::{co_blocks, template_library, Predicate};
use crate::models::{CandidatePair, DataModel, LabeledExample, MatchLabel, Record, RecordKey};

/// The predicate set selected by the greedy learner, with the fraction of
/// labeled match pairs it co-blocks.
#[derive(Debug, Clone)]
pub struct LearnedBlocking {
    pub predicates: Vec<Predicate>,
    pub achieved_recall: f64,
}

impl LearnedBlocking {
    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }
}

/// Greedy set cover over the template library.
///
/// Each predicate is weighed by how many still-uncovered match examples it
/// co-blocks against how many candidate pairs it would generate over the
/// record sample. Selection repeats until `recall_target` of the match
/// examples are covered or no remaining predicate covers anything new.
/// Ties go to the earlier template in field declaration order.
///
/// An empty result is legal: it means no template separates the labeled
/// matches, and a partition run with it degrades to all singletons.
pub fn learn_predicates(
    model: &DataModel,
    examples: &[LabeledExample],
    records: &[Record],
    recall_target: f64,
) -> LearnedBlocking {
    let matches: Vec<&LabeledExample> = examples
        .iter()
        .filter(|e| e.label == MatchLabel::Match)
        .collect();
    if matches.is_empty() {
        warn!("No match examples to learn blocking from; predicate set is empty");
        return LearnedBlocking {
            predicates: Vec::new(),
            achieved_recall: 0.0,
        };
    }

    let candidates = template_library(model);
    let coverage: Vec<HashSet<usize>> = candidates
        .iter()
        .map(|p| {
            matches
                .iter()
                .enumerate()
                .filter(|(_, e)| co_blocks(p, &e.left, &e.right))
                .map(|(i, _)| i)
                .collect()
        })
        .collect();
    let costs: Vec<usize> = candidates
        .iter()
        .map(|p| predicate_pair_cost(p, records))
        .collect();

    let target = (recall_target.clamp(0.0, 1.0) * matches.len() as f64).ceil() as usize;
    let mut covered: HashSet<usize> = HashSet::new();
    let mut chosen: Vec<usize> = Vec::new();

    while covered.len() < target {
        let mut best: Option<(usize, f64)> = None;
        for (i, cover) in coverage.iter().enumerate() {
            if chosen.contains(&i) {
                continue;
            }
            let newly = cover.difference(&covered).count();
            if newly == 0 {
                continue;
            }
            let gain = newly as f64 / (1 + costs[i]) as f64;
            // Strict comparison keeps the earliest template on ties.
            if best.map_or(true, |(_, g)| gain > g) {
                best = Some((i, gain));
            }
        }
        match best {
            Some((i, _)) => {
                let newly = coverage[i].difference(&covered).count();
                debug!(
                    "Selected predicate {}: covers {} new match examples at pair cost {}",
                    candidates[i], newly, costs[i]
                );
                covered.extend(coverage[i].iter().copied());
                chosen.push(i);
            }
            None => break,
        }
    }

    let achieved = covered.len() as f64 / matches.len() as f64;
    if achieved < recall_target {
        warn!(
            "Blocking recall {:.0}% fell short of the {:.0}% target; {} of {} match examples are not co-blocked by any selected predicate",
            achieved * 100.0,
            recall_target * 100.0,
            matches.len() - covered.len(),
            matches.len()
        );
    }
    debug!(
        "Learned {} blocking predicates covering {:.0}% of {} match examples",
        chosen.len(),
        achieved * 100.0,
        matches.len()
    );

    LearnedBlocking {
        predicates: chosen.into_iter().map(|i| candidates[i].clone()).collect(),
        achieved_recall: achieved,
    }
}

/// Number of distinct candidate pairs one predicate generates over the
/// record sample. This is the denominator that keeps the learner from
/// picking predicates that lump everything into one block.
fn predicate_pair_cost(predicate: &Predicate, records: &[Record]) -> usize {
    let mut blocks: HashMap<String, Vec<&RecordKey>> = HashMap::new();
    for record in records {
        for key in predicate.block_keys(&record.fields) {
            blocks.entry(key).or_default().push(&record.key);
        }
    }
    let mut pairs: HashSet<CandidatePair> = HashSet::new();
    for members in blocks.values() {
        if members.len() < 2 {
            continue;
        }
        for i in 0..members.len() {
            for j in (i + 1)..members.len() {
                if let Some(pair) = CandidatePair::new(members[i].clone(), members[j].clone()) {
                    pairs.insert(pair);
                }
            }
        }
    }
    pairs.len()
}
