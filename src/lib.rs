// src/lib.rs
//! A probabilistic record deduplication engine.
//!
//! Records declare a field configuration ([`DataModel`]); an active
//! learning session opened through [`ActiveMatcher`] solicits labels from
//! a [`LabelingOracle`], learns blocking predicates and classifier
//! weights, and persists them as a [`TrainedModel`]; [`StaticMatcher`]
//! reloads that artifact and partitions any record set into disjoint
//! entity clusters with per-record confidences.

pub mod blocking;
pub mod canonical;
pub mod clustering;
pub mod comparators;
pub mod engine;
pub mod error;
pub mod models;
pub mod scoring;
pub mod settings;
pub mod training;

pub use engine::{ActiveMatcher, StaticMatcher};
pub use error::{MatchError, Result};
pub use models::{
    CandidatePair, Cluster, DataModel, FieldDef, FieldKind, FieldMap, FieldValue, LabeledExample,
    MatchLabel, Record, RecordKey, ScoredPair,
};
pub use scoring::ParallelConfig;
pub use settings::TrainedModel;
pub use training::{
    run_labeling, ActiveSession, ConsoleOracle, LabelResponse, LabelingOracle, SessionState,
    TrainingConfig, TrainingLog,
};
