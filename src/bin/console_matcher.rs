// src/bin/console_matcher.rs
//
// Console driver for the matching engine: trains a model through
// interactive labeling, then partitions record files with it.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::MultiProgress;
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use matching_lib::scoring::record_lookup;
use matching_lib::{
    run_labeling, ActiveMatcher, ConsoleOracle, DataModel, FieldDef, FieldMap, ParallelConfig,
    Record, RecordKey, StaticMatcher, TrainingConfig, TrainingLog,
};

#[derive(Parser)]
#[command(author, version, about = "Probabilistic record deduplication", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Label record pairs interactively and write a trained model
    Train {
        /// JSON array of records: [{"key": ..., "fields": {...}}, ...]
        #[arg(long)]
        records: PathBuf,

        /// JSON field declarations: {"fields": [...], "interactions": [...]}
        #[arg(long)]
        fields: PathBuf,

        /// Training log path; reloaded when present so labeling resumes
        #[arg(long, default_value = "training.json")]
        training: PathBuf,

        /// Output path for the trained model
        #[arg(long, default_value = "settings.json")]
        settings: PathBuf,

        /// Candidate pool size for the labeling session
        #[arg(long)]
        sample_size: Option<usize>,

        /// Seed for candidate pool sampling
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Partition a record file into entity clusters with a trained model
    Partition {
        /// JSON array of records: [{"key": ..., "fields": {...}}, ...]
        #[arg(long)]
        records: PathBuf,

        /// Trained model produced by `train`
        #[arg(long, default_value = "settings.json")]
        settings: PathBuf,

        /// Minimum pair score for two records to share a cluster
        #[arg(long, default_value_t = 0.5)]
        threshold: f64,

        /// Output path for the cluster JSON; stdout when omitted
        #[arg(long)]
        output: Option<PathBuf>,

        /// Attach a canonical representative to each cluster
        #[arg(long)]
        canonical: bool,

        /// Worker threads for the scoring pass
        #[arg(long)]
        workers: Option<usize>,

        /// Draw progress bars during scoring
        #[arg(long)]
        progress: bool,
    },
}

/// Field declaration file: the declared fields plus optional interaction
/// pairs by field name.
#[derive(Deserialize)]
struct FieldSpec {
    fields: Vec<FieldDef>,
    #[serde(default)]
    interactions: Vec<(String, String)>,
}

#[derive(Serialize)]
struct ClusterRow {
    members: Vec<RecordKey>,
    confidences: Vec<Option<f64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    canonical: Option<FieldMap>,
}

fn main() -> Result<()> {
    env_logger::init();
    match Cli::parse().command {
        Command::Train {
            records,
            fields,
            training,
            settings,
            sample_size,
            seed,
        } => train(&records, &fields, &training, &settings, sample_size, seed),
        Command::Partition {
            records,
            settings,
            threshold,
            output,
            canonical,
            workers,
            progress,
        } => partition(
            &records,
            &settings,
            threshold,
            output.as_deref(),
            canonical,
            workers,
            progress,
        ),
    }
}

fn train(
    records_path: &Path,
    fields_path: &Path,
    training_path: &Path,
    settings_path: &Path,
    sample_size: Option<usize>,
    seed: Option<u64>,
) -> Result<()> {
    let model = load_field_spec(fields_path)?;
    let records = load_records(records_path)?;

    let mut config = TrainingConfig::default();
    if let Some(n) = sample_size {
        config.sample_size = n;
    }
    if let Some(s) = seed {
        config.sample_seed = s;
    }
    let matcher = ActiveMatcher::new(model.clone()).with_config(config);

    let mut session = if training_path.exists() {
        let log = TrainingLog::load(training_path, &model.fingerprint())
            .context("Failed to reload the training log")?;
        matcher
            .resume_training(&records, log)
            .context("Failed to resume the labeling session")?
    } else {
        matcher
            .prepare_training(&records)
            .context("Failed to open a labeling session")?
    };

    println!(
        "Labeling session {} over {} records.",
        session.id(),
        records.len()
    );
    println!("Answer y (match), n (distinct), u (unsure) or f (finished).");
    let mut oracle = ConsoleOracle::stdio();
    run_labeling(&mut session, &mut oracle).context("Labeling session failed")?;

    // Labels survive even when training below cannot proceed yet.
    session
        .training_log()
        .save(training_path)
        .context("Failed to write the training log")?;

    let trained = session.train().context("Training failed")?;
    trained
        .save(settings_path)
        .context("Failed to write the trained model")?;

    let names = model.feature_names();
    let weights = trained.classifier.weights();
    for (name, weight) in names.iter().zip(weights) {
        info!("Learned weight {:>10.4} for {}", weight, name);
    }
    info!("Learned bias {:>12.4}", weights[names.len()]);
    println!(
        "Trained on {} examples ({} match / {} distinct); {} blocking predicates selected.",
        session.training_log().len(),
        session.match_count(),
        session.distinct_count(),
        trained.predicates.len()
    );
    Ok(())
}

fn partition(
    records_path: &Path,
    settings_path: &Path,
    threshold: f64,
    output: Option<&Path>,
    canonical: bool,
    workers: Option<usize>,
    progress: bool,
) -> Result<()> {
    let mut matcher =
        StaticMatcher::from_path(settings_path).context("Failed to load the trained model")?;
    if let Some(workers) = workers {
        matcher = matcher.with_parallel(ParallelConfig { workers });
    }
    if progress {
        matcher = matcher.with_progress(MultiProgress::new());
    }

    let records = load_records(records_path)?;
    let clusters = matcher
        .partition(&records, threshold)
        .context("Partitioning failed")?;

    let lookup: HashMap<&RecordKey, &FieldMap> = record_lookup(&records);
    let rows: Vec<ClusterRow> = clusters
        .into_iter()
        .map(|cluster| {
            let representative = if canonical {
                let members: Vec<&FieldMap> = cluster
                    .members
                    .iter()
                    .filter_map(|key| lookup.get(key).copied())
                    .collect();
                Some(matcher.canonicalize(&members))
            } else {
                None
            };
            ClusterRow {
                members: cluster.members,
                confidences: cluster.confidences,
                canonical: representative,
            }
        })
        .collect();

    match output {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create output file {}", path.display()))?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer_pretty(&mut writer, &rows)
                .context("Failed to serialize clusters")?;
            writer.flush()?;
            info!("Wrote {} clusters to {}", rows.len(), path.display());
        }
        None => {
            serde_json::to_writer_pretty(io::stdout().lock(), &rows)
                .context("Failed to serialize clusters")?;
            println!();
        }
    }
    Ok(())
}

fn load_records(path: &Path) -> Result<Vec<Record>> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open records file {}", path.display()))?;
    let records: Vec<Record> = serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("Failed to parse records file {}", path.display()))?;
    info!("Loaded {} records from {}", records.len(), path.display());
    Ok(records)
}

fn load_field_spec(path: &Path) -> Result<DataModel> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open field declaration file {}", path.display()))?;
    let spec: FieldSpec = serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("Failed to parse field declaration file {}", path.display()))?;
    let pairs: Vec<(&str, &str)> = spec
        .interactions
        .iter()
        .map(|(a, b)| (a.as_str(), b.as_str()))
        .collect();
    let model = DataModel::with_interactions(spec.fields, &pairs)
        .context("Invalid field declarations")?;
    info!(
        "Declared {} fields ({} interactions) from {}",
        model.field_count(),
        model.interactions().len(),
        path.display()
    );
    Ok(model)
}
