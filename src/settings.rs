// src/settings.rs

use chrono::{DateTime, Utc};
use log::info;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use crate::blocking::Predicate;
use crate::error::{MatchError, Result};
use crate::models::{DataModel, FieldDef};
use crate::scoring::LogisticClassifier;

/// Artifact format version; bumped whenever the on-disk shape changes.
pub const SETTINGS_VERSION: u32 = 1;

/// The complete trained state of a matcher: field configuration, learned
/// blocking predicates and the fitted classifier. Saved once after
/// training and reloaded for any number of later partition runs, which
/// score identically to the session that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainedModel {
    pub version: u32,
    pub fingerprint: String,
    pub trained_at: DateTime<Utc>,
    fields: Vec<FieldDef>,
    /// Interaction pairs by field name; indices would silently shift if a
    /// hand-edited artifact reordered the field list.
    interactions: Vec<(String, String)>,
    pub predicates: Vec<Predicate>,
    pub classifier: LogisticClassifier,
}

impl TrainedModel {
    pub fn new(model: &DataModel, predicates: Vec<Predicate>, classifier: LogisticClassifier) -> Self {
        let fields = model.fields().to_vec();
        let interactions = model
            .interactions()
            .iter()
            .map(|&(i, j)| (fields[i].name.clone(), fields[j].name.clone()))
            .collect();
        TrainedModel {
            version: SETTINGS_VERSION,
            fingerprint: model.fingerprint(),
            trained_at: Utc::now(),
            fields,
            interactions,
            predicates,
            classifier,
        }
    }

    /// Rebuilds the field configuration, re-running construction
    /// validation so a corrupted artifact fails loudly.
    pub fn data_model(&self) -> Result<DataModel> {
        let pairs: Vec<(&str, &str)> = self
            .interactions
            .iter()
            .map(|(a, b)| (a.as_str(), b.as_str()))
            .collect();
        let model = DataModel::with_interactions(self.fields.clone(), &pairs)?;
        if model.fingerprint() != self.fingerprint {
            return Err(MatchError::Configuration(format!(
                "settings fingerprint {} does not match its own field configuration {}",
                self.fingerprint,
                model.fingerprint()
            )));
        }
        Ok(model)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.flush()?;
        info!(
            "Wrote settings to {} ({} fields, {} predicates)",
            path.display(),
            self.fields.len(),
            self.predicates.len()
        );
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let settings: TrainedModel = serde_json::from_reader(reader)?;
        if settings.version != SETTINGS_VERSION {
            return Err(MatchError::Configuration(format!(
                "settings at {} use format version {}, this build reads version {}",
                path.display(),
                settings.version,
                SETTINGS_VERSION
            )));
        }
        info!(
            "Loaded settings from {} (trained {}, {} predicates)",
            path.display(),
            settings.trained_at,
            settings.predicates.len()
        );
        Ok(settings)
    }
}
