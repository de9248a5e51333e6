// src/models/fields.rs

use log::debug;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;

use crate::error::{MatchError, Result};

/// Supported comparator types. This is a closed set: configuration strings
/// are resolved through [`FieldKind::from_tag`] and anything else is
/// rejected when the model is constructed, never at scoring time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    /// Identical-after-trimming equality, scored 1.0 or 0.0.
    Exact,
    /// Fuzzy text similarity (Jaro-Winkler over normalized text).
    Str,
    /// Relative-difference similarity over parsed numbers.
    Numeric,
    /// Case-insensitive equality over normalized category labels.
    Categorical,
}

impl FieldKind {
    /// Resolves a declared type tag. Unknown tags are a configuration
    /// error so that a typo in a field declaration fails fast.
    pub fn from_tag(tag: &str) -> Result<Self> {
        match tag.trim().to_ascii_lowercase().as_str() {
            "exact" => Ok(FieldKind::Exact),
            "string" | "str" => Ok(FieldKind::Str),
            "numeric" | "number" => Ok(FieldKind::Numeric),
            "categorical" => Ok(FieldKind::Categorical),
            other => Err(MatchError::Configuration(format!(
                "unknown field type '{}' (expected one of: exact, string, numeric, categorical)",
                other
            ))),
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            FieldKind::Exact => "exact",
            FieldKind::Str => "string",
            FieldKind::Numeric => "numeric",
            FieldKind::Categorical => "categorical",
        }
    }
}

/// One declared field of the data model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    pub kind: FieldKind,
    /// When set, a missing value on either side of a comparison yields a
    /// neutral score plus a missing-indicator feature instead of failing
    /// the pair.
    #[serde(default)]
    pub has_missing: bool,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        FieldDef {
            name: name.into(),
            kind,
            has_missing: false,
        }
    }

    pub fn with_missing(mut self) -> Self {
        self.has_missing = true;
        self
    }

    /// Builds a definition from a declared type tag string.
    pub fn from_tag(name: impl Into<String>, tag: &str, has_missing: bool) -> Result<Self> {
        Ok(FieldDef {
            name: name.into(),
            kind: FieldKind::from_tag(tag)?,
            has_missing,
        })
    }
}

/// The ordered field configuration of one model.
///
/// The declaration order is semantic: it fixes the feature vector layout
/// for the lifetime of the model. The layout is
///
/// ```text
/// [ per-field similarity | per-interaction product | per-has_missing indicator ]
/// ```
///
/// in field declaration order, interaction declaration order, then
/// declaration order of the `has_missing` fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataModel {
    fields: Vec<FieldDef>,
    #[serde(default)]
    interactions: Vec<(usize, usize)>,
}

impl DataModel {
    pub fn new(fields: Vec<FieldDef>) -> Result<Self> {
        Self::with_interactions(fields, &[])
    }

    /// Builds a model with interaction terms between correlated fields.
    /// Each pair names two distinct declared fields; the feature is the
    /// product of their similarity scores.
    pub fn with_interactions(fields: Vec<FieldDef>, pairs: &[(&str, &str)]) -> Result<Self> {
        if fields.is_empty() {
            return Err(MatchError::Configuration(
                "a data model requires at least one field".into(),
            ));
        }
        let mut seen: HashSet<&str> = HashSet::new();
        for def in &fields {
            if def.name.trim().is_empty() {
                return Err(MatchError::Configuration("field names may not be empty".into()));
            }
            if !seen.insert(def.name.as_str()) {
                return Err(MatchError::Configuration(format!(
                    "duplicate field name '{}'",
                    def.name
                )));
            }
        }

        let mut interactions = Vec::with_capacity(pairs.len());
        for (left, right) in pairs {
            let li = Self::index_of(&fields, left)?;
            let ri = Self::index_of(&fields, right)?;
            if li == ri {
                return Err(MatchError::Configuration(format!(
                    "interaction must name two distinct fields, got '{}' twice",
                    left
                )));
            }
            interactions.push((li.min(ri), li.max(ri)));
        }

        let model = DataModel { fields, interactions };
        debug!(
            "Constructed data model: {} fields, {} interactions, {} features",
            model.field_count(),
            model.interactions.len(),
            model.feature_len()
        );
        Ok(model)
    }

    fn index_of(fields: &[FieldDef], name: &str) -> Result<usize> {
        fields
            .iter()
            .position(|d| d.name == name)
            .ok_or_else(|| {
                MatchError::Configuration(format!("interaction references unknown field '{}'", name))
            })
    }

    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    pub fn interactions(&self) -> &[(usize, usize)] {
        &self.interactions
    }

    /// Indices of the fields that carry a missing-indicator slot, in
    /// declaration order.
    pub fn missing_indicator_fields(&self) -> Vec<usize> {
        self.fields
            .iter()
            .enumerate()
            .filter(|(_, d)| d.has_missing)
            .map(|(i, _)| i)
            .collect()
    }

    /// Total length of the feature vector this model produces.
    pub fn feature_len(&self) -> usize {
        self.fields.len()
            + self.interactions.len()
            + self.fields.iter().filter(|d| d.has_missing).count()
    }

    /// Human-readable names for every feature slot, aligned with the
    /// layout. Used when reporting learned model weights.
    pub fn feature_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.fields.iter().map(|d| d.name.clone()).collect();
        for &(i, j) in &self.interactions {
            names.push(format!("{}*{}", self.fields[i].name, self.fields[j].name));
        }
        for def in self.fields.iter().filter(|d| d.has_missing) {
            names.push(format!("{}:missing", def.name));
        }
        names
    }

    /// Stable digest of the field configuration. Persisted artifacts carry
    /// it so that a training log or settings file produced under one field
    /// layout is rejected when loaded under another.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for def in &self.fields {
            hasher.update(
                format!("{}:{}:{}\n", def.name, def.kind.tag(), def.has_missing).as_bytes(),
            );
        }
        for &(i, j) in &self.interactions {
            hasher.update(format!("x:{}:{}\n", i, j).as_bytes());
        }
        hex::encode(hasher.finalize())
    }
}
