// src/comparators/mod.rs
//! Field comparators: one similarity function per declared field kind.
//!
//! Every comparator is deterministic, symmetric and bounded to [0, 1].
//! Missing values on a field declared `has_missing` produce a neutral
//! score plus a raised missing flag; a missing value anywhere else is a
//! per-pair comparator error that the scoring layer isolates to the
//! offending pair.

use once_cell::sync::Lazy;
use regex::Regex;
use strsim::jaro_winkler;

use crate::error::{MatchError, Result};
use crate::models::{DataModel, FeatureVector, FieldDef, FieldKind, FieldValue, FieldMap, MISSING};

static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Lowercases and collapses runs of whitespace. Shared by the string and
/// categorical comparators and by the blocking predicates so that both
/// layers agree on what "the same text" means.
pub fn normalize_text(raw: &str) -> String {
    WHITESPACE_RE
        .replace_all(raw.trim(), " ")
        .to_lowercase()
}

fn value_text(value: &FieldValue) -> String {
    value.to_string()
}

fn value_number(value: &FieldValue) -> Option<f64> {
    match value {
        FieldValue::Number(n) if n.is_finite() => Some(*n),
        FieldValue::Text(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
        _ => None,
    }
}

/// Compares one field of a candidate pair.
///
/// Returns `(score, is_missing)`. The score is 0.0 whenever the missing
/// flag is raised; the classifier learns its own field-specific penalty
/// for absence through the indicator feature instead.
pub fn compare(def: &FieldDef, a: &FieldValue, b: &FieldValue) -> Result<(f64, bool)> {
    if a.is_missing() || b.is_missing() {
        if def.has_missing {
            return Ok((0.0, true));
        }
        return Err(MatchError::Comparator {
            field: def.name.clone(),
            reason: "missing value on a field not declared has_missing".into(),
        });
    }

    let score = match def.kind {
        FieldKind::Exact => exact_similarity(a, b),
        FieldKind::Str => string_similarity(a, b),
        FieldKind::Numeric => numeric_similarity(def, a, b)?,
        FieldKind::Categorical => categorical_similarity(a, b),
    };
    Ok((score, false))
}

fn exact_similarity(a: &FieldValue, b: &FieldValue) -> f64 {
    // Numbers compare numerically so 60614 and 60614.0 agree; everything
    // else compares on the trimmed display form.
    if let (Some(x), Some(y)) = (value_number(a), value_number(b)) {
        return if x == y { 1.0 } else { 0.0 };
    }
    if value_text(a).trim() == value_text(b).trim() {
        1.0
    } else {
        0.0
    }
}

fn string_similarity(a: &FieldValue, b: &FieldValue) -> f64 {
    let left = normalize_text(&value_text(a));
    let right = normalize_text(&value_text(b));
    if left.is_empty() && right.is_empty() {
        return 1.0;
    }
    jaro_winkler(&left, &right)
}

fn numeric_similarity(def: &FieldDef, a: &FieldValue, b: &FieldValue) -> Result<f64> {
    let x = value_number(a).ok_or_else(|| non_numeric(def, a))?;
    let y = value_number(b).ok_or_else(|| non_numeric(def, b))?;
    if x == y {
        return Ok(1.0);
    }
    // Relative difference, symmetric and clamped: identical magnitudes
    // score 1.0, opposite-sign equal magnitudes score 0.0.
    let denom = x.abs() + y.abs();
    if denom == 0.0 {
        return Ok(1.0);
    }
    Ok(1.0 - ((x - y).abs() / denom).min(1.0))
}

fn non_numeric(def: &FieldDef, value: &FieldValue) -> MatchError {
    MatchError::Comparator {
        field: def.name.clone(),
        reason: format!("value '{}' is not numeric", value),
    }
}

fn categorical_similarity(a: &FieldValue, b: &FieldValue) -> f64 {
    if normalize_text(&value_text(a)) == normalize_text(&value_text(b)) {
        1.0
    } else {
        0.0
    }
}

/// Produces the full feature vector of a candidate pair under the model's
/// fixed layout: per-field similarities, then interaction products, then
/// missing indicators.
pub fn featurize(model: &DataModel, left: &FieldMap, right: &FieldMap) -> Result<FeatureVector> {
    let mut features = Vec::with_capacity(model.feature_len());
    let mut indicators = Vec::new();

    for def in model.fields() {
        let a = left.get(&def.name).unwrap_or(&MISSING);
        let b = right.get(&def.name).unwrap_or(&MISSING);
        let (score, missing) = compare(def, a, b)?;
        features.push(score);
        if def.has_missing {
            indicators.push(if missing { 1.0 } else { 0.0 });
        }
    }
    for &(i, j) in model.interactions() {
        features.push(features[i] * features[j]);
    }
    features.extend(indicators);
    Ok(features)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FieldDef;
    use std::collections::HashMap;

    fn def(kind: FieldKind) -> FieldDef {
        FieldDef::new("f", kind)
    }

    fn score(kind: FieldKind, a: &FieldValue, b: &FieldValue) -> f64 {
        compare(&def(kind), a, b).unwrap().0
    }

    #[test]
    fn test_all_kinds_are_symmetric() {
        let cases = [
            (FieldKind::Exact, FieldValue::text("abc corp"), FieldValue::text("abd corp")),
            (FieldKind::Str, FieldValue::text("abc corp"), FieldValue::text("abd corp")),
            (FieldKind::Numeric, FieldValue::number(10.0), FieldValue::number(14.0)),
            (FieldKind::Categorical, FieldValue::text("Gov"), FieldValue::text("gov")),
        ];
        for (kind, a, b) in &cases {
            assert_eq!(score(*kind, a, b), score(*kind, b, a), "{:?}", kind);
        }
    }

    #[test]
    fn test_identity_scores_maximum() {
        let values = [FieldValue::text("abc corp"), FieldValue::number(42.0)];
        for kind in [FieldKind::Exact, FieldKind::Str, FieldKind::Categorical] {
            assert_eq!(score(kind, &values[0], &values[0]), 1.0, "{:?}", kind);
        }
        assert_eq!(score(FieldKind::Numeric, &values[1], &values[1]), 1.0);
    }

    #[test]
    fn test_exact_normalizes_numbers_and_trims() {
        assert_eq!(
            score(FieldKind::Exact, &FieldValue::number(60614.0), &FieldValue::text("60614")),
            1.0
        );
        assert_eq!(
            score(FieldKind::Exact, &FieldValue::text(" abc "), &FieldValue::text("abc")),
            1.0
        );
        assert_eq!(
            score(FieldKind::Exact, &FieldValue::text("abc"), &FieldValue::text("abd")),
            0.0
        );
    }

    #[test]
    fn test_string_similarity_is_bounded() {
        let s = score(
            FieldKind::Str,
            &FieldValue::text("Abc   Corp"),
            &FieldValue::text("abc corp inc"),
        );
        assert!(s > 0.8 && s < 1.0);
        let far = score(FieldKind::Str, &FieldValue::text("abc corp"), &FieldValue::text("xyz inc"));
        assert!((0.0..=1.0).contains(&far));
        assert!(far < s);
    }

    #[test]
    fn test_numeric_relative_difference() {
        assert!(score(FieldKind::Numeric, &FieldValue::number(100.0), &FieldValue::number(101.0)) > 0.99);
        assert_eq!(
            score(FieldKind::Numeric, &FieldValue::number(1.0), &FieldValue::number(-1.0)),
            0.0
        );
        // Numeric text parses.
        assert_eq!(
            score(FieldKind::Numeric, &FieldValue::text("12"), &FieldValue::number(12.0)),
            1.0
        );
    }

    #[test]
    fn test_numeric_rejects_non_numeric_text() {
        let err = compare(
            &def(FieldKind::Numeric),
            &FieldValue::text("n/a"),
            &FieldValue::number(1.0),
        )
        .unwrap_err();
        assert!(matches!(err, MatchError::Comparator { .. }));
    }

    #[test]
    fn test_declared_missing_yields_indicator() {
        let d = FieldDef::new("zip", FieldKind::Exact).with_missing();
        let (score, missing) = compare(&d, &FieldValue::Missing, &FieldValue::text("60614")).unwrap();
        assert_eq!(score, 0.0);
        assert!(missing);
    }

    #[test]
    fn test_undeclared_missing_is_an_error() {
        let d = FieldDef::new("zip", FieldKind::Exact);
        assert!(compare(&d, &FieldValue::Missing, &FieldValue::text("60614")).is_err());
    }

    #[test]
    fn test_featurize_layout() {
        let model = DataModel::with_interactions(
            vec![
                FieldDef::new("name", FieldKind::Str),
                FieldDef::new("zip", FieldKind::Exact).with_missing(),
            ],
            &[("name", "zip")],
        )
        .unwrap();

        let mut left = HashMap::new();
        left.insert("name".to_string(), FieldValue::text("abc corp"));
        left.insert("zip".to_string(), FieldValue::Missing);
        let mut right = HashMap::new();
        right.insert("name".to_string(), FieldValue::text("abc corp"));
        right.insert("zip".to_string(), FieldValue::text("60614"));

        let features = featurize(&model, &left, &right).unwrap();
        assert_eq!(features.len(), model.feature_len());
        assert_eq!(features[0], 1.0); // name similarity
        assert_eq!(features[1], 0.0); // zip neutral under missing
        assert_eq!(features[2], 0.0); // interaction product
        assert_eq!(features[3], 1.0); // zip missing indicator
    }
}
