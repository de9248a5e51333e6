// src/canonical/mod.rs
//! Cluster representatives: one synthesized field mapping per cluster,
//! elected field-wise from the member records.

use std::collections::BTreeSet;

use crate::models::{DataModel, FieldKind, FieldMap, FieldValue, MISSING};

/// Builds the canonical representative of a cluster.
///
/// Per field: string fields take the longest non-missing value, every
/// other declared kind and any undeclared field takes the most frequent
/// non-missing value. Ties resolve to the value seen first in member
/// order. A field missing from every member stays missing, and a
/// single-member cluster is returned as-is.
pub fn canonicalize(model: &DataModel, members: &[&FieldMap]) -> FieldMap {
    match members {
        [] => FieldMap::new(),
        [only] => (*only).clone(),
        _ => {
            let mut names: BTreeSet<&str> = BTreeSet::new();
            for member in members {
                names.extend(member.keys().map(String::as_str));
            }
            names
                .into_iter()
                .map(|name| {
                    let values: Vec<&FieldValue> = members
                        .iter()
                        .map(|m| m.get(name).unwrap_or(&MISSING))
                        .filter(|v| !v.is_missing())
                        .collect();
                    (name.to_string(), elect(model, name, &values))
                })
                .collect()
        }
    }
}

fn elect(model: &DataModel, name: &str, values: &[&FieldValue]) -> FieldValue {
    if values.is_empty() {
        return FieldValue::Missing;
    }
    let kind = model
        .fields()
        .iter()
        .find(|d| d.name == name)
        .map(|d| d.kind);
    match kind {
        Some(FieldKind::Str) => longest(values),
        _ => mode(values),
    }
}

/// Longest value by character count, first seen wins ties.
fn longest(values: &[&FieldValue]) -> FieldValue {
    let mut best = values[0];
    let mut best_len = char_count(best);
    for &value in &values[1..] {
        let len = char_count(value);
        if len > best_len {
            best = value;
            best_len = len;
        }
    }
    best.clone()
}

fn char_count(value: &FieldValue) -> usize {
    value.to_string().chars().count()
}

/// Most frequent value, first seen wins ties. Counting is linear over a
/// small vector; `FieldValue` holds floats and is not hashable.
fn mode(values: &[&FieldValue]) -> FieldValue {
    let mut counts: Vec<(&FieldValue, usize)> = Vec::new();
    for &value in values {
        match counts.iter_mut().find(|(seen, _)| *seen == value) {
            Some((_, n)) => *n += 1,
            None => counts.push((value, 1)),
        }
    }
    let mut best = counts[0];
    for &entry in &counts[1..] {
        if entry.1 > best.1 {
            best = entry;
        }
    }
    best.0.clone()
}
