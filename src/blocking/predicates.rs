// src/blocking/predicates.rs

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::comparators::normalize_text;
use crate::models::{DataModel, FieldDef, FieldKind, FieldMap, FieldValue, MISSING};

/// Tokens shorter than this never become block keys; single characters
/// group half the record set together for no recall gain.
pub const MIN_TOKEN_LENGTH: usize = 2;

/// A deterministic function from one record to zero or more block keys.
/// Records sharing any emitted key become candidate pairs. Missing or
/// empty values emit nothing, so a record with no usable fields is simply
/// never covered.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Predicate {
    /// The whole normalized value.
    WholeField { field: String },
    /// Every whitespace token of the normalized value.
    Token { field: String },
    /// The first `len` characters of the normalized value (the whole value
    /// when shorter).
    Prefix { field: String, len: usize },
    /// Every character n-gram of the normalized value (the whole value
    /// when shorter).
    Ngram { field: String, n: usize },
    /// The numeric value bucketed to `floor(value / width)`.
    NumericBucket { field: String, width: u64 },
}

impl Predicate {
    pub fn field(&self) -> &str {
        match self {
            Predicate::WholeField { field }
            | Predicate::Token { field }
            | Predicate::Prefix { field, .. }
            | Predicate::Ngram { field, .. }
            | Predicate::NumericBucket { field, .. } => field,
        }
    }

    /// Stable identity used to namespace block keys, so two predicates
    /// emitting the same raw key never collide.
    pub fn id(&self) -> String {
        match self {
            Predicate::WholeField { field } => format!("whole({})", field),
            Predicate::Token { field } => format!("token({})", field),
            Predicate::Prefix { field, len } => format!("prefix{}({})", len, field),
            Predicate::Ngram { field, n } => format!("ngram{}({})", n, field),
            Predicate::NumericBucket { field, width } => format!("bucket{}({})", width, field),
        }
    }

    /// Emits the namespaced block keys of one record.
    pub fn block_keys(&self, fields: &FieldMap) -> Vec<String> {
        let value = fields.get(self.field()).unwrap_or(&MISSING);
        if value.is_missing() {
            return Vec::new();
        }
        let raw = self.raw_keys(value);
        raw.into_iter()
            .map(|k| format!("{}:{}", self.id(), k))
            .collect()
    }

    fn raw_keys(&self, value: &FieldValue) -> Vec<String> {
        match self {
            Predicate::WholeField { .. } => {
                let text = normalize_text(&value.to_string());
                if text.is_empty() {
                    Vec::new()
                } else {
                    vec![text]
                }
            }
            Predicate::Token { .. } => {
                let text = normalize_text(&value.to_string());
                // BTreeSet for deduplication with a stable emission order.
                let tokens: BTreeSet<&str> = text
                    .split_whitespace()
                    .filter(|t| t.len() >= MIN_TOKEN_LENGTH)
                    .collect();
                tokens.into_iter().map(str::to_string).collect()
            }
            Predicate::Prefix { len, .. } => {
                let text = normalize_text(&value.to_string());
                if text.is_empty() {
                    return Vec::new();
                }
                vec![text.chars().take(*len).collect()]
            }
            Predicate::Ngram { n, .. } => {
                let text = normalize_text(&value.to_string());
                if text.is_empty() {
                    return Vec::new();
                }
                let chars: Vec<char> = text.chars().collect();
                if chars.len() < *n {
                    return vec![text];
                }
                let grams: BTreeSet<String> =
                    chars.windows(*n).map(|w| w.iter().collect()).collect();
                grams.into_iter().collect()
            }
            Predicate::NumericBucket { width, .. } => {
                let number = match value {
                    FieldValue::Number(x) if x.is_finite() => Some(*x),
                    FieldValue::Text(s) => s.trim().parse::<f64>().ok().filter(|x| x.is_finite()),
                    _ => None,
                };
                match number {
                    Some(x) => vec![format!("{}", (x / *width as f64).floor() as i64)],
                    None => Vec::new(),
                }
            }
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id())
    }
}

/// The template library a field contributes to predicate learning, in a
/// fixed declaration order (the order doubles as the greedy tie-break).
pub fn templates_for(def: &FieldDef) -> Vec<Predicate> {
    let field = def.name.clone();
    match def.kind {
        FieldKind::Exact | FieldKind::Categorical => {
            vec![Predicate::WholeField { field }]
        }
        FieldKind::Str => vec![
            Predicate::WholeField {
                field: field.clone(),
            },
            Predicate::Token {
                field: field.clone(),
            },
            Predicate::Prefix {
                field: field.clone(),
                len: 4,
            },
            Predicate::Prefix {
                field: field.clone(),
                len: 6,
            },
            Predicate::Ngram { field, n: 3 },
        ],
        FieldKind::Numeric => vec![
            Predicate::WholeField {
                field: field.clone(),
            },
            Predicate::NumericBucket {
                field: field.clone(),
                width: 10,
            },
            Predicate::NumericBucket { field, width: 100 },
        ],
    }
}

/// The full template library of a model, concatenated in field declaration
/// order. Downstream greedy selection relies on this order as its
/// tie-break, so it must stay deterministic.
pub fn template_library(model: &DataModel) -> Vec<Predicate> {
    model.fields().iter().flat_map(templates_for).collect()
}

/// Whether a predicate puts the two sides of a pair into a common block.
pub fn co_blocks(predicate: &Predicate, left: &FieldMap, right: &FieldMap) -> bool {
    let left_keys = predicate.block_keys(left);
    if left_keys.is_empty() {
        return false;
    }
    let right_keys: BTreeSet<String> = predicate.block_keys(right).into_iter().collect();
    left_keys.iter().any(|k| right_keys.contains(k))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn record(pairs: &[(&str, FieldValue)]) -> FieldMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_token_keys_deduplicate_and_filter() {
        let p = Predicate::Token {
            field: "name".into(),
        };
        let fields = record(&[("name", FieldValue::text("ABC abc a Corp"))]);
        let keys = p.block_keys(&fields);
        assert_eq!(keys, vec!["token(name):abc", "token(name):corp"]);
    }

    #[test]
    fn test_prefix_shorter_than_len_uses_whole_value() {
        let p = Predicate::Prefix {
            field: "name".into(),
            len: 6,
        };
        let fields = record(&[("name", FieldValue::text("abc"))]);
        assert_eq!(p.block_keys(&fields), vec!["prefix6(name):abc"]);
    }

    #[test]
    fn test_missing_and_empty_emit_nothing() {
        let p = Predicate::WholeField {
            field: "zip".into(),
        };
        assert!(p.block_keys(&record(&[("zip", FieldValue::Missing)])).is_empty());
        assert!(p.block_keys(&record(&[("zip", FieldValue::text("  "))])).is_empty());
        assert!(p.block_keys(&HashMap::new()).is_empty());
    }

    #[test]
    fn test_numeric_bucket_floor() {
        let p = Predicate::NumericBucket {
            field: "price".into(),
            width: 10,
        };
        let a = p.block_keys(&record(&[("price", FieldValue::number(42.0))]));
        let b = p.block_keys(&record(&[("price", FieldValue::text("49.9"))]));
        assert_eq!(a, b);
        let c = p.block_keys(&record(&[("price", FieldValue::number(-5.0))]));
        assert_eq!(c, vec!["bucket10(price):-1"]);
    }

    #[test]
    fn test_ngram_keys_cover_shared_substrings() {
        let p = Predicate::Ngram {
            field: "name".into(),
            n: 3,
        };
        let a = record(&[("name", FieldValue::text("abc corp"))]);
        let b = record(&[("name", FieldValue::text("the abc company"))]);
        assert!(co_blocks(&p, &a, &b));
    }

    #[test]
    fn test_co_blocks_requires_shared_key() {
        let p = Predicate::Token {
            field: "name".into(),
        };
        let a = record(&[("name", FieldValue::text("abc corp"))]);
        let b = record(&[("name", FieldValue::text("xyz inc"))]);
        assert!(!co_blocks(&p, &a, &b));
        let c = record(&[("name", FieldValue::text("abc holdings"))]);
        assert!(co_blocks(&p, &a, &c));
    }
}
