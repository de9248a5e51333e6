// src/scoring/classifier.rs

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::error::{MatchError, Result};
use crate::models::{FeatureVector, MatchLabel};

const DEFAULT_LEARNING_RATE: f64 = 0.5;
const DEFAULT_EPOCHS: usize = 1000;
const DEFAULT_L2: f64 = 0.01;

/// Labeled examples required per class before a model may be fit.
pub const MIN_LABELS_PER_CLASS: usize = 1;

/// A lightweight logistic regression model over pair feature vectors.
///
/// Fitting is full-batch gradient descent on the class-weighted,
/// L2-regularized log loss. Weights start at zero and the epoch count is
/// fixed, so the same examples always produce the same model regardless of
/// label order or any previous fit.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LogisticClassifier {
    // Per-feature weights + 1 trailing bias term.
    weights: Vec<f64>,
    learning_rate: f64,
    l2: f64,
    epochs: usize,
}

impl LogisticClassifier {
    /// Initializes the model with zero weights.
    pub fn new(feature_count: usize) -> Self {
        Self {
            weights: vec![0.0; feature_count + 1], // +1 for the bias term
            learning_rate: DEFAULT_LEARNING_RATE,
            l2: DEFAULT_L2,
            epochs: DEFAULT_EPOCHS,
        }
    }

    /// Same model at a different regularization strength.
    pub fn with_l2(feature_count: usize, l2: f64) -> Self {
        let mut model = Self::new(feature_count);
        model.l2 = l2;
        model
    }

    pub fn feature_count(&self) -> usize {
        self.weights.len() - 1
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    /// Predicts the probability that the pair behind `features` is a match.
    pub fn predict(&self, features: &[f64]) -> f64 {
        if features.len() != self.feature_count() {
            warn!(
                "Expected {} features, but got {}. Prediction will be unreliable.",
                self.feature_count(),
                features.len()
            );
            return 0.5; // Neutral probability on layout mismatch
        }
        // Add the bias term (1.0) to the features
        let features_with_bias = features.iter().chain(std::iter::once(&1.0));

        let logit: f64 = self
            .weights
            .iter()
            .zip(features_with_bias)
            .map(|(w, f)| w * f)
            .sum();

        1.0 / (1.0 + (-logit).exp())
    }

    /// Fits the model from scratch on the full example set.
    ///
    /// Class weights `n / (2 * n_class)` balance the loss so the rarer
    /// class is not drowned out by the more common one. Both classes must
    /// be represented or no meaningful decision boundary exists.
    pub fn fit(&mut self, examples: &[(FeatureVector, MatchLabel)]) -> Result<()> {
        let matches = examples
            .iter()
            .filter(|(_, label)| *label == MatchLabel::Match)
            .count();
        let distincts = examples.len() - matches;
        if matches < MIN_LABELS_PER_CLASS || distincts < MIN_LABELS_PER_CLASS {
            return Err(MatchError::InsufficientData { matches, distincts });
        }
        for (features, _) in examples {
            if features.len() != self.feature_count() {
                return Err(MatchError::Configuration(format!(
                    "feature vector length {} does not match the declared layout of {}",
                    features.len(),
                    self.feature_count()
                )));
            }
        }

        let n = examples.len() as f64;
        let weight_match = n / (2.0 * matches as f64);
        let weight_distinct = n / (2.0 * distincts as f64);

        self.weights = vec![0.0; self.weights.len()];
        let bias_index = self.weights.len() - 1;

        for _ in 0..self.epochs {
            let mut gradient = vec![0.0; self.weights.len()];
            for (features, label) in examples {
                let prediction = self.predict(features);
                let (target, class_weight) = match label {
                    MatchLabel::Match => (1.0, weight_match),
                    MatchLabel::Distinct => (0.0, weight_distinct),
                };
                let error = class_weight * (prediction - target);
                for (i, feature_val) in features.iter().enumerate() {
                    gradient[i] += error * feature_val;
                }
                gradient[bias_index] += error; // Bias feature is always 1.0
            }
            for i in 0..self.weights.len() {
                let mut step = gradient[i] / n;
                if i != bias_index {
                    // The bias term is left unregularized.
                    step += self.l2 * self.weights[i];
                }
                self.weights[i] -= self.learning_rate * step;
            }
        }

        debug!(
            "Fit classifier on {} examples ({} match / {} distinct), l2 {}",
            examples.len(),
            matches,
            distincts,
            self.l2
        );
        Ok(())
    }
}
