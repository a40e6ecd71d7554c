//! Per-class precision, recall and F1.
//!
//! Undefined ratios (a zero denominator) are reported as `None`. Macro-F1 counts an undefined
//! F1 as zero.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use crate::errors::{Result, SparseTcError};
use crate::prediction::Prediction;
use crate::utils::MEMORY_SOURCE;

fn ratio(num: usize, den: usize) -> Option<f64> {
    if den == 0 {
        None
    } else {
        Some(num as f64 / den as f64)
    }
}

fn f1_score(precision: Option<f64>, recall: Option<f64>) -> Option<f64> {
    if precision.is_none() && recall.is_none() {
        return None;
    }
    let p = precision.unwrap_or(0.0);
    let r = recall.unwrap_or(0.0);
    if p + r == 0.0 {
        Some(0.0)
    } else {
        Some(2.0 * p * r / (p + r))
    }
}

fn mean_of_defined<I>(values: I) -> Option<f64>
where
    I: IntoIterator<Item = Option<f64>>,
{
    let (sum, n) = values
        .into_iter()
        .flatten()
        .fold((0.0, 0usize), |(sum, n), v| (sum + v, n + 1));
    ratio_f64(sum, n)
}

fn ratio_f64(sum: f64, n: usize) -> Option<f64> {
    if n == 0 {
        None
    } else {
        Some(sum / n as f64)
    }
}

/// Scores of one label.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct LabelScores {
    pub precision: Option<f64>,
    pub recall: Option<f64>,
    pub f1: Option<f64>,
    pub n_gold: usize,
    pub n_predicted: usize,
    pub n_correct: usize,
}

impl LabelScores {
    fn from_counts(n_gold: usize, n_predicted: usize, n_correct: usize) -> Self {
        let precision = ratio(n_correct, n_predicted);
        let recall = ratio(n_correct, n_gold);
        Self {
            precision,
            recall,
            f1: f1_score(precision, recall),
            n_gold,
            n_predicted,
            n_correct,
        }
    }
}

/// Result of [`evaluate()`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Evaluation {
    pub per_label: BTreeMap<String, LabelScores>,
    pub macro_f1: f64,
    pub correct: usize,
    pub incorrect: usize,
}

impl Evaluation {
    /// Fraction of correct predictions. `None` without predictions.
    pub fn accuracy(&self) -> Option<f64> {
        ratio(self.correct, self.correct + self.incorrect)
    }
}

fn fmt_score(v: Option<f64>) -> String {
    v.map_or_else(|| "undefined".to_string(), |v| format!("{v:.4}"))
}

impl fmt::Display for Evaluation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "label\tprecision\trecall\tf1\tgold\tpredicted")?;
        for (label, s) in &self.per_label {
            writeln!(
                f,
                "{label}\t{}\t{}\t{}\t{}\t{}",
                fmt_score(s.precision),
                fmt_score(s.recall),
                fmt_score(s.f1),
                s.n_gold,
                s.n_predicted,
            )?;
        }
        writeln!(f, "macro-F1\t{:.4}", self.macro_f1)?;
        write!(
            f,
            "accuracy\t{} ({}/{})",
            fmt_score(self.accuracy()),
            self.correct,
            self.correct + self.incorrect
        )
    }
}

/// Evaluates `(gold, predicted)` pairs.
///
/// Every label of `labels` is reported even if it never occurs in `pairs`. Labels occurring in
/// `pairs` are always reported.
pub fn evaluate<I, G, P, L, S>(pairs: I, labels: L) -> Evaluation
where
    I: IntoIterator<Item = (G, P)>,
    G: AsRef<str>,
    P: AsRef<str>,
    L: IntoIterator<Item = S>,
    S: Into<String>,
{
    // (gold, predicted, correct)
    let mut counts: BTreeMap<String, (usize, usize, usize)> = labels
        .into_iter()
        .map(|label| (label.into(), (0, 0, 0)))
        .collect();
    let mut correct = 0;
    let mut incorrect = 0;
    for (gold, predicted) in pairs {
        let gold = gold.as_ref();
        let predicted = predicted.as_ref();
        counts.entry(gold.to_string()).or_default().0 += 1;
        counts.entry(predicted.to_string()).or_default().1 += 1;
        if gold == predicted {
            counts.entry(gold.to_string()).or_default().2 += 1;
            correct += 1;
        } else {
            incorrect += 1;
        }
    }
    let per_label: BTreeMap<_, _> = counts
        .into_iter()
        .map(|(label, (g, p, c))| (label, LabelScores::from_counts(g, p, c)))
        .collect();
    let macro_f1 = if per_label.is_empty() {
        0.0
    } else {
        per_label.values().map(|s| s.f1.unwrap_or(0.0)).sum::<f64>() / per_label.len() as f64
    };
    Evaluation {
        per_label,
        macro_f1,
        correct,
        incorrect,
    }
}

/// Evaluates a prediction file's rows after mapping codes to labels with `decode`.
pub fn evaluate_predictions<F, L, S>(
    predictions: &[Prediction],
    labels: L,
    mut decode: F,
) -> Result<Evaluation>
where
    F: FnMut(&str) -> Result<String>,
    L: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut pairs = Vec::with_capacity(predictions.len());
    for p in predictions {
        pairs.push((decode(&p.gold)?, decode(&p.predicted)?));
    }
    Ok(evaluate(pairs, labels))
}

/// Averages evaluations of several folds.
#[derive(Clone, Debug, Default)]
pub struct FoldAverage {
    folds: Vec<Evaluation>,
}

impl FoldAverage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, evaluation: Evaluation) {
        self.folds.push(evaluation);
    }

    pub fn n_folds(&self) -> usize {
        self.folds.len()
    }

    /// Returns the average over all pushed folds.
    ///
    /// Per-label scores are averaged over the folds in which they are defined, counts are
    /// summed, and macro-F1 is averaged over all folds.
    pub fn average(&self) -> Evaluation {
        let mut by_label: BTreeMap<&str, Vec<&LabelScores>> = BTreeMap::new();
        for fold in &self.folds {
            for (label, scores) in &fold.per_label {
                by_label.entry(label).or_default().push(scores);
            }
        }
        let per_label = by_label
            .into_iter()
            .map(|(label, scores)| {
                let avg = LabelScores {
                    precision: mean_of_defined(scores.iter().map(|s| s.precision)),
                    recall: mean_of_defined(scores.iter().map(|s| s.recall)),
                    f1: mean_of_defined(scores.iter().map(|s| s.f1)),
                    n_gold: scores.iter().map(|s| s.n_gold).sum(),
                    n_predicted: scores.iter().map(|s| s.n_predicted).sum(),
                    n_correct: scores.iter().map(|s| s.n_correct).sum(),
                };
                (label.to_string(), avg)
            })
            .collect();
        Evaluation {
            per_label,
            macro_f1: ratio_f64(self.folds.iter().map(|e| e.macro_f1).sum(), self.folds.len())
                .unwrap_or(0.0),
            correct: self.folds.iter().map(|e| e.correct).sum(),
            incorrect: self.folds.iter().map(|e| e.incorrect).sum(),
        }
    }
}

/// Error measures of regression predictions.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RegressionEvaluation {
    pub n: usize,
    pub mean_absolute_error: f64,
    pub root_mean_squared_error: f64,
}

impl RegressionEvaluation {
    /// # Errors
    ///
    /// [`SparseTcError::InvalidFormat`] is returned if a value is not a number, and
    /// [`SparseTcError::InvalidConfig`] if `predictions` is empty.
    pub fn evaluate(predictions: &[Prediction]) -> Result<Self> {
        if predictions.is_empty() {
            return Err(SparseTcError::invalid_config("no predictions to evaluate"));
        }
        let parse = |s: &str| {
            s.trim().parse::<f64>().map_err(|_| {
                SparseTcError::invalid_format(
                    Path::new(MEMORY_SOURCE),
                    None,
                    format!("[{s}] is not a number"),
                )
            })
        };
        let mut abs_sum = 0.0;
        let mut sq_sum = 0.0;
        for p in predictions {
            let diff = parse(&p.predicted)? - parse(&p.gold)?;
            abs_sum += diff.abs();
            sq_sum += diff * diff;
        }
        let n = predictions.len() as f64;
        Ok(Self {
            n: predictions.len(),
            mean_absolute_error: abs_sum / n,
            root_mean_squared_error: (sq_sum / n).sqrt(),
        })
    }
}

impl fmt::Display for RegressionEvaluation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "instances\t{}", self.n)?;
        writeln!(f, "MAE\t{:.4}", self.mean_absolute_error)?;
        write!(f, "RMSE\t{:.4}", self.root_mean_squared_error)
    }
}
