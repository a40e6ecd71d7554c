//! Conditional log-likelihood of labeled sequences and its gradient.

use std::ops::Range;

use super::model::Layout;

/// A training sequence with 0-based feature indices and label indices.
#[derive(Clone, Debug, PartialEq)]
pub struct LabeledSequence {
    pub xs: Vec<Vec<(usize, f64)>>,
    pub ys: Vec<usize>,
}

fn log_sum_exp<I>(values: I) -> f64
where
    I: IntoIterator<Item = f64>,
{
    let values: Vec<f64> = values.into_iter().collect();
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if max == f64::NEG_INFINITY {
        return max;
    }
    max + values.iter().map(|v| (v - max).exp()).sum::<f64>().ln()
}

/// Adds the gradient of `log p(ys | xs)` to `grad` and returns the log-likelihood.
pub fn sequence_log_likelihood(
    layout: Layout,
    params: &[f64],
    seq: &LabeledSequence,
    grad: &mut [f64],
) -> f64 {
    let n = seq.xs.len();
    let n_labels = layout.n_labels;
    if n == 0 || n_labels == 0 {
        return 0.0;
    }
    let emissions = layout.emissions(params, &seq.xs);
    let trans = |a: usize, b: usize| params[layout.transition(a, b)];

    let mut alpha = vec![vec![0.0; n_labels]; n];
    alpha[0].clone_from(&emissions[0]);
    for t in 1..n {
        for y in 0..n_labels {
            alpha[t][y] =
                emissions[t][y] + log_sum_exp((0..n_labels).map(|p| alpha[t - 1][p] + trans(p, y)));
        }
    }
    let mut beta = vec![vec![0.0; n_labels]; n];
    for t in (0..n - 1).rev() {
        for y in 0..n_labels {
            beta[t][y] = log_sum_exp(
                (0..n_labels).map(|q| trans(y, q) + emissions[t + 1][q] + beta[t + 1][q]),
            );
        }
    }
    let log_z = log_sum_exp(alpha[n - 1].iter().copied());

    let mut gold = emissions[0][seq.ys[0]];
    for t in 1..n {
        gold += trans(seq.ys[t - 1], seq.ys[t]) + emissions[t][seq.ys[t]];
    }

    // Observed counts minus expected counts.
    for t in 0..n {
        for y in 0..n_labels {
            let marginal = (alpha[t][y] + beta[t][y] - log_z).exp();
            let diff = f64::from(u8::from(seq.ys[t] == y)) - marginal;
            for &(f, v) in &seq.xs[t] {
                if f < layout.n_features {
                    grad[layout.state(f, y)] += diff * v;
                }
            }
            if t == 0 {
                grad[layout.start(y)] += diff;
            }
        }
    }
    for t in 1..n {
        for p in 0..n_labels {
            for y in 0..n_labels {
                let marginal =
                    (alpha[t - 1][p] + trans(p, y) + emissions[t][y] + beta[t][y] - log_z).exp();
                grad[layout.transition(p, y)] -= marginal;
            }
        }
        grad[layout.transition(seq.ys[t - 1], seq.ys[t])] += 1.0;
    }

    gold - log_z
}

/// Sums the log-likelihood of `seqs[range]`, adding its gradient to `grad`.
pub fn batch_log_likelihood(
    layout: Layout,
    params: &[f64],
    seqs: &[LabeledSequence],
    range: Range<usize>,
    grad: &mut [f64],
) -> f64 {
    seqs[range]
        .iter()
        .map(|seq| sequence_log_likelihood(layout, params, seq, grad))
        .sum()
}

/// Adds the Gaussian prior to a negated log-likelihood and its negated gradient.
///
/// On entry `grad` holds the log-likelihood gradient. On return it holds the gradient of the
/// value returned, which is to be minimized.
pub fn penalize(params: &[f64], log_likelihood: f64, grad: &mut [f64], variance: f64) -> f64 {
    let mut penalty = 0.0;
    for (g, &w) in grad.iter_mut().zip(params) {
        penalty += w * w;
        *g = -*g + w / variance;
    }
    -log_likelihood + penalty / (2.0 * variance)
}

/// Something whose value and gradient an optimizer can query.
pub trait Objective {
    fn dimension(&self) -> usize;

    /// Writes the gradient at `params` to `grad` and returns the value to minimize.
    fn evaluate(&mut self, params: &[f64], grad: &mut [f64]) -> crate::errors::Result<f64>;
}

/// Penalized negative log-likelihood computed on the calling thread.
pub struct LabelLikelihood<'a> {
    layout: Layout,
    seqs: &'a [LabeledSequence],
    variance: f64,
}

impl<'a> LabelLikelihood<'a> {
    pub const fn new(layout: Layout, seqs: &'a [LabeledSequence], variance: f64) -> Self {
        Self {
            layout,
            seqs,
            variance,
        }
    }
}

impl Objective for LabelLikelihood<'_> {
    fn dimension(&self) -> usize {
        self.layout.len()
    }

    fn evaluate(&mut self, params: &[f64], grad: &mut [f64]) -> crate::errors::Result<f64> {
        grad.fill(0.0);
        let ll = batch_log_likelihood(self.layout, params, self.seqs, 0..self.seqs.len(), grad);
        Ok(penalize(params, ll, grad, self.variance))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sequence() -> (Layout, LabeledSequence) {
        (
            Layout::new(2, 2),
            LabeledSequence {
                xs: vec![vec![(0, 1.0), (1, 1.0)], vec![(0, 1.0)], vec![(0, 1.0), (1, 0.5)]],
                ys: vec![1, 0, 1],
            },
        )
    }

    #[test]
    fn test_uniform_likelihood() {
        let (layout, seq) = sequence();
        let params = vec![0.0; layout.len()];
        let mut grad = vec![0.0; layout.len()];
        let ll = sequence_log_likelihood(layout, &params, &seq, &mut grad);

        assert!((ll - (0.125f64).ln()).abs() < 1e-9);
    }

    #[test]
    fn test_gradient_matches_finite_difference() {
        let (layout, seq) = sequence();
        let params: Vec<f64> = (0..layout.len()).map(|i| (i as f64 * 0.37).sin()).collect();
        let mut grad = vec![0.0; layout.len()];
        sequence_log_likelihood(layout, &params, &seq, &mut grad);

        let eps = 1e-6;
        for i in 0..layout.len() {
            let mut plus = params.clone();
            plus[i] += eps;
            let mut minus = params.clone();
            minus[i] -= eps;
            let mut scratch = vec![0.0; layout.len()];
            let numeric = (sequence_log_likelihood(layout, &plus, &seq, &mut scratch)
                - sequence_log_likelihood(layout, &minus, &seq, &mut scratch))
                / (2.0 * eps);

            assert!((numeric - grad[i]).abs() < 1e-5, "parameter {i}");
        }
    }

    #[test]
    fn test_penalize() {
        let params = vec![1.0, -2.0];
        let mut grad = vec![0.5, 0.25];
        let value = penalize(&params, -3.0, &mut grad, 2.0);

        assert_eq!(3.0 + 5.0 / 4.0, value);
        assert_eq!(vec![-0.5 + 0.5, -0.25 - 1.0], grad);
    }

    #[test]
    fn test_label_likelihood_objective() {
        let (layout, seq) = sequence();
        let seqs = vec![seq.clone(), seq];
        let mut objective = LabelLikelihood::new(layout, &seqs, 10.0);
        let params = vec![0.0; layout.len()];
        let mut grad = vec![1.0; layout.len()];
        let value = objective.evaluate(&params, &mut grad).unwrap();

        assert!((value + 2.0 * (0.125f64).ln()).abs() < 1e-9);
        assert_eq!(layout.len(), objective.dimension());
    }
}
