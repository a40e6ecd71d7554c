//! Optimizers advanced one step at a time.

use std::collections::VecDeque;

use super::likelihood::{penalize, sequence_log_likelihood, LabeledSequence, Objective};
use super::model::Layout;
use crate::errors::Result;

const GRADIENT_TOLERANCE: f64 = 1e-6;
const ARMIJO: f64 = 1e-4;
const MAX_LINE_SEARCH: usize = 30;

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn relative_change(prev: f64, cur: f64) -> f64 {
    (prev - cur).abs() / prev.abs().max(cur.abs()).max(1.0)
}

/// One optimization step per call.
pub trait Optimizer {
    /// Updates `params` and returns `true` once converged.
    fn optimize_step(&mut self, params: &mut [f64]) -> Result<bool>;

    /// Objective value after the last step.
    fn value(&self) -> Option<f64>;
}

/// Limited-memory BFGS with a backtracking line search.
pub struct Lbfgs<O> {
    objective: O,
    history: usize,
    tolerance: f64,
    s: VecDeque<Vec<f64>>,
    y: VecDeque<Vec<f64>>,
    value: Option<f64>,
    grad: Vec<f64>,
}

impl<O> Lbfgs<O>
where
    O: Objective,
{
    pub fn new(objective: O, history: usize, tolerance: f64) -> Self {
        let dim = objective.dimension();
        Self {
            objective,
            history,
            tolerance,
            s: VecDeque::new(),
            y: VecDeque::new(),
            value: None,
            grad: vec![0.0; dim],
        }
    }

    /// Two-loop recursion: returns `-H grad`.
    fn direction(&self) -> Vec<f64> {
        let mut q = self.grad.clone();
        let mut alphas = Vec::with_capacity(self.s.len());
        for (s, y) in self.s.iter().zip(&self.y).rev() {
            let rho = 1.0 / dot(y, s);
            let alpha = rho * dot(s, &q);
            for (qi, yi) in q.iter_mut().zip(y) {
                *qi -= alpha * yi;
            }
            alphas.push((rho, alpha));
        }
        if let (Some(s), Some(y)) = (self.s.back(), self.y.back()) {
            let gamma = dot(s, y) / dot(y, y);
            q.iter_mut().for_each(|qi| *qi *= gamma);
        }
        for ((s, y), (rho, alpha)) in self.s.iter().zip(&self.y).zip(alphas.into_iter().rev()) {
            let beta = rho * dot(y, &q);
            for (qi, si) in q.iter_mut().zip(s) {
                *qi += (alpha - beta) * si;
            }
        }
        q.iter_mut().for_each(|qi| *qi = -*qi);
        q
    }
}

impl<O> Optimizer for Lbfgs<O>
where
    O: Objective,
{
    fn optimize_step(&mut self, params: &mut [f64]) -> Result<bool> {
        let value = match self.value {
            Some(value) => value,
            None => {
                let value = self.objective.evaluate(params, &mut self.grad)?;
                self.value = Some(value);
                value
            }
        };
        if dot(&self.grad, &self.grad).sqrt() < GRADIENT_TOLERANCE {
            return Ok(true);
        }

        let mut dir = self.direction();
        let mut slope = dot(&self.grad, &dir);
        if slope >= 0.0 {
            self.s.clear();
            self.y.clear();
            dir = self.grad.iter().map(|g| -g).collect();
            slope = dot(&self.grad, &dir);
        }
        let mut step = if self.s.is_empty() {
            1.0 / dot(&dir, &dir).sqrt().max(1.0)
        } else {
            1.0
        };

        let mut new_params = vec![0.0; params.len()];
        let mut new_grad = vec![0.0; params.len()];
        let mut accepted = None;
        for _ in 0..MAX_LINE_SEARCH {
            for ((np, p), d) in new_params.iter_mut().zip(params.iter()).zip(&dir) {
                *np = p + step * d;
            }
            let new_value = self.objective.evaluate(&new_params, &mut new_grad)?;
            if new_value.is_finite() && new_value <= value + ARMIJO * step * slope {
                accepted = Some(new_value);
                break;
            }
            step *= 0.5;
        }
        let new_value = match accepted {
            Some(v) => v,
            None => {
                log::debug!("line search made no progress");
                return Ok(true);
            }
        };

        let s: Vec<f64> = new_params.iter().zip(params.iter()).map(|(a, b)| a - b).collect();
        let y: Vec<f64> = new_grad.iter().zip(&self.grad).map(|(a, b)| a - b).collect();
        if dot(&s, &y) > 1e-10 {
            if self.s.len() == self.history {
                self.s.pop_front();
                self.y.pop_front();
            }
            self.s.push_back(s);
            self.y.push_back(y);
        }
        params.copy_from_slice(&new_params);
        self.grad = new_grad;
        self.value = Some(new_value);

        Ok(relative_change(value, new_value) < self.tolerance
            || dot(&self.grad, &self.grad).sqrt() < GRADIENT_TOLERANCE)
    }

    fn value(&self) -> Option<f64> {
        self.value
    }
}

/// Per-sequence gradient ascent with a decaying learning rate. One step is one epoch.
pub struct StochasticGradient<'a> {
    layout: Layout,
    seqs: &'a [LabeledSequence],
    variance: f64,
    tolerance: f64,
    initial_rate: f64,
    n_updates: usize,
    value: Option<f64>,
}

impl<'a> StochasticGradient<'a> {
    pub fn new(
        layout: Layout,
        seqs: &'a [LabeledSequence],
        variance: f64,
        tolerance: f64,
        initial_rate: f64,
    ) -> Self {
        Self {
            layout,
            seqs,
            variance,
            tolerance,
            initial_rate,
            n_updates: 0,
            value: None,
        }
    }
}

impl Optimizer for StochasticGradient<'_> {
    fn optimize_step(&mut self, params: &mut [f64]) -> Result<bool> {
        let n = self.seqs.len().max(1) as f64;
        let mut grad = vec![0.0; params.len()];
        let mut log_likelihood = 0.0;
        for seq in self.seqs {
            grad.fill(0.0);
            log_likelihood += sequence_log_likelihood(self.layout, params, seq, &mut grad);
            let rate = self.initial_rate / (1.0 + self.n_updates as f64 / n);
            for (w, g) in params.iter_mut().zip(&grad) {
                *w += rate * (g - *w / (self.variance * n));
            }
            self.n_updates += 1;
        }
        grad.fill(0.0);
        let value = penalize(params, log_likelihood, &mut grad, self.variance);
        let converged = self
            .value
            .map_or(false, |prev| relative_change(prev, value) < self.tolerance);
        self.value = Some(value);
        Ok(converged)
    }

    fn value(&self) -> Option<f64> {
        self.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// `(x - 3)^2 + 2 (y + 1)^2`
    struct Quadratic;

    impl Objective for Quadratic {
        fn dimension(&self) -> usize {
            2
        }

        fn evaluate(&mut self, params: &[f64], grad: &mut [f64]) -> Result<f64> {
            grad[0] = 2.0 * (params[0] - 3.0);
            grad[1] = 4.0 * (params[1] + 1.0);
            Ok((params[0] - 3.0).powi(2) + 2.0 * (params[1] + 1.0).powi(2))
        }
    }

    #[test]
    fn test_lbfgs_quadratic() {
        let mut optimizer = Lbfgs::new(Quadratic, 5, 1e-12);
        let mut params = vec![0.0, 0.0];
        let mut converged = false;
        for _ in 0..100 {
            if optimizer.optimize_step(&mut params).unwrap() {
                converged = true;
                break;
            }
        }

        assert!(converged);
        assert!((params[0] - 3.0).abs() < 1e-3);
        assert!((params[1] + 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_lbfgs_decreases_value() {
        let mut optimizer = Lbfgs::new(Quadratic, 5, 0.0);
        let mut params = vec![10.0, 10.0];
        optimizer.optimize_step(&mut params).unwrap();
        let first = optimizer.value().unwrap();
        optimizer.optimize_step(&mut params).unwrap();

        assert!(optimizer.value().unwrap() <= first);
        assert!(first < 49.0 + 2.0 * 121.0);
    }

    #[test]
    fn test_stochastic_gradient_improves_likelihood() {
        let layout = Layout::new(2, 2);
        let seqs = vec![
            LabeledSequence {
                xs: vec![vec![(0, 1.0), (1, 1.0)], vec![(0, 1.0)]],
                ys: vec![1, 0],
            };
            4
        ];
        let mut optimizer = StochasticGradient::new(layout, &seqs, 10.0, 1e-4, 0.1);
        let mut params = vec![0.0; layout.len()];
        assert!(!optimizer.optimize_step(&mut params).unwrap());
        let first = optimizer.value().unwrap();
        for _ in 0..20 {
            optimizer.optimize_step(&mut params).unwrap();
        }

        assert!(optimizer.value().unwrap() < first);
    }
}
