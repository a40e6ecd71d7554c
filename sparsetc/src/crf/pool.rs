//! Worker pool computing the log-likelihood gradient over batches of sequences.

use std::ops::Range;
use std::sync::Arc;
use std::thread::Scope;

use crossbeam_channel::{Receiver, Sender};

use super::likelihood::{batch_log_likelihood, penalize, LabeledSequence, Objective};
use super::model::Layout;
use crate::errors::{Result, SparseTcError};

type Task = (Range<usize>, Arc<Vec<f64>>);

/// Penalized negative log-likelihood computed by a fixed set of scoped worker threads.
///
/// Workers exit when the pool is dropped, so the pool must not outlive the [`Scope`] that
/// spawned them.
pub struct GradientPool {
    task_tx: Sender<Task>,
    result_rx: Receiver<(f64, Vec<f64>)>,
    batches: Vec<Range<usize>>,
    layout: Layout,
    variance: f64,
}

impl GradientPool {
    /// Spawns `n_threads` workers on `scope`.
    pub fn new<'scope, 'env>(
        scope: &'scope Scope<'scope, 'env>,
        n_threads: usize,
        layout: Layout,
        seqs: &'env [LabeledSequence],
        variance: f64,
    ) -> Self {
        let n_threads = n_threads.max(1);
        let batch_size = ((seqs.len() + n_threads - 1) / n_threads).max(1);
        let batches = (0..seqs.len())
            .step_by(batch_size)
            .map(|start| start..(start + batch_size).min(seqs.len()))
            .collect();

        let (result_tx, result_rx) = crossbeam_channel::unbounded();
        let (task_tx, task_rx) = crossbeam_channel::unbounded::<Task>();
        for _ in 0..n_threads {
            let result_tx = result_tx.clone();
            let task_rx = task_rx.clone();
            scope.spawn(move || {
                for (range, params) in task_rx {
                    let mut grad = vec![0.0; layout.len()];
                    let ll = batch_log_likelihood(layout, &params, seqs, range, &mut grad);
                    if result_tx.send((ll, grad)).is_err() {
                        break;
                    }
                }
            });
        }

        Self {
            task_tx,
            result_rx,
            batches,
            layout,
            variance,
        }
    }
}

impl Objective for GradientPool {
    fn dimension(&self) -> usize {
        self.layout.len()
    }

    fn evaluate(&mut self, params: &[f64], grad: &mut [f64]) -> Result<f64> {
        let shared = Arc::new(params.to_vec());
        for range in &self.batches {
            self.task_tx
                .send((range.clone(), Arc::clone(&shared)))
                .map_err(|_| SparseTcError::invalid_model("gradient workers stopped"))?;
        }
        grad.fill(0.0);
        let mut ll = 0.0;
        for _ in 0..self.batches.len() {
            let (batch_ll, batch_grad) = self
                .result_rx
                .recv()
                .map_err(|_| SparseTcError::invalid_model("gradient workers stopped"))?;
            ll += batch_ll;
            for (g, b) in grad.iter_mut().zip(&batch_grad) {
                *g += b;
            }
        }
        Ok(penalize(params, ll, grad, self.variance))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::crf::likelihood::LabelLikelihood;

    #[test]
    fn test_pool_matches_serial() {
        let layout = Layout::new(3, 2);
        let seqs: Vec<_> = (0..7)
            .map(|i| LabeledSequence {
                xs: vec![vec![(0, 1.0), (1 + i % 2, 1.0)], vec![(0, 1.0), (2, 0.5)]],
                ys: vec![i % 2, 1 - i % 2],
            })
            .collect();
        let params: Vec<f64> = (0..layout.len()).map(|i| (i as f64 * 0.1).cos()).collect();

        let mut serial_grad = vec![0.0; layout.len()];
        let serial = LabelLikelihood::new(layout, &seqs, 5.0)
            .evaluate(&params, &mut serial_grad)
            .unwrap();

        let mut pooled_grad = vec![0.0; layout.len()];
        let pooled = std::thread::scope(|scope| {
            let mut pool = GradientPool::new(scope, 3, layout, &seqs, 5.0);
            pool.evaluate(&params, &mut pooled_grad).unwrap()
        });

        assert!((serial - pooled).abs() < 1e-9);
        for (a, b) in serial_grad.iter().zip(&pooled_grad) {
            assert!((a - b).abs() < 1e-9);
        }
    }
}
