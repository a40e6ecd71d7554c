use bincode::{Decode, Encode};

use crate::errors::{Result, SparseTcError};
use crate::sparse::SparseRecord;

/// Parameter layout: state weights, then transition weights, then start weights.
#[derive(Clone, Copy, Debug, Decode, Encode, PartialEq, Eq)]
pub struct Layout {
    pub n_features: usize,
    pub n_labels: usize,
}

impl Layout {
    pub const fn new(n_features: usize, n_labels: usize) -> Self {
        Self {
            n_features,
            n_labels,
        }
    }

    #[inline(always)]
    pub const fn state(&self, feature: usize, label: usize) -> usize {
        feature * self.n_labels + label
    }

    #[inline(always)]
    pub const fn transition(&self, from: usize, to: usize) -> usize {
        self.n_features * self.n_labels + from * self.n_labels + to
    }

    #[inline(always)]
    pub const fn start(&self, label: usize) -> usize {
        self.n_features * self.n_labels + self.n_labels * self.n_labels + label
    }

    pub const fn len(&self) -> usize {
        self.n_features * self.n_labels + self.n_labels * self.n_labels + self.n_labels
    }

    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Per-position label scores of a sequence, start weights included.
    ///
    /// Feature indices outside the layout are ignored.
    pub fn emissions(&self, params: &[f64], xs: &[Vec<(usize, f64)>]) -> Vec<Vec<f64>> {
        xs.iter()
            .enumerate()
            .map(|(t, x)| {
                (0..self.n_labels)
                    .map(|y| {
                        let mut score = if t == 0 { params[self.start(y)] } else { 0.0 };
                        for &(f, v) in x {
                            if f < self.n_features {
                                score += params[self.state(f, y)] * v;
                            }
                        }
                        score
                    })
                    .collect()
            })
            .collect()
    }
}

/// Converts the entries of a record to 0-based feature indices.
pub(crate) fn feature_indices(record: &SparseRecord) -> Vec<(usize, f64)> {
    record
        .entries
        .iter()
        .filter_map(|&(fid, v)| {
            usize::try_from(fid)
                .ok()
                .and_then(|fid| fid.checked_sub(1))
                .map(|f| (f, v))
        })
        .collect()
}

/// Linear-chain CRF.
#[derive(Clone, Debug, Decode, Encode, PartialEq)]
pub struct CrfModel {
    labels: Vec<String>,
    layout: Layout,
    params: Vec<f64>,
}

impl CrfModel {
    pub(crate) fn new(labels: Vec<String>, layout: Layout, params: Vec<f64>) -> Result<Self> {
        if labels.len() != layout.n_labels || params.len() != layout.len() {
            return Err(SparseTcError::invalid_model(format!(
                "{} labels and {} parameters do not fit {} features",
                labels.len(),
                params.len(),
                layout.n_features,
            )));
        }
        Ok(Self {
            labels,
            layout,
            params,
        })
    }

    /// Outcome codes the model can emit.
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub const fn layout(&self) -> Layout {
        self.layout
    }

    pub fn params(&self) -> &[f64] {
        &self.params
    }

    /// Returns the most likely label index of every position.
    pub fn viterbi(&self, xs: &[Vec<(usize, f64)>]) -> Vec<usize> {
        let n_labels = self.layout.n_labels;
        if xs.is_empty() || n_labels == 0 {
            return vec![];
        }
        let emissions = self.layout.emissions(&self.params, xs);
        let mut scores = emissions[0].clone();
        let mut backptrs: Vec<Vec<usize>> = Vec::with_capacity(xs.len());
        for emission in &emissions[1..] {
            let mut next = vec![f64::NEG_INFINITY; n_labels];
            let mut ptrs = vec![0; n_labels];
            for (y, (next_y, ptr)) in next.iter_mut().zip(&mut ptrs).enumerate() {
                for (prev, &score) in scores.iter().enumerate() {
                    let s = score + self.params[self.layout.transition(prev, y)];
                    if s > *next_y {
                        *next_y = s;
                        *ptr = prev;
                    }
                }
                *next_y += emission[y];
            }
            scores = next;
            backptrs.push(ptrs);
        }
        let mut best = 0;
        for (y, &score) in scores.iter().enumerate() {
            if score > scores[best] {
                best = y;
            }
        }
        let mut path = vec![best];
        for ptrs in backptrs.iter().rev() {
            best = ptrs[best];
            path.push(best);
        }
        path.reverse();
        path
    }

    /// Tags one sequence, returning one outcome code per record.
    pub fn predict(&self, records: &[SparseRecord]) -> Vec<String> {
        let xs: Vec<_> = records.iter().map(feature_indices).collect();
        self.viterbi(&xs)
            .into_iter()
            .map(|y| self.labels[y].clone())
            .collect()
    }

    /// Tags every sequence of a test set.
    ///
    /// # Errors
    ///
    /// [`SparseTcError::Alignment`] is returned if a predicted sequence differs in length from
    /// its input.
    pub fn predict_aligned(&self, groups: &[Vec<SparseRecord>]) -> Result<Vec<Vec<String>>> {
        groups
            .iter()
            .map(|group| {
                let predicted = self.predict(group);
                if predicted.len() == group.len() {
                    Ok(predicted)
                } else {
                    Err(SparseTcError::count_mismatch(
                        "predicted sequence length",
                        group.len(),
                        predicted.len(),
                    ))
                }
            })
            .collect()
    }
}
