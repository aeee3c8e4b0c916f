//! Gini-style purity and the information gain built on it.
//!
//! Purity of a combination is `sum_c (case_c^2 + control_c^2) / (N * (case_c + control_c))`
//! over the valid cells `c`, where `N` is the total number of samples. It is a weighted
//! concentration score in `[set_purity, 1]`: 1 means every observed genotype pattern is
//! seen in one class only. Information gain is the purity of a combination minus the
//! best purity of any combination obtained by dropping one of its members. It is
//! deliberately left unclamped; a negative gain means the extra variable hurts.

use crate::combinations::PurityTable;
use crate::kernel::{ContingencyTable, valid_cells_for};
use crate::types::{MAX_ORDER, Order};

/// The purity of the whole dataset before any split.
pub fn set_purity(num_cases: usize, num_controls: usize) -> f64 {
    let total = (num_cases + num_controls) as f64;
    if total == 0.0 {
        return 0.0;
    }
    let case = num_cases as f64 / total;
    let control = num_controls as f64 / total;
    case * case + control * control
}

/// The purity of the combination currently counted in `table`.
#[inline]
pub fn gini_purity(table: &ContingencyTable, order: Order, num_samples: usize) -> f64 {
    let n = num_samples as f64;
    let mut purity = 0.0;
    for &cell in valid_cells_for(order) {
        let case = table.case(cell) as f64;
        let control = table.control(cell) as f64;
        let sum = case + control;
        if sum > 0.0 {
            purity += (case * case + control * control) / (sum * n);
        }
    }
    purity
}

/// Where the information gain of a pass takes its baseline from.
#[derive(Clone, Copy)]
pub enum Baseline<'a> {
    /// Single variables are compared against the unsplit dataset.
    Dataset(f64),
    /// Higher orders are compared against the saved purity of their sub-combinations.
    Table(&'a PurityTable),
}

impl Baseline<'_> {
    /// The best purity achievable by dropping one member of `tuple`.
    #[inline]
    pub fn best_subset_purity(&self, tuple: &[usize]) -> f64 {
        match self {
            Baseline::Dataset(purity) => *purity,
            Baseline::Table(table) => {
                let mut subset = [0usize; MAX_ORDER];
                let width = tuple.len() - 1;
                let mut best = f64::NEG_INFINITY;
                for skip in 0..tuple.len() {
                    let mut filled = 0;
                    for (pos, &v) in tuple.iter().enumerate() {
                        if pos != skip {
                            subset[filled] = v;
                            filled += 1;
                        }
                    }
                    best = best.max(table.get(&subset[..width]));
                }
                best
            }
        }
    }

    /// Information gain of `tuple` given its purity.
    #[inline]
    pub fn gain(&self, tuple: &[usize], purity: f64) -> f64 {
        purity - self.best_subset_purity(tuple)
    }
}
