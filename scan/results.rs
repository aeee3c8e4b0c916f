//! Per-variable best information gain at every order.
//!
//! Each worker keeps its own `BestResults` across all passes; after the last pass the
//! tables are folded into the first one. Within a table, and across the fold, an entry
//! is replaced only by a strictly larger gain, so the first combination to reach a
//! given gain keeps its place.

use crate::types::{MAX_ORDER, Order};

/// The combination that achieved a variable's best gain at one order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BestHit {
    pub purity: f64,
    pub gain: f64,
    members: [usize; MAX_ORDER],
    len: usize,
}

impl BestHit {
    pub fn new(tuple: &[usize], purity: f64, gain: f64) -> Self {
        let mut members = [0; MAX_ORDER];
        members[..tuple.len()].copy_from_slice(tuple);
        Self {
            purity,
            gain,
            members,
            len: tuple.len(),
        }
    }

    /// Every variable of the combination, in increasing index order.
    pub fn members(&self) -> &[usize] {
        &self.members[..self.len]
    }

    /// The other members of the combination, as seen from `variable`.
    pub fn partners(&self, variable: usize) -> impl Iterator<Item = usize> + '_ {
        self.members().iter().copied().filter(move |&m| m != variable)
    }
}

/// The best hits of one variable, one slot per order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VariableBest {
    hits: [Option<BestHit>; MAX_ORDER],
}

impl VariableBest {
    pub fn hit(&self, order: Order) -> Option<&BestHit> {
        self.hits[order.slot()].as_ref()
    }

    /// Keeps `candidate` if the slot is empty or it strictly improves the gain.
    fn offer(&mut self, order: Order, candidate: BestHit) -> bool {
        let slot = &mut self.hits[order.slot()];
        match slot {
            Some(current) if candidate.gain <= current.gain => false,
            _ => {
                *slot = Some(candidate);
                true
            }
        }
    }
}

/// A best-hit table covering every variable of the dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct BestResults {
    variables: Vec<VariableBest>,
}

impl BestResults {
    pub fn new(num_variables: usize) -> Self {
        Self {
            variables: vec![VariableBest::default(); num_variables],
        }
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    pub fn get(&self, variable: usize) -> &VariableBest {
        &self.variables[variable]
    }

    pub fn iter(&self) -> impl Iterator<Item = &VariableBest> {
        self.variables.iter()
    }

    /// Offers one scored combination to every one of its members.
    #[inline]
    pub fn observe(&mut self, order: Order, tuple: &[usize], purity: f64, gain: f64) {
        debug_assert_eq!(tuple.len(), order.level());
        let hit = BestHit::new(tuple, purity, gain);
        for &v in tuple {
            self.variables[v].offer(order, hit);
        }
    }

    /// Folds another worker's table into this one, entry by entry.
    pub fn absorb(&mut self, other: &BestResults) {
        debug_assert_eq!(self.len(), other.len());
        for (mine, theirs) in self.variables.iter_mut().zip(&other.variables) {
            for order in Order::ALL {
                if let Some(hit) = theirs.hit(order) {
                    mine.offer(order, *hit);
                }
            }
        }
    }

    /// Folds every table into the first one, in worker order.
    pub fn merge_all(tables: impl IntoIterator<Item = BestResults>) -> Option<BestResults> {
        let mut tables = tables.into_iter();
        let mut merged = tables.next()?;
        for table in tables {
            merged.absorb(&table);
        }
        Some(merged)
    }
}
