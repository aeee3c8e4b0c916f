// ========================================================================================
//
//                    Per-worker enumeration of increasing combinations
//
// ========================================================================================
//
// A worker owns a set of outer indices and, for each of them, walks every strictly
// increasing tuple that starts there, in lexicographic order. The OR of the fixed
// members' words is carried down the recursion one level per member, so entering a
// new innermost variable costs a single OR per word plus the tally.

use crate::config::OrderPlan;
use crate::error::Result;
use crate::genotype::{GenotypeStore, Word};
use crate::io::write_score_row;
use crate::kernel::{ContingencyTable, extend_accumulator, load_accumulator};
use crate::purity::{Baseline, gini_purity};
use crate::results::BestResults;
use crate::types::{MAX_ORDER, Order, SampleClass};
use indicatif::ProgressBar;
use log::debug;
use std::io::{self, Write};

/// The private, reusable state of one worker for one order.
pub struct Scratch {
    // Level `l` holds the OR of the first `l + 1` members' words, each in its own slot.
    case_levels: Vec<Vec<Word>>,
    control_levels: Vec<Vec<Word>>,
    table: ContingencyTable,
    tuple: [usize; MAX_ORDER],
}

impl Scratch {
    pub fn new(store: &GenotypeStore, order: Order) -> Self {
        let levels = |class: SampleClass| -> Vec<Vec<Word>> {
            let words = store.words_per_variable(class);
            (1..order.level()).map(|_| vec![0; words]).collect()
        };
        Self {
            case_levels: levels(SampleClass::Case),
            control_levels: levels(SampleClass::Control),
            table: ContingencyTable::new(),
            tuple: [0; MAX_ORDER],
        }
    }

    /// Counts every order-`order` combination whose first member is `outer` and hands
    /// each one, with its contingency table, to `visit`.
    ///
    /// Combinations are visited in lexicographic order. Nothing is visited when fewer
    /// than `order - 1` variables follow `outer`.
    pub fn scan_outer<F>(
        &mut self,
        store: &GenotypeStore,
        order: Order,
        outer: usize,
        mut visit: F,
    ) -> io::Result<()>
    where
        F: FnMut(&[usize], &ContingencyTable) -> io::Result<()>,
    {
        let k = order.level();
        if outer + k > store.num_variables() {
            return Ok(());
        }
        self.tuple[0] = outer;
        if k == 1 {
            self.count(store, order, None, 0, outer);
            return visit(&self.tuple[..1], &self.table);
        }
        self.extend(store, 0, outer);
        self.descend(store, order, 1, outer + 1, &mut visit)
    }

    fn descend<F>(
        &mut self,
        store: &GenotypeStore,
        order: Order,
        depth: usize,
        start: usize,
        visit: &mut F,
    ) -> io::Result<()>
    where
        F: FnMut(&[usize], &ContingencyTable) -> io::Result<()>,
    {
        let k = order.level();
        // Leave room for the members still to come.
        let end = store.num_variables() - (k - 1 - depth);
        for idx in start..end {
            self.tuple[depth] = idx;
            if depth + 1 == k {
                self.count(store, order, Some(depth - 1), depth, idx);
                visit(&self.tuple[..k], &self.table)?;
            } else {
                self.extend(store, depth, idx);
                self.descend(store, order, depth + 1, idx + 1, visit)?;
            }
        }
        Ok(())
    }

    /// Sets level `depth` to the level below it OR-ed with `variable` in slot `depth`.
    #[inline(always)]
    fn extend(&mut self, store: &GenotypeStore, depth: usize, variable: usize) {
        for (class, levels) in [
            (SampleClass::Case, &mut self.case_levels),
            (SampleClass::Control, &mut self.control_levels),
        ] {
            let words = store.words(class, depth, variable);
            if depth == 0 {
                load_accumulator(&mut levels[0], words);
            } else {
                let (below, rest) = levels.split_at_mut(depth);
                extend_accumulator(&mut rest[0], &below[depth - 1], words);
            }
        }
    }

    #[inline(always)]
    fn count(
        &mut self,
        store: &GenotypeStore,
        order: Order,
        prefix: Option<usize>,
        slot: usize,
        variable: usize,
    ) {
        self.table.clear(order);
        let case_prefix = prefix.map(|l| self.case_levels[l].as_slice());
        self.table.tally(
            SampleClass::Case,
            case_prefix,
            store.words(SampleClass::Case, slot, variable),
        );
        let control_prefix = prefix.map(|l| self.control_levels[l].as_slice());
        self.table.tally(
            SampleClass::Control,
            control_prefix,
            store.words(SampleClass::Control, slot, variable),
        );
    }
}

/// One outer index of a worker's partition, with its block of the saved purity table
/// when the pass keeps one.
pub struct OuterRow<'a> {
    pub outer: usize,
    pub saved: Option<&'a mut [f64]>,
}

/// The per-thread output streams of one pass.
pub struct OrderSinks<W> {
    pub purity: Option<W>,
    pub gain: Option<W>,
}

/// Everything one worker owns for the duration of a pass.
pub struct WorkerTask<'a, W> {
    pub worker: usize,
    pub rows: Vec<OuterRow<'a>>,
    pub best: Option<&'a mut BestResults>,
    pub sinks: OrderSinks<W>,
}

/// The read-only state shared by every worker of a pass.
pub struct PassContext<'a> {
    pub store: &'a GenotypeStore,
    pub order: Order,
    pub plan: OrderPlan,
    /// Present exactly when the pass computes information gain.
    pub baseline: Option<Baseline<'a>>,
    pub progress: &'a ProgressBar,
}

/// What a worker hands back when its partition is done.
pub struct WorkerReport<W> {
    pub worker: usize,
    pub sinks: OrderSinks<W>,
    pub tuples: u64,
    pub rows: u64,
}

/// Scores every combination of the worker's partition.
pub fn run_worker<W: Write>(
    ctx: &PassContext<'_>,
    task: WorkerTask<'_, W>,
) -> Result<WorkerReport<W>> {
    let WorkerTask {
        worker,
        rows,
        mut best,
        mut sinks,
    } = task;
    let PassContext {
        store,
        order,
        plan,
        baseline,
        progress,
    } = *ctx;
    let names = store.names();
    let num_samples = store.num_samples();
    debug!(
        "Worker {worker} starts the {order} pass over {} outer indices",
        rows.len()
    );

    let mut scratch = Scratch::new(store, order);
    let mut tuples = 0u64;
    let mut reported = 0u64;
    for OuterRow { outer, mut saved } in rows {
        let mut cursor = 0;
        scratch.scan_outer(
            store,
            order,
            outer,
            |tuple: &[usize], table: &ContingencyTable| -> io::Result<()> {
                let purity = gini_purity(table, order, num_samples);
                tuples += 1;
                if let Some(block) = saved.as_deref_mut() {
                    block[cursor] = purity;
                    cursor += 1;
                }
                if let (Some(threshold), Some(out)) = (plan.report_purity, sinks.purity.as_mut()) {
                    if purity >= threshold {
                        write_score_row(out, purity, tuple, names)?;
                        reported += 1;
                    }
                }
                if let Some(baseline) = baseline {
                    let gain = baseline.gain(tuple, purity);
                    if let (Some(threshold), Some(out)) = (plan.report_gain, sinks.gain.as_mut()) {
                        if gain >= threshold {
                            write_score_row(out, gain, tuple, names)?;
                            reported += 1;
                        }
                    }
                    if let Some(best) = best.as_deref_mut() {
                        best.observe(order, tuple, purity, gain);
                    }
                }
                Ok(())
            },
        )?;
        if let Some(block) = saved {
            debug_assert_eq!(cursor, block.len());
        }
        progress.inc(1);
    }

    debug!("Worker {worker} finished the {order} pass: {tuples} combinations, {reported} rows");
    Ok(WorkerReport {
        worker,
        sinks,
        tuples,
        rows: reported,
    })
}
