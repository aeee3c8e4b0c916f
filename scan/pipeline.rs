// ========================================================================================
//
//                       The scheduler: one parallel pass per order
//
// ========================================================================================
//
// Each requested order gets one pass over the whole search space. A pass builds a fresh
// pool of exactly `threads` workers, deals the outer indices out round-robin, and joins
// every worker before returning. The purity table a pass saves is handed to the next
// pass as its read-only information-gain baseline and dropped once that pass is done.
// Best-hit tables are the only state that lives across passes; they are folded into
// the first worker's table after the last pass.

use crate::combinations::{PurityTable, tuple_count};
use crate::config::ScanPlan;
use crate::enumerate::{OrderSinks, OuterRow, PassContext, WorkerTask, run_worker};
use crate::error::{Result, ScanError};
use crate::genotype::GenotypeStore;
use crate::purity::Baseline;
use crate::results::BestResults;
use crate::types::{MetricKind, Order};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use log::{info, warn};
use rayon::prelude::*;
use std::io::{IsTerminal, Write};
use std::time::{Duration, Instant};

/// Opens and closes the per-thread output streams of every pass.
pub trait SinkFactory: Sync {
    type Writer: Write + Send;

    fn open(&self, metric: MetricKind, order: Order, worker: usize) -> Result<Self::Writer>;

    fn finish(
        &self,
        metric: MetricKind,
        order: Order,
        worker: usize,
        writer: Self::Writer,
    ) -> Result<()>;

    /// Called once every stream of a pass has been finished, with the metrics whose
    /// rows the pass wrote.
    fn pass_finished(&self, _order: Order, _reported: &[MetricKind]) -> Result<()> {
        Ok(())
    }

    /// Called instead of `pass_finished` when a pass fails after its streams were
    /// opened. Whatever the pass wrote should be removed.
    fn pass_aborted(&self, _order: Order, _reported: &[MetricKind]) -> Result<()> {
        Ok(())
    }
}

fn create_progress_bar(len: u64, message: &str) -> ProgressBar {
    let draw_target = if std::io::stderr().is_terminal() {
        ProgressDrawTarget::stderr_with_hz(20)
    } else {
        ProgressDrawTarget::hidden()
    };

    let pb = ProgressBar::with_draw_target(Some(len), draw_target);
    if let Ok(style) = ProgressStyle::with_template(
        "\n> [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
    ) {
        pb.set_style(style.progress_chars("█▉▊▋▌▍▎▏  "));
    }
    pb.set_message(message.to_string());

    pb
}

/// Counters of one finished pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PassSummary {
    pub order: Order,
    pub tuples: u64,
    pub rows: u64,
    pub elapsed: Duration,
}

/// A finished pass and the purity table it saved, if any.
#[derive(Debug)]
pub struct PassOutcome {
    pub summary: PassSummary,
    pub saved: Option<PurityTable>,
}

/// The result of a complete search.
#[derive(Debug)]
pub struct SearchOutcome {
    pub passes: Vec<PassSummary>,
    /// The merged best-hit table, present in best-IG mode.
    pub best: Option<BestResults>,
}

/// Runs the passes of a resolved plan over one packed dataset.
pub struct Search<'a> {
    store: &'a GenotypeStore,
    plan: &'a ScanPlan,
}

impl<'a> Search<'a> {
    pub fn new(store: &'a GenotypeStore, plan: &'a ScanPlan) -> Self {
        Self { store, plan }
    }

    /// Runs every requested pass in increasing order.
    pub fn run<S: SinkFactory>(&self, sinks: &S) -> Result<SearchOutcome> {
        let threads = self.plan.threads();
        let mut best: Vec<BestResults> = if self.plan.best_ig() {
            (0..threads)
                .map(|_| BestResults::new(self.store.num_variables()))
                .collect()
        } else {
            Vec::new()
        };

        let mut lower: Option<PurityTable> = None;
        let mut passes = Vec::new();
        for order in self.plan.passes() {
            let PassOutcome { summary, saved } =
                self.run_pass(order, lower.as_ref(), &mut best, sinks)?;
            // The previous baseline is no longer needed by anything.
            lower = saved;
            passes.push(summary);
        }
        drop(lower);

        if !best.is_empty() {
            info!("Merging the best-hit tables of {} workers", best.len());
        }
        Ok(SearchOutcome {
            passes,
            best: BestResults::merge_all(best),
        })
    }

    /// Runs the pass of one order.
    ///
    /// `lower` must be the saved purity table of the order below when this pass computes
    /// information gain above order 1. `best` holds one table per worker, or is empty when
    /// best hits are not tracked.
    pub fn run_pass<S: SinkFactory>(
        &self,
        order: Order,
        lower: Option<&PurityTable>,
        best: &mut [BestResults],
        sinks: &S,
    ) -> Result<PassOutcome> {
        let store = self.store;
        let plan = *self.plan.order(order);
        let threads = self.plan.threads();
        let n = store.num_variables();

        if order > store.max_order() {
            return Err(ScanError::config(format!(
                "the genotype store was packed for up to {}, not {order}",
                store.max_order()
            )));
        }
        if !best.is_empty() && best.len() != threads {
            return Err(ScanError::config(format!(
                "{} best-hit tables were supplied for {threads} workers",
                best.len()
            )));
        }
        if n < order.level() {
            warn!("Only {n} variables are available, so the {order} pass has no combinations");
        }

        let baseline = if plan.compute_gain {
            Some(match (order.lower(), lower) {
                (None, _) => Baseline::Dataset(store.set_purity()),
                (Some(below), Some(table)) if table.order() == below => Baseline::Table(table),
                (Some(below), _) => {
                    return Err(ScanError::MissingBaseline {
                        order,
                        lower: below,
                    });
                }
            })
        } else {
            None
        };

        let mut saved = if plan.save_purity {
            Some(PurityTable::allocate(order, n)?)
        } else {
            None
        };

        // Worker t owns every outer index i with i % threads == t.
        let mut partitions: Vec<Vec<OuterRow<'_>>> = (0..threads).map(|_| Vec::new()).collect();
        match saved.as_mut() {
            Some(table) => {
                for (outer, block) in table.rows_mut().into_iter().enumerate() {
                    partitions[outer % threads].push(OuterRow {
                        outer,
                        saved: Some(block),
                    });
                }
            }
            None => {
                for outer in 0..n {
                    partitions[outer % threads].push(OuterRow { outer, saved: None });
                }
            }
        }

        let reported: Vec<MetricKind> = MetricKind::ALL
            .into_iter()
            .filter(|&m| plan.threshold(m).is_some())
            .collect();
        let started = Instant::now();
        let counted = self.execute(order, &reported, partitions, baseline, best, sinks);
        let (tuples, rows) = match counted {
            Ok(counts) => counts,
            Err(e) => {
                if let Err(cleanup) = sinks.pass_aborted(order, &reported) {
                    warn!("Could not remove the partial output of the {order} pass: {cleanup}");
                }
                return Err(e);
            }
        };

        let elapsed = started.elapsed();
        info!("Processing {order} combinations took {elapsed:.2?}: {tuples} scored, {rows} rows reported");
        Ok(PassOutcome {
            summary: PassSummary {
                order,
                tuples,
                rows,
                elapsed,
            },
            saved,
        })
    }

    /// Opens the streams of one pass, runs its workers and finishes the streams.
    /// Returns the number of combinations scored and of rows reported.
    fn execute<S: SinkFactory>(
        &self,
        order: Order,
        reported: &[MetricKind],
        partitions: Vec<Vec<OuterRow<'_>>>,
        baseline: Option<Baseline<'_>>,
        best: &mut [BestResults],
        sinks: &S,
    ) -> Result<(u64, u64)> {
        let store = self.store;
        let plan = *self.plan.order(order);
        let threads = self.plan.threads();
        let n = store.num_variables();

        let mut best_tables = best.iter_mut();
        let mut tasks = Vec::with_capacity(threads);
        for (worker, rows) in partitions.into_iter().enumerate() {
            let open = |metric: MetricKind| -> Result<Option<S::Writer>> {
                match plan.threshold(metric) {
                    Some(_) => sinks.open(metric, order, worker).map(Some),
                    None => Ok(None),
                }
            };
            tasks.push(WorkerTask {
                worker,
                rows,
                best: if plan.compute_gain {
                    best_tables.next()
                } else {
                    None
                },
                sinks: OrderSinks {
                    purity: open(MetricKind::Purity)?,
                    gain: open(MetricKind::InformationGain)?,
                },
            });
        }

        info!(
            "Processing {order} combinations: {} in total on {threads} threads",
            tuple_count(n, order).map_or_else(|| "too many to count".to_string(), |c| c.to_string())
        );
        let progress = create_progress_bar(n as u64, &format!("{order} pass"));
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(move |i| format!("episcan-{}-{i}", order.level()))
            .build()?;
        let ctx = PassContext {
            store,
            order,
            plan,
            baseline,
            progress: &progress,
        };
        let reports = pool.install(|| {
            tasks
                .into_par_iter()
                .map(|task| run_worker(&ctx, task))
                .collect::<Result<Vec<_>>>()
        });
        progress.finish_and_clear();

        let mut tuples = 0;
        let mut rows = 0;
        for report in reports? {
            tuples += report.tuples;
            rows += report.rows;
            let OrderSinks { purity, gain } = report.sinks;
            if let Some(writer) = purity {
                sinks.finish(MetricKind::Purity, order, report.worker, writer)?;
            }
            if let Some(writer) = gain {
                sinks.finish(MetricKind::InformationGain, order, report.worker, writer)?;
            }
        }
        debug_assert_eq!(Some(tuples as usize), tuple_count(n, order));
        sinks.pass_finished(order, reported)?;
        Ok((tuples, rows))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MetricRequest, ScanRequest};
    use crate::genotype::GenotypeMatrix;
    use crate::types::SampleClass::{Case, Control};

    struct NoSinks;

    impl SinkFactory for NoSinks {
        type Writer = std::io::Sink;

        fn open(&self, _: MetricKind, _: Order, _: usize) -> Result<Self::Writer> {
            Ok(std::io::sink())
        }

        fn finish(&self, _: MetricKind, _: Order, _: usize, _: Self::Writer) -> Result<()> {
            Ok(())
        }
    }

    fn store(max_order: Order) -> GenotypeStore {
        let matrix = GenotypeMatrix::from_rows(
            vec![Case, Control, Case, Control, Control],
            vec![
                ("a".into(), vec![0, 1, 0, 1, 2]),
                ("b".into(), vec![0, 0, 1, 1, 2]),
                ("c".into(), vec![2, 2, 1, 0, 0]),
            ],
        )
        .unwrap();
        GenotypeStore::build(&matrix, max_order)
    }

    fn plan(edit: impl FnOnce(&mut ScanRequest)) -> ScanPlan {
        let mut request = ScanRequest {
            threads: 2,
            ..ScanRequest::default()
        };
        edit(&mut request);
        ScanPlan::resolve(&request).unwrap()
    }

    #[test]
    fn gain_above_singles_requires_the_saved_baseline() {
        let store = store(Order::Pair);
        let plan = plan(|r| r.pairs.gain = Some(MetricRequest::default()));
        let search = Search::new(&store, &plan);
        let err = search.run_pass(Order::Pair, None, &mut [], &NoSinks).unwrap_err();
        assert!(matches!(
            err,
            ScanError::MissingBaseline {
                order: Order::Pair,
                lower: Order::Single
            }
        ));
    }

    #[test]
    fn passes_chain_their_saved_tables() {
        let store = store(Order::Triplet);
        let plan = plan(|r| r.triplets.gain = Some(MetricRequest::default()));
        let outcome = Search::new(&store, &plan).run(&NoSinks).unwrap();
        let orders: Vec<Order> = outcome.passes.iter().map(|p| p.order).collect();
        assert_eq!(orders, vec![Order::Pair, Order::Triplet]);
        assert_eq!(outcome.passes[0].tuples, 3);
        assert_eq!(outcome.passes[1].tuples, 1);
        assert!(outcome.best.is_none());
    }

    #[test]
    fn store_must_cover_the_requested_order() {
        let store = store(Order::Single);
        let plan = plan(|r| r.pairs.purity = Some(MetricRequest::default()));
        let err = Search::new(&store, &plan).run(&NoSinks).unwrap_err();
        assert!(matches!(err, ScanError::Config(_)));
    }
}
