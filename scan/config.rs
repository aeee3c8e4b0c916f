// ========================================================================================
//
//                      Scan configuration: what to compute, keep and report
//
// ========================================================================================
//
// A `ScanRequest` is what the user asked for, as read from a TOML file and/or the
// command line. `ScanPlan::resolve` turns it into the per-order flags the passes run
// on, applying the implications between them: gain needs the purity of the same order
// and the saved purity of the order below, and best-IG mode needs everything while
// printing nothing.

use crate::error::{Result, ScanError};
use crate::types::{MAX_ORDER, MetricKind, Order};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// A request for one metric of one order. A metric without a threshold is computed
/// but never reported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetricRequest {
    #[serde(default)]
    pub threshold: Option<f64>,
}

impl MetricRequest {
    pub fn reported(threshold: f64) -> Self {
        Self {
            threshold: Some(threshold),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OrderRequest {
    #[serde(default)]
    pub purity: Option<MetricRequest>,
    #[serde(default)]
    pub gain: Option<MetricRequest>,
}

impl OrderRequest {
    pub fn metric_mut(&mut self, metric: MetricKind) -> &mut Option<MetricRequest> {
        match metric {
            MetricKind::Purity => &mut self.purity,
            MetricKind::InformationGain => &mut self.gain,
        }
    }
}

/// Everything the user can ask of a scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScanRequest {
    pub threads: usize,
    pub sort: bool,
    pub best_ig: bool,
    pub singles: OrderRequest,
    pub pairs: OrderRequest,
    pub triplets: OrderRequest,
    pub quadlets: OrderRequest,
}

impl Default for ScanRequest {
    fn default() -> Self {
        Self {
            threads: num_cpus::get(),
            sort: false,
            best_ig: false,
            singles: OrderRequest::default(),
            pairs: OrderRequest::default(),
            triplets: OrderRequest::default(),
            quadlets: OrderRequest::default(),
        }
    }
}

impl ScanRequest {
    pub fn from_toml_str(text: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Renders the request in the format `from_toml_str` reads.
    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string(self)?)
    }

    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| ScanError::io(path, e))?;
        Self::from_toml_str(&text).map_err(|source| ScanError::ConfigFile {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn order(&self, order: Order) -> &OrderRequest {
        match order {
            Order::Single => &self.singles,
            Order::Pair => &self.pairs,
            Order::Triplet => &self.triplets,
            Order::Quadlet => &self.quadlets,
        }
    }

    pub fn order_mut(&mut self, order: Order) -> &mut OrderRequest {
        match order {
            Order::Single => &mut self.singles,
            Order::Pair => &mut self.pairs,
            Order::Triplet => &mut self.triplets,
            Order::Quadlet => &mut self.quadlets,
        }
    }
}

/// The resolved flags of one order's pass.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct OrderPlan {
    pub compute_purity: bool,
    pub report_purity: Option<f64>,
    pub save_purity: bool,
    pub compute_gain: bool,
    pub report_gain: Option<f64>,
}

impl OrderPlan {
    /// The reporting threshold of `metric`, if rows of it are written at all.
    pub fn threshold(&self, metric: MetricKind) -> Option<f64> {
        match metric {
            MetricKind::Purity => self.report_purity,
            MetricKind::InformationGain => self.report_gain,
        }
    }
}

/// A validated, fully resolved scan configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanPlan {
    orders: [OrderPlan; MAX_ORDER],
    threads: usize,
    sort: bool,
    best_ig: bool,
    max_order: Order,
}

impl ScanPlan {
    pub fn resolve(request: &ScanRequest) -> Result<Self> {
        if request.threads == 0 {
            return Err(ScanError::config("the thread count must be at least 1"));
        }

        let mut orders = [OrderPlan::default(); MAX_ORDER];
        for order in Order::ALL {
            let wanted = request.order(order);
            if let Some(purity) = wanted.purity {
                check_threshold(order, MetricKind::Purity, purity)?;
                let plan = &mut orders[order.slot()];
                plan.compute_purity = true;
                plan.report_purity = purity.threshold;
            }
            if let Some(gain) = wanted.gain {
                check_threshold(order, MetricKind::InformationGain, gain)?;
                let plan = &mut orders[order.slot()];
                plan.compute_purity = true;
                plan.compute_gain = true;
                plan.report_gain = gain.threshold;
                if let Some(lower) = order.lower() {
                    let below = &mut orders[lower.slot()];
                    below.compute_purity = true;
                    below.save_purity = true;
                }
            }
        }

        if request.best_ig {
            for plan in &mut orders {
                *plan = OrderPlan {
                    compute_purity: true,
                    report_purity: None,
                    save_purity: true,
                    compute_gain: true,
                    report_gain: None,
                };
            }
        }

        // Nothing consumes the purity of the highest order.
        orders[Order::Quadlet.slot()].save_purity = false;

        let max_order = Order::ALL
            .into_iter()
            .rev()
            .find(|o| orders[o.slot()].compute_purity)
            .ok_or_else(|| ScanError::config("no purity or information gain was requested"))?;

        Ok(Self {
            orders,
            threads: request.threads,
            sort: request.sort,
            best_ig: request.best_ig,
            max_order,
        })
    }

    pub fn order(&self, order: Order) -> &OrderPlan {
        &self.orders[order.slot()]
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    pub fn sort(&self) -> bool {
        self.sort
    }

    pub fn best_ig(&self) -> bool {
        self.best_ig
    }

    /// The highest order whose purity is computed.
    pub fn max_order(&self) -> Order {
        self.max_order
    }

    /// The orders that get a pass, in increasing order.
    pub fn passes(&self) -> impl Iterator<Item = Order> + '_ {
        Order::ALL
            .into_iter()
            .filter(|o| self.orders[o.slot()].compute_purity)
    }

    /// Every (metric, order) whose rows are written, in increasing order.
    pub fn reported(&self) -> impl Iterator<Item = (MetricKind, Order)> + '_ {
        self.passes().flat_map(move |order| {
            MetricKind::ALL
                .into_iter()
                .filter(move |&m| self.order(order).threshold(m).is_some())
                .map(move |m| (m, order))
        })
    }
}

fn check_threshold(order: Order, metric: MetricKind, request: MetricRequest) -> Result<()> {
    match request.threshold {
        Some(t) if !t.is_finite() => Err(ScanError::config(format!(
            "the {metric} threshold of the {order} pass must be a finite number, got {t}"
        ))),
        _ => Ok(()),
    }
}
