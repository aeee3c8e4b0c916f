// ========================================================================================
//                             High-Level Data Contracts
// ========================================================================================

// Only types used by more than one module belong here.

use std::fmt;

/// The largest combination order the engine enumerates.
pub const MAX_ORDER: usize = 4;

/// The counter type of one contingency-table cell.
///
/// It is deliberately narrow: a full order-4 table holds 2 x 256 of these and must stay
/// resident in L1 while a worker streams through its partition. Every sample of one class
/// may land in the same cell, so the number of samples is capped at `MAX_SAMPLES`.
pub type CellCount = u16;

/// The largest number of samples a dataset may contain.
pub const MAX_SAMPLES: usize = CellCount::MAX as usize;

/// The number of variables combined together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Order {
    Single,
    Pair,
    Triplet,
    Quadlet,
}

impl Order {
    pub const ALL: [Order; MAX_ORDER] = [Order::Single, Order::Pair, Order::Triplet, Order::Quadlet];

    /// Returns the order for a combination of `level` variables (1..=4).
    pub fn from_level(level: usize) -> Option<Order> {
        match level {
            1 => Some(Order::Single),
            2 => Some(Order::Pair),
            3 => Some(Order::Triplet),
            4 => Some(Order::Quadlet),
            _ => None,
        }
    }

    /// The number of variables in a combination of this order.
    #[inline(always)]
    pub fn level(self) -> usize {
        match self {
            Order::Single => 1,
            Order::Pair => 2,
            Order::Triplet => 3,
            Order::Quadlet => 4,
        }
    }

    /// The zero-based position of this order in per-order arrays.
    #[inline(always)]
    pub fn slot(self) -> usize {
        self.level() - 1
    }

    /// The order one below this one, whose purity is the information-gain baseline.
    pub fn lower(self) -> Option<Order> {
        Order::from_level(self.level() - 1)
    }

    /// The size of the contingency table for this order: 4^level cells.
    #[inline(always)]
    pub fn cell_count(self) -> usize {
        1 << (2 * self.level())
    }

    /// The number of cells that can be reached by valid genotypes: 3^level.
    #[inline(always)]
    pub fn valid_cell_count(self) -> usize {
        3usize.pow(self.level() as u32)
    }

    /// Column headers naming the participating variables in merged output files.
    pub fn variable_headers(self) -> &'static str {
        match self {
            Order::Single => "SNP_A",
            Order::Pair => "SNP_A,SNP_B",
            Order::Triplet => "SNP_A,SNP_B,SNP_C",
            Order::Quadlet => "SNP_A,SNP_B,SNP_C,SNP_D",
        }
    }
}

impl fmt::Display for Order {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-SNP", self.level())
    }
}

/// The class a sample belongs to for the whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleClass {
    Case,
    Control,
}

/// The two scores reported per combination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MetricKind {
    Purity,
    InformationGain,
}

impl MetricKind {
    pub const ALL: [MetricKind; 2] = [MetricKind::Purity, MetricKind::InformationGain];

    /// The tag used in output file names and as the score column header.
    pub fn tag(self) -> &'static str {
        match self {
            MetricKind::Purity => "Purity",
            MetricKind::InformationGain => "IG",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_dimensions_follow_the_two_bit_encoding() {
        let cells: Vec<usize> = Order::ALL.iter().map(|o| o.cell_count()).collect();
        assert_eq!(cells, vec![4, 16, 64, 256]);
        let valid: Vec<usize> = Order::ALL.iter().map(|o| o.valid_cell_count()).collect();
        assert_eq!(valid, vec![3, 9, 27, 81]);
    }

    #[test]
    fn lower_order_chain_ends_at_singles() {
        assert_eq!(Order::Quadlet.lower(), Some(Order::Triplet));
        assert_eq!(Order::Pair.lower(), Some(Order::Single));
        assert_eq!(Order::Single.lower(), None);
        assert_eq!(Order::from_level(5), None);
        assert_eq!(Order::from_level(0), None);
    }
}
