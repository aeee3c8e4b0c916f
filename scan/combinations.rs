// ========================================================================================
//
//                 Strictly increasing tuples: ranking and saved purity tables
//
// ========================================================================================
//
// A purity table holds one score per strictly increasing `k`-tuple over `n` variables,
// flattened in lexicographic order. Every tuple sharing the same first index occupies
// one contiguous block, which is what lets workers that own disjoint outer indices
// fill the table in parallel without any synchronisation.

use crate::error::{Result, ScanError};
use crate::types::{MAX_ORDER, Order};

/// `C(n, k)`, or `None` if it does not fit a `usize`.
pub fn binomial(n: usize, k: usize) -> Option<usize> {
    if k > n {
        return Some(0);
    }
    let k = k.min(n - k);
    let mut acc: u128 = 1;
    for i in 0..k {
        // Exact at every step: the product of i+1 consecutive integers is divisible by (i+1)!.
        acc = acc.checked_mul((n - i) as u128)? / (i + 1) as u128;
    }
    usize::try_from(acc).ok()
}

/// The number of order-`order` combinations over `num_variables` variables.
pub fn tuple_count(num_variables: usize, order: Order) -> Option<usize> {
    binomial(num_variables, order.level())
}

/// Maps strictly increasing tuples of one width to their lexicographic rank.
#[derive(Debug, Clone)]
pub struct TupleRanker {
    num_variables: usize,
    width: usize,
    total: usize,
    // choose[m][r] = C(m, r) for m < num_variables and r <= width.
    choose: Vec<[usize; MAX_ORDER + 1]>,
}

impl TupleRanker {
    pub fn new(num_variables: usize, order: Order) -> Option<Self> {
        let width = order.level();
        let total = binomial(num_variables, width)?;
        let mut choose = Vec::with_capacity(num_variables);
        for m in 0..num_variables {
            let mut row = [0usize; MAX_ORDER + 1];
            for (r, entry) in row.iter_mut().enumerate().take(width + 1) {
                *entry = binomial(m, r)?;
            }
            choose.push(row);
        }
        Some(Self {
            num_variables,
            width,
            total,
            choose,
        })
    }

    /// The number of tuples this ranker covers.
    pub fn total(&self) -> usize {
        self.total
    }

    /// The lexicographic position of `tuple` among all increasing tuples of its width.
    ///
    /// `tuple` must be strictly increasing, of the ranker's width, and in range.
    #[inline(always)]
    pub fn rank(&self, tuple: &[usize]) -> usize {
        debug_assert_eq!(tuple.len(), self.width);
        debug_assert!(tuple.windows(2).all(|w| w[0] < w[1]));
        // The tuples that come after `tuple` are counted position by position: at
        // position t, any larger value followed by any completion sorts later.
        let mut after = 0;
        for (t, &c) in tuple.iter().enumerate() {
            after += self.choose[self.num_variables - 1 - c][self.width - t];
        }
        self.total - 1 - after
    }

    /// The number of tuples whose first member is `outer`.
    #[inline]
    pub fn block_len(&self, outer: usize) -> usize {
        if outer >= self.num_variables {
            return 0;
        }
        self.choose[self.num_variables - 1 - outer][self.width - 1]
    }
}

/// The purity of every combination of one order, kept as the information-gain
/// baseline of the next order.
#[derive(Debug, Clone)]
pub struct PurityTable {
    order: Order,
    ranker: TupleRanker,
    values: Vec<f64>,
}

impl PurityTable {
    /// Allocates a zeroed table, failing cleanly if the memory is not available.
    pub fn allocate(order: Order, num_variables: usize) -> Result<Self> {
        let too_large = ScanError::Allocation {
            order,
            bytes: usize::MAX,
        };
        let Some(ranker) = TupleRanker::new(num_variables, order) else {
            return Err(too_large);
        };
        let total = ranker.total();
        let Some(bytes) = total.checked_mul(std::mem::size_of::<f64>()) else {
            return Err(too_large);
        };
        let mut values = Vec::new();
        values
            .try_reserve_exact(total)
            .map_err(|_| ScanError::Allocation { order, bytes })?;
        values.resize(total, 0.0);
        log::debug!("Allocated the {order} purity table: {total} entries, {bytes} bytes");
        Ok(Self {
            order,
            ranker,
            values,
        })
    }

    pub fn order(&self) -> Order {
        self.order
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.values
    }

    /// The saved purity of a strictly increasing tuple of this table's order.
    #[inline(always)]
    pub fn get(&self, tuple: &[usize]) -> f64 {
        self.values[self.ranker.rank(tuple)]
    }

    /// Splits the table into one mutable block per outer index, in index order.
    ///
    /// Block `i` holds, in lexicographic order, every tuple starting with `i`.
    pub fn rows_mut(&mut self) -> Vec<&mut [f64]> {
        let n = self.ranker.num_variables;
        let mut blocks = Vec::with_capacity(n);
        let mut rest = self.values.as_mut_slice();
        for outer in 0..n {
            let (block, tail) = rest.split_at_mut(self.ranker.block_len(outer));
            blocks.push(block);
            rest = tail;
        }
        debug_assert!(rest.is_empty());
        blocks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use itertools::Itertools;

    #[test]
    fn binomials_match_small_values() {
        assert_eq!(binomial(5, 0), Some(1));
        assert_eq!(binomial(5, 2), Some(10));
        assert_eq!(binomial(5, 5), Some(1));
        assert_eq!(binomial(3, 4), Some(0));
        assert_eq!(binomial(100_000, 4), Some(4_166_416_671_249_975_000));
    }

    #[test]
    fn rank_is_the_lexicographic_position() {
        for order in Order::ALL {
            for n in order.level()..9 {
                let ranker = TupleRanker::new(n, order).unwrap();
                let mut count = 0;
                for (position, tuple) in (0..n).combinations(order.level()).enumerate() {
                    assert_eq!(ranker.rank(&tuple), position, "{order} over {n}: {tuple:?}");
                    count += 1;
                }
                assert_eq!(ranker.total(), count);
            }
        }
    }

    #[test]
    fn row_blocks_cover_the_table_in_outer_order() {
        let n = 7;
        let mut table = PurityTable::allocate(Order::Triplet, n).unwrap();
        let lens: Vec<usize> = table.rows_mut().iter().map(|b| b.len()).collect();
        assert_eq!(lens, vec![15, 10, 6, 3, 1, 0, 0]);
        assert_eq!(lens.iter().sum::<usize>(), table.len());

        // Write each tuple's value through its block and read it back by rank.
        let mut expected = Vec::new();
        {
            let mut blocks = table.rows_mut();
            for (outer, block) in blocks.iter_mut().enumerate() {
                let tuples: Vec<Vec<usize>> = (outer + 1..n)
                    .combinations(2)
                    .map(|rest| std::iter::once(outer).chain(rest).collect())
                    .collect();
                assert_eq!(tuples.len(), block.len());
                for (slot, tuple) in block.iter_mut().zip(tuples) {
                    let value = (tuple[0] * 100 + tuple[1] * 10 + tuple[2]) as f64;
                    *slot = value;
                    expected.push((tuple, value));
                }
            }
        }
        for (tuple, value) in expected {
            assert_eq!(table.get(&tuple), value);
        }
    }

    #[test]
    fn singles_table_is_indexed_by_variable() {
        let mut table = PurityTable::allocate(Order::Single, 4).unwrap();
        for (v, block) in table.rows_mut().into_iter().enumerate() {
            assert_eq!(block.len(), 1);
            block[0] = v as f64 / 10.0;
        }
        assert_eq!(table.as_slice(), &[0.0, 0.1, 0.2, 0.3]);
        assert_eq!(table.get(&[2]), 0.2);
    }

    #[test]
    fn oversized_tables_fail_with_an_allocation_error() {
        let err = PurityTable::allocate(Order::Quadlet, usize::MAX / 2).unwrap_err();
        assert!(matches!(err, ScanError::Allocation { order: Order::Quadlet, .. }));
    }
}
