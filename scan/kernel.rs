// ========================================================================================
//
//                      The kernel: word-parallel contingency counting
//
// ========================================================================================
//
// This module contains the innermost loop of the search. It is 100% allocation-free:
// the accumulators and the contingency table are sized once per worker and reused for
// every combination. A combined word is the OR of one pre-shifted word per participating
// variable, and each of its eight bytes is directly the contingency-table index of one
// sample. Counting is therefore eight table increments per word, with no per-sample
// decoding and no branches.

use crate::genotype::Word;
use crate::types::{CellCount, MAX_ORDER, Order, SampleClass};

/// The number of cells in the largest (order-4) contingency table.
pub const MAX_CELLS: usize = 1 << (2 * MAX_ORDER);

/// Every cell index whose four 2-bit fields are valid genotypes, in increasing order.
///
/// Cells of order `n` are exactly the first `3^n` entries: all of them are below `4^n`,
/// and every valid index below `4^n` has its upper fields set to zero.
pub const VALID_CELLS: [u8; 81] = valid_cells();

const fn valid_cells() -> [u8; 81] {
    let mut out = [0u8; 81];
    let mut filled = 0;
    let mut cell = 0usize;
    while cell < MAX_CELLS {
        let mut field = 0;
        let mut valid = true;
        while field < MAX_ORDER {
            if (cell >> (2 * field)) & 0b11 == 0b11 {
                valid = false;
            }
            field += 1;
        }
        if valid {
            out[filled] = cell as u8;
            filled += 1;
        }
        cell += 1;
    }
    out
}

/// The valid cell indices of a given order.
#[inline(always)]
pub fn valid_cells_for(order: Order) -> &'static [u8] {
    &VALID_CELLS[..order.valid_cell_count()]
}

/// Per-cell case and control counts for one combination.
///
/// Both halves are always sized for order 4 so that a single table serves every pass;
/// only the first `4^order` cells are cleared and read.
#[derive(Clone)]
pub struct ContingencyTable {
    case: [CellCount; MAX_CELLS],
    control: [CellCount; MAX_CELLS],
}

impl Default for ContingencyTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ContingencyTable {
    pub fn new() -> Self {
        Self {
            case: [0; MAX_CELLS],
            control: [0; MAX_CELLS],
        }
    }

    /// Zeroes the cells an order-`order` combination can touch.
    #[inline(always)]
    pub fn clear(&mut self, order: Order) {
        let cells = order.cell_count();
        self.case[..cells].fill(0);
        self.control[..cells].fill(0);
    }

    #[inline(always)]
    pub fn case(&self, cell: u8) -> CellCount {
        self.case[cell as usize]
    }

    #[inline(always)]
    pub fn control(&self, cell: u8) -> CellCount {
        self.control[cell as usize]
    }

    /// Counts every sample of one class.
    ///
    /// `prefix` is the OR of the already fixed variables' words (absent for order 1);
    /// `words` are the innermost variable's words in the innermost slot.
    #[inline(always)]
    pub fn tally(&mut self, class: SampleClass, prefix: Option<&[Word]>, words: &[Word]) {
        let counts = match class {
            SampleClass::Case => &mut self.case,
            SampleClass::Control => &mut self.control,
        };
        match prefix {
            None => {
                for &w in words {
                    tally_word(counts, w);
                }
            }
            Some(prefix) => {
                debug_assert_eq!(prefix.len(), words.len());
                for (&p, &w) in prefix.iter().zip(words) {
                    tally_word(counts, p | w);
                }
            }
        }
    }
}

#[inline(always)]
fn tally_word(counts: &mut [CellCount; MAX_CELLS], word: Word) {
    for cell in word.to_le_bytes() {
        counts[cell as usize] += 1;
    }
}

/// Starts an accumulator chain with the outermost variable's words.
#[inline(always)]
pub fn load_accumulator(dst: &mut [Word], src: &[Word]) {
    dst.copy_from_slice(src);
}

/// Extends an accumulator chain by one variable: `dst = prev | src`.
#[inline(always)]
pub fn extend_accumulator(dst: &mut [Word], prev: &[Word], src: &[Word]) {
    for ((d, &p), &s) in dst.iter_mut().zip(prev).zip(src) {
        *d = p | s;
    }
}
