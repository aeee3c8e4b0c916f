// ========================================================================================
//
//                      The genotype store: bit-packed, pre-shifted planes
//
// ========================================================================================
//
// Every sample occupies one byte of a machine word, eight samples per word, with its
// genotype in the low two bits. For each order slot `k` the store keeps a copy of the
// whole matrix shifted left by `2k` bits, so that OR-ing one word from slot 0, one from
// slot 1, ... yields a word whose eight bytes are ready-made contingency-table indices.
// Cases and controls are packed into separate planes so that the class of a sample is
// implied by the plane it is read from.

use crate::error::{Result, ScanError};
use crate::purity::set_purity;
use crate::types::{MAX_ORDER, MAX_SAMPLES, Order, SampleClass};

/// The machine word the counter operates on.
pub type Word = u64;

/// The number of samples packed into one `Word`.
pub const SAMPLES_PER_WORD: usize = std::mem::size_of::<Word>();

/// The reserved genotype code. Padding bytes in the last word of every variable carry
/// it in every slot, so each padded byte lands in a cell the purity sum never visits.
pub const PAD_GENOTYPE: u8 = 0b11;

/// A validated sample-by-variable genotype matrix, as delivered by the loader.
///
/// Calls are stored variable-major: `calls[v * num_samples + s]`.
#[derive(Debug, Clone, PartialEq)]
pub struct GenotypeMatrix {
    names: Vec<String>,
    classes: Vec<SampleClass>,
    calls: Vec<u8>,
}

impl GenotypeMatrix {
    /// Validates and wraps a variable-major call buffer.
    pub fn new(names: Vec<String>, classes: Vec<SampleClass>, calls: Vec<u8>) -> Result<Self> {
        if classes.is_empty() {
            return Err(ScanError::EmptyDataset("no samples"));
        }
        if names.is_empty() {
            return Err(ScanError::EmptyDataset("no variables"));
        }
        if classes.len() > MAX_SAMPLES {
            return Err(ScanError::TooManySamples {
                found: classes.len(),
                max: MAX_SAMPLES,
            });
        }
        if calls.len() != names.len() * classes.len() {
            return Err(ScanError::CallCount {
                found: calls.len(),
                variables: names.len(),
                samples: classes.len(),
            });
        }
        let num_samples = classes.len();
        if let Some(pos) = calls.iter().position(|&g| g > 2) {
            return Err(ScanError::InvalidGenotype {
                variable: names[pos / num_samples].clone(),
                sample: pos % num_samples,
                value: calls[pos].to_string(),
            });
        }
        Ok(Self {
            names,
            classes,
            calls,
        })
    }

    /// Builds a matrix from one `(name, genotypes)` row per variable.
    pub fn from_rows(classes: Vec<SampleClass>, rows: Vec<(String, Vec<u8>)>) -> Result<Self> {
        let mut names = Vec::with_capacity(rows.len());
        let mut calls = Vec::with_capacity(rows.len() * classes.len());
        for (line, (name, genotypes)) in rows.into_iter().enumerate() {
            if genotypes.len() != classes.len() {
                return Err(ScanError::FieldCount {
                    line: line as u64 + 2,
                    expected: classes.len() + 1,
                    found: genotypes.len() + 1,
                });
            }
            names.push(name);
            calls.extend_from_slice(&genotypes);
        }
        Self::new(names, classes, calls)
    }

    pub fn num_samples(&self) -> usize {
        self.classes.len()
    }

    pub fn num_variables(&self) -> usize {
        self.names.len()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn classes(&self) -> &[SampleClass] {
        &self.classes
    }

    /// The genotypes of one variable, in sample order.
    pub fn row(&self, variable: usize) -> &[u8] {
        let n = self.num_samples();
        &self.calls[variable * n..(variable + 1) * n]
    }
}

/// One class's packed genotypes: one plane per order slot, each holding
/// `words_per_variable` words for every variable back to back.
#[derive(Debug)]
struct ClassPlanes {
    num_samples: usize,
    words_per_variable: usize,
    slots: Vec<Vec<Word>>,
}

impl ClassPlanes {
    fn pack(matrix: &GenotypeMatrix, class: SampleClass, max_order: Order) -> Self {
        let members: Vec<usize> = matrix
            .classes()
            .iter()
            .enumerate()
            .filter_map(|(s, &c)| (c == class).then_some(s))
            .collect();
        let words_per_variable = members.len().div_ceil(SAMPLES_PER_WORD);
        let bytes_per_variable = words_per_variable * SAMPLES_PER_WORD;

        let mut base = Vec::with_capacity(matrix.num_variables() * words_per_variable);
        let mut bytes = vec![PAD_GENOTYPE; bytes_per_variable];
        for v in 0..matrix.num_variables() {
            let row = matrix.row(v);
            bytes.fill(PAD_GENOTYPE);
            for (dst, &s) in bytes.iter_mut().zip(&members) {
                *dst = row[s];
            }
            base.extend(bytes.chunks_exact(SAMPLES_PER_WORD).map(|chunk| {
                let mut word = [0u8; SAMPLES_PER_WORD];
                word.copy_from_slice(chunk);
                Word::from_le_bytes(word)
            }));
        }

        // Slot k is slot k-1 shifted by one genotype field. Fields never cross a byte
        // boundary: the widest value (0b11 << 6) still fits in the top two bits.
        let mut slots = Vec::with_capacity(max_order.level());
        slots.push(base);
        for k in 1..max_order.level() {
            let shifted: Vec<Word> = slots[k - 1].iter().map(|&w| w << 2).collect();
            slots.push(shifted);
        }

        Self {
            num_samples: members.len(),
            words_per_variable,
            slots,
        }
    }

    #[inline(always)]
    fn words(&self, slot: usize, variable: usize) -> &[Word] {
        let start = variable * self.words_per_variable;
        &self.slots[slot][start..start + self.words_per_variable]
    }
}

/// The read-only, bit-packed form of a dataset shared by every worker of every pass.
#[derive(Debug)]
pub struct GenotypeStore {
    names: Vec<String>,
    case: ClassPlanes,
    control: ClassPlanes,
    max_order: Order,
    set_purity: f64,
}

impl GenotypeStore {
    /// Packs `matrix` and derives the shifted slots needed for orders up to `max_order`.
    pub fn build(matrix: &GenotypeMatrix, max_order: Order) -> Self {
        let case = ClassPlanes::pack(matrix, SampleClass::Case, max_order);
        let control = ClassPlanes::pack(matrix, SampleClass::Control, max_order);
        let set_purity = set_purity(case.num_samples, control.num_samples);
        log::debug!(
            "Packed {} variables: {} case words and {} control words per variable, {} slots",
            matrix.num_variables(),
            case.words_per_variable,
            control.words_per_variable,
            max_order.level()
        );
        Self {
            names: matrix.names().to_vec(),
            case,
            control,
            max_order,
            set_purity,
        }
    }

    pub fn num_variables(&self) -> usize {
        self.names.len()
    }

    pub fn num_samples(&self) -> usize {
        self.case.num_samples + self.control.num_samples
    }

    pub fn num_cases(&self) -> usize {
        self.case.num_samples
    }

    pub fn num_controls(&self) -> usize {
        self.control.num_samples
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// The highest order the store carries shifted slots for.
    pub fn max_order(&self) -> Order {
        self.max_order
    }

    /// The purity of the unsplit dataset; the order-0 baseline.
    pub fn set_purity(&self) -> f64 {
        self.set_purity
    }

    pub fn words_per_variable(&self, class: SampleClass) -> usize {
        self.planes(class).words_per_variable
    }

    /// The packed words of `variable`, pre-shifted for order slot `slot`.
    ///
    /// Panics if `slot` was not built, i.e. `slot >= max_order().level()`.
    #[inline(always)]
    pub fn words(&self, class: SampleClass, slot: usize, variable: usize) -> &[Word] {
        debug_assert!(slot < MAX_ORDER);
        self.planes(class).words(slot, variable)
    }

    #[inline(always)]
    fn planes(&self, class: SampleClass) -> &ClassPlanes {
        match class {
            SampleClass::Case => &self.case,
            SampleClass::Control => &self.control,
        }
    }
}
