// ========================================================================================
//
//                  Dataset loading, per-thread outputs and the merge stage
//
// ========================================================================================
//
// The dataset is a CSV whose first line carries one class label per sample (1 = case,
// 0 = control) after an ignored first cell, and whose every following line carries a
// variable name followed by one genotype (0, 1 or 2) per sample. Every inconsistency is
// fatal and reported with its location.

use crate::error::{Result, ScanError};
use crate::genotype::GenotypeMatrix;
use crate::pipeline::SinkFactory;
use crate::results::BestResults;
use crate::types::{MAX_SAMPLES, MetricKind, Order, SampleClass};
use log::{debug, info};
use natord::compare;
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// The first cell of a dataset's label line.
const LABEL_CORNER: &str = "Var\\Class";

/// The header of the best information gain table.
const BEST_HEADER: [&str; 15] = [
    "SNP",
    "SNP_P",
    "PAIR_P",
    "TRIPLET_P",
    "QUADLET_P",
    "SNP_IG",
    "PAIR_IG",
    "TRIPLET_IG",
    "QUADLET_IG",
    "PAIR",
    "TRIPLET_1",
    "TRIPLET_2",
    "QUADLET_1",
    "QUADLET_2",
    "QUADLET_3",
];

/// Reads and validates a genotype dataset.
pub fn read_genotype_csv(path: &Path) -> Result<GenotypeMatrix> {
    let file = File::open(path).map_err(|e| ScanError::io(path, e))?;
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(BufReader::new(file));
    let malformed = |source: csv::Error| ScanError::Csv {
        path: path.to_path_buf(),
        source,
    };
    let mut records = reader.records();

    let header = match records.next() {
        Some(record) => record.map_err(malformed)?,
        None => return Err(ScanError::EmptyDataset("the file has no label line")),
    };
    let classes = header
        .iter()
        .skip(1)
        .enumerate()
        .map(|(sample, label)| match label {
            "1" => Ok(SampleClass::Case),
            "0" => Ok(SampleClass::Control),
            other => Err(ScanError::InvalidLabel {
                sample,
                value: other.to_string(),
            }),
        })
        .collect::<Result<Vec<_>>>()?;
    if classes.len() > MAX_SAMPLES {
        return Err(ScanError::TooManySamples {
            found: classes.len(),
            max: MAX_SAMPLES,
        });
    }

    let expected = header.len();
    let mut names = Vec::new();
    let mut calls = Vec::new();
    for record in records {
        let record = record.map_err(malformed)?;
        if record.len() != expected {
            return Err(ScanError::FieldCount {
                line: record.position().map_or(0, |p| p.line()),
                expected,
                found: record.len(),
            });
        }
        let name = &record[0];
        for (sample, field) in record.iter().skip(1).enumerate() {
            let genotype = match field {
                "0" => 0,
                "1" => 1,
                "2" => 2,
                other => {
                    return Err(ScanError::InvalidGenotype {
                        variable: name.to_string(),
                        sample,
                        value: other.to_string(),
                    });
                }
            };
            calls.push(genotype);
        }
        names.push(name.to_string());
    }

    let matrix = GenotypeMatrix::new(names, classes, calls)?;
    debug!(
        "Loaded '{}': {} samples, {} variables",
        path.display(),
        matrix.num_samples(),
        matrix.num_variables()
    );
    Ok(matrix)
}

/// Writes a dataset in the format `read_genotype_csv` accepts.
pub fn write_genotype_csv(path: &Path, matrix: &GenotypeMatrix) -> Result<()> {
    let file = File::create(path).map_err(|e| ScanError::io(path, e))?;
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(BufWriter::new(file));
    let failed = |source: csv::Error| ScanError::Csv {
        path: path.to_path_buf(),
        source,
    };

    let mut record = Vec::with_capacity(matrix.num_samples() + 1);
    record.push(LABEL_CORNER.to_string());
    record.extend(matrix.classes().iter().map(|class| match class {
        SampleClass::Case => "1".to_string(),
        SampleClass::Control => "0".to_string(),
    }));
    writer.write_record(&record).map_err(failed)?;

    for (v, name) in matrix.names().iter().enumerate() {
        record.clear();
        record.push(name.clone());
        record.extend(matrix.row(v).iter().map(|g| g.to_string()));
        writer.write_record(&record).map_err(failed)?;
    }
    writer.flush().map_err(|e| ScanError::io(path, e))
}

/// Appends one reported combination: the score, then the member names.
#[inline]
pub fn write_score_row<W: Write>(
    out: &mut W,
    score: f64,
    tuple: &[usize],
    names: &[String],
) -> io::Result<()> {
    write!(out, "{score:.6}")?;
    for &v in tuple {
        write!(out, ",{}", names[v])?;
    }
    writeln!(out)
}

fn with_suffix(prefix: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(prefix.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

/// `<prefix>.<metric>.<slot>.<worker>.csv`, where singles are slot 0.
pub fn thread_output_path(prefix: &Path, metric: MetricKind, order: Order, worker: usize) -> PathBuf {
    with_suffix(
        prefix,
        &format!(".{}.{}.{}.csv", metric.tag(), order.slot(), worker),
    )
}

/// `<prefix>.<metric>.<slot>.csv`
pub fn merged_output_path(prefix: &Path, metric: MetricKind, order: Order) -> PathBuf {
    with_suffix(prefix, &format!(".{}.{}.csv", metric.tag(), order.slot()))
}

/// `<prefix>.bestIG.csv`
pub fn best_table_path(prefix: &Path) -> PathBuf {
    with_suffix(prefix, ".bestIG.csv")
}

/// Writes every worker's rows of one metric to `<prefix>.<metric>.<slot>.<worker>.csv`
/// and merges them into `<prefix>.<metric>.<slot>.csv` once the pass is over.
pub struct FileSinks {
    prefix: PathBuf,
    sort: bool,
}

impl FileSinks {
    pub fn new(prefix: impl Into<PathBuf>, sort: bool) -> Self {
        Self {
            prefix: prefix.into(),
            sort,
        }
    }
}

impl SinkFactory for FileSinks {
    type Writer = BufWriter<File>;

    fn open(&self, metric: MetricKind, order: Order, worker: usize) -> Result<Self::Writer> {
        let path = thread_output_path(&self.prefix, metric, order, worker);
        let file = File::create(&path).map_err(|e| ScanError::io(&path, e))?;
        debug!("Worker {worker} writes {metric} rows to '{}'", path.display());
        Ok(BufWriter::new(file))
    }

    fn finish(
        &self,
        metric: MetricKind,
        order: Order,
        worker: usize,
        mut writer: Self::Writer,
    ) -> Result<()> {
        writer.flush().map_err(|e| {
            ScanError::io(thread_output_path(&self.prefix, metric, order, worker), e)
        })
    }

    fn pass_finished(&self, order: Order, reported: &[MetricKind]) -> Result<()> {
        for &metric in reported {
            let merged = merge_thread_outputs(&self.prefix, metric, order, self.sort)?;
            info!("Wrote {metric} rows of the {order} pass to '{}'", merged.display());
        }
        Ok(())
    }

    fn pass_aborted(&self, order: Order, reported: &[MetricKind]) -> Result<()> {
        for &metric in reported {
            discard_thread_outputs(&self.prefix, metric, order)?;
        }
        Ok(())
    }
}

/// Finds the per-thread files of one metric and order, in natural worker order.
fn thread_outputs(prefix: &Path, metric: MetricKind, order: Order) -> Result<Vec<PathBuf>> {
    let dir = match prefix.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let Some(stem) = prefix.file_name().map(|s| s.to_string_lossy().into_owned()) else {
        return Err(ScanError::config(format!(
            "output prefix '{}' does not name a file",
            prefix.display()
        )));
    };
    let lead = format!("{stem}.{}.{}.", metric.tag(), order.slot());

    let mut found: Vec<(String, PathBuf)> = Vec::new();
    for entry in fs::read_dir(&dir).map_err(|e| ScanError::io(&dir, e))? {
        let entry = entry.map_err(|e| ScanError::io(&dir, e))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let worker = name
            .strip_prefix(&lead)
            .and_then(|rest| rest.strip_suffix(".csv"));
        if let Some(worker) = worker {
            if !worker.is_empty() && worker.bytes().all(|b| b.is_ascii_digit()) {
                found.push((name, entry.path()));
            }
        }
    }
    found.sort_by(|a, b| compare(&a.0, &b.0));
    Ok(found.into_iter().map(|(_, path)| path).collect())
}

/// Concatenates the per-thread files of one metric and order into
/// `<prefix>.<metric>.<slot>.csv`, optionally sorted by descending score, and removes
/// the per-thread files.
///
/// Without sorting the parts are streamed through unchanged, so memory use does not
/// depend on the number of rows.
pub fn merge_thread_outputs(
    prefix: &Path,
    metric: MetricKind,
    order: Order,
    sort: bool,
) -> Result<PathBuf> {
    let parts = thread_outputs(prefix, metric, order)?;
    let merged = merged_output_path(prefix, metric, order);
    let file = File::create(&merged).map_err(|e| ScanError::io(&merged, e))?;
    let mut out = BufWriter::new(file);
    writeln!(out, "{},{}", metric.tag(), order.variable_headers())
        .map_err(|e| ScanError::io(&merged, e))?;

    if sort {
        let mut rows: Vec<(f64, String)> = Vec::new();
        for part in &parts {
            let file = File::open(part).map_err(|e| ScanError::io(part, e))?;
            for line in BufReader::new(file).lines() {
                let line = line.map_err(|e| ScanError::io(part, e))?;
                if !line.is_empty() {
                    rows.push((row_score(&line), line));
                }
            }
        }
        rows.sort_by(|a, b| b.0.total_cmp(&a.0));
        for (_, line) in &rows {
            writeln!(out, "{line}").map_err(|e| ScanError::io(&merged, e))?;
        }
        debug!("Sorted {} {metric} rows of the {order} pass", rows.len());
    } else {
        for part in &parts {
            let mut file = File::open(part).map_err(|e| ScanError::io(part, e))?;
            io::copy(&mut file, &mut out).map_err(|e| ScanError::io(part, e))?;
        }
    }
    out.flush().map_err(|e| ScanError::io(&merged, e))?;

    for part in &parts {
        fs::remove_file(part).map_err(|e| ScanError::io(part, e))?;
    }
    debug!(
        "Merged {} {metric} files of the {order} pass into '{}'",
        parts.len(),
        merged.display()
    );
    Ok(merged)
}

/// Unparsable scores sort last.
fn row_score(line: &str) -> f64 {
    line.split(',')
        .next()
        .and_then(|s| s.parse::<f64>().ok())
        .unwrap_or(f64::NEG_INFINITY)
}

/// Removes the per-thread files and the merged file of one metric and order, if any.
pub fn discard_thread_outputs(prefix: &Path, metric: MetricKind, order: Order) -> Result<()> {
    let merged = merged_output_path(prefix, metric, order);
    let mut doomed = thread_outputs(prefix, metric, order)?;
    doomed.push(merged);
    for path in &doomed {
        match fs::remove_file(path) {
            Ok(()) => debug!("Removed '{}'", path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(ScanError::io(path, e)),
        }
    }
    Ok(())
}

/// Writes one row per variable with its best purity, gain and partners at every order.
///
/// Orders that never produced a hit for a variable are left empty.
pub fn write_best_table(path: &Path, best: &BestResults, names: &[String]) -> Result<()> {
    let file = File::create(path).map_err(|e| ScanError::io(path, e))?;
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(BufWriter::new(file));
    let failed = |source: csv::Error| ScanError::Csv {
        path: path.to_path_buf(),
        source,
    };
    writer.write_record(BEST_HEADER).map_err(failed)?;

    let mut record: Vec<String> = Vec::with_capacity(BEST_HEADER.len());
    for (v, entry) in best.iter().enumerate() {
        record.clear();
        record.push(names[v].clone());
        for order in Order::ALL {
            record.push(entry.hit(order).map_or_else(String::new, |h| format!("{:.6}", h.purity)));
        }
        for order in Order::ALL {
            record.push(entry.hit(order).map_or_else(String::new, |h| format!("{:.6}", h.gain)));
        }
        for order in &Order::ALL[1..] {
            let partners: Vec<String> = match entry.hit(*order) {
                Some(hit) => hit.partners(v).map(|p| names[p].clone()).collect(),
                None => Vec::new(),
            };
            for i in 0..order.level() - 1 {
                record.push(partners.get(i).cloned().unwrap_or_default());
            }
        }
        writer.write_record(&record).map_err(failed)?;
    }
    writer.flush().map_err(|e| ScanError::io(path, e))
}
