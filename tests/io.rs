use episcan::config::{MetricRequest, ScanPlan, ScanRequest};
use episcan::error::ScanError;
use episcan::genotype::{GenotypeMatrix, GenotypeStore};
use episcan::io::{
    FileSinks, best_table_path, merge_thread_outputs, merged_output_path, read_genotype_csv,
    thread_output_path, write_best_table, write_genotype_csv,
};
use episcan::pipeline::{Search, SinkFactory};
use episcan::types::{MetricKind, Order, SampleClass};
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use tempfile::tempdir;

fn write(dir: &Path, name: &str, contents: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    fs::write(&path, contents).unwrap();
    path
}

fn dataset() -> GenotypeMatrix {
    use SampleClass::{Case, Control};
    GenotypeMatrix::from_rows(
        vec![Case, Control, Case, Control, Case, Control],
        vec![
            ("rs1".into(), vec![0, 1, 0, 1, 0, 1]),
            ("rs2".into(), vec![0, 0, 1, 1, 2, 2]),
            ("rs3".into(), vec![2, 1, 2, 0, 1, 0]),
            ("rs4".into(), vec![1, 1, 1, 1, 0, 2]),
        ],
    )
    .unwrap()
}

#[test]
fn datasets_survive_a_write_and_read() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("data.csv");
    let matrix = dataset();
    write_genotype_csv(&path, &matrix).unwrap();
    let text = fs::read_to_string(&path).unwrap();
    assert!(text.starts_with("Var\\Class,1,0,1,0,1,0\nrs1,0,1,0,1,0,1\n"));
    assert_eq!(read_genotype_csv(&path).unwrap(), matrix);
}

#[test]
fn loader_tolerates_surrounding_whitespace() {
    let dir = tempdir().unwrap();
    let path = write(dir.path(), "ws.csv", "id, 1, 0\nrs1, 2 ,0\n");
    let matrix = read_genotype_csv(&path).unwrap();
    assert_eq!(matrix.classes(), &[SampleClass::Case, SampleClass::Control]);
    assert_eq!(matrix.row(0), &[2, 0]);
}

#[test]
fn loader_rejects_bad_labels() {
    let dir = tempdir().unwrap();
    let path = write(dir.path(), "labels.csv", "id,1,0,2\nrs1,0,0,0\n");
    match read_genotype_csv(&path).unwrap_err() {
        ScanError::InvalidLabel { sample, value } => {
            assert_eq!(sample, 2);
            assert_eq!(value, "2");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn loader_rejects_bad_genotypes() {
    let dir = tempdir().unwrap();
    let path = write(dir.path(), "geno.csv", "id,1,0\nrs1,0,1\nrs2,3,0\n");
    match read_genotype_csv(&path).unwrap_err() {
        ScanError::InvalidGenotype {
            variable,
            sample,
            value,
        } => {
            assert_eq!(variable, "rs2");
            assert_eq!(sample, 0);
            assert_eq!(value, "3");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn loader_reports_the_line_of_a_short_row() {
    let dir = tempdir().unwrap();
    let path = write(dir.path(), "short.csv", "id,1,0,1\nrs1,0,1,2\nrs2,0,1\n");
    match read_genotype_csv(&path).unwrap_err() {
        ScanError::FieldCount {
            line,
            expected,
            found,
        } => {
            assert_eq!(line, 3);
            assert_eq!(expected, 4);
            assert_eq!(found, 3);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn loader_rejects_empty_and_missing_inputs() {
    let dir = tempdir().unwrap();
    let empty = write(dir.path(), "empty.csv", "");
    assert!(matches!(
        read_genotype_csv(&empty),
        Err(ScanError::EmptyDataset(_))
    ));
    let labels_only = write(dir.path(), "labels_only.csv", "id,1,0\n");
    assert!(matches!(
        read_genotype_csv(&labels_only),
        Err(ScanError::EmptyDataset(_))
    ));
    assert!(matches!(
        read_genotype_csv(&dir.path().join("absent.csv")),
        Err(ScanError::Io { .. })
    ));
}

#[test]
fn merge_concatenates_in_worker_order_and_can_sort() {
    let dir = tempdir().unwrap();
    let prefix = dir.path().join("out");
    let parts = [
        (0, "0.250000,a\n0.900000,b\n"),
        (1, "0.500000,c\n"),
        (2, "0.900000,d\n0.100000,e\n"),
    ];
    for (worker, rows) in parts {
        fs::write(
            thread_output_path(&prefix, MetricKind::Purity, Order::Single, worker),
            rows,
        )
        .unwrap();
    }
    let merged = merge_thread_outputs(&prefix, MetricKind::Purity, Order::Single, false).unwrap();
    assert_eq!(
        fs::read_to_string(&merged).unwrap(),
        "Purity,SNP_A\n0.250000,a\n0.900000,b\n0.500000,c\n0.900000,d\n0.100000,e\n"
    );
    for (worker, _) in parts {
        assert!(!thread_output_path(&prefix, MetricKind::Purity, Order::Single, worker).exists());
    }

    for (worker, rows) in parts {
        fs::write(
            thread_output_path(&prefix, MetricKind::InformationGain, Order::Pair, worker),
            rows.replace(",a", ",a,x")
                .replace(",b", ",b,x")
                .replace(",c", ",c,x")
                .replace(",d", ",d,x")
                .replace(",e", ",e,x"),
        )
        .unwrap();
    }
    let merged =
        merge_thread_outputs(&prefix, MetricKind::InformationGain, Order::Pair, true).unwrap();
    assert_eq!(merged, merged_output_path(&prefix, MetricKind::InformationGain, Order::Pair));
    // Equal scores keep their worker order.
    assert_eq!(
        fs::read_to_string(&merged).unwrap(),
        "IG,SNP_A,SNP_B\n0.900000,b,x\n0.900000,d,x\n0.500000,c,x\n0.250000,a,x\n0.100000,e,x\n"
    );
}

#[test]
fn file_sinks_leave_one_merged_file_per_reported_metric() {
    let dir = tempdir().unwrap();
    let prefix = dir.path().join("run");
    let matrix = dataset();

    let mut request = ScanRequest {
        threads: 3,
        sort: true,
        ..ScanRequest::default()
    };
    request.pairs.purity = Some(MetricRequest::reported(0.0));
    request.pairs.gain = Some(MetricRequest::default());
    let plan = ScanPlan::resolve(&request).unwrap();
    let store = GenotypeStore::build(&matrix, plan.max_order());
    let sinks = FileSinks::new(&prefix, plan.sort());
    Search::new(&store, &plan).run(&sinks).unwrap();

    let mut names: Vec<String> = fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    assert_eq!(names, vec!["run.Purity.1.csv"]);

    let text = fs::read_to_string(merged_output_path(&prefix, MetricKind::Purity, Order::Pair))
        .unwrap();
    let mut lines = text.lines();
    assert_eq!(lines.next(), Some("Purity,SNP_A,SNP_B"));
    let scores: Vec<f64> = lines
        .map(|l| l.split(',').next().unwrap().parse().unwrap())
        .collect();
    assert_eq!(scores.len(), 6);
    assert!(scores.windows(2).all(|w| w[0] >= w[1]));
}

#[test]
fn best_table_lists_partners_without_the_variable_itself() {
    let dir = tempdir().unwrap();
    let prefix = dir.path().join("best");
    let matrix = dataset();

    let request = ScanRequest {
        threads: 2,
        best_ig: true,
        ..ScanRequest::default()
    };
    let plan = ScanPlan::resolve(&request).unwrap();
    let store = GenotypeStore::build(&matrix, plan.max_order());
    let outcome = Search::new(&store, &plan)
        .run(&FileSinks::new(&prefix, false))
        .unwrap();
    let best = outcome.best.unwrap();
    let path = best_table_path(&prefix);
    write_best_table(&path, &best, store.names()).unwrap();

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(&path)
        .unwrap();
    let header: Vec<String> = reader.headers().unwrap().iter().map(String::from).collect();
    assert_eq!(header.len(), 15);
    assert_eq!(header[0], "SNP");
    assert_eq!(header[9], "PAIR");
    assert_eq!(header[14], "QUADLET_3");

    let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
    assert_eq!(rows.len(), 4);
    for (v, row) in rows.iter().enumerate() {
        assert_eq!(&row[0], store.names()[v].as_str());
        let partners: Vec<&str> = row.iter().skip(9).collect();
        assert_eq!(partners.len(), 6);
        assert!(partners.iter().all(|p| !p.is_empty() && *p != &row[0]));
        // With four variables the only quadlet holds everyone else.
        let mut quadlet: Vec<&str> = partners[3..].to_vec();
        quadlet.sort();
        let mut others: Vec<&str> = store
            .names()
            .iter()
            .map(String::as_str)
            .filter(|n| *n != &row[0])
            .collect();
        others.sort();
        assert_eq!(quadlet, others);
        for field in row.iter().skip(1).take(8) {
            assert_eq!(field.split('.').nth(1).map(str::len), Some(6));
        }
    }
}

fn file_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[test]
fn single_snp_outputs_are_numbered_from_zero() {
    let dir = tempdir().unwrap();
    let prefix = dir.path().join("run");
    let mut request = ScanRequest {
        threads: 2,
        ..ScanRequest::default()
    };
    request.singles.purity = Some(MetricRequest::reported(0.0));
    request.singles.gain = Some(MetricRequest::reported(0.0));
    let plan = ScanPlan::resolve(&request).unwrap();
    let store = GenotypeStore::build(&dataset(), plan.max_order());
    Search::new(&store, &plan)
        .run(&FileSinks::new(&prefix, false))
        .unwrap();
    assert_eq!(file_names(dir.path()), vec!["run.IG.0.csv", "run.Purity.0.csv"]);
}

#[test]
fn unsorted_merge_copies_every_part_verbatim() {
    let dir = tempdir().unwrap();
    let prefix = dir.path().join("out");
    let mut expected = String::from("IG,SNP_A,SNP_B,SNP_C\n");
    for worker in 0..12 {
        let rows: String = (0..3)
            .map(|r| format!("{:.6},w{worker},r{r},x\n", (worker * 3 + r) as f64 / 100.0))
            .collect();
        fs::write(
            thread_output_path(&prefix, MetricKind::InformationGain, Order::Triplet, worker),
            &rows,
        )
        .unwrap();
        expected.push_str(&rows);
    }
    let merged =
        merge_thread_outputs(&prefix, MetricKind::InformationGain, Order::Triplet, false).unwrap();
    assert_eq!(fs::read(&merged).unwrap(), expected.into_bytes());
    assert_eq!(file_names(dir.path()), vec!["out.IG.2.csv"]);
}

/// A writer that refuses every write.
struct Broken;

impl Write for Broken {
    fn write(&mut self, _: &[u8]) -> io::Result<usize> {
        Err(io::Error::other("disk full"))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// File sinks whose worker 1 cannot write a single row.
struct OneWorkerFails(FileSinks);

impl SinkFactory for OneWorkerFails {
    type Writer = Box<dyn Write + Send>;

    fn open(
        &self,
        metric: MetricKind,
        order: Order,
        worker: usize,
    ) -> episcan::error::Result<Self::Writer> {
        let file = self.0.open(metric, order, worker)?;
        if worker == 1 {
            Ok(Box::new(Broken))
        } else {
            Ok(Box::new(file))
        }
    }

    fn finish(
        &self,
        _: MetricKind,
        _: Order,
        _: usize,
        mut writer: Self::Writer,
    ) -> episcan::error::Result<()> {
        Ok(writer.flush()?)
    }

    fn pass_finished(&self, order: Order, reported: &[MetricKind]) -> episcan::error::Result<()> {
        self.0.pass_finished(order, reported)
    }

    fn pass_aborted(&self, order: Order, reported: &[MetricKind]) -> episcan::error::Result<()> {
        self.0.pass_aborted(order, reported)
    }
}

#[test]
fn failed_pass_leaves_no_output_for_its_order() {
    let dir = tempdir().unwrap();
    let prefix = dir.path().join("run");
    let mut request = ScanRequest {
        threads: 2,
        ..ScanRequest::default()
    };
    request.singles.purity = Some(MetricRequest::reported(0.0));
    request.pairs.purity = Some(MetricRequest::reported(0.0));
    request.pairs.gain = Some(MetricRequest::reported(0.0));
    let plan = ScanPlan::resolve(&request).unwrap();
    let store = GenotypeStore::build(&dataset(), plan.max_order());

    let sinks = FileSinks::new(&prefix, false);
    let search = Search::new(&store, &plan);
    let singles = search
        .run_pass(Order::Single, None, &mut [], &sinks)
        .unwrap();
    let failing = OneWorkerFails(FileSinks::new(&prefix, false));
    let err = search
        .run_pass(Order::Pair, singles.saved.as_ref(), &mut [], &failing)
        .unwrap_err();
    assert!(matches!(err, ScanError::Write(_)));
    // The completed order survives; nothing of the failed one does.
    assert_eq!(file_names(dir.path()), vec!["run.Purity.0.csv"]);
}
