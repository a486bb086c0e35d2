use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};

use byteorder::{BigEndian, ReadBytesExt};
use rayon::prelude::*;
use thiserror::Error;
use tracing::debug;

use crate::config::ReaderConfig;

pub const HEADER_LEN: u64 = 32;
pub const TAG_LEN: usize = 18;
pub const VERSION_LEN: usize = 5;
pub const BIG_ENDIAN_FLAG: u8 = b'b';

/// Metric slots decoded from each node's value pair.
pub const INCLUSIVE: usize = 0;
pub const EXCLUSIVE: usize = 1;
pub const SUPPORTED_METRICS: usize = 2;

#[derive(Debug, Error)]
pub enum MetricDbError {
    #[error("{}: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },
    #[error("{}: no files ending in {suffix:?}", dir.display())]
    NoMetricFiles { dir: PathBuf, suffix: String },
    #[error(
        "{}: unsupported endianness flag {flag:#04x}, only big-endian (b'b') is defined",
        path.display()
    )]
    UnsupportedEndianness { path: PathBuf, flag: u8 },
    #[error("{}: invalid header: {reason}", path.display())]
    InvalidHeader { path: PathBuf, reason: String },
    #[error(
        "{}: header {field} is {found}, but {} has {expected}",
        path.display(),
        first.display()
    )]
    HeaderMismatch {
        path: PathBuf,
        first: PathBuf,
        field: &'static str,
        expected: String,
        found: String,
    },
    #[error("{}: payload truncated, expected {expected} values", path.display())]
    Truncated { path: PathBuf, expected: usize },
    #[error("{}: node {node} metric {metric} has invalid value {value}", path.display())]
    InvalidValue {
        path: PathBuf,
        node: usize,
        metric: usize,
        value: f64,
    },
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> MetricDbError + '_ {
    move |source| MetricDbError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// The fixed 32-byte header at the start of every metric file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricDbHeader {
    pub tag: [u8; TAG_LEN],
    pub version: [u8; VERSION_LEN],
    pub endianness: u8,
    pub num_nodes: usize,
    pub num_metrics: usize,
}

impl MetricDbHeader {
    /// Read and validate a header, leaving `reader` at the payload.
    pub fn read_from<R: Read>(reader: &mut R, path: &Path) -> Result<Self, MetricDbError> {
        let short = |source: io::Error| {
            if source.kind() == io::ErrorKind::UnexpectedEof {
                MetricDbError::InvalidHeader {
                    path: path.to_path_buf(),
                    reason: format!("file is shorter than the {HEADER_LEN}-byte header"),
                }
            } else {
                MetricDbError::Io {
                    path: path.to_path_buf(),
                    source,
                }
            }
        };

        let mut tag = [0u8; TAG_LEN];
        reader.read_exact(&mut tag).map_err(short)?;
        let mut version = [0u8; VERSION_LEN];
        reader.read_exact(&mut version).map_err(short)?;
        let endianness = reader.read_u8().map_err(short)?;
        if endianness != BIG_ENDIAN_FLAG {
            return Err(MetricDbError::UnsupportedEndianness {
                path: path.to_path_buf(),
                flag: endianness,
            });
        }

        let num_nodes = reader.read_i32::<BigEndian>().map_err(short)?;
        let num_metrics = reader.read_i32::<BigEndian>().map_err(short)?;

        let invalid = |reason: String| MetricDbError::InvalidHeader {
            path: path.to_path_buf(),
            reason,
        };
        let num_nodes = usize::try_from(num_nodes)
            .ok()
            .filter(|n| *n > 0)
            .ok_or_else(|| invalid(format!("node count {num_nodes} is not positive")))?;
        if num_metrics != SUPPORTED_METRICS as i32 {
            return Err(invalid(format!(
                "metric count {num_metrics} is not supported, expected {SUPPORTED_METRICS}"
            )));
        }

        Ok(Self {
            tag,
            version,
            endianness,
            num_nodes,
            num_metrics: SUPPORTED_METRICS,
        })
    }

    pub fn tag_lossy(&self) -> String {
        String::from_utf8_lossy(&self.tag).into_owned()
    }

    pub fn version_lossy(&self) -> String {
        String::from_utf8_lossy(&self.version).into_owned()
    }

    pub fn payload_len(&self) -> usize {
        self.num_nodes * self.num_metrics
    }

    /// Report the first field in which `other` disagrees with `self`.
    fn mismatch(&self, other: &Self) -> Option<(&'static str, String, String)> {
        if self.num_nodes != other.num_nodes {
            return Some((
                "num_nodes",
                self.num_nodes.to_string(),
                other.num_nodes.to_string(),
            ));
        }
        if self.num_metrics != other.num_metrics {
            return Some((
                "num_metrics",
                self.num_metrics.to_string(),
                other.num_metrics.to_string(),
            ));
        }
        if self.tag != other.tag {
            return Some(("tag", self.tag_lossy(), other.tag_lossy()));
        }
        if self.version != other.version {
            return Some(("version", self.version_lossy(), other.version_lossy()));
        }
        None
    }
}

/// Raw per-process values, indexed `[metric][node][process]`.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricMatrix {
    num_metrics: usize,
    num_nodes: usize,
    num_pes: usize,
    values: Vec<f64>,
}

impl MetricMatrix {
    pub fn new(num_metrics: usize, num_nodes: usize, num_pes: usize) -> Self {
        Self {
            num_metrics,
            num_nodes,
            num_pes,
            values: vec![0.0; num_metrics * num_nodes * num_pes],
        }
    }

    fn offset(&self, metric: usize, node: usize) -> usize {
        (metric * self.num_nodes + node) * self.num_pes
    }

    pub fn get(&self, metric: usize, node: usize, pe: usize) -> f64 {
        self.values[self.offset(metric, node) + pe]
    }

    pub fn set(&mut self, metric: usize, node: usize, pe: usize, value: f64) {
        let at = self.offset(metric, node) + pe;
        self.values[at] = value;
    }

    /// Values of one `(metric, node)` cell across every process.
    pub fn across_processes(&self, metric: usize, node: usize) -> &[f64] {
        let start = self.offset(metric, node);
        &self.values[start..start + self.num_pes]
    }

    /// Fill process column `pe` from one file's interleaved
    /// `(inclusive, exclusive)` payload.
    fn fill_process(&mut self, pe: usize, payload: &[f64]) {
        for (node, pair) in payload.chunks_exact(self.num_metrics).enumerate() {
            for (metric, value) in pair.iter().enumerate() {
                self.set(metric, node, pe, *value);
            }
        }
    }

    pub fn num_metrics(&self) -> usize {
        self.num_metrics
    }

    pub fn num_nodes(&self) -> usize {
        self.num_nodes
    }

    pub fn num_pes(&self) -> usize {
        self.num_pes
    }
}

/// Min/avg/max of every `(metric, node)` cell over all processes.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateMatrix {
    num_metrics: usize,
    num_nodes: usize,
    min: Vec<f64>,
    avg: Vec<f64>,
    max: Vec<f64>,
}

impl AggregateMatrix {
    pub fn from_matrix(matrix: &MetricMatrix) -> Self {
        let cells = matrix.num_metrics * matrix.num_nodes;
        let mut min = Vec::with_capacity(cells);
        let mut avg = Vec::with_capacity(cells);
        let mut max = Vec::with_capacity(cells);

        for metric in 0..matrix.num_metrics {
            for node in 0..matrix.num_nodes {
                let values = matrix.across_processes(metric, node);
                let lo = values.iter().copied().fold(f64::INFINITY, f64::min);
                let hi = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                // Running mean; a plain sum can overflow for large finite values.
                let mean = values
                    .iter()
                    .enumerate()
                    .fold(0.0, |acc, (k, v)| acc + (v - acc) / (k + 1) as f64);
                min.push(lo);
                // Rounding can push the mean a ulp outside the range.
                avg.push(mean.clamp(lo, hi));
                max.push(hi);
            }
        }

        Self {
            num_metrics: matrix.num_metrics,
            num_nodes: matrix.num_nodes,
            min,
            avg,
            max,
        }
    }

    fn index(&self, metric: usize, node: usize) -> usize {
        metric * self.num_nodes + node
    }

    pub fn min(&self, metric: usize, node: usize) -> f64 {
        self.min[self.index(metric, node)]
    }

    pub fn avg(&self, metric: usize, node: usize) -> f64 {
        self.avg[self.index(metric, node)]
    }

    pub fn max(&self, metric: usize, node: usize) -> f64 {
        self.max[self.index(metric, node)]
    }

    /// `[min, avg, max]` per metric for the node at zero-based `node`.
    pub fn node_metrics(&self, node: usize) -> Vec<[f64; 3]> {
        (0..self.num_metrics)
            .map(|m| [self.min(m, node), self.avg(m, node), self.max(m, node)])
            .collect()
    }

    pub fn num_metrics(&self) -> usize {
        self.num_metrics
    }

    pub fn num_nodes(&self) -> usize {
        self.num_nodes
    }
}

/// All metric files of one run, decoded and aggregated.
#[derive(Debug, Clone)]
pub struct MetricDatabase {
    pub header: MetricDbHeader,
    /// Metric files in process order.
    pub files: Vec<PathBuf>,
    pub matrix: MetricMatrix,
    pub aggregate: AggregateMatrix,
}

impl MetricDatabase {
    pub fn read(dir: &Path, config: &ReaderConfig) -> Result<Self, MetricDbError> {
        let files = discover_metric_files(dir, &config.metric_suffix)?;

        let mut columns = ProcessColumns::new(&files);
        if config.parallel {
            let decoded: Vec<Result<Decoded, MetricDbError>> =
                files.par_iter().map(|p| read_metric_file(p)).collect();
            for (pe, result) in decoded.into_iter().enumerate() {
                columns.push(pe, result?)?;
            }
        } else {
            for (pe, path) in files.iter().enumerate() {
                columns.push(pe, read_metric_file(path)?)?;
            }
        }
        let (header, matrix) = columns.finish().ok_or_else(|| MetricDbError::NoMetricFiles {
            dir: dir.to_path_buf(),
            suffix: config.metric_suffix.clone(),
        })?;

        let aggregate = AggregateMatrix::from_matrix(&matrix);
        debug!(
            processes = files.len(),
            nodes = header.num_nodes,
            metrics = header.num_metrics,
            "aggregated metric database"
        );

        Ok(Self {
            header,
            files,
            matrix,
            aggregate,
        })
    }

    pub fn num_nodes(&self) -> usize {
        self.header.num_nodes
    }

    pub fn num_metrics(&self) -> usize {
        self.header.num_metrics
    }

    pub fn num_pes(&self) -> usize {
        self.files.len()
    }
}

/// Places decoded files into the matrix in process order, checking each
/// header against the first one.
struct ProcessColumns<'a> {
    files: &'a [PathBuf],
    first: Option<(MetricDbHeader, MetricMatrix)>,
}

impl<'a> ProcessColumns<'a> {
    fn new(files: &'a [PathBuf]) -> Self {
        Self { files, first: None }
    }

    fn push(&mut self, pe: usize, (header, payload): Decoded) -> Result<(), MetricDbError> {
        match &mut self.first {
            None => {
                let mut matrix =
                    MetricMatrix::new(header.num_metrics, header.num_nodes, self.files.len());
                matrix.fill_process(pe, &payload);
                self.first = Some((header, matrix));
            }
            Some((first, matrix)) => {
                if let Some((field, expected, found)) = first.mismatch(&header) {
                    return Err(MetricDbError::HeaderMismatch {
                        path: self.files[pe].clone(),
                        first: self.files[0].clone(),
                        field,
                        expected,
                        found,
                    });
                }
                matrix.fill_process(pe, &payload);
            }
        }
        Ok(())
    }

    fn finish(self) -> Option<(MetricDbHeader, MetricMatrix)> {
        self.first
    }
}

/// Metric files directly inside `dir`, sorted by file name so that process
/// indices are stable.
pub fn discover_metric_files(dir: &Path, suffix: &str) -> Result<Vec<PathBuf>, MetricDbError> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(io_error(dir))? {
        let path = entry.map_err(io_error(dir))?.path();
        let matches = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.ends_with(suffix));
        if matches && path.is_file() {
            files.push(path);
        }
    }
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));

    if files.is_empty() {
        return Err(MetricDbError::NoMetricFiles {
            dir: dir.to_path_buf(),
            suffix: suffix.to_string(),
        });
    }
    Ok(files)
}

/// A file's header and its interleaved `(inclusive, exclusive)` payload.
pub type Decoded = (MetricDbHeader, Vec<f64>);

/// Decode one metric file. The file is closed before this returns.
pub fn read_metric_file(path: &Path) -> Result<Decoded, MetricDbError> {
    let file = File::open(path).map_err(io_error(path))?;
    let file_len = file.metadata().map_err(io_error(path))?.len();
    let mut reader = BufReader::new(file);
    let header = MetricDbHeader::read_from(&mut reader, path)?;

    let expected = header.payload_len();
    let truncated = || MetricDbError::Truncated {
        path: path.to_path_buf(),
        expected,
    };
    // Checked before allocating so a corrupt node count cannot request
    // an enormous buffer.
    let needed = HEADER_LEN + (expected as u64) * 8;
    if file_len < needed {
        return Err(truncated());
    }

    let mut payload = vec![0.0; expected];
    reader
        .read_f64_into::<BigEndian>(&mut payload)
        .map_err(|source| {
            if source.kind() == io::ErrorKind::UnexpectedEof {
                truncated()
            } else {
                MetricDbError::Io {
                    path: path.to_path_buf(),
                    source,
                }
            }
        })?;

    if let Some((i, value)) = payload
        .iter()
        .enumerate()
        .find(|(_, v)| !v.is_finite() || **v < 0.0)
    {
        return Err(MetricDbError::InvalidValue {
            path: path.to_path_buf(),
            node: i / header.num_metrics + 1,
            metric: i % header.num_metrics,
            value: *value,
        });
    }

    debug!(path = %path.display(), nodes = header.num_nodes, "read metric file");
    Ok((header, payload))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Encode a metric file with the given flag and `(inclusive, exclusive)`
    /// pairs.
    fn encode(flag: u8, num_nodes: i32, num_metrics: i32, pairs: &[(f64, f64)]) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"HPCPROF-metricdb__");
        bytes.extend_from_slice(b"01.00");
        bytes.push(flag);
        bytes.extend_from_slice(&num_nodes.to_be_bytes());
        bytes.extend_from_slice(&num_metrics.to_be_bytes());
        for (incl, excl) in pairs {
            bytes.extend_from_slice(&incl.to_be_bytes());
            bytes.extend_from_slice(&excl.to_be_bytes());
        }
        bytes
    }

    fn write(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, bytes).unwrap();
        path
    }

    #[test]
    fn header_fields_are_big_endian() {
        let bytes = encode(b'b', 3, 2, &[]);
        assert_eq!(bytes.len() as u64, HEADER_LEN);
        let header = MetricDbHeader::read_from(&mut bytes.as_slice(), Path::new("t")).unwrap();
        assert_eq!(header.num_nodes, 3);
        assert_eq!(header.num_metrics, 2);
        assert_eq!(header.tag_lossy(), "HPCPROF-metricdb__");
        assert_eq!(header.version_lossy(), "01.00");
    }

    #[test]
    fn little_endian_flag_is_unsupported() {
        let bytes = encode(b'l', 3, 2, &[]);
        let err = MetricDbHeader::read_from(&mut bytes.as_slice(), Path::new("t")).unwrap_err();
        assert!(matches!(
            err,
            MetricDbError::UnsupportedEndianness { flag: b'l', .. }
        ));
    }

    #[test]
    fn only_two_metrics_are_supported() {
        let bytes = encode(b'b', 3, 4, &[]);
        let err = MetricDbHeader::read_from(&mut bytes.as_slice(), Path::new("t")).unwrap_err();
        assert!(matches!(err, MetricDbError::InvalidHeader { .. }));
    }

    #[test]
    fn non_positive_node_count_is_rejected() {
        let bytes = encode(b'b', -1, 2, &[]);
        let err = MetricDbHeader::read_from(&mut bytes.as_slice(), Path::new("t")).unwrap_err();
        assert!(matches!(err, MetricDbError::InvalidHeader { .. }));
    }

    #[test]
    fn short_header_is_rejected() {
        let bytes = encode(b'b', 3, 2, &[]);
        let err = MetricDbHeader::read_from(&mut &bytes[..20], Path::new("t")).unwrap_err();
        assert!(matches!(err, MetricDbError::InvalidHeader { .. }));
    }

    #[test]
    fn truncated_payload_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "0.metric-db", &encode(b'b', 3, 2, &[(1.0, 1.0)]));
        let err = read_metric_file(&path).unwrap_err();
        assert!(matches!(err, MetricDbError::Truncated { expected: 6, .. }));
    }

    #[test]
    fn negative_value_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "0.metric-db",
            &encode(b'b', 2, 2, &[(1.0, 1.0), (2.0, -0.5)]),
        );
        let err = read_metric_file(&path).unwrap_err();
        assert!(matches!(
            err,
            MetricDbError::InvalidValue {
                node: 2,
                metric: EXCLUSIVE,
                ..
            }
        ));
    }

    #[test]
    fn non_finite_value_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        for bad in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let path = write(dir.path(), "0.metric-db", &encode(b'b', 1, 2, &[(bad, 0.0)]));
            let err = read_metric_file(&path).unwrap_err();
            assert!(
                matches!(
                    err,
                    MetricDbError::InvalidValue {
                        node: 1,
                        metric: INCLUSIVE,
                        ..
                    }
                ),
                "{bad} accepted"
            );
        }
    }

    #[test]
    fn aggregates_across_processes_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "b.metric-db", &encode(b'b', 2, 2, &[(4.0, 2.0), (9.0, 0.0)]));
        write(dir.path(), "a.metric-db", &encode(b'b', 2, 2, &[(2.0, 1.0), (3.0, 3.0)]));
        write(dir.path(), "notes.txt", b"ignored");

        for parallel in [true, false] {
            let config = ReaderConfig::default().with_parallel(parallel);
            let db = MetricDatabase::read(dir.path(), &config).unwrap();
            assert_eq!(db.num_pes(), 2);
            assert!(db.files[0].ends_with("a.metric-db"));

            assert_eq!(db.matrix.get(INCLUSIVE, 0, 0), 2.0);
            assert_eq!(db.matrix.get(INCLUSIVE, 0, 1), 4.0);
            assert_eq!(db.matrix.get(EXCLUSIVE, 1, 0), 3.0);

            let agg = &db.aggregate;
            assert_eq!(agg.min(INCLUSIVE, 0), 2.0);
            assert_eq!(agg.avg(INCLUSIVE, 0), 3.0);
            assert_eq!(agg.max(INCLUSIVE, 0), 4.0);
            assert_eq!(agg.node_metrics(1), vec![[3.0, 6.0, 9.0], [0.0, 1.5, 3.0]]);
        }
    }

    #[test]
    fn mismatched_node_counts_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.metric-db", &encode(b'b', 1, 2, &[(1.0, 1.0)]));
        write(dir.path(), "b.metric-db", &encode(b'b', 2, 2, &[(1.0, 1.0), (1.0, 1.0)]));

        let err = MetricDatabase::read(dir.path(), &ReaderConfig::default()).unwrap_err();
        assert!(matches!(
            err,
            MetricDbError::HeaderMismatch {
                field: "num_nodes",
                ..
            }
        ));
    }

    #[test]
    fn mismatched_tag_or_version_is_rejected() {
        let first = encode(b'b', 1, 2, &[(1.0, 1.0)]);
        for (offset, field) in [(0, "tag"), (TAG_LEN, "version")] {
            let dir = tempfile::tempdir().unwrap();
            let mut other = first.clone();
            other[offset] = b'X';
            write(dir.path(), "a.metric-db", &first);
            write(dir.path(), "b.metric-db", &other);

            for parallel in [true, false] {
                let config = ReaderConfig::default().with_parallel(parallel);
                let err = MetricDatabase::read(dir.path(), &config).unwrap_err();
                assert!(
                    matches!(err, MetricDbError::HeaderMismatch { field: f, .. } if f == field),
                    "expected {field} mismatch"
                );
            }
        }
    }

    #[test]
    fn sequential_read_stops_at_first_bad_file() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.metric-db", &encode(b'b', 3, 2, &[(1.0, 1.0)]));
        write(dir.path(), "b.metric-db", &encode(b'l', 3, 2, &[]));

        let config = ReaderConfig::default().with_parallel(false);
        let err = MetricDatabase::read(dir.path(), &config).unwrap_err();
        match err {
            MetricDbError::Truncated { path, .. } => assert!(path.ends_with("a.metric-db")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn empty_directory_has_no_metric_files() {
        let dir = tempfile::tempdir().unwrap();
        let err = MetricDatabase::read(dir.path(), &ReaderConfig::default()).unwrap_err();
        assert!(matches!(err, MetricDbError::NoMetricFiles { .. }));
    }

    #[test]
    fn mean_stays_within_range() {
        let mut matrix = MetricMatrix::new(1, 1, 3);
        for pe in 0..3 {
            matrix.set(0, 0, pe, 0.1);
        }
        let agg = AggregateMatrix::from_matrix(&matrix);
        assert!(agg.min(0, 0) <= agg.avg(0, 0));
        assert!(agg.avg(0, 0) <= agg.max(0, 0));
    }

    #[test]
    fn mean_of_huge_values_stays_finite() {
        let mut matrix = MetricMatrix::new(1, 1, 2);
        matrix.set(0, 0, 0, f64::MAX);
        matrix.set(0, 0, 1, f64::MAX / 2.0);
        let agg = AggregateMatrix::from_matrix(&matrix);
        let avg = agg.avg(0, 0);
        assert!(avg.is_finite());
        assert!(avg > f64::MAX / 2.0 && avg < f64::MAX);

        let mut same = MetricMatrix::new(1, 1, 3);
        for pe in 0..3 {
            same.set(0, 0, pe, f64::MAX);
        }
        assert_eq!(AggregateMatrix::from_matrix(&same).avg(0, 0), f64::MAX);
    }
}
