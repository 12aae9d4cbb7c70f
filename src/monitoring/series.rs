//! Sample Series Persistence
//!
//! Append-only CSV log of sampling ticks. Every record is flushed as
//! soon as it is written, so a crash loses at most the tick in flight.
//!
//! # Format
//!
//! ```text
//! timestamp_ms,cpu_time_usec,cpu_percent,mem_bytes
//! 1718000000000,1500000,12.50,73400320
//! ```

use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{AnalysisError, MonitorError};

/// Header row of every series file.
pub const SERIES_HEADER: &str = "timestamp_ms,cpu_time_usec,cpu_percent,mem_bytes";

/// Column name used by older series files for the CPU time counter.
const LEGACY_CPU_COLUMN: &str = "cpu_usage_usec";

/// One observation of the accounting group.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Wall-clock time of the tick, milliseconds since the Unix epoch
    pub timestamp_ms: i64,
    /// Cumulative CPU time of the group, in microseconds
    pub cpu_time_usec: u64,
    /// CPU utilisation since the previous tick, normalised by logical CPUs
    pub cpu_percent: f64,
    /// Memory charged to the group, in bytes
    pub mem_bytes: u64,
}

impl Sample {
    /// Renders the sample as one CSV record (without newline).
    pub fn to_record(&self) -> String {
        format!(
            "{},{},{:.2},{}",
            self.timestamp_ms, self.cpu_time_usec, self.cpu_percent, self.mem_bytes
        )
    }

    pub fn mem_mib(&self) -> f64 {
        self.mem_bytes as f64 / (1024.0 * 1024.0)
    }
}

/// Writes samples to a durable sink, one flushed line per record.
pub struct SeriesWriter<W: Write> {
    sink: W,
    path: PathBuf,
    records: u64,
}

impl SeriesWriter<File> {
    /// Creates (or truncates) the series file and writes the header.
    ///
    /// Parent directories are created as needed.
    pub fn create(path: impl AsRef<Path>) -> Result<Self, MonitorError> {
        let path = path.as_ref();
        let sink_error = |source: io::Error| MonitorError::SinkWriteFailure {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(sink_error)?;
        }
        let file = File::create(path).map_err(sink_error)?;
        SeriesWriter::new(file, path)
    }
}

impl<W: Write> SeriesWriter<W> {
    /// Wraps an arbitrary sink; `path` is only used in error messages.
    pub fn new(sink: W, path: impl Into<PathBuf>) -> Result<Self, MonitorError> {
        let mut writer = Self {
            sink,
            path: path.into(),
            records: 0,
        };
        writer.write_line(SERIES_HEADER)?;
        Ok(writer)
    }

    /// Appends one sample and flushes it.
    pub fn append(&mut self, sample: &Sample) -> Result<(), MonitorError> {
        self.write_line(&sample.to_record())?;
        self.records += 1;
        Ok(())
    }

    fn write_line(&mut self, line: &str) -> Result<(), MonitorError> {
        self.sink
            .write_all(format!("{}\n", line).as_bytes())
            .and_then(|()| self.sink.flush())
            .map_err(|source| MonitorError::SinkWriteFailure {
                path: self.path.clone(),
                source,
            })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of samples written so far (header excluded).
    pub fn records(&self) -> u64 {
        self.records
    }

    pub fn into_inner(self) -> W {
        self.sink
    }
}

/// Column positions resolved from a header row.
struct Columns {
    timestamp: usize,
    cpu_time: usize,
    cpu_percent: usize,
    mem: usize,
}

impl Columns {
    fn from_header(header: &str, path: &Path) -> Result<Self, AnalysisError> {
        let names: Vec<&str> = header
            .trim_start_matches('\u{feff}')
            .split(',')
            .map(str::trim)
            .collect();
        let timestamp = position(&names, &["timestamp_ms"]);
        let cpu_time = position(&names, &["cpu_time_usec", LEGACY_CPU_COLUMN]);
        let cpu_percent = position(&names, &["cpu_percent"]);
        let mem = position(&names, &["mem_bytes"]);

        match (timestamp, cpu_time, cpu_percent, mem) {
            (Some(timestamp), Some(cpu_time), Some(cpu_percent), Some(mem)) => Ok(Self {
                timestamp,
                cpu_time,
                cpu_percent,
                mem,
            }),
            _ => {
                let missing = [
                    ("timestamp_ms", timestamp),
                    ("cpu_time_usec", cpu_time),
                    ("cpu_percent", cpu_percent),
                    ("mem_bytes", mem),
                ]
                .iter()
                .filter(|(_, pos)| pos.is_none())
                .map(|(name, _)| name.to_string())
                .collect();
                Err(AnalysisError::MissingColumns {
                    path: path.to_path_buf(),
                    missing,
                })
            }
        }
    }
}

fn position(names: &[&str], wanted: &[&str]) -> Option<usize> {
    names.iter().position(|n| wanted.contains(n))
}

/// Reads a series file back into memory.
///
/// Columns are located by header name, so files written with the
/// legacy `cpu_usage_usec` header are accepted too. Blank lines are
/// ignored.
pub fn read_series(path: impl AsRef<Path>) -> Result<Vec<Sample>, AnalysisError> {
    let path = path.as_ref();
    let io_error = |source: io::Error| AnalysisError::Io {
        path: path.to_path_buf(),
        source,
    };

    let file = File::open(path).map_err(io_error)?;
    let mut lines = BufReader::new(file).lines();

    let header = match lines.next() {
        Some(line) => line.map_err(io_error)?,
        None => {
            return Err(AnalysisError::MissingColumns {
                path: path.to_path_buf(),
                missing: SERIES_HEADER.split(',').map(str::to_string).collect(),
            })
        }
    };
    let columns = Columns::from_header(&header, path)?;

    let mut samples = Vec::new();
    for (index, line) in lines.enumerate() {
        let line = line.map_err(io_error)?;
        if line.trim().is_empty() {
            continue;
        }
        // Header is line 1
        let line_no = index + 2;
        samples.push(parse_record(&line, &columns, path, line_no)?);
    }

    Ok(samples)
}

fn parse_record(
    line: &str,
    columns: &Columns,
    path: &Path,
    line_no: usize,
) -> Result<Sample, AnalysisError> {
    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    let malformed = |reason: String| AnalysisError::MalformedRecord {
        path: path.to_path_buf(),
        line: line_no,
        reason,
    };

    let field = |index: usize, name: &str| {
        fields
            .get(index)
            .copied()
            .ok_or_else(|| malformed(format!("missing field '{}'", name)))
    };

    let timestamp_ms = field(columns.timestamp, "timestamp_ms")?
        .parse::<i64>()
        .map_err(|e| malformed(format!("timestamp_ms: {}", e)))?;
    let cpu_time_usec = field(columns.cpu_time, "cpu_time_usec")?
        .parse::<u64>()
        .map_err(|e| malformed(format!("cpu_time_usec: {}", e)))?;
    let cpu_percent = field(columns.cpu_percent, "cpu_percent")?
        .parse::<f64>()
        .map_err(|e| malformed(format!("cpu_percent: {}", e)))?;
    let mem_bytes = field(columns.mem, "mem_bytes")?
        .parse::<u64>()
        .map_err(|e| malformed(format!("mem_bytes: {}", e)))?;

    Ok(Sample {
        timestamp_ms,
        cpu_time_usec,
        cpu_percent,
        mem_bytes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample(ts: i64, cpu: u64, pct: f64, mem: u64) -> Sample {
        Sample {
            timestamp_ms: ts,
            cpu_time_usec: cpu,
            cpu_percent: pct,
            mem_bytes: mem,
        }
    }

    /// Sink that accepts a fixed number of writes, then fails.
    struct FailingSink {
        remaining: usize,
    }

    impl Write for FailingSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.remaining == 0 {
                return Err(io::Error::new(io::ErrorKind::Other, "disk full"));
            }
            self.remaining -= 1;
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_record_format() {
        let s = sample(1_718_000_000_000, 1_500_000, 12.5, 73_400_320);
        assert_eq!(s.to_record(), "1718000000000,1500000,12.50,73400320");
    }

    #[test]
    fn test_record_rounds_to_two_decimals() {
        let s = sample(1, 2, 33.33333, 4);
        assert_eq!(s.to_record(), "1,2,33.33,4");
    }

    #[test]
    fn test_writer_emits_header_and_records() {
        let mut writer = SeriesWriter::new(Vec::new(), "mem.csv").unwrap();
        writer.append(&sample(1, 10, 0.0, 100)).unwrap();
        writer.append(&sample(2, 20, 1.25, 200)).unwrap();
        assert_eq!(writer.records(), 2);

        let out = String::from_utf8(writer.into_inner()).unwrap();
        assert_eq!(
            out,
            "timestamp_ms,cpu_time_usec,cpu_percent,mem_bytes\n1,10,0.00,100\n2,20,1.25,200\n"
        );
    }

    #[test]
    fn test_writer_failure_is_sink_error() {
        let mut writer = SeriesWriter::new(FailingSink { remaining: 1 }, "broken.csv").unwrap();
        let result = writer.append(&sample(1, 1, 1.0, 1));
        assert!(matches!(result, Err(MonitorError::SinkWriteFailure { .. })));
        assert_eq!(writer.records(), 0);
    }

    #[test]
    fn test_create_makes_parent_dirs() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("server_metrics").join("run.csv");

        let writer = SeriesWriter::create(&path).unwrap();
        drop(writer);

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content, format!("{}\n", SERIES_HEADER));
    }

    #[test]
    fn test_records_survive_without_close() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("run.csv");

        let mut writer = SeriesWriter::create(&path).unwrap();
        writer.append(&sample(5, 6, 7.0, 8)).unwrap();

        // Visible on disk while the writer is still open
        let samples = read_series(&path).unwrap();
        assert_eq!(samples, vec![sample(5, 6, 7.0, 8)]);
    }

    #[test]
    fn test_read_series_legacy_header() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("legacy.csv");
        fs::write(
            &path,
            "timestamp_ms,cpu_usage_usec,cpu_percent,mem_bytes\n100,5,0.50,1024\n\n200,9,0.40,2048\n",
        )
        .unwrap();

        let samples = read_series(&path).unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[1], sample(200, 9, 0.4, 2048));
    }

    #[test]
    fn test_read_series_reordered_columns() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("reordered.csv");
        fs::write(&path, "mem_bytes,cpu_percent,cpu_time_usec,timestamp_ms\n1,2.5,3,4\n").unwrap();

        assert_eq!(read_series(&path).unwrap(), vec![sample(4, 3, 2.5, 1)]);
    }

    #[test]
    fn test_read_series_missing_columns() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.csv");
        fs::write(&path, "timestamp_ms,mem_bytes\n1,2\n").unwrap();

        match read_series(&path) {
            Err(AnalysisError::MissingColumns { missing, .. }) => {
                assert_eq!(missing, vec!["cpu_time_usec", "cpu_percent"]);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_read_series_malformed_line() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.csv");
        fs::write(&path, format!("{}\n1,2,3.0,4\n1,x,3.0,4\n", SERIES_HEADER)).unwrap();

        match read_series(&path) {
            Err(AnalysisError::MalformedRecord { line, .. }) => assert_eq!(line, 3),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_read_series_header_only() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.csv");
        fs::write(&path, format!("{}\n", SERIES_HEADER)).unwrap();

        assert!(read_series(&path).unwrap().is_empty());
    }

    #[test]
    fn test_mem_mib() {
        assert_eq!(sample(0, 0, 0.0, 3 * 1024 * 1024).mem_mib(), 3.0);
    }
}
