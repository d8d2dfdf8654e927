//! File-backed persistence collaborator.
//!
//! `load_graph` parses the layout file. `save_tick_result` appends one JSON
//! line per tick report and one per telemetry entry, then flushes, so a
//! committed tick is on disk before the next one starts. Each output
//! remembers the last tick it holds, so a tick the engine rolls back and
//! runs again never appears twice.

use crate::loader::{self, DataLoadError};
use flowsim_core::fixed::Ticks;
use flowsim_core::layout::PlantLayout;
use flowsim_core::persistence::{PersistError, Persistence};
use flowsim_core::sim::TickReport;
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// A JSON-lines output and the last tick it holds completely.
struct LineSink {
    out: Box<dyn Write + Send>,
    written_through: Option<Ticks>,
}

impl LineSink {
    fn new(out: Box<dyn Write + Send>) -> Self {
        Self {
            out,
            written_through: None,
        }
    }

    /// Append `lines` for `tick` unless this sink already holds that tick.
    /// A tick retried after a rollback is only written where it is missing.
    fn append(&mut self, tick: Ticks, lines: &[u8]) -> Result<(), PersistError> {
        if self.written_through.is_some_and(|t| t >= tick) {
            return Ok(());
        }
        self.out.write_all(lines)?;
        self.out.flush()?;
        self.written_through = Some(tick);
        Ok(())
    }
}

pub struct FileStore {
    layout_path: PathBuf,
    reports: Option<LineSink>,
    telemetry: Option<LineSink>,
    ticks_written: u64,
}

impl std::fmt::Debug for FileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStore")
            .field("layout_path", &self.layout_path)
            .field("reports", &self.reports.is_some())
            .field("telemetry", &self.telemetry.is_some())
            .field("ticks_written", &self.ticks_written)
            .finish()
    }
}

fn open_append(path: &Path) -> Result<Box<dyn Write + Send>, std::io::Error> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(Box::new(BufWriter::new(file)))
}

fn encode_line(buf: &mut Vec<u8>, value: &impl Serialize) -> Result<(), PersistError> {
    serde_json::to_writer(&mut *buf, value).map_err(|e| PersistError::Encode(e.to_string()))?;
    buf.push(b'\n');
    Ok(())
}

impl FileStore {
    /// Open a store for a layout file. Fails early on an unsupported format.
    pub fn open(layout_path: impl Into<PathBuf>) -> Result<Self, DataLoadError> {
        let layout_path = layout_path.into();
        loader::detect_format(&layout_path)?;
        Ok(Self {
            layout_path,
            reports: None,
            telemetry: None,
            ticks_written: 0,
        })
    }

    /// Append tick reports to `path` as JSON lines.
    pub fn with_report_file(self, path: &Path) -> Result<Self, std::io::Error> {
        Ok(self.with_report_writer(open_append(path)?))
    }

    /// Append telemetry entries to `path` as JSON lines.
    pub fn with_telemetry_file(self, path: &Path) -> Result<Self, std::io::Error> {
        Ok(self.with_telemetry_writer(open_append(path)?))
    }

    /// Append tick reports to any writer.
    pub fn with_report_writer(mut self, out: Box<dyn Write + Send>) -> Self {
        self.reports = Some(LineSink::new(out));
        self
    }

    /// Append telemetry entries to any writer.
    pub fn with_telemetry_writer(mut self, out: Box<dyn Write + Send>) -> Self {
        self.telemetry = Some(LineSink::new(out));
        self
    }

    pub fn layout_path(&self) -> &Path {
        &self.layout_path
    }

    pub fn ticks_written(&self) -> u64 {
        self.ticks_written
    }
}

impl Persistence for FileStore {
    fn load_graph(&mut self) -> Result<PlantLayout, PersistError> {
        loader::load_layout(&self.layout_path).map_err(|e| match e {
            DataLoadError::Io(io) => PersistError::Io(io),
            other => PersistError::Load(other.to_string()),
        })
    }

    fn save_tick_result(&mut self, report: &TickReport) -> Result<(), PersistError> {
        // Encode everything before touching either file.
        let mut report_line = Vec::new();
        if self.reports.is_some() {
            encode_line(&mut report_line, report)?;
        }
        let mut telemetry_lines = Vec::new();
        if self.telemetry.is_some() {
            for entry in &report.log_entries {
                encode_line(&mut telemetry_lines, entry)?;
            }
        }

        if let Some(sink) = self.reports.as_mut() {
            sink.append(report.tick, &report_line)?;
        }
        if let Some(sink) = self.telemetry.as_mut() {
            sink.append(report.tick, &telemetry_lines)?;
        }
        self.ticks_written += 1;
        debug!(
            tick = report.tick,
            entries = report.log_entries.len(),
            "tick flushed"
        );
        Ok(())
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use flowsim_core::sensor::{LogInputType, LogRecord, TelemetryLog};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    /// In-memory writer the test can read back.
    #[derive(Clone, Default)]
    struct Shared(Arc<Mutex<Vec<u8>>>);

    impl Shared {
        fn lines(&self) -> usize {
            self.0.lock().unwrap().iter().filter(|&&b| b == b'\n').count()
        }
    }

    impl Write for Shared {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    /// Fails every write while `broken` is set.
    struct Flaky {
        inner: Shared,
        broken: Arc<AtomicBool>,
    }

    impl Write for Flaky {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if self.broken.load(Ordering::SeqCst) {
                return Err(std::io::Error::other("disk full"));
            }
            self.inner.write(buf)
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn report_with_entries(tick: u64, count: usize) -> TickReport {
        let mut log = TelemetryLog::default();
        for _ in 0..count {
            log.append(LogRecord::new(LogInputType::Order), tick);
        }
        let mut report = TickReport::new(tick);
        report.log_entries = log.entries().to_vec();
        report
    }

    #[test]
    fn retried_tick_is_written_once() {
        let reports = Shared::default();
        let telemetry = Shared::default();
        let broken = Arc::new(AtomicBool::new(true));
        let mut store = FileStore::open("plant.json")
            .unwrap()
            .with_report_writer(Box::new(reports.clone()))
            .with_telemetry_writer(Box::new(Flaky {
                inner: telemetry.clone(),
                broken: broken.clone(),
            }));

        let report = report_with_entries(0, 2);
        assert!(matches!(store.save_tick_result(&report), Err(PersistError::Io(_))));
        assert_eq!(store.ticks_written(), 0);

        broken.store(false, Ordering::SeqCst);
        store.save_tick_result(&report).unwrap();
        assert_eq!(reports.lines(), 1);
        assert_eq!(telemetry.lines(), 2);

        store.save_tick_result(&report_with_entries(1, 1)).unwrap();
        assert_eq!(reports.lines(), 2);
        assert_eq!(telemetry.lines(), 3);
        assert_eq!(store.ticks_written(), 2);
    }

    #[test]
    fn open_rejects_unknown_extension() {
        assert!(matches!(
            FileStore::open("plant.yaml"),
            Err(DataLoadError::UnsupportedFormat { .. })
        ));
    }

    #[test]
    fn missing_layout_is_io_error() {
        let mut store = FileStore::open("/nonexistent/flowsim/plant.json").unwrap();
        assert!(matches!(store.load_graph(), Err(PersistError::Io(_))));
    }
}
