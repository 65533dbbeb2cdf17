use std::{
    fs::File,
    io::{self, BufWriter, Write},
    path::Path,
};

use log::warn;
use tokio::time::Duration;

use super::{RoundSummary, TelemetrySink};
use crate::WorkerId;

const HEADER: &str = "worker,round,latency_ns";

/// Writes every latency sample as a `worker,round,latency_ns` CSV line.
///
/// Lines are buffered and flushed once per round. The first write error is
/// logged and the sink goes quiet afterwards.
pub struct CsvSink<W: Write + Send> {
    out: W,
    failed: bool,
}

impl CsvSink<BufWriter<File>> {
    /// Creates (or truncates) the CSV file at `path`.
    pub fn create<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = File::create(path)?;
        Self::new(BufWriter::new(file))
    }
}

impl<W: Write + Send> CsvSink<W> {
    /// Creates a new `CsvSink` writing into `out`, the header line is written immediately.
    pub fn new(mut out: W) -> io::Result<Self> {
        writeln!(out, "{HEADER}")?;
        Ok(Self { out, failed: false })
    }

    /// Returns the inner writer.
    pub fn into_inner(self) -> W {
        self.out
    }

    fn guard(&mut self, res: io::Result<()>) {
        if let Err(e) = res {
            warn!("telemetry csv disabled after write error: {e}");
            self.failed = true;
        }
    }
}

impl<W: Write + Send> TelemetrySink for CsvSink<W> {
    fn record_latency(&mut self, round: u64, worker: WorkerId, latency: Duration) {
        if self.failed {
            return;
        }

        let res = writeln!(self.out, "{worker},{round},{}", latency.as_nanos());
        self.guard(res);
    }

    fn record_round(&mut self, _summary: &RoundSummary) {
        if self.failed {
            return;
        }

        let res = self.out.flush();
        self.guard(res);
    }
}
