//! Persisted per-node, per-flow logs (§6 "Persisted state"). Writing to
//! disk is an external concern the core only describes through a trait, so
//! a simulation can swap in an in-memory sink for tests.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::face::{Duration, Time};

/// One sample the flow controller recorded for a (node, flow) pair.
pub trait LogSink {
    fn record_rto(&mut self, node: &str, flow: &str, t: Time, rto: Duration);

    fn record_rtt(
        &mut self,
        node: &str,
        flow: &str,
        t: Time,
        seq: u64,
        ecn: bool,
        threshold: Duration,
        rtt: Duration,
    );

    fn record_window(&mut self, node: &str, flow: &str, t: Time, cwnd: f64);

    fn record_aggregation_time(&mut self, node: &str, t: Time, agg_time: Duration);

    fn record_throughput(
        &mut self,
        interest_bytes: u64,
        data_bytes: u64,
        fan_in: usize,
        t_start: Time,
        t_end: Time,
    );
}

/// Discards every record; useful for unit tests that only care about the
/// in-memory state machines.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullLogSink;

impl LogSink for NullLogSink {
    fn record_rto(&mut self, _node: &str, _flow: &str, _t: Time, _rto: Duration) {}

    fn record_rtt(
        &mut self,
        _node: &str,
        _flow: &str,
        _t: Time,
        _seq: u64,
        _ecn: bool,
        _threshold: Duration,
        _rtt: Duration,
    ) {
    }

    fn record_window(&mut self, _node: &str, _flow: &str, _t: Time, _cwnd: f64) {}

    fn record_aggregation_time(&mut self, _node: &str, _t: Time, _agg_time: Duration) {}

    fn record_throughput(
        &mut self,
        _interest_bytes: u64,
        _data_bytes: u64,
        _fan_in: usize,
        _t_start: Time,
        _t_end: Time,
    ) {
    }
}

/// Appends one line per record to `<node>_RTO_<flow>.txt`-style files under
/// a run directory, created lazily and kept open for the run's lifetime.
#[derive(Debug)]
pub struct FileLogSink {
    dir: PathBuf,
    throughput: File,
}

impl FileLogSink {
    /// Creates `dir` (and any missing parents) and opens `throughput.txt`
    /// empty, matching "files are created empty on initialization sync".
    pub fn new(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        let throughput = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(dir.join("throughput.txt"))?;
        Ok(Self { dir, throughput })
    }

    fn open_append(&self, file_name: impl AsRef<Path>) -> io::Result<File> {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.dir.join(file_name))
    }
}

impl LogSink for FileLogSink {
    fn record_rto(&mut self, node: &str, flow: &str, t: Time, rto: Duration) {
        if let Ok(mut f) = self.open_append(format!("{node}_RTO_{flow}.txt")) {
            let _ = writeln!(f, "{t} {rto}");
        }
    }

    fn record_rtt(
        &mut self,
        node: &str,
        flow: &str,
        t: Time,
        seq: u64,
        ecn: bool,
        threshold: Duration,
        rtt: Duration,
    ) {
        if let Ok(mut f) = self.open_append(format!("{node}_RTT_{flow}.txt")) {
            let _ = writeln!(f, "{t} {seq} {} {threshold} {rtt}", ecn as u8);
        }
    }

    fn record_window(&mut self, node: &str, flow: &str, t: Time, cwnd: f64) {
        if let Ok(mut f) = self.open_append(format!("{node}_window_{flow}.txt")) {
            let _ = writeln!(f, "{t} {cwnd}");
        }
    }

    fn record_aggregation_time(&mut self, node: &str, t: Time, agg_time: Duration) {
        if let Ok(mut f) = self.open_append(format!("{node}_aggregationTime.txt")) {
            let _ = writeln!(f, "{t} {agg_time}");
        }
    }

    fn record_throughput(
        &mut self,
        interest_bytes: u64,
        data_bytes: u64,
        fan_in: usize,
        t_start: Time,
        t_end: Time,
    ) {
        let _ = writeln!(
            self.throughput,
            "{interest_bytes} {data_bytes} {fan_in} {t_start} {t_end}"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_sink_creates_the_run_directory_and_throughput_file() {
        let dir = std::env::temp_dir().join(format!("cfnagg-logsink-test-{}", std::process::id()));
        let mut sink = FileLogSink::new(&dir).unwrap();
        sink.record_throughput(100, 200, 2, 0, 1_000);
        sink.record_rto("agg0", "p0", 10, 500);

        let throughput = fs::read_to_string(dir.join("throughput.txt")).unwrap();
        assert_eq!(throughput.trim(), "100 200 2 0 1000");

        let rto = fs::read_to_string(dir.join("agg0_RTO_p0.txt")).unwrap();
        assert_eq!(rto.trim(), "10 500");

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn null_sink_accepts_every_call_without_panicking() {
        let mut sink = NullLogSink;
        sink.record_rto("a", "b", 0, 0);
        sink.record_rtt("a", "b", 0, 0, false, 0, 0);
        sink.record_window("a", "b", 0, 1.0);
        sink.record_aggregation_time("a", 0, 0);
        sink.record_throughput(0, 0, 0, 0, 0);
    }
}
