use crate::analysis;
use crate::config::ReportConfig;
use crate::market_api::SnapshotSource;
use crate::report::{self, WriteError};
use log::{error, info, warn};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Fetch failed or returned nothing; the report was not touched.
    NoData,
    Written,
    /// The report file was held open elsewhere; this cycle's write was skipped.
    Locked,
    WriteFailed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub cycles: u64,
    pub written: u64,
    pub no_data: u64,
    pub locked: u64,
    pub write_failed: u64,
}

impl RunSummary {
    fn record(&mut self, outcome: CycleOutcome) {
        self.cycles += 1;
        match outcome {
            CycleOutcome::NoData => self.no_data += 1,
            CycleOutcome::Written => self.written += 1,
            CycleOutcome::Locked => self.locked += 1,
            CycleOutcome::WriteFailed => self.write_failed += 1,
        }
    }
}

pub struct Scheduler<S> {
    source: S,
    output_path: PathBuf,
    interval: Duration,
    top_n: usize,
    max_cycles: Option<u64>,
}

impl<S: SnapshotSource> Scheduler<S> {
    pub fn new(source: S, config: &ReportConfig) -> Self {
        Self {
            source,
            output_path: config.output_path.clone(),
            interval: config.interval,
            top_n: config.top_n,
            max_cycles: None,
        }
    }

    pub fn with_max_cycles(mut self, max_cycles: Option<u64>) -> Self {
        self.max_cycles = max_cycles;
        self
    }

    /// One fetch, analyze, render pass. Never fails: every error is logged
    /// and folded into the outcome.
    pub async fn run_cycle(&self) -> CycleOutcome {
        let snapshot = match self.source.fetch_snapshot().await {
            Ok(snapshot) if !snapshot.is_empty() => snapshot,
            Ok(_) => {
                warn!(
                    "No data fetched. Retrying in {}s",
                    self.interval.as_secs_f64()
                );
                return CycleOutcome::NoData;
            }
            Err(err) => {
                error!("Error fetching data: {}", err);
                warn!(
                    "No data fetched. Retrying in {}s",
                    self.interval.as_secs_f64()
                );
                return CycleOutcome::NoData;
            }
        };
        info!(
            "Fetched {} records (page {}) at {}",
            snapshot.len(),
            snapshot.page,
            snapshot.fetched_at.format("%Y-%m-%d %H:%M:%S UTC")
        );

        match analysis::analyze(&snapshot, self.top_n) {
            Ok(result) => {
                for line in result.summary_lines() {
                    info!("{}", line);
                }
            }
            Err(err) => error!("Analysis skipped: {}", err),
        }

        match report::render(&snapshot, &self.output_path) {
            Ok(()) => CycleOutcome::Written,
            Err(err @ WriteError::FileLocked { .. }) => {
                warn!("{}", err);
                CycleOutcome::Locked
            }
            Err(err) => {
                error!("Failed to write report: {}", err);
                CycleOutcome::WriteFailed
            }
        }
    }

    /// Runs cycles until `shutdown` flips to true or the cycle cap is hit.
    /// The wait is measured from the end of each cycle. A pending fetch or
    /// wait is abandoned on shutdown; a report write is not.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> RunSummary {
        let mut summary = RunSummary::default();
        info!(
            "Starting report loop: output {}, interval {}s",
            self.output_path.display(),
            self.interval.as_secs_f64()
        );

        loop {
            if *shutdown.borrow_and_update() {
                break;
            }

            let outcome = tokio::select! {
                outcome = self.run_cycle() => outcome,
                _ = wait_for_shutdown(&mut shutdown) => {
                    info!("Shutdown requested; abandoning in-flight cycle");
                    break;
                }
            };
            summary.record(outcome);

            if self.max_cycles.is_some_and(|max| summary.cycles >= max) {
                info!("Reached cycle limit ({})", summary.cycles);
                break;
            }

            info!(
                "Waiting {}s before the next update...",
                self.interval.as_secs_f64()
            );
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = wait_for_shutdown(&mut shutdown) => {
                    info!("Shutdown requested during wait");
                    break;
                }
            }
        }

        info!(
            "Report loop stopped after {} cycle(s): {} written, {} without data, {} locked, {} failed",
            summary.cycles,
            summary.written,
            summary.no_data,
            summary.locked,
            summary.write_failed
        );
        summary
    }
}

async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            // Sender gone: nobody can ask us to stop any more.
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_api::FetchError;
    use crate::models::{MarketRecord, MarketSnapshot};
    use reqwest::StatusCode;
    use std::collections::VecDeque;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    enum Reply {
        Empty,
        Fail,
        Records(Vec<MarketRecord>),
    }

    struct StubSource {
        replies: Mutex<VecDeque<Reply>>,
        calls: AtomicUsize,
    }

    impl StubSource {
        fn new(replies: Vec<Reply>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl SnapshotSource for StubSource {
        async fn fetch_snapshot(&self) -> Result<MarketSnapshot, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let reply = self.replies.lock().unwrap().pop_front().unwrap_or(Reply::Empty);
            match reply {
                Reply::Empty => Ok(MarketSnapshot::new(Vec::new(), 1)),
                Reply::Fail => Err(FetchError::Status {
                    url: "http://stub/markets".to_string(),
                    status: StatusCode::SERVICE_UNAVAILABLE,
                }),
                Reply::Records(records) => Ok(MarketSnapshot::new(records, 1)),
            }
        }
    }

    fn coin(name: &str, cap: u64, change: Option<f64>) -> MarketRecord {
        MarketRecord {
            name: name.to_string(),
            symbol: name.to_lowercase(),
            current_price: 2.0,
            market_cap: cap,
            total_volume: 10,
            price_change_percentage_24h: change,
        }
    }

    fn config(path: PathBuf) -> ReportConfig {
        ReportConfig {
            output_path: path,
            interval: Duration::from_millis(1),
            ..ReportConfig::default()
        }
    }

    #[tokio::test]
    async fn empty_fetches_never_touch_the_report() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.xlsx");
        fs::write(&path, b"last good report").unwrap();

        let scheduler = Scheduler::new(
            StubSource::new(vec![Reply::Empty, Reply::Fail]),
            &config(path.clone()),
        )
        .with_max_cycles(Some(2));
        let (_tx, rx) = watch::channel(false);
        let summary = scheduler.run(rx).await;

        assert_eq!(summary.cycles, 2);
        assert_eq!(summary.no_data, 2);
        assert_eq!(summary.written, 0);
        assert_eq!(scheduler.source.calls.load(Ordering::SeqCst), 2);
        assert_eq!(fs::read(&path).unwrap(), b"last good report");
    }

    #[tokio::test]
    async fn successful_cycle_writes_report() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.xlsx");
        let scheduler = Scheduler::new(
            StubSource::new(vec![Reply::Records(vec![
                coin("Alpha", 10, Some(1.0)),
                coin("Beta", 5, None),
            ])]),
            &config(path.clone()),
        );

        assert_eq!(scheduler.run_cycle().await, CycleOutcome::Written);
        assert!(path.exists());
    }

    #[tokio::test]
    async fn locked_report_is_skipped_and_loop_continues() {
        let dir = tempfile::tempdir().unwrap();
        // No room left in the file name for the rename-aside, so the
        // availability check fails just as it would for an open file.
        let path = dir.path().join(format!("{}.xlsx", "r".repeat(245)));
        fs::write(&path, b"open in a spreadsheet app").unwrap();

        let records = vec![coin("Alpha", 10, Some(-1.0))];
        let scheduler = Scheduler::new(
            StubSource::new(vec![
                Reply::Records(records.clone()),
                Reply::Records(records),
            ]),
            &config(path.clone()),
        )
        .with_max_cycles(Some(2));
        let (_tx, rx) = watch::channel(false);
        let summary = scheduler.run(rx).await;

        assert_eq!(summary.cycles, 2);
        assert_eq!(summary.locked, 2);
        assert_eq!(fs::read(&path).unwrap(), b"open in a spreadsheet app");
    }

    #[tokio::test]
    async fn shutdown_before_start_runs_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = Scheduler::new(
            StubSource::new(Vec::new()),
            &config(dir.path().join("report.xlsx")),
        );
        let (_tx, rx) = watch::channel(true);

        let summary = scheduler.run(rx).await;
        assert_eq!(summary, RunSummary::default());
        assert_eq!(scheduler.source.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn shutdown_interrupts_the_wait() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path().join("report.xlsx"));
        cfg.interval = Duration::from_secs(3600);
        let scheduler = Scheduler::new(StubSource::new(vec![Reply::Empty]), &cfg);
        let (tx, rx) = watch::channel(false);

        let stop = async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            tx.send(true).unwrap();
        };
        let (summary, ()) = tokio::time::timeout(Duration::from_secs(5), async {
            tokio::join!(scheduler.run(rx), stop)
        })
        .await
        .expect("scheduler ignored shutdown");

        assert_eq!(summary.cycles, 1);
        assert_eq!(summary.no_data, 1);
    }
}
