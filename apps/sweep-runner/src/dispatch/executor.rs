//! Bounded worker pool for batch dispatch.
//!
//! Workers pull configurations from a shared queue and handle each one
//! fully (request, retry, detail packet) before taking the next. Results go
//! over a channel to a single writer task that owns the summary file, so
//! rows are appended one at a time as configurations finish.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info, info_span, warn};

use super::artifacts::DetailStore;
use super::error::{AttemptError, DispatchError, ErrorKind};
use super::port::BacktestPort;
use super::preflight::{PreflightPolicy, wait_until_reachable};
use super::result::{BatchReport, DispatchResult, DispatchStatus};
use super::retry::{ExponentialBackoffCalculator, RetryPolicy};
use super::sanitize::{KpiRow, extract_kpis};
use super::summary::{SummaryWriter, check_existing};
use crate::config::RunnerConfig;
use crate::metrics;
use crate::sweep::GeneratedConfiguration;

/// Settings for one dispatch batch.
#[derive(Debug, Clone)]
pub struct DispatchOptions {
    /// Identifier written to every summary row and used as packet directory.
    pub run_id: String,
    /// Per-configuration retry policy.
    pub retry: RetryPolicy,
    /// Reachability wait before the first request.
    pub preflight: PreflightPolicy,
    /// Cancel the batch after this long.
    pub batch_timeout: Option<Duration>,
    /// Cumulative summary CSV.
    pub summary_path: PathBuf,
    /// Root directory for detail packets.
    pub detail_dir: PathBuf,
}

impl DispatchOptions {
    /// Options from the runner configuration.
    #[must_use]
    pub fn from_config(config: &RunnerConfig, run_id: &str) -> Self {
        Self {
            run_id: run_id.to_string(),
            retry: config.retry.to_policy(),
            preflight: config.preflight.to_policy(),
            batch_timeout: config.dispatch.batch_timeout(),
            summary_path: config.output.summary_path.clone(),
            detail_dir: config.output.detail_dir.clone(),
        }
    }
}

/// Runs generated configurations against a [`BacktestPort`].
pub struct Dispatcher<P: BacktestPort + 'static> {
    port: Arc<P>,
    options: DispatchOptions,
    cancel: CancellationToken,
}

impl<P: BacktestPort + 'static> Dispatcher<P> {
    /// Create a dispatcher.
    #[must_use]
    pub fn new(port: Arc<P>, options: DispatchOptions) -> Self {
        Self {
            port,
            options,
            cancel: CancellationToken::new(),
        }
    }

    /// Use an externally owned cancellation token (e.g. tied to Ctrl-C).
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token that cancels this dispatcher's batches.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Dispatch every configuration with at most `concurrency_limit`
    /// requests in flight.
    ///
    /// Returns one result per configuration, sorted by index. Only
    /// pre-flight and output-file failures are returned as errors; every
    /// per-configuration failure is recorded in its result instead.
    pub async fn dispatch(
        &self,
        configurations: Vec<GeneratedConfiguration>,
        concurrency_limit: usize,
    ) -> Result<BatchReport, DispatchError> {
        if configurations.is_empty() {
            return Err(DispatchError::NoConfigurations);
        }

        let options = &self.options;
        check_existing(&options.summary_path)?;
        wait_until_reachable(self.port.as_ref(), options.preflight, &self.cancel).await?;

        let summary = SummaryWriter::open(&options.summary_path, &options.run_id)?;
        let store = Arc::new(DetailStore::create(&options.detail_dir, &options.run_id)?);

        let total = configurations.len();
        let workers = concurrency_limit.clamp(1, total);
        let batch_cancel = self.cancel.child_token();
        let start_time = Instant::now();

        info!(
            run_id = %options.run_id,
            configurations = total,
            workers,
            summary = %options.summary_path.display(),
            detail_dir = %store.root().display(),
            "Starting batch dispatch"
        );

        let timer = options.batch_timeout.map(|limit| {
            let token = batch_cancel.clone();
            tokio::spawn(async move {
                tokio::select! {
                    () = token.cancelled() => {}
                    () = tokio::time::sleep(limit) => {
                        warn!(timeout_secs = limit.as_secs(), "Batch timeout reached, cancelling");
                        token.cancel();
                    }
                }
            })
        });

        let queue = Arc::new(Mutex::new(VecDeque::from(configurations)));
        let (tx, rx) = mpsc::channel::<Finished>(workers * 2);
        let writer = tokio::spawn(collect_results(summary, rx, total));

        let attempter = Arc::new(Attempter {
            port: Arc::clone(&self.port),
            store: Arc::clone(&store),
            retry: options.retry.clone(),
            cancel: batch_cancel.clone(),
        });

        let mut pool = JoinSet::new();
        for worker_id in 0..workers {
            let worker = Worker {
                id: worker_id,
                attempter: Arc::clone(&attempter),
                queue: Arc::clone(&queue),
                tx: tx.clone(),
            };
            pool.spawn(worker.run());
        }

        let mut worker_error = None;
        while let Some(joined) = pool.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Dispatch worker failed");
                worker_error.get_or_insert(DispatchError::Worker(e.to_string()));
            }
        }

        let leftovers: Vec<GeneratedConfiguration> = queue.lock().drain(..).collect();
        for configuration in &leftovers {
            let finished = Finished {
                result: DispatchResult::not_attempted(configuration),
                packet_error: None,
            };
            if tx.send(finished).await.is_err() {
                break;
            }
        }
        drop(tx);

        let (mut results, write_error) = writer
            .await
            .map_err(|e| DispatchError::Worker(e.to_string()))?;
        if let Some(timer) = timer {
            timer.abort();
        }

        if let Err(e) = store.write_index() {
            warn!(error = %e, "Failed to write detail packet index");
        }
        if let Some(e) = write_error.or(worker_error) {
            return Err(e);
        }

        results.sort_by_key(|r| r.index);
        let report = BatchReport {
            run_id: options.run_id.clone(),
            results,
            total_time_ms: start_time.elapsed().as_millis() as u64,
            cancelled: batch_cancel.is_cancelled(),
        };

        info!(
            run_id = %report.run_id,
            succeeded = report.succeeded(),
            failed = report.failed(),
            cancelled = report.cancelled_count(),
            elapsed_secs = format!("{:.2}", start_time.elapsed().as_secs_f64()),
            "Batch dispatch complete"
        );

        Ok(report)
    }
}

/// A configuration's result plus any failure to persist its packet.
struct Finished {
    result: DispatchResult,
    packet_error: Option<DispatchError>,
}

/// Single summary writer: appends each result as it arrives.
///
/// A summary failure stops further appends; a packet failure does not.
/// Either one is returned once the channel closes.
async fn collect_results(
    mut summary: SummaryWriter,
    mut rx: mpsc::Receiver<Finished>,
    total: usize,
) -> (Vec<DispatchResult>, Option<DispatchError>) {
    let tracker = super::progress::ProgressTracker::new(total as u64);
    let mut results = Vec::with_capacity(total);
    let mut summary_error = None;
    let mut packet_error = None;

    while let Some(Finished {
        result,
        packet_error: failed_packet,
    }) = rx.recv().await
    {
        if let Some(e) = failed_packet {
            packet_error.get_or_insert(e);
        }
        if summary_error.is_none() {
            if let Err(e) = summary.append(&result) {
                error!(error = %e, path = %summary.path().display(), "Failed to append summary row");
                summary_error = Some(e);
            }
        }

        metrics::record_result(result.status);
        let progress = tracker.job_completed(result.status);
        info!(
            label = %result.label,
            status = result.status.as_str(),
            attempts = result.attempts,
            elapsed_ms = result.elapsed_ms,
            completed = progress.completed,
            total = progress.total,
            eta_secs = progress.eta_secs,
            "Configuration finished"
        );
        results.push(result);
    }

    (results, summary_error.or(packet_error))
}

enum Outcome {
    Success(Value),
    Failed(AttemptError),
    Cancelled,
}

/// Note recorded when a detail packet could not be written.
const PACKET_WRITE_FAILED: &str = "detail packet write failed";

fn with_note(note: Option<String>, extra: &str) -> Option<String> {
    Some(match note {
        Some(existing) => format!("{existing}; {extra}"),
        None => extra.to_string(),
    })
}

/// Runs single configurations; shared by every worker of a batch.
struct Attempter<P: BacktestPort + 'static> {
    port: Arc<P>,
    store: Arc<DetailStore>,
    retry: RetryPolicy,
    cancel: CancellationToken,
}

impl<P: BacktestPort + 'static> Attempter<P> {
    async fn attempt_until_done(&self, body: &Value, attempts: &AtomicU32) -> Outcome {
        let mut backoff = ExponentialBackoffCalculator::new(&self.retry);

        loop {
            let attempt = attempts.fetch_add(1, Ordering::Relaxed) + 1;
            let request_started = Instant::now();
            let response = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Outcome::Cancelled,
                response = self.port.run_backtest(body) => response,
            };
            metrics::record_attempt(request_started.elapsed());

            match response {
                Ok(value) => {
                    return match domain_error(&value) {
                        Some(message) => Outcome::Failed(AttemptError::Domain { message, body: value }),
                        None => Outcome::Success(value),
                    };
                }
                Err(e) if e.is_transient() => {
                    let Some(delay) = backoff.next_delay(e.retry_after()) else {
                        return Outcome::Failed(e);
                    };
                    warn!(
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        attempt,
                        "Transient failure, retrying"
                    );
                    metrics::record_retry();
                    tokio::select! {
                        biased;
                        () = self.cancel.cancelled() => return Outcome::Cancelled,
                        () = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => return Outcome::Failed(e),
            }
        }
    }

    /// Write the packet; a failure is logged and handed back to the caller.
    fn persist(
        &self,
        configuration: &GeneratedConfiguration,
        packet: &Value,
    ) -> (Option<PathBuf>, Option<DispatchError>) {
        match self
            .store
            .write_packet(&configuration.artifact_key, &configuration.label, packet)
        {
            Ok(path) => (Some(path), None),
            Err(e) => {
                error!(label = %configuration.label, error = %e, "Failed to write detail packet");
                (None, Some(e))
            }
        }
    }

    async fn run_one(
        self: Arc<Self>,
        configuration: GeneratedConfiguration,
        attempts: Arc<AtomicU32>,
    ) -> Finished {
        let started = Instant::now();
        let body = configuration.request_body();

        let outcome = self.attempt_until_done(&body, &attempts).await;
        let attempts = attempts.load(Ordering::Relaxed);

        let (status, error_kind, error, note, kpis, packet) = match outcome {
            Outcome::Success(value) => {
                let kpis = extract_kpis(&value);
                if !kpis.sanitized.is_empty() {
                    warn!(fields = ?kpis.sanitized, "Non-finite KPI values sanitized");
                    metrics::record_sanitized(kpis.sanitized.len());
                }
                let note = kpis.has_no_trades().then(|| "no trades".to_string());
                (DispatchStatus::Success, None, None, note, kpis, value)
            }
            Outcome::Failed(e) => {
                warn!(error = %e, attempts, "Configuration failed");
                (
                    DispatchStatus::Failed,
                    Some(e.kind()),
                    Some(e.to_string()),
                    None,
                    KpiRow::empty(),
                    e.detail_packet(attempts),
                )
            }
            Outcome::Cancelled => (
                DispatchStatus::Cancelled,
                Some(ErrorKind::Cancelled),
                Some("cancelled while in flight".to_string()),
                None,
                KpiRow::empty(),
                json!({"error": "cancelled", "attempts": attempts}),
            ),
        };

        let (detail_path, packet_error) = self.persist(&configuration, &packet);
        let note = if packet_error.is_some() {
            with_note(note, PACKET_WRITE_FAILED)
        } else {
            note
        };

        Finished {
            result: DispatchResult {
                index: configuration.index,
                label: configuration.label,
                sweep: configuration.sweep,
                status,
                error_kind,
                error,
                note,
                attempts,
                elapsed_ms: started.elapsed().as_millis() as u64,
                kpis,
                sweep_params: configuration.sweep_params,
                detail_path,
            },
            packet_error,
        }
    }

    /// Failed result for a configuration whose task panicked.
    fn abandoned(
        &self,
        configuration: &GeneratedConfiguration,
        attempts: u32,
        elapsed: Duration,
        reason: &str,
    ) -> Finished {
        let error = format!("worker task failed: {reason}");
        error!(label = %configuration.label, attempts, error = %error, "Configuration task aborted");

        let packet = json!({"error": error, "attempts": attempts});
        let (detail_path, packet_error) = self.persist(configuration, &packet);
        let note = packet_error
            .is_some()
            .then(|| PACKET_WRITE_FAILED.to_string());

        Finished {
            result: DispatchResult {
                index: configuration.index,
                label: configuration.label.clone(),
                sweep: configuration.sweep.clone(),
                status: DispatchStatus::Failed,
                error_kind: Some(ErrorKind::Internal),
                error: Some(error),
                note,
                attempts,
                elapsed_ms: elapsed.as_millis() as u64,
                kpis: KpiRow::empty(),
                sweep_params: configuration.sweep_params.clone(),
                detail_path,
            },
            packet_error,
        }
    }
}

struct Worker<P: BacktestPort + 'static> {
    id: usize,
    attempter: Arc<Attempter<P>>,
    queue: Arc<Mutex<VecDeque<GeneratedConfiguration>>>,
    tx: mpsc::Sender<Finished>,
}

impl<P: BacktestPort + 'static> Worker<P> {
    async fn run(self) {
        loop {
            if self.attempter.cancel.is_cancelled() {
                break;
            }
            let Some(configuration) = self.queue.lock().pop_front() else {
                break;
            };

            let span = info_span!(
                "dispatch",
                worker = self.id,
                index = configuration.index,
                label = %configuration.label
            );

            // Each configuration runs in its own task so a panic costs only
            // that configuration.
            let started = Instant::now();
            let attempts = Arc::new(AtomicU32::new(0));
            let task = tokio::spawn(
                Arc::clone(&self.attempter)
                    .run_one(configuration.clone(), Arc::clone(&attempts))
                    .instrument(span),
            );
            let finished = match task.await {
                Ok(finished) => finished,
                Err(e) => self.attempter.abandoned(
                    &configuration,
                    attempts.load(Ordering::Relaxed),
                    started.elapsed(),
                    &e.to_string(),
                ),
            };

            if self.tx.send(finished).await.is_err() {
                break;
            }
        }
    }
}

/// Logical failure carried by a successful response.
fn domain_error(body: &Value) -> Option<String> {
    match body.get("error")? {
        Value::Null | Value::Bool(false) => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use async_trait::async_trait;

    use super::*;
    use crate::sweep::{Expander, ExpandOptions, SweepDefinition};

    /// Port whose behaviour is chosen by the `mode` key of the config.
    #[derive(Default)]
    struct ScriptedPort {
        calls: Mutex<HashMap<String, u32>>,
        in_flight: AtomicU32,
        max_in_flight: AtomicU32,
    }

    impl ScriptedPort {
        fn calls_for(&self, mode: &str) -> u32 {
            self.calls.lock().get(mode).copied().unwrap_or(0)
        }
    }

    #[async_trait]
    impl BacktestPort for ScriptedPort {
        async fn probe(&self) -> Result<(), AttemptError> {
            Ok(())
        }

        async fn run_backtest(&self, body: &Value) -> Result<Value, AttemptError> {
            let mode = body["config"]["mode"].as_str().unwrap_or("ok").to_string();
            *self.calls.lock().entry(mode.clone()).or_default() += 1;

            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            let delay = body["config"]["delay_ms"].as_u64().unwrap_or(1);
            tokio::time::sleep(Duration::from_millis(delay)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            match mode.as_str() {
                "timeout" => Err(AttemptError::Timeout(Duration::from_millis(5))),
                "domain" => Ok(json!({"error": "Insufficient candles for window"})),
                "infinite" => Ok(json!({"results": {"net_pnl": "Infinity", "trades": 3}})),
                "hang" => std::future::pending().await,
                "panic" => panic!("scripted port panicked"),
                _ => Ok(json!({"results": {"net_pnl": 1.25, "trades": 10}})),
            }
        }

        fn endpoint(&self) -> String {
            "scripted".to_string()
        }
    }

    fn configurations(yaml: &str) -> Vec<GeneratedConfiguration> {
        let def = SweepDefinition::from_yaml_str(yaml, Some("t")).unwrap();
        Expander::new(ExpandOptions::raw()).expand(&def).unwrap()
    }

    fn options(dir: &std::path::Path) -> DispatchOptions {
        DispatchOptions {
            run_id: "test_run".to_string(),
            retry: RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(5), 2.0, 0.0),
            preflight: PreflightPolicy::default(),
            batch_timeout: None,
            summary_path: dir.join("summary.csv"),
            detail_dir: dir.join("detail"),
        }
    }

    fn packet_count(dir: &std::path::Path) -> usize {
        std::fs::read_dir(dir.join("detail").join("test_run"))
            .unwrap()
            .filter(|e| {
                e.as_ref()
                    .map(|e| e.path().extension().is_some_and(|x| x == "json"))
                    .unwrap_or(false)
            })
            .count()
    }

    #[tokio::test]
    async fn test_one_failure_does_not_block_batch() {
        let dir = tempfile::tempdir().unwrap();
        let port = Arc::new(ScriptedPort::default());
        let configs = configurations("base: {mode: ok}\nsweep: {mode: [ok, domain, ok, ok]}");

        let report = Dispatcher::new(Arc::clone(&port), options(dir.path()))
            .dispatch(configs, 2)
            .await
            .unwrap();

        assert_eq!(report.results.len(), 4);
        assert_eq!(report.succeeded(), 3);
        let failed = &report.results[1];
        assert_eq!(failed.status, DispatchStatus::Failed);
        assert_eq!(failed.error_kind, Some(ErrorKind::Domain));
        assert_eq!(failed.attempts, 1);
        assert_eq!(port.calls_for("domain"), 1);

        let summary = std::fs::read_to_string(dir.path().join("summary.csv")).unwrap();
        assert_eq!(summary.lines().count(), 5);
        assert_eq!(packet_count(dir.path()), 4);
    }

    #[tokio::test]
    async fn test_timeouts_exhaust_ceiling_then_batch_proceeds() {
        let dir = tempfile::tempdir().unwrap();
        let port = Arc::new(ScriptedPort::default());
        let configs = configurations("base: {mode: ok}\nsweep: {mode: [timeout, ok]}");

        let report = Dispatcher::new(Arc::clone(&port), options(dir.path()))
            .dispatch(configs, 1)
            .await
            .unwrap();

        let timed_out = &report.results[0];
        assert_eq!(timed_out.status, DispatchStatus::Failed);
        assert_eq!(timed_out.error_kind, Some(ErrorKind::Transient));
        assert_eq!(timed_out.attempts, 3);
        assert!(timed_out.error.as_deref().unwrap().contains("timed out"));
        assert_eq!(port.calls_for("timeout"), 3);
        assert_eq!(report.results[1].status, DispatchStatus::Success);
    }

    #[tokio::test]
    async fn test_infinite_kpi_is_sanitized() {
        let dir = tempfile::tempdir().unwrap();
        let port = Arc::new(ScriptedPort::default());
        let configs = configurations("base: {mode: infinite}");

        let report = Dispatcher::new(port, options(dir.path()))
            .dispatch(configs, 1)
            .await
            .unwrap();

        let result = &report.results[0];
        assert_eq!(result.status, DispatchStatus::Success);
        assert_eq!(result.kpis.get("net_pnl"), None);
        assert_eq!(result.kpis.sanitized, vec!["net_pnl"]);
        assert!(result.note.is_none());
    }

    #[tokio::test]
    async fn test_concurrency_limit_and_input_order() {
        let dir = tempfile::tempdir().unwrap();
        let port = Arc::new(ScriptedPort::default());
        let configs = configurations("base: {mode: ok, delay_ms: 1}\nsweep: {delay_ms: [40, 30, 20, 10, 1, 1]}");

        let report = Dispatcher::new(Arc::clone(&port), options(dir.path()))
            .dispatch(configs, 3)
            .await
            .unwrap();

        let indices: Vec<usize> = report.results.iter().map(|r| r.index).collect();
        assert_eq!(indices, vec![1, 2, 3, 4, 5, 6]);
        assert!(port.max_in_flight.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_cancellation_records_every_configuration() {
        let dir = tempfile::tempdir().unwrap();
        let port = Arc::new(ScriptedPort::default());
        let configs = configurations("base: {mode: hang}\nsweep: {x: [1, 2, 3, 4, 5]}");

        let mut opts = options(dir.path());
        opts.batch_timeout = Some(Duration::from_millis(50));
        let report = Dispatcher::new(port, opts).dispatch(configs, 2).await.unwrap();

        assert!(report.cancelled);
        assert_eq!(report.results.len(), 5);
        assert_eq!(report.cancelled_count(), 5);
        let attempted = report.results.iter().filter(|r| r.attempts > 0).count();
        assert_eq!(attempted, 2);
        assert_eq!(packet_count(dir.path()), attempted);

        let summary = std::fs::read_to_string(dir.path().join("summary.csv")).unwrap();
        assert_eq!(summary.lines().count(), 6);
    }

    #[tokio::test]
    async fn test_panicking_configuration_is_failed_and_queue_drains() {
        let dir = tempfile::tempdir().unwrap();
        let port = Arc::new(ScriptedPort::default());
        let configs = configurations("base: {mode: ok}\nsweep: {mode: [ok, panic, ok, ok]}");

        let report = Dispatcher::new(Arc::clone(&port), options(dir.path()))
            .dispatch(configs, 1)
            .await
            .unwrap();

        assert_eq!(report.results.len(), 4);
        assert_eq!(report.succeeded(), 3);
        let panicked = &report.results[1];
        assert_eq!(panicked.status, DispatchStatus::Failed);
        assert_eq!(panicked.error_kind, Some(ErrorKind::Internal));
        assert_eq!(panicked.attempts, 1);
        assert!(panicked.error.as_deref().unwrap().starts_with("worker task failed"));
        assert!(panicked.detail_path.is_some());

        let summary = std::fs::read_to_string(dir.path().join("summary.csv")).unwrap();
        assert_eq!(summary.lines().count(), 5);
        assert_eq!(packet_count(dir.path()), 4);
    }

    #[tokio::test]
    async fn test_packet_write_failure_is_noted_and_reported() {
        let dir = tempfile::tempdir().unwrap();
        let port = Arc::new(ScriptedPort::default());
        let configs = configurations("base: {mode: ok}\nsweep: {x: [1, 2]}");

        // A directory at the packet path makes the final rename fail.
        let blocked = dir
            .path()
            .join("detail")
            .join("test_run")
            .join(format!("{}.json", configs[0].artifact_key));
        std::fs::create_dir_all(&blocked).unwrap();

        let err = Dispatcher::new(port, options(dir.path()))
            .dispatch(configs, 1)
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Io { .. }));

        let summary = std::fs::read_to_string(dir.path().join("summary.csv")).unwrap();
        assert_eq!(summary.lines().count(), 3);
        let noted: Vec<&str> = summary
            .lines()
            .filter(|l| l.contains(PACKET_WRITE_FAILED))
            .collect();
        assert_eq!(noted.len(), 1);
    }

    #[test]
    fn test_with_note_appends() {
        assert_eq!(with_note(None, "b").as_deref(), Some("b"));
        assert_eq!(with_note(Some("a".to_string()), "b").as_deref(), Some("a; b"));
    }

    #[tokio::test]
    async fn test_empty_batch_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = Dispatcher::new(Arc::new(ScriptedPort::default()), options(dir.path()))
            .dispatch(Vec::new(), 4)
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::NoConfigurations));
    }

    #[test]
    fn test_domain_error_detection() {
        assert_eq!(domain_error(&json!({"error": "no data"})), Some("no data".to_string()));
        assert_eq!(domain_error(&json!({"error": null, "results": {}})), None);
        assert_eq!(domain_error(&json!({"results": {}})), None);
        assert_eq!(domain_error(&json!({"error": ""})), None);
    }
}
