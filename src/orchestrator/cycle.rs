//! Cycle orchestrator: connect, then probe every target once per interval.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;

use crate::config::ConfigError;
use crate::metric::{ProbeFamily, Tags, Target};
use crate::orchestrator::OrchestratorError;
use crate::orchestrator::pipeline::{PipelineError, Stage, run_pipeline};
use crate::probe::Probe;
use crate::store::{IngestWriter, RetryPolicy, StoreConnector, StoreError};

/// Timing, concurrency and write settings for one orchestrator.
#[derive(Debug, Clone)]
pub struct CycleSettings {
    /// Sleep after a cycle in which at least one target was written.
    pub interval: Duration,
    /// Sleep after a cycle in which every target failed.
    pub fail_interval: Duration,
    /// Delay between connection attempts and between write attempts.
    pub db_retry_interval: Duration,
    /// Concurrent pipelines per cycle.
    pub workers: usize,
    /// Write attempts per record.
    pub write_attempts: u32,
    /// Log every written record.
    pub verbose: bool,
    /// Tags added to every measurement.
    pub tags: Tags,
}

impl Default for CycleSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            fail_interval: Duration::from_secs(30),
            db_retry_interval: Duration::from_secs(30),
            workers: 5,
            write_attempts: 3,
            verbose: false,
            tags: Tags::new(),
        }
    }
}

/// Outcome counts for one cycle.
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    pub cycle: u64,
    pub targets: usize,
    pub written: usize,
    pub unreachable: usize,
    pub probe_failures: usize,
    pub parse_failures: usize,
    pub format_failures: usize,
    pub write_failures: usize,
    pub panics: usize,
    /// A write asked for the store connection to be rebuilt.
    pub connection_invalidated: bool,
    /// Records dropped after exhausting retries since the last connect.
    pub dropped_since_connect: u64,
    pub elapsed: Duration,
}

impl CycleReport {
    /// Targets that produced no stored record.
    pub fn failed(&self) -> usize {
        self.targets - self.written
    }

    /// Whether the cycle had targets and none of them were written.
    pub fn all_failed(&self) -> bool {
        self.targets > 0 && self.written == 0
    }

    fn record_failure(&mut self, err: &PipelineError) {
        match err {
            PipelineError::ProbeUnreachable => self.unreachable += 1,
            _ => match err.stage() {
                Stage::Probe => self.probe_failures += 1,
                Stage::Parse => self.parse_failures += 1,
                Stage::Format => self.format_failures += 1,
                Stage::Write => self.write_failures += 1,
            },
        }
        if err.invalidates_connection() {
            self.connection_invalidated = true;
        }
    }
}

enum State {
    Initializing,
    Running(IngestWriter),
}

/// Reads the target list each time a cycle loop starts.
pub type TargetLoader = Arc<dyn Fn() -> Result<Vec<Target>, ConfigError> + Send + Sync>;

enum TargetSource {
    Fixed(Arc<[Target]>),
    Loader(TargetLoader),
}

/// Runs one probe family against its targets, forever.
///
/// `Initializing` retries the store connection until it succeeds;
/// `Running` dispatches one pipeline per target through a semaphore-bounded
/// set of tasks, waits for all of them, then sleeps. A panic or error in one
/// target's task is logged and counted, never propagated to its siblings.
pub struct CycleOrchestrator {
    probe: Arc<dyn Probe>,
    targets: TargetSource,
    connector: Arc<dyn StoreConnector>,
    settings: CycleSettings,
    tags: Arc<Tags>,
    cycles: AtomicU64,
}

impl std::fmt::Debug for CycleOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CycleOrchestrator")
            .field("family", &self.probe.family())
            .field(
                "targets",
                &match &self.targets {
                    TargetSource::Fixed(targets) => targets.len().to_string(),
                    TargetSource::Loader(_) => "loaded on start".to_string(),
                },
            )
            .field("endpoint", &self.connector.endpoint())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl CycleOrchestrator {
    /// Orchestrator over a fixed target list.
    pub fn new(
        probe: Arc<dyn Probe>,
        targets: Vec<Target>,
        connector: Arc<dyn StoreConnector>,
        settings: CycleSettings,
    ) -> Self {
        Self::with_source(probe, TargetSource::Fixed(targets.into()), connector, settings)
    }

    /// Orchestrator that calls `loader` every time its loop starts.
    ///
    /// A loader error, or an empty list, ends the loop with an
    /// [`OrchestratorError`] so a supervisor retries it later.
    pub fn with_target_loader(
        probe: Arc<dyn Probe>,
        loader: TargetLoader,
        connector: Arc<dyn StoreConnector>,
        settings: CycleSettings,
    ) -> Self {
        Self::with_source(probe, TargetSource::Loader(loader), connector, settings)
    }

    fn with_source(
        probe: Arc<dyn Probe>,
        targets: TargetSource,
        connector: Arc<dyn StoreConnector>,
        settings: CycleSettings,
    ) -> Self {
        let tags = Arc::new(settings.tags.clone());
        Self {
            probe,
            targets,
            connector,
            settings,
            tags,
            cycles: AtomicU64::new(0),
        }
    }

    pub fn family(&self) -> ProbeFamily {
        self.probe.family()
    }

    /// Run the state machine forever. Only returns on an error that a
    /// supervisor has to handle.
    pub async fn run(&self) -> Result<(), OrchestratorError> {
        self.drive(None).await.map(|_| ())
    }

    /// Run exactly `cycles` cycles and return their reports.
    ///
    /// Sleeps between cycles but not after the last one.
    pub async fn run_cycles(&self, cycles: usize) -> Result<Vec<CycleReport>, OrchestratorError> {
        self.drive(Some(cycles)).await
    }

    async fn drive(&self, limit: Option<usize>) -> Result<Vec<CycleReport>, OrchestratorError> {
        let family = self.family();
        let mut reports = Vec::new();
        let mut completed = 0usize;
        let mut state = State::Initializing;

        if limit == Some(0) {
            return Ok(reports);
        }
        let targets = self.load_targets()?;

        loop {
            state = match state {
                State::Initializing => State::Running(self.connect().await?),
                State::Running(writer) => {
                    let report = self.run_cycle(&writer, &targets).await?;
                    let delay = self.delay_after(&report);
                    let invalidated = report.connection_invalidated;

                    completed += 1;
                    if limit.is_some() {
                        reports.push(report);
                    }
                    if limit.is_some_and(|max| completed >= max) {
                        return Ok(reports);
                    }

                    tracing::debug!(%family, sleep = ?delay, "Waiting for next cycle");
                    tokio::time::sleep(delay).await;

                    if invalidated {
                        tracing::warn!(
                            %family,
                            endpoint = %self.connector.endpoint(),
                            "Store connection invalidated, reconnecting"
                        );
                        State::Initializing
                    } else {
                        State::Running(writer)
                    }
                }
            };
        }
    }

    fn load_targets(&self) -> Result<Arc<[Target]>, OrchestratorError> {
        match &self.targets {
            TargetSource::Fixed(targets) => Ok(Arc::clone(targets)),
            TargetSource::Loader(load) => {
                let targets = load()?;
                if targets.is_empty() {
                    return Err(OrchestratorError::NoTargets);
                }
                tracing::info!(family = %self.family(), targets = targets.len(), "Targets loaded");
                Ok(targets.into())
            }
        }
    }

    /// Establish a store connection, retrying retryable failures forever.
    pub async fn connect(&self) -> Result<IngestWriter, OrchestratorError> {
        let family = self.family();
        let endpoint = self.connector.endpoint();
        let policy = RetryPolicy::unbounded(self.settings.db_retry_interval);
        let label = format!("connect {endpoint}");

        let store = policy
            .run(&label, |_| self.connector.connect(), StoreError::is_retryable)
            .await
            .map_err(|e| OrchestratorError::Connect(e.error))?;

        tracing::info!(%family, %endpoint, bucket = %self.connector.bucket(), "Connected to store");

        Ok(IngestWriter::new(
            store,
            self.connector.bucket(),
            RetryPolicy::bounded(self.settings.write_attempts, self.settings.db_retry_interval),
        )
        .with_verbose(self.settings.verbose))
    }

    /// Probe every target once and wait for all pipelines to finish.
    async fn run_cycle(
        &self,
        writer: &IngestWriter,
        targets: &[Target],
    ) -> Result<CycleReport, OrchestratorError> {
        let family = self.family();
        let cycle = self.cycles.fetch_add(1, Ordering::Relaxed) + 1;
        let started = Instant::now();

        tracing::debug!(%family, cycle, targets = targets.len(), "Cycle started");

        let semaphore = Arc::new(Semaphore::new(self.settings.workers.max(1)));
        let mut handles = Vec::with_capacity(targets.len());

        for target in targets {
            let permit = semaphore.clone().acquire_owned().await?;
            let probe = Arc::clone(&self.probe);
            let tags = Arc::clone(&self.tags);
            let writer = writer.clone();
            let task_target = target.clone();

            let handle = tokio::spawn(async move {
                let _permit = permit;
                run_pipeline(probe.as_ref(), &task_target, &tags, &writer).await
            });
            handles.push((target.clone(), handle));
        }

        let mut report = CycleReport {
            cycle,
            targets: handles.len(),
            ..Default::default()
        };

        for (target, handle) in handles {
            match handle.await {
                Ok(Ok(delivered)) => {
                    report.written += 1;
                    tracing::debug!(
                        %family,
                        target_name = %target,
                        measurements = delivered.measurements,
                        attempts = delivered.attempts,
                        "Record written"
                    );
                }
                Ok(Err(e)) => {
                    log_failure(family, &target, &e);
                    report.record_failure(&e);
                }
                Err(e) => {
                    report.panics += 1;
                    tracing::error!(
                        %family,
                        target_name = %target,
                        panicked = e.is_panic(),
                        error = %e,
                        "Pipeline task failed"
                    );
                }
            }
        }

        report.elapsed = started.elapsed();
        report.dropped_since_connect = writer.dropped_records();
        if report.all_failed() {
            tracing::warn!(
                %family,
                cycle,
                targets = report.targets,
                dropped = report.dropped_since_connect,
                elapsed = ?report.elapsed,
                "Cycle finished with no records written"
            );
        } else {
            tracing::info!(
                %family,
                cycle,
                written = report.written,
                failed = report.failed(),
                dropped = report.dropped_since_connect,
                elapsed = ?report.elapsed,
                "Cycle finished"
            );
        }

        Ok(report)
    }

    fn delay_after(&self, report: &CycleReport) -> Duration {
        if report.all_failed() {
            self.settings.fail_interval
        } else {
            self.settings.interval
        }
    }
}

fn log_failure(family: ProbeFamily, target: &Target, err: &PipelineError) {
    let stage = err.stage();
    match err {
        PipelineError::ProbeUnreachable => {
            tracing::warn!(%family, target_name = %target, "Target unreachable, skipped")
        }
        PipelineError::Format(_) => {
            tracing::error!(%family, target_name = %target, %stage, error = %err, "Pipeline failed")
        }
        PipelineError::Write(_) => {
            tracing::error!(%family, target_name = %target, %stage, error = %err, "Record dropped")
        }
        _ => tracing::warn!(%family, target_name = %target, %stage, error = %err, "Pipeline failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric::{Measurement, NormalizedMetric};
    use crate::orchestrator::Supervisor;
    use crate::probe::{ParseError, RawProbeResult};
    use crate::store::MetricStore;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;

    /// Behaviour of [`ScriptedProbe`] for one target.
    #[derive(Clone)]
    enum Script {
        Ok,
        Unreachable,
        Panic,
        Garbage,
    }

    struct ScriptedProbe {
        scripts: HashMap<String, Script>,
        running: AtomicUsize,
        peak: AtomicUsize,
    }

    impl ScriptedProbe {
        fn new(scripts: &[(&str, Script)]) -> Arc<Self> {
            Arc::new(Self {
                scripts: scripts
                    .iter()
                    .map(|(t, s)| (t.to_string(), s.clone()))
                    .collect(),
                running: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait::async_trait]
    impl Probe for ScriptedProbe {
        fn family(&self) -> ProbeFamily {
            ProbeFamily::Ping
        }

        async fn run(&self, target: &Target) -> RawProbeResult {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.running.fetch_sub(1, Ordering::SeqCst);

            match self.scripts.get(target.as_str()).cloned().unwrap_or(Script::Ok) {
                Script::Ok => RawProbeResult::Success {
                    output: "ok".into(),
                },
                Script::Unreachable => RawProbeResult::Unreachable {
                    output: "100% packet loss".into(),
                },
                Script::Panic => panic!("probe blew up for {target}"),
                Script::Garbage => RawProbeResult::Success {
                    output: "garbage".into(),
                },
            }
        }

        async fn parse(
            &self,
            target: &Target,
            output: &str,
        ) -> Result<NormalizedMetric, ParseError> {
            if output == "garbage" {
                return Err(ParseError::Grammar {
                    family: ProbeFamily::Ping,
                    reason: "no summary".into(),
                });
            }
            Ok(NormalizedMetric::new(ProbeFamily::Ping, target.clone(), 1)
                .with_field("host", target.as_str())
                .with_field("packet_loss", "0")
                .with_field("latency_avg", 1.0)
                .with_field("latency_min", 1.0)
                .with_field("latency_max", 1.0)
                .with_field("ipv4_address", "")
                .with_field("ipv6_address", "")
                .with_field("target_hostname", target.as_str()))
        }
    }

    #[derive(Default)]
    struct MemoryStore {
        targets: Mutex<Vec<String>>,
        fail_with: Option<fn() -> StoreError>,
    }

    #[async_trait::async_trait]
    impl MetricStore for MemoryStore {
        async fn write(&self, _bucket: &str, measurements: &[Measurement]) -> Result<(), StoreError> {
            if let Some(make) = self.fail_with {
                return Err(make());
            }
            let mut targets = self.targets.lock().unwrap();
            for m in measurements {
                targets.push(m.tags.get("target").cloned().unwrap_or_default());
            }
            Ok(())
        }
    }

    struct MemoryConnector {
        store: Arc<MemoryStore>,
        connects: AtomicUsize,
        failures_before_success: usize,
    }

    impl MemoryConnector {
        fn new(store: Arc<MemoryStore>) -> Arc<Self> {
            Self::flaky(store, 0)
        }

        fn flaky(store: Arc<MemoryStore>, failures_before_success: usize) -> Arc<Self> {
            Arc::new(Self {
                store,
                connects: AtomicUsize::new(0),
                failures_before_success,
            })
        }
    }

    #[async_trait::async_trait]
    impl StoreConnector for MemoryConnector {
        async fn connect(&self) -> Result<Arc<dyn MetricStore>, StoreError> {
            let n = self.connects.fetch_add(1, Ordering::SeqCst);
            if n < self.failures_before_success {
                return Err(StoreError::Connect("store starting".into()));
            }
            let store: Arc<dyn MetricStore> = self.store.clone();
            Ok(store)
        }

        fn bucket(&self) -> &str {
            "netpulse"
        }

        fn endpoint(&self) -> String {
            "memory://".into()
        }
    }

    fn settings(workers: usize) -> CycleSettings {
        CycleSettings {
            interval: Duration::from_millis(5),
            fail_interval: Duration::from_millis(1),
            db_retry_interval: Duration::from_millis(1),
            workers,
            write_attempts: 2,
            ..Default::default()
        }
    }

    fn targets(names: &[&str]) -> Vec<Target> {
        names.iter().map(|n| Target::new(*n)).collect()
    }

    #[tokio::test]
    async fn test_failing_target_does_not_affect_siblings() {
        let probe = ScriptedProbe::new(&[("a", Script::Panic)]);
        let store = Arc::new(MemoryStore::default());
        let orchestrator = CycleOrchestrator::new(
            probe,
            targets(&["a", "b", "c"]),
            MemoryConnector::new(store.clone()),
            settings(3),
        );

        let reports = orchestrator.run_cycles(1).await.unwrap();

        assert_eq!(reports[0].panics, 1);
        assert_eq!(reports[0].written, 2);
        let mut written = store.targets.lock().unwrap().clone();
        written.sort();
        assert_eq!(written, vec!["b", "c"]);
    }

    #[tokio::test]
    async fn test_report_counts_each_stage() {
        let probe = ScriptedProbe::new(&[
            ("down", Script::Unreachable),
            ("weird", Script::Garbage),
        ]);
        let store = Arc::new(MemoryStore::default());
        let orchestrator = CycleOrchestrator::new(
            probe,
            targets(&["down", "weird", "up"]),
            MemoryConnector::new(store.clone()),
            settings(2),
        );

        let report = orchestrator.run_cycles(1).await.unwrap().remove(0);

        assert_eq!(report.targets, 3);
        assert_eq!(report.written, 1);
        assert_eq!(report.unreachable, 1);
        assert_eq!(report.parse_failures, 1);
        assert_eq!(report.failed(), 2);
        assert!(!report.all_failed());
        assert_eq!(*store.targets.lock().unwrap(), vec!["up"]);
    }

    #[tokio::test]
    async fn test_worker_limit_bounds_concurrency() {
        let probe = ScriptedProbe::new(&[]);
        let store = Arc::new(MemoryStore::default());
        let orchestrator = CycleOrchestrator::new(
            probe.clone(),
            targets(&["t1", "t2", "t3", "t4", "t5", "t6"]),
            MemoryConnector::new(store),
            settings(2),
        );

        let report = orchestrator.run_cycles(1).await.unwrap().remove(0);

        assert_eq!(report.written, 6);
        assert!(probe.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_connect_retries_until_store_is_up() {
        let store = Arc::new(MemoryStore::default());
        let connector = MemoryConnector::flaky(store, 3);
        let orchestrator = CycleOrchestrator::new(
            ScriptedProbe::new(&[]),
            targets(&["x"]),
            connector.clone(),
            settings(1),
        );

        let reports = orchestrator.run_cycles(1).await.unwrap();

        assert_eq!(reports[0].written, 1);
        assert_eq!(connector.connects.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_invalidated_connection_triggers_reconnect() {
        let store = Arc::new(MemoryStore {
            fail_with: Some(|| StoreError::Transport("broken pipe".into())),
            ..Default::default()
        });
        let connector = MemoryConnector::new(store);
        let orchestrator = CycleOrchestrator::new(
            ScriptedProbe::new(&[]),
            targets(&["x", "y"]),
            connector.clone(),
            settings(2),
        );

        let reports = orchestrator.run_cycles(2).await.unwrap();

        assert!(reports[0].connection_invalidated);
        assert_eq!(reports[0].write_failures, 2);
        assert!(reports[0].all_failed());
        assert_eq!(reports[1].cycle, 2);
        assert_eq!(connector.connects.load(Ordering::SeqCst), 2);
        // Each connection starts its own dropped-record count.
        assert_eq!(reports[0].dropped_since_connect, 2);
        assert_eq!(reports[1].dropped_since_connect, 2);
    }

    #[tokio::test]
    async fn test_rejected_write_keeps_connection() {
        let store = Arc::new(MemoryStore {
            fail_with: Some(|| StoreError::from_status(400, "bad line")),
            ..Default::default()
        });
        let connector = MemoryConnector::new(store);
        let orchestrator = CycleOrchestrator::new(
            ScriptedProbe::new(&[]),
            targets(&["x"]),
            connector.clone(),
            settings(1),
        );

        let reports = orchestrator.run_cycles(2).await.unwrap();

        assert!(!reports[0].connection_invalidated);
        assert_eq!(reports[1].write_failures, 1);
        assert_eq!(connector.connects.load(Ordering::SeqCst), 1);
        assert_eq!(reports[0].dropped_since_connect, 1);
        assert_eq!(reports[1].dropped_since_connect, 2);
    }

    #[tokio::test]
    async fn test_delay_depends_on_outcome() {
        let orchestrator = CycleOrchestrator::new(
            ScriptedProbe::new(&[]),
            Vec::new(),
            MemoryConnector::new(Arc::new(MemoryStore::default())),
            settings(1),
        );
        let ok = CycleReport {
            targets: 2,
            written: 1,
            ..Default::default()
        };
        let failed = CycleReport {
            targets: 2,
            ..Default::default()
        };

        assert_eq!(orchestrator.delay_after(&ok), Duration::from_millis(5));
        assert_eq!(orchestrator.delay_after(&failed), Duration::from_millis(1));
        assert!(!CycleReport::default().all_failed());
    }

    #[tokio::test]
    async fn test_unreadable_or_empty_target_list_escapes() {
        let missing: TargetLoader = Arc::new(|| -> Result<Vec<Target>, ConfigError> {
            Err(ConfigError::io(
                "pinglist.txt",
                std::io::Error::from(std::io::ErrorKind::NotFound),
            ))
        });
        let orchestrator = CycleOrchestrator::with_target_loader(
            ScriptedProbe::new(&[]),
            missing,
            MemoryConnector::new(Arc::new(MemoryStore::default())),
            settings(1),
        );
        assert!(matches!(
            orchestrator.run().await,
            Err(OrchestratorError::Targets(ConfigError::IoError { .. }))
        ));

        let empty: TargetLoader = Arc::new(|| -> Result<Vec<Target>, ConfigError> { Ok(Vec::new()) });
        let orchestrator = CycleOrchestrator::with_target_loader(
            ScriptedProbe::new(&[]),
            empty,
            MemoryConnector::new(Arc::new(MemoryStore::default())),
            settings(1),
        );
        assert!(matches!(
            orchestrator.run().await,
            Err(OrchestratorError::NoTargets)
        ));
    }

    #[tokio::test]
    async fn test_supervisor_retries_until_targets_appear() {
        let loads = Arc::new(AtomicUsize::new(0));
        let loader: TargetLoader = {
            let loads = Arc::clone(&loads);
            Arc::new(move || match loads.fetch_add(1, Ordering::SeqCst) {
                0 => Err(ConfigError::io(
                    "pinglist.txt",
                    std::io::Error::from(std::io::ErrorKind::NotFound),
                )),
                1 => Ok(Vec::new()),
                _ => Ok(targets(&["a", "b"])),
            })
        };
        let store = Arc::new(MemoryStore::default());
        let orchestrator = Arc::new(CycleOrchestrator::with_target_loader(
            ScriptedProbe::new(&[]),
            loader,
            MemoryConnector::new(store.clone()),
            settings(2),
        ));

        let supervisor = Supervisor::new("ping", Duration::from_millis(1));
        let restarts = supervisor
            .run(|| {
                let orchestrator = Arc::clone(&orchestrator);
                async move { orchestrator.run_cycles(1).await.map(|_| ()) }
            })
            .await;

        assert_eq!(restarts, 2);
        assert_eq!(loads.load(Ordering::SeqCst), 3);
        let mut written = store.targets.lock().unwrap().clone();
        written.sort();
        assert_eq!(written, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_unrecoverable_connect_error_escapes() {
        struct BadConfig;

        #[async_trait::async_trait]
        impl StoreConnector for BadConfig {
            async fn connect(&self) -> Result<Arc<dyn MetricStore>, StoreError> {
                Err(StoreError::Config("invalid store host".into()))
            }
            fn bucket(&self) -> &str {
                "netpulse"
            }
            fn endpoint(&self) -> String {
                "bad".into()
            }
        }

        let orchestrator = CycleOrchestrator::new(
            ScriptedProbe::new(&[]),
            targets(&["x"]),
            Arc::new(BadConfig),
            settings(1),
        );

        assert!(matches!(
            orchestrator.run().await,
            Err(OrchestratorError::Connect(StoreError::Config(_)))
        ));
    }
}
