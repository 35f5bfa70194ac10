//! Health monitor.
//!
//! # Responsibilities
//! - Start a round every interval; rounds may overlap
//! - Fan out one probe per target under a shared concurrency ceiling
//! - Enforce the fan-out budget and the overall round deadline
//! - Apply results to the liveness store and publish a round report

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tokio::sync::{broadcast, Semaphore};
use tokio::task::JoinSet;
use tokio::time;

use crate::config::HealthCheckConfig;
use crate::health::probe::{ProbeError, ProbePlan, Prober, TcpProber};
use crate::health::report::{EndpointError, FailureKind, RoundReport};
use crate::health::state::Update;
use crate::health::store::{HeartbeatTarget, LivenessStore};
use crate::health::targets::HeartbeatSettings;
use crate::observability::metrics;

/// Results gathered while a round runs. Shared with the probe tasks so a
/// round that hits its deadline still reports what finished.
#[derive(Debug, Default)]
struct RoundCollector {
    completed: HashSet<String>,
    succeeded: usize,
    errors: Vec<EndpointError>,
}

pub struct HealthMonitor<P: Prober = TcpProber> {
    store: Arc<LivenessStore>,
    settings: HeartbeatSettings,
    prober: Arc<P>,
    limiter: Arc<Semaphore>,
    spacing: Duration,
    recovery_successes: u32,
    rounds: AtomicU64,
}

impl HealthMonitor<TcpProber> {
    pub fn new(store: Arc<LivenessStore>, settings: HeartbeatSettings, config: &HealthCheckConfig) -> Self {
        Self::with_prober(store, settings, config, TcpProber::new(config.port))
    }
}

impl<P: Prober> HealthMonitor<P> {
    pub fn with_prober(
        store: Arc<LivenessStore>,
        settings: HeartbeatSettings,
        config: &HealthCheckConfig,
        prober: P,
    ) -> Self {
        Self {
            store,
            settings,
            prober: Arc::new(prober),
            limiter: Arc::new(Semaphore::new(config.max_concurrent_probes.max(1))),
            spacing: config.probe_spacing(),
            recovery_successes: config.recovery_successes.max(1),
            rounds: AtomicU64::new(0),
        }
    }

    pub fn store(&self) -> &Arc<LivenessStore> {
        &self.store
    }

    fn plan(&self) -> ProbePlan {
        ProbePlan {
            count: self.settings.max_missed,
            timeout: self.settings.timeout,
            spacing: self.spacing,
        }
    }

    /// Start a round every interval until shutdown, then abort rounds still
    /// in flight. The first round starts immediately.
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        if self.store.is_empty() {
            tracing::info!("No heartbeat targets configured, health monitor idle");
            return;
        }

        tracing::info!(
            targets = self.store.len(),
            interval_ms = self.settings.interval.as_millis() as u64,
            round_budget_ms = self.settings.round_budget().as_millis() as u64,
            "Health monitor starting"
        );

        let mut ticker = time::interval(self.settings.interval);
        let mut rounds = JoinSet::new();

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let monitor = self.clone();
                    rounds.spawn(async move {
                        monitor.run_round().await;
                    });
                }
                Some(joined) = rounds.join_next(), if !rounds.is_empty() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            tracing::error!(error = %e, "Health round panicked");
                        }
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("Health monitor received shutdown signal, exiting loop");
                    break;
                }
            }
        }

        rounds.abort_all();
        while rounds.join_next().await.is_some() {}
        tracing::info!("Health monitor stopped");
    }

    /// Probe every target once and publish the report.
    pub async fn run_round(&self) -> RoundReport {
        let round = self.rounds.fetch_add(1, Ordering::Relaxed) + 1;
        let started = Instant::now();
        let started_at_unix_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        let collector = Arc::new(Mutex::new(RoundCollector::default()));

        let timed_out = time::timeout(
            self.settings.round_budget(),
            self.fan_out(round, collector.clone()),
        )
        .await
        .is_err();
        if timed_out {
            tracing::warn!(round, "Health round exceeded its deadline");
        }

        let (succeeded, mut errors) = {
            let mut collected = collector.lock().unwrap_or_else(PoisonError::into_inner);
            if timed_out {
                self.write_off(round, &mut collected, "round deadline elapsed");
            }
            (collected.succeeded, std::mem::take(&mut collected.errors))
        };
        errors.sort_by(|a, b| a.target.cmp(&b.target));

        let abandoned = errors
            .iter()
            .filter(|e| e.kind == FailureKind::Abandoned)
            .count();
        let duration = started.elapsed();
        let report = RoundReport {
            round,
            started_at_unix_ms,
            duration_ms: duration.as_millis() as u64,
            probed: self.store.len(),
            succeeded,
            abandoned,
            timed_out,
            errors,
        };

        metrics::record_round(duration, abandoned);
        if report.is_clean() {
            tracing::debug!(round, probed = report.probed, duration_ms = report.duration_ms, "Health round complete");
        } else {
            tracing::warn!(
                round,
                probed = report.probed,
                succeeded = report.succeeded,
                failed = report.errors.len(),
                abandoned,
                duration_ms = report.duration_ms,
                "Health round complete with failures"
            );
        }

        self.store.publish_round(report.clone());
        report
    }

    async fn fan_out(&self, round: u64, collector: Arc<Mutex<RoundCollector>>) {
        let plan = self.plan();
        let mut probes = JoinSet::new();

        for target in self.store.targets() {
            let target = target.clone();
            let prober = self.prober.clone();
            let limiter = self.limiter.clone();
            let collector = collector.clone();
            let recovery = self.recovery_successes;

            probes.spawn(async move {
                let _permit = match limiter.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return,
                };
                let outcome = prober.probe(target.address(), &plan).await;
                apply(&target, round, recovery, outcome, &plan, &collector);
            });
        }

        let budget = self.settings.max_missed_timeout;
        if time::timeout(budget, drain(&mut probes)).await.is_err() {
            probes.abort_all();
            while probes.join_next().await.is_some() {}

            let mut collected = collector.lock().unwrap_or_else(PoisonError::into_inner);
            let message = format!("no result within {}ms", budget.as_millis());
            self.write_off(round, &mut collected, &message);
        }
    }

    /// Fail every target without a result this round. Marking them
    /// completed makes a late probe result for the round a no-op.
    fn write_off(&self, round: u64, collected: &mut RoundCollector, message: &str) {
        for target in self.store.targets() {
            if collected.completed.insert(target.name().to_string()) {
                log_update(target, target.record_failure(round, message));
                metrics::record_probe("abandoned");
                collected.errors.push(abandoned(target, message));
            }
        }
    }
}

async fn drain(probes: &mut JoinSet<()>) {
    while let Some(joined) = probes.join_next().await {
        if let Err(e) = joined {
            if e.is_panic() {
                tracing::error!(error = %e, "Probe task panicked");
            }
        }
    }
}

fn apply(
    target: &HeartbeatTarget,
    round: u64,
    recovery: u32,
    outcome: Result<bool, ProbeError>,
    plan: &ProbePlan,
    collector: &Mutex<RoundCollector>,
) {
    let failure = match outcome {
        Ok(true) => None,
        Ok(false) => Some((
            FailureKind::Unreachable,
            format!("no reply after {} attempts", plan.count.max(1)),
        )),
        Err(e) => Some((FailureKind::ProbeFailed, e.to_string())),
    };

    let mut collected = collector.lock().unwrap_or_else(PoisonError::into_inner);
    // The round may already have written this target off as abandoned.
    if !collected.completed.insert(target.name().to_string()) {
        return;
    }

    match failure {
        None => {
            metrics::record_probe("success");
            log_update(target, target.record_success(round, recovery));
            collected.succeeded += 1;
        }
        Some((kind, message)) => {
            metrics::record_probe(match kind {
                FailureKind::Unreachable => "unreachable",
                _ => "error",
            });
            tracing::debug!(heartbeat = target.name(), address = target.address(), error = %message, "Probe failed");
            log_update(target, target.record_failure(round, message.as_str()));
            collected.errors.push(EndpointError {
                target: target.name().to_string(),
                address: target.address().to_string(),
                kind,
                message,
            });
        }
    }
}

fn log_update(target: &HeartbeatTarget, update: Update) {
    match update {
        Update::Stale => {
            tracing::debug!(heartbeat = target.name(), "Result from an older round ignored");
        }
        Update::Applied { from, to } => {
            metrics::record_target_state(target.name(), to.as_u8());
            if from != to {
                tracing::info!(
                    heartbeat = target.name(),
                    address = target.address(),
                    from = from.as_str(),
                    to = to.as_str(),
                    "Liveness changed"
                );
            }
        }
    }
}

fn abandoned(target: &HeartbeatTarget, message: &str) -> EndpointError {
    EndpointError {
        target: target.name().to_string(),
        address: target.address().to_string(),
        kind: FailureKind::Abandoned,
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::state::LivenessState;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;

    #[derive(Debug, Clone, Copy)]
    enum Behavior {
        Up,
        Down,
        Broken,
        Hang,
        Slow(Duration),
        /// Holds the worker thread, so abort cannot interrupt it.
        Block(Duration),
    }

    #[derive(Default)]
    struct ScriptedProber {
        behaviors: Mutex<HashMap<String, Behavior>>,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl ScriptedProber {
        fn set(&self, address: &str, behavior: Behavior) {
            self.behaviors.lock().unwrap().insert(address.to_string(), behavior);
        }
    }

    impl Prober for Arc<ScriptedProber> {
        async fn probe(&self, address: &str, _plan: &ProbePlan) -> Result<bool, ProbeError> {
            let behavior = self.behaviors.lock().unwrap().get(address).copied().unwrap_or(Behavior::Down);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);

            let result = match behavior {
                Behavior::Up => Ok(true),
                Behavior::Down => Ok(false),
                Behavior::Broken => Err(ProbeError::NoAddress {
                    address: address.to_string(),
                }),
                Behavior::Hang => std::future::pending().await,
                Behavior::Slow(delay) => {
                    time::sleep(delay).await;
                    Ok(true)
                }
                Behavior::Block(delay) => {
                    std::thread::sleep(delay);
                    Ok(true)
                }
            };
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            result
        }
    }

    fn settings(fan_out_ms: u64) -> HeartbeatSettings {
        HeartbeatSettings {
            interval: Duration::from_millis(50),
            timeout: Duration::from_millis(100),
            max_missed: 1,
            max_missed_timeout: Duration::from_millis(fan_out_ms),
        }
    }

    fn monitor(
        targets: &[(&str, &str)],
        config: HealthCheckConfig,
        fan_out_ms: u64,
    ) -> (HealthMonitor<Arc<ScriptedProber>>, Arc<ScriptedProber>) {
        let store = Arc::new(LivenessStore::new(targets.iter().copied()));
        let prober = Arc::new(ScriptedProber::default());
        let monitor = HealthMonitor::with_prober(store, settings(fan_out_ms), &config, prober.clone());
        (monitor, prober)
    }

    #[tokio::test]
    async fn test_success_activates_and_failure_takes_offline() {
        let (monitor, prober) = monitor(&[("edge-1", "a"), ("edge-2", "b")], HealthCheckConfig::default(), 1000);
        prober.set("a", Behavior::Up);
        prober.set("b", Behavior::Down);

        let report = monitor.run_round().await;
        assert_eq!(report.round, 1);
        assert_eq!(report.probed, 2);
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].target, "edge-2");
        assert_eq!(report.errors[0].kind, FailureKind::Unreachable);
        assert_eq!(monitor.store().state("edge-1"), Some(LivenessState::Active));
        // Never reached: stays at its initial state.
        assert_eq!(monitor.store().state("edge-2"), Some(LivenessState::Offline));

        prober.set("a", Behavior::Broken);
        let report = monitor.run_round().await;
        assert_eq!(report.errors[0].kind, FailureKind::ProbeFailed);
        assert_eq!(monitor.store().state("edge-1"), Some(LivenessState::Offline));
        assert_eq!(monitor.store().last_round().unwrap().round, 2);
    }

    #[tokio::test]
    async fn test_hung_probe_is_abandoned_within_budget() {
        let (monitor, prober) = monitor(&[("edge-1", "a"), ("edge-2", "b")], HealthCheckConfig::default(), 100);
        prober.set("a", Behavior::Up);
        prober.set("b", Behavior::Hang);
        monitor.store().get("edge-2").unwrap().record_success(0, 1);

        let started = Instant::now();
        let report = monitor.run_round().await;

        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(!report.timed_out);
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.abandoned, 1);
        assert_eq!(report.errors[0].target, "edge-2");
        assert_eq!(report.errors[0].kind, FailureKind::Abandoned);
        assert_eq!(monitor.store().state("edge-2"), Some(LivenessState::Offline));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_round_deadline_fails_unreported_targets() {
        let (monitor, prober) = monitor(&[("edge-1", "a")], HealthCheckConfig::default(), 100);
        prober.set("a", Behavior::Block(Duration::from_millis(600)));
        monitor.store().get("edge-1").unwrap().record_success(0, 1);

        let report = monitor.run_round().await;
        assert!(report.timed_out);
        assert_eq!(report.abandoned, 1);
        assert_eq!(report.errors[0].kind, FailureKind::Abandoned);
        assert_eq!(monitor.store().state("edge-1"), Some(LivenessState::Offline));

        // The blocked probe finishes after the round gave up on it.
        time::sleep(Duration::from_millis(800)).await;
        assert_eq!(monitor.store().state("edge-1"), Some(LivenessState::Offline));
    }

    #[tokio::test]
    async fn test_concurrency_ceiling_is_respected() {
        let config = HealthCheckConfig {
            max_concurrent_probes: 2,
            ..HealthCheckConfig::default()
        };
        let targets: Vec<(String, String)> = (0..6).map(|i| (format!("edge-{i}"), format!("addr-{i}"))).collect();
        let refs: Vec<(&str, &str)> = targets.iter().map(|(n, a)| (n.as_str(), a.as_str())).collect();
        let (monitor, prober) = monitor(&refs, config, 2000);
        for (_, address) in &targets {
            prober.set(address, Behavior::Slow(Duration::from_millis(30)));
        }

        let report = monitor.run_round().await;
        assert_eq!(report.succeeded, 6);
        assert!(report.errors.is_empty());
        assert!(prober.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_recovery_goes_through_reconnecting() {
        let config = HealthCheckConfig {
            recovery_successes: 2,
            ..HealthCheckConfig::default()
        };
        let (monitor, prober) = monitor(&[("edge-1", "a")], config, 1000);
        prober.set("a", Behavior::Up);

        monitor.run_round().await;
        assert_eq!(monitor.store().state("edge-1"), Some(LivenessState::Reconnecting));
        monitor.run_round().await;
        assert_eq!(monitor.store().state("edge-1"), Some(LivenessState::Active));
    }

    #[tokio::test]
    async fn test_run_loop_stops_on_shutdown() {
        let (monitor, prober) = monitor(&[("edge-1", "a")], HealthCheckConfig::default(), 1000);
        prober.set("a", Behavior::Up);
        let monitor = Arc::new(monitor);
        let (tx, rx) = broadcast::channel(1);

        let handle = tokio::spawn(monitor.clone().run(rx));
        time::sleep(Duration::from_millis(120)).await;
        assert!(monitor.store().last_round().is_some());
        assert_eq!(monitor.store().state("edge-1"), Some(LivenessState::Active));

        tx.send(()).unwrap();
        time::timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
    }
}
