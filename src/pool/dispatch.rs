//! Job dispatch: in-process, or through a single-use worker process.
//!
//! One dispatch owns everything it creates. The pool slot, the two port
//! leases, the lifeline listener and the worker process are plain locals
//! declared in that order, so on every exit path they are torn down in the
//! reverse order: worker stopped first, slot released last.

use super::channel::RemoteProxy;
use super::gate::PoolGate;
use super::launch::{LaunchSpec, launch};
use super::port::PortBroker;
use super::ready::await_listening;
use super::worker_main::{PARENT_PORT_ENV, WORKER_PORT_ENV};
use crate::component::{Capability, ComponentKind, JobCall, JobOutput};
use crate::error::{PoolError, Result};
use crate::memory::worker_ceiling_mib;
use crate::settings::PoolConfig;
use std::net::TcpListener;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tracing::instrument;

/// Time a worker gets to exit on its own after `Exit` before it is signalled.
const STOP_GRACE: Duration = Duration::from_millis(500);

/// Where a dispatch is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    Idle,
    RunningLocal,
    AcquiringSlot,
    Launching,
    AwaitingReady,
    Connecting,
    CloningSettings,
    Dispatching,
    ResultReady,
    Stopping,
    Done,
    Failed,
}

/// Logs state transitions for one dispatch.
struct Progress {
    kind: ComponentKind,
    state: DispatchState,
}

impl Progress {
    fn new(kind: ComponentKind) -> Self {
        Self {
            kind,
            state: DispatchState::Idle,
        }
    }

    fn enter(&mut self, next: DispatchState) {
        tracing::debug!(kind = %self.kind, from = ?self.state, to = ?next, "Dispatch state");
        self.state = next;
    }

    /// Record a failure in the current state and pass the error through.
    fn fail(&mut self, error: PoolError) -> PoolError {
        tracing::debug!(kind = %self.kind, during = ?self.state, error = %error, "Dispatch failed");
        self.state = DispatchState::Failed;
        error
    }
}

/// Routes jobs of one component instance.
#[derive(Debug)]
pub struct Dispatcher {
    config: PoolConfig,
    gate: PoolGate,
    broker: &'static PortBroker,
    launches: AtomicUsize,
    local_runs: AtomicUsize,
    completed: AtomicUsize,
    failed: AtomicUsize,
}

impl Dispatcher {
    pub fn new(config: PoolConfig) -> Self {
        Self::with_broker(config, PortBroker::global())
    }

    pub fn with_broker(config: PoolConfig, broker: &'static PortBroker) -> Self {
        Self {
            gate: PoolGate::new(config.max_process_count),
            config,
            broker,
            launches: AtomicUsize::new(0),
            local_runs: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Run `call` on behalf of `capability`.
    ///
    /// The call is validated before anything is launched. With a pool limit
    /// of zero it runs in this process; otherwise it runs in a new worker.
    #[instrument(level = "debug", skip_all, fields(kind = %capability.kind(), job = call.name(), item = %call.item().name))]
    pub fn dispatch(&self, capability: &dyn Capability, call: &JobCall<'_>) -> Result<JobOutput> {
        let mut progress = Progress::new(capability.kind());

        if let Err(e) = capability.validate(call) {
            self.failed.fetch_add(1, Ordering::Relaxed);
            return Err(progress.fail(e.into()));
        }

        let result = if self.config.max_process_count == 0 {
            progress.enter(DispatchState::RunningLocal);
            self.local_runs.fetch_add(1, Ordering::Relaxed);
            capability
                .run_local(call)
                .map_err(|e| progress.fail(e.into()))
        } else if !capability.supports_standalone() {
            Err(progress.fail(PoolError::StandaloneUnsupported(
                capability.kind().to_string(),
            )))
        } else {
            self.dispatch_remote(capability, call, &mut progress)
                .map_err(|e| progress.fail(e))
        };

        match &result {
            Ok(_) => {
                progress.enter(DispatchState::Done);
                self.completed.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
            }
        }
        result
    }

    fn dispatch_remote(
        &self,
        capability: &dyn Capability,
        call: &JobCall<'_>,
        progress: &mut Progress,
    ) -> Result<JobOutput> {
        let kind = capability.kind();
        let host = self.config.host.as_str();

        progress.enter(DispatchState::AcquiringSlot);
        let _slot = self.gate.acquire();

        let (listen_lease, lifeline_lease) =
            self.broker
                .reserve_pair(host, self.config.port_low, self.config.port_high)?;
        let port = listen_lease.port();
        // Held for the worker's lifetime; the worker exits when it closes.
        let _lifeline = bind_lifeline(host, lifeline_lease.port())?;

        progress.enter(DispatchState::Launching);
        let ceiling = worker_ceiling_mib(
            self.config.memory_base,
            call.item().size_bytes(),
            capability.expected_output_bytes(call),
        );
        let spec = LaunchSpec {
            program: self.config.program.clone(),
            args: vec![
                "internal-worker".to_string(),
                "--kind".to_string(),
                kind.to_string(),
                "--max-memory".to_string(),
                ceiling.to_string(),
            ],
            env: Vec::new(),
            redirect_output: self.config.redirect_output,
            block_exit: self.config.block_exit,
        }
        .env(WORKER_PORT_ENV, port)
        .env(PARENT_PORT_ENV, lifeline_lease.port());

        let started = Instant::now();
        let mut worker = launch(&spec)?;
        self.launches.fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            pid = worker.pid(),
            %kind,
            port,
            max_memory_mib = ceiling,
            "Worker launched"
        );

        progress.enter(DispatchState::AwaitingReady);
        if let Err(e) = await_listening(host, port, self.config.ready_timeout) {
            let reason = worker.stop(Duration::ZERO);
            tracing::warn!(pid = worker.pid(), port, reason = %reason, "Worker never became ready");
            return Err(e);
        }

        progress.enter(DispatchState::Connecting);
        let mut proxy = RemoteProxy::connect(host, port, kind)?;

        progress.enter(DispatchState::CloningSettings);
        proxy.copy_settings(&capability.settings())?;

        progress.enter(DispatchState::Dispatching);
        let output = proxy.invoke(call)?;
        progress.enter(DispatchState::ResultReady);

        progress.enter(DispatchState::Stopping);
        proxy.close();
        let reason = worker.stop(STOP_GRACE);
        if reason.is_expected() {
            tracing::info!(
                pid = worker.pid(),
                %kind,
                elapsed_ms = started.elapsed().as_millis(),
                "Worker finished"
            );
        } else {
            tracing::warn!(pid = worker.pid(), %kind, reason = %reason, "Worker ended abnormally");
        }
        Ok(output)
    }

    /// Snapshot of this dispatcher's counters.
    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            max_process_count: self.gate.max(),
            live_workers: self.gate.held(),
            peak_workers: self.gate.peak(),
            launches: self.launches.load(Ordering::Relaxed),
            local_runs: self.local_runs.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Bind the parent end of the worker lifeline. The port was free when the
/// broker scanned it; losing it since then is a launch failure.
fn bind_lifeline(host: &str, port: u16) -> Result<TcpListener> {
    TcpListener::bind((host, port)).map_err(|e| {
        PoolError::Launch(format!("cannot bind lifeline port {}:{}: {}", host, port, e))
    })
}

/// Statistics about a dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchStats {
    /// Configured worker limit.
    pub max_process_count: usize,
    /// Workers alive right now.
    pub live_workers: usize,
    /// Most workers ever alive at once.
    pub peak_workers: usize,
    /// Worker processes launched.
    pub launches: usize,
    /// Jobs run in this process.
    pub local_runs: usize,
    /// Jobs that returned a result.
    pub completed: usize,
    /// Jobs that returned an error.
    pub failed: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::Analyzer;
    use crate::document::{DocumentKind, WorkItem};
    use crate::error::JobError;
    use crate::result::JobResult;
    use crate::settings::JobSettings;
    use std::path::PathBuf;

    /// Capability that refuses to be hosted by a worker.
    struct PinnedToProcess {
        dispatcher: Dispatcher,
    }

    impl Capability for PinnedToProcess {
        fn kind(&self) -> ComponentKind {
            ComponentKind::Analyzer
        }
        fn settings(&self) -> JobSettings {
            JobSettings::new()
        }
        fn copy_settings(&self, _: JobSettings) {}
        fn supports_standalone(&self) -> bool {
            false
        }
        fn validate(&self, _: &JobCall<'_>) -> std::result::Result<(), JobError> {
            Ok(())
        }
        fn run_local(&self, _: &JobCall<'_>) -> std::result::Result<JobOutput, JobError> {
            Ok(JobOutput::Findings(JobResult::default()))
        }
        fn invoke(&self, call: &JobCall<'_>) -> Result<JobOutput> {
            self.dispatcher.dispatch(self, call)
        }
    }

    #[test]
    fn test_local_mode_never_launches() {
        let analyzer = Analyzer::with_config(PoolConfig::local_only());
        analyzer.analyze(&WorkItem::text("a.txt", "hello")).unwrap();

        let stats = analyzer.dispatcher().stats();
        assert_eq!(stats.launches, 0);
        assert_eq!(stats.local_runs, 1);
        assert_eq!(stats.completed, 1);
    }

    #[test]
    fn test_validation_precedes_launch() {
        let config = PoolConfig::new()
            .with_max_process_count(1)
            .with_program("/nonexistent/docpool");
        let analyzer = Analyzer::with_config(config);
        let item = WorkItem::new("x.bin", DocumentKind::Binary, vec![0; 4]);

        let err = analyzer.analyze(&item).unwrap_err();
        assert!(matches!(err.as_job(), Some(JobError::UnsupportedInput { .. })));
        let stats = analyzer.dispatcher().stats();
        assert_eq!(stats.launches, 0);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.peak_workers, 0);
    }

    #[test]
    fn test_standalone_unsupported() {
        let pinned = PinnedToProcess {
            dispatcher: Dispatcher::new(PoolConfig::new().with_max_process_count(2)),
        };
        let item = WorkItem::text("a.txt", "x");
        let err = pinned.invoke(&JobCall::Analyze { item: &item }).unwrap_err();
        assert!(matches!(err, PoolError::StandaloneUnsupported(ref k) if k == "analyzer"));
        assert_eq!(pinned.dispatcher.stats().launches, 0);
    }

    #[test]
    fn test_launch_failure_releases_everything() {
        static BROKER: std::sync::OnceLock<PortBroker> = std::sync::OnceLock::new();
        let broker = BROKER.get_or_init(PortBroker::new);
        let config = PoolConfig::new()
            .with_max_process_count(1)
            .with_port_range(49700, 49720)
            .with_program(PathBuf::from("/nonexistent/docpool"));
        let dispatcher = Dispatcher::with_broker(config, broker);
        let analyzer = Analyzer::with_config(PoolConfig::local_only());
        let item = WorkItem::text("a.txt", "x");

        let err = dispatcher
            .dispatch(&analyzer, &JobCall::Analyze { item: &item })
            .unwrap_err();
        assert!(matches!(err, PoolError::Launch(_)));
        assert_eq!(dispatcher.stats().live_workers, 0);
        assert_eq!(dispatcher.stats().launches, 0);
        assert_eq!(broker.reserved_count(), 0);
    }

    #[test]
    fn test_lost_lifeline_port_is_launch_error() {
        let taken = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = taken.local_addr().unwrap().port();

        let err = bind_lifeline("127.0.0.1", port).unwrap_err();
        assert!(matches!(err, PoolError::Launch(_)), "{err}");
        assert!(err.to_string().contains(&format!("127.0.0.1:{}", port)));

        drop(taken);
        assert!(bind_lifeline("127.0.0.1", port).is_ok());
    }

    #[test]
    fn test_readiness_timeout_stops_worker() {
        let config = PoolConfig::new()
            .with_max_process_count(1)
            .with_port_range(49740, 49760)
            .with_ready_timeout(Duration::from_millis(300))
            .with_redirect_output(false)
            .with_block_exit(false)
            .with_program("/bin/sleep");
        // `sleep internal-worker ...` fails at once; either way nothing listens.
        let dispatcher = Dispatcher::new(config);
        let analyzer = Analyzer::with_config(PoolConfig::local_only());
        let item = WorkItem::text("a.txt", "x");

        let err = dispatcher
            .dispatch(&analyzer, &JobCall::Analyze { item: &item })
            .unwrap_err();
        assert!(matches!(err, PoolError::ConnectTimeout { .. }));
        let stats = dispatcher.stats();
        assert_eq!(stats.launches, 1);
        assert_eq!(stats.live_workers, 0);
    }
}
