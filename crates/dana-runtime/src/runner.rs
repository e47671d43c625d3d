//! Guarded periodic run loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dana_core::RunConfig;
use tokio::sync::Notify;
use tracing::{debug, info};

use crate::guard::{ExecutionGuard, GuardToken};
use crate::orchestrator::Orchestrator;
use crate::pipeline::Shape;
use crate::types::{CycleOutcome, CycleReport, RunExit};

/// Clean-shutdown hook, checked between cycles.
///
/// Triggering never interrupts a running cycle; it stops the loop before the
/// next one and cuts the sleep short.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    inner: Arc<ShutdownInner>,
}

#[derive(Debug, Default)]
struct ShutdownInner {
    requested: AtomicBool,
    notify: Notify,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        if !self.inner.requested.swap(true, Ordering::SeqCst) {
            info!("Shutdown requested");
        }
        self.inner.notify.notify_waiters();
    }

    pub fn is_requested(&self) -> bool {
        self.inner.requested.load(Ordering::SeqCst)
    }

    /// Resolves once shutdown has been requested.
    pub async fn wait(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_requested() {
                return;
            }
            notified.await;
        }
    }
}

/// Runs orchestration cycles under a single-instance guard.
pub struct Runner<S: Shape> {
    orchestrator: Arc<Orchestrator<S>>,
    guard: Arc<dyn ExecutionGuard>,
    lock_id: String,
    program_name: String,
    interval: Duration,
    force: bool,
    shutdown: Shutdown,
}

impl<S> Runner<S>
where
    S: Shape + Send + Sync + 'static,
{
    pub fn new(
        orchestrator: Orchestrator<S>,
        guard: Arc<dyn ExecutionGuard>,
        config: &RunConfig,
    ) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
            guard,
            lock_id: config.lock_file.display().to_string(),
            program_name: config.program_name.clone(),
            interval: config.interval,
            force: config.force,
            shutdown: Shutdown::new(),
        }
    }

    /// Override the sleep between cycles.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_shutdown(mut self, shutdown: Shutdown) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    pub fn orchestrator(&self) -> &Orchestrator<S> {
        &self.orchestrator
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Acquire the guard, then cycle with a fixed sleep until shutdown.
    ///
    /// Returns immediately with zero cycles when the guard is held elsewhere.
    pub async fn run(&self) -> RunExit {
        let token = match self.acquire() {
            Ok(token) => token,
            Err(exit) => return exit,
        };

        info!(
            "{} started: interval={}s, force={}",
            self.program_name,
            self.interval.as_secs_f64(),
            self.force
        );

        let mut cycles = 0u64;
        let mut failed_cycles = 0u64;
        loop {
            if self.shutdown.is_requested() {
                break;
            }

            let outcome = self.cycle().await;
            cycles += 1;
            if !outcome.is_success() {
                failed_cycles += 1;
            }

            if self.shutdown.is_requested() {
                break;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = self.shutdown.wait() => break,
            }
        }

        info!(
            "{} stopped after {} cycles ({} failed)",
            self.program_name, cycles, failed_cycles
        );
        drop(token);
        RunExit::Stopped {
            cycles,
            failed_cycles,
        }
    }

    /// Acquire the guard and run exactly one cycle.
    pub async fn run_once(&self) -> RunExit {
        let token = match self.acquire() {
            Ok(token) => token,
            Err(exit) => return exit,
        };

        let outcome = self.cycle().await;
        drop(token);
        RunExit::Stopped {
            cycles: 1,
            failed_cycles: u64::from(!outcome.is_success()),
        }
    }

    fn acquire(&self) -> Result<GuardToken, RunExit> {
        match self.guard.acquire(&self.lock_id, &self.program_name) {
            Ok(token) => {
                debug!("Holding guard {}", token.label());
                Ok(token)
            }
            Err(e) => {
                self.orchestrator
                    .diagnostics()
                    .critical(format_args!("{} not started: {}", self.program_name, e));
                Err(RunExit::LockUnavailable(e.to_string()))
            }
        }
    }

    async fn cycle(&self) -> CycleOutcome {
        let diagnostics = self.orchestrator.diagnostics();
        diagnostics.cycle_started();

        let orchestrator = Arc::clone(&self.orchestrator);
        let force = self.force;
        let outcome = match tokio::task::spawn_blocking(move || orchestrator.run_cycle(force)).await
        {
            Ok(outcome) => outcome,
            Err(e) => CycleOutcome::failed(format!("cycle task failed: {}", e), CycleReport::default()),
        };

        diagnostics.cycle_finished(&outcome);
        outcome
    }
}
