//! Worker
//!
//! One worker runs one iteration: fetch a token, bring up a fresh VM,
//! register a single-use runner, let it run one job, tear the VM down.
//! Cleanup runs on every exit path; the slot is released only afterwards,
//! following the failure backoff when the iteration failed.

use anyhow::{Result, bail};
use chrono::Utc;
use ekiden_core::config::Config;
use ekiden_core::domain::instance::{generate_run_id, run_instance_name, slot_instance_name};
use ekiden_core::domain::lifecycle::LifecycleState;
use ekiden_core::domain::token::RegistrationToken;
use std::sync::Arc;
use tracing::{Instrument, error, info, info_span, warn};

use crate::config::Timings;
use crate::error::RunnerError;
use crate::repository::TokenProvider;
use crate::scheduler::dispatcher::Services;
use crate::scheduler::slot::SlotLease;
use crate::service::{CleanupGuard, RemoteExecutionClient, RunnerRegistration, VmController};
use crate::shutdown::Shutdown;
use crate::ssh::RemoteShell;
use crate::tart::VmTool;

/// Runs VM iterations; shared by every slot
pub struct Worker {
    tokens: Arc<dyn TokenProvider>,
    tool: Arc<dyn VmTool>,
    shell: Arc<dyn RemoteShell>,
    remote: RemoteExecutionClient,
    registration: RunnerRegistration,
    runner_name: String,
    /// Resolved image reference every instance is cloned from
    image: String,
    single_slot: bool,
    timings: Timings,
}

impl Worker {
    pub fn new(config: &Config, services: &Services, image: impl Into<String>, timings: Timings) -> Self {
        Self {
            tokens: Arc::clone(&services.tokens),
            tool: Arc::clone(&services.tool),
            shell: Arc::clone(&services.shell),
            remote: RemoteExecutionClient::new(Arc::clone(&services.shell), timings),
            registration: RunnerRegistration::from_config(&config.github),
            runner_name: config.github.runner_name.clone(),
            image: image.into(),
            single_slot: config.options.max_concurrent_runners == 1,
            timings,
        }
    }

    /// Instance name for an iteration in `slot`
    ///
    /// With a single slot every iteration gets a fresh random run id,
    /// otherwise the slot number keeps concurrent names apart.
    pub fn instance_name(&self, slot: usize) -> String {
        if self.single_slot {
            run_instance_name(&self.runner_name, &generate_run_id())
        } else {
            slot_instance_name(&self.runner_name, slot)
        }
    }

    /// Runs one iteration in the leased slot, then releases it
    ///
    /// Failures are logged here and never propagate. After a failure that was
    /// not caused by shutdown the slot is held for the failure backoff.
    pub async fn run(self: Arc<Self>, lease: SlotLease, shutdown: Shutdown) {
        let slot = lease.id();
        let instance = self.instance_name(slot);
        let span = info_span!("iteration", slot, instance = %instance);

        async move {
            match self.run_iteration(&instance, &shutdown).await {
                Ok(()) => info!("Run completed"),
                Err(e) if RunnerError::is_cancellation(&e) || shutdown.is_requested() => {
                    info!("Run ended by shutdown: {:#}", e);
                }
                Err(e) => {
                    error!("Run failed: {:#}", e);
                    info!("Backing off for {:?}", self.timings.failure_backoff);
                    tokio::select! {
                        _ = tokio::time::sleep(self.timings.failure_backoff) => {}
                        _ = shutdown.requested() => {}
                    }
                }
            }
            drop(lease);
        }
        .instrument(span)
        .await
    }

    /// Steps of one iteration; the VM is always cleaned up before returning
    pub async fn run_iteration(&self, instance: &str, shutdown: &Shutdown) -> Result<()> {
        info!("Starting new run");

        let token = self.tokens.registration_token().await?;

        if shutdown.is_requested() {
            return Err(RunnerError::cancelled("VM clone").into());
        }

        let mut vm = VmController::new(
            Arc::clone(&self.tool),
            Arc::clone(&self.shell),
            self.image.as_str(),
            self.timings,
        );
        let guard = CleanupGuard::new(Arc::clone(&self.tool), instance, self.timings.cleanup_timeout);

        let outcome = self.drive(&mut vm, instance, &token, shutdown).await;
        if outcome.is_err() && vm.state() != LifecycleState::Failed {
            vm.transition(LifecycleState::Failed);
        }

        vm.cleanup(instance).await;
        guard.disarm();

        outcome
    }

    async fn drive(
        &self,
        vm: &mut VmController,
        instance: &str,
        token: &RegistrationToken,
        shutdown: &Shutdown,
    ) -> Result<()> {
        vm.clone_instance(instance).await?;
        let running = vm.start(instance).await?;
        let ip = vm.wait_for_address(instance, shutdown).await?;

        self.remote.wait_for_ready(ip, shutdown).await?;

        if token.is_expired(Utc::now()) {
            bail!("Registration token expired before the runner was configured");
        }

        self.remote
            .configure(ip, &self.registration, token, instance, shutdown)
            .await?;
        vm.transition(LifecycleState::Configured);

        vm.transition(LifecycleState::JobRunning);
        match self.remote.run_job(ip, shutdown).await {
            Ok(()) => info!("Runner finished its job"),
            Err(e) if RunnerError::is_cancellation(&e) => return Err(e),
            Err(e) => warn!("Runner exited with error: {:#}", e),
        }

        if let Err(e) = vm.stop(instance).await {
            warn!("Failed to stop VM gracefully: {:#}", e);
        }
        if !running.wait_for_exit(self.timings.vm_exit_grace).await {
            warn!("VM process did not exit within {:?}", self.timings.vm_exit_grace);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::slot::SlotPool;
    use crate::service::RUN_JOB_COMMAND;
    use crate::testing::{FakeShell, FakeTokens, FakeVmTool, Harness, VmEvent, test_config};
    use std::time::Duration;
    use tokio::time::Instant;

    fn worker(harness: &Harness, max: usize) -> Arc<Worker> {
        Arc::new(Worker::new(
            &test_config(max),
            &harness.services(),
            "runner:latest",
            Timings::default(),
        ))
    }

    fn deletes(tool: &FakeVmTool, instance: &str) -> usize {
        tool.count(|e| *e == VmEvent::Delete(instance.to_string()))
    }

    #[test]
    fn test_instance_names() {
        let harness = Harness::default();

        let multi = worker(&harness, 3);
        assert_eq!(multi.instance_name(2), "runner_mac_2");

        let single = worker(&harness, 1);
        let name = single.instance_name(0);
        assert!(name.starts_with("runner_mac_"));
        assert_eq!(name.len(), "runner_mac_".len() + 8);
        assert_ne!(name, single.instance_name(0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_iteration() {
        let harness = Harness::default();
        let worker = worker(&harness, 2);

        worker.run_iteration("runner_mac_0", &Shutdown::new()).await.unwrap();

        let tool = &harness.tool;
        assert_eq!(
            tool.events(),
            vec![
                VmEvent::Clone {
                    source: "runner:latest".to_string(),
                    name: "runner_mac_0".to_string(),
                },
                VmEvent::Run("runner_mac_0".to_string()),
                VmEvent::Stop("runner_mac_0".to_string()),
                VmEvent::Delete("runner_mac_0".to_string()),
            ]
        );

        let commands = harness.shell.commands();
        assert_eq!(commands.len(), 2);
        assert!(commands[0].contains("--token test-token"));
        assert!(commands[0].contains("--name runner_mac_0"));
        assert_eq!(commands[1], RUN_JOB_COMMAND);
        assert_eq!(harness.tokens.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_job_still_succeeds() {
        let harness = Harness::new(FakeVmTool::new(), FakeShell::new().failing_job(), FakeTokens::new());
        let worker = worker(&harness, 2);

        worker.run_iteration("runner_mac_0", &Shutdown::new()).await.unwrap();
        assert_eq!(deletes(&harness.tool, "runner_mac_0"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_configure_failure_cleans_up_and_backs_off() {
        let harness = Harness::new(FakeVmTool::new(), FakeShell::new().failing_configure(), FakeTokens::new());
        let worker = worker(&harness, 2);
        let pool = SlotPool::new(2);
        let lease = pool.acquire().await.unwrap();

        let started = Instant::now();
        worker.clone().run(lease, Shutdown::new()).await;

        assert!(started.elapsed() >= Duration::from_secs(10));
        assert_eq!(pool.available(), 2);
        assert_eq!(deletes(&harness.tool, "runner_mac_0"), 1);
        assert_eq!(harness.tool.live_instances(), 0);
        // The job never started
        assert!(!harness.shell.commands().iter().any(|c| c == RUN_JOB_COMMAND));
    }

    #[tokio::test(start_paused = true)]
    async fn test_address_timeout_cleans_up() {
        let harness = Harness::new(FakeVmTool::new().without_address(), FakeShell::new(), FakeTokens::new());
        let worker = worker(&harness, 2);

        let started = Instant::now();
        let err = worker.run_iteration("runner_mac_1", &Shutdown::new()).await.unwrap_err();

        assert!(RunnerError::is_timeout(&err));
        assert!(started.elapsed() >= Duration::from_secs(300));
        assert_eq!(deletes(&harness.tool, "runner_mac_1"), 1);
        assert!(harness.shell.commands().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_clone_failure_attempts_cleanup() {
        let harness = Harness::new(FakeVmTool::new().failing_clone(), FakeShell::new(), FakeTokens::new());
        let worker = worker(&harness, 2);

        assert!(worker.run_iteration("runner_mac_0", &Shutdown::new()).await.is_err());
        assert_eq!(harness.tool.count(|e| matches!(e, VmEvent::Run(_))), 0);
        assert_eq!(deletes(&harness.tool, "runner_mac_0"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_stop_still_waits_for_exit() {
        let harness = Harness::new(FakeVmTool::new().failing_stop(), FakeShell::new(), FakeTokens::new());
        let worker = worker(&harness, 2);

        let started = Instant::now();
        worker.run_iteration("runner_mac_0", &Shutdown::new()).await.unwrap();

        assert!(started.elapsed() >= Timings::default().vm_exit_grace);
        // Graceful stop, then the retry during cleanup
        assert_eq!(harness.tool.count(|e| matches!(e, VmEvent::Stop(_))), 2);
        assert_eq!(deletes(&harness.tool, "runner_mac_0"), 1);
        assert_eq!(harness.tool.live_instances(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_token_failure_creates_nothing() {
        let harness = Harness::new(FakeVmTool::new(), FakeShell::new(), FakeTokens::failing());
        let worker = worker(&harness, 2);
        let pool = SlotPool::new(2);
        let lease = pool.acquire().await.unwrap();

        let started = Instant::now();
        worker.clone().run(lease, Shutdown::new()).await;

        assert!(harness.tool.events().is_empty());
        assert!(started.elapsed() >= Duration::from_secs(10));
        assert_eq!(pool.available(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_token_is_not_used() {
        let harness = Harness::new(FakeVmTool::new(), FakeShell::new(), FakeTokens::expired());
        let worker = worker(&harness, 2);

        let err = worker.run_iteration("runner_mac_0", &Shutdown::new()).await.unwrap_err();

        assert!(format!("{:#}", err).contains("expired"));
        assert!(harness.shell.commands().is_empty());
        assert_eq!(deletes(&harness.tool, "runner_mac_0"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_before_clone_creates_nothing() {
        let harness = Harness::default();
        let worker = worker(&harness, 2);
        let shutdown = Shutdown::new();
        shutdown.request();

        let err = worker.run_iteration("runner_mac_0", &shutdown).await.unwrap_err();

        assert!(RunnerError::is_cancellation(&err));
        assert!(harness.tool.events().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_during_wait_skips_backoff() {
        let harness = Harness::new(FakeVmTool::new().without_address(), FakeShell::new(), FakeTokens::new());
        let worker = worker(&harness, 2);
        let pool = SlotPool::new(2);
        let lease = pool.acquire().await.unwrap();
        let shutdown = Shutdown::new();

        let trigger = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(20)).await;
            trigger.request();
        });

        let started = Instant::now();
        worker.clone().run(lease, shutdown).await;

        assert!(started.elapsed() < Duration::from_secs(25));
        assert_eq!(deletes(&harness.tool, "runner_mac_0"), 1);
        assert_eq!(pool.available(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_job_finishes_during_graceful_shutdown() {
        let harness = Harness::new(
            FakeVmTool::new(),
            FakeShell::new().with_job_duration(Duration::from_secs(600)),
            FakeTokens::new(),
        );
        let worker = worker(&harness, 2);
        let shutdown = Shutdown::new();

        let trigger = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(60)).await;
            trigger.request();
        });

        let started = Instant::now();
        worker.run_iteration("runner_mac_0", &shutdown).await.unwrap();

        assert!(started.elapsed() >= Duration::from_secs(600));
        assert_eq!(harness.tool.count(|e| matches!(e, VmEvent::Stop(_))), 1);
        assert_eq!(deletes(&harness.tool, "runner_mac_0"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_forced_shutdown_aborts_job() {
        let harness = Harness::new(
            FakeVmTool::new(),
            FakeShell::new().with_job_duration(Duration::from_secs(3600)),
            FakeTokens::new(),
        );
        let worker = worker(&harness, 2);
        let shutdown = Shutdown::new();

        let trigger = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(60)).await;
            trigger.force();
        });

        let started = Instant::now();
        let err = worker.run_iteration("runner_mac_0", &shutdown).await.unwrap_err();

        assert!(RunnerError::is_cancellation(&err));
        assert!(started.elapsed() < Duration::from_secs(120));
        assert_eq!(deletes(&harness.tool, "runner_mac_0"), 1);
        assert_eq!(harness.tool.live_instances(), 0);
    }
}
