//! Dispatcher
//!
//! Owns the admission loop: makes sure the base image exists, then keeps
//! every slot busy with a worker until shutdown is requested, either by a
//! signal or by the shutdown flag file. Once admission stops it waits for
//! every in-flight worker, cleanup included, before returning.

use anyhow::{Context, Result};
use ekiden_core::config::Config;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::{JoinError, JoinSet};
use tokio::time::{self, Instant};
use tracing::{debug, error, info};

use crate::config::Timings;
use crate::disk::HostDisk;
use crate::repository::TokenProvider;
use crate::scheduler::slot::{SlotLease, SlotPool};
use crate::scheduler::worker::Worker;
use crate::service::ImageInitializer;
use crate::shutdown::Shutdown;
use crate::ssh::RemoteShell;
use crate::tart::VmTool;

/// External collaborators shared by every worker
#[derive(Clone)]
pub struct Services {
    pub tokens: Arc<dyn TokenProvider>,
    pub tool: Arc<dyn VmTool>,
    pub shell: Arc<dyn RemoteShell>,
    pub disk: Arc<dyn HostDisk>,
    /// Root of the VM tool's on-disk state
    pub tart_home: PathBuf,
}

pub struct Dispatcher {
    config: Arc<Config>,
    services: Services,
    initializer: ImageInitializer,
    timings: Timings,
}

impl Dispatcher {
    /// Creates a dispatcher for a validated configuration
    pub fn new(config: Arc<Config>, services: Services, timings: Timings) -> Self {
        let initializer = ImageInitializer::new(
            &config,
            Arc::clone(&services.tool),
            Arc::clone(&services.shell),
            Arc::clone(&services.disk),
            services.tart_home.clone(),
            timings,
        );

        Self {
            config,
            services,
            initializer,
            timings,
        }
    }

    /// Runs until shutdown and every admitted worker has finished
    ///
    /// # Returns
    /// * `Ok(())` - Clean drain after a shutdown request
    /// * `Err(_)` - Image initialization failed; no VM was created
    pub async fn run(&self, shutdown: &Shutdown) -> Result<()> {
        let image = match self.initializer.ensure_image(shutdown).await {
            Ok(image) => image,
            Err(e) if shutdown.is_requested() => {
                info!("Shutdown requested during image initialization: {:#}", e);
                return Ok(());
            }
            Err(e) => return Err(e).context("Image initialization failed"),
        };

        let worker = Arc::new(Worker::new(&self.config, &self.services, image, self.timings));
        let pool = SlotPool::new(self.config.options.max_concurrent_runners);
        let mut workers = JoinSet::new();

        info!("Starting runner loop with {} slot(s)", pool.size());

        loop {
            if shutdown.is_requested() {
                info!("Shutdown requested, no longer admitting runners");
                break;
            }

            if self.shutdown_flag_present() {
                info!("Shutdown flag file detected, no longer admitting runners");
                shutdown.request();
                break;
            }

            let Some(lease) = self.next_slot(&pool, shutdown).await? else {
                continue;
            };

            debug!(slot = lease.id(), "Admitting runner");
            workers.spawn(Arc::clone(&worker).run(lease, shutdown.clone()));

            while let Some(finished) = workers.try_join_next() {
                log_finished(finished);
            }
        }

        if !workers.is_empty() {
            info!("Waiting for {} in-flight runner(s) to finish", workers.len());
        }
        while let Some(finished) = workers.join_next().await {
            log_finished(finished);
        }

        info!("Runner loop stopped");
        Ok(())
    }

    /// Waits for a free slot
    ///
    /// Returns `None` when shutdown was requested meanwhile, including by the
    /// flag file appearing while every slot is busy.
    async fn next_slot(&self, pool: &SlotPool, shutdown: &Shutdown) -> Result<Option<SlotLease>> {
        let poll = self.timings.shutdown_flag_poll;
        let mut flag_check = time::interval_at(Instant::now() + poll, poll);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.requested() => return Ok(None),
                lease = pool.acquire() => return lease.map(Some),
                _ = flag_check.tick() => {
                    if self.shutdown_flag_present() {
                        info!("Shutdown flag file detected while all slots are busy");
                        shutdown.request();
                        return Ok(None);
                    }
                }
            }
        }
    }

    fn shutdown_flag_present(&self) -> bool {
        self.config
            .options
            .shutdown_flag()
            .is_some_and(|flag| flag.exists())
    }
}

fn log_finished(result: Result<(), JoinError>) {
    match result {
        Ok(()) => {}
        Err(e) if e.is_panic() => error!("Runner task panicked: {}", e),
        Err(e) => error!("Runner task failed: {}", e),
    }
}
