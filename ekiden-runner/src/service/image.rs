//! Base image initialization
//!
//! Makes sure the configured image is cached locally before the first clone:
//! registry login, cache lookup, optional prune, pull and optional disk
//! resize. The work runs once per initializer and every caller shares its
//! outcome, failures included.

use anyhow::{Context, Result, anyhow};
use ekiden_core::config::{Config, RegistryConfig};
use ekiden_core::domain::image::{ImageSpec, cache_path};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{info, warn};

use crate::config::Timings;
use crate::disk::HostDisk;
use crate::error::RunnerError;
use crate::service::remote::RemoteExecutionClient;
use crate::service::vm::{CleanupGuard, VmController};
use crate::shutdown::Shutdown;
use crate::ssh::RemoteShell;
use crate::tart::{RegistryCredentials, VmTool, instance_disk, oci_cache_root};

/// Disposable instance used to grow the cached image's filesystem
pub const PROBE_INSTANCE: &str = "truncate_instance";

/// Commands that repair the guest disk and grow its container into the free space
pub const RESIZE_COMMANDS: [&str; 2] = [
    "echo y | diskutil repairDisk disk0",
    "diskutil apfs resizeContainer disk0s2 0",
];

/// Ensures the base image is available, once per process
pub struct ImageInitializer {
    tool: Arc<dyn VmTool>,
    shell: Arc<dyn RemoteShell>,
    disk: Arc<dyn HostDisk>,
    registry: RegistryConfig,
    truncate_size: Option<String>,
    prune_cache: bool,
    tart_home: PathBuf,
    timings: Timings,
    resolved: OnceCell<Result<String, Arc<anyhow::Error>>>,
}

impl ImageInitializer {
    pub fn new(
        config: &Config,
        tool: Arc<dyn VmTool>,
        shell: Arc<dyn RemoteShell>,
        disk: Arc<dyn HostDisk>,
        tart_home: PathBuf,
        timings: Timings,
    ) -> Self {
        Self {
            tool,
            shell,
            disk,
            registry: config.registry.clone(),
            truncate_size: config.options.truncate_size().map(str::to_string),
            prune_cache: config.options.prune_cache_before_pull,
            tart_home,
            timings,
            resolved: OnceCell::new(),
        }
    }

    /// Returns the image reference to clone from, initializing it on first use
    ///
    /// Concurrent callers wait for the single initialization in progress.
    pub async fn ensure_image(&self, shutdown: &Shutdown) -> Result<String> {
        let resolved = self
            .resolved
            .get_or_init(|| async { self.initialize(shutdown).await.map_err(Arc::new) })
            .await;

        match resolved {
            Ok(reference) => Ok(reference.clone()),
            Err(e) => Err(anyhow!("{:#}", e)),
        }
    }

    fn credentials(&self) -> Option<RegistryCredentials> {
        self.registry.has_credentials().then(|| RegistryCredentials {
            username: self.registry.username.clone(),
            password: self.registry.password.clone(),
        })
    }

    async fn initialize(&self, shutdown: &Shutdown) -> Result<String> {
        let spec = ImageSpec::from_registry(&self.registry);
        let credentials = self.credentials();

        if let Some(credentials) = &credentials {
            until_shutdown(shutdown, "registry login", self.tool.login(&self.registry.url, credentials))
                .await
                .context("Failed to log in to registry")?;
        }

        let listing = until_shutdown(shutdown, "image listing", self.tool.list())
            .await
            .context("Failed to list local images")?;
        if let Some(found) = spec.find_in_listing(&listing) {
            info!("Using cached image {}", found);
            return Ok(found);
        }

        if self.registry.url.is_empty() {
            return Err(RunnerError::ImageUnavailable {
                image: spec.local_ref,
            }
            .into());
        }

        info!("Image {} not cached, pulling", spec.registry_path);

        if self.prune_cache {
            let cache_root = oci_cache_root(&self.tart_home);
            info!("Pruning image cache {}", cache_root.display());
            if let Err(e) = self.disk.remove_dir(&cache_root).await {
                warn!("Failed to prune image cache: {:#}", e);
            }
        }

        until_shutdown(
            shutdown,
            "image pull",
            self.tool.pull(&spec.registry_path, credentials.as_ref()),
        )
        .await
        .context("Failed to pull image")?;

        if let Some(size) = &self.truncate_size {
            self.resize(&spec, size, shutdown)
                .await
                .context("Failed to resize image disk")?;
        }

        Ok(spec.registry_path)
    }

    /// Grows the cached disk file and its filesystem
    ///
    /// The probe instance is torn down whatever happens.
    async fn resize(&self, spec: &ImageSpec, size: &str, shutdown: &Shutdown) -> Result<()> {
        let cached_disk = cache_path(&oci_cache_root(&self.tart_home), &spec.registry_path).join("disk.img");
        until_shutdown(shutdown, "disk truncate", self.disk.truncate(&cached_disk, size)).await?;

        let mut probe = VmController::new(
            Arc::clone(&self.tool),
            Arc::clone(&self.shell),
            spec.registry_path.clone(),
            self.timings,
        );
        let guard = CleanupGuard::new(Arc::clone(&self.tool), PROBE_INSTANCE, self.timings.cleanup_timeout);

        let result = self.grow_filesystem(&mut probe, &cached_disk, shutdown).await;

        probe.cleanup(PROBE_INSTANCE).await;
        guard.disarm();

        result
    }

    async fn grow_filesystem(&self, probe: &mut VmController, cached_disk: &Path, shutdown: &Shutdown) -> Result<()> {
        probe.clone_instance(PROBE_INSTANCE).await?;
        let running = probe.start(PROBE_INSTANCE).await?;
        let ip = probe.wait_for_address(PROBE_INSTANCE, shutdown).await?;

        let remote = RemoteExecutionClient::new(Arc::clone(&self.shell), self.timings);
        remote.wait_for_ready(ip, shutdown).await?;

        for command in RESIZE_COMMANDS {
            if let Err(e) = remote.execute(ip, command, false).await {
                warn!("Resize step `{}` failed: {:#}", command, e);
            }
        }

        probe.stop(PROBE_INSTANCE).await?;
        if !running.wait_for_exit(self.timings.vm_exit_grace).await {
            warn!("Probe VM did not exit in time, copying its disk anyway");
        }

        let probe_disk = instance_disk(&self.tart_home, PROBE_INSTANCE);
        self.disk
            .replace(&probe_disk, cached_disk)
            .await
            .context("Failed to copy resized disk into the cache")?;

        info!("Image disk resized");
        Ok(())
    }
}

/// Runs a VM tool or disk call unless shutdown is requested first
///
/// Dropping the call kills the child process behind it.
async fn until_shutdown<T>(shutdown: &Shutdown, what: &str, call: impl Future<Output = Result<T>>) -> Result<T> {
    tokio::select! {
        biased;
        _ = shutdown.requested() => Err(RunnerError::cancelled(what).into()),
        result = call => result,
    }
}
