//! Host-side disk image operations

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::Path;
use tracing::{debug, info};

use crate::process::{command, run_captured};

/// File operations on cached VM disk images
#[async_trait]
pub trait HostDisk: Send + Sync {
    /// Grows (or shrinks) the file at `path` to `size`, e.g. `100G`
    async fn truncate(&self, path: &Path, size: &str) -> Result<()>;

    /// Replaces `to` with a copy of `from`
    async fn replace(&self, from: &Path, to: &Path) -> Result<()>;

    /// Removes a directory tree; a missing directory is not an error
    async fn remove_dir(&self, path: &Path) -> Result<()>;
}

/// `HostDisk` backed by `truncate`, `cp` and the filesystem
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardHostDisk;

#[async_trait]
impl HostDisk for StandardHostDisk {
    async fn truncate(&self, path: &Path, size: &str) -> Result<()> {
        info!("Resizing {} to {}", path.display(), size);

        let mut cmd = command("truncate");
        cmd.arg("-s").arg(size).arg(path);
        run_captured(cmd, "truncate").await?;
        Ok(())
    }

    async fn replace(&self, from: &Path, to: &Path) -> Result<()> {
        debug!("Replacing {} with {}", to.display(), from.display());

        match tokio::fs::remove_file(to).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to remove {}", to.display()));
            }
        }

        // -c clones the file on APFS instead of copying the blocks
        let mut cmd = command("cp");
        cmd.arg("-c").arg(from).arg(to);
        run_captured(cmd, "cp").await?;
        Ok(())
    }

    async fn remove_dir(&self, path: &Path) -> Result<()> {
        match tokio::fs::remove_dir_all(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to remove {}", path.display())),
        }
    }
}
