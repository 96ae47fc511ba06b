//! Remote shell into guest VMs
//!
//! Sessions are password-authenticated and non-interactive. Host key
//! checking is disabled because every VM is fresh and addresses are reused
//! across tenants.

use anyhow::Result;
use async_trait::async_trait;
use ekiden_core::config::Secret;
use std::net::Ipv4Addr;
use tracing::debug;

use crate::process::{command, run_captured, run_streamed};

/// Low-level remote command execution against one guest address
#[async_trait]
pub trait RemoteShell: Send + Sync {
    /// Runs a trivial command with a short connect timeout
    async fn probe(&self, ip: Ipv4Addr) -> Result<()>;

    /// Runs `command` on the guest
    ///
    /// With `stream` the output goes to the host's stdout/stderr and an
    /// empty string is returned; otherwise stdout is captured.
    async fn execute(&self, ip: Ipv4Addr, command: &str, stream: bool) -> Result<String>;

    /// Drops stale host key material recorded for `ip`
    async fn forget_host_key(&self, ip: Ipv4Addr) -> Result<()>;
}

/// `RemoteShell` backed by `sshpass` and `ssh`
#[derive(Debug, Clone)]
pub struct SshPassShell {
    username: String,
    password: Secret,
}

impl SshPassShell {
    pub fn new(username: impl Into<String>, password: Secret) -> Self {
        Self {
            username: username.into(),
            password,
        }
    }

    fn ssh(&self, ip: Ipv4Addr, connect_timeout: Option<u32>, remote: &str) -> tokio::process::Command {
        let mut cmd = command("sshpass");
        cmd.arg("-e").arg("ssh").arg("-q");
        if let Some(secs) = connect_timeout {
            cmd.arg("-o").arg(format!("ConnectTimeout={}", secs));
        }
        cmd.arg("-o")
            .arg("StrictHostKeyChecking=no")
            .arg(format!("{}@{}", self.username, ip))
            .arg(remote)
            .env("SSHPASS", self.password.expose());
        cmd
    }
}

#[async_trait]
impl RemoteShell for SshPassShell {
    async fn probe(&self, ip: Ipv4Addr) -> Result<()> {
        run_captured(self.ssh(ip, Some(1), "pwd"), "ssh probe").await?;
        Ok(())
    }

    async fn execute(&self, ip: Ipv4Addr, command: &str, stream: bool) -> Result<String> {
        debug!(%ip, "Executing remote command");

        let cmd = self.ssh(ip, None, command);
        if stream {
            run_streamed(cmd, "ssh").await?;
            Ok(String::new())
        } else {
            run_captured(cmd, "ssh").await
        }
    }

    async fn forget_host_key(&self, ip: Ipv4Addr) -> Result<()> {
        let mut cmd = command("ssh-keygen");
        cmd.arg("-R").arg(ip.to_string());
        run_captured(cmd, "ssh-keygen").await?;
        Ok(())
    }
}
