//! In-memory fakes of the runner's collaborators

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use ekiden_core::config::Config;
use ekiden_core::domain::token::RegistrationToken;
use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;

use crate::disk::HostDisk;
use crate::error::RunnerError;
use crate::repository::TokenProvider;
use crate::scheduler::Services;
use crate::ssh::RemoteShell;
use crate::tart::{RegistryCredentials, RunningVm, VmTool};

/// Configuration used by orchestration tests
///
/// Runner name `mac`, image `runner:latest` without registry, shutdown flag
/// disabled.
pub fn test_config(max_concurrent_runners: usize) -> Config {
    let mut config = Config::default();
    config.github.api_token = "ghp_test".into();
    config.github.registration_endpoint = "http://127.0.0.1:1/registration-token".to_string();
    config.github.runner_url = "https://github.com/acme".to_string();
    config.github.runner_name = "mac".to_string();
    config.registry.image_name = "runner:latest".to_string();
    config.options.shutdown_flag_file = PathBuf::new();
    config.options.max_concurrent_runners = max_concurrent_runners;
    config
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VmEvent {
    Login(String),
    List,
    Pull(String),
    Clone { source: String, name: String },
    Run(String),
    Stop(String),
    Delete(String),
}

struct VmState {
    events: Vec<VmEvent>,
    listing: String,
    live: HashSet<String>,
    max_live: usize,
    running: HashMap<String, oneshot::Sender<Result<()>>>,
    ip: String,
    pull_duration: Duration,
    fail_clone: bool,
    fail_stop: bool,
    fail_delete: bool,
}

/// Records every call and keeps track of live instances
pub struct FakeVmTool {
    state: Mutex<VmState>,
}

impl FakeVmTool {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(VmState {
                events: Vec::new(),
                listing: String::new(),
                live: HashSet::new(),
                max_live: 0,
                running: HashMap::new(),
                ip: "192.168.64.10\n".to_string(),
                pull_duration: Duration::ZERO,
                fail_clone: false,
                fail_stop: false,
                fail_delete: false,
            }),
        }
    }

    pub fn with_listing(self, listing: &str) -> Self {
        self.state.lock().unwrap().listing = listing.to_string();
        self
    }

    /// `ip` never answers with an address
    pub fn without_address(self) -> Self {
        self.state.lock().unwrap().ip = "no IP address found".to_string();
        self
    }

    /// `pull` takes this long before the image shows up in the listing
    pub fn with_pull_duration(self, duration: Duration) -> Self {
        self.state.lock().unwrap().pull_duration = duration;
        self
    }

    pub fn failing_clone(self) -> Self {
        self.state.lock().unwrap().fail_clone = true;
        self
    }

    /// `stop` errors and leaves the VM process running
    pub fn failing_stop(self) -> Self {
        self.state.lock().unwrap().fail_stop = true;
        self
    }

    pub fn failing_delete(self) -> Self {
        self.state.lock().unwrap().fail_delete = true;
        self
    }

    pub fn events(&self) -> Vec<VmEvent> {
        self.state.lock().unwrap().events.clone()
    }

    pub fn count(&self, matches: impl Fn(&VmEvent) -> bool) -> usize {
        self.state.lock().unwrap().events.iter().filter(|e| matches(e)).count()
    }

    /// Instances cloned and not deleted yet
    pub fn live_instances(&self) -> usize {
        self.state.lock().unwrap().live.len()
    }

    /// Highest number of instances alive at once
    pub fn max_live(&self) -> usize {
        self.state.lock().unwrap().max_live
    }
}

#[async_trait]
impl VmTool for FakeVmTool {
    async fn list(&self) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        state.events.push(VmEvent::List);
        Ok(state.listing.clone())
    }

    async fn login(&self, registry: &str, _credentials: &RegistryCredentials) -> Result<()> {
        self.state.lock().unwrap().events.push(VmEvent::Login(registry.to_string()));
        Ok(())
    }

    async fn pull(&self, reference: &str, _credentials: Option<&RegistryCredentials>) -> Result<()> {
        let duration = {
            let mut state = self.state.lock().unwrap();
            state.events.push(VmEvent::Pull(reference.to_string()));
            state.pull_duration
        };
        tokio::time::sleep(duration).await;

        let mut state = self.state.lock().unwrap();
        state.listing.push_str(&format!("\noci {} 50 stopped", reference));
        Ok(())
    }

    async fn clone_vm(&self, source: &str, name: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.events.push(VmEvent::Clone {
            source: source.to_string(),
            name: name.to_string(),
        });

        if state.fail_clone {
            return Err(anyhow!("clone failed"));
        }
        if !state.live.insert(name.to_string()) {
            return Err(anyhow!("VM \"{}\" already exists", name));
        }
        state.max_live = state.max_live.max(state.live.len());
        Ok(())
    }

    async fn run(&self, name: &str) -> Result<RunningVm> {
        let mut state = self.state.lock().unwrap();
        state.events.push(VmEvent::Run(name.to_string()));

        let (tx, rx) = oneshot::channel();
        state.running.insert(name.to_string(), tx);
        Ok(RunningVm::new(rx))
    }

    async fn ip(&self, _name: &str) -> Result<String> {
        Ok(self.state.lock().unwrap().ip.clone())
    }

    async fn stop(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.events.push(VmEvent::Stop(name.to_string()));
        if state.fail_stop {
            return Err(anyhow!("stop failed"));
        }
        if let Some(exit) = state.running.remove(name) {
            let _ = exit.send(Ok(()));
        }
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.events.push(VmEvent::Delete(name.to_string()));
        state.running.remove(name);
        state.live.remove(name);

        if state.fail_delete {
            return Err(anyhow!("delete failed"));
        }
        Ok(())
    }
}

#[derive(Default)]
struct ShellState {
    commands: Vec<String>,
    jobs_finished: usize,
    forgotten: Vec<Ipv4Addr>,
}

/// Guest shell that answers from a script of canned outcomes
#[derive(Default)]
pub struct FakeShell {
    state: Mutex<ShellState>,
    unreachable: bool,
    fail_configure: bool,
    fail_job: bool,
    job_duration: Duration,
}

impl FakeShell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unreachable(mut self) -> Self {
        self.unreachable = true;
        self
    }

    pub fn failing_configure(mut self) -> Self {
        self.fail_configure = true;
        self
    }

    pub fn failing_job(mut self) -> Self {
        self.fail_job = true;
        self
    }

    pub fn with_job_duration(mut self, duration: Duration) -> Self {
        self.job_duration = duration;
        self
    }

    /// Commands passed to `execute`, in order
    pub fn commands(&self) -> Vec<String> {
        self.state.lock().unwrap().commands.clone()
    }

    /// Job runs that completed without being aborted
    pub fn jobs_finished(&self) -> usize {
        self.state.lock().unwrap().jobs_finished
    }

    /// Addresses whose host keys were removed
    pub fn forgotten_host_keys(&self) -> Vec<Ipv4Addr> {
        self.state.lock().unwrap().forgotten.clone()
    }
}

#[async_trait]
impl RemoteShell for FakeShell {
    async fn probe(&self, _ip: Ipv4Addr) -> Result<()> {
        if self.unreachable {
            return Err(anyhow!("connection refused"));
        }
        Ok(())
    }

    async fn execute(&self, _ip: Ipv4Addr, command: &str, _stream: bool) -> Result<String> {
        self.state.lock().unwrap().commands.push(command.to_string());

        if command.contains("config.sh") && self.fail_configure {
            return Err(RunnerError::CommandFailed {
                program: "ssh".to_string(),
                status: "exit status: 1".to_string(),
                output: "Http response code: NotFound".to_string(),
            }
            .into());
        }

        if command.contains("run.sh") {
            tokio::time::sleep(self.job_duration).await;
            self.state.lock().unwrap().jobs_finished += 1;
            if self.fail_job {
                return Err(RunnerError::CommandFailed {
                    program: "ssh".to_string(),
                    status: "exit status: 1".to_string(),
                    output: String::new(),
                }
                .into());
            }
        }

        Ok(String::new())
    }

    async fn forget_host_key(&self, ip: Ipv4Addr) -> Result<()> {
        self.state.lock().unwrap().forgotten.push(ip);
        Ok(())
    }
}

/// Token provider counting its calls
pub struct FakeTokens {
    calls: AtomicUsize,
    fail: bool,
    lifetime: ChronoDuration,
}

impl FakeTokens {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail: false,
            lifetime: ChronoDuration::hours(1),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new()
        }
    }

    /// Issues tokens that are already past their expiry
    pub fn expired() -> Self {
        Self {
            lifetime: ChronoDuration::minutes(-1),
            ..Self::new()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenProvider for FakeTokens {
    async fn registration_token(&self) -> Result<RegistrationToken> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(anyhow!("API error (401 Unauthorized): Bad credentials"));
        }
        Ok(RegistrationToken::new("test-token", Some(Utc::now() + self.lifetime)))
    }
}

/// Host disk recording operations as strings
#[derive(Default)]
pub struct FakeDisk {
    operations: Mutex<Vec<String>>,
}

impl FakeDisk {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn operations(&self) -> Vec<String> {
        self.operations.lock().unwrap().clone()
    }
}

#[async_trait]
impl HostDisk for FakeDisk {
    async fn truncate(&self, path: &Path, size: &str) -> Result<()> {
        self.operations
            .lock()
            .unwrap()
            .push(format!("truncate {} {}", path.display(), size));
        Ok(())
    }

    async fn replace(&self, from: &Path, to: &Path) -> Result<()> {
        self.operations
            .lock()
            .unwrap()
            .push(format!("replace {} {}", from.display(), to.display()));
        Ok(())
    }

    async fn remove_dir(&self, path: &Path) -> Result<()> {
        self.operations
            .lock()
            .unwrap()
            .push(format!("remove {}", path.display()));
        Ok(())
    }
}

/// Fakes wired together, with typed handles kept for assertions
pub struct Harness {
    pub tool: Arc<FakeVmTool>,
    pub shell: Arc<FakeShell>,
    pub tokens: Arc<FakeTokens>,
    pub disk: Arc<FakeDisk>,
}

impl Harness {
    pub fn new(tool: FakeVmTool, shell: FakeShell, tokens: FakeTokens) -> Self {
        Self {
            tool: Arc::new(tool),
            shell: Arc::new(shell),
            tokens: Arc::new(tokens),
            disk: Arc::new(FakeDisk::new()),
        }
    }

    pub fn services(&self) -> Services {
        Services {
            tokens: self.tokens.clone(),
            tool: self.tool.clone(),
            shell: self.shell.clone(),
            disk: self.disk.clone(),
            tart_home: PathBuf::from("/Users/ci/.tart"),
        }
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new(FakeVmTool::new(), FakeShell::new(), FakeTokens::new())
    }
}
