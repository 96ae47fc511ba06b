mod image;
mod remote;
mod vm;

pub use image::{ImageInitializer, PROBE_INSTANCE, RESIZE_COMMANDS};
pub use remote::{RUN_JOB_COMMAND, RemoteExecutionClient, RunnerRegistration, configure_command};
pub use vm::{CleanupGuard, VmController};
