//! Scheduler layer for the runner
//!
//! The dispatcher admits workers into a bounded pool of slots; each worker
//! drives one ephemeral VM from clone to deletion.

pub mod dispatcher;
pub mod slot;
pub mod worker;

pub use dispatcher::{Dispatcher, Services};
pub use slot::{SlotLease, SlotPool};
pub use worker::Worker;
