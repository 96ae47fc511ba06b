//! VM instance naming and addressing

use std::net::Ipv4Addr;
use uuid::Uuid;

/// Prefix shared by every instance this host creates
pub const INSTANCE_PREFIX: &str = "runner";

/// Name of the instance run by a given slot
///
/// Slot numbers are unique among live workers, so two concurrent iterations
/// never share a name.
pub fn slot_instance_name(runner_name: &str, slot: usize) -> String {
    format!("{}_{}_{}", INSTANCE_PREFIX, runner_name, slot)
}

/// Name of an instance identified by a run id
pub fn run_instance_name(runner_name: &str, run_id: &str) -> String {
    format!("{}_{}_{}", INSTANCE_PREFIX, runner_name, run_id)
}

/// Generates a short random run id
pub fn generate_run_id() -> String {
    let id = Uuid::new_v4().simple().to_string();
    id[..8].to_string()
}

/// Parses VM tool output into an IPv4 address
///
/// Surrounding whitespace is ignored. Anything that is not a dotted quad
/// returns `None`.
pub fn parse_ipv4(raw: &str) -> Option<Ipv4Addr> {
    raw.trim().parse().ok()
}
