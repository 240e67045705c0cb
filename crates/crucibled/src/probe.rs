//! Best-effort process memory probe.
//!
//! Readings are informational and must never fail a request: any error from
//! the OS query degrades to zeroed readings.

use sysinfo::{Pid, ProcessesToUpdate, System};

use crucible_protocol::MemoryReading;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Returns the current resident and virtual memory sizes in megabytes,
/// rounded to two decimal places. Degrades to `0.0` readings on any failure.
#[must_use]
pub fn memory_usage() -> MemoryReading {
    read_self().unwrap_or_default()
}

/// Returns a memory reading after giving the runtime a chance to release
/// memory. The embedded engine has no collector — dropped values are freed
/// immediately by ownership — so this is the documented no-op plus a fresh
/// reading.
#[must_use]
pub fn clean_memory() -> MemoryReading {
    memory_usage()
}

fn read_self() -> Option<MemoryReading> {
    let pid = Pid::from_u32(std::process::id());
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    let process = system.process(pid)?;
    Some(MemoryReading {
        rss_mb: round_to_hundredths(process.memory() as f64 / BYTES_PER_MB),
        vms_mb: round_to_hundredths(process.virtual_memory() as f64 / BYTES_PER_MB),
    })
}

/// Rounds to two decimal places, matching the wire convention for readings
/// and durations.
pub(crate) fn round_to_hundredths(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
