//! Process memory probe.

use serde::Serialize;

/// Resident memory of this process, in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MemoryUsage {
    pub current: u64,
    pub peak: u64,
}

/// Read current and peak resident set size.
///
/// Linux only (`/proc/self/status`); other platforms report zeros.
pub fn memory_usage() -> MemoryUsage {
    std::fs::read_to_string("/proc/self/status")
        .map(|status| parse_status(&status))
        .unwrap_or_default()
}

fn parse_status(status: &str) -> MemoryUsage {
    let mut usage = MemoryUsage::default();
    for line in status.lines() {
        if let Some(rest) = line.strip_prefix("VmRSS:") {
            usage.current = parse_kb(rest);
        } else if let Some(rest) = line.strip_prefix("VmHWM:") {
            usage.peak = parse_kb(rest);
        }
    }
    usage
}

fn parse_kb(field: &str) -> u64 {
    field
        .split_whitespace()
        .next()
        .and_then(|n| n.parse::<u64>().ok())
        .map(|kb| kb * 1024)
        .unwrap_or(0)
}
