//! Best-effort CPU affinity for action processes.
//!
//! Hints are advisory. Anything that cannot be parsed or applied on this host
//! degrades to unbound execution with a debug log, never an error.

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Upper bound on CPU indices accepted from a hint.
const MAX_CPUS: usize = 1024;

/// Set of CPU indices an action should run on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuSet {
    cpus: Vec<usize>,
}

impl CpuSet {
    #[must_use]
    pub fn cpus(&self) -> &[usize] {
        &self.cpus
    }

    /// Parse a hint of the form `cpu:N`, `cpus:A-B` or `cpus:A,B,C`.
    ///
    /// Other resource kinds (e.g. `gpu:0`) are not bindable here and yield `None`.
    #[must_use]
    pub fn parse_hint(hint: &str) -> Option<Self> {
        let (resource, spec) = hint.trim().split_once(':')?;
        if !matches!(resource.trim(), "cpu" | "cpus") {
            debug!("Ignoring non-CPU affinity hint '{hint}'");
            return None;
        }

        let mut cpus = Vec::new();
        for part in spec.split(',') {
            let part = part.trim();
            if let Some((start, end)) = part.split_once('-') {
                let start: usize = start.trim().parse().ok()?;
                let end: usize = end.trim().parse().ok()?;
                if start > end {
                    return None;
                }
                cpus.extend(start..=end);
            } else {
                cpus.push(part.parse().ok()?);
            }
        }

        cpus.sort_unstable();
        cpus.dedup();
        if cpus.is_empty() || cpus.iter().any(|&c| c >= MAX_CPUS) {
            return None;
        }
        Some(Self { cpus })
    }
}

/// Kernel bitmask for `set`.
#[cfg(target_os = "linux")]
fn cpu_mask(set: &CpuSet) -> libc::cpu_set_t {
    // SAFETY: cpu_set_t is a plain bitmask; zeroed is its empty state, and
    // every index was bounded by MAX_CPUS (== CPU_SETSIZE) at parse time.
    unsafe {
        let mut mask: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_ZERO(&mut mask);
        for &cpu in set.cpus() {
            libc::CPU_SET(cpu, &mut mask);
        }
        mask
    }
}

/// Pin the process spawned from `command` to `set` before it execs.
///
/// The mask is applied in the forked child, so everything the action
/// starts inherits it. A rejected mask leaves the child unbound.
#[cfg(target_os = "linux")]
pub fn pin_on_exec(command: &mut tokio::process::Command, set: &CpuSet) {
    let mask = cpu_mask(set);
    debug!("Pinning action to cpus {:?}", set.cpus());
    // SAFETY: the hook only issues sched_setaffinity, which is
    // async-signal-safe and touches no parent state.
    unsafe {
        command.pre_exec(move || {
            libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &mask);
            Ok(())
        });
    }
}

/// CPU pinning is unsupported on this platform: the action runs unbound.
#[cfg(not(target_os = "linux"))]
pub fn pin_on_exec(_command: &mut tokio::process::Command, set: &CpuSet) {
    debug!(
        "CPU affinity unsupported on this platform, running unbound (wanted {:?})",
        set.cpus()
    );
}
