//! Process-exclusion helper (§1's external collaborator): the Rust
//! counterpart of `remotepspy.__main__.get_svchost_pids`. `svchost.exe`
//! hosts the WinRM service itself, so its own ETW activity would otherwise
//! show up as noise (or a feedback loop) in a capture session.

use std::collections::HashSet;

use sysinfo::System;

/// PIDs of all currently running `svchost.exe` processes. Best-effort: a
/// process that exits between enumeration and session start is simply not
/// excluded, matching the source's one-shot snapshot approach.
pub fn svchost_pids() -> Vec<u32> {
    let mut system = System::new_all();
    system.refresh_all();
    system
        .processes()
        .values()
        .filter(|process| process.name().to_string_lossy().eq_ignore_ascii_case("svchost.exe"))
        .map(|process| process.pid().as_u32())
        .collect()
}

/// Drops events from PIDs on the exclusion list, mirroring
/// `ETWRemotePSBase.event_callback_hook`'s `include`/`include_pids` logic
/// (named for what it does here: it is used as an exclude list, not an
/// allow list).
#[derive(Debug, Clone, Default)]
pub struct ExcludedPids {
    excluded: HashSet<u32>,
}

impl ExcludedPids {
    pub fn new(pids: impl IntoIterator<Item = u32>) -> Self {
        Self {
            excluded: pids.into_iter().collect(),
        }
    }

    pub fn should_include(&self, pid: u32) -> bool {
        !self.excluded.contains(&pid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn excluded_pid_is_not_included() {
        let filter = ExcludedPids::new([100, 200]);
        assert!(!filter.should_include(100));
        assert!(filter.should_include(300));
    }

    #[test]
    fn empty_exclusion_list_includes_everything() {
        let filter = ExcludedPids::default();
        assert!(filter.should_include(1));
    }
}
