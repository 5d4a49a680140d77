use std::path::Path;

#[cfg(target_os = "linux")]
use anyhow::Context;
#[cfg(target_os = "linux")]
use anyhow::Result;
#[cfg(target_os = "linux")]
use tracing::debug;
use tracing::warn;

/// Decides whether the report output is currently open elsewhere.
pub trait OutputGuard: Send + Sync {
    /// True when any process holds `path` open. A path that does not exist
    /// is never busy.
    fn is_output_busy(&self, path: &Path) -> bool;
}

/// Guard that scans every visible process's open file descriptors.
///
/// Processes whose descriptors cannot be read (permissions, exited mid-scan)
/// are skipped.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessScanGuard;

impl ProcessScanGuard {
    pub fn new() -> Self {
        Self
    }
}

impl OutputGuard for ProcessScanGuard {
    #[cfg(target_os = "linux")]
    fn is_output_busy(&self, path: &Path) -> bool {
        let target = match path.canonicalize() {
            Ok(p) => p,
            Err(_) => return false,
        };

        match find_holders(&target) {
            Ok(holders) if holders.is_empty() => false,
            Ok(holders) => {
                debug!(path = %target.display(), pids = ?holders, "output held open");
                true
            }
            Err(e) => {
                warn!(error = %e, "process scan failed, treating output as free");
                false
            }
        }
    }

    #[cfg(not(target_os = "linux"))]
    fn is_output_busy(&self, _path: &Path) -> bool {
        warn!("open-file scan is only supported on Linux, treating output as free");
        false
    }
}

/// Scan /proc/<pid>/fd for descriptors resolving to `target`.
#[cfg(target_os = "linux")]
fn find_holders(target: &Path) -> Result<Vec<u32>> {
    use std::fs;

    let entries = fs::read_dir("/proc").context("reading /proc")?;

    let mut holders = Vec::new();

    for entry in entries {
        let entry = match entry {
            Ok(e) => e,
            Err(_) => continue,
        };

        let pid: u32 = match entry.file_name().to_string_lossy().parse() {
            Ok(p) => p,
            Err(_) => continue,
        };

        if process_holds(pid, target) {
            holders.push(pid);
        }
    }

    Ok(holders)
}

#[cfg(target_os = "linux")]
fn process_holds(pid: u32, target: &Path) -> bool {
    let fds = match std::fs::read_dir(format!("/proc/{pid}/fd")) {
        Ok(fds) => fds,
        Err(_) => return false,
    };

    fds.filter_map(|fd| fd.ok())
        .filter_map(|fd| std::fs::read_link(fd.path()).ok())
        .any(|link| link == target)
}
