//! Best-effort resource limits for sandboxed children.
//!
//! On Linux the child gets an address-space rlimit and its own process group,
//! so a timeout kills every descendant. Elsewhere the memory ceiling is a no-op
//! and only the direct child is killed.

use std::process::{Child, Command};

use tracing::debug;

/// Whether [`apply_memory_ceiling`] has an effect on this platform.
pub fn memory_ceiling_supported() -> bool {
    cfg!(target_os = "linux")
}

/// Cap the child's address space at `megabytes`.
///
/// Failure to install the limit inside the child is ignored; the run proceeds
/// without a ceiling.
#[cfg(target_os = "linux")]
#[allow(unsafe_code)]
pub fn apply_memory_ceiling(cmd: &mut Command, megabytes: u64) {
    use std::os::unix::process::CommandExt;

    let bytes = megabytes.saturating_mul(1024 * 1024);
    debug!(megabytes, "installing address space limit");
    // SAFETY: the closure only calls setrlimit, which is async-signal-safe,
    // and touches no state shared with the parent.
    unsafe {
        cmd.pre_exec(move || {
            let limit = libc::rlimit {
                rlim_cur: bytes as libc::rlim_t,
                rlim_max: bytes as libc::rlim_t,
            };
            let _ = libc::setrlimit(libc::RLIMIT_AS, &limit);
            Ok(())
        });
    }
}

#[cfg(not(target_os = "linux"))]
pub fn apply_memory_ceiling(_cmd: &mut Command, megabytes: u64) {
    debug!(megabytes, "memory ceiling unsupported on this platform");
}

/// Start the child in a new process group.
#[cfg(unix)]
pub fn isolate_process_group(cmd: &mut Command) {
    use std::os::unix::process::CommandExt;

    cmd.process_group(0);
}

#[cfg(not(unix))]
pub fn isolate_process_group(_cmd: &mut Command) {}

/// Kill the child and, where supported, the rest of its process group.
#[cfg(target_os = "linux")]
#[allow(unsafe_code)]
pub fn kill_tree(child: &mut Child) -> std::io::Result<()> {
    if let Ok(pid) = libc::pid_t::try_from(child.id()) {
        // SAFETY: kill has no memory-safety preconditions; a negative pid
        // addresses the group created by `isolate_process_group`.
        let rc = unsafe { libc::kill(-pid, libc::SIGKILL) };
        if rc != 0 {
            let err = std::io::Error::last_os_error();
            tracing::warn!(pid, err = %err, "process group kill failed");
        }
    }
    child.kill()
}

#[cfg(not(target_os = "linux"))]
pub fn kill_tree(child: &mut Child) -> std::io::Result<()> {
    child.kill()
}
