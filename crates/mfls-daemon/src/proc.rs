//! POSIX process helpers: liveness, termination and session detach.

use std::io;

use tokio::process::Command;

/// Whether `pid` names a live process we may signal (`kill(pid, 0)`).
pub fn pid_alive(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    if pid <= 0 {
        return false;
    }
    unsafe { libc::kill(pid, 0) == 0 }
}

/// Send SIGTERM. `Ok(false)` if the process no longer exists.
pub fn terminate(pid: u32) -> io::Result<bool> {
    let raw = libc::pid_t::try_from(pid)
        .ok()
        .filter(|p| *p > 0)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, format!("invalid pid {pid}")))?;

    if unsafe { libc::kill(raw, libc::SIGTERM) } == 0 {
        return Ok(true);
    }
    let err = io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        Ok(false)
    } else {
        Err(err)
    }
}

/// Start the child in its own session so it outlives the caller's terminal.
pub fn detach(cmd: &mut Command) {
    // SAFETY: the hook runs between fork and exec and only calls setsid(2),
    // which is async-signal-safe.
    unsafe {
        cmd.pre_exec(|| {
            if libc::setsid() == -1 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        });
    }
}
