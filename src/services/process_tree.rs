/// Process tree signalling
/// Shells are spawned as session leaders on unix, which makes them process
/// group leaders too: signalling the negated pid reaches the shell and every
/// descendant it started.

use std::io;

/// Ask the whole group to exit (SIGTERM)
#[cfg(unix)]
pub fn terminate_group(pid: u32) -> io::Result<()> {
    signal_group(pid, libc::SIGTERM)
}

/// Kill the whole group (SIGKILL)
#[cfg(unix)]
pub fn kill_group(pid: u32) -> io::Result<()> {
    signal_group(pid, libc::SIGKILL)
}

#[cfg(unix)]
fn signal_group(pid: u32, signal: libc::c_int) -> io::Result<()> {
    let pgid = i32::try_from(pid).map_err(|_| io::Error::from(io::ErrorKind::InvalidInput))?;
    if pgid <= 0 {
        return Err(io::Error::from(io::ErrorKind::InvalidInput));
    }
    // SAFETY: kill(2) has no memory-safety preconditions; a negative pid
    // targets the process group led by `pgid`.
    let rc = unsafe { libc::kill(-pgid, signal) };
    if rc == 0 {
        return Ok(());
    }
    let err = io::Error::last_os_error();
    // Group already gone
    if err.raw_os_error() == Some(libc::ESRCH) {
        Ok(())
    } else {
        Err(err)
    }
}

/// Whether any process of the group is still around
#[cfg(unix)]
pub fn group_alive(pid: u32) -> bool {
    let Ok(pgid) = i32::try_from(pid) else {
        return false;
    };
    // SAFETY: signal 0 performs only the existence and permission check.
    unsafe { libc::kill(-pgid, 0) == 0 }
}

#[cfg(not(unix))]
pub fn terminate_group(_pid: u32) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "process groups are not available on this platform",
    ))
}

#[cfg(not(unix))]
pub fn kill_group(pid: u32) -> io::Result<()> {
    terminate_group(pid)
}

#[cfg(not(unix))]
pub fn group_alive(_pid: u32) -> bool {
    false
}
