//! Thin wrapper over poll(2).

use std::io;
use std::os::unix::io::RawFd;

/// A descriptor entry requesting readability.
pub(crate) fn readable_entry(fd: RawFd) -> libc::pollfd {
    libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    }
}

/// Poll `fds` for up to `timeout_ms`. Returns the number of descriptors
/// with events, 0 on timeout.
pub(crate) fn poll(fds: &mut [libc::pollfd], timeout_ms: i32) -> io::Result<usize> {
    let rc = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout_ms) };
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(rc as usize)
    }
}
