//! Bounded waits on subprocess pipes via `poll(2)`.

use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

fn poll_fd(fd: RawFd, events: libc::c_short, timeout: Duration) -> io::Result<bool> {
    let mut pfd = libc::pollfd {
        fd,
        events,
        revents: 0,
    };
    let timeout_ms = timeout.as_millis().min(libc::c_int::MAX as u128) as libc::c_int;
    // SAFETY: `pfd` is a valid, initialized pollfd on this stack frame and the
    // count passed matches the single entry.
    let rc = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
    if rc < 0 {
        let err = io::Error::last_os_error();
        // A signal (SIGINT) woke us; report "not ready" so the caller re-checks its stop flag.
        if err.kind() == io::ErrorKind::Interrupted {
            return Ok(false);
        }
        return Err(err);
    }
    // POLLHUP/POLLERR also count as ready: the following read/write reports the condition.
    Ok(rc > 0)
}

pub(crate) fn wait_readable(fd: RawFd, timeout: Duration) -> io::Result<bool> {
    poll_fd(fd, libc::POLLIN, timeout)
}

pub(crate) fn wait_writable(fd: RawFd, timeout: Duration) -> io::Result<bool> {
    poll_fd(fd, libc::POLLOUT, timeout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::unix::io::AsRawFd;
    use std::os::unix::net::UnixStream;

    #[test]
    fn readable_times_out_without_data() {
        let (a, _b) = UnixStream::pair().expect("socketpair");
        let ready = wait_readable(a.as_raw_fd(), Duration::from_millis(10)).expect("poll");
        assert!(!ready);
    }

    #[test]
    fn readable_reports_pending_bytes() {
        let (a, mut b) = UnixStream::pair().expect("socketpair");
        b.write_all(b"pcm").expect("write");
        let ready = wait_readable(a.as_raw_fd(), Duration::from_millis(100)).expect("poll");
        assert!(ready);
    }

    #[test]
    fn writable_on_fresh_socket() {
        let (a, _b) = UnixStream::pair().expect("socketpair");
        let ready = wait_writable(a.as_raw_fd(), Duration::from_millis(10)).expect("poll");
        assert!(ready);
    }
}
