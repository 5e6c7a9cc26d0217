use libc::c_void;
use std::{
    io,
    os::unix::io::{AsFd, AsRawFd, BorrowedFd, IntoRawFd, RawFd},
};

/// Owned file descriptor. Closed exactly once, on drop.
#[derive(Debug)]
pub(crate) struct Fd(RawFd);

impl Fd {
    pub(crate) fn new(inner: RawFd) -> Fd {
        Fd(inner)
    }

    pub(crate) fn from_io<T: IntoRawFd>(io: T) -> Fd {
        Fd(io.into_raw_fd())
    }

    pub(crate) fn try_clone(&self) -> io::Result<Fd> {
        let fd = unsafe { libc::dup(self.0) };
        if fd == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(Fd(fd))
    }

    pub(crate) fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        let ret = unsafe { libc::read(self.0, buf.as_mut_ptr() as *mut c_void, buf.len()) };
        if ret == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(ret as usize)
    }

    pub(crate) fn write(&self, buf: &[u8]) -> io::Result<usize> {
        let ret = unsafe { libc::write(self.0, buf.as_ptr() as *const c_void, buf.len()) };
        if ret == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(ret as usize)
    }

    pub(crate) fn write_all(&self, mut buf: &[u8]) -> io::Result<()> {
        while !buf.is_empty() {
            match self.write(buf) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "write returned 0 bytes",
                    ))
                }
                Ok(n) => buf = &buf[n..],
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    pub(crate) fn status_flags(&self) -> io::Result<libc::c_int> {
        let flags = unsafe { libc::fcntl(self.0, libc::F_GETFL) };
        if flags == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(flags)
    }

    pub(crate) fn set_status_flags(&self, flags: libc::c_int) -> io::Result<()> {
        if unsafe { libc::fcntl(self.0, libc::F_SETFL, flags) } == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

impl AsRawFd for Fd {
    fn as_raw_fd(&self) -> RawFd {
        self.0
    }
}

impl AsFd for Fd {
    fn as_fd(&self) -> BorrowedFd<'_> {
        unsafe { BorrowedFd::borrow_raw(self.0) }
    }
}

impl Drop for Fd {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.0);
        }
    }
}

/// Puts an fd into non-blocking mode for the duration of one read cycle.
/// The previous file-status flags are restored on drop, so every exit
/// path (including errors) leaves the descriptor as it was found.
pub(crate) struct NonblockGuard<'a> {
    fd: &'a Fd,
    saved: libc::c_int,
}

impl<'a> NonblockGuard<'a> {
    pub(crate) fn set(fd: &'a Fd) -> io::Result<NonblockGuard<'a>> {
        let saved = fd.status_flags()?;
        fd.set_status_flags(saved | libc::O_NONBLOCK)?;
        Ok(NonblockGuard { fd, saved })
    }
}

impl Drop for NonblockGuard<'_> {
    fn drop(&mut self) {
        let _ = self.fd.set_status_flags(self.saved);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pipe_pair() -> (Fd, Fd) {
        let mut ends = [0; 2];
        let ret = unsafe { libc::pipe(ends.as_mut_ptr()) };
        assert_eq!(ret, 0, "pipe() failed: {}", io::Error::last_os_error());
        (Fd::new(ends[0]), Fd::new(ends[1]))
    }

    #[test]
    fn write_all_then_read() {
        let (rx, tx) = pipe_pair();
        tx.write_all(b"hello fd").unwrap();
        let mut buf = [0u8; 16];
        let n = rx.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"hello fd");
    }

    #[test]
    fn nonblock_guard_restores_flags() {
        let (rx, _tx) = pipe_pair();
        let before = rx.status_flags().unwrap();
        assert_eq!(before & libc::O_NONBLOCK, 0);
        {
            let _guard = NonblockGuard::set(&rx).unwrap();
            let inside = rx.status_flags().unwrap();
            assert_ne!(inside & libc::O_NONBLOCK, 0);
        }
        assert_eq!(rx.status_flags().unwrap(), before);
    }

    #[test]
    fn nonblock_guard_restores_on_early_return() {
        let (rx, _tx) = pipe_pair();
        let before = rx.status_flags().unwrap();
        let failing = || -> io::Result<()> {
            let _guard = NonblockGuard::set(&rx)?;
            Err(io::Error::new(io::ErrorKind::Other, "boom"))
        };
        assert!(failing().is_err());
        assert_eq!(rx.status_flags().unwrap(), before);
    }
}
