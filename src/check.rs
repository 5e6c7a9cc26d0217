use crate::{
    fd::{Fd, NonblockGuard},
    pipe,
};
use nix::{
    poll::{poll, PollFd, PollFlags, PollTimeout},
    pty::{openpty, Winsize},
    sys::termios::Termios,
};
use std::{io, os::unix::io::AsFd, path::Path};

/// Probes the host for everything supervision relies on. Problems land in
/// `res`; errors mean supervision will not work, warnings degrade a
/// feature (for example pty-backed stdin).
pub fn check(res: &mut CheckResult) {
    if !Path::new("/bin/sh").exists() {
        res.error("/bin/sh not found, shell mode will fail to spawn");
    }
    if let Err(err) = probe_pipe_poll() {
        res.error(&format!("pipe/poll round trip failed: {}", err));
    }
    let winsize = Winsize {
        ws_row: 24,
        ws_col: 80,
        ws_xpixel: 0,
        ws_ypixel: 0,
    };
    if let Err(err) = openpty(Some(&winsize), None::<&Termios>) {
        res.warning(&format!(
            "pty allocation failed ({}), stdin_terminal is unavailable",
            err
        ));
    }
}

/// Writes through a fresh pipe and confirms a zero-timeout poll reports
/// it readable and a non-blocking drain returns the bytes.
fn probe_pipe_poll() -> io::Result<()> {
    let mut ends = [0; 2];
    if unsafe { libc::pipe(ends.as_mut_ptr()) } == -1 {
        return Err(io::Error::last_os_error());
    }
    let rx = Fd::new(ends[0]);
    let tx = Fd::new(ends[1]);
    tx.write_all(b"ok")?;
    let mut fds = [PollFd::new(rx.as_fd(), PollFlags::POLLIN)];
    poll(&mut fds, PollTimeout::ZERO).map_err(crate::child::io_from_errno)?;
    let ready = fds[0]
        .revents()
        .is_some_and(|revents| revents.contains(PollFlags::POLLIN));
    if !ready {
        return Err(io::Error::new(
            io::ErrorKind::Other,
            "pipe not readable after write",
        ));
    }
    let _guard = NonblockGuard::set(&rx)?;
    let bytes = pipe::drain(&rx, 16)?;
    if bytes != b"ok" {
        return Err(io::Error::new(
            io::ErrorKind::Other,
            "pipe returned unexpected bytes",
        ));
    }
    Ok(())
}

/// Storage for problems reported by [`check`].
#[derive(Debug, Default)]
pub struct CheckResult {
    errors: Vec<String>,
    warnings: Vec<String>,
}

impl CheckResult {
    /// Creates an empty CheckResult
    pub fn new() -> CheckResult {
        Default::default()
    }
    /// Records an error
    pub(crate) fn error(&mut self, message: &str) {
        self.errors.push(message.to_string())
    }
    /// Records a warning
    pub(crate) fn warning(&mut self, message: &str) {
        self.warnings.push(message.to_string())
    }
    /// Checks if any errors were reported
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

impl std::fmt::Display for CheckResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.errors.is_empty() && self.warnings.is_empty() {
            return "OK".fmt(f);
        }
        if !self.errors.is_empty() {
            "Errors:\n".fmt(f)?;
            for err in &self.errors {
                writeln!(f, "\t{}", err)?;
            }
        }
        if !self.warnings.is_empty() {
            "Warnings:\n".fmt(f)?;
            for warn in &self.warnings {
                writeln!(f, "\t{}", warn)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn healthy_host_reports_no_errors() {
        let mut res = CheckResult::new();
        check(&mut res);
        assert!(!res.has_errors(), "unexpected problems: {}", res);
    }
}
