//! The managed child: one launched process, its pipes, and its timers.

use crate::{
    fd::{Fd, NonblockGuard},
    pipe, Cmd, Error,
};
use nix::{
    errno::Errno,
    poll::{poll, PollFd, PollFlags, PollTimeout},
    pty::{openpty, Winsize},
    sys::signal::{killpg, Signal},
    sys::termios::Termios,
    unistd::{getpgid, Pid},
};
use parking_lot::Mutex;
use std::{
    io,
    os::unix::io::{AsFd, FromRawFd, IntoRawFd},
    os::unix::process::{CommandExt, ExitStatusExt},
    path::PathBuf,
    process::{Command, ExitStatus, Stdio},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

const DEFAULT_READ_CHUNK: usize = 4096;

/// How long to sleep when a poll cycle produced nothing.
const IDLE_CYCLE: Duration = Duration::from_millis(1);

/// Identity of a [`Ward`]. Two wards running the same command are still
/// distinct supervisees, so identity is a process-wide monotonic counter,
/// never the command itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WardId(u64);

impl WardId {
    fn next() -> WardId {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        WardId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for WardId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ward-{}", self.0)
    }
}

/// Bytes drained from one poll cycle. At least one of the two fields is
/// non-empty whenever an `Observation` is produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Observation {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl Observation {
    pub fn is_empty(&self) -> bool {
        self.stdout.is_empty() && self.stderr.is_empty()
    }
}

struct Running {
    child: std::process::Child,
    stdout: Fd,
    stderr: Fd,
    /// Pipe write end, or the pty master when `stdin_terminal` is set.
    /// Taken (and thereby closed) when the child is reaped.
    stdin: Option<Fd>,
}

struct Inner {
    cmd: Cmd,
    shell: bool,
    read_chunk: usize,
    stdin_terminal: bool,
    cwd: Option<PathBuf>,
    /// Per-ward timeout defaults consulted by `WardSet::iterate` in
    /// preference to the driver-wide defaults.
    chunk_timeout: Option<Duration>,
    total_timeout: Option<Duration>,
    /// Last spawned pid. Sticky across reap so callers can still inspect
    /// which process a finished ward used to be.
    pid: Option<Pid>,
    return_code: Option<i32>,
    proc: Option<Running>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(running) = self.proc.as_mut() {
            if matches!(running.child.try_wait(), Ok(None)) {
                let pid = Pid::from_raw(running.child.id() as i32);
                if let Ok(pgid) = getpgid(Some(pid)) {
                    let _ = killpg(pgid, Signal::SIGKILL);
                }
                tracing::debug!(pid = pid.as_raw(), "killed still-running child on drop");
            }
            let _ = running.child.wait();
        }
    }
}

/// One supervised child process.
///
/// A `Ward` is a cheap-to-clone handle; all clones refer to the same
/// underlying process, and equality/hashing use ward identity rather than
/// the command. The handle is `Send + Sync` so helpers like
/// [`StdinPump`](crate::StdinPump) can feed the child from another thread.
///
/// ```no_run
/// use warden::Ward;
///
/// let ward = Ward::new("ls -l /");
/// ward.start()?;
/// for item in ward.iterate(None, None)? {
///     let obs = item?;
///     print!("{}", String::from_utf8_lossy(&obs.stdout));
/// }
/// assert_eq!(ward.return_code(), Some(0));
/// # Ok::<(), warden::Error>(())
/// ```
#[derive(Clone)]
pub struct Ward {
    id: WardId,
    inner: Arc<Mutex<Inner>>,
}

impl PartialEq for Ward {
    fn eq(&self, other: &Ward) -> bool {
        self.id == other.id
    }
}

impl Eq for Ward {}

impl std::hash::Hash for Ward {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl std::fmt::Debug for Ward {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Ward")
            .field("id", &self.id)
            .field("pid", &inner.pid.map(Pid::as_raw))
            .field("running", &inner.proc.is_some())
            .field("return_code", &inner.return_code)
            .finish()
    }
}

impl Ward {
    /// Creates a ward in shell mode with default tuning. Nothing is
    /// spawned until [`start`](Ward::start).
    pub fn new(cmd: impl Into<Cmd>) -> Ward {
        Ward {
            id: WardId::next(),
            inner: Arc::new(Mutex::new(Inner {
                cmd: cmd.into(),
                shell: true,
                read_chunk: DEFAULT_READ_CHUNK,
                stdin_terminal: false,
                cwd: None,
                chunk_timeout: None,
                total_timeout: None,
                pid: None,
                return_code: None,
                proc: None,
            })),
        }
    }

    /// Run through `/bin/sh -c` (default) or execute directly. Only
    /// affects [`Cmd::Line`]; an argv is always executed verbatim.
    pub fn shell(self, shell: bool) -> Ward {
        self.inner.lock().shell = shell;
        self
    }

    /// Maximum bytes requested per read syscall.
    pub fn read_chunk(self, read_chunk: usize) -> Ward {
        self.inner.lock().read_chunk = read_chunk.max(1);
        self
    }

    /// Connect the child's stdin to the slave end of a fresh
    /// pseudo-terminal, for children that probe `isatty` on stdin.
    pub fn stdin_terminal(self, stdin_terminal: bool) -> Ward {
        self.inner.lock().stdin_terminal = stdin_terminal;
        self
    }

    /// Working directory for the child.
    pub fn current_dir(self, dir: impl Into<PathBuf>) -> Ward {
        self.inner.lock().cwd = Some(dir.into());
        self
    }

    /// Per-ward chunk timeout, preferred over the driver default when this
    /// ward is iterated as part of a [`WardSet`](crate::WardSet).
    pub fn chunk_timeout(self, timeout: Duration) -> Ward {
        self.inner.lock().chunk_timeout = Some(timeout);
        self
    }

    /// Per-ward total timeout, preferred over the driver default when this
    /// ward is iterated as part of a [`WardSet`](crate::WardSet).
    pub fn total_timeout(self, timeout: Duration) -> Ward {
        self.inner.lock().total_timeout = Some(timeout);
        self
    }

    pub fn id(&self) -> WardId {
        self.id
    }

    /// Pid of the most recently spawned process. With shell mode this is
    /// the shell's pid. `None` before the first `start`.
    pub fn pid(&self) -> Option<Pid> {
        self.inner.lock().pid
    }

    pub(crate) fn raw_pid(&self) -> i32 {
        self.inner.lock().pid.map(Pid::as_raw).unwrap_or(-1)
    }

    /// Exit status of the last completed run: the exit code, or the
    /// negated signal number for signal deaths. `None` until reaped.
    pub fn return_code(&self) -> Option<i32> {
        self.inner.lock().return_code
    }

    pub(crate) fn timeout_overrides(&self) -> (Option<Duration>, Option<Duration>) {
        let inner = self.inner.lock();
        (inner.chunk_timeout, inner.total_timeout)
    }

    /// Spawns the child with piped stdout/stderr and either a piped stdin
    /// or a pty slave. The child becomes the leader of its own process
    /// group before exec, so teardown signals reach shell-wrapped
    /// grandchildren too. Valid on a fresh or reaped ward; an error while
    /// the previous run is still in flight.
    pub fn start(&self) -> Result<(), Error> {
        let mut inner = self.inner.lock();
        if inner.proc.is_some() {
            return Err(Error::AlreadyRunning);
        }
        let argv = inner.cmd.resolve(inner.shell)?;

        let mut command = Command::new(&argv[0]);
        command
            .args(&argv[1..])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &inner.cwd {
            command.current_dir(dir);
        }
        unsafe {
            command.pre_exec(|| {
                if libc::setpgid(0, 0) == -1 {
                    return Err(io::Error::last_os_error());
                }
                Ok(())
            });
        }

        let mut pty_master = None;
        if inner.stdin_terminal {
            let winsize = Winsize {
                ws_row: 24,
                ws_col: 80,
                ws_xpixel: 0,
                ws_ypixel: 0,
            };
            let pty = openpty(Some(&winsize), None::<&Termios>).map_err(io_from_errno)?;
            // The slave moves into the child; Command closes our copy
            // after the spawn. We keep the master for stdin writes.
            command.stdin(unsafe { Stdio::from_raw_fd(pty.slave.into_raw_fd()) });
            pty_master = Some(Fd::from_io(pty.master));
        } else {
            command.stdin(Stdio::piped());
        }

        let mut child = command.spawn()?;
        let pid = Pid::from_raw(child.id() as i32);
        tracing::debug!(pid = pid.as_raw(), argv = ?argv, "spawned child");

        let stdout = Fd::from_io(child.stdout.take().expect("stdout was piped"));
        let stderr = Fd::from_io(child.stderr.take().expect("stderr was piped"));
        let stdin = match pty_master {
            Some(master) => Some(master),
            None => Some(Fd::from_io(child.stdin.take().expect("stdin was piped"))),
        };

        inner.pid = Some(pid);
        inner.return_code = None;
        inner.proc = Some(Running {
            child,
            stdout,
            stderr,
            stdin,
        });
        Ok(())
    }

    /// Writes `bytes` to the child's stdin (the pty master in terminal
    /// mode). Write errors such as `EPIPE` propagate unchanged.
    ///
    /// The write goes through a dup'd descriptor so a write that blocks
    /// on a full pipe cannot hold the ward's lock against `kill`.
    pub fn send_stdin(&self, bytes: &[u8]) -> Result<(), Error> {
        let writer = {
            let mut inner = self.inner.lock();
            let running = inner.proc.as_mut().ok_or(Error::NotStarted)?;
            let stdin = running.stdin.as_ref().ok_or(Error::NotStarted)?;
            stdin.try_clone()?
        };
        writer.write_all(bytes)?;
        Ok(())
    }

    /// Polls stdout and stderr with zero timeout and drains whatever is
    /// ready. `None` when neither stream had bytes.
    pub fn read_available(&self) -> Result<Option<Observation>, Error> {
        let mut inner = self.inner.lock();
        let read_chunk = inner.read_chunk;
        let running = inner.proc.as_mut().ok_or(Error::NotStarted)?;
        if running.child.try_wait()?.is_some() {
            return Err(Error::AlreadyDead);
        }
        read_cycle(running, read_chunk)
    }

    /// Lazily yields observations until the child exits, enforcing the
    /// given timeouts. Blocks inside `next()` between observations.
    ///
    /// On natural completion the remaining buffered bytes are drained,
    /// the child is reaped and [`return_code`](Ward::return_code) becomes
    /// available. A timeout surfaces as an `Err` item and ends the
    /// iterator, but leaves the child running: call `iterate` again
    /// (timers restart) or stop the child.
    pub fn iterate(
        &self,
        chunk_timeout: Option<Duration>,
        total_timeout: Option<Duration>,
    ) -> Result<RunIter, Error> {
        let inner = self.inner.lock();
        if inner.proc.is_none() {
            return Err(Error::NotStarted);
        }
        let pid = inner.pid.map(Pid::as_raw).unwrap_or(-1);
        drop(inner);
        let now = Instant::now();
        Ok(RunIter {
            ward: self.clone(),
            pid,
            chunk_timeout,
            total_timeout,
            chunk_base: now,
            total_base: now,
            done: false,
        })
    }

    /// True iff the child was started, not reaped, and has not exited.
    pub fn alive(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.proc.as_mut() {
            Some(running) => matches!(running.child.try_wait(), Ok(None)),
            None => false,
        }
    }

    /// Sends SIGKILL to the child's process group, then reaps.
    pub fn kill(&self) -> Result<(), Error> {
        self.stop(Signal::SIGKILL)
    }

    /// Sends SIGTERM to the child's process group, then reaps. Blocks
    /// until the group leader actually exits, like the original wait.
    pub fn terminate(&self) -> Result<(), Error> {
        self.stop(Signal::SIGTERM)
    }

    /// Waits for the child to exit and records its exit status.
    /// Idempotent once reaped.
    pub fn join(&self) -> Result<(), Error> {
        let mut inner = self.inner.lock();
        if inner.proc.is_none() {
            return if inner.return_code.is_some() {
                Ok(())
            } else {
                Err(Error::NotStarted)
            };
        }
        reap(&mut inner)
    }

    fn stop(&self, signal: Signal) -> Result<(), Error> {
        let mut inner = self.inner.lock();
        let running = inner.proc.as_mut().ok_or(Error::NotStarted)?;
        if running.child.try_wait()?.is_none() {
            let pid = Pid::from_raw(running.child.id() as i32);
            // The group may be gone by the time we signal it; that race
            // with a natural exit is not an error.
            match getpgid(Some(pid)) {
                Ok(pgid) => match killpg(pgid, signal) {
                    Ok(()) | Err(Errno::ESRCH) => {}
                    Err(errno) => return Err(io_from_errno(errno).into()),
                },
                Err(Errno::ESRCH) => {}
                Err(errno) => return Err(io_from_errno(errno).into()),
            }
            tracing::debug!(pid = pid.as_raw(), signal = %signal, "signalled process group");
        }
        reap(&mut inner)
    }
}

/// One non-blocking read cycle over both output pipes. The non-blocking
/// flags are restored on every exit path by the guards.
fn read_cycle(running: &mut Running, read_chunk: usize) -> Result<Option<Observation>, Error> {
    let _out_guard = NonblockGuard::set(&running.stdout)?;
    let _err_guard = NonblockGuard::set(&running.stderr)?;
    let (out_ready, err_ready) = poll_pair(&running.stdout, &running.stderr)?;
    let stdout = if out_ready {
        pipe::drain(&running.stdout, read_chunk)?
    } else {
        Vec::new()
    };
    let stderr = if err_ready {
        pipe::drain(&running.stderr, read_chunk)?
    } else {
        Vec::new()
    };
    if stdout.is_empty() && stderr.is_empty() {
        Ok(None)
    } else {
        Ok(Some(Observation { stdout, stderr }))
    }
}

/// Zero-timeout poll of both output pipes. POLLHUP counts as ready so the
/// final drain after an exit still runs.
fn poll_pair(stdout: &Fd, stderr: &Fd) -> Result<(bool, bool), Error> {
    let interest = PollFlags::POLLIN;
    let mut fds = [
        PollFd::new(stdout.as_fd(), interest),
        PollFd::new(stderr.as_fd(), interest),
    ];
    match poll(&mut fds, PollTimeout::ZERO) {
        Ok(_) => {}
        Err(Errno::EINTR) => return Ok((false, false)),
        Err(errno) => return Err(io_from_errno(errno).into()),
    }
    let ready = |fd: &PollFd| {
        fd.revents().is_some_and(|revents| {
            revents.intersects(PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR)
        })
    };
    Ok((ready(&fds[0]), ready(&fds[1])))
}

/// Collects the exit status, closing stdin first so a child blocked on a
/// read sees EOF, and draining the output pipes so a child blocked on a
/// write can finish. Output drained here is discarded; `iterate` performs
/// its own final drain before calling this.
fn reap(inner: &mut Inner) -> Result<(), Error> {
    let mut running = inner.proc.take().ok_or(Error::NotStarted)?;
    let read_chunk = inner.read_chunk;
    running.stdin = None;
    let status = loop {
        match running.child.try_wait()? {
            Some(status) => break status,
            None => {
                let _ = read_cycle(&mut running, read_chunk);
                thread::sleep(Duration::from_millis(2));
            }
        }
    };
    inner.return_code = Some(exit_code(status));
    tracing::debug!(
        pid = inner.pid.map(Pid::as_raw),
        return_code = inner.return_code,
        "reaped child"
    );
    Ok(())
}

fn exit_code(status: ExitStatus) -> i32 {
    status
        .code()
        .unwrap_or_else(|| -status.signal().unwrap_or(0))
}

pub(crate) fn io_from_errno(errno: Errno) -> io::Error {
    io::Error::from_raw_os_error(errno as i32)
}

/// Lazy observation sequence for a single [`Ward`], created by
/// [`Ward::iterate`]. Fused after the first error or after completion.
pub struct RunIter {
    ward: Ward,
    pid: i32,
    chunk_timeout: Option<Duration>,
    total_timeout: Option<Duration>,
    chunk_base: Instant,
    total_base: Instant,
    done: bool,
}

impl RunIter {
    fn finish(&mut self, item: Result<Option<Observation>, Error>) -> Option<Result<Observation, Error>> {
        self.done = true;
        match item {
            Ok(Some(obs)) => Some(Ok(obs)),
            Ok(None) => None,
            Err(err) => Some(Err(err)),
        }
    }
}

impl Iterator for RunIter {
    type Item = Result<Observation, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let shared = Arc::clone(&self.ward.inner);
        loop {
            let mut inner = shared.lock();
            let read_chunk = inner.read_chunk;
            let Some(running) = inner.proc.as_mut() else {
                // Someone reaped the child from another handle.
                return self.finish(Err(Error::NotStarted));
            };
            let exited = match running.child.try_wait() {
                Ok(status) => status.is_some(),
                Err(err) => return self.finish(Err(err.into())),
            };
            if exited {
                // Drain what the child left behind, then reap.
                let last = read_cycle(running, read_chunk);
                return match last {
                    Ok(obs) => match reap(&mut inner) {
                        Ok(()) => self.finish(Ok(obs)),
                        Err(err) => self.finish(Err(err)),
                    },
                    Err(err) => self.finish(Err(err)),
                };
            }
            let cycle = match read_cycle(running, read_chunk) {
                Ok(cycle) => cycle,
                Err(err) => return self.finish(Err(err)),
            };
            drop(inner);

            // The chunk timer wins when both would fire in one cycle, and
            // both are checked before fresh bytes reset the chunk timer.
            let now = Instant::now();
            if let Some(limit) = self.chunk_timeout {
                if now.duration_since(self.chunk_base) > limit {
                    tracing::debug!(pid = self.pid, "chunk timeout");
                    return self.finish(Err(Error::ChunkTimeout { pid: self.pid }));
                }
            }
            if let Some(limit) = self.total_timeout {
                if now.duration_since(self.total_base) > limit {
                    tracing::debug!(pid = self.pid, "total timeout");
                    return self.finish(Err(Error::TotalTimeout { pid: self.pid }));
                }
            }
            if let Some(obs) = cycle {
                self.chunk_base = Instant::now();
                return Some(Ok(obs));
            }
            thread::sleep(IDLE_CYCLE);
        }
    }
}
