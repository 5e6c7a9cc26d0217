//! Basics: spawning, byte collection, state checks, pty stdin.
use super::{collect_all, secs_f};
use std::time::Instant;
use warden::{Error, Ward};

pub(crate) struct TEcho;
impl crate::TestCase for TEcho {
    fn name(&self) -> &'static str {
        "echo_collects_stdout"
    }
    fn description(&self) -> &'static str {
        "a shell echo ends up on stdout and the ward reaps cleanly"
    }
    fn check(&self) {
        let ward = Ward::new("echo Hello_warden!");
        ward.start().expect("start");
        let (stdout, _) = collect_all(&ward);
        assert_eq!(stdout, b"Hello_warden!\n");
        assert_eq!(ward.return_code(), Some(0));
        assert!(!ward.alive());
    }
}

pub(crate) struct TArgv;
impl crate::TestCase for TArgv {
    fn name(&self) -> &'static str {
        "argv_mode_runs_verbatim"
    }
    fn description(&self) -> &'static str {
        "an argv vector is executed without a shell"
    }
    fn check(&self) {
        let dir = tempfile::TempDir::new().expect("tempdir");
        std::fs::write(dir.path().join("warden_probe.txt"), b"x").expect("probe file");
        let ward = Ward::new(vec![
            "ls".to_string(),
            dir.path().display().to_string(),
        ])
        .shell(false);
        ward.start().expect("start");
        let (stdout, _) = collect_all(&ward);
        let listing = String::from_utf8_lossy(&stdout).to_string();
        assert!(listing.contains("warden_probe.txt"), "got: {}", listing);
    }
}

pub(crate) struct TQuietSleep;
impl crate::TestCase for TQuietSleep {
    fn name(&self) -> &'static str {
        "quiet_sleep_runs_to_completion"
    }
    fn description(&self) -> &'static str {
        "a silent child yields nothing and still completes"
    }
    fn check(&self) {
        let started = Instant::now();
        let ward = Ward::new("sleep 1");
        ward.start().expect("start");
        let (stdout, stderr) = collect_all(&ward);
        assert!(started.elapsed() >= secs_f(1.0));
        assert!(stdout.is_empty() && stderr.is_empty());
        assert_eq!(ward.return_code(), Some(0));
    }
}

pub(crate) struct TExitCodes;
impl crate::TestCase for TExitCodes {
    fn name(&self) -> &'static str {
        "exit_codes_propagate"
    }
    fn description(&self) -> &'static str {
        "exit codes come back verbatim, signal deaths as negative numbers"
    }
    fn check(&self) {
        let ward = Ward::new("exit 3");
        ward.start().expect("start");
        collect_all(&ward);
        assert_eq!(ward.return_code(), Some(3));

        let ward = Ward::new("sleep 10");
        ward.start().expect("start");
        ward.kill().expect("kill");
        assert_eq!(ward.return_code(), Some(-(libc_sigkill())));
    }
}

fn libc_sigkill() -> i32 {
    nix::sys::signal::Signal::SIGKILL as i32
}

pub(crate) struct TStderr;
impl crate::TestCase for TStderr {
    fn name(&self) -> &'static str {
        "stderr_is_separated"
    }
    fn description(&self) -> &'static str {
        "stdout and stderr bytes arrive on their own channels"
    }
    fn check(&self) {
        let ward = Ward::new("echo out; echo err 1>&2");
        ward.start().expect("start");
        let (stdout, stderr) = collect_all(&ward);
        assert_eq!(stdout, b"out\n");
        assert_eq!(stderr, b"err\n");
    }
}

pub(crate) struct TExactBytes;
impl crate::TestCase for TExactBytes {
    fn name(&self) -> &'static str {
        "observations_are_exact_and_never_empty"
    }
    fn description(&self) -> &'static str {
        "bytes concatenate to exactly what the child wrote, no empty observations"
    }
    fn check(&self) {
        let ward = Ward::new("for i in 1 2 3 4 5; do printf x; sleep 0.05; done");
        ward.start().expect("start");
        // collect_all asserts every observation is non-empty
        let (stdout, stderr) = collect_all(&ward);
        assert_eq!(stdout, b"xxxxx");
        assert!(stderr.is_empty());
        assert_eq!(ward.return_code(), Some(0));
    }
}

pub(crate) struct TReadAvailable;
impl crate::TestCase for TReadAvailable {
    fn name(&self) -> &'static str {
        "read_available_drains_ready"
    }
    fn description(&self) -> &'static str {
        "a single non-blocking read returns the buffered bytes"
    }
    fn check(&self) {
        let ward = Ward::new("echo hi; sleep 2");
        ward.start().expect("start");
        std::thread::sleep(secs_f(0.4));
        let obs = ward
            .read_available()
            .expect("read_available")
            .expect("bytes should be buffered by now");
        assert_eq!(obs.stdout, b"hi\n");
        // nothing new: quietly returns None
        assert!(ward.read_available().expect("read_available").is_none());
        ward.kill().expect("kill");
    }
}

pub(crate) struct TReadRequiresRunning;
impl crate::TestCase for TReadRequiresRunning {
    fn name(&self) -> &'static str {
        "read_available_requires_running"
    }
    fn description(&self) -> &'static str {
        "reading a fresh ward fails NotStarted, an exited one AlreadyDead"
    }
    fn check(&self) {
        let ward = Ward::new("true");
        assert!(matches!(ward.read_available(), Err(Error::NotStarted)));
        ward.start().expect("start");
        std::thread::sleep(secs_f(0.4));
        assert!(matches!(ward.read_available(), Err(Error::AlreadyDead)));
        ward.join().expect("join");
        assert!(matches!(ward.read_available(), Err(Error::NotStarted)));
    }
}

pub(crate) struct TLifecycleErrors;
impl crate::TestCase for TLifecycleErrors {
    fn name(&self) -> &'static str {
        "lifecycle_errors"
    }
    fn description(&self) -> &'static str {
        "operations outside RUNNING fail with the expected errors"
    }
    fn check(&self) {
        let ward = Ward::new("cat");
        assert!(matches!(ward.send_stdin(b"x"), Err(Error::NotStarted)));
        assert!(matches!(ward.kill(), Err(Error::NotStarted)));
        assert!(matches!(ward.iterate(None, None), Err(Error::NotStarted)));
        ward.start().expect("start");
        assert!(matches!(ward.start(), Err(Error::AlreadyRunning)));
        ward.kill().expect("kill");
        assert!(matches!(ward.kill(), Err(Error::NotStarted)));
    }
}

pub(crate) struct TGroupLeader;
impl crate::TestCase for TGroupLeader {
    fn name(&self) -> &'static str {
        "pid_is_group_leader"
    }
    fn description(&self) -> &'static str {
        "the spawned child leads its own process group"
    }
    fn check(&self) {
        let ward = Ward::new("sleep 2");
        ward.start().expect("start");
        let pid = ward.pid().expect("pid after start");
        let pgid = nix::unistd::getpgid(Some(pid)).expect("getpgid");
        assert_eq!(pgid, pid);
        ward.kill().expect("kill");
    }
}

pub(crate) struct TTtyProbe;
impl crate::TestCase for TTtyProbe {
    fn name(&self) -> &'static str {
        "stdin_tty_probe"
    }
    fn description(&self) -> &'static str {
        "stdin_terminal makes isatty(stdin) true for the child"
    }
    fn check(&self) {
        let probe = "if [ -t 0 ]; then echo TTY; else echo NOT_TTY; fi";

        let ward = Ward::new(probe).stdin_terminal(true);
        ward.start().expect("start");
        let (stdout, _) = collect_all(&ward);
        assert_eq!(stdout, b"TTY\n");

        let ward = Ward::new(probe);
        ward.start().expect("start");
        let (stdout, _) = collect_all(&ward);
        assert_eq!(stdout, b"NOT_TTY\n");
    }
}

pub(crate) struct TRestart;
impl crate::TestCase for TRestart {
    fn name(&self) -> &'static str {
        "restart_reuses_ward"
    }
    fn description(&self) -> &'static str {
        "a reaped ward can be started again"
    }
    fn check(&self) {
        let ward = Ward::new("echo once");
        for _ in 0..2 {
            ward.start().expect("start");
            let (stdout, _) = collect_all(&ward);
            assert_eq!(stdout, b"once\n");
            assert_eq!(ward.return_code(), Some(0));
        }
    }
}
