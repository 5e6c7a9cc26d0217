//! Teardown: group kills, terminate, restart after stop, drop behavior.
use super::{assert_gone, collect_all, run_until_error, secs_f};
use warden::{Error, Ward};

pub(crate) struct TKillGroup;
impl crate::TestCase for TKillGroup {
    fn name(&self) -> &'static str {
        "kill_removes_process_group"
    }
    fn description(&self) -> &'static str {
        "kill leaves nothing of a shell-wrapped child in the process table"
    }
    fn check(&self) {
        // the && keeps the shell itself alive as the group leader, with
        // sleep as a grandchild
        let ward = Ward::new("sleep 10 && echo success");
        ward.start().expect("start");
        let pid = ward.pid().expect("pid");
        assert!(ward.alive());
        ward.kill().expect("kill");
        assert_gone(pid, secs_f(2.0));
        assert!(nix::sys::signal::killpg(pid, None).is_err(), "group survived");
        assert!(matches!(ward.iterate(None, None), Err(Error::NotStarted)));
    }
}

pub(crate) struct TTerminateRestart;
impl crate::TestCase for TTerminateRestart {
    fn name(&self) -> &'static str {
        "terminate_then_restart"
    }
    fn description(&self) -> &'static str {
        "terminate stops the run and the same ward completes on a fresh start"
    }
    fn check(&self) {
        let ward = Ward::new("sleep 1 && echo success");
        ward.start().expect("start");
        let (err, _) = run_until_error(&ward, Some(secs_f(0.3)), None);
        assert!(matches!(err, Error::ChunkTimeout { .. }));
        let pid = ward.pid().expect("pid");
        ward.terminate().expect("terminate");
        assert!(!ward.alive());
        assert_gone(pid, secs_f(2.0));

        ward.start().expect("restart");
        let (stdout, _) = collect_all(&ward);
        assert_eq!(stdout, b"success\n");
    }
}

pub(crate) struct TDropKills;
impl crate::TestCase for TDropKills {
    fn name(&self) -> &'static str {
        "drop_kills_running_child"
    }
    fn description(&self) -> &'static str {
        "discarding the last handle of a running ward tears the child down"
    }
    fn check(&self) {
        let ward = Ward::new("sleep 30");
        ward.start().expect("start");
        let pid = ward.pid().expect("pid");
        drop(ward);
        assert_gone(pid, secs_f(2.0));
    }
}
