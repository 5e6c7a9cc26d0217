//! Scenario suite for warden.
//!
//! Each scenario is a struct implementing `TestCase`; the registry lives
//! in the `tests` module. The binary lists and runs scenarios by name
//! against real children (`/bin/sh` one-liners), and the `harness`
//! module wraps every scenario in a `#[test]` so `cargo test` drives the
//! whole suite too.

use clap::{Parser, Subcommand};

/// Each scenario implements this trait.
pub trait TestCase: Send + Sync {
    /// Scenario name, as selectable from the command line.
    fn name(&self) -> &'static str;
    /// One-line description.
    fn description(&self) -> &'static str;
    /// Runs the scenario; panics on failure.
    fn check(&self);
}

#[derive(Parser)]
#[command(name = "warden-tests", about = "Run warden scenario tests")]
struct Opt {
    #[command(subcommand)]
    cmd: Cli,
}

#[derive(Subcommand)]
enum Cli {
    /// List all scenarios
    List,
    /// Run the named scenarios, or all of them
    Run { names: Vec<String> },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
    match Opt::parse().cmd {
        Cli::List => {
            for case in tests::TESTS.iter() {
                println!("{:40} {}", case.name(), case.description());
            }
        }
        Cli::Run { names } => {
            let selected: Vec<&'static dyn TestCase> = if names.is_empty() {
                tests::TESTS.to_vec()
            } else {
                names.iter().map(|name| tests::find(name)).collect()
            };
            for case in selected {
                eprintln!("=== {} ===", case.name());
                case.check();
            }
            eprintln!("all scenarios passed");
        }
    }
}

#[cfg(test)]
mod harness {
    fn run(name: &str) {
        crate::tests::find(name).check();
    }

    #[test]
    fn echo_collects_stdout() {
        run("echo_collects_stdout");
    }

    #[test]
    fn argv_mode_runs_verbatim() {
        run("argv_mode_runs_verbatim");
    }

    #[test]
    fn quiet_sleep_runs_to_completion() {
        run("quiet_sleep_runs_to_completion");
    }

    #[test]
    fn exit_codes_propagate() {
        run("exit_codes_propagate");
    }

    #[test]
    fn stderr_is_separated() {
        run("stderr_is_separated");
    }

    #[test]
    fn observations_are_exact_and_never_empty() {
        run("observations_are_exact_and_never_empty");
    }

    #[test]
    fn read_available_drains_ready() {
        run("read_available_drains_ready");
    }

    #[test]
    fn read_available_requires_running() {
        run("read_available_requires_running");
    }

    #[test]
    fn lifecycle_errors() {
        run("lifecycle_errors");
    }

    #[test]
    fn pid_is_group_leader() {
        run("pid_is_group_leader");
    }

    #[test]
    fn stdin_tty_probe() {
        run("stdin_tty_probe");
    }

    #[test]
    fn restart_reuses_ward() {
        run("restart_reuses_ward");
    }

    #[test]
    fn chunk_timeout_interrupts() {
        run("chunk_timeout_interrupts");
    }

    #[test]
    fn total_timeout_interrupts() {
        run("total_timeout_interrupts");
    }

    #[test]
    fn chunk_timeout_wins_ties() {
        run("chunk_timeout_wins_ties");
    }

    #[test]
    fn total_timeout_fires_despite_output() {
        run("total_timeout_fires_despite_output");
    }

    #[test]
    fn resume_after_timeout() {
        run("resume_after_timeout");
    }

    #[test]
    fn kill_removes_process_group() {
        run("kill_removes_process_group");
    }

    #[test]
    fn terminate_then_restart() {
        run("terminate_then_restart");
    }

    #[test]
    fn drop_kills_running_child() {
        run("drop_kills_running_child");
    }

    #[test]
    fn echo_roundtrip() {
        run("echo_roundtrip");
    }

    #[test]
    fn echo_until_dot() {
        run("echo_until_dot");
    }

    #[test]
    fn pump_delivers_to_stdin() {
        run("pump_delivers_to_stdin");
    }

    #[test]
    fn pump_lifecycle_errors() {
        run("pump_lifecycle_errors");
    }

    #[test]
    fn pump_buffer_fills() {
        run("pump_buffer_fills");
    }

    #[test]
    fn set_interleaves_members() {
        run("set_interleaves_members");
    }

    #[test]
    fn set_per_member_timeouts() {
        run("set_per_member_timeouts");
    }

    #[test]
    fn set_algebra_guard() {
        run("set_algebra_guard");
    }

    #[test]
    fn set_return_back_rejoins() {
        run("set_return_back_rejoins");
    }

    #[test]
    fn set_survives_unstarted_member() {
        run("set_survives_unstarted_member");
    }

    #[test]
    fn set_bulk_operations() {
        run("set_bulk_operations");
    }

    #[test]
    fn set_equality_and_algebra() {
        run("set_equality_and_algebra");
    }
}
