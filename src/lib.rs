/*!
 * Supervise child processes on a POSIX host: launch them in their own
 * process groups, stream their stdout/stderr incrementally without
 * blocking, inject bytes into stdin, enforce per-chunk and total
 * timeouts, and tear whole process trees down cleanly.
 *
 * The building blocks, smallest first:
 *
 * - [`Ward`] owns one child: spawn, non-blocking reads, a lazy
 *   observation iterator with two independent timers, group signalling
 *   and reaping.
 * - [`WardSet`] interleaves many wards behind a single driver loop that
 *   keeps going when individual members time out or exit.
 * - [`StdinPump`] (optional) feeds ward stdins from a background thread
 *   through a bounded queue.
 *
 * The core is single-threaded and cooperative: nothing happens except
 * while the caller is consuming an iterator, and the only waiting is
 * zero-timeout polls plus a millisecond idle sleep.
 */
#[cfg(not(unix))]
compile_error!("warden relies on POSIX process groups, pipes and poll(2)");

mod check;
mod child;
mod cmd;
mod error;
mod fd;
mod pipe;
mod pump;
mod set;

pub use check::{check, CheckResult};
pub use child::{Observation, RunIter, Ward, WardId};
pub use cmd::Cmd;
pub use error::Error;
pub use pump::{PumpError, StdinPump};
pub use set::{SetObservation, SetRun, WardSet};

/// Process id type used throughout the crate.
pub use nix::unistd::Pid;
