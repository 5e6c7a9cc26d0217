//! Feeds ward stdins from a background thread through a bounded queue.

use crate::Ward;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use std::{thread, time::Duration};

/// Failures of the stdin pump itself. Delivery failures are not reported
/// back; they stop the worker, which the next `send_stdin` observes as
/// `NotAlive`.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum PumpError {
    #[error("the pump has already been started")]
    AlreadyStarted,
    #[error("the pump has already been stopped")]
    AlreadyStopped,
    #[error("the pump is not running")]
    NotAlive,
    #[error("the message queue is full")]
    BufferFull,
}

struct Job {
    ward: Ward,
    bytes: Vec<u8>,
}

struct Worker {
    jobs: Sender<Job>,
    quit: Sender<()>,
    done: Receiver<()>,
    handle: thread::JoinHandle<()>,
}

/// Asynchronous stdin writer: enqueue `(ward, bytes)` pairs onto a
/// bounded queue drained by one background thread that calls
/// [`Ward::send_stdin`]. Enqueueing fails fast when the queue is full.
///
/// The worker winds down on the first delivery error (broken pipe, dead
/// child), mirroring a worker thread's crash-and-stay-down behavior.
pub struct StdinPump {
    poll_interval: Duration,
    capacity: usize,
    worker: Option<Worker>,
}

impl Default for StdinPump {
    fn default() -> StdinPump {
        StdinPump::new(Duration::from_millis(10), 100)
    }
}

impl StdinPump {
    /// `poll_interval` is how often the idle worker wakes to check for a
    /// stop request; `capacity` bounds the number of queued writes.
    pub fn new(poll_interval: Duration, capacity: usize) -> StdinPump {
        StdinPump {
            poll_interval,
            capacity: capacity.max(1),
            worker: None,
        }
    }

    /// Spawns the worker thread.
    pub fn start(&mut self) -> Result<(), PumpError> {
        if self.worker.is_some() {
            return Err(PumpError::AlreadyStarted);
        }
        let (jobs_tx, jobs_rx) = bounded::<Job>(self.capacity);
        let (quit_tx, quit_rx) = bounded::<()>(1);
        let (done_tx, done_rx) = bounded::<()>(1);
        let poll_interval = self.poll_interval;
        let handle = thread::spawn(move || worker_loop(jobs_rx, quit_rx, done_tx, poll_interval));
        self.worker = Some(Worker {
            jobs: jobs_tx,
            quit: quit_tx,
            done: done_rx,
            handle,
        });
        Ok(())
    }

    /// Enqueues one write. Fails fast with `BufferFull` instead of
    /// blocking when the queue is at capacity.
    pub fn send_stdin(&self, ward: &Ward, bytes: impl Into<Vec<u8>>) -> Result<(), PumpError> {
        let worker = self.worker.as_ref().ok_or(PumpError::NotAlive)?;
        worker
            .jobs
            .try_send(Job {
                ward: ward.clone(),
                bytes: bytes.into(),
            })
            .map_err(|err| match err {
                TrySendError::Full(_) => PumpError::BufferFull,
                TrySendError::Disconnected(_) => PumpError::NotAlive,
            })
    }

    /// Number of writes queued but not yet delivered.
    pub fn queue_len(&self) -> usize {
        self.worker.as_ref().map_or(0, |worker| worker.jobs.len())
    }

    /// True between `start` and `stop`.
    pub fn alive(&self) -> bool {
        self.worker.is_some()
    }

    /// Asks the worker to stop and waits for it. With a timeout, returns
    /// `false` (and keeps the pump stoppable again later) if the worker
    /// did not wind down in time; without one, blocks until it does.
    pub fn stop(&mut self, timeout: Option<Duration>) -> Result<bool, PumpError> {
        let worker = self.worker.take().ok_or(PumpError::AlreadyStopped)?;
        let _ = worker.quit.try_send(());
        match timeout {
            None => {
                let _ = worker.handle.join();
                Ok(true)
            }
            Some(timeout) => match worker.done.recv_timeout(timeout) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                    let _ = worker.handle.join();
                    Ok(true)
                }
                Err(RecvTimeoutError::Timeout) => {
                    self.worker = Some(worker);
                    Ok(false)
                }
            },
        }
    }
}

impl Drop for StdinPump {
    fn drop(&mut self) {
        // Ask the worker to wind down but do not join: dropping the job
        // sender disconnects it anyway, and a worker wedged in a write
        // must not hang the drop.
        if let Some(worker) = self.worker.take() {
            let _ = worker.quit.try_send(());
        }
    }
}

fn worker_loop(
    jobs: Receiver<Job>,
    quit: Receiver<()>,
    done: Sender<()>,
    poll_interval: Duration,
) {
    loop {
        match jobs.recv_timeout(poll_interval) {
            Ok(job) => {
                if let Err(err) = job.ward.send_stdin(&job.bytes) {
                    tracing::debug!(ward = %job.ward.id(), error = %err, "stdin pump stopping");
                    break;
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
        if quit.try_recv().is_ok() {
            break;
        }
    }
    let _ = done.send(());
}
