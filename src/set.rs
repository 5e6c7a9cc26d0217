//! A set of wards whose outputs are interleaved by one driver loop.

use crate::{Error, Observation, Ward, WardId};
use parking_lot::Mutex;
use std::{
    collections::{BTreeMap, HashMap, HashSet},
    ops::{BitAnd, BitOr, Sub},
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

/// What one driver cycle observed for one member: either drained bytes or
/// exactly one error (a timeout, the member's natural end, or a lifecycle
/// problem). Never both.
#[derive(Debug)]
pub struct SetObservation {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub error: Option<Error>,
}

impl SetObservation {
    fn bytes(obs: Observation) -> SetObservation {
        SetObservation {
            stdout: obs.stdout,
            stderr: obs.stderr,
            error: None,
        }
    }

    fn failure(error: Error) -> SetObservation {
        SetObservation {
            stdout: Vec::new(),
            stderr: Vec::new(),
            error: Some(error),
        }
    }
}

/// Chunk/total deadline bases for one member of a running iteration.
struct Timers {
    chunk_base: Instant,
    total_base: Instant,
}

impl Timers {
    fn new() -> Timers {
        let now = Instant::now();
        Timers {
            chunk_base: now,
            total_base: now,
        }
    }

    fn reset_chunk(&mut self) {
        self.chunk_base = Instant::now();
    }

    fn reset_total(&mut self) {
        self.total_base = Instant::now();
    }

    fn chunk_expired(&self, limit: Duration) -> bool {
        self.chunk_base.elapsed() > limit
    }

    fn total_expired(&self, limit: Duration) -> bool {
        self.total_base.elapsed() > limit
    }
}

/// The roster of members still being polled by the current iteration.
/// Shared between the set and its in-flight [`SetRun`] so that mutating
/// set algebra can be rejected while an iteration is running. The epoch
/// keeps a stale, dropped run from clearing a newer run's roster.
#[derive(Default)]
struct ActiveState {
    epoch: u64,
    live: Option<BTreeMap<WardId, Ward>>,
}

/// A set of [`Ward`]s driven by one fair, re-entrant iteration loop.
///
/// Membership is identity-based: the same ward handle (or any clone of
/// it) is one member, however many sets it belongs to. Members are
/// visited in insertion order, each at most once per cycle.
#[derive(Default)]
pub struct WardSet {
    members: Vec<Ward>,
    active: Arc<Mutex<ActiveState>>,
}

impl std::fmt::Debug for WardSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WardSet")
            .field("members", &self.members.len())
            .field("iterating", &self.active.lock().live.is_some())
            .finish()
    }
}

impl WardSet {
    pub fn new() -> WardSet {
        WardSet {
            members: Vec::new(),
            active: Arc::new(Mutex::new(ActiveState::default())),
        }
    }

    fn with_members(members: Vec<Ward>) -> WardSet {
        WardSet {
            members,
            active: Arc::new(Mutex::new(ActiveState::default())),
        }
    }

    /// Adds a ward; a ward already present (by identity) is not
    /// duplicated.
    pub fn add(&mut self, ward: Ward) {
        if !self.contains(&ward) {
            self.members.push(ward);
        }
    }

    /// Removes a ward by identity. Returns whether it was present.
    pub fn remove(&mut self, ward: &Ward) -> bool {
        match self.members.iter().position(|member| member == ward) {
            Some(index) => {
                self.members.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, ward: &Ward) -> bool {
        self.members.iter().any(|member| member == ward)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Ward> {
        self.members.iter()
    }

    /// A fresh set with the same members.
    pub fn get_all(&self) -> WardSet {
        WardSet::with_members(self.members.clone())
    }

    /// Members whose child is currently alive.
    pub fn get_alive(&self) -> WardSet {
        WardSet::with_members(
            self.members
                .iter()
                .filter(|ward| ward.alive())
                .cloned()
                .collect(),
        )
    }

    /// Members whose child is not alive (never started, exited or reaped).
    pub fn get_dead(&self) -> WardSet {
        WardSet::with_members(
            self.members
                .iter()
                .filter(|ward| !ward.alive())
                .cloned()
                .collect(),
        )
    }

    /// Starts every member. Stops at the first failing spawn.
    pub fn start_all(&self) -> Result<(), Error> {
        for ward in &self.members {
            ward.start()?;
        }
        Ok(())
    }

    /// Kills every member that is still alive.
    pub fn kill_all(&self) -> Result<(), Error> {
        self.stop_all(Ward::kill)
    }

    /// Terminates every member that is still alive.
    pub fn terminate_all(&self) -> Result<(), Error> {
        self.stop_all(Ward::terminate)
    }

    fn stop_all(&self, stop: fn(&Ward) -> Result<(), Error>) -> Result<(), Error> {
        for ward in &self.members {
            if ward.alive() {
                stop(ward)?;
            }
        }
        Ok(())
    }

    fn ensure_not_iterating(&self) -> Result<(), Error> {
        if self.active.lock().live.is_some() {
            return Err(Error::DuringIteration);
        }
        Ok(())
    }

    /// Members of `self`, plus members of `other` not already present.
    /// Rejected while an iteration of `self` is running.
    pub fn union(&self, other: &WardSet) -> Result<WardSet, Error> {
        self.ensure_not_iterating()?;
        let mut members = self.members.clone();
        for ward in &other.members {
            if !members.contains(ward) {
                members.push(ward.clone());
            }
        }
        Ok(WardSet::with_members(members))
    }

    /// Members of `self` that are also in `other`. Read-only, therefore
    /// permitted even during an iteration.
    pub fn intersection(&self, other: &WardSet) -> WardSet {
        WardSet::with_members(
            self.members
                .iter()
                .filter(|ward| other.contains(ward))
                .cloned()
                .collect(),
        )
    }

    /// Members of `self` that are not in `other`. Rejected while an
    /// iteration of `self` is running.
    pub fn difference(&self, other: &WardSet) -> Result<WardSet, Error> {
        self.ensure_not_iterating()?;
        Ok(WardSet::with_members(
            self.members
                .iter()
                .filter(|ward| !other.contains(ward))
                .cloned()
                .collect(),
        ))
    }

    /// Re-activates a member in the running iteration, so a child that
    /// timed out or ended (and was perhaps restarted) is polled again.
    pub fn return_back(&self, ward: &Ward) -> Result<(), Error> {
        if !self.contains(ward) {
            return Err(Error::NotAMember);
        }
        let mut state = self.active.lock();
        match state.live.as_mut() {
            Some(live) => {
                live.insert(ward.id(), ward.clone());
                Ok(())
            }
            None => Err(Error::NotIterating),
        }
    }

    /// Drives every member at once, lazily yielding
    /// `(ward, observation)` pairs. A member producing bytes yields them;
    /// a member that stays silent past its effective timeout, or that
    /// exits on its own, yields an error observation and drops out of the
    /// iteration (it stays a member; see [`return_back`](WardSet::return_back)).
    ///
    /// A member's own [`chunk_timeout`](Ward::chunk_timeout) /
    /// [`total_timeout`](Ward::total_timeout) take precedence over the
    /// defaults given here.
    pub fn iterate(
        &self,
        default_total_timeout: Option<Duration>,
        default_chunk_timeout: Option<Duration>,
    ) -> SetRun {
        let mut state = self.active.lock();
        state.epoch += 1;
        let epoch = state.epoch;
        let roster: BTreeMap<WardId, Ward> = self
            .members
            .iter()
            .map(|ward| (ward.id(), ward.clone()))
            .collect();
        let timers = roster.keys().map(|id| (*id, Timers::new())).collect();
        state.live = Some(roster);
        drop(state);
        tracing::debug!(members = self.members.len(), "set iteration started");
        SetRun {
            active: Arc::clone(&self.active),
            epoch,
            queue: Vec::new(),
            cursor: 0,
            pass_had_event: false,
            timers,
            default_total_timeout,
            default_chunk_timeout,
            done: false,
        }
    }
}

impl FromIterator<Ward> for WardSet {
    fn from_iter<T: IntoIterator<Item = Ward>>(iter: T) -> WardSet {
        let mut set = WardSet::new();
        for ward in iter {
            set.add(ward);
        }
        set
    }
}

/// Two sets are equal when they contain the same wards (by identity).
impl PartialEq for WardSet {
    fn eq(&self, other: &WardSet) -> bool {
        let ours: HashSet<WardId> = self.members.iter().map(Ward::id).collect();
        let theirs: HashSet<WardId> = other.members.iter().map(Ward::id).collect();
        ours == theirs
    }
}

impl Eq for WardSet {}

impl BitOr for &WardSet {
    type Output = Result<WardSet, Error>;

    fn bitor(self, rhs: &WardSet) -> Result<WardSet, Error> {
        self.union(rhs)
    }
}

impl BitAnd for &WardSet {
    type Output = WardSet;

    fn bitand(self, rhs: &WardSet) -> WardSet {
        self.intersection(rhs)
    }
}

impl Sub for &WardSet {
    type Output = Result<WardSet, Error>;

    fn sub(self, rhs: &WardSet) -> Result<WardSet, Error> {
        self.difference(rhs)
    }
}

/// Lazy driver iteration over a [`WardSet`], created by
/// [`WardSet::iterate`]. Ends when no member is active any more; clears
/// the set's active roster on completion or drop so set algebra becomes
/// legal again.
pub struct SetRun {
    active: Arc<Mutex<ActiveState>>,
    epoch: u64,
    /// Snapshot of the current cycle, tolerant of roster changes during
    /// yields.
    queue: Vec<Ward>,
    cursor: usize,
    pass_had_event: bool,
    timers: HashMap<WardId, Timers>,
    default_total_timeout: Option<Duration>,
    default_chunk_timeout: Option<Duration>,
    done: bool,
}

impl SetRun {
    fn finish(&mut self) {
        if self.done {
            return;
        }
        self.done = true;
        let mut state = self.active.lock();
        if state.epoch == self.epoch {
            state.live = None;
        }
    }

    fn deactivate(&self, ward: &Ward) {
        let mut state = self.active.lock();
        if state.epoch == self.epoch {
            if let Some(live) = state.live.as_mut() {
                live.remove(&ward.id());
            }
        }
    }

    /// Takes a fresh snapshot of the active roster. `None` when the
    /// iteration is over (or was superseded by a newer one).
    fn next_pass(&mut self) -> Option<()> {
        let state = self.active.lock();
        if state.epoch != self.epoch {
            return None;
        }
        let live = state.live.as_ref()?;
        if live.is_empty() {
            return None;
        }
        self.queue = live.values().cloned().collect();
        self.cursor = 0;
        Some(())
    }

    fn visit(&mut self, ward: &Ward) -> Option<SetObservation> {
        match ward.read_available() {
            Ok(Some(obs)) => {
                self.timers
                    .entry(ward.id())
                    .or_insert_with(Timers::new)
                    .reset_chunk();
                Some(SetObservation::bytes(obs))
            }
            Ok(None) => {
                let (chunk_override, total_override) = ward.timeout_overrides();
                let total = total_override.or(self.default_total_timeout);
                let chunk = chunk_override.or(self.default_chunk_timeout);
                // The deadline base is reset just before the member drops
                // out; invisible unless `return_back` re-activates it.
                let expired = {
                    let timers = self.timers.entry(ward.id()).or_insert_with(Timers::new);
                    if total.is_some_and(|limit| timers.total_expired(limit)) {
                        timers.reset_total();
                        Some(Error::TotalTimeout {
                            pid: ward.raw_pid(),
                        })
                    } else if chunk.is_some_and(|limit| timers.chunk_expired(limit)) {
                        timers.reset_chunk();
                        Some(Error::ChunkTimeout {
                            pid: ward.raw_pid(),
                        })
                    } else {
                        None
                    }
                };
                expired.map(|error| {
                    self.deactivate(ward);
                    SetObservation::failure(error)
                })
            }
            Err(Error::AlreadyDead) => {
                self.deactivate(ward);
                Some(SetObservation::failure(Error::Ended {
                    pid: ward.raw_pid(),
                }))
            }
            // A member that was never started (or failed mid-read) must
            // not abort the loop for everyone else.
            Err(err) => {
                self.deactivate(ward);
                Some(SetObservation::failure(err))
            }
        }
    }
}

impl Iterator for SetRun {
    type Item = (Ward, SetObservation);

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            if self.cursor >= self.queue.len() {
                let idle_pass = !self.queue.is_empty() && !self.pass_had_event;
                self.pass_had_event = false;
                if idle_pass {
                    thread::sleep(Duration::from_millis(1));
                }
                if self.next_pass().is_none() {
                    self.finish();
                    return None;
                }
            }
            while self.cursor < self.queue.len() {
                let ward = self.queue[self.cursor].clone();
                self.cursor += 1;
                if let Some(observation) = self.visit(&ward) {
                    self.pass_had_event = true;
                    return Some((ward, observation));
                }
            }
        }
    }
}

impl Drop for SetRun {
    fn drop(&mut self) {
        self.finish();
    }
}
