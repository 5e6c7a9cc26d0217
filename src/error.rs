/// Everything that can go wrong while supervising a child.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The operation needs a started (and not yet reaped) child.
    #[error("process was not started, or has already been reaped")]
    NotStarted,
    /// `read_available` was called on a child that has already exited.
    #[error("cannot read, the process is already dead")]
    AlreadyDead,
    /// `start` was called while the previous run is still in flight.
    #[error("process is already running")]
    AlreadyRunning,
    /// No byte-bearing observation arrived within the chunk timeout.
    #[error("chunk timeout expired while reading pid <{pid}>")]
    ChunkTimeout { pid: i32 },
    /// The wall-clock budget for the whole iteration ran out.
    #[error("total timeout expired while reading pid <{pid}>")]
    TotalTimeout { pid: i32 },
    /// Surfaced by `WardSet` iteration: a member exited on its own.
    #[error("process with pid <{pid}> has ended")]
    Ended { pid: i32 },
    /// Union/difference attempted while a set iteration is running.
    #[error("set algebra is not allowed while an iteration is running")]
    DuringIteration,
    /// `return_back` was called with a ward that is not in the set.
    #[error("the process is not a member of this set")]
    NotAMember,
    /// `return_back` was called outside of an iteration.
    #[error("return_back is only meaningful while an iteration is running")]
    NotIterating,
    /// The command resolved to an empty argv.
    #[error("command is empty")]
    EmptyCommand,
    #[error("cannot split command line")]
    CmdSplit(#[from] shell_words::ParseError),
    #[error("io error")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True for `ChunkTimeout` and `TotalTimeout`.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::ChunkTimeout { .. } | Error::TotalTimeout { .. })
    }

    /// True for errors that describe the child's lifecycle rather than
    /// a failure of the supervisor itself.
    pub fn is_lifecycle(&self) -> bool {
        matches!(
            self,
            Error::NotStarted | Error::AlreadyDead | Error::AlreadyRunning | Error::Ended { .. }
        )
    }
}
