use thiserror::Error;

/// Failures coming from the persistence layer. Never retried here.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

#[derive(Debug, Error)]
pub enum PollError {
    #[error("poll {0} not found")]
    PollNotFound(String),
    #[error("poll {0} is closed")]
    PollClosed(String),
    #[error("invalid option selection: {0}")]
    InvalidOption(String),
    #[error("poll {poll_id} accepts a single choice, got {selected}")]
    SingleChoiceViolation { poll_id: String, selected: usize },
    #[error("voter has already voted in poll {0}")]
    DuplicateVote(String),
    #[error("invalid poll: {0}")]
    InvalidPoll(String),
    #[error("no user id or device fingerprint supplied")]
    MissingVoterIdentity,
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl From<sqlx::Error> for PollError {
    fn from(err: sqlx::Error) -> Self {
        PollError::Storage(StorageError::Database(err))
    }
}

impl PollError {
    pub fn code(&self) -> &'static str {
        match self {
            PollError::PollNotFound(_) => "poll_not_found",
            PollError::PollClosed(_) => "poll_closed",
            PollError::InvalidOption(_) => "invalid_option",
            PollError::SingleChoiceViolation { .. } => "single_choice_violation",
            PollError::DuplicateVote(_) => "duplicate_vote",
            PollError::InvalidPoll(_) => "invalid_poll",
            PollError::MissingVoterIdentity => "missing_voter_identity",
            PollError::Storage(_) => "storage_error",
        }
    }
}
