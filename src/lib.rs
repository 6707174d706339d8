pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod models;
pub mod protocol;
pub mod voting;

pub use config::Config;
pub use db::{Database, InsertOutcome, PollStore, VoteLedger};
pub use engine::{PollEngine, PollView};
pub use error::{PollError, StorageError};
pub use models::{is_open, Poll, PollDraft, PollOption, PollState, ResultsVisibility, Vote, VoterIdentity};
pub use voting::{PollResults, ResultsAggregator, VisibilityPolicy, VotingService};
