pub mod results;
pub mod service;
pub mod visibility;

pub use results::{OptionResult, PollResults, ResultsAggregator};
pub use service::VotingService;
pub use visibility::VisibilityPolicy;
