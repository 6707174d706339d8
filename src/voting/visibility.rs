use chrono::{DateTime, Utc};
use std::sync::Arc;

use super::VotingService;
use crate::error::PollError;
use crate::models::{is_open, Poll, ResultsVisibility, VoterIdentity};

/// Decides whether a caller sees aggregated results or the voting form.
pub struct VisibilityPolicy {
    voting: Arc<VotingService>,
}

impl VisibilityPolicy {
    pub fn new(voting: Arc<VotingService>) -> Self {
        Self { voting }
    }

    pub async fn can_see_results(&self, poll: &Poll, voter: &VoterIdentity) -> Result<bool, PollError> {
        self.can_see_results_at(poll, voter, Utc::now()).await
    }

    pub(crate) async fn can_see_results_at(
        &self,
        poll: &Poll,
        voter: &VoterIdentity,
        now: DateTime<Utc>,
    ) -> Result<bool, PollError> {
        // Only the after-voting policy needs a ledger read.
        let has_voted = match poll.results_visibility {
            ResultsVisibility::AfterVoting => self.voting.has_voted(&poll.id, voter).await?,
            _ => false,
        };
        Ok(results_visible(poll.results_visibility, has_voted, is_open(poll, now)))
    }
}

pub fn results_visible(visibility: ResultsVisibility, has_voted: bool, open: bool) -> bool {
    match visibility {
        ResultsVisibility::AlwaysVisible => true,
        ResultsVisibility::AfterVoting => has_voted,
        ResultsVisibility::AfterClose => !open,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn always_visible_ignores_state() {
        for (voted, open) in [(false, true), (true, false), (false, false)] {
            assert!(results_visible(ResultsVisibility::AlwaysVisible, voted, open));
        }
    }

    #[test]
    fn after_voting_needs_a_vote() {
        assert!(!results_visible(ResultsVisibility::AfterVoting, false, true));
        assert!(!results_visible(ResultsVisibility::AfterVoting, false, false));
        assert!(results_visible(ResultsVisibility::AfterVoting, true, true));
    }

    #[test]
    fn after_close_needs_closed_poll() {
        assert!(!results_visible(ResultsVisibility::AfterClose, true, true));
        assert!(results_visible(ResultsVisibility::AfterClose, false, false));
    }
}
