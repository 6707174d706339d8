use chrono::{DateTime, Utc};
use log::{debug, error, info};
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::db::{InsertOutcome, PollStore, VoteLedger};
use crate::error::PollError;
use crate::models::{is_open, Poll, Vote, VoterIdentity};

/// Validates and registers votes. Holds no vote state of its own: every check
/// that matters under concurrency is delegated to the ledger.
pub struct VotingService {
    polls: Arc<dyn PollStore>,
    ledger: Arc<dyn VoteLedger>,
}

impl VotingService {
    pub fn new(polls: Arc<dyn PollStore>, ledger: Arc<dyn VoteLedger>) -> Self {
        Self { polls, ledger }
    }

    pub fn resolve_voter_identity(
        user_id: Option<&str>,
        device_fingerprint: &str,
    ) -> Result<VoterIdentity, PollError> {
        VoterIdentity::resolve(user_id, device_fingerprint)
    }

    pub async fn cast_vote(
        &self,
        poll_id: &str,
        voter: &VoterIdentity,
        option_ids: &[String],
    ) -> Result<Vote, PollError> {
        self.cast_vote_at(poll_id, voter, option_ids, Utc::now()).await
    }

    // Callers outside the crate always vote against the real clock.
    pub(crate) async fn cast_vote_at(
        &self,
        poll_id: &str,
        voter: &VoterIdentity,
        option_ids: &[String],
        now: DateTime<Utc>,
    ) -> Result<Vote, PollError> {
        let poll = self
            .polls
            .get_poll(poll_id)
            .await?
            .ok_or_else(|| PollError::PollNotFound(poll_id.to_string()))?;

        if !is_open(&poll, now) {
            debug!("Rejected vote by {} on closed poll {}", voter, poll_id);
            return Err(PollError::PollClosed(poll_id.to_string()));
        }

        let selection = validate_selection(&poll, option_ids)?;
        let vote = Vote {
            poll_id: poll.id.clone(),
            voter: voter.clone(),
            option_ids: selection,
            cast_at: now,
        };

        match self.ledger.insert_vote(&vote).await {
            Ok(InsertOutcome::Inserted) => {
                info!(
                    "Registered vote by {} on poll {} ({} option(s))",
                    voter,
                    poll_id,
                    vote.option_ids.len()
                );
                Ok(vote)
            }
            Ok(InsertOutcome::Duplicate) => {
                debug!("Rejected duplicate vote by {} on poll {}", voter, poll_id);
                Err(PollError::DuplicateVote(poll_id.to_string()))
            }
            Err(e) => {
                error!("Failed to store vote by {} on poll {}: {}", voter, poll_id, e);
                Err(e.into())
            }
        }
    }

    pub async fn has_voted(&self, poll_id: &str, voter: &VoterIdentity) -> Result<bool, PollError> {
        Ok(self.ledger.has_vote(poll_id, voter).await?)
    }

    /// The caller's own selection, if they have voted.
    pub async fn vote_of(
        &self,
        poll_id: &str,
        voter: &VoterIdentity,
    ) -> Result<Option<Vote>, PollError> {
        Ok(self.ledger.find_vote(poll_id, voter).await?)
    }
}

/// Checks a selection against the poll's options and choice mode. Repeated ids
/// collapse into one selection.
pub fn validate_selection(poll: &Poll, option_ids: &[String]) -> Result<BTreeSet<String>, PollError> {
    if option_ids.is_empty() {
        return Err(PollError::InvalidOption("no option selected".to_string()));
    }

    let known = poll.option_ids();
    if let Some(unknown) = option_ids.iter().find(|id| !known.contains(id.as_str())) {
        return Err(PollError::InvalidOption(format!(
            "option {} does not belong to poll {}",
            unknown, poll.id
        )));
    }

    let selection: BTreeSet<String> = option_ids.iter().cloned().collect();
    if !poll.is_multiple_choice && selection.len() != 1 {
        return Err(PollError::SingleChoiceViolation {
            poll_id: poll.id.clone(),
            selected: selection.len(),
        });
    }

    Ok(selection)
}
