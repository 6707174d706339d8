use chrono::Utc;
use log::info;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::Config;
use crate::db::{Database, PollStore};
use crate::error::PollError;
use crate::models::{Poll, PollDraft, PollState, Vote};
use crate::voting::{PollResults, ResultsAggregator, VisibilityPolicy, VotingService};

/// What a caller needs to render a poll attached to an advertisement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollView {
    pub poll: Poll,
    pub state: PollState,
    pub has_voted: bool,
    pub my_selection: Option<Vote>,
    pub results: Option<PollResults>,
}

pub struct PollEngine {
    store: Arc<Database>,
    voting: Arc<VotingService>,
    results: ResultsAggregator,
    visibility: VisibilityPolicy,
}

impl PollEngine {
    pub async fn open(config: &Config) -> Result<Self, PollError> {
        let database = Database::new(config).await?;
        Ok(Self::with_database(Arc::new(database)))
    }

    pub fn with_database(store: Arc<Database>) -> Self {
        let voting = Arc::new(VotingService::new(store.clone(), store.clone()));
        let results = ResultsAggregator::new(store.clone(), store.clone());
        let visibility = VisibilityPolicy::new(voting.clone());
        Self {
            store,
            voting,
            results,
            visibility,
        }
    }

    pub fn voting(&self) -> &VotingService {
        &self.voting
    }

    pub fn results(&self) -> &ResultsAggregator {
        &self.results
    }

    pub fn visibility(&self) -> &VisibilityPolicy {
        &self.visibility
    }

    pub async fn create_poll(&self, draft: PollDraft) -> Result<Poll, PollError> {
        let poll = draft.into_poll()?;
        self.store.create_poll(&poll).await?;
        info!("Created poll {} for content {}", poll.id, poll.content_id);
        Ok(poll)
    }

    pub async fn set_poll_active(&self, poll_id: &str, active: bool) -> Result<(), PollError> {
        if !self.store.set_poll_active(poll_id, active).await? {
            return Err(PollError::PollNotFound(poll_id.to_string()));
        }
        info!("Poll {} marked {}", poll_id, if active { "active" } else { "inactive" });
        Ok(())
    }

    pub async fn polls_for_content(&self, content_id: &str) -> Result<Vec<Poll>, PollError> {
        Ok(self.store.polls_for_content(content_id).await?)
    }

    pub async fn cast_vote(
        &self,
        poll_id: &str,
        user_id: Option<&str>,
        device_fingerprint: &str,
        option_ids: &[String],
    ) -> Result<Vote, PollError> {
        let voter = VotingService::resolve_voter_identity(user_id, device_fingerprint)?;
        self.voting.cast_vote(poll_id, &voter, option_ids).await
    }

    pub async fn has_voted(
        &self,
        poll_id: &str,
        user_id: Option<&str>,
        device_fingerprint: &str,
    ) -> Result<bool, PollError> {
        let voter = VotingService::resolve_voter_identity(user_id, device_fingerprint)?;
        self.voting.has_voted(poll_id, &voter).await
    }

    pub async fn get_results(&self, poll_id: &str) -> Result<PollResults, PollError> {
        self.results.get_results(poll_id).await
    }

    pub async fn view_poll(
        &self,
        poll_id: &str,
        user_id: Option<&str>,
        device_fingerprint: &str,
    ) -> Result<PollView, PollError> {
        let voter = VotingService::resolve_voter_identity(user_id, device_fingerprint)?;
        let poll = self
            .store
            .get_poll(poll_id)
            .await?
            .ok_or_else(|| PollError::PollNotFound(poll_id.to_string()))?;
        let now = Utc::now();

        // Results only for callers the policy lets through
        let my_selection = self.voting.vote_of(poll_id, &voter).await?;
        let results = if self.visibility.can_see_results_at(&poll, &voter, now).await? {
            Some(self.results.results_for(&poll).await?)
        } else {
            None
        };

        Ok(PollView {
            state: poll.state_at(now),
            has_voted: my_selection.is_some(),
            my_selection,
            results,
            poll,
        })
    }
}
