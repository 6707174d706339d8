use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::db::{PollStore, VoteLedger};
use crate::error::PollError;
use crate::models::{Poll, Vote};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollResults {
    pub poll_id: String,
    pub total_votes: u64,
    pub per_option: Vec<OptionResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionResult {
    pub option_id: String,
    pub text: String,
    pub vote_count: u64,
    pub percentage: f64,
}

impl PollResults {
    /// Option ids sharing the highest count. Empty while nobody has voted.
    pub fn leaders(&self) -> Vec<&str> {
        let max = self.per_option.iter().map(|o| o.vote_count).max().unwrap_or(0);
        if max == 0 {
            return Vec::new();
        }
        self.per_option
            .iter()
            .filter(|o| o.vote_count == max)
            .map(|o| o.option_id.as_str())
            .collect()
    }

    pub fn option(&self, option_id: &str) -> Option<&OptionResult> {
        self.per_option.iter().find(|o| o.option_id == option_id)
    }
}

pub struct ResultsAggregator {
    polls: Arc<dyn PollStore>,
    ledger: Arc<dyn VoteLedger>,
}

impl ResultsAggregator {
    pub fn new(polls: Arc<dyn PollStore>, ledger: Arc<dyn VoteLedger>) -> Self {
        Self { polls, ledger }
    }

    /// Tallies straight from the ledger on every call; nothing is cached.
    pub async fn get_results(&self, poll_id: &str) -> Result<PollResults, PollError> {
        let poll = self
            .polls
            .get_poll(poll_id)
            .await?
            .ok_or_else(|| PollError::PollNotFound(poll_id.to_string()))?;
        self.results_for(&poll).await
    }

    /// Same as `get_results` for a poll the caller has already loaded.
    pub async fn results_for(&self, poll: &Poll) -> Result<PollResults, PollError> {
        let votes = self.ledger.votes_for_poll(&poll.id).await?;
        Ok(tally(poll, &votes))
    }
}

/// One vote counts once toward the total however many options it selects.
pub fn tally(poll: &Poll, votes: &[Vote]) -> PollResults {
    let mut counts: HashMap<&str, u64> = HashMap::new();
    for vote in votes {
        for option_id in &vote.option_ids {
            *counts.entry(option_id.as_str()).or_insert(0) += 1;
        }
    }

    let total_votes = votes.len() as u64;
    let mut options: Vec<_> = poll.options.iter().collect();
    options.sort_by_key(|option| option.ordinal);

    let per_option = options
        .into_iter()
        .map(|option| {
            let vote_count = counts.get(option.id.as_str()).copied().unwrap_or(0);
            OptionResult {
                option_id: option.id.clone(),
                text: option.text.clone(),
                vote_count,
                percentage: percentage(vote_count, total_votes),
            }
        })
        .collect();

    PollResults {
        poll_id: poll.id.clone(),
        total_votes,
        per_option,
    }
}

fn percentage(count: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (count as f64 * 1000.0 / total as f64).round() / 10.0
}
