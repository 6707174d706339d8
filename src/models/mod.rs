use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

use crate::error::PollError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Poll {
    pub id: String,
    pub content_id: String,
    pub question: String,
    pub description: Option<String>,
    pub options: Vec<PollOption>,
    pub is_multiple_choice: bool,
    pub is_active: bool,
    pub end_date: Option<DateTime<Utc>>,
    pub results_visibility: ResultsVisibility,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollOption {
    pub id: String,
    pub text: String,
    pub ordinal: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultsVisibility {
    AlwaysVisible,
    AfterVoting,
    AfterClose,
}

impl ResultsVisibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultsVisibility::AlwaysVisible => "always_visible",
            ResultsVisibility::AfterVoting => "after_voting",
            ResultsVisibility::AfterClose => "after_close",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "always_visible" => Some(ResultsVisibility::AlwaysVisible),
            "after_voting" => Some(ResultsVisibility::AfterVoting),
            "after_close" => Some(ResultsVisibility::AfterClose),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollState {
    Open,
    Closed,
}

/// Whether a poll accepts votes at `now`. Derived on every call and never stored.
pub fn is_open(poll: &Poll, now: DateTime<Utc>) -> bool {
    poll.is_active && poll.end_date.map_or(true, |end| now < end)
}

impl Poll {
    pub fn state_at(&self, now: DateTime<Utc>) -> PollState {
        if is_open(self, now) {
            PollState::Open
        } else {
            PollState::Closed
        }
    }

    pub fn option_ids(&self) -> BTreeSet<&str> {
        self.options.iter().map(|option| option.id.as_str()).collect()
    }

    pub fn option(&self, option_id: &str) -> Option<&PollOption> {
        self.options.iter().find(|option| option.id == option_id)
    }
}

/// Everything the content side supplies when it attaches a poll to an advertisement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollDraft {
    pub content_id: String,
    pub question: String,
    #[serde(default)]
    pub description: Option<String>,
    pub options: Vec<String>,
    #[serde(default)]
    pub is_multiple_choice: bool,
    #[serde(default)]
    pub end_date: Option<DateTime<Utc>>,
    pub results_visibility: ResultsVisibility,
}

impl PollDraft {
    pub fn into_poll(self) -> Result<Poll, PollError> {
        if self.question.trim().is_empty() {
            return Err(PollError::InvalidPoll("question must not be empty".to_string()));
        }
        if self.options.len() < 2 {
            return Err(PollError::InvalidPoll(format!(
                "a poll needs at least two options, got {}",
                self.options.len()
            )));
        }
        if self.options.iter().any(|text| text.trim().is_empty()) {
            return Err(PollError::InvalidPoll("option text must not be empty".to_string()));
        }

        let options = self
            .options
            .into_iter()
            .enumerate()
            .map(|(i, text)| PollOption {
                id: Uuid::new_v4().to_string(),
                text,
                ordinal: i as i64,
            })
            .collect();

        Ok(Poll {
            id: Uuid::new_v4().to_string(),
            content_id: self.content_id,
            question: self.question,
            description: self.description,
            options,
            is_multiple_choice: self.is_multiple_choice,
            is_active: true,
            end_date: self.end_date,
            results_visibility: self.results_visibility,
            created_at: Utc::now(),
        })
    }
}

/// Who cast a vote. Equality and storage lookups always go through the variant,
/// so a user id and a fingerprint with the same text never collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VoterIdentity {
    Authenticated { user_id: String },
    Anonymous { device_fingerprint: String },
}

impl VoterIdentity {
    /// A signed-in user always wins over the device fingerprint. Anonymous and
    /// authenticated identities of the same person are never merged.
    pub fn resolve(user_id: Option<&str>, device_fingerprint: &str) -> Result<Self, PollError> {
        if let Some(user_id) = user_id.map(str::trim).filter(|id| !id.is_empty()) {
            return Ok(VoterIdentity::Authenticated {
                user_id: user_id.to_string(),
            });
        }

        let fingerprint = device_fingerprint.trim();
        if fingerprint.is_empty() {
            return Err(PollError::MissingVoterIdentity);
        }
        Ok(VoterIdentity::Anonymous {
            device_fingerprint: fingerprint.to_string(),
        })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            VoterIdentity::Authenticated { .. } => "user",
            VoterIdentity::Anonymous { .. } => "device",
        }
    }

    pub fn key(&self) -> &str {
        match self {
            VoterIdentity::Authenticated { user_id } => user_id,
            VoterIdentity::Anonymous { device_fingerprint } => device_fingerprint,
        }
    }

    pub fn from_parts(kind: &str, key: String) -> Option<Self> {
        match kind {
            "user" => Some(VoterIdentity::Authenticated { user_id: key }),
            "device" => Some(VoterIdentity::Anonymous {
                device_fingerprint: key,
            }),
            _ => None,
        }
    }
}

impl fmt::Display for VoterIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind(), self.key())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vote {
    pub poll_id: String,
    pub voter: VoterIdentity,
    pub option_ids: BTreeSet<String>,
    pub cast_at: DateTime<Utc>,
}
