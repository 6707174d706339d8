//! Line-delimited JSON requests served by the `ad-polls` binary.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::engine::PollEngine;
use crate::error::PollError;
use crate::models::PollDraft;

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    CreatePoll {
        poll: PollDraft,
    },
    SetPollActive {
        poll_id: String,
        active: bool,
    },
    PollsForContent {
        content_id: String,
    },
    CastVote {
        poll_id: String,
        #[serde(default)]
        user_id: Option<String>,
        #[serde(default)]
        device_fingerprint: String,
        option_ids: Vec<String>,
    },
    HasVoted {
        poll_id: String,
        #[serde(default)]
        user_id: Option<String>,
        #[serde(default)]
        device_fingerprint: String,
    },
    GetResults {
        poll_id: String,
    },
    ViewPoll {
        poll_id: String,
        #[serde(default)]
        user_id: Option<String>,
        #[serde(default)]
        device_fingerprint: String,
    },
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Response {
    Ok { data: Value },
    Error { code: String, message: String },
}

impl Response {
    fn ok<T: Serialize>(value: T) -> Self {
        match serde_json::to_value(value) {
            Ok(data) => Response::Ok { data },
            Err(e) => Response::Error {
                code: "internal".to_string(),
                message: e.to_string(),
            },
        }
    }

    fn bad_request(message: String) -> Self {
        Response::Error {
            code: "bad_request".to_string(),
            message,
        }
    }
}

impl From<PollError> for Response {
    fn from(err: PollError) -> Self {
        Response::Error {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

pub async fn handle_line(engine: &PollEngine, line: &str) -> Response {
    match serde_json::from_str::<Request>(line) {
        Ok(request) => handle(engine, request).await,
        Err(e) => Response::bad_request(e.to_string()),
    }
}

pub async fn handle(engine: &PollEngine, request: Request) -> Response {
    let outcome = match request {
        Request::CreatePoll { poll } => engine.create_poll(poll).await.map(Response::ok),
        Request::SetPollActive { poll_id, active } => engine
            .set_poll_active(&poll_id, active)
            .await
            .map(|()| Response::ok(serde_json::json!({ "poll_id": poll_id, "active": active }))),
        Request::PollsForContent { content_id } => {
            engine.polls_for_content(&content_id).await.map(Response::ok)
        }
        Request::CastVote {
            poll_id,
            user_id,
            device_fingerprint,
            option_ids,
        } => engine
            .cast_vote(&poll_id, user_id.as_deref(), &device_fingerprint, &option_ids)
            .await
            .map(Response::ok),
        Request::HasVoted {
            poll_id,
            user_id,
            device_fingerprint,
        } => engine
            .has_voted(&poll_id, user_id.as_deref(), &device_fingerprint)
            .await
            .map(|voted| Response::ok(serde_json::json!({ "has_voted": voted }))),
        Request::GetResults { poll_id } => engine.get_results(&poll_id).await.map(Response::ok),
        Request::ViewPoll {
            poll_id,
            user_id,
            device_fingerprint,
        } => engine
            .view_poll(&poll_id, user_id.as_deref(), &device_fingerprint)
            .await
            .map(Response::ok),
    };

    outcome.unwrap_or_else(Response::from)
}
