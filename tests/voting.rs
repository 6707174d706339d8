use ad_polls::protocol;
use ad_polls::{
    Config, Database, PollDraft, PollEngine, PollError, ResultsVisibility, StorageError,
    VoterIdentity,
};
use chrono::{Duration, Utc};
use futures_util::future::join_all;
use std::sync::Arc;
use tempfile::TempDir;

fn db_url(dir: &TempDir) -> String {
    format!("sqlite://{}", dir.path().join("polls.db").display())
}

async fn engine(dir: &TempDir) -> PollEngine {
    PollEngine::open(&Config::for_url(db_url(dir))).await.unwrap()
}

fn draft(options: &[&str], multiple: bool, visibility: ResultsVisibility) -> PollDraft {
    PollDraft {
        content_id: "ad-clinic-opening".to_string(),
        question: "Which service should the new clinic offer first?".to_string(),
        description: Some("Sponsored by the union branch".to_string()),
        options: options.iter().map(|o| o.to_string()).collect(),
        is_multiple_choice: multiple,
        end_date: None,
        results_visibility: visibility,
    }
}

fn device(fp: &str) -> VoterIdentity {
    VoterIdentity::Anonymous {
        device_fingerprint: fp.to_string(),
    }
}

fn user(id: &str) -> VoterIdentity {
    VoterIdentity::Authenticated {
        user_id: id.to_string(),
    }
}

#[tokio::test]
async fn cast_vote_marks_voter_as_voted() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(&dir).await;
    let poll = engine
        .create_poll(draft(&["Surgery", "Grooming"], false, ResultsVisibility::AfterVoting))
        .await
        .unwrap();
    let voter = user("farmer-1");

    assert!(!engine.voting().has_voted(&poll.id, &voter).await.unwrap());
    let vote = engine
        .voting()
        .cast_vote(&poll.id, &voter, &[poll.options[0].id.clone()])
        .await
        .unwrap();

    assert_eq!(vote.voter, voter);
    assert!(engine.voting().has_voted(&poll.id, &voter).await.unwrap());
    let stored = engine.voting().vote_of(&poll.id, &voter).await.unwrap().unwrap();
    assert_eq!(stored.option_ids, vote.option_ids);
}

#[tokio::test]
async fn scenario_a_single_choice_percentages() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(&dir).await;
    let poll = engine
        .create_poll(draft(&["X", "Y"], false, ResultsVisibility::AlwaysVisible))
        .await
        .unwrap();
    let x = poll.options[0].id.clone();
    let y = poll.options[1].id.clone();

    for fp in ["d1", "d2", "d3"] {
        engine.voting().cast_vote(&poll.id, &device(fp), &[x.clone()]).await.unwrap();
    }
    engine.voting().cast_vote(&poll.id, &device("d4"), &[y.clone()]).await.unwrap();

    let results = engine.get_results(&poll.id).await.unwrap();
    assert_eq!(results.total_votes, 4);
    assert_eq!(results.option(&x).unwrap().percentage, 75.0);
    assert_eq!(results.option(&y).unwrap().percentage, 25.0);
    let sum: f64 = results.per_option.iter().map(|o| o.percentage).sum();
    assert!((sum - 100.0).abs() <= 0.1 + 1e-9);
}

#[tokio::test]
async fn scenario_b_multiple_choice_counts_each_option() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(&dir).await;
    let poll = engine
        .create_poll(draft(&["A", "B", "C"], true, ResultsVisibility::AlwaysVisible))
        .await
        .unwrap();
    let a = poll.options[0].id.clone();
    let b = poll.options[1].id.clone();

    let before = engine.get_results(&poll.id).await.unwrap();
    engine
        .voting()
        .cast_vote(&poll.id, &user("vet-7"), &[a.clone(), b.clone()])
        .await
        .unwrap();
    let after = engine.get_results(&poll.id).await.unwrap();

    assert_eq!(after.total_votes, before.total_votes + 1);
    assert_eq!(after.option(&a).unwrap().vote_count, before.option(&a).unwrap().vote_count + 1);
    assert_eq!(after.option(&b).unwrap().vote_count, before.option(&b).unwrap().vote_count + 1);
    assert_eq!(after.option(&poll.options[2].id).unwrap().vote_count, 0);
}

#[tokio::test]
async fn scenario_c_expired_poll_rejects_votes() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(&dir).await;
    let mut expired = draft(&["Yes", "No"], false, ResultsVisibility::AfterClose);
    expired.end_date = Some(Utc::now() - Duration::days(1));
    let poll = engine.create_poll(expired).await.unwrap();
    assert!(poll.is_active);

    let err = engine
        .voting()
        .cast_vote(&poll.id, &device("d1"), &[poll.options[0].id.clone()])
        .await
        .unwrap_err();
    assert!(matches!(err, PollError::PollClosed(_)));
    assert!(!engine.voting().has_voted(&poll.id, &device("d1")).await.unwrap());
}

#[tokio::test]
async fn scenario_d_second_vote_is_duplicate() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(&dir).await;
    let poll = engine
        .create_poll(draft(&["Morning", "Evening"], false, ResultsVisibility::AlwaysVisible))
        .await
        .unwrap();
    let voter = device("phone-1");

    engine
        .voting()
        .cast_vote(&poll.id, &voter, &[poll.options[0].id.clone()])
        .await
        .unwrap();
    let before = engine.get_results(&poll.id).await.unwrap();

    let err = engine
        .voting()
        .cast_vote(&poll.id, &voter, &[poll.options[1].id.clone()])
        .await
        .unwrap_err();
    assert!(matches!(err, PollError::DuplicateVote(_)));

    let after = engine.get_results(&poll.id).await.unwrap();
    assert_eq!(before, after);
    let stored = engine.voting().vote_of(&poll.id, &voter).await.unwrap().unwrap();
    assert!(stored.option_ids.contains(&poll.options[0].id));
}

#[tokio::test]
async fn scenario_e_empty_poll_has_zero_percentages() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(&dir).await;
    let poll = engine
        .create_poll(draft(&["One", "Two", "Three"], false, ResultsVisibility::AlwaysVisible))
        .await
        .unwrap();

    let results = engine.get_results(&poll.id).await.unwrap();
    assert_eq!(results.total_votes, 0);
    assert_eq!(results.per_option.len(), 3);
    assert!(results.per_option.iter().all(|o| o.percentage == 0.0 && o.vote_count == 0));
}

#[tokio::test]
async fn repeated_reads_are_identical() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(&dir).await;
    let poll = engine
        .create_poll(draft(&["Cats", "Dogs"], false, ResultsVisibility::AlwaysVisible))
        .await
        .unwrap();
    engine
        .voting()
        .cast_vote(&poll.id, &user("u1"), &[poll.options[1].id.clone()])
        .await
        .unwrap();

    let first = engine.get_results(&poll.id).await.unwrap();
    let second = engine.get_results(&poll.id).await.unwrap();
    assert_eq!(first, second);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_duplicates_across_instances_have_one_winner() {
    let dir = tempfile::tempdir().unwrap();
    let url = db_url(&dir);
    let first = Arc::new(PollEngine::open(&Config::for_url(url.clone())).await.unwrap());
    let second = Arc::new(PollEngine::open(&Config::for_url(url)).await.unwrap());

    let poll = first
        .create_poll(draft(&["Vaccinate", "Wait"], false, ResultsVisibility::AlwaysVisible))
        .await
        .unwrap();
    let option = poll.options[0].id.clone();
    let voter = user("shared-voter");

    let attempts = 16;
    let handles = (0..attempts).map(|i| {
        let engine = if i % 2 == 0 { first.clone() } else { second.clone() };
        let poll_id = poll.id.clone();
        let voter = voter.clone();
        let option = option.clone();
        tokio::spawn(async move { engine.voting().cast_vote(&poll_id, &voter, &[option]).await })
    });

    let outcomes: Vec<_> = join_all(handles)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    let wins = outcomes.iter().filter(|o| o.is_ok()).count();
    let duplicates = outcomes
        .iter()
        .filter(|o| matches!(o, Err(PollError::DuplicateVote(_))))
        .count();
    assert_eq!(wins, 1);
    assert_eq!(duplicates, attempts - 1);

    let results = second.get_results(&poll.id).await.unwrap();
    assert_eq!(results.total_votes, 1);
    assert_eq!(results.option(&option).unwrap().vote_count, 1);
}

#[tokio::test]
async fn validation_errors_are_typed() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(&dir).await;
    let poll = engine
        .create_poll(draft(&["Hay", "Silage"], false, ResultsVisibility::AlwaysVisible))
        .await
        .unwrap();
    let voter = device("d1");
    let both: Vec<String> = poll.options.iter().map(|o| o.id.clone()).collect();

    let missing = engine.voting().cast_vote("no-such-poll", &voter, &both).await.unwrap_err();
    assert!(matches!(missing, PollError::PollNotFound(_)));

    let empty = engine.voting().cast_vote(&poll.id, &voter, &[]).await.unwrap_err();
    assert!(matches!(empty, PollError::InvalidOption(_)));

    let foreign = engine
        .voting()
        .cast_vote(&poll.id, &voter, &["not-an-option".to_string()])
        .await
        .unwrap_err();
    assert!(matches!(foreign, PollError::InvalidOption(_)));

    let two = engine.voting().cast_vote(&poll.id, &voter, &both).await.unwrap_err();
    assert!(matches!(two, PollError::SingleChoiceViolation { selected: 2, .. }));

    // nothing partial was written
    assert!(!engine.voting().has_voted(&poll.id, &voter).await.unwrap());
    assert_eq!(engine.get_results(&poll.id).await.unwrap().total_votes, 0);
}

#[tokio::test]
async fn votes_survive_deactivation() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(&dir).await;
    let poll = engine
        .create_poll(draft(&["Yes", "No"], false, ResultsVisibility::AfterClose))
        .await
        .unwrap();
    let voter = user("u1");
    engine
        .voting()
        .cast_vote(&poll.id, &voter, &[poll.options[1].id.clone()])
        .await
        .unwrap();

    engine.set_poll_active(&poll.id, false).await.unwrap();

    let err = engine
        .voting()
        .cast_vote(&poll.id, &user("u2"), &[poll.options[0].id.clone()])
        .await
        .unwrap_err();
    assert!(matches!(err, PollError::PollClosed(_)));
    assert!(engine.voting().has_voted(&poll.id, &voter).await.unwrap());
    assert_eq!(engine.get_results(&poll.id).await.unwrap().total_votes, 1);

    let unknown = engine.set_poll_active("ghost", false).await.unwrap_err();
    assert!(matches!(unknown, PollError::PollNotFound(_)));
}

#[tokio::test]
async fn visibility_follows_policy() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(&dir).await;
    let voter = device("d1");
    let stranger = device("d2");

    let always = engine
        .create_poll(draft(&["A", "B"], false, ResultsVisibility::AlwaysVisible))
        .await
        .unwrap();
    assert!(engine.visibility().can_see_results(&always, &stranger).await.unwrap());

    let after_voting = engine
        .create_poll(draft(&["A", "B"], false, ResultsVisibility::AfterVoting))
        .await
        .unwrap();
    assert!(!engine.visibility().can_see_results(&after_voting, &voter).await.unwrap());
    engine
        .voting()
        .cast_vote(&after_voting.id, &voter, &[after_voting.options[0].id.clone()])
        .await
        .unwrap();
    assert!(engine.visibility().can_see_results(&after_voting, &voter).await.unwrap());
    assert!(!engine.visibility().can_see_results(&after_voting, &stranger).await.unwrap());

    let after_close = engine
        .create_poll(draft(&["A", "B"], false, ResultsVisibility::AfterClose))
        .await
        .unwrap();
    assert!(!engine.visibility().can_see_results(&after_close, &voter).await.unwrap());
    assert!(engine.view_poll(&after_close.id, None, "d1").await.unwrap().results.is_none());
    engine.set_poll_active(&after_close.id, false).await.unwrap();
    let view = engine.view_poll(&after_close.id, None, "d1").await.unwrap();
    assert!(engine.visibility().can_see_results(&view.poll, &voter).await.unwrap());
    assert!(view.results.is_some());

    let mut expired = draft(&["A", "B"], false, ResultsVisibility::AfterClose);
    expired.end_date = Some(Utc::now() - Duration::minutes(5));
    let expired = engine.create_poll(expired).await.unwrap();
    assert!(engine.visibility().can_see_results(&expired, &stranger).await.unwrap());
}

#[tokio::test]
async fn view_poll_hides_results_until_voted() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(&dir).await;
    let poll = engine
        .create_poll(draft(&["Yes", "No"], false, ResultsVisibility::AfterVoting))
        .await
        .unwrap();

    let view = engine.view_poll(&poll.id, None, "tablet-3").await.unwrap();
    assert!(!view.has_voted);
    assert!(view.results.is_none());

    engine
        .cast_vote(&poll.id, None, "tablet-3", &[poll.options[0].id.clone()])
        .await
        .unwrap();
    let view = engine.view_poll(&poll.id, None, "tablet-3").await.unwrap();
    assert!(view.has_voted);
    assert!(view.my_selection.unwrap().option_ids.contains(&poll.options[0].id));
    assert_eq!(view.results.unwrap().total_votes, 1);
}

#[tokio::test]
async fn anonymous_and_authenticated_slots_are_separate() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(&dir).await;
    let poll = engine
        .create_poll(draft(&["Yes", "No"], false, ResultsVisibility::AlwaysVisible))
        .await
        .unwrap();
    let option = [poll.options[0].id.clone()];

    engine.cast_vote(&poll.id, None, "same", &option).await.unwrap();
    // signing in later yields a different identity; no merge is attempted
    engine.cast_vote(&poll.id, Some("same"), "same", &option).await.unwrap();
    let err = engine.cast_vote(&poll.id, Some("same"), "other", &option).await.unwrap_err();
    assert!(matches!(err, PollError::DuplicateVote(_)));

    assert_eq!(engine.get_results(&poll.id).await.unwrap().total_votes, 2);
    assert!(matches!(
        engine.cast_vote(&poll.id, None, "  ", &option).await,
        Err(PollError::MissingVoterIdentity)
    ));
}

#[tokio::test]
async fn polls_listed_per_content() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(&dir).await;
    let first = engine
        .create_poll(draft(&["A", "B"], false, ResultsVisibility::AlwaysVisible))
        .await
        .unwrap();
    let second = engine
        .create_poll(draft(&["C", "D"], true, ResultsVisibility::AfterClose))
        .await
        .unwrap();
    let mut other = draft(&["E", "F"], false, ResultsVisibility::AlwaysVisible);
    other.content_id = "ad-feed-discount".to_string();
    engine.create_poll(other).await.unwrap();

    let polls = engine.polls_for_content("ad-clinic-opening").await.unwrap();
    let ids: Vec<_> = polls.iter().map(|p| p.id.as_str()).collect();
    assert_eq!(ids, vec![first.id.as_str(), second.id.as_str()]);
    assert_eq!(polls[0].options, first.options);
    assert_eq!(polls[1].options, second.options);
    assert_eq!(polls[1].description.as_deref(), Some("Sponsored by the union branch"));

    let invalid = engine
        .create_poll(draft(&["Lonely"], false, ResultsVisibility::AlwaysVisible))
        .await
        .unwrap_err();
    assert!(matches!(invalid, PollError::InvalidPoll(_)));
}

#[tokio::test]
async fn corrupt_vote_row_surfaces_as_storage_error() {
    let dir = tempfile::tempdir().unwrap();
    let db = Arc::new(Database::new(&Config::for_url(db_url(&dir))).await.unwrap());
    let engine = PollEngine::with_database(db.clone());
    let poll = engine
        .create_poll(draft(&["Yes", "No"], false, ResultsVisibility::AlwaysVisible))
        .await
        .unwrap();
    let voter = user("u1");
    engine
        .voting()
        .cast_vote(&poll.id, &voter, &[poll.options[0].id.clone()])
        .await
        .unwrap();
    engine
        .voting()
        .cast_vote(&poll.id, &user("u2"), &[poll.options[1].id.clone()])
        .await
        .unwrap();

    sqlx::query("UPDATE votes SET cast_at = 'last tuesday' WHERE voter_key = ?")
        .bind("u1")
        .execute(db.pool())
        .await
        .unwrap();

    // a bad row stops the tally instead of being skipped
    let results = engine.get_results(&poll.id).await.unwrap_err();
    assert!(matches!(results, PollError::Storage(StorageError::Corrupt(_))));
    assert_eq!(results.code(), "storage_error");

    let mine = engine.voting().vote_of(&poll.id, &voter).await.unwrap_err();
    assert!(matches!(mine, PollError::Storage(StorageError::Corrupt(_))));

    let request = serde_json::json!({ "op": "get_results", "poll_id": poll.id });
    let response = serde_json::to_value(protocol::handle_line(&engine, &request.to_string()).await).unwrap();
    assert_eq!(response["status"], "error");
    assert_eq!(response["code"], "storage_error");
}

#[tokio::test]
async fn corrupt_poll_row_surfaces_as_storage_error() {
    let dir = tempfile::tempdir().unwrap();
    let db = Arc::new(Database::new(&Config::for_url(db_url(&dir))).await.unwrap());
    let engine = PollEngine::with_database(db.clone());
    let poll = engine
        .create_poll(draft(&["Yes", "No"], false, ResultsVisibility::AfterVoting))
        .await
        .unwrap();

    sqlx::query("UPDATE polls SET results_visibility = 'sometimes' WHERE id = ?")
        .bind(&poll.id)
        .execute(db.pool())
        .await
        .unwrap();

    let err = engine
        .voting()
        .cast_vote(&poll.id, &device("d1"), &[poll.options[0].id.clone()])
        .await
        .unwrap_err();
    assert!(matches!(err, PollError::Storage(StorageError::Corrupt(_))));
    assert!(!engine.voting().has_voted(&poll.id, &device("d1")).await.unwrap());
}
