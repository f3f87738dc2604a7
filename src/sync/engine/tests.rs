use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::{Severity, SyncError};
use crate::sync::domain::{RawRecord, SessionToken};
use crate::sync::engine::{advance, validate_batch, PhaseEvent, SyncEngine};
use crate::sync::source::{MockRecordSource, SourceError};
use crate::sync::store::{HistoryStore, TokenStore};
use crate::sync::testing::{at, raw, raw_batch};
use crate::sync::types::CyclePhase;

// =========================================================================
// Helpers
// =========================================================================

const TIMEOUT: Duration = Duration::from_secs(5);

fn seed_token(path: &Path, credential: &str) {
    let mut tokens = TokenStore::open(path).unwrap();
    tokens
        .replace(SessionToken::new("7001234", credential, at(0)))
        .unwrap();
}

fn engine_at(token_path: &Path, history_path: &Path, source: MockRecordSource) -> SyncEngine<MockRecordSource> {
    let mut hour = 0;
    SyncEngine::new(
        TokenStore::open(token_path).unwrap(),
        HistoryStore::open(history_path).unwrap(),
        source,
        TIMEOUT,
    )
    .with_clock(move || {
        hour += 1;
        at(hour)
    })
}

/// Engine over a fresh data dir with a valid `cred-a` token.
fn setup(source: MockRecordSource) -> (tempfile::TempDir, SyncEngine<MockRecordSource>) {
    let dir = tempfile::tempdir().unwrap();
    let token_path = dir.path().join("token.json");
    seed_token(&token_path, "cred-a");
    let engine = engine_at(&token_path, &dir.path().join("play_history.json"), source);
    (dir, engine)
}

fn scripted(build: impl FnOnce(&mut MockRecordSource)) -> MockRecordSource {
    let mut source = MockRecordSource::new();
    build(&mut source);
    source
}

// =========================================================================
// Pure logic
// =========================================================================

#[test]
fn phase_transitions() {
    use CyclePhase::*;

    let mut phase = Idle;
    for (event, expected) in [
        (PhaseEvent::Started, Fetching),
        (PhaseEvent::Fetched, Merging),
        (PhaseEvent::Merged, Rotating),
        (PhaseEvent::Rotated, Idle),
    ] {
        phase = advance(phase, event);
        assert_eq!(phase, expected);
    }

    assert_eq!(advance(Fetching, PhaseEvent::Failed), Idle);
    assert_eq!(advance(Fetching, PhaseEvent::AuthRejected), Halted);
    assert_eq!(advance(Halted, PhaseEvent::Started), Halted);
    assert_eq!(advance(Halted, PhaseEvent::Failed), Halted);
    assert_eq!(advance(Halted, PhaseEvent::TokenReplaced), Idle);
}

#[test]
fn validation_keeps_good_records_and_reports_bad_ones() {
    let mut page = raw_batch();
    page.insert(2, RawRecord::default());

    let batch = validate_batch(page);
    assert_eq!(batch.valid.len(), 5);
    assert_eq!(batch.dropped.len(), 1);
    assert_eq!(batch.dropped[0].0, 2);
}

// =========================================================================
// Cycles
// =========================================================================

#[tokio::test]
async fn first_run_adds_every_record() {
    let (_dir, mut engine) = setup(scripted(|s| {
        s.push_records(raw_batch());
    }));

    let outcome = engine.run_once().await;

    assert!(outcome.is_success(), "{outcome}");
    assert_eq!((outcome.added, outcome.seen, outcome.dropped), (5, 0, 0));
    assert!(!outcome.token_rotated);
    assert_eq!(engine.history().count(), 5);
    assert_eq!(engine.history().cycle_count(), 1);
    assert_eq!(engine.phase(), CyclePhase::Idle);
}

#[tokio::test]
async fn repeated_batch_is_only_seen() {
    let (_dir, mut engine) = setup(scripted(|s| {
        s.push_records(raw_batch()).push_records(raw_batch());
    }));

    engine.run_once().await;
    let second = engine.run_once().await;

    assert_eq!((second.added, second.seen), (0, 5));
    assert_eq!(engine.history().count(), 5);
    assert_eq!(engine.history().cycle_count(), 2);
}

#[tokio::test]
async fn one_corrupt_record_does_not_block_the_rest() {
    let mut page = raw_batch();
    page.truncate(4);
    page.push(raw("106", "Broken", "not-a-number"));

    let (_dir, mut engine) = setup(scripted(|s| {
        s.push_records(page);
    }));

    let outcome = engine.run_once().await;

    assert!(outcome.is_success());
    assert_eq!((outcome.added, outcome.dropped), (4, 1));
    assert_eq!(engine.history().count(), 4);
}

#[tokio::test]
async fn auth_rejection_halts_without_touching_history() {
    let (dir, mut engine) = setup(scripted(|s| {
        s.push_error(SourceError::Auth("redirected to error page".into()))
            .push_records(raw_batch());
    }));

    let outcome = engine.run_once().await;

    assert!(matches!(outcome.error, Some(SyncError::Auth(_))));
    assert_eq!(outcome.severity(), Some(Severity::Fatal));
    assert_eq!(engine.phase(), CyclePhase::Halted);
    assert_eq!(engine.history().count(), 0);
    assert!(!dir.path().join("play_history.json").exists());

    let stored = TokenStore::open(dir.path().join("token.json")).unwrap();
    assert!(stored.current().unwrap().is_invalidated());
    assert_eq!(stored.current().unwrap().credential, "cred-a");

    // No second request while halted.
    let again = engine.run_once().await;
    assert!(matches!(again.error, Some(SyncError::Halted { .. })));
    assert_eq!(engine.source().calls(), 1);
}

#[tokio::test]
async fn renewed_credential_is_used_on_the_next_cycle() {
    let (dir, mut engine) = setup(scripted(|s| {
        s.push_rotation(raw_batch(), "cred-b").push_records(Vec::new());
    }));

    let first = engine.run_once().await;
    assert!(first.token_rotated);
    assert_eq!(engine.history().count(), 5);

    let on_disk = TokenStore::open(dir.path().join("token.json")).unwrap();
    assert_eq!(on_disk.current().unwrap().credential, "cred-b");
    assert_eq!(on_disk.current().unwrap().subject_id, "7001234");

    engine.run_once().await;
    assert_eq!(engine.source().seen_credentials, vec!["cred-a", "cred-b"]);
}

#[tokio::test]
async fn unchanged_credential_in_response_is_not_a_rotation() {
    let (dir, mut engine) = setup(scripted(|s| {
        s.push_rotation(raw_batch(), "cred-a");
    }));
    let token_path = dir.path().join("token.json");
    let before = fs::read(&token_path).unwrap();

    let outcome = engine.run_once().await;

    assert!(outcome.is_success());
    assert!(!outcome.token_rotated);
    assert_eq!(fs::read(&token_path).unwrap(), before);
}

#[tokio::test]
async fn failed_merge_discards_the_renewed_credential() {
    let dir = tempfile::tempdir().unwrap();
    let token_path = dir.path().join("token.json");
    let history_dir = dir.path().join("history");
    seed_token(&token_path, "cred-a");

    let mut engine = engine_at(
        &token_path,
        &history_dir.join("play_history.json"),
        scripted(|s| {
            s.push_rotation(raw_batch(), "cred-b");
        }),
    );
    // Nothing can be written under a regular file.
    fs::write(&history_dir, b"not a directory").unwrap();

    let outcome = engine.run_once().await;

    assert!(matches!(outcome.error, Some(SyncError::Persistence { .. })));
    assert_eq!(outcome.severity(), Some(Severity::Fatal));
    assert!(!outcome.token_rotated);
    assert_eq!(engine.tokens().current().unwrap().credential, "cred-a");
    assert_eq!(
        TokenStore::open(&token_path).unwrap().current().unwrap().credential,
        "cred-a"
    );
    assert_eq!(engine.phase(), CyclePhase::Idle);
}

#[tokio::test]
async fn network_failure_is_transient_and_keeps_the_token() {
    let (_dir, mut engine) = setup(scripted(|s| {
        s.push_error(SourceError::network("connection reset"));
    }));

    let outcome = engine.run_once().await;

    assert_eq!(outcome.severity(), Some(Severity::Transient));
    assert_eq!(engine.phase(), CyclePhase::Idle);
    assert!(!engine.tokens().current().unwrap().is_invalidated());
    assert_eq!(engine.history().cycle_count(), 0);
}

#[tokio::test]
async fn credential_rotated_by_a_failed_fetch_is_kept() {
    let (dir, mut engine) = setup(scripted(|s| {
        s.push_error(
            SourceError::network("unreadable record page")
                .with_renewed_credential(Some("cred-b".into())),
        )
        .push_records(raw_batch());
    }));

    let failed = engine.run_once().await;

    assert_eq!(failed.severity(), Some(Severity::Transient));
    assert!(failed.token_rotated);
    assert_eq!(engine.history().count(), 0);
    assert_eq!(
        TokenStore::open(dir.path().join("token.json")).unwrap().current().unwrap().credential,
        "cred-b"
    );

    let next = engine.run_once().await;
    assert!(next.is_success(), "{next}");
    assert_eq!(next.added, 5);
    assert_eq!(engine.source().seen_credentials, vec!["cred-a", "cred-b"]);
}

#[tokio::test]
async fn cycle_counters_are_written_with_the_merge() {
    let dir = tempfile::tempdir().unwrap();
    let token_dir = dir.path().join("secrets");
    let token_path = token_dir.join("token.json");
    let history_path = dir.path().join("play_history.json");
    seed_token(&token_path, "cred-a");

    let mut engine = engine_at(
        &token_path,
        &history_path,
        scripted(|s| {
            s.push_rotation(raw_batch(), "cred-b");
        }),
    );
    // The token can no longer be rewritten; the history still can.
    fs::remove_dir_all(&token_dir).unwrap();
    fs::write(&token_dir, b"not a directory").unwrap();

    let outcome = engine.run_once().await;

    assert!(matches!(outcome.error, Some(SyncError::Persistence { .. })));
    assert_eq!(outcome.added, 5);
    assert!(!outcome.token_rotated);

    let on_disk = HistoryStore::open(&history_path).unwrap();
    assert_eq!(on_disk.count(), 5);
    assert_eq!(on_disk.cycle_count(), 1);
    assert_eq!(on_disk.last_sync_at(), Some(at(1)));
}

#[tokio::test]
async fn slow_fetch_times_out_as_transient() {
    let dir = tempfile::tempdir().unwrap();
    let token_path = dir.path().join("token.json");
    seed_token(&token_path, "cred-a");

    let mut source = MockRecordSource::new().with_delay(Duration::from_millis(500));
    source.push_records(raw_batch());
    let mut engine = SyncEngine::new(
        TokenStore::open(&token_path).unwrap(),
        HistoryStore::open(dir.path().join("play_history.json")).unwrap(),
        source,
        Duration::from_millis(50),
    );

    let outcome = engine.run_once().await;

    assert!(matches!(outcome.error, Some(SyncError::Timeout(_))));
    assert_eq!(outcome.severity(), Some(Severity::Transient));
    assert_eq!(engine.history().count(), 0);
    assert!(!engine.tokens().current().unwrap().is_invalidated());
}

#[tokio::test]
async fn missing_token_fails_without_fetching() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = engine_at(
        &dir.path().join("token.json"),
        &dir.path().join("play_history.json"),
        MockRecordSource::new(),
    );

    let outcome = engine.run_once().await;

    assert!(matches!(outcome.error, Some(SyncError::NotInitialized)));
    assert_eq!(outcome.severity(), Some(Severity::Fatal));
    assert_eq!(engine.source().calls(), 0);
}

#[tokio::test]
async fn halted_state_survives_restart_until_token_is_replaced() {
    let (dir, mut engine) = setup(scripted(|s| {
        s.push_error(SourceError::Auth("403".into()));
    }));
    engine.run_once().await;
    drop(engine);

    let mut restarted = engine_at(
        &dir.path().join("token.json"),
        &dir.path().join("play_history.json"),
        scripted(|s| {
            s.push_records(raw_batch());
        }),
    );
    assert_eq!(restarted.phase(), CyclePhase::Halted);

    let refused = restarted.run_once().await;
    assert!(matches!(refused.error, Some(SyncError::Halted { .. })));
    assert_eq!(restarted.source().calls(), 0);

    assert!(restarted
        .replace_token(SessionToken::new("7001234", "cred-fresh", at(9)))
        .unwrap());
    assert_eq!(restarted.phase(), CyclePhase::Idle);

    let outcome = restarted.run_once().await;
    assert!(outcome.is_success());
    assert_eq!(outcome.added, 5);
    assert_eq!(restarted.source_mut().seen_credentials, vec!["cred-fresh"]);
}
