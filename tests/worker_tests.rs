//! Protocol tests for the locking worker against the in-memory store.

use std::sync::Arc;
use std::time::Duration;

use locking_worker_core::error::LockError;
use locking_worker_core::events::{event_channel, LockEvent};
use locking_worker_core::memory::{Interference, MemoryCommand, MemoryLockStore};
use locking_worker_core::options::{LockOptions, StatusVerbosity};
use locking_worker_core::state::LockState;
use locking_worker_core::traits::LockStore;
use locking_worker_core::value::{LockValue, DONE_VALUE};
use locking_worker_core::worker::LockingWorker;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::Instant;

mod common;
use common::events::{drain, drain_signals, Seen};

const KEY: &str = "nightly-report";
const POLL: Duration = Duration::from_millis(5000);

fn contender(
    store: &Arc<MemoryLockStore>,
    max_attempts: u32,
    verbosity: StatusVerbosity,
) -> (LockingWorker<MemoryLockStore>, UnboundedReceiver<LockEvent>) {
    let options = LockOptions::builder(KEY)
        .verbosity(verbosity)
        .poll_interval(POLL)
        .max_attempts(max_attempts)
        .build()
        .unwrap();
    let (tx, rx) = event_channel();
    (LockingWorker::new(store.clone(), options, tx), rx)
}

fn status(message: &str) -> Seen {
    Seen::Status(message.to_string())
}

#[tokio::test(start_paused = true)]
async fn test_exactly_one_contender_acquires_fresh_key() {
    let store = Arc::new(MemoryLockStore::new());
    let mut contenders = Vec::new();
    for _ in 0..5 {
        let (worker, rx) = contender(&store, 5, StatusVerbosity::Normal);
        worker.acquire();
        contenders.push((worker, rx));
    }

    let mut acquired = 0;
    let mut locked = 0;
    for (_, rx) in contenders.iter_mut() {
        match rx.recv().await.map(Seen::from) {
            Some(Seen::Acquired(false)) => acquired += 1,
            Some(Seen::Locked) => locked += 1,
            other => panic!("unexpected first event: {other:?}"),
        }
    }

    assert_eq!(acquired, 1);
    assert_eq!(locked, 4);
    assert_eq!(store.value(KEY).as_deref(), Some("1"));
}

#[tokio::test(start_paused = true)]
async fn test_first_claim_owns_and_stops_polling() {
    let store = Arc::new(MemoryLockStore::new());
    let (owner, mut rx) = contender(&store, 5, StatusVerbosity::Verbose);

    let state = owner.acquire().await.unwrap();

    assert_eq!(state, LockState::Owned { attempt: 1 });
    assert_eq!(owner.state(), LockState::Owned { attempt: 1 });
    assert_eq!(drain(&mut rx), vec![Seen::Acquired(false)]);
}

#[tokio::test(start_paused = true)]
async fn test_stalled_owner_is_reclaimed_after_one_interval() {
    let store = Arc::new(MemoryLockStore::new());
    let (owner, _owner_rx) = contender(&store, 2, StatusVerbosity::Normal);
    let (poller, mut rx) = contender(&store, 2, StatusVerbosity::Normal);

    owner.acquire().await.unwrap();

    let start = Instant::now();
    let state = poller.acquire().await.unwrap();

    assert!(start.elapsed() >= POLL);
    assert_eq!(state, LockState::Owned { attempt: 2 });
    assert_eq!(store.value(KEY).as_deref(), Some("2"));
    assert_eq!(
        drain(&mut rx),
        vec![
            Seen::Locked,
            status("Work was not completed, trying to reacquire lock for attempt #1"),
            Seen::Acquired(true),
        ]
    );

    // Last attempt: the reclaimer deletes the key outright.
    poller.done(true).await.unwrap();
    assert_eq!(store.value(KEY), None);
    assert_eq!(poller.state(), LockState::Terminated);
}

#[tokio::test(start_paused = true)]
async fn test_reclaim_below_max_is_not_last_attempt() {
    let store = Arc::new(MemoryLockStore::new());
    store.insert(KEY, "1");
    let (poller, mut rx) = contender(&store, 5, StatusVerbosity::Normal);

    let state = poller.acquire().await.unwrap();

    assert_eq!(state, LockState::Owned { attempt: 2 });
    assert_eq!(
        drain_signals(&mut rx),
        vec![Seen::Locked, Seen::Acquired(false)]
    );
}

#[tokio::test(start_paused = true)]
async fn test_done_sentinel_is_cleaned_up_by_poller() {
    let store = Arc::new(MemoryLockStore::new());
    let (owner, _owner_rx) = contender(&store, 5, StatusVerbosity::Normal);
    let (poller, mut rx) = contender(&store, 5, StatusVerbosity::Normal);

    owner.acquire().await.unwrap();
    let poll_task = poller.acquire();
    owner.done(false).await.unwrap();
    assert_eq!(store.value(KEY).as_deref(), Some(DONE_VALUE));

    let state = poll_task.await.unwrap();

    assert_eq!(state, LockState::Terminated);
    assert_eq!(store.value(KEY), None);
    assert_eq!(
        drain(&mut rx),
        vec![
            Seen::Locked,
            status("Work completed successfully by the owner, deleting lock"),
        ]
    );
}

#[tokio::test]
async fn test_done_writes_sentinel_or_deletes() {
    let store = Arc::new(MemoryLockStore::new());
    let (owner, _rx) = contender(&store, 5, StatusVerbosity::Normal);

    owner.acquire().await.unwrap();
    owner.done(false).await.unwrap();
    let raw = store.value(KEY).unwrap();
    assert_eq!(LockValue::parse(&raw).unwrap(), LockValue::Done);
    assert!(LockValue::parse(&raw).unwrap().attempt().is_none());

    store.delete(KEY).await.unwrap();
    owner.acquire().await.unwrap();
    owner.done(true).await.unwrap();
    assert_eq!(store.value(KEY), None);
}

#[tokio::test(start_paused = true)]
async fn test_key_deleted_mid_check_reschedules_instead_of_failing() {
    let store = Arc::new(MemoryLockStore::new());
    store.insert(KEY, "1");
    store.interfere_before_get(Interference::Delete);
    let (poller, mut rx) = contender(&store, 5, StatusVerbosity::Normal);

    let state = poller.acquire().await.unwrap();

    assert_eq!(state, LockState::Terminated);
    let events = drain(&mut rx);
    assert!(!events.contains(&Seen::Error));
    assert_eq!(
        events,
        vec![
            Seen::Locked,
            status("Lock value changed while it was being checked, someone else got the lock"),
            status("Lock key is gone, someone else completed the work and deleted the lock"),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_always_losing_reclaimer_gives_up_at_max_attempts() {
    let store = Arc::new(MemoryLockStore::new());
    store.insert(KEY, "1");
    store.interfere_before_set(Interference::Set("2".to_string()));
    store.interfere_before_set(Interference::Set("3".to_string()));
    let (poller, mut rx) = contender(&store, 3, StatusVerbosity::Normal);

    let state = poller.acquire().await.unwrap();

    assert_eq!(state, LockState::Exhausted);
    assert_eq!(poller.state(), LockState::Exhausted);
    assert_eq!(
        drain_signals(&mut rx),
        vec![
            Seen::Locked,
            Seen::Locked,
            Seen::Locked,
            Seen::MaxAttemptsExceeded,
        ]
    );
    assert_eq!(store.value(KEY).as_deref(), Some("3"));
    let ttl = store.ttl(KEY).expect("exhausted key should carry a ttl");
    assert!(ttl >= POLL * 2);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_key_expires_for_everyone() {
    let store = Arc::new(MemoryLockStore::new());
    store.insert(KEY, "1");
    let (poller, mut rx) = contender(&store, 1, StatusVerbosity::Verbose);

    let state = poller.acquire().await.unwrap();
    assert_eq!(state, LockState::Exhausted);

    let events = drain(&mut rx);
    assert!(!events.iter().any(|seen| matches!(seen, Seen::Acquired(_))));
    assert!(events.contains(&status("Exceeded maximum attempts, giving up!")));
    assert_eq!(events.last(), Some(&Seen::MaxAttemptsExceeded));

    tokio::time::advance(POLL * 2 + Duration::from_millis(1)).await;
    assert_eq!(store.value(KEY), None);
}

#[tokio::test(start_paused = true)]
async fn test_progress_by_others_keeps_polling() {
    let store = Arc::new(MemoryLockStore::new());
    store.insert(KEY, "1");
    let (poller, mut rx) = contender(&store, 5, StatusVerbosity::Verbose);

    let poll_task = poller.acquire();
    assert!(matches!(rx.recv().await, Some(LockEvent::Locked)));
    assert_eq!(poller.state(), LockState::Polling { last_observed: Some(1) });

    // Another contender reclaims while we wait.
    store.insert(KEY, "2");
    loop {
        let event = rx.recv().await.expect("worker stopped early");
        if event.status_message()
            == Some("Attempt count has been incremented (expected 1, but it's 2), someone else got the lock")
        {
            break;
        }
        assert!(!matches!(event, LockEvent::Acquired { .. }));
    }
    assert_eq!(poller.state(), LockState::Polling { last_observed: Some(2) });

    store.insert(KEY, DONE_VALUE);
    assert_eq!(poll_task.await.unwrap(), LockState::Terminated);
    assert_eq!(store.value(KEY), None);
}

#[tokio::test(start_paused = true)]
async fn test_store_error_on_acquire_is_reported_once() {
    let store = Arc::new(MemoryLockStore::new());
    store.fail_next(MemoryCommand::CreateIfAbsent);
    let (worker, mut rx) = contender(&store, 5, StatusVerbosity::Verbose);

    let state = worker.acquire().await.unwrap();

    assert_eq!(state, LockState::Terminated);
    assert_eq!(drain(&mut rx), vec![Seen::Error]);
    assert_eq!(store.value(KEY), None);
}

#[tokio::test(start_paused = true)]
async fn test_store_error_while_polling_abandons() {
    let store = Arc::new(MemoryLockStore::new());
    store.insert(KEY, "1");
    store.fail_next(MemoryCommand::Watch);
    let (worker, mut rx) = contender(&store, 5, StatusVerbosity::Normal);

    let state = worker.acquire().await.unwrap();

    assert_eq!(state, LockState::Terminated);
    assert_eq!(drain(&mut rx), vec![Seen::Locked, Seen::Error]);
    assert_eq!(store.value(KEY).as_deref(), Some("1"));
}

#[tokio::test(start_paused = true)]
async fn test_corrupt_value_is_reported_as_error() {
    let store = Arc::new(MemoryLockStore::new());
    store.insert(KEY, "banana");
    let (worker, mut rx) = contender(&store, 5, StatusVerbosity::Normal);

    let state = worker.acquire().await.unwrap();

    assert_eq!(state, LockState::Terminated);
    assert_eq!(drain(&mut rx), vec![Seen::Locked, Seen::Error]);
}

#[tokio::test(start_paused = true)]
async fn test_second_acquire_while_contending_is_refused() {
    let store = Arc::new(MemoryLockStore::new());
    store.insert(KEY, "1");
    let (worker, mut rx) = contender(&store, 5, StatusVerbosity::Normal);

    let first = worker.acquire();
    let second = worker.acquire();

    assert_eq!(second.await.unwrap(), LockState::AwaitingFirstAcquire);
    assert_eq!(first.await.unwrap(), LockState::Owned { attempt: 2 });

    // Owning the lock also blocks a new control flow.
    let third = worker.acquire();
    assert_eq!(third.await.unwrap(), LockState::Owned { attempt: 2 });

    assert_eq!(
        drain_signals(&mut rx),
        vec![Seen::Locked, Seen::Acquired(false)]
    );
    assert_eq!(store.value(KEY).as_deref(), Some("2"));
}

#[tokio::test(start_paused = true)]
async fn test_acquire_restarts_after_control_flow_ended() {
    let store = Arc::new(MemoryLockStore::new());
    store.insert(KEY, DONE_VALUE);
    let (worker, mut rx) = contender(&store, 5, StatusVerbosity::Normal);

    assert_eq!(worker.acquire().await.unwrap(), LockState::Terminated);
    assert_eq!(worker.acquire().await.unwrap(), LockState::Owned { attempt: 1 });
    assert_eq!(
        drain_signals(&mut rx),
        vec![Seen::Locked, Seen::Acquired(false)]
    );
}

#[tokio::test(start_paused = true)]
async fn test_reclaim_overtaken_before_watched_read_keeps_polling() {
    let store = Arc::new(MemoryLockStore::new());
    store.insert(KEY, "1");
    // Another contender reclaims between our check and our watched read.
    store.interfere_before_watch_get(Interference::Set("2".to_string()));
    let (poller, mut rx) = contender(&store, 5, StatusVerbosity::Verbose);

    let start = Instant::now();
    let state = poller.acquire().await.unwrap();

    assert!(start.elapsed() >= POLL * 2);
    assert_eq!(state, LockState::Owned { attempt: 3 });
    assert_eq!(store.value(KEY).as_deref(), Some("3"));

    let events = drain(&mut rx);
    assert!(events.contains(&status("Current attempt count: 2")));
    assert!(!events.contains(&status("This is attempt #2")));
    let signals: Vec<Seen> = events
        .into_iter()
        .filter(|seen| !matches!(seen, Seen::Status(_)))
        .collect();
    assert_eq!(
        signals,
        vec![Seen::Locked, Seen::Locked, Seen::Acquired(false)]
    );
}

#[tokio::test(start_paused = true)]
async fn test_key_gone_before_watched_read_terminates() {
    let store = Arc::new(MemoryLockStore::new());
    store.insert(KEY, "1");
    store.interfere_before_watch_get(Interference::Delete);
    let (poller, mut rx) = contender(&store, 5, StatusVerbosity::Verbose);

    let state = poller.acquire().await.unwrap();

    assert_eq!(state, LockState::Terminated);
    assert_eq!(store.value(KEY), None);
    let events = drain(&mut rx);
    assert!(events.contains(&status("Lock is gone, someone else completed the work!")));
    assert!(!events.contains(&status("This is attempt #2")));
    assert!(!events.contains(&Seen::Error));
    assert!(!events.iter().any(|seen| matches!(seen, Seen::Acquired(_))));
}

#[tokio::test(start_paused = true)]
async fn test_done_seen_before_watched_read_is_cleaned_up() {
    let store = Arc::new(MemoryLockStore::new());
    store.insert(KEY, "1");
    store.interfere_before_watch_get(Interference::Set(DONE_VALUE.to_string()));
    let (poller, mut rx) = contender(&store, 5, StatusVerbosity::Normal);

    let state = poller.acquire().await.unwrap();

    assert_eq!(state, LockState::Terminated);
    assert_eq!(store.value(KEY), None);
    assert_eq!(
        drain(&mut rx),
        vec![
            Seen::Locked,
            status("Work was not completed, trying to reacquire lock for attempt #1"),
            status("Work completed successfully by the owner, deleting lock"),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_failed_expiry_after_giving_up_still_exhausts() {
    let store = Arc::new(MemoryLockStore::new());
    store.insert(KEY, "1");
    store.fail_next(MemoryCommand::Expire);
    let (poller, mut rx) = contender(&store, 1, StatusVerbosity::Normal);

    let state = poller.acquire().await.unwrap();

    assert_eq!(state, LockState::Exhausted);
    assert_eq!(poller.state(), LockState::Exhausted);
    assert_eq!(
        drain_signals(&mut rx),
        vec![Seen::Locked, Seen::MaxAttemptsExceeded, Seen::Error]
    );
    assert_eq!(store.value(KEY).as_deref(), Some("1"));
    assert_eq!(store.ttl(KEY), None);
}

#[tokio::test(start_paused = true)]
async fn test_corrupt_value_in_watched_read_survives_unwatch_failure() {
    let store = Arc::new(MemoryLockStore::new());
    store.insert(KEY, "1");
    store.interfere_before_watch_get(Interference::Set("banana".to_string()));
    store.fail_next(MemoryCommand::Unwatch);
    let (poller, mut rx) = contender(&store, 5, StatusVerbosity::Normal);

    let state = poller.acquire().await.unwrap();

    assert_eq!(state, LockState::Terminated);
    let mut errors = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let LockEvent::Error(err) = event {
            errors.push(err);
        }
    }
    assert_eq!(errors.len(), 1);
    assert!(matches!(errors[0], LockError::CorruptValue(_)));
    assert_eq!(store.value(KEY).as_deref(), Some("banana"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_mutual_exclusion_across_threads() {
    let store = Arc::new(MemoryLockStore::new());
    let mut receivers = Vec::new();
    let mut workers = Vec::new();
    for _ in 0..8 {
        let options = LockOptions::builder(KEY)
            .poll_interval(Duration::from_secs(60))
            .build()
            .unwrap();
        let (tx, rx) = event_channel();
        let worker = LockingWorker::new(store.clone(), options, tx);
        worker.acquire();
        workers.push(worker);
        receivers.push(rx);
    }

    let mut acquired = 0;
    for rx in receivers.iter_mut() {
        if let Some(LockEvent::Acquired { last_attempt }) = rx.recv().await {
            assert!(!last_attempt);
            acquired += 1;
        }
    }
    assert_eq!(acquired, 1);
}
