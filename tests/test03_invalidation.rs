use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use sqlite_reactor::prelude::*;
use sqlite_reactor::{ErrorKind, UpdateEvent};

const WAIT: Duration = Duration::from_secs(5);

const SLOW_QUERY: &str = "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c WHERE x < 300000) \
                          SELECT count(*) AS n FROM c";

const SLOWER_QUERY: &str = "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c WHERE x < 2000000) \
                            SELECT count(*) AS n FROM c";

fn open_memory(name: &str) -> (Connection, CallerLoop) {
    let (dispatcher, caller) = callback_channel();
    let conn = Connection::open(OpenOptionsBuilder::new(name).in_memory().finish(), dispatcher)
        .expect("open in-memory database");
    conn.execute_sync("CREATE TABLE items (id INTEGER PRIMARY KEY, v TEXT)", &[])
        .expect("create items");
    (conn, caller)
}

fn assert_abandoned<T: std::fmt::Debug>(caller: &CallerLoop, completion: &mut Completion<T>) {
    let state = caller.wait(completion, WAIT);
    assert!(state.is_abandoned(), "expected abandonment, got {state:?}");
}

#[test]
fn close_before_completion_delivers_nothing() -> Result<(), ReactorError> {
    let (conn, caller) = open_memory("close_pending");
    let updates = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&updates);
    conn.update_hook(Some(Arc::new(move |_: UpdateEvent| {
        seen.fetch_add(1, Ordering::SeqCst);
    })))?;

    let mut pending = vec![
        conn.execute("INSERT INTO items (v) VALUES ('a')", &[])?,
        conn.execute("INSERT INTO items (v) VALUES ('b')", &[])?,
        conn.execute("SELECT * FROM missing_table", &[])?,
    ];
    conn.close();

    for completion in &mut pending {
        assert_abandoned(&caller, completion);
    }
    assert_eq!(caller.run_for(Duration::from_millis(50)), 0);
    assert_eq!(updates.load(Ordering::SeqCst), 0);
    Ok(())
}

#[test]
fn result_finished_during_close_is_suppressed() -> Result<(), ReactorError> {
    let (conn, caller) = open_memory("close_running");
    let mut running = conn.execute(SLOW_QUERY, &[])?;
    let mut queued = conn.execute("SELECT 1", &[])?;
    // Blocks until the running query lets go of the database.
    conn.close();

    assert_abandoned(&caller, &mut running);
    assert_abandoned(&caller, &mut queued);
    Ok(())
}

#[test]
fn invalidate_is_idempotent() {
    let (conn, _caller) = open_memory("idempotent");
    assert!(!conn.is_invalidated());
    assert!(format!("{conn:?}").contains("running: true"));
    assert!(conn.invalidate());
    // The retired worker is not replaced.
    assert!(format!("{conn:?}").contains("running: false"));
    assert!(!conn.invalidate());
    conn.close();
    conn.close();
    assert!(conn.is_invalidated());
}

#[test]
fn operations_after_close_are_state_errors() {
    let (conn, _caller) = open_memory("after_close");
    let statement = conn.prepare_statement("SELECT * FROM items").unwrap();
    conn.close();

    let kinds = [
        conn.execute("SELECT 1", &[]).map(|_| ()).unwrap_err().kind(),
        conn.execute_sync("SELECT 1", &[]).map(|_| ()).unwrap_err().kind(),
        conn.execute_raw("SELECT 1", &[]).map(|_| ()).unwrap_err().kind(),
        conn.execute_batch(vec![BatchCommand::new("SELECT 1")])
            .map(|_| ())
            .unwrap_err()
            .kind(),
        conn.prepare_statement("SELECT 1").map(|_| ()).unwrap_err().kind(),
        conn.flush_pending_reactive_queries()
            .map(|_| ())
            .unwrap_err()
            .kind(),
        conn.update_hook(None).unwrap_err().kind(),
        conn.detach("other").unwrap_err().kind(),
        statement.execute().map(|_| ()).unwrap_err().kind(),
        statement.bind_sync(&[]).unwrap_err().kind(),
    ];
    assert!(kinds.iter().all(|kind| *kind == ErrorKind::State), "{kinds:?}");
}

#[test]
fn close_clears_reactive_state() -> Result<(), ReactorError> {
    let (conn, caller) = open_memory("close_reactive");
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let sub = conn.reactive_execute(ReactiveQueryOptions {
        query: "SELECT * FROM items".into(),
        arguments: Vec::new(),
        fire_on: vec![TableRowDiscriminator::table("items")],
        callback: Arc::new(move |_: Result<ResultSet, ReactorError>| {
            counter.fetch_add(1, Ordering::SeqCst);
        }),
    })?;
    conn.execute_sync("INSERT INTO items (v) VALUES ('x')", &[])?;
    let mut flush = conn.flush_pending_reactive_queries()?;
    conn.close();

    assert_abandoned(&caller, &mut flush);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(conn.reactive_query_count(), 0);
    assert_eq!(conn.pending_reactive_query_count(), 0);
    assert!(!conn.is_update_hook_registered());
    assert!(!sub.unsubscribe());
    Ok(())
}

#[test]
fn close_during_flush_stops_the_remaining_reruns() -> Result<(), ReactorError> {
    let (conn, caller) = open_memory("close_mid_flush");
    let calls = Arc::new(AtomicUsize::new(0));
    let mut subs = Vec::new();
    for _ in 0..3 {
        let counter = Arc::clone(&calls);
        subs.push(conn.reactive_execute(ReactiveQueryOptions {
            query: SLOWER_QUERY.into(),
            arguments: Vec::new(),
            fire_on: vec![TableRowDiscriminator::table("items")],
            callback: Arc::new(move |_: Result<ResultSet, ReactorError>| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        })?);
    }
    conn.execute_sync("INSERT INTO items (v) VALUES ('x')", &[])?;
    assert_eq!(conn.pending_reactive_query_count(), 3);

    let mut flush = conn.flush_pending_reactive_queries()?;
    // The flush takes the pending set as soon as its task starts.
    let deadline = Instant::now() + WAIT;
    while conn.pending_reactive_query_count() > 0 {
        assert!(Instant::now() < deadline, "flush never started");
        std::thread::yield_now();
    }
    // Waits for the rerun in progress to let go of the database.
    conn.close();

    assert_abandoned(&caller, &mut flush);
    assert_eq!(caller.run_for(Duration::from_millis(50)), 0);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(subs.iter().all(|sub| !sub.unsubscribe()));
    Ok(())
}

#[test]
fn dropping_the_connection_abandons_its_work() -> Result<(), ReactorError> {
    let (conn, caller) = open_memory("drop");
    let mut pending = conn.execute(SLOW_QUERY, &[])?;
    let statement = conn.prepare_statement("SELECT 1")?;
    drop(conn);

    assert_abandoned(&caller, &mut pending);
    let err = statement.execute().map(|_| ()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::State);
    Ok(())
}

#[test]
fn connections_are_independent() -> Result<(), ReactorError> {
    let (first, caller) = open_memory("first");
    let (second, second_caller) = open_memory("second");
    let mut abandoned = first.execute(SLOW_QUERY, &[])?;
    let mut live = second.execute("SELECT count(*) AS n FROM items", &[])?;
    first.close();

    assert_abandoned(&caller, &mut abandoned);
    match second_caller.wait(&mut live, WAIT) {
        CompletionState::Settled(Ok(rows)) => {
            assert_eq!(rows.results[0].get("n").and_then(RowValues::as_int), Some(&0));
        }
        other => panic!("second connection should be unaffected: {other:?}"),
    }
    Ok(())
}
