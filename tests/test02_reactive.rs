use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use sqlite_reactor::prelude::*;
use sqlite_reactor::{ErrorKind, ReactiveCallback};

const WAIT: Duration = Duration::from_secs(5);

fn open_with_todos(name: &str) -> (Connection, CallerLoop) {
    let (dispatcher, caller) = callback_channel();
    let conn = Connection::open(OpenOptionsBuilder::new(name).in_memory().finish(), dispatcher)
        .expect("open in-memory database");
    conn.execute_sync(
        "CREATE TABLE todos (id INTEGER PRIMARY KEY, title TEXT NOT NULL, done INTEGER DEFAULT 0)",
        &[],
    )
    .expect("create todos");
    (conn, caller)
}

fn settle<T: std::fmt::Debug>(
    caller: &CallerLoop,
    mut completion: Completion<T>,
) -> Result<T, ReactorError> {
    match caller.wait(&mut completion, WAIT) {
        CompletionState::Settled(result) => result,
        other => panic!("completion did not settle: {other:?}"),
    }
}

fn counting_callback() -> (ReactiveCallback, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let callback: ReactiveCallback = Arc::new(move |_: Result<ResultSet, ReactorError>| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    (callback, calls)
}

fn watch(
    conn: &Connection,
    query: &str,
    fire_on: Vec<TableRowDiscriminator>,
    callback: ReactiveCallback,
) -> Subscription {
    conn.reactive_execute(ReactiveQueryOptions {
        query: query.into(),
        arguments: Vec::new(),
        fire_on,
        callback,
    })
    .expect("subscribe")
}

#[test]
fn insert_into_watched_table_fires_once_on_flush() -> Result<(), ReactorError> {
    let (conn, caller) = open_with_todos("scenario_insert");
    let (callback, calls) = counting_callback();
    let sub = watch(
        &conn,
        "SELECT * FROM todos",
        vec![TableRowDiscriminator::table("todos")],
        callback,
    );

    settle(
        &caller,
        conn.execute("INSERT INTO todos (id, title) VALUES (5, 'write tests')", &[])?,
    )?;
    assert!(conn.is_reactive_query_pending(sub.id()));
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    settle(&caller, conn.flush_pending_reactive_queries()?)?;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(!conn.is_reactive_query_pending(sub.id()));

    // Nothing pending: a second flush runs no callbacks.
    settle(&caller, conn.flush_pending_reactive_queries()?)?;
    caller.run_pending();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    Ok(())
}

#[test]
fn row_id_discriminator_only_matches_listed_rows() -> Result<(), ReactorError> {
    let (conn, _caller) = open_with_todos("scenario_ids");
    conn.execute_sync(
        "INSERT INTO todos (id, title) VALUES (1, 'a'), (2, 'b'), (3, 'c')",
        &[],
    )?;
    let (callback, _calls) = counting_callback();
    let sub = watch(
        &conn,
        "SELECT * FROM todos WHERE id IN (1, 2)",
        vec![TableRowDiscriminator::table("todos").with_ids([1, 2])],
        callback,
    );

    conn.execute_sync("UPDATE todos SET done = 1 WHERE id = 3", &[])?;
    assert!(!conn.is_reactive_query_pending(sub.id()));

    conn.execute_sync("UPDATE todos SET done = 1 WHERE id = 2", &[])?;
    assert!(conn.is_reactive_query_pending(sub.id()));
    Ok(())
}

#[test]
fn repeated_writes_collapse_into_one_rerun() -> Result<(), ReactorError> {
    let (conn, caller) = open_with_todos("scenario_dedup");
    let results = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&results);
    let sub = watch(
        &conn,
        "SELECT id, title FROM todos ORDER BY id",
        vec![TableRowDiscriminator::table("todos")],
        Arc::new(move |result: Result<ResultSet, ReactorError>| {
            sink.lock().unwrap().push(result.map(|rows| rows.len()));
        }),
    );

    let first = conn.execute("INSERT INTO todos (title) VALUES ('first')", &[])?;
    let second = conn.execute("INSERT INTO todos (title) VALUES ('second')", &[])?;
    settle(&caller, first)?;
    settle(&caller, second)?;
    assert_eq!(conn.pending_reactive_query_count(), 1);
    assert!(conn.is_reactive_query_pending(sub.id()));

    settle(&caller, conn.flush_pending_reactive_queries()?)?;
    let seen = results.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].as_ref().ok(), Some(&2));
    Ok(())
}

#[test]
fn unsubscribed_query_never_becomes_pending() -> Result<(), ReactorError> {
    let (conn, caller) = open_with_todos("scenario_unsubscribe");
    let (callback, calls) = counting_callback();
    let sub = watch(
        &conn,
        "SELECT * FROM todos",
        vec![TableRowDiscriminator::table("todos")],
        callback,
    );
    assert_eq!(conn.reactive_query_count(), 1);

    assert!(sub.unsubscribe());
    assert!(!sub.unsubscribe());
    assert_eq!(conn.reactive_query_count(), 0);

    conn.execute_sync("INSERT INTO todos (title) VALUES ('ignored')", &[])?;
    assert!(!conn.is_reactive_query_pending(sub.id()));
    assert_eq!(conn.pending_reactive_query_count(), 0);

    settle(&caller, conn.flush_pending_reactive_queries()?)?;
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    Ok(())
}

#[test]
fn unsubscribe_drops_a_pending_entry() -> Result<(), ReactorError> {
    let (conn, caller) = open_with_todos("unsubscribe_pending");
    let (callback, calls) = counting_callback();
    let sub = watch(
        &conn,
        "SELECT * FROM todos",
        vec![TableRowDiscriminator::table("todos")],
        callback,
    );
    conn.execute_sync("INSERT INTO todos (title) VALUES ('x')", &[])?;
    assert!(conn.is_reactive_query_pending(sub.id()));

    sub.unsubscribe();
    assert_eq!(conn.pending_reactive_query_count(), 0);
    settle(&caller, conn.flush_pending_reactive_queries()?)?;
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    Ok(())
}

#[test]
fn writes_queued_after_a_flush_wait_for_the_next_one() -> Result<(), ReactorError> {
    let (conn, caller) = open_with_todos("after_drain");
    let (callback, calls) = counting_callback();
    let sub = watch(
        &conn,
        "SELECT * FROM todos",
        vec![TableRowDiscriminator::table("todos")],
        callback,
    );
    conn.execute_sync("INSERT INTO todos (title) VALUES ('before')", &[])?;

    let flush = conn.flush_pending_reactive_queries()?;
    let write = conn.execute("INSERT INTO todos (title) VALUES ('after')", &[])?;
    settle(&caller, flush)?;
    settle(&caller, write)?;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(conn.is_reactive_query_pending(sub.id()));

    settle(&caller, conn.flush_pending_reactive_queries()?)?;
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    Ok(())
}

#[test]
fn failing_rerun_is_delivered_to_the_callback() -> Result<(), ReactorError> {
    let (conn, caller) = open_with_todos("rerun_error");
    let outcome = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&outcome);
    watch(
        &conn,
        "SELECT * FROM todos",
        vec![TableRowDiscriminator::table("todos")],
        Arc::new(move |result: Result<ResultSet, ReactorError>| {
            *sink.lock().unwrap() = Some(result.map(|_| ()).map_err(|e| e.kind()));
        }),
    );
    conn.execute_sync("INSERT INTO todos (title) VALUES ('x')", &[])?;
    conn.execute_sync("ALTER TABLE todos RENAME TO archived_todos", &[])?;

    settle(&caller, conn.flush_pending_reactive_queries()?)?;
    assert_eq!(*outcome.lock().unwrap(), Some(Err(ErrorKind::Execution)));
    Ok(())
}

#[test]
fn reactive_query_is_checked_when_subscribing() {
    let (conn, _caller) = open_with_todos("subscribe_checks");
    let (callback, _) = counting_callback();

    let err = conn
        .reactive_execute(ReactiveQueryOptions {
            query: "SELECT * FROM todos WHERE id = ?1".into(),
            arguments: Vec::new(),
            fire_on: vec![TableRowDiscriminator::table("todos")],
            callback: Arc::clone(&callback),
        })
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let err = conn
        .reactive_execute(ReactiveQueryOptions {
            query: "SELECT * FROM nowhere".into(),
            arguments: Vec::new(),
            fire_on: vec![TableRowDiscriminator::table("nowhere")],
            callback,
        })
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Execution);
    assert_eq!(conn.reactive_query_count(), 0);
    assert!(!conn.is_update_hook_registered());
}

#[test]
fn reactive_query_must_be_a_single_statement() {
    let (conn, _caller) = open_with_todos("subscribe_script");
    let (callback, _) = counting_callback();

    let err = conn
        .reactive_execute(ReactiveQueryOptions {
            query: "SELECT * FROM todos; DELETE FROM todos".into(),
            arguments: Vec::new(),
            fire_on: vec![TableRowDiscriminator::table("todos")],
            callback,
        })
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(conn.reactive_query_count(), 0);
}

#[test]
fn arguments_are_bound_on_every_rerun() -> Result<(), ReactorError> {
    let (conn, caller) = open_with_todos("arguments");
    let titles = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&titles);
    conn.reactive_execute(ReactiveQueryOptions {
        query: "SELECT title FROM todos WHERE done = ?1 ORDER BY id".into(),
        arguments: vec![RowValues::Int(1)],
        fire_on: vec![TableRowDiscriminator::table("todos")],
        callback: Arc::new(move |result: Result<ResultSet, ReactorError>| {
            let rows = result.expect("rerun succeeds");
            let mut sink = sink.lock().unwrap();
            sink.clear();
            sink.extend(
                rows.results
                    .iter()
                    .filter_map(|row| row.get("title").and_then(RowValues::as_text).map(str::to_owned)),
            );
        }),
    })?;

    conn.execute_sync(
        "INSERT INTO todos (title, done) VALUES ('open', 0), ('closed', 1)",
        &[],
    )?;
    settle(&caller, conn.flush_pending_reactive_queries()?)?;
    assert_eq!(*titles.lock().unwrap(), vec!["closed".to_owned()]);
    Ok(())
}
