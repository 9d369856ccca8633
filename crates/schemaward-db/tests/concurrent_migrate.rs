use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use rusqlite::Connection;
use schemaward_db::{Database, DatabaseOptions, MigrateError, migrate};

const STATEMENTS: &[&str] = &[
    "CREATE TABLE applied(step INTEGER NOT NULL)",
    "INSERT INTO applied VALUES (1)",
    "INSERT INTO applied VALUES (2)",
    "CREATE TABLE users(id INTEGER PRIMARY KEY, name TEXT NOT NULL)",
    "INSERT INTO applied VALUES (4)",
];

fn applied_steps(conn: &Connection) -> Vec<i64> {
    let mut stmt = conn
        .prepare("SELECT step FROM applied ORDER BY step")
        .unwrap();
    let rows = stmt.query_map([], |row| row.get(0)).unwrap();
    rows.map(|r| r.unwrap()).collect()
}

#[test]
fn concurrent_migrators_apply_each_statement_once() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("shared.db");
    let barrier = Arc::new(Barrier::new(4));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let path = path.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let db = Database::open(path);
                barrier.wait();
                migrate(&db, 77, STATEMENTS)
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap().unwrap();
    }

    let db = Database::open(&path);
    let state = db.state().unwrap();
    assert_eq!(state.owner_id, 77);
    assert_eq!(state.version, STATEMENTS.len() as i64);

    let conn = Connection::open(&path).unwrap();
    assert_eq!(applied_steps(&conn), vec![1, 2, 4]);
}

#[test]
fn reader_never_sees_a_partial_run() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("atomic.db");
    let db = Database::open(&path);
    migrate(&db, 5, &STATEMENTS[..1]).unwrap();

    let err = migrate(
        &db,
        5,
        &[STATEMENTS[0], STATEMENTS[1], "INSERT INTO applied VALUES (NULL)"],
    )
    .unwrap_err();
    assert_eq!(err.statement_index(), Some(2));

    let conn = Connection::open(&path).unwrap();
    assert!(applied_steps(&conn).is_empty());
    assert_eq!(db.state().unwrap().version, 1);
}

#[test]
fn second_application_cannot_take_over_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("owned.db");
    let db = Database::open(&path);
    migrate(&db, 1, STATEMENTS).unwrap();

    let err = migrate(&db, 2, &["CREATE TABLE intruder(x)"]).unwrap_err();
    assert!(matches!(
        err,
        MigrateError::WrongOwner {
            expected: 2,
            found: 1
        }
    ));

    let state = db.state().unwrap();
    assert_eq!(state.owner_id, 1);
    assert_eq!(state.version, STATEMENTS.len() as i64);
}

fn with_busy_timeout(path: &std::path::Path, busy_timeout: Duration) -> Database {
    Database::with_options(
        path,
        DatabaseOptions {
            busy_timeout,
            ..Default::default()
        },
    )
}

#[test]
fn interrupt_stops_migrator_waiting_for_lock() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("locked.db");
    let holder = Connection::open(&path).unwrap();
    holder.execute_batch("BEGIN EXCLUSIVE").unwrap();

    let db = with_busy_timeout(&path, Duration::from_secs(30));
    let started = Instant::now();
    let result = thread::scope(|s| {
        let worker = s.spawn(|| migrate(&db, 8, STATEMENTS));
        thread::sleep(Duration::from_millis(200));
        db.interrupt();
        worker.join().unwrap()
    });

    assert!(matches!(result, Err(MigrateError::Interrupted)));
    assert!(started.elapsed() < Duration::from_secs(5));

    holder.execute_batch("ROLLBACK").unwrap();
    migrate(&db, 8, STATEMENTS).unwrap();
    assert_eq!(db.state().unwrap().version, STATEMENTS.len() as i64);
}

#[test]
fn lock_wait_gives_up_after_busy_timeout() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("held.db");
    let holder = Connection::open(&path).unwrap();
    holder.execute_batch("BEGIN EXCLUSIVE").unwrap();

    let db = with_busy_timeout(&path, Duration::from_millis(300));
    let started = Instant::now();
    let err = migrate(&db, 8, STATEMENTS).unwrap_err();

    assert!(matches!(err, MigrateError::Begin(_)));
    assert!(started.elapsed() >= Duration::from_millis(300));
    holder.execute_batch("ROLLBACK").unwrap();
}

#[test]
fn interrupt_during_statement_rolls_back_run() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("slow.db");
    let db = Database::open(&path);
    let slow = "CREATE TABLE counted AS \
                WITH RECURSIVE c(n) AS (SELECT 1 UNION ALL SELECT n + 1 FROM c LIMIT 200000000) \
                SELECT count(*) AS total FROM c";

    let result = thread::scope(|s| {
        let worker = s.spawn(|| migrate(&db, 21, &["CREATE TABLE t(x)", slow]));
        thread::sleep(Duration::from_millis(100));
        // Repeat so an interrupt landing between statements is not missed.
        while !worker.is_finished() {
            db.interrupt();
            thread::sleep(Duration::from_millis(20));
        }
        worker.join().unwrap()
    });

    assert!(result.is_err());
    let state = db.state().unwrap();
    assert_eq!(state.version, 0);
    assert_eq!(state.owner_id, 0);

    // `db` may still carry the last interrupt; a fresh handle starts clean.
    let fresh = Database::open(&path);
    migrate(&fresh, 21, &["CREATE TABLE t(x)"]).unwrap();
    let state = fresh.state().unwrap();
    assert_eq!(state.version, 1);
    assert_eq!(state.owner_id, 21);
}
