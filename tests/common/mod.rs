//! Shared test utilities for integration tests.
//!
//! Import from integration test files as:
//! ```ignore
//! mod common;
//! ```

use examsync_core::{
    db::DbConnection,
    payload::{NewTest, Snapshot},
    properties::{NodeId, UserId},
};
use serde_json::Value;
use std::time::Duration;
use tempfile::TempDir;

/// Initialize tracing for tests, respecting RUST_LOG env var.
///
/// Safe to call multiple times; later calls are no-ops.
#[allow(dead_code)]
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init()
        .ok();
}

/// A migrated store in a fresh temp directory. Keep the [TempDir] alive for the test's duration.
#[allow(dead_code)]
pub async fn temp_store() -> (TempDir, DbConnection) {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let db = DbConnection::open(dir.path().join("examsync.db"), Duration::from_secs(5))
        .await
        .unwrap();
    (dir, db)
}

#[allow(dead_code)]
pub fn user(name: &str) -> UserId {
    UserId::new(name).unwrap()
}

/// Create an empty Test owned by `owner` and return its id.
#[allow(dead_code)]
pub async fn empty_test(db: &DbConnection, owner: &UserId) -> NodeId {
    db.create_test(owner, &NewTest::titled("Fixture test"))
        .await
        .unwrap()
        .test
        .id
}

#[allow(dead_code)]
pub fn snapshot(value: Value) -> Snapshot {
    Snapshot::from_value(value).unwrap()
}

/// Two sections; the first holds an mcq with two options and a text question.
#[allow(dead_code)]
pub fn starter_payload() -> Value {
    serde_json::json!({
        "sections": [
            {
                "id": "temp-1700000000001",
                "title": "Arithmetic",
                "duration": 15,
                "defaultPositiveMarks": 2,
                "questions": [
                    {
                        "id": "temp-q-1",
                        "type": "mcq",
                        "text": "What is 2 + 2?",
                        "options": [
                            { "id": "temp-opt-1-0", "text": "4", "isCorrect": true },
                            { "id": "temp-opt-1-1", "text": "5", "isCorrect": false }
                        ]
                    },
                    {
                        "id": "temp-q-2",
                        "type": "text",
                        "text": "Explain carrying.",
                        "correctAnswer": "Overflow moves to the next column",
                        "positiveMarks": 5
                    }
                ]
            },
            { "id": "temp-1700000000002", "title": "Geometry", "questions": [] }
        ]
    })
}
