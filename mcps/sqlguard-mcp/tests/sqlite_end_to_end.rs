//! End-to-end checks of the guarded operations against a SQLite file

use std::sync::Arc;

use serde_json::json;
use sqlguard_mcp::config::Limits;
use sqlguard_mcp::db::{SqlBackend, SqliteBackend};
use sqlguard_mcp::{
    GateError, MutationExecutor, QueryExecutor, Rejection, RetryPolicy, SchemaInspector,
    StatementCategory,
};
use tempfile::TempDir;

struct Fixture {
    _dir: TempDir,
    backend: Arc<dyn SqlBackend>,
    limits: Limits,
}

impl Fixture {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.db");
        let conn = rusqlite::Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE users (
                 id INTEGER PRIMARY KEY,
                 name TEXT NOT NULL,
                 email TEXT UNIQUE,
                 active INTEGER DEFAULT 1
             );
             CREATE TABLE orders (id INTEGER PRIMARY KEY, user_id INTEGER, total REAL);
             INSERT INTO users (id, name, email) VALUES (1, 'Alice', 'alice@example.com');
             INSERT INTO users (id, name, email) VALUES (2, 'Bob', 'bob@example.com');",
        )
        .unwrap();
        drop(conn);

        let limits = Limits::default();
        let backend = SqliteBackend::open(path.to_str().unwrap(), &limits).unwrap();
        Self {
            _dir: dir,
            backend: Arc::new(backend),
            limits,
        }
    }

    fn query(&self) -> QueryExecutor {
        QueryExecutor::new(self.backend.clone(), &self.limits)
    }

    fn mutation(&self) -> MutationExecutor {
        MutationExecutor::new(self.backend.clone(), &self.limits, RetryPolicy::default())
    }

    fn inspector(&self) -> SchemaInspector {
        SchemaInspector::new(self.backend.clone(), &self.limits)
    }
}

#[tokio::test]
async fn test_select_returns_named_columns() {
    let fixture = Fixture::new();
    let outcome = fixture
        .query()
        .execute_query("select name from users where id=1", None)
        .await
        .unwrap();

    assert_eq!(json!(outcome.rows), json!([{ "name": "Alice" }]));
    assert_eq!(outcome.row_count, 1);
    assert!(!outcome.truncated);
}

#[tokio::test]
async fn test_mutation_then_query_sees_change() {
    let fixture = Fixture::new();
    let affected = fixture
        .mutation()
        .execute_mutation("UPDATE users SET active = 0 WHERE id IN (1, 2)", None)
        .await
        .unwrap();
    assert_eq!(affected, 2);

    let outcome = fixture
        .query()
        .execute_query("SELECT count(*) AS n FROM users WHERE active = 0", Some("main"))
        .await
        .unwrap();
    assert_eq!(outcome.rows[0]["n"], 2);
}

#[tokio::test]
async fn test_constraint_violation_is_reported_once() {
    let fixture = Fixture::new();
    let err = fixture
        .mutation()
        .execute_mutation(
            "INSERT INTO users (id, name, email) VALUES (3, 'Eve', 'alice@example.com')",
            None,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, GateError::MutationFailed { attempts: 1, .. }));
    assert!(!err.is_transient());
}

#[tokio::test]
async fn test_rejected_statements_leave_data_untouched() {
    let fixture = Fixture::new();

    let err = fixture
        .query()
        .execute_query("SELECT * FROM users; DROP TABLE users", None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        GateError::InvalidStatement(Rejection::ForbiddenKeyword { .. })
    ));

    let err = fixture
        .mutation()
        .execute_mutation("DELETE FROM users WHERE id=1 -- comment", None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        GateError::InvalidStatement(Rejection::Comment { .. })
    ));

    let err = fixture
        .query()
        .execute_query("INSERT INTO users (id, name) VALUES (9, 'x')", None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        GateError::InvalidStatement(Rejection::WrongOpener(StatementCategory::ReadOnly))
    ));

    let outcome = fixture
        .query()
        .execute_query("SELECT id FROM users", None)
        .await
        .unwrap();
    assert_eq!(outcome.row_count, 2);
}

#[tokio::test]
async fn test_row_cap_applies() {
    let fixture = Fixture::new();
    let limits = Limits {
        max_rows: 1,
        ..Limits::default()
    };
    let outcome = QueryExecutor::new(fixture.backend.clone(), &limits)
        .execute_query("SELECT id FROM users ORDER BY id", None)
        .await
        .unwrap();

    assert_eq!(outcome.row_count, 1);
    assert!(outcome.truncated);
    assert_eq!(outcome.rows[0]["id"], 1);
}

#[tokio::test]
async fn test_introspection() {
    let fixture = Fixture::new();
    let inspector = fixture.inspector();

    assert_eq!(inspector.list_tables(None).await.unwrap(), ["orders", "users"]);
    assert_eq!(
        inspector.list_tables(Some("main")).await.unwrap(),
        ["orders", "users"]
    );

    let columns = inspector.describe_table("users", None).await.unwrap();
    let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, ["id", "name", "email", "active"]);
    assert!(!columns[1].nullable);
    assert!(columns[2].nullable);
    assert_eq!(columns[3].default.as_deref(), Some("1"));
    assert_eq!(columns[1].data_type, "TEXT");

    assert!(inspector
        .describe_table("no_such_table", None)
        .await
        .unwrap()
        .is_empty());

    assert!(inspector
        .list_schemas()
        .await
        .unwrap()
        .contains(&"main".to_string()));
}
