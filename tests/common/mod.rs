//! Shared helpers for tests that need a live server.
//!
//! Tests connect to `DATABASE_URL` and return early when it is unset.

#![allow(dead_code)]

use std::env;
use std::sync::Once;
use std::sync::atomic::{AtomicU32, Ordering};

use ng_postgres::sync::Conn;

static TABLE_COUNTER: AtomicU32 = AtomicU32::new(0);

static TRACING: Once = Once::new();

/// Log to the test output, filtered by `RUST_LOG`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub fn database_url() -> Option<String> {
    init_tracing();
    let mut db_url = env::var("DATABASE_URL").ok()?;
    if !db_url.contains("sslmode=") {
        if db_url.contains('?') {
            db_url.push_str("&sslmode=disable");
        } else {
            db_url.push_str("?sslmode=disable");
        }
    }
    Some(db_url)
}

pub fn get_conn() -> Option<Conn> {
    let db_url = database_url()?;
    Some(Conn::new(db_url.as_str()).expect("Failed to connect"))
}

/// A scratch table, dropped on cleanup.
pub struct TestTable {
    pub name: String,
}

impl TestTable {
    /// `(id SERIAL PRIMARY KEY, name TEXT, value INT)`
    pub fn new(conn: &mut Conn, prefix: &str) -> Self {
        Self::with_columns(conn, prefix, "id SERIAL PRIMARY KEY, name TEXT, value INT")
    }

    pub fn with_columns(conn: &mut Conn, prefix: &str, columns: &str) -> Self {
        let id = TABLE_COUNTER.fetch_add(1, Ordering::SeqCst);
        let name = format!("{}_{}_{}", prefix, std::process::id(), id);
        conn.query_drop(&format!("DROP TABLE IF EXISTS {}", name))
            .unwrap();
        conn.query_drop(&format!("CREATE TABLE {} ({})", name, columns))
            .unwrap();
        Self { name }
    }

    pub fn insert_sql(&self) -> String {
        format!("INSERT INTO {} (name, value) VALUES (?, ?)", self.name)
    }

    pub fn count(&self, conn: &mut Conn) -> i64 {
        let row: Option<(i64,)> = conn
            .query_first(&format!("SELECT COUNT(*) FROM {}", self.name))
            .unwrap();
        row.unwrap().0
    }

    pub fn cleanup(&self, conn: &mut Conn) {
        let _ = conn.query_drop(&format!("DROP TABLE IF EXISTS {}", self.name));
    }
}
