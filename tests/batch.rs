//! Tests for exec_batch

mod common;

use common::{TestTable, get_conn};
use ng_postgres::{Batch, BatchOutcome, Error};

#[test]
fn test_batch_inserts_all_rows() {
    let Some(mut conn) = get_conn() else { return };
    let table = TestTable::new(&mut conn, "batch_all");

    let batch = Batch::new()
        .add(table.insert_sql(), ("alice", 10_i32))
        .add(table.insert_sql(), ("bob", 20_i32))
        .add(table.insert_sql(), ("charlie", 30_i32));
    let outcomes = conn.exec_batch(&batch).unwrap();
    assert_eq!(outcomes, vec![BatchOutcome::RowCount(1); 3]);
    assert_eq!(table.count(&mut conn), 3);

    let rows: Vec<(String, i32)> = conn
        .exec_collect(
            format!("SELECT name, value FROM {} ORDER BY value", table.name).as_str(),
            (),
        )
        .unwrap();
    assert_eq!(rows[0], ("alice".to_string(), 10));
    assert_eq!(rows[2], ("charlie".to_string(), 30));

    table.cleanup(&mut conn);
}

#[test]
fn test_strict_batch_stops_at_select() {
    let Some(mut conn) = get_conn() else { return };
    let table = TestTable::new(&mut conn, "batch_strict");

    let batch = Batch::new()
        .strict(true)
        .add(table.insert_sql(), ("a", 1_i32))
        .add("SELECT 1", ())
        .add(table.insert_sql(), ("b", 2_i32));
    let batch_err = match conn.exec_batch(&batch) {
        Err(Error::Batch(e)) => e,
        other => panic!("expected a batch error, got {:?}", other),
    };
    assert_eq!(batch_err.failed_index, 1);
    assert_eq!(batch_err.outcomes, vec![BatchOutcome::RowCount(1)]);
    assert_eq!(table.count(&mut conn), 1);

    table.cleanup(&mut conn);
}

#[test]
fn test_non_strict_batch_continues_past_failure() {
    let Some(mut conn) = get_conn() else { return };
    let table = TestTable::new(&mut conn, "batch_lenient");

    let batch = Batch::new()
        .strict(false)
        .add(table.insert_sql(), ("a", 1_i32))
        .add("SELECT 1", ())
        .add(table.insert_sql(), ("b", 2_i32));
    let batch_err = match conn.exec_batch(&batch) {
        Err(Error::Batch(e)) => e,
        other => panic!("expected a batch error, got {:?}", other),
    };
    assert_eq!(batch_err.failed_index, 1);
    assert_eq!(
        batch_err.outcomes,
        vec![
            BatchOutcome::RowCount(1),
            BatchOutcome::Failed,
            BatchOutcome::RowCount(1),
        ]
    );
    assert_eq!(table.count(&mut conn), 2);

    table.cleanup(&mut conn);
}

#[test]
fn test_non_strict_batch_server_error_in_middle() {
    let Some(mut conn) = get_conn() else { return };
    let table = TestTable::with_columns(
        &mut conn,
        "batch_unique",
        "id INT PRIMARY KEY, name TEXT, value INT",
    );
    let insert = format!("INSERT INTO {} (id, name, value) VALUES (?, ?, ?)", table.name);

    let batch = Batch::new()
        .strict(false)
        .add(insert.clone(), (1_i32, "a", 1_i32))
        .add(insert.clone(), (1_i32, "dup", 2_i32))
        .add(insert, (2_i32, "b", 3_i32));
    let Err(Error::Batch(batch_err)) = conn.exec_batch(&batch) else {
        panic!("expected a batch error");
    };
    assert_eq!(batch_err.failed_index, 1);
    assert_eq!(batch_err.source.sqlstate(), Some("23505"));
    assert_eq!(batch_err.outcomes[2], BatchOutcome::RowCount(1));
    assert_eq!(table.count(&mut conn), 2);

    table.cleanup(&mut conn);
}

#[test]
fn test_batch_with_prepared_statement_and_ddl() {
    let Some(mut conn) = get_conn() else { return };
    let table = TestTable::new(&mut conn, "batch_prepared");
    let stmt = conn.prepare(&table.insert_sql()).unwrap();

    let batch = Batch::new()
        .add_prepared(&stmt, ("x", 1_i32))
        .add_prepared(&stmt, ("y", 2_i32))
        .add(format!("CREATE INDEX ON {} (value)", table.name), ());
    let outcomes = conn.exec_batch(&batch).unwrap();
    assert_eq!(outcomes[0], BatchOutcome::RowCount(1));
    assert_eq!(outcomes[2], BatchOutcome::SuccessNoInfo);

    table.cleanup(&mut conn);
}

fn ddl_table_name(prefix: &str) -> String {
    format!("{}_{}", prefix, std::process::id())
}

#[test]
fn test_batch_items_see_earlier_ddl() {
    let Some(mut conn) = get_conn() else { return };

    for strict in [true, false] {
        let name = ddl_table_name(if strict { "batch_ddl_strict" } else { "batch_ddl_lenient" });
        conn.query_drop(&format!("DROP TABLE IF EXISTS {}", name)).unwrap();

        let batch = Batch::new()
            .strict(strict)
            .add(format!("CREATE TABLE {} (x INT)", name), ())
            .add(format!("INSERT INTO {} VALUES (?)", name), (1_i32,))
            .add(format!("INSERT INTO {} VALUES (?)", name), (2_i32,));
        let outcomes = conn.exec_batch(&batch).unwrap();
        assert_eq!(
            outcomes,
            vec![
                BatchOutcome::SuccessNoInfo,
                BatchOutcome::RowCount(1),
                BatchOutcome::RowCount(1),
            ]
        );

        let count: Option<(i64,)> = conn
            .exec_first(format!("SELECT COUNT(*) FROM {}", name).as_str(), ())
            .unwrap();
        assert_eq!(count, Some((2,)));
        conn.query_drop(&format!("DROP TABLE {}", name)).unwrap();
    }
}

#[test]
fn test_strict_batch_without_autocommit_blames_failing_item() {
    let Some(mut conn) = get_conn() else { return };
    let table = TestTable::new(&mut conn, "batch_tx_strict");
    conn.set_auto_commit(false).unwrap();

    let batch = Batch::new()
        .strict(true)
        .add(table.insert_sql(), ("a", 1_i32))
        .add("INSERT INTO batch_missing_table VALUES (?)", (1_i32,))
        .add(table.insert_sql(), ("b", 2_i32));
    let batch_err = match conn.exec_batch(&batch) {
        Err(Error::Batch(e)) => e,
        other => panic!("expected a batch error, got {:?}", other),
    };
    assert_eq!(batch_err.failed_index, 1);
    assert_eq!(batch_err.outcomes, vec![BatchOutcome::RowCount(1)]);
    assert_eq!(batch_err.source.sqlstate(), Some("42P01"));

    conn.rollback().unwrap();
    conn.set_auto_commit(true).unwrap();
    assert_eq!(table.count(&mut conn), 0);
    table.cleanup(&mut conn);
}

#[test]
fn test_non_strict_batch_without_autocommit_reports_each_item() {
    let Some(mut conn) = get_conn() else { return };
    let table = TestTable::new(&mut conn, "batch_tx_lenient");
    conn.set_auto_commit(false).unwrap();

    let batch = Batch::new()
        .strict(false)
        .add(table.insert_sql(), ("a", 1_i32))
        .add("INSERT INTO batch_missing_table VALUES (?)", (1_i32,))
        .add(table.insert_sql(), ("b", 2_i32));
    let batch_err = match conn.exec_batch(&batch) {
        Err(Error::Batch(e)) => e,
        other => panic!("expected a batch error, got {:?}", other),
    };
    assert_eq!(batch_err.failed_index, 1);
    assert_eq!(batch_err.source.sqlstate(), Some("42P01"));
    assert_eq!(
        batch_err.outcomes,
        vec![
            BatchOutcome::RowCount(1),
            BatchOutcome::Failed,
            BatchOutcome::Failed,
        ]
    );
    assert!(conn.in_transaction());

    conn.rollback().unwrap();
    conn.set_auto_commit(true).unwrap();
    assert_eq!(table.count(&mut conn), 0);
    table.cleanup(&mut conn);
}
