//! The tokio front end against a live server.

mod common;

use common::database_url;
use ng_postgres::tokio::Conn;
use ng_postgres::{Batch, BatchOutcome, Error, TransactionStatus};

async fn get_async_conn() -> Option<Conn> {
    let db_url = database_url()?;
    Some(Conn::new(db_url.as_str()).await.expect("Failed to connect"))
}

async fn scratch_table(conn: &mut Conn, prefix: &str) -> String {
    let name = format!("{}_{}", prefix, std::process::id());
    conn.query_drop(&format!("DROP TABLE IF EXISTS {}", name))
        .await
        .unwrap();
    conn.query_drop(&format!("CREATE TABLE {} (id INT PRIMARY KEY, name TEXT)", name))
        .await
        .unwrap();
    name
}

#[tokio::test]
async fn test_async_exec_and_cache() {
    let Some(mut conn) = get_async_conn().await else { return };
    let rows: Vec<(i32, String)> = conn
        .exec_collect("SELECT ?::int4, ?::text", (7_i32, "seven"))
        .await
        .unwrap();
    assert_eq!(rows, vec![(7, "seven".to_string())]);
    assert_eq!(conn.cached_statements(), 1);

    let stmt = conn.prepare("SELECT ?::int4 + 1").await.unwrap();
    let first: Option<(i32,)> = conn.exec_first(&*stmt, (1_i32,)).await.unwrap();
    assert_eq!(first, Some((2,)));
    conn.close_statement(&stmt).await.unwrap();
    conn.close().await.unwrap();
}

#[tokio::test]
async fn test_async_transaction_and_savepoint() {
    let Some(mut conn) = get_async_conn().await else { return };
    let table = scratch_table(&mut conn, "tokio_tx").await;
    let insert = format!("INSERT INTO {} VALUES (?, ?)", table);

    conn.begin().await.unwrap();
    conn.exec_drop(insert.as_str(), (1_i32, "kept")).await.unwrap();
    let sp = conn.savepoint("sp").await.unwrap();
    conn.exec_drop(insert.as_str(), (2_i32, "dropped")).await.unwrap();
    conn.rollback_to_savepoint(&sp).await.unwrap();
    conn.commit().await.unwrap();
    assert_eq!(conn.transaction_status(), TransactionStatus::Idle);

    let insert_again = insert.clone();
    let result: ng_postgres::Result<()> = conn
        .run_transaction(move |conn, _tx| {
            Box::pin(async move {
                conn.exec_drop(insert_again.as_str(), (3_i32, "rolled back")).await?;
                Err::<(), _>(Error::InvalidUsage("abort".into()))
            })
        })
        .await;
    assert!(result.is_err());

    let count: Option<(i64,)> = conn
        .query_first(&format!("SELECT COUNT(*) FROM {}", table))
        .await
        .unwrap();
    assert_eq!(count, Some((1,)));
    conn.query_drop(&format!("DROP TABLE {}", table)).await.unwrap();
}

#[tokio::test]
async fn test_async_batch_and_copy() {
    let Some(mut conn) = get_async_conn().await else { return };
    let table = scratch_table(&mut conn, "tokio_copy").await;

    let insert = format!("INSERT INTO {} VALUES (?, ?)", table);
    let batch = Batch::new()
        .strict(false)
        .add(insert.clone(), (1_i32, "a"))
        .add(insert, (2_i32, "b"));
    let outcomes = conn.exec_batch(&batch).await.unwrap();
    assert_eq!(outcomes, vec![BatchOutcome::RowCount(1); 2]);

    let copied = conn
        .copy_in_bytes(&format!("COPY {} FROM STDIN", table), b"3\tc\n4\td\n")
        .await
        .unwrap();
    assert_eq!(copied, 2);

    let mut out = Vec::new();
    let rows = conn
        .copy_out(&format!("COPY (SELECT * FROM {} ORDER BY id) TO STDOUT", table), &mut out)
        .await
        .unwrap();
    assert_eq!(rows, 4);
    assert_eq!(out, b"1\ta\n2\tb\n3\tc\n4\td\n");

    conn.query_drop(&format!("DROP TABLE {}", table)).await.unwrap();
}

#[tokio::test]
async fn test_async_batch_items_see_earlier_ddl() {
    let Some(mut conn) = get_async_conn().await else { return };

    for strict in [true, false] {
        let name = format!(
            "{}_{}",
            if strict { "tokio_ddl_strict" } else { "tokio_ddl_lenient" },
            std::process::id()
        );
        conn.query_drop(&format!("DROP TABLE IF EXISTS {}", name)).await.unwrap();

        let batch = Batch::new()
            .strict(strict)
            .add(format!("CREATE TABLE {} (x INT)", name), ())
            .add(format!("INSERT INTO {} VALUES (?)", name), (1_i32,));
        let outcomes = conn.exec_batch(&batch).await.unwrap();
        assert_eq!(outcomes, vec![BatchOutcome::SuccessNoInfo, BatchOutcome::RowCount(1)]);
        conn.query_drop(&format!("DROP TABLE {}", name)).await.unwrap();
    }
}

#[tokio::test]
async fn test_async_batch_without_autocommit() {
    let Some(mut conn) = get_async_conn().await else { return };
    let table = scratch_table(&mut conn, "tokio_batch_tx").await;
    let insert = format!("INSERT INTO {} VALUES (?, ?)", table);

    for strict in [true, false] {
        conn.set_auto_commit(false).await.unwrap();
        let batch = Batch::new()
            .strict(strict)
            .add(insert.clone(), (1_i32, "a"))
            .add("INSERT INTO tokio_missing_table VALUES (?)", (1_i32,))
            .add(insert.clone(), (2_i32, "b"));
        let batch_err = match conn.exec_batch(&batch).await {
            Err(Error::Batch(e)) => e,
            other => panic!("expected a batch error, got {:?}", other),
        };
        assert_eq!(batch_err.failed_index, 1);
        assert_eq!(batch_err.source.sqlstate(), Some("42P01"));
        if strict {
            assert_eq!(batch_err.outcomes, vec![BatchOutcome::RowCount(1)]);
        } else {
            assert_eq!(
                batch_err.outcomes,
                vec![BatchOutcome::RowCount(1), BatchOutcome::Failed, BatchOutcome::Failed]
            );
        }
        conn.rollback().await.unwrap();
        conn.set_auto_commit(true).await.unwrap();
    }

    conn.query_drop(&format!("DROP TABLE {}", table)).await.unwrap();
}

#[tokio::test]
async fn test_async_notifications_and_cancel() {
    let Some(mut conn) = get_async_conn().await else { return };
    let received = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = std::sync::Arc::clone(&received);
    conn.add_notification_listener(Some("tokio_events"), move |n| {
        sink.lock().unwrap().push(n.payload.clone());
    })
    .unwrap();
    conn.listen("tokio_events").await.unwrap();
    conn.query_drop("NOTIFY tokio_events, 'hello'").await.unwrap();
    assert_eq!(*received.lock().unwrap(), vec!["hello".to_string()]);

    let token = conn.cancel_token().unwrap();
    let cancel = tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        token.cancel_async().await
    });
    let err = conn.query_drop("SELECT pg_sleep(10)").await.unwrap_err();
    assert_eq!(err.sqlstate(), Some("57014"));
    cancel.await.unwrap().unwrap();
    conn.ping().await.unwrap();
}
