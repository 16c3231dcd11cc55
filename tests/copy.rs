//! COPY FROM STDIN and COPY TO STDOUT.

mod common;

use std::io::{self, Read};

use common::{TestTable, get_conn};
use ng_postgres::Error;

const ROWS: &[u8] = b"1\tone\t10\n2\ttwo\t20\n3\tthree\t30\n";

#[test]
fn test_copy_in_then_select() {
    let Some(mut conn) = get_conn() else { return };
    let table = TestTable::new(&mut conn, "copy_in");

    let sql = format!("COPY {} (id, name, value) FROM STDIN", table.name);
    let mut copy = conn.copy_in(&sql).unwrap();
    assert_eq!(copy.column_count(), 3);
    // Chunks need not line up with rows.
    copy.send(&ROWS[..7]).unwrap();
    copy.send(&ROWS[7..]).unwrap();
    assert_eq!(copy.finish().unwrap(), 3);

    let rows: Vec<(i32, String, i32)> = conn
        .query_collect(&format!("SELECT id, name, value FROM {} ORDER BY id", table.name))
        .unwrap();
    assert_eq!(
        rows,
        vec![
            (1, "one".to_string(), 10),
            (2, "two".to_string(), 20),
            (3, "three".to_string(), 30),
        ]
    );

    table.cleanup(&mut conn);
}

#[test]
fn test_copy_out_round_trip() {
    let Some(mut conn) = get_conn() else { return };
    let table = TestTable::new(&mut conn, "copy_out");
    conn.copy_in_bytes(&format!("COPY {} (id, name, value) FROM STDIN", table.name), ROWS)
        .unwrap();

    let mut out = Vec::new();
    let rows = conn
        .copy_out(
            &format!("COPY (SELECT id, name, value FROM {} ORDER BY id) TO STDOUT", table.name),
            &mut out,
        )
        .unwrap();
    assert_eq!(rows, 3);
    assert_eq!(out, ROWS);

    table.cleanup(&mut conn);
}

struct FailingReader {
    sent: bool,
}

impl Read for FailingReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.sent {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "source went away"));
        }
        self.sent = true;
        let n = ROWS.len().min(buf.len());
        buf[..n].copy_from_slice(&ROWS[..n]);
        Ok(n)
    }
}

#[test]
fn test_copy_source_failure_keeps_connection() {
    let Some(mut conn) = get_conn() else { return };
    let table = TestTable::new(&mut conn, "copy_fail");

    let sql = format!("COPY {} (id, name, value) FROM STDIN", table.name);
    let err = conn
        .copy_in_from_reader(&sql, FailingReader { sent: false })
        .unwrap_err();
    assert!(matches!(err, Error::Io(_)));
    assert!(!conn.is_broken());
    assert_eq!(table.count(&mut conn), 0);

    table.cleanup(&mut conn);
}

#[test]
fn test_dropped_copy_is_aborted() {
    let Some(mut conn) = get_conn() else { return };
    let table = TestTable::new(&mut conn, "copy_drop");

    {
        let mut copy = conn
            .copy_in(&format!("COPY {} (id, name, value) FROM STDIN", table.name))
            .unwrap();
        copy.send(ROWS).unwrap();
    }
    assert!(!conn.is_broken());
    assert_eq!(table.count(&mut conn), 0);

    table.cleanup(&mut conn);
}

#[test]
fn test_copy_in_rejects_copy_out_statement() {
    let Some(mut conn) = get_conn() else { return };
    let err = conn.copy_in("COPY (SELECT 1) TO STDOUT").err().unwrap();
    assert!(matches!(err, Error::InvalidUsage(_)), "{:?}", err);
    assert!(!conn.is_broken());
    conn.ping().unwrap();
}
