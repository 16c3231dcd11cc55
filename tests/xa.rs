//! XA resource behavior against a live server.

mod common;

use common::{TestTable, get_conn};
use ng_postgres::xa::{TMNOFLAGS, TMSTARTRSCAN, TMENDRSCAN, TMSUCCESS, XaPrepareResult};
use ng_postgres::{Executes, XaErrorCode, XaResource, Xid};

fn unique_xid(tag: &str) -> Xid {
    let gtrid = format!("{}-{}", tag, std::process::id());
    Xid::new(1, gtrid.as_bytes(), b"branch").unwrap()
}

#[test]
fn test_start_twice_is_proto() {
    let Some(conn) = get_conn() else { return };
    let mut xa = XaResource::new(conn);
    let xid = unique_xid("twice");

    xa.start(&xid, TMNOFLAGS).unwrap();
    let err = xa.start(&xid, TMNOFLAGS).unwrap_err();
    assert_eq!(err.xa_code(), Some(XaErrorCode::Proto));

    xa.end(&xid, TMSUCCESS).unwrap();
    xa.rollback(&xid).unwrap();
}

#[test]
fn test_prepare_before_end_is_inval() {
    let Some(conn) = get_conn() else { return };
    let mut xa = XaResource::new(conn);
    let xid = unique_xid("early");

    xa.start(&xid, TMNOFLAGS).unwrap();
    let err = xa.prepare(&xid).unwrap_err();
    assert_eq!(err.xa_code(), Some(XaErrorCode::Inval));

    xa.end(&xid, TMSUCCESS).unwrap();
    xa.rollback(&xid).unwrap();
}

#[test]
fn test_commit_unknown_xid_is_nota() {
    let Some(conn) = get_conn() else { return };
    let mut xa = XaResource::new(conn);
    let err = xa.commit(&unique_xid("unknown"), false).unwrap_err();
    assert_eq!(err.xa_code(), Some(XaErrorCode::Nota));
    assert!(!xa.connection().session().is_broken());
}

#[test]
fn test_local_commit_refused_during_branch() {
    let Some(conn) = get_conn() else { return };
    let mut xa = XaResource::new(conn);
    let xid = unique_xid("local");

    xa.start(&xid, TMNOFLAGS).unwrap();
    let err = ng_postgres::TransactionControl::commit(&mut xa.connection()).unwrap_err();
    assert_eq!(err.xa_code(), Some(XaErrorCode::Proto));

    xa.end(&xid, TMSUCCESS).unwrap();
    xa.rollback(&xid).unwrap();
}

#[test]
fn test_read_only_branch() {
    let Some(conn) = get_conn() else { return };
    let mut xa = XaResource::new(conn);
    let xid = unique_xid("readonly");

    xa.start(&xid, TMNOFLAGS).unwrap();
    xa.end(&xid, TMSUCCESS).unwrap();
    assert_eq!(xa.prepare(&xid).unwrap(), XaPrepareResult::ReadOnly);
}

#[test]
fn test_two_phase_commit() {
    let Some(mut conn) = get_conn() else { return };
    let enabled: Option<(String,)> = conn.query_first("SHOW max_prepared_transactions").unwrap();
    if enabled.is_none_or(|(n,)| n == "0") {
        return;
    }
    let table = TestTable::new(&mut conn, "xa_commit");
    let mut xa = XaResource::new(conn);
    let xid = unique_xid("2pc");

    xa.start(&xid, TMNOFLAGS).unwrap();
    xa.connection()
        .execute(&format!("INSERT INTO {} (name, value) VALUES ('x', 1)", table.name))
        .unwrap();
    xa.end(&xid, TMSUCCESS).unwrap();
    assert_eq!(xa.prepare(&xid).unwrap(), XaPrepareResult::Ok);

    let pending = xa.recover(TMSTARTRSCAN | TMENDRSCAN).unwrap();
    assert!(pending.contains(&xid));

    xa.commit(&xid, false).unwrap();
    let mut conn = xa.into_inner();
    assert_eq!(table.count(&mut conn), 1);
    table.cleanup(&mut conn);
}
