//! Two-phase commit (XA) on top of ordinary transaction control.
//!
//! [`XaResource`] tracks one global transaction branch at a time through
//! `Idle -> Active -> Ended` and maps the XA calls onto
//! `PREPARE TRANSACTION`, `COMMIT PREPARED` and `ROLLBACK PREPARED`.
//! Suspend/resume and interleaving are not supported.
//!
//! ```ignore
//! let mut xa = XaResource::new(conn);
//! let xid = Xid::new(1, b"order-17", b"db-a")?;
//! xa.start(&xid, TMNOFLAGS)?;
//! xa.connection().execute("UPDATE stock SET n = n - 1 WHERE id = 3")?;
//! xa.end(&xid, TMSUCCESS)?;
//! if xa.prepare(&xid)? == XaPrepareResult::Ok {
//!     xa.commit(&xid, false)?;
//! }
//! ```

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::error::{Error, Result};
use crate::protocol::types::TransactionStatus;
use crate::session::{Executes, SessionState, TransactionControl};
use crate::sql::quote_literal;

pub const TMNOFLAGS: i32 = 0;
pub const TMJOIN: i32 = 0x0020_0000;
pub const TMRESUME: i32 = 0x0800_0000;
pub const TMSUCCESS: i32 = 0x0400_0000;
pub const TMFAIL: i32 = 0x2000_0000;
pub const TMSUSPEND: i32 = 0x0200_0000;
pub const TMSTARTRSCAN: i32 = 0x0100_0000;
pub const TMENDRSCAN: i32 = 0x0080_0000;

/// Maximum length of the global and branch qualifiers.
pub const MAX_QUALIFIER_LEN: usize = 64;

/// XA error classes with their standard numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XaErrorCode {
    /// XAER_RMERR
    RmErr,
    /// XAER_NOTA
    Nota,
    /// XAER_INVAL
    Inval,
    /// XAER_PROTO
    Proto,
    /// XAER_RMFAIL
    RmFail,
}

impl XaErrorCode {
    pub fn code(self) -> i32 {
        match self {
            XaErrorCode::RmErr => -3,
            XaErrorCode::Nota => -4,
            XaErrorCode::Inval => -5,
            XaErrorCode::Proto => -6,
            XaErrorCode::RmFail => -7,
        }
    }
}

/// An XA call that failed.
#[derive(Debug)]
pub struct XaError {
    pub code: XaErrorCode,
    pub message: String,
    /// Underlying session error, if one caused this
    pub cause: Option<Box<Error>>,
}

impl XaError {
    pub fn new(code: XaErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            cause: None,
        }
    }

    fn caused_by(code: XaErrorCode, message: impl Into<String>, cause: Error) -> Self {
        Self {
            code,
            message: message.into(),
            cause: Some(Box::new(cause)),
        }
    }
}

impl std::fmt::Display for XaError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "XA error {:?} ({}): {}", self.code, self.code.code(), self.message)?;
        if let Some(cause) = &self.cause {
            write!(f, ": {}", cause)?;
        }
        Ok(())
    }
}

impl std::error::Error for XaError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause.as_deref().map(|e| e as _)
    }
}

impl From<XaError> for Error {
    fn from(err: XaError) -> Self {
        Error::Xa(err)
    }
}

impl Error {
    /// The XA code, if this is an XA error.
    pub fn xa_code(&self) -> Option<XaErrorCode> {
        match self {
            Error::Xa(e) => Some(e.code),
            _ => None,
        }
    }
}

fn fail(code: XaErrorCode, message: &str) -> Error {
    Error::Xa(XaError::new(code, message))
}

/// Timeouts and broken connections are resource-manager failures;
/// `42704` (undefined object) on a prepared-transaction command means the
/// gid is unknown.
fn classify(err: Error, message: &str, unknown_is_nota: bool) -> Error {
    let code = if err.is_connection_broken() {
        XaErrorCode::RmFail
    } else if unknown_is_nota && err.sqlstate() == Some(crate::error::sqlstate::UNDEFINED_OBJECT) {
        XaErrorCode::Nota
    } else {
        XaErrorCode::RmErr
    };
    Error::Xa(XaError::caused_by(code, message, err))
}

/// A global transaction branch identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Xid {
    pub format_id: i32,
    pub gtrid: Vec<u8>,
    pub bqual: Vec<u8>,
}

impl Xid {
    pub fn new(format_id: i32, gtrid: &[u8], bqual: &[u8]) -> Result<Self> {
        if gtrid.len() > MAX_QUALIFIER_LEN || bqual.len() > MAX_QUALIFIER_LEN {
            return Err(fail(
                XaErrorCode::Inval,
                "global transaction id and branch qualifier are limited to 64 bytes",
            ));
        }
        Ok(Self {
            format_id,
            gtrid: gtrid.to_vec(),
            bqual: bqual.to_vec(),
        })
    }

    /// `<format_id>_<base64 gtrid>_<base64 bqual>`, the gid used with
    /// `PREPARE TRANSACTION`.
    pub fn to_gid(&self) -> String {
        format!(
            "{}_{}_{}",
            self.format_id,
            STANDARD.encode(&self.gtrid),
            STANDARD.encode(&self.bqual)
        )
    }

    /// Parse a gid written by [`to_gid`](Self::to_gid). Prepared transactions
    /// created by other software yield `None`.
    pub fn from_gid(gid: &str) -> Option<Self> {
        let mut parts = gid.split('_');
        let format_id = parts.next()?.parse().ok()?;
        let gtrid = STANDARD.decode(parts.next()?).ok()?;
        let bqual = STANDARD.decode(parts.next()?).ok()?;
        if parts.next().is_some() || gtrid.len() > MAX_QUALIFIER_LEN || bqual.len() > MAX_QUALIFIER_LEN {
            return None;
        }
        Some(Self {
            format_id,
            gtrid,
            bqual,
        })
    }
}

/// Association of the resource with a global transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XaState {
    Idle,
    /// Between `start` and `end`
    Active,
    /// Between `end` and `prepare` or a one-phase commit
    Ended,
}

/// Vote returned by [`XaResource::prepare`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XaPrepareResult {
    /// The branch is prepared and must be committed or rolled back
    Ok,
    /// The branch did no work; there is nothing to commit
    ReadOnly,
}

/// XA resource manager over one session.
#[derive(Debug)]
pub struct XaResource<S> {
    session: S,
    state: XaState,
    current: Option<Xid>,
    saved_auto_commit: bool,
}

impl<S: Executes + TransactionControl> XaResource<S> {
    pub fn new(session: S) -> Self {
        let saved_auto_commit = session.auto_commit();
        Self {
            session,
            state: XaState::Idle,
            current: None,
            saved_auto_commit,
        }
    }

    pub fn state(&self) -> XaState {
        self.state
    }

    /// The branch this resource is associated with.
    pub fn current_xid(&self) -> Option<&Xid> {
        self.current.as_ref()
    }

    /// Guarded access to the session for the branch's work.
    pub fn connection(&mut self) -> XaConnection<'_, S> {
        XaConnection { resource: self }
    }

    /// Give back the session. Any branch in progress is left as it is.
    pub fn into_inner(self) -> S {
        self.session
    }

    /// Associate the session with `xid`.
    ///
    /// `TMJOIN` re-attaches to the ended branch with the same xid.
    pub fn start(&mut self, xid: &Xid, flags: i32) -> Result<()> {
        tracing::debug!(gid = %xid.to_gid(), flags, "xa start");
        if !matches!(flags, TMNOFLAGS | TMJOIN | TMRESUME) {
            return Err(fail(XaErrorCode::Inval, "invalid flags for start"));
        }
        if self.state == XaState::Active {
            return Err(fail(XaErrorCode::Proto, "connection is busy with another transaction"));
        }
        if flags == TMRESUME {
            return Err(fail(XaErrorCode::RmErr, "suspend/resume is not supported"));
        }
        if flags == TMJOIN {
            if self.state != XaState::Ended || self.current.as_ref() != Some(xid) {
                return Err(fail(XaErrorCode::RmErr, "transaction interleaving is not supported"));
            }
        } else if self.state == XaState::Ended {
            return Err(fail(XaErrorCode::RmErr, "transaction interleaving is not supported"));
        }

        if flags == TMNOFLAGS {
            self.saved_auto_commit = self.session.auto_commit();
            self.session
                .set_auto_commit(false)
                .map_err(|e| classify(e, "cannot disable autocommit", false))?;
        }
        self.state = XaState::Active;
        self.current = Some(xid.clone());
        Ok(())
    }

    /// Dissociate the session from `xid`. `TMFAIL` is accepted as a hint
    /// only; the rollback comes later.
    pub fn end(&mut self, xid: &Xid, flags: i32) -> Result<()> {
        tracing::debug!(gid = %xid.to_gid(), flags, "xa end");
        if !matches!(flags, TMSUCCESS | TMFAIL | TMSUSPEND) {
            return Err(fail(XaErrorCode::Inval, "invalid flags for end"));
        }
        if self.state != XaState::Active || self.current.as_ref() != Some(xid) {
            return Err(fail(XaErrorCode::Proto, "end without a matching start"));
        }
        if flags == TMSUSPEND {
            return Err(fail(XaErrorCode::RmErr, "suspend/resume is not supported"));
        }
        self.state = XaState::Ended;
        Ok(())
    }

    /// First phase: `PREPARE TRANSACTION`. Must run on the session that
    /// started the branch.
    pub fn prepare(&mut self, xid: &Xid) -> Result<XaPrepareResult> {
        tracing::debug!(gid = %xid.to_gid(), "xa prepare");
        let Some(current) = &self.current else {
            return Err(fail(XaErrorCode::RmErr, "not associated with a transaction"));
        };
        if current != xid {
            return Err(fail(
                XaErrorCode::RmErr,
                "prepare must be issued on the connection that started the transaction",
            ));
        }
        if self.state != XaState::Ended {
            return Err(fail(XaErrorCode::Inval, "prepare called before end"));
        }
        self.state = XaState::Idle;
        self.current = None;

        if self.session.transaction_status() == TransactionStatus::Idle {
            self.session
                .set_auto_commit(self.saved_auto_commit)
                .map_err(|e| classify(e, "cannot restore autocommit", false))?;
            return Ok(XaPrepareResult::ReadOnly);
        }

        let sql = format!("PREPARE TRANSACTION {}", quote_literal(&xid.to_gid()));
        if let Err(e) = self.session.execute(&sql) {
            // the server already aborted the branch
            if !e.is_connection_broken()
                && let Err(restore) = self.session.set_auto_commit(self.saved_auto_commit)
            {
                tracing::warn!(error = %restore, "cannot restore autocommit after failed prepare");
            }
            return Err(classify(e, "error preparing transaction", false));
        }
        self.session
            .set_auto_commit(self.saved_auto_commit)
            .map_err(|e| classify(e, "cannot restore autocommit", false))?;
        Ok(XaPrepareResult::Ok)
    }

    /// Second phase, or a one-phase commit of an ended branch.
    pub fn commit(&mut self, xid: &Xid, one_phase: bool) -> Result<()> {
        tracing::debug!(gid = %xid.to_gid(), one_phase, "xa commit");
        if one_phase {
            self.commit_one_phase(xid)
        } else {
            self.commit_prepared(xid)
        }
    }

    fn commit_one_phase(&mut self, xid: &Xid) -> Result<()> {
        if self.current.as_ref() != Some(xid) || self.state != XaState::Ended {
            return Err(fail(
                XaErrorCode::Proto,
                "one-phase commit needs the ended transaction of this connection",
            ));
        }
        self.state = XaState::Idle;
        self.current = None;
        self.session
            .commit()
            .map_err(|e| classify(e, "error during one-phase commit", false))?;
        self.session
            .set_auto_commit(self.saved_auto_commit)
            .map_err(|e| classify(e, "cannot restore autocommit", false))
    }

    fn commit_prepared(&mut self, xid: &Xid) -> Result<()> {
        if self.state != XaState::Idle || self.session.transaction_status() != TransactionStatus::Idle {
            return Err(fail(
                XaErrorCode::RmErr,
                "second phase commit must be issued on an idle connection",
            ));
        }
        let sql = format!("COMMIT PREPARED {}", quote_literal(&xid.to_gid()));
        self.run_outside_transaction(&sql, "error committing prepared transaction")
    }

    /// Roll back the active or ended branch locally, or a prepared one
    /// with `ROLLBACK PREPARED`.
    pub fn rollback(&mut self, xid: &Xid) -> Result<()> {
        tracing::debug!(gid = %xid.to_gid(), "xa rollback");
        if self.current.as_ref() == Some(xid) {
            self.state = XaState::Idle;
            self.current = None;
            self.session
                .rollback()
                .map_err(|e| classify(e, "error rolling back transaction", false))?;
            return self
                .session
                .set_auto_commit(self.saved_auto_commit)
                .map_err(|e| classify(e, "cannot restore autocommit", false));
        }
        let sql = format!("ROLLBACK PREPARED {}", quote_literal(&xid.to_gid()));
        self.run_outside_transaction(&sql, "error rolling back prepared transaction")
    }

    /// `COMMIT PREPARED` and `ROLLBACK PREPARED` refuse to run inside a
    /// transaction block, so autocommit is switched on around them.
    fn run_outside_transaction(&mut self, sql: &str, message: &str) -> Result<()> {
        let saved = self.session.auto_commit();
        self.session
            .set_auto_commit(true)
            .map_err(|e| classify(e, "cannot enable autocommit", false))?;
        let result = self.session.execute(sql);
        let restored = self.session.set_auto_commit(saved);
        result.map_err(|e| classify(e, message, true))?;
        restored.map_err(|e| classify(e, "cannot restore autocommit", false))
    }

    /// Prepared branches of the current database, on `TMSTARTRSCAN`.
    pub fn recover(&mut self, flags: i32) -> Result<Vec<Xid>> {
        if !matches!(
            flags,
            TMNOFLAGS | TMSTARTRSCAN | TMENDRSCAN
        ) && flags != TMSTARTRSCAN | TMENDRSCAN
        {
            return Err(fail(XaErrorCode::Inval, "invalid flags for recover"));
        }
        if flags & TMSTARTRSCAN == 0 {
            return Ok(Vec::new());
        }
        let rows = self
            .session
            .query_text("SELECT gid FROM pg_prepared_xacts WHERE database = current_database()")
            .map_err(|e| classify(e, "error during recover", false))?;
        Ok(rows
            .iter()
            .filter_map(|row| row.first()?.as_deref())
            .filter_map(Xid::from_gid)
            .collect())
    }

    /// Heuristic completion is never performed, so there is nothing to forget.
    pub fn forget(&mut self, _xid: &Xid) -> Result<()> {
        Err(fail(XaErrorCode::Nota, "heuristic commit/rollback is not supported"))
    }

    /// True when both resources talk to the same backend.
    pub fn is_same_rm<T: Executes>(&self, other: &XaResource<T>) -> bool {
        self.session.backend_pid() == other.session.backend_pid()
    }

    /// Transaction timeouts are not supported; always 0.
    pub fn transaction_timeout(&self) -> u32 {
        0
    }

    /// Transaction timeouts are not supported; always false.
    pub fn set_transaction_timeout(&mut self, _seconds: u32) -> bool {
        false
    }

    fn in_global_transaction(&self) -> bool {
        matches!(self.state, XaState::Active | XaState::Ended)
    }
}

/// The session as seen while it may be enlisted in a global transaction.
///
/// Local commit, rollback and enabling autocommit are refused while a
/// branch is active or ended; everything else goes straight through.
pub struct XaConnection<'a, S> {
    resource: &'a mut XaResource<S>,
}

impl<S: Executes + TransactionControl> XaConnection<'_, S> {
    fn guard(&self, operation: &str) -> Result<()> {
        if self.resource.in_global_transaction() {
            return Err(fail(
                XaErrorCode::Proto,
                &format!("{} is not allowed during a global transaction", operation),
            ));
        }
        Ok(())
    }

    pub fn session(&self) -> &S {
        &self.resource.session
    }
}

impl<S: Executes + TransactionControl> Executes for XaConnection<'_, S> {
    fn execute(&mut self, sql: &str) -> Result<u64> {
        self.resource.session.execute(sql)
    }

    fn query_text(&mut self, sql: &str) -> Result<Vec<Vec<Option<String>>>> {
        self.resource.session.query_text(sql)
    }

    fn backend_pid(&self) -> u32 {
        self.resource.session.backend_pid()
    }

    fn state(&self) -> SessionState {
        self.resource.session.state()
    }
}

impl<S: Executes + TransactionControl> TransactionControl for XaConnection<'_, S> {
    fn auto_commit(&self) -> bool {
        self.resource.session.auto_commit()
    }

    fn set_auto_commit(&mut self, auto_commit: bool) -> Result<()> {
        if auto_commit {
            self.guard("enabling autocommit")?;
        }
        self.resource.session.set_auto_commit(auto_commit)
    }

    fn commit(&mut self) -> Result<()> {
        self.guard("commit")?;
        self.resource.session.commit()
    }

    fn rollback(&mut self) -> Result<()> {
        self.guard("rollback")?;
        self.resource.session.rollback()
    }

    fn transaction_status(&self) -> TransactionStatus {
        self.resource.session.transaction_status()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ServerError;

    /// Records statements and mimics the server's transaction status.
    #[derive(Debug, Default)]
    struct MockSession {
        manual: bool,
        status: TransactionStatus,
        log: Vec<String>,
        prepared: Vec<String>,
        pid: u32,
        refuse_prepare: bool,
    }

    fn undefined_object() -> Error {
        Error::Server(ServerError {
            severity: Some("ERROR".into()),
            code: Some("42704".into()),
            message: Some("prepared transaction does not exist".into()),
            ..Default::default()
        })
    }

    impl Executes for MockSession {
        fn execute(&mut self, sql: &str) -> Result<u64> {
            self.log.push(sql.to_string());
            let gid = sql.split('\'').nth(1).unwrap_or_default().to_string();
            if sql.starts_with("PREPARE TRANSACTION") && self.refuse_prepare {
                self.status = TransactionStatus::Failed;
                return Err(Error::Server(ServerError {
                    severity: Some("ERROR".into()),
                    code: Some("55000".into()),
                    message: Some("prepared transactions are disabled".into()),
                    ..Default::default()
                }));
            } else if sql.starts_with("PREPARE TRANSACTION") {
                self.prepared.push(gid);
                self.status = TransactionStatus::Idle;
            } else if sql.starts_with("COMMIT PREPARED") || sql.starts_with("ROLLBACK PREPARED") {
                let before = self.prepared.len();
                self.prepared.retain(|g| *g != gid);
                if self.prepared.len() == before {
                    return Err(undefined_object());
                }
            } else if self.manual {
                self.status = TransactionStatus::InTransaction;
            }
            Ok(0)
        }

        fn query_text(&mut self, _sql: &str) -> Result<Vec<Vec<Option<String>>>> {
            let mut rows: Vec<Vec<Option<String>>> =
                self.prepared.iter().map(|g| vec![Some(g.clone())]).collect();
            rows.push(vec![Some("someone-elses-gid".into())]);
            Ok(rows)
        }

        fn backend_pid(&self) -> u32 {
            self.pid
        }

        fn state(&self) -> SessionState {
            SessionState::Ready(self.status)
        }
    }

    impl TransactionControl for MockSession {
        fn auto_commit(&self) -> bool {
            !self.manual
        }

        fn set_auto_commit(&mut self, auto_commit: bool) -> Result<()> {
            if auto_commit && self.status.in_transaction() {
                self.commit()?;
            }
            self.manual = !auto_commit;
            Ok(())
        }

        fn commit(&mut self) -> Result<()> {
            self.log.push("COMMIT".into());
            self.status = TransactionStatus::Idle;
            Ok(())
        }

        fn rollback(&mut self) -> Result<()> {
            self.log.push("ROLLBACK".into());
            self.status = TransactionStatus::Idle;
            Ok(())
        }

        fn transaction_status(&self) -> TransactionStatus {
            self.status
        }
    }

    fn xid(n: u8) -> Xid {
        Xid::new(7, &[n; 5], b"branch").unwrap()
    }

    fn code(result: Result<impl std::fmt::Debug>) -> XaErrorCode {
        result.unwrap_err().xa_code().unwrap()
    }

    #[test]
    fn test_gid_round_trip() {
        let x = Xid::new(-1, b"\x00\xff global", b"").unwrap();
        let gid = x.to_gid();
        assert!(gid.starts_with("-1_"));
        assert_eq!(Xid::from_gid(&gid), Some(x));
        assert_eq!(Xid::from_gid("foreign"), None);
        assert_eq!(Xid::from_gid("1_!!_AA=="), None);
        assert!(Xid::new(1, &[0; 65], b"").is_err());
    }

    #[test]
    fn test_two_phase_commit() {
        let mut xa = XaResource::new(MockSession::default());
        let x = xid(1);
        xa.start(&x, TMNOFLAGS).unwrap();
        assert!(!xa.connection().auto_commit());
        xa.connection().execute("INSERT INTO t VALUES (1)").unwrap();
        xa.end(&x, TMSUCCESS).unwrap();
        assert_eq!(xa.prepare(&x).unwrap(), XaPrepareResult::Ok);
        assert_eq!(xa.state(), XaState::Idle);
        assert!(xa.connection().auto_commit());

        xa.commit(&x, false).unwrap();
        let session = xa.into_inner();
        assert_eq!(session.log[1], format!("PREPARE TRANSACTION '{}'", x.to_gid()));
        assert_eq!(session.log[2], format!("COMMIT PREPARED '{}'", x.to_gid()));
    }

    #[test]
    fn test_prepare_read_only() {
        let mut xa = XaResource::new(MockSession::default());
        let x = xid(2);
        xa.start(&x, TMNOFLAGS).unwrap();
        xa.end(&x, TMSUCCESS).unwrap();
        assert_eq!(xa.prepare(&x).unwrap(), XaPrepareResult::ReadOnly);
        assert!(xa.into_inner().log.is_empty());
    }

    #[test]
    fn test_failed_prepare_restores_auto_commit() {
        let mut xa = XaResource::new(MockSession {
            refuse_prepare: true,
            ..Default::default()
        });
        let x = xid(3);
        xa.start(&x, TMNOFLAGS).unwrap();
        xa.connection().execute("INSERT INTO t VALUES (1)").unwrap();
        xa.end(&x, TMSUCCESS).unwrap();
        assert_eq!(code(xa.prepare(&x)), XaErrorCode::RmErr);
        assert_eq!(xa.state(), XaState::Idle);
        assert!(xa.connection().auto_commit());
        assert_eq!(xa.connection().transaction_status(), TransactionStatus::Idle);
        assert!(xa.into_inner().prepared.is_empty());
    }

    #[test]
    fn test_start_twice_is_protocol_error() {
        let mut xa = XaResource::new(MockSession::default());
        xa.start(&xid(1), TMNOFLAGS).unwrap();
        assert_eq!(code(xa.start(&xid(2), TMNOFLAGS)), XaErrorCode::Proto);
        assert_eq!(code(xa.start(&xid(1), 12345)), XaErrorCode::Inval);
    }

    #[test]
    fn test_prepare_before_end() {
        let mut xa = XaResource::new(MockSession::default());
        let x = xid(1);
        assert_eq!(code(xa.prepare(&x)), XaErrorCode::RmErr);
        xa.start(&x, TMNOFLAGS).unwrap();
        assert_eq!(code(xa.prepare(&xid(9))), XaErrorCode::RmErr);
        assert_eq!(code(xa.prepare(&x)), XaErrorCode::Inval);
    }

    #[test]
    fn test_unknown_gid_is_nota() {
        let mut xa = XaResource::new(MockSession::default());
        assert_eq!(code(xa.commit(&xid(4), false)), XaErrorCode::Nota);
        assert_eq!(code(xa.rollback(&xid(4))), XaErrorCode::Nota);
        assert_eq!(code(xa.forget(&xid(4))), XaErrorCode::Nota);
    }

    #[test]
    fn test_join_and_resume() {
        let mut xa = XaResource::new(MockSession::default());
        let x = xid(1);
        xa.start(&x, TMNOFLAGS).unwrap();
        assert_eq!(code(xa.end(&xid(2), TMSUCCESS)), XaErrorCode::Proto);
        assert_eq!(code(xa.end(&x, TMSUSPEND)), XaErrorCode::RmErr);
        xa.end(&x, TMSUCCESS).unwrap();
        assert_eq!(code(xa.start(&xid(2), TMNOFLAGS)), XaErrorCode::RmErr);
        assert_eq!(code(xa.start(&xid(2), TMJOIN)), XaErrorCode::RmErr);
        xa.start(&x, TMJOIN).unwrap();
        assert_eq!(xa.state(), XaState::Active);
        assert_eq!(code(xa.start(&x, TMRESUME)), XaErrorCode::Proto);
    }

    #[test]
    fn test_one_phase_commit_and_local_rollback() {
        let mut xa = XaResource::new(MockSession::default());
        let x = xid(1);
        xa.start(&x, TMNOFLAGS).unwrap();
        xa.connection().execute("UPDATE t SET a = 1").unwrap();
        assert_eq!(code(xa.commit(&x, true)), XaErrorCode::Proto);
        xa.end(&x, TMSUCCESS).unwrap();
        xa.commit(&x, true).unwrap();
        assert!(xa.connection().auto_commit());

        let y = xid(2);
        xa.start(&y, TMNOFLAGS).unwrap();
        xa.rollback(&y).unwrap();
        assert_eq!(xa.state(), XaState::Idle);
        assert_eq!(xa.into_inner().log.last().map(String::as_str), Some("ROLLBACK"));
    }

    #[test]
    fn test_connection_guard() {
        let mut xa = XaResource::new(MockSession::default());
        let x = xid(1);
        xa.start(&x, TMNOFLAGS).unwrap();
        assert_eq!(code(xa.connection().commit()), XaErrorCode::Proto);
        assert_eq!(code(xa.connection().rollback()), XaErrorCode::Proto);
        assert_eq!(code(xa.connection().set_auto_commit(true)), XaErrorCode::Proto);
        xa.connection().set_auto_commit(false).unwrap();
        xa.end(&x, TMFAIL).unwrap();
        assert_eq!(code(xa.connection().commit()), XaErrorCode::Proto);
        xa.rollback(&x).unwrap();
        xa.connection().commit().unwrap();
    }

    #[test]
    fn test_recover_skips_foreign_gids() {
        let mut xa = XaResource::new(MockSession::default());
        let x = xid(3);
        xa.start(&x, TMNOFLAGS).unwrap();
        xa.connection().execute("DELETE FROM t").unwrap();
        xa.end(&x, TMSUCCESS).unwrap();
        xa.prepare(&x).unwrap();

        assert!(xa.recover(TMNOFLAGS).unwrap().is_empty());
        assert_eq!(xa.recover(TMSTARTRSCAN | TMENDRSCAN).unwrap(), vec![x]);
        assert_eq!(code(xa.recover(TMJOIN)), XaErrorCode::Inval);
    }

    #[test]
    fn test_same_rm() {
        let a = XaResource::new(MockSession { pid: 10, ..Default::default() });
        let b = XaResource::new(MockSession { pid: 10, ..Default::default() });
        let c = XaResource::new(MockSession { pid: 11, ..Default::default() });
        assert!(a.is_same_rm(&b));
        assert!(!a.is_same_rm(&c));
    }
}
