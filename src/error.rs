//! Error types for ng-postgres.

use thiserror::Error;

use crate::batch::BatchError;
use crate::protocol::types::Oid;
use crate::xa::XaError;

/// Result type for ng-postgres operations.
pub type Result<T> = core::result::Result<T, Error>;

/// SQLSTATE codes the driver reacts to.
pub mod sqlstate {
    /// `in_failed_sql_transaction`
    pub const IN_FAILED_SQL_TRANSACTION: &str = "25P02";
    /// `invalid_sql_statement_name` (prepared statement does not exist)
    pub const INVALID_SQL_STATEMENT_NAME: &str = "26000";
    /// `feature_not_supported`, also used for "cached plan must not change result type"
    pub const FEATURE_NOT_SUPPORTED: &str = "0A000";
    /// `undefined_object`
    pub const UNDEFINED_OBJECT: &str = "42704";
    /// `query_canceled`
    pub const QUERY_CANCELED: &str = "57014";
    /// `unique_violation`
    pub const UNIQUE_VIOLATION: &str = "23505";
}

/// Fields of an ErrorResponse or NoticeResponse.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerError {
    /// Severity: ERROR, FATAL, PANIC, WARNING, NOTICE, DEBUG, INFO, LOG
    pub severity: Option<String>,
    /// Non-localized severity (same as severity but never translated)
    pub severity_non_localized: Option<String>,
    /// SQLSTATE error code (5 characters)
    pub code: Option<String>,
    /// Primary error message
    pub message: Option<String>,
    /// Detailed error explanation
    pub detail: Option<String>,
    /// Suggestion for fixing the error
    pub hint: Option<String>,
    /// Cursor position in query string (1-based)
    pub position: Option<u32>,
    /// Position in internal query
    pub internal_position: Option<u32>,
    /// Failed internal command text
    pub internal_query: Option<String>,
    /// Context/stack trace
    pub where_: Option<String>,
    /// Schema name
    pub schema: Option<String>,
    /// Table name
    pub table: Option<String>,
    /// Column name
    pub column: Option<String>,
    /// Data type name
    pub data_type: Option<String>,
    /// Constraint name
    pub constraint: Option<String>,
    /// Source file name
    pub file: Option<String>,
    /// Source line number
    pub line: Option<u32>,
    /// Source routine name
    pub routine: Option<String>,
}

impl ServerError {
    /// The severity, preferring the non-localized form.
    pub fn severity(&self) -> Option<&str> {
        self.severity_non_localized
            .as_deref()
            .or(self.severity.as_deref())
    }

    /// SQLSTATE code.
    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    /// Primary message, or an empty string.
    pub fn message(&self) -> &str {
        self.message.as_deref().unwrap_or("")
    }
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(severity) = self.severity() {
            write!(f, "{}: ", severity)?;
        }
        if let Some(message) = &self.message {
            write!(f, "{}", message)?;
        }
        if let Some(code) = &self.code {
            write!(f, " (SQLSTATE {})", code)?;
        }
        if let Some(detail) = &self.detail {
            write!(f, "\nDETAIL: {}", detail)?;
        }
        if let Some(hint) = &self.hint {
            write!(f, "\nHINT: {}", hint)?;
        }
        Ok(())
    }
}

/// Error type for ng-postgres.
#[derive(Debug, Error)]
pub enum Error {
    /// Server error response
    #[error("PostgreSQL error: {0}")]
    Server(ServerError),

    /// Protocol error (malformed frame, unexpected response, etc.)
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The socket read timed out; the connection is closed
    #[error("Timed out waiting for the server")]
    Timeout,

    /// Authentication failed
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// TLS error
    #[cfg(any(feature = "sync-tls", feature = "tokio-tls"))]
    #[error("TLS error: {0}")]
    Tls(#[from] native_tls::Error),

    /// Server certificate does not match the host name
    #[error("Host name verification failed: {0}")]
    HostNameMismatch(String),

    /// Connection is broken and cannot be reused
    #[error("Connection is broken")]
    ConnectionBroken,

    /// Invalid usage (e.g., nested transactions)
    #[error("Invalid usage: {0}")]
    InvalidUsage(String),

    /// Unsupported feature
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// No codec is registered for the type OID
    #[error("Unsupported type OID {0}")]
    UnsupportedType(Oid),

    /// Malformed value bytes
    #[error("Decode error: {0}")]
    Decode(String),

    /// Value cannot be encoded for the requested type
    #[error("Encode error: {0}")]
    Encode(String),

    /// Value is out of range for the requested Rust type
    #[error("Conversion error: {0}")]
    Conversion(String),

    /// Batch stopped or partially failed
    #[error("{0}")]
    Batch(Box<BatchError>),

    /// Distributed transaction error
    #[error("{0}")]
    Xa(XaError),
}

impl Error {
    /// Returns true if the error indicates the connection is broken and cannot be reused.
    pub fn is_connection_broken(&self) -> bool {
        match self {
            Error::Io(_) | Error::Timeout | Error::ConnectionBroken => true,
            Error::Server(fields) => {
                // FATAL and PANIC errors indicate connection is broken
                matches!(fields.severity(), Some("FATAL") | Some("PANIC"))
            }
            _ => false,
        }
    }

    /// Get the SQLSTATE code if this is a server error.
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            Error::Server(fields) => fields.code.as_deref(),
            Error::Batch(batch) => batch.source.sqlstate(),
            _ => None,
        }
    }

    /// Returns true for "current transaction is aborted" errors.
    pub fn is_transaction_aborted(&self) -> bool {
        self.sqlstate() == Some(sqlstate::IN_FAILED_SQL_TRANSACTION)
    }

    /// Returns true if the server cancelled the running statement.
    pub fn is_query_canceled(&self) -> bool {
        self.sqlstate() == Some(sqlstate::QUERY_CANCELED)
    }

    /// True when a cached statement no longer matches the server: it was
    /// dropped, or its result type changed under it.
    pub fn is_stale_statement(&self) -> bool {
        match self {
            Error::Server(fields) => match fields.code.as_deref() {
                Some(sqlstate::INVALID_SQL_STATEMENT_NAME) => true,
                Some(sqlstate::FEATURE_NOT_SUPPORTED) => fields
                    .message()
                    .contains("cached plan must not change result type"),
                _ => false,
            },
            _ => false,
        }
    }

    /// A value of type `natural` cannot be sent as `target`.
    pub fn type_mismatch(natural: Oid, target: Oid) -> Self {
        Error::Encode(format!(
            "cannot encode value of type oid {} as oid {}",
            natural, target
        ))
    }

    /// A value does not fit the destination type.
    pub fn overflow(from: &str, to: &str) -> Self {
        Error::Conversion(format!("{} value out of range for {}", from, to))
    }

    /// Map a read error, turning socket timeouts into [`Error::Timeout`].
    pub fn from_read(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut => Error::Timeout,
            _ => Error::Io(err),
        }
    }
}

impl<Src: std::fmt::Debug, Dst: std::fmt::Debug + ?Sized>
    From<zerocopy::error::CastError<Src, Dst>> for Error
{
    fn from(err: zerocopy::error::CastError<Src, Dst>) -> Self {
        Error::Protocol(format!("zerocopy cast error: {err:?}"))
    }
}

impl From<std::convert::Infallible> for Error {
    fn from(err: std::convert::Infallible) -> Self {
        match err {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server(severity: &str, code: &str) -> Error {
        Error::Server(ServerError {
            severity: Some(severity.into()),
            code: Some(code.into()),
            message: Some("boom".into()),
            ..Default::default()
        })
    }

    #[test]
    fn test_broken_classification() {
        assert!(Error::Timeout.is_connection_broken());
        assert!(server("FATAL", "57P01").is_connection_broken());
        assert!(!server("ERROR", "23505").is_connection_broken());
        assert!(!Error::Conversion("x".into()).is_connection_broken());
    }

    #[test]
    fn test_sqlstate_helpers() {
        assert!(server("ERROR", "25P02").is_transaction_aborted());
        assert!(server("ERROR", "57014").is_query_canceled());
        assert_eq!(server("ERROR", "42704").sqlstate(), Some("42704"));
    }

    #[test]
    fn test_stale_statement_detection() {
        assert!(server("ERROR", "26000").is_stale_statement());
        let changed = Error::Server(ServerError {
            severity: Some("ERROR".into()),
            code: Some("0A000".into()),
            message: Some("cached plan must not change result type".into()),
            ..Default::default()
        });
        assert!(changed.is_stale_statement());
        assert!(!server("ERROR", "0A000").is_stale_statement());
        assert!(!server("ERROR", "42P01").is_stale_statement());
    }

    #[test]
    fn test_read_timeout_mapping() {
        let err = std::io::Error::from(std::io::ErrorKind::WouldBlock);
        assert!(matches!(Error::from_read(err), Error::Timeout));
        let err = std::io::Error::from(std::io::ErrorKind::UnexpectedEof);
        assert!(matches!(Error::from_read(err), Error::Io(_)));
    }

    #[test]
    fn test_display_server_error() {
        let text = server("ERROR", "23505").to_string();
        assert!(text.contains("ERROR: boom"));
        assert!(text.contains("SQLSTATE 23505"));
    }
}
