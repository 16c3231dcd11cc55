//! Capability traits a session exposes to layers built on top of it.
//!
//! The XA adapter and other wrappers depend on these instead of a concrete
//! connection type, and intercept only the calls they need to guard.

use std::sync::Arc;

use crate::error::Result;
use crate::notify::{ListenerId, NoticeHandler, Notification};
use crate::opts::Opts;
use crate::protocol::types::{FormatCode, TransactionStatus};
use crate::statement::PreparedStatement;
use crate::types::registry::FormatSettings;
use crate::types::shared::diverge;
use crate::types::{RegistryKey, SharedRegistryCache, TypeRegistry};

/// Observable state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Connected; the status is the one from the last ReadyForQuery.
    Ready(TransactionStatus),
    /// Terminated or broken. Every call fails fast.
    Closed,
}

impl SessionState {
    pub fn is_closed(&self) -> bool {
        matches!(self, SessionState::Closed)
    }
}

/// Runs SQL text through the simple query protocol.
pub trait Executes {
    /// Execute `sql` and return the row count of the last statement, or 0.
    fn execute(&mut self, sql: &str) -> Result<u64>;

    /// Execute `sql` and return its rows with every column as text.
    fn query_text(&mut self, sql: &str) -> Result<Vec<Vec<Option<String>>>>;

    /// Process id of the backend serving this session.
    fn backend_pid(&self) -> u32;

    fn state(&self) -> SessionState;
}

/// Local transaction control.
pub trait TransactionControl {
    fn auto_commit(&self) -> bool;

    /// Switching autocommit on while a transaction is open commits it.
    fn set_auto_commit(&mut self, auto_commit: bool) -> Result<()>;

    fn commit(&mut self) -> Result<()>;

    fn rollback(&mut self) -> Result<()>;

    /// Status from the most recent ReadyForQuery.
    fn transaction_status(&self) -> TransactionStatus;
}

/// Registration of LISTEN/NOTIFY callbacks and the notice sink.
pub trait NotificationSource {
    fn add_notification_listener<F>(&mut self, filter: Option<&str>, callback: F) -> Result<ListenerId>
    where
        F: FnMut(&Notification) + Send + 'static;

    fn remove_notification_listener(&mut self, id: ListenerId) -> bool;

    fn set_notice_handler(&mut self, handler: Option<NoticeHandler>);
}

/// `(major, minor)` from a `server_version` value such as `16.2` or
/// `15beta1 (Debian 15~beta1-1)`.
pub fn parse_server_version(version: &str) -> Option<(u32, u32)> {
    let numeric: &str = version
        .split(|c: char| !(c.is_ascii_digit() || c == '.'))
        .next()?;
    let mut parts = numeric.split('.').filter(|p| !p.is_empty());
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
    Some((major, minor))
}

pub(crate) fn find_param<'a>(params: &'a [(String, String)], name: &str) -> Option<&'a str> {
    params
        .iter()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.as_str())
}

/// Type registry for a freshly started session, shared with other sessions
/// to the same server unless `share_type_registry` is off.
pub(crate) fn session_registry(opts: &Opts, params: &[(String, String)]) -> Arc<TypeRegistry> {
    let mut settings = FormatSettings::default();
    for (name, value) in params {
        settings.apply(name, value);
    }
    if !opts.share_type_registry {
        return Arc::new(TypeRegistry::new(settings));
    }
    let key = RegistryKey {
        host: opts.socket.clone().unwrap_or_else(|| opts.host.clone()),
        port: opts.port,
        database: opts.effective_database().to_owned(),
        server_version: find_param(params, "server_version").unwrap_or_default().to_owned(),
        client_encoding: find_param(params, "client_encoding").unwrap_or_default().to_owned(),
    };
    SharedRegistryCache::global().get_or_create(key, settings)
}

/// Apply a ParameterStatus received after startup.
pub(crate) fn record_parameter(
    params: &mut Vec<(String, String)>,
    registry: &mut Arc<TypeRegistry>,
    name: &str,
    value: &str,
) {
    match params.iter_mut().find(|(key, _)| key == name) {
        Some(entry) => entry.1 = value.to_owned(),
        None => params.push((name.to_owned(), value.to_owned())),
    }
    diverge(registry, name, value);
}

/// Result formats to request for `stmt`: binary where the registry can
/// decode it, text otherwise.
pub(crate) fn result_formats(registry: &TypeRegistry, stmt: &PreparedStatement) -> Vec<FormatCode> {
    stmt.columns()
        .iter()
        .map(|col| registry.result_format(col.type_oid))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_server_version() {
        assert_eq!(parse_server_version("16.2"), Some((16, 2)));
        assert_eq!(parse_server_version("9.6.24"), Some((9, 6)));
        assert_eq!(parse_server_version("15beta1 (Debian 15~beta1-1)"), Some((15, 0)));
        assert_eq!(parse_server_version("devel"), None);
    }

    #[test]
    fn test_record_parameter_replaces_value() {
        let mut params = vec![("TimeZone".to_string(), "UTC".to_string())];
        let mut registry = Arc::new(TypeRegistry::default());
        record_parameter(&mut params, &mut registry, "TimeZone", "Europe/Berlin");
        record_parameter(&mut params, &mut registry, "is_superuser", "off");
        assert_eq!(find_param(&params, "TimeZone"), Some("Europe/Berlin"));
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn test_private_registry_when_sharing_is_off() {
        let opts = Opts {
            host: "db.example".into(),
            share_type_registry: false,
            ..Opts::default()
        };
        let a = session_registry(&opts, &[]);
        let b = session_registry(&opts, &[]);
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_shared_registry_per_server() {
        let opts = Opts {
            host: "shared.example".into(),
            ..Opts::default()
        };
        let params = vec![("server_version".to_string(), "16.1".to_string())];
        let a = session_registry(&opts, &params);
        let b = session_registry(&opts, &params);
        assert!(Arc::ptr_eq(&a, &b));
    }
}
