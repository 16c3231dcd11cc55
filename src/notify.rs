//! LISTEN/NOTIFY listeners and the notice sink.

use regex::Regex;

use crate::error::{Error, Result, ServerError};
use crate::state::action::AsyncMessage;

/// Handle returned by `add_notification_listener`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// A NOTIFY delivered to this session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Backend process that sent it
    pub pid: u32,
    pub channel: String,
    pub payload: String,
}

type NotificationCallback = Box<dyn FnMut(&Notification) + Send>;

/// Sink for NoticeResponse messages.
pub type NoticeHandler = Box<dyn FnMut(&ServerError) + Send>;

struct Listener {
    id: ListenerId,
    filter: Option<Regex>,
    callback: NotificationCallback,
}

/// Callbacks for asynchronous server messages.
///
/// Delivery is at most once per connection and happens while the driver is
/// reading the response to whatever request is in flight.
#[derive(Default)]
pub struct Listeners {
    next_id: u64,
    entries: Vec<Listener>,
    notice: Option<NoticeHandler>,
}

impl std::fmt::Debug for Listeners {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listeners")
            .field("listeners", &self.entries.len())
            .field("notice_handler", &self.notice.is_some())
            .finish()
    }
}

impl Listeners {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` for channels matching `filter` in full, or for
    /// every channel when `filter` is `None`.
    pub fn add<F>(&mut self, filter: Option<&str>, callback: F) -> Result<ListenerId>
    where
        F: FnMut(&Notification) + Send + 'static,
    {
        let filter = filter
            .map(|pattern| Regex::new(&format!("^(?:{})$", pattern)))
            .transpose()
            .map_err(|e| Error::InvalidUsage(format!("invalid channel filter: {}", e)))?;
        self.next_id += 1;
        let id = ListenerId(self.next_id);
        self.entries.push(Listener {
            id,
            filter,
            callback: Box::new(callback),
        });
        Ok(id)
    }

    /// Returns false when `id` was not registered.
    pub fn remove(&mut self, id: ListenerId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|l| l.id != id);
        self.entries.len() != before
    }

    /// Install or remove the notice sink. Without one, notices are logged.
    pub fn set_notice_handler(&mut self, handler: Option<NoticeHandler>) {
        self.notice = handler;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Deliver a notification or notice. Parameter changes are ignored here;
    /// the session applies them itself.
    pub fn dispatch(&mut self, msg: &AsyncMessage) {
        match msg {
            AsyncMessage::Notification {
                pid,
                channel,
                payload,
            } => {
                let notification = Notification {
                    pid: *pid,
                    channel: channel.clone(),
                    payload: payload.clone(),
                };
                self.notify(&notification);
            }
            AsyncMessage::Notice(notice) => match self.notice.as_mut() {
                Some(handler) => handler(notice),
                None => tracing::warn!(
                    severity = notice.severity().unwrap_or("NOTICE"),
                    code = notice.code().unwrap_or(""),
                    "{}",
                    notice.message()
                ),
            },
            AsyncMessage::ParameterChanged { .. } => {}
        }
    }

    fn notify(&mut self, notification: &Notification) {
        let mut delivered = false;
        for listener in &mut self.entries {
            let matches = listener
                .filter
                .as_ref()
                .is_none_or(|re| re.is_match(&notification.channel));
            if matches {
                (listener.callback)(notification);
                delivered = true;
            }
        }
        if !delivered {
            tracing::debug!(channel = %notification.channel, "notification with no listener");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    fn notification(channel: &str) -> AsyncMessage {
        AsyncMessage::Notification {
            pid: 42,
            channel: channel.into(),
            payload: "hello".into(),
        }
    }

    #[test]
    fn test_filter_matches_whole_channel() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut listeners = Listeners::new();
        let sink = Arc::clone(&seen);
        listeners
            .add(Some("orders_[0-9]+"), move |n| {
                sink.lock().unwrap().push(n.channel.clone());
            })
            .unwrap();

        listeners.dispatch(&notification("orders_12"));
        listeners.dispatch(&notification("orders_12_archive"));
        listeners.dispatch(&notification("x_orders_1"));

        assert_eq!(*seen.lock().unwrap(), vec!["orders_12".to_string()]);
    }

    #[test]
    fn test_remove_listener() {
        let count = Arc::new(Mutex::new(0));
        let mut listeners = Listeners::new();
        let sink = Arc::clone(&count);
        let id = listeners
            .add(None, move |_| *sink.lock().unwrap() += 1)
            .unwrap();
        listeners.dispatch(&notification("a"));
        assert!(listeners.remove(id));
        assert!(!listeners.remove(id));
        listeners.dispatch(&notification("a"));
        assert_eq!(*count.lock().unwrap(), 1);
    }

    #[test]
    fn test_notice_handler() {
        let seen = Arc::new(Mutex::new(None));
        let mut listeners = Listeners::new();
        let sink = Arc::clone(&seen);
        listeners.set_notice_handler(Some(Box::new(move |n: &ServerError| {
            *sink.lock().unwrap() = n.message.clone();
        })));
        listeners.dispatch(&AsyncMessage::Notice(ServerError {
            message: Some("table does not exist, skipping".into()),
            ..Default::default()
        }));
        assert_eq!(
            seen.lock().unwrap().as_deref(),
            Some("table does not exist, skipping")
        );
    }

    #[test]
    fn test_bad_filter_rejected() {
        let mut listeners = Listeners::new();
        assert!(listeners.add(Some("("), |_| {}).is_err());
        assert!(listeners.is_empty());
    }
}
