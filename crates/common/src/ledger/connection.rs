use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::BoundedLog;

pub const CONNECTION_LOG_CAPACITY: usize = 200;
pub const CONNECTION_LOG_KEY: &str = "connection_log";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionKind {
    Connecting,
    Connected,
    Disconnected,
    Error,
    Response,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    ControlPlane,
    Server,
    Websocket,
    Sse,
}

impl fmt::Display for ConnectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionKind::Connecting => "connecting",
            ConnectionKind::Connected => "connected",
            ConnectionKind::Disconnected => "disconnected",
            ConnectionKind::Error => "error",
            ConnectionKind::Response => "response",
        };
        f.write_str(s)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Channel::ControlPlane => "control_plane",
            Channel::Server => "server",
            Channel::Websocket => "websocket",
            Channel::Sse => "sse",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionLogEntry {
    pub kind: ConnectionKind,
    pub channel: Channel,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default = "one")]
    pub repeat: u32,
}

fn one() -> u32 {
    1
}

/// Transport lifecycle log with head deduplication
#[derive(Debug, Clone)]
pub struct ConnectionLog {
    inner: BoundedLog<ConnectionLogEntry>,
}

impl Default for ConnectionLog {
    fn default() -> Self {
        Self::new(CONNECTION_LOG_CAPACITY)
    }
}

impl ConnectionLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: BoundedLog::new(capacity),
        }
    }

    pub fn restore(capacity: usize, entries: Vec<ConnectionLogEntry>) -> Self {
        Self {
            inner: BoundedLog::from_entries(capacity, entries),
        }
    }

    /// Append an entry, folding it into the head when kind, channel and
    /// message all match.
    pub fn record(
        &mut self,
        kind: ConnectionKind,
        channel: Channel,
        message: impl Into<String>,
        now: DateTime<Utc>,
    ) {
        let message = message.into();
        if let Some(head) = self.inner.front_mut() {
            if head.kind == kind && head.channel == channel && head.message == message {
                head.timestamp = now;
                head.repeat = head.repeat.saturating_add(1);
                return;
            }
        }
        self.inner.push_front(ConnectionLogEntry {
            kind,
            channel,
            message,
            timestamp: now,
            repeat: 1,
        });
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn entries(&self) -> Vec<ConnectionLogEntry> {
        self.inner.to_vec()
    }

    pub fn recent(&self, n: usize) -> Vec<ConnectionLogEntry> {
        self.inner.iter().take(n).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_head_dedup() {
        let mut log = ConnectionLog::default();
        log.record(ConnectionKind::Error, Channel::Sse, "stream ended", at(0));
        log.record(ConnectionKind::Error, Channel::Sse, "stream ended", at(5));
        assert_eq!(log.len(), 1);
        let head = &log.entries()[0];
        assert_eq!(head.repeat, 2);
        assert_eq!(head.timestamp, at(5));

        log.record(ConnectionKind::Connecting, Channel::Sse, "stream ended", at(6));
        log.record(ConnectionKind::Error, Channel::Sse, "stream ended", at(7));
        assert_eq!(log.len(), 3);
    }

    #[test]
    fn test_capacity() {
        let mut log = ConnectionLog::default();
        for i in 0..250 {
            log.record(ConnectionKind::Response, Channel::ControlPlane, format!("{}", i), at(i));
        }
        assert_eq!(log.len(), 200);
        assert_eq!(log.entries()[0].message, "249");
        assert_eq!(log.entries()[199].message, "50");
    }

    #[test]
    fn test_persisted_shape() {
        let mut log = ConnectionLog::default();
        log.record(ConnectionKind::Connected, Channel::ControlPlane, "ok", at(0));
        let json = serde_json::to_value(log.entries()).unwrap();
        assert_eq!(json[0]["channel"], "control_plane");
        assert_eq!(json[0]["kind"], "connected");
    }
}
