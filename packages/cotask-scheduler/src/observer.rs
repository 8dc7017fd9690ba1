//! Status channel to an external observer.
//!
//! Messages carry a single-character tag and are fire-and-forget: an observer
//! that fails to deliver must swallow the failure.

use serde::Serialize;
use std::cell::RefCell;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum StatusTag {
    /// Human-readable notice (`u`).
    Notice,
    /// Machine-readable state change (`S`).
    State,
}

impl StatusTag {
    pub fn as_char(self) -> char {
        match self {
            StatusTag::Notice => 'u',
            StatusTag::State => 'S',
        }
    }
}

impl fmt::Display for StatusTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

pub trait Observer {
    fn command(&self, tag: StatusTag, message: &str);
}

/// Forwards status messages to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl Observer for TracingObserver {
    fn command(&self, tag: StatusTag, message: &str) {
        tracing::info!(target: "cotask::observer", %tag, "{message}");
    }
}

/// Keeps every message in memory.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    messages: RefCell<Vec<(StatusTag, String)>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<(StatusTag, String)> {
        self.messages.borrow().clone()
    }

    /// Messages sent with `tag`, in order.
    pub fn tagged(&self, tag: StatusTag) -> Vec<String> {
        self.messages
            .borrow()
            .iter()
            .filter(|(sent, _)| *sent == tag)
            .map(|(_, message)| message.clone())
            .collect()
    }

    pub fn clear(&self) {
        self.messages.borrow_mut().clear();
    }
}

impl Observer for RecordingObserver {
    fn command(&self, tag: StatusTag, message: &str) {
        self.messages.borrow_mut().push((tag, message.to_string()));
    }
}
