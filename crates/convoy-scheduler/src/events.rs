//! Progress events for the operator.
//!
//! Producers push into an unbounded channel and never block; a single
//! renderer task consumes the receiving end.

use std::fmt;

use tokio::sync::mpsc;

/// Why units are being stopped or destroyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Reason {
    /// Loaded but no longer desired.
    Obsolete,
    /// Content differs from the desired unit.
    Modified,
    /// Reported failed, or missing state.
    Failed,
    /// Explicit teardown of the whole job.
    Teardown,
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Obsolete => "obsolete",
            Self::Modified => "modified",
            Self::Failed => "failed",
            Self::Teardown => "teardown",
        })
    }
}

/// What happened to a unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitAction {
    Stopping(Reason),
    Stopped,
    Destroying(Reason),
    Destroyed,
    Creating,
    Launching,
    Running,
}

impl fmt::Display for UnitAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stopping(reason) => write!(f, "stopping ({reason})"),
            Self::Stopped => f.write_str("stopped"),
            Self::Destroying(reason) => write!(f, "destroying ({reason})"),
            Self::Destroyed => f.write_str("destroyed"),
            Self::Creating => f.write_str("creating"),
            Self::Launching => f.write_str("launching"),
            Self::Running => f.write_str("running"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Free form progress line.
    Message(String),
    Unit { unit: String, action: UnitAction },
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Message(message) => f.write_str(message),
            Self::Unit { unit, action } => write!(f, "{unit}: {action}"),
        }
    }
}

/// Sending half of the event stream.
#[derive(Debug, Clone, Default)]
pub struct Events {
    tx: Option<mpsc::UnboundedSender<Event>>,
}

impl Events {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// A sink that drops every event.
    pub fn discard() -> Self {
        Self::default()
    }

    pub fn send(&self, event: Event) {
        if let Some(tx) = &self.tx {
            // Renderer may already have exited.
            let _ = tx.send(event);
        }
    }

    pub fn message(&self, message: impl Into<String>) {
        self.send(Event::Message(message.into()));
    }

    pub fn unit(&self, unit: impl Into<String>, action: UnitAction) {
        self.send(Event::Unit {
            unit: unit.into(),
            action,
        });
    }
}
