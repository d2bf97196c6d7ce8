//! Callbacks a session reports progress and fatal events through.

use std::sync::Mutex;

use pistream_core::{Stage, TerminationCause};

/// Observer of one session.
///
/// Connection-originated callbacks (`stage_*`, `connection_*`) arrive on the
/// supervisor's notification task, one at a time and in order, with no
/// supervisor lock held. Implementations may block briefly but must not call
/// back into the supervisor synchronously expecting it to make progress.
pub trait ConnectionListener: Send + Sync {
    fn stage_starting(&self, stage: Stage);
    fn stage_complete(&self, stage: Stage);
    fn stage_failed(&self, stage: Stage);
    /// Every stage completed. Fires at most once.
    fn connection_started(&self);
    /// The session is over and every resource is released. Fires at most once.
    fn connection_terminated(&self, cause: &TerminationCause);

    fn display_message(&self, text: &str);
    fn display_transient_message(&self, text: &str) {
        self.display_message(text);
    }
    fn display_error(&self, title: &str, text: &str);
}

/// One recorded callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenerEvent {
    StageStarting(Stage),
    StageComplete(Stage),
    StageFailed(Stage),
    ConnectionStarted,
    ConnectionTerminated(TerminationCause),
    Message(String),
    TransientMessage(String),
    Error { title: String, text: String },
}

/// Listener that records every callback, for tests and embedders that poll.
#[derive(Debug, Default)]
pub struct RecordingListener {
    events: Mutex<Vec<ListenerEvent>>,
}

impl RecordingListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ListenerEvent> {
        self.lock().clone()
    }

    pub fn terminations(&self) -> usize {
        self.lock()
            .iter()
            .filter(|e| matches!(e, ListenerEvent::ConnectionTerminated(_)))
            .count()
    }

    pub fn errors(&self) -> Vec<(String, String)> {
        self.lock()
            .iter()
            .filter_map(|e| match e {
                ListenerEvent::Error { title, text } => Some((title.clone(), text.clone())),
                _ => None,
            })
            .collect()
    }

    fn record(&self, event: ListenerEvent) {
        self.lock().push(event);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<ListenerEvent>> {
        // a panicking test thread must not hide what was recorded
        self.events.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl ConnectionListener for RecordingListener {
    fn stage_starting(&self, stage: Stage) {
        self.record(ListenerEvent::StageStarting(stage));
    }

    fn stage_complete(&self, stage: Stage) {
        self.record(ListenerEvent::StageComplete(stage));
    }

    fn stage_failed(&self, stage: Stage) {
        self.record(ListenerEvent::StageFailed(stage));
    }

    fn connection_started(&self) {
        self.record(ListenerEvent::ConnectionStarted);
    }

    fn connection_terminated(&self, cause: &TerminationCause) {
        self.record(ListenerEvent::ConnectionTerminated(cause.clone()));
    }

    fn display_message(&self, text: &str) {
        self.record(ListenerEvent::Message(text.to_owned()));
    }

    fn display_transient_message(&self, text: &str) {
        self.record(ListenerEvent::TransientMessage(text.to_owned()));
    }

    fn display_error(&self, title: &str, text: &str) {
        self.record(ListenerEvent::Error { title: title.to_owned(), text: text.to_owned() });
    }
}
