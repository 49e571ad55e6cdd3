//! One-shot feedback completion
//!
//! A `Completion` resumes the recognition session after spoken feedback.
//! It fires at most once: explicitly through [`Completion::complete`], or
//! implicitly when dropped unfired, so a lost playback callback can never
//! leave the session paused.

use std::fmt;

use tracing::debug;

use crate::session::{FeedbackTicket, SessionHandle};

pub struct Completion {
    handle: Option<SessionHandle>,
    ticket: FeedbackTicket,
}

impl Completion {
    pub(crate) fn new(handle: SessionHandle, ticket: FeedbackTicket) -> Self {
        Self {
            handle: Some(handle),
            ticket,
        }
    }

    pub fn ticket(&self) -> FeedbackTicket {
        self.ticket
    }

    /// Signal that feedback playback finished
    pub fn complete(mut self) {
        self.fire();
    }

    fn fire(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.feedback_finished(self.ticket);
        }
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        if self.handle.is_some() {
            debug!(ticket = %self.ticket, "completion dropped before firing");
            self.fire();
        }
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("ticket", &self.ticket)
            .field("fired", &self.handle.is_none())
            .finish()
    }
}

/// Speech output could not start; carries the completion back unfired
#[derive(Debug, thiserror::Error)]
#[error("speech output unavailable")]
pub struct OutputUnavailable(pub Completion);
