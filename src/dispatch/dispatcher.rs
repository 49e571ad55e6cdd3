//! Command dispatch and spoken feedback
//!
//! The dispatcher runs the matched handler, posts a notification, and speaks
//! feedback. Handlers are fire-and-continue: tab operations are not awaited
//! before the session resumes. Resumption is driven solely by the feedback
//! [`Completion`], which fires immediately when speech output is missing.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::collab::{Collaborators, Notifier, SpeechOutput, TabController};
use crate::commands::CommandMatch;
use crate::session::{FeedbackTicket, SessionHandle};

use super::completion::{Completion, OutputUnavailable};

/// Spoken when no command matched
pub const RETRY_PROMPT: &str = "Please try again.";

/// Title for executed-command notifications
pub const NOTIFICATION_TITLE: &str = "VANS Command:";

/// Title for fatal feature notices
pub const NOTICE_TITLE: &str = "VANS";

/// Outcome of one dispatch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchResult {
    /// Name of the matched entry
    pub command: Option<String>,
    pub argument: Option<String>,
    pub feedback: String,
    pub success: bool,
}

pub struct Dispatcher {
    session: SessionHandle,
    tabs: Arc<dyn TabController>,
    output: Option<Arc<dyn SpeechOutput>>,
    notifier: Arc<dyn Notifier>,
}

impl Dispatcher {
    /// Create a dispatcher bound to the session it resumes
    pub fn new(session: SessionHandle, collaborators: &Collaborators) -> Self {
        Self {
            session,
            tabs: Arc::clone(&collaborators.tabs),
            output: collaborators.output.clone(),
            notifier: Arc::clone(&collaborators.notifier),
        }
    }

    /// Execute a match (or report a miss) and speak feedback
    pub fn dispatch(
        &self,
        matched: Option<CommandMatch<'_>>,
        ticket: FeedbackTicket,
    ) -> DispatchResult {
        let result = match matched {
            Some(CommandMatch { entry, argument }) => {
                info!(command = %entry.name, ?argument, "dispatching command");
                (entry.handler)(self.tabs.as_ref(), argument.as_deref());

                let message = match &argument {
                    Some(arg) => format!("{}: {}", entry.name, arg),
                    None => entry.name.clone(),
                };
                self.notifier.display(NOTIFICATION_TITLE, &message);

                DispatchResult {
                    command: Some(entry.name.clone()),
                    feedback: entry.feedback_text(argument.as_deref()),
                    argument,
                    success: true,
                }
            }
            None => {
                info!("no command matched");
                DispatchResult {
                    command: None,
                    argument: None,
                    feedback: RETRY_PROMPT.to_string(),
                    success: false,
                }
            }
        };

        self.speak(&result.feedback, ticket);
        result
    }

    /// Speak the wake-word acknowledgment
    pub fn acknowledge(&self, text: &str, ticket: FeedbackTicket) {
        self.speak(text, ticket);
    }

    /// Surface a fatal condition to the user
    pub fn report(&self, message: &str) {
        self.notifier.display(NOTICE_TITLE, message);
    }

    fn speak(&self, text: &str, ticket: FeedbackTicket) {
        let completion = Completion::new(self.session.clone(), ticket);
        match &self.output {
            Some(output) => {
                debug!(%ticket, text, "speaking feedback");
                if let Err(OutputUnavailable(completion)) = output.speak(text, completion) {
                    warn!(%ticket, "speech output unavailable, resuming without feedback");
                    completion.complete();
                }
            }
            None => {
                debug!(%ticket, "no speech output, resuming immediately");
                completion.complete();
            }
        }
    }
}
