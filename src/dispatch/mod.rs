//! Dispatch of matched commands and feedback coordination

mod completion;
mod dispatcher;

pub use completion::{Completion, OutputUnavailable};
pub use dispatcher::{Dispatcher, NOTICE_TITLE, RETRY_PROMPT};
