//! Recognition session module
//!
//! Provides an explicit state machine with seven states:
//! - Idle: Created, waiting for start
//! - Listening: Engine running, waiting for a final transcript
//! - Armed: Wake token heard, next utterance is a command
//! - Finalizing: Debounce window open on the latest final transcript
//! - Acknowledging: Wake acknowledgment playing
//! - Dispatching: Command handled, feedback playing
//! - Stopped: Explicit teardown, terminal

mod handle;
mod machine;

pub use handle::{launch, SessionHandle, StartupError};
pub use machine::{FeedbackTicket, SessionConfig, SessionInput, State};
