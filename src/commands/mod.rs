//! Command table for voice navigation
//!
//! Holds the ordered registry of commands, the matcher that maps a
//! normalized utterance onto an entry, and the built-in tab commands.

mod builtin;
mod registry;
mod utterance;

pub use builtin::{builtin_registry, HOME_URL};
pub use registry::{CommandInfo, CommandMatch, CommandRegistry};
pub use utterance::{normalize, Utterance};
