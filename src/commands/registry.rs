//! Ordered command table and matcher
//!
//! Entries are tried in registration order and the first hit wins, so exact
//! phrases must be registered ahead of any prefix entry that overlaps them.

use serde::{Deserialize, Serialize};

use crate::collab::TabController;

use super::utterance::{normalize, Utterance};

/// Side effect run for a matched command
pub type Handler = fn(&dyn TabController, Option<&str>);

/// Placeholder replaced by the captured argument in feedback templates
const ARGUMENT_PLACEHOLDER: &str = "{argument}";

/// How a trigger phrase is compared to an utterance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    /// Whole utterance equals the trigger
    Exact,
    /// Utterance starts with the trigger; the rest is the argument
    PrefixWithArgument,
}

/// One registered command
#[derive(Debug, Clone)]
pub struct CommandEntry {
    pub name: String,
    pub kind: MatchKind,
    pub trigger: String,
    pub description: String,
    pub handler: Handler,
    pub feedback: Option<String>,
}

impl CommandEntry {
    pub fn exact(name: &str, trigger: &str, description: &str, handler: Handler) -> Self {
        Self::new(name, MatchKind::Exact, trigger, description, handler)
    }

    pub fn prefix(name: &str, trigger: &str, description: &str, handler: Handler) -> Self {
        Self::new(name, MatchKind::PrefixWithArgument, trigger, description, handler)
    }

    fn new(
        name: &str,
        kind: MatchKind,
        trigger: &str,
        description: &str,
        handler: Handler,
    ) -> Self {
        Self {
            name: name.to_string(),
            kind,
            trigger: normalize(trigger),
            description: description.to_string(),
            handler,
            feedback: None,
        }
    }

    /// Attach a feedback template; `{argument}` is interpolated
    pub fn with_feedback(mut self, template: &str) -> Self {
        self.feedback = Some(template.to_string());
        self
    }

    /// Spoken feedback for this entry
    pub fn feedback_text(&self, argument: Option<&str>) -> String {
        match (&self.feedback, argument) {
            (Some(template), Some(arg)) => template.replace(ARGUMENT_PLACEHOLDER, arg),
            (Some(template), None) => template.clone(),
            (None, Some(arg)) => format!("{}: {}.", self.name, arg),
            (None, None) => format!("{}.", self.name),
        }
    }

    fn info(&self) -> CommandInfo {
        CommandInfo {
            name: self.name.clone(),
            kind: self.kind,
            trigger: self.trigger.clone(),
            description: self.description.clone(),
        }
    }
}

/// Result of a successful match
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandMatch<'a> {
    pub entry: &'a CommandEntry,
    pub argument: Option<String>,
}

/// Serializable view of an entry for the UI
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandInfo {
    pub name: String,
    pub kind: MatchKind,
    pub trigger: String,
    pub description: String,
}

/// Fixed, ordered command table
#[derive(Debug, Clone, Default)]
pub struct CommandRegistry {
    entries: Vec<CommandEntry>,
}

impl CommandRegistry {
    pub fn new(entries: Vec<CommandEntry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[CommandEntry] {
        &self.entries
    }

    pub fn describe(&self) -> Vec<CommandInfo> {
        self.entries.iter().map(CommandEntry::info).collect()
    }

    /// Match an utterance against the table
    pub fn match_utterance(&self, utterance: &Utterance) -> Option<CommandMatch<'_>> {
        let text = utterance.text();
        for entry in &self.entries {
            match entry.kind {
                MatchKind::Exact => {
                    if text == entry.trigger {
                        return Some(CommandMatch {
                            entry,
                            argument: None,
                        });
                    }
                }
                MatchKind::PrefixWithArgument => {
                    let Some(rest) = text.strip_prefix(entry.trigger.as_str()) else {
                        continue;
                    };
                    // "search fort" is not "search for" + "t"
                    if !rest.is_empty() && !rest.starts_with(' ') {
                        continue;
                    }
                    if rest.trim().is_empty() {
                        return None;
                    }
                    let words = entry.trigger.split_whitespace().count();
                    let argument = raw_argument(utterance.raw(), words).unwrap_or(rest.trim());
                    return Some(CommandMatch {
                        entry,
                        argument: Some(argument.to_string()),
                    });
                }
            }
        }
        None
    }
}

/// The raw transcript after its first `words` normalized words.
///
/// Keeps characters such as `+` or `#` that matter in a search query.
/// `None` when a raw token straddles the trigger and the argument.
fn raw_argument(raw: &str, words: usize) -> Option<&str> {
    let mut seen = 0;
    let mut rest = raw;
    while seen < words {
        let token_start = rest.trim_start();
        let end = token_start
            .find(char::is_whitespace)
            .unwrap_or(token_start.len());
        if end == 0 {
            return None;
        }
        seen += normalize(&token_start[..end]).split_whitespace().count();
        rest = &token_start[end..];
    }
    if seen != words {
        return None;
    }

    let argument = rest
        .trim()
        .trim_start_matches(|c: char| matches!(c, ':' | ',' | ';' | '-'))
        .trim_end_matches(|c: char| matches!(c, '.' | '!' | '?' | ',' | ';' | ':'))
        .trim();
    (!argument.is_empty()).then_some(argument)
}

impl PartialEq for CommandEntry {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.kind == other.kind && self.trigger == other.trigger
    }
}

impl Eq for CommandEntry {}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_: &dyn TabController, _: Option<&str>) {}

    fn registry() -> CommandRegistry {
        CommandRegistry::new(vec![
            CommandEntry::exact("Open Tab", "open tab", "Open a new tab", noop)
                .with_feedback("Opening a new tab."),
            CommandEntry::exact("Search Help", "search for help", "Show help", noop),
            CommandEntry::prefix("Search", "search for", "Search the web", noop)
                .with_feedback("Searching for {argument}."),
        ])
    }

    #[test]
    fn test_exact_match() {
        let registry = registry();
        let matched = registry.match_utterance(&Utterance::new("open tab")).unwrap();
        assert_eq!(matched.entry.name, "Open Tab");
        assert!(matched.argument.is_none());
    }

    #[test]
    fn test_exact_requires_whole_utterance() {
        assert!(registry()
            .match_utterance(&Utterance::new("open tab now"))
            .is_none());
    }

    #[test]
    fn test_prefix_captures_argument() {
        let registry = registry();
        let matched = registry
            .match_utterance(&Utterance::new("search for rust lifetimes"))
            .unwrap();
        assert_eq!(matched.entry.name, "Search");
        assert_eq!(matched.argument.as_deref(), Some("rust lifetimes"));
    }

    #[test]
    fn test_prefix_without_argument_is_no_match() {
        assert!(registry().match_utterance(&Utterance::new("search for")).is_none());
    }

    #[test]
    fn test_prefix_respects_word_boundary() {
        assert!(registry()
            .match_utterance(&Utterance::new("search fort knox"))
            .is_none());
    }

    #[test]
    fn test_earlier_exact_entry_wins_over_prefix() {
        let registry = registry();
        let matched = registry.match_utterance(&Utterance::new("search for help")).unwrap();
        assert_eq!(matched.entry.name, "Search Help");
    }

    #[test]
    fn test_argument_keeps_query_symbols() {
        let registry = registry();
        let matched = registry
            .match_utterance(&Utterance::new("Search for C++."))
            .unwrap();
        assert_eq!(matched.argument.as_deref(), Some("c++"));

        let matched = registry
            .match_utterance(&Utterance::new("search for: #rustlang"))
            .unwrap();
        assert_eq!(matched.argument.as_deref(), Some("#rustlang"));
    }

    #[test]
    fn test_argument_falls_back_to_normalized_text() {
        // "for-cats" is one raw token spanning trigger and argument
        let registry = registry();
        let matched = registry
            .match_utterance(&Utterance::new("search for-cats"))
            .unwrap();
        assert_eq!(matched.argument.as_deref(), Some("cats"));
    }

    #[test]
    fn test_unknown_phrase() {
        assert!(registry().match_utterance(&Utterance::new("make coffee")).is_none());
    }

    #[test]
    fn test_triggers_are_normalized_on_registration() {
        let entry = CommandEntry::exact("Close", "  Close Tab! ", "", noop);
        assert_eq!(entry.trigger, "close tab");
    }

    #[test]
    fn test_feedback_interpolation() {
        let registry = registry();
        let search = &registry.entries()[2];
        assert_eq!(search.feedback_text(Some("cats")), "Searching for cats.");
        let help = &registry.entries()[1];
        assert_eq!(help.feedback_text(None), "Search Help.");
    }

    #[test]
    fn test_describe_preserves_order() {
        let names: Vec<_> = registry().describe().into_iter().map(|c| c.name).collect();
        assert_eq!(names, ["Open Tab", "Search Help", "Search"]);
    }
}
