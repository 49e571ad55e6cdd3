//! Built-in tab navigation commands

use tracing::debug;

use crate::collab::{TabController, TabDirection};

use super::registry::{CommandEntry, CommandRegistry};

/// Page opened by "open tab"
pub const HOME_URL: &str = "https://www.google.com";

/// Query endpoint used by "search for"
pub const SEARCH_URL: &str = "https://www.google.com/search?q=";

/// The default command table, exact phrases first
pub fn builtin_registry() -> CommandRegistry {
    CommandRegistry::new(vec![
        CommandEntry::exact("Open Tab", "open tab", "Open a new tab", open_tab)
            .with_feedback("Opening a new tab."),
        CommandEntry::exact("Close Tab", "close tab", "Close the current tab", close_tab)
            .with_feedback("Closing the current tab."),
        CommandEntry::exact("Next Tab", "next tab", "Switch to the next tab", next_tab)
            .with_feedback("Switching to the next tab."),
        CommandEntry::exact(
            "Previous Tab",
            "previous tab",
            "Switch to the previous tab",
            previous_tab,
        )
        .with_feedback("Switching back to previous tab."),
        CommandEntry::prefix(
            "Search in New Tab",
            "search for",
            "Search for a query in a new tab",
            search_in_new_tab,
        )
        .with_feedback("Searching for {argument}."),
    ])
}

/// Build the search URL for a query
pub fn search_url(query: &str) -> String {
    format!("{SEARCH_URL}{}", urlencoding::encode(query))
}

fn open_tab(tabs: &dyn TabController, _: Option<&str>) {
    tabs.create_tab(HOME_URL);
}

fn close_tab(tabs: &dyn TabController, _: Option<&str>) {
    if let Some(tab) = tabs.query_active_tab() {
        debug!(id = tab.id, url = %tab.url, "closing active tab");
    }
    tabs.close_active_tab();
}

fn next_tab(tabs: &dyn TabController, _: Option<&str>) {
    tabs.cycle_tab(TabDirection::Next);
}

fn previous_tab(tabs: &dyn TabController, _: Option<&str>) {
    tabs.cycle_tab(TabDirection::Previous);
}

fn search_in_new_tab(tabs: &dyn TabController, query: Option<&str>) {
    if let Some(query) = query {
        tabs.create_tab(&search_url(query));
    }
}
