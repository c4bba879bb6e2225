//! Outlook Web structure the client relies on.
//!
//! Outlook ships no stable hooks; these are ARIA roles, labels and a few
//! data attributes observed across UI versions. Keep them in one place.

/// Root snapshotted for page-wide searches.
pub const BODY: &str = "body";

/// The reading pane.
pub const READING_PANE: &str = "[role=\"main\"]";

/// Attribute carrying a conversation id on list rows.
pub const CONVERSATION_ID_ATTR: &str = "data-convid";

/// Full-page overlay shown while Outlook boots.
pub const LOADING_SCREEN_ID: &str = "loadingScreen";

/// Folder tree entry visible once the mailbox has loaded.
pub const INBOX_TREEITEM: &str = "Inbox";

pub const SEE_MORE_MESSAGES: &str = "See more messages";
pub const DOWNLOAD: &str = "download";
pub const REPLY: &str = "Reply";
pub const OPTIONS_TAB: &str = "Options";
pub const MESSAGE_TAB: &str = "Message";
pub const HOME_TAB: &str = "Home";
pub const SHOW_CC: &str = "Show Cc";
pub const CC_FIELD_LABEL: &str = "Cc";
pub const ATTACH: &str = "Attach";
pub const BROWSE_COMPUTER: &str = "browse this computer";
pub const CLOSE: &str = "Close";
pub const CANCEL: &str = "cancel";
pub const MOVE_TO: &str = "Move to";

/// Trailing button label Outlook appends to subject headings.
const SUMMARIZE_SUFFIX: &str = "Summarize";

/// Subject heading text minus Outlook's trailing "Summarize" control label.
pub fn clean_subject(raw: &str) -> String {
    let trimmed = raw.trim();
    trimmed
        .strip_suffix(SUMMARIZE_SUFFIX)
        .unwrap_or(trimmed)
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subject_cleanup() {
        assert_eq!(clean_subject("  Facture janvier Summarize "), "Facture janvier");
        assert_eq!(clean_subject("Summary of Q3"), "Summary of Q3");
        assert_eq!(clean_subject(""), "");
    }
}
