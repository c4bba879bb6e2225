//! Finds the most recent message not written by the operator.
//!
//! Outlook renders one "From" button per message header. Which attribute
//! carries the "From: Name <addr>" text varies between UI versions, and the
//! operator's own messages are labelled either with their address or with a
//! localized "you". Both concerns are ordered strategy lists below.

use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::config::ResolutionConfig;
use crate::dom::{Document, NodeId};

const FROM_PREFIX: &str = "From:";

/// How far up from a "From" button to look for the clickable message row.
const MAX_ROW_DEPTH: usize = 10;

static FROM_PREFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^From:\s*").expect("valid regex"));
static TRAILING_ADDRESS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]+>\s*$").expect("valid regex"));
static BRACKETED_EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<([^>@\s]+@[^>\s]+)>").expect("valid regex"));
static BARE_EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\w.+-]+@[\w.-]+\.\w+").expect("valid regex"));

// ── From-text extraction ────────────────────────────────────────────

/// Where an author indicator's "From: ..." text can come from, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FromTextSource {
    /// `aria-label` starting with `From:`.
    AriaLabel,
    /// `name` attribute starting with `From:`.
    NameAttr,
    /// Trimmed visible text, whatever it says.
    VisibleText,
}

impl FromTextSource {
    pub const ORDERED: [FromTextSource; 3] = [Self::AriaLabel, Self::NameAttr, Self::VisibleText];

    pub fn extract(self, doc: &Document, id: NodeId) -> Option<String> {
        let node = doc.node(id);
        match self {
            Self::AriaLabel => node
                .attr("aria-label")
                .filter(|v| v.starts_with(FROM_PREFIX))
                .map(str::to_string),
            Self::NameAttr => node
                .attr("name")
                .filter(|v| v.starts_with(FROM_PREFIX))
                .map(str::to_string),
            Self::VisibleText => Some(doc.visible_text(id)),
        }
    }
}

/// Run the ordered strategies and return the first hit.
pub fn derive_from_text(doc: &Document, id: NodeId) -> String {
    FromTextSource::ORDERED
        .iter()
        .find_map(|source| source.extract(doc, id))
        .unwrap_or_default()
}

/// A button whose derived from-text starts with `From:`.
pub fn is_author_indicator(doc: &Document, id: NodeId) -> bool {
    let node = doc.node(id);
    node.is_button() && derive_from_text(doc, id).starts_with(FROM_PREFIX)
}

// ── Ownership checks ────────────────────────────────────────────────

/// One message header, with everything the ownership checks look at.
#[derive(Debug, Clone)]
pub struct AuthorIndicator {
    pub node: NodeId,
    pub from_text: String,
    pub visible_text: String,
    /// First non-empty `data-email` on the indicator or inside it.
    pub data_email: Option<String>,
}

impl AuthorIndicator {
    pub fn read(doc: &Document, id: NodeId) -> Self {
        let data_email = std::iter::once(id)
            .chain(doc.descendants(id))
            .filter_map(|n| doc.node(n).attr("data-email"))
            .map(str::trim)
            .find(|v| !v.is_empty())
            .map(str::to_string);
        Self {
            node: id,
            from_text: derive_from_text(doc, id),
            visible_text: doc.visible_text(id),
            data_email,
        }
    }
}

/// Ways of recognizing the operator's own message, in precedence order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnershipCheck {
    DataEmail,
    FromTextAddress,
    SelfToken,
}

impl OwnershipCheck {
    pub const ORDERED: [OwnershipCheck; 3] =
        [Self::DataEmail, Self::FromTextAddress, Self::SelfToken];

    /// `operator` and `self_tokens` must already be lowercase.
    pub fn matches(self, indicator: &AuthorIndicator, operator: &str, self_tokens: &[String]) -> bool {
        match self {
            Self::DataEmail => indicator
                .data_email
                .as_deref()
                .is_some_and(|e| e.to_lowercase() == operator),
            Self::FromTextAddress => indicator.from_text.to_lowercase().contains(operator),
            Self::SelfToken => {
                let visible = indicator.visible_text.to_lowercase();
                self_tokens.iter().any(|t| *t == visible)
            }
        }
    }
}

// ── Resolver ────────────────────────────────────────────────────────

/// The message to answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSender {
    /// The message's author indicator.
    pub anchor: NodeId,
    pub last_name: String,
    pub email: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SenderResolver {
    operator_email: String,
    self_tokens: Vec<String>,
}

impl SenderResolver {
    pub fn new(operator_email: &str, config: &ResolutionConfig) -> Self {
        Self {
            operator_email: operator_email.trim().to_lowercase(),
            self_tokens: config
                .self_tokens
                .iter()
                .map(|t| t.trim().to_lowercase())
                .filter(|t| !t.is_empty())
                .collect(),
        }
    }

    /// All author indicators under `pane`, in document order.
    pub fn author_indicators(&self, doc: &Document, pane: NodeId) -> Vec<AuthorIndicator> {
        doc.find_all(pane, is_author_indicator)
            .into_iter()
            .map(|id| AuthorIndicator::read(doc, id))
            .collect()
    }

    pub fn is_own(&self, indicator: &AuthorIndicator) -> bool {
        OwnershipCheck::ORDERED
            .iter()
            .any(|check| check.matches(indicator, &self.operator_email, &self.self_tokens))
    }

    /// Most recent message under `pane` that is not the operator's own.
    pub fn resolve(&self, doc: &Document, pane: NodeId) -> Option<ResolvedSender> {
        let indicators = self.author_indicators(doc, pane);
        let total = indicators.len();
        let found = indicators.into_iter().rev().find(|ind| !self.is_own(ind))?;

        let email = found
            .data_email
            .clone()
            .or_else(|| extract_email(&found.visible_text))
            .or_else(|| extract_email(&found.from_text));

        let resolved = ResolvedSender {
            anchor: found.node,
            last_name: extract_last_name(&found.from_text),
            email,
        };
        debug!(
            indicators = total,
            last_name = %resolved.last_name,
            "Resolved sender"
        );
        Some(resolved)
    }
}

/// The element to click to expand a collapsed message whose header holds
/// `anchor`: the nearest focusable or pointer-cursor ancestor that is not
/// another "From" control, else the closest message-like container.
pub fn message_row(doc: &Document, anchor: NodeId) -> Option<NodeId> {
    let clickable = doc.ancestors(anchor).take(MAX_ROW_DEPTH).find(|id| {
        let node = doc.node(*id);
        let is_from = node
            .attr("aria-label")
            .is_some_and(|l| l.starts_with(FROM_PREFIX));
        !is_from && (node.attr("tabindex").is_some() || node.clickable)
    });
    clickable.or_else(|| {
        doc.ancestors(anchor).find(|id| {
            let node = doc.node(*id);
            node.attr("data-is-focusable") == Some("true")
                || node.has_role("listitem")
                || node.has_role("article")
        })
    })
}

// ── Pure text helpers ───────────────────────────────────────────────

/// Family name from a "From: ..." string.
///
/// Full-caps leading tokens are taken as the family name
/// (`DE LA TOUR Pierre` gives `DE LA TOUR`), otherwise the last token.
pub fn extract_last_name(from_text: &str) -> String {
    let name = FROM_PREFIX_RE.replace(from_text, "");
    let name = TRAILING_ADDRESS_RE.replace(&name, "");
    let parts: Vec<&str> = name.split_whitespace().collect();

    match parts.as_slice() {
        [] => "Unknown".to_string(),
        [only] => (*only).to_string(),
        _ => {
            let caps: Vec<&str> = parts
                .iter()
                .take_while(|p| p.chars().count() > 1 && p.to_uppercase() == **p)
                .copied()
                .collect();
            if caps.is_empty() {
                parts[parts.len() - 1].to_string()
            } else {
                caps.join(" ")
            }
        }
    }
}

/// First `<addr>` in `text`, else the first bare address.
pub fn extract_email(text: &str) -> Option<String> {
    if let Some(caps) = BRACKETED_EMAIL_RE.captures(text) {
        return Some(caps[1].to_string());
    }
    BARE_EMAIL_RE.find(text).map(|m| m.as_str().to_string())
}
