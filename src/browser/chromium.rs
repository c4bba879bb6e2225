//! [`MailClient`] over the Chrome DevTools Protocol.
//!
//! Every lookup works the same way: snapshot a subtree, find the node with
//! the pure helpers in [`crate::dom`], then address the live element through
//! its snapshot handle. Waits re-snapshot on `poll_interval` until their
//! timeout.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::dom::{BackendNodeId, SetFileInputFilesParams};
use chromiumoxide::cdp::browser_protocol::fetch::{
    self, ContinueRequestParams, EventRequestPaused, FailRequestParams, RequestPattern,
};
use chromiumoxide::cdp::browser_protocol::input::{
    DispatchKeyEventParams, DispatchKeyEventType, DispatchMouseEventParams, DispatchMouseEventType,
    InsertTextParams, MouseButton,
};
use chromiumoxide::cdp::browser_protocol::network::ErrorReason;
use chromiumoxide::cdp::browser_protocol::page::{
    EventFileChooserOpened, SetInterceptFileChooserDialogParams,
};
use chromiumoxide::element::Element;
use chromiumoxide::error::CdpError;
use chromiumoxide::{Browser, BrowserConfig as CdpBrowserConfig, Page, keys};
use futures::StreamExt;
use tempfile::TempDir;
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::browser::selectors as sel;
use crate::browser::{Conversation, MailClient};
use crate::capture::page::{PageTransport, install_agent, spawn_listener};
use crate::capture::{BlobRelay, CredentialedFetcher, InterceptedRequest, SessionCookie};
use crate::config::{CaptureMode, RunConfig, Timing};
use crate::diagnostics::ScreenshotSink;
use crate::dom::{Document, NodeId, handle_selector, snapshot_expression};
use crate::error::{CaptureError, InteractionError, SessionError};
use crate::resolve::AttachmentEntry;
use crate::resolve::attachments::is_attachment_collection;
use crate::resolve::sender::message_row;

const CTRL: i64 = 2;
const META: i64 = 4;

/// Attempts at finding the attachments of a freshly expanded message.
const EXPAND_POLLS: u32 = 5;

/// Attempts at waiting for the compose body to go away after closing.
const CLOSE_POLLS: u32 = 20;
const CLOSE_POLL_INTERVAL: Duration = Duration::from_millis(200);

fn protocol(e: CdpError) -> InteractionError {
    InteractionError::Protocol(e.to_string())
}

fn session_protocol(e: CdpError) -> SessionError {
    SessionError::Protocol(e.to_string())
}

/// How attachment bytes leave the page.
enum Capture {
    Blob,
    Url(CredentialedFetcher),
}

pub struct ChromiumMailClient {
    browser: Mutex<Browser>,
    page: Page,
    relay: Arc<BlobRelay<PageTransport>>,
    capture: Capture,
    capture_timeout: Duration,
    timing: Timing,
    uploads: TempDir,
    tasks: Vec<JoinHandle<()>>,
}

// ── Session ─────────────────────────────────────────────────────────

impl ChromiumMailClient {
    /// Start the browser with the persistent profile, install the capture
    /// agent and open the mailbox.
    pub async fn launch(config: &RunConfig) -> Result<Self, SessionError> {
        let profile = config.browser.profile_dir();
        std::fs::create_dir_all(&profile).map_err(|e| SessionError::Launch(e.to_string()))?;

        let mut builder = CdpBrowserConfig::builder()
            .user_data_dir(&profile)
            .window_size(1280, 900);
        if !config.browser.headless {
            builder = builder.with_head();
        }
        let cdp_config = builder.build().map_err(SessionError::Launch)?;

        let (browser, mut handler) = Browser::launch(cdp_config)
            .await
            .map_err(|e| SessionError::Launch(e.to_string()))?;
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
            warn!("Browser event loop exited");
        });

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(session_protocol)?;

        install_agent(&page, config.capture.retention)
            .await
            .map_err(session_protocol)?;
        let relay = Arc::new(BlobRelay::new(
            PageTransport::new(page.clone()),
            config.capture.timeout,
        ));
        let listener_task = spawn_listener(&page, relay.clone())
            .await
            .map_err(session_protocol)?;

        let capture = match &config.capture.mode {
            CaptureMode::Blob => Capture::Blob,
            CaptureMode::Url { pattern } => Capture::Url(
                CredentialedFetcher::new(pattern, config.capture.timeout)
                    .map_err(|e| SessionError::Launch(e.to_string()))?,
            ),
        };

        let uploads = tempfile::Builder::new()
            .prefix("mailsign-uploads")
            .tempdir()
            .map_err(|e| SessionError::Launch(e.to_string()))?;

        info!(url = %config.browser.mail_url, profile = %profile.display(), "Opening mailbox");
        page.goto(config.browser.mail_url.as_str())
            .await
            .map_err(session_protocol)?;

        let client = Self {
            browser: Mutex::new(browser),
            page,
            relay,
            capture,
            capture_timeout: config.capture.timeout,
            timing: config.timing.clone(),
            uploads,
            tasks: vec![handler_task, listener_task],
        };
        client.wait_for_login(config.browser.login_timeout).await?;
        Ok(client)
    }

    /// Wait until the folder tree shows, giving the operator time to sign in.
    pub async fn wait_for_login(&self, timeout: Duration) -> Result<(), SessionError> {
        if self.find_now(sel::BODY, inbox_item).await.ok().flatten().is_none() {
            info!(timeout_secs = timeout.as_secs(), "Waiting for login in the browser window");
        }
        let poll = self.timing.poll_interval.max(Duration::from_secs(1));
        self.wait_for_every(sel::BODY, "the mailbox", timeout, poll, inbox_item)
            .await
            .map_err(|e| match e {
                InteractionError::Timeout { timeout, .. } => SessionError::LoginTimeout(timeout),
                other => SessionError::Protocol(other.to_string()),
            })?;

        let loading = self
            .wait_for(sel::BODY, "the loading screen to clear", self.timing.loading_screen, |doc| {
                let shown = doc
                    .find_first(doc.root(), |d, id| d.node(id).attr("id") == Some(sel::LOADING_SCREEN_ID))
                    .is_some_and(|id| !doc.node(id).hidden);
                (!shown).then(|| doc.root())
            })
            .await;
        if let Err(e) = loading {
            warn!(error = %e, "Continuing with the loading screen still up");
        }
        info!("Logged in");
        Ok(())
    }

    /// Open a folder from the navigation tree.
    pub async fn open_folder(&self, name: &str) -> Result<(), SessionError> {
        let (doc, item) = self
            .wait_for(sel::BODY, name, self.timing.element_visible, |doc| {
                doc.find_by_role(doc.root(), "treeitem", name)
            })
            .await
            .map_err(|_| SessionError::FolderNotFound(name.to_string()))?;
        self.click(&doc, item).await.map_err(|e| SessionError::Protocol(e.to_string()))?;

        let rows = self
            .wait_for(sel::BODY, "conversation rows", self.timing.element_visible, |doc| {
                doc.find_first(doc.root(), |d, id| d.node(id).attr(sel::CONVERSATION_ID_ATTR).is_some())
            })
            .await;
        if rows.is_err() {
            warn!(folder = name, "No conversation rows appeared; folder may be empty");
        }
        info!(folder = name, "Folder opened");
        Ok(())
    }

    /// Screenshot sink writing into `dir`.
    pub fn diagnostics(&self, dir: PathBuf) -> ScreenshotSink {
        ScreenshotSink::new(self.page.clone(), dir)
    }

    /// Fail outstanding capture requests and shut the browser down.
    pub async fn close(self) {
        self.relay.close().await;
        let mut browser = self.browser.lock().await;
        if let Err(e) = browser.close().await {
            warn!(error = %e, "Browser did not close cleanly");
        }
        for task in &self.tasks {
            task.abort();
        }
        debug!("Browser session closed");
    }
}

fn inbox_item(doc: &Document) -> Option<NodeId> {
    doc.find_by_role(doc.root(), "treeitem", sel::INBOX_TREEITEM)
}

// ── Low-level page access ───────────────────────────────────────────

impl ChromiumMailClient {
    async fn snapshot(&self, root: &str) -> Result<Option<Document>, InteractionError> {
        let json: Option<String> = self
            .page
            .evaluate(snapshot_expression(root))
            .await
            .map_err(protocol)?
            .into_value()
            .map_err(|e| InteractionError::Snapshot(e.to_string()))?;
        json.map(|j| Document::from_json(&j))
            .transpose()
            .map_err(|e| InteractionError::Snapshot(e.to_string()))
    }

    async fn snapshot_required(&self, root: &str) -> Result<Document, InteractionError> {
        self.snapshot(root)
            .await?
            .ok_or_else(|| InteractionError::NotFound(root.to_string()))
    }

    /// One look, no waiting.
    async fn find_now(
        &self,
        root: &str,
        find: impl Fn(&Document) -> Option<NodeId>,
    ) -> Result<Option<(Document, NodeId)>, InteractionError> {
        Ok(self
            .snapshot(root)
            .await?
            .and_then(|doc| find(&doc).map(|id| (doc, id))))
    }

    async fn wait_for(
        &self,
        root: &str,
        what: &str,
        timeout: Duration,
        find: impl Fn(&Document) -> Option<NodeId>,
    ) -> Result<(Document, NodeId), InteractionError> {
        self.wait_for_every(root, what, timeout, self.timing.poll_interval, find)
            .await
    }

    async fn wait_for_every(
        &self,
        root: &str,
        what: &str,
        timeout: Duration,
        poll: Duration,
        find: impl Fn(&Document) -> Option<NodeId>,
    ) -> Result<(Document, NodeId), InteractionError> {
        let started = Instant::now();
        loop {
            if let Some(found) = self.find_now(root, &find).await? {
                return Ok(found);
            }
            if started.elapsed() >= timeout {
                return Err(InteractionError::Timeout {
                    what: what.to_string(),
                    timeout,
                });
            }
            tokio::time::sleep(poll).await;
        }
    }

    async fn element(&self, doc: &Document, id: NodeId) -> Result<Element, InteractionError> {
        let handle = doc
            .handle(id)
            .ok_or_else(|| InteractionError::NotFound(format!("<{}> without handle", doc.node(id).tag)))?;
        self.element_by_handle(handle).await
    }

    async fn element_by_handle(&self, handle: &str) -> Result<Element, InteractionError> {
        self.page
            .find_element(handle_selector(handle))
            .await
            .map_err(|e| InteractionError::NotFound(format!("element {handle}: {e}")))
    }

    async fn click(&self, doc: &Document, id: NodeId) -> Result<(), InteractionError> {
        self.element(doc, id).await?.click().await.map_err(protocol)?;
        Ok(())
    }

    async fn right_click(&self, element: &Element) -> Result<(), InteractionError> {
        element.scroll_into_view().await.map_err(protocol)?;
        let point = element.clickable_point().await.map_err(protocol)?;
        for kind in [DispatchMouseEventType::MousePressed, DispatchMouseEventType::MouseReleased] {
            let event = DispatchMouseEventParams::builder()
                .r#type(kind)
                .button(MouseButton::Right)
                .x(point.x)
                .y(point.y)
                .click_count(1)
                .build()
                .map_err(InteractionError::Protocol)?;
            self.page.execute(event).await.map_err(protocol)?;
        }
        Ok(())
    }

    async fn press_key(&self, key: &str, modifiers: i64) -> Result<(), InteractionError> {
        let def = keys::get_key_definition(key)
            .ok_or_else(|| InteractionError::Protocol(format!("unsupported key {key}")))?;

        let mut cmd = DispatchKeyEventParams::builder()
            .key(def.key)
            .code(def.code)
            .windows_virtual_key_code(def.key_code)
            .native_virtual_key_code(def.key_code)
            .modifiers(modifiers);
        // Shortcuts must not insert their character.
        let down_type = match def.text {
            Some(text) if modifiers == 0 => {
                cmd = cmd.text(text);
                DispatchKeyEventType::KeyDown
            }
            _ => DispatchKeyEventType::RawKeyDown,
        };

        let down = cmd
            .clone()
            .r#type(down_type)
            .build()
            .map_err(InteractionError::Protocol)?;
        self.page.execute(down).await.map_err(protocol)?;
        let up = cmd
            .r#type(DispatchKeyEventType::KeyUp)
            .build()
            .map_err(InteractionError::Protocol)?;
        self.page.execute(up).await.map_err(protocol)?;
        Ok(())
    }

    async fn insert_text(&self, text: &str) -> Result<(), InteractionError> {
        self.page
            .execute(InsertTextParams::new(text))
            .await
            .map_err(protocol)?;
        Ok(())
    }

    async fn pause(&self, duration: Duration) {
        if !duration.is_zero() {
            tokio::time::sleep(duration).await;
        }
    }

    async fn click_conversation(&self, conversation_id: &str) -> Result<(), InteractionError> {
        let (doc, row) = self
            .find_now(sel::BODY, |doc| conversation_row(doc, conversation_id))
            .await?
            .ok_or_else(|| InteractionError::ConversationNotFound(conversation_id.to_string()))?;
        self.click(&doc, row).await
    }
}

fn conversation_row(doc: &Document, conversation_id: &str) -> Option<NodeId> {
    doc.find_first(doc.root(), |d, id| {
        d.node(id).attr(sel::CONVERSATION_ID_ATTR) == Some(conversation_id)
    })
}

fn compose_body(doc: &Document) -> Option<NodeId> {
    doc.find_first(doc.root(), |d, id| {
        let node = d.node(id);
        node.has_role("textbox") && node.attr("contenteditable") == Some("true")
    })
}

/// A button labelled exactly `label`, else any button whose name contains it.
fn labelled_button(doc: &Document, label: &str) -> Option<NodeId> {
    doc.find_first(doc.root(), |d, id| {
        let node = d.node(id);
        !node.hidden
            && node.is_button()
            && (node.attr("aria-label") == Some(label) || node.attr("name") == Some(label))
    })
    .or_else(|| doc.find_button(doc.root(), label))
}

/// File input for documents: the first not restricted to images, else the last.
fn document_file_input(doc: &Document) -> Option<NodeId> {
    let inputs = doc.find_all(doc.root(), |d, id| {
        let node = d.node(id);
        node.tag == "input" && node.attr("type") == Some("file")
    });
    inputs
        .iter()
        .copied()
        .find(|id| {
            !doc.node(*id)
                .attr("accept")
                .is_some_and(|a| a.starts_with("image/"))
        })
        .or_else(|| inputs.last().copied())
}

/// The `<input type=file>` behind an intercepted chooser, if it had one.
fn chooser_input(event: Option<&EventFileChooserOpened>) -> Option<BackendNodeId> {
    event.and_then(|e| e.backend_node_id)
}

/// Keep only characters safe in a single path component.
fn upload_name(filename: &str) -> String {
    filename
        .chars()
        .map(|c| if matches!(c, '/' | '\\' | '\0') { '_' } else { c })
        .collect()
}

fn header_pairs(headers: &serde_json::Value) -> Vec<(String, String)> {
    headers
        .as_object()
        .map(|map| {
            map.iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

// ── Attachment download triggers ────────────────────────────────────

impl ChromiumMailClient {
    /// Right-click the entry and pick "Download" from its context menu.
    async fn download_from_menu(&self, handle: &str) -> Result<bool, InteractionError> {
        let entry = self.element_by_handle(handle).await?;
        self.right_click(&entry).await?;
        self.pause(self.timing.menu_animation).await;

        let item = self
            .wait_for(sel::BODY, "the download menu item", self.timing.download_menu, |doc| {
                doc.find_by_role(doc.root(), "menuitem", sel::DOWNLOAD)
            })
            .await;
        match item {
            Ok((doc, id)) => {
                self.click(&doc, id).await?;
                Ok(true)
            }
            Err(InteractionError::Timeout { .. }) => {
                self.press_key("Escape", 0).await?;
                self.pause(self.timing.menu_animation).await;
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Open the entry's preview and use its Download button.
    async fn download_from_preview(&self, handle: &str) -> Result<bool, InteractionError> {
        self.element_by_handle(handle)
            .await?
            .click()
            .await
            .map_err(protocol)?;
        self.pause(self.timing.content_load + self.timing.ui_settle).await;

        let button = self
            .wait_for(sel::BODY, "the preview download button", self.timing.download_menu, |doc| {
                doc.find_first(doc.root(), |d, id| {
                    let node = d.node(id);
                    node.tag == "button"
                        && !node.hidden
                        && node.attr("aria-label").is_some_and(|l| l.contains("Download"))
                })
            })
            .await;
        match button {
            Ok((doc, id)) => {
                self.click(&doc, id).await?;
                Ok(true)
            }
            Err(InteractionError::Timeout { .. }) => {
                self.press_key("Escape", 0).await?;
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    async fn capture_blob(&self, entry: &AttachmentEntry, handle: &str) -> Result<Vec<u8>, CaptureError> {
        let stale = self.relay.drain_captures().await;
        if stale > 0 {
            debug!(stale, "Dropped stale capture notifications");
        }

        if self.download_from_menu(handle).await? {
            match self.relay.next_capture(self.capture_timeout).await {
                Ok(key) => return self.relay.fetch(&key).await,
                Err(e) => warn!(entry = %entry.name, error = %e, "Menu download produced nothing, trying preview"),
            }
        }

        if self.download_from_preview(handle).await? {
            let result = match self.relay.next_capture(self.capture_timeout).await {
                Ok(key) => self.relay.fetch(&key).await,
                Err(e) => Err(e),
            };
            self.press_key("Escape", 0).await?;
            self.pause(self.timing.menu_animation).await;
            return result;
        }

        Err(CaptureError::NoDownloadControl(entry.name.clone()))
    }

    async fn capture_url(
        &self,
        entry: &AttachmentEntry,
        handle: &str,
        fetcher: &CredentialedFetcher,
    ) -> Result<Vec<u8>, CaptureError> {
        let mut paused = self
            .page
            .event_listener::<EventRequestPaused>()
            .await
            .map_err(protocol)?;
        let (found_tx, found_rx) = oneshot::channel();
        let page = self.page.clone();
        let matcher = fetcher.clone();

        // Everything pauses while interception is on; release all but the download.
        let interceptor = tokio::spawn(async move {
            let mut found_tx = Some(found_tx);
            while let Some(event) = paused.next().await {
                let request_id = event.request_id.clone();
                if found_tx.is_some() && matcher.matches(&event.request.url) {
                    let headers = serde_json::to_value(&event.request.headers).unwrap_or_default();
                    let _ = page
                        .execute(FailRequestParams::new(request_id, ErrorReason::Aborted))
                        .await;
                    if let Some(tx) = found_tx.take() {
                        let _ = tx.send(InterceptedRequest {
                            url: event.request.url.clone(),
                            headers: header_pairs(&headers),
                        });
                    }
                } else {
                    let _ = page.execute(ContinueRequestParams::new(request_id)).await;
                }
            }
        });

        let enable = fetch::EnableParams::builder()
            .pattern(RequestPattern::builder().url_pattern("*").build())
            .build();
        let outcome: Result<InterceptedRequest, CaptureError> = async {
            self.page.execute(enable).await.map_err(protocol)?;
            let triggered = self.download_from_menu(handle).await?
                || self.download_from_preview(handle).await?;
            if !triggered {
                return Err(CaptureError::NoDownloadControl(entry.name.clone()));
            }
            match tokio::time::timeout(self.capture_timeout, found_rx).await {
                Ok(Ok(request)) => Ok(request),
                Ok(Err(_)) => Err(CaptureError::Closed),
                Err(_) => Err(CaptureError::Timeout {
                    what: format!("download request for {}", entry.name),
                    timeout: self.capture_timeout,
                }),
            }
        }
        .await;

        if let Err(e) = self.page.execute(fetch::DisableParams::default()).await {
            warn!(error = %e, "Could not disable request interception");
        }
        interceptor.abort();
        let request = outcome?;

        let cookies: Vec<SessionCookie> = self
            .page
            .get_cookies()
            .await
            .map_err(protocol)?
            .into_iter()
            .map(|c| SessionCookie {
                name: c.name,
                value: c.value,
            })
            .collect();
        debug!(url = %request.url, cookies = cookies.len(), "Replaying attachment download");
        fetcher.fetch(&request, &cookies).await
    }
}

// ── MailClient ──────────────────────────────────────────────────────

#[async_trait]
impl MailClient for ChromiumMailClient {
    async fn list_conversations(&self) -> Result<Vec<Conversation>, InteractionError> {
        let doc = self.snapshot_required(sel::BODY).await?;
        let mut seen = std::collections::HashSet::new();
        let conversations: Vec<Conversation> = doc
            .find_all(doc.root(), |d, id| d.node(id).attr(sel::CONVERSATION_ID_ATTR).is_some())
            .into_iter()
            .filter_map(|id| doc.node(id).attr(sel::CONVERSATION_ID_ATTR))
            .filter(|cid| !cid.is_empty() && seen.insert(cid.to_string()))
            .enumerate()
            .map(|(position, cid)| Conversation {
                id: cid.to_string(),
                position,
            })
            .collect();
        debug!(count = conversations.len(), "Listed conversations");
        Ok(conversations)
    }

    async fn dismiss_menus(&self) -> Result<(), InteractionError> {
        self.press_key("Escape", 0).await?;
        self.pause(self.timing.menu_animation).await;
        Ok(())
    }

    async fn select_conversation(&self, conversation: &Conversation) -> Result<String, InteractionError> {
        self.click_conversation(&conversation.id).await?;
        self.pause(self.timing.content_load).await;

        let heading = self
            .wait_for(sel::READING_PANE, "the subject heading", self.timing.element_visible, |doc| {
                doc.find_first(doc.root(), |d, id| {
                    let node = d.node(id);
                    node.has_role("heading") && node.attr("aria-level") == Some("2")
                })
            })
            .await;
        match heading {
            Ok((doc, id)) => Ok(sel::clean_subject(&doc.text_content(id))),
            Err(InteractionError::Timeout { .. }) => {
                warn!(conversation = %conversation.id, "No subject heading in reading pane");
                Ok(String::new())
            }
            Err(e) => Err(e),
        }
    }

    async fn expand_thread_step(&self) -> Result<bool, InteractionError> {
        let found = self
            .find_now(sel::READING_PANE, |doc| doc.find_button(doc.root(), sel::SEE_MORE_MESSAGES))
            .await?;
        match found {
            Some((doc, id)) => {
                self.click(&doc, id).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn reading_pane(&self) -> Result<Document, InteractionError> {
        self.snapshot_required(sel::READING_PANE).await
    }

    async fn expand_message(&self, pane: &Document, anchor: NodeId) -> Result<(), InteractionError> {
        if let Some(row) = message_row(pane, anchor) {
            self.click(pane, row).await?;
        }
        let Some(anchor_handle) = pane.handle(anchor).map(str::to_string) else {
            return Ok(());
        };

        for _ in 0..EXPAND_POLLS {
            self.pause(self.timing.content_load).await;
            let Some(doc) = self.snapshot(sel::READING_PANE).await? else {
                continue;
            };
            let Some(anchor) = doc.find_first(doc.root(), |d, id| d.handle(id) == Some(anchor_handle.as_str()))
            else {
                continue;
            };
            let rendered = doc
                .find_first(doc.root(), |d, id| d.follows(anchor, id) && is_attachment_collection(d, id))
                .is_some();
            if rendered {
                break;
            }
        }
        Ok(())
    }

    async fn capture_attachment(&self, entry: &AttachmentEntry) -> Result<Vec<u8>, CaptureError> {
        let handle = entry
            .handle
            .as_deref()
            .ok_or_else(|| CaptureError::NoDownloadControl(entry.name.clone()))?;
        match &self.capture {
            Capture::Blob => self.capture_blob(entry, handle).await,
            Capture::Url(fetcher) => self.capture_url(entry, handle, fetcher).await,
        }
    }

    async fn open_reply(&self, conversation_id: &str) -> Result<(), InteractionError> {
        self.click_conversation(conversation_id).await?;
        self.pause(self.timing.content_load).await;

        let (doc, reply) = self
            .wait_for(sel::BODY, "the Reply button", self.timing.element_visible, |doc| {
                labelled_button(doc, sel::REPLY)
            })
            .await?;
        self.click(&doc, reply).await?;

        self.wait_for(sel::BODY, "the compose body", self.timing.element_visible, compose_body)
            .await?;
        self.pause(self.timing.ui_settle).await;
        Ok(())
    }

    async fn add_cc(&self, recipients: &[String]) -> Result<(), InteractionError> {
        if recipients.is_empty() {
            return Ok(());
        }

        let (doc, options) = self
            .wait_for(sel::BODY, "the Options tab", self.timing.element_visible, |doc| {
                doc.find_by_role(doc.root(), "tab", sel::OPTIONS_TAB)
            })
            .await?;
        self.click(&doc, options).await?;
        self.pause(self.timing.menu_animation).await;

        let (doc, checkbox) = self
            .wait_for(sel::BODY, "the Show Cc checkbox", self.timing.cc_checkbox, |doc| {
                doc.find_first(doc.root(), |d, id| {
                    let node = d.node(id);
                    let is_checkbox = node.has_role("checkbox")
                        || (node.tag == "input" && node.attr("type") == Some("checkbox"));
                    is_checkbox && d.matches_name(id, sel::SHOW_CC)
                })
            })
            .await?;
        if !doc.node(checkbox).checked {
            self.click(&doc, checkbox).await?;
            self.pause(self.timing.ui_settle).await;
        }

        if let Some((doc, tab)) = self
            .find_now(sel::BODY, |doc| doc.find_by_role(doc.root(), "tab", sel::MESSAGE_TAB))
            .await?
        {
            self.click(&doc, tab).await?;
            self.pause(self.timing.menu_animation).await;
        }

        let (doc, field) = self
            .wait_for(sel::BODY, "the Cc field", self.timing.cc_field, |doc| {
                doc.find_first(doc.root(), |d, id| d.node(id).attr("aria-label") == Some(sel::CC_FIELD_LABEL))
            })
            .await?;
        self.click(&doc, field).await?;
        self.insert_text(&recipients.join("; ")).await?;
        self.press_key("Tab", 0).await?;
        self.pause(self.timing.ui_settle).await;
        debug!(count = recipients.len(), "Cc recipients added");
        Ok(())
    }

    async fn attach_file(&self, filename: &str, bytes: &[u8]) -> Result<(), InteractionError> {
        let path = self.uploads.path().join(upload_name(filename));
        tokio::fs::write(&path, bytes).await?;

        // No native dialog: the input is filled directly.
        self.page
            .execute(SetInterceptFileChooserDialogParams::new(true))
            .await
            .map_err(protocol)?;

        let result = async {
            let (doc, attach) = self
                .wait_for(sel::BODY, "the Attach button", self.timing.element_visible, |doc| {
                    doc.find_button(doc.root(), sel::ATTACH)
                })
                .await?;
            self.click(&doc, attach).await?;
            self.pause(self.timing.menu_animation).await;

            let (doc, browse) = self
                .wait_for(sel::BODY, "the browse menu item", self.timing.element_visible, |doc| {
                    doc.find_by_role(doc.root(), "menuitem", sel::BROWSE_COMPUTER)
                })
                .await?;
            let mut choosers = self
                .page
                .event_listener::<EventFileChooserOpened>()
                .await
                .map_err(protocol)?;
            self.click(&doc, browse).await?;

            let opened = tokio::time::timeout(self.timing.file_chooser, choosers.next())
                .await
                .ok()
                .flatten();
            let target = match chooser_input(opened.as_deref()) {
                Some(id) => id,
                None => {
                    debug!("No file chooser event; looking for a file input");
                    let (doc, input) = self
                        .find_now(sel::BODY, document_file_input)
                        .await?
                        .ok_or_else(|| InteractionError::Timeout {
                            what: "the file chooser".to_string(),
                            timeout: self.timing.file_chooser,
                        })?;
                    self.element(&doc, input).await?.backend_node_id
                }
            };
            let params = SetFileInputFilesParams::builder()
                .file(path.display().to_string())
                .backend_node_id(target)
                .build()
                .map_err(InteractionError::Protocol)?;
            self.page.execute(params).await.map_err(protocol)?;

            let chip = self
                .wait_for(sel::BODY, "the attachment chip", self.timing.upload_complete, |doc| {
                    doc.find_first(doc.root(), |d, id| {
                        d.node(id).attr("class").is_some_and(|c| c.contains("attachment"))
                            && !d.visible_text(id).is_empty()
                    })
                })
                .await;
            if chip.is_err() {
                debug!(filename, "No attachment chip seen; continuing");
            }

            let prompt = self
                .find_now(sel::BODY, |doc| {
                    doc.find_last(doc.root(), |d, id| {
                        let node = d.node(id);
                        node.has_role("button") && node.attr("aria-label") == Some(sel::CLOSE)
                    })
                })
                .await?;
            if let Some((doc, close)) = prompt {
                if let Err(e) = self.click(&doc, close).await {
                    debug!(error = %e, "Ignoring failed prompt close");
                }
                self.pause(self.timing.ui_settle).await;
            }
            Ok::<(), InteractionError>(())
        }
        .await;

        let _ = self
            .page
            .execute(SetInterceptFileChooserDialogParams::new(false))
            .await;
        if let Err(e) = tokio::fs::remove_file(&path).await {
            debug!(error = %e, "Upload copy not removed");
        }
        if result.is_ok() {
            debug!(filename, bytes = bytes.len(), "File attached");
        }
        result
    }

    async fn type_message(&self, body: &str) -> Result<(), InteractionError> {
        let (doc, textbox) = self
            .wait_for(sel::BODY, "the compose body", self.timing.element_visible, compose_body)
            .await?;
        self.element(&doc, textbox).await?.focus().await.map_err(protocol)?;
        self.insert_text(body).await
    }

    async fn save_draft(&self) -> Result<(), InteractionError> {
        let modifier = if cfg!(target_os = "macos") { META } else { CTRL };
        self.press_key("s", modifier).await?;
        self.pause(self.timing.content_load).await;
        Ok(())
    }

    async fn close_compose(&self) -> Result<(), InteractionError> {
        self.press_key("Escape", 0).await?;
        self.pause(self.timing.ui_settle).await;

        // A discard prompt means the save did not land; keep the draft.
        let cancel = self
            .find_now(sel::BODY, |doc| {
                let dialog = doc.find_first(doc.root(), |d, id| d.node(id).has_role("dialog"))?;
                doc.find_first(dialog, |d, id| {
                    d.node(id).tag == "button" && d.text_content(id).to_lowercase().contains(sel::CANCEL)
                })
            })
            .await?;
        if let Some((doc, button)) = cancel {
            self.click(&doc, button).await?;
            self.pause(self.timing.ui_settle).await;
        }

        if let Some((doc, home)) = self
            .find_now(sel::BODY, |doc| doc.find_by_role(doc.root(), "tab", sel::HOME_TAB))
            .await?
        {
            self.click(&doc, home).await?;
            self.pause(self.timing.ui_settle).await;
        }

        for _ in 0..CLOSE_POLLS {
            if self.find_now(sel::BODY, compose_body).await?.is_none() {
                break;
            }
            tokio::time::sleep(CLOSE_POLL_INTERVAL).await;
        }
        Ok(())
    }

    async fn move_to_folder(&self, conversation_id: &str, folder: &str) -> Result<(), InteractionError> {
        self.click_conversation(conversation_id).await?;

        let (doc, move_to) = self
            .wait_for(sel::BODY, "the Move to button", self.timing.element_visible, |doc| {
                doc.find_button(doc.root(), sel::MOVE_TO)
            })
            .await?;
        self.click(&doc, move_to).await?;

        let (doc, item) = self
            .wait_for(sel::BODY, folder, self.timing.move_menu, |doc| {
                doc.find_by_role(doc.root(), "menuitem", folder)
            })
            .await?;
        self.click(&doc, item).await?;
        self.pause(self.timing.ui_settle).await;
        debug!(conversation = conversation_id, folder, "Conversation moved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::SnapshotNode;

    #[test]
    fn exact_label_beats_substring() {
        let doc = Document::from_snapshot(
            SnapshotNode::element("div")
                .child(SnapshotNode::element("button").attr("aria-label", "Reply all").handle("all"))
                .child(SnapshotNode::element("button").attr("name", "Reply").handle("one")),
        );
        let id = labelled_button(&doc, "Reply").unwrap();
        assert_eq!(doc.handle(id), Some("one"));
    }

    #[test]
    fn file_input_prefers_documents() {
        let input = |accept: &str, handle: &str| {
            SnapshotNode::element("input")
                .attr("type", "file")
                .attr("accept", accept)
                .handle(handle)
        };
        let doc = Document::from_snapshot(
            SnapshotNode::element("div")
                .child(input("image/*", "img"))
                .child(input("", "any")),
        );
        assert_eq!(doc.handle(document_file_input(&doc).unwrap()), Some("any"));

        let images_only = Document::from_snapshot(
            SnapshotNode::element("div")
                .child(input("image/png", "a"))
                .child(input("image/*", "b")),
        );
        assert_eq!(doc_handle(&images_only), Some("b".to_string()));
    }

    fn doc_handle(doc: &Document) -> Option<String> {
        document_file_input(doc).and_then(|id| doc.handle(id).map(str::to_string))
    }

    #[test]
    fn compose_body_needs_contenteditable() {
        let doc = Document::from_snapshot(
            SnapshotNode::element("div")
                .child(SnapshotNode::element("div").role("textbox"))
                .child(
                    SnapshotNode::element("div")
                        .role("textbox")
                        .attr("contenteditable", "true")
                        .handle("body"),
                ),
        );
        assert_eq!(doc.handle(compose_body(&doc).unwrap()), Some("body"));
    }

    #[test]
    fn chooser_event_names_its_input() {
        use chromiumoxide::cdp::browser_protocol::page::{FileChooserOpenedMode, FrameId};

        let event = |backend_node_id| EventFileChooserOpened {
            frame_id: FrameId::new("main"),
            mode: FileChooserOpenedMode::SelectSingle,
            backend_node_id,
        };
        let from_input = event(Some(BackendNodeId::new(42)));
        assert_eq!(chooser_input(Some(&from_input)), Some(BackendNodeId::new(42)));
        // showOpenFilePicker and friends have no backing input.
        assert_eq!(chooser_input(Some(&event(None))), None);
        assert_eq!(chooser_input(None), None);
    }

    #[test]
    fn upload_names_stay_in_directory() {
        assert_eq!(upload_name("DUPONT - janvier24.pdf"), "DUPONT - janvier24.pdf");
        assert_eq!(upload_name("../x/y.pdf"), ".._x_y.pdf");
    }

    #[test]
    fn request_headers_flatten() {
        let headers = serde_json::json!({"Accept": "*/*", "X-Count": 3});
        assert_eq!(header_pairs(&headers), vec![("Accept".to_string(), "*/*".to_string())]);
    }
}
