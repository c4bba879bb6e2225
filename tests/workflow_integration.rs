//! End-to-end runs of the orchestrator against an in-memory mailbox.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use mailsign::browser::{Conversation, MailClient};
use mailsign::config::{
    BrowserConfig, CaptureConfig, CcConfig, ResolutionConfig, RunConfig, SignatureConfig, Timing,
};
use mailsign::diagnostics::DiagnosticsSink;
use mailsign::dom::{Document, NodeId, SnapshotNode};
use mailsign::error::{CaptureError, InteractionError, SignError};
use mailsign::resolve::AttachmentEntry;
use mailsign::signing::{PdfSigner, SignatureFormat, SignatureRect};
use mailsign::workflow::{DraftStep, Orchestrator, SkipReason, WorkflowEvent};

// ── Mailbox fixtures ────────────────────────────────────────────────

fn header(label: &str, visible: &str) -> SnapshotNode {
    SnapshotNode::element("button")
        .attr("aria-label", label)
        .child(SnapshotNode::element("span").text(visible))
}

fn attachments(files: &[&str]) -> SnapshotNode {
    SnapshotNode::element("div")
        .role("listbox")
        .attr("aria-label", "Attachments")
        .children(files.iter().map(|f| {
            SnapshotNode::element("div")
                .role("option")
                .handle(f)
                .text(&format!("{f} 84 KB"))
        }))
}

fn message(header: SnapshotNode, files: Option<&[&str]>) -> SnapshotNode {
    let card = SnapshotNode::element("div").role("listitem").child(header);
    match files {
        Some(files) => card.child(attachments(files)),
        None => card,
    }
}

fn pane(messages: Vec<SnapshotNode>) -> Document {
    Document::from_snapshot(SnapshotNode::element("div").role("main").children(messages))
}

/// The operator's request, answered by a client with two PDFs and a photo.
fn external_thread() -> Document {
    pane(vec![
        message(header("From: Me <me@example.com>", "Me"), None),
        message(
            header("From: Marie DURAND <marie.durand@client.fr>", "Marie DURAND"),
            Some(&["facture.pdf", "photo.jpg", "annexe.pdf"]),
        ),
    ])
}

/// A thread with only the operator's own messages.
fn own_thread() -> Document {
    pane(vec![
        message(header("From: Me <me@example.com>", "Me"), Some(&["brouillon.pdf"])),
        message(header("From: You", "You"), None),
    ])
}

fn single_pdf_thread(last_name: &str) -> Document {
    pane(vec![message(
        header(&format!("From: Jean {last_name}"), "Jean"),
        Some(&["releve.pdf"]),
    )])
}

// ── Fakes ───────────────────────────────────────────────────────────

struct FakeMailbox {
    order: Vec<String>,
    threads: HashMap<String, Document>,
    current: Mutex<Option<String>>,
    calls: Mutex<Vec<String>>,
    fail_capture: Option<String>,
    fail_attach: Option<String>,
    fail_move: bool,
}

impl FakeMailbox {
    fn new(threads: Vec<(&str, Document)>) -> Self {
        Self {
            order: threads.iter().map(|(id, _)| id.to_string()).collect(),
            threads: threads
                .into_iter()
                .map(|(id, doc)| (id.to_string(), doc))
                .collect(),
            current: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
            fail_capture: None,
            fail_attach: None,
            fail_move: false,
        }
    }

    fn log(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn drafting_calls(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| !c.starts_with("select") && !c.starts_with("capture"))
            .collect()
    }
}

#[async_trait]
impl MailClient for FakeMailbox {
    async fn list_conversations(&self) -> Result<Vec<Conversation>, InteractionError> {
        Ok(self
            .order
            .iter()
            .enumerate()
            .map(|(position, id)| Conversation {
                id: id.clone(),
                position,
            })
            .collect())
    }

    async fn dismiss_menus(&self) -> Result<(), InteractionError> {
        Ok(())
    }

    async fn select_conversation(&self, conversation: &Conversation) -> Result<String, InteractionError> {
        self.log(format!("select {}", conversation.id));
        *self.current.lock().unwrap() = Some(conversation.id.clone());
        Ok(format!("Re: {}", conversation.id))
    }

    async fn expand_thread_step(&self) -> Result<bool, InteractionError> {
        Ok(false)
    }

    async fn reading_pane(&self) -> Result<Document, InteractionError> {
        let current = self.current.lock().unwrap().clone();
        current
            .and_then(|id| self.threads.get(&id).cloned())
            .ok_or(InteractionError::ConversationNotFound("none selected".into()))
    }

    async fn expand_message(&self, _pane: &Document, _anchor: NodeId) -> Result<(), InteractionError> {
        Ok(())
    }

    async fn capture_attachment(&self, entry: &AttachmentEntry) -> Result<Vec<u8>, CaptureError> {
        self.log(format!("capture {}", entry.name));
        if self.fail_capture.as_deref() == Some(entry.name.as_str()) {
            return Err(CaptureError::Timeout {
                what: entry.name.clone(),
                timeout: Duration::from_secs(15),
            });
        }
        Ok(format!("%PDF {}", entry.name).into_bytes())
    }

    async fn open_reply(&self, conversation_id: &str) -> Result<(), InteractionError> {
        self.log(format!("reply {conversation_id}"));
        Ok(())
    }

    async fn add_cc(&self, recipients: &[String]) -> Result<(), InteractionError> {
        self.log(format!("cc {}", recipients.join(";")));
        Ok(())
    }

    async fn attach_file(&self, filename: &str, bytes: &[u8]) -> Result<(), InteractionError> {
        if self.fail_attach.as_deref() == Some(filename) {
            return Err(InteractionError::NotFound("Attach".into()));
        }
        self.log(format!("attach {filename} {}", String::from_utf8_lossy(bytes)));
        Ok(())
    }

    async fn type_message(&self, body: &str) -> Result<(), InteractionError> {
        self.log(format!("type {body}"));
        Ok(())
    }

    async fn save_draft(&self) -> Result<(), InteractionError> {
        self.log("save");
        Ok(())
    }

    async fn close_compose(&self) -> Result<(), InteractionError> {
        self.log("close");
        Ok(())
    }

    async fn move_to_folder(&self, conversation_id: &str, folder: &str) -> Result<(), InteractionError> {
        if self.fail_move {
            return Err(InteractionError::NotFound(format!("folder {folder}")));
        }
        self.log(format!("move {conversation_id} {folder}"));
        Ok(())
    }
}

struct TaggingSigner;

impl PdfSigner for TaggingSigner {
    fn sign(
        &self,
        pdf: &[u8],
        _image: &[u8],
        _format: SignatureFormat,
        _rect: SignatureRect,
    ) -> Result<Vec<u8>, SignError> {
        let mut signed = pdf.to_vec();
        signed.extend_from_slice(b" +sig");
        Ok(signed)
    }
}

#[derive(Default)]
struct RecordingDiagnostics {
    labels: Mutex<Vec<String>>,
}

#[async_trait]
impl DiagnosticsSink for RecordingDiagnostics {
    async fn capture_snapshot(&self, label: &str) -> Option<PathBuf> {
        self.labels.lock().unwrap().push(label.to_string());
        None
    }
}

fn config() -> RunConfig {
    RunConfig {
        my_email: "me@example.com".into(),
        reply_message: "Bonjour, ci-joint le document signé.".into(),
        cc: CcConfig::default(),
        source_folder: "À signer".into(),
        destination_folder: "Inbox".into(),
        signature: SignatureConfig {
            path: "signature.png".into(),
            image: vec![0x89, b'P', b'N', b'G'],
            format: SignatureFormat::Png,
            placement: SignatureRect {
                x: 100.0,
                y: 100.0,
                width: 150.0,
                height: 50.0,
            },
        },
        resolution: ResolutionConfig::default(),
        capture: CaptureConfig::default(),
        browser: BrowserConfig {
            headless: true,
            mail_url: "https://outlook.office.com/mail/".into(),
            data_dir: std::env::temp_dir().join("mailsign-test"),
            login_timeout: Duration::from_secs(1),
        },
        timing: Timing::instant(),
    }
}

fn march_15() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, 15).unwrap()
}

// ── Scenarios ───────────────────────────────────────────────────────

#[tokio::test]
async fn signs_external_pdfs_and_skips_own_threads() {
    let mailbox = FakeMailbox::new(vec![("conv-a", external_thread()), ("conv-b", own_thread())]);
    let mut config = config();
    config.cc = CcConfig {
        enabled: true,
        emails: vec!["compta@example.com".into()],
    };
    let diagnostics = RecordingDiagnostics::default();
    let orchestrator =
        Orchestrator::new(&mailbox, &TaggingSigner, &diagnostics, &config).with_date(march_15());
    let mut events = orchestrator.subscribe();

    let summary = orchestrator.run().await.unwrap();

    assert_eq!(summary.conversations, 2);
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.capture_failures, 0);
    assert_eq!(summary.to_string(), "2/2");
    assert!(diagnostics.labels.lock().unwrap().is_empty());

    // Only the PDFs of the external message, never the photo.
    let captured: Vec<_> = mailbox
        .calls()
        .into_iter()
        .filter(|c| c.starts_with("capture"))
        .collect();
    assert_eq!(captured, ["capture facture.pdf", "capture annexe.pdf"]);

    let body = "type Bonjour, ci-joint le document signé.";
    assert_eq!(
        mailbox.drafting_calls(),
        [
            "reply conv-a",
            "cc compta@example.com",
            "attach DURAND - mars24.pdf %PDF facture.pdf +sig",
            body,
            "save",
            "close",
            "reply conv-a",
            "cc compta@example.com",
            "attach DURAND - mars24.pdf %PDF annexe.pdf +sig",
            body,
            "save",
            "close",
            "move conv-a Inbox",
        ]
    );

    let mut skipped = Vec::new();
    let mut finished = None;
    while let Ok(event) = events.try_recv() {
        match event {
            WorkflowEvent::ConversationSkipped {
                conversation_id,
                reason,
                ..
            } => skipped.push((conversation_id, reason)),
            WorkflowEvent::Finished { processed, total } => finished = Some((processed, total)),
            _ => {}
        }
    }
    assert_eq!(skipped, [("conv-b".to_string(), SkipReason::NoExternalSender)]);
    assert_eq!(finished, Some((2, 2)));
}

#[tokio::test]
async fn one_failing_item_leaves_the_rest() {
    let mut mailbox = FakeMailbox::new(vec![
        ("conv-1", single_pdf_thread("MARTIN")),
        ("conv-2", single_pdf_thread("BERNARD")),
        ("conv-3", single_pdf_thread("PETIT")),
    ]);
    mailbox.fail_attach = Some("BERNARD - mars24.pdf".into());
    let config = config();
    let diagnostics = RecordingDiagnostics::default();
    let orchestrator =
        Orchestrator::new(&mailbox, &TaggingSigner, &diagnostics, &config).with_date(march_15());

    let summary = orchestrator.run().await.unwrap();

    assert_eq!(summary.to_string(), "2/3");
    assert_eq!(summary.failures.len(), 1);
    assert_eq!(summary.failures[0].step, DraftStep::AttachFile);
    assert_eq!(summary.failures[0].filename, "BERNARD - mars24.pdf");
    assert_eq!(*diagnostics.labels.lock().unwrap(), ["attach-fail-1"]);

    let moves: Vec<_> = mailbox
        .calls()
        .into_iter()
        .filter(|c| c.starts_with("move"))
        .collect();
    assert_eq!(moves, ["move conv-1 Inbox", "move conv-3 Inbox"]);
}

#[tokio::test]
async fn drafts_count_only_once_their_conversation_moves() {
    let mut mailbox = FakeMailbox::new(vec![("conv-a", external_thread())]);
    mailbox.fail_move = true;
    let config = config();
    let diagnostics = RecordingDiagnostics::default();
    let orchestrator =
        Orchestrator::new(&mailbox, &TaggingSigner, &diagnostics, &config).with_date(march_15());
    let mut events = orchestrator.subscribe();

    let summary = orchestrator.run().await.unwrap();

    // Both drafts were saved, but the conversation is still in the source folder.
    assert_eq!(mailbox.calls().iter().filter(|c| *c == "save").count(), 2);
    assert_eq!(summary.to_string(), "0/2");
    let failed: Vec<_> = summary.failures.iter().map(|f| (f.index, f.step)).collect();
    assert_eq!(
        failed,
        [(1, DraftStep::MoveToFolder), (0, DraftStep::MoveToFolder)]
    );
    assert_eq!(*diagnostics.labels.lock().unwrap(), ["move-fail-1"]);

    let mut finished = None;
    while let Ok(event) = events.try_recv() {
        if let WorkflowEvent::Finished { processed, total } = event {
            finished = Some((processed, total));
        }
    }
    assert_eq!(finished, Some((0, 2)));
}

#[tokio::test]
async fn failed_capture_skips_only_that_entry() {
    let mut mailbox = FakeMailbox::new(vec![("conv-a", external_thread())]);
    mailbox.fail_capture = Some("facture.pdf".into());
    let config = config();
    let diagnostics = RecordingDiagnostics::default();
    let orchestrator =
        Orchestrator::new(&mailbox, &TaggingSigner, &diagnostics, &config).with_date(march_15());

    let summary = orchestrator.run().await.unwrap();

    assert_eq!(summary.capture_failures, 1);
    assert_eq!(summary.to_string(), "1/1");
    assert!(
        mailbox
            .calls()
            .contains(&"attach DURAND - mars24.pdf %PDF annexe.pdf +sig".to_string())
    );
}

#[tokio::test]
async fn empty_folder_drafts_nothing() {
    let mailbox = FakeMailbox::new(vec![("conv-b", own_thread())]);
    let config = config();
    let diagnostics = RecordingDiagnostics::default();
    let orchestrator = Orchestrator::new(&mailbox, &TaggingSigner, &diagnostics, &config);

    let summary = orchestrator.run().await.unwrap();

    assert_eq!(summary.to_string(), "0/0");
    assert!(mailbox.drafting_calls().is_empty());
}
