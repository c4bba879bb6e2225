//! Drives a run: collect signed attachments, then prepare one reply draft each.
//!
//! Collection walks the source folder's conversations in display order and
//! turns every PDF of the most recent external message into a signed
//! [`WorkflowItem`]. Drafting then replies to each item's conversation with
//! the signed file attached and moves the conversation on.
//!
//! Nothing here talks to a browser directly; every UI action goes through
//! [`MailClient`], so the whole flow runs against in-memory fakes in tests.

use std::collections::HashMap;

use chrono::NaiveDate;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::browser::{Conversation, MailClient};
use crate::config::RunConfig;
use crate::diagnostics::DiagnosticsSink;
use crate::error::InteractionError;
use crate::resolve::{AttachmentLocator, SenderResolver, pdf_entries};
use crate::signing::PdfSigner;
use crate::workflow::naming::attachment_filename;
use crate::workflow::types::{
    ConversationStage, DraftStep, ItemFailure, RunSummary, SkipReason, StepFailure, WorkflowEvent,
    WorkflowItem,
};

/// Buffered progress events per subscriber.
const EVENT_CAPACITY: usize = 64;

/// Consecutive polls without a "See more messages" control before the
/// thread counts as fully expanded.
const EXPAND_MISSES: u32 = 2;

/// Outcome of collecting one conversation.
enum Collected {
    Items(Vec<WorkflowItem>),
    Skipped(SkipReason),
}

/// Tags an interaction error with the drafting step it came from.
fn at(step: DraftStep) -> impl FnOnce(InteractionError) -> StepFailure {
    move |source| StepFailure { step, source }
}

pub struct Orchestrator<'a> {
    client: &'a dyn MailClient,
    signer: &'a dyn PdfSigner,
    diagnostics: &'a dyn DiagnosticsSink,
    config: &'a RunConfig,
    senders: SenderResolver,
    locator: AttachmentLocator,
    events: broadcast::Sender<WorkflowEvent>,
    today: NaiveDate,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        client: &'a dyn MailClient,
        signer: &'a dyn PdfSigner,
        diagnostics: &'a dyn DiagnosticsSink,
        config: &'a RunConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            client,
            signer,
            diagnostics,
            config,
            senders: SenderResolver::new(&config.my_email, &config.resolution),
            locator: AttachmentLocator::new(&config.resolution),
            events,
            today: chrono::Local::now().date_naive(),
        }
    }

    /// Pin the date used for attachment filenames.
    pub fn with_date(mut self, today: NaiveDate) -> Self {
        self.today = today;
        self
    }

    /// Progress events for the rest of the run.
    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: WorkflowEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Collect, then draft. Only failing to list the folder aborts the run.
    pub async fn run(&self) -> Result<RunSummary, InteractionError> {
        let mut summary = RunSummary::default();
        let items = self.collect(&mut summary).await?;

        if items.is_empty() {
            info!("No PDFs to process");
        } else {
            self.draft(&items, &mut summary).await;
        }

        self.emit(WorkflowEvent::Finished {
            processed: summary.processed,
            total: summary.total,
        });
        Ok(summary)
    }

    // ── Collection ──────────────────────────────────────────────────

    /// Signed items for every conversation in the open folder.
    pub async fn collect(&self, summary: &mut RunSummary) -> Result<Vec<WorkflowItem>, InteractionError> {
        let conversations = self.client.list_conversations().await?;
        let total = conversations.len();
        summary.conversations = total;
        info!(count = total, "Collecting signed attachments");

        let mut items = Vec::new();
        for conversation in &conversations {
            let index = conversation.position;
            self.emit(WorkflowEvent::ConversationStarted {
                index,
                total,
                conversation_id: conversation.id.clone(),
            });

            let mut stage = ConversationStage::Idle;
            let outcome = match self.collect_one(conversation, &mut stage, summary).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(
                        conversation = %conversation.id,
                        stage = %stage,
                        error = %e,
                        "Conversation interaction failed"
                    );
                    self.diagnostics
                        .capture_snapshot(&format!("collect-fail-{index}"))
                        .await;
                    Collected::Skipped(SkipReason::Interaction {
                        stage,
                        error: e.to_string(),
                    })
                }
            };

            match outcome {
                Collected::Items(found) => {
                    for item in &found {
                        self.emit(WorkflowEvent::ItemCollected {
                            conversation_id: item.conversation_id.clone(),
                            filename: item.filename.clone(),
                        });
                    }
                    items.extend(found);
                }
                Collected::Skipped(reason) => {
                    info!(conversation = %conversation.id, reason = %reason, "Skipping conversation");
                    summary.skipped += 1;
                    self.emit(WorkflowEvent::ConversationSkipped {
                        index,
                        conversation_id: conversation.id.clone(),
                        reason,
                    });
                }
            }
        }

        info!(
            items = items.len(),
            conversations = total,
            skipped = summary.skipped,
            "Collection complete"
        );
        Ok(items)
    }

    async fn collect_one(
        &self,
        conversation: &Conversation,
        stage: &mut ConversationStage,
        summary: &mut RunSummary,
    ) -> Result<Collected, InteractionError> {
        let timing = &self.config.timing;

        self.client.dismiss_menus().await?;
        let subject = self.client.select_conversation(conversation).await?;
        *stage = ConversationStage::Selected;
        debug!(conversation = %conversation.id, subject = %subject, "Conversation selected");

        self.expand_thread().await?;
        *stage = ConversationStage::ThreadExpanded;

        let pane = self.client.reading_pane().await?;
        let Some(sender) = self.senders.resolve(&pane, pane.root()) else {
            return Ok(Collected::Skipped(SkipReason::NoExternalSender));
        };

        // Expanding re-renders the pane, so resolve again on a fresh snapshot.
        self.client.expand_message(&pane, sender.anchor).await?;
        tokio::time::sleep(timing.content_load).await;
        let pane = self.client.reading_pane().await?;
        let Some(sender) = self.senders.resolve(&pane, pane.root()) else {
            return Ok(Collected::Skipped(SkipReason::NoExternalSender));
        };
        *stage = ConversationStage::SenderResolved;

        let Some(collection) = self.locator.locate(&pane, pane.root(), sender.anchor) else {
            return Ok(Collected::Skipped(SkipReason::NoAttachments));
        };
        let entries = pdf_entries(&pane, collection);
        if entries.is_empty() {
            return Ok(Collected::Skipped(SkipReason::NoPdfAttachments));
        }
        *stage = ConversationStage::AttachmentsResolved;

        let filename = attachment_filename(&sender.last_name, self.today);
        let signature = &self.config.signature;
        let mut items = Vec::with_capacity(entries.len());

        for entry in &entries {
            let pdf = match self.client.capture_attachment(entry).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(conversation = %conversation.id, entry = %entry.name, error = %e, "Capture failed");
                    self.record_capture_failure(conversation, &entry.name, e.to_string(), summary);
                    continue;
                }
            };
            *stage = ConversationStage::Captured;

            let signed = match self
                .signer
                .sign(&pdf, &signature.image, signature.format, signature.placement)
            {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(conversation = %conversation.id, entry = %entry.name, error = %e, "Signing failed");
                    self.record_capture_failure(conversation, &entry.name, e.to_string(), summary);
                    continue;
                }
            };
            *stage = ConversationStage::Signed;

            info!(
                conversation = %conversation.id,
                entry = %entry.name,
                filename = %filename,
                bytes = signed.len(),
                "Attachment signed"
            );
            items.push(WorkflowItem {
                conversation_id: conversation.id.clone(),
                subject: subject.clone(),
                sender_last_name: sender.last_name.clone(),
                sender_email: sender.email.clone(),
                signed_bytes: signed,
                filename: filename.clone(),
            });
        }

        Ok(Collected::Items(items))
    }

    /// Click "See more messages" until it stays gone, within the click cap.
    async fn expand_thread(&self) -> Result<(), InteractionError> {
        let timing = &self.config.timing;
        let mut clicks = 0;
        let mut misses = 0;

        while misses < EXPAND_MISSES {
            if clicks >= timing.max_expand_clicks {
                warn!(clicks, "Thread expansion cap reached");
                break;
            }
            if self.client.expand_thread_step().await? {
                clicks += 1;
                misses = 0;
            } else {
                misses += 1;
            }
            // The control can come back late after a re-render.
            tokio::time::sleep(timing.content_load).await;
        }

        debug!(clicks, "Thread expanded");
        Ok(())
    }

    fn record_capture_failure(
        &self,
        conversation: &Conversation,
        entry: &str,
        error: String,
        summary: &mut RunSummary,
    ) {
        summary.capture_failures += 1;
        self.emit(WorkflowEvent::CaptureFailed {
            conversation_id: conversation.id.clone(),
            entry: entry.to_string(),
            error,
        });
    }

    // ── Drafting ────────────────────────────────────────────────────

    /// One reply draft per item. A failing item never stops the others.
    pub async fn draft(&self, items: &[WorkflowItem], summary: &mut RunSummary) {
        let total = items.len();
        summary.total = total;
        info!(count = total, "Preparing drafts");

        // Index of the last item of each conversation; the move waits for it.
        let last_index: HashMap<&str, usize> = items
            .iter()
            .enumerate()
            .map(|(i, item)| (item.conversation_id.as_str(), i))
            .collect();
        // Saved drafts per conversation, credited only once the move lands.
        let mut awaiting_move: HashMap<&str, Vec<usize>> = HashMap::new();

        for (index, item) in items.iter().enumerate() {
            let conversation_id = item.conversation_id.as_str();
            let is_last = last_index.get(conversation_id) == Some(&index);

            self.emit(WorkflowEvent::DraftStarted {
                index,
                total,
                subject: item.subject.clone(),
                filename: item.filename.clone(),
            });
            info!(
                index = index + 1,
                total,
                subject = %item.subject,
                filename = %item.filename,
                "Drafting reply"
            );

            match self.draft_item(item, is_last).await {
                Ok(()) if !is_last => {
                    awaiting_move.entry(conversation_id).or_default().push(index);
                    self.emit(WorkflowEvent::DraftDone { index });
                }
                Ok(()) => {
                    let earlier = awaiting_move.remove(conversation_id).unwrap_or_default();
                    summary.processed += earlier.len() + 1;
                    self.emit(WorkflowEvent::DraftDone { index });
                }
                Err(failure) => {
                    error!(
                        index = index + 1,
                        step = %failure.step,
                        error = %failure.source,
                        "Draft failed"
                    );
                    self.diagnostics
                        .capture_snapshot(&format!("{}-fail-{index}", failure.step.label()))
                        .await;
                    self.recover().await;

                    let error = failure.source.to_string();
                    self.record_draft_failure(summary, items, index, failure.step, error.clone());

                    // Earlier drafts of this conversation still need their move.
                    let earlier = if is_last {
                        awaiting_move.remove(conversation_id).unwrap_or_default()
                    } else {
                        Vec::new()
                    };
                    if earlier.is_empty() {
                        continue;
                    }
                    let moved = failure.step != DraftStep::MoveToFolder
                        && self.cleanup_move(conversation_id, index).await;
                    if moved {
                        summary.processed += earlier.len();
                    } else {
                        let reason = format!("conversation not moved: {error}");
                        for &stranded in &earlier {
                            self.record_draft_failure(
                                summary,
                                items,
                                stranded,
                                DraftStep::MoveToFolder,
                                reason.clone(),
                            );
                        }
                    }
                }
            }
        }

        // Conversations whose last item never ran leave nothing pending.
        debug_assert!(awaiting_move.is_empty());

        info!(
            processed = summary.processed,
            total,
            "Draft preparation complete"
        );
    }

    async fn draft_item(&self, item: &WorkflowItem, move_after: bool) -> Result<(), StepFailure> {
        let timing = &self.config.timing;

        self.client.dismiss_menus().await.map_err(at(DraftStep::OpenReply))?;
        tokio::time::sleep(timing.menu_animation).await;
        self.client
            .open_reply(&item.conversation_id)
            .await
            .map_err(at(DraftStep::OpenReply))?;

        let cc = self.config.cc.active_recipients();
        if !cc.is_empty() {
            debug!(recipients = cc.len(), "Adding CC");
            self.client.add_cc(cc).await.map_err(at(DraftStep::SetRecipients))?;
        }

        self.client
            .attach_file(&item.filename, &item.signed_bytes)
            .await
            .map_err(at(DraftStep::AttachFile))?;

        self.client
            .type_message(&self.config.reply_message)
            .await
            .map_err(at(DraftStep::TypeMessage))?;

        self.client.save_draft().await.map_err(at(DraftStep::SaveDraft))?;
        self.client.close_compose().await.map_err(at(DraftStep::SaveDraft))?;

        if move_after {
            self.client
                .move_to_folder(&item.conversation_id, &self.config.destination_folder)
                .await
                .map_err(at(DraftStep::MoveToFolder))?;
        }
        Ok(())
    }

    /// Leave the UI ready for the next item after a failed one.
    async fn recover(&self) {
        if let Err(e) = self.client.close_compose().await {
            debug!(error = %e, "No compose form to close");
        }
        if let Err(e) = self.client.dismiss_menus().await {
            warn!(error = %e, "Failed to dismiss menus");
        }
    }

    fn record_draft_failure(
        &self,
        summary: &mut RunSummary,
        items: &[WorkflowItem],
        index: usize,
        step: DraftStep,
        error: String,
    ) {
        summary.failures.push(ItemFailure {
            index,
            filename: items[index].filename.clone(),
            step,
            error: error.clone(),
        });
        self.emit(WorkflowEvent::DraftFailed { index, step, error });
    }

    /// Move a conversation whose last draft failed. `true` once moved.
    async fn cleanup_move(&self, conversation_id: &str, index: usize) -> bool {
        info!(conversation = %conversation_id, "Moving conversation with earlier drafts");
        match self
            .client
            .move_to_folder(conversation_id, &self.config.destination_folder)
            .await
        {
            Ok(()) => true,
            Err(e) => {
                warn!(conversation = %conversation_id, error = %e, "Cleanup move failed");
                self.diagnostics
                    .capture_snapshot(&format!("{}-fail-{index}", DraftStep::MoveToFolder.label()))
                    .await;
                false
            }
        }
    }
}
