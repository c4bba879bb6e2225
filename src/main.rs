use mailsign::browser::ChromiumMailClient;
use mailsign::config::{self, CaptureMode, RunConfig};
use mailsign::diagnostics::DiagnosticsSink;
use mailsign::error::Result;
use mailsign::signing::LopdfSigner;
use mailsign::workflow::{Orchestrator, RunSummary, WorkflowEvent};
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    if config::wants_help(std::env::args().skip(1)) {
        print!("{}", config::USAGE);
        return Ok(());
    }

    let config = RunConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        eprintln!("  export MAILSIGN_MY_EMAIL=you@example.com");
        eprintln!("  export MAILSIGN_SIGNATURE_PATH=/path/to/signature.png");
        eprintln!("Run `mailsign --help` for every setting.");
        std::process::exit(1);
    });

    // Console plus a daily log file next to the browser profile.
    let logs_dir = config.browser.logs_dir();
    let (file_writer, _log_guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(&logs_dir, "mailsign.log"));
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(file_writer),
        )
        .init();

    eprintln!("mailsign v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Account: {}", config.my_email);
    eprintln!(
        "   Folders: {} -> {}",
        config.source_folder, config.destination_folder
    );
    eprintln!("   Signature: {}", config.signature.path.display());
    match &config.capture.mode {
        CaptureMode::Blob => eprintln!("   Capture: blob relay"),
        CaptureMode::Url { pattern } => eprintln!("   Capture: download URLs matching {pattern}"),
    }
    if !config.cc.active_recipients().is_empty() {
        eprintln!("   CC: {}", config.cc.emails.join("; "));
    }
    eprintln!("   Logs: {}\n", logs_dir.display());

    let client = ChromiumMailClient::launch(&config).await?;
    let diagnostics = client.diagnostics(logs_dir);

    let outcome = run(&client, &diagnostics, &config).await;
    client.close().await;

    let summary = outcome?;
    eprintln!(
        "\nDone: {summary} draft(s) prepared ({} conversation(s), {} skipped, {} capture failure(s))",
        summary.conversations, summary.skipped, summary.capture_failures
    );
    Ok(())
}

async fn run(
    client: &ChromiumMailClient,
    diagnostics: &dyn DiagnosticsSink,
    config: &RunConfig,
) -> Result<RunSummary> {
    if let Err(e) = client.open_folder(&config.source_folder).await {
        diagnostics.capture_snapshot("folder-not-found").await;
        return Err(e.into());
    }

    let signer = LopdfSigner;
    let orchestrator = Orchestrator::new(client, &signer, diagnostics, config);
    let printer = tokio::spawn(print_progress(orchestrator.subscribe()));

    let summary = orchestrator.run().await;
    drop(orchestrator);
    // The printer ends once the last sender is gone.
    let _ = printer.await;

    Ok(summary?)
}

async fn print_progress(mut events: broadcast::Receiver<WorkflowEvent>) {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!(missed = n, "Progress printer lagged");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        match event {
            WorkflowEvent::ConversationStarted { index, total, .. } => {
                eprintln!("[{}/{}] Reading conversation", index + 1, total);
            }
            WorkflowEvent::ConversationSkipped { reason, .. } => {
                eprintln!("  -> skipped: {reason}");
            }
            WorkflowEvent::ItemCollected { filename, .. } => {
                eprintln!("  -> signed as {filename}");
            }
            WorkflowEvent::CaptureFailed { entry, error, .. } => {
                eprintln!("  -> {entry}: {error}");
            }
            WorkflowEvent::DraftStarted {
                index,
                total,
                subject,
                filename,
            } => {
                eprintln!("\n[{}/{}] \"{subject}\" -> {filename}", index + 1, total);
            }
            WorkflowEvent::DraftDone { .. } => eprintln!("  -> Done"),
            WorkflowEvent::DraftFailed { step, error, .. } => {
                eprintln!("  -> {step} failed: {error}, skipping");
            }
            WorkflowEvent::Finished { processed, total } => {
                eprintln!("\n{processed}/{total} processed");
            }
        }
    }
}
