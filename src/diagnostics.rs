//! Best-effort failure snapshots.

use std::path::PathBuf;

use anyhow::Context;
use async_trait::async_trait;
use chromiumoxide::Page;
use chromiumoxide::page::ScreenshotParams;
use chrono::{DateTime, Utc};
use tracing::{info, warn};

/// Records the state of the UI when something goes wrong.
#[async_trait]
pub trait DiagnosticsSink: Send + Sync {
    /// Save a snapshot tagged with `label`. Never fails; `None` if nothing was written.
    async fn capture_snapshot(&self, label: &str) -> Option<PathBuf>;
}

/// Sink that records nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDiagnostics;

#[async_trait]
impl DiagnosticsSink for NoDiagnostics {
    async fn capture_snapshot(&self, _label: &str) -> Option<PathBuf> {
        None
    }
}

/// `error-{label}-{unix millis}.png`, with the label reduced to safe characters.
pub fn snapshot_filename(label: &str, at: DateTime<Utc>) -> String {
    let label: String = label
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    format!("error-{label}-{}.png", at.timestamp_millis())
}

/// Full-page screenshots into the logs directory.
#[derive(Clone)]
pub struct ScreenshotSink {
    page: Page,
    dir: PathBuf,
}

impl ScreenshotSink {
    pub fn new(page: Page, dir: PathBuf) -> Self {
        Self { page, dir }
    }

    async fn save(&self, label: &str) -> anyhow::Result<PathBuf> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("creating {}", self.dir.display()))?;
        let path = self.dir.join(snapshot_filename(label, Utc::now()));
        self.page
            .save_screenshot(ScreenshotParams::builder().full_page(true).build(), &path)
            .await
            .context("taking screenshot")?;
        Ok(path)
    }
}

#[async_trait]
impl DiagnosticsSink for ScreenshotSink {
    async fn capture_snapshot(&self, label: &str) -> Option<PathBuf> {
        match self.save(label).await {
            Ok(path) => {
                info!(path = %path.display(), "Screenshot saved");
                Some(path)
            }
            Err(e) => {
                warn!(label, error = %format!("{e:#}"), "Screenshot failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn filename_is_labelled_and_timestamped() {
        let at = Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap();
        assert_eq!(
            snapshot_filename("reply-fail-3", at),
            format!("error-reply-fail-3-{}.png", at.timestamp_millis())
        );
        assert!(snapshot_filename("folder not/found", at).starts_with("error-folder_not_found-"));
    }

    #[tokio::test]
    async fn null_sink_records_nothing() {
        assert_eq!(NoDiagnostics.capture_snapshot("x").await, None);
    }
}
