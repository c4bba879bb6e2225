//! Wiring between the relay and a live page over CDP.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::Page;
use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use chromiumoxide::cdp::js_protocol::runtime::{AddBindingParams, EventBindingCalled};
use chromiumoxide::error::CdpError;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::capture::protocol::{BINDING_NAME, BridgeMessage};
use crate::capture::relay::{BlobRelay, BridgeTransport};
use crate::error::CaptureError;

const AGENT_SCRIPT: &str = include_str!("agent.js");

/// Agent source with the retention window filled in.
pub fn agent_script(retention: Duration) -> String {
    AGENT_SCRIPT.replace("__RETENTION_MS__", &retention.as_millis().to_string())
}

/// Delivers requests by calling into the agent's `receive`.
#[derive(Clone)]
pub struct PageTransport {
    page: Page,
}

impl PageTransport {
    pub fn new(page: Page) -> Self {
        Self { page }
    }
}

#[async_trait]
impl BridgeTransport for PageTransport {
    async fn post(&self, message: &BridgeMessage) -> Result<(), CaptureError> {
        let json = serde_json::to_string(message).map_err(|e| CaptureError::Decode(e.to_string()))?;
        let expr = format!(
            "(() => {{ const agent = window.__mailsignAgent; \
             if (!agent) return false; agent.receive({json}); return true; }})()"
        );
        let delivered: bool = self
            .page
            .evaluate(expr)
            .await
            .map_err(|e| CaptureError::Agent(e.to_string()))?
            .into_value()
            .map_err(|e| CaptureError::Decode(e.to_string()))?;
        if !delivered {
            return Err(CaptureError::Agent("capture agent is not installed in the page".into()));
        }
        Ok(())
    }
}

/// Register the binding and inject the agent into this and every later document.
pub async fn install_agent(page: &Page, retention: Duration) -> Result<(), CdpError> {
    page.execute(AddBindingParams::new(BINDING_NAME)).await?;
    let script = agent_script(retention);
    page.execute(AddScriptToEvaluateOnNewDocumentParams::new(script.clone()))
        .await?;
    page.evaluate(script).await?;
    debug!(retention_secs = retention.as_secs(), "Capture agent installed");
    Ok(())
}

/// Feed every binding call from the agent into `relay`.
pub async fn spawn_listener(
    page: &Page,
    relay: Arc<BlobRelay<PageTransport>>,
) -> Result<JoinHandle<()>, CdpError> {
    let mut events = page.event_listener::<EventBindingCalled>().await?;
    Ok(tokio::spawn(async move {
        while let Some(event) = events.next().await {
            if event.name != BINDING_NAME {
                continue;
            }
            match serde_json::from_str::<BridgeMessage>(&event.payload) {
                Ok(message) => relay.dispatch(message).await,
                Err(e) => warn!(error = %e, "Undecodable message from capture agent"),
            }
        }
        debug!("Capture listener stopped");
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retention_is_substituted() {
        let script = agent_script(Duration::from_secs(120));
        assert!(script.contains("const RETENTION_MS = 120000;"));
        assert!(script.contains(BINDING_NAME));
        assert!(!script.contains("__RETENTION_MS__"));
    }
}
