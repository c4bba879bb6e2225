//! Content capture bridge.
//!
//! Attachment bytes only exist inside the page, behind `blob:` handles the
//! page mints for its own downloads. An injected agent holds those blobs for
//! a bounded time and hands them out on request through [`BlobRelay`].
//! Deployments with plain download URLs use [`url::CredentialedFetcher`]
//! instead.

pub mod page;
pub mod protocol;
pub mod relay;
pub mod url;

pub use protocol::BridgeMessage;
pub use relay::{BlobRelay, BridgeTransport};
pub use url::{CredentialedFetcher, InterceptedRequest, SessionCookie};
