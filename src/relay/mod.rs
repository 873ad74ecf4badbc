//! Conversation store client
//!
//! The relay is a last-writer-wins document store. Parties never talk to each other directly:
//! they overwrite a shared document and watch it for changes.

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use thiserror::Error;

use crate::conversation::DocumentKey;

mod memory;
pub use memory::MemoryRelay;

#[cfg(feature = "http")]
pub(crate) mod http;
#[cfg(feature = "http")]
#[cfg_attr(docsrs, doc(cfg(feature = "http")))]
pub use http::HttpRelay;

/// Stream of document versions
///
/// Yields the latest known version first (if the document exists), then every observed change.
/// Versions may be coalesced: a subscriber is only guaranteed to see the latest one. Dropping the
/// stream unsubscribes.
pub type Subscription = BoxStream<'static, Result<serde_json::Value, RelayError>>;

#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Overwrites the document
    ///
    /// `expect_reply` hints the relay that the counterparty is going to answer to this write;
    /// stores which deliver replies out of band may wait for it.
    async fn write(
        &self,
        key: &DocumentKey,
        document: serde_json::Value,
        expect_reply: bool,
    ) -> Result<(), RelayError>;

    /// Latest version of the document, if it exists
    async fn read(&self, key: &DocumentKey) -> Result<Option<serde_json::Value>, RelayError>;

    async fn subscribe(&self, key: &DocumentKey) -> Result<Subscription, RelayError>;

    /// Sets bearer token the store presents to the relay
    fn authorize(&self, _token: &str) {}
}

#[async_trait]
impl<S: ConversationStore + ?Sized> ConversationStore for std::sync::Arc<S> {
    async fn write(
        &self,
        key: &DocumentKey,
        document: serde_json::Value,
        expect_reply: bool,
    ) -> Result<(), RelayError> {
        (**self).write(key, document, expect_reply).await
    }

    async fn read(&self, key: &DocumentKey) -> Result<Option<serde_json::Value>, RelayError> {
        (**self).read(key).await
    }

    async fn subscribe(&self, key: &DocumentKey) -> Result<Subscription, RelayError> {
        (**self).subscribe(key).await
    }

    fn authorize(&self, token: &str) {
        (**self).authorize(token)
    }
}

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("subscription to {0} is closed")]
    Closed(DocumentKey),
    #[error("relay requires a bearer token, but none was provided")]
    Unauthorized,
    #[error("{0} returned empty response")]
    EmptyResponse(&'static str),
    #[cfg(feature = "http")]
    #[error("build an url for api method {method}")]
    BuildApiUrl {
        method: &'static str,
        #[source]
        err: url::ParseError,
    },
    #[cfg(feature = "http")]
    #[error("send request")]
    SendRequest(#[source] reqwest::Error),
    #[cfg(feature = "http")]
    #[error("receive and parse response")]
    ReceiveAndParse(#[source] reqwest::Error),
    #[cfg(feature = "http")]
    #[error("server returned error ({status:?}): {description}")]
    ServerReturnedError {
        status: reqwest::StatusCode,
        description: String,
    },
    #[cfg(feature = "http")]
    #[error("confused by server response: status={status:?} but response_err={response_err:?}")]
    Confused {
        status: reqwest::StatusCode,
        response_err: Option<String>,
    },
}
