use crate::error::ChannelError;
use futures_util::future::BoxFuture;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use reqwest::header::ACCEPT;
use reqwest::Client;

#[cfg(any(test, feature = "test-util"))]
mod memory;
#[cfg(any(test, feature = "test-util"))]
pub use memory::{MemoryConnection, MemoryFeed, MemorySource};

pub const LAST_EVENT_ID_HEADER: &str = "Last-Event-ID";

pub type ByteStream = BoxStream<'static, Result<Vec<u8>, ChannelError>>;

/// Opens one streaming session. The channel calls `connect` again after every
/// transport error, passing the last id it saw.
pub trait FrameSource: Send + Sync + 'static {
    fn connect(&self, resume_from: Option<i64>) -> BoxFuture<'static, Result<ByteStream, ChannelError>>;
}

#[derive(Clone)]
pub struct HttpFrameSource {
    http: Client,
    url: String,
    token: Option<String>,
}

impl HttpFrameSource {
    pub fn new(http: Client, url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            http,
            url: url.into(),
            token,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl FrameSource for HttpFrameSource {
    fn connect(&self, resume_from: Option<i64>) -> BoxFuture<'static, Result<ByteStream, ChannelError>> {
        let mut request = self
            .http
            .get(&self.url)
            .header(ACCEPT, "application/x-ndjson");
        if let Some(token) = self.token.as_deref() {
            request = request.bearer_auth(token);
        }
        if let Some(id) = resume_from {
            request = request.header(LAST_EVENT_ID_HEADER, id.to_string());
        }

        Box::pin(async move {
            let response = request
                .send()
                .await
                .map_err(|err| ChannelError::Connect(err.to_string()))?;
            let status = response.status();
            if !status.is_success() {
                return Err(ChannelError::Status(status.as_u16()));
            }
            let chunks = response.bytes_stream().map(|chunk| {
                chunk
                    .map(|bytes| bytes.to_vec())
                    .map_err(|err| ChannelError::Read(err.to_string()))
            });
            Ok(chunks.boxed())
        })
    }
}
