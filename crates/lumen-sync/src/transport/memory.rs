//! In-process [`FrameSource`] for tests. Built with `cfg(test)` or the
//! `test-util` feature.

use super::{ByteStream, FrameSource};
use crate::error::ChannelError;
use futures_util::future::BoxFuture;
use futures_util::stream;
use futures_util::StreamExt;
use lumen_core::frame::{encode_frame, WireFrame, DEFAULT_MAX_FRAME_BYTES};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, Mutex as AsyncMutex};

type ChunkTx = mpsc::UnboundedSender<Result<Vec<u8>, ChannelError>>;
type ChunkRx = mpsc::UnboundedReceiver<Result<Vec<u8>, ChannelError>>;

/// In-process frame source. Each [`MemoryFeed::connection`] queues one
/// session; `connect` waits until a session is available.
pub struct MemorySource {
    sessions: Arc<AsyncMutex<mpsc::UnboundedReceiver<ChunkRx>>>,
    resumes: Arc<Mutex<Vec<Option<i64>>>>,
}

#[derive(Clone)]
pub struct MemoryFeed {
    sessions: mpsc::UnboundedSender<ChunkRx>,
    resumes: Arc<Mutex<Vec<Option<i64>>>>,
}

pub struct MemoryConnection {
    tx: ChunkTx,
}

impl MemorySource {
    pub fn new() -> (Self, MemoryFeed) {
        let (sessions_tx, sessions_rx) = mpsc::unbounded_channel();
        let resumes = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                sessions: Arc::new(AsyncMutex::new(sessions_rx)),
                resumes: resumes.clone(),
            },
            MemoryFeed {
                sessions: sessions_tx,
                resumes,
            },
        )
    }
}

impl FrameSource for MemorySource {
    fn connect(&self, resume_from: Option<i64>) -> BoxFuture<'static, Result<ByteStream, ChannelError>> {
        let sessions = self.sessions.clone();
        let resumes = self.resumes.clone();
        Box::pin(async move {
            let next = sessions.lock().await.recv().await;
            let Some(rx) = next else {
                return Err(ChannelError::Closed);
            };
            resumes
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .push(resume_from);
            let chunks = stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|chunk| (chunk, rx))
            });
            Ok(chunks.boxed())
        })
    }
}

impl MemoryFeed {
    pub fn connection(&self) -> MemoryConnection {
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = self.sessions.send(rx);
        MemoryConnection { tx }
    }

    /// `Last-Event-ID` values seen by each accepted session, in order.
    pub fn resumes(&self) -> Vec<Option<i64>> {
        self.resumes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl MemoryConnection {
    pub fn send_frame(&self, frame: &WireFrame) -> bool {
        match encode_frame(frame, DEFAULT_MAX_FRAME_BYTES) {
            Ok(bytes) => self.send_raw(bytes),
            Err(_) => false,
        }
    }

    pub fn send_raw(&self, bytes: impl Into<Vec<u8>>) -> bool {
        self.tx.send(Ok(bytes.into())).is_ok()
    }

    pub fn fail(self, error: ChannelError) {
        let _ = self.tx.send(Err(error));
    }
}
