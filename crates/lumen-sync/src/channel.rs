//! Shared push channel.
//!
//! One [`EventChannel`] is opened per process and cloned into every view.
//! The streaming session exists only while at least one listener is attached:
//! the first [`EventChannel::listen`] spawns the transport task, dropping the
//! last [`ListenerGuard`] aborts it. Frames are fanned out synchronously to
//! every listener, in arrival order, before the next frame is decoded.

use crate::error::ChannelError;
use crate::transport::FrameSource;
use futures_util::StreamExt;
use lumen_core::frame::{DecodeReport, NdjsonFrameDecoder, WireFrame, DEFAULT_MAX_FRAME_BYTES};
use lumen_core::{now_secs, ChannelStatus, ServerEvent};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(3);

#[derive(Clone, Debug)]
pub struct ChannelConfig {
    pub enabled: bool,
    pub reconnect_delay: Duration,
    pub max_frame_bytes: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

type Listener = Arc<dyn Fn(&ServerEvent) + Send + Sync>;

struct Inner {
    listeners: Vec<(u64, Listener)>,
    next_listener_id: u64,
    transport: Option<JoinHandle<()>>,
}

struct Shared {
    config: ChannelConfig,
    source: Arc<dyn FrameSource>,
    inner: Mutex<Inner>,
    status_tx: watch::Sender<ChannelStatus>,
}

#[derive(Clone)]
pub struct EventChannel {
    shared: Arc<Shared>,
}

/// Keeps one listener attached. Dropping it detaches the listener.
#[must_use = "dropping the guard detaches the listener immediately"]
pub struct ListenerGuard {
    shared: Arc<Shared>,
    id: u64,
}

impl EventChannel {
    pub fn open(config: ChannelConfig, source: impl FrameSource) -> Self {
        let (status_tx, _) = watch::channel(ChannelStatus::new(config.enabled));
        Self {
            shared: Arc::new(Shared {
                config,
                source: Arc::new(source),
                inner: Mutex::new(Inner {
                    listeners: Vec::new(),
                    next_listener_id: 0,
                    transport: None,
                }),
                status_tx,
            }),
        }
    }

    pub fn status(&self) -> ChannelStatus {
        self.shared.status_tx.borrow().clone()
    }

    pub fn watch_status(&self) -> watch::Receiver<ChannelStatus> {
        self.shared.status_tx.subscribe()
    }

    pub fn listener_count(&self) -> usize {
        self.shared.lock_inner().listeners.len()
    }

    /// Must be called from within a tokio runtime: attaching the first
    /// listener of an enabled channel spawns the transport task.
    ///
    /// Dispatch works on a snapshot of the listener list, so a guard dropped
    /// on another thread mid-dispatch may still see that one event. Callers
    /// that need a hard stop gate their own callback, as
    /// [`crate::RefreshCoordinator`] does.
    pub fn listen<F>(&self, listener: F) -> ListenerGuard
    where
        F: Fn(&ServerEvent) + Send + Sync + 'static,
    {
        let mut inner = self.shared.lock_inner();
        let id = inner.next_listener_id;
        inner.next_listener_id += 1;
        inner.listeners.push((id, Arc::new(listener)));

        if self.shared.config.enabled && inner.transport.is_none() {
            let shared = self.shared.clone();
            inner.transport = Some(tokio::spawn(run_transport(shared)));
            debug!(event = "channel_transport_spawned", listeners = inner.listeners.len());
        }

        ListenerGuard {
            shared: self.shared.clone(),
            id,
        }
    }

    /// Closes the streaming session even if listeners remain attached. The
    /// next listener to attach reopens it.
    pub fn shutdown(&self) {
        let handle = self.shared.lock_inner().transport.take();
        if let Some(handle) = handle {
            handle.abort();
            self.shared.status_tx.send_modify(|status| status.connected = false);
            info!(event = "channel_shutdown");
        }
    }
}

impl Shared {
    fn lock_inner(&self) -> MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn detach(&self, id: u64) {
        let handle = {
            let mut inner = self.lock_inner();
            inner.listeners.retain(|(listener_id, _)| *listener_id != id);
            if inner.listeners.is_empty() {
                inner.transport.take()
            } else {
                None
            }
        };
        if let Some(handle) = handle {
            handle.abort();
            self.status_tx.send_modify(|status| status.connected = false);
            debug!(event = "channel_transport_closed", reason = "last_listener_detached");
        }
    }

    fn dispatch(&self, frame: WireFrame) {
        let received_at = now_secs();
        let event = ServerEvent::from_wire(frame, received_at);
        self.status_tx
            .send_modify(|status| status.record_event(event.id, received_at));

        let listeners: Vec<Listener> = self
            .lock_inner()
            .listeners
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in listeners {
            listener(&event);
        }
    }

    fn handle_report(&self, report: DecodeReport<WireFrame>) {
        for err in report.errors {
            debug!(event = "channel_frame_dropped", error = %err);
        }
        for frame in report.frames {
            self.dispatch(frame);
        }
    }

    fn record_transport_error(&self, err: &ChannelError) {
        let at = now_secs();
        self.status_tx.send_modify(|status| status.record_error(at));
        let status = self.status_tx.borrow();
        warn!(
            event = "channel_transport_error",
            error = %err,
            error_count = status.error_count,
            notice = status.notice().unwrap_or("")
        );
    }
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        self.shared.detach(self.id);
    }
}

async fn run_transport(shared: Arc<Shared>) {
    let mut decoder = NdjsonFrameDecoder::<WireFrame>::new(shared.config.max_frame_bytes);

    loop {
        let resume_from = shared.status_tx.borrow().last_event_id;
        let failure = match shared.source.connect(resume_from).await {
            Ok(mut chunks) => {
                shared.status_tx.send_modify(ChannelStatus::record_open);
                info!(event = "channel_connected", resume_from = ?resume_from);
                decoder.reset();

                let mut failure = ChannelError::Closed;
                while let Some(chunk) = chunks.next().await {
                    match chunk {
                        Ok(bytes) => shared.handle_report(decoder.push_chunk(&bytes)),
                        Err(err) => {
                            failure = err;
                            break;
                        }
                    }
                }
                shared.handle_report(decoder.finish());
                failure
            }
            Err(err) => err,
        };

        shared.record_transport_error(&failure);
        tokio::time::sleep(shared.config.reconnect_delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemorySource;
    use serde_json::json;
    use std::sync::Mutex as StdMutex;

    fn frame(id: i64, frame_type: &str) -> WireFrame {
        WireFrame {
            id: Some(id),
            frame_type: frame_type.to_string(),
            data: json!({"event": "update", "seq": id}),
            ts: Some(id as f64),
        }
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn transport_follows_listener_refcount() {
        let (source, feed) = MemorySource::new();
        let channel = EventChannel::open(ChannelConfig::default(), source);
        let _conn = feed.connection();

        let first = channel.listen(|_| {});
        let second = channel.listen(|_| {});
        settle().await;
        assert!(channel.status().connected);
        assert_eq!(channel.listener_count(), 2);

        drop(first);
        settle().await;
        assert!(channel.status().connected);

        drop(second);
        assert_eq!(channel.listener_count(), 0);
        assert!(!channel.status().connected);
        assert_eq!(channel.status().error_count, 0);
    }

    #[tokio::test]
    async fn frames_reach_every_listener_in_arrival_order() {
        let (source, feed) = MemorySource::new();
        let channel = EventChannel::open(ChannelConfig::default(), source);
        let conn = feed.connection();

        let seen_a = Arc::new(StdMutex::new(Vec::new()));
        let seen_b = Arc::new(StdMutex::new(Vec::new()));
        let sink_a = seen_a.clone();
        let sink_b = seen_b.clone();
        let _a = channel.listen(move |event| sink_a.lock().expect("lock").push(event.id));
        let _b = channel.listen(move |event| sink_b.lock().expect("lock").push(event.id));

        for id in [3, 4, 4, 9] {
            assert!(conn.send_frame(&frame(id, "job")));
        }
        settle().await;

        let expected = vec![Some(3), Some(4), Some(4), Some(9)];
        assert_eq!(*seen_a.lock().expect("lock"), expected);
        assert_eq!(*seen_b.lock().expect("lock"), expected);
        let status = channel.status();
        assert_eq!(status.last_event_id, Some(9));
        assert!(status.last_event_at.is_some());
    }

    #[tokio::test]
    async fn disabled_channel_never_connects() {
        let (source, feed) = MemorySource::new();
        let channel = EventChannel::open(
            ChannelConfig {
                enabled: false,
                ..ChannelConfig::default()
            },
            source,
        );
        let _conn = feed.connection();
        let _guard = channel.listen(|_| {});
        settle().await;

        let status = channel.status();
        assert!(!status.enabled);
        assert!(!status.connected);
        assert!(feed.resumes().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_resumes_from_last_event_id() {
        let (source, feed) = MemorySource::new();
        let channel = EventChannel::open(ChannelConfig::default(), source);
        let first = feed.connection();
        let _guard = channel.listen(|_| {});

        first.send_frame(&frame(41, "job"));
        settle().await;
        first.fail(ChannelError::Read("reset by peer".to_string()));
        settle().await;

        let status = channel.status();
        assert!(!status.connected);
        assert_eq!(status.error_count, 1);
        assert_eq!(status.notice(), None);

        let _second = feed.connection();
        tokio::time::sleep(DEFAULT_RECONNECT_DELAY + Duration::from_millis(10)).await;
        settle().await;

        let status = channel.status();
        assert!(status.connected);
        assert_eq!(status.error_count, 1);
        assert_eq!(feed.resumes(), vec![None, Some(41)]);
    }

    #[tokio::test]
    async fn error_before_any_event_raises_notice() {
        let (source, feed) = MemorySource::new();
        let channel = EventChannel::open(ChannelConfig::default(), source);
        let conn = feed.connection();
        let _guard = channel.listen(|_| {});
        settle().await;

        conn.fail(ChannelError::Status(502));
        settle().await;
        assert_eq!(
            channel.status().notice(),
            Some(lumen_core::status::STREAM_DISCONNECTED_NOTICE)
        );
    }

    #[tokio::test]
    async fn listener_may_detach_itself_during_dispatch() {
        let (source, feed) = MemorySource::new();
        let channel = EventChannel::open(ChannelConfig::default(), source);
        let conn = feed.connection();

        let slot: Arc<StdMutex<Option<ListenerGuard>>> = Arc::new(StdMutex::new(None));
        let hits = Arc::new(StdMutex::new(0usize));
        let slot_in = slot.clone();
        let hits_in = hits.clone();
        let guard = channel.listen(move |_| {
            *hits_in.lock().expect("lock") += 1;
            slot_in.lock().expect("lock").take();
        });
        *slot.lock().expect("lock") = Some(guard);
        let _keepalive = channel.listen(|_| {});

        conn.send_frame(&frame(1, "job"));
        conn.send_frame(&frame(2, "job"));
        settle().await;

        assert_eq!(*hits.lock().expect("lock"), 1);
        assert_eq!(channel.listener_count(), 1);
    }
}
