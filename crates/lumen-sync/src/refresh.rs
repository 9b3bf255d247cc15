//! Push-or-poll refresh scheduling.
//!
//! Two trigger sources feed one [`ThrottleGate`] per registration: matching
//! channel events, and a fallback ticker that only runs while push is disabled
//! or disconnected. Whatever the source, two runs are never closer than
//! `min_interval`, and suppressed triggers are dropped rather than deferred.

use crate::channel::{EventChannel, ListenerGuard};
use lumen_core::throttle::ThrottleGate;
use lumen_core::ChannelStatus;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, ThreadId};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;

#[derive(Clone, Debug)]
pub struct RefreshRegistration {
    pub types: BTreeSet<String>,
    pub min_interval: Duration,
    /// `Duration::ZERO` disables the fallback ticker.
    pub fallback_interval: Duration,
}

impl RefreshRegistration {
    pub fn new(min_interval: Duration, fallback_interval: Duration) -> Self {
        Self {
            types: BTreeSet::new(),
            min_interval,
            fallback_interval,
        }
    }

    pub fn on_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.types = types.into_iter().map(Into::into).collect();
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Trigger {
    Push,
    Fallback,
}

impl Trigger {
    fn as_str(self) -> &'static str {
        match self {
            Trigger::Push => "push",
            Trigger::Fallback => "fallback",
        }
    }
}

struct RefreshState {
    gate: Mutex<ThrottleGate>,
    active: AtomicBool,
    runs: AtomicU64,
    /// Held for the whole check-then-call span of a trigger.
    calling: Mutex<()>,
    /// Thread currently inside `on_refresh`, so a callback that drops its own
    /// handle does not wait on itself.
    caller: Mutex<Option<ThreadId>>,
    on_refresh: Box<dyn Fn() + Send + Sync>,
}

fn relock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl RefreshState {
    fn trigger(&self, trigger: Trigger) {
        let _calling = relock(&self.calling);
        if !self.active.load(Ordering::Acquire) {
            return;
        }
        let passed = relock(&self.gate).try_pass(Instant::now().into_std());
        if !passed {
            debug!(event = "refresh_throttled", trigger = trigger.as_str());
            return;
        }
        let run = self.runs.fetch_add(1, Ordering::AcqRel) + 1;
        debug!(event = "refresh_fired", trigger = trigger.as_str(), run);
        *relock(&self.caller) = Some(thread::current().id());
        (self.on_refresh)();
        *relock(&self.caller) = None;
    }

    /// After this returns no call is in flight on another thread and none
    /// will start.
    fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
        let reentrant = *relock(&self.caller) == Some(thread::current().id());
        if !reentrant {
            drop(relock(&self.calling));
        }
    }
}

#[derive(Clone)]
pub struct RefreshCoordinator {
    channel: EventChannel,
}

/// Live registration. Dropping it (or calling [`RefreshHandle::unregister`])
/// stops both trigger sources before returning.
#[must_use = "dropping the handle unregisters the refresh"]
pub struct RefreshHandle {
    state: Arc<RefreshState>,
    listener: Option<ListenerGuard>,
    timer: Option<JoinHandle<()>>,
}

impl RefreshCoordinator {
    pub fn new(channel: EventChannel) -> Self {
        Self { channel }
    }

    /// `on_refresh` should be cheap and non-blocking: spawn the actual fetch.
    /// Overlapping fetches are not serialized here.
    pub fn register<F>(&self, registration: RefreshRegistration, on_refresh: F) -> RefreshHandle
    where
        F: Fn() + Send + Sync + 'static,
    {
        let state = Arc::new(RefreshState {
            gate: Mutex::new(ThrottleGate::new(registration.min_interval)),
            active: AtomicBool::new(true),
            runs: AtomicU64::new(0),
            calling: Mutex::new(()),
            caller: Mutex::new(None),
            on_refresh: Box::new(on_refresh),
        });

        let push_state = state.clone();
        let types = registration.types;
        let listener = self.channel.listen(move |event| {
            if types.is_empty() || types.contains(&event.event_type) {
                push_state.trigger(Trigger::Push);
            }
        });

        let timer = if registration.fallback_interval.is_zero() {
            None
        } else {
            Some(tokio::spawn(fallback_loop(
                state.clone(),
                self.channel.watch_status(),
                registration.fallback_interval,
            )))
        };

        RefreshHandle {
            state,
            listener: Some(listener),
            timer,
        }
    }
}

impl RefreshHandle {
    pub fn runs(&self) -> u64 {
        self.state.runs.load(Ordering::Acquire)
    }

    pub fn unregister(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.state.deactivate();
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        self.listener.take();
    }
}

impl Drop for RefreshHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn fallback_loop(
    state: Arc<RefreshState>,
    mut status_rx: watch::Receiver<ChannelStatus>,
    period: Duration,
) {
    let mut status_open = true;
    loop {
        if status_open && status_rx.borrow_and_update().push_active() {
            if status_rx.changed().await.is_err() {
                status_open = false;
            }
            continue;
        }

        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => state.trigger(Trigger::Fallback),
                changed = status_rx.changed(), if status_open => {
                    if changed.is_err() {
                        status_open = false;
                    } else if status_rx.borrow_and_update().push_active() {
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelConfig;
    use crate::error::ChannelError;
    use crate::transport::{MemoryConnection, MemorySource};
    use lumen_core::WireFrame;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn counter() -> (Arc<AtomicUsize>, impl Fn() + Send + Sync + 'static) {
        let calls = Arc::new(AtomicUsize::new(0));
        let sink = calls.clone();
        (calls, move || {
            sink.fetch_add(1, Ordering::SeqCst);
        })
    }

    fn send(conn: &MemoryConnection, id: i64, frame_type: &str) {
        assert!(conn.send_frame(&WireFrame {
            id: Some(id),
            frame_type: frame_type.to_string(),
            data: json!({}),
            ts: None,
        }));
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    fn disabled_channel() -> EventChannel {
        let (source, _feed) = MemorySource::new();
        EventChannel::open(
            ChannelConfig {
                enabled: false,
                ..ChannelConfig::default()
            },
            source,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn triggers_inside_min_interval_collapse_to_one_call() {
        let (source, feed) = MemorySource::new();
        let channel = EventChannel::open(ChannelConfig::default(), source);
        let conn = feed.connection();
        let coordinator = RefreshCoordinator::new(channel.clone());
        let (calls, on_refresh) = counter();
        let _handle = coordinator.register(
            RefreshRegistration::new(Duration::from_millis(2_000), Duration::ZERO)
                .on_types(["job"]),
            on_refresh,
        );
        settle().await;

        send(&conn, 1, "job");
        settle().await;
        tokio::time::advance(Duration::from_millis(500)).await;
        send(&conn, 2, "job");
        settle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_millis(1_600)).await;
        send(&conn, 3, "job");
        settle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn non_matching_types_do_not_trigger() {
        let (source, feed) = MemorySource::new();
        let channel = EventChannel::open(ChannelConfig::default(), source);
        let conn = feed.connection();
        let (calls, on_refresh) = counter();
        let _handle = RefreshCoordinator::new(channel).register(
            RefreshRegistration::new(Duration::ZERO, Duration::ZERO).on_types(["job"]),
            on_refresh,
        );
        settle().await;

        send(&conn, 1, "metric");
        send(&conn, 2, "audit");
        settle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn fallback_ticks_while_channel_disabled() {
        let coordinator = RefreshCoordinator::new(disabled_channel());
        let (calls, on_refresh) = counter();
        let _handle = coordinator.register(
            RefreshRegistration::new(Duration::from_millis(500), Duration::from_millis(1_000)),
            on_refresh,
        );

        settle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(3_500)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn fallback_is_itself_throttled() {
        let coordinator = RefreshCoordinator::new(disabled_channel());
        let (calls, on_refresh) = counter();
        let _handle = coordinator.register(
            RefreshRegistration::new(Duration::from_millis(2_500), Duration::from_millis(1_000)),
            on_refresh,
        );

        tokio::time::sleep(Duration::from_millis(5_100)).await;
        // ticks at 0..=5s, gate admits 0s, 3s
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn fallback_is_suspended_while_connected() {
        let (source, feed) = MemorySource::new();
        let channel = EventChannel::open(ChannelConfig::default(), source);
        let _conn = feed.connection();
        let (calls, on_refresh) = counter();
        let _handle = RefreshCoordinator::new(channel.clone()).register(
            RefreshRegistration::new(Duration::ZERO, Duration::from_millis(1_000)),
            on_refresh,
        );
        settle().await;
        assert!(channel.status().connected);
        let baseline = calls.load(Ordering::SeqCst);

        tokio::time::sleep(Duration::from_millis(5_000)).await;
        assert_eq!(calls.load(Ordering::SeqCst), baseline);
    }

    #[tokio::test(start_paused = true)]
    async fn no_calls_after_unregister() {
        let coordinator = RefreshCoordinator::new(disabled_channel());
        let (calls, on_refresh) = counter();
        let handle = coordinator.register(
            RefreshRegistration::new(Duration::ZERO, Duration::from_millis(1_000)),
            on_refresh,
        );
        settle().await;
        assert_eq!(handle.runs(), 1);

        handle.unregister();
        tokio::time::sleep(Duration::from_millis(5_000)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn fallback_resumes_after_transport_error_and_shares_the_gate() {
        let (source, feed) = MemorySource::new();
        let channel = EventChannel::open(
            ChannelConfig {
                reconnect_delay: Duration::from_millis(9_500),
                ..ChannelConfig::default()
            },
            source,
        );
        let conn = feed.connection();
        let (calls, on_refresh) = counter();
        let _handle = RefreshCoordinator::new(channel.clone()).register(
            RefreshRegistration::new(Duration::from_millis(500), Duration::from_millis(1_000)),
            on_refresh,
        );
        settle().await;
        assert!(channel.status().connected);
        let baseline = calls.load(Ordering::SeqCst);

        tokio::time::sleep(Duration::from_millis(5_000)).await;
        assert_eq!(calls.load(Ordering::SeqCst), baseline);
        send(&conn, 1, "job");
        settle().await;
        assert_eq!(calls.load(Ordering::SeqCst), baseline + 1);

        // immediate fallback tick at 5.2s lands inside min_interval of the push
        tokio::time::sleep(Duration::from_millis(200)).await;
        conn.fail(ChannelError::Read("reset by peer".to_string()));
        settle().await;
        assert!(!channel.status().connected);
        assert_eq!(calls.load(Ordering::SeqCst), baseline + 1);

        // ticks at 6.2s .. 14.2s, reconnect at 14.7s
        let _reconnect = feed.connection();
        tokio::time::sleep(Duration::from_millis(9_700)).await;
        settle().await;
        assert!(channel.status().connected);
        assert_eq!(calls.load(Ordering::SeqCst), baseline + 10);

        tokio::time::sleep(Duration::from_millis(5_000)).await;
        assert_eq!(calls.load(Ordering::SeqCst), baseline + 10);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn unregister_waits_for_a_call_running_on_another_thread() {
        let running = Arc::new(AtomicBool::new(false));
        let calls = Arc::new(AtomicUsize::new(0));
        let (running_in, calls_in) = (running.clone(), calls.clone());
        let handle = RefreshCoordinator::new(disabled_channel()).register(
            RefreshRegistration::new(Duration::ZERO, Duration::from_millis(10)),
            move || {
                running_in.store(true, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(40));
                calls_in.fetch_add(1, Ordering::SeqCst);
                running_in.store(false, Ordering::SeqCst);
            },
        );

        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.unregister();
        assert!(!running.load(Ordering::SeqCst));
        let settled = calls.load(Ordering::SeqCst);
        assert!(settled >= 1);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(calls.load(Ordering::SeqCst), settled);
    }

    #[tokio::test(start_paused = true)]
    async fn callback_may_drop_its_own_handle() {
        let slot: Arc<Mutex<Option<RefreshHandle>>> = Arc::new(Mutex::new(None));
        let calls = Arc::new(AtomicUsize::new(0));
        let (slot_in, calls_in) = (slot.clone(), calls.clone());
        let coordinator = RefreshCoordinator::new(disabled_channel());
        let handle = coordinator.register(
            RefreshRegistration::new(Duration::ZERO, Duration::from_millis(1_000)),
            move || {
                calls_in.fetch_add(1, Ordering::SeqCst);
                slot_in.lock().expect("lock").take();
            },
        );
        *slot.lock().expect("lock") = Some(handle);

        tokio::time::sleep(Duration::from_millis(3_500)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(slot.lock().expect("lock").is_none());
    }
}
