use crate::channel::{EventChannel, ListenerGuard};
use lumen_core::{ServerEvent, Subscription};
use tokio::sync::mpsc;

pub fn subscribe<F>(channel: &EventChannel, subscription: Subscription, on_event: F) -> ListenerGuard
where
    F: Fn(&ServerEvent) + Send + Sync + 'static,
{
    channel.listen(move |event| {
        if subscription.matches(event) {
            on_event(event);
        }
    })
}

/// Receiver flavour of [`subscribe`]; the listener detaches when this drops.
pub struct FilteredEvents {
    rx: mpsc::UnboundedReceiver<ServerEvent>,
    _guard: ListenerGuard,
}

impl FilteredEvents {
    pub async fn recv(&mut self) -> Option<ServerEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<ServerEvent> {
        self.rx.try_recv().ok()
    }
}

pub fn filtered_events(channel: &EventChannel, subscription: Subscription) -> FilteredEvents {
    let (tx, rx) = mpsc::unbounded_channel();
    let guard = subscribe(channel, subscription, move |event| {
        let _ = tx.send(event.clone());
    });
    FilteredEvents { rx, _guard: guard }
}
