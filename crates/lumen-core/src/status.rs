use serde::{Deserialize, Serialize};

pub const STREAM_DISCONNECTED_NOTICE: &str = "stream disconnected";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ChannelStatus {
    pub enabled: bool,
    pub connected: bool,
    pub last_event_id: Option<i64>,
    pub last_event_at: Option<f64>,
    pub error_count: u64,
    pub last_error_at: Option<f64>,
}

impl ChannelStatus {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            ..Self::default()
        }
    }

    /// Push is only trusted to keep a view fresh while this holds.
    pub fn push_active(&self) -> bool {
        self.enabled && self.connected
    }

    pub fn record_open(&mut self) {
        self.connected = true;
    }

    pub fn record_event(&mut self, id: Option<i64>, at: f64) {
        if let Some(id) = id {
            self.last_event_id = Some(id);
        }
        self.last_event_at = Some(at);
    }

    pub fn record_error(&mut self, at: f64) {
        self.connected = false;
        self.error_count += 1;
        self.last_error_at = Some(at);
    }

    pub fn notice(&self) -> Option<&'static str> {
        if self.enabled && self.error_count > 0 && self.last_event_at.is_none() {
            Some(STREAM_DISCONNECTED_NOTICE)
        } else {
            None
        }
    }

    pub fn label(&self) -> &'static str {
        if !self.enabled {
            "disabled"
        } else if self.connected {
            "live"
        } else if self.error_count > 0 {
            "reconnecting"
        } else {
            "connecting"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reconnect_keeps_counters() {
        let mut status = ChannelStatus::new(true);
        status.record_open();
        status.record_event(Some(10), 1.0);
        status.record_error(2.0);
        assert!(!status.connected);
        assert_eq!(status.label(), "reconnecting");

        status.record_open();
        assert!(status.connected);
        assert_eq!(status.error_count, 1);
        assert_eq!(status.last_event_id, Some(10));
        assert_eq!(status.last_error_at, Some(2.0));
    }

    #[test]
    fn events_without_id_keep_last_known_id() {
        let mut status = ChannelStatus::new(true);
        status.record_event(Some(5), 1.0);
        status.record_event(None, 2.0);
        assert_eq!(status.last_event_id, Some(5));
        assert_eq!(status.last_event_at, Some(2.0));
    }

    #[test]
    fn notice_only_when_error_precedes_first_event() {
        let mut status = ChannelStatus::new(true);
        assert_eq!(status.notice(), None);
        status.record_error(1.0);
        assert_eq!(status.notice(), Some(STREAM_DISCONNECTED_NOTICE));

        let mut seen = ChannelStatus::new(true);
        seen.record_event(Some(1), 1.0);
        seen.record_error(2.0);
        assert_eq!(seen.notice(), None);

        assert!(!ChannelStatus::new(false).push_active());
    }
}
