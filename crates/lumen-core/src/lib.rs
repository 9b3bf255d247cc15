pub mod filter;
pub mod frame;
pub mod pager;
pub mod reconcile;
pub mod retention;
pub mod status;
pub mod throttle;
pub mod view_state;

pub use filter::Subscription;
pub use frame::{FrameError, ServerEvent, WireFrame};
pub use pager::{
    CursorMode, Direction, ExportFormat, HistoryFilters, HistoryPage, HistoryTable, PageCursor,
    PageMeta,
};
pub use reconcile::{reconcile_jobs, Job, KeyedCollection, ListFrame};
pub use retention::{CleanupOutcome, RetentionOverrides, RetentionStatus, Role};
pub use status::ChannelStatus;
pub use view_state::LoadState;

use chrono::Utc;

/// Wall clock as float seconds, the unit used on the wire.
pub fn now_secs() -> f64 {
    Utc::now().timestamp_millis() as f64 / 1000.0
}

pub fn parse_bool_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wall_clock_is_epoch_seconds() {
        // 2025-01-01T00:00:00Z
        assert!(now_secs() > 1_735_689_600.0);
        assert_eq!(parse_bool_flag(" Off "), Some(false));
        assert_eq!(parse_bool_flag("maybe"), None);
    }
}
