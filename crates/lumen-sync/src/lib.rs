pub mod api;
pub mod channel;
pub mod error;
pub mod filter;
pub mod jobs;
pub mod refresh;
pub mod retention;
pub mod transport;

pub use api::ApiClient;
pub use channel::{ChannelConfig, EventChannel, ListenerGuard};
pub use error::{ApiError, ChannelError};
pub use filter::{filtered_events, subscribe, FilteredEvents};
pub use jobs::{JobBoard, JobBoardConfig, JOB_EVENT_TYPE};
pub use refresh::{RefreshCoordinator, RefreshHandle, RefreshRegistration};
pub use retention::{RetentionMonitor, RetentionPoller, RetentionView};
pub use transport::{FrameSource, HttpFrameSource};
#[cfg(any(test, feature = "test-util"))]
pub use transport::{MemoryConnection, MemoryFeed, MemorySource};
