use crate::api::ApiClient;
use crate::channel::{EventChannel, ListenerGuard};
use crate::error::ApiError;
use crate::filter::subscribe;
use crate::refresh::{RefreshCoordinator, RefreshHandle, RefreshRegistration};
use lumen_core::reconcile::{decode_list_frame, jobs_newest_first};
use lumen_core::view_state::{Applied, Ticket};
use lumen_core::{reconcile_jobs, Job, KeyedCollection, ListFrame, LoadState, Subscription};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};

pub const JOB_EVENT_TYPE: &str = "job";

#[derive(Clone, Debug)]
pub struct JobBoardConfig {
    pub min_interval: Duration,
    pub fallback_interval: Duration,
}

impl Default for JobBoardConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_secs(2),
            fallback_interval: Duration::from_secs(15),
        }
    }
}

struct BoardState {
    jobs: Mutex<KeyedCollection<Job>>,
    load: Mutex<LoadState<()>>,
    version_tx: watch::Sender<u64>,
}

impl BoardState {
    fn lock_jobs(&self) -> MutexGuard<'_, KeyedCollection<Job>> {
        self.jobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_load(&self) -> MutexGuard<'_, LoadState<()>> {
        self.load.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn bump(&self) {
        self.version_tx.send_modify(|version| *version += 1);
    }

    fn apply_frame(&self, frame: ListFrame<Job>) {
        reconcile_jobs(&mut self.lock_jobs(), frame);
        self.bump();
    }

    fn apply_fetch(&self, ticket: Ticket, result: Result<Vec<Job>, ApiError>) {
        let applied = match result {
            Ok(items) => {
                let applied = self.lock_load().apply::<String>(ticket, Ok(()));
                if applied == Applied::Updated {
                    reconcile_jobs(&mut self.lock_jobs(), ListFrame::Snapshot { items });
                }
                applied
            }
            Err(err) => {
                warn!(event = "jobs_fetch_error", error = %err);
                self.lock_load().apply(ticket, Err(err))
            }
        };
        match applied {
            Applied::Stale => debug!(event = "jobs_fetch_stale"),
            Applied::Updated | Applied::Failed => self.bump(),
        }
    }
}

/// Live job list: push frames are reconciled as they arrive and the full list
/// is re-fetched through a throttled refresh, with polling while push is down.
pub struct JobBoard {
    state: Arc<BoardState>,
    refresh: RefreshHandle,
    _listener: ListenerGuard,
}

impl JobBoard {
    pub fn mount(client: ApiClient, channel: &EventChannel, config: JobBoardConfig) -> Self {
        let (version_tx, _) = watch::channel(0);
        let state = Arc::new(BoardState {
            jobs: Mutex::new(KeyedCollection::default()),
            load: Mutex::new(LoadState::default()),
            version_tx,
        });

        let frame_state = Arc::downgrade(&state);
        let listener = subscribe(
            channel,
            Subscription::types([JOB_EVENT_TYPE]),
            move |event| {
                let Some(state) = frame_state.upgrade() else {
                    return;
                };
                match decode_list_frame::<Job>(&event.payload) {
                    Some(frame) => state.apply_frame(frame),
                    None => debug!(event = "job_frame_ignored", id = ?event.id),
                }
            },
        );

        let fetch_state = Arc::downgrade(&state);
        let refresh = RefreshCoordinator::new(channel.clone()).register(
            RefreshRegistration::new(config.min_interval, config.fallback_interval)
                .on_types([JOB_EVENT_TYPE]),
            move || spawn_fetch(client.clone(), fetch_state.clone()),
        );

        Self {
            state,
            refresh,
            _listener: listener,
        }
    }

    pub fn snapshot(&self) -> Vec<Job> {
        let jobs = self.state.lock_jobs();
        jobs_newest_first(&jobs).into_iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.state.lock_jobs().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn error(&self) -> Option<String> {
        self.state.lock_load().error().map(str::to_string)
    }

    pub fn dismiss_error(&self) {
        self.state.lock_load().dismiss_error();
        self.state.bump();
    }

    pub fn is_loading(&self) -> bool {
        self.state.lock_load().is_loading()
    }

    pub fn refresh_runs(&self) -> u64 {
        self.refresh.runs()
    }

    /// Ticks once per visible change: a reconciled frame, an applied fetch or
    /// a banner change.
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.state.version_tx.subscribe()
    }
}

fn spawn_fetch(client: ApiClient, state: Weak<BoardState>) {
    let Some(strong) = state.upgrade() else {
        return;
    };
    let ticket = strong.lock_load().begin();
    drop(strong);

    tokio::spawn(async move {
        let result = client.list_jobs().await;
        // The board may have been unmounted while the request was in flight.
        if let Some(state) = state.upgrade() {
            state.apply_fetch(ticket, result);
        }
    });
}
