use crate::api::ApiClient;
use crate::error::ApiError;
use lumen_core::pager::HistoryTable;
use lumen_core::{CleanupOutcome, LoadState, RetentionOverrides, RetentionStatus, Role};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

pub const DEFAULT_RETENTION_POLL: Duration = Duration::from_secs(30);

/// What a retention panel renders: last good status plus the error banner.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetentionView {
    pub status: Option<RetentionStatus>,
    pub error: Option<String>,
    pub cleanup_permitted: bool,
}

pub struct RetentionMonitor {
    client: ApiClient,
    table: HistoryTable,
    role: Role,
    state: Mutex<LoadState<RetentionStatus>>,
    view_tx: watch::Sender<RetentionView>,
}

impl RetentionMonitor {
    pub fn new(client: ApiClient, table: HistoryTable, role: Role) -> Arc<Self> {
        let (view_tx, _) = watch::channel(RetentionView {
            cleanup_permitted: role.can_run_cleanup(),
            ..RetentionView::default()
        });
        Arc::new(Self {
            client,
            table,
            role,
            state: Mutex::new(LoadState::default()),
            view_tx,
        })
    }

    pub fn table(&self) -> HistoryTable {
        self.table
    }

    pub fn cleanup_permitted(&self) -> bool {
        self.role.can_run_cleanup()
    }

    pub fn view(&self) -> RetentionView {
        self.view_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<RetentionView> {
        self.view_tx.subscribe()
    }

    pub fn dismiss_error(&self) {
        self.lock_state().dismiss_error();
        self.publish();
    }

    pub async fn fetch_status(&self) -> Result<RetentionStatus, ApiError> {
        let ticket = self.lock_state().begin();
        let result = self
            .client
            .retention_status(self.table)
            .await
            .map(|status| status.checked(lumen_core::now_secs()));
        {
            let mut state = self.lock_state();
            match &result {
                Ok(status) => {
                    state.apply::<String>(ticket, Ok(status.clone()));
                }
                Err(err) => {
                    state.apply::<&ApiError>(ticket, Err(err));
                }
            }
        }
        self.publish();
        if let Ok(status) = &result {
            if let Some(warning) = status.warning() {
                warn!(event = "retention_drift", table = self.table.as_str(), warning = %warning);
            }
        }
        result
    }

    /// Drift is only cleared by a fresh status fetch after the run, never
    /// assumed from the cleanup response.
    pub async fn run_cleanup(
        &self,
        overrides: Option<RetentionOverrides>,
    ) -> Result<CleanupOutcome, ApiError> {
        if !self.cleanup_permitted() {
            let err = ApiError::Forbidden {
                message: format!(
                    "role '{}' may not run retention cleanup on {}",
                    self.role, self.table
                ),
            };
            self.lock_state().report_error(&err);
            self.publish();
            return Err(err);
        }

        let outcome = match self.client.run_retention(self.table, overrides).await {
            Ok(outcome) => outcome,
            Err(err) => {
                self.lock_state().report_error(&err);
                self.publish();
                return Err(err);
            }
        };
        info!(
            event = "retention_cleanup",
            table = self.table.as_str(),
            deleted_by_rows = outcome.deleted_by_rows,
            deleted_by_days = outcome.deleted_by_days
        );

        if let Err(err) = self.fetch_status().await {
            warn!(event = "retention_refetch_error", table = self.table.as_str(), error = %err);
        }
        Ok(outcome)
    }

    /// Polls on a fixed interval, independent of push events. The first poll
    /// is immediate.
    pub fn poll(self: &Arc<Self>, interval: Duration) -> RetentionPoller {
        let monitor = self.clone();
        let period = if interval.is_zero() {
            DEFAULT_RETENTION_POLL
        } else {
            interval
        };
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(err) = monitor.fetch_status().await {
                    warn!(
                        event = "retention_poll_error",
                        table = monitor.table.as_str(),
                        error = %err
                    );
                }
            }
        });
        RetentionPoller { task }
    }

    fn lock_state(&self) -> MutexGuard<'_, LoadState<RetentionStatus>> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn publish(&self) {
        let view = {
            let state = self.lock_state();
            RetentionView {
                status: state.data().cloned(),
                error: state.error().map(str::to_string),
                cleanup_permitted: self.cleanup_permitted(),
            }
        };
        self.view_tx.send_replace(view);
    }
}

#[must_use = "dropping the poller stops polling"]
pub struct RetentionPoller {
    task: JoinHandle<()>,
}

impl RetentionPoller {
    pub fn stop(self) {}
}

impl Drop for RetentionPoller {
    fn drop(&mut self) {
        self.task.abort();
    }
}
