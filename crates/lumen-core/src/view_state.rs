use std::fmt::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Ticket(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Updated,
    Failed,
    Stale,
}

/// Data held by one view plus its dismissible error banner.
///
/// Requests are numbered by [`LoadState::begin`]; a response is applied only
/// if no newer request has been applied before it. Failures keep the previous
/// data and only set the banner.
#[derive(Debug, Clone)]
pub struct LoadState<T> {
    data: Option<T>,
    error: Option<String>,
    issued: u64,
    applied: u64,
    in_flight: usize,
}

impl<T> Default for LoadState<T> {
    fn default() -> Self {
        Self {
            data: None,
            error: None,
            issued: 0,
            applied: 0,
            in_flight: 0,
        }
    }
}

impl<T> LoadState<T> {
    pub fn begin(&mut self) -> Ticket {
        self.issued += 1;
        self.in_flight += 1;
        Ticket(self.issued)
    }

    pub fn apply<E: Display>(&mut self, ticket: Ticket, result: Result<T, E>) -> Applied {
        self.in_flight = self.in_flight.saturating_sub(1);
        if ticket.0 <= self.applied {
            return Applied::Stale;
        }
        self.applied = ticket.0;
        match result {
            Ok(data) => {
                self.data = Some(data);
                self.error = None;
                Applied::Updated
            }
            Err(err) => {
                self.error = Some(err.to_string());
                Applied::Failed
            }
        }
    }

    pub fn data(&self) -> Option<&T> {
        self.data.as_ref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Raises the banner for a failure unrelated to loading (a rejected
    /// action, say) without invalidating requests still in flight.
    pub fn report_error<E: Display>(&mut self, err: E) {
        self.error = Some(err.to_string());
    }

    pub fn dismiss_error(&mut self) {
        self.error = None;
    }

    pub fn is_loading(&self) -> bool {
        self.in_flight > 0
    }

    pub fn reset(&mut self) {
        self.data = None;
        self.error = None;
        self.applied = self.issued;
    }
}
