//! Single-flight refresh coordination
//!
//! One coordinator per client holds the only shared mutable state of the
//! refresh protocol: whether a refresh is in flight, and the FIFO queue of
//! requests parked behind it.
//!
//! Invariants:
//! - the queue is non-empty only while `refreshing` is true
//! - ending a cycle clears the flag and takes the whole queue in one
//!   critical section, so no request can be stranded
//!
//! The lock is a `std::sync::Mutex` that is never held across an await
//! point: deciding leader vs. queued and flipping the flag happen in the
//! same acquisition.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;
use tracing::debug;
use transport::{ApiResponse, RequestDescriptor};

use crate::error::{Error, Result};

/// A request that hit a 401 while a refresh was already in flight.
///
/// Holds the original (unauthenticated) descriptor and the channel its
/// caller is parked on.
pub(crate) struct PendingRequest {
    pub(crate) request: RequestDescriptor,
    pub(crate) reply: oneshot::Sender<Result<ApiResponse>>,
}

#[derive(Default)]
struct State {
    refreshing: bool,
    queue: VecDeque<PendingRequest>,
}

/// Refresh state owned by a single client instance.
#[derive(Default)]
pub struct RefreshCoordinator {
    state: Mutex<State>,
}

/// Outcome of joining the coordinator after an eligible 401.
pub(crate) enum Ticket<'a> {
    /// The caller drives the refresh; the descriptor is handed back for its replay.
    Leader {
        cycle: RefreshCycle<'a>,
        request: RequestDescriptor,
    },
    /// The caller is parked until the leader resolves the cycle.
    Queued(oneshot::Receiver<Result<ApiResponse>>),
}

impl RefreshCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a refresh cycle is in flight.
    pub fn is_refreshing(&self) -> bool {
        self.lock().refreshing
    }

    /// Number of requests parked behind the in-flight refresh.
    pub fn pending(&self) -> usize {
        self.lock().queue.len()
    }

    /// Become the leader of a new cycle, or queue behind the current one.
    pub(crate) fn join(&self, request: RequestDescriptor) -> Ticket<'_> {
        let mut state = self.lock();
        if state.refreshing {
            let (reply, receiver) = oneshot::channel();
            state.queue.push_back(PendingRequest { request, reply });
            debug!(queued = state.queue.len(), "refresh in flight, request queued");
            return Ticket::Queued(receiver);
        }

        state.refreshing = true;
        Ticket::Leader {
            cycle: RefreshCycle {
                coordinator: self,
                finished: false,
            },
            request,
        }
    }

    /// Clear the flag and take every queued request, in arrival order.
    fn end_cycle(&self) -> Vec<PendingRequest> {
        let mut state = self.lock();
        state.refreshing = false;
        state.queue.drain(..).collect()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Leadership of one refresh cycle.
///
/// Dropping an unfinished cycle (the leader's future was cancelled) ends it
/// and fails every queued request with `Error::RefreshAbandoned`.
pub(crate) struct RefreshCycle<'a> {
    coordinator: &'a RefreshCoordinator,
    finished: bool,
}

impl RefreshCycle<'_> {
    /// End the cycle and hand the queued requests to the leader to resolve.
    pub(crate) fn finish(mut self) -> Vec<PendingRequest> {
        self.finished = true;
        self.coordinator.end_cycle()
    }
}

impl Drop for RefreshCycle<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let abandoned = self.coordinator.end_cycle();
        debug!(abandoned = abandoned.len(), "refresh leader dropped mid-cycle");
        for pending in abandoned {
            let _ = pending.reply.send(Err(Error::RefreshAbandoned));
        }
    }
}
