//! Commands that drive the polling loop against a target

pub mod bd;
pub mod run;
pub mod sync;

use crate::api::TargetApi;
use std::time::Duration;
use tm_core::config::TimeoutConfig;
use tm_core::{TargetId, TimeoutPolicy};
use tm_pump::{
    AbortHandle, Clock, EventDispatcher, Notification, OperationHandle, Payload, PollContext,
    PollLoop, PollReport, PollState, TargetStatus, TrackedSession,
};

pub use bd::{BdCommand, BdReport};
pub use run::{InputSource, Key, RunCommand, RunReport};
pub use sync::{SyncAction, SyncCommand, SyncEntry, SyncReport};

/// How long to wait and what to do when giving up
#[derive(Debug, Clone, Default)]
pub struct WaitOptions {
    pub idle_timeout: Option<Duration>,
    pub absolute_timeout: Option<Duration>,
    pub on_timeout: TimeoutPolicy,
    /// Raised from outside the loop to cancel it
    pub abort: Option<AbortHandle>,
}

impl WaitOptions {
    pub fn from_config(config: &TimeoutConfig) -> Self {
        Self {
            idle_timeout: config.idle(),
            absolute_timeout: config.absolute(),
            on_timeout: config.on_timeout,
            abort: None,
        }
    }

    /// Fresh poll context carrying these deadlines
    pub fn context(&self) -> PollContext {
        let context = PollContext::new()
            .with_idle_timeout(self.idle_timeout)
            .with_absolute_timeout(self.absolute_timeout);
        match &self.abort {
            Some(handle) => context.with_abort_handle(handle.clone()),
            None => context,
        }
    }
}

/// Completion callback shared by the tracked commands
pub(crate) fn on_completion(session: &mut TrackedSession, notification: &Notification) {
    if let Payload::Completion { id, result } = notification.payload {
        tracing::debug!("Operation {} completed: {}", id, result);
        session.tracker.complete(id, result);
        session.context.record_result(result);
    }
}

/// Losing the target means nothing tracked can complete any more
pub(crate) fn on_target_status(session: &mut TrackedSession, notification: &Notification) {
    if let Payload::TargetStatus(status) = notification.payload {
        match status {
            TargetStatus::Connected => {}
            TargetStatus::Disconnected | TargetStatus::Reset => {
                tracing::error!("Target {} lost ({:?})", notification.target, status);
                session.context.request(PollState::Fatal);
            }
        }
    }
}

/// Wind down a tracked run once the loop has returned
///
/// Cancels or abandons whatever is still pending and returns it.
pub(crate) fn finish_tracked<A, K>(
    poll: &PollLoop<K>,
    dispatcher: &mut EventDispatcher<&mut A, TrackedSession>,
    session: &mut TrackedSession,
    target: TargetId,
    report: &PollReport,
    on_timeout: TimeoutPolicy,
) -> Vec<OperationHandle>
where
    A: TargetApi + ?Sized,
    K: Clock,
{
    if report.state != PollState::Fatal {
        if report.timed_out().is_some() && on_timeout == TimeoutPolicy::Cancel {
            for id in session.tracker.pending_ids() {
                match dispatcher.source_mut().cancel(target, id) {
                    Ok(()) => tracing::info!("Cancelled operation {}", id),
                    Err(err) => tracing::warn!("Failed to cancel operation {}: {}", id, err),
                }
            }
        }

        if let Err(err) = poll.settle(dispatcher, session) {
            tracing::warn!("Final flush failed: {}", err);
        }
    }

    let abandoned = session.tracker.drain_pending();
    if !abandoned.is_empty() {
        tracing::warn!("Abandoning {} pending operations", abandoned.len());
    }
    abandoned
}
