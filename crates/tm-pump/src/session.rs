//! Per-command state driven by the polling loop

use crate::context::PollContext;
use crate::tracker::OperationTracker;

/// State handed to callbacks as their user data and consulted by the loop
pub trait Session<S> {
    fn poll_context(&mut self) -> &mut PollContext;

    /// The loop's completion predicate
    fn is_satisfied(&self) -> bool;

    /// Synchronous work between pump passes, e.g. forwarding typed input
    ///
    /// Returns true if anything was done, which skips the idle sleep.
    fn local_work(&mut self, _source: &mut S) -> bool {
        false
    }
}

/// Session that is satisfied once every tracked operation has completed
#[derive(Debug, Default)]
pub struct TrackedSession {
    pub context: PollContext,
    pub tracker: OperationTracker,
}

impl TrackedSession {
    pub fn new(context: PollContext) -> Self {
        Self {
            context,
            tracker: OperationTracker::new(),
        }
    }
}

impl<S> Session<S> for TrackedSession {
    fn poll_context(&mut self) -> &mut PollContext {
        &mut self.context
    }

    fn is_satisfied(&self) -> bool {
        self.tracker.is_empty()
    }
}
