//! Polling loop / timeout controller
//!
//! Drives the dispatcher until the session is satisfied, a stop is
//! requested, a deadline passes, the abort flag is raised, or the service
//! goes away. Everything is cooperative and single threaded: when a pass
//! finds nothing to deliver and there is no local work, the loop sleeps one
//! quantum before kicking again.

use crate::clock::{Clock, SystemClock};
use crate::context::{AbortPolicy, PollState, TimeoutKind};
use crate::dispatcher::{DrainStats, EventDispatcher, PumpStatus};
use crate::event::NotificationSource;
use crate::session::Session;
use std::time::Duration;
use tm_core::config::{ExitCodeConfig, PollConfig};
use tm_core::{LinkError, ResultCode};

/// Loop tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    /// Sleep quantum after an empty pass
    pub interval: Duration,
    /// Delay before the final flush in `settle`
    pub grace: Duration,
    /// Notifications drained per pass before deadlines are rechecked
    pub max_drain: usize,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self::from(&PollConfig::default())
    }
}

impl From<&PollConfig> for PollSettings {
    fn from(config: &PollConfig) -> Self {
        Self {
            interval: config.interval(),
            grace: config.grace(),
            max_drain: config.max_drain.max(1),
        }
    }
}

/// What the loop ended with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollReport {
    pub state: PollState,
    /// Code passed to an explicit quit, if any
    pub exit_code: Option<i32>,
    pub last_result: Option<ResultCode>,
    /// Notifications delivered to callbacks
    pub events: u64,
    pub iterations: u64,
    pub elapsed: Duration,
}

impl PollReport {
    /// Report for a run that never needed to enter the loop
    pub fn immediate(state: PollState) -> Self {
        Self {
            state,
            exit_code: None,
            last_result: None,
            events: 0,
            iterations: 0,
            elapsed: Duration::ZERO,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(
            self.state,
            PollState::Success | PollState::AbortMatched(AbortPolicy::Success)
        )
    }

    pub fn timed_out(&self) -> Option<TimeoutKind> {
        match self.state {
            PollState::Timeout(kind) => Some(kind),
            _ => None,
        }
    }

    /// Process exit code for this outcome
    pub fn process_exit_code(&self, codes: &ExitCodeConfig) -> i32 {
        self.state.exit_code(self.exit_code, codes)
    }

    /// One-line description for the command line
    pub fn describe(&self) -> String {
        match self.state {
            PollState::Running => "still running".to_string(),
            PollState::Success => match self.exit_code {
                Some(code) => format!("finished (exit code {})", code),
                None => "finished".to_string(),
            },
            PollState::Timeout(TimeoutKind::Idle) => {
                format!("timed out waiting for activity after {:?}", self.elapsed)
            }
            PollState::Timeout(TimeoutKind::Absolute) => {
                format!("timed out after {:?}", self.elapsed)
            }
            PollState::AbortMatched(_) => "abort text matched".to_string(),
            PollState::Fatal => "target manager service lost".to_string(),
            PollState::Cancelled => "cancelled".to_string(),
        }
    }
}

pub struct PollLoop<K = SystemClock> {
    settings: PollSettings,
    clock: K,
}

impl PollLoop<SystemClock> {
    pub fn new(settings: PollSettings) -> Self {
        Self::with_clock(settings, SystemClock)
    }
}

impl<K: Clock> PollLoop<K> {
    pub fn with_clock(settings: PollSettings, clock: K) -> Self {
        Self { settings, clock }
    }

    pub fn settings(&self) -> &PollSettings {
        &self.settings
    }

    pub fn clock(&self) -> &K {
        &self.clock
    }

    /// Run until a terminal state is reached
    pub fn run<S, C>(&self, dispatcher: &mut EventDispatcher<S, C>, session: &mut C) -> PollReport
    where
        S: NotificationSource,
        C: Session<S>,
    {
        let started = self.clock.now();
        session.poll_context().arm(started);
        let mut iterations = 0u64;

        let state = loop {
            iterations += 1;
            let delivered = self.pump_pass(dispatcher, session);

            let now = self.clock.now();
            session.poll_context().note_progress(now, delivered);

            if let Some(state) = session.poll_context().quit_requested() {
                break state;
            }
            if session.is_satisfied() {
                break PollState::Success;
            }

            let ctx = session.poll_context();
            if ctx.is_aborted() {
                break PollState::Cancelled;
            }
            if let Some(kind) = ctx.expired(now) {
                break PollState::Timeout(kind);
            }

            let worked = session.local_work(dispatcher.source_mut());
            if delivered == 0 && !worked {
                self.clock.sleep(self.settings.interval);
            }
        };

        let ctx = session.poll_context();
        let report = PollReport {
            state,
            exit_code: ctx.exit_code(),
            last_result: ctx.last_result(),
            events: ctx.events(),
            iterations,
            elapsed: self.clock.now().saturating_duration_since(started),
        };

        match state {
            PollState::Fatal => tracing::error!("Poll loop ended: {}", report.describe()),
            PollState::Timeout(_) => tracing::warn!("Poll loop ended: {}", report.describe()),
            _ => tracing::info!(
                "Poll loop ended: {} ({} events, {} iterations)",
                report.describe(),
                report.events,
                iterations
            ),
        }
        report
    }

    /// Grace-period flush after the loop: wait briefly, then drain once
    ///
    /// Call this while callbacks are still registered so a notification that
    /// raced the loop's exit check still reaches the session.
    pub fn settle<S, C>(
        &self,
        dispatcher: &mut EventDispatcher<S, C>,
        session: &mut C,
    ) -> Result<DrainStats, LinkError>
    where
        S: NotificationSource,
    {
        self.clock.sleep(self.settings.grace);
        let stats = dispatcher.drain(session, self.settings.max_drain)?;
        if stats.delivered > 0 {
            tracing::debug!("Flushed {} late notifications", stats.delivered);
        }
        Ok(stats)
    }

    /// Kick until idle, the drain cap, a stop request, or service loss
    fn pump_pass<S, C>(&self, dispatcher: &mut EventDispatcher<S, C>, session: &mut C) -> usize
    where
        S: NotificationSource,
        C: Session<S>,
    {
        let mut delivered = 0;

        for _ in 0..self.settings.max_drain {
            match dispatcher.pump(session) {
                Ok(PumpStatus::Delivered) => delivered += 1,
                Ok(PumpStatus::Unhandled) => {}
                Ok(PumpStatus::Idle) => break,
                Err(err) => {
                    tracing::error!("Notification pump failed: {}", err);
                    session.poll_context().request(PollState::Fatal);
                    break;
                }
            }

            if session.poll_context().quit_requested().is_some() {
                break;
            }
        }

        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::context::PollContext;
    use crate::event::{EventCategory, Notification};
    use crate::session::TrackedSession;
    use std::collections::VecDeque;
    use tm_core::TargetId;

    struct Quiet {
        kicks: usize,
    }

    impl NotificationSource for Quiet {
        fn kick(&mut self) -> Result<Option<Notification>, LinkError> {
            self.kicks += 1;
            Ok(None)
        }
    }

    struct Flood;

    impl NotificationSource for Flood {
        fn kick(&mut self) -> Result<Option<Notification>, LinkError> {
            Ok(Some(Notification::text(TargetId(0), 0, "spam")))
        }
    }

    fn settings() -> PollSettings {
        PollSettings {
            interval: Duration::from_millis(20),
            grace: Duration::from_millis(50),
            max_drain: 8,
        }
    }

    #[test]
    fn test_empty_tracker_succeeds_immediately() {
        let clock = ManualClock::new();
        let poll = PollLoop::with_clock(settings(), &clock);
        let mut dispatcher = EventDispatcher::new(Quiet { kicks: 0 });
        let mut session = TrackedSession::new(PollContext::new());

        let report = poll.run(&mut dispatcher, &mut session);
        assert_eq!(report.state, PollState::Success);
        assert_eq!(report.iterations, 1);
        assert_eq!(clock.slept(), Duration::ZERO);
    }

    #[test]
    fn test_sleeps_between_empty_passes() {
        let clock = ManualClock::new();
        let poll = PollLoop::with_clock(settings(), &clock);
        let mut dispatcher = EventDispatcher::new(Quiet { kicks: 0 });
        let mut session = TrackedSession::new(
            PollContext::new().with_absolute_timeout(Some(Duration::from_millis(100))),
        );
        session.tracker.begin(tm_core::OperationId(1)).unwrap();

        let report = poll.run(&mut dispatcher, &mut session);
        assert_eq!(report.state, PollState::Timeout(TimeoutKind::Absolute));
        assert_eq!(dispatcher.source().kicks as u64, report.iterations);
        assert_eq!(clock.slept(), settings().interval * (report.iterations as u32 - 1));
    }

    #[test]
    fn test_drain_cap_still_checks_deadlines() {
        let clock = ManualClock::new();
        let poll = PollLoop::with_clock(settings(), &clock);
        let mut dispatcher = EventDispatcher::new(Flood);
        let mut session = TrackedSession::new(PollContext::new());
        session.tracker.begin(tm_core::OperationId(1)).unwrap();
        let handle = session.context.abort_handle();

        // Raise the abort flag from inside a callback after a few passes.
        let mut seen = 0;
        dispatcher.register(TargetId(0), EventCategory::Tty, move |_: &mut TrackedSession, _| {
            seen += 1;
            if seen == 20 {
                handle.abort();
            }
        });

        let report = poll.run(&mut dispatcher, &mut session);
        assert_eq!(report.state, PollState::Cancelled);
        assert_eq!(report.events, 24);
    }

    #[test]
    fn test_settle_flushes_late_completion() {
        struct Late {
            queue: VecDeque<Notification>,
        }
        impl NotificationSource for Late {
            fn kick(&mut self) -> Result<Option<Notification>, LinkError> {
                Ok(self.queue.pop_front())
            }
        }

        let clock = ManualClock::new();
        let poll = PollLoop::with_clock(settings(), &clock);
        let late = Notification::completion(
            TargetId(0),
            EventCategory::FileTransfer,
            tm_core::OperationId(9),
            ResultCode::OK,
        );
        let mut dispatcher = EventDispatcher::new(Late { queue: VecDeque::from([late]) });
        dispatcher.register(TargetId(0), EventCategory::FileTransfer, |s: &mut TrackedSession, n| {
            if let crate::event::Payload::Completion { id, result } = n.payload {
                s.tracker.complete(id, result);
            }
        });
        let mut session = TrackedSession::new(PollContext::new());
        session.tracker.begin(tm_core::OperationId(9)).unwrap();

        let stats = poll.settle(&mut dispatcher, &mut session).unwrap();
        assert_eq!(stats.delivered, 1);
        assert!(session.tracker.is_empty());
        assert_eq!(session.tracker.finished().len(), 1);
        assert_eq!(clock.slept(), settings().grace);
    }

    #[test]
    fn test_report_description() {
        let report = PollReport {
            state: PollState::Success,
            exit_code: Some(4),
            last_result: None,
            events: 0,
            iterations: 1,
            elapsed: Duration::ZERO,
        };
        assert_eq!(report.describe(), "finished (exit code 4)");
        assert!(report.is_success());
        assert_eq!(report.process_exit_code(&ExitCodeConfig::default()), 4);
    }
}
