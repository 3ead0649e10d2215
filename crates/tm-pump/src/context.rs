//! Poll context: termination and cancellation state of one polling loop

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tm_core::config::ExitCodeConfig;
use tm_core::{ConfigError, ResultCode};

/// Loop state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Running,
    /// Everything tracked completed, or the session asked to stop
    Success,
    Timeout(TimeoutKind),
    /// The abort marker showed up in streamed text
    AbortMatched(AbortPolicy),
    /// The target manager service went away
    Fatal,
    /// The external abort flag was raised
    Cancelled,
}

impl PollState {
    pub fn is_terminal(self) -> bool {
        self != Self::Running
    }

    /// Process exit code for a terminal state
    ///
    /// `requested` is the code passed to an explicit quit, if any.
    pub fn exit_code(self, requested: Option<i32>, codes: &ExitCodeConfig) -> i32 {
        match self {
            Self::Success => requested.unwrap_or(codes.success),
            Self::AbortMatched(AbortPolicy::Success) => codes.success,
            Self::AbortMatched(AbortPolicy::Failure) => codes.abort_match_failure,
            Self::Timeout(_) => codes.timeout,
            Self::Fatal | Self::Running => codes.fatal,
            Self::Cancelled => codes.cancelled,
        }
    }
}

/// Which deadline fired
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutKind {
    /// No notification for longer than the idle duration
    Idle,
    /// Overall time limit since loop entry
    Absolute,
}

/// Whether seeing the abort marker counts as success
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortPolicy {
    Success,
    Failure,
}

/// Cooperative cancellation flag, safe to raise from another thread
#[derive(Debug, Clone, Default)]
pub struct AbortHandle(Arc<AtomicBool>);

impl AbortHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Finds a marker string in a stream of text chunks
///
/// Only the trailing `marker.chars().count()` characters of earlier chunks are
/// kept, which is enough to catch a marker split across chunk boundaries.
#[derive(Debug, Clone)]
pub struct AbortMatcher {
    marker: String,
    marker_chars: usize,
    window: String,
    policy: AbortPolicy,
}

impl AbortMatcher {
    pub fn new(marker: impl Into<String>, policy: AbortPolicy) -> Result<Self, ConfigError> {
        let marker = marker.into();
        if marker.is_empty() {
            return Err(ConfigError::Invalid {
                field: "abort_text",
                reason: "marker must not be empty".to_string(),
            });
        }

        Ok(Self {
            marker_chars: marker.chars().count(),
            window: String::with_capacity(marker.len() * 2),
            marker,
            policy,
        })
    }

    pub fn marker(&self) -> &str {
        &self.marker
    }

    pub fn policy(&self) -> AbortPolicy {
        self.policy
    }

    /// Feed the next chunk; returns true once the marker has been seen
    pub fn feed(&mut self, chunk: &str) -> bool {
        self.window.push_str(chunk);
        if self.window.contains(&self.marker) {
            self.window.clear();
            return true;
        }

        if let Some((start, _)) = self.window.char_indices().rev().nth(self.marker_chars - 1) {
            self.window.drain(..start);
        }
        false
    }

    /// Text currently retained from earlier chunks
    pub fn window(&self) -> &str {
        &self.window
    }
}

#[derive(Debug, Clone)]
pub struct PollContext {
    quit: Option<PollState>,
    exit_code: Option<i32>,
    idle_timeout: Option<Duration>,
    idle_deadline: Option<Instant>,
    absolute_timeout: Option<Duration>,
    absolute_deadline: Option<Instant>,
    abort_text: Option<AbortMatcher>,
    abort: AbortHandle,
    events: u64,
    last_result: Option<ResultCode>,
}

impl PollContext {
    pub fn new() -> Self {
        Self {
            quit: None,
            exit_code: None,
            idle_timeout: None,
            idle_deadline: None,
            absolute_timeout: None,
            absolute_deadline: None,
            abort_text: None,
            abort: AbortHandle::new(),
            events: 0,
            last_result: None,
        }
    }

    /// Deadline that resets on every delivered notification
    pub fn with_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Deadline fixed at loop entry
    pub fn with_absolute_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.absolute_timeout = timeout;
        self
    }

    pub fn with_abort_text(mut self, matcher: AbortMatcher) -> Self {
        self.abort_text = Some(matcher);
        self
    }

    pub fn with_abort_handle(mut self, handle: AbortHandle) -> Self {
        self.abort = handle;
        self
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    /// Compute deadlines relative to loop entry
    pub fn arm(&mut self, now: Instant) {
        self.idle_deadline = self.idle_timeout.map(|d| now + d);
        self.absolute_deadline = self.absolute_timeout.map(|d| now + d);
    }

    /// Record genuine progress: `delivered` notifications reached callbacks
    pub fn note_progress(&mut self, now: Instant, delivered: usize) {
        if delivered == 0 {
            return;
        }
        self.events += delivered as u64;
        if let Some(timeout) = self.idle_timeout {
            self.idle_deadline = Some(now + timeout);
        }
    }

    /// Ask the loop to stop successfully with the given exit code
    pub fn quit(&mut self, exit_code: i32) {
        if self.quit.is_none() {
            self.request(PollState::Success);
            self.exit_code = Some(exit_code);
        }
    }

    /// Ask the loop to stop in `state`; the first request wins
    pub fn request(&mut self, state: PollState) {
        if self.quit.is_none() && state.is_terminal() {
            tracing::debug!("Poll loop stop requested: {:?}", state);
            self.quit = Some(state);
        }
    }

    pub fn quit_requested(&self) -> Option<PollState> {
        self.quit
    }

    pub fn is_aborted(&self) -> bool {
        self.abort.is_aborted()
    }

    /// Scan streamed text for the abort marker
    ///
    /// Returns true if this chunk completed a match.
    pub fn feed_text(&mut self, chunk: &str) -> bool {
        let Some(matcher) = self.abort_text.as_mut() else {
            return false;
        };

        if matcher.feed(chunk) {
            let policy = matcher.policy();
            tracing::info!("Abort text '{}' matched", matcher.marker());
            self.request(PollState::AbortMatched(policy));
            true
        } else {
            false
        }
    }

    /// The deadline that has passed at `now`, if any
    pub fn expired(&self, now: Instant) -> Option<TimeoutKind> {
        if self.absolute_deadline.is_some_and(|d| now > d) {
            return Some(TimeoutKind::Absolute);
        }
        if self.idle_deadline.is_some_and(|d| now > d) {
            return Some(TimeoutKind::Idle);
        }
        None
    }

    pub fn idle_deadline(&self) -> Option<Instant> {
        self.idle_deadline
    }

    pub fn absolute_deadline(&self) -> Option<Instant> {
        self.absolute_deadline
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    pub fn set_exit_code(&mut self, code: i32) {
        self.exit_code = Some(code);
    }

    /// Remember the latest status reported by the target
    pub fn record_result(&mut self, result: ResultCode) {
        self.last_result = Some(result);
    }

    pub fn last_result(&self) -> Option<ResultCode> {
        self.last_result
    }

    /// Notifications delivered while this context was live
    pub fn events(&self) -> u64 {
        self.events
    }
}

impl Default for PollContext {
    fn default() -> Self {
        Self::new()
    }
}
