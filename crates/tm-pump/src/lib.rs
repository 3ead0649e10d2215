//! Event pump and polling loop for cell-tm
//!
//! The target manager reports progress through notifications that only
//! arrive when it is kicked. This crate provides the pieces that turn that
//! into a blocking command run:
//! - [`EventDispatcher`] kicks the notification source and routes each
//!   notification to a registered callback
//! - [`OperationTracker`] keeps the operations still in flight
//! - [`PollContext`] holds deadlines, abort text and the abort flag
//! - [`PollLoop`] drives the dispatcher until a terminal [`PollState`]

pub mod clock;
pub mod context;
pub mod dispatcher;
pub mod event;
pub mod poll;
pub mod session;
pub mod tracker;

pub use clock::{Clock, ManualClock, SystemClock};
pub use context::{AbortHandle, AbortMatcher, AbortPolicy, PollContext, PollState, TimeoutKind};
pub use dispatcher::{Callback, DrainStats, EventDispatcher, PumpStatus, Registration};
pub use event::{EventCategory, Notification, NotificationSource, Payload, TargetStatus};
pub use poll::{PollLoop, PollReport, PollSettings};
pub use session::{Session, TrackedSession};
pub use tracker::{OperationHandle, OperationTracker, Removal};
