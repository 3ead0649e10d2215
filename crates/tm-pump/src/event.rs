//! Notifications delivered by the target manager

use tm_core::{LinkError, OperationId, Pid, ResultCode, TargetId};

/// Notification categories a callback can be registered for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventCategory {
    /// Target state and process events
    Target,
    /// TTY stream output
    Tty,
    /// Host <-> target file transfers
    FileTransfer,
    /// BD emulator image transfers, format and mount
    BdTransfer,
}

/// Target-level state changes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetStatus {
    Connected,
    Disconnected,
    Reset,
}

/// Category-specific payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// An asynchronous operation finished
    Completion { id: OperationId, result: ResultCode },
    /// Text received on a TTY channel
    Text { channel: u32, text: String },
    /// A process on the target exited
    ProcessExit { pid: Pid, exit_code: i32 },
    TargetStatus(TargetStatus),
}

/// One pending notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub target: TargetId,
    pub category: EventCategory,
    pub payload: Payload,
}

impl Notification {
    pub fn completion(
        target: TargetId,
        category: EventCategory,
        id: OperationId,
        result: ResultCode,
    ) -> Self {
        Self {
            target,
            category,
            payload: Payload::Completion { id, result },
        }
    }

    pub fn text(target: TargetId, channel: u32, text: impl Into<String>) -> Self {
        Self {
            target,
            category: EventCategory::Tty,
            payload: Payload::Text {
                channel,
                text: text.into(),
            },
        }
    }

    pub fn process_exit(target: TargetId, pid: Pid, exit_code: i32) -> Self {
        Self {
            target,
            category: EventCategory::Target,
            payload: Payload::ProcessExit { pid, exit_code },
        }
    }

    pub fn status(target: TargetId, status: TargetStatus) -> Self {
        Self {
            target,
            category: EventCategory::Target,
            payload: Payload::TargetStatus(status),
        }
    }
}

/// The opaque "Kick": hands over at most one pending notification per call
///
/// `Ok(None)` means nothing is pending right now. `Err(LinkError::ServiceGone)`
/// means the service shut down and no further notifications will arrive.
pub trait NotificationSource {
    fn kick(&mut self) -> Result<Option<Notification>, LinkError>;
}

impl<S: NotificationSource + ?Sized> NotificationSource for &mut S {
    fn kick(&mut self) -> Result<Option<Notification>, LinkError> {
        (**self).kick()
    }
}

impl<S: NotificationSource + ?Sized> NotificationSource for Box<S> {
    fn kick(&mut self) -> Result<Option<Notification>, LinkError> {
        (**self).kick()
    }
}
