//! Event dispatcher
//!
//! Wraps the notification source and routes each kicked notification to the
//! callback registered for its `(target, category)` pair. Callbacks run
//! synchronously inside `pump`, on the calling thread, and receive the
//! caller's context as their user data.

use crate::event::{EventCategory, Notification, NotificationSource, TargetStatus};
use std::collections::HashMap;
use tm_core::{LinkError, TargetId};

/// Callback invoked for a delivered notification
pub type Callback<C> = Box<dyn FnMut(&mut C, &Notification)>;

/// Outcome of a registration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// No callback was registered for this pair before
    Registered,
    /// An earlier callback for this pair was replaced
    Replaced,
}

/// Outcome of a single pump call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpStatus {
    /// A notification was handed to a callback
    Delivered,
    /// A notification arrived but nobody was registered for it
    Unhandled,
    /// Nothing pending
    Idle,
}

/// Totals for one drain pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainStats {
    pub delivered: usize,
    pub unhandled: usize,
    /// The pass stopped at the cap with notifications possibly still queued
    pub capped: bool,
}

pub struct EventDispatcher<S, C> {
    source: S,
    handlers: HashMap<(TargetId, EventCategory), Callback<C>>,
    delivered: u64,
}

impl<S: NotificationSource, C> EventDispatcher<S, C> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            handlers: HashMap::new(),
            delivered: 0,
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Access the collaborator, e.g. to initiate operations
    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    pub fn into_source(self) -> S {
        self.source
    }

    /// Register a callback, replacing any previous one for the same pair
    pub fn register<F>(
        &mut self,
        target: TargetId,
        category: EventCategory,
        callback: F,
    ) -> Registration
    where
        F: FnMut(&mut C, &Notification) + 'static,
    {
        match self.handlers.insert((target, category), Box::new(callback)) {
            Some(_) => {
                tracing::debug!("Replaced {:?} callback for target {}", category, target);
                Registration::Replaced
            }
            None => {
                tracing::debug!("Registered {:?} callback for target {}", category, target);
                Registration::Registered
            }
        }
    }

    /// Remove a callback; returns whether one was registered
    pub fn unregister(&mut self, target: TargetId, category: EventCategory) -> bool {
        let removed = self.handlers.remove(&(target, category)).is_some();
        if removed {
            tracing::debug!("Unregistered {:?} callback for target {}", category, target);
        }
        removed
    }

    /// Remove every callback for a target
    pub fn unregister_target(&mut self, target: TargetId) -> usize {
        let before = self.handlers.len();
        self.handlers.retain(|(t, _), _| *t != target);
        before - self.handlers.len()
    }

    pub fn is_registered(&self, target: TargetId, category: EventCategory) -> bool {
        self.handlers.contains_key(&(target, category))
    }

    /// Total notifications handed to callbacks so far
    pub fn delivered(&self) -> u64 {
        self.delivered
    }

    /// Kick once and dispatch whatever came out
    ///
    /// Only fatal link errors (`LinkError::is_fatal`) are returned. A lost target is
    /// turned into a `TargetStatus::Disconnected` notification, and transient
    /// communication errors are reported as `Idle` so the caller retries.
    pub fn pump(&mut self, ctx: &mut C) -> Result<PumpStatus, LinkError> {
        let notification = match self.source.kick() {
            Ok(Some(notification)) => notification,
            Ok(None) => return Ok(PumpStatus::Idle),
            Err(err) if err.is_fatal() => return Err(err),
            Err(LinkError::Disconnected(target)) => {
                Notification::status(target, TargetStatus::Disconnected)
            }
            Err(err) => {
                tracing::warn!("Kick failed, will retry: {}", err);
                return Ok(PumpStatus::Idle);
            }
        };

        Ok(self.dispatch(ctx, &notification))
    }

    /// Pump until nothing is pending or `max` notifications were seen
    pub fn drain(&mut self, ctx: &mut C, max: usize) -> Result<DrainStats, LinkError> {
        let mut stats = DrainStats::default();

        for _ in 0..max {
            match self.pump(ctx)? {
                PumpStatus::Delivered => stats.delivered += 1,
                PumpStatus::Unhandled => stats.unhandled += 1,
                PumpStatus::Idle => return Ok(stats),
            }
        }

        stats.capped = true;
        Ok(stats)
    }

    fn dispatch(&mut self, ctx: &mut C, notification: &Notification) -> PumpStatus {
        let key = (notification.target, notification.category);
        match self.handlers.get_mut(&key) {
            Some(callback) => {
                tracing::trace!("Dispatching {:?}", notification);
                callback(ctx, notification);
                self.delivered += 1;
                PumpStatus::Delivered
            }
            None => {
                tracing::warn!(
                    "No {:?} callback for target {}, dropping notification",
                    notification.category,
                    notification.target
                );
                PumpStatus::Unhandled
            }
        }
    }
}
