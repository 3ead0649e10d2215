//! BD emulator commands

use super::{finish_tracked, on_completion, on_target_status, WaitOptions};
use crate::api::{BdRequest, TargetApi};
use tm_core::config::ExitCodeConfig;
use tm_core::{Result, ResultCode, TargetId};
use tm_pump::{
    Clock, EventCategory, EventDispatcher, OperationHandle, PollLoop, PollReport, TrackedSession,
};

#[derive(Debug)]
pub struct BdReport {
    pub poll: PollReport,
    /// Completion status, if one arrived
    pub result: Option<ResultCode>,
    /// The operation was still pending when the loop gave up
    pub abandoned: bool,
}

impl BdReport {
    pub fn exit_code(&self, codes: &ExitCodeConfig) -> i32 {
        if !self.poll.is_success() {
            return self.poll.process_exit_code(codes);
        }
        match self.result {
            Some(result) if result.is_ok() => codes.success,
            _ => codes.operation_failure,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BdCommand {
    pub target: TargetId,
    pub request: BdRequest,
    pub wait: WaitOptions,
}

impl BdCommand {
    pub fn new(target: TargetId, request: BdRequest) -> Self {
        Self {
            target,
            request,
            wait: WaitOptions::default(),
        }
    }

    /// Start the operation and wait for it
    ///
    /// A failed initiation is returned as an error without polling.
    pub fn run<A, K>(&self, api: &mut A, poll: &PollLoop<K>) -> Result<BdReport>
    where
        A: TargetApi + ?Sized,
        K: Clock,
    {
        let mut dispatcher = EventDispatcher::new(api);
        dispatcher.register(self.target, EventCategory::BdTransfer, on_completion);
        dispatcher.register(self.target, EventCategory::Target, on_target_status);

        let id = match dispatcher.source_mut().bd(self.target, &self.request) {
            Ok(id) => id,
            Err(err) => {
                dispatcher.unregister_target(self.target);
                return Err(err.into());
            }
        };
        tracing::info!("BD {} on {} started as {}", self.request.name(), self.request.device(), id);

        let mut session = TrackedSession::new(self.wait.context());
        session
            .tracker
            .begin_handle(OperationHandle::new(id).with_label(self.request.device()))?;

        let report = poll.run(&mut dispatcher, &mut session);
        let abandoned = finish_tracked(
            poll,
            &mut dispatcher,
            &mut session,
            self.target,
            &report,
            self.wait.on_timeout,
        );
        dispatcher.unregister_target(self.target);

        let result = session.tracker.finished().iter().find(|h| h.id == id).and_then(|h| h.result);
        match result {
            Some(code) => tracing::info!("BD {} finished: {}", self.request.name(), code),
            None => tracing::warn!(
                "BD {} did not finish: {}",
                self.request.name(),
                report.describe()
            ),
        }

        Ok(BdReport {
            poll: report,
            result,
            abandoned: !abandoned.is_empty(),
        })
    }
}
