//! Load a process and stream its TTY output until it exits

use super::WaitOptions;
use crate::api::{ProcessRequest, TargetApi};
use std::io::Write;
use tm_core::config::ExitCodeConfig;
use tm_core::{Pid, Result, TargetId};
use tm_pump::{
    AbortMatcher, AbortPolicy, Clock, EventCategory, EventDispatcher, Notification, Payload,
    PollContext, PollLoop, PollReport, PollState, Session, TargetStatus,
};

/// Local input forwarded to the target
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Key {
    /// A line of text, sent with a trailing newline
    Line(String),
    /// Stop waiting
    Escape,
}

/// Non-blocking source of local input
pub trait InputSource {
    fn poll_input(&mut self) -> Option<Key>;
}

#[derive(Debug)]
pub struct RunReport<W> {
    pub poll: PollReport,
    pub pid: Pid,
    /// Exit code reported by the process, if it exited
    pub process_exit: Option<i32>,
    pub output: W,
}

impl<W> RunReport<W> {
    pub fn exit_code(&self, codes: &ExitCodeConfig) -> i32 {
        self.poll.process_exit_code(codes)
    }
}

#[derive(Debug, Clone)]
pub struct RunCommand {
    pub target: TargetId,
    pub elf: String,
    pub args: Vec<String>,
    /// TTY channel local input is sent to
    pub input_channel: u32,
    /// Stop when this text shows up in the output
    pub abort_text: Option<(String, AbortPolicy)>,
    /// Keep polling until the process exits
    pub wait_for_exit: bool,
    pub wait: WaitOptions,
}

struct RunSession<W> {
    context: PollContext,
    target: TargetId,
    pid: Pid,
    output: W,
    input: Option<Box<dyn InputSource>>,
    input_channel: u32,
    wait_for_exit: bool,
    process_exit: Option<i32>,
}

impl<S: TargetApi, W: Write> Session<S> for RunSession<W> {
    fn poll_context(&mut self) -> &mut PollContext {
        &mut self.context
    }

    fn is_satisfied(&self) -> bool {
        !self.wait_for_exit || self.process_exit.is_some()
    }

    fn local_work(&mut self, source: &mut S) -> bool {
        let Some(input) = self.input.as_mut() else {
            return false;
        };

        let text = match input.poll_input() {
            None => return false,
            Some(Key::Escape) => {
                tracing::info!("Stopped by user");
                self.context.request(PollState::Success);
                return true;
            }
            Some(Key::Line(line)) => line + "\n",
        };

        if let Err(err) = source.tty_send(self.target, self.input_channel, &text) {
            tracing::warn!("TTY send failed: {}", err);
        }
        true
    }
}

fn on_tty<W: Write>(session: &mut RunSession<W>, notification: &Notification) {
    let Payload::Text { channel, text } = &notification.payload else {
        return;
    };

    let written = session
        .output
        .write_all(text.as_bytes())
        .and_then(|_| session.output.flush());
    if let Err(err) = written {
        tracing::warn!("Failed to write TTY {} output: {}", channel, err);
    }
    session.context.feed_text(text);
}

fn on_target<W: Write>(session: &mut RunSession<W>, notification: &Notification) {
    match notification.payload {
        Payload::ProcessExit { pid, exit_code } => {
            if pid != session.pid {
                tracing::debug!("Ignoring exit of unrelated process {}", pid);
                return;
            }
            tracing::info!("Process {} exited with {}", pid, exit_code);
            session.process_exit = Some(exit_code);
            session.context.quit(exit_code);
        }
        Payload::TargetStatus(TargetStatus::Disconnected | TargetStatus::Reset) => {
            tracing::error!("Target {} lost while running", notification.target);
            session.context.request(PollState::Fatal);
        }
        _ => {}
    }
}

impl RunCommand {
    pub fn new(target: TargetId, elf: impl Into<String>) -> Self {
        Self {
            target,
            elf: elf.into(),
            args: Vec::new(),
            input_channel: 0,
            abort_text: None,
            wait_for_exit: true,
            wait: WaitOptions::default(),
        }
    }

    /// Load the process and pump until a terminal state
    ///
    /// TTY text is written to `output`, which is handed back in the report.
    pub fn run<A, K, W>(
        &self,
        api: &mut A,
        poll: &PollLoop<K>,
        output: W,
        input: Option<Box<dyn InputSource>>,
    ) -> Result<RunReport<W>>
    where
        A: TargetApi + ?Sized,
        K: Clock,
        W: Write + 'static,
    {
        let mut context = self.wait.context();
        if let Some((marker, policy)) = &self.abort_text {
            context = context.with_abort_text(AbortMatcher::new(marker.clone(), *policy)?);
        }

        let mut dispatcher = EventDispatcher::new(api);
        dispatcher.register(self.target, EventCategory::Tty, on_tty::<W>);
        dispatcher.register(self.target, EventCategory::Target, on_target::<W>);

        let request = ProcessRequest {
            target: self.target,
            elf: self.elf.clone(),
            args: self.args.clone(),
        };
        let pid = match dispatcher.source_mut().load_process(&request) {
            Ok(pid) => pid,
            Err(err) => {
                dispatcher.unregister_target(self.target);
                return Err(err.into());
            }
        };
        tracing::info!("Loaded {} on target {} as {}", self.elf, self.target, pid);

        let mut session = RunSession {
            context,
            target: self.target,
            pid,
            output,
            input,
            input_channel: self.input_channel,
            wait_for_exit: self.wait_for_exit,
            process_exit: None,
        };

        let report = poll.run(&mut dispatcher, &mut session);
        if report.state != PollState::Fatal {
            if let Err(err) = poll.settle(&mut dispatcher, &mut session) {
                tracing::warn!("Final flush failed: {}", err);
            }
        }
        dispatcher.unregister_target(self.target);

        Ok(RunReport {
            poll: report,
            pid,
            process_exit: session.process_exit,
            output: session.output,
        })
    }
}
