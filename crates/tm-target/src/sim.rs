//! In-process simulated target
//!
//! Stands in for the vendor target manager: operations complete a fixed
//! number of kicks after they were started, and a [`SimHandle`] can script
//! failures, TTY output, process exits, disconnects and service loss while
//! the simulator itself is owned by a dispatcher.

use crate::api::{BdRequest, FileStat, ProcessRequest, TargetApi, UploadRequest};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tm_core::{InitiateError, LinkError, OperationId, Pid, ResultCode, TargetId};
use tm_pump::{EventCategory, Notification, NotificationSource, Payload};

/// Default number of kicks before an operation completes
pub const DEFAULT_LATENCY: u64 = 2;

/// Scripted behaviour of the next loaded process
#[derive(Debug, Clone, Default)]
pub struct ProcessScript {
    /// `(kicks after load, channel, text)`
    pub output: Vec<(u64, u32, String)>,
    /// `None` keeps the process running forever
    pub exit_code: Option<i32>,
}

impl ProcessScript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn line(mut self, after_kicks: u64, channel: u32, text: impl Into<String>) -> Self {
        self.output.push((after_kicks, channel, text.into()));
        self
    }

    pub fn exit(mut self, code: i32) -> Self {
        self.exit_code = Some(code);
        self
    }
}

/// An upload as seen by the simulator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRecord {
    pub id: OperationId,
    pub host_path: PathBuf,
    pub target_path: String,
    pub forced: bool,
}

#[derive(Debug)]
enum Effect {
    None,
    WriteFile { target: TargetId, path: String, stat: FileStat },
    Mount { target: TargetId, device: String },
    Unmount { target: TargetId, device: String },
}

#[derive(Debug)]
struct Scheduled {
    due: u64,
    notification: Notification,
    effect: Effect,
}

#[derive(Debug)]
struct SimState {
    targets: BTreeSet<TargetId>,
    latency: u64,
    kicks: u64,
    next_id: u32,
    next_pid: u32,
    scheduled: Vec<Scheduled>,
    reverse_order: bool,
    service_gone: bool,
    pending_disconnect: Option<TargetId>,
    files: HashMap<(TargetId, String), FileStat>,
    mounted: HashSet<(TargetId, String)>,
    initiate_failures: HashMap<String, InitiateError>,
    completion_failures: HashMap<String, ResultCode>,
    process_script: Option<ProcessScript>,
    running: HashSet<OperationId>,
    uploads: Vec<UploadRecord>,
    tty_input: Vec<(u32, String)>,
    cancelled: Vec<OperationId>,
}

impl SimState {
    fn new() -> Self {
        Self {
            targets: BTreeSet::from([TargetId(0)]),
            latency: DEFAULT_LATENCY,
            kicks: 0,
            next_id: 1,
            next_pid: 0x0100_0300,
            scheduled: Vec::new(),
            reverse_order: false,
            service_gone: false,
            pending_disconnect: None,
            files: HashMap::new(),
            mounted: HashSet::new(),
            initiate_failures: HashMap::new(),
            completion_failures: HashMap::new(),
            process_script: None,
            running: HashSet::new(),
            uploads: Vec::new(),
            tty_input: Vec::new(),
            cancelled: Vec::new(),
        }
    }

    fn check_target(&self, target: TargetId) -> Result<(), InitiateError> {
        if self.targets.contains(&target) {
            Ok(())
        } else {
            Err(InitiateError::BadTarget(target))
        }
    }

    fn check_scripted_failure(&self, key: &str) -> Result<(), InitiateError> {
        match self.initiate_failures.get(key) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn schedule(&mut self, delay: u64, notification: Notification, effect: Effect) {
        self.scheduled.push(Scheduled {
            due: self.kicks + delay,
            notification,
            effect,
        });
    }

    /// Start an operation that completes after the configured latency
    fn start_operation(
        &mut self,
        target: TargetId,
        category: EventCategory,
        key: &str,
        effect: Effect,
    ) -> OperationId {
        let id = OperationId(self.next_id);
        self.next_id += 1;

        let result = self
            .completion_failures
            .get(key)
            .copied()
            .unwrap_or(ResultCode::OK);
        let latency = self.latency;
        self.schedule(latency, Notification::completion(target, category, id, result), effect);
        self.running.insert(id);
        id
    }

    fn apply(&mut self, effect: Effect) {
        match effect {
            Effect::None => {}
            Effect::WriteFile { target, path, stat } => {
                self.files.insert((target, path), stat);
            }
            Effect::Mount { target, device } => {
                self.mounted.insert((target, device));
            }
            Effect::Unmount { target, device } => {
                self.mounted.remove(&(target, device));
            }
        }
    }
}

fn host_stat(path: &Path) -> Result<FileStat, InitiateError> {
    match std::fs::metadata(path) {
        Ok(metadata) if metadata.is_file() => Ok(FileStat::from_metadata(&metadata)),
        _ => Err(InitiateError::BadPath(path.display().to_string())),
    }
}

/// Simulated target manager connection
#[derive(Debug)]
pub struct SimTarget {
    state: Arc<Mutex<SimState>>,
}

/// Scripting and inspection handle for a [`SimTarget`]
#[derive(Debug, Clone)]
pub struct SimHandle {
    state: Arc<Mutex<SimState>>,
}

impl SimTarget {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState::new())),
        }
    }

    pub fn with_latency(self, kicks: u64) -> Self {
        self.state.lock().latency = kicks;
        self
    }

    pub fn handle(&self) -> SimHandle {
        SimHandle {
            state: Arc::clone(&self.state),
        }
    }
}

impl Default for SimTarget {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationSource for SimTarget {
    fn kick(&mut self) -> Result<Option<Notification>, LinkError> {
        let mut state = self.state.lock();
        state.kicks += 1;

        if state.service_gone {
            return Err(LinkError::ServiceGone);
        }
        if let Some(target) = state.pending_disconnect.take() {
            return Err(LinkError::Disconnected(target));
        }

        let now = state.kicks;
        let index = if state.reverse_order {
            state.scheduled.iter().rposition(|s| s.due <= now)
        } else {
            state.scheduled.iter().position(|s| s.due <= now)
        };
        let Some(index) = index else {
            return Ok(None);
        };

        let entry = state.scheduled.remove(index);
        if let Payload::Completion { id, result } = entry.notification.payload {
            state.running.remove(&id);
            if result.is_ok() {
                state.apply(entry.effect);
            }
        }

        tracing::trace!("Sim kick {} delivered {:?}", now, entry.notification);
        Ok(Some(entry.notification))
    }
}

impl TargetApi for SimTarget {
    fn stat(&mut self, target: TargetId, path: &str) -> Result<Option<FileStat>, InitiateError> {
        let state = self.state.lock();
        state.check_target(target)?;
        Ok(state.files.get(&(target, path.to_string())).copied())
    }

    fn upload(&mut self, request: &UploadRequest) -> Result<OperationId, InitiateError> {
        let mut state = self.state.lock();
        state.check_target(request.target)?;
        state.check_scripted_failure(&request.target_path)?;
        let stat = host_stat(&request.host_path)?;

        let effect = Effect::WriteFile {
            target: request.target,
            path: request.target_path.clone(),
            stat,
        };
        let id = state.start_operation(
            request.target,
            EventCategory::FileTransfer,
            &request.target_path,
            effect,
        );
        state.uploads.push(UploadRecord {
            id,
            host_path: request.host_path.clone(),
            target_path: request.target_path.clone(),
            forced: request.forced,
        });

        tracing::debug!(
            "Sim upload {} -> {} started as {}",
            request.host_path.display(),
            request.target_path,
            id
        );
        Ok(id)
    }

    fn bd(&mut self, target: TargetId, request: &BdRequest) -> Result<OperationId, InitiateError> {
        let mut state = self.state.lock();
        state.check_target(target)?;
        let device = request.device().to_string();
        state.check_scripted_failure(&device)?;

        let effect = match request {
            BdRequest::TransferImage { image, .. } => {
                host_stat(image)?;
                Effect::None
            }
            BdRequest::Format { .. } => Effect::None,
            BdRequest::Mount { .. } => Effect::Mount { target, device: device.clone() },
            BdRequest::Unmount { .. } => {
                if !state.mounted.contains(&(target, device.clone())) {
                    return Err(InitiateError::Refused(ResultCode::BAD_PARAM));
                }
                Effect::Unmount { target, device: device.clone() }
            }
        };

        let id = state.start_operation(target, EventCategory::BdTransfer, &device, effect);
        tracing::debug!("Sim BD {} on {} started as {}", request.name(), device, id);
        Ok(id)
    }

    fn load_process(&mut self, request: &ProcessRequest) -> Result<Pid, InitiateError> {
        let mut state = self.state.lock();
        state.check_target(request.target)?;
        state.check_scripted_failure(&request.elf)?;

        let pid = Pid(state.next_pid);
        state.next_pid += 1;

        let script = state
            .process_script
            .take()
            .unwrap_or_else(|| ProcessScript::new().exit(0));
        let mut last = 0;
        for (after, channel, text) in script.output {
            last = last.max(after);
            state.schedule(after, Notification::text(request.target, channel, text), Effect::None);
        }
        if let Some(code) = script.exit_code {
            let delay = last + state.latency;
            let exit = Notification::process_exit(request.target, pid, code);
            state.schedule(delay, exit, Effect::None);
        }

        tracing::debug!("Sim loaded {} as {}", request.elf, pid);
        Ok(pid)
    }

    fn tty_send(
        &mut self,
        target: TargetId,
        channel: u32,
        text: &str,
    ) -> Result<(), InitiateError> {
        let mut state = self.state.lock();
        state.check_target(target)?;
        state.tty_input.push((channel, text.to_string()));
        Ok(())
    }

    fn cancel(&mut self, target: TargetId, id: OperationId) -> Result<(), InitiateError> {
        let mut state = self.state.lock();
        state.check_target(target)?;
        if !state.running.remove(&id) {
            return Err(InitiateError::Refused(ResultCode::BAD_PARAM));
        }

        let mut category = EventCategory::FileTransfer;
        state.scheduled.retain(|s| match s.notification.payload {
            Payload::Completion { id: pending, .. } if pending == id => {
                category = s.notification.category;
                false
            }
            _ => true,
        });
        let cancelled = Notification::completion(target, category, id, ResultCode::CANCELLED);
        state.schedule(0, cancelled, Effect::None);
        state.cancelled.push(id);
        Ok(())
    }
}

impl SimHandle {
    pub fn set_latency(&self, kicks: u64) {
        self.state.lock().latency = kicks;
    }

    pub fn add_target(&self, target: TargetId) {
        self.state.lock().targets.insert(target);
    }

    /// Make initiations on `key` (target path, device or ELF) fail synchronously
    pub fn fail_initiation(&self, key: impl Into<String>, err: InitiateError) {
        self.state.lock().initiate_failures.insert(key.into(), err);
    }

    /// Make operations on `key` complete with `code`
    pub fn fail_completion(&self, key: impl Into<String>, code: ResultCode) {
        self.state.lock().completion_failures.insert(key.into(), code);
    }

    /// Deliver due notifications newest first
    pub fn set_reverse_order(&self, reverse: bool) {
        self.state.lock().reverse_order = reverse;
    }

    /// Every subsequent kick reports the service as gone
    pub fn shut_down(&self) {
        self.state.lock().service_gone = true;
    }

    /// The next kick reports `target` as disconnected
    pub fn disconnect(&self, target: TargetId) {
        self.state.lock().pending_disconnect = Some(target);
    }

    /// Queue a notification for the next kick
    pub fn push(&self, notification: Notification) {
        self.push_after(0, notification);
    }

    pub fn push_after(&self, kicks: u64, notification: Notification) {
        self.state.lock().schedule(kicks, notification, Effect::None);
    }

    pub fn script_process(&self, script: ProcessScript) {
        self.state.lock().process_script = Some(script);
    }

    pub fn put_file(&self, target: TargetId, path: impl Into<String>, stat: FileStat) {
        self.state.lock().files.insert((target, path.into()), stat);
    }

    pub fn file(&self, target: TargetId, path: &str) -> Option<FileStat> {
        self.state.lock().files.get(&(target, path.to_string())).copied()
    }

    pub fn is_mounted(&self, target: TargetId, device: &str) -> bool {
        self.state.lock().mounted.contains(&(target, device.to_string()))
    }

    pub fn uploads(&self) -> Vec<UploadRecord> {
        self.state.lock().uploads.clone()
    }

    pub fn tty_input(&self) -> Vec<(u32, String)> {
        self.state.lock().tty_input.clone()
    }

    pub fn cancelled(&self) -> Vec<OperationId> {
        self.state.lock().cancelled.clone()
    }

    /// Operations started but not yet completed
    pub fn running(&self) -> usize {
        self.state.lock().running.len()
    }

    pub fn kicks(&self) -> u64 {
        self.state.lock().kicks
    }
}
