//! Directory sync (host -> target)
//!
//! Walks a host directory, compares each file with its counterpart on the
//! target and uploads whatever differs in size or modification time. All
//! uploads are started up front and then waited on together; a file whose
//! upload cannot be started is reported without holding up the rest.

use super::{finish_tracked, on_completion, on_target_status, WaitOptions};
use crate::api::{FileStat, TargetApi, UploadRequest};
use std::path::{Path, PathBuf};
use tm_core::config::ExitCodeConfig;
use tm_core::{InitiateError, Result, ResultCode, TargetId, TmError};
use tm_pump::{
    Clock, EventCategory, EventDispatcher, OperationHandle, PollLoop, PollReport, PollState,
    TrackedSession,
};
use walkdir::WalkDir;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncAction {
    Upload,
    /// Target copy already matches
    Skip,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncEntry {
    pub host_path: PathBuf,
    pub target_path: String,
    pub action: SyncAction,
}

#[derive(Debug)]
pub struct SyncReport {
    pub poll: PollReport,
    /// Uploads that completed, successfully or not
    pub completed: Vec<OperationHandle>,
    pub skipped: Vec<String>,
    /// Files whose stat or upload could not be started
    pub initiation_failures: Vec<(String, InitiateError)>,
    /// Uploads still pending when the loop gave up
    pub abandoned: Vec<OperationHandle>,
    /// Most severe completion status seen
    pub worst_result: Option<ResultCode>,
}

impl SyncReport {
    pub fn failed(&self) -> impl Iterator<Item = &OperationHandle> {
        self.completed.iter().filter(|h| h.failed())
    }

    pub fn uploaded(&self) -> usize {
        self.completed.iter().filter(|h| !h.failed()).count()
    }

    pub fn exit_code(&self, codes: &ExitCodeConfig) -> i32 {
        if !self.poll.is_success() {
            return self.poll.process_exit_code(codes);
        }
        if !self.initiation_failures.is_empty() || self.failed().next().is_some() {
            return codes.operation_failure;
        }
        codes.success
    }
}

#[derive(Debug, Clone)]
pub struct SyncCommand {
    pub target: TargetId,
    pub host_dir: PathBuf,
    /// Target directory, e.g. `/app_home/game`
    pub target_dir: String,
    /// Upload everything, ignoring size and timestamp matches
    pub force: bool,
    pub wait: WaitOptions,
}

impl SyncCommand {
    pub fn new(
        target: TargetId,
        host_dir: impl Into<PathBuf>,
        target_dir: impl Into<String>,
    ) -> Self {
        Self {
            target,
            host_dir: host_dir.into(),
            target_dir: target_dir.into(),
            force: false,
            wait: WaitOptions::default(),
        }
    }

    /// Decide what to do with every host file
    ///
    /// Files whose target stat fails are returned separately.
    pub fn plan<A: TargetApi + ?Sized>(
        &self,
        api: &mut A,
    ) -> Result<(Vec<SyncEntry>, Vec<(String, InitiateError)>)> {
        if !self.host_dir.is_dir() {
            return Err(InitiateError::BadPath(self.host_dir.display().to_string()).into());
        }

        let mut entries = Vec::new();
        let mut failures = Vec::new();

        for entry in WalkDir::new(&self.host_dir).sort_by_file_name() {
            let entry = entry.map_err(|e| TmError::Io(e.into()))?;
            if !entry.file_type().is_file() {
                continue;
            }

            let host_path = entry.path().to_path_buf();
            let target_path = target_path_for(&self.target_dir, &self.host_dir, &host_path);
            let metadata = entry.metadata().map_err(|e| TmError::Io(e.into()))?;
            let host_stat = FileStat::from_metadata(&metadata);

            let action = if self.force {
                SyncAction::Upload
            } else {
                match api.stat(self.target, &target_path) {
                    Ok(Some(existing)) if existing == host_stat => SyncAction::Skip,
                    Ok(_) => SyncAction::Upload,
                    Err(err) => {
                        tracing::warn!("Cannot stat {}: {}", target_path, err);
                        failures.push((target_path, err));
                        continue;
                    }
                }
            };

            entries.push(SyncEntry {
                host_path,
                target_path,
                action,
            });
        }

        Ok((entries, failures))
    }

    pub fn run<A, K>(&self, api: &mut A, poll: &PollLoop<K>) -> Result<SyncReport>
    where
        A: TargetApi + ?Sized,
        K: Clock,
    {
        let (plan, mut initiation_failures) = self.plan(api)?;
        tracing::info!(
            "Syncing {} -> {} on target {} ({} files)",
            self.host_dir.display(),
            self.target_dir,
            self.target,
            plan.len()
        );

        let mut dispatcher = EventDispatcher::new(api);
        dispatcher.register(self.target, EventCategory::FileTransfer, on_completion);
        dispatcher.register(self.target, EventCategory::Target, on_target_status);

        let mut session = TrackedSession::new(self.wait.context());
        let mut skipped = Vec::new();

        for entry in plan {
            if entry.action == SyncAction::Skip {
                tracing::debug!("Skipping unchanged {}", entry.target_path);
                skipped.push(entry.target_path);
                continue;
            }

            let request = UploadRequest {
                target: self.target,
                host_path: entry.host_path,
                target_path: entry.target_path,
                forced: self.force,
            };
            match dispatcher.source_mut().upload(&request) {
                Ok(id) => {
                    let handle = OperationHandle::new(id)
                        .with_label(request.target_path.clone())
                        .forced(self.force);
                    if let Err(err) = session.tracker.begin_handle(handle) {
                        tracing::warn!("Upload of {} not tracked: {}", request.target_path, err);
                        initiation_failures
                            .push((request.target_path, InitiateError::DuplicateId(id)));
                    }
                }
                Err(err) => {
                    tracing::warn!("Upload of {} not started: {}", request.target_path, err);
                    initiation_failures.push((request.target_path, err));
                }
            }
        }

        let report = if session.tracker.is_empty() {
            PollReport::immediate(PollState::Success)
        } else {
            poll.run(&mut dispatcher, &mut session)
        };

        let abandoned = finish_tracked(
            poll,
            &mut dispatcher,
            &mut session,
            self.target,
            &report,
            self.wait.on_timeout,
        );
        dispatcher.unregister_target(self.target);

        let completed = session.tracker.finished().to_vec();
        tracing::info!(
            "Sync finished: {} uploaded, {} skipped, {} failed to start, {} abandoned",
            completed.len(),
            skipped.len(),
            initiation_failures.len(),
            abandoned.len()
        );

        Ok(SyncReport {
            poll: report,
            completed,
            skipped,
            initiation_failures,
            abandoned,
            worst_result: session.tracker.worst_result(),
        })
    }
}

/// Target path of a host file below `host_root`, always `/`-separated
fn target_path_for(target_dir: &str, host_root: &Path, host_path: &Path) -> String {
    let relative = host_path.strip_prefix(host_root).unwrap_or(host_path);
    let mut path = target_dir.trim_end_matches('/').to_string();
    for component in relative.components() {
        path.push('/');
        path.push_str(&component.as_os_str().to_string_lossy());
    }
    path
}
