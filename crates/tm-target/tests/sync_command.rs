//! Directory sync against the simulated target

mod common;

use common::{poll_loop, write_tree, T0};
use std::time::Duration;
use tm_core::config::ExitCodeConfig;
use tm_core::{InitiateError, LinkError, OperationId, Pid, ResultCode, TargetId};
use tm_pump::{AbortHandle, ManualClock, Notification, NotificationSource, PollState, TimeoutKind};
use tm_target::{
    BdRequest, FileStat, ProcessRequest, SimTarget, SyncAction, SyncCommand, TargetApi,
    UploadRequest,
};

/// Hands back an id that is already in flight for one path
struct RepeatsId {
    inner: SimTarget,
    path: &'static str,
    id: OperationId,
}

impl NotificationSource for RepeatsId {
    fn kick(&mut self) -> Result<Option<Notification>, LinkError> {
        self.inner.kick()
    }
}

impl TargetApi for RepeatsId {
    fn stat(&mut self, target: TargetId, path: &str) -> Result<Option<FileStat>, InitiateError> {
        self.inner.stat(target, path)
    }

    fn upload(&mut self, request: &UploadRequest) -> Result<OperationId, InitiateError> {
        if request.target_path == self.path {
            return Ok(self.id);
        }
        self.inner.upload(request)
    }

    fn bd(&mut self, target: TargetId, request: &BdRequest) -> Result<OperationId, InitiateError> {
        self.inner.bd(target, request)
    }

    fn load_process(&mut self, request: &ProcessRequest) -> Result<Pid, InitiateError> {
        self.inner.load_process(request)
    }

    fn tty_send(
        &mut self,
        target: TargetId,
        channel: u32,
        text: &str,
    ) -> Result<(), InitiateError> {
        self.inner.tty_send(target, channel, text)
    }

    fn cancel(&mut self, target: TargetId, id: OperationId) -> Result<(), InitiateError> {
        self.inner.cancel(target, id)
    }
}

fn game_dir() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    write_tree(
        dir.path(),
        &[
            ("PARAM.SFO", "sfo"),
            ("USRDIR/EBOOT.BIN", "eboot"),
            ("USRDIR/data/level1.dat", "level one"),
        ],
    );
    dir
}

#[test]
fn test_sync_uploads_then_skips_unchanged() {
    let dir = game_dir();
    let clock = ManualClock::new();
    let poll = poll_loop(&clock);
    let mut sim = SimTarget::new();
    let handle = sim.handle();
    let command = SyncCommand::new(T0, dir.path(), "/app_home/game");

    let first = command.run(&mut sim, &poll).unwrap();
    assert_eq!(first.poll.state, PollState::Success);
    assert_eq!(first.uploaded(), 3);
    assert!(first.skipped.is_empty());
    assert!(first.abandoned.is_empty());
    assert_eq!(first.exit_code(&ExitCodeConfig::default()), 0);
    assert_eq!(
        handle.file(T0, "/app_home/game/USRDIR/EBOOT.BIN").map(|s| s.size),
        Some(5)
    );

    let second = command.run(&mut sim, &poll).unwrap();
    assert_eq!(second.poll.state, PollState::Success);
    assert_eq!(second.poll.iterations, 0);
    assert_eq!(second.uploaded(), 0);
    assert_eq!(second.skipped.len(), 3);
    assert_eq!(handle.uploads().len(), 3);
}

#[test]
fn test_plan_marks_changed_files() {
    let dir = game_dir();
    let clock = ManualClock::new();
    let mut sim = SimTarget::new();
    let command = SyncCommand::new(T0, dir.path(), "/app_home/game");
    command.run(&mut sim, &poll_loop(&clock)).unwrap();

    std::fs::write(dir.path().join("PARAM.SFO"), "a longer sfo").unwrap();
    let (plan, failures) = command.plan(&mut sim).unwrap();
    assert!(failures.is_empty());

    let actions: Vec<(&str, SyncAction)> = plan
        .iter()
        .map(|e| (e.target_path.as_str(), e.action))
        .collect();
    assert_eq!(
        actions,
        vec![
            ("/app_home/game/PARAM.SFO", SyncAction::Upload),
            ("/app_home/game/USRDIR/EBOOT.BIN", SyncAction::Skip),
            ("/app_home/game/USRDIR/data/level1.dat", SyncAction::Skip),
        ]
    );
}

#[test]
fn test_force_uploads_everything() {
    let dir = game_dir();
    let clock = ManualClock::new();
    let poll = poll_loop(&clock);
    let mut sim = SimTarget::new();
    let handle = sim.handle();
    let mut command = SyncCommand::new(T0, dir.path(), "/app_home/game");
    command.run(&mut sim, &poll).unwrap();

    command.force = true;
    let report = command.run(&mut sim, &poll).unwrap();
    assert_eq!(report.uploaded(), 3);
    assert!(report.skipped.is_empty());
    assert!(report.completed.iter().all(|h| h.forced));

    let uploads = handle.uploads();
    assert_eq!(uploads.len(), 6);
    assert!(uploads[3..].iter().all(|u| u.forced));
}

#[test]
fn test_initiation_failure_does_not_stop_batch() {
    let dir = game_dir();
    let clock = ManualClock::new();
    let mut sim = SimTarget::new();
    sim.handle().fail_initiation(
        "/app_home/game/USRDIR/EBOOT.BIN",
        InitiateError::Refused(ResultCode::BUSY),
    );

    let report = SyncCommand::new(T0, dir.path(), "/app_home/game")
        .run(&mut sim, &poll_loop(&clock))
        .unwrap();

    assert_eq!(report.poll.state, PollState::Success);
    assert_eq!(report.uploaded(), 2);
    assert_eq!(
        report.initiation_failures,
        vec![(
            "/app_home/game/USRDIR/EBOOT.BIN".to_string(),
            InitiateError::Refused(ResultCode::BUSY)
        )]
    );
    assert_eq!(report.exit_code(&ExitCodeConfig::default()), 1);
}

#[test]
fn test_repeated_operation_id_does_not_stop_batch() {
    let dir = game_dir();
    let clock = ManualClock::new();
    let mut api = RepeatsId {
        inner: SimTarget::new(),
        path: "/app_home/game/USRDIR/EBOOT.BIN",
        id: OperationId(1),
    };

    let report = SyncCommand::new(T0, dir.path(), "/app_home/game")
        .run(&mut api, &poll_loop(&clock))
        .unwrap();

    assert_eq!(report.poll.state, PollState::Success);
    assert_eq!(report.uploaded(), 2);
    assert!(report.abandoned.is_empty());
    assert_eq!(
        report.initiation_failures,
        vec![(
            "/app_home/game/USRDIR/EBOOT.BIN".to_string(),
            InitiateError::DuplicateId(OperationId(1))
        )]
    );
    assert_eq!(report.exit_code(&ExitCodeConfig::default()), 1);
}

#[test]
fn test_completion_failure_is_reported() {
    let dir = game_dir();
    let clock = ManualClock::new();
    let mut sim = SimTarget::new();
    let handle = sim.handle();
    handle.fail_completion("/app_home/game/PARAM.SFO", ResultCode::NO_FILE);

    let report = SyncCommand::new(T0, dir.path(), "/app_home/game")
        .run(&mut sim, &poll_loop(&clock))
        .unwrap();

    assert_eq!(report.poll.state, PollState::Success);
    let failed: Vec<_> = report.failed().collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].label, "/app_home/game/PARAM.SFO");
    assert_eq!(failed[0].result, Some(ResultCode::NO_FILE));
    assert_eq!(report.worst_result, Some(ResultCode::NO_FILE));
    assert_eq!(handle.file(T0, "/app_home/game/PARAM.SFO"), None);
    assert_eq!(report.exit_code(&ExitCodeConfig::default()), 1);
}

#[test]
fn test_out_of_order_completions() {
    let dir = game_dir();
    let clock = ManualClock::new();
    let mut sim = SimTarget::new();
    let handle = sim.handle();
    handle.set_reverse_order(true);

    let report = SyncCommand::new(T0, dir.path(), "/app_home/game")
        .run(&mut sim, &poll_loop(&clock))
        .unwrap();

    assert_eq!(report.poll.state, PollState::Success);
    let completed: Vec<_> = report.completed.iter().map(|h| h.id).collect();
    let mut started: Vec<_> = handle.uploads().iter().map(|u| u.id).collect();
    started.reverse();
    assert_eq!(completed, started);
}

#[test]
fn test_disconnect_abandons_pending() {
    let dir = game_dir();
    let clock = ManualClock::new();
    let mut sim = SimTarget::new().with_latency(5);
    sim.handle().disconnect(T0);

    let report = SyncCommand::new(T0, dir.path(), "/app_home/game")
        .run(&mut sim, &poll_loop(&clock))
        .unwrap();

    assert_eq!(report.poll.state, PollState::Fatal);
    assert_eq!(report.abandoned.len(), 3);
    assert!(report.completed.is_empty());
    assert_eq!(report.exit_code(&ExitCodeConfig::default()), 3);
}

#[test]
fn test_idle_timeout_abandons_slow_uploads() {
    let dir = game_dir();
    let clock = ManualClock::new();
    let mut sim = SimTarget::new().with_latency(10_000);
    let handle = sim.handle();
    let mut command = SyncCommand::new(T0, dir.path(), "/app_home/game");
    command.wait.idle_timeout = Some(Duration::from_millis(200));

    let report = command.run(&mut sim, &poll_loop(&clock)).unwrap();
    assert_eq!(report.poll.timed_out(), Some(TimeoutKind::Idle));
    assert_eq!(report.abandoned.len(), 3);
    assert_eq!(handle.running(), 3);
    assert!(handle.cancelled().is_empty());
    assert_eq!(report.exit_code(&ExitCodeConfig::default()), 2);
}

#[test]
fn test_abort_handle_cancels_loop() {
    let dir = game_dir();
    let clock = ManualClock::new();
    let mut sim = SimTarget::new().with_latency(100);
    let abort = AbortHandle::new();
    abort.abort();

    let mut command = SyncCommand::new(T0, dir.path(), "/app_home/game");
    command.wait.abort = Some(abort);

    let report = command.run(&mut sim, &poll_loop(&clock)).unwrap();
    assert_eq!(report.poll.state, PollState::Cancelled);
    assert_eq!(report.abandoned.len(), 3);
    assert_eq!(report.exit_code(&ExitCodeConfig::default()), 130);
}

#[test]
fn test_missing_host_dir() {
    let clock = ManualClock::new();
    let mut sim = SimTarget::new();
    let err = SyncCommand::new(T0, "/no/such/dir", "/app_home")
        .run(&mut sim, &poll_loop(&clock))
        .unwrap_err();
    assert!(matches!(
        err,
        tm_core::TmError::Initiate(InitiateError::BadPath(_))
    ));
}
