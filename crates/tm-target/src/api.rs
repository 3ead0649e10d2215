//! Target manager collaborator boundary
//!
//! Every initiating call returns immediately. Progress and completion are
//! reported later through `NotificationSource::kick`.

use std::fs::Metadata;
use std::path::PathBuf;
use std::time::UNIX_EPOCH;
use tm_core::{InitiateError, OperationId, Pid, TargetId};
use tm_pump::NotificationSource;

/// Size and modification time of a file on the target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub size: u64,
    /// Seconds since the UNIX epoch
    pub mtime: u64,
}

impl FileStat {
    /// Stat of a host file, at the resolution the target keeps
    pub fn from_metadata(metadata: &Metadata) -> Self {
        let mtime = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
            .unwrap_or(0);

        Self {
            size: metadata.len(),
            mtime,
        }
    }
}

/// Host -> target file upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRequest {
    pub target: TargetId,
    pub host_path: PathBuf,
    pub target_path: String,
    /// Skip the target's own timestamp/size check
    pub forced: bool,
}

/// BD emulator operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BdRequest {
    /// Copy a disc image from the host into the emulator's HDD
    TransferImage { device: String, image: PathBuf },
    Format { device: String },
    Mount { device: String },
    Unmount { device: String },
}

impl BdRequest {
    pub fn device(&self) -> &str {
        match self {
            Self::TransferImage { device, .. }
            | Self::Format { device }
            | Self::Mount { device }
            | Self::Unmount { device } => device,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::TransferImage { .. } => "transfer",
            Self::Format { .. } => "format",
            Self::Mount { .. } => "mount",
            Self::Unmount { .. } => "unmount",
        }
    }
}

/// Process to load and start on a target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessRequest {
    pub target: TargetId,
    pub elf: String,
    pub args: Vec<String>,
}

/// Initiating side of the target manager
pub trait TargetApi: NotificationSource {
    /// Look up a file on the target; `Ok(None)` if it does not exist
    fn stat(&mut self, target: TargetId, path: &str) -> Result<Option<FileStat>, InitiateError>;

    /// Start an upload; completion arrives as a `FileTransfer` notification
    fn upload(&mut self, request: &UploadRequest) -> Result<OperationId, InitiateError>;

    /// Start a BD operation; completion arrives as a `BdTransfer` notification
    fn bd(&mut self, target: TargetId, request: &BdRequest) -> Result<OperationId, InitiateError>;

    /// Load and run a process; output arrives as `Tty` notifications and
    /// termination as a `Target` process-exit notification
    fn load_process(&mut self, request: &ProcessRequest) -> Result<Pid, InitiateError>;

    /// Send text to a TTY channel
    fn tty_send(&mut self, target: TargetId, channel: u32, text: &str) -> Result<(), InitiateError>;

    /// Request cancellation; a `CANCELLED` completion follows if it was still running
    fn cancel(&mut self, target: TargetId, id: OperationId) -> Result<(), InitiateError>;
}

impl<A: TargetApi + ?Sized> TargetApi for &mut A {
    fn stat(&mut self, target: TargetId, path: &str) -> Result<Option<FileStat>, InitiateError> {
        (**self).stat(target, path)
    }

    fn upload(&mut self, request: &UploadRequest) -> Result<OperationId, InitiateError> {
        (**self).upload(request)
    }

    fn bd(&mut self, target: TargetId, request: &BdRequest) -> Result<OperationId, InitiateError> {
        (**self).bd(target, request)
    }

    fn load_process(&mut self, request: &ProcessRequest) -> Result<Pid, InitiateError> {
        (**self).load_process(request)
    }

    fn tty_send(
        &mut self,
        target: TargetId,
        channel: u32,
        text: &str,
    ) -> Result<(), InitiateError> {
        (**self).tty_send(target, channel, text)
    }

    fn cancel(&mut self, target: TargetId, id: OperationId) -> Result<(), InitiateError> {
        (**self).cancel(target, id)
    }
}
