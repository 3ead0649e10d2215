//! Target side of cell-tm
//!
//! [`TargetApi`] is the boundary to the target manager. [`SimTarget`]
//! implements it in-process, and the commands in [`commands`] drive it
//! through the polling loop from `tm-pump`.

pub mod api;
pub mod commands;
pub mod input;
pub mod sim;

pub use api::{BdRequest, FileStat, ProcessRequest, TargetApi, UploadRequest};
pub use commands::{
    BdCommand, BdReport, InputSource, Key, RunCommand, RunReport, SyncAction, SyncCommand,
    SyncEntry, SyncReport, WaitOptions,
};
pub use input::StdinLines;
pub use sim::{ProcessScript, SimHandle, SimTarget, UploadRecord, DEFAULT_LATENCY};
