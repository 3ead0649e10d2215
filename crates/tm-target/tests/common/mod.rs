#![allow(dead_code)]

use std::path::Path;
use std::time::Duration;
use tm_core::TargetId;
use tm_pump::{ManualClock, PollLoop, PollSettings};

pub const T0: TargetId = TargetId(0);

pub fn settings() -> PollSettings {
    PollSettings {
        interval: Duration::from_millis(20),
        grace: Duration::from_millis(50),
        max_drain: 64,
    }
}

pub fn poll_loop(clock: &ManualClock) -> PollLoop<&ManualClock> {
    PollLoop::with_clock(settings(), clock)
}

/// Lay out `files` (relative path, contents) below `root`
pub fn write_tree(root: &Path, files: &[(&str, &str)]) {
    for (relative, contents) in files {
        let path = root.join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, contents).unwrap();
    }
}
