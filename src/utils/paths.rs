//! Output file naming
//!
//! The core only needs a unique path in a writable directory per session.

use chrono::Utc;
use std::path::{Path, PathBuf};

/// Container paths reserved for one recording session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionPaths {
    /// Primary (screen) container
    pub primary: PathBuf,
    /// Camera container, used only when the camera is recorded separately
    pub camera: PathBuf,
}

/// Supplies unique output paths per session
pub trait OutputNaming: Send + Sync {
    fn session_paths(&self) -> std::io::Result<SessionPaths>;
}

/// `<dir>/<prefix>-<utc stamp>-<short id>.mp4`, camera alongside with a `-camera` suffix
#[derive(Debug, Clone)]
pub struct TimestampedNaming {
    dir: PathBuf,
    prefix: String,
}

impl TimestampedNaming {
    pub fn new(dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl OutputNaming for TimestampedNaming {
    fn session_paths(&self) -> std::io::Result<SessionPaths> {
        std::fs::create_dir_all(&self.dir)?;

        let stamp = Utc::now().format("%Y%m%d-%H%M%S");
        let id = uuid::Uuid::new_v4().simple().to_string();
        let stem = format!("{}-{}-{}", self.prefix, stamp, &id[..8]);

        Ok(SessionPaths {
            primary: self.dir.join(format!("{stem}.mp4")),
            camera: self.dir.join(format!("{stem}-camera.mp4")),
        })
    }
}
