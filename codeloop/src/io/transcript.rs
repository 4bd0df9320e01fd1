//! Plain-text debug transcript of every iteration.
//!
//! This side-channel is best effort: failures are logged and never abort the run.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::warn;

#[derive(Debug, Clone)]
pub struct Transcript {
    path: PathBuf,
}

impl Transcript {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Remove the transcript left by a previous run.
    pub fn clear(&self) {
        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), err = %e, "failed to clear transcript"),
        }
    }

    /// Append `text`, logging instead of failing.
    pub fn append(&self, text: &str) {
        if let Err(e) = self.try_append(text) {
            warn!(path = %self.path.display(), err = %format!("{e:#}"), "failed to append transcript");
        }
    }

    fn try_append(&self, text: &str) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("create transcript dir {}", parent.display()))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("open {}", self.path.display()))?;
        file.write_all(text.as_bytes())
            .with_context(|| format!("write {}", self.path.display()))?;
        if !text.ends_with('\n') {
            file.write_all(b"\n")
                .with_context(|| format!("write {}", self.path.display()))?;
        }
        Ok(())
    }
}
