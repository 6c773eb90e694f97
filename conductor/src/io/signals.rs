//! Pause and cancel control for a running conductor.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use tracing::info;

pub const PAUSE_SENTINEL: &str = "pause";
pub const CANCEL_SENTINEL: &str = "cancel";

/// Read-only view of the operator's control requests.
pub trait ControlSignals {
    fn is_paused(&self) -> bool;
    fn is_cancelled(&self) -> bool;
}

/// Signals backed by `pause` / `cancel` files in a run's session directory.
#[derive(Debug, Clone)]
pub struct SentinelSignals {
    dir: PathBuf,
}

impl SentinelSignals {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn request_pause(&self) -> Result<()> {
        self.touch(PAUSE_SENTINEL)?;
        info!(dir = %self.dir.display(), "pause requested");
        Ok(())
    }

    pub fn clear_pause(&self) -> Result<()> {
        let path = self.dir.join(PAUSE_SENTINEL);
        match fs::remove_file(&path) {
            Ok(()) => {
                info!(dir = %self.dir.display(), "pause cleared");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("remove {}", path.display())),
        }
    }

    pub fn request_cancel(&self) -> Result<()> {
        self.touch(CANCEL_SENTINEL)?;
        info!(dir = %self.dir.display(), "cancel requested");
        Ok(())
    }

    /// Remove a stale cancel sentinel so a resumed run is not cancelled immediately.
    pub fn clear_cancel(&self) -> Result<()> {
        let path = self.dir.join(CANCEL_SENTINEL);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("remove {}", path.display())),
        }
    }

    fn touch(&self, name: &str) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("create session dir {}", self.dir.display()))?;
        let path = self.dir.join(name);
        fs::write(&path, b"").with_context(|| format!("write {}", path.display()))
    }
}

impl ControlSignals for SentinelSignals {
    fn is_paused(&self) -> bool {
        self.dir.join(PAUSE_SENTINEL).exists()
    }

    fn is_cancelled(&self) -> bool {
        self.dir.join(CANCEL_SENTINEL).exists()
    }
}

/// In-process signals for embedders and tests.
#[derive(Debug, Clone, Default)]
pub struct FlagSignals {
    paused: Arc<AtomicBool>,
    cancelled: Arc<AtomicBool>,
}

impl FlagSignals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}

impl ControlSignals for FlagSignals {
    fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_files_drive_signals() {
        let temp = tempfile::tempdir().expect("tempdir");
        let signals = SentinelSignals::new(temp.path().join("conductor-run"));
        assert!(!signals.is_paused());
        assert!(!signals.is_cancelled());

        signals.request_pause().expect("pause");
        assert!(signals.is_paused());
        signals.clear_pause().expect("resume");
        assert!(!signals.is_paused());
        signals.clear_pause().expect("clearing twice is fine");

        signals.request_cancel().expect("cancel");
        assert!(signals.is_cancelled());
        signals.clear_cancel().expect("clear cancel");
        assert!(!signals.is_cancelled());
    }

    #[test]
    fn flag_clones_share_state() {
        let signals = FlagSignals::new();
        let handle = signals.clone();
        handle.set_paused(true);
        assert!(signals.is_paused());
        handle.cancel();
        assert!(signals.is_cancelled());
    }
}
