//! Append-only JSONL session recordings.
//!
//! One `<run_id>.jsonl` file per run in the configured directory; every
//! published event is appended as a single JSON line.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arena_domain::error::{Error, Result};
use arena_domain::event::Event;

use crate::bus::EventBus;

#[derive(Clone)]
pub struct SessionRecorder {
    dir: Arc<PathBuf>,
}

impl SessionRecorder {
    pub fn new(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir).map_err(Error::Io)?;
        Ok(Self {
            dir: Arc::new(dir.to_path_buf()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Append one event to the run's recording file.
    pub fn append(&self, event: &Event) -> Result<()> {
        let path = self.dir.join(format!("{}.jsonl", sanitize(&event.run_id)));
        let json = serde_json::to_string(event)?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(Error::Io)?;
        writeln!(file, "{json}").map_err(Error::Io)?;
        Ok(())
    }

    /// Subscribe this recorder to every event on the bus.
    pub fn attach(&self, bus: &EventBus) {
        let recorder = self.clone();
        bus.subscribe_all(Arc::new(move |event| {
            if let Err(e) = recorder.append(event) {
                tracing::warn!(run_id = %event.run_id, error = %e, "session recording failed");
            }
        }));
    }

    /// Read a run's recording back (for tooling and tests). Malformed
    /// lines are skipped.
    pub fn read(&self, run_id: &str) -> Result<Vec<Event>> {
        let path = self.dir.join(format!("{}.jsonl", sanitize(run_id)));
        if !path.exists() {
            return Ok(Vec::new());
        }
        let raw = std::fs::read_to_string(&path).map_err(Error::Io)?;
        let mut events = Vec::new();
        for line in raw.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Event>(line) {
                Ok(ev) => events.push(ev),
                Err(e) => {
                    tracing::warn!(run_id, error = %e, "skipping malformed recording line");
                }
            }
        }
        Ok(events)
    }
}

/// Keep run IDs filesystem-safe.
fn sanitize(run_id: &str) -> String {
    run_id
        .chars()
        .map(|c| if c == '/' || c == '\\' { '_' } else { c })
        .collect()
}
