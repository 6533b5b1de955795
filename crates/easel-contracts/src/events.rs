//! Machine-readable session log (`events.jsonl`).
//!
//! Every line is one [`SessionEvent`] tagged with its `type`, plus the
//! session id and a UTC timestamp.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Context;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::chat::{Intent, OutpaintDirection};

/// Which kind of work a failed job was doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Chat,
    Generation,
    Outpaint,
}

impl JobKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::Generation => "generation",
            Self::Outpaint => "outpaint",
        }
    }
}

/// How a job ended when it did not produce a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureState {
    Failed,
    TimedOut,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    SessionStarted {
        chat_model: String,
        image_model: String,
        output_dir: String,
        chat_enabled: bool,
        image_enabled: bool,
    },
    IntentClassified {
        intent: Intent,
        #[serde(skip_serializing_if = "Option::is_none")]
        fallback_reason: Option<String>,
    },
    ChatCompleted {
        model: String,
        chars: usize,
    },
    ImageGenerated {
        model: String,
        prompt: String,
        size: String,
        paths: Vec<String>,
    },
    OutpaintSubmitted {
        task_id: String,
        model: String,
        direction: OutpaintDirection,
        source: String,
    },
    OutpaintCompleted {
        task_id: String,
        path: String,
        source_url: String,
        size_bytes: u64,
        polls: u32,
        poll_retries: u32,
        download_attempts: u32,
    },
    JobFailed {
        job: JobKind,
        state: FailureState,
        error: String,
    },
    SessionFinished {
        turns: usize,
    },
}

impl SessionEvent {
    /// The `type` tag written for this event.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SessionStarted { .. } => "session_started",
            Self::IntentClassified { .. } => "intent_classified",
            Self::ChatCompleted { .. } => "chat_completed",
            Self::ImageGenerated { .. } => "image_generated",
            Self::OutpaintSubmitted { .. } => "outpaint_submitted",
            Self::OutpaintCompleted { .. } => "outpaint_completed",
            Self::JobFailed { .. } => "job_failed",
            Self::SessionFinished { .. } => "session_finished",
        }
    }
}

#[derive(Serialize)]
struct EventLine<'a> {
    #[serde(flatten)]
    event: &'a SessionEvent,
    session_id: &'a str,
    ts: String,
}

#[derive(Debug)]
struct EventSink {
    path: PathBuf,
    session_id: String,
    file: Option<File>,
}

impl EventSink {
    fn file(&mut self) -> anyhow::Result<&mut File> {
        if self.file.is_none() {
            if let Some(parent) = self.path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .with_context(|| format!("failed to open {}", self.path.display()))?;
            self.file = Some(file);
        }
        self.file
            .as_mut()
            .context("event log file unavailable")
    }
}

/// Append-only `events.jsonl` for one session. The file is opened on the
/// first event and kept open. Clones share the handle, so the image worker
/// and the interactive loop never interleave partial lines.
#[derive(Debug, Clone)]
pub struct EventLog {
    sink: Arc<Mutex<EventSink>>,
}

impl EventLog {
    pub fn new(path: impl Into<PathBuf>, session_id: impl Into<String>) -> Self {
        Self {
            sink: Arc::new(Mutex::new(EventSink {
                path: path.into(),
                session_id: session_id.into(),
                file: None,
            })),
        }
    }

    pub fn path(&self) -> PathBuf {
        self.lock().path.clone()
    }

    pub fn append(&self, event: &SessionEvent) -> anyhow::Result<()> {
        let mut sink = self.lock();
        let mut line = serde_json::to_vec(&EventLine {
            event,
            session_id: &sink.session_id,
            ts: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
        })?;
        line.push(b'\n');
        let file = sink.file()?;
        file.write_all(&line)?;
        file.flush()?;
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, EventSink> {
        self.sink.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Reads back every event in a log, skipping lines that do not parse.
pub fn read_events(path: &Path) -> anyhow::Result<Vec<SessionEvent>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    Ok(content
        .lines()
        .filter_map(|line| serde_json::from_str(line).ok())
        .collect())
}
