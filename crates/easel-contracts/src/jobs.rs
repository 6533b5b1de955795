use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::chat::{EdgeScales, OutpaintDirection};

/// A text-to-image request. Built per message and consumed immediately.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub prompt: String,
    pub model: String,
    pub size: String,
    pub count: u32,
}

impl GenerationRequest {
    pub const DEFAULT_SIZE: &'static str = "1024*1024";

    pub fn new(prompt: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            model: model.into(),
            size: Self::DEFAULT_SIZE.to_string(),
            count: 1,
        }
    }

    pub fn with_size(mut self, size: impl Into<String>) -> Self {
        self.size = size.into();
        self
    }

    pub fn with_count(mut self, count: u32) -> Self {
        self.count = count.max(1);
        self
    }
}

/// A canvas-extension request against a local source image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutpaintRequest {
    pub source: PathBuf,
    pub prompt: String,
    pub model: String,
    pub direction: OutpaintDirection,
    pub scales: EdgeScales,
    pub count: u32,
    pub seed: Option<i64>,
}

impl OutpaintRequest {
    /// Builds a request whose per-edge scales follow the direction hint.
    pub fn new(
        source: impl Into<PathBuf>,
        prompt: impl Into<String>,
        model: impl Into<String>,
        direction: OutpaintDirection,
        scale: f64,
    ) -> Self {
        Self {
            source: source.into(),
            prompt: prompt.into(),
            model: model.into(),
            direction,
            scales: EdgeScales::for_direction(direction, scale),
            count: 1,
            seed: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// Remote outpaint job as seen by the poll loop that created it.
///
/// Status only moves forward: `Pending -> Succeeded | Failed`. A terminal job
/// never changes again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutpaintJob {
    pub task_id: String,
    status: JobStatus,
    result_url: Option<String>,
    error: Option<String>,
}

impl OutpaintJob {
    pub fn new(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            status: JobStatus::Pending,
            result_url: None,
            error: None,
        }
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn result_url(&self) -> Option<&str> {
        self.result_url.as_deref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Records a poll observation. Returns an error for a transition out of
    /// a terminal state; repeating `Pending` while pending is a no-op.
    pub fn observe(
        &mut self,
        status: JobStatus,
        result_url: Option<String>,
        error: Option<String>,
    ) -> Result<(), String> {
        if self.status.is_terminal() {
            if self.status == status {
                return Ok(());
            }
            return Err(format!(
                "job {} is already {:?}; refusing transition to {:?}",
                self.task_id, self.status, status
            ));
        }
        self.status = status;
        match status {
            JobStatus::Pending => {}
            JobStatus::Succeeded => self.result_url = result_url,
            JobStatus::Failed => self.error = error,
        }
        Ok(())
    }
}

/// A downloaded result on local disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredImage {
    pub local_path: PathBuf,
    pub source_url: String,
    pub size_bytes: u64,
}
