use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::Local;

/// Plain-text, append-only record of every question and answer in a session.
///
/// Each exchange is written as
///
/// ```text
///
/// [2025-01-01 10:00:00] Question:
/// draw a cat
///
/// [2025-01-01 10:00:00] Answer:
/// ...
/// ```
///
/// Sessions write the whole block once the answer is complete. This type is
/// not internally synchronized; sessions keep it behind their shared-state
/// mutex.
#[derive(Debug)]
pub struct Transcript {
    path: PathBuf,
    file: File,
}

impl Transcript {
    pub fn open(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("failed to open transcript {}", path.display()))?;
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Opens a new question/answer block. Answer text follows via [`Self::answer`].
    pub fn question(&mut self, question: &str) -> anyhow::Result<()> {
        let stamp = timestamp();
        write!(
            self.file,
            "\n[{stamp}] Question:\n{question}\n\n[{stamp}] Answer:\n"
        )?;
        self.file.flush()?;
        Ok(())
    }

    pub fn answer(&mut self, text: &str) -> anyhow::Result<()> {
        self.file.write_all(text.as_bytes())?;
        self.file.flush()?;
        Ok(())
    }
}

fn timestamp() -> String {
    Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}
