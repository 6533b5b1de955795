use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use easel_engine::RenderSurface;

/// Line-oriented surface for a terminal. Worker output arrives on another
/// thread, so every write takes the lock and flushes.
pub struct TerminalSurface<W: Write + Send> {
    out: Mutex<W>,
}

impl<W: Write + Send> TerminalSurface<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.out
            .into_inner()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write(&self, text: &str) {
        let mut out = self
            .out
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let _ = out.write_all(text.as_bytes());
        let _ = out.flush();
    }
}

impl<W: Write + Send> RenderSurface for TerminalSurface<W> {
    fn show_text(&self, text: &str) {
        self.write(&format!("{text}\n"));
    }

    fn stream_delta(&self, delta: &str) {
        self.write(delta);
    }

    fn stream_end(&self) {
        self.write("\n");
    }

    fn show_image(&self, path: &Path, action_label: &str) {
        let absolute = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        self.write(&format!(
            "[image] {}\n  {action_label}: file://{}\n",
            path.display(),
            absolute.display()
        ));
    }

    fn show_error(&self, message: &str) {
        self.write(&format!("error: {message}\n"));
    }
}
