//! Single background thread that runs image jobs in submission order.

use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::{mpsc, Arc, Mutex};
use std::thread;

use easel_contracts::events::{EventLog, FailureState, JobKind, SessionEvent};
use easel_contracts::jobs::{GenerationRequest, OutpaintRequest};
use tracing::{info, warn};

use crate::error::{EngineError, Result};
use crate::generation::ImageGenerator;
use crate::outpaint::{OutpaintProgress, OutpaintState, Outpainter};
use crate::session::{lock_shared, record_event, RenderSurface, SharedState};

/// File prefix for images produced from the interactive surface.
pub const IMAGE_FILE_PREFIX: &str = "image";

pub(crate) enum ImageJob {
    Generate {
        question: String,
        generator: Arc<dyn ImageGenerator>,
        request: GenerationRequest,
    },
    Outpaint {
        question: String,
        outpainter: Arc<dyn Outpainter>,
        request: OutpaintRequest,
    },
}

impl ImageJob {
    fn kind(&self) -> JobKind {
        match self {
            Self::Generate { .. } => JobKind::Generation,
            Self::Outpaint { .. } => JobKind::Outpaint,
        }
    }

    fn question(&self) -> &str {
        match self {
            Self::Generate { question, .. } | Self::Outpaint { question, .. } => question,
        }
    }
}

enum WorkerCommand {
    Job(ImageJob),
    Flush(mpsc::Sender<()>),
    Stop,
}

pub(crate) struct WorkerContext {
    pub surface: Arc<dyn RenderSurface>,
    pub shared: Arc<Mutex<SharedState>>,
    pub events: Option<EventLog>,
    pub out_dir: PathBuf,
}

pub struct ImageWorker {
    sender: Option<mpsc::Sender<WorkerCommand>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl ImageWorker {
    pub(crate) fn spawn(context: WorkerContext) -> Result<Self> {
        let (tx, rx) = mpsc::channel();
        let handle = thread::Builder::new()
            .name("easel-image-worker".to_string())
            .spawn(move || context.run(rx))?;
        Ok(Self {
            sender: Some(tx),
            handle: Some(handle),
        })
    }

    pub(crate) fn submit(&self, job: ImageJob) -> Result<()> {
        let Some(tx) = self.sender.as_ref() else {
            return Err(worker_gone());
        };
        tx.send(WorkerCommand::Job(job)).map_err(|_| worker_gone())
    }

    /// Blocks until every job queued before this call has finished.
    pub fn flush(&self) {
        let Some(tx) = self.sender.as_ref() else {
            return;
        };
        let (ack_tx, ack_rx) = mpsc::channel();
        if tx.send(WorkerCommand::Flush(ack_tx)).is_ok() {
            let _ = ack_rx.recv();
        }
    }

    /// Lets queued jobs finish, then joins the thread.
    pub fn stop(&mut self) {
        if let Some(tx) = self.sender.take() {
            let _ = tx.send(WorkerCommand::Stop);
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for ImageWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_gone() -> EngineError {
    EngineError::Io(std::io::Error::other("image worker is not running"))
}

impl WorkerContext {
    fn run(self, rx: mpsc::Receiver<WorkerCommand>) {
        for command in rx {
            match command {
                WorkerCommand::Job(job) => self.process(job),
                WorkerCommand::Flush(ack) => {
                    let _ = ack.send(());
                }
                WorkerCommand::Stop => break,
            }
        }
    }

    fn process(&self, job: ImageJob) {
        let kind = job.kind();
        let question = job.question().to_string();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| match job {
            ImageJob::Generate {
                question,
                generator,
                request,
            } => self.generate(&question, generator.as_ref(), &request),
            ImageJob::Outpaint {
                question,
                outpainter,
                request,
            } => self.outpaint(&question, outpainter.as_ref(), &request),
        }));
        if outcome.is_err() {
            let message = format!("{} job crashed unexpectedly", kind.as_str());
            self.fail(kind, &question, FailureState::Failed, &message);
        }
    }

    fn generate(&self, question: &str, generator: &dyn ImageGenerator, request: &GenerationRequest) {
        let paths = match generator.generate(request, &self.out_dir, IMAGE_FILE_PREFIX) {
            Ok(paths) => paths,
            Err(err) => {
                return self.fail(JobKind::Generation, question, FailureState::Failed, &err.to_string())
            }
        };
        let Some(first) = paths.first().cloned() else {
            let message = EngineError::GenerationFailed("no images were returned".to_string());
            return self.fail(JobKind::Generation, question, FailureState::Failed, &message.to_string());
        };
        info!(count = paths.len(), model = %request.model, "generation finished");

        let listed = paths
            .iter()
            .map(|path| path.display().to_string())
            .collect::<Vec<_>>();
        {
            let mut shared = lock_shared(&self.shared);
            shared.set_last_image(first);
            shared.record_exchange(question, &format!("Generated image: {}", listed.join(", ")));
        }
        record_event(
            self.events.as_ref(),
            SessionEvent::ImageGenerated {
                model: request.model.clone(),
                prompt: request.prompt.clone(),
                size: request.size.clone(),
                paths: listed,
            },
        );
        for path in &paths {
            self.surface.show_image(path, "Open full image");
        }
    }

    fn outpaint(&self, question: &str, outpainter: &dyn Outpainter, request: &OutpaintRequest) {
        let surface = Arc::clone(&self.surface);
        let events = self.events.clone();
        let mut on_progress = |progress: OutpaintProgress| match progress {
            OutpaintProgress::Submitted { task_id } => {
                record_event(
                    events.as_ref(),
                    SessionEvent::OutpaintSubmitted {
                        task_id: task_id.clone(),
                        model: request.model.clone(),
                        direction: request.direction,
                        source: request.source.display().to_string(),
                    },
                );
                surface.show_text(&format!("Outpaint job {task_id} submitted, waiting for result..."));
            }
            OutpaintProgress::Pending { task_id, polls } => {
                tracing::debug!(%task_id, polls, "outpaint still pending");
            }
        };
        let outcome = match outpainter.outpaint(request, &self.out_dir, &mut on_progress) {
            Ok(outcome) => outcome,
            Err(err) => {
                let state = match OutpaintState::of_error(&err) {
                    OutpaintState::TimedOut => FailureState::TimedOut,
                    _ => FailureState::Failed,
                };
                return self.fail(JobKind::Outpaint, question, state, &err.to_string());
            }
        };

        let path = outcome.image.local_path.clone();
        {
            let mut shared = lock_shared(&self.shared);
            shared.set_last_image(path.clone());
            shared.record_exchange(question, &format!("Extended image: {}", path.display()));
        }
        record_event(
            self.events.as_ref(),
            SessionEvent::OutpaintCompleted {
                task_id: outcome.task_id,
                path: path.display().to_string(),
                source_url: outcome.image.source_url,
                size_bytes: outcome.image.size_bytes,
                polls: outcome.polls,
                poll_retries: outcome.poll_retries,
                download_attempts: outcome.download_attempts,
            },
        );
        self.surface.show_image(&path, "Open full image");
    }

    fn fail(&self, job: JobKind, question: &str, state: FailureState, message: &str) {
        warn!(?job, ?state, error = %message, "image job failed");
        lock_shared(&self.shared).record_exchange(question, &format!("Error: {message}"));
        record_event(
            self.events.as_ref(),
            SessionEvent::JobFailed {
                job,
                state,
                error: message.to_string(),
            },
        );
        self.surface.show_error(message);
    }
}
