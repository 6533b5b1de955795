//! Interactive session: routes each message to chat, generation or outpaint.
//!
//! The session is the one place engine errors become user-visible text. Chat
//! replies stream on the caller's thread; image jobs go to the single
//! [`ImageWorker`] so the interactive loop never blocks on them.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use easel_contracts::chat::{
    parse_input, ChatCommand, ChatInput, Classification, Intent, OutpaintDirection,
    CHAT_HELP_COMMANDS,
};
use easel_contracts::conversation::ConversationHistory;
use easel_contracts::events::{EventLog, FailureState, JobKind, SessionEvent};
use easel_contracts::jobs::{GenerationRequest, OutpaintRequest};
use easel_contracts::models::{Capability, ModelSelector};
use easel_contracts::transcript::Transcript;
use tracing::{info, warn};

use crate::chat::{ChatBackend, CompletionOptions, OpenAiCompatibleChat};
use crate::classifier::IntentClassifier;
use crate::codec::ImageFormat;
use crate::config::{CredentialStore, Credentials, EngineConfig};
use crate::dryrun::{DryrunGenerator, DryrunOutpainter};
use crate::error::{EngineError, Result};
use crate::generation::{DashScopeGenerator, ImageGenerator};
use crate::outpaint::{OutpaintClient, Outpainter};
use crate::worker::{ImageJob, ImageWorker, WorkerContext};

pub const SYSTEM_PROMPT: &str = "You are a helpful assistant.";

pub const NO_IMAGE_GUIDANCE: &str =
    "There is no image to extend yet. Generate one first, or pick a local file with /use <path>.";

/// Where the session draws. Implementations must tolerate calls from the
/// image worker thread interleaved with the interactive thread.
pub trait RenderSurface: Send + Sync {
    fn show_text(&self, text: &str);
    fn stream_delta(&self, delta: &str);
    fn stream_end(&self);
    /// A finished image plus the label of the action that opens it full size.
    fn show_image(&self, path: &Path, action_label: &str);
    fn show_error(&self, message: &str);
}

/// State written by whichever side finishes last, behind one lock.
#[derive(Debug, Default)]
pub struct SharedState {
    last_image: Option<PathBuf>,
    transcript: Option<Transcript>,
}

impl SharedState {
    pub fn last_image(&self) -> Option<&Path> {
        self.last_image.as_deref()
    }

    pub fn set_last_image(&mut self, path: PathBuf) {
        self.last_image = Some(path);
    }

    /// Appends one question/answer block; a write failure is logged only.
    pub fn record_exchange(&mut self, question: &str, answer: &str) {
        let Some(transcript) = self.transcript.as_mut() else {
            return;
        };
        let written = transcript
            .question(question)
            .and_then(|_| transcript.answer(answer));
        if let Err(err) = written {
            warn!(path = %transcript.path().display(), error = %err, "transcript write failed");
        }
    }
}

pub(crate) fn lock_shared(shared: &Mutex<SharedState>) -> std::sync::MutexGuard<'_, SharedState> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Appends to the session log when one is attached; failures are logged only.
pub(crate) fn record_event(events: Option<&EventLog>, event: SessionEvent) {
    let Some(events) = events else {
        return;
    };
    if let Err(err) = events.append(&event) {
        warn!(
            event = event.kind(),
            path = %events.path().display(),
            error = %err,
            "event write failed"
        );
    }
}

/// Injected collaborators. Remote backends are `None` when their
/// credential is missing; the dry-run backends are always available.
#[derive(Default)]
pub struct SessionParts {
    pub chat: Option<Arc<dyn ChatBackend>>,
    pub generator: Option<Arc<dyn ImageGenerator>>,
    pub outpainter: Option<Arc<dyn Outpainter>>,
    pub events: Option<EventLog>,
    pub transcript: Option<Transcript>,
    pub credential_store: Option<CredentialStore>,
}

impl SessionParts {
    /// Builds the remote clients each present credential allows.
    pub fn remote(config: &EngineConfig, credentials: &Credentials) -> Result<Self> {
        let mut parts = Self::default();
        parts.install_remote(config, credentials)?;
        Ok(parts)
    }

    fn install_remote(&mut self, config: &EngineConfig, credentials: &Credentials) -> Result<()> {
        self.chat = None;
        self.generator = None;
        self.outpainter = None;
        match credentials.chat_key() {
            Ok(key) => {
                let chat: Arc<dyn ChatBackend> = Arc::new(OpenAiCompatibleChat::new(config, key)?);
                self.chat = Some(chat);
            }
            Err(err) => warn!(error = %err, "chat disabled"),
        }
        match credentials.image_key() {
            Ok(key) => {
                let generator: Arc<dyn ImageGenerator> =
                    Arc::new(DashScopeGenerator::new(config, key)?);
                let outpainter: Arc<dyn Outpainter> =
                    Arc::new(OutpaintClient::dashscope(config, key)?);
                self.generator = Some(generator);
                self.outpainter = Some(outpainter);
            }
            Err(err) => warn!(error = %err, "image features disabled"),
        }
        Ok(())
    }

    pub fn with_events(mut self, events: EventLog) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_transcript(mut self, transcript: Transcript) -> Self {
        self.transcript = Some(transcript);
        self
    }

    pub fn with_credential_store(mut self, store: CredentialStore) -> Self {
        self.credential_store = Some(store);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionControl {
    Continue,
    Quit,
}

pub struct Session {
    config: EngineConfig,
    selector: ModelSelector,
    image_model: String,
    classifier: IntentClassifier,
    chat: Option<Arc<dyn ChatBackend>>,
    generator: Option<Arc<dyn ImageGenerator>>,
    outpainter: Option<Arc<dyn Outpainter>>,
    credential_store: Option<CredentialStore>,
    history: ConversationHistory,
    shared: Arc<Mutex<SharedState>>,
    events: Option<EventLog>,
    surface: Arc<dyn RenderSurface>,
    worker: ImageWorker,
}

impl Session {
    pub fn new(
        config: EngineConfig,
        parts: SessionParts,
        surface: Arc<dyn RenderSurface>,
    ) -> Result<Self> {
        let selector = ModelSelector::default();
        let image_model = match selector.select(Some(&config.image_model), Capability::Image) {
            Ok(selection) => {
                if let Some(reason) = selection.fallback_reason.as_deref() {
                    warn!(%reason, "image model fallback");
                }
                selection.model.name
            }
            Err(_) => config.image_model.clone(),
        };
        let shared = Arc::new(Mutex::new(SharedState {
            last_image: None,
            transcript: parts.transcript,
        }));
        let worker = ImageWorker::spawn(WorkerContext {
            surface: Arc::clone(&surface),
            shared: Arc::clone(&shared),
            events: parts.events.clone(),
            out_dir: config.output_dir.clone(),
        })?;

        record_event(
            parts.events.as_ref(),
            SessionEvent::SessionStarted {
                chat_model: config.chat_model.clone(),
                image_model: image_model.clone(),
                output_dir: config.output_dir.display().to_string(),
                chat_enabled: parts.chat.is_some(),
                image_enabled: parts.generator.is_some(),
            },
        );

        Ok(Self {
            classifier: IntentClassifier::new(parts.chat.clone()),
            chat: parts.chat,
            generator: parts.generator,
            outpainter: parts.outpainter,
            credential_store: parts.credential_store,
            events: parts.events,
            history: ConversationHistory::new(),
            config,
            selector,
            image_model,
            shared,
            surface,
            worker,
        })
    }

    /// Session over the remote services the credentials unlock.
    pub fn from_credentials(
        config: EngineConfig,
        credentials: &Credentials,
        surface: Arc<dyn RenderSurface>,
    ) -> Result<Self> {
        let parts = SessionParts::remote(&config, credentials)?;
        Self::new(config, parts, surface)
    }

    pub fn image_model(&self) -> &str {
        &self.image_model
    }

    pub fn history(&self) -> &ConversationHistory {
        &self.history
    }

    pub fn last_image(&self) -> Option<PathBuf> {
        lock_shared(&self.shared).last_image().map(Path::to_path_buf)
    }

    /// Waits for queued image jobs.
    pub fn flush(&self) {
        self.worker.flush();
    }

    /// Drains the worker and records the end of the session.
    pub fn finish(mut self) {
        self.worker.stop();
        record_event(
            self.events.as_ref(),
            SessionEvent::SessionFinished {
                turns: self.history.len(),
            },
        );
    }

    /// Handles one line typed by the user.
    pub fn handle_user_message(&mut self, text: &str) -> SessionControl {
        match parse_input(text) {
            ChatInput::Noop => SessionControl::Continue,
            ChatInput::Command(command) => self.handle_command(command),
            ChatInput::Message(message) => {
                self.handle_message(&message);
                SessionControl::Continue
            }
        }
    }

    fn handle_message(&mut self, text: &str) {
        self.history.push_user(text);
        let classification = self.classifier.classify(text);
        record_event(
            self.events.as_ref(),
            SessionEvent::IntentClassified {
                intent: classification.intent(),
                fallback_reason: classification.fallback_reason().map(str::to_string),
            },
        );
        match classification {
            Classification::Classified(Intent::ImageGeneration) => self.dispatch_generation(text),
            Classification::Classified(Intent::Outpainting) => self.dispatch_outpaint(text),
            Classification::Classified(Intent::Other) | Classification::Fallback { .. } => {
                self.chat_reply(text)
            }
        }
    }

    fn chat_reply(&mut self, text: &str) {
        let reply = match self.chat.clone() {
            Some(chat) => {
                let messages = self.history.with_system(SYSTEM_PROMPT);
                let surface = Arc::clone(&self.surface);
                let reply = chat.stream(&messages, CompletionOptions::CHAT, &mut |delta| {
                    surface.stream_delta(delta)
                });
                self.surface.stream_end();
                reply
            }
            None => Err(EngineError::Configuration(
                "chat is disabled: missing chat API key (set it with /keys)".to_string(),
            )),
        };

        match reply {
            Ok(answer) => {
                self.history.push_assistant(answer.as_str());
                lock_shared(&self.shared).record_exchange(text, &answer);
                record_event(
                    self.events.as_ref(),
                    SessionEvent::ChatCompleted {
                        model: self.config.chat_model.clone(),
                        chars: answer.chars().count(),
                    },
                );
            }
            Err(err) => {
                let message = format!("Request error: {err}");
                lock_shared(&self.shared).record_exchange(text, &message);
                record_event(
                    self.events.as_ref(),
                    SessionEvent::JobFailed {
                        job: JobKind::Chat,
                        state: FailureState::Failed,
                        error: err.to_string(),
                    },
                );
                self.surface.show_error(&message);
            }
        }
    }

    fn dispatch_generation(&mut self, text: &str) {
        let generator = match self.generator_for(&self.image_model) {
            Ok(generator) => generator,
            Err(err) => return self.surface.show_error(&err.to_string()),
        };
        let mut request = GenerationRequest::new(text, self.image_model.as_str());
        if let Some(size) = self
            .selector
            .registry
            .get(&self.image_model)
            .and_then(|spec| spec.default_size.clone())
        {
            request = request.with_size(size);
        }
        info!(model = %request.model, "queueing generation");
        self.surface
            .show_text(&format!("Generating image with {}...", request.model));
        self.queue(ImageJob::Generate {
            question: text.to_string(),
            generator,
            request,
        });
    }

    fn dispatch_outpaint(&mut self, text: &str) {
        let source = self.last_image().filter(|path| path.is_file());
        let Some(source) = source else {
            return self.surface.show_text(NO_IMAGE_GUIDANCE);
        };
        let model = self.outpaint_model();
        let outpainter = match self.outpainter_for(&model) {
            Ok(outpainter) => outpainter,
            Err(err) => return self.surface.show_error(&err.to_string()),
        };
        let direction = OutpaintDirection::parse_hint(text);
        let request = OutpaintRequest::new(
            source,
            text,
            model,
            direction,
            self.config.outpaint.expand_scale,
        );
        info!(model = %request.model, %direction, "queueing outpaint");
        self.surface.show_text(&format!(
            "Extending {} ({direction})...",
            request.source.display()
        ));
        self.queue(ImageJob::Outpaint {
            question: text.to_string(),
            outpainter,
            request,
        });
    }

    fn queue(&self, job: ImageJob) {
        if let Err(err) = self.worker.submit(job) {
            self.surface.show_error(&err.to_string());
        }
    }

    fn generator_for(&self, model: &str) -> Result<Arc<dyn ImageGenerator>> {
        if self.is_dryrun_model(model) {
            return Ok(Arc::new(DryrunGenerator));
        }
        self.generator.clone().ok_or_else(image_disabled)
    }

    fn outpainter_for(&self, model: &str) -> Result<Arc<dyn Outpainter>> {
        if self.is_dryrun_model(model) {
            return Ok(Arc::new(DryrunOutpainter));
        }
        self.outpainter.clone().ok_or_else(image_disabled)
    }

    fn is_dryrun_model(&self, model: &str) -> bool {
        self.selector
            .registry
            .get(model)
            .is_some_and(|spec| spec.is_dryrun())
    }

    /// The selected image model when it can also outpaint, otherwise the
    /// configured outpaint model.
    fn outpaint_model(&self) -> String {
        match self.selector.registry.get(&self.image_model) {
            Some(spec) if spec.supports(Capability::Outpaint) => spec.name.clone(),
            _ => self.config.outpaint_model.clone(),
        }
    }

    fn handle_command(&mut self, command: ChatCommand) -> SessionControl {
        match command {
            ChatCommand::Quit => return SessionControl::Quit,
            ChatCommand::Help => self
                .surface
                .show_text(&format!("Commands: {}", CHAT_HELP_COMMANDS.join(", "))),
            ChatCommand::Models => self.show_models(),
            ChatCommand::SetImageModel(name) => self.set_image_model(&name),
            ChatCommand::UseImage(path) => self.use_image(&path),
            ChatCommand::SaveKeys { chat, image } => {
                if let Err(err) = self.save_keys(&chat, &image) {
                    self.surface.show_error(&err.to_string());
                }
            }
            ChatCommand::Unknown { command, .. } => self
                .surface
                .show_error(&format!("Unknown command: /{command} (try /help)")),
        }
        SessionControl::Continue
    }

    fn show_models(&self) {
        let mut lines = Vec::new();
        for capability in [Capability::Chat, Capability::Image, Capability::Outpaint] {
            let names = self
                .selector
                .registry
                .by_capability(capability)
                .into_iter()
                .map(|spec| {
                    let active = match capability {
                        Capability::Chat => spec.name == self.config.chat_model,
                        Capability::Image => spec.name == self.image_model,
                        Capability::Outpaint => spec.name == self.outpaint_model(),
                    };
                    if active {
                        format!("{}*", spec.name)
                    } else {
                        spec.name
                    }
                })
                .collect::<Vec<_>>();
            lines.push(format!("{capability}: {}", names.join(", ")));
        }
        self.surface.show_text(&lines.join("\n"));
    }

    fn set_image_model(&mut self, name: &str) {
        match self.selector.select(Some(name), Capability::Image) {
            Ok(selection) => {
                self.image_model = selection.model.name;
                match selection.fallback_reason {
                    Some(reason) => self.surface.show_error(&format!(
                        "{reason} Using {} instead.",
                        self.image_model
                    )),
                    None => self
                        .surface
                        .show_text(&format!("Image model set to {}.", self.image_model)),
                }
            }
            Err(reason) => self.surface.show_error(&reason),
        }
    }

    fn use_image(&mut self, raw: &str) {
        let path = PathBuf::from(raw);
        if !path.is_file() {
            return self
                .surface
                .show_error(&format!("Image not found: {}", path.display()));
        }
        if let Err(err) = ImageFormat::from_path(&path) {
            return self.surface.show_error(&err.to_string());
        }
        lock_shared(&self.shared).set_last_image(path.clone());
        self.surface
            .show_text(&format!("Active image: {}", path.display()));
    }

    fn save_keys(&mut self, chat: &str, image: &str) -> Result<()> {
        let Some(store) = self.credential_store.as_ref() else {
            return Err(EngineError::Configuration(
                "no credential store configured for this session".to_string(),
            ));
        };
        let credentials = store.save(chat, image)?.with_env_fallback();
        let path = store.path().display().to_string();
        let mut parts = SessionParts::default();
        parts.install_remote(&self.config, &credentials)?;
        self.classifier = IntentClassifier::new(parts.chat.clone());
        self.chat = parts.chat;
        self.generator = parts.generator;
        self.outpainter = parts.outpainter;
        self.surface.show_text(&format!("Keys saved to {path}."));
        Ok(())
    }
}

fn image_disabled() -> EngineError {
    EngineError::Configuration(
        "image features are disabled: missing image API key (set it with /keys)".to_string(),
    )
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::{Path, PathBuf};
    use std::sync::{Arc, Mutex};

    use easel_contracts::chat::OutpaintDirection;
    use easel_contracts::conversation::{ConversationTurn, Role};
    use easel_contracts::events::read_events;
    use easel_contracts::jobs::{GenerationRequest, OutpaintRequest, StoredImage};
    use easel_contracts::transcript::Transcript;

    use super::*;
    use crate::chat::{ChatBackend, CompletionOptions};
    use crate::config::CredentialStore;
    use crate::error::{EngineError, Result};
    use crate::outpaint::{OutpaintOutcome, OutpaintProgress, OutpaintState};

    #[derive(Debug, Clone, PartialEq)]
    enum Rendered {
        Text(String),
        Delta(String),
        End,
        Image(PathBuf),
        Error(String),
    }

    #[derive(Default)]
    struct RecordingSurface {
        rendered: Mutex<Vec<Rendered>>,
    }

    impl RecordingSurface {
        fn rendered(&self) -> Vec<Rendered> {
            self.rendered.lock().expect("lock").clone()
        }

        fn push(&self, item: Rendered) {
            self.rendered.lock().expect("lock").push(item);
        }
    }

    impl RenderSurface for RecordingSurface {
        fn show_text(&self, text: &str) {
            self.push(Rendered::Text(text.to_string()));
        }
        fn stream_delta(&self, delta: &str) {
            self.push(Rendered::Delta(delta.to_string()));
        }
        fn stream_end(&self) {
            self.push(Rendered::End);
        }
        fn show_image(&self, path: &Path, _action_label: &str) {
            self.push(Rendered::Image(path.to_path_buf()));
        }
        fn show_error(&self, message: &str) {
            self.push(Rendered::Error(message.to_string()));
        }
    }

    struct FakeChat {
        label: String,
        stream_fails: bool,
        streamed: Mutex<Vec<Vec<ConversationTurn>>>,
    }

    impl FakeChat {
        fn labelling(label: &str) -> Arc<Self> {
            Arc::new(Self {
                label: label.to_string(),
                stream_fails: false,
                streamed: Mutex::new(Vec::new()),
            })
        }

        fn failing_stream() -> Arc<Self> {
            Arc::new(Self {
                label: "OTHER".to_string(),
                stream_fails: true,
                streamed: Mutex::new(Vec::new()),
            })
        }
    }

    impl ChatBackend for FakeChat {
        fn complete(&self, _messages: &[ConversationTurn], _options: CompletionOptions) -> Result<String> {
            Ok(self.label.clone())
        }

        fn stream(
            &self,
            messages: &[ConversationTurn],
            _options: CompletionOptions,
            on_delta: &mut dyn FnMut(&str),
        ) -> Result<String> {
            self.streamed.lock().expect("lock").push(messages.to_vec());
            if self.stream_fails {
                return Err(EngineError::vendor("Chat", 402, "Insufficient Balance"));
            }
            on_delta("Hi");
            on_delta(" there");
            Ok("Hi there".to_string())
        }
    }

    #[derive(Default)]
    struct FakeGenerator {
        requests: Mutex<Vec<GenerationRequest>>,
        fail: bool,
    }

    impl ImageGenerator for FakeGenerator {
        fn generate(
            &self,
            request: &GenerationRequest,
            out_dir: &Path,
            file_prefix: &str,
        ) -> Result<Vec<PathBuf>> {
            self.requests.lock().expect("lock").push(request.clone());
            if self.fail {
                return Err(EngineError::GenerationFailed("status 400: bad prompt".to_string()));
            }
            fs::create_dir_all(out_dir)?;
            let paths = vec![
                out_dir.join(format!("{file_prefix}_0_cat.png")),
                out_dir.join(format!("{file_prefix}_1_cat.png")),
            ];
            for path in &paths {
                fs::write(path, b"png")?;
            }
            Ok(paths)
        }
    }

    #[derive(Default)]
    struct FakeOutpainter {
        requests: Mutex<Vec<OutpaintRequest>>,
    }

    impl Outpainter for FakeOutpainter {
        fn outpaint(
            &self,
            request: &OutpaintRequest,
            out_dir: &Path,
            progress: &mut dyn FnMut(OutpaintProgress),
        ) -> Result<OutpaintOutcome> {
            self.requests.lock().expect("lock").push(request.clone());
            progress(OutpaintProgress::Submitted {
                task_id: "task-9".to_string(),
            });
            fs::create_dir_all(out_dir)?;
            let local_path = out_dir.join("wide.png");
            fs::write(&local_path, b"wide")?;
            Ok(OutpaintOutcome {
                task_id: "task-9".to_string(),
                state: OutpaintState::Downloaded,
                image: StoredImage {
                    local_path,
                    source_url: "https://oss.example.com/wide.png".to_string(),
                    size_bytes: 4,
                },
                polls: 2,
                waits: 1,
                poll_retries: 0,
                download_attempts: 1,
            })
        }
    }

    struct Harness {
        session: Session,
        surface: Arc<RecordingSurface>,
        generator: Arc<FakeGenerator>,
        outpainter: Arc<FakeOutpainter>,
        dir: tempfile::TempDir,
    }

    fn harness(chat: Option<Arc<FakeChat>>, generator: FakeGenerator) -> anyhow::Result<Harness> {
        let dir = tempfile::tempdir()?;
        let config = EngineConfig {
            output_dir: dir.path().join("images"),
            ..EngineConfig::default()
        };
        let surface = Arc::new(RecordingSurface::default());
        let generator = Arc::new(generator);
        let outpainter = Arc::new(FakeOutpainter::default());
        let parts = SessionParts {
            chat: chat.map(|chat| chat as Arc<dyn ChatBackend>),
            generator: Some(generator.clone() as Arc<dyn ImageGenerator>),
            outpainter: Some(outpainter.clone() as Arc<dyn Outpainter>),
            ..SessionParts::default()
        }
        .with_events(EventLog::new(dir.path().join("events.jsonl"), "test-session"))
        .with_transcript(Transcript::open(dir.path().join("transcript.txt"))?)
        .with_credential_store(CredentialStore::new(dir.path().join(".apikey")));
        let session = Session::new(config, parts, surface.clone() as Arc<dyn RenderSurface>)?;
        Ok(Harness {
            session,
            surface,
            generator,
            outpainter,
            dir,
        })
    }

    fn event_types(dir: &Path) -> anyhow::Result<Vec<&'static str>> {
        Ok(read_events(&dir.join("events.jsonl"))?
            .iter()
            .map(SessionEvent::kind)
            .collect())
    }

    #[test]
    fn classified_generation_sets_last_image_to_first_result() -> anyhow::Result<()> {
        let mut h = harness(Some(FakeChat::labelling("IMAGE_GENERATION")), FakeGenerator::default())?;
        assert_eq!(h.session.handle_user_message("画一张猫"), SessionControl::Continue);
        h.session.flush();

        let requests = h.generator.requests.lock().expect("lock").clone();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].prompt, "画一张猫");
        assert_eq!(requests[0].model, "wanx2.1-t2i-turbo");
        assert_eq!(requests[0].size, "1024*1024");

        let images = h.dir.path().join("images");
        assert_eq!(h.session.last_image(), Some(images.join("image_0_cat.png")));
        let rendered = h.surface.rendered();
        assert!(rendered.contains(&Rendered::Image(images.join("image_0_cat.png"))));
        assert!(rendered.contains(&Rendered::Image(images.join("image_1_cat.png"))));

        let transcript = fs::read_to_string(h.dir.path().join("transcript.txt"))?;
        assert!(transcript.contains("Question:\n画一张猫"));
        assert!(transcript.contains("Generated image:"));

        h.session.finish();
        assert_eq!(
            event_types(h.dir.path())?,
            vec![
                "session_started",
                "intent_classified",
                "image_generated",
                "session_finished"
            ]
        );
        Ok(())
    }

    #[test]
    fn outpainting_without_an_image_only_renders_guidance() -> anyhow::Result<()> {
        let mut h = harness(Some(FakeChat::labelling("OUTPAINTING")), FakeGenerator::default())?;
        h.session.handle_user_message("extend it to the left");
        h.session.flush();

        assert!(h.generator.requests.lock().expect("lock").is_empty());
        assert!(h.outpainter.requests.lock().expect("lock").is_empty());
        assert_eq!(
            h.surface.rendered(),
            vec![Rendered::Text(NO_IMAGE_GUIDANCE.to_string())]
        );
        Ok(())
    }

    #[test]
    fn outpaint_uses_active_image_and_direction_hint() -> anyhow::Result<()> {
        let mut h = harness(Some(FakeChat::labelling("OUTPAINTING")), FakeGenerator::default())?;
        let source = h.dir.path().join("photo.png");
        fs::write(&source, b"png")?;
        h.session
            .handle_user_message(&format!("/use {}", source.display()));
        assert_eq!(h.session.last_image(), Some(source.clone()));

        h.session.handle_user_message("往左边扩展一些");
        h.session.flush();

        let requests = h.outpainter.requests.lock().expect("lock").clone();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].source, source);
        assert_eq!(requests[0].model, "wanx2.1-imageedit");
        assert_eq!(requests[0].direction, OutpaintDirection::Left);
        assert_eq!(requests[0].scales.left, 1.2);
        assert_eq!(requests[0].scales.right, 1.0);
        assert_eq!(
            h.session.last_image(),
            Some(h.dir.path().join("images").join("wide.png"))
        );
        h.session.finish();
        let events = read_events(&h.dir.path().join("events.jsonl"))?;
        assert!(events.iter().any(|event| matches!(
            event,
            SessionEvent::OutpaintSubmitted { direction: OutpaintDirection::Left, model, .. }
                if model == "wanx2.1-imageedit"
        )));
        assert!(events
            .iter()
            .any(|event| matches!(event, SessionEvent::OutpaintCompleted { .. })));
        Ok(())
    }

    #[test]
    fn other_intent_streams_chat_with_system_prompt() -> anyhow::Result<()> {
        let chat = FakeChat::labelling("OTHER");
        let mut h = harness(Some(chat.clone()), FakeGenerator::default())?;
        h.session.handle_user_message("hello");

        assert_eq!(
            h.surface.rendered(),
            vec![
                Rendered::Delta("Hi".to_string()),
                Rendered::Delta(" there".to_string()),
                Rendered::End
            ]
        );
        let streamed = chat.streamed.lock().expect("lock").clone();
        assert_eq!(streamed[0][0].role, Role::System);
        assert_eq!(streamed[0][0].content, SYSTEM_PROMPT);
        assert_eq!(streamed[0][1].content, "hello");
        let turns = h.session.history().turns();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[1].role, Role::Assistant);
        assert_eq!(turns[1].content, "Hi there");
        Ok(())
    }

    #[test]
    fn chat_failure_renders_request_error_and_is_logged() -> anyhow::Result<()> {
        let mut h = harness(Some(FakeChat::failing_stream()), FakeGenerator::default())?;
        h.session.handle_user_message("hello");

        let expected = "Request error: Chat request failed (402): Insufficient Balance";
        assert!(h.surface.rendered().contains(&Rendered::Error(expected.to_string())));
        let transcript = fs::read_to_string(h.dir.path().join("transcript.txt"))?;
        assert!(transcript.contains(expected));
        Ok(())
    }

    #[test]
    fn missing_chat_backend_falls_back_to_chat_configuration_error() -> anyhow::Result<()> {
        let mut h = harness(None, FakeGenerator::default())?;
        h.session.handle_user_message("画一张猫");
        h.session.flush();
        assert!(h.generator.requests.lock().expect("lock").is_empty());
        assert!(matches!(
            h.surface.rendered().as_slice(),
            [Rendered::Error(message)] if message.starts_with("Request error: Configuration error")
        ));
        Ok(())
    }

    #[test]
    fn generation_failure_is_rendered_and_leaves_pointer_unset() -> anyhow::Result<()> {
        let generator = FakeGenerator {
            fail: true,
            ..FakeGenerator::default()
        };
        let mut h = harness(Some(FakeChat::labelling("IMAGE_GENERATION")), generator)?;
        h.session.handle_user_message("draw a cat");
        h.session.flush();
        assert_eq!(h.session.last_image(), None);
        assert!(h.surface.rendered().contains(&Rendered::Error(
            "Image generation failed: status 400: bad prompt".to_string()
        )));
        let events = read_events(&h.dir.path().join("events.jsonl"))?;
        assert!(events.contains(&SessionEvent::JobFailed {
            job: JobKind::Generation,
            state: FailureState::Failed,
            error: "Image generation failed: status 400: bad prompt".to_string(),
        }));
        Ok(())
    }

    #[test]
    fn dryrun_model_generates_and_extends_offline() -> anyhow::Result<()> {
        let mut h = harness(Some(FakeChat::labelling("IMAGE_GENERATION")), FakeGenerator::default())?;
        h.session.handle_user_message("/image_model dryrun-image-1");
        assert_eq!(h.session.image_model(), "dryrun-image-1");
        h.session.handle_user_message("a lighthouse");
        h.session.flush();

        assert!(h.generator.requests.lock().expect("lock").is_empty());
        let generated = h
            .session
            .last_image()
            .ok_or_else(|| anyhow::anyhow!("no image"))?;
        assert_eq!(image::image_dimensions(&generated)?, (512, 512));
        Ok(())
    }

    #[test]
    fn commands_cover_models_help_unknown_and_quit() -> anyhow::Result<()> {
        let mut h = harness(Some(FakeChat::labelling("OTHER")), FakeGenerator::default())?;
        h.session.handle_user_message("/image_model not-a-model");
        assert_eq!(h.session.image_model(), "wanx2.1-t2i-turbo");
        h.session.handle_user_message("/models");
        h.session.handle_user_message("/frobnicate now");
        h.session.handle_user_message("/use /definitely/missing.png");
        assert_eq!(h.session.handle_user_message("/quit"), SessionControl::Quit);

        let rendered = h.surface.rendered();
        assert!(matches!(&rendered[0], Rendered::Error(message) if message.contains("not-a-model")));
        assert!(matches!(&rendered[1], Rendered::Text(text) if text.contains("image: wanx2.1-t2i-turbo*")));
        assert_eq!(
            rendered[2],
            Rendered::Error("Unknown command: /frobnicate (try /help)".to_string())
        );
        assert!(matches!(&rendered[3], Rendered::Error(message) if message.starts_with("Image not found")));
        Ok(())
    }

    #[test]
    fn keys_command_saves_store() -> anyhow::Result<()> {
        let mut h = harness(Some(FakeChat::labelling("OTHER")), FakeGenerator::default())?;
        h.session.handle_user_message("/keys sk-chat sk-image");
        assert_eq!(
            fs::read_to_string(h.dir.path().join(".apikey"))?,
            "sk-chat\nsk-image"
        );
        assert!(matches!(
            h.surface.rendered().last(),
            Some(Rendered::Text(text)) if text.starts_with("Keys saved to")
        ));
        Ok(())
    }
}
