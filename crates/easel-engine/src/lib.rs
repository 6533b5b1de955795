pub mod chat;
pub mod classifier;
pub mod codec;
pub mod config;
pub mod dryrun;
pub mod error;
pub mod generation;
mod http;
pub mod outpaint;
pub mod paths;
pub mod session;
mod worker;

pub use chat::{ChatBackend, CompletionOptions, OpenAiCompatibleChat};
pub use classifier::IntentClassifier;
pub use config::{CredentialStore, Credentials, EngineConfig, OutpaintPolicy};
pub use error::{EngineError, Result};
pub use generation::{DashScopeGenerator, ImageGenerator};
pub use outpaint::{
    Clock, OutpaintClient, OutpaintOutcome, OutpaintProgress, OutpaintState, Outpainter,
    SystemClock,
};
pub use session::{RenderSurface, Session, SessionControl, SessionParts};
pub use worker::{ImageWorker, IMAGE_FILE_PREFIX};
