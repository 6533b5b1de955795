mod render;

use std::fs;
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use easel_contracts::chat::OutpaintDirection;
use easel_contracts::events::EventLog;
use easel_contracts::jobs::{GenerationRequest, OutpaintRequest};
use easel_contracts::models::{Capability, ModelSelector, ModelSpec};
use easel_contracts::transcript::Transcript;
use easel_engine::dryrun::{DryrunGenerator, DryrunOutpainter};
use easel_engine::{
    CredentialStore, Credentials, DashScopeGenerator, EngineConfig, ImageGenerator,
    OutpaintClient, OutpaintPolicy, OutpaintProgress, Outpainter, RenderSurface, Session,
    SessionControl, SessionParts, IMAGE_FILE_PREFIX,
};
use tracing::info;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use crate::render::TerminalSurface;

#[derive(Debug, Parser)]
#[command(name = "easel", version, about = "Chat assistant that can draw and extend images")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Interactive session.
    Chat(ChatArgs),
    /// Generate images from one prompt.
    Generate(GenerateArgs),
    /// Extend the canvas of an existing image.
    Extend(ExtendArgs),
    /// Save the chat and image API keys.
    Keys(KeysArgs),
    /// List known models.
    Models,
}

#[derive(Debug, Parser)]
struct ChatArgs {
    #[arg(long)]
    out: Option<PathBuf>,
    #[arg(long)]
    events: Option<PathBuf>,
    #[arg(long)]
    keys: Option<PathBuf>,
    #[arg(long)]
    chat_model: Option<String>,
    #[arg(long)]
    image_model: Option<String>,
}

#[derive(Debug, Parser)]
struct GenerateArgs {
    #[arg(long)]
    prompt: String,
    #[arg(long)]
    model: Option<String>,
    #[arg(long)]
    size: Option<String>,
    #[arg(long, default_value_t = 1)]
    n: u32,
    #[arg(long)]
    out: Option<PathBuf>,
    #[arg(long)]
    keys: Option<PathBuf>,
}

#[derive(Debug, Parser)]
struct ExtendArgs {
    #[arg(long)]
    image: PathBuf,
    #[arg(long)]
    prompt: String,
    /// left, right, top, bottom or all. Parsed from the prompt when omitted.
    #[arg(long)]
    direction: Option<String>,
    #[arg(long)]
    scale: Option<f64>,
    #[arg(long)]
    seed: Option<i64>,
    #[arg(long)]
    model: Option<String>,
    #[arg(long)]
    out: Option<PathBuf>,
    #[arg(long)]
    keys: Option<PathBuf>,
}

#[derive(Debug, Parser)]
struct KeysArgs {
    #[arg(long)]
    chat: String,
    #[arg(long)]
    image: String,
    #[arg(long)]
    keys: Option<PathBuf>,
}

fn main() {
    init_tracing();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("easel error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("EASEL_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .try_init();
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Chat(args) => run_chat(args),
        Command::Generate(args) => run_generate(args),
        Command::Extend(args) => run_extend(args),
        Command::Keys(args) => run_keys(args),
        Command::Models => {
            print!("{}", models_listing());
            Ok(0)
        }
    }
}

fn engine_config(out: Option<&Path>) -> EngineConfig {
    let mut config = EngineConfig::from_env();
    if let Some(out) = out {
        config.output_dir = out.to_path_buf();
    }
    config
}

/// `.apikey` next to the output directory unless given explicitly.
fn credential_store(explicit: Option<&Path>, output_dir: &Path) -> CredentialStore {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => output_dir
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
            .join(".apikey"),
    };
    CredentialStore::new(path)
}

fn load_credentials(store: &CredentialStore) -> Result<Credentials> {
    let credentials = store
        .load()
        .with_context(|| format!("failed to read {}", store.path().display()))?;
    Ok(credentials.with_env_fallback())
}

fn run_chat(args: ChatArgs) -> Result<i32> {
    let mut config = engine_config(args.out.as_deref());
    if let Some(model) = args.chat_model {
        config.chat_model = model;
    }
    if let Some(model) = args.image_model {
        config.image_model = model;
    }
    fs::create_dir_all(&config.output_dir)
        .with_context(|| format!("failed to create {}", config.output_dir.display()))?;

    let store = credential_store(args.keys.as_deref(), &config.output_dir);
    let credentials = load_credentials(&store)?;
    let events_path = args
        .events
        .unwrap_or_else(|| config.output_dir.join("events.jsonl"));
    let session_id = uuid::Uuid::new_v4().to_string();
    let transcript = Transcript::open(config.output_dir.join("transcript.txt"))?;
    let parts = SessionParts::remote(&config, &credentials)?
        .with_events(EventLog::new(&events_path, session_id.as_str()))
        .with_transcript(transcript)
        .with_credential_store(store);
    let surface: Arc<dyn RenderSurface> = Arc::new(TerminalSurface::new(io::stdout()));
    let mut session = Session::new(config, parts, surface)?;
    info!(%session_id, events = %events_path.display(), "chat session started");

    println!("Easel chat started. Type /help for commands.");
    let stdin = io::stdin();
    let mut line = String::new();
    loop {
        print!("> ");
        io::stdout().flush()?;

        line.clear();
        let read = match stdin.read_line(&mut line) {
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        if read == 0 {
            break;
        }
        let input = line.trim_end_matches(['\n', '\r']);
        if session.handle_user_message(input) == SessionControl::Quit {
            break;
        }
    }

    println!("Waiting for pending image jobs...");
    session.finish();
    Ok(0)
}

fn run_generate(args: GenerateArgs) -> Result<i32> {
    let mut config = engine_config(args.out.as_deref());
    if let Some(model) = args.model {
        config.image_model = model;
    }
    let (model, notice) = resolve_model(&config.image_model, Capability::Image)?;
    if let Some(notice) = notice {
        eprintln!("{notice}");
    }

    let mut request = GenerationRequest::new(args.prompt, model.name.as_str()).with_count(args.n);
    if let Some(size) = args.size.or(model.default_size.clone()) {
        request = request.with_size(size);
    }
    let generator: Box<dyn ImageGenerator> = if model.is_dryrun() {
        Box::new(DryrunGenerator)
    } else {
        let store = credential_store(args.keys.as_deref(), &config.output_dir);
        let credentials = load_credentials(&store)?;
        Box::new(DashScopeGenerator::new(&config, credentials.image_key()?)?)
    };
    let paths = generator.generate(&request, &config.output_dir, IMAGE_FILE_PREFIX)?;
    for path in paths {
        println!("{}", path.display());
    }
    Ok(0)
}

fn run_extend(args: ExtendArgs) -> Result<i32> {
    let config = engine_config(args.out.as_deref());
    if !args.image.is_file() {
        bail!("image not found: {}", args.image.display());
    }
    let requested = args.model.as_deref().unwrap_or(&config.outpaint_model);
    let (model, notice) = resolve_model(requested, Capability::Outpaint)?;
    if let Some(notice) = notice {
        eprintln!("{notice}");
    }
    let direction = OutpaintDirection::parse_hint(args.direction.as_deref().unwrap_or(&args.prompt));
    let scale = extend_scale(args.scale, &config.outpaint);
    let mut request = OutpaintRequest::new(
        &args.image,
        args.prompt.as_str(),
        model.name.as_str(),
        direction,
        scale,
    );
    request.seed = args.seed;

    let outpainter: Box<dyn Outpainter> = if model.is_dryrun() {
        Box::new(DryrunOutpainter)
    } else {
        let store = credential_store(args.keys.as_deref(), &config.output_dir);
        let credentials = load_credentials(&store)?;
        Box::new(OutpaintClient::dashscope(&config, credentials.image_key()?)?)
    };
    let outcome = outpainter.outpaint(&request, &config.output_dir, &mut |progress| {
        if let OutpaintProgress::Submitted { task_id } = progress {
            eprintln!("submitted {task_id}");
        }
    })?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(0)
}

/// The model to run plus a notice when the requested one was replaced.
fn resolve_model(requested: &str, capability: Capability) -> Result<(ModelSpec, Option<String>)> {
    let selection = ModelSelector::default()
        .select(Some(requested), capability)
        .map_err(anyhow::Error::msg)?;
    let notice = selection
        .fallback_reason
        .map(|reason| format!("{reason} Using {}.", selection.model.name));
    Ok((selection.model, notice))
}

fn extend_scale(requested: Option<f64>, policy: &OutpaintPolicy) -> f64 {
    match requested {
        Some(scale) => {
            let clamped = policy.clamp_expand_scale(scale);
            if clamped != scale {
                eprintln!("--scale {scale} is outside 1.0-3.0, using {clamped}.");
            }
            clamped
        }
        None => policy.expand_scale,
    }
}

fn run_keys(args: KeysArgs) -> Result<i32> {
    let config = engine_config(None);
    let store = credential_store(args.keys.as_deref(), &config.output_dir);
    let saved = store
        .save(&args.chat, &args.image)
        .with_context(|| format!("failed to write {}", store.path().display()))?;
    if saved.chat.is_none() || saved.image.is_none() {
        eprintln!("warning: one of the keys is empty");
    }
    println!("Keys saved to {}", store.path().display());
    Ok(0)
}

fn models_listing() -> String {
    let selector = ModelSelector::default();
    let mut listing = String::new();
    for model in selector.registry.list() {
        let capabilities = model
            .capabilities
            .iter()
            .map(|capability| capability.as_str())
            .collect::<Vec<_>>()
            .join(",");
        listing.push_str(&format!(
            "{:<22} {:<10} {}\n",
            model.name, model.provider, capabilities
        ));
    }
    listing
}
