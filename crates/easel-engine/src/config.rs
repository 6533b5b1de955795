//! Engine configuration: defaults, then environment, then caller overrides.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{EngineError, Result};
use crate::http::non_empty_env;

pub const DEFAULT_CHAT_API_BASE: &str = "https://api.deepseek.com";
pub const DEFAULT_IMAGE_API_BASE: &str = "https://dashscope.aliyuncs.com/api/v1";
pub const DEFAULT_CHAT_MODEL: &str = "deepseek-chat";
pub const DEFAULT_IMAGE_MODEL: &str = "wanx2.1-t2i-turbo";
pub const DEFAULT_OUTPAINT_MODEL: &str = "wanx2.1-imageedit";

/// Timing and retry budget for one outpaint job.
///
/// The overall `timeout` bounds how long a job may stay unresolved; the
/// `max_poll_retries` and `download_attempts` budgets bound individual
/// flaky HTTP calls. Neither resets the other.
#[derive(Debug, Clone, PartialEq)]
pub struct OutpaintPolicy {
    pub poll_interval: Duration,
    pub timeout: Duration,
    pub max_poll_retries: u32,
    pub download_attempts: u32,
    pub download_backoff: Duration,
    pub expand_scale: f64,
}

impl Default for OutpaintPolicy {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(3),
            timeout: Duration::from_secs(300),
            max_poll_retries: 5,
            download_attempts: 3,
            download_backoff: Duration::from_secs(2),
            expand_scale: 1.2,
        }
    }
}

impl OutpaintPolicy {
    pub const MIN_EXPAND_SCALE: f64 = 1.0;
    pub const MAX_EXPAND_SCALE: f64 = 3.0;

    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            poll_interval: env_seconds("EASEL_POLL_INTERVAL", defaults.poll_interval, 0.2, 30.0),
            timeout: env_seconds("EASEL_POLL_TIMEOUT", defaults.timeout, 10.0, 3600.0),
            max_poll_retries: env_f64(
                "EASEL_POLL_RETRIES",
                f64::from(defaults.max_poll_retries),
                0.0,
                20.0,
            )
            .round() as u32,
            download_attempts: env_f64(
                "EASEL_DOWNLOAD_ATTEMPTS",
                f64::from(defaults.download_attempts),
                1.0,
                10.0,
            )
            .round() as u32,
            download_backoff: env_seconds(
                "EASEL_DOWNLOAD_BACKOFF",
                defaults.download_backoff,
                0.0,
                30.0,
            ),
            expand_scale: env_f64(
                "EASEL_EXPAND_SCALE",
                defaults.expand_scale,
                Self::MIN_EXPAND_SCALE,
                Self::MAX_EXPAND_SCALE,
            ),
        }
    }

    /// Caller-supplied multiplier bounded like `EASEL_EXPAND_SCALE`. A
    /// non-finite value falls back to the policy scale.
    pub fn clamp_expand_scale(&self, scale: f64) -> f64 {
        let scale = if scale.is_finite() {
            scale
        } else {
            self.expand_scale
        };
        scale.clamp(Self::MIN_EXPAND_SCALE, Self::MAX_EXPAND_SCALE)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub chat_api_base: String,
    pub image_api_base: String,
    pub chat_model: String,
    pub image_model: String,
    pub outpaint_model: String,
    pub output_dir: PathBuf,
    pub request_timeout: Duration,
    pub outpaint: OutpaintPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chat_api_base: DEFAULT_CHAT_API_BASE.to_string(),
            image_api_base: DEFAULT_IMAGE_API_BASE.to_string(),
            chat_model: DEFAULT_CHAT_MODEL.to_string(),
            image_model: DEFAULT_IMAGE_MODEL.to_string(),
            outpaint_model: DEFAULT_OUTPAINT_MODEL.to_string(),
            output_dir: PathBuf::from("generated_images"),
            request_timeout: Duration::from_secs(60),
            outpaint: OutpaintPolicy::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            chat_api_base: env_api_base("EASEL_CHAT_API_BASE", &defaults.chat_api_base),
            image_api_base: env_api_base("EASEL_IMAGE_API_BASE", &defaults.image_api_base),
            chat_model: non_empty_env("EASEL_CHAT_MODEL").unwrap_or(defaults.chat_model),
            image_model: non_empty_env("EASEL_IMAGE_MODEL").unwrap_or(defaults.image_model),
            outpaint_model: non_empty_env("EASEL_OUTPAINT_MODEL")
                .unwrap_or(defaults.outpaint_model),
            output_dir: non_empty_env("EASEL_OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.output_dir),
            request_timeout: env_seconds(
                "EASEL_REQUEST_TIMEOUT",
                defaults.request_timeout,
                5.0,
                600.0,
            ),
            outpaint: OutpaintPolicy::from_env(),
        }
    }
}

/// The two bearer tokens: one for the chat service, one for the image service.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub chat: Option<String>,
    pub image: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("chat", &self.chat.as_ref().map(|_| "<redacted>"))
            .field("image", &self.image.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Credentials {
    pub fn new(chat: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            chat: non_empty(chat.into()),
            image: non_empty(image.into()),
        }
    }

    pub fn chat_key(&self) -> Result<&str> {
        self.chat.as_deref().ok_or_else(|| {
            EngineError::Configuration(
                "missing chat API key (set it with /keys or DEEPSEEK_API_KEY)".to_string(),
            )
        })
    }

    pub fn image_key(&self) -> Result<&str> {
        self.image.as_deref().ok_or_else(|| {
            EngineError::Configuration(
                "missing image API key (set it with /keys or DASHSCOPE_API_KEY)".to_string(),
            )
        })
    }

    /// Fills any missing token from the environment.
    pub fn with_env_fallback(self) -> Self {
        Self {
            chat: self
                .chat
                .or_else(|| non_empty_env("DEEPSEEK_API_KEY"))
                .or_else(|| non_empty_env("EASEL_CHAT_API_KEY")),
            image: self
                .image
                .or_else(|| non_empty_env("DASHSCOPE_API_KEY"))
                .or_else(|| non_empty_env("EASEL_IMAGE_API_KEY")),
        }
    }
}

/// Two-line credential file: chat token on line one, image token on line two.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A missing file reads as empty credentials.
    pub fn load(&self) -> Result<Credentials> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Credentials::default())
            }
            Err(err) => return Err(err.into()),
        };
        let mut lines = raw.trim().lines();
        let chat = lines.next().unwrap_or_default().trim().to_string();
        let image = lines.next().unwrap_or_default().trim().to_string();
        Ok(Credentials::new(chat, image))
    }

    /// Writes both tokens (trimmed) and returns what a fresh load now yields.
    pub fn save(&self, chat: &str, image: &str) -> Result<Credentials> {
        if let Some(parent) = self
            .path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
        {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, format!("{}\n{}", chat.trim(), image.trim()))?;
        self.load()
    }
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn env_api_base(key: &str, default: &str) -> String {
    non_empty_env(key)
        .map(|value| value.trim_end_matches('/').to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_f64(key: &str, default: f64, min: f64, max: f64) -> f64 {
    non_empty_env(key)
        .and_then(|value| value.parse::<f64>().ok())
        .filter(|value| value.is_finite())
        .unwrap_or(default)
        .clamp(min, max)
}

fn env_seconds(key: &str, default: Duration, min: f64, max: f64) -> Duration {
    Duration::from_secs_f64(env_f64(key, default.as_secs_f64(), min, max))
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::time::Duration;

    use super::{CredentialStore, Credentials, EngineConfig, OutpaintPolicy};
    use crate::error::EngineError;

    #[test]
    fn defaults_match_documented_policy() {
        let policy = OutpaintPolicy::default();
        assert_eq!(policy.poll_interval, Duration::from_secs(3));
        assert_eq!(policy.timeout, Duration::from_secs(300));
        assert_eq!(policy.download_attempts, 3);
        assert_eq!(policy.download_backoff, Duration::from_secs(2));
        assert_eq!(policy.expand_scale, 1.2);
        assert_eq!(EngineConfig::default().image_model, "wanx2.1-t2i-turbo");
    }

    #[test]
    fn explicit_expand_scale_is_bounded() {
        let policy = OutpaintPolicy::default();
        assert_eq!(policy.clamp_expand_scale(1e9), 3.0);
        assert_eq!(policy.clamp_expand_scale(0.5), 1.0);
        assert_eq!(policy.clamp_expand_scale(1.5), 1.5);
        assert_eq!(policy.clamp_expand_scale(f64::NAN), 1.2);
    }

    #[test]
    fn missing_store_reads_as_empty() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = CredentialStore::new(temp.path().join(".apikey"));
        assert_eq!(store.load()?, Credentials::default());
        Ok(())
    }

    #[test]
    fn save_trims_and_round_trips_both_lines() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = CredentialStore::new(temp.path().join("conf").join(".apikey"));
        let loaded = store.save("  sk-chat ", "sk-image\n")?;
        assert_eq!(loaded.chat.as_deref(), Some("sk-chat"));
        assert_eq!(loaded.image.as_deref(), Some("sk-image"));
        assert_eq!(fs::read_to_string(store.path())?, "sk-chat\nsk-image");
        Ok(())
    }

    #[test]
    fn single_line_store_leaves_image_key_missing() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join(".apikey");
        fs::write(&path, "sk-chat-only\n")?;
        let credentials = CredentialStore::new(&path).load()?;
        assert_eq!(credentials.chat_key().ok(), Some("sk-chat-only"));
        assert!(matches!(
            credentials.image_key(),
            Err(EngineError::Configuration(_))
        ));
        Ok(())
    }

    #[test]
    fn debug_output_redacts_tokens() {
        let rendered = format!("{:?}", Credentials::new("secret-a", "secret-b"));
        assert!(!rendered.contains("secret"));
        assert!(rendered.contains("<redacted>"));
    }
}
