use std::fmt;

use serde::{Deserialize, Serialize};

/// What a free-text message asks the assistant to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    ImageGeneration,
    Outpainting,
    Other,
}

impl Intent {
    /// Label tokens the classifier model is told to answer with, in match order.
    pub const LABELS: [(&'static str, Intent); 3] = [
        ("IMAGE_GENERATION", Intent::ImageGeneration),
        ("OUTPAINTING", Intent::Outpainting),
        ("OTHER", Intent::Other),
    ];

    pub fn label(self) -> &'static str {
        match self {
            Self::ImageGeneration => "IMAGE_GENERATION",
            Self::Outpainting => "OUTPAINTING",
            Self::Other => "OTHER",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ImageGeneration => "image_generation",
            Self::Outpainting => "outpainting",
            Self::Other => "other",
        }
    }

    /// Finds the first label token contained in a model reply, ignoring case.
    /// `IMAGE_GENERATION` wins over `OUTPAINTING`, which wins over `OTHER`.
    pub fn from_reply(reply: &str) -> Option<Self> {
        let upper = reply.trim().to_uppercase();
        Self::LABELS
            .iter()
            .find(|(label, _)| upper.contains(label))
            .map(|(_, intent)| *intent)
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of classifying one message.
///
/// Routing always needs a decision, so a failed or unreadable classification
/// is not an error: it is a `Fallback` that routes like [`Intent::Other`] but
/// keeps the reason visible to callers and logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Classified(Intent),
    Fallback { reason: String },
}

impl Classification {
    pub fn fallback(reason: impl Into<String>) -> Self {
        Self::Fallback {
            reason: reason.into(),
        }
    }

    pub fn from_reply(reply: &str) -> Self {
        match Intent::from_reply(reply) {
            Some(intent) => Self::Classified(intent),
            None => Self::fallback(format!("unrecognized classifier reply: {}", reply.trim())),
        }
    }

    pub fn intent(&self) -> Intent {
        match self {
            Self::Classified(intent) => *intent,
            Self::Fallback { .. } => Intent::Other,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Self::Fallback { .. })
    }

    pub fn fallback_reason(&self) -> Option<&str> {
        match self {
            Self::Classified(_) => None,
            Self::Fallback { reason } => Some(reason.as_str()),
        }
    }
}
