use std::sync::Arc;

use easel_contracts::chat::{Classification, Intent};
use easel_contracts::conversation::ConversationTurn;
use tracing::{debug, warn};

use crate::chat::{ChatBackend, CompletionOptions};

const CLASSIFIER_INSTRUCTION: &str = "\
You are an intent classification assistant. Decide which of these the user wants:
1. Create a new image (IMAGE_GENERATION)
2. Extend / outpaint an existing image (OUTPAINTING)
3. Anything else (OTHER)

Answer with exactly one of: IMAGE_GENERATION, OUTPAINTING, OTHER

Rules:
- Requests to create, draw, paint or generate a picture are IMAGE_GENERATION.
- Requests to extend an image, enlarge the canvas, outpaint or add more background are OUTPAINTING.
- Everything else is OTHER.";

/// Maps a message to an [`Intent`] with one short remote completion.
///
/// Never fails: a missing backend, transport error or unreadable reply
/// produces [`Classification::Fallback`], which routes as plain chat.
#[derive(Clone)]
pub struct IntentClassifier {
    backend: Option<Arc<dyn ChatBackend>>,
}

impl IntentClassifier {
    pub fn new(backend: Option<Arc<dyn ChatBackend>>) -> Self {
        Self { backend }
    }

    pub fn classify(&self, prompt: &str) -> Classification {
        let Some(backend) = self.backend.as_ref() else {
            return Classification::fallback("chat backend not configured");
        };
        let messages = [
            ConversationTurn::system(CLASSIFIER_INSTRUCTION),
            ConversationTurn::user(prompt),
        ];
        let classification = match backend.complete(&messages, CompletionOptions::LABEL) {
            Ok(reply) => Classification::from_reply(&reply),
            Err(err) => Classification::fallback(format!("classification request failed: {err}")),
        };
        match classification.fallback_reason() {
            Some(reason) => warn!(%reason, "intent classification fell back to other"),
            None => debug!(intent = %classification.intent(), "intent classified"),
        }
        classification
    }

    pub fn classify_intent(&self, prompt: &str) -> Intent {
        self.classify(prompt).intent()
    }

    /// True for either image intent.
    pub fn is_image_prompt(&self, prompt: &str) -> bool {
        matches!(
            self.classify_intent(prompt),
            Intent::ImageGeneration | Intent::Outpainting
        )
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use easel_contracts::chat::{Classification, Intent};
    use easel_contracts::conversation::{ConversationTurn, Role};

    use super::IntentClassifier;
    use crate::chat::{ChatBackend, CompletionOptions};
    use crate::error::{EngineError, Result};

    struct ScriptedChat {
        reply: Result<String>,
        seen: Mutex<Vec<(Vec<ConversationTurn>, CompletionOptions)>>,
    }

    impl ScriptedChat {
        fn replying(reply: &str) -> Self {
            Self {
                reply: Ok(reply.to_string()),
                seen: Mutex::new(Vec::new()),
            }
        }

        fn failing() -> Self {
            Self {
                reply: Err(EngineError::Transport("connection refused".to_string())),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    impl ChatBackend for ScriptedChat {
        fn complete(
            &self,
            messages: &[ConversationTurn],
            options: CompletionOptions,
        ) -> Result<String> {
            self.seen
                .lock()
                .expect("lock")
                .push((messages.to_vec(), options));
            match &self.reply {
                Ok(reply) => Ok(reply.clone()),
                Err(err) => Err(EngineError::Transport(err.to_string())),
            }
        }

        fn stream(
            &self,
            _messages: &[ConversationTurn],
            _options: CompletionOptions,
            _on_delta: &mut dyn FnMut(&str),
        ) -> Result<String> {
            unreachable!("classifier never streams")
        }
    }

    #[test]
    fn outpainting_reply_is_matched_regardless_of_case() {
        for reply in ["outpainting", "OUTPAINTING", "  OutPainting\n"] {
            let classifier = IntentClassifier::new(Some(Arc::new(ScriptedChat::replying(reply))));
            assert_eq!(
                classifier.classify("make the canvas wider"),
                Classification::Classified(Intent::Outpainting)
            );
        }
    }

    #[test]
    fn transport_failure_yields_other_without_raising() {
        let classifier = IntentClassifier::new(Some(Arc::new(ScriptedChat::failing())));
        let classification = classifier.classify("画一张猫");
        assert!(classification.is_fallback());
        assert_eq!(classification.intent(), Intent::Other);
        assert!(classification
            .fallback_reason()
            .unwrap_or_default()
            .contains("connection refused"));
    }

    #[test]
    fn missing_backend_is_a_fallback() {
        let classifier = IntentClassifier::new(None);
        assert_eq!(classifier.classify_intent("draw a dog"), Intent::Other);
        assert!(!classifier.is_image_prompt("draw a dog"));
    }

    #[test]
    fn request_uses_fixed_instruction_and_label_options() {
        let backend = Arc::new(ScriptedChat::replying("IMAGE_GENERATION"));
        let classifier = IntentClassifier::new(Some(backend.clone() as Arc<dyn ChatBackend>));
        assert!(classifier.is_image_prompt("draw a dog"));

        let seen = backend.seen.lock().expect("lock");
        let (messages, options) = &seen[0];
        assert_eq!(*options, CompletionOptions::LABEL);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::System);
        assert!(messages[0].content.contains("IMAGE_GENERATION, OUTPAINTING, OTHER"));
        assert_eq!(messages[1].content, "draw a dog");
    }
}
