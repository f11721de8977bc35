//! Scripted tutor replies for demo mode.
//!
//! The demo responder never touches the network. Replies keep a fixed shape
//! (acknowledgment, language hint, optional validation error) while the
//! wording varies between calls.

use std::ops::RangeInclusive;
use std::time::Duration;

use rand::seq::SliceRandom;
use rand::Rng;

use crate::codec::{ClientMessage, TutorReply};

/// Delay range for a simulated tutor reply, in milliseconds.
pub const SIMULATED_DELAY_MS: RangeInclusive<u64> = 350..=800;

/// Delay for acknowledging a message the server echoed back.
pub const ECHO_DELAY: Duration = Duration::from_millis(50);

/// Trimmed answers shorter than this many characters get a validation error.
pub const MIN_ANSWER_CHARS: usize = 6;

const OPENINGS: &[&str] = &[
    "Nice try!",
    "Good effort!",
    "Thanks for sharing!",
    "Great, let's build on that.",
    "I hear you!",
];

const EMPTY_INPUT_REPLY: &str = "I didn't catch anything. Could you say that again?";
const EMPTY_INPUT_ERROR: &str = "No speech was detected.";
const SHORT_ANSWER_ERROR: &str = "Your answer is very short. Try a complete sentence.";

/// Produces local replies when no live tutor is reachable.
#[derive(Debug, Clone, Copy, Default)]
pub struct DemoResponder;

impl DemoResponder {
    /// Creates a responder.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Waits a simulated thinking time, then replies.
    pub async fn respond(&self, message: ClientMessage) -> TutorReply {
        tokio::time::sleep(Self::simulated_delay()).await;
        self.compose(&message)
    }

    /// Replies to a server echo after a near-zero delay.
    pub async fn acknowledge_echo(&self, message: ClientMessage) -> TutorReply {
        tokio::time::sleep(ECHO_DELAY).await;
        self.compose(&message)
    }

    /// Uniformly random delay within [`SIMULATED_DELAY_MS`].
    #[must_use]
    pub fn simulated_delay() -> Duration {
        Duration::from_millis(rand::thread_rng().gen_range(SIMULATED_DELAY_MS))
    }

    /// Builds the reply for a message without waiting.
    #[must_use]
    pub fn compose(&self, message: &ClientMessage) -> TutorReply {
        self.compose_with(message, &mut rand::thread_rng())
    }

    /// Like [`compose`](Self::compose) with a caller-supplied RNG.
    pub fn compose_with<R: Rng + ?Sized>(&self, message: &ClientMessage, rng: &mut R) -> TutorReply {
        let text = message.text.trim();
        let level = message.level.trim();
        let cefr = (!level.is_empty()).then(|| level.to_string());
        let hint = Some(language_hint(&message.language_code).to_string());

        if text.is_empty() {
            return TutorReply::new(
                EMPTY_INPUT_REPLY,
                hint,
                vec![EMPTY_INPUT_ERROR.to_string()],
                cefr,
            );
        }

        let opening = OPENINGS.choose(rng).copied().unwrap_or("Nice try!");
        let level_label = if level.is_empty() { "your level" } else { level };
        let reply = format!(
            "{opening} You said: \"{text}\". Let's keep practicing at {level_label}."
        );

        let errors = if text.chars().count() < MIN_ANSWER_CHARS {
            vec![SHORT_ANSWER_ERROR.to_string()]
        } else {
            Vec::new()
        };

        TutorReply::new(reply, hint, errors, cefr)
    }
}

/// Picks a hint in the learner's target language.
fn language_hint(language_code: &str) -> &'static str {
    let primary = language_code
        .split(['-', '_'])
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase();

    match primary.as_str() {
        "en" => "Try adding a reason with \"because\" to extend your answer.",
        "es" => "Intenta usar el pretérito para hablar de lo que hiciste ayer.",
        "fr" => "Essaie d'utiliser le passé composé pour raconter ta journée.",
        "de" => "Achte auf die Verbstellung am Ende des Nebensatzes.",
        "it" => "Prova a usare il passato prossimo per raccontare cosa hai fatto.",
        "pt" => "Tente usar o pretérito perfeito para falar do fim de semana.",
        _ => "Try to answer in a complete sentence.",
    }
}
