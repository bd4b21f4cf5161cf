//! The conversational phase state machine:
//! `initialization -> planning -> {tutorial | implementation} -> validation -> completed`.
//!
//! Transitions fire on keyword cues in the latest user message, on explicit
//! tool actions, or — preserved from the source system despite its
//! fragility — on substring matches of the *assistant's own response* while
//! in `validation`.

/// A session's position in the conversational state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Initialization,
    Planning,
    Tutorial,
    Implementation,
    Validation,
    Completed,
}

/// Substrings in a user message that nudge the phase forward.
const PLANNING_CUES: &[&str] = &["what's wrong", "diagnose", "help me understand", "explain"];
const TUTORIAL_CUES: &[&str] = &["how do i", "teach me", "walk me through", "learn"];
const IMPLEMENTATION_CUES: &[&str] = &["fix it", "apply the fix", "implement", "write the code"];
const VALIDATION_CUES: &[&str] = &["is this fixed", "validate", "check if it works", "test it"];

/// Substrings in the *assistant's* latest message that close out a session
/// in `validation`. Fragile by design — preserved from the source contract.
const TERMINAL_MARKERS: &[&str] = &["complete", "finished", "resolved"];

impl Phase {
    /// Advance the phase given the latest user message. Returns the same
    /// phase if no cue matched — the state machine never regresses.
    pub fn on_user_message(self, message: &str) -> Phase {
        let lower = message.to_ascii_lowercase();
        match self {
            Phase::Initialization if contains_any(&lower, PLANNING_CUES) => Phase::Planning,
            Phase::Planning if contains_any(&lower, TUTORIAL_CUES) => Phase::Tutorial,
            Phase::Planning if contains_any(&lower, IMPLEMENTATION_CUES) => Phase::Implementation,
            Phase::Tutorial if contains_any(&lower, VALIDATION_CUES) => Phase::Validation,
            Phase::Implementation if contains_any(&lower, VALIDATION_CUES) => Phase::Validation,
            other => other,
        }
    }

    /// A session in `validation` whose last assistant message contains a
    /// terminal marker transitions to `completed`.
    pub fn on_assistant_message(self, message: &str) -> Phase {
        let lower = message.to_ascii_lowercase();
        if self == Phase::Validation && contains_any(&lower, TERMINAL_MARKERS) {
            Phase::Completed
        } else {
            self
        }
    }

    /// An explicit tool action (as opposed to a lexical cue) forces a phase
    /// transition regardless of message content.
    pub fn on_tool_action(self, action: &str) -> Phase {
        match action {
            "begin_implementation" if self == Phase::Planning || self == Phase::Tutorial => Phase::Implementation,
            "begin_validation" => Phase::Validation,
            "end_session" => Phase::Completed,
            _ => self,
        }
    }

    /// The [`SessionTypeHint`](crate::llm::SessionTypeHint) an adapter should
    /// use to pick a model while a session sits in this phase.
    pub fn session_type_hint(self) -> crate::llm::SessionTypeHint {
        use crate::llm::SessionTypeHint;
        match self {
            Phase::Tutorial => SessionTypeHint::Learning,
            Phase::Implementation => SessionTypeHint::Development,
            Phase::Initialization | Phase::Planning | Phase::Validation | Phase::Completed => {
                SessionTypeHint::Debugging
            }
        }
    }
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}
