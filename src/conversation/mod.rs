//! C5: the conversational session manager. Binds a bounded-window message
//! history, a phase state machine, and an [`LlmAdapter`] to finding
//! enrichment, with a per-session LLM-analysis cache and an idle sweep.

pub mod phase;
pub mod session;
pub mod templates;

pub use phase::Phase;
pub use session::{ConversationSession, SessionManager, SuggestedAction, TurnOutcome};
pub use templates::{FixTemplate, TemplateLibrary};
