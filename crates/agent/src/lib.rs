//! AI query interface, OpenAI-compatible client, provider presets, and
//! markdown rendering for replies.

pub mod llm;
pub mod markdown;
pub mod providers;

/// AI query request/trait and the OpenAI-compatible implementation.
pub use llm::{AiQuery, AiRequest, OpenAiCompatibleQuery};
/// Markdown → sanitized HTML renderer.
pub use markdown::render_markdown;
/// Built-in provider presets.
pub use providers::{ProviderPreset, preset_names};
