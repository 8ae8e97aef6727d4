//! Known OpenAI-compatible provider presets.

use proto::LlmError;
use serde::{Deserialize, Serialize};

/// Known LLM provider presets.
///
/// Each preset supplies the chat-completions base URL and a default model so
/// that an invite or `nexus keys set` only has to name the provider.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProviderPreset {
    /// Groq (api.groq.com). Default.
    #[default]
    Groq,
    /// OpenAI API (api.openai.com).
    OpenAi,
    /// OpenRouter – aggregates many providers.
    OpenRouter,
    /// Together.ai.
    Together,
    /// Mistral La Plateforme.
    Mistral,
}

impl ProviderPreset {
    /// Returns all presets in display order.
    pub const fn all() -> &'static [Self] {
        &[
            Self::Groq,
            Self::OpenAi,
            Self::OpenRouter,
            Self::Together,
            Self::Mistral,
        ]
    }

    /// Default model ID for the preset.
    pub fn default_model(&self) -> &'static str {
        match self {
            Self::Groq => "llama-3.3-70b-versatile",
            Self::OpenAi => "gpt-4o-mini",
            Self::OpenRouter => "openai/gpt-4o-mini",
            Self::Together => "meta-llama/Llama-3.3-70B-Instruct-Turbo",
            Self::Mistral => "mistral-small-latest",
        }
    }

    /// OpenAI-compatible API base URL.
    pub fn base_url(&self) -> &'static str {
        match self {
            Self::Groq => "https://api.groq.com/openai/v1",
            Self::OpenAi => "https://api.openai.com/v1",
            Self::OpenRouter => "https://openrouter.ai/api/v1",
            Self::Together => "https://api.together.xyz/v1",
            Self::Mistral => "https://api.mistral.ai/v1",
        }
    }

    /// Canonical lowercase name used as the credential-store key.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Groq => "groq",
            Self::OpenAi => "openai",
            Self::OpenRouter => "openrouter",
            Self::Together => "together",
            Self::Mistral => "mistral",
        }
    }

    /// Human-readable label.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Groq => "Groq",
            Self::OpenAi => "OpenAI",
            Self::OpenRouter => "OpenRouter",
            Self::Together => "Together.ai",
            Self::Mistral => "Mistral",
        }
    }
}

impl std::str::FromStr for ProviderPreset {
    type Err = LlmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "groq" => Ok(Self::Groq),
            "openai" | "gpt" => Ok(Self::OpenAi),
            "openrouter" => Ok(Self::OpenRouter),
            "together" | "togetherai" => Ok(Self::Together),
            "mistral" => Ok(Self::Mistral),
            other => Err(LlmError::UnknownProvider(other.to_string())),
        }
    }
}

/// Comma-separated preset names for help output.
pub fn preset_names() -> String {
    ProviderPreset::all()
        .iter()
        .map(|p| p.name())
        .collect::<Vec<_>>()
        .join(", ")
}
