use slotforge_contracts::prompt::PromptError;
use thiserror::Error;

/// Failures surfaced by backends, expanders and section controllers.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Validation(#[from] PromptError),
    #[error("{backend} request failed ({status}): {message}")]
    Backend {
        backend: String,
        status: u16,
        message: String,
    },
    #[error("{backend} request could not be sent: {source}")]
    Transport {
        backend: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{backend} returned an unexpected response: {message}")]
    MalformedResponse { backend: String, message: String },
    #[error("{section} already has a generation in flight")]
    Busy { section: String },
    #[error("{section} has no variant at index {index} (gallery holds {len})")]
    NoSuchVariant {
        section: String,
        index: usize,
        len: usize,
    },
    #[error("unknown section '{0}'")]
    UnknownSection(String),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl EngineError {
    pub(crate) fn malformed(backend: &str, message: impl Into<String>) -> Self {
        Self::MalformedResponse {
            backend: backend.to_string(),
            message: message.into(),
        }
    }

    pub(crate) fn transport(backend: &str, source: reqwest::Error) -> Self {
        Self::Transport {
            backend: backend.to_string(),
            source,
        }
    }

    /// Rejected before any network call.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Came back from (or failed on the way to) a remote backend.
    pub fn is_backend_failure(&self) -> bool {
        matches!(
            self,
            Self::Backend { .. } | Self::Transport { .. } | Self::MalformedResponse { .. }
        )
    }
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}
