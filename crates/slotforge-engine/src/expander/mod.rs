//! Theme → per-section prompt expansion through a text model.

mod gemini;

use async_trait::async_trait;
use slotforge_contracts::expansion::ExpandedPrompts;

use crate::error::EngineError;

pub use gemini::GeminiExpander;

#[async_trait]
pub trait PromptExpander: Send + Sync {
    fn name(&self) -> &str;
    /// Returns a bundle whose icon lists already have their fixed lengths.
    async fn expand(&self, theme: &str) -> Result<ExpandedPrompts, EngineError>;
}
