use thiserror::Error;

use super::padding::{pad_to_min_words, padding_capacity};

/// Selector value meaning "no LoRA adapter".
pub const NO_LORA: &str = "none";

/// Every input that feeds one composed prompt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PromptContext {
    pub global_prompt: String,
    pub section_prompt: Option<String>,
    pub global_style: String,
    pub lora: Option<String>,
    pub cohesion_hint: Option<String>,
    pub min_words: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PromptError {
    #[error("prompt is empty; set a section prompt or the global prompt")]
    EmptyPrompt,
}

/// Builds the final prompt string sent to the image backend.
///
/// Fragments are `[effective prompt, style, lora directive, cohesion hint]`,
/// trimmed, with empty ones dropped, joined by `", "`. When `min_words` is
/// set the result is padded from the fixed phrase vocabulary.
///
/// Padding stops once the vocabulary is spent, so a floor above the prompt's
/// own words plus [`padding_capacity`] yields a shorter prompt (logged as a
/// warning) rather than an error.
pub fn compose(context: &PromptContext) -> Result<String, PromptError> {
    let effective = effective_prompt(context).ok_or(PromptError::EmptyPrompt)?;
    let lora = context.lora.as_deref().and_then(lora_directive);

    let fragments = [
        Some(effective),
        non_empty(&context.global_style),
        lora.as_deref(),
        context.cohesion_hint.as_deref().and_then(non_empty),
    ];
    let joined = fragments
        .into_iter()
        .flatten()
        .collect::<Vec<&str>>()
        .join(", ");

    let Some(min_words) = context.min_words.filter(|min| *min > 0) else {
        return Ok(joined);
    };
    let padded = pad_to_min_words(joined, min_words);
    let words = word_count(&padded);
    if words < min_words {
        log::warn!(
            "prompt padded to {words} words, short of the {min_words}-word floor; \
             padding vocabulary holds {} words",
            padding_capacity()
        );
    }
    Ok(padded)
}

/// Section override when it has content, otherwise the global prompt.
pub fn effective_prompt(context: &PromptContext) -> Option<&str> {
    context
        .section_prompt
        .as_deref()
        .and_then(non_empty)
        .or_else(|| non_empty(&context.global_prompt))
}

/// Inline adapter directive understood by Automatic1111, e.g. `<lora:pixel:1>`.
pub fn lora_directive(name: &str) -> Option<String> {
    let name = name.trim();
    if name.is_empty() || name.eq_ignore_ascii_case(NO_LORA) {
        return None;
    }
    Some(format!("<lora:{name}:1>"))
}

pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

fn non_empty(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}
