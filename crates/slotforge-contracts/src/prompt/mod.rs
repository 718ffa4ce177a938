mod compose;
mod padding;
mod tracking;

pub use compose::{compose, effective_prompt, lora_directive, word_count, PromptContext, PromptError, NO_LORA};
pub use padding::{pad_to_min_words, padding_capacity, PADDING_PHRASES};
pub use tracking::SectionPrompt;
