//! Pure building blocks for slot-game art generation: prompt composition,
//! section layout, expansion bundles, LoRA selection, the session journal and
//! the interactive shell grammar.

pub mod canvas;
pub mod events;
pub mod expansion;
pub mod loras;
pub mod prompt;
pub mod sections;
pub mod shell;
