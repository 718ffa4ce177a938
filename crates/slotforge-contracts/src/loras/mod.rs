mod registry;
mod selectors;

pub use registry::{LoraRegistry, LoraSpec};
pub use selectors::{LoraSelection, LoraSelector};
