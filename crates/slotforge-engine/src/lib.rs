//! Async runtime for slotforge: image backends, prompt expansion, per-section
//! generation sessions and the board that ties them together.

pub mod artifact;
pub mod backend;
pub mod board;
pub mod canvas;
pub mod config;
pub mod error;
pub mod expander;
mod http;
pub mod poller;
pub mod session;
pub mod settings;

pub use artifact::ImageArtifact;
pub use backend::{
    backend_from_config, default_backend_registry, A1111Backend, BackendRegistry, DryrunBackend,
    GenerationJob, HealthReport, ImageBackend, ProgressSnapshot,
};
pub use board::{Board, BoardOptions, SectionResult};
pub use canvas::{FinalCanvas, FinalEntry};
pub use config::SlotforgeConfig;
pub use error::EngineError;
pub use expander::{GeminiExpander, PromptExpander};
pub use session::{JobOutcome, SectionController, SectionView, SessionContext, SessionPhase};
pub use settings::GlobalSettings;
