//! Image-generation backends.
//!
//! A backend turns a [`GenerationJob`] into decoded [`ImageArtifact`]s and
//! reports progress for whatever job it is currently running.

mod a1111;
mod dryrun;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use slotforge_contracts::loras::LoraSpec;

use crate::artifact::ImageArtifact;
use crate::config::SlotforgeConfig;
use crate::error::EngineError;

pub use a1111::{normalize_base_url, A1111Backend};
pub use dryrun::DryrunBackend;

pub const DEFAULT_CFG_SCALE: f64 = 7.0;
pub const DEFAULT_STEPS: u32 = 20;
pub const DEFAULT_SAMPLER: &str = "DPM++ 2M Karras";
pub const DEFAULT_DIMENSION: u32 = 512;
pub const MAX_VARIANTS: u32 = 10;

/// Everything one txt2img submission needs. Built fresh per generate call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationJob {
    pub prompt: String,
    pub negative_prompt: String,
    pub width: u32,
    pub height: u32,
    pub cfg_scale: f64,
    pub steps: u32,
    pub sampler: String,
    pub variant_count: u32,
}

impl GenerationJob {
    pub fn variant_count_clamped(&self) -> u32 {
        self.variant_count.clamp(1, MAX_VARIANTS)
    }

    pub fn dimensions_or_default(&self) -> (u32, u32) {
        let width = if self.width == 0 { DEFAULT_DIMENSION } else { self.width };
        let height = if self.height == 0 { DEFAULT_DIMENSION } else { self.height };
        (width, height)
    }

    pub fn sampler_or_default(&self) -> &str {
        let sampler = self.sampler.trim();
        if sampler.is_empty() {
            DEFAULT_SAMPLER
        } else {
            sampler
        }
    }
}

/// Progress of the backend's current job.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct ProgressSnapshot {
    /// Always within `0..=100`.
    pub percent: u8,
    pub current_step: Option<u32>,
    pub total_steps: Option<u32>,
    pub eta_seconds: Option<f64>,
}

impl ProgressSnapshot {
    pub fn new(
        percent: f64,
        current_step: Option<u32>,
        total_steps: Option<u32>,
        eta_seconds: Option<f64>,
    ) -> Self {
        let percent = if percent.is_finite() {
            percent.round().clamp(0.0, 100.0) as u8
        } else {
            0
        };
        Self {
            percent,
            current_step,
            total_steps,
            eta_seconds: eta_seconds.filter(|value| value.is_finite()),
        }
    }

    /// Builds a snapshot from a `0.0..=1.0` completion fraction.
    pub fn from_fraction(
        fraction: f64,
        current_step: Option<u32>,
        total_steps: Option<u32>,
        eta_seconds: Option<f64>,
    ) -> Self {
        Self::new(fraction * 100.0, current_step, total_steps, eta_seconds)
    }
}

impl fmt::Display for ProgressSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.percent)?;
        if let (Some(step), Some(steps)) = (self.current_step, self.total_steps) {
            write!(f, " · {step}/{steps}")?;
        }
        if let Some(eta) = self.eta_seconds {
            write!(f, " · ETA {}s", eta.round().max(0.0) as u64)?;
        }
        Ok(())
    }
}

/// Diagnostics only; never on the generation path.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub ok: bool,
    pub backend: String,
    pub base_url: Option<String>,
    pub status: String,
    pub models: Vec<String>,
    pub supports_image_generation: bool,
    pub max_images_per_request: u32,
}

#[async_trait]
pub trait ImageBackend: Send + Sync {
    fn name(&self) -> &str;
    async fn txt2img(&self, job: &GenerationJob) -> Result<Vec<ImageArtifact>, EngineError>;
    async fn progress(&self) -> Result<ProgressSnapshot, EngineError>;
    async fn loras(&self) -> Result<Vec<LoraSpec>, EngineError>;
    async fn health(&self) -> HealthReport;
}

#[derive(Default)]
pub struct BackendRegistry {
    backends: BTreeMap<String, Arc<dyn ImageBackend>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<B: ImageBackend + 'static>(&mut self, backend: B) {
        self.backends
            .insert(backend.name().to_string(), Arc::new(backend));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ImageBackend>> {
        self.backends.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.backends.keys().cloned().collect()
    }
}

pub fn default_backend_registry(config: &SlotforgeConfig) -> Result<BackendRegistry, EngineError> {
    let mut backends = BackendRegistry::new();
    backends.register(DryrunBackend::new());
    backends.register(A1111Backend::new(&config.a1111)?);
    Ok(backends)
}

/// Resolves the backend named in the configuration.
pub fn backend_from_config(config: &SlotforgeConfig) -> Result<Arc<dyn ImageBackend>, EngineError> {
    let backends = default_backend_registry(config)?;
    let name = config.backend.trim().to_ascii_lowercase();
    backends.get(&name).ok_or_else(|| {
        EngineError::Configuration(format!(
            "unknown backend '{}' (available: {})",
            config.backend,
            backends.names().join(", ")
        ))
    })
}
