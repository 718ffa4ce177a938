use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use image::{ImageFormat, Rgb, RgbImage};
use sha2::{Digest, Sha256};
use slotforge_contracts::loras::LoraSpec;
use tokio::time::Instant;

use super::{GenerationJob, HealthReport, ImageBackend, ProgressSnapshot, MAX_VARIANTS};
use crate::artifact::ImageArtifact;
use crate::error::EngineError;

const BACKEND_NAME: &str = "dryrun";

struct InFlight {
    started: Instant,
    steps: u32,
}

/// Offline backend: solid-colour PNGs whose colour is derived from the prompt.
pub struct DryrunBackend {
    latency: Duration,
    in_flight: Mutex<Option<InFlight>>,
    requests: AtomicUsize,
}

impl DryrunBackend {
    pub fn new() -> Self {
        Self::with_latency(Duration::ZERO)
    }

    /// Each txt2img call sleeps this long, so progress has something to report.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency,
            in_flight: Mutex::new(None),
            requests: AtomicUsize::new(0),
        }
    }

    /// Number of txt2img calls received.
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    fn set_in_flight(&self, value: Option<InFlight>) {
        if let Ok(mut guard) = self.in_flight.lock() {
            *guard = value;
        }
    }
}

impl Default for DryrunBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn color_from_prompt(prompt: &str, idx: u32) -> [u8; 3] {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    hasher.update(idx.to_be_bytes());
    let digest = hasher.finalize();
    [digest[0], digest[1], digest[2]]
}

fn render_png(width: u32, height: u32, color: [u8; 3]) -> Result<Vec<u8>, EngineError> {
    let image = RgbImage::from_pixel(width, height, Rgb(color));
    let mut out = Cursor::new(Vec::new());
    image
        .write_to(&mut out, ImageFormat::Png)
        .map_err(|err| EngineError::malformed(BACKEND_NAME, format!("png encode failed: {err}")))?;
    Ok(out.into_inner())
}

#[async_trait]
impl ImageBackend for DryrunBackend {
    fn name(&self) -> &str {
        BACKEND_NAME
    }

    async fn txt2img(&self, job: &GenerationJob) -> Result<Vec<ImageArtifact>, EngineError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        self.set_in_flight(Some(InFlight {
            started: Instant::now(),
            steps: job.steps.max(1),
        }));
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.set_in_flight(None);

        let (width, height) = job.dimensions_or_default();
        (0..job.variant_count_clamped())
            .map(|idx| {
                let bytes = render_png(width, height, color_from_prompt(&job.prompt, idx))?;
                Ok(ImageArtifact::new(bytes, Some("image/png")))
            })
            .collect()
    }

    async fn progress(&self) -> Result<ProgressSnapshot, EngineError> {
        let guard = self
            .in_flight
            .lock()
            .map_err(|_| EngineError::malformed(BACKEND_NAME, "progress state poisoned"))?;
        let Some(job) = guard.as_ref() else {
            return Ok(ProgressSnapshot::default());
        };
        let total = self.latency.as_secs_f64();
        if total <= 0.0 {
            return Ok(ProgressSnapshot::default());
        }
        let elapsed = job.started.elapsed().as_secs_f64().min(total);
        let fraction = elapsed / total;
        let step = (fraction * f64::from(job.steps)).floor() as u32;
        Ok(ProgressSnapshot::from_fraction(
            fraction,
            Some(step.min(job.steps)),
            Some(job.steps),
            Some(total - elapsed),
        ))
    }

    async fn loras(&self) -> Result<Vec<LoraSpec>, EngineError> {
        Ok(Vec::new())
    }

    async fn health(&self) -> HealthReport {
        HealthReport {
            ok: true,
            backend: BACKEND_NAME.to_string(),
            base_url: None,
            status: "offline renderer".to_string(),
            models: vec!["dryrun-solid".to_string()],
            supports_image_generation: true,
            max_images_per_request: MAX_VARIANTS,
        }
    }
}
