//! Per-section generation state.
//!
//! A [`SectionController`] owns one section's gallery, prompt latch and job
//! phase. All state sits in a `watch` channel so callers can observe every
//! transition through [`SectionController::subscribe`].

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use slotforge_contracts::events::{EventJournal, JobKind, SessionEvent};
use slotforge_contracts::prompt::{compose, PromptContext, SectionPrompt};
use slotforge_contracts::sections::SectionSpec;
use tokio::sync::watch;

use crate::artifact::ImageArtifact;
use crate::backend::{GenerationJob, ImageBackend, ProgressSnapshot};
use crate::canvas::{FinalCanvas, FinalEntry};
use crate::config::DEFAULT_POLL_INTERVAL_MS;
use crate::error::EngineError;
use crate::poller::poll_progress;
use crate::settings::GlobalSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionPhase {
    #[default]
    Idle,
    /// Request sent, no progress reported yet.
    Submitting,
    Polling,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Succeeded { variants: usize },
    Failed { message: String },
}

/// Observable state of one section.
#[derive(Debug, Clone, PartialEq)]
pub struct SectionView {
    pub phase: SessionPhase,
    /// Gallery index being regenerated, if the in-flight job is a regenerate.
    pub regenerating: Option<usize>,
    pub gallery: Vec<ImageArtifact>,
    pub progress: Option<ProgressSnapshot>,
    pub last_outcome: Option<JobOutcome>,
    pub width: u32,
    pub height: u32,
    pub prompt: SectionPrompt,
    /// Bumped for every accepted job; progress ticks carry it.
    pub job_epoch: u64,
}

impl SectionView {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            phase: SessionPhase::Idle,
            regenerating: None,
            gallery: Vec::new(),
            progress: None,
            last_outcome: None,
            width,
            height,
            prompt: SectionPrompt::Tracking,
            job_epoch: 0,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.phase != SessionPhase::Idle
    }
}

/// Everything sections share: settings, backend, final canvas and journal.
#[derive(Clone)]
pub struct SessionContext {
    pub settings: watch::Receiver<GlobalSettings>,
    pub backend: Arc<dyn ImageBackend>,
    pub finals: FinalCanvas,
    pub journal: Option<EventJournal>,
    pub poll_interval: Duration,
}

impl SessionContext {
    pub fn new(settings: watch::Receiver<GlobalSettings>, backend: Arc<dyn ImageBackend>) -> Self {
        Self {
            settings,
            backend,
            finals: FinalCanvas::new(),
            journal: None,
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
        }
    }

    pub fn with_finals(mut self, finals: FinalCanvas) -> Self {
        self.finals = finals;
        self
    }

    pub fn with_journal(mut self, journal: EventJournal) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub(crate) fn record(&self, event: SessionEvent) {
        let Some(journal) = &self.journal else {
            return;
        };
        let event_type = event.event_type();
        if let Err(err) = journal.record(event) {
            log::warn!("failed to record {event_type} event: {err:#}");
        }
    }
}

#[derive(Clone)]
pub struct SectionController {
    inner: Arc<SectionInner>,
}

struct SectionInner {
    spec: SectionSpec,
    key: String,
    state: watch::Sender<SectionView>,
    context: SessionContext,
}

impl SectionController {
    pub fn new(spec: SectionSpec, context: SessionContext) -> Self {
        let state = watch::channel(SectionView::new(spec.width, spec.height)).0;
        Self {
            inner: Arc::new(SectionInner {
                key: spec.key(),
                spec,
                state,
                context,
            }),
        }
    }

    pub fn spec(&self) -> &SectionSpec {
        &self.inner.spec
    }

    pub fn title(&self) -> &str {
        &self.inner.spec.title
    }

    pub fn key(&self) -> &str {
        &self.inner.key
    }

    pub fn subscribe(&self) -> watch::Receiver<SectionView> {
        self.inner.state.subscribe()
    }

    pub fn view(&self) -> SectionView {
        self.inner.state.borrow().clone()
    }

    /// Generates a fresh gallery. `override_count` wins over the global variant count.
    ///
    /// On success the whole gallery is replaced and the number of variants is
    /// returned; on failure the gallery is left as it was.
    pub async fn generate(&self, override_count: Option<u32>) -> Result<usize, EngineError> {
        let settings = self.settings();
        let job = self.build_job(&settings, override_count.unwrap_or(settings.variant_count))?;
        let epoch = self.begin_job(None)?;
        let pending = PendingJob::new(self, epoch);
        let result = self.run_job(&job, epoch).await;
        pending.disarm();
        self.settle(epoch, None, result)
    }

    /// Re-rolls the variant at `index`, leaving every other entry alone.
    pub async fn regenerate(&self, index: usize) -> Result<usize, EngineError> {
        let settings = self.settings();
        let job = self.build_job(&settings, 1)?;
        let epoch = self.begin_job(Some(index))?;
        let pending = PendingJob::new(self, epoch);
        let result = self.run_job(&job, epoch).await;
        pending.disarm();
        self.settle(epoch, Some(index), result)
    }

    /// Removes the variant at `index`. Rejected with `Busy` while a
    /// regenerate is in flight, since removal would shift its target.
    pub fn discard(&self, index: usize) -> Result<ImageArtifact, EngineError> {
        let mut removed = None;
        let mut len = 0;
        let mut regenerating = false;
        self.inner.state.send_if_modified(|view| {
            len = view.gallery.len();
            regenerating = view.regenerating.is_some();
            if regenerating || index >= len {
                return false;
            }
            removed = Some(view.gallery.remove(index));
            true
        });
        if regenerating {
            return Err(EngineError::Busy {
                section: self.title().to_string(),
            });
        }
        let artifact = removed.ok_or_else(|| self.no_such_variant(index, len))?;
        self.inner.context.record(SessionEvent::VariantDiscarded {
            section: self.title().to_string(),
            index,
            sha256: artifact.sha256_hex(),
        });
        Ok(artifact)
    }

    /// Copies the variant at `index` into the final canvas under this section's title.
    pub fn set_as_final(&self, index: usize) -> Result<FinalEntry, EngineError> {
        let entry = {
            let view = self.inner.state.borrow();
            let artifact = view
                .gallery
                .get(index)
                .cloned()
                .ok_or_else(|| self.no_such_variant(index, view.gallery.len()))?;
            FinalEntry {
                artifact,
                width: view.width,
                height: view.height,
            }
        };
        let replaced = self.inner.context.finals.set(self.title(), entry.clone());
        log::info!("{}: variant {index} set as final", self.title());
        self.inner.context.record(SessionEvent::FinalSet {
            section: self.title().to_string(),
            index,
            width: entry.width,
            height: entry.height,
            sha256: entry.artifact.sha256_hex(),
            replaced: replaced.is_some(),
        });
        Ok(entry)
    }

    /// Writes the variant at `index` to `dir/<slug>-<millis>.<ext>`.
    pub fn download(&self, index: usize, dir: &Path) -> Result<PathBuf, EngineError> {
        let artifact = {
            let view = self.inner.state.borrow();
            view.gallery
                .get(index)
                .cloned()
                .ok_or_else(|| self.no_such_variant(index, view.gallery.len()))?
        };
        std::fs::create_dir_all(dir)?;
        let stamp = chrono::Utc::now().timestamp_millis();
        let path = dir.join(format!("{}-{stamp}.{}", self.key(), artifact.extension()));
        std::fs::write(&path, artifact.bytes())?;
        Ok(path)
    }

    pub fn edit_prompt(&self, text: &str) {
        self.inner
            .state
            .send_modify(|view| view.prompt.edit(text.to_string()));
    }

    /// Same latch as an edit; used for text-model expansions.
    pub fn inject_prompt(&self, text: &str) {
        self.inner
            .state
            .send_modify(|view| view.prompt.inject(text.to_string()));
    }

    pub fn use_global_prompt(&self) {
        self.inner.state.send_modify(|view| view.prompt.use_global());
    }

    /// Zero falls back to the section's default for that axis.
    pub fn set_dimensions(&self, width: u32, height: u32) {
        let spec = &self.inner.spec;
        self.inner.state.send_modify(|view| {
            view.width = if width == 0 { spec.width } else { width };
            view.height = if height == 0 { spec.height } else { height };
        });
    }

    /// The section prompt as the user sees it: the override, or the live global prompt.
    pub fn effective_prompt(&self) -> String {
        let settings = self.settings();
        let view = self.inner.state.borrow();
        view.prompt.resolve(&settings.global_prompt).to_string()
    }

    /// The full prompt a generate call would send right now.
    pub fn composed_prompt(&self) -> Result<String, EngineError> {
        let settings = self.settings();
        Ok(compose(&self.prompt_context(&settings))?)
    }

    fn settings(&self) -> GlobalSettings {
        self.inner.context.settings.borrow().clone()
    }

    fn prompt_context(&self, settings: &GlobalSettings) -> PromptContext {
        let view = self.inner.state.borrow();
        let spec = &self.inner.spec;
        PromptContext {
            global_prompt: settings.global_prompt.clone(),
            section_prompt: view.prompt.override_text().map(str::to_string),
            global_style: settings.style.clone(),
            lora: settings.lora_name().map(str::to_string),
            cohesion_hint: spec.cohesion_hint.clone(),
            min_words: spec.min_words,
        }
    }

    fn build_job(
        &self,
        settings: &GlobalSettings,
        variant_count: u32,
    ) -> Result<GenerationJob, EngineError> {
        let prompt = compose(&self.prompt_context(settings))?;
        let view = self.inner.state.borrow();
        Ok(GenerationJob {
            prompt,
            negative_prompt: settings.negative_prompt.clone(),
            width: view.width,
            height: view.height,
            cfg_scale: settings.cfg_scale,
            steps: settings.steps,
            sampler: settings.sampler.clone(),
            variant_count,
        })
    }

    /// Claims the section for a new job. Fails without touching state when a
    /// job is already in flight or the regenerate target does not exist.
    fn begin_job(&self, regenerating: Option<usize>) -> Result<u64, EngineError> {
        let mut claimed = Err(EngineError::Busy {
            section: self.title().to_string(),
        });
        self.inner.state.send_if_modified(|view| {
            if view.is_busy() {
                return false;
            }
            if let Some(index) = regenerating.filter(|index| *index >= view.gallery.len()) {
                claimed = Err(self.no_such_variant(index, view.gallery.len()));
                return false;
            }
            view.job_epoch += 1;
            view.phase = SessionPhase::Submitting;
            view.regenerating = regenerating;
            view.progress = None;
            claimed = Ok(view.job_epoch);
            true
        });
        let epoch = claimed?;
        let kind = JobKind::for_target(regenerating);
        log::info!("{}: {} started (job {epoch})", self.title(), kind.as_str());
        self.inner.context.record(SessionEvent::JobStarted {
            section: self.title().to_string(),
            job: epoch,
            kind,
            index: regenerating,
        });
        Ok(epoch)
    }

    /// Races the backend request against the progress poller; the poller is
    /// dropped as soon as the request resolves.
    async fn run_job(
        &self,
        job: &GenerationJob,
        epoch: u64,
    ) -> Result<Vec<ImageArtifact>, EngineError> {
        let backend = self.inner.context.backend.as_ref();
        let request = backend.txt2img(job);
        let poller = poll_progress(
            backend,
            &self.inner.state,
            epoch,
            self.inner.context.poll_interval,
        );
        tokio::pin!(request);
        tokio::pin!(poller);
        tokio::select! {
            biased;
            outcome = &mut request => outcome,
            never = &mut poller => match never {},
        }
    }

    fn settle(
        &self,
        epoch: u64,
        regenerating: Option<usize>,
        result: Result<Vec<ImageArtifact>, EngineError>,
    ) -> Result<usize, EngineError> {
        let mut settled = Ok(0);
        self.inner.state.send_modify(|view| {
            if view.job_epoch == epoch {
                view.phase = SessionPhase::Idle;
                view.regenerating = None;
                view.progress = None;
            }
            settled = match (result, regenerating) {
                (Ok(images), None) => {
                    let count = images.len();
                    view.gallery = images;
                    Ok(count)
                }
                (Ok(images), Some(index)) => {
                    let len = view.gallery.len();
                    match (images.into_iter().next(), view.gallery.get_mut(index)) {
                        (Some(image), Some(slot)) => {
                            *slot = image;
                            Ok(1)
                        }
                        (None, _) => Err(EngineError::malformed(
                            self.inner.context.backend.name(),
                            "regenerate returned no image",
                        )),
                        (Some(_), None) => Err(self.no_such_variant(index, len)),
                    }
                }
                (Err(err), _) => Err(err),
            };
            view.last_outcome = Some(match &settled {
                Ok(variants) => JobOutcome::Succeeded {
                    variants: *variants,
                },
                Err(err) => JobOutcome::Failed {
                    message: err.to_string(),
                },
            });
        });

        let kind = JobKind::for_target(regenerating).as_str();
        match &settled {
            Ok(variants) => log::info!(
                "{}: {kind} finished with {variants} variant(s)",
                self.title()
            ),
            Err(err) => log::warn!("{}: {kind} failed: {err}", self.title()),
        }
        self.inner.context.record(SessionEvent::JobSettled {
            section: self.title().to_string(),
            job: epoch,
            variants: settled.as_ref().ok().copied(),
            error: settled.as_ref().err().map(ToString::to_string),
        });
        settled
    }

    /// Returns the section to Idle when a job's future is dropped before it settles.
    fn abandon(&self, epoch: u64) {
        let abandoned = self.inner.state.send_if_modified(|view| {
            if view.job_epoch != epoch || !view.is_busy() {
                return false;
            }
            view.phase = SessionPhase::Idle;
            view.regenerating = None;
            view.progress = None;
            view.last_outcome = Some(JobOutcome::Failed {
                message: "cancelled before the backend replied".to_string(),
            });
            true
        });
        if !abandoned {
            return;
        }
        log::warn!("{}: job {epoch} cancelled by caller", self.title());
        self.inner.context.record(SessionEvent::JobCancelled {
            section: self.title().to_string(),
            job: epoch,
        });
    }

    fn no_such_variant(&self, index: usize, len: usize) -> EngineError {
        EngineError::NoSuchVariant {
            section: self.title().to_string(),
            index,
            len,
        }
    }
}

/// Armed between claiming a job and settling it.
struct PendingJob<'a> {
    section: &'a SectionController,
    epoch: u64,
    armed: bool,
}

impl<'a> PendingJob<'a> {
    fn new(section: &'a SectionController, epoch: u64) -> Self {
        Self {
            section,
            epoch,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for PendingJob<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.section.abandon(self.epoch);
        }
    }
}
