//! The full asset board: every section plus the shared settings and finals.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use slotforge_contracts::events::{EventJournal, SessionEvent};
use slotforge_contracts::expansion::ExpandedPrompts;
use slotforge_contracts::loras::{LoraRegistry, LoraSelection, LoraSelector, LoraSpec};
use slotforge_contracts::prompt::PromptError;
use slotforge_contracts::sections::{reference_layout, slugify, SectionSlot, SectionSpec};
use tokio::sync::watch;

use crate::backend::ImageBackend;
use crate::canvas::FinalCanvas;
use crate::config::DEFAULT_POLL_INTERVAL_MS;
use crate::error::EngineError;
use crate::expander::PromptExpander;
use crate::session::{SectionController, SessionContext};
use crate::settings::GlobalSettings;

#[derive(Debug, Clone)]
pub struct BoardOptions {
    pub poll_interval: Duration,
    /// Where `events.jsonl` goes; no journal when unset.
    pub journal_path: Option<PathBuf>,
}

impl Default for BoardOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            journal_path: None,
        }
    }
}

/// Result of one section within a bulk run.
#[derive(Debug)]
pub struct SectionResult {
    pub title: String,
    pub result: Result<usize, EngineError>,
}

pub struct Board {
    session_id: String,
    settings: watch::Sender<GlobalSettings>,
    sections: Vec<SectionController>,
    finals: FinalCanvas,
    backend: Arc<dyn ImageBackend>,
    context: SessionContext,
    lora_selector: LoraSelector,
}

impl Board {
    pub fn new(specs: Vec<SectionSpec>, backend: Arc<dyn ImageBackend>, options: BoardOptions) -> Self {
        let session_id = uuid::Uuid::new_v4().to_string();
        let settings = watch::channel(GlobalSettings::default()).0;
        let finals = FinalCanvas::new();
        let mut context = SessionContext::new(settings.subscribe(), backend.clone())
            .with_finals(finals.clone())
            .with_poll_interval(options.poll_interval);
        if let Some(path) = options.journal_path {
            context = context.with_journal(EventJournal::new(path, session_id.clone()));
        }
        let sections = specs
            .into_iter()
            .map(|spec| SectionController::new(spec, context.clone()))
            .collect::<Vec<_>>();

        context.record(SessionEvent::SessionStarted {
            backend: backend.name().to_string(),
            sections: sections.len(),
        });
        log::info!(
            "session {session_id} started with {} sections on {}",
            sections.len(),
            backend.name()
        );

        Self {
            session_id,
            settings,
            sections,
            finals,
            backend,
            context,
            lora_selector: LoraSelector::default(),
        }
    }

    pub fn with_reference_layout(backend: Arc<dyn ImageBackend>, options: BoardOptions) -> Self {
        Self::new(reference_layout(), backend, options)
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn backend(&self) -> &Arc<dyn ImageBackend> {
        &self.backend
    }

    pub fn sections(&self) -> &[SectionController] {
        &self.sections
    }

    /// Looks a section up by slug (`symbol-icon-3`) or exact title, case-insensitively.
    pub fn section(&self, key: &str) -> Result<&SectionController, EngineError> {
        let slug = slugify(key);
        self.sections
            .iter()
            .find(|section| section.key() == slug || section.title().eq_ignore_ascii_case(key.trim()))
            .ok_or_else(|| EngineError::UnknownSection(key.trim().to_string()))
    }

    pub fn finals(&self) -> &FinalCanvas {
        &self.finals
    }

    pub fn settings(&self) -> GlobalSettings {
        self.settings.borrow().clone()
    }

    pub fn subscribe_settings(&self) -> watch::Receiver<GlobalSettings> {
        self.settings.subscribe()
    }

    pub fn update_settings(&self, update: impl FnOnce(&mut GlobalSettings)) {
        self.settings.send_modify(update);
    }

    /// Tracking sections follow this immediately; overridden ones keep their text.
    pub fn set_global_prompt(&self, text: &str) {
        self.update_settings(|settings| settings.global_prompt = text.to_string());
    }

    /// Reloads the adapter list from the backend.
    pub async fn refresh_loras(&mut self) -> Result<Vec<LoraSpec>, EngineError> {
        let loras = self.backend.loras().await?;
        self.lora_selector = LoraSelector::new(LoraRegistry::new(loras));
        Ok(self.lora_selector.registry.list().cloned().collect())
    }

    /// Validates `requested` against the last adapter listing and stores the result.
    pub fn select_lora(&self, requested: Option<&str>) -> LoraSelection {
        let selection = self.lora_selector.select(requested);
        if let Some(reason) = &selection.fallback_reason {
            log::warn!("{reason}");
        }
        let value = selection.selector_value().to_string();
        self.update_settings(|settings| settings.lora = value);
        selection
    }

    /// Runs every section's generate concurrently with a shared variant count.
    ///
    /// An empty global prompt is rejected before any section starts. After
    /// that each section reports on its own; failures do not stop the rest.
    pub async fn generate_all(&self, count: u32) -> Result<Vec<SectionResult>, EngineError> {
        if self.settings.borrow().global_prompt.trim().is_empty() {
            return Err(PromptError::EmptyPrompt.into());
        }
        log::info!(
            "generating {count} variant(s) for {} sections",
            self.sections.len()
        );
        let runs = self.sections.iter().map(|section| async move {
            SectionResult {
                title: section.title().to_string(),
                result: section.generate(Some(count)).await,
            }
        });
        Ok(join_all(runs).await)
    }

    /// Injects expansion prompts into the sections whose slots they target.
    /// Returns how many sections were updated.
    pub fn apply_expansion(&self, bundle: &ExpandedPrompts) -> usize {
        let mut injected = 0;
        for section in &self.sections {
            let prompt = match section.spec().slot {
                SectionSlot::Background => Some(&bundle.background),
                SectionSlot::Frame => Some(&bundle.frame),
                SectionSlot::Symbol(idx) => bundle.symbol_icons.get(idx),
                SectionSlot::Wild(idx) => bundle.wild_icons.get(idx),
                SectionSlot::Bonus => None,
            };
            if let Some(prompt) = prompt {
                section.inject_prompt(prompt);
                injected += 1;
            }
        }
        self.context.record(SessionEvent::PromptsExpanded {
            sections: injected,
            symbol_icons: bundle.symbol_icons.len(),
            wild_icons: bundle.wild_icons.len(),
        });
        injected
    }

    /// Expands `theme` (the global prompt when `None`) and applies the result.
    pub async fn expand_and_apply(
        &self,
        expander: &dyn PromptExpander,
        theme: Option<&str>,
    ) -> Result<ExpandedPrompts, EngineError> {
        let theme = theme
            .map(str::to_string)
            .unwrap_or_else(|| self.settings.borrow().global_prompt.clone());
        let bundle = expander.expand(&theme).await?.coerced();
        let injected = self.apply_expansion(&bundle);
        log::info!("{} expansion applied to {injected} sections", expander.name());
        Ok(bundle)
    }

    pub fn export_finals(&self, dir: &Path) -> anyhow::Result<PathBuf> {
        let manifest = self.finals.export(dir, &self.session_id)?;
        self.context.record(SessionEvent::FinalsExported {
            dir: dir.display().to_string(),
            finals: self.finals.len(),
        });
        Ok(manifest)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use slotforge_contracts::events::read_journal;

    use super::*;
    use crate::artifact::ImageArtifact;
    use crate::backend::{DryrunBackend, GenerationJob, HealthReport, ProgressSnapshot};

    /// Fails any job whose prompt contains one of the poisoned words.
    struct SelectiveBackend {
        poisoned: HashSet<&'static str>,
        prompts: Mutex<Vec<String>>,
        loras: Vec<LoraSpec>,
    }

    impl SelectiveBackend {
        fn new(poisoned: &[&'static str]) -> Self {
            Self {
                poisoned: poisoned.iter().copied().collect(),
                prompts: Mutex::new(Vec::new()),
                loras: vec![LoraSpec::new("gold_leaf_v1", Some("gold".to_string()))],
            }
        }
    }

    #[async_trait]
    impl ImageBackend for SelectiveBackend {
        fn name(&self) -> &str {
            "selective"
        }

        async fn txt2img(&self, job: &GenerationJob) -> Result<Vec<ImageArtifact>, EngineError> {
            if let Ok(mut prompts) = self.prompts.lock() {
                prompts.push(job.prompt.clone());
            }
            tokio::task::yield_now().await;
            if self.poisoned.iter().any(|word| job.prompt.contains(word)) {
                return Err(EngineError::Backend {
                    backend: "selective".to_string(),
                    status: 500,
                    message: "poisoned".to_string(),
                });
            }
            Ok((0..job.variant_count_clamped())
                .map(|idx| ImageArtifact::new(vec![idx as u8], Some("image/png")))
                .collect())
        }

        async fn progress(&self) -> Result<ProgressSnapshot, EngineError> {
            Ok(ProgressSnapshot::default())
        }

        async fn loras(&self) -> Result<Vec<LoraSpec>, EngineError> {
            Ok(self.loras.clone())
        }

        async fn health(&self) -> HealthReport {
            HealthReport {
                ok: true,
                backend: "selective".to_string(),
                base_url: None,
                status: String::new(),
                models: Vec::new(),
                supports_image_generation: true,
                max_images_per_request: 10,
            }
        }
    }

    fn expansion() -> ExpandedPrompts {
        ExpandedPrompts {
            background: "molten caldera".to_string(),
            frame: "obsidian border".to_string(),
            symbol_icons: (1..=3).map(|idx| format!("lava gem {idx}")).collect(),
            wild_icons: vec!["phoenix".to_string()],
        }
        .coerced()
    }

    #[test]
    fn sections_resolve_by_slug_or_title() -> anyhow::Result<()> {
        let board = Board::with_reference_layout(Arc::new(DryrunBackend::new()), BoardOptions::default());
        assert_eq!(board.sections().len(), 27);
        assert_eq!(board.section("symbol-icon-3")?.title(), "Symbol Icon 3");
        assert_eq!(board.section("ui frame")?.title(), "UI Frame");
        assert_eq!(board.section("Bonus Art")?.key(), "bonus-art");
        assert!(matches!(
            board.section("symbol-icon-21"),
            Err(EngineError::UnknownSection(_))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn generate_all_requires_global_prompt() -> anyhow::Result<()> {
        let backend = Arc::new(SelectiveBackend::new(&[]));
        let board = Board::with_reference_layout(backend.clone(), BoardOptions::default());
        board.section("background")?.edit_prompt("has its own");

        let err = board.generate_all(2).await;
        assert!(matches!(err, Err(ref err) if err.is_validation()));
        assert!(backend.prompts.lock().map(|p| p.is_empty()).unwrap_or(false));
        Ok(())
    }

    #[tokio::test]
    async fn generate_all_isolates_failures() -> anyhow::Result<()> {
        let backend = Arc::new(SelectiveBackend::new(&["cursed"]));
        let board = Board::with_reference_layout(backend.clone(), BoardOptions::default());
        board.set_global_prompt("volcano kingdom");
        board.section("wild-icon-2")?.edit_prompt("cursed flame");

        let results = board.generate_all(2).await?;
        assert_eq!(results.len(), 27);
        let failed: Vec<&str> = results
            .iter()
            .filter(|entry| entry.result.is_err())
            .map(|entry| entry.title.as_str())
            .collect();
        assert_eq!(failed, vec!["Wild Icon 2"]);
        assert_eq!(board.section("background")?.view().gallery.len(), 2);
        assert!(board.section("wild-icon-2")?.view().gallery.is_empty());
        assert_eq!(backend.prompts.lock().map(|p| p.len()).unwrap_or(0), 27);
        Ok(())
    }

    #[tokio::test]
    async fn expansion_overrides_survive_global_changes() -> anyhow::Result<()> {
        let board = Board::with_reference_layout(Arc::new(DryrunBackend::new()), BoardOptions::default());
        board.set_global_prompt("volcano");
        assert_eq!(board.apply_expansion(&expansion()), 27 - 1);

        board.set_global_prompt("glacier");
        assert_eq!(board.section("background")?.effective_prompt(), "molten caldera");
        assert_eq!(board.section("symbol-icon-2")?.effective_prompt(), "lava gem 2");
        assert_eq!(board.section("wild-icon-1")?.effective_prompt(), "phoenix");
        assert_eq!(board.section("bonus-art")?.effective_prompt(), "glacier");

        // Padded empty entries latch too and fall back to the global prompt.
        let untouched = board.section("symbol-icon-4")?;
        assert!(untouched.view().prompt.is_overridden());
        assert!(untouched.composed_prompt()?.starts_with("glacier, "));

        untouched.use_global_prompt();
        assert!(!untouched.view().prompt.is_overridden());
        Ok(())
    }

    #[tokio::test]
    async fn lora_selection_validates_against_backend() -> anyhow::Result<()> {
        let mut board = Board::with_reference_layout(
            Arc::new(SelectiveBackend::new(&[])),
            BoardOptions::default(),
        );
        assert_eq!(board.refresh_loras().await?.len(), 1);

        let alias = board.select_lora(Some("gold"));
        assert_eq!(alias.name.as_deref(), Some("gold_leaf_v1"));
        assert_eq!(board.settings().lora, "gold_leaf_v1");

        let missing = board.select_lora(Some("pixel"));
        assert!(missing.fallback_reason.is_some());
        assert_eq!(board.settings().lora, "none");
        Ok(())
    }

    #[tokio::test]
    async fn journal_records_session_lifecycle() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let journal = temp.path().join("events.jsonl");
        let board = Board::new(
            vec![SectionSpec::new("Background", SectionSlot::Background, 64, 64)],
            Arc::new(DryrunBackend::new()),
            BoardOptions {
                journal_path: Some(journal.clone()),
                ..BoardOptions::default()
            },
        );
        board.set_global_prompt("candy land");
        board.generate_all(1).await?;
        board.section("background")?.set_as_final(0)?;

        let manifest = board.export_finals(&temp.path().join("pack"))?;
        assert!(manifest.ends_with("final_canvas.json"));

        let records = read_journal(&journal)?;
        let types: Vec<&str> = records
            .iter()
            .map(|record| record.event.event_type())
            .collect();
        assert_eq!(
            types,
            vec![
                "session_started",
                "job_started",
                "job_settled",
                "final_set",
                "finals_exported"
            ]
        );
        assert!(records
            .iter()
            .all(|record| record.session_id == board.session_id()));
        match &records[3].event {
            SessionEvent::FinalSet { section, sha256, .. } => {
                assert_eq!(section, "Background");
                assert_eq!(sha256.len(), 64);
            }
            other => panic!("expected final_set, got {other:?}"),
        }
        Ok(())
    }
}
