use serde::{Deserialize, Serialize};

use crate::expansion::{SYMBOL_ICON_COUNT, WILD_ICON_COUNT};

pub const SYMBOL_COHESION_HINT: &str = "simple clear symbol icon, bold silhouette, \
designed for small-scale visibility, transparent background, crisp edges, minimal design, \
blends with the game interface without standing out";

pub const WILD_COHESION_HINT: &str = "glowing attention-grabbing wild icon, luminous effects, \
bold outline, high contrast, stands out from regular icons, minimal background, glowing aura, \
magical particles, dynamic energy";

pub const BONUS_COHESION_HINT: &str =
    "follow the visual language of the background and UI frame for palette, lighting and style";

pub const ICON_MIN_WORDS: usize = 25;

/// Where a section's prompt comes from in an expansion bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "index", rename_all = "snake_case")]
pub enum SectionSlot {
    Background,
    Frame,
    Symbol(usize),
    Wild(usize),
    Bonus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionSpec {
    pub title: String,
    pub slot: SectionSlot,
    pub width: u32,
    pub height: u32,
    pub cohesion_hint: Option<String>,
    pub min_words: Option<usize>,
}

impl SectionSpec {
    pub fn new(title: impl Into<String>, slot: SectionSlot, width: u32, height: u32) -> Self {
        Self {
            title: title.into(),
            slot,
            width,
            height,
            cohesion_hint: None,
            min_words: None,
        }
    }

    pub fn with_cohesion_hint(mut self, hint: impl Into<String>) -> Self {
        self.cohesion_hint = Some(hint.into());
        self
    }

    pub fn with_min_words(mut self, min_words: usize) -> Self {
        self.min_words = Some(min_words);
        self
    }

    pub fn key(&self) -> String {
        slugify(&self.title)
    }
}

/// The 27-slot slot-game pack: background, frame, 20 symbols, 5 wilds, bonus.
pub fn reference_layout() -> Vec<SectionSpec> {
    let mut sections = vec![
        SectionSpec::new("Background", SectionSlot::Background, 512, 512),
        SectionSpec::new("UI Frame", SectionSlot::Frame, 512, 512),
    ];
    for idx in 0..SYMBOL_ICON_COUNT {
        sections.push(
            SectionSpec::new(
                format!("Symbol Icon {}", idx + 1),
                SectionSlot::Symbol(idx),
                256,
                256,
            )
            .with_cohesion_hint(SYMBOL_COHESION_HINT)
            .with_min_words(ICON_MIN_WORDS),
        );
    }
    for idx in 0..WILD_ICON_COUNT {
        sections.push(
            SectionSpec::new(
                format!("Wild Icon {}", idx + 1),
                SectionSlot::Wild(idx),
                512,
                512,
            )
            .with_cohesion_hint(WILD_COHESION_HINT)
            .with_min_words(ICON_MIN_WORDS),
        );
    }
    sections.push(
        SectionSpec::new("Bonus Art", SectionSlot::Bonus, 768, 768)
            .with_cohesion_hint(BONUS_COHESION_HINT),
    );
    sections
}

/// Lowercases and collapses every run of non-alphanumerics into one `-`.
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut pending_separator = false;
    for ch in title.to_lowercase().chars() {
        if ch.is_alphanumeric() {
            if pending_separator && !slug.is_empty() {
                slug.push('-');
            }
            pending_separator = false;
            slug.push(ch);
        } else {
            pending_separator = true;
        }
    }
    slug
}
