/// Per-section prompt latch.
///
/// A section starts out `Tracking` the global prompt. Any direct edit (or an
/// injected expansion prompt) latches it to `Overridden`, after which global
/// prompt changes no longer reach it until `use_global` is called.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SectionPrompt {
    #[default]
    Tracking,
    Overridden(String),
}

impl SectionPrompt {
    pub fn resolve<'a>(&'a self, global_prompt: &'a str) -> &'a str {
        match self {
            Self::Tracking => global_prompt,
            Self::Overridden(text) => text.as_str(),
        }
    }

    pub fn edit(&mut self, text: impl Into<String>) {
        *self = Self::Overridden(text.into());
    }

    pub fn inject(&mut self, text: impl Into<String>) {
        self.edit(text);
    }

    pub fn use_global(&mut self) {
        *self = Self::Tracking;
    }

    pub fn is_overridden(&self) -> bool {
        matches!(self, Self::Overridden(_))
    }

    pub fn override_text(&self) -> Option<&str> {
        match self {
            Self::Tracking => None,
            Self::Overridden(text) => Some(text.as_str()),
        }
    }
}
