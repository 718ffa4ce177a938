use serde::{Deserialize, Serialize};
use slotforge_contracts::prompt::NO_LORA;

use crate::backend::{DEFAULT_CFG_SCALE, DEFAULT_SAMPLER, DEFAULT_STEPS, MAX_VARIANTS};

/// Board-wide inputs shared by every section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalSettings {
    pub global_prompt: String,
    pub style: String,
    pub variant_count: u32,
    /// Adapter name, or `"none"`.
    pub lora: String,
    pub cfg_scale: f64,
    pub steps: u32,
    pub sampler: String,
    pub negative_prompt: String,
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            global_prompt: String::new(),
            style: String::new(),
            variant_count: 1,
            lora: NO_LORA.to_string(),
            cfg_scale: DEFAULT_CFG_SCALE,
            steps: DEFAULT_STEPS,
            sampler: DEFAULT_SAMPLER.to_string(),
            negative_prompt: String::new(),
        }
    }
}

impl GlobalSettings {
    pub fn set_variant_count(&mut self, count: u32) {
        self.variant_count = count.clamp(1, MAX_VARIANTS);
    }

    /// `None` when no adapter is selected.
    pub fn lora_name(&self) -> Option<&str> {
        let lora = self.lora.trim();
        if lora.is_empty() || lora.eq_ignore_ascii_case(NO_LORA) {
            None
        } else {
            Some(lora)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_generation_defaults() {
        let settings = GlobalSettings::default();
        assert_eq!(settings.variant_count, 1);
        assert_eq!(settings.cfg_scale, 7.0);
        assert_eq!(settings.steps, 20);
        assert_eq!(settings.sampler, "DPM++ 2M Karras");
        assert_eq!(settings.lora_name(), None);
    }

    #[test]
    fn variant_count_is_clamped() {
        let mut settings = GlobalSettings::default();
        settings.set_variant_count(0);
        assert_eq!(settings.variant_count, 1);
        settings.set_variant_count(99);
        assert_eq!(settings.variant_count, 10);
        settings.set_variant_count(4);
        assert_eq!(settings.variant_count, 4);
    }

    #[test]
    fn lora_sentinel_is_case_insensitive() {
        let mut settings = GlobalSettings {
            lora: "None".to_string(),
            ..GlobalSettings::default()
        };
        assert_eq!(settings.lora_name(), None);
        settings.lora = " goldfx ".to_string();
        assert_eq!(settings.lora_name(), Some("goldfx"));
    }
}
