use super::registry::LoraRegistry;
use crate::prompt::NO_LORA;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoraSelection {
    /// Adapter name to put in the prompt directive; `None` means no adapter.
    pub name: Option<String>,
    pub requested: Option<String>,
    pub fallback_reason: Option<String>,
}

impl LoraSelection {
    pub fn none() -> Self {
        Self {
            name: None,
            requested: None,
            fallback_reason: None,
        }
    }

    pub fn selector_value(&self) -> &str {
        self.name.as_deref().unwrap_or(NO_LORA)
    }
}

#[derive(Debug, Clone, Default)]
pub struct LoraSelector {
    pub registry: LoraRegistry,
}

impl LoraSelector {
    pub fn new(registry: LoraRegistry) -> Self {
        Self { registry }
    }

    /// Resolves a user choice against the backend listing. Unknown adapters
    /// fall back to no adapter with an explanation instead of failing.
    pub fn select(&self, requested: Option<&str>) -> LoraSelection {
        let Some(requested_value) = requested
            .map(str::trim)
            .filter(|value| !value.is_empty() && !value.eq_ignore_ascii_case(NO_LORA))
        else {
            return LoraSelection::none();
        };

        if let Some(lora) = self.registry.resolve(requested_value) {
            return LoraSelection {
                name: Some(lora.name.clone()),
                requested: Some(requested_value.to_string()),
                fallback_reason: None,
            };
        }

        let reason = if self.registry.is_empty() {
            "Backend lists no LoRA adapters; generating without one.".to_string()
        } else {
            format!("LoRA '{requested_value}' is not installed on the backend; generating without one.")
        };
        LoraSelection {
            name: None,
            requested: Some(requested_value.to_string()),
            fallback_reason: Some(reason),
        }
    }
}
