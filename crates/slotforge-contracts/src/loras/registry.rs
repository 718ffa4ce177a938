use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// A LoRA adapter advertised by the image backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoraSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

impl LoraSpec {
    pub fn new(name: impl Into<String>, alias: Option<String>) -> Self {
        Self {
            name: name.into(),
            alias,
        }
    }

    pub fn matches(&self, query: &str) -> bool {
        self.name == query || self.alias.as_deref() == Some(query)
    }
}

#[derive(Debug, Clone, Default)]
pub struct LoraRegistry {
    loras: IndexMap<String, LoraSpec>,
}

impl LoraRegistry {
    /// Keeps the backend's listing order; nameless and repeated entries are dropped.
    pub fn new(loras: Vec<LoraSpec>) -> Self {
        let mut map = IndexMap::new();
        for lora in loras {
            let name = lora.name.trim();
            if name.is_empty() || map.contains_key(name) {
                continue;
            }
            map.insert(
                name.to_string(),
                LoraSpec {
                    name: name.to_string(),
                    alias: lora
                        .alias
                        .map(|alias| alias.trim().to_string())
                        .filter(|alias| !alias.is_empty()),
                },
            );
        }
        Self { loras: map }
    }

    pub fn get(&self, name: &str) -> Option<&LoraSpec> {
        self.loras.get(name)
    }

    pub fn list(&self) -> impl Iterator<Item = &LoraSpec> {
        self.loras.values()
    }

    pub fn len(&self) -> usize {
        self.loras.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loras.is_empty()
    }

    /// Looks up by exact name first, then by alias.
    pub fn resolve(&self, query: &str) -> Option<&LoraSpec> {
        let query = query.trim();
        self.get(query)
            .or_else(|| self.loras.values().find(|lora| lora.matches(query)))
    }
}
