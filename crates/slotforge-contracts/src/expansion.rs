use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;

pub const SYMBOL_ICON_COUNT: usize = 20;
pub const WILD_ICON_COUNT: usize = 5;

/// Per-section prompts returned by the text model for one theme.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpandedPrompts {
    #[serde(default, deserialize_with = "lenient_string")]
    pub background: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub frame: String,
    #[serde(default, deserialize_with = "lenient_strings")]
    pub symbol_icons: Vec<String>,
    #[serde(default, deserialize_with = "lenient_strings")]
    pub wild_icons: Vec<String>,
}

#[derive(Debug, Error)]
pub enum ExpansionParseError {
    #[error("text model returned no content")]
    Empty,
    #[error("text model returned invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

impl ExpandedPrompts {
    /// Forces the icon lists to their fixed lengths: extras are dropped from
    /// the end, missing entries become empty strings.
    pub fn coerced(mut self) -> Self {
        fit_length(&mut self.symbol_icons, SYMBOL_ICON_COUNT);
        fit_length(&mut self.wild_icons, WILD_ICON_COUNT);
        self
    }

    /// Parses raw model output (optionally wrapped in a ```json fence) and
    /// coerces it.
    pub fn from_model_text(text: &str) -> Result<Self, ExpansionParseError> {
        let json_text = extract_json(text);
        if json_text.is_empty() {
            return Err(ExpansionParseError::Empty);
        }
        let parsed: ExpandedPrompts = serde_json::from_str(json_text)?;
        Ok(parsed.coerced())
    }
}

fn fit_length(items: &mut Vec<String>, len: usize) {
    items.truncate(len);
    items.resize(len, String::new());
}

/// Returns the body of the first ```json fence, else the trimmed text.
pub fn extract_json(text: &str) -> &str {
    const FENCE: &str = "```json";
    let lowered = text.to_ascii_lowercase();
    if let Some(start) = lowered.find(FENCE) {
        let body_start = start + FENCE.len();
        if let Some(body_len) = text[body_start..].find("```") {
            return text[body_start..body_start + body_len].trim();
        }
    }
    text.trim()
}

/// Prompt templates the text model must fill in, one per section kind.
pub const BACKGROUND_TEMPLATE: &str = "A highly detailed {theme} game background for a game, \
featuring {specific environment details like forest temple, space station, desert ruins}, \
in a {art style}, with {mood/color palette}, no characters, wide composition, \
suitable as a backdrop for gameplay.";

pub const FRAME_TEMPLATE: &str = "A decorative UI frame for a {theme} game, designed in {art style}, \
with clean edges, symmetrical layout, \
{material/texture like gold filigree, neon circuits, stone carvings}, \
leaving transparent space inside for text or buttons, polished and readable.";

pub const SYMBOL_ICON_TEMPLATE: &str = "A simple, clear symbol icon representing \
{object/idea: e.g., sword, star, coin, potion}, in {art style}, bold silhouette, {color palette}, \
designed for small-scale visibility, transparent background, crisp edges, minimal design, \
designed to blend seamlessly with the game interface without standing out too much.";

pub const WILD_ICON_TEMPLATE: &str = "A glowing, attention-grabbing wild icon symbolizing \
{wild feature: e.g., phoenix, crown, magic crystal}, in {art style}, with luminous effects, \
bold outline, high contrast, {color palette}, designed to stand out from regular icons, \
minimal background, glowing aura, magical particles, dynamic energy.";

/// Instruction sent to the text model for a theme.
pub fn expansion_instruction(theme: &str) -> String {
    let escaped = theme.trim().replace('"', "\\\"");
    format!(
        "You are generating structured prompts for a slots video game art pack.\n\
         Given a global theme prompt, return JSON with these keys:\n\
         \"background\": string, one prompt for the game's background\n\
         \"frame\": string, one prompt for the game's UI frame\n\
         \"symbol_icons\": string[{SYMBOL_ICON_COUNT}], {SYMBOL_ICON_COUNT} different symbol icon ideas, each a distinct object or concept\n\
         \"wild_icons\": string[{WILD_ICON_COUNT}], {WILD_ICON_COUNT} different wild symbol ideas, distinct and thematically coherent\n\n\
         IMPORTANT: You MUST follow these exact prompt templates for each type:\n\n\
         Background Template:\n\"{BACKGROUND_TEMPLATE}\"\n\n\
         UI Frame Template:\n\"{FRAME_TEMPLATE}\"\n\n\
         Symbol Icon Template:\n\"{SYMBOL_ICON_TEMPLATE}\"\n\n\
         Wild Icon Template:\n\"{WILD_ICON_TEMPLATE}\"\n\n\
         Rules:\n\
         - Use concise, production-ready image prompts, include art style modifiers if helpful.\n\
         - Do NOT include JSON comments in the output.\n\
         - The JSON MUST be the only output (no markdown, no prose).\n\
         Global theme: \"{escaped}\"."
    )
}

fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(value_to_text(value))
}

fn lenient_strings<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Array(rows) => rows.into_iter().map(value_to_text).collect(),
        Value::Null => Vec::new(),
        other => vec![value_to_text(other)],
    })
}

fn value_to_text(value: Value) -> String {
    match value {
        Value::String(text) => text,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
