use std::collections::BTreeMap;

use serde_json::{json, Value};

use super::command_registry::{
    CommandSpec, EDIT_COMMAND, EXPORT_COMMAND, NO_ARG_COMMANDS, NUMBER_COMMANDS, RAW_TEXT_COMMANDS,
    SECTION_COMMANDS, SECTION_INDEX_COMMANDS, SIZE_COMMAND,
};

#[derive(Debug, Clone, PartialEq)]
pub struct Intent {
    pub action: String,
    pub raw: String,
    pub prompt: Option<String>,
    pub command_args: BTreeMap<String, Value>,
}

impl Intent {
    fn new(action: &str, raw: &str) -> Self {
        Self {
            action: action.to_string(),
            raw: raw.to_string(),
            prompt: None,
            command_args: BTreeMap::new(),
        }
    }

    fn with_arg(mut self, key: &str, value: Value) -> Self {
        self.command_args.insert(key.to_string(), value);
        self
    }

    pub fn arg_str(&self, key: &str) -> Option<&str> {
        self.command_args
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }

    pub fn arg_u64(&self, key: &str) -> Option<u64> {
        self.command_args.get(key).and_then(Value::as_u64)
    }

    pub fn arg_f64(&self, key: &str) -> Option<f64> {
        self.command_args.get(key).and_then(Value::as_f64)
    }
}

fn find_action(command: &str, specs: &[CommandSpec]) -> Option<&'static str> {
    specs
        .iter()
        .find(|spec| spec.command == command)
        .map(|spec| spec.action)
}

fn split_args(arg: &str) -> Vec<String> {
    if arg.trim().is_empty() {
        return Vec::new();
    }
    match shell_words::split(arg) {
        Ok(parts) => parts
            .into_iter()
            .filter(|value| !value.is_empty())
            .collect(),
        Err(_) => arg.split_whitespace().map(str::to_string).collect(),
    }
}

/// Splits off a leading (possibly quoted) section key and returns the rest verbatim.
fn split_section_head(arg: &str) -> (String, String) {
    let trimmed = arg.trim_start();
    if let Some(quote) = trimmed.chars().next().filter(|ch| *ch == '"' || *ch == '\'') {
        let body = &trimmed[1..];
        if let Some(end) = body.find(quote) {
            return (body[..end].to_string(), body[end + 1..].trim().to_string());
        }
    }
    match trimmed.split_once(char::is_whitespace) {
        Some((head, rest)) => (head.to_string(), rest.trim().to_string()),
        None => (trimmed.to_string(), String::new()),
    }
}

fn parse_number(raw: &str) -> Value {
    let raw = raw.trim();
    if let Ok(value) = raw.parse::<u64>() {
        return json!(value);
    }
    match raw.parse::<f64>() {
        Ok(value) if value.is_finite() => json!(value),
        _ => Value::Null,
    }
}

fn parse_index(raw: Option<&String>) -> Value {
    raw.and_then(|value| value.parse::<u64>().ok())
        .map(|value| json!(value))
        .unwrap_or(Value::Null)
}

fn parse_size(raw: &str) -> Option<(u64, u64)> {
    let lowered = raw.trim().to_ascii_lowercase();
    let (width, height) = lowered.split_once(['x', '*'])?;
    let width = width.trim().parse::<u64>().ok()?;
    let height = height.trim().parse::<u64>().ok()?;
    if width == 0 || height == 0 {
        return None;
    }
    Some((width, height))
}

/// Turns one line of shell input into an intent. Plain text sets the global prompt.
pub fn parse_intent(text: &str) -> Intent {
    let raw_trimmed = text.trim();
    if raw_trimmed.is_empty() {
        return Intent::new("noop", text);
    }

    if let Some(slash_tail) = raw_trimmed.strip_prefix('/') {
        let command_len = slash_tail
            .chars()
            .take_while(|ch| ch.is_ascii_alphanumeric() || *ch == '_')
            .count();
        if command_len > 0 {
            let command = slash_tail[..command_len].to_ascii_lowercase();
            let arg = slash_tail[command_len..].trim();

            if let Some(action) = find_action(&command, RAW_TEXT_COMMANDS) {
                return Intent::new(action, text).with_arg("text", json!(arg));
            }

            if let Some(action) = find_action(&command, NUMBER_COMMANDS) {
                let value = if arg.is_empty() {
                    Value::Null
                } else {
                    parse_number(arg)
                };
                return Intent::new(action, text).with_arg("value", value);
            }

            if let Some(action) = find_action(&command, SECTION_COMMANDS) {
                let (section, _) = split_section_head(arg);
                return Intent::new(action, text).with_arg("section", json!(section));
            }

            if let Some(action) = find_action(&command, SECTION_INDEX_COMMANDS) {
                let parts = split_args(arg);
                let section = parts.first().cloned().unwrap_or_default();
                return Intent::new(action, text)
                    .with_arg("section", json!(section))
                    .with_arg("index", parse_index(parts.get(1)));
            }

            if command == EDIT_COMMAND.command {
                let (section, prompt) = split_section_head(arg);
                let mut intent =
                    Intent::new(EDIT_COMMAND.action, text).with_arg("section", json!(section));
                intent.prompt = Some(prompt);
                return intent;
            }

            if command == SIZE_COMMAND.command {
                let (section, size) = split_section_head(arg);
                let intent =
                    Intent::new(SIZE_COMMAND.action, text).with_arg("section", json!(section));
                return match parse_size(&size) {
                    Some((width, height)) => intent
                        .with_arg("width", json!(width))
                        .with_arg("height", json!(height)),
                    None => intent
                        .with_arg("width", Value::Null)
                        .with_arg("height", Value::Null),
                };
            }

            if let Some(action) = find_action(&command, NO_ARG_COMMANDS) {
                return Intent::new(action, text);
            }

            if command == EXPORT_COMMAND.command {
                let path = split_args(arg).into_iter().next();
                return Intent::new(EXPORT_COMMAND.action, text)
                    .with_arg("path", path.map(Value::String).unwrap_or(Value::Null));
            }

            return Intent::new("unknown", text)
                .with_arg("command", Value::String(command))
                .with_arg("arg", Value::String(arg.to_string()));
        }
    }

    let mut intent = Intent::new("set_global_prompt", text);
    intent.prompt = Some(raw_trimmed.to_string());
    intent.with_arg("text", json!(raw_trimmed))
}
