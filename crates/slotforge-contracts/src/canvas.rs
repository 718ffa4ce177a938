use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::events::now_utc_iso;

/// One exported final-canvas image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanvasManifestEntry {
    pub title: String,
    pub file: String,
    pub width: u32,
    pub height: u32,
    pub mime_type: String,
    /// Hex SHA-256 of the image bytes.
    pub sha256: String,
}

/// Writes `final_canvas.json`: the chosen image per section, in selection order.
pub fn write_canvas_manifest(
    path: &Path,
    session_id: &str,
    entries: &[CanvasManifestEntry],
) -> anyhow::Result<()> {
    let mut payload = Map::new();
    payload.insert(
        "session_id".to_string(),
        Value::String(session_id.to_string()),
    );
    payload.insert(
        "total_finals".to_string(),
        Value::Number((entries.len() as u64).into()),
    );
    payload.insert("finals".to_string(), serde_json::to_value(entries)?);
    payload.insert("ts".to_string(), Value::String(now_utc_iso()));

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(&Value::Object(payload))?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::{write_canvas_manifest, CanvasManifestEntry};

    #[test]
    fn manifest_lists_finals_in_order() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("export").join("final_canvas.json");
        let entries = vec![
            CanvasManifestEntry {
                title: "Background".to_string(),
                file: "background.png".to_string(),
                width: 512,
                height: 512,
                mime_type: "image/png".to_string(),
                sha256: "0f".repeat(32),
            },
            CanvasManifestEntry {
                title: "Wild Icon 2".to_string(),
                file: "wild-icon-2.jpg".to_string(),
                width: 512,
                height: 512,
                mime_type: "image/jpeg".to_string(),
                sha256: "a1".repeat(32),
            },
        ];
        write_canvas_manifest(&path, "session-1", &entries)?;

        let parsed: Value = serde_json::from_str(&std::fs::read_to_string(path)?)?;
        assert_eq!(parsed["session_id"], json!("session-1"));
        assert_eq!(parsed["total_finals"], json!(2));
        assert_eq!(parsed["finals"][0]["title"], json!("Background"));
        assert_eq!(parsed["finals"][1]["file"], json!("wild-icon-2.jpg"));
        assert_eq!(parsed["finals"][0]["sha256"], json!("0f".repeat(32)));
        assert!(parsed.get("ts").and_then(Value::as_str).is_some());
        Ok(())
    }
}
