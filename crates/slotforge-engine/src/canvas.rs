use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use indexmap::IndexMap;
use slotforge_contracts::canvas::{write_canvas_manifest, CanvasManifestEntry};
use slotforge_contracts::sections::slugify;
use tokio::sync::watch;

use crate::artifact::ImageArtifact;

pub const CANVAS_MANIFEST_FILE: &str = "final_canvas.json";

/// The image chosen for one section, with the size it was generated at.
#[derive(Debug, Clone, PartialEq)]
pub struct FinalEntry {
    pub artifact: ImageArtifact,
    pub width: u32,
    pub height: u32,
}

pub type FinalMap = IndexMap<String, FinalEntry>;

/// Shared title → final image map. Entries are inserted or overwritten, never removed.
#[derive(Debug, Clone)]
pub struct FinalCanvas {
    finals: Arc<watch::Sender<FinalMap>>,
}

impl Default for FinalCanvas {
    fn default() -> Self {
        Self::new()
    }
}

impl FinalCanvas {
    pub fn new() -> Self {
        Self {
            finals: Arc::new(watch::channel(FinalMap::new()).0),
        }
    }

    /// Stores `entry` under `title`; returns the entry it replaced.
    pub fn set(&self, title: &str, entry: FinalEntry) -> Option<FinalEntry> {
        let mut previous = None;
        self.finals.send_modify(|finals| {
            previous = finals.insert(title.to_string(), entry);
        });
        previous
    }

    pub fn get(&self, title: &str) -> Option<FinalEntry> {
        self.finals.borrow().get(title).cloned()
    }

    pub fn len(&self) -> usize {
        self.finals.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.finals.borrow().is_empty()
    }

    pub fn titles(&self) -> Vec<String> {
        self.finals.borrow().keys().cloned().collect()
    }

    pub fn snapshot(&self) -> FinalMap {
        self.finals.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<FinalMap> {
        self.finals.subscribe()
    }

    /// Writes every final as `<slug>.<ext>` plus a `final_canvas.json` manifest.
    pub fn export(&self, dir: &Path, session_id: &str) -> anyhow::Result<PathBuf> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
        let finals = self.snapshot();
        let mut entries = Vec::with_capacity(finals.len());
        for (title, entry) in &finals {
            let file = format!("{}.{}", slugify(title), entry.artifact.extension());
            let path = dir.join(&file);
            std::fs::write(&path, entry.artifact.bytes())
                .with_context(|| format!("failed to write {}", path.display()))?;
            entries.push(CanvasManifestEntry {
                title: title.clone(),
                file,
                width: entry.width,
                height: entry.height,
                mime_type: entry.artifact.mime_type().to_string(),
                sha256: entry.artifact.sha256_hex(),
            });
        }
        let manifest = dir.join(CANVAS_MANIFEST_FILE);
        write_canvas_manifest(&manifest, session_id, &entries)?;
        Ok(manifest)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::*;

    fn entry(bytes: &[u8], size: u32) -> FinalEntry {
        FinalEntry {
            artifact: ImageArtifact::new(bytes.to_vec(), Some("image/png")),
            width: size,
            height: size,
        }
    }

    #[test]
    fn set_overwrites_in_place() {
        let canvas = FinalCanvas::new();
        assert!(canvas.set("Background", entry(b"a", 512)).is_none());
        canvas.set("UI Frame", entry(b"b", 512));
        let previous = canvas.set("Background", entry(b"c", 768));

        assert_eq!(previous.map(|entry| entry.width), Some(512));
        assert_eq!(canvas.len(), 2);
        assert_eq!(canvas.titles(), vec!["Background", "UI Frame"]);
        assert_eq!(
            canvas.get("Background").map(|entry| entry.artifact.bytes().to_vec()),
            Some(b"c".to_vec())
        );
    }

    #[test]
    fn subscribers_see_updates() {
        let canvas = FinalCanvas::new();
        let mut rx = canvas.subscribe();
        canvas.set("Bonus Art", entry(b"x", 768));
        assert!(rx.has_changed().unwrap_or(false));
        assert!(rx.borrow_and_update().contains_key("Bonus Art"));
    }

    #[test]
    fn export_writes_images_and_manifest() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let canvas = FinalCanvas::new();
        canvas.set("Wild Icon 3", entry(b"wild", 512));
        canvas.set("Background", entry(b"bg", 512));

        let manifest = canvas.export(&temp.path().join("pack"), "session-9")?;
        let parsed: Value = serde_json::from_str(&std::fs::read_to_string(&manifest)?)?;
        assert_eq!(parsed["total_finals"], json!(2));
        assert_eq!(parsed["finals"][0]["file"], json!("wild-icon-3.png"));
        assert_eq!(
            parsed["finals"][1]["sha256"],
            json!(ImageArtifact::new(b"bg".to_vec(), Some("image/png")).sha256_hex())
        );
        assert_eq!(
            std::fs::read(temp.path().join("pack").join("background.png"))?,
            b"bg".to_vec()
        );
        Ok(())
    }
}
