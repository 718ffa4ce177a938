use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::Context;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Everything a session records about itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    SessionStarted {
        backend: String,
        sections: usize,
    },
    JobStarted {
        section: String,
        job: u64,
        kind: JobKind,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        index: Option<usize>,
    },
    JobSettled {
        section: String,
        job: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        variants: Option<usize>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// The caller dropped the job before the backend replied.
    JobCancelled {
        section: String,
        job: u64,
    },
    VariantDiscarded {
        section: String,
        index: usize,
        sha256: String,
    },
    FinalSet {
        section: String,
        index: usize,
        width: u32,
        height: u32,
        sha256: String,
        replaced: bool,
    },
    PromptsExpanded {
        sections: usize,
        symbol_icons: usize,
        wild_icons: usize,
    },
    FinalsExported {
        dir: String,
        finals: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Generate,
    Regenerate,
}

impl JobKind {
    pub fn for_target(regenerating: Option<usize>) -> Self {
        if regenerating.is_some() {
            Self::Regenerate
        } else {
            Self::Generate
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Generate => "generate",
            Self::Regenerate => "regenerate",
        }
    }
}

impl SessionEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::SessionStarted { .. } => "session_started",
            Self::JobStarted { .. } => "job_started",
            Self::JobSettled { .. } => "job_settled",
            Self::JobCancelled { .. } => "job_cancelled",
            Self::VariantDiscarded { .. } => "variant_discarded",
            Self::FinalSet { .. } => "final_set",
            Self::PromptsExpanded { .. } => "prompts_expanded",
            Self::FinalsExported { .. } => "finals_exported",
        }
    }
}

/// One line of `events.jsonl`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalRecord {
    pub session_id: String,
    pub ts: String,
    #[serde(flatten)]
    pub event: SessionEvent,
}

/// Append-only session journal, one compact JSON record per line.
#[derive(Debug, Clone)]
pub struct EventJournal {
    inner: Arc<JournalInner>,
}

#[derive(Debug)]
struct JournalInner {
    path: PathBuf,
    session_id: String,
    lock: Mutex<()>,
}

impl EventJournal {
    pub fn new(path: impl Into<PathBuf>, session_id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(JournalInner {
                path: path.into(),
                session_id: session_id.into(),
                lock: Mutex::new(()),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    pub fn record(&self, event: SessionEvent) -> anyhow::Result<JournalRecord> {
        let record = JournalRecord {
            session_id: self.inner.session_id.clone(),
            ts: now_utc_iso(),
            event,
        };
        let line = serde_json::to_string(&record)?;

        if let Some(parent) = self.inner.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let _guard = self
            .inner
            .lock
            .lock()
            .map_err(|_| anyhow::anyhow!("event journal lock poisoned"))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.inner.path)
            .with_context(|| format!("failed to open {}", self.inner.path.display()))?;
        writeln!(file, "{line}")?;
        Ok(record)
    }
}

/// Reads a journal back. Blank lines are skipped; any other bad line is an error.
pub fn read_journal(path: &Path) -> anyhow::Result<Vec<JournalRecord>> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    let mut records = Vec::new();
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str(&line)
            .with_context(|| format!("{} line {}", path.display(), idx + 1))?;
        records.push(record);
    }
    Ok(records)
}

pub(crate) fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}
