//! Free-text markdown notes attached to tickets and pull requests.
//!
//! Each note is one file, `{kind}-{sanitized id}.md`, in the notes directory.
//! Timestamps come from filesystem metadata.

use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::debug;

use crate::errors::DashboardError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoteKind {
    Ticket,
    Pr,
}

impl NoteKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ticket => "ticket",
            Self::Pr => "pr",
        }
    }
}

impl fmt::Display for NoteKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NoteKind {
    type Err = DashboardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ticket" => Ok(Self::Ticket),
            "pr" => Ok(Self::Pr),
            other => Err(DashboardError::InvalidNoteKind(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    pub kind: NoteKind,
    pub id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Replace every character outside `[A-Za-z0-9_-]` with `_`.
pub fn sanitize_id(id: &str) -> String {
    id.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn timestamps(meta: &std::fs::Metadata) -> (DateTime<Utc>, DateTime<Utc>) {
    let modified = meta.modified().unwrap_or_else(|_| SystemTime::now());
    let created = meta.created().unwrap_or(modified);
    (created.into(), modified.into())
}

#[derive(Debug, Clone)]
pub struct NotesStore {
    dir: PathBuf,
}

impl NotesStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, kind: NoteKind, id: &str) -> PathBuf {
        self.dir.join(format!("{}-{}.md", kind, sanitize_id(id)))
    }

    fn not_found(kind: NoteKind, id: &str) -> DashboardError {
        DashboardError::NoteNotFound {
            kind: kind.to_string(),
            id: id.to_string(),
        }
    }

    pub async fn get(&self, kind: NoteKind, id: &str) -> Result<Note, DashboardError> {
        let path = self.path_for(kind, id);
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(Self::not_found(kind, id)),
            Err(e) => return Err(e.into()),
        };
        let (created_at, updated_at) = timestamps(&fs::metadata(&path).await?);
        Ok(Note {
            kind,
            id: id.to_string(),
            content,
            created_at,
            updated_at,
        })
    }

    /// Create or overwrite a note.
    pub async fn save(&self, kind: NoteKind, id: &str, content: &str) -> Result<Note, DashboardError> {
        fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(kind, id);
        fs::write(&path, content).await?;
        debug!(path = %path.display(), "note saved");
        self.get(kind, id).await
    }

    pub async fn delete(&self, kind: NoteKind, id: &str) -> Result<(), DashboardError> {
        match fs::remove_file(self.path_for(kind, id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(Self::not_found(kind, id)),
            Err(e) => Err(e.into()),
        }
    }

    /// All notes, most recently updated first. A missing directory means no notes.
    pub async fn list(&self) -> Result<Vec<Note>, DashboardError> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut notes = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name();
            let Some(stem) = file_name.to_str().and_then(|n| n.strip_suffix(".md")) else {
                continue;
            };
            let Some((kind, id)) = stem.split_once('-') else {
                continue;
            };
            let Ok(kind) = kind.parse::<NoteKind>() else {
                continue;
            };
            let content = fs::read_to_string(entry.path()).await?;
            let (created_at, updated_at) = timestamps(&entry.metadata().await?);
            notes.push(Note {
                kind,
                id: id.to_string(),
                content,
                created_at,
                updated_at,
            });
        }
        notes.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(notes)
    }
}
