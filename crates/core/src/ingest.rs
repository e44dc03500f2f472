use crate::error::Result;
use crate::{Document, IngestError};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Accepted shapes of a corpus snapshot file.
#[derive(Deserialize)]
#[serde(untagged)]
enum SnapshotFile {
    Many(Vec<SnapshotDocument>),
    Wrapped { documents: Vec<SnapshotDocument> },
    One(Box<SnapshotDocument>),
}

/// A document as written in a snapshot. `mtime` is kept apart so an explicit
/// zero can be told from a missing field.
#[derive(Deserialize)]
struct SnapshotDocument {
    #[serde(flatten)]
    document: Document,
    #[serde(default)]
    mtime: Option<i64>,
}

impl SnapshotFile {
    fn into_documents(self) -> Vec<SnapshotDocument> {
        match self {
            Self::Many(documents) | Self::Wrapped { documents } => documents,
            Self::One(document) => vec![*document],
        }
    }
}

pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

pub struct CorpusReport {
    pub documents: Vec<Document>,
    pub skipped_files: Vec<SkippedFile>,
}

pub fn discover_corpus_files(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let is_json = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

        if is_json {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

/// Reads one snapshot file. Documents without an `mtime` inherit the file's
/// modification time in milliseconds. Tags are a set: repeats are dropped.
pub fn read_snapshot_file(path: &Path) -> Result<Vec<Document>> {
    let bytes = fs::read(path)?;
    let snapshot: SnapshotFile =
        serde_json::from_slice(&bytes).map_err(|source| IngestError::Json {
            path: path.display().to_string(),
            source,
        })?;

    let file_mtime = fs::metadata(path)
        .and_then(|meta| meta.modified())
        .map(|modified| DateTime::<Utc>::from(modified).timestamp_millis())
        .unwrap_or(0);

    let documents = snapshot
        .into_documents()
        .into_iter()
        .map(|entry| {
            let mut document = entry.document;
            document.mtime = entry.mtime.unwrap_or(file_mtime);
            dedupe_tags(&mut document.tags);
            document
        })
        .collect();
    Ok(documents)
}

pub fn load_corpus(path: &Path) -> Result<Vec<Document>> {
    let report = load_corpus_best_effort(path)?;
    Ok(report.documents)
}

/// Loads a single snapshot file, or every `*.json` file under a directory in
/// path order. Unreadable files in a directory are skipped and reported; a
/// later document with an already-seen id is dropped.
pub fn load_corpus_best_effort(path: &Path) -> Result<CorpusReport> {
    if path.is_file() {
        let documents = dedupe(read_snapshot_file(path)?);
        if documents.is_empty() {
            return Err(IngestError::NoDocuments(path.display().to_string()));
        }
        return Ok(CorpusReport {
            documents,
            skipped_files: Vec::new(),
        });
    }

    if !path.is_dir() {
        return Err(IngestError::InvalidArgument(format!(
            "corpus path does not exist: {}",
            path.display()
        )));
    }

    let files = discover_corpus_files(path);
    if files.is_empty() {
        return Err(IngestError::NoDocuments(path.display().to_string()));
    }

    let mut documents = Vec::new();
    let mut skipped_files = Vec::new();

    for file in files {
        match read_snapshot_file(&file) {
            Ok(found) => {
                debug!(path = %file.display(), documents = found.len(), "read corpus file");
                documents.extend(found);
            }
            Err(error) => {
                warn!(path = %file.display(), %error, "skipping corpus file");
                skipped_files.push(SkippedFile {
                    path: file,
                    reason: error.to_string(),
                });
            }
        }
    }

    let documents = dedupe(documents);
    if documents.is_empty() {
        return Err(IngestError::NoDocuments(path.display().to_string()));
    }

    Ok(CorpusReport {
        documents,
        skipped_files,
    })
}

fn dedupe_tags(tags: &mut Vec<String>) {
    let mut seen = HashSet::new();
    tags.retain(|tag| seen.insert(tag.clone()));
}

fn dedupe(documents: Vec<Document>) -> Vec<Document> {
    let mut seen = HashSet::new();
    documents
        .into_iter()
        .filter(|document| {
            let fresh = seen.insert(document.id.clone());
            if !fresh {
                warn!(id = %document.id, "dropping duplicate document id");
            }
            fresh
        })
        .collect()
}
