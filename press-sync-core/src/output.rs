//! Writing documents (and image bytes) to disk.
//!
//! Paths depend only on the document identifier, and a byte-identical file is
//! never rewritten, so an unchanged source produces an untouched tree.

use std::collections::HashSet;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::document::{MarkdownDocument, GENERATOR_LINE};
use crate::error::SyncError;

/// Extension of generated documents.
pub const DOCUMENT_EXTENSION: &str = "md";

/// Outcome of writing one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteResult {
    Created,
    Updated,
    Unchanged,
}

impl WriteResult {
    /// `true` for `Created` and `Updated`.
    pub fn changed(self) -> bool {
        !matches!(self, WriteResult::Unchanged)
    }
}

pub struct OutputWriter {
    content_root: PathBuf,
}

impl OutputWriter {
    pub fn new(content_root: impl Into<PathBuf>) -> Self {
        Self {
            content_root: content_root.into(),
        }
    }

    /// Deterministic target path for `identifier`.
    pub fn path_for(&self, identifier: &str) -> PathBuf {
        self.content_root.join(format!(
            "{}.{DOCUMENT_EXTENSION}",
            sanitize_identifier(identifier)
        ))
    }

    pub fn write(&self, document: &MarkdownDocument) -> Result<WriteResult, SyncError> {
        let path = self.path_for(&document.identifier);
        let result = write_if_changed(&path, document.render().as_bytes())?;
        match result {
            WriteResult::Unchanged => {
                debug!(path = %path.display(), "Document unchanged")
            }
            changed => info!(path = %path.display(), result = ?changed, "Wrote document"),
        }
        Ok(result)
    }

    /// Delete generated documents whose identifier is not in `keep`.
    ///
    /// Only files carrying the generator marker in their front matter are
    /// candidates; anything written by hand is left alone.
    pub fn prune(&self, keep: &HashSet<String>) -> Result<Vec<PathBuf>, SyncError> {
        let keep_stems: HashSet<String> = keep.iter().map(|id| sanitize_identifier(id)).collect();
        let entries = match fs::read_dir(&self.content_root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(SyncError::WriteFailed {
                    path: self.content_root.clone(),
                    source: e,
                })
            }
        };

        let mut removed = Vec::new();
        for entry in entries {
            let path = entry
                .map_err(|e| SyncError::WriteFailed {
                    path: self.content_root.clone(),
                    source: e,
                })?
                .path();
            if path.extension().and_then(|e| e.to_str()) != Some(DOCUMENT_EXTENSION) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if keep_stems.contains(stem) {
                continue;
            }
            let content = match fs::read_to_string(&path) {
                Ok(content) => content,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable file during prune");
                    continue;
                }
            };
            if !is_generated(&content) {
                continue;
            }
            fs::remove_file(&path).map_err(|e| SyncError::WriteFailed {
                path: path.clone(),
                source: e,
            })?;
            info!(path = %path.display(), "Removed stale document");
            removed.push(path);
        }
        removed.sort();
        Ok(removed)
    }
}

/// Whether `content` has front matter carrying this tool's generator marker.
fn is_generated(content: &str) -> bool {
    let Some(rest) = content.strip_prefix("---\n") else {
        return false;
    };
    rest.lines()
        .take_while(|line| *line != "---")
        .any(|line| line == GENERATOR_LINE)
}

/// File-name-safe form of an identifier.
///
/// Strips characters that are reserved on common filesystems and leading dots.
pub fn sanitize_identifier(identifier: &str) -> String {
    let cleaned: String = identifier
        .chars()
        .filter(|c| !matches!(c, '\\' | '/' | ':' | '*' | '?' | '"' | '<' | '>' | '|') && !c.is_control())
        .collect();
    let cleaned = cleaned.trim().trim_start_matches('.').to_string();
    if cleaned.is_empty() {
        format!("post-{}", short_digest(identifier))
    } else {
        cleaned
    }
}

/// First 10 hex characters of the SHA-256 of `input`.
pub fn short_digest(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    hex::encode(digest)[..10].to_string()
}

/// Write `bytes` to `path` unless the file already holds exactly those bytes.
///
/// Writes go to a temp file in the same directory which is then renamed over
/// the target, so readers never observe a partial file.
pub fn write_if_changed(path: &Path, bytes: &[u8]) -> Result<WriteResult, SyncError> {
    let write_failed = |source: io::Error| SyncError::WriteFailed {
        path: path.to_path_buf(),
        source,
    };

    let result = match fs::read(path) {
        Ok(existing) if existing == bytes => return Ok(WriteResult::Unchanged),
        Ok(_) => WriteResult::Updated,
        Err(e) if e.kind() == io::ErrorKind::NotFound => WriteResult::Created,
        Err(e) => return Err(write_failed(e)),
    };

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).map_err(write_failed)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(write_failed)?;
    tmp.write_all(bytes).map_err(write_failed)?;
    tmp.as_file().sync_all().map_err(write_failed)?;
    tmp.persist(path).map_err(|e| write_failed(e.error))?;
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{FrontMatter, MarkdownDocument};
    use tempfile::tempdir;

    fn document(identifier: &str, body: &str) -> MarkdownDocument {
        MarkdownDocument {
            identifier: identifier.to_string(),
            front_matter: FrontMatter {
                title: "Title".into(),
                date: "2024-03-01 09:30:00".into(),
                permalink: format!("/posts/{identifier}/"),
                categories: vec!["News".into()],
                tags: vec!["wordpress".into()],
            },
            body: body.to_string(),
        }
    }

    #[test]
    fn path_depends_only_on_identifier() {
        let writer = OutputWriter::new("/site/source/_posts");
        assert_eq!(
            writer.path_for("hello-world"),
            PathBuf::from("/site/source/_posts/hello-world.md")
        );
        assert_eq!(writer.path_for("hello-world"), writer.path_for("hello-world"));
    }

    #[test]
    fn sanitizes_reserved_characters() {
        assert_eq!(sanitize_identifier("a/b:c*d?"), "abcd");
        assert_eq!(sanitize_identifier("..hidden"), "hidden");
        assert_eq!(sanitize_identifier("%e4%b8%ad"), "%e4%b8%ad");
        let fallback = sanitize_identifier("///");
        assert!(fallback.starts_with("post-"));
        assert_eq!(fallback, sanitize_identifier("///"));
    }

    #[test]
    fn create_then_unchanged_then_updated() {
        let dir = tempdir().unwrap();
        let writer = OutputWriter::new(dir.path().join("_posts"));

        let doc = document("first", "Hello");
        assert_eq!(writer.write(&doc).unwrap(), WriteResult::Created);
        let path = writer.path_for("first");
        let modified = fs::metadata(&path).unwrap().modified().unwrap();

        assert_eq!(writer.write(&doc).unwrap(), WriteResult::Unchanged);
        assert_eq!(fs::metadata(&path).unwrap().modified().unwrap(), modified);

        let changed = document("first", "Hello again");
        assert_eq!(writer.write(&changed).unwrap(), WriteResult::Updated);
        assert_eq!(fs::read_to_string(&path).unwrap(), changed.render());
    }

    #[test]
    fn write_into_a_file_path_fails() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, "not a directory").unwrap();
        let writer = OutputWriter::new(&blocker);
        let err = writer.write(&document("x", "body")).unwrap_err();
        assert!(matches!(err, SyncError::WriteFailed { .. }));
    }

    #[test]
    fn prune_removes_only_stale_generated_files() {
        let dir = tempdir().unwrap();
        let writer = OutputWriter::new(dir.path());
        writer.write(&document("kept", "a")).unwrap();
        writer.write(&document("stale", "b")).unwrap();
        fs::write(dir.path().join("handwritten.md"), "---\ntitle: mine\n---\n\nhi\n").unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let keep: HashSet<String> = ["kept".to_string()].into_iter().collect();
        let removed = writer.prune(&keep).unwrap();

        assert_eq!(removed, vec![dir.path().join("stale.md")]);
        assert!(dir.path().join("kept.md").exists());
        assert!(dir.path().join("handwritten.md").exists());
        assert!(dir.path().join("notes.txt").exists());
    }

    #[test]
    fn prune_of_missing_root_is_noop() {
        let dir = tempdir().unwrap();
        let writer = OutputWriter::new(dir.path().join("absent"));
        assert!(writer.prune(&HashSet::new()).unwrap().is_empty());
    }
}
