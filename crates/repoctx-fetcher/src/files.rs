//! Snapshot enumeration: which files get chunked
//!
//! Walks a checkout in path order, prunes ignored directories, and sorts every
//! remaining file into one of three buckets: text to chunk, skipped (binary,
//! oversized or filtered by extension), or failed (unreadable or
//! undecodable).

use crate::error::{FetchError, FetchResult};
use repoctx_config::FetchConfig;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

/// Directory names never descended into
pub const IGNORED_DIRS: &[&str] = &[
    ".git",
    ".hg",
    ".svn",
    "node_modules",
    "vendor",
    "target",
    "dist",
    "build",
    "__pycache__",
    ".venv",
    "venv",
    ".tox",
    ".idea",
    ".vscode",
];

/// Bytes inspected for NUL when deciding whether a file is binary
const BINARY_SNIFF_BYTES: usize = 8000;

/// Which files make it into the chunker
#[derive(Debug, Clone)]
pub struct FileFilter {
    max_file_bytes: u64,
    /// Lowercase extensions without the dot; empty accepts every extension
    include_extensions: HashSet<String>,
}

impl FileFilter {
    pub fn new<I, S>(max_file_bytes: u64, include_extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            max_file_bytes,
            include_extensions: include_extensions
                .into_iter()
                .map(|ext| ext.as_ref().trim().trim_start_matches('.').to_lowercase())
                .filter(|ext| !ext.is_empty())
                .collect(),
        }
    }

    pub fn from_config(config: &FetchConfig) -> Self {
        Self::new(config.max_file_bytes, &config.include_extensions)
    }

    /// Replace the extension allow-list
    #[must_use]
    pub fn with_extensions<I, S>(self, include_extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::new(self.max_file_bytes, include_extensions)
    }

    fn accepts_extension(&self, path: &Path) -> bool {
        if self.include_extensions.is_empty() {
            return true;
        }
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| self.include_extensions.contains(&ext.to_lowercase()))
    }
}

/// A decoded text file ready for chunking
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    /// Path relative to the snapshot root, `/`-separated
    pub path: String,
    pub content: String,
}

/// Why a file was left out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Binary,
    Oversized,
    Extension,
}

/// A file that could not be read or decoded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedFile {
    pub path: String,
    pub message: String,
}

/// Result of walking one snapshot
#[derive(Debug, Clone, Default)]
pub struct FileScan {
    pub files: Vec<SourceFile>,
    pub skipped: Vec<(String, SkipReason)>,
    pub failed: Vec<FailedFile>,
}

impl FileScan {
    pub fn skipped_count(&self, reason: SkipReason) -> usize {
        self.skipped.iter().filter(|(_, r)| *r == reason).count()
    }
}

enum Decoded {
    Text(String),
    Binary,
    Malformed(&'static str),
}

/// Decode file bytes, honouring a BOM when present
///
/// Without a BOM, NUL bytes in the leading block mark the file binary and
/// anything that is not valid UTF-8 is malformed.
fn decode(bytes: &[u8]) -> Decoded {
    if let Some((encoding, bom_length)) = encoding_rs::Encoding::for_bom(bytes) {
        let body = bytes.get(bom_length..).unwrap_or_default();
        let (text, malformed) = encoding.decode_without_bom_handling(body);
        return if malformed {
            Decoded::Malformed(encoding.name())
        } else {
            Decoded::Text(text.into_owned())
        };
    }

    let head = bytes.get(..BINARY_SNIFF_BYTES).unwrap_or(bytes);
    if head.contains(&0) {
        return Decoded::Binary;
    }

    match std::str::from_utf8(bytes) {
        Ok(text) => Decoded::Text(text.to_string()),
        Err(_) => Decoded::Malformed("UTF-8"),
    }
}

fn is_ignored_dir(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| IGNORED_DIRS.contains(&name))
}

fn relative_path(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Walk `root` synchronously; call from a blocking context
///
/// # Errors
/// Returns `FetchError::Io` if `root` itself cannot be read. Errors on
/// individual entries are recorded in `FileScan::failed`.
pub fn scan_files(root: &Path, filter: &FileFilter) -> FetchResult<FileScan> {
    if !root.is_dir() {
        return Err(FetchError::Io(format!(
            "snapshot root {} is not a directory",
            root.display()
        )));
    }

    let mut scan = FileScan::default();
    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| !is_ignored_dir(entry));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                let path = e
                    .path()
                    .map(|p| relative_path(root, p))
                    .unwrap_or_default();
                scan.failed.push(FailedFile {
                    path,
                    message: e.to_string(),
                });
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let path = relative_path(root, entry.path());
        if !filter.accepts_extension(entry.path()) {
            scan.skipped.push((path, SkipReason::Extension));
            continue;
        }

        match entry.metadata() {
            Ok(meta) if meta.len() > filter.max_file_bytes => {
                scan.skipped.push((path, SkipReason::Oversized));
                continue;
            }
            Ok(_) => {}
            Err(e) => {
                scan.failed.push(FailedFile {
                    path,
                    message: e.to_string(),
                });
                continue;
            }
        }

        let bytes = match std::fs::read(entry.path()) {
            Ok(bytes) => bytes,
            Err(e) => {
                scan.failed.push(FailedFile {
                    path,
                    message: e.to_string(),
                });
                continue;
            }
        };

        match decode(&bytes) {
            Decoded::Text(content) => scan.files.push(SourceFile { path, content }),
            Decoded::Binary => scan.skipped.push((path, SkipReason::Binary)),
            Decoded::Malformed(encoding) => scan.failed.push(FailedFile {
                path,
                message: format!("not valid {encoding} text"),
            }),
        }
    }

    tracing::debug!(
        files = scan.files.len(),
        skipped = scan.skipped.len(),
        failed = scan.failed.len(),
        "Scanned snapshot"
    );
    Ok(scan)
}

/// Walk `root` on the blocking pool
///
/// # Errors
/// See [`scan_files`]; a panicked walker is reported as `FetchError::Task`
pub async fn scan_files_blocking(root: PathBuf, filter: FileFilter) -> FetchResult<FileScan> {
    tokio::task::spawn_blocking(move || scan_files(&root, &filter))
        .await
        .map_err(|e| FetchError::Task(e.to_string()))?
}
