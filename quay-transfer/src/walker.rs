//! Directory scanning for the sending side of a session.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, NaiveDateTime};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use tracing::warn;
use walkdir::WalkDir;

use crate::error::{Result, TransferError};

/// At most this many files per scan; the rest wait for the next cycle.
pub const SCAN_LIMIT: usize = 10_000;

/// A comma-separated glob set matched against file names (not paths),
/// case-insensitively: `*.XML,*.CSV` takes `data.xml` too.
#[derive(Debug, Clone)]
pub struct MatchRules {
    set: GlobSet,
}

impl MatchRules {
    pub fn parse(match_name: &str) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in match_name.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let glob = GlobBuilder::new(pattern)
                .case_insensitive(true)
                .build()
                .map_err(|source| TransferError::BadPattern {
                    pattern: pattern.to_string(),
                    source,
                })?;
            builder.add(glob);
        }
        let set = builder.build().map_err(|source| TransferError::BadPattern {
            pattern: match_name.to_string(),
            source,
        })?;
        Ok(Self { set })
    }

    pub fn matches(&self, file_name: &str) -> bool {
        self.set.is_match(file_name)
    }
}

/// One transferable file as seen by a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub path: PathBuf,
    pub mtime: NaiveDateTime,
    pub size: u64,
}

/// Walk `root` (recursively iff `recursive`) collecting files whose name
/// matches `rules`, up to [`SCAN_LIMIT`].
///
/// The walk itself is blocking and runs on the blocking thread pool.
/// Unreadable entries are logged and skipped; a missing root yields an
/// empty scan, since outboxes commonly appear only when a producer first
/// writes into them.
pub async fn scan(root: &Path, rules: &MatchRules, recursive: bool) -> Result<Vec<FileEntry>> {
    let root = root.to_path_buf();
    let rules = rules.clone();
    let entries = tokio::task::spawn_blocking(move || scan_blocking(&root, &rules, recursive))
        .await
        .map_err(|e| std::io::Error::other(e))?;
    Ok(entries)
}

fn scan_blocking(root: &Path, rules: &MatchRules, recursive: bool) -> Vec<FileEntry> {
    if !root.exists() {
        return Vec::new();
    }

    let mut walk = WalkDir::new(root).follow_links(false);
    if !recursive {
        walk = walk.max_depth(1);
    }

    let mut files = Vec::new();
    for entry in walk.into_iter() {
        if files.len() >= SCAN_LIMIT {
            break;
        }
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("scan skipping unreadable entry: {e}");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if !rules.matches(&name) {
            continue;
        }
        match entry.metadata() {
            Ok(meta) => {
                let mtime = meta
                    .modified()
                    .map(|t| DateTime::<Local>::from(t).naive_local())
                    .unwrap_or_else(|_| Local::now().naive_local());
                files.push(FileEntry {
                    path: entry.into_path(),
                    mtime,
                    size: meta.len(),
                });
            }
            Err(e) => warn!("scan skipping {}: {e}", entry.path().display()),
        }
    }

    // Deterministic transfer order.
    files.sort_by(|a, b| a.path.cmp(&b.path));
    files
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(path: &Path, bytes: &[u8]) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, bytes).unwrap();
    }

    #[test]
    fn rules_match_names_case_insensitively() {
        let rules = MatchRules::parse("*.XML,*.CSV").unwrap();
        assert!(rules.matches("a.xml"));
        assert!(rules.matches("B.CSV"));
        assert!(!rules.matches("c.json"));
    }

    #[tokio::test]
    async fn scan_respects_recursion_flag() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("top.xml"), b"1");
        touch(&dir.path().join("sub/nested.xml"), b"22");

        let rules = MatchRules::parse("*.xml").unwrap();

        let flat = scan(dir.path(), &rules, false).await.unwrap();
        assert_eq!(flat.len(), 1);
        assert!(flat[0].path.ends_with("top.xml"));

        let deep = scan(dir.path(), &rules, true).await.unwrap();
        assert_eq!(deep.len(), 2);
        assert_eq!(deep[1].size, 2);
    }

    #[tokio::test]
    async fn scan_of_missing_root_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let rules = MatchRules::parse("*").unwrap();
        let got = scan(&dir.path().join("absent"), &rules, true).await.unwrap();
        assert!(got.is_empty());
    }
}
