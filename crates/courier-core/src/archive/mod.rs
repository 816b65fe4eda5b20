//! Archiver: deterministic packaging of source files into one artifact.
//!
//! The output is a gzip-compressed GNU tar stream. Everything that would normally
//! leak the build environment into the bytes is pinned:
//! - entries are written in byte-wise path order, whatever the input order
//! - mtime, uid/gid, owner names and mode are constants
//! - paths too long for the header go into GNU long-name records, which are
//!   themselves built from constants
//! - the gzip header carries mtime 0 and no file name
//!
//! so the same set of (path, bytes) always hashes the same.

mod sources;

pub use sources::collect_sources;

use std::collections::BTreeMap;
use std::io::Write;
use std::sync::Arc;

use flate2::{Compression, GzBuilder};
use thiserror::Error;
use tracing::{debug, info};

use crate::domain::{Artifact, ErrorKind};
use crate::ports::Clock;

/// One input file: archive path plus bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub path: String,
    pub content: Vec<u8>,
}

impl SourceFile {
    pub fn new(path: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("nothing to pack: the input file set is empty")]
    Empty,

    #[error("duplicate path in input: {0}")]
    DuplicatePath(String),

    #[error("invalid archive path `{0}` (must be relative, without `.`/`..` segments)")]
    InvalidPath(String),

    #[error("cannot read {path}: {source}")]
    Unreadable {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid include pattern `{pattern}`: {message}")]
    InvalidPattern { pattern: String, message: String },

    #[error("no files under {root} matched {patterns:?}")]
    NoFilesMatched { root: String, patterns: Vec<String> },

    #[error("failed to write archive: {0}")]
    Write(#[from] std::io::Error),
}

impl ArchiveError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::InvalidInput
    }
}

const ENTRY_MODE: u32 = 0o644;

/// Packs source files into an `Artifact`.
#[derive(Clone)]
pub struct Archiver {
    clock: Arc<dyn Clock>,
    level: Compression,
}

impl Archiver {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            level: Compression::default(),
        }
    }

    /// Package `files` into one artifact.
    ///
    /// Fails with an `InvalidInput`-kind error when the set is empty, a path is
    /// duplicated or a path is not a clean relative path.
    pub fn pack(&self, files: &[SourceFile]) -> Result<Artifact, ArchiveError> {
        if files.is_empty() {
            return Err(ArchiveError::Empty);
        }

        let mut ordered: BTreeMap<&str, &SourceFile> = BTreeMap::new();
        for file in files {
            validate_path(&file.path)?;
            if ordered.insert(file.path.as_str(), file).is_some() {
                return Err(ArchiveError::DuplicatePath(file.path.clone()));
            }
        }

        let gz = GzBuilder::new().mtime(0).write(Vec::new(), self.level);
        let mut tar = tar::Builder::new(gz);
        tar.mode(tar::HeaderMode::Deterministic);

        for (path, file) in &ordered {
            let mut header = tar::Header::new_gnu();
            header.set_entry_type(tar::EntryType::Regular);
            header.set_size(file.content.len() as u64);
            header.set_mode(ENTRY_MODE);
            header.set_mtime(0);
            header.set_uid(0);
            header.set_gid(0);
            header.set_username("")?;
            header.set_groupname("")?;
            // sets the path (with a long-name record when needed) and the checksum
            tar.append_data(&mut header, path, file.content.as_slice())?;
            debug!(path = %path, size = file.content.len(), "packed entry");
        }

        let mut gz = tar.into_inner()?;
        gz.flush()?;
        let content = gz.finish()?;

        let entries: Vec<String> = ordered.keys().map(|p| p.to_string()).collect();
        let artifact = Artifact::new(content, entries, self.clock.now());
        info!(
            entries = artifact.entries().len(),
            size = artifact.len(),
            hash = %artifact.content_hash().short(),
            "artifact packed"
        );
        Ok(artifact)
    }
}

fn validate_path(path: &str) -> Result<(), ArchiveError> {
    let invalid = path.is_empty()
        || path.starts_with('/')
        || path.contains('\\')
        || path.contains('\0')
        || path
            .split('/')
            .any(|seg| seg.is_empty() || seg == "." || seg == "..");
    if invalid {
        return Err(ArchiveError::InvalidPath(path.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ContentHash;
    use crate::ports::{FixedClock, SystemClock};
    use chrono::{TimeZone, Utc};
    use rstest::rstest;
    use std::io::Read;

    fn archiver() -> Archiver {
        Archiver::new(Arc::new(SystemClock))
    }

    fn site() -> Vec<SourceFile> {
        vec![
            SourceFile::new("index.html", "<h1>hello</h1>"),
            SourceFile::new("assets/app.css", "body { color: red }"),
            SourceFile::new("assets/app.js", "console.log(1)"),
        ]
    }

    #[test]
    fn same_input_packs_to_same_hash() {
        let a = archiver().pack(&site()).unwrap();
        let b = archiver().pack(&site()).unwrap();
        assert_eq!(a.content_hash(), b.content_hash());
        assert_eq!(a.content(), b.content());
    }

    #[test]
    fn input_order_does_not_matter() {
        let mut reversed = site();
        reversed.reverse();

        let a = archiver().pack(&site()).unwrap();
        let b = archiver().pack(&reversed).unwrap();
        assert_eq!(a.content_hash(), b.content_hash());
        assert_eq!(
            b.entries().to_vec(),
            vec!["assets/app.css", "assets/app.js", "index.html"]
        );
    }

    #[test]
    fn pack_time_does_not_leak_into_bytes() {
        let early = Archiver::new(Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap(),
        )));
        let late = Archiver::new(Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2030, 6, 1, 0, 0, 0).unwrap(),
        )));

        let a = early.pack(&site()).unwrap();
        let b = late.pack(&site()).unwrap();
        assert_ne!(a.created_at(), b.created_at());
        assert_eq!(a.content_hash(), b.content_hash());
    }

    #[test]
    fn different_content_changes_hash() {
        let mut changed = site();
        changed[0].content = b"<h1>bye</h1>".to_vec();

        let a = archiver().pack(&site()).unwrap();
        let b = archiver().pack(&changed).unwrap();
        assert_ne!(a.content_hash(), b.content_hash());
    }

    #[test]
    fn artifact_hash_is_sha256_of_bytes() {
        let a = archiver().pack(&site()).unwrap();
        assert_eq!(a.content_hash(), ContentHash::compute(a.content()));
    }

    #[test]
    fn archive_unpacks_to_input_files() {
        let a = archiver().pack(&site()).unwrap();
        let gz = flate2::read::GzDecoder::new(a.content());
        let mut archive = tar::Archive::new(gz);

        let mut seen = Vec::new();
        for entry in archive.entries().unwrap() {
            let mut entry = entry.unwrap();
            let path = entry.path().unwrap().to_string_lossy().to_string();
            assert_eq!(entry.header().mtime().unwrap(), 0);
            let mut body = String::new();
            entry.read_to_string(&mut body).unwrap();
            seen.push((path, body));
        }

        assert_eq!(seen.len(), 3);
        assert_eq!(seen[2], ("index.html".to_string(), "<h1>hello</h1>".to_string()));
    }

    #[test]
    fn empty_input_is_rejected() {
        let err = archiver().pack(&[]).unwrap_err();
        assert!(matches!(err, ArchiveError::Empty));
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn duplicate_paths_are_rejected() {
        let mut files = site();
        files.push(SourceFile::new("index.html", "again"));
        let err = archiver().pack(&files).unwrap_err();
        assert!(matches!(err, ArchiveError::DuplicatePath(p) if p == "index.html"));
    }

    #[test]
    fn long_paths_are_packed_and_deterministic() {
        let long_name = format!("assets/{}.js", "a".repeat(120));
        let deep_path = format!("{}index.html", "dir/".repeat(30));
        let files = vec![
            SourceFile::new(long_name.clone(), "x"),
            SourceFile::new(deep_path.clone(), "<h1>deep</h1>"),
            SourceFile::new("short.txt", "s"),
        ];

        let a = archiver().pack(&files).unwrap();
        let b = archiver().pack(&files).unwrap();
        assert_eq!(a.content_hash(), b.content_hash());

        let gz = flate2::read::GzDecoder::new(a.content());
        let mut archive = tar::Archive::new(gz);
        let paths: Vec<String> = archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(paths, vec![long_name, deep_path, "short.txt".to_string()]);
    }

    #[rstest]
    #[case::absolute("/etc/passwd")]
    #[case::parent("../secret")]
    #[case::inner_parent("a/../b")]
    #[case::dot("./index.html")]
    #[case::empty("")]
    #[case::backslash("a\\b")]
    #[case::trailing_slash("dir/")]
    fn unclean_paths_are_rejected(#[case] path: &str) {
        let err = archiver()
            .pack(&[SourceFile::new(path, "x")])
            .unwrap_err();
        assert!(matches!(err, ArchiveError::InvalidPath(_)), "{path}");
    }
}
