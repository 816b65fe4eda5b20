//! Collects source files from disk for packing.

use std::fs;
use std::path::Path;

use glob::{MatchOptions, Pattern};
use tracing::{debug, warn};

use super::{ArchiveError, SourceFile};

/// Pattern semantics for `include`: `*` stays within one path segment and
/// wildcards never match a leading `.`, so hidden files and directories
/// (`.git`, a `.courier` store next to the sources) are only picked up by
/// patterns that name them literally.
const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: true,
};

/// Read every file under `root` whose root-relative path matches one of `include`.
///
/// Paths are `/`-separated and relative to `root`. Symlinked directories are not
/// followed. An unreadable file or an empty selection is an error.
pub fn collect_sources(root: &Path, include: &[String]) -> Result<Vec<SourceFile>, ArchiveError> {
    let patterns = include
        .iter()
        .map(|p| {
            Pattern::new(p).map_err(|e| ArchiveError::InvalidPattern {
                pattern: p.clone(),
                message: e.to_string(),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut files = Vec::new();
    walk(root, root, &patterns, &mut files)?;

    if files.is_empty() {
        return Err(ArchiveError::NoFilesMatched {
            root: root.display().to_string(),
            patterns: include.to_vec(),
        });
    }

    files.sort_by(|a, b| a.path.cmp(&b.path));
    debug!(count = files.len(), root = %root.display(), "collected source files");
    Ok(files)
}

fn walk(
    base: &Path,
    current: &Path,
    patterns: &[Pattern],
    files: &mut Vec<SourceFile>,
) -> Result<(), ArchiveError> {
    let unreadable = |path: &Path, source: std::io::Error| ArchiveError::Unreadable {
        path: path.display().to_string(),
        source,
    };

    let entries = fs::read_dir(current).map_err(|e| unreadable(current, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| unreadable(current, e))?;
        let path = entry.path();
        let file_type = entry.file_type().map_err(|e| unreadable(&path, e))?;

        if file_type.is_dir() {
            walk(base, &path, patterns, files)?;
            continue;
        }

        let is_file = if file_type.is_symlink() {
            match fs::metadata(&path) {
                Ok(meta) => meta.is_file(),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping dangling symlink");
                    false
                }
            }
        } else {
            file_type.is_file()
        };
        if !is_file {
            continue;
        }

        let Ok(relative) = path.strip_prefix(base) else {
            continue;
        };
        let relative = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        if !patterns
            .iter()
            .any(|p| p.matches_with(&relative, MATCH_OPTIONS))
        {
            continue;
        }

        let content = fs::read(&path).map_err(|e| unreadable(&path, e))?;
        files.push(SourceFile {
            path: relative,
            content,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("index.html"), "<h1>hi</h1>").unwrap();
        fs::create_dir_all(dir.path().join("assets/img")).unwrap();
        fs::write(dir.path().join("assets/app.css"), "body{}").unwrap();
        fs::write(dir.path().join("assets/img/logo.svg"), "<svg/>").unwrap();
        fs::write(dir.path().join("notes.txt"), "draft").unwrap();
        dir
    }

    #[test]
    fn collects_matching_files_sorted() {
        let dir = tree();
        let files = collect_sources(
            dir.path(),
            &["*.html".to_string(), "assets/**/*".to_string()],
        )
        .unwrap();

        let paths: Vec<&str> = files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["assets/app.css", "assets/img/logo.svg", "index.html"]);
        assert_eq!(files[2].content, b"<h1>hi</h1>");
    }

    #[test]
    fn exact_name_selects_single_file() {
        let dir = tree();
        let files = collect_sources(dir.path(), &["index.html".to_string()]).unwrap();
        assert_eq!(files.len(), 1);
    }

    #[test]
    fn empty_selection_is_an_error() {
        let dir = tree();
        let err = collect_sources(dir.path(), &["*.pdf".to_string()]).unwrap_err();
        assert!(matches!(err, ArchiveError::NoFilesMatched { .. }));
    }

    #[test]
    fn star_does_not_cross_directories() {
        let dir = tree();
        fs::write(dir.path().join("assets/nested.html"), "<p/>").unwrap();

        let top = collect_sources(dir.path(), &["*.html".to_string()]).unwrap();
        let paths: Vec<&str> = top.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["index.html"]);

        let all = collect_sources(dir.path(), &["**/*.html".to_string()]).unwrap();
        let paths: Vec<&str> = all.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["assets/nested.html", "index.html"]);
    }

    #[test]
    fn hidden_entries_need_a_literal_pattern() {
        let dir = tree();
        let store = dir.path().join(".courier/buckets/sites/staging");
        fs::create_dir_all(&store).unwrap();
        fs::write(store.join("site.tar.gz"), "previous upload").unwrap();
        fs::write(dir.path().join(".env"), "SECRET=1").unwrap();
        fs::create_dir_all(dir.path().join(".well-known")).unwrap();
        fs::write(dir.path().join(".well-known/security.txt"), "contact").unwrap();

        let files = collect_sources(dir.path(), &["**/*".to_string()]).unwrap();
        assert!(files.iter().all(|f| !f.path.starts_with('.')));
        assert_eq!(files.len(), 4);

        let files = collect_sources(
            dir.path(),
            &["**/*".to_string(), ".well-known/*".to_string()],
        )
        .unwrap();
        assert!(files.iter().any(|f| f.path == ".well-known/security.txt"));
        assert!(files.iter().all(|f| !f.path.starts_with(".courier")));
    }

    #[test]
    fn invalid_pattern_is_an_error() {
        let dir = tree();
        let err = collect_sources(dir.path(), &["[".to_string()]).unwrap_err();
        assert!(matches!(err, ArchiveError::InvalidPattern { .. }));
    }

    #[test]
    fn missing_root_is_unreadable() {
        let dir = tree();
        let err = collect_sources(&dir.path().join("nope"), &["**/*".to_string()]).unwrap_err();
        assert!(matches!(err, ArchiveError::Unreadable { .. }));
    }
}
