//! Sandbox file operations.

use regex::Regex;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Recursively copies `src` into `dst`, creating `dst`.
pub fn copy_dir(src: &Path, dst: &Path) -> io::Result<()> {
    std::fs::create_dir_all(dst)?;
    for entry in WalkDir::new(src).min_depth(1) {
        let entry = entry.map_err(io::Error::other)?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(io::Error::other)?;
        let target = dst.join(rel);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Compiles a file wildcard into an anchored regex over `/`-separated
/// relative paths. `*` and `?` stay within one path segment, `**` does not.
pub fn wildcard_to_regex(pattern: &str) -> Result<Regex, regex::Error> {
    let mut out = String::from("^");
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' if chars.peek() == Some(&'*') => {
                chars.next();
                out.push_str(".*");
            }
            '*' => out.push_str("[^/]*"),
            '?' => out.push_str("[^/]"),
            c => out.push_str(&regex::escape(&c.to_string())),
        }
    }
    out.push('$');
    Regex::new(&out)
}

/// `/`-separated form of a relative path.
pub fn rel_string(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Moves files under `from` matching any pattern to the same relative
/// location under `to`. Best effort: failures are logged and skipped.
/// Returns the relative paths that were moved.
pub fn move_matching(from: &Path, to: &Path, patterns: &[String]) -> Vec<PathBuf> {
    let regexes: Vec<Regex> = patterns
        .iter()
        .filter_map(|pattern| match wildcard_to_regex(pattern) {
            Ok(regex) => Some(regex),
            Err(e) => {
                warn!(pattern = %pattern, error = %e, "Ignoring malformed keep pattern");
                None
            }
        })
        .collect();

    let mut moved = Vec::new();
    for entry in WalkDir::new(from).min_depth(1).into_iter().filter_map(Result::ok) {
        if entry.file_type().is_dir() {
            continue;
        }
        let Ok(rel) = entry.path().strip_prefix(from) else {
            continue;
        };
        let rel_str = rel_string(rel);
        if !regexes.iter().any(|regex| regex.is_match(&rel_str)) {
            continue;
        }

        let target = to.join(rel);
        let result = target
            .parent()
            .map_or(Ok(()), std::fs::create_dir_all)
            .and_then(|_| move_file(entry.path(), &target));
        match result {
            Ok(()) => moved.push(rel.to_path_buf()),
            Err(e) => warn!(file = %rel_str, error = %e, "Failed to keep file"),
        }
    }
    moved
}

fn move_file(src: &Path, dst: &Path) -> io::Result<()> {
    if std::fs::rename(src, dst).is_ok() {
        return Ok(());
    }
    std::fs::copy(src, dst)?;
    std::fs::remove_file(src)
}

/// Removes a directory tree, logging instead of failing.
pub fn remove_tree(path: &Path) {
    if let Err(e) = std::fs::remove_dir_all(path) {
        if e.kind() != io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "Failed to remove directory");
        }
    } else {
        debug!(path = %path.display(), "Removed directory");
    }
}
