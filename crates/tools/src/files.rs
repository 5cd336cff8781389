//! File tools: read, write, exact-match edit.
//!
//! Results are user-facing strings, not errors — the model sees them as
//! tool output.

use std::path::{Path, PathBuf};

/// Expand a leading `~` to the home directory.
fn expand_path(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            return Path::new(&home).join(rest);
        }
    }
    PathBuf::from(path)
}

/// Read a file, truncating past `cap` bytes.
pub fn read_file(path: &str, cap: usize) -> String {
    let resolved = expand_path(path);

    if !resolved.exists() {
        return format!("Error: File not found: {path}");
    }
    if !resolved.is_file() {
        return format!("Error: Not a file: {path}");
    }

    match std::fs::read_to_string(&resolved) {
        Ok(content) if content.len() > cap => {
            let mut cut = cap;
            while cut > 0 && !content.is_char_boundary(cut) {
                cut -= 1;
            }
            format!("{}\n\n[truncated]", &content[..cut])
        }
        Ok(content) => content,
        Err(e) => format!("Error: {e}"),
    }
}

/// Write (create or overwrite) a file, creating parent directories.
pub fn write_file(path: &str, content: &str) -> String {
    let resolved = expand_path(path);

    if let Some(parent) = resolved.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            return format!("Error: {e}");
        }
    }
    match std::fs::write(&resolved, content) {
        Ok(()) => format!("Successfully wrote {} bytes to {path}", content.len()),
        Err(e) => format!("Error: {e}"),
    }
}

/// Replace exactly one occurrence of `old_text` with `new_text`.
pub fn edit_file(path: &str, old_text: &str, new_text: &str) -> String {
    let resolved = expand_path(path);

    if !resolved.exists() {
        return format!("Error: File not found: {path}");
    }

    let content = match std::fs::read_to_string(&resolved) {
        Ok(c) => c,
        Err(e) => return format!("Error: {e}"),
    };

    let occurrences = content.matches(old_text).count();
    if occurrences == 0 {
        return format!("Error: Text not found in {path}");
    }
    if occurrences > 1 {
        return "Error: Text found multiple times - be more specific".into();
    }

    match std::fs::write(&resolved, content.replacen(old_text, new_text, 1)) {
        Ok(()) => format!("Successfully edited {path}"),
        Err(e) => format!("Error: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("note.txt");
        let path_str = path.to_str().unwrap();

        let msg = write_file(path_str, "hello");
        assert!(msg.starts_with("Successfully wrote 5 bytes"));
        assert_eq!(read_file(path_str, 64_000), "hello");
    }

    #[test]
    fn read_missing_file_is_an_error_string() {
        let out = read_file("/nonexistent/definitely/missing.txt", 64_000);
        assert!(out.starts_with("Error: File not found"));
    }

    #[test]
    fn read_truncates_at_cap() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.txt");
        std::fs::write(&path, "x".repeat(500)).unwrap();
        let out = read_file(path.to_str().unwrap(), 100);
        assert!(out.ends_with("[truncated]"));
    }

    #[test]
    fn edit_requires_unique_match() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("code.txt");
        let path_str = path.to_str().unwrap();
        std::fs::write(&path, "foo bar foo").unwrap();

        let out = edit_file(path_str, "foo", "baz");
        assert!(out.starts_with("Error: Text found multiple times"));

        let out = edit_file(path_str, "bar", "qux");
        assert!(out.starts_with("Successfully edited"));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "foo qux foo");

        let out = edit_file(path_str, "zzz", "y");
        assert!(out.starts_with("Error: Text not found"));
    }
}
