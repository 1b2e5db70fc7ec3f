use crate::config::DEFAULT_EDITOR;
use crate::error::{NotesError, Result};
use std::env;
use std::fs;
use std::path::Path;
use std::process::Command;
use std::sync::atomic::{AtomicUsize, Ordering};

static EDIT_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// Picks the editor command.
/// A configured editor wins; otherwise checks $VISUAL, then falls back to common editors.
pub fn get_editor(configured: &str) -> Result<String> {
    if !configured.is_empty() && configured != DEFAULT_EDITOR {
        return Ok(configured.to_string());
    }

    if let Ok(editor) = env::var("VISUAL") {
        if !editor.is_empty() {
            return Ok(editor);
        }
    }

    for fallback in &["vim", "vi", "nano"] {
        if Command::new("which")
            .arg(fallback)
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
        {
            return Ok((*fallback).to_string());
        }
    }

    Err(NotesError::Api(
        "No editor found. Set $EDITOR or run `notes config --editor`.".to_string(),
    ))
}

/// Opens a file in the editor and waits for it to close.
/// Returns the contents of the file after editing.
pub fn open_in_editor<P: AsRef<Path>>(editor: &str, file_path: P) -> Result<String> {
    let path = file_path.as_ref();

    // Editors configured with flags, e.g. "code --wait".
    let mut parts = editor.split_whitespace();
    let program = parts
        .next()
        .ok_or_else(|| NotesError::Api("Editor command is empty".to_string()))?;

    let status = Command::new(program)
        .args(parts)
        .arg(path)
        .status()
        .map_err(|e| NotesError::Api(format!("Failed to launch editor '{}': {}", editor, e)))?;

    if !status.success() {
        return Err(NotesError::Api(format!(
            "Editor '{}' exited with non-zero status",
            editor
        )));
    }

    Ok(fs::read_to_string(path)?)
}

/// Opens the editor on `initial` and returns the edited text.
/// The temporary file gets `extension` so editors pick the right syntax.
pub fn edit_text(editor: &str, initial: &str, extension: &str) -> Result<String> {
    let temp_file = env::temp_dir().join(format!(
        "macnotes_edit_{}_{}{}",
        std::process::id(),
        EDIT_COUNTER.fetch_add(1, Ordering::Relaxed),
        extension
    ));

    fs::write(&temp_file, initial)?;
    let result = open_in_editor(editor, &temp_file);
    let _ = fs::remove_file(&temp_file);

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configured_editor_wins() {
        assert_eq!(get_editor("nvim").unwrap(), "nvim");
    }

    #[cfg(unix)]
    #[test]
    fn test_edit_text_returns_file_contents() {
        // `true` leaves the file untouched.
        let edited = edit_text("true", "Title\nbody", ".md").unwrap();
        assert_eq!(edited, "Title\nbody");
    }

    #[cfg(unix)]
    #[test]
    fn test_failing_editor() {
        let err = edit_text("false", "x", ".txt").unwrap_err();
        assert!(err.to_string().contains("non-zero status"));
    }

    #[test]
    fn test_missing_editor_binary() {
        let err = edit_text("macnotes-no-such-editor", "x", ".txt").unwrap_err();
        assert!(err.to_string().contains("Failed to launch editor"));
    }
}
