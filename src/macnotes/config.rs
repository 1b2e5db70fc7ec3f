use crate::convert::BodyFormat;
use crate::error::{NotesError, Result};
use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_FILENAME: &str = "macnotesapp.toml";
/// Overrides the directory holding [`CONFIG_FILENAME`].
pub const CONFIG_DIR_ENV: &str = "MACNOTES_CONFIG_DIR";
pub const DEFAULT_EDITOR: &str = "$EDITOR";

/// Defaults for `notes add`, stored in the `[defaults]` table.
///
/// `account` and `folder` are resolved from Notes at use time when unset.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Defaults {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder: Option<String>,

    #[serde(default)]
    pub format: BodyFormat,

    /// An editor command, or `$VAR` naming an environment variable.
    #[serde(default = "default_editor")]
    pub editor: String,
}

fn default_editor() -> String {
    DEFAULT_EDITOR.to_string()
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            account: None,
            folder: None,
            format: BodyFormat::default(),
            editor: default_editor(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Settings {
    #[serde(default)]
    pub defaults: Defaults,
}

impl Settings {
    /// Load settings from the given directory, or return defaults if not found
    pub fn load<P: AsRef<Path>>(config_dir: P) -> Result<Self> {
        let config_path = config_dir.as_ref().join(CONFIG_FILENAME);

        if !config_path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&config_path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Save settings to the given directory
    pub fn save<P: AsRef<Path>>(&self, config_dir: P) -> Result<PathBuf> {
        let config_dir = config_dir.as_ref();
        fs::create_dir_all(config_dir)?;

        let config_path = config_dir.join(CONFIG_FILENAME);
        fs::write(&config_path, toml::to_string(self)?)?;
        Ok(config_path)
    }

    /// The editor command, with `$VAR` looked up in the environment.
    pub fn editor(&self) -> String {
        resolve_editor(&self.defaults.editor, |var| env::var(var).ok())
    }
}

/// `$VAR` resolves to the variable's value; an unset or empty variable gives
/// [`DEFAULT_EDITOR`] back unchanged.
pub fn resolve_editor(value: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    match value.strip_prefix('$') {
        Some(var) => lookup(var)
            .filter(|v| !v.is_empty())
            .unwrap_or_else(default_editor),
        None => value.to_string(),
    }
}

/// `$MACNOTES_CONFIG_DIR`, else `~/.config/macnotesapp`.
pub fn config_dir() -> Result<PathBuf> {
    if let Ok(dir) = env::var(CONFIG_DIR_ENV) {
        if !dir.is_empty() {
            return Ok(PathBuf::from(dir));
        }
    }
    let base = BaseDirs::new()
        .ok_or_else(|| NotesError::Config("could not determine home directory".to_string()))?;
    Ok(base.home_dir().join(".config").join("macnotesapp"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_load_missing_config() {
        let dir = tempdir().unwrap();
        let settings = Settings::load(dir.path()).unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.defaults.editor, "$EDITOR");
        assert_eq!(settings.defaults.format, BodyFormat::Plaintext);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let mut settings = Settings::default();
        settings.defaults.account = Some("iCloud".to_string());
        settings.defaults.format = BodyFormat::Markdown;
        let path = settings.save(dir.path()).unwrap();
        assert_eq!(path, dir.path().join(CONFIG_FILENAME));

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains("[defaults]"));
        assert!(content.contains("format = \"Markdown\""));
        assert_eq!(Settings::load(dir.path()).unwrap(), settings);
    }

    #[test]
    fn test_partial_file() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join(CONFIG_FILENAME),
            "[defaults]\nfolder = \"Inbox\"\nformat = \"HTML\"\n",
        )
        .unwrap();
        let settings = Settings::load(dir.path()).unwrap();
        assert_eq!(settings.defaults.folder.as_deref(), Some("Inbox"));
        assert_eq!(settings.defaults.account, None);
        assert_eq!(settings.defaults.format, BodyFormat::Html);
    }

    #[test]
    fn test_invalid_format_is_config_error() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join(CONFIG_FILENAME),
            "[defaults]\nformat = \"rtf\"\n",
        )
        .unwrap();
        assert!(matches!(
            Settings::load(dir.path()),
            Err(NotesError::Config(_))
        ));
    }

    #[test]
    fn test_resolve_editor() {
        let lookup = |var: &str| (var == "EDITOR").then(|| "hx".to_string());
        assert_eq!(resolve_editor("$EDITOR", lookup), "hx");
        assert_eq!(resolve_editor("$VISUAL", lookup), "$EDITOR");
        assert_eq!(resolve_editor("/usr/bin/vim", lookup), "/usr/bin/vim");
    }
}
