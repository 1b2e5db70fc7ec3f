use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum NotesError {
    /// A named account, folder or note does not exist.
    #[error("Could not find {kind} {key}")]
    Lookup { kind: &'static str, key: String },

    /// The automation host rejected or failed a call. The message is the host's own.
    #[error("Automation error in {routine}: {message}")]
    Host { routine: String, message: String },

    /// Neither backend managed to store the value.
    #[error("Could not set {attribute} of note {id}")]
    WriteVerification { attribute: &'static str, id: String },

    #[error("File not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{0}")]
    Api(String),
}

impl NotesError {
    pub fn lookup(kind: &'static str, key: impl Into<String>) -> Self {
        NotesError::Lookup {
            kind,
            key: key.into(),
        }
    }

    pub fn host(routine: impl Into<String>, message: impl Into<String>) -> Self {
        NotesError::Host {
            routine: routine.into(),
            message: message.into(),
        }
    }
}

impl From<toml::de::Error> for NotesError {
    fn from(err: toml::de::Error) -> Self {
        NotesError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for NotesError {
    fn from(err: toml::ser::Error) -> Self {
        NotesError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, NotesError>;
