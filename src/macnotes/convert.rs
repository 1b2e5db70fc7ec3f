//! Turning user text into note bodies.
//!
//! Notes stores HTML. Text typed on the command line is split into a name (the first
//! line) and a body, and the body is converted according to its [`BodyFormat`].

use pulldown_cmark::{html, Options, Parser};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Format of the body text a user supplies.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
pub enum BodyFormat {
    #[default]
    #[serde(rename = "plaintext")]
    Plaintext,
    #[serde(rename = "HTML")]
    Html,
    #[serde(rename = "Markdown")]
    Markdown,
}

impl BodyFormat {
    /// Extension of the temporary file handed to the editor.
    pub fn extension(&self) -> &'static str {
        match self {
            BodyFormat::Plaintext => ".txt",
            BodyFormat::Html => ".html",
            BodyFormat::Markdown => ".md",
        }
    }
}

impl fmt::Display for BodyFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BodyFormat::Plaintext => "plaintext",
            BodyFormat::Html => "HTML",
            BodyFormat::Markdown => "Markdown",
        })
    }
}

/// Split note text into `(name, body)` at the first newline, after trimming.
pub fn split_note_text(text: &str) -> (String, String) {
    match text.trim().split_once('\n') {
        Some((name, body)) => (name.trim_end_matches('\r').to_string(), body.to_string()),
        None => (text.trim().to_string(), String::new()),
    }
}

/// Escape text for use inside HTML markup.
pub fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// One `<div>` per line; empty lines become `<div><br></div>`.
pub fn plaintext_to_html(body: &str) -> String {
    body.split('\n')
        .map(|line| {
            let line = line.trim_end_matches('\r');
            if line.is_empty() {
                "<div><br></div>\n".to_string()
            } else {
                format!("<div>{}</div>\n", escape(line))
            }
        })
        .collect()
}

/// CommonMark with tables and footnotes.
pub fn markdown_to_html(body: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_FOOTNOTES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    let parser = Parser::new_ext(body, options);
    let mut out = String::new();
    html::push_html(&mut out, parser);
    out
}

/// Convert a body to the HTML Notes stores.
pub fn body_html(format: BodyFormat, body: &str) -> String {
    match format {
        BodyFormat::Plaintext => plaintext_to_html(body),
        BodyFormat::Html => body.to_string(),
        BodyFormat::Markdown => markdown_to_html(body),
    }
}
