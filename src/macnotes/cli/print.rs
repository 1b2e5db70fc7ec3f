use chrono::{DateTime, Utc};
use colored::Colorize;
use macnotes::config::Settings;
use macnotes::{Identifier, NoteRecord};
use serde::Serialize;
use timeago::Formatter;
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

const NAME_WIDTH: usize = 30;
const MIN_FOLDER_WIDTH: usize = 10;
const MIN_BODY_WIDTH: usize = 30;
const PADDING: usize = 2;
const MISSING: &str = "---";

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub(super) struct AccountInfo {
    pub id: Identifier,
    pub name: String,
    pub notes_count: usize,
    pub default_folder: String,
}

pub(super) fn print_accounts(accounts: &[AccountInfo]) {
    for account in accounts {
        println!("{}:", account.name.bold());
        println!("  id: {}", account.id);
        println!("  name: {}", account.name);
        println!("  notes_count: {}", account.notes_count);
        println!("  default_folder: {}", account.default_folder);
    }
}

pub(super) fn terminal_width() -> usize {
    console::Term::stdout().size().1 as usize
}

/// Folder / Name / Body columns sized to `width`.
pub(super) fn format_notes_list(
    folders: &[String],
    names: &[String],
    bodies: &[String],
    width: usize,
) -> Vec<String> {
    let folder_width = folders
        .iter()
        .map(|f| f.width())
        .max()
        .unwrap_or(MIN_FOLDER_WIDTH)
        .max("Folder".len());
    let body_width = width
        .saturating_sub(NAME_WIDTH + folder_width + PADDING * 3)
        .max(MIN_BODY_WIDTH);
    let gap = " ".repeat(PADDING);

    let mut lines = vec![format!(
        "{}{gap}{}{gap}{}",
        pad_to_width("Folder", folder_width),
        pad_to_width("Name", NAME_WIDTH),
        "Body"
    )];
    for ((folder, name), body) in folders.iter().zip(names).zip(bodies) {
        let body = body.replace('\n', " ");
        lines.push(format!(
            "{}{gap}{}{gap}{}",
            pad_to_width(or_missing(folder), folder_width),
            pad_to_width(&truncate_to_width(or_missing(name), NAME_WIDTH - PADDING), NAME_WIDTH),
            truncate_to_width(or_missing(&body), body_width - PADDING).trim_end()
        ));
    }
    lines
}

fn or_missing(text: &str) -> &str {
    if text.trim().is_empty() {
        MISSING
    } else {
        text
    }
}

fn pad_to_width(s: &str, width: usize) -> String {
    format!("{}{}", s, " ".repeat(width.saturating_sub(s.width())))
}

const ELLIPSIS: &str = "..";

/// Cut `s` to at most `max_width` columns, marking the cut with "..".
pub(super) fn truncate_to_width(s: &str, max_width: usize) -> String {
    if s.width() <= max_width {
        return s.to_string();
    }

    let budget = max_width.saturating_sub(ELLIPSIS.width());
    let mut result = String::new();
    let mut current_width = 0;
    for c in s.chars() {
        let char_width = c.width().unwrap_or(0);
        if current_width + char_width > budget {
            break;
        }
        result.push(c);
        current_width += char_width;
    }
    result.push_str(ELLIPSIS);
    result
}

pub(super) fn print_notes_list(folders: &[String], names: &[String], bodies: &[String]) {
    if names.is_empty() {
        println!("No notes found.");
        return;
    }
    let mut lines = format_notes_list(folders, names, bodies, terminal_width()).into_iter();
    if let Some(header) = lines.next() {
        println!("{}", header.bold());
    }
    for line in lines {
        println!("{}", line);
    }
}

pub(super) fn format_time_ago(timestamp: DateTime<Utc>) -> String {
    let duration = Utc::now().signed_duration_since(timestamp);
    Formatter::new().convert(duration.to_std().unwrap_or_default())
}

pub(super) fn print_note_header(record: &NoteRecord) {
    let modified = record
        .modification_date
        .map(format_time_ago)
        .unwrap_or_default();
    println!(
        "{} {}",
        record.name.bold(),
        format!("({} / {}, modified {})", record.account, record.folder, modified).dimmed()
    );
    println!("--------------------------------");
}

/// `cat --json` shape: `body` holds the requested format and `plaintext` is dropped.
pub(super) fn cat_json(records: Vec<NoteRecord>, plaintext: bool) -> serde_json::Result<String> {
    let values = records
        .into_iter()
        .map(|record| {
            let mut value = serde_json::to_value(&record)?;
            if let Some(map) = value.as_object_mut() {
                let text = map.remove("plaintext");
                if plaintext {
                    if let Some(text) = text {
                        map.insert("body".to_string(), text);
                    }
                }
            }
            Ok(value)
        })
        .collect::<serde_json::Result<Vec<_>>>()?;
    serde_json::to_string_pretty(&values)
}

pub(super) fn dump_lines(record: &NoteRecord, no_body: bool) -> Vec<String> {
    let date = |d: Option<DateTime<Utc>>| d.map(|d| d.to_rfc3339()).unwrap_or_default();
    let mut lines = vec![
        format!("note.id={}", record.id),
        format!("note.name={}", record.name),
        format!("note.folder={}", record.folder),
        format!("note.account={}", record.account),
        format!("note.creation_date={}", date(record.creation_date)),
        format!("note.modification_date={}", date(record.modification_date)),
        format!("note.password_protected={}", record.password_protected),
    ];
    if !no_body {
        lines.push(format!("note.body={}", record.body));
        lines.push(format!("note.plaintext={}", record.plaintext));
    }
    lines
}

pub(super) fn print_settings(settings: &Settings, editor: &str) {
    let defaults = &settings.defaults;
    let unset = "(Notes default)".dimmed().to_string();
    println!(
        "account = {}",
        defaults.account.clone().unwrap_or_else(|| unset.clone())
    );
    println!("folder = {}", defaults.folder.clone().unwrap_or(unset));
    println!("format = {}", defaults.format);
    println!("editor = {} ({})", defaults.editor, editor);
}
