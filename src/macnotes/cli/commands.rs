//! # CLI Layer
//!
//! One client of the macnotes library. This is the only place that:
//! - Knows about terminal I/O (stdout, stderr, stdin)
//! - Reads the preferences file
//! - Formats output for humans
//!
//! Commands that only touch preferences (`notes config`) run without Notes. Everything
//! else connects once through [`NotesApp::connect`].

use super::print::{
    cat_json, dump_lines, print_accounts, print_note_header, print_notes_list, print_settings,
    AccountInfo,
};
use super::setup::{AddArgs, Cli, Commands, ConfigArgs};
use clap::Parser;
use colored::Colorize;
use log::{debug, warn};
use macnotes::config::{config_dir, Settings};
use macnotes::convert::{body_html, split_note_text, BodyFormat};
use macnotes::editor::{edit_text, get_editor};
use macnotes::error::{NotesError, Result};
use macnotes::logging::{init_logging, level_for};
use macnotes::readable::fetch_readable;
use macnotes::{NoteFilter, NotesApp};
use std::fs;
use std::io::Read;

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    if let Err(e) = init_logging(level_for(cli.debug)) {
        eprintln!("Warning: {}", e);
    }

    let dir = config_dir()?;
    let settings = Settings::load(&dir)?;

    if let Commands::Config(args) = &cli.command {
        return handle_config(settings, args);
    }

    let app = NotesApp::connect()?;
    match cli.command {
        Commands::Accounts { json } => handle_accounts(&app, json),
        Commands::Add(args) => handle_add(&app, &settings, args),
        Commands::List { text, accounts } => handle_list(&app, text, accounts),
        Commands::Cat {
            name,
            plaintext,
            html,
            json,
        } => handle_cat(&app, &name, plaintext, html, json),
        Commands::Dump { selected, no_body } => handle_dump(&app, selected, no_body),
        Commands::Config(_) => Ok(()),
    }
}

fn handle_accounts(app: &NotesApp, json: bool) -> Result<()> {
    let mut infos = Vec::new();
    for name in app.accounts()? {
        let account = app.account(Some(&name))?;
        infos.push(AccountInfo {
            id: account.id()?,
            notes_count: account.len()?,
            default_folder: account.default_folder()?,
            name,
        });
    }

    if json {
        println!("{}", serde_json::to_string(&infos)?);
    } else {
        print_accounts(&infos);
    }
    Ok(())
}

/// Where the text of a new note comes from, in precedence order.
fn note_text(args: &AddArgs) -> Result<String> {
    if let Some(path) = &args.file {
        if !path.exists() {
            return Err(NotesError::FileNotFound(path.clone()));
        }
        return Ok(fs::read_to_string(path)?);
    }
    if let Some(url) = &args.url {
        let (title, html) = fetch_readable(url)
            .map_err(|e| NotesError::Api(format!("Error downloading url '{}': {}", url, e)))?;
        return Ok(format!("{}\n{}", title, html));
    }
    let note = args.note.as_deref().unwrap_or_default();
    if note == "-" || (note.is_empty() && !args.edit) {
        let mut text = String::new();
        std::io::stdin().read_to_string(&mut text)?;
        return Ok(text);
    }
    Ok(note.to_string())
}

fn handle_add(app: &NotesApp, settings: &Settings, args: AddArgs) -> Result<()> {
    let format = if args.url.is_some() {
        // Readable pages are already HTML.
        BodyFormat::Html
    } else {
        args.format().unwrap_or(settings.defaults.format)
    };

    let mut text = note_text(&args)?;
    if args.edit {
        let editor = get_editor(&settings.editor())?;
        text = edit_text(&editor, &text, format.extension())?;
    }
    if text.trim().is_empty() {
        return Err(NotesError::Api("No note text.".to_string()));
    }

    let (name, body) = split_note_text(&text);
    let body = body_html(format, &body);

    let account_name = args.account.as_deref().or(settings.defaults.account.as_deref());
    let folder = args.folder.as_deref().or(settings.defaults.folder.as_deref());
    debug!(
        "event=add_note account={:?} folder={:?} format={}",
        account_name, folder, format
    );

    let account = app.account(account_name)?;
    let note = account.make_note(&name, &body, folder, &[])?;
    if args.show {
        note.show()?;
    }
    println!("{} {}", "Added note".green(), name.bold());
    Ok(())
}

fn handle_list(app: &NotesApp, text: Option<String>, accounts: Vec<String>) -> Result<()> {
    let mut filter = NoteFilter::new();
    if let Some(text) = text {
        filter = filter.text(text);
    }
    for account in accounts {
        filter = filter.account(account);
    }

    let list = app.noteslist(&filter)?;
    print_notes_list(&list.folders()?, &list.names()?, &list.plaintexts()?);
    Ok(())
}

fn handle_cat(app: &NotesApp, name: &str, plaintext: bool, html: bool, json: bool) -> Result<()> {
    let notes = app.notes(&NoteFilter::new().name(name))?;
    let records = notes
        .iter()
        .map(|note| note.to_record())
        .collect::<Result<Vec<_>>>()?;

    if json {
        println!("{}", cat_json(records, plaintext)?);
        return Ok(());
    }
    for record in &records {
        if plaintext {
            println!("{}", record.plaintext);
        } else if html {
            println!("{}", record.body);
        } else {
            print_note_header(record);
            println!("{}", record.plaintext);
        }
    }
    Ok(())
}

fn handle_config(mut settings: Settings, args: &ConfigArgs) -> Result<()> {
    if args.is_empty() {
        print_settings(&settings, &settings.editor());
        return Ok(());
    }

    let defaults = &mut settings.defaults;
    if let Some(account) = &args.account {
        defaults.account = Some(account.clone());
    }
    if let Some(folder) = &args.folder {
        defaults.folder = Some(folder.clone());
    }
    if let Some(format) = args.format {
        defaults.format = format;
    }
    if let Some(editor) = &args.editor {
        defaults.editor = editor.clone();
    }

    let path = settings.save(config_dir()?)?;
    println!("Settings saved to {}", path.display());
    Ok(())
}

fn handle_dump(app: &NotesApp, selected: bool, no_body: bool) -> Result<()> {
    if selected {
        for note in app.selection()? {
            match note.to_record() {
                Ok(record) => dump_lines(&record, no_body)
                    .iter()
                    .for_each(|line| println!("{}", line)),
                Err(e) => warn!("event=dump_failed handle={} error={}", note.handle(), e),
            }
        }
        return Ok(());
    }

    for account in app.accounts()? {
        let list = app.noteslist(&NoteFilter::new().account(account))?;
        for record in list.records()? {
            for line in dump_lines(&record, no_body) {
                println!("{}", line);
            }
        }
    }
    Ok(())
}
