//! # macnotes Architecture
//!
//! macnotes presents one stable data model (accounts, folders, notes, attachments) over
//! Apple Notes, even though the only ways to reach Notes are two automation transports
//! with uneven coverage and uneven failure modes.
//!
//! ## The Layers
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  CLI Layer (cli/, wired by main.rs)                         │
//! │  - Parses arguments, reads config, formats output           │
//! │  - The ONLY place that knows about stdout/stderr/exit codes │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Entity Layer (app, account, note, folder, attachment,      │
//! │  noteslist)                                                 │
//! │  - Thin views over host handles                             │
//! │  - Every attribute read goes through the strategy table     │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Resolution Layer (policy, ident, predicate, scope)         │
//! │  - Which backend answers which attribute                    │
//! │  - Identifier recovery, filter compilation, scoping         │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Host Layer (host/)                                         │
//! │  - ObjectBridge: structured object bridge                   │
//! │  - ScriptBridge: named legacy script routines               │
//! │  - jxa + osa (production), memory (testing)                 │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Two Backends, One Answer
//!
//! Each readable attribute declares an ordered chain of sources in [`policy`]. The
//! structured bridge is tried first unless the attribute is known to be unreliable
//! there; an absent answer (empty, missing, zero) moves on to the next source. Only the
//! last failing attempt's error reaches the caller.
//!
//! ## Identifiers
//!
//! Handles derived from a predicate or from the UI selection can report an id of `0`.
//! [`ident`] recovers the real id from the handle's debug description. When nothing
//! works the sentinel [`ident::Identifier::invalid`] is returned as data, never as an
//! error, and it is never used as a cache or equality key.
//!
//! ## Threading
//!
//! Everything is synchronous and single threaded. Every accessor call is a blocking round
//! trip to the automation host; nothing is cached except identifiers. Take a snapshot with
//! [`noteslist::NotesList`] when you need many attributes of many notes.
//!
//! ## Module Overview
//!
//! - [`app`]: `NotesApp`, the entry point
//! - [`account`], [`note`], [`folder`], [`attachment`]: entity accessors
//! - [`noteslist`]: batch projections over one or more account scopes
//! - [`scope`]: lazy per-account note collections and query execution
//! - [`predicate`]: filter requests and their compiled predicates
//! - [`policy`]: the per-attribute backend strategy table
//! - [`ident`]: identifier resolution
//! - [`host`]: the adapter seam and its implementations
//! - [`config`], [`convert`], [`readable`], [`editor`], [`logging`]: collaborators used by
//!   the `notes` binary
//! - [`error`]: error types

pub mod account;
pub mod app;
pub mod attachment;
pub mod config;
pub mod convert;
pub mod editor;
pub mod error;
pub mod folder;
pub mod host;
pub mod ident;
pub mod logging;
pub mod note;
pub mod noteslist;
pub mod policy;
pub mod predicate;
pub mod readable;
pub mod scope;

pub use account::Account;
pub use app::NotesApp;
pub use attachment::Attachment;
pub use error::{NotesError, Result};
pub use folder::Folder;
pub use ident::Identifier;
pub use note::{Note, NoteRecord};
pub use noteslist::NotesList;
pub use predicate::NoteFilter;
