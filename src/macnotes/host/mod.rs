//! # Host Layer
//!
//! This module defines the seam between macnotes and the Notes automation host. Nothing
//! above this layer knows how a call reaches Notes.
//!
//! ## Two Transports
//!
//! - [`ObjectBridge`]: the structured object bridge. Typed property reads and writes on
//!   object handles, plus lazy element collections that can be filtered with a
//!   positional predicate and projected one property at a time.
//! - [`ScriptBridge`]: the legacy script bridge. A fixed set of named [`Routine`]s, each
//!   with a fixed positional argument list.
//!
//! ## Implementations
//!
//! - [`jxa::JxaBridge`]: ScriptingBridge driven through `osascript -l JavaScript`
//! - [`osa::OsaScriptBridge`]: one compiled AppleScript library, dispatched by routine name
//! - [`memory::MemoryHost`]: in-memory Notes for testing, implements both traits
//!
//! ## Handles
//!
//! A [`Handle`] is an opaque token minted by a bridge. Entities own their handle and
//! never look inside it. Tokens are only meaningful to the bridge that produced them.

use crate::error::{NotesError, Result};
use crate::predicate::Predicate;
use chrono::{DateTime, Utc};
use log::trace;
use std::fmt;
use std::path::Path;
use std::rc::Rc;

pub mod jxa;
pub mod memory;
pub mod osa;

const APPLICATION_TOKEN: &str = "application";

/// Opaque reference to one host object.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Handle(String);

impl Handle {
    pub fn new(token: impl Into<String>) -> Self {
        Handle(token.into())
    }

    /// The application object itself.
    pub fn application() -> Self {
        Handle(APPLICATION_TOKEN.to_string())
    }

    pub fn is_application(&self) -> bool {
        self.0 == APPLICATION_TOKEN
    }

    pub fn token(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementKind {
    Accounts,
    Folders,
    Notes,
    Attachments,
}

impl ElementKind {
    pub fn selector(&self) -> &'static str {
        match self {
            ElementKind::Accounts => "accounts",
            ElementKind::Folders => "folders",
            ElementKind::Notes => "notes",
            ElementKind::Attachments => "attachments",
        }
    }
}

/// A lazy element collection: "every `kind` of `owner`", optionally filtered.
///
/// Building or filtering a collection never talks to the host. Only the terminal
/// operations on [`ObjectBridge`] (`count`, `handles`, `project`, `lookup`) do.
#[derive(Debug, Clone, PartialEq)]
pub struct Collection {
    owner: Handle,
    kind: ElementKind,
    predicate: Option<Predicate>,
}

impl Collection {
    pub fn elements(owner: &Handle, kind: ElementKind) -> Self {
        Self {
            owner: owner.clone(),
            kind,
            predicate: None,
        }
    }

    pub fn accounts() -> Self {
        Self::elements(&Handle::application(), ElementKind::Accounts)
    }

    /// Returns a filtered view. An existing filter is kept and AND-ed with the new one.
    pub fn filtered(&self, predicate: Predicate) -> Self {
        let predicate = match &self.predicate {
            Some(existing) => existing.clone().and(predicate),
            None => predicate,
        };
        Self {
            owner: self.owner.clone(),
            kind: self.kind,
            predicate: Some(predicate),
        }
    }

    pub fn owner(&self) -> &Handle {
        &self.owner
    }

    pub fn kind(&self) -> ElementKind {
        self.kind
    }

    pub fn predicate(&self) -> Option<&Predicate> {
        self.predicate.as_ref()
    }
}

/// Object properties readable through the structured bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Property {
    Id,
    Name,
    Body,
    Plaintext,
    CreationDate,
    ModificationDate,
    Container,
    PasswordProtected,
    DefaultAccount,
    DefaultFolder,
    Selection,
    Version,
    ContentIdentifier,
    Url,
}

impl Property {
    /// ScriptingBridge selector for this property.
    pub fn selector(&self) -> &'static str {
        match self {
            Property::Id => "id",
            Property::Name => "name",
            Property::Body => "body",
            Property::Plaintext => "plaintext",
            Property::CreationDate => "creationDate",
            Property::ModificationDate => "modificationDate",
            Property::Container => "container",
            Property::PasswordProtected => "passwordProtected",
            Property::DefaultAccount => "defaultAccount",
            Property::DefaultFolder => "defaultFolder",
            Property::Selection => "selection",
            Property::Version => "version",
            Property::ContentIdentifier => "contentIdentifier",
            Property::Url => "URL",
        }
    }
}

/// A value crossing the host boundary, already converted to domain types.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Missing,
    Bool(bool),
    Int(i64),
    Text(String),
    Date(DateTime<Utc>),
    List(Vec<Value>),
    Object(Handle),
}

impl Value {
    /// True for the "no answer" shapes the host uses: missing, empty text, zero.
    pub fn is_absent(&self) -> bool {
        match self {
            Value::Missing => true,
            Value::Text(s) => s.is_empty(),
            Value::Int(n) => *n == 0,
            _ => false,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Text form of scalar values; numbers are rendered, everything else is `None`.
    pub fn into_text(self) -> Option<String> {
        match self {
            Value::Text(s) => Some(s),
            Value::Int(n) => Some(n.to_string()),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Int(n) => Some(*n != 0),
            Value::Text(s) if s == "true" => Some(true),
            Value::Text(s) if s == "false" => Some(false),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<DateTime<Utc>> {
        match self {
            Value::Date(d) => Some(*d),
            _ => None,
        }
    }

    pub fn into_list(self) -> Vec<Value> {
        match self {
            Value::List(items) => items,
            Value::Missing => Vec::new(),
            other => vec![other],
        }
    }

    pub fn into_handle(self) -> Option<Handle> {
        match self {
            Value::Object(h) => Some(h),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

/// The structured object bridge.
pub trait ObjectBridge {
    /// Read a property. A `Value::Object` result is itself a usable handle.
    fn get(&self, object: &Handle, property: Property) -> Result<Value>;

    fn set(&self, object: &Handle, property: Property, value: &Value) -> Result<()>;

    fn count(&self, collection: &Collection) -> Result<usize>;

    /// Materialize the collection into element handles, in collection order.
    fn handles(&self, collection: &Collection) -> Result<Vec<Handle>>;

    /// Apply a property path to every element in one call, in collection order.
    ///
    /// A path longer than one follows object-valued properties, e.g.
    /// `[Container, Name]` yields folder names.
    fn project(&self, collection: &Collection, path: &[Property]) -> Result<Vec<Value>>;

    /// Find the element with the given id, if any.
    fn lookup(&self, collection: &Collection, id: &str) -> Result<Option<Handle>>;

    /// The host's textual debug description of an object.
    fn describe(&self, object: &Handle) -> Result<String>;

    /// Insert a new note with `body` into `folder`. Fails if the folder's note count did
    /// not grow.
    fn insert_note(&self, folder: &Handle, body: &str) -> Result<Handle>;

    fn save_attachment(&self, attachment: &Handle, destination: &Path) -> Result<()>;
}

/// Named routines of the legacy script library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Routine {
    NotesActivate,
    NotesQuit,
    NotesVersion,
    NotesGetAccounts,
    NotesGetDefaultAccount,
    NotesGetSelected,
    NotesMakeNote,
    NotesMakeNoteWithAccount,
    NoteGetAccount,
    NoteGetName,
    NoteSetName,
    NoteGetBody,
    NoteSetBody,
    NoteGetPlainText,
    NoteGetCreationDate,
    NoteGetModificationDate,
    NoteGetPasswordProtected,
    NoteGetContainer,
    NoteShow,
    NoteAddAttachment,
    FolderGetName,
    FolderShow,
    AccountId,
    AccountGetDefaultFolder,
    AccountGetFolderNames,
    AccountGetCount,
    AccountShow,
    AccountFindWithName,
    AccountFindWithText,
}

impl Routine {
    pub const ALL: &'static [Routine] = &[
        Routine::NotesActivate,
        Routine::NotesQuit,
        Routine::NotesVersion,
        Routine::NotesGetAccounts,
        Routine::NotesGetDefaultAccount,
        Routine::NotesGetSelected,
        Routine::NotesMakeNote,
        Routine::NotesMakeNoteWithAccount,
        Routine::NoteGetAccount,
        Routine::NoteGetName,
        Routine::NoteSetName,
        Routine::NoteGetBody,
        Routine::NoteSetBody,
        Routine::NoteGetPlainText,
        Routine::NoteGetCreationDate,
        Routine::NoteGetModificationDate,
        Routine::NoteGetPasswordProtected,
        Routine::NoteGetContainer,
        Routine::NoteShow,
        Routine::NoteAddAttachment,
        Routine::FolderGetName,
        Routine::FolderShow,
        Routine::AccountId,
        Routine::AccountGetDefaultFolder,
        Routine::AccountGetFolderNames,
        Routine::AccountGetCount,
        Routine::AccountShow,
        Routine::AccountFindWithName,
        Routine::AccountFindWithText,
    ];

    /// Handler name in the script library.
    pub fn name(&self) -> &'static str {
        match self {
            Routine::NotesActivate => "notesActivate",
            Routine::NotesQuit => "notesQuit",
            Routine::NotesVersion => "notesVersion",
            Routine::NotesGetAccounts => "notesGetAccounts",
            Routine::NotesGetDefaultAccount => "notesGetDefaultAccount",
            Routine::NotesGetSelected => "notesGetSelected",
            Routine::NotesMakeNote => "notesMakeNote",
            Routine::NotesMakeNoteWithAccount => "notesMakeNoteWithAccount",
            Routine::NoteGetAccount => "noteGetAccount",
            Routine::NoteGetName => "noteGetName",
            Routine::NoteSetName => "noteSetName",
            Routine::NoteGetBody => "noteGetBody",
            Routine::NoteSetBody => "noteSetBody",
            Routine::NoteGetPlainText => "noteGetPlainText",
            Routine::NoteGetCreationDate => "noteGetCreationDate",
            Routine::NoteGetModificationDate => "noteGetModificationDate",
            Routine::NoteGetPasswordProtected => "noteGetPasswordProtected",
            Routine::NoteGetContainer => "noteGetContainer",
            Routine::NoteShow => "noteShow",
            Routine::NoteAddAttachment => "noteAddAttachment",
            Routine::FolderGetName => "folderGetName",
            Routine::FolderShow => "folderShow",
            Routine::AccountId => "accountID",
            Routine::AccountGetDefaultFolder => "accountGetDefaultFolder",
            Routine::AccountGetFolderNames => "accountGetFolderNames",
            Routine::AccountGetCount => "accountGetCount",
            Routine::AccountShow => "accountShow",
            Routine::AccountFindWithName => "accountFindWithName",
            Routine::AccountFindWithText => "accountFindWithText",
        }
    }

    /// Number of positional arguments the routine takes.
    pub fn arity(&self) -> usize {
        match self {
            Routine::NotesActivate
            | Routine::NotesQuit
            | Routine::NotesVersion
            | Routine::NotesGetAccounts
            | Routine::NotesGetDefaultAccount
            | Routine::NotesGetSelected => 0,
            Routine::NoteGetAccount
            | Routine::AccountId
            | Routine::AccountGetDefaultFolder
            | Routine::AccountGetFolderNames
            | Routine::AccountGetCount
            | Routine::AccountShow => 1,
            Routine::NotesMakeNote
            | Routine::NoteGetName
            | Routine::NoteGetBody
            | Routine::NoteGetPlainText
            | Routine::NoteGetCreationDate
            | Routine::NoteGetModificationDate
            | Routine::NoteGetPasswordProtected
            | Routine::NoteGetContainer
            | Routine::NoteShow
            | Routine::FolderGetName
            | Routine::FolderShow
            | Routine::AccountFindWithName
            | Routine::AccountFindWithText => 2,
            Routine::NoteSetName | Routine::NoteSetBody | Routine::NoteAddAttachment => 3,
            Routine::NotesMakeNoteWithAccount => 4,
        }
    }

    /// Routines that only act and produce no value.
    pub fn returns_value(&self) -> bool {
        !matches!(
            self,
            Routine::NotesActivate
                | Routine::NotesQuit
                | Routine::NoteSetName
                | Routine::NoteSetBody
                | Routine::NoteShow
                | Routine::FolderShow
                | Routine::AccountShow
        )
    }

    pub(crate) fn check_arity(&self, args: &[Value]) -> Result<()> {
        if args.len() != self.arity() {
            return Err(NotesError::host(
                self.name(),
                format!("expected {} arguments, got {}", self.arity(), args.len()),
            ));
        }
        Ok(())
    }
}

impl fmt::Display for Routine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The legacy script bridge. Each call is one blocking round trip.
pub trait ScriptBridge {
    fn call(&self, routine: Routine, args: &[Value]) -> Result<Value>;
}

/// Both bridges of one automation session.
///
/// Constructed once per process by [`crate::NotesApp`]; entities borrow it.
pub struct Session {
    bridge: Rc<dyn ObjectBridge>,
    script: Rc<dyn ScriptBridge>,
}

impl Session {
    pub fn new(bridge: Rc<dyn ObjectBridge>, script: Rc<dyn ScriptBridge>) -> Self {
        Self { bridge, script }
    }

    pub fn bridge(&self) -> &dyn ObjectBridge {
        self.bridge.as_ref()
    }

    pub fn call(&self, routine: Routine, args: &[Value]) -> Result<Value> {
        trace!("event=legacy_call routine={} args={}", routine, args.len());
        self.script.call(routine, args)
    }
}
