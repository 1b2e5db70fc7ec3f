//! In-memory Notes for testing.
//!
//! [`MemoryHost`] implements both [`ObjectBridge`] and [`ScriptBridge`] over one shared
//! state, so a value written through one transport is visible through the other.
//! [`Quirks`] switches on the defects observed on real hosts.
//!
//! Uses `RefCell` for interior mutability; the host is single threaded like the real
//! automation session.

use super::{Collection, ElementKind, Handle, ObjectBridge, Property, Routine, ScriptBridge, Session, Value};
use crate::error::{NotesError, Result};
use crate::predicate::Field;
use chrono::{DateTime, Utc};
use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::rc::Rc;

const STORE: &str = "x-coredata://5F2A9C44-0D1B-4E7A-9C55-MEMORYSTORE";
const DEFAULT_FOLDER: &str = "Notes";
const EPOCH_2024: i64 = 1_704_067_200;

/// Host defects to reproduce. Everything is off by default.
#[derive(Debug, Clone, Default)]
pub struct Quirks {
    /// Filter results and selection handles report `"0"` as their id.
    pub sentinel_ids: bool,
    /// Debug descriptions carry no `id "…"` part.
    pub opaque_descriptions: bool,
    /// The structured bridge reports the inverted password flag.
    pub password_unreliable: bool,
    /// Structured reads of these properties come back missing.
    pub absent: HashSet<Property>,
    /// Attachment collections list every attachment twice.
    pub duplicate_attachments: bool,
    /// Structured writes report success and change nothing.
    pub ignore_structured_writes: bool,
    /// Legacy writes report success and change nothing.
    pub ignore_legacy_writes: bool,
    /// Structured note insertion leaves the folder unchanged.
    pub structured_insert_fails: bool,
    /// Every structured call fails.
    pub structured_down: bool,
    /// Legacy routines that fail with a host error.
    pub failing_routines: HashSet<Routine>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Obj {
    App,
    Account(usize),
    Folder(usize),
    Note { index: usize, derived: bool },
    Attachment(usize),
}

impl Obj {
    fn handle(self) -> Handle {
        match self {
            Obj::App => Handle::application(),
            Obj::Account(i) => Handle::new(format!("account:{i}")),
            Obj::Folder(i) => Handle::new(format!("folder:{i}")),
            Obj::Note {
                index,
                derived: false,
            } => Handle::new(format!("note:{index}")),
            Obj::Note {
                index,
                derived: true,
            } => Handle::new(format!("note:{index}:derived")),
            Obj::Attachment(i) => Handle::new(format!("attachment:{i}")),
        }
    }

    fn class(self) -> &'static str {
        match self {
            Obj::App => "application",
            Obj::Account(_) => "account",
            Obj::Folder(_) => "folder",
            Obj::Note { .. } => "note",
            Obj::Attachment(_) => "attachment",
        }
    }

    fn derive(self) -> Obj {
        match self {
            Obj::Note { index, .. } => Obj::Note {
                index,
                derived: true,
            },
            other => other,
        }
    }

    fn parse(handle: &Handle) -> Result<Obj> {
        if handle.is_application() {
            return Ok(Obj::App);
        }
        let mut parts = handle.token().split(':');
        let kind = parts.next();
        let index = parts.next().and_then(|s| s.parse::<usize>().ok());
        let derived = parts.next() == Some("derived");
        match (kind, index) {
            (Some("account"), Some(i)) => Ok(Obj::Account(i)),
            (Some("folder"), Some(i)) => Ok(Obj::Folder(i)),
            (Some("note"), Some(index)) => Ok(Obj::Note { index, derived }),
            (Some("attachment"), Some(i)) => Ok(Obj::Attachment(i)),
            _ => Err(NotesError::host(
                "objectWithID",
                format!("invalid object reference {handle}"),
            )),
        }
    }
}

#[derive(Debug, Clone)]
struct AccountRec {
    id: String,
    name: String,
    default_folder: usize,
}

#[derive(Debug, Clone)]
struct FolderRec {
    id: String,
    name: String,
    account: usize,
}

#[derive(Debug, Clone)]
struct NoteRec {
    id: String,
    name: String,
    body: String,
    plaintext: String,
    folder: usize,
    created: DateTime<Utc>,
    modified: DateTime<Utc>,
    password_protected: bool,
    attachments: Vec<usize>,
}

#[derive(Debug, Clone)]
struct AttachmentRec {
    id: String,
    name: String,
    created: DateTime<Utc>,
    modified: DateTime<Utc>,
    content_identifier: String,
    url: Option<String>,
    content: Vec<u8>,
}

#[derive(Debug, Default)]
struct State {
    accounts: Vec<AccountRec>,
    folders: Vec<FolderRec>,
    notes: Vec<NoteRec>,
    attachments: Vec<AttachmentRec>,
    selection: Vec<usize>,
    version: String,
    next_pk: usize,
    clock: i64,
    running: bool,
    quirks: Quirks,
}

impl State {
    fn pk(&mut self, entity: &str) -> String {
        self.next_pk += 1;
        format!("{STORE}/{entity}/p{}", self.next_pk)
    }

    fn tick(&mut self) -> DateTime<Utc> {
        self.clock += 1;
        DateTime::from_timestamp(EPOCH_2024 + self.clock * 60, 0).unwrap_or_default()
    }

    fn account(&self, i: usize) -> Result<&AccountRec> {
        self.accounts.get(i).ok_or_else(|| missing("account", i))
    }

    fn folder(&self, i: usize) -> Result<&FolderRec> {
        self.folders.get(i).ok_or_else(|| missing("folder", i))
    }

    fn note(&self, i: usize) -> Result<&NoteRec> {
        self.notes.get(i).ok_or_else(|| missing("note", i))
    }

    fn attachment(&self, i: usize) -> Result<&AttachmentRec> {
        self.attachments.get(i).ok_or_else(|| missing("attachment", i))
    }

    fn note_account(&self, note: &NoteRec) -> usize {
        self.folders.get(note.folder).map(|f| f.account).unwrap_or(0)
    }

    fn structured_up(&self) -> Result<()> {
        if self.quirks.structured_down {
            return Err(NotesError::host(
                "ScriptingBridge",
                "Application isn't running. (-600)",
            ));
        }
        Ok(())
    }

    fn true_id(&self, obj: Obj) -> Result<String> {
        Ok(match obj {
            Obj::App => String::new(),
            Obj::Account(i) => self.account(i)?.id.clone(),
            Obj::Folder(i) => self.folder(i)?.id.clone(),
            Obj::Note { index, .. } => self.note(index)?.id.clone(),
            Obj::Attachment(i) => self.attachment(i)?.id.clone(),
        })
    }

    /// Structured read of one property, quirks applied.
    fn read(&self, obj: Obj, property: Property) -> Result<Value> {
        if self.quirks.absent.contains(&property) {
            return Ok(Value::Missing);
        }
        let value = match (obj, property) {
            (Obj::App, Property::Name) => Value::from("Notes"),
            (Obj::App, Property::Version) => Value::from(self.version.as_str()),
            (Obj::App, Property::DefaultAccount) if self.accounts.is_empty() => Value::Missing,
            (Obj::App, Property::DefaultAccount) => Value::Object(Obj::Account(0).handle()),
            (Obj::App, Property::Selection) => Value::List(
                self.selection
                    .iter()
                    .map(|&index| {
                        Value::Object(
                            Obj::Note {
                                index,
                                derived: true,
                            }
                            .handle(),
                        )
                    })
                    .collect(),
            ),
            (Obj::Account(i), Property::Id) => Value::from(self.account(i)?.id.as_str()),
            (Obj::Account(i), Property::Name) => Value::from(self.account(i)?.name.as_str()),
            (Obj::Account(i), Property::DefaultFolder) => {
                Value::Object(Obj::Folder(self.account(i)?.default_folder).handle())
            }
            (Obj::Folder(i), Property::Id) => Value::from(self.folder(i)?.id.as_str()),
            (Obj::Folder(i), Property::Name) => Value::from(self.folder(i)?.name.as_str()),
            (Obj::Folder(i), Property::Container) => {
                Value::Object(Obj::Account(self.folder(i)?.account).handle())
            }
            (Obj::Note { index, derived }, property) => {
                let note = self.note(index)?;
                match property {
                    Property::Id if derived && self.quirks.sentinel_ids => Value::from("0"),
                    Property::Id => Value::from(note.id.as_str()),
                    Property::Name => Value::from(note.name.as_str()),
                    Property::Body => Value::from(note.body.as_str()),
                    Property::Plaintext => Value::from(note.plaintext.as_str()),
                    Property::CreationDate => Value::Date(note.created),
                    Property::ModificationDate => Value::Date(note.modified),
                    Property::Container => Value::Object(Obj::Folder(note.folder).handle()),
                    Property::PasswordProtected => {
                        Value::Bool(note.password_protected != self.quirks.password_unreliable)
                    }
                    other => return Err(no_property(obj, other)),
                }
            }
            (Obj::Attachment(i), property) => {
                let att = self.attachment(i)?;
                match property {
                    Property::Id => Value::from(att.id.as_str()),
                    Property::Name => Value::from(att.name.as_str()),
                    Property::CreationDate => Value::Date(att.created),
                    Property::ModificationDate => Value::Date(att.modified),
                    Property::ContentIdentifier => Value::from(att.content_identifier.as_str()),
                    Property::Url => att.url.clone().map(Value::Text).unwrap_or(Value::Missing),
                    other => return Err(no_property(obj, other)),
                }
            }
            (obj, other) => return Err(no_property(obj, other)),
        };
        Ok(value)
    }

    /// Value a host-side predicate sees. Ids are always the real ones.
    fn match_value(&self, obj: Obj, field: Field) -> Result<Value> {
        match field {
            Field::Id => self.true_id(obj).map(Value::Text),
            other => self.read(obj, other.property()),
        }
    }

    fn base_elements(&self, owner: Obj, kind: ElementKind) -> Result<Vec<Obj>> {
        let notes_where = |keep: &dyn Fn(&NoteRec) -> bool| -> Vec<Obj> {
            self.notes
                .iter()
                .enumerate()
                .filter(|(_, n)| keep(n))
                .map(|(index, _)| Obj::Note {
                    index,
                    derived: false,
                })
                .collect()
        };
        let elements = match (owner, kind) {
            (Obj::App, ElementKind::Accounts) => {
                (0..self.accounts.len()).map(Obj::Account).collect()
            }
            (Obj::App, ElementKind::Folders) => (0..self.folders.len()).map(Obj::Folder).collect(),
            (Obj::App, ElementKind::Notes) => notes_where(&|_| true),
            (Obj::Account(i), ElementKind::Folders) => {
                self.account(i)?;
                self.folders
                    .iter()
                    .enumerate()
                    .filter(|(_, f)| f.account == i)
                    .map(|(j, _)| Obj::Folder(j))
                    .collect()
            }
            (Obj::Account(i), ElementKind::Notes) => {
                self.account(i)?;
                notes_where(&|n| self.note_account(n) == i)
            }
            (Obj::Folder(i), ElementKind::Notes) => {
                self.folder(i)?;
                notes_where(&|n| n.folder == i)
            }
            (Obj::Note { index, .. }, ElementKind::Attachments) => {
                let copies = if self.quirks.duplicate_attachments { 2 } else { 1 };
                self.note(index)?
                    .attachments
                    .iter()
                    .flat_map(|&a| std::iter::repeat(Obj::Attachment(a)).take(copies))
                    .collect()
            }
            (owner, kind) => {
                return Err(NotesError::host(
                    "elements",
                    format!("{} has no {}", owner.class(), kind.selector()),
                ))
            }
        };
        Ok(elements)
    }

    fn elements(&self, collection: &Collection) -> Result<Vec<Obj>> {
        let owner = Obj::parse(collection.owner())?;
        let base = self.base_elements(owner, collection.kind())?;
        let Some(predicate) = collection.predicate() else {
            return Ok(base);
        };
        if base.is_empty() {
            return Err(NotesError::host(
                "filteredArrayUsingPredicate",
                "predicate applied to an empty collection",
            ));
        }
        let mut filtered = Vec::new();
        for obj in base {
            if predicate.matches_with(|field| self.match_value(obj, field))? {
                filtered.push(obj.derive());
            }
        }
        Ok(filtered)
    }

    fn find_account(&self, name: &str) -> std::result::Result<usize, String> {
        self.accounts
            .iter()
            .position(|a| a.name == name)
            .ok_or_else(|| format!("Can't get account \"{name}\"."))
    }

    fn find_note(&self, account: &str, id: &str) -> std::result::Result<usize, String> {
        let account = self.find_account(account)?;
        self.notes
            .iter()
            .position(|n| n.id == id && self.note_account(n) == account)
            .ok_or_else(|| format!("Can't get note id \"{id}\"."))
    }

    fn find_folder(&self, account: &str, id: &str) -> std::result::Result<usize, String> {
        let account = self.find_account(account)?;
        self.folders
            .iter()
            .position(|f| f.id == id && f.account == account)
            .ok_or_else(|| format!("Can't get folder id \"{id}\"."))
    }

    fn folder_named(&self, account: usize, name: &str) -> std::result::Result<usize, String> {
        self.folders
            .iter()
            .position(|f| f.name == name && f.account == account)
            .ok_or_else(|| format!("Can't get folder \"{name}\"."))
    }

    fn create_account(&mut self, name: &str) -> usize {
        let index = self.accounts.len();
        let id = self.pk("ICAccount");
        self.accounts.push(AccountRec {
            id,
            name: name.to_string(),
            default_folder: 0,
        });
        let folder = self.create_folder(index, DEFAULT_FOLDER);
        self.accounts[index].default_folder = folder;
        index
    }

    fn create_folder(&mut self, account: usize, name: &str) -> usize {
        let id = self.pk("ICFolder");
        self.folders.push(FolderRec {
            id,
            name: name.to_string(),
            account,
        });
        self.folders.len() - 1
    }

    fn create_note(&mut self, folder: usize, name: &str, body: &str, plaintext: &str) -> usize {
        let id = self.pk("ICNote");
        let created = self.tick();
        self.notes.push(NoteRec {
            id,
            name: name.to_string(),
            body: body.to_string(),
            plaintext: plaintext.to_string(),
            folder,
            created,
            modified: created,
            password_protected: false,
            attachments: Vec::new(),
        });
        self.notes.len() - 1
    }

    fn create_attachment(&mut self, note: usize, name: &str, content: Vec<u8>) -> usize {
        let id = self.pk("ICAttachment");
        let created = self.tick();
        let content_identifier = format!("cid:{}", self.next_pk);
        self.attachments.push(AttachmentRec {
            id,
            name: name.to_string(),
            created,
            modified: created,
            content_identifier,
            url: None,
            content,
        });
        let index = self.attachments.len() - 1;
        if let Some(n) = self.notes.get_mut(note) {
            n.attachments.push(index);
            n.modified = created;
        }
        index
    }

    fn set_note(&mut self, index: usize, property: Property, text: String) {
        let modified = self.tick();
        if let Some(note) = self.notes.get_mut(index) {
            match property {
                Property::Name => note.name = text,
                _ => {
                    note.plaintext = plaintext_of(&text);
                    note.body = text;
                }
            }
            note.modified = modified;
        }
    }

    fn dispatch(&mut self, routine: Routine, args: &[String]) -> std::result::Result<Value, String> {
        let arg = |i: usize| args[i].as_str();
        let value = match routine {
            Routine::NotesActivate => {
                self.running = true;
                Value::Missing
            }
            Routine::NotesQuit => {
                self.running = false;
                Value::Missing
            }
            Routine::NotesVersion => Value::Text(self.version.clone()),
            Routine::NotesGetAccounts => Value::List(
                self.accounts
                    .iter()
                    .map(|a| Value::Text(a.name.clone()))
                    .collect(),
            ),
            Routine::NotesGetDefaultAccount => self
                .accounts
                .first()
                .map(|a| Value::Text(a.name.clone()))
                .ok_or_else(|| "Can't get default account.".to_string())?,
            Routine::NotesGetSelected => Value::List(
                self.selection
                    .iter()
                    .filter_map(|&i| self.notes.get(i))
                    .map(|n| {
                        let account = &self.accounts[self.note_account(n)].name;
                        Value::List(vec![
                            Value::Text(account.clone()),
                            Value::Text(n.id.clone()),
                        ])
                    })
                    .collect(),
            ),
            Routine::NotesMakeNote => {
                let account = self
                    .accounts
                    .first()
                    .ok_or_else(|| "Can't get default account.".to_string())?;
                let folder = account.default_folder;
                let index = self.create_note(folder, arg(0), arg(1), &plaintext_of(arg(1)));
                Value::Text(self.notes[index].id.clone())
            }
            Routine::NotesMakeNoteWithAccount => {
                let account = self.find_account(arg(0))?;
                let folder = self.folder_named(account, arg(1))?;
                let index = self.create_note(folder, arg(2), arg(3), &plaintext_of(arg(3)));
                Value::Text(self.notes[index].id.clone())
            }
            Routine::NoteGetAccount => {
                let note = self
                    .notes
                    .iter()
                    .find(|n| n.id == arg(0))
                    .ok_or_else(|| format!("Can't get note id \"{}\".", arg(0)))?;
                Value::Text(self.accounts[self.note_account(note)].name.clone())
            }
            Routine::NoteGetName => Value::Text(self.notes[self.find_note(arg(0), arg(1))?].name.clone()),
            Routine::NoteGetBody => Value::Text(self.notes[self.find_note(arg(0), arg(1))?].body.clone()),
            Routine::NoteGetPlainText => {
                Value::Text(self.notes[self.find_note(arg(0), arg(1))?].plaintext.clone())
            }
            Routine::NoteGetCreationDate => Value::Date(self.notes[self.find_note(arg(0), arg(1))?].created),
            Routine::NoteGetModificationDate => {
                Value::Date(self.notes[self.find_note(arg(0), arg(1))?].modified)
            }
            Routine::NoteGetPasswordProtected => {
                Value::Bool(self.notes[self.find_note(arg(0), arg(1))?].password_protected)
            }
            Routine::NoteGetContainer => {
                let note = &self.notes[self.find_note(arg(0), arg(1))?];
                Value::Text(self.folders[note.folder].name.clone())
            }
            Routine::NoteSetName | Routine::NoteSetBody => {
                let index = self.find_note(arg(0), arg(1))?;
                if !self.quirks.ignore_legacy_writes {
                    let property = match routine {
                        Routine::NoteSetName => Property::Name,
                        _ => Property::Body,
                    };
                    self.set_note(index, property, arg(2).to_string());
                }
                Value::Missing
            }
            Routine::NoteShow => {
                self.find_note(arg(0), arg(1))?;
                Value::Missing
            }
            Routine::NoteAddAttachment => {
                let index = self.find_note(arg(0), arg(1))?;
                let path = Path::new(arg(2));
                let content = fs::read(path).map_err(|e| format!("Can't read file {}: {e}", arg(2)))?;
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let att = self.create_attachment(index, &name, content);
                Value::Text(self.attachments[att].id.clone())
            }
            Routine::FolderGetName => Value::Text(self.folders[self.find_folder(arg(0), arg(1))?].name.clone()),
            Routine::FolderShow => {
                self.find_folder(arg(0), arg(1))?;
                Value::Missing
            }
            Routine::AccountId => Value::Text(self.accounts[self.find_account(arg(0))?].id.clone()),
            Routine::AccountGetDefaultFolder => {
                let account = &self.accounts[self.find_account(arg(0))?];
                Value::Text(self.folders[account.default_folder].name.clone())
            }
            Routine::AccountGetFolderNames => {
                let account = self.find_account(arg(0))?;
                Value::List(
                    self.folders
                        .iter()
                        .filter(|f| f.account == account)
                        .map(|f| Value::Text(f.name.clone()))
                        .collect(),
                )
            }
            Routine::AccountGetCount => {
                let account = self.find_account(arg(0))?;
                let count = self
                    .notes
                    .iter()
                    .filter(|n| self.note_account(n) == account)
                    .count();
                Value::Int(count as i64)
            }
            Routine::AccountShow => {
                self.find_account(arg(0))?;
                Value::Missing
            }
            Routine::AccountFindWithName | Routine::AccountFindWithText => {
                let account = self.find_account(arg(0))?;
                let term = arg(1).to_lowercase();
                Value::List(
                    self.notes
                        .iter()
                        .filter(|n| self.note_account(n) == account)
                        .filter(|n| match routine {
                            Routine::AccountFindWithName => n.name == arg(1),
                            _ => {
                                n.name.to_lowercase().contains(&term)
                                    || n.plaintext.to_lowercase().contains(&term)
                            }
                        })
                        .map(|n| Value::Text(n.id.clone()))
                        .collect(),
                )
            }
        };
        Ok(value)
    }
}

fn missing(kind: &str, index: usize) -> NotesError {
    NotesError::host("objectWithID", format!("no {kind} at index {index}"))
}

fn no_property(obj: Obj, property: Property) -> NotesError {
    NotesError::host(
        "valueForKey",
        format!("{} has no property {}", obj.class(), property.selector()),
    )
}

/// Crude HTML to text: block ends become newlines, tags are dropped.
fn plaintext_of(html: &str) -> String {
    let html = html
        .replace("<br>", "\n")
        .replace("</div>", "\n")
        .replace("</h1>", "\n")
        .replace("</p>", "\n");
    let mut text = String::with_capacity(html.len());
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            c if !in_tag => text.push(c),
            _ => {}
        }
    }
    let text = text
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&");
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    lines.join("\n")
}

/// In-memory Notes implementing both bridges.
pub struct MemoryHost {
    state: RefCell<State>,
    legacy_calls: RefCell<Vec<Routine>>,
    projections: Cell<usize>,
}

impl Default for MemoryHost {
    fn default() -> Self {
        Self {
            state: RefCell::new(State {
                version: "4.11".to_string(),
                running: true,
                ..State::default()
            }),
            legacy_calls: RefCell::new(Vec::new()),
            projections: Cell::new(0),
        }
    }
}

impl MemoryHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// A session whose both bridges are this host.
    pub fn session(self: &Rc<Self>) -> Session {
        Session::new(self.clone(), self.clone())
    }

    pub fn configure(&self, f: impl FnOnce(&mut Quirks)) {
        f(&mut self.state.borrow_mut().quirks);
    }

    /// Adds an account with its default folder. The first account is the default one.
    pub fn add_account(&self, name: &str) -> Handle {
        Obj::Account(self.state.borrow_mut().create_account(name)).handle()
    }

    /// # Panics
    /// If `account` is not an account handle of this host.
    pub fn add_folder(&self, account: &Handle, name: &str) -> Handle {
        let account = self.account_index(account);
        Obj::Folder(self.state.borrow_mut().create_folder(account, name)).handle()
    }

    /// Adds a note to the account's default folder.
    ///
    /// # Panics
    /// If `account` is not an account handle of this host.
    pub fn add_note(&self, account: &Handle, name: &str, plaintext: &str) -> Handle {
        let account = self.account_index(account);
        let folder = self.state.borrow().accounts[account].default_folder;
        self.add_note_in(&Obj::Folder(folder).handle(), name, plaintext)
    }

    /// # Panics
    /// If `folder` is not a folder handle of this host.
    pub fn add_note_in(&self, folder: &Handle, name: &str, plaintext: &str) -> Handle {
        let folder = match Obj::parse(folder) {
            Ok(Obj::Folder(i)) => i,
            _ => panic!("not a folder handle: {folder}"),
        };
        let body = format!("<div><h1>{name}</h1></div>\n<div>{plaintext}</div>");
        let index = self
            .state
            .borrow_mut()
            .create_note(folder, name, &body, plaintext);
        Obj::Note {
            index,
            derived: false,
        }
        .handle()
    }

    pub fn set_password_protected(&self, note: &Handle, protected: bool) {
        let index = self.note_index(note);
        if let Some(n) = self.state.borrow_mut().notes.get_mut(index) {
            n.password_protected = protected;
        }
    }

    pub fn add_attachment(&self, note: &Handle, name: &str, content: &[u8]) -> Handle {
        let index = self.note_index(note);
        let att = self
            .state
            .borrow_mut()
            .create_attachment(index, name, content.to_vec());
        Obj::Attachment(att).handle()
    }

    pub fn set_attachment_url(&self, attachment: &Handle, url: &str) {
        if let Ok(Obj::Attachment(i)) = Obj::parse(attachment) {
            if let Some(att) = self.state.borrow_mut().attachments.get_mut(i) {
                att.url = Some(url.to_string());
            }
        }
    }

    pub fn select(&self, notes: &[Handle]) {
        let selection = notes.iter().map(|h| self.note_index(h)).collect();
        self.state.borrow_mut().selection = selection;
    }

    /// The handle a filter or the selection would hand out for this note.
    pub fn derived(&self, note: &Handle) -> Handle {
        Obj::Note {
            index: self.note_index(note),
            derived: true,
        }
        .handle()
    }

    /// The stored id, ignoring every quirk.
    pub fn id_of(&self, handle: &Handle) -> String {
        Obj::parse(handle)
            .and_then(|obj| self.state.borrow().true_id(obj))
            .unwrap_or_default()
    }

    pub fn is_running(&self) -> bool {
        self.state.borrow().running
    }

    /// Legacy routines called so far, in call order.
    pub fn legacy_calls(&self) -> Vec<Routine> {
        self.legacy_calls.borrow().clone()
    }

    pub fn calls_to(&self, routine: Routine) -> usize {
        self.legacy_calls
            .borrow()
            .iter()
            .filter(|r| **r == routine)
            .count()
    }

    pub fn clear_calls(&self) {
        self.legacy_calls.borrow_mut().clear();
        self.projections.set(0);
    }

    /// Number of structured projections served so far.
    pub fn projections(&self) -> usize {
        self.projections.get()
    }

    fn account_index(&self, handle: &Handle) -> usize {
        match Obj::parse(handle) {
            Ok(Obj::Account(i)) => i,
            _ => panic!("not an account handle: {handle}"),
        }
    }

    fn note_index(&self, handle: &Handle) -> usize {
        match Obj::parse(handle) {
            Ok(Obj::Note { index, .. }) => index,
            _ => panic!("not a note handle: {handle}"),
        }
    }
}

impl ObjectBridge for MemoryHost {
    fn get(&self, object: &Handle, property: Property) -> Result<Value> {
        let state = self.state.borrow();
        state.structured_up()?;
        state.read(Obj::parse(object)?, property)
    }

    fn set(&self, object: &Handle, property: Property, value: &Value) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.structured_up()?;
        let obj = Obj::parse(object)?;
        let (Obj::Note { index, .. }, Property::Name | Property::Body) = (obj, property) else {
            return Err(NotesError::host(
                "setValueForKey",
                format!("{} of {} is read-only", property.selector(), obj.class()),
            ));
        };
        state.note(index)?;
        let text = value.clone().into_text().unwrap_or_default();
        if !state.quirks.ignore_structured_writes {
            state.set_note(index, property, text);
        }
        Ok(())
    }

    fn count(&self, collection: &Collection) -> Result<usize> {
        let state = self.state.borrow();
        state.structured_up()?;
        Ok(state.elements(collection)?.len())
    }

    fn handles(&self, collection: &Collection) -> Result<Vec<Handle>> {
        let state = self.state.borrow();
        state.structured_up()?;
        Ok(state
            .elements(collection)?
            .into_iter()
            .map(Obj::handle)
            .collect())
    }

    fn project(&self, collection: &Collection, path: &[Property]) -> Result<Vec<Value>> {
        let state = self.state.borrow();
        state.structured_up()?;
        self.projections.set(self.projections.get() + 1);
        let mut values = Vec::new();
        for obj in state.elements(collection)? {
            let mut value = Value::Object(obj.handle());
            for property in path {
                value = match value {
                    Value::Object(h) => state.read(Obj::parse(&h)?, *property)?,
                    _ => Value::Missing,
                };
            }
            values.push(value);
        }
        Ok(values)
    }

    fn lookup(&self, collection: &Collection, id: &str) -> Result<Option<Handle>> {
        let state = self.state.borrow();
        state.structured_up()?;
        for obj in state.elements(collection)? {
            if state.true_id(obj)? == id {
                let plain = match obj {
                    Obj::Note { index, .. } => Obj::Note {
                        index,
                        derived: false,
                    },
                    other => other,
                };
                return Ok(Some(plain.handle()));
            }
        }
        Ok(None)
    }

    fn describe(&self, object: &Handle) -> Result<String> {
        let state = self.state.borrow();
        state.structured_up()?;
        let obj = Obj::parse(object)?;
        let address = 0x6000_0000_usize + object.token().len() * 0x40;
        if obj == Obj::App {
            return Ok(format!("<SBApplication @0x{address:x}: application \"Notes\">"));
        }
        if state.quirks.opaque_descriptions {
            return Ok(format!("<SBObject @0x{address:x}: <class '{}'>>", obj.class()));
        }
        Ok(format!(
            "<SBObject @0x{address:x}: <class '{}'> id \"{}\" of application \"Notes\">",
            obj.class(),
            state.true_id(obj)?
        ))
    }

    fn insert_note(&self, folder: &Handle, body: &str) -> Result<Handle> {
        let mut state = self.state.borrow_mut();
        state.structured_up()?;
        let Obj::Folder(folder) = Obj::parse(folder)? else {
            return Err(NotesError::host("addObject", "notes can only be added to folders"));
        };
        state.folder(folder)?;
        if state.quirks.structured_insert_fails {
            return Err(NotesError::host("addObject", "note count did not grow"));
        }
        let plaintext = plaintext_of(body);
        let name = plaintext.lines().next().unwrap_or_default().to_string();
        let index = state.create_note(folder, &name, body, &plaintext);
        Ok(Obj::Note {
            index,
            derived: false,
        }
        .handle())
    }

    fn save_attachment(&self, attachment: &Handle, destination: &Path) -> Result<()> {
        let state = self.state.borrow();
        state.structured_up()?;
        let Obj::Attachment(i) = Obj::parse(attachment)? else {
            return Err(NotesError::host("saveIn", "not an attachment"));
        };
        fs::write(destination, &state.attachment(i)?.content)?;
        Ok(())
    }
}

impl ScriptBridge for MemoryHost {
    fn call(&self, routine: Routine, args: &[Value]) -> Result<Value> {
        routine.check_arity(args)?;
        self.legacy_calls.borrow_mut().push(routine);
        let mut state = self.state.borrow_mut();
        if state.quirks.failing_routines.contains(&routine) {
            return Err(NotesError::host(
                routine.name(),
                "Notes got an error: AppleEvent handler failed. (-10000)",
            ));
        }
        let args: Vec<String> = args
            .iter()
            .map(|a| a.clone().into_text().unwrap_or_default())
            .collect();
        state
            .dispatch(routine, &args)
            .map_err(|message| NotesError::host(routine.name(), message))
    }
}

// --- Test Fixtures ---

#[cfg(any(test, feature = "test_utils"))]
pub mod fixtures {
    use super::*;
    use crate::app::NotesApp;

    /// A host with one account ("iCloud") and a builder for its notes.
    pub struct HostFixture {
        pub host: Rc<MemoryHost>,
        pub account: Handle,
        pub notes: Vec<Handle>,
    }

    impl Default for HostFixture {
        fn default() -> Self {
            Self::new()
        }
    }

    impl HostFixture {
        pub fn new() -> Self {
            let host = Rc::new(MemoryHost::new());
            let account = host.add_account("iCloud");
            Self {
                host,
                account,
                notes: Vec::new(),
            }
        }

        /// The two-note account used throughout the filter tests.
        pub fn shopping() -> Self {
            Self::new()
                .with_note("Shopping", "milk, eggs")
                .with_note("Recipe", "eggs and milk")
        }

        pub fn with_note(mut self, name: &str, plaintext: &str) -> Self {
            let note = self.host.add_note(&self.account, name, plaintext);
            self.notes.push(note);
            self
        }

        pub fn with_protected_note(mut self, name: &str, plaintext: &str) -> Self {
            let note = self.host.add_note(&self.account, name, plaintext);
            self.host.set_password_protected(&note, true);
            self.notes.push(note);
            self
        }

        pub fn with_quirks(self, f: impl FnOnce(&mut Quirks)) -> Self {
            self.host.configure(f);
            self
        }

        pub fn app(&self) -> NotesApp {
            NotesApp::with_session(self.host.session())
        }
    }
}
