//! Notes.
//!
//! A [`Note`] owns its host handle and nothing else of substance: every attribute read
//! is a round trip through the strategy table in [`crate::policy`]. The account name
//! and the id are the only memoized fields. Both are stable for the life of the process,
//! and a sentinel id is never memoized.
//!
//! Equality and hashing resolve the `(account, id)` pair on demand. A note whose pair
//! cannot be resolved (a failed lookup or the sentinel id) is only equal to itself.

use crate::attachment::Attachment;
use crate::error::{NotesError, Result};
use crate::host::{Collection, ElementKind, Handle, Property, Routine, Session, Value};
use crate::ident::{self, Identifier};
use crate::policy::{self, Attribute, Read};
use crate::predicate::Field;
use chrono::{DateTime, Utc};
use directories::BaseDirs;
use log::debug;
use once_cell::unsync::OnceCell;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::ptr;

/// A flat snapshot of one note.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteRecord {
    pub account: String,
    pub id: Identifier,
    pub name: String,
    pub body: String,
    pub plaintext: String,
    pub creation_date: Option<DateTime<Utc>>,
    pub modification_date: Option<DateTime<Utc>>,
    pub password_protected: bool,
    pub folder: String,
}

#[derive(Clone)]
pub struct Note<'a> {
    session: &'a Session,
    handle: Handle,
    account: OnceCell<String>,
    id: OnceCell<Identifier>,
}

impl<'a> Note<'a> {
    /// A note whose account is not known yet, e.g. from the UI selection.
    pub fn new(session: &'a Session, handle: Handle) -> Self {
        Self {
            session,
            handle,
            account: OnceCell::new(),
            id: OnceCell::new(),
        }
    }

    /// A note found through one account's collection.
    pub fn in_account(session: &'a Session, handle: Handle, account: &str) -> Self {
        let note = Self::new(session, handle);
        let _ = note.account.set(account.to_string());
        note
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// The note's id, or the sentinel when nothing could resolve it.
    ///
    /// Tries the handle's own id, then its debug description, then (when the account is
    /// known) a legacy lookup by exact name that must match exactly one note.
    pub fn id(&self) -> Result<Identifier> {
        if let Some(id) = self.id.get() {
            return Ok(id.clone());
        }
        let id = match self.account.get() {
            Some(account) => {
                let legacy_args = || -> Result<Vec<Value>> {
                    let name = policy::structured_value(
                        self.session,
                        &self.handle,
                        Read::Path(&[Property::Name]),
                    )?;
                    Ok(vec![Value::from(account.as_str()), name])
                };
                let value = policy::read(self.session, &self.handle, Attribute::NoteId, &legacy_args)?;
                value.into_text().map(Identifier::new).unwrap_or_else(Identifier::invalid)
            }
            None => ident::resolve(self.session.bridge(), &self.handle),
        };
        if id.is_valid() {
            let _ = self.id.set(id.clone());
        }
        Ok(id)
    }

    /// Name of the owning account. Resolved through the legacy bridge when the note did
    /// not come from an account scope.
    pub fn account(&self) -> Result<String> {
        if let Some(account) = self.account.get() {
            return Ok(account.clone());
        }
        let id = self.valid_id()?;
        let account = self
            .session
            .call(Routine::NoteGetAccount, &[Value::from(id.as_str())])?
            .into_text()
            .filter(|a| !a.is_empty())
            .ok_or_else(|| NotesError::lookup("account of note", id.as_str()))?;
        let _ = self.account.set(account.clone());
        Ok(account)
    }

    fn valid_id(&self) -> Result<Identifier> {
        let id = self.id()?;
        if id.is_valid() {
            Ok(id)
        } else {
            Err(NotesError::lookup("note", self.handle.token()))
        }
    }

    /// `[account, id]`, the key every per-note legacy routine takes.
    fn legacy_key(&self) -> Result<Vec<Value>> {
        let id = self.valid_id()?;
        Ok(vec![
            Value::from(self.account()?),
            Value::from(id.as_str()),
        ])
    }

    fn read(&self, attribute: Attribute) -> Result<Value> {
        policy::read(self.session, &self.handle, attribute, &|| self.legacy_key())
    }

    fn read_text(&self, attribute: Attribute) -> Result<String> {
        Ok(self.read(attribute)?.into_text().unwrap_or_default())
    }

    fn read_date(&self, attribute: Attribute) -> Result<DateTime<Utc>> {
        self.read(attribute)?.as_date().ok_or_else(|| {
            NotesError::host(attribute.name(), format!("note {} has no date", self.handle))
        })
    }

    pub fn name(&self) -> Result<String> {
        self.read_text(Attribute::NoteName)
    }

    /// The HTML body.
    pub fn body(&self) -> Result<String> {
        self.read_text(Attribute::NoteBody)
    }

    pub fn plaintext(&self) -> Result<String> {
        self.read_text(Attribute::NotePlaintext)
    }

    pub fn creation_date(&self) -> Result<DateTime<Utc>> {
        self.read_date(Attribute::NoteCreationDate)
    }

    pub fn modification_date(&self) -> Result<DateTime<Utc>> {
        self.read_date(Attribute::NoteModificationDate)
    }

    pub fn password_protected(&self) -> Result<bool> {
        Ok(self
            .read(Attribute::NotePasswordProtected)?
            .as_bool()
            .unwrap_or(false))
    }

    /// Name of the containing folder.
    pub fn folder(&self) -> Result<String> {
        self.read_text(Attribute::NoteFolder)
    }

    pub fn set_name(&self, name: &str) -> Result<()> {
        self.write(Attribute::NoteName, name)
    }

    pub fn set_body(&self, body: &str) -> Result<()> {
        self.write(Attribute::NoteBody, body)
    }

    fn write(&self, attribute: Attribute, value: &str) -> Result<()> {
        let id = self.id()?;
        policy::write(
            self.session,
            &self.handle,
            attribute,
            value,
            id.as_str(),
            &|| self.legacy_key(),
        )
    }

    /// Attachments, one per attachment id.
    pub fn attachments(&self) -> Result<Vec<Attachment<'a>>> {
        let collection = Collection::elements(&self.handle, ElementKind::Attachments);
        let mut seen = HashSet::new();
        let mut attachments = Vec::new();
        for handle in self.session.bridge().handles(&collection)? {
            let attachment = Attachment::new(self.session, handle);
            let id = attachment.id()?;
            if id.is_valid() && !seen.insert(id.clone()) {
                debug!("event=duplicate_attachment note={} id={}", self.handle, id);
                continue;
            }
            attachments.push(attachment);
        }
        Ok(attachments)
    }

    /// Attach a file. `~` is expanded and the path must exist.
    pub fn add_attachment(&self, path: &Path) -> Result<Attachment<'a>> {
        let path = expand_path(path)?;
        let mut args = self.legacy_key()?;
        args.push(Value::from(path.to_string_lossy().into_owned()));
        let id = self
            .session
            .call(Routine::NoteAddAttachment, &args)?
            .into_text()
            .unwrap_or_default();
        let collection = Collection::elements(&self.handle, ElementKind::Attachments);
        match self.session.bridge().lookup(&collection, &id)? {
            Some(handle) => Ok(Attachment::new(self.session, handle)),
            None => Err(NotesError::lookup("attachment", id)),
        }
    }

    /// Reveal the note in the Notes window.
    pub fn show(&self) -> Result<()> {
        self.session.call(Routine::NoteShow, &self.legacy_key()?)?;
        Ok(())
    }

    /// Value of one filterable field, as a predicate sees it.
    pub fn field(&self, field: Field) -> Result<Value> {
        match field {
            Field::Id => Ok(Value::from(self.id()?.as_str())),
            Field::Name => self.read(Attribute::NoteName),
            Field::Plaintext => self.read(Attribute::NotePlaintext),
            Field::PasswordProtected => self.read(Attribute::NotePasswordProtected),
        }
    }

    pub fn to_record(&self) -> Result<NoteRecord> {
        Ok(NoteRecord {
            account: self.account()?,
            id: self.id()?,
            name: self.name()?,
            body: self.body()?,
            plaintext: self.plaintext()?,
            creation_date: self.read(Attribute::NoteCreationDate)?.as_date(),
            modification_date: self.read(Attribute::NoteModificationDate)?.as_date(),
            password_protected: self.password_protected()?,
            folder: self.folder()?,
        })
    }

    /// `(account, id)`, or `None` when either cannot be resolved.
    fn key(&self) -> Option<(String, Identifier)> {
        let id = self.id().ok().filter(Identifier::is_valid)?;
        let account = self.account().ok()?;
        Some((account, id))
    }
}

impl PartialEq for Note<'_> {
    fn eq(&self, other: &Self) -> bool {
        if ptr::eq(self, other) {
            return true;
        }
        match (self.key(), other.key()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Note<'_> {}

impl Hash for Note<'_> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl std::fmt::Debug for Note<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Note")
            .field("handle", &self.handle)
            .field("account", &self.account.get())
            .field("id", &self.id.get())
            .finish()
    }
}

/// Expand a leading `~` and resolve to an absolute path that exists.
pub(crate) fn expand_path(path: &Path) -> Result<PathBuf> {
    let expanded = match path.strip_prefix("~") {
        Ok(rest) => BaseDirs::new()
            .map(|dirs| dirs.home_dir().join(rest))
            .unwrap_or_else(|| path.to_path_buf()),
        Err(_) => path.to_path_buf(),
    };
    expanded
        .canonicalize()
        .map_err(|_| NotesError::FileNotFound(expanded))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::memory::fixtures::HostFixture;
    use crate::host::ObjectBridge;
    use std::collections::HashMap;
    use std::fs;

    #[test]
    fn reads_go_through_the_structured_bridge() {
        let fx = HostFixture::shopping();
        let session = fx.host.session();
        let note = Note::in_account(&session, fx.notes[0].clone(), "iCloud");
        assert_eq!(note.name().unwrap(), "Shopping");
        assert_eq!(note.plaintext().unwrap(), "milk, eggs");
        assert_eq!(note.folder().unwrap(), "Notes");
        assert!(note.body().unwrap().contains("<h1>Shopping</h1>"));
        assert!(note.creation_date().unwrap() <= note.modification_date().unwrap());
        assert!(fx.host.legacy_calls().is_empty());
    }

    #[test]
    fn password_flag_ignores_the_structured_bridge() {
        let fx = HostFixture::new()
            .with_protected_note("Secret", "x")
            .with_quirks(|q| q.password_unreliable = true);
        let session = fx.host.session();
        let note = Note::in_account(&session, fx.notes[0].clone(), "iCloud");
        assert!(fx.host.get(&fx.notes[0], Property::PasswordProtected).unwrap() == Value::Bool(false));
        assert!(note.password_protected().unwrap());
        assert_eq!(fx.host.calls_to(Routine::NoteGetPasswordProtected), 1);
    }

    #[test]
    fn id_is_idempotent_and_memoized() {
        let fx = HostFixture::shopping().with_quirks(|q| q.sentinel_ids = true);
        let session = fx.host.session();
        let derived = fx.host.derived(&fx.notes[0]);
        let note = Note::in_account(&session, derived, "iCloud");
        let first = note.id().unwrap();
        let second = note.id().unwrap();
        assert!(first.is_valid());
        assert_eq!(first, second);
        assert_eq!(first.as_str(), fx.host.id_of(&fx.notes[0]));
    }

    #[test]
    fn id_falls_back_to_legacy_name_lookup() {
        let fx = HostFixture::shopping().with_quirks(|q| {
            q.sentinel_ids = true;
            q.opaque_descriptions = true;
        });
        let session = fx.host.session();
        let note = Note::in_account(&session, fx.host.derived(&fx.notes[1]), "iCloud");
        assert_eq!(note.id().unwrap().as_str(), fx.host.id_of(&fx.notes[1]));
        assert_eq!(fx.host.calls_to(Routine::AccountFindWithName), 1);
    }

    #[test]
    fn ambiguous_name_leaves_the_sentinel_uncached() {
        let fx = HostFixture::shopping()
            .with_note("Shopping", "second list")
            .with_quirks(|q| {
                q.sentinel_ids = true;
                q.opaque_descriptions = true;
            });
        let session = fx.host.session();
        let note = Note::in_account(&session, fx.host.derived(&fx.notes[0]), "iCloud");
        assert!(!note.id().unwrap().is_valid());
        assert!(!note.id().unwrap().is_valid());
        // Not cached: each call asked again.
        assert_eq!(fx.host.calls_to(Routine::AccountFindWithName), 2);
        assert!(matches!(note.name(), Ok(name) if name == "Shopping"));
        assert!(matches!(note.plaintext(), Ok(_)));
        assert!(matches!(
            note.password_protected(),
            Err(NotesError::Lookup { kind: "note", .. })
        ));
    }

    #[test]
    fn sentinel_notes_are_never_equal() {
        let fx = HostFixture::shopping().with_quirks(|q| {
            q.sentinel_ids = true;
            q.opaque_descriptions = true;
        });
        let session = fx.host.session();
        let a = Note::new(&session, fx.host.derived(&fx.notes[0]));
        let b = Note::new(&session, fx.host.derived(&fx.notes[0]));
        assert!(!a.id().unwrap().is_valid());
        assert_ne!(a, b);
        assert_eq!(a, a);
    }

    #[test]
    fn equality_uses_account_and_id() {
        let fx = HostFixture::shopping();
        let session = fx.host.session();
        let a = Note::in_account(&session, fx.notes[0].clone(), "iCloud");
        let b = Note::in_account(&session, fx.host.derived(&fx.notes[0]), "iCloud");
        let c = Note::in_account(&session, fx.notes[1].clone(), "iCloud");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn hash_is_the_same_before_and_after_resolution() {
        let fx = HostFixture::shopping();
        let session = fx.host.session();
        let a = Note::new(&session, fx.host.derived(&fx.notes[0]));
        let b = Note::in_account(&session, fx.notes[0].clone(), "iCloud");

        let mut seen = HashMap::new();
        seen.insert(a.clone(), 1);
        a.id().unwrap();
        a.account().unwrap();
        assert_eq!(seen.get(&a), Some(&1));
        assert_eq!(seen.get(&b), Some(&1));
    }

    #[test]
    fn account_resolved_through_legacy_for_selection_handles() {
        let fx = HostFixture::shopping();
        let session = fx.host.session();
        let note = Note::new(&session, fx.host.derived(&fx.notes[0]));
        assert_eq!(note.account().unwrap(), "iCloud");
        assert_eq!(note.account().unwrap(), "iCloud");
        assert_eq!(fx.host.calls_to(Routine::NoteGetAccount), 1);
    }

    #[test]
    fn name_round_trips_through_either_backend() {
        for ignore_structured in [false, true] {
            let fx = HostFixture::shopping()
                .with_quirks(|q| q.ignore_structured_writes = ignore_structured);
            let session = fx.host.session();
            let note = Note::in_account(&session, fx.notes[0].clone(), "iCloud");
            note.set_name("Groceries").unwrap();
            assert_eq!(note.name().unwrap(), "Groceries");
        }
    }

    #[test]
    fn body_write_compares_exactly() {
        let fx = HostFixture::shopping().with_quirks(|q| {
            q.ignore_structured_writes = true;
            q.ignore_legacy_writes = true;
        });
        let session = fx.host.session();
        let note = Note::in_account(&session, fx.notes[0].clone(), "iCloud");
        let err = note.set_body("<div>new</div>").unwrap_err();
        match err {
            NotesError::WriteVerification { attribute, id } => {
                assert_eq!(attribute, "body");
                assert_eq!(id, fx.host.id_of(&fx.notes[0]));
            }
            other => panic!("expected write verification error, got {other:?}"),
        }
    }

    #[test]
    fn attachments_are_deduplicated_by_id() {
        let fx = HostFixture::shopping().with_quirks(|q| q.duplicate_attachments = true);
        fx.host.add_attachment(&fx.notes[0], "a.png", b"a");
        fx.host.add_attachment(&fx.notes[0], "b.pdf", b"b");
        let session = fx.host.session();
        let note = Note::in_account(&session, fx.notes[0].clone(), "iCloud");
        let names: Vec<String> = note
            .attachments()
            .unwrap()
            .iter()
            .map(|a| a.name().unwrap())
            .collect();
        assert_eq!(names, vec!["a.png", "b.pdf"]);
    }

    #[test]
    fn add_attachment_finds_the_new_attachment() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("receipt.txt");
        fs::write(&file, "total: 3").unwrap();

        let fx = HostFixture::shopping();
        let session = fx.host.session();
        let note = Note::in_account(&session, fx.notes[0].clone(), "iCloud");
        let attachment = note.add_attachment(&file).unwrap();
        assert_eq!(attachment.name().unwrap(), "receipt.txt");
        assert_eq!(note.attachments().unwrap().len(), 1);
    }

    #[test]
    fn add_attachment_requires_an_existing_file() {
        let fx = HostFixture::shopping();
        let session = fx.host.session();
        let note = Note::in_account(&session, fx.notes[0].clone(), "iCloud");
        let err = note
            .add_attachment(Path::new("/definitely/not/here.png"))
            .unwrap_err();
        assert!(matches!(err, NotesError::FileNotFound(_)));
        assert_eq!(fx.host.calls_to(Routine::NoteAddAttachment), 0);
    }

    #[test]
    fn record_collects_every_attribute() {
        let fx = HostFixture::new().with_protected_note("Secret", "hidden");
        let session = fx.host.session();
        let note = Note::in_account(&session, fx.notes[0].clone(), "iCloud");
        let record = note.to_record().unwrap();
        assert_eq!(record.account, "iCloud");
        assert_eq!(record.name, "Secret");
        assert_eq!(record.plaintext, "hidden");
        assert_eq!(record.folder, "Notes");
        assert!(record.password_protected);
        assert!(record.creation_date.is_some());
    }
}
