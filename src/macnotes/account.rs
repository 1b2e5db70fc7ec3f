//! Accounts.
//!
//! An account is the scope of every note query: its notes form one
//! [`ScopedCollection`], and folders are looked up within it.

use crate::convert;
use crate::error::{NotesError, Result};
use crate::folder::Folder;
use crate::host::{Collection, ElementKind, Handle, Routine, Session, Value};
use crate::ident::Identifier;
use crate::note::{expand_path, Note};
use crate::noteslist::NotesList;
use crate::policy::{self, Attribute};
use crate::predicate::{NoteFilter, Predicate};
use crate::scope::ScopedCollection;
use log::{debug, warn};
use once_cell::unsync::OnceCell;
use std::path::PathBuf;

#[derive(Clone)]
pub struct Account<'a> {
    session: &'a Session,
    handle: Handle,
    id: OnceCell<Identifier>,
}

impl<'a> Account<'a> {
    pub fn new(session: &'a Session, handle: Handle) -> Self {
        Self {
            session,
            handle,
            id: OnceCell::new(),
        }
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    pub fn name(&self) -> Result<String> {
        Ok(
            policy::read(self.session, &self.handle, Attribute::AccountName, &policy::no_args)?
                .into_text()
                .unwrap_or_default(),
        )
    }

    fn legacy_key(&self) -> Result<Vec<Value>> {
        Ok(vec![Value::from(self.name()?)])
    }

    /// Memoized once valid.
    pub fn id(&self) -> Result<Identifier> {
        if let Some(id) = self.id.get() {
            return Ok(id.clone());
        }
        let id = policy::read(self.session, &self.handle, Attribute::AccountId, &|| {
            self.legacy_key()
        })?
        .into_text()
        .map(Identifier::new)
        .unwrap_or_else(Identifier::invalid);
        if id.is_valid() {
            let _ = self.id.set(id.clone());
        }
        Ok(id)
    }

    /// Name of the folder new notes go to.
    pub fn default_folder(&self) -> Result<String> {
        Ok(policy::read(
            self.session,
            &self.handle,
            Attribute::AccountDefaultFolder,
            &|| self.legacy_key(),
        )?
        .into_text()
        .unwrap_or_default())
    }

    /// Folder names, in host order.
    pub fn folders(&self) -> Result<Vec<String>> {
        Ok(
            policy::read(self.session, &self.handle, Attribute::AccountFolders, &|| {
                self.legacy_key()
            })?
            .into_list()
            .into_iter()
            .filter_map(Value::into_text)
            .collect(),
        )
    }

    pub fn folder(&self, name: &str) -> Result<Folder<'a>> {
        let folders = Collection::elements(&self.handle, ElementKind::Folders);
        let bridge = self.session.bridge();
        if bridge.count(&folders)? > 0 {
            let named = folders.filtered(Predicate::names([name]));
            if let Some(handle) = bridge.handles(&named)?.into_iter().next() {
                return Ok(Folder::new(self.session, handle, &self.name()?));
            }
        }
        Err(NotesError::lookup("folder", name))
    }

    pub fn scope(&self) -> Result<ScopedCollection> {
        Ok(ScopedCollection::new(self.name()?, &self.handle))
    }

    pub fn notes(&self, filter: &NoteFilter) -> Result<Vec<Note<'a>>> {
        self.scope()?
            .apply(self.session, filter)?
            .notes(self.session)
    }

    pub fn noteslist(&self, filter: &NoteFilter) -> Result<NotesList<'a>> {
        let scope = self.scope()?.apply(self.session, filter)?;
        Ok(NotesList::new(self.session, vec![scope]))
    }

    /// Find a note of this account by id.
    pub fn note(&self, id: &str) -> Result<Note<'a>> {
        let notes = Collection::elements(&self.handle, ElementKind::Notes);
        match self.session.bridge().lookup(&notes, id)? {
            Some(handle) => Ok(Note::in_account(self.session, handle, &self.name()?)),
            None => Err(NotesError::lookup("note", id)),
        }
    }

    /// Notes whose name or body contains `text`, as the legacy search reports them.
    pub fn find(&self, text: &str) -> Result<Vec<Note<'a>>> {
        let mut args = self.legacy_key()?;
        args.push(Value::from(text));
        self.session
            .call(Routine::AccountFindWithText, &args)?
            .into_list()
            .into_iter()
            .filter_map(Value::into_text)
            .map(|id| self.note(&id))
            .collect()
    }

    pub fn len(&self) -> Result<usize> {
        let notes = Collection::elements(&self.handle, ElementKind::Notes);
        match self.session.bridge().count(&notes) {
            Ok(count) => Ok(count),
            Err(e) => {
                warn!(
                    "event=source_failed attribute=count source=structured handle={} error={}",
                    self.handle, e
                );
                debug!(
                    "event=fallback attribute=count from=structured to=legacy reason=error handle={}",
                    self.handle
                );
                let count = self.session.call(Routine::AccountGetCount, &self.legacy_key()?)?;
                match count {
                    Value::Int(n) => Ok(usize::try_from(n).unwrap_or(0)),
                    other => Ok(other
                        .into_text()
                        .and_then(|s| s.parse().ok())
                        .unwrap_or(0)),
                }
            }
        }
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Every note of the account, in host order.
    pub fn iter(&self) -> Result<impl Iterator<Item = Note<'a>>> {
        Ok(self.notes(&NoteFilter::default())?.into_iter())
    }

    /// Reveal the account in the Notes window.
    pub fn show(&self) -> Result<()> {
        self.session.call(Routine::AccountShow, &self.legacy_key()?)?;
        Ok(())
    }

    /// Create a note. The first line of the stored body is `name` as a heading.
    ///
    /// `folder` defaults to the account's default folder. Attachment paths are checked
    /// before anything is created.
    pub fn make_note(
        &self,
        name: &str,
        body: &str,
        folder: Option<&str>,
        attachments: &[PathBuf],
    ) -> Result<Note<'a>> {
        let paths = attachments
            .iter()
            .map(|p| expand_path(p))
            .collect::<Result<Vec<_>>>()?;
        let account = self.name()?;
        let folder_name = match folder {
            Some(folder) => folder.to_string(),
            None => self.default_folder()?,
        };
        let target = self.folder(&folder_name)?;
        let html = format!("<div><h1>{}</h1></div>\n{body}", convert::escape(name));

        let note = match self.session.bridge().insert_note(target.handle(), &html) {
            Ok(handle) => Note::in_account(self.session, handle, &account),
            Err(e) => {
                debug!(
                    "event=fallback attribute=make_note from=structured to=legacy reason=\"{}\" account={}",
                    e, account
                );
                let id = self.legacy_make_note(&account, folder, &folder_name, name, body)?;
                self.note(&id)?
            }
        };

        for path in &paths {
            note.add_attachment(path)?;
        }
        Ok(note)
    }

    fn legacy_make_note(
        &self,
        account: &str,
        folder: Option<&str>,
        folder_name: &str,
        name: &str,
        body: &str,
    ) -> Result<String> {
        let is_default = folder.is_none() && self.is_default()?;
        let reply = if is_default {
            self.session.call(
                Routine::NotesMakeNote,
                &[Value::from(name), Value::from(body)],
            )?
        } else {
            self.session.call(
                Routine::NotesMakeNoteWithAccount,
                &[
                    Value::from(account),
                    Value::from(folder_name),
                    Value::from(name),
                    Value::from(body),
                ],
            )?
        };
        reply
            .into_text()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| NotesError::host(Routine::NotesMakeNoteWithAccount.name(), "no note id returned"))
    }

    fn is_default(&self) -> Result<bool> {
        let default = policy::read(
            self.session,
            &Handle::application(),
            Attribute::AppDefaultAccount,
            &policy::no_args,
        )?;
        Ok(default.as_text() == Some(self.name()?.as_str()))
    }
}

impl std::fmt::Debug for Account<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Account")
            .field("handle", &self.handle)
            .field("id", &self.id.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::memory::fixtures::HostFixture;
    use crate::host::Property;
    use std::fs;

    fn account<'a>(fx: &HostFixture, session: &'a Session) -> Account<'a> {
        Account::new(session, fx.account.clone())
    }

    #[test]
    fn basic_attributes() {
        let fx = HostFixture::shopping();
        fx.host.add_folder(&fx.account, "Archive");
        let session = fx.host.session();
        let acct = account(&fx, &session);
        assert_eq!(acct.name().unwrap(), "iCloud");
        assert_eq!(acct.id().unwrap().as_str(), fx.host.id_of(&fx.account));
        assert_eq!(acct.default_folder().unwrap(), "Notes");
        assert_eq!(acct.folders().unwrap(), vec!["Notes", "Archive"]);
        assert_eq!(acct.len().unwrap(), 2);
        assert_eq!(acct.iter().unwrap().count(), 2);
    }

    #[test]
    fn default_folder_falls_back_to_legacy() {
        let fx = HostFixture::shopping().with_quirks(|q| {
            q.absent.insert(Property::DefaultFolder);
        });
        let session = fx.host.session();
        assert_eq!(account(&fx, &session).default_folder().unwrap(), "Notes");
        assert_eq!(fx.host.calls_to(Routine::AccountGetDefaultFolder), 1);
    }

    #[test]
    fn empty_account() {
        let fx = HostFixture::new();
        let session = fx.host.session();
        let acct = account(&fx, &session);
        assert!(acct.is_empty().unwrap());
        assert!(acct.notes(&NoteFilter::new().name("x")).unwrap().is_empty());
    }

    #[test]
    fn unknown_folder_is_a_lookup_failure() {
        let fx = HostFixture::shopping();
        let session = fx.host.session();
        let err = account(&fx, &session).folder("Nope").unwrap_err();
        assert!(matches!(err, NotesError::Lookup { kind: "folder", key } if key == "Nope"));
    }

    #[test]
    fn make_note_prefixes_the_heading() {
        let fx = HostFixture::shopping();
        let session = fx.host.session();
        let note = account(&fx, &session)
            .make_note("Todo", "<div>call mom</div>", None, &[])
            .unwrap();
        assert_eq!(note.name().unwrap(), "Todo");
        assert_eq!(note.body().unwrap(), "<div><h1>Todo</h1></div>\n<div>call mom</div>");
        assert_eq!(note.folder().unwrap(), "Notes");
        assert!(fx.host.legacy_calls().is_empty());
    }

    #[test]
    fn make_note_escapes_the_heading() {
        let fx = HostFixture::shopping();
        let session = fx.host.session();
        let note = account(&fx, &session)
            .make_note("Q&A <draft>", "<div>notes</div>", None, &[])
            .unwrap();
        assert_eq!(
            note.body().unwrap(),
            "<div><h1>Q&amp;A &lt;draft&gt;</h1></div>\n<div>notes</div>"
        );
        assert_eq!(note.name().unwrap(), "Q&A <draft>");
    }

    #[test]
    fn make_note_falls_back_to_legacy_with_account() {
        let fx = HostFixture::shopping().with_quirks(|q| q.structured_insert_fails = true);
        fx.host.add_folder(&fx.account, "Archive");
        let session = fx.host.session();
        let note = account(&fx, &session)
            .make_note("Old", "<div>stuff</div>", Some("Archive"), &[])
            .unwrap();
        assert_eq!(note.folder().unwrap(), "Archive");
        assert_eq!(note.name().unwrap(), "Old");
        assert_eq!(fx.host.calls_to(Routine::NotesMakeNoteWithAccount), 1);
    }

    #[test]
    fn make_note_in_default_account_uses_plain_legacy_routine() {
        let fx = HostFixture::shopping().with_quirks(|q| q.structured_insert_fails = true);
        let session = fx.host.session();
        account(&fx, &session)
            .make_note("New", "<div>x</div>", None, &[])
            .unwrap();
        assert_eq!(fx.host.calls_to(Routine::NotesMakeNote), 1);
        assert_eq!(fx.host.calls_to(Routine::NotesMakeNoteWithAccount), 0);
    }

    #[test]
    fn make_note_checks_attachments_first() {
        let fx = HostFixture::shopping();
        let session = fx.host.session();
        let err = account(&fx, &session)
            .make_note("New", "", None, &[PathBuf::from("/missing/file.png")])
            .unwrap_err();
        assert!(matches!(err, NotesError::FileNotFound(_)));
        assert_eq!(account(&fx, &session).len().unwrap(), 2);
    }

    #[test]
    fn make_note_with_attachment() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("photo.jpg");
        fs::write(&file, [0xff, 0xd8]).unwrap();
        let fx = HostFixture::shopping();
        let session = fx.host.session();
        let note = account(&fx, &session)
            .make_note("Trip", "", None, &[file])
            .unwrap();
        let names: Vec<String> = note
            .attachments()
            .unwrap()
            .iter()
            .map(|a| a.name().unwrap())
            .collect();
        assert_eq!(names, vec!["photo.jpg"]);
    }

    #[test]
    fn find_uses_legacy_search() {
        let fx = HostFixture::shopping();
        let session = fx.host.session();
        let found = account(&fx, &session).find("EGGS").unwrap();
        assert_eq!(found.len(), 2);
        let found = account(&fx, &session).find("recipe").unwrap();
        assert_eq!(found[0].name().unwrap(), "Recipe");
    }

    #[test]
    fn show_calls_legacy() {
        let fx = HostFixture::shopping();
        let session = fx.host.session();
        account(&fx, &session).show().unwrap();
        assert_eq!(fx.host.legacy_calls(), vec![Routine::AccountShow]);
    }
}
