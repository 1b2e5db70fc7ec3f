//! The entry point.
//!
//! [`NotesApp`] owns the automation [`Session`]. Accounts, notes and lists borrow it, so
//! they cannot outlive the app.
//!
//! Note queries run in two stages: an optional OR over account names picks the
//! accounts, then the content filter is applied to each account's notes separately.
//! Results keep account order, then host order within each account.

use crate::account::Account;
use crate::error::{NotesError, Result};
use crate::host::jxa::JxaBridge;
use crate::host::osa::OsaScriptBridge;
use crate::host::{Collection, Handle, Property, Routine, Session, Value};
use crate::note::Note;
use crate::noteslist::NotesList;
use crate::policy::{self, Attribute};
use crate::predicate::{accounts_predicate, NoteFilter, Predicate};
use crate::scope::ScopedCollection;
use log::{debug, warn};
use std::path::PathBuf;
use std::rc::Rc;

pub struct NotesApp {
    session: Session,
}

impl NotesApp {
    /// Connect to Notes through `osascript`.
    pub fn connect() -> Result<Self> {
        let script = OsaScriptBridge::load()?;
        Ok(Self::with_session(Session::new(
            Rc::new(JxaBridge::new()),
            Rc::new(script),
        )))
    }

    pub fn with_session(session: Session) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    fn read(&self, attribute: Attribute) -> Result<Value> {
        policy::read(
            &self.session,
            &Handle::application(),
            attribute,
            &policy::no_args,
        )
    }

    pub fn version(&self) -> Result<String> {
        Ok(self
            .read(Attribute::AppVersion)?
            .into_text()
            .unwrap_or_default())
    }

    /// Account names, in host order.
    pub fn accounts(&self) -> Result<Vec<String>> {
        Ok(self
            .read(Attribute::AppAccounts)?
            .into_list()
            .into_iter()
            .filter_map(Value::into_text)
            .collect())
    }

    pub fn default_account(&self) -> Result<String> {
        Ok(self
            .read(Attribute::AppDefaultAccount)?
            .into_text()
            .unwrap_or_default())
    }

    /// The named account, or the default one.
    pub fn account(&self, name: Option<&str>) -> Result<Account<'_>> {
        let name = match name {
            Some(name) => name.to_string(),
            None => self.default_account()?,
        };
        let accounts = Collection::accounts();
        let bridge = self.session.bridge();
        if bridge.count(&accounts)? > 0 {
            let named = accounts.filtered(Predicate::names([name.as_str()]));
            if let Some(handle) = bridge.handles(&named)?.into_iter().next() {
                return Ok(Account::new(&self.session, handle));
            }
        }
        Err(NotesError::lookup("account", name))
    }

    /// One scope per selected account. An empty selection means every account.
    fn scopes(&self, accounts: &[String]) -> Result<Vec<ScopedCollection>> {
        let bridge = self.session.bridge();
        let all = Collection::accounts();
        let selected = match accounts_predicate(accounts) {
            Some(predicate) if bridge.count(&all)? > 0 => all.filtered(predicate),
            _ => all,
        };
        bridge
            .handles(&selected)?
            .into_iter()
            .map(|handle| Account::new(&self.session, handle).scope())
            .collect()
    }

    fn filtered_scopes(&self, filter: &NoteFilter) -> Result<Vec<ScopedCollection>> {
        self.scopes(&filter.accounts)?
            .iter()
            .map(|scope| scope.apply(&self.session, filter))
            .collect()
    }

    /// Notes matching `filter`, across the selected accounts.
    pub fn notes(&self, filter: &NoteFilter) -> Result<Vec<Note<'_>>> {
        let mut notes = Vec::new();
        for scope in self.filtered_scopes(filter)? {
            notes.extend(scope.notes(&self.session)?);
        }
        Ok(notes)
    }

    pub fn noteslist(&self, filter: &NoteFilter) -> Result<NotesList<'_>> {
        Ok(NotesList::new(&self.session, self.filtered_scopes(filter)?))
    }

    /// Notes selected in the Notes window.
    pub fn selection(&self) -> Result<Vec<Note<'_>>> {
        match self
            .session
            .bridge()
            .get(&Handle::application(), Property::Selection)
        {
            Ok(value) => {
                let handles: Vec<Handle> = value
                    .into_list()
                    .into_iter()
                    .filter_map(Value::into_handle)
                    .collect();
                if !handles.is_empty() {
                    return Ok(handles
                        .into_iter()
                        .map(|handle| Note::new(&self.session, handle))
                        .collect());
                }
                debug!("event=fallback attribute=selection from=structured to=legacy reason=absent");
            }
            Err(e) => warn!(
                "event=source_failed attribute=selection source=structured error={}",
                e
            ),
        }

        let mut notes = Vec::new();
        for pair in self.session.call(Routine::NotesGetSelected, &[])?.into_list() {
            let mut pair = pair.into_list().into_iter().filter_map(Value::into_text);
            let (Some(account), Some(id)) = (pair.next(), pair.next()) else {
                continue;
            };
            notes.push(self.account(Some(&account))?.note(&id)?);
        }
        Ok(notes)
    }

    /// Create a note in the default folder of the default account.
    pub fn make_note(&self, name: &str, body: &str, attachments: &[PathBuf]) -> Result<Note<'_>> {
        self.account(None)?.make_note(name, body, None, attachments)
    }

    pub fn activate(&self) -> Result<()> {
        self.session.call(Routine::NotesActivate, &[])?;
        Ok(())
    }

    pub fn quit(&self) -> Result<()> {
        self.session.call(Routine::NotesQuit, &[])?;
        Ok(())
    }

    /// Number of notes across every account.
    pub fn len(&self) -> Result<usize> {
        let mut total = 0;
        for handle in self.session.bridge().handles(&Collection::accounts())? {
            total += Account::new(&self.session, handle).len()?;
        }
        Ok(total)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Every note of every account, in account order.
    pub fn iter(&self) -> Result<impl Iterator<Item = Note<'_>>> {
        Ok(self.notes(&NoteFilter::default())?.into_iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::memory::fixtures::HostFixture;

    fn two_accounts() -> HostFixture {
        let fx = HostFixture::shopping();
        let work = fx.host.add_account("Work");
        fx.host.add_note(&work, "Standup", "eggs for breakfast");
        fx
    }

    fn names(notes: &[Note]) -> Vec<String> {
        notes.iter().map(|n| n.name().unwrap()).collect()
    }

    #[test]
    fn application_attributes() {
        let fx = two_accounts();
        let app = fx.app();
        assert_eq!(app.version().unwrap(), "4.11");
        assert_eq!(app.accounts().unwrap(), vec!["iCloud", "Work"]);
        assert_eq!(app.default_account().unwrap(), "iCloud");
        assert_eq!(app.len().unwrap(), 3);
        assert_eq!(app.iter().unwrap().count(), 3);
    }

    #[test]
    fn version_falls_back_to_legacy() {
        let fx = HostFixture::new().with_quirks(|q| q.structured_down = true);
        assert_eq!(fx.app().version().unwrap(), "4.11");
        assert_eq!(fx.host.legacy_calls(), vec![Routine::NotesVersion]);
    }

    #[test]
    fn unknown_account_is_a_lookup_failure() {
        let fx = two_accounts();
        let app = fx.app();
        let err = app.account(Some("Gmail")).unwrap_err();
        assert!(matches!(err, NotesError::Lookup { kind: "account", key } if key == "Gmail"));
    }

    #[test]
    fn notes_span_accounts_in_order() {
        let fx = two_accounts();
        let app = fx.app();
        let notes = app.notes(&NoteFilter::new().text("eggs")).unwrap();
        assert_eq!(names(&notes), vec!["Shopping", "Recipe", "Standup"]);
    }

    #[test]
    fn account_scope_is_applied_first() {
        let fx = two_accounts();
        let app = fx.app();
        let notes = app
            .notes(&NoteFilter::new().text("eggs").account("Work"))
            .unwrap();
        assert_eq!(names(&notes), vec!["Standup"]);
    }

    #[test]
    fn noteslist_matches_notes() {
        let fx = two_accounts();
        let app = fx.app();
        let filter = NoteFilter::new().name("s");
        let list = app.noteslist(&filter).unwrap();
        assert_eq!(list.names().unwrap(), names(&app.notes(&filter).unwrap()));
    }

    #[test]
    fn selection_through_structured_bridge() {
        let fx = two_accounts().with_quirks(|q| q.sentinel_ids = true);
        fx.host.select(&[fx.notes[1].clone()]);
        let app = fx.app();
        let selected = app.selection().unwrap();
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].id().unwrap().as_str(), fx.host.id_of(&fx.notes[1]));
        assert_eq!(selected[0].account().unwrap(), "iCloud");
    }

    #[test]
    fn selection_falls_back_to_legacy() {
        let fx = two_accounts().with_quirks(|q| {
            q.absent.insert(Property::Selection);
        });
        fx.host.select(&[fx.notes[0].clone()]);
        let app = fx.app();
        let selected = app.selection().unwrap();
        assert_eq!(names(&selected), vec!["Shopping"]);
        assert_eq!(fx.host.calls_to(Routine::NotesGetSelected), 1);
    }

    #[test]
    fn make_note_goes_to_default_account() {
        let fx = two_accounts();
        let app = fx.app();
        let note = app.make_note("New", "<div>body</div>", &[]).unwrap();
        assert_eq!(note.account().unwrap(), "iCloud");
        assert_eq!(app.account(None).unwrap().len().unwrap(), 3);
    }

    #[test]
    fn activate_and_quit() {
        let fx = HostFixture::new();
        let app = fx.app();
        app.quit().unwrap();
        assert!(!fx.host.is_running());
        app.activate().unwrap();
        assert!(fx.host.is_running());
    }
}
