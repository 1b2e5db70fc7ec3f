//! Per-account note collections.
//!
//! A [`ScopedCollection`] is "every note of one account", kept as a lazy host
//! collection. Filtering replaces the collection with a filtered view; nothing is
//! fetched until a terminal call (`count`, `handles`, a projection).

use crate::error::{NotesError, Result};
use crate::host::{Collection, ElementKind, Handle, Session};
use crate::note::Note;
use crate::predicate::{compile, Field, NoteFilter, Predicate};
use log::{debug, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct ScopedCollection {
    account: String,
    notes: Collection,
}

impl ScopedCollection {
    pub fn new(account: impl Into<String>, account_handle: &Handle) -> Self {
        Self {
            account: account.into(),
            notes: Collection::elements(account_handle, ElementKind::Notes),
        }
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    pub fn collection(&self) -> &Collection {
        &self.notes
    }

    pub fn count(&self, session: &Session) -> Result<usize> {
        session.bridge().count(&self.notes)
    }

    pub fn handles(&self, session: &Session) -> Result<Vec<Handle>> {
        session.bridge().handles(&self.notes)
    }

    /// Materialize into notes, each already bound to this account.
    pub fn notes<'a>(&self, session: &'a Session) -> Result<Vec<Note<'a>>> {
        Ok(self
            .handles(session)?
            .into_iter()
            .map(|handle| Note::in_account(session, handle, &self.account))
            .collect())
    }

    fn filtered(&self, predicate: Predicate) -> Self {
        Self {
            account: self.account.clone(),
            notes: self.notes.filtered(predicate),
        }
    }

    /// Apply the content part of `filter` and return the narrowed scope.
    ///
    /// An empty collection is returned unfiltered. Clauses the structured bridge cannot
    /// be trusted with (the password flag) are evaluated per note and turned into an
    /// id restriction.
    pub fn apply(&self, session: &Session, filter: &NoteFilter) -> Result<Self> {
        let Some(predicate) = compile(filter) else {
            return Ok(self.clone());
        };
        if self.count(session)? == 0 {
            debug!("event=skip_filter account={} reason=empty", self.account);
            return Ok(self.clone());
        }

        let (structured, residual) = predicate
            .clone()
            .partition(|f| f != Field::PasswordProtected);
        let narrowed = if structured.is_empty() {
            self.clone()
        } else {
            self.filtered(structured)
        };
        if residual.is_empty() || narrowed.count(session)? == 0 {
            return Ok(narrowed);
        }

        let restriction = match narrowed.restrict(session, &residual)? {
            Some(restriction) => restriction,
            // Filtered handles may report the sentinel id; the unfiltered ones do not.
            None => self
                .restrict(session, &predicate)?
                .ok_or_else(|| NotesError::lookup("note id", self.account.clone()))?,
        };
        Ok(narrowed.filtered(restriction))
    }

    /// Evaluate `predicate` per note and turn the matches into an id restriction.
    ///
    /// `None` as soon as one note's id cannot be resolved.
    fn restrict(&self, session: &Session, predicate: &Predicate) -> Result<Option<Predicate>> {
        let mut ids = Vec::new();
        for note in self.notes(session)? {
            let id = note.id()?;
            if !id.is_valid() {
                warn!(
                    "event=unresolved_id account={} handle={} action=rescan",
                    self.account,
                    note.handle()
                );
                return Ok(None);
            }
            if predicate.matches_with(|field| note.field(field))? {
                ids.push(id.as_str().to_string());
            }
        }
        debug!(
            "event=residual_filter account={} matched={}",
            self.account,
            ids.len()
        );
        Ok(Some(if ids.is_empty() {
            Predicate::never()
        } else {
            Predicate::ids(ids)
        }))
    }
}
