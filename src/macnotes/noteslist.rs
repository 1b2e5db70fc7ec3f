//! Batch projections over many notes.
//!
//! A [`NotesList`] holds the scopes of one query. Each projection is one host call per
//! scope, concatenated in scope order, and is recomputed on every call. Projections of
//! the same list line up by position, so zipping two of them pairs attributes of the
//! same note as long as nothing mutates the scopes in between.
//!
//! Attributes whose chain starts with the legacy bridge, and positions where the
//! structured projection came back empty, are answered per note through the legacy
//! bridge, keyed by the projected id and the scope's account.

use crate::error::{NotesError, Result};
use crate::host::{Property, Session, Value};
use crate::ident::{self, Identifier};
use crate::note::{Note, NoteRecord};
use crate::policy::{Attribute, Read, Source, Strategy};
use crate::scope::ScopedCollection;
use chrono::{DateTime, Utc};
use log::{debug, warn};

pub struct NotesList<'a> {
    session: &'a Session,
    scopes: Vec<ScopedCollection>,
}

impl<'a> NotesList<'a> {
    pub fn new(session: &'a Session, scopes: Vec<ScopedCollection>) -> Self {
        Self { session, scopes }
    }

    pub fn scopes(&self) -> &[ScopedCollection] {
        &self.scopes
    }

    pub fn len(&self) -> Result<usize> {
        self.scopes
            .iter()
            .map(|scope| scope.count(self.session))
            .sum()
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Materialize every note, in projection order.
    pub fn notes(&self) -> Result<Vec<Note<'a>>> {
        let mut notes = Vec::new();
        for scope in &self.scopes {
            notes.extend(scope.notes(self.session)?);
        }
        Ok(notes)
    }

    /// One value per note for `attribute`, across all scopes.
    pub fn project(&self, attribute: Attribute) -> Result<Vec<Value>> {
        let mut values = Vec::new();
        for scope in &self.scopes {
            values.extend(self.project_scope(scope, attribute)?);
        }
        Ok(values)
    }

    pub fn ids(&self) -> Result<Vec<Identifier>> {
        Ok(self
            .project(Attribute::NoteId)?
            .into_iter()
            .map(to_identifier)
            .collect())
    }

    pub fn names(&self) -> Result<Vec<String>> {
        self.texts(Attribute::NoteName)
    }

    pub fn bodies(&self) -> Result<Vec<String>> {
        self.texts(Attribute::NoteBody)
    }

    pub fn plaintexts(&self) -> Result<Vec<String>> {
        self.texts(Attribute::NotePlaintext)
    }

    /// Folder names. Container handles never escape.
    pub fn folders(&self) -> Result<Vec<String>> {
        self.texts(Attribute::NoteFolder)
    }

    pub fn containers(&self) -> Result<Vec<String>> {
        self.folders()
    }

    pub fn creation_dates(&self) -> Result<Vec<Option<DateTime<Utc>>>> {
        self.dates(Attribute::NoteCreationDate)
    }

    pub fn modification_dates(&self) -> Result<Vec<Option<DateTime<Utc>>>> {
        self.dates(Attribute::NoteModificationDate)
    }

    pub fn password_protected(&self) -> Result<Vec<bool>> {
        Ok(self
            .project(Attribute::NotePasswordProtected)?
            .iter()
            .map(|v| v.as_bool().unwrap_or(false))
            .collect())
    }

    /// Zip the single-attribute projections into records, scope by scope.
    pub fn records(&self) -> Result<Vec<NoteRecord>> {
        let mut records = Vec::new();
        for scope in &self.scopes {
            let project = |attribute| self.project_scope(scope, attribute);
            let ids = project(Attribute::NoteId)?;
            let names = project(Attribute::NoteName)?;
            let bodies = project(Attribute::NoteBody)?;
            let plaintexts = project(Attribute::NotePlaintext)?;
            let created = project(Attribute::NoteCreationDate)?;
            let modified = project(Attribute::NoteModificationDate)?;
            let protected = project(Attribute::NotePasswordProtected)?;
            let folders = project(Attribute::NoteFolder)?;

            let len = ids.len();
            let lengths = [
                names.len(),
                bodies.len(),
                plaintexts.len(),
                created.len(),
                modified.len(),
                protected.len(),
                folders.len(),
            ];
            if lengths.iter().any(|&l| l != len) {
                return Err(NotesError::host(
                    "records",
                    format!(
                        "projections of account {} changed length during the snapshot",
                        scope.account()
                    ),
                ));
            }

            let rows = ids
                .into_iter()
                .zip(names)
                .zip(bodies)
                .zip(plaintexts)
                .zip(created)
                .zip(modified)
                .zip(protected)
                .zip(folders);
            for (((((((id, name), body), plaintext), created), modified), protected), folder) in rows {
                records.push(NoteRecord {
                    account: scope.account().to_string(),
                    id: to_identifier(id),
                    name: text(name),
                    body: text(body),
                    plaintext: text(plaintext),
                    creation_date: created.as_date(),
                    modification_date: modified.as_date(),
                    password_protected: protected.as_bool().unwrap_or(false),
                    folder: text(folder),
                });
            }
        }
        Ok(records)
    }

    fn texts(&self, attribute: Attribute) -> Result<Vec<String>> {
        Ok(self.project(attribute)?.into_iter().map(text).collect())
    }

    fn dates(&self, attribute: Attribute) -> Result<Vec<Option<DateTime<Utc>>>> {
        Ok(self
            .project(attribute)?
            .iter()
            .map(Value::as_date)
            .collect())
    }

    fn project_scope(&self, scope: &ScopedCollection, attribute: Attribute) -> Result<Vec<Value>> {
        if attribute == Attribute::NoteId {
            return self.project_ids(scope);
        }
        let strategy = attribute.strategy();
        let Read::Path(path) = strategy.read else {
            return Err(NotesError::host(
                "project",
                format!("{attribute} is not a note attribute"),
            ));
        };

        if strategy.legacy_first() {
            let ids = self.project_ids(scope)?;
            return ids
                .iter()
                .map(|id| self.legacy_value(scope, &strategy, attribute, id))
                .collect();
        }

        let mut values = match self.session.bridge().project(scope.collection(), path) {
            Ok(values) => values,
            Err(e) if strategy.uses(Source::Legacy) => {
                warn!(
                    "event=source_failed attribute={} source=structured account={} error={}",
                    attribute,
                    scope.account(),
                    e
                );
                let ids = self.project_ids(scope)?;
                return ids
                    .iter()
                    .map(|id| self.legacy_value(scope, &strategy, attribute, id))
                    .collect();
            }
            Err(e) => return Err(e),
        };

        if strategy.uses(Source::Legacy) && values.iter().any(|v| strategy.is_sentinel(v)) {
            let ids = self.project_ids(scope)?;
            for (value, id) in values.iter_mut().zip(&ids) {
                if strategy.is_sentinel(value) {
                    debug!(
                        "event=fallback attribute={} from=structured to=legacy reason=absent account={}",
                        attribute,
                        scope.account()
                    );
                    *value = self.legacy_value(scope, &strategy, attribute, id)?;
                }
            }
        }
        Ok(values)
    }

    /// Projected ids, with sentinel positions re-resolved per note.
    fn project_ids(&self, scope: &ScopedCollection) -> Result<Vec<Value>> {
        let strategy = Attribute::NoteId.strategy();
        let mut ids = self
            .session
            .bridge()
            .project(scope.collection(), &[Property::Id])?;
        if !ids.iter().any(|id| strategy.is_sentinel(id)) {
            return Ok(ids);
        }

        let handles = scope.handles(self.session)?;
        for (id, handle) in ids.iter_mut().zip(handles) {
            if !strategy.is_sentinel(id) {
                continue;
            }
            let mut resolved = ident::resolve(self.session.bridge(), &handle);
            if !resolved.is_valid() {
                resolved = Note::in_account(self.session, handle, scope.account()).id()?;
            }
            *id = Value::from(resolved.as_str());
        }
        Ok(ids)
    }

    fn legacy_value(
        &self,
        scope: &ScopedCollection,
        strategy: &Strategy,
        attribute: Attribute,
        id: &Value,
    ) -> Result<Value> {
        let Some(routine) = strategy.routine else {
            return Ok(Value::Missing);
        };
        let id = to_identifier(id.clone());
        if !id.is_valid() {
            warn!(
                "event=unresolved_id attribute={} account={} action=skip",
                attribute,
                scope.account()
            );
            return Ok(Value::Missing);
        }
        let reply = self.session.call(
            routine,
            &[Value::from(scope.account()), Value::from(id.as_str())],
        )?;
        Ok(strategy.legacy_value(reply))
    }
}

fn text(value: Value) -> String {
    value.into_text().unwrap_or_default()
}

fn to_identifier(value: Value) -> Identifier {
    value
        .into_text()
        .map(Identifier::new)
        .unwrap_or_else(Identifier::invalid)
}
