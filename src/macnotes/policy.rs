//! Which backend answers which attribute.
//!
//! Every readable attribute has one [`Strategy`]: where the structured bridge finds
//! it, the ordered chain of sources to try, and the legacy routine that can stand in.
//! [`read`] walks the chain and returns the first answer that is not a sentinel.
//! Known structured-bridge defects are expressed here, as chain order, and nowhere else:
//!
//! - the password flag is legacy only
//! - a note's folder falls back to the legacy container name
//! - identifiers fall back to the debug description, and note ids finally to a legacy
//!   lookup by name

use crate::error::{NotesError, Result};
use crate::host::{Collection, ElementKind, Handle, Property, Routine, Session, Value};
use crate::ident::parse_debug_id;
use log::{debug, warn};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Structured,
    DebugRepr,
    Legacy,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Source::Structured => "structured",
            Source::DebugRepr => "debug_repr",
            Source::Legacy => "legacy",
        })
    }
}

/// Where the structured bridge finds an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Read {
    /// Follow a property path from the object, e.g. `[Container, Name]`.
    Path(&'static [Property]),
    /// Project one property over an element collection of the object.
    Project(ElementKind, Property),
}

/// What counts as "no answer".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sentinel {
    /// Missing, empty text, zero or an empty list.
    Empty,
    /// As `Empty`, plus the `"0"` id.
    Identifier,
}

/// How to read the legacy routine's reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    AsIs,
    /// A list that is only an answer when it has exactly one element.
    Single,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attribute {
    AppVersion,
    AppDefaultAccount,
    AppAccounts,
    AccountId,
    AccountName,
    AccountDefaultFolder,
    AccountFolders,
    NoteId,
    NoteName,
    NoteBody,
    NotePlaintext,
    NoteCreationDate,
    NoteModificationDate,
    NotePasswordProtected,
    NoteFolder,
    FolderId,
    FolderName,
    AttachmentId,
    AttachmentName,
    AttachmentCreationDate,
    AttachmentModificationDate,
    AttachmentContentIdentifier,
    AttachmentUrl,
}

impl Attribute {
    pub const ALL: &'static [Attribute] = &[
        Attribute::AppVersion,
        Attribute::AppDefaultAccount,
        Attribute::AppAccounts,
        Attribute::AccountId,
        Attribute::AccountName,
        Attribute::AccountDefaultFolder,
        Attribute::AccountFolders,
        Attribute::NoteId,
        Attribute::NoteName,
        Attribute::NoteBody,
        Attribute::NotePlaintext,
        Attribute::NoteCreationDate,
        Attribute::NoteModificationDate,
        Attribute::NotePasswordProtected,
        Attribute::NoteFolder,
        Attribute::FolderId,
        Attribute::FolderName,
        Attribute::AttachmentId,
        Attribute::AttachmentName,
        Attribute::AttachmentCreationDate,
        Attribute::AttachmentModificationDate,
        Attribute::AttachmentContentIdentifier,
        Attribute::AttachmentUrl,
    ];

    /// Short name used in logs and errors.
    pub fn name(&self) -> &'static str {
        match self {
            Attribute::AppVersion => "version",
            Attribute::AppDefaultAccount => "default_account",
            Attribute::AppAccounts => "accounts",
            Attribute::AccountDefaultFolder => "default_folder",
            Attribute::AccountFolders => "folders",
            Attribute::AccountId
            | Attribute::NoteId
            | Attribute::FolderId
            | Attribute::AttachmentId => "id",
            Attribute::AccountName
            | Attribute::NoteName
            | Attribute::FolderName
            | Attribute::AttachmentName => "name",
            Attribute::NoteBody => "body",
            Attribute::NotePlaintext => "plaintext",
            Attribute::NoteCreationDate | Attribute::AttachmentCreationDate => "creation_date",
            Attribute::NoteModificationDate | Attribute::AttachmentModificationDate => {
                "modification_date"
            }
            Attribute::NotePasswordProtected => "password_protected",
            Attribute::NoteFolder => "folder",
            Attribute::AttachmentContentIdentifier => "content_identifier",
            Attribute::AttachmentUrl => "url",
        }
    }

    pub fn strategy(&self) -> Strategy {
        use Attribute::*;
        match self {
            AppVersion => fallback(path(&[Property::Version]), Routine::NotesVersion),
            AppDefaultAccount => fallback(
                path(&[Property::DefaultAccount, Property::Name]),
                Routine::NotesGetDefaultAccount,
            ),
            AppAccounts => fallback(
                Read::Project(ElementKind::Accounts, Property::Name),
                Routine::NotesGetAccounts,
            ),
            AccountId => Strategy {
                chain: NOTE_ID_CHAIN,
                routine: Some(Routine::AccountId),
                sentinel: Sentinel::Identifier,
                ..structured(path(&[Property::Id]))
            },
            AccountName => structured(path(&[Property::Name])),
            AccountDefaultFolder => fallback(
                path(&[Property::DefaultFolder, Property::Name]),
                Routine::AccountGetDefaultFolder,
            ),
            AccountFolders => fallback(
                Read::Project(ElementKind::Folders, Property::Name),
                Routine::AccountGetFolderNames,
            ),
            NoteId => Strategy {
                chain: NOTE_ID_CHAIN,
                routine: Some(Routine::AccountFindWithName),
                sentinel: Sentinel::Identifier,
                reply: Reply::Single,
                ..structured(path(&[Property::Id]))
            },
            NoteName => Strategy {
                write_routine: Some(Routine::NoteSetName),
                ..fallback(path(&[Property::Name]), Routine::NoteGetName)
            },
            NoteBody => Strategy {
                write_routine: Some(Routine::NoteSetBody),
                ..fallback(path(&[Property::Body]), Routine::NoteGetBody)
            },
            NotePlaintext => fallback(path(&[Property::Plaintext]), Routine::NoteGetPlainText),
            NoteCreationDate => fallback(
                path(&[Property::CreationDate]),
                Routine::NoteGetCreationDate,
            ),
            NoteModificationDate => fallback(
                path(&[Property::ModificationDate]),
                Routine::NoteGetModificationDate,
            ),
            NotePasswordProtected => Strategy {
                chain: LEGACY_ONLY,
                ..fallback(
                    path(&[Property::PasswordProtected]),
                    Routine::NoteGetPasswordProtected,
                )
            },
            NoteFolder => fallback(
                path(&[Property::Container, Property::Name]),
                Routine::NoteGetContainer,
            ),
            FolderId | AttachmentId => Strategy {
                chain: ID_CHAIN,
                sentinel: Sentinel::Identifier,
                ..structured(path(&[Property::Id]))
            },
            FolderName => fallback(path(&[Property::Name]), Routine::FolderGetName),
            AttachmentName => structured(path(&[Property::Name])),
            AttachmentCreationDate => structured(path(&[Property::CreationDate])),
            AttachmentModificationDate => structured(path(&[Property::ModificationDate])),
            AttachmentContentIdentifier => structured(path(&[Property::ContentIdentifier])),
            AttachmentUrl => structured(path(&[Property::Url])),
        }
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

const STRUCTURED_ONLY: &[Source] = &[Source::Structured];
const STRUCTURED_THEN_LEGACY: &[Source] = &[Source::Structured, Source::Legacy];
const LEGACY_ONLY: &[Source] = &[Source::Legacy];
const ID_CHAIN: &[Source] = &[Source::Structured, Source::DebugRepr];
const NOTE_ID_CHAIN: &[Source] = &[Source::Structured, Source::DebugRepr, Source::Legacy];

/// One row of the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Strategy {
    pub read: Read,
    pub chain: &'static [Source],
    pub routine: Option<Routine>,
    pub write_routine: Option<Routine>,
    pub sentinel: Sentinel,
    pub reply: Reply,
}

const fn path(properties: &'static [Property]) -> Read {
    Read::Path(properties)
}

const fn structured(read: Read) -> Strategy {
    Strategy {
        read,
        chain: STRUCTURED_ONLY,
        routine: None,
        write_routine: None,
        sentinel: Sentinel::Empty,
        reply: Reply::AsIs,
    }
}

const fn fallback(read: Read, routine: Routine) -> Strategy {
    Strategy {
        read,
        chain: STRUCTURED_THEN_LEGACY,
        routine: Some(routine),
        write_routine: None,
        sentinel: Sentinel::Empty,
        reply: Reply::AsIs,
    }
}

impl Strategy {
    pub fn is_sentinel(&self, value: &Value) -> bool {
        let empty = value.is_absent() || matches!(value, Value::List(items) if items.is_empty());
        match self.sentinel {
            Sentinel::Empty => empty,
            Sentinel::Identifier => empty || value.as_text() == Some("0"),
        }
    }

    pub fn uses(&self, source: Source) -> bool {
        self.chain.contains(&source)
    }

    /// The chain starts with the legacy bridge.
    pub fn legacy_first(&self) -> bool {
        self.chain.first() == Some(&Source::Legacy)
    }

    /// Interpret a legacy reply according to [`Reply`].
    pub fn legacy_value(&self, reply: Value) -> Value {
        match self.reply {
            Reply::AsIs => reply,
            Reply::Single => {
                let mut items = reply.into_list();
                if items.len() == 1 {
                    items.remove(0)
                } else {
                    Value::Missing
                }
            }
        }
    }

    fn attempt(
        &self,
        session: &Session,
        handle: &Handle,
        source: Source,
        attribute: Attribute,
        legacy_args: &dyn Fn() -> Result<Vec<Value>>,
    ) -> Result<Value> {
        match source {
            Source::Structured => structured_value(session, handle, self.read),
            Source::DebugRepr => {
                let description = session.bridge().describe(handle)?;
                Ok(parse_debug_id(&description)
                    .map(|id| Value::Text(id.as_str().to_string()))
                    .unwrap_or(Value::Missing))
            }
            Source::Legacy => {
                let routine = self.routine.ok_or_else(|| {
                    NotesError::host("legacy", format!("no legacy routine for {attribute}"))
                })?;
                let args = legacy_args()?;
                Ok(self.legacy_value(session.call(routine, &args)?))
            }
        }
    }
}

/// Read through the structured bridge only.
pub fn structured_value(session: &Session, handle: &Handle, read: Read) -> Result<Value> {
    let bridge = session.bridge();
    match read {
        Read::Path(properties) => {
            let mut value = Value::Object(handle.clone());
            for property in properties {
                value = match value {
                    Value::Object(object) => bridge.get(&object, *property)?,
                    _ => return Ok(Value::Missing),
                };
            }
            Ok(value)
        }
        Read::Project(kind, property) => Ok(Value::List(
            bridge.project(&Collection::elements(handle, kind), &[property])?,
        )),
    }
}

/// Legacy arguments for attributes whose chain never reaches the legacy bridge.
pub fn no_args() -> Result<Vec<Value>> {
    Ok(Vec::new())
}

/// Walk the attribute's source chain.
///
/// Returns the first non-sentinel answer. A failing source is logged and the next one
/// is tried; only the last source's error reaches the caller. When every source answers
/// with a sentinel, the last sentinel is returned.
///
/// `legacy_args` is only evaluated when the legacy source is reached.
pub fn read(
    session: &Session,
    handle: &Handle,
    attribute: Attribute,
    legacy_args: &dyn Fn() -> Result<Vec<Value>>,
) -> Result<Value> {
    let strategy = attribute.strategy();
    let mut last = Ok(Value::Missing);
    let mut previous: Option<(Source, &str)> = None;

    for (step, source) in strategy.chain.iter().enumerate() {
        if let Some((from, reason)) = previous {
            debug!(
                "event=fallback attribute={} from={} to={} reason={} handle={}",
                attribute, from, source, reason, handle
            );
        }
        match strategy.attempt(session, handle, *source, attribute, legacy_args) {
            Ok(value) if !strategy.is_sentinel(&value) => return Ok(value),
            Ok(value) => {
                previous = Some((*source, "absent"));
                last = Ok(value);
            }
            Err(e) => {
                if step + 1 < strategy.chain.len() {
                    warn!(
                        "event=source_failed attribute={} source={} handle={} error={}",
                        attribute, source, handle, e
                    );
                }
                previous = Some((*source, "error"));
                last = Err(e);
            }
        }
    }
    last
}

/// Write-verify-retry for writable text attributes.
///
/// The structured bridge is tried first and the value read back. On mismatch the legacy
/// write routine is called with `legacy_args` plus the value, and the value is read back
/// again. Comparison is exact.
pub fn write(
    session: &Session,
    handle: &Handle,
    attribute: Attribute,
    value: &str,
    subject: &str,
    legacy_args: &dyn Fn() -> Result<Vec<Value>>,
) -> Result<()> {
    let strategy = attribute.strategy();
    let (Read::Path(&[property]), Some(routine)) = (strategy.read, strategy.write_routine) else {
        return Err(NotesError::host(
            "setValueForKey",
            format!("{attribute} is read-only"),
        ));
    };

    if let Err(e) = session.bridge().set(handle, property, &Value::from(value)) {
        warn!(
            "event=structured_write_failed attribute={} handle={} error={}",
            attribute, handle, e
        );
    }
    if read(session, handle, attribute, legacy_args)?.as_text() == Some(value) {
        return Ok(());
    }

    debug!(
        "event=fallback attribute={} from=structured to=legacy reason=verify_mismatch handle={}",
        attribute, handle
    );
    let mut args = legacy_args()?;
    args.push(Value::from(value));
    session.call(routine, &args)?;

    if read(session, handle, attribute, legacy_args)?.as_text() == Some(value) {
        Ok(())
    } else {
        Err(NotesError::WriteVerification {
            attribute: attribute.name(),
            id: subject.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::memory::fixtures::HostFixture;

    fn note_args(fx: &HostFixture, i: usize) -> impl Fn() -> Result<Vec<Value>> {
        let id = fx.host.id_of(&fx.notes[i]);
        move || Ok(vec![Value::from("iCloud"), Value::from(id.as_str())])
    }

    #[test]
    fn every_fallback_has_a_routine() {
        for attribute in Attribute::ALL {
            let s = attribute.strategy();
            assert!(!s.chain.is_empty(), "{attribute:?}");
            assert_eq!(s.uses(Source::Legacy), s.routine.is_some(), "{attribute:?}");
            if s.uses(Source::DebugRepr) {
                assert_eq!(s.sentinel, Sentinel::Identifier, "{attribute:?}");
            }
        }
    }

    #[test]
    fn password_flag_is_legacy_only() {
        let s = Attribute::NotePasswordProtected.strategy();
        assert!(s.legacy_first());
        assert!(!s.uses(Source::Structured));
    }

    #[test]
    fn structured_answer_needs_no_legacy_call() {
        let fx = HostFixture::shopping();
        let session = fx.host.session();
        let name = read(&session, &fx.notes[0], Attribute::NoteName, &note_args(&fx, 0)).unwrap();
        assert_eq!(name, Value::from("Shopping"));
        assert!(fx.host.legacy_calls().is_empty());
    }

    #[test]
    fn absent_structured_value_falls_back() {
        let fx = HostFixture::shopping().with_quirks(|q| {
            q.absent.insert(Property::Container);
        });
        let session = fx.host.session();
        let folder = read(&session, &fx.notes[1], Attribute::NoteFolder, &note_args(&fx, 1)).unwrap();
        assert_eq!(folder, Value::from("Notes"));
        assert_eq!(fx.host.legacy_calls(), vec![Routine::NoteGetContainer]);
    }

    #[test]
    fn structured_error_falls_back() {
        let fx = HostFixture::shopping().with_quirks(|q| q.structured_down = true);
        let session = fx.host.session();
        let body = read(&session, &fx.notes[0], Attribute::NotePlaintext, &note_args(&fx, 0)).unwrap();
        assert_eq!(body, Value::from("milk, eggs"));
    }

    #[test]
    fn only_the_last_error_propagates() {
        let fx = HostFixture::shopping().with_quirks(|q| {
            q.structured_down = true;
            q.failing_routines.insert(Routine::NoteGetName);
        });
        let session = fx.host.session();
        let err = read(&session, &fx.notes[0], Attribute::NoteName, &note_args(&fx, 0)).unwrap_err();
        match err {
            NotesError::Host { routine, .. } => assert_eq!(routine, "noteGetName"),
            other => panic!("expected legacy host error, got {other:?}"),
        }
    }

    #[test]
    fn legacy_args_are_lazy() {
        let fx = HostFixture::shopping();
        let session = fx.host.session();
        let args = || -> Result<Vec<Value>> { Err(NotesError::Api("should not run".into())) };
        let name = read(&session, &fx.notes[0], Attribute::NoteName, &args).unwrap();
        assert_eq!(name, Value::from("Shopping"));
    }

    #[test]
    fn single_reply_requires_exactly_one() {
        let s = Attribute::NoteId.strategy();
        let one = Value::List(vec![Value::from("a")]);
        let two = Value::List(vec![Value::from("a"), Value::from("b")]);
        assert_eq!(s.legacy_value(one), Value::from("a"));
        assert_eq!(s.legacy_value(two), Value::Missing);
    }

    #[test]
    fn write_uses_structured_when_it_sticks() {
        let fx = HostFixture::shopping();
        let session = fx.host.session();
        write(&session, &fx.notes[0], Attribute::NoteName, "Groceries", "n1", &note_args(&fx, 0)).unwrap();
        assert_eq!(fx.host.calls_to(Routine::NoteSetName), 0);
    }

    #[test]
    fn write_retries_through_legacy() {
        let fx = HostFixture::shopping().with_quirks(|q| q.ignore_structured_writes = true);
        let session = fx.host.session();
        write(&session, &fx.notes[0], Attribute::NoteName, "Groceries", "n1", &note_args(&fx, 0)).unwrap();
        assert_eq!(fx.host.calls_to(Routine::NoteSetName), 1);
        let name = read(&session, &fx.notes[0], Attribute::NoteName, &note_args(&fx, 0)).unwrap();
        assert_eq!(name, Value::from("Groceries"));
    }

    #[test]
    fn write_that_never_sticks_is_a_verification_error() {
        let fx = HostFixture::shopping().with_quirks(|q| {
            q.ignore_structured_writes = true;
            q.ignore_legacy_writes = true;
        });
        let session = fx.host.session();
        let err = write(&session, &fx.notes[0], Attribute::NoteBody, "<div>x</div>", "n1", &note_args(&fx, 0))
            .unwrap_err();
        assert!(matches!(
            err,
            NotesError::WriteVerification { attribute: "body", .. }
        ));
    }

    #[test]
    fn read_only_attributes_reject_writes() {
        let fx = HostFixture::shopping();
        let session = fx.host.session();
        let err = write(&session, &fx.notes[0], Attribute::NotePlaintext, "x", "n1", &note_args(&fx, 0))
            .unwrap_err();
        assert!(matches!(err, NotesError::Host { .. }));
    }
}
