use crate::error::{NotesError, Result};
use crate::host::{Handle, Session};
use crate::ident::Identifier;
use crate::policy::{self, Attribute};
use chrono::{DateTime, Utc};
use once_cell::unsync::OnceCell;
use std::path::{Path, PathBuf};

/// A file attached to a note. Read-only.
#[derive(Clone)]
pub struct Attachment<'a> {
    session: &'a Session,
    handle: Handle,
    id: OnceCell<Identifier>,
}

impl<'a> Attachment<'a> {
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

    pub fn id(&self) -> Result<Identifier> {
        if let Some(id) = self.id.get() {
            return Ok(id.clone());
        }
        let id = self
            .read(Attribute::AttachmentId)?
            .into_text()
            .map(Identifier::new)
            .unwrap_or_else(Identifier::invalid);
        if id.is_valid() {
            let _ = self.id.set(id.clone());
        }
        Ok(id)
    }

    fn read(&self, attribute: Attribute) -> Result<crate::host::Value> {
        policy::read(self.session, &self.handle, attribute, &policy::no_args)
    }

    fn read_text(&self, attribute: Attribute) -> Result<Option<String>> {
        Ok(self.read(attribute)?.into_text().filter(|s| !s.is_empty()))
    }

    pub fn name(&self) -> Result<String> {
        Ok(self.read_text(Attribute::AttachmentName)?.unwrap_or_default())
    }

    pub fn creation_date(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(self.read(Attribute::AttachmentCreationDate)?.as_date())
    }

    pub fn modification_date(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(self.read(Attribute::AttachmentModificationDate)?.as_date())
    }

    pub fn content_identifier(&self) -> Result<Option<String>> {
        self.read_text(Attribute::AttachmentContentIdentifier)
    }

    /// The URL for attachments that are web links.
    pub fn url(&self) -> Result<Option<String>> {
        self.read_text(Attribute::AttachmentUrl)
    }

    /// Write the attachment into `dir` under the last component of its name. Returns the
    /// written path, which is always directly inside `dir`.
    pub fn save(&self, dir: &Path) -> Result<PathBuf> {
        if !dir.is_dir() {
            return Err(NotesError::FileNotFound(dir.to_path_buf()));
        }
        let name = self.name()?;
        let file_name = Path::new(&name)
            .file_name()
            .ok_or_else(|| NotesError::Api(format!("Attachment name {name:?} is not a file name")))?;
        let destination = dir.join(file_name);
        self.session
            .bridge()
            .save_attachment(&self.handle, &destination)?;
        Ok(destination)
    }
}

impl std::fmt::Debug for Attachment<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Attachment")
            .field("handle", &self.handle)
            .field("id", &self.id.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::memory::fixtures::HostFixture;
    use std::fs;

    #[test]
    fn reads_attachment_attributes() {
        let fx = HostFixture::shopping();
        let handle = fx.host.add_attachment(&fx.notes[0], "list.pdf", b"%PDF");
        fx.host.set_attachment_url(&handle, "https://example.com/list");
        let session = fx.host.session();
        let attachment = Attachment::new(&session, handle.clone());
        assert_eq!(attachment.name().unwrap(), "list.pdf");
        assert_eq!(attachment.id().unwrap().as_str(), fx.host.id_of(&handle));
        assert!(attachment.content_identifier().unwrap().is_some());
        assert!(attachment.creation_date().unwrap().is_some());
        assert!(attachment.modification_date().unwrap().is_some());
        assert_eq!(
            attachment.url().unwrap().as_deref(),
            Some("https://example.com/list")
        );
    }

    #[test]
    fn url_is_none_for_files() {
        let fx = HostFixture::shopping();
        let handle = fx.host.add_attachment(&fx.notes[0], "a.png", b"png");
        let session = fx.host.session();
        assert_eq!(Attachment::new(&session, handle).url().unwrap(), None);
    }

    #[test]
    fn save_writes_into_the_directory() {
        let dir = tempfile::tempdir().unwrap();
        let fx = HostFixture::shopping();
        let handle = fx.host.add_attachment(&fx.notes[0], "a.txt", b"hello");
        let session = fx.host.session();
        let path = Attachment::new(&session, handle).save(dir.path()).unwrap();
        assert_eq!(path, dir.path().join("a.txt"));
        assert_eq!(fs::read_to_string(path).unwrap(), "hello");
    }

    #[test]
    fn save_requires_an_existing_directory() {
        let fx = HostFixture::shopping();
        let handle = fx.host.add_attachment(&fx.notes[0], "a.txt", b"hello");
        let session = fx.host.session();
        let err = Attachment::new(&session, handle)
            .save(Path::new("/no/such/dir"))
            .unwrap_err();
        assert!(matches!(err, NotesError::FileNotFound(_)));
    }

    #[test]
    fn save_stays_inside_the_directory() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("out");
        fs::create_dir(&dir).unwrap();
        let fx = HostFixture::shopping();
        let session = fx.host.session();

        let handle = fx.host.add_attachment(&fx.notes[0], "../escape.txt", b"x");
        let path = Attachment::new(&session, handle).save(&dir).unwrap();
        assert_eq!(path, dir.join("escape.txt"));
        assert!(!root.path().join("escape.txt").exists());

        let handle = fx.host.add_attachment(&fx.notes[0], "..", b"x");
        let err = Attachment::new(&session, handle).save(&dir).unwrap_err();
        assert!(matches!(err, NotesError::Api(_)));
    }
}
